use anyhow::Result;
use esp_idf_hal::i2c::{I2cConfig, I2cDriver};
use esp_idf_hal::prelude::*;
use esp_idf_svc::{eventloop::EspSystemEventLoop, nvs::EspDefaultNvsPartition};
use esp_idf_sys as _; // Binstart
use std::sync::{Arc, Mutex};
use std::time::Duration;

use log::info;

#[allow(unexpected_cfgs)]
mod app_desc {
    esp_idf_sys::esp_app_desc!();
}

mod config;
mod hardware;
mod logging;
mod network;
mod ota;
mod system;
mod version;

use crate::hardware::LedcMotor;
use crate::network::{AccessPoint, RailyardServer};
use crate::ota::EspFlashUpdater;
use crate::system::{EspClock, LittleFsVolume};
use railyard_core::railway::Railway;
use railyard_core::{ServiceAction, UpdateController, VolumeCoordinator};

const SERVICE_INTERVAL: Duration = Duration::from_millis(10);

fn main() -> Result<()> {
    esp_idf_svc::sys::link_patches();

    if let Err(e) = logging::init_logger() {
        println!("Logger init failed: {}", e);
    }
    if let Some(level) = option_env!("RAILYARD_LOG_LEVEL") {
        if !logging::set_max_level_from_str(level) {
            log::warn!("Ignoring unknown log level '{}'", level);
        }
    }
    info!("Railyard controller {}", version::version_info());
    info!("Free heap: {} bytes", unsafe {
        esp_idf_sys::esp_get_free_heap_size()
    });
    system::reset::log_reset_reason();

    let peripherals = Peripherals::take()?;
    let sys_loop = EspSystemEventLoop::take()?;
    let nvs = EspDefaultNvsPartition::take()?;

    let config = config::load_or_default(&nvs)?;

    // Layout hardware: three PCF8575 expanders on I2C plus the motor driver
    let i2c = I2cDriver::new(
        peripherals.i2c0,
        peripherals.pins.gpio21,
        peripherals.pins.gpio22,
        &I2cConfig::new().baudrate(100.kHz().into()),
    )?;
    let motor = LedcMotor::new(
        peripherals.ledc.channel0,
        peripherals.ledc.timer0,
        peripherals.pins.gpio14,
        peripherals.pins.gpio27.into(),
        config.railway.pwm_frequency_hz,
    )?;
    let mut railway = Railway::new(i2c, motor, config.railway.clone());
    if let Err(e) = railway.init() {
        // Keep serving: the UI reports bus errors per request
        log::error!("Railway init failed: {}", e);
    }

    let mut volume = VolumeCoordinator::new(LittleFsVolume::new());
    if !volume.ensure_mounted() {
        log::error!("LittleFS mount failed; static pages unavailable until a filesystem update");
    }

    let controller = Arc::new(Mutex::new(UpdateController::new(
        &config.ota,
        EspClock,
        EspFlashUpdater::new(),
        volume,
    )));
    let railway = Arc::new(Mutex::new(railway));

    let _access_point = AccessPoint::start(peripherals.modem, sys_loop, nvs, &config.network)?;
    let _server = RailyardServer::new(controller.clone(), railway, &config.ota.upload_field)?;
    info!("Server started");

    loop {
        let action = match controller.lock() {
            Ok(mut ctrl) => ctrl.service(),
            Err(e) => {
                log::error!("Update controller lock poisoned: {}", e);
                ServiceAction::Idle
            }
        };
        if action == ServiceAction::Restart {
            system::reset::restart();
        }
        std::thread::sleep(SERVICE_INTERVAL);
    }
}
