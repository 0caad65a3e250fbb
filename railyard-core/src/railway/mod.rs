//! Layout control: track power, yard and triple switches, and the motor.
//!
//! Three PCF8575 expanders share one I2C bus. Track power outputs and the
//! switch machine outputs are active low; switch position feedback inputs
//! read low when engaged.

pub mod motor;
pub mod pcf8575;

#[cfg(test)]
pub(crate) mod mock;

use embedded_hal::delay::DelayNs;
use embedded_hal::i2c::{ErrorKind, I2c};
use serde::Serialize;
use thiserror::Error;

use crate::config::RailwayConfig;
use crate::http::{parse_int, query_param, Reply, Route};

pub use motor::{clamp_speed, MotorDriver, MotorStatus};
pub use pcf8575::Pcf8575;

/// Yard switch position inputs and outputs, indexed by switch number.
pub const YARD_IN1_PINS: [u8; 4] = [7, 5, 3, 13];
pub const YARD_IN2_PINS: [u8; 4] = [6, 4, 2, 14];
pub const YARD_OUT_PINS: [u8; 4] = [11, 10, 9, 12];
/// Auxiliary relay on the yard expander, also used by the triple switches.
pub const YARD_AUX_RELAY_PIN: u8 = 8;

pub const TRIPLE_IN1_PINS: [u8; 2] = [0, 2];
pub const TRIPLE_IN2_PINS: [u8; 2] = [1, 3];
pub const TRIPLE_OUT1_PINS: [u8; 2] = [11, 9];
pub const TRIPLE_OUT2_PINS: [u8; 2] = [10, 8];

/// Track power outputs reported by the status endpoint.
pub const TRACK_STATUS_PINS: std::ops::RangeInclusive<u8> = 8..=15;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RailwayError {
    #[error("{0}")]
    MissingParameter(&'static str),
    #[error("Invalid pin number")]
    InvalidPin,
    #[error("Invalid switch number")]
    InvalidSwitch,
    #[error("I2C error: {0:?}")]
    Bus(ErrorKind),
    #[error("Motor error: {0}")]
    Motor(String),
}

impl RailwayError {
    pub fn status_code(&self) -> u16 {
        match self {
            RailwayError::MissingParameter(_)
            | RailwayError::InvalidPin
            | RailwayError::InvalidSwitch => 400,
            RailwayError::Bus(_) | RailwayError::Motor(_) => 500,
        }
    }
}

pub(crate) fn bus_error<E: embedded_hal::i2c::Error>(e: E) -> RailwayError {
    RailwayError::Bus(e.kind())
}

fn motor_error<E: std::fmt::Debug>(e: E) -> RailwayError {
    RailwayError::Motor(format!("{:?}", e))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum YardColor {
    Green,
    Red,
    Blue,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TripleColor {
    Blue,
    Green,
    Red,
    Orange,
}

impl TripleColor {
    fn from_inputs(in1: bool, in2: bool) -> Self {
        match (in1, in2) {
            (true, true) => TripleColor::Blue,
            (true, false) => TripleColor::Green,
            (false, true) => TripleColor::Red,
            (false, false) => TripleColor::Orange,
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            TripleColor::Blue => "blue",
            TripleColor::Green => "green",
            TripleColor::Red => "red",
            TripleColor::Orange => "orange",
        }
    }
}

#[derive(Debug, Serialize)]
struct ClickReply {
    status: &'static str,
    message: String,
}

impl ClickReply {
    fn success(message: String) -> Reply {
        Reply::json(&ClickReply {
            status: "success",
            message,
        })
    }
}

pub struct Railway<I2C, M> {
    bus: I2C,
    track: Pcf8575,
    yard: Pcf8575,
    triple: Pcf8575,
    motor: M,
    pwm: u8,
    dir_high: bool,
    config: RailwayConfig,
}

impl<I2C, M> Railway<I2C, M>
where
    I2C: I2c,
    M: MotorDriver,
{
    pub fn new(bus: I2C, motor: M, config: RailwayConfig) -> Self {
        Self {
            bus,
            track: Pcf8575::new(config.track_address),
            yard: Pcf8575::new(config.yard_address),
            triple: Pcf8575::new(config.triple_address),
            motor,
            pwm: 0,
            dir_high: true,
            config,
        }
    }

    /// Releases every expander output and stops the motor.
    pub fn init(&mut self) -> Result<(), RailwayError> {
        self.track.write16(&mut self.bus, 0xFFFF)?;
        self.yard.write16(&mut self.bus, 0xFFFF)?;
        self.triple.write16(&mut self.bus, 0xFFFF)?;
        self.set_speed(0)?;
        self.set_direction(true)?;
        log::info!(
            "Railway ready: track 0x{:02x}, yard 0x{:02x}, triple 0x{:02x}",
            self.track.address(),
            self.yard.address(),
            self.triple.address()
        );
        Ok(())
    }

    /// `on` drives the track power output low.
    pub fn set_track(&mut self, pin: u8, on: bool) -> Result<(), RailwayError> {
        self.track.write(&mut self.bus, pin, !on)
    }

    pub fn track_status(&mut self) -> Result<Vec<&'static str>, RailwayError> {
        let levels = self.track.read16(&mut self.bus)?;
        Ok(TRACK_STATUS_PINS
            .map(|pin| if levels & (1 << pin) == 0 { "on" } else { "off" })
            .collect())
    }

    pub fn yard_status(&mut self) -> Result<[YardColor; 4], RailwayError> {
        let levels = self.yard.read16(&mut self.bus)?;
        let low = |pin: u8| levels & (1 << pin) == 0;
        Ok(std::array::from_fn(|i| {
            if low(YARD_IN1_PINS[i]) {
                YardColor::Green
            } else if low(YARD_IN2_PINS[i]) {
                YardColor::Red
            } else {
                YardColor::Blue
            }
        }))
    }

    /// Pulses the switch machine. A switch showing red needs the aux relay
    /// engaged for the duration of the pulse.
    pub fn throw_yard<D: DelayNs>(&mut self, sw: usize, delay: &mut D) -> Result<(), RailwayError> {
        let output = *YARD_OUT_PINS.get(sw).ok_or(RailwayError::InvalidSwitch)?;
        let is_red = !self.yard.read(&mut self.bus, YARD_IN2_PINS[sw])?;

        if is_red {
            self.yard.write(&mut self.bus, YARD_AUX_RELAY_PIN, false)?;
            delay.delay_ms(self.config.aux_settle_ms);
        }

        self.yard.write(&mut self.bus, output, false)?;
        delay.delay_ms(self.config.yard_pulse_ms);
        self.yard.write(&mut self.bus, output, true)?;

        if is_red {
            self.yard.write(&mut self.bus, YARD_AUX_RELAY_PIN, true)?;
        }
        log::info!("Yard switch {} thrown (red: {})", sw, is_red);
        Ok(())
    }

    pub fn triple_status(&mut self) -> Result<[TripleColor; 2], RailwayError> {
        let levels = self.triple.read16(&mut self.bus)?;
        let low = |pin: u8| levels & (1 << pin) == 0;
        Ok(std::array::from_fn(|i| {
            TripleColor::from_inputs(low(TRIPLE_IN1_PINS[i]), low(TRIPLE_IN2_PINS[i]))
        }))
    }

    /// Moves a triple switch on from its current position; returns the
    /// position it was in.
    pub fn throw_triple<D: DelayNs>(
        &mut self,
        sw: usize,
        delay: &mut D,
    ) -> Result<TripleColor, RailwayError> {
        if sw >= TRIPLE_IN1_PINS.len() {
            return Err(RailwayError::InvalidSwitch);
        }
        let color = self.triple_status()?[sw];
        let out1 = TRIPLE_OUT1_PINS[sw];
        let out2 = TRIPLE_OUT2_PINS[sw];
        let pulse = self.config.triple_pulse_ms;

        match color {
            TripleColor::Blue | TripleColor::Green => {
                let out = if color == TripleColor::Blue { out1 } else { out2 };
                self.yard.write(&mut self.bus, YARD_AUX_RELAY_PIN, false)?;
                self.triple.write(&mut self.bus, out, false)?;
                delay.delay_ms(pulse);
                self.triple.write(&mut self.bus, out, true)?;
                self.yard.write(&mut self.bus, YARD_AUX_RELAY_PIN, true)?;
            }
            TripleColor::Red => {
                self.triple.write(&mut self.bus, out1, false)?;
                self.triple.write(&mut self.bus, out2, false)?;
                delay.delay_ms(pulse);
                self.triple.write(&mut self.bus, out1, true)?;
                self.triple.write(&mut self.bus, out2, true)?;
            }
            // Unknown position, nothing safe to drive
            TripleColor::Orange => {}
        }
        log::info!("Triple switch {} thrown from {}", sw, color.as_str());
        Ok(color)
    }

    pub fn set_speed(&mut self, pwm: u8) -> Result<(), RailwayError> {
        self.motor.set_duty(pwm).map_err(motor_error)?;
        self.pwm = pwm;
        Ok(())
    }

    pub fn set_direction(&mut self, high: bool) -> Result<(), RailwayError> {
        self.motor.set_direction(high).map_err(motor_error)?;
        self.dir_high = high;
        Ok(())
    }

    pub fn motor_status(&self) -> MotorStatus {
        MotorStatus::new(self.pwm, self.dir_high)
    }

    pub fn motor(&self) -> &M {
        &self.motor
    }

    /// Serves one of the layout routes. `uri` carries the query string.
    pub fn handle<D: DelayNs>(&mut self, route: Route, uri: &str, delay: &mut D) -> Option<Reply> {
        let result = match route {
            Route::TrackClick => self.track_click(uri),
            Route::TrackStatus => self.track_status().map(|s| Reply::json(&s)),
            Route::YardClick => self.yard_click(uri, delay),
            Route::YardStatus => self.yard_status().map(|s| Reply::json(&s)),
            Route::TripleClick => self.triple_click(uri, delay),
            Route::TripleStatus => self.triple_status().map(|s| Reply::json(&s)),
            Route::MotorSpeed => self.motor_speed(uri),
            Route::MotorDirection => self.motor_direction(uri),
            Route::MotorStatus => Ok(Reply::json(&self.motor_status())),
            _ => return None,
        };
        Some(result.unwrap_or_else(|e| {
            if e.status_code() >= 500 {
                log::error!("{:?}: {}", route, e);
            }
            Reply::text(e.status_code(), e.to_string())
        }))
    }

    fn track_click(&mut self, uri: &str) -> Result<Reply, RailwayError> {
        let (Some(num), Some(state)) = (query_param(uri, "num"), query_param(uri, "state")) else {
            return Err(RailwayError::MissingParameter("Missing parameters"));
        };
        let pin = u8::try_from(parse_int(&num))
            .ok()
            .filter(|p| *p <= 15)
            .ok_or(RailwayError::InvalidPin)?;
        self.set_track(pin, state == "on")?;
        Ok(Reply::text(200, format!("Pin {} set to {}", pin, state)))
    }

    fn yard_click<D: DelayNs>(&mut self, uri: &str, delay: &mut D) -> Result<Reply, RailwayError> {
        let sw = switch_number(uri, YARD_OUT_PINS.len())?;
        self.throw_yard(sw, delay)?;
        Ok(ClickReply::success(format!("Yard switch {} activated", sw)))
    }

    fn triple_click<D: DelayNs>(&mut self, uri: &str, delay: &mut D) -> Result<Reply, RailwayError> {
        let sw = switch_number(uri, TRIPLE_IN1_PINS.len())?;
        let color = self.throw_triple(sw, delay)?;
        Ok(ClickReply::success(format!(
            "Triple switch {} activated ({})",
            sw,
            color.as_str()
        )))
    }

    fn motor_speed(&mut self, uri: &str) -> Result<Reply, RailwayError> {
        let val = query_param(uri, "val").ok_or(RailwayError::MissingParameter("Missing val"))?;
        let pwm = clamp_speed(parse_int(&val));
        self.set_speed(pwm)?;
        log::info!("PWM set to {}", pwm);
        Ok(Reply::text(200, format!("PWM set to {}", pwm)))
    }

    fn motor_direction(&mut self, uri: &str) -> Result<Reply, RailwayError> {
        let state =
            query_param(uri, "state").ok_or(RailwayError::MissingParameter("Missing state"))?;
        self.set_direction(state == "high")?;
        Ok(Reply::text(200, format!("Direction set to {}", state)))
    }
}

fn switch_number(uri: &str, count: usize) -> Result<usize, RailwayError> {
    let num = query_param(uri, "num")
        .ok_or(RailwayError::MissingParameter("Missing switch number"))?;
    usize::try_from(parse_int(&num))
        .ok()
        .filter(|sw| *sw < count)
        .ok_or(RailwayError::InvalidSwitch)
}
