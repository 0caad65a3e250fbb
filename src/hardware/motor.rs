// Track motor: LEDC PWM for speed, one GPIO for direction

use esp_idf_hal::gpio::{AnyOutputPin, Output, OutputPin, PinDriver};
use esp_idf_hal::ledc::{
    config::TimerConfig, LedcChannel, LedcDriver, LedcTimer, LedcTimerDriver, Resolution,
};
use esp_idf_hal::peripheral::Peripheral;
use esp_idf_hal::units::Hertz;
use esp_idf_sys::EspError;
use railyard_core::railway::MotorDriver;

pub struct LedcMotor<'d> {
    pwm: LedcDriver<'d>,
    direction: PinDriver<'d, AnyOutputPin, Output>,
}

impl<'d> LedcMotor<'d> {
    /// Starts stopped with the direction pin high.
    pub fn new<C, T>(
        channel: impl Peripheral<P = C> + 'd,
        timer: impl Peripheral<P = T> + 'd,
        pwm_pin: impl Peripheral<P = impl OutputPin> + 'd,
        direction_pin: AnyOutputPin,
        frequency_hz: u32,
    ) -> Result<Self, EspError>
    where
        C: LedcChannel<SpeedMode = <T as LedcTimer>::SpeedMode>,
        T: LedcTimer + 'd,
    {
        let timer_config = TimerConfig::default()
            .frequency(Hertz(frequency_hz))
            .resolution(Resolution::Bits8);
        let timer = LedcTimerDriver::new(timer, &timer_config)?;
        let mut pwm = LedcDriver::new(channel, timer, pwm_pin)?;
        pwm.set_duty(0)?;

        let mut direction = PinDriver::output(direction_pin)?;
        direction.set_high()?;

        log::info!("Motor PWM ready: {} Hz, 8-bit", frequency_hz);
        Ok(Self { pwm, direction })
    }
}

impl MotorDriver for LedcMotor<'_> {
    type Error = EspError;

    fn set_duty(&mut self, duty: u8) -> Result<(), Self::Error> {
        self.pwm.set_duty(duty as u32)
    }

    fn set_direction(&mut self, high: bool) -> Result<(), Self::Error> {
        if high {
            self.direction.set_high()
        } else {
            self.direction.set_low()
        }
    }
}
