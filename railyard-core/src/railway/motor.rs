use serde::Serialize;
use std::fmt;

/// PWM speed channel plus direction pin of the track motor driver.
pub trait MotorDriver {
    type Error: fmt::Debug;

    /// 8-bit duty cycle.
    fn set_duty(&mut self, duty: u8) -> Result<(), Self::Error>;

    fn set_direction(&mut self, high: bool) -> Result<(), Self::Error>;
}

/// Last values actually applied, so the UI slider can resync.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MotorStatus {
    pub pwm: u8,
    pub dir: &'static str,
}

impl MotorStatus {
    pub fn new(pwm: u8, dir_high: bool) -> Self {
        Self {
            pwm,
            dir: if dir_high { "high" } else { "low" },
        }
    }
}

/// Clamps a requested speed into the duty range.
pub fn clamp_speed(requested: i64) -> u8 {
    requested.clamp(0, 255) as u8
}
