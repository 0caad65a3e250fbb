//! Recording bus, delay and motor doubles for the railway tests.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use embedded_hal::delay::DelayNs;
use embedded_hal::i2c::{ErrorKind, ErrorType, I2c, Operation};

use super::MotorDriver;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Step {
    Write { address: u8, value: u16 },
    DelayMs(u32),
}

/// Shared, ordered record of bus writes and delays.
#[derive(Debug, Clone, Default)]
pub(crate) struct Trace(Rc<RefCell<Vec<Step>>>);

impl Trace {
    pub fn push(&self, step: Step) {
        self.0.borrow_mut().push(step);
    }

    pub fn steps(&self) -> Vec<Step> {
        self.0.borrow().clone()
    }

    pub fn clear(&self) {
        self.0.borrow_mut().clear();
    }
}

#[derive(Debug, Default)]
pub(crate) struct MockBus {
    ports: HashMap<u8, u16>,
    pulled_low: HashMap<u8, u16>,
    pub fail: bool,
    pub trace: Trace,
}

impl MockBus {
    pub fn with_trace(trace: Trace) -> Self {
        Self {
            trace,
            ..Default::default()
        }
    }

    pub fn port(&self, address: u8) -> u16 {
        self.ports.get(&address).copied().unwrap_or(0xFFFF)
    }

    /// Simulates something outside the chip holding `pin` low.
    pub fn pull_low(&mut self, address: u8, pin: u8) {
        *self.pulled_low.entry(address).or_default() |= 1 << pin;
    }
}

impl ErrorType for MockBus {
    type Error = ErrorKind;
}

impl I2c for MockBus {
    fn transaction(
        &mut self,
        address: u8,
        operations: &mut [Operation<'_>],
    ) -> Result<(), Self::Error> {
        if self.fail {
            return Err(ErrorKind::Other);
        }
        for op in operations {
            match op {
                Operation::Write(bytes) => {
                    let value = u16::from_le_bytes([bytes[0], bytes[1]]);
                    self.ports.insert(address, value);
                    self.trace.push(Step::Write { address, value });
                }
                Operation::Read(buf) => {
                    let level = self.port(address)
                        & !self.pulled_low.get(&address).copied().unwrap_or(0);
                    buf.copy_from_slice(&level.to_le_bytes());
                }
            }
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
pub(crate) struct MockDelay {
    pub trace: Trace,
}

impl DelayNs for MockDelay {
    fn delay_ns(&mut self, _ns: u32) {}

    fn delay_ms(&mut self, ms: u32) {
        self.trace.push(Step::DelayMs(ms));
    }
}

#[derive(Debug, Default)]
pub(crate) struct MockMotor {
    pub duty: Option<u8>,
    pub dir_high: Option<bool>,
}

impl MotorDriver for MockMotor {
    type Error = ();

    fn set_duty(&mut self, duty: u8) -> Result<(), ()> {
        self.duty = Some(duty);
        Ok(())
    }

    fn set_direction(&mut self, high: bool) -> Result<(), ()> {
        self.dir_high = Some(high);
        Ok(())
    }
}
