//! PCF8575 16-bit quasi-bidirectional I/O expander.
//!
//! Every pin is open-drain with a weak pull-up: writing 0 drives it low,
//! writing 1 releases it so it can be read as an input. The chip has no
//! direction register, so the last written word is kept as a shadow and
//! single-pin writes modify that word.

use embedded_hal::i2c::I2c;

use super::{bus_error, RailwayError};

#[derive(Debug, Clone)]
pub struct Pcf8575 {
    address: u8,
    shadow: u16,
}

impl Pcf8575 {
    /// All pins start released.
    pub fn new(address: u8) -> Self {
        Self {
            address,
            shadow: 0xFFFF,
        }
    }

    pub fn address(&self) -> u8 {
        self.address
    }

    pub fn shadow(&self) -> u16 {
        self.shadow
    }

    pub fn read16<I: I2c>(&self, bus: &mut I) -> Result<u16, RailwayError> {
        let mut buf = [0u8; 2];
        bus.read(self.address, &mut buf).map_err(bus_error)?;
        Ok(u16::from_le_bytes(buf))
    }

    /// Level of one pin, `true` for high.
    pub fn read<I: I2c>(&self, bus: &mut I, pin: u8) -> Result<bool, RailwayError> {
        check_pin(pin)?;
        Ok(self.read16(bus)? & (1 << pin) != 0)
    }

    pub fn write16<I: I2c>(&mut self, bus: &mut I, value: u16) -> Result<(), RailwayError> {
        bus.write(self.address, &value.to_le_bytes())
            .map_err(bus_error)?;
        self.shadow = value;
        Ok(())
    }

    pub fn write<I: I2c>(&mut self, bus: &mut I, pin: u8, high: bool) -> Result<(), RailwayError> {
        check_pin(pin)?;
        let value = if high {
            self.shadow | (1 << pin)
        } else {
            self.shadow & !(1 << pin)
        };
        self.write16(bus, value)
    }
}

fn check_pin(pin: u8) -> Result<(), RailwayError> {
    if pin > 15 {
        return Err(RailwayError::InvalidPin);
    }
    Ok(())
}
