//! A driver for the dual-channel digital potentiometers that set the microphone preamplifier gains.
//!
//! Each chip carries two wiper registers, so four chips on a shared bus serve eight microphone channels.
//! The wiper register counts the other way around than the preamplifier gain, which is why every byte
//! on the bus is the complement of the setting that callers work with: 0 is no gain, 255 is full gain.
#![cfg_attr(not(test), no_std)]

#[macro_use]
mod fmt;

use embedded_hal::i2c::{self, ErrorKind, NoAcknowledgeSource, Operation};

/// The number of microphone channels served by the potentiometers on one bus.
pub const CHANNEL_COUNT: u8 = 8;

/// Base address of the chips, the pin-strapped bits select the channel pair.
const BASE_ADDRESS: i2c::SevenBitAddress = 0x2C;

/// Sub-address of the wiper that belongs to the even channel of a pair.
const EVEN_WIPER_SUB_ADDRESS: u8 = 0x01;

/// Sub-address of the wiper that belongs to the odd channel of a pair.
const ODD_WIPER_SUB_ADDRESS: u8 = 0x03;

/// The bus operation that failed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Access {
    Get,
    Set,
}

/// The step of the bus transaction at which it failed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Step {
    /// The bus could not be acquired (arbitration loss, or a bus fault).
    Start,
    /// The chip did not acknowledge its address.
    Address,
    /// The chip did not acknowledge the sub-address or the data byte.
    Data,
    /// Any other failure while the transfer was underway.
    Transfer,
}

impl From<ErrorKind> for Step {
    fn from(kind: ErrorKind) -> Self {
        match kind {
            ErrorKind::ArbitrationLoss | ErrorKind::Bus => Step::Start,
            ErrorKind::NoAcknowledge(NoAcknowledgeSource::Address) => Step::Address,
            ErrorKind::NoAcknowledge(_) => Step::Data,
            _ => Step::Transfer,
        }
    }
}

/// A failed potentiometer access.
///
/// The bus is released (STOP) before the error is returned. No retry is attempted.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct BusError {
    pub access: Access,
    pub channel: u8,
    pub step: Step,
    pub kind: ErrorKind,
}

/// Driver for the preamplifier gain potentiometers.
pub struct Rdac<I2C> {
    i2c: I2C,
}

/// The bus address of the chip that carries the wiper for `channel`.
pub fn chip_address(channel: u8) -> i2c::SevenBitAddress {
    BASE_ADDRESS | ((channel & 0x06) >> 1)
}

/// The sub-address of the wiper register for `channel` within its chip.
pub fn wiper_sub_address(channel: u8) -> u8 {
    if channel & 0x01 != 0 {
        ODD_WIPER_SUB_ADDRESS
    } else {
        EVEN_WIPER_SUB_ADDRESS
    }
}

impl<I2C> Rdac<I2C>
where
    I2C: i2c::I2c,
{
    pub fn new(i2c: I2C) -> Self {
        Rdac { i2c }
    }

    /// Give back the bus.
    pub fn release(self) -> I2C {
        self.i2c
    }

    fn bus_error(access: Access, channel: u8, error: I2C::Error) -> BusError {
        use embedded_hal::i2c::Error;

        let kind = error.kind();
        BusError {
            access,
            channel,
            step: kind.into(),
            kind,
        }
    }

    /// Read the gain setting of a channel.
    ///
    /// Writes the wiper sub-address, then reads back a single byte after a repeated start.
    /// The last (only) byte is not acknowledged, as required for ending a read.
    pub fn get(&mut self, channel: u8) -> Result<u8, BusError> {
        let channel = channel % CHANNEL_COUNT;
        let mut raw = [0u8; 1];

        self.i2c
            .transaction(
                chip_address(channel),
                &mut [
                    Operation::Write(&[wiper_sub_address(channel)]),
                    Operation::Read(&mut raw),
                ],
            )
            .map_err(|e| Self::bus_error(Access::Get, channel, e))?;

        let setting = !raw[0];

        trace!("Channel {} potentiometer reads {}", channel, setting);

        Ok(setting)
    }

    /// Write the gain setting of a channel.
    pub fn set(&mut self, channel: u8, setting: u8) -> Result<(), BusError> {
        let channel = channel % CHANNEL_COUNT;

        trace!("Channel {} potentiometer set to {}", channel, setting);

        self.i2c
            .write(chip_address(channel), &[wiper_sub_address(channel), !setting])
            .map_err(|e| Self::bus_error(Access::Set, channel, e))
    }
}
