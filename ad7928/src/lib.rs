//! A driver for the AD7928 8-channel, 12-bit successive approximation ADC.
//!
//! The converter is pipelined: every 16-bit transfer shifts in the control word that selects the
//! channel for the *next* conversion, while shifting out the result of the conversion that was armed
//! by the previous transfer. Callers that walk a channel list therefore see their samples with a
//! latency of one transfer.
//!
//! # Timing
//!
//! One call to [`Ad7928::read_and_arm_next`] is exactly one 16-bit transfer with chip-select held
//! low for its whole duration. At a 20 MHz serial clock, that is 0.8 us on the wire, plus the
//! chip-select setup and hold time. A sampling period must fit one transfer per active channel.
#![cfg_attr(not(test), no_std)]

#[macro_use]
mod fmt;

use embedded_hal::spi::{self, SpiDevice};

/// The number of analog inputs.
pub const CHANNEL_COUNT: u8 = 8;

/// Number of significant bits in a conversion result.
pub const RESOLUTION_BITS: u32 = 12;

// Control register bit assignments (MSB first).

/// Write the control register with this transfer.
const WRITE: u16 = 1 << 15;
/// Sequencer enable (unused, conversions are addressed one by one).
#[allow(unused)]
const SEQ: u16 = 1 << 14;
/// Shift of the three channel address bits.
const ADDRESS_SHIFT: u16 = 10;
/// Normal operation, the converter remains fully powered.
const POWER_MODE_NORMAL: u16 = 0b11 << 8;
/// Shadow register access (unused).
#[allow(unused)]
const SHADOW: u16 = 1 << 7;
/// Analog input range of 0 V to 2 x REFIN.
const RANGE_DOUBLE_REFERENCE: u16 = 1 << 5;
/// Straight binary result coding. When clear, results are two's complement.
#[allow(unused)]
const CODING_STRAIGHT_BINARY: u16 = 1 << 4;

/// A control word that leaves the control register untouched (DIN held high at power-up).
const DUMMY_CONVERSION: u16 = 0xFFFF;

/// Build the control word that arms a conversion on `channel`.
///
/// Normal power mode, double reference range, two's complement coding.
pub const fn control_word(channel: u8) -> u16 {
    WRITE | (((channel & 0x07) as u16) << ADDRESS_SHIFT) | POWER_MODE_NORMAL | RANGE_DOUBLE_REFERENCE
}

/// Left-justify a raw conversion result into a signed 16-bit sample.
///
/// The upper four bits of the word carry the channel address of the result and are shifted out,
/// so that the 12-bit two's complement value keeps its sign.
pub const fn left_justify(raw: u16) -> i16 {
    (raw as i16) << (16 - RESOLUTION_BITS)
}

/// AD7928 driver structure.
pub struct Ad7928<SPI> {
    spi: SPI,
}

impl<SPI> Ad7928<SPI>
where
    SPI: SpiDevice,
{
    /// Create the driver, and run the power-up dummy conversion.
    ///
    /// The SPI device must be configured for 16-bit transfers in mode 2 (clock idles high, data
    /// captured on the falling edge), MSB first.
    pub fn new(spi: SPI) -> Result<Self, SPI::Error> {
        let mut adc = Ad7928 { spi };

        // After power-up, the control register content is undefined. One conversion with
        // DIN tied high places the converter in a defined state.
        adc.transfer(DUMMY_CONVERSION)?;

        debug!("AD7928 initialized");

        Ok(adc)
    }

    /// Give back the SPI device.
    pub fn release(self) -> SPI {
        self.spi
    }

    fn transfer(&mut self, word: u16) -> Result<u16, SPI::Error> {
        let mut buffer = word.to_be_bytes();
        self.spi.transfer_in_place(&mut buffer)?;

        Ok(u16::from_be_bytes(buffer))
    }

    /// Arm a conversion on `channel`, and return the sample that was armed by the previous call.
    pub fn read_and_arm_next(&mut self, channel: u8) -> Result<i16, SPI::Error> {
        let raw = self.transfer(control_word(channel))?;

        Ok(left_justify(raw))
    }
}

/// The SPI mode the converter expects.
pub const MODE: spi::Mode = spi::MODE_2;
