#![no_std]

pub mod usb_audio;

use audio::sampler::{FrameQueue, MAX_FRAME_SIZE};
use audio::uac1::MAX_PACKET_SIZE;
use static_assertions;

// Converter clock, within the 20 MHz that the AD7928 supports.
pub const SPI_FREQUENCY_HZ: u32 = 16_000_000;

// Standard mode, for the AD5252 potentiometers.
pub const I2C_FREQUENCY_HZ: u32 = 100_000;

// Sample frames in flight between the sampling interrupt and the USB streaming task.
pub const FRAME_BUFFER_SIZE: usize = 2048;

// Overflow drops whole frames only.
static_assertions::const_assert_eq!(FRAME_BUFFER_SIZE % MAX_FRAME_SIZE, 0);

// At least two full packets of the widest configuration.
static_assertions::const_assert!(FRAME_BUFFER_SIZE >= 2 * MAX_PACKET_SIZE);

pub const CONTROL_BUF_SIZE: usize = 64;

// Type definitions
pub type Frames = FrameQueue<FRAME_BUFFER_SIZE>;
