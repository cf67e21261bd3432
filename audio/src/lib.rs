//! Hardware-independent parts of the USB microphone array.
//!
//! - [`gain`] converts between potentiometer settings and USB volume.
//! - [`ring_buffer`] queues sample frames from the sampling interrupt to the USB streaming task.
//! - [`topology`] holds the channel groupings, and the state of the selector units.
//! - [`sampler`] acquires one frame per sampling period.
//! - [`uac1`] is the USB Audio Class 1.0 function, with its control request handling.
#![cfg_attr(not(test), no_std)]

// This mod MUST go first, so that the others see its macros.
#[macro_use]
pub(crate) mod fmt;

pub mod gain;
pub mod ring_buffer;
pub mod sampler;
pub mod topology;
pub mod uac1;

/// The lowest sampling rate that the host may request.
pub const LOWEST_SAMPLE_RATE_HZ: u32 = 4_000;

/// The highest sampling rate that the host may request.
pub const HIGHEST_SAMPLE_RATE_HZ: u32 = 48_000;

/// The sampling rate after power-up.
pub const DEFAULT_SAMPLE_RATE_HZ: u32 = 8_000;

/// When a new sampling rate, requested by the host, takes effect.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RateChange {
    /// On the next (re)start of sampling, e.g. by selecting an alternate setting.
    Deferred,
    /// Right away. Running sampling is restarted at the new rate.
    Immediate,
}
