//! Timer-driven acquisition of microphone samples.
//!
//! Once per sampling period, the sample timer interrupt walks the channel table of the active
//! configuration, and performs one converter transfer per logical channel. Because the converter is
//! pipelined, each transfer arms the next channel in the table and returns the sample of the one
//! before. The final transfer of a period arms logical channel 0 again, so that the next period
//! starts with its sample already in flight.
//!
//! Samples are stored as 16-bit little-endian values, in logical channel order. A frame (one
//! sample per logical channel) is handed to the [`FrameSink`] as soon as it is complete.
use core::cell::{Cell, RefCell};

use ad7928::Ad7928;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::blocking_mutex::Mutex;
use embedded_hal::spi::SpiDevice;
use heapless::Vec;

use crate::ring_buffer::{DropOldest, RingBuffer};
use crate::topology::{ChannelTable, MAX_LOGICAL_CHANNEL_COUNT};

/// The size of one sample in byte.
pub const SAMPLE_SIZE: usize = 2;

/// The size of the largest frame in byte.
pub const MAX_FRAME_SIZE: usize = MAX_LOGICAL_CHANNEL_COUNT * SAMPLE_SIZE;

/// A converter that returns the previously armed sample, while arming the next channel.
pub trait AdcPipeline {
    fn read_and_arm_next(&mut self, channel: u8) -> i16;
}

impl<SPI: SpiDevice> AdcPipeline for Ad7928<SPI> {
    fn read_and_arm_next(&mut self, channel: u8) -> i16 {
        // A failed transfer yields silence, there is no way to report it from the interrupt.
        Ad7928::read_and_arm_next(self, channel).unwrap_or(0)
    }
}

/// The consumer of complete frames.
pub trait FrameSink {
    /// Called when sampling (re)starts, with the frame size in byte.
    fn reset(&mut self, frame_size: usize);

    /// Called with every complete frame.
    fn flush(&mut self, frame: &[u8]);
}

/// Sample frames on their way from the sampling interrupt to the USB streaming task.
///
/// Frames are queued byte-wise. With a power-of-two capacity, every frame size divides the capacity, so
/// that dropping on overflow always removes whole frames.
///
/// The queue also records the frame size that its producer currently writes. A consumer states the
/// frame size it expects, and takes nothing while the two disagree, so that a stream that is about to
/// be torn down never eats into the frames of its successor.
pub struct FrameQueue<const N: usize> {
    frame_size: Mutex<CriticalSectionRawMutex, Cell<usize>>,
    bytes: RingBuffer<u8, N, DropOldest>,
}

impl<const N: usize> FrameQueue<N> {
    pub fn new() -> Self {
        FrameQueue {
            frame_size: Mutex::new(Cell::new(0)),
            bytes: RingBuffer::new(),
        }
    }

    /// The frame size of the producer in byte, zero before sampling was ever started.
    pub fn frame_size(&self) -> usize {
        self.frame_size.lock(Cell::get)
    }

    /// The number of queued bytes.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Move as many whole frames as fit into `packet`, and return the number of bytes taken.
    ///
    /// Takes nothing, unless `frame_size` is the frame size of the producer.
    pub fn take_frames(&self, frame_size: usize, packet: &mut [u8]) -> usize {
        self.frame_size.lock(|current| {
            if frame_size == 0 || current.get() != frame_size {
                return 0;
            }

            let mut length = 0;
            while length + frame_size <= packet.len()
                && self.bytes.get_exact(&mut packet[length..length + frame_size])
            {
                length += frame_size;
            }

            length
        })
    }
}

impl<const N: usize> Default for FrameQueue<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> FrameSink for &FrameQueue<N> {
    fn reset(&mut self, frame_size: usize) {
        // The size changes together with the content, a consumer never sees one without the other.
        self.frame_size.lock(|current| {
            current.set(frame_size);
            self.bytes.init();
        });
    }

    fn flush(&mut self, frame: &[u8]) {
        self.bytes.put_slice(frame);
    }
}

/// The timer that paces the sampling interrupt.
pub trait SampleClock {
    fn start(&mut self, sample_rate_hz: u32);
    fn stop(&mut self);
}

/// Control over sampling, as seen from the USB control handler.
pub trait Sampling {
    /// (Re)start sampling the given physical channels, in logical channel order.
    fn start(&mut self, channels: &ChannelTable, sample_rate_hz: u32);

    /// Stop sampling.
    fn stop(&mut self);
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Mode {
    Idle,
    Sampling,
}

/// Acquisition state that is owned by the sampling interrupt.
pub struct Sampler<A, S> {
    adc: A,
    sink: S,
    channels: ChannelTable,
    frame: Vec<u8, MAX_FRAME_SIZE>,
    mode: Mode,
}

impl<A: AdcPipeline, S: FrameSink> Sampler<A, S> {
    pub fn new(adc: A, sink: S) -> Self {
        Sampler {
            adc,
            sink,
            channels: Vec::new(),
            frame: Vec::new(),
            mode: Mode::Idle,
        }
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    fn frame_size(&self) -> usize {
        self.channels.len() * SAMPLE_SIZE
    }

    /// Prepare for sampling the given channels, and prime the converter pipeline.
    ///
    /// The sample returned by the priming transfer belongs to whatever was armed before, and is discarded.
    pub fn start(&mut self, channels: &ChannelTable) {
        self.channels = channels.clone();
        self.frame.clear();
        self.sink.reset(self.frame_size());

        let Some(first) = self.channels.first().copied() else {
            self.mode = Mode::Idle;
            return;
        };

        let _ = self.adc.read_and_arm_next(first);
        self.mode = Mode::Sampling;

        debug!("Sampling {} channel(s)", self.channels.len());
    }

    pub fn stop(&mut self) {
        self.mode = Mode::Idle;
        self.frame.clear();
    }

    fn write(&mut self, sample: i16) {
        if self.frame.len() + SAMPLE_SIZE > self.frame_size() {
            panic!("Sample frame overrun");
        }

        // Capacity is checked above, the frame size never exceeds `MAX_FRAME_SIZE`.
        let _ = self.frame.extend_from_slice(&sample.to_le_bytes());
    }

    /// Acquire one sample per logical channel. Called once per sampling period.
    pub fn tick(&mut self) {
        if self.mode != Mode::Sampling {
            return;
        }

        for index in 1..self.channels.len() {
            let sample = self.adc.read_and_arm_next(self.channels[index]);
            self.write(sample);
        }

        // Closes the cycle, by arming logical channel 0 for the next period.
        let sample = self.adc.read_and_arm_next(self.channels[0]);
        self.write(sample);

        if self.frame.len() == self.frame_size() {
            self.sink.flush(&self.frame);
            self.frame.clear();
        }
    }
}

/// A sampler that is shared between thread mode and the sampling interrupt.
pub type SharedSampler<A, S> = Mutex<CriticalSectionRawMutex, RefCell<Option<Sampler<A, S>>>>;

/// Run one sampling period. Call this from the sample timer interrupt.
pub fn on_sample_timer<A: AdcPipeline, S: FrameSink>(sampler: &SharedSampler<A, S>) {
    sampler.lock(|sampler| {
        if let Some(sampler) = sampler.borrow_mut().as_mut() {
            sampler.tick();
        }
    });
}

/// Starts and stops the shared sampler, together with its clock.
pub struct SamplerHandle<'d, A, S, C> {
    sampler: &'d SharedSampler<A, S>,
    clock: C,
}

impl<'d, A: AdcPipeline, S: FrameSink, C: SampleClock> SamplerHandle<'d, A, S, C> {
    pub fn new(sampler: &'d SharedSampler<A, S>, clock: C) -> Self {
        SamplerHandle { sampler, clock }
    }
}

impl<'d, A: AdcPipeline, S: FrameSink, C: SampleClock> Sampling for SamplerHandle<'d, A, S, C> {
    fn start(&mut self, channels: &ChannelTable, sample_rate_hz: u32) {
        // No ticks may occur while the channel table and the frame are replaced.
        self.clock.stop();

        let sampling = self.sampler.lock(|sampler| {
            sampler.borrow_mut().as_mut().is_some_and(|sampler| {
                sampler.start(channels);
                sampler.mode() == Mode::Sampling
            })
        });

        if sampling {
            self.clock.start(sample_rate_hz);
            info!("Sampling started at {} Hz", sample_rate_hz);
        }
    }

    fn stop(&mut self) {
        self.clock.stop();
        self.sampler.lock(|sampler| {
            if let Some(sampler) = sampler.borrow_mut().as_mut() {
                sampler.stop();
            }
        });

        info!("Sampling stopped");
    }
}
