//! USB Audio Class 1.0
//!
//! This module provides a USB device class based on "Universal Serial Bus Device Class Definition
//! for Audio Devices", Release 1.0, for a microphone array.
//!
//! A single streaming interface carries one operational alternate setting per entry of the channel
//! topology. Each of them has its own isochronous IN endpoint, sized for its channel count.
//!
//! Terminal topology, per alternate setting:
//! Input terminals (one per grouping) -> Selector unit -> Feature unit -> Output terminal (USB streaming)
use embassy_futures::select::{select4, Either4};
use embassy_usb::descriptor::{SynchronizationType, UsageType};
use embassy_usb::driver::{Driver, Endpoint, EndpointError, EndpointIn, EndpointType};
use embassy_usb::Builder;
use heapless::Vec;

use crate::gain::GainModel;
use crate::sampler::{Sampling, SAMPLE_SIZE};
use crate::topology::{Configuration, CONFIGURATIONS, CONFIGURATION_COUNT, MAX_LOGICAL_CHANNEL_COUNT};
use crate::{RateChange, HIGHEST_SAMPLE_RATE_HZ, LOWEST_SAMPLE_RATE_HZ};
use class_codes::*;

mod class_codes;
pub mod control;

pub use control::{AudioControl, Potentiometers, ProtocolError, UsbInterfaces};

/// Significant bits per sample.
const BIT_RESOLUTION: u8 = 12;

/// Room for the largest class-specific descriptor body.
const MAX_DESCRIPTOR_SIZE: usize = 6 + MAX_LOGICAL_CHANNEL_COUNT;

type DescriptorBody = Vec<u8, MAX_DESCRIPTOR_SIZE>;

/// Isochronous packet size for a channel count.
///
/// Room for one frame more than the highest rate produces per 1 ms frame, to absorb clock drift
/// between the sample timer and the host.
pub const fn packet_size(channel_count: usize) -> usize {
    let frames = (HIGHEST_SAMPLE_RATE_HZ as usize).div_ceil(1000) + 1;

    channel_count * SAMPLE_SIZE * frames
}

/// Isochronous packet size for a configuration.
pub fn max_packet_size(configuration: &Configuration) -> usize {
    packet_size(configuration.channel_count())
}

/// The largest isochronous packet size of all configurations.
pub const MAX_PACKET_SIZE: usize = packet_size(MAX_LOGICAL_CHANNEL_COUNT);

fn input_terminal_descriptor(input_terminal_id: u8, channel_count: usize) -> DescriptorBody {
    let terminal_type = TERMINAL_IN_MICROPHONE_ARRAY;

    Vec::from_slice(&[
        INPUT_TERMINAL,             // bDescriptorSubtype
        input_terminal_id,          // bTerminalID
        terminal_type as u8,        //
        (terminal_type >> 8) as u8, // wTerminalType
        0x00,                       // bAssocTerminal (none)
        channel_count as u8,        // bNrChannels
        0x00,                       //
        0x00,                       // wChannelConfig (no spatial location)
        0x00,                       // iChannelNames (none)
        0x00,                       // iTerminal (none)
    ])
    .unwrap_or_default()
}

fn selector_unit_descriptor(selector_unit_id: u8, configuration: &Configuration) -> DescriptorBody {
    let mut descriptor = DescriptorBody::new();

    let _ = descriptor.extend_from_slice(&[
        SELECTOR_UNIT,                          // bDescriptorSubtype
        selector_unit_id,                       // bUnitID
        configuration.groupings.len() as u8,    // bNrInPins
    ]);

    for grouping in configuration.groupings {
        let _ = descriptor.push(grouping.input_terminal_id); // baSourceID
    }

    let _ = descriptor.push(0x00); // iSelector (none)
    descriptor
}

fn feature_unit_descriptor(configuration: &Configuration) -> DescriptorBody {
    let controls = FU_CONTROLS_MUTE | FU_CONTROLS_VOLUME | FU_CONTROLS_AUTOMATIC_GAIN;
    let mut descriptor = DescriptorBody::new();

    let _ = descriptor.extend_from_slice(&[
        FEATURE_UNIT,                            // bDescriptorSubtype
        configuration.feature_unit_id,           // bUnitID
        configuration.feature_unit_source_id(),  // bSourceID
        1,                                       // bControlSize (one byte per control)
        FU_CONTROL_UNDEFINED,                    // Master controls (none)
    ]);

    for _ in 0..configuration.channel_count() {
        let _ = descriptor.push(controls); // bmaControls
    }

    let _ = descriptor.push(0x00); // iFeature (none)
    descriptor
}

fn output_terminal_descriptor(configuration: &Configuration) -> DescriptorBody {
    let terminal_type = TERMINAL_USB_STREAMING;

    Vec::from_slice(&[
        OUTPUT_TERMINAL,                  // bDescriptorSubtype
        configuration.output_terminal_id, // bTerminalID
        terminal_type as u8,              //
        (terminal_type >> 8) as u8,       // wTerminalType
        0x00,                             // bAssocTerminal (none)
        configuration.feature_unit_id,    // bSourceID (the feature unit)
        0x00,                             // iTerminal (none)
    ])
    .unwrap_or_default()
}

/// Walk all units and terminals of the audio control interface, in topology order.
fn for_each_unit_descriptor(mut write: impl FnMut(&[u8])) {
    for configuration in CONFIGURATIONS.iter() {
        for grouping in configuration.groupings {
            write(&input_terminal_descriptor(
                grouping.input_terminal_id,
                configuration.channel_count(),
            ));
        }

        if let Some(selector_unit_id) = configuration.selector_unit_id {
            write(&selector_unit_descriptor(selector_unit_id, configuration));
        }

        write(&feature_unit_descriptor(configuration));
        write(&output_terminal_descriptor(configuration));
    }
}

/// Format type I descriptor of a configuration, with a continuous sampling frequency range [UAC Formats 2.2.5].
fn format_descriptor(configuration: &Configuration) -> [u8; 12] {
    let lowest = LOWEST_SAMPLE_RATE_HZ.to_le_bytes();
    let highest = HIGHEST_SAMPLE_RATE_HZ.to_le_bytes();

    [
        FORMAT_TYPE,                          // bDescriptorSubtype
        FORMAT_TYPE_I,                        // bFormatType
        configuration.channel_count() as u8,  // bNrChannels
        SAMPLE_SIZE as u8,                    // bSubframeSize
        BIT_RESOLUTION,                       // bBitResolution
        0x00,                                 // bSamFreqType (continuous)
        lowest[0],
        lowest[1],
        lowest[2], // tLowerSamFreq
        highest[0],
        highest[1],
        highest[2], // tUpperSamFreq
    ]
}

/// Internal state for the USB Audio Class
pub struct State<P, S> {
    control: Option<AudioControl<P, S>>,
}

impl<P, S> Default for State<P, S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P, S> State<P, S> {
    pub const fn new() -> Self {
        Self { control: None }
    }
}

/// The audio function of the microphone array.
pub struct MicArray<'d, D: Driver<'d>> {
    endpoints: [D::EndpointIn; CONFIGURATION_COUNT],
}

impl<'d, D: Driver<'d>> MicArray<'d, D> {
    /// Creates a new `MicArray` (USB audio class 1.0), and registers its control handler.
    ///
    /// # Arguments
    ///
    /// * `builder` - The builder for the class.
    /// * `state` - The internal state of the class, which holds the control handler.
    /// * `potentiometers` - The preamplifier gain potentiometers.
    /// * `sampling` - Starts and stops sample acquisition.
    /// * `gain` - The preamplifier gain model.
    /// * `rate_change` - When sampling rate changes take effect.
    pub fn new<P, S>(
        builder: &mut Builder<'d, D>,
        state: &'d mut State<P, S>,
        potentiometers: P,
        sampling: S,
        gain: GainModel,
        rate_change: RateChange,
    ) -> Self
    where
        P: Potentiometers + 'd,
        S: Sampling + 'd,
    {
        let mut func = builder.function(AUDIO_FUNCTION, FUNCTION_SUBCLASS_UNDEFINED, PROTOCOL_NONE);

        // Audio control interface (mandatory) [UAC 4.3.1]
        let mut interface = func.interface();
        let control_interface = interface.interface_number();
        let streaming_interface = u8::from(control_interface) + 1;
        let mut alt = interface.alt_setting(USB_AUDIO_CLASS, USB_AUDIOCONTROL_SUBCLASS, PROTOCOL_NONE, None);

        // ==================================================
        // Class-specific AC Interface Descriptor [UAC 4.3.2]
        const DESCRIPTOR_HEADER_SIZE: usize = 2;
        const INTERFACE_DESCRIPTOR_SIZE: usize = 7;

        let mut total_descriptor_length = DESCRIPTOR_HEADER_SIZE + INTERFACE_DESCRIPTOR_SIZE;
        for_each_unit_descriptor(|descriptor| total_descriptor_length += DESCRIPTOR_HEADER_SIZE + descriptor.len());

        let interface_descriptor: [u8; INTERFACE_DESCRIPTOR_SIZE] = [
            HEADER_SUBTYPE,                       // bDescriptorSubtype (Header)
            ADC_VERSION as u8,                    //
            (ADC_VERSION >> 8) as u8,             // bcdADC
            total_descriptor_length as u8,        //
            (total_descriptor_length >> 8) as u8, // wTotalLength
            0x01,                                 // bInCollection (1 streaming interface)
            streaming_interface,                  // baInterfaceNr
        ];

        alt.descriptor(CS_INTERFACE, &interface_descriptor);
        for_each_unit_descriptor(|descriptor| alt.descriptor(CS_INTERFACE, descriptor));

        // =====================================================
        // Audio streaming interface, zero-bandwidth [UAC 4.5.1]
        let mut interface = func.interface();
        let streaming_interface = interface.interface_number();
        let alt = interface.alt_setting(USB_AUDIO_CLASS, USB_AUDIOSTREAMING_SUBCLASS, PROTOCOL_NONE, None);
        drop(alt);

        // ===================================================
        // Audio streaming interface, operational [UAC 4.5.1]
        // One alternate setting per configuration, in alternate setting order.
        let endpoints = CONFIGURATIONS.each_ref().map(|configuration| {
            let mut alt = interface.alt_setting(USB_AUDIO_CLASS, USB_AUDIOSTREAMING_SUBCLASS, PROTOCOL_NONE, None);

            alt.descriptor(
                CS_INTERFACE,
                &[
                    AS_GENERAL,                       // bDescriptorSubtype
                    configuration.output_terminal_id, // bTerminalLink
                    0x01,                             // bDelay (one frame)
                    PCM as u8,                        //
                    (PCM >> 8) as u8,                 // wFormatTag (PCM format)
                ],
            );

            alt.descriptor(CS_INTERFACE, &format_descriptor(configuration));

            let endpoint =
                alt.alloc_endpoint_in(EndpointType::Isochronous, max_packet_size(configuration) as u16, 1);

            alt.endpoint_descriptor(
                endpoint.info(),
                SynchronizationType::Asynchronous,
                UsageType::DataEndpoint,
                &[
                    0x00, // bRefresh (0)
                    0x00, // bSynchAddress (none)
                ],
            );

            alt.descriptor(
                CS_ENDPOINT,
                &[
                    AS_GENERAL,                   // bDescriptorSubtype (General)
                    EP_CS_ATTR_SAMPLING_FREQ,     // bmAttributes - support sampling frequency adjustment
                    LOCK_DELAY_UNITS_PCM_SAMPLES, // bLockDelayUnits (PCM sample count)
                    0x0000 as u8,
                    (0x0000 >> 8) as u8, // wLockDelay (0)
                ],
            );

            endpoint
        });

        // Free up the builder.
        drop(func);

        let interfaces = UsbInterfaces {
            control: control_interface,
            streaming: streaming_interface,
            endpoints: endpoints.each_ref().map(|endpoint| u8::from(endpoint.info().addr)),
        };

        let control = state.control.insert(AudioControl::new(
            interfaces,
            potentiometers,
            sampling,
            gain,
            rate_change,
        ));
        builder.handler(control);

        MicArray { endpoints }
    }

    /// Waits for the USB host to select an operational alternate setting.
    ///
    /// Returns the index of its configuration in `CONFIGURATIONS`.
    pub async fn wait_connection(&mut self) -> usize {
        let [first, second, third, fourth] = &mut self.endpoints;

        match select4(
            first.wait_enabled(),
            second.wait_enabled(),
            third.wait_enabled(),
            fourth.wait_enabled(),
        )
        .await
        {
            Either4::First(_) => 0,
            Either4::Second(_) => 1,
            Either4::Third(_) => 2,
            Either4::Fourth(_) => 3,
        }
    }

    /// Writes a single packet into the IN endpoint of a configuration.
    pub async fn write_packet(&mut self, configuration_index: usize, data: &[u8]) -> Result<(), EndpointError> {
        match self.endpoints.get_mut(configuration_index) {
            Some(endpoint) => endpoint.write(data).await,
            None => Err(EndpointError::Disabled),
        }
    }

    /// Gets the maximum packet size in bytes for the endpoint of a configuration.
    pub fn max_packet_size(&self, configuration_index: usize) -> u16 {
        self.endpoints
            .get(configuration_index)
            .map_or(0, |endpoint| endpoint.info().max_packet_size)
    }
}
