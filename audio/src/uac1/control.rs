//! Class-specific control requests of the microphone array.
//!
//! The host addresses feature units (volume, mute, automatic gain), selector units (microphone
//! groupings) and the streaming endpoints (sampling frequency). Requests are resolved against the
//! channel topology, and realized on the preamplifier potentiometers and the sampler.
//!
//! Decoding returns `Result<_, ProtocolError>` throughout, and any error is answered with a stall
//! at the top level. Requests for other interfaces or endpoints are left to other handlers.
use embassy_usb::control::{InResponse, OutResponse, Recipient, Request, RequestType};
use embassy_usb::types::InterfaceNumber;
use embassy_usb::Handler;
use embedded_hal::i2c::I2c;
use rdac::{BusError, Rdac};

use super::class_codes::*;
use crate::gain::{GainModel, FALLBACK_SETTING, VOLUME_STEPS_PER_DB};
use crate::sampler::Sampling;
use crate::topology::{
    self, Configuration, Routing, TopologyError, CONFIGURATIONS, CONFIGURATION_COUNT, MAX_LOGICAL_CHANNEL_COUNT,
    PHYSICAL_CHANNEL_COUNT,
};
use crate::{RateChange, DEFAULT_SAMPLE_RATE_HZ, HIGHEST_SAMPLE_RATE_HZ, LOWEST_SAMPLE_RATE_HZ};

/// Access to the gain potentiometers of the physical channels.
pub trait Potentiometers {
    fn get(&mut self, channel: u8) -> Result<u8, BusError>;
    fn set(&mut self, channel: u8, setting: u8) -> Result<(), BusError>;
}

impl<I2C: I2c> Potentiometers for Rdac<I2C> {
    fn get(&mut self, channel: u8) -> Result<u8, BusError> {
        Rdac::get(self, channel)
    }

    fn set(&mut self, channel: u8, setting: u8) -> Result<(), BusError> {
        Rdac::set(self, channel, setting)
    }
}

/// Reasons for rejecting a control request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ProtocolError {
    /// The request code is not supported for this control.
    UnsupportedRequest(u8),
    /// No unit or terminal with this ID takes requests.
    UnknownEntity(u8),
    /// The control selector is not implemented by the addressed entity.
    UnsupportedControl(u8),
    /// Channel 0 (master), or a channel beyond the unit's channel count.
    InvalidChannel(u8),
    /// The data stage is too short for the control.
    InvalidData,
    Topology(TopologyError),
}

impl From<TopologyError> for ProtocolError {
    fn from(error: TopologyError) -> Self {
        ProtocolError::Topology(error)
    }
}

/// Interface numbers and endpoint addresses of the audio function.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct UsbInterfaces {
    pub control: InterfaceNumber,
    pub streaming: InterfaceNumber,
    /// Streaming endpoint address per configuration (in `CONFIGURATIONS` order).
    pub endpoints: [u8; CONFIGURATION_COUNT],
}

/// Feature unit settings, per logical channel.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct FeatureSettings {
    pub volume_8q8_db: [i16; MAX_LOGICAL_CHANNEL_COUNT],
    pub is_muted: [bool; MAX_LOGICAL_CHANNEL_COUNT],
    pub automatic_gain: [bool; MAX_LOGICAL_CHANNEL_COUNT],
}

impl Default for FeatureSettings {
    fn default() -> Self {
        FeatureSettings {
            volume_8q8_db: [0; MAX_LOGICAL_CHANNEL_COUNT],
            is_muted: [false; MAX_LOGICAL_CHANNEL_COUNT],
            automatic_gain: [false; MAX_LOGICAL_CHANNEL_COUNT],
        }
    }
}

/// Everything the host has configured.
pub struct DeviceState {
    pub routing: Routing,
    /// Per configuration (in `CONFIGURATIONS` order).
    pub features: [FeatureSettings; CONFIGURATION_COUNT],
    /// The rate that was last set by the host.
    pub requested_sample_rate_hz: u32,
    /// The rate that the sampler runs at (or last ran at).
    pub sample_rate_hz: u32,
}

/// Handles audio control requests, and owns the device state.
pub struct AudioControl<P, S> {
    interfaces: UsbInterfaces,
    potentiometers: P,
    sampling: S,
    gain: GainModel,
    rate_change: RateChange,
    state: DeviceState,
}

fn configuration_index(configuration: &Configuration) -> usize {
    configuration.alternate_setting as usize - 1
}

/// Resolve a one-based channel number of a control request.
fn logical_channel(configuration: &Configuration, channel_number: u8) -> Result<usize, ProtocolError> {
    let number = channel_number as usize;

    if (1..=configuration.channel_count()).contains(&number) {
        Ok(number - 1)
    } else {
        Err(ProtocolError::InvalidChannel(channel_number))
    }
}

/// Selector units and endpoint controls are not split into channels.
fn no_channel(channel_number: u8) -> Result<(), ProtocolError> {
    match channel_number {
        0 => Ok(()),
        _ => Err(ProtocolError::InvalidChannel(channel_number)),
    }
}

/// Selector units have a single control, addressed with a zero `wValue`.
fn selector_control(control_selector: u8, channel_number: u8) -> Result<(), ProtocolError> {
    if control_selector != 0 {
        return Err(ProtocolError::UnsupportedControl(control_selector));
    }

    no_channel(channel_number)
}

fn respond(buf: &mut [u8], data: &[u8]) -> Result<usize, ProtocolError> {
    buf.get_mut(..data.len())
        .ok_or(ProtocolError::InvalidData)?
        .copy_from_slice(data);

    Ok(data.len())
}

fn sample_rate_bytes(sample_rate_hz: u32) -> [u8; 3] {
    let bytes = sample_rate_hz.to_le_bytes();
    [bytes[0], bytes[1], bytes[2]]
}

impl<P: Potentiometers, S: Sampling> AudioControl<P, S> {
    /// Create the handler, with volumes read back from the potentiometers.
    ///
    /// Potentiometers that can not be read are assumed at their fallback setting.
    pub fn new(
        interfaces: UsbInterfaces,
        mut potentiometers: P,
        sampling: S,
        gain: GainModel,
        rate_change: RateChange,
    ) -> Self {
        let mut settings = [FALLBACK_SETTING; PHYSICAL_CHANNEL_COUNT];

        for (channel, setting) in settings.iter_mut().enumerate() {
            match potentiometers.get(channel as u8) {
                Ok(value) => *setting = value,
                Err(error) => warn!("Failed to read potentiometer of channel {}: {}", channel, error),
            }
        }

        let routing = Routing::new();
        let mut features = [FeatureSettings::default(); CONFIGURATION_COUNT];

        for (configuration, features) in CONFIGURATIONS.iter().zip(features.iter_mut()) {
            for logical in 0..configuration.channel_count() {
                if let Some(physical) = routing.physical_channel(configuration, logical) {
                    features.volume_8q8_db[logical] = gain.byte_to_gain(settings[physical as usize]);
                }
            }
        }

        AudioControl {
            interfaces,
            potentiometers,
            sampling,
            gain,
            rate_change,
            state: DeviceState {
                routing,
                features,
                requested_sample_rate_hz: DEFAULT_SAMPLE_RATE_HZ,
                sample_rate_hz: DEFAULT_SAMPLE_RATE_HZ,
            },
        }
    }

    pub fn state(&self) -> &DeviceState {
        &self.state
    }

    fn restart_sampling(&mut self) {
        if self.state.routing.active().is_some() {
            self.sampling
                .start(self.state.routing.next_channel_table(), self.state.sample_rate_hz);
        }
    }

    /// Switch the streaming interface to an alternate setting.
    ///
    /// Setting 0 stops sampling. Operational settings activate their configuration, apply the requested
    /// sampling rate, and (re)start sampling.
    pub fn select_alternate_setting(&mut self, interface: InterfaceNumber, alternate_setting: u8) {
        if interface != self.interfaces.streaming {
            return;
        }

        if alternate_setting == 0 {
            debug!("Streaming interface idle");
            self.state.routing.deactivate();
            self.sampling.stop();
            return;
        }

        match self.state.routing.activate_configuration(alternate_setting) {
            Ok(channels) => {
                debug!("Alternate setting {} with channels {}", alternate_setting, channels.as_slice());
                self.state.sample_rate_hz = self.state.requested_sample_rate_hz;
                self.restart_sampling();
            }
            Err(error) => warn!("Failed to select alternate setting: {}", error),
        }
    }

    /// Volume for a logical channel, read back from its potentiometer.
    fn read_volume(&mut self, configuration: &'static Configuration, logical: usize) -> Result<i16, ProtocolError> {
        let physical = self
            .state
            .routing
            .physical_channel(configuration, logical)
            .ok_or(ProtocolError::InvalidChannel(logical as u8 + 1))?;

        let setting = match self.potentiometers.get(physical) {
            Ok(setting) => setting,
            Err(error) => {
                warn!("Failed to read potentiometer: {}", error);
                FALLBACK_SETTING
            }
        };

        let volume = self.gain.byte_to_gain(setting);
        self.state.features[configuration_index(configuration)].volume_8q8_db[logical] = volume;

        Ok(volume)
    }

    fn write_volume(
        &mut self,
        configuration: &'static Configuration,
        logical: usize,
        volume_8q8_db: i16,
    ) -> Result<(), ProtocolError> {
        let physical = self
            .state
            .routing
            .physical_channel(configuration, logical)
            .ok_or(ProtocolError::InvalidChannel(logical as u8 + 1))?;

        let volume = self.gain.clamp(volume_8q8_db);
        self.state.features[configuration_index(configuration)].volume_8q8_db[logical] = volume;

        // The request completes regardless, the cached volume is reported until the next read-back.
        if let Err(error) = self.potentiometers.set(physical, self.gain.gain_to_byte(volume)) {
            warn!("Failed to write potentiometer: {}", error);
        }

        trace!("Set channel {} (physical {}) volume: {}", logical + 1, physical, volume);
        Ok(())
    }

    fn set_feature(
        &mut self,
        configuration: &'static Configuration,
        control_selector: u8,
        channel_number: u8,
        data: &[u8],
    ) -> Result<(), ProtocolError> {
        let logical = logical_channel(configuration, channel_number)?;
        let features = &mut self.state.features[configuration_index(configuration)];

        match control_selector {
            MUTE_CONTROL => {
                let is_muted = *data.first().ok_or(ProtocolError::InvalidData)? != 0;
                features.is_muted[logical] = is_muted;
                trace!("Set channel {} mute state: {}", channel_number, is_muted);
            }
            AUTOMATIC_GAIN_CONTROL => {
                let automatic_gain = *data.first().ok_or(ProtocolError::InvalidData)? != 0;
                features.automatic_gain[logical] = automatic_gain;
                trace!("Set channel {} automatic gain: {}", channel_number, automatic_gain);
            }
            VOLUME_CONTROL => {
                let bytes = data.get(..2).ok_or(ProtocolError::InvalidData)?;
                let volume = i16::from_le_bytes([bytes[0], bytes[1]]);
                self.write_volume(configuration, logical, volume)?;
            }
            _ => return Err(ProtocolError::UnsupportedControl(control_selector)),
        }

        Ok(())
    }

    fn get_feature(
        &mut self,
        configuration: &'static Configuration,
        request: u8,
        control_selector: u8,
        channel_number: u8,
        buf: &mut [u8],
    ) -> Result<usize, ProtocolError> {
        let logical = logical_channel(configuration, channel_number)?;
        let features = self.state.features[configuration_index(configuration)];

        match (control_selector, request) {
            (VOLUME_CONTROL, GET_CUR) => {
                let volume = self.read_volume(configuration, logical)?;
                trace!("Got channel {} volume: {}", channel_number, volume);
                respond(buf, &volume.to_le_bytes())
            }
            (VOLUME_CONTROL, GET_MIN) => respond(buf, &self.gain.min_volume().to_le_bytes()),
            (VOLUME_CONTROL, GET_MAX) => respond(buf, &self.gain.max_volume().to_le_bytes()),
            (VOLUME_CONTROL, GET_RES) => respond(buf, &VOLUME_STEPS_PER_DB.to_le_bytes()),
            (MUTE_CONTROL, GET_CUR) => respond(buf, &[features.is_muted[logical].into()]),
            (AUTOMATIC_GAIN_CONTROL, GET_CUR) => respond(buf, &[features.automatic_gain[logical].into()]),
            (MUTE_CONTROL | VOLUME_CONTROL | AUTOMATIC_GAIN_CONTROL, _) => {
                Err(ProtocolError::UnsupportedRequest(request))
            }
            _ => Err(ProtocolError::UnsupportedControl(control_selector)),
        }
    }

    fn set_selector(&mut self, unit_id: u8, data: &[u8]) -> Result<(), ProtocolError> {
        let index = *data.first().ok_or(ProtocolError::InvalidData)?;

        // Selector inputs are numbered from one on the wire.
        let selection = index
            .checked_sub(1)
            .ok_or(ProtocolError::Topology(TopologyError::SelectionOutOfRange { unit_id, index }))?;

        let is_active = self.state.routing.set_selector(unit_id, selection)?;
        trace!("Set selector {} to input {}", unit_id, index);

        if is_active {
            self.restart_sampling();
        }

        Ok(())
    }

    fn get_selector(
        &mut self,
        configuration: &'static Configuration,
        unit_id: u8,
        request: u8,
        buf: &mut [u8],
    ) -> Result<usize, ProtocolError> {
        let value = match request {
            GET_CUR => self.state.routing.selection(unit_id)? + 1,
            GET_MIN | GET_RES => 1,
            GET_MAX => configuration.groupings.len() as u8,
            _ => return Err(ProtocolError::UnsupportedRequest(request)),
        };

        respond(buf, &[value])
    }

    fn interface_set(&mut self, req: Request, data: &[u8]) -> Result<(), ProtocolError> {
        let entity_id = (req.index >> 8) as u8;
        let channel_number = req.value as u8;
        let control_selector = (req.value >> 8) as u8;

        if req.request != SET_CUR {
            return Err(ProtocolError::UnsupportedRequest(req.request));
        }

        if let Some(configuration) = topology::configuration_by_feature_unit(entity_id) {
            self.set_feature(configuration, control_selector, channel_number, data)
        } else if topology::configuration_by_selector_unit(entity_id).is_some() {
            selector_control(control_selector, channel_number)?;
            self.set_selector(entity_id, data)
        } else {
            Err(ProtocolError::UnknownEntity(entity_id))
        }
    }

    fn interface_get(&mut self, req: Request, buf: &mut [u8]) -> Result<usize, ProtocolError> {
        let entity_id = (req.index >> 8) as u8;
        let channel_number = req.value as u8;
        let control_selector = (req.value >> 8) as u8;

        if let Some(configuration) = topology::configuration_by_feature_unit(entity_id) {
            self.get_feature(configuration, req.request, control_selector, channel_number, buf)
        } else if let Some(configuration) = topology::configuration_by_selector_unit(entity_id) {
            selector_control(control_selector, channel_number)?;
            self.get_selector(configuration, entity_id, req.request, buf)
        } else {
            Err(ProtocolError::UnknownEntity(entity_id))
        }
    }

    fn endpoint_set(&mut self, req: Request, data: &[u8]) -> Result<(), ProtocolError> {
        let control_selector = (req.value >> 8) as u8;

        if control_selector != SAMPLING_FREQ_CONTROL {
            return Err(ProtocolError::UnsupportedControl(control_selector));
        }
        no_channel(req.value as u8)?;

        if req.request != SET_CUR {
            return Err(ProtocolError::UnsupportedRequest(req.request));
        }

        let bytes = data.get(..3).ok_or(ProtocolError::InvalidData)?;
        let sample_rate_hz = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], 0]);
        let sample_rate_hz = sample_rate_hz.clamp(LOWEST_SAMPLE_RATE_HZ, HIGHEST_SAMPLE_RATE_HZ);

        self.state.requested_sample_rate_hz = sample_rate_hz;
        debug!("Set sample rate to {} Hz", sample_rate_hz);

        if self.rate_change == RateChange::Immediate && self.state.routing.active().is_some() {
            self.state.sample_rate_hz = sample_rate_hz;
            self.restart_sampling();
        }

        Ok(())
    }

    fn endpoint_get(&mut self, req: Request, buf: &mut [u8]) -> Result<usize, ProtocolError> {
        let control_selector = (req.value >> 8) as u8;

        if control_selector != SAMPLING_FREQ_CONTROL {
            return Err(ProtocolError::UnsupportedControl(control_selector));
        }
        no_channel(req.value as u8)?;

        let sample_rate_hz = match req.request {
            GET_CUR => self.state.requested_sample_rate_hz,
            GET_MIN => LOWEST_SAMPLE_RATE_HZ,
            GET_MAX => HIGHEST_SAMPLE_RATE_HZ,
            GET_RES => 1,
            _ => return Err(ProtocolError::UnsupportedRequest(req.request)),
        };

        respond(buf, &sample_rate_bytes(sample_rate_hz))
    }

    fn is_own_interface(&self, req: &Request) -> bool {
        req.index as u8 == u8::from(self.interfaces.control)
    }

    fn is_own_endpoint(&self, req: &Request) -> bool {
        self.interfaces.endpoints.contains(&(req.index as u8))
    }
}

fn accept_out(result: Result<(), ProtocolError>) -> OutResponse {
    match result {
        Ok(()) => OutResponse::Accepted,
        Err(error) => {
            trace!("Rejected control out request: {}", error);
            OutResponse::Rejected
        }
    }
}

impl<P: Potentiometers, S: Sampling> Handler for AudioControl<P, S> {
    fn reset(&mut self) {
        self.state.routing.deactivate();
        self.sampling.stop();
    }

    // Suspend occurs, for example, when disconnecting the USB cable.
    fn suspended(&mut self, suspended: bool) {
        if suspended {
            self.reset()
        }
    }

    fn set_alternate_setting(&mut self, iface: InterfaceNumber, alternate_setting: u8) {
        self.select_alternate_setting(iface, alternate_setting)
    }

    // Handle control set requests.
    fn control_out(&mut self, req: Request, data: &[u8]) -> Option<OutResponse> {
        if req.request_type != RequestType::Class {
            return None;
        }

        match req.recipient {
            Recipient::Interface if self.is_own_interface(&req) => Some(accept_out(self.interface_set(req, data))),
            Recipient::Endpoint if self.is_own_endpoint(&req) => Some(accept_out(self.endpoint_set(req, data))),
            _ => None,
        }
    }

    // Handle control get requests.
    fn control_in<'a>(&'a mut self, req: Request, buf: &'a mut [u8]) -> Option<InResponse<'a>> {
        if req.request_type != RequestType::Class {
            return None;
        }

        let result = match req.recipient {
            Recipient::Interface if self.is_own_interface(&req) => self.interface_get(req, buf),
            Recipient::Endpoint if self.is_own_endpoint(&req) => self.endpoint_get(req, buf),
            _ => return None,
        };

        match result {
            Ok(length) => Some(InResponse::Accepted(&buf[..length])),
            Err(error) => {
                trace!("Rejected control in request: {}", error);
                Some(InResponse::Rejected)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gain::PREAMPLIFIER;
    use crate::topology::ChannelTable;
    use embedded_hal::i2c::{ErrorKind, NoAcknowledgeSource};
    use rdac::{Access, Step};
    use std::vec::Vec as StdVec;

    const CONTROL_INTERFACE: u8 = 0;
    const STREAMING_INTERFACE: u8 = 1;
    const ENDPOINTS: [u8; 4] = [0x81, 0x82, 0x83, 0x84];

    #[derive(Default)]
    struct MockPotentiometers {
        settings: [u8; PHYSICAL_CHANNEL_COUNT],
        writes: StdVec<(u8, u8)>,
        failing: bool,
    }

    impl MockPotentiometers {
        fn error(access: Access, channel: u8) -> BusError {
            BusError {
                access,
                channel,
                step: Step::Address,
                kind: ErrorKind::NoAcknowledge(NoAcknowledgeSource::Address),
            }
        }
    }

    impl Potentiometers for MockPotentiometers {
        fn get(&mut self, channel: u8) -> Result<u8, BusError> {
            if self.failing {
                return Err(Self::error(Access::Get, channel));
            }
            Ok(self.settings[channel as usize])
        }

        fn set(&mut self, channel: u8, setting: u8) -> Result<(), BusError> {
            if self.failing {
                return Err(Self::error(Access::Set, channel));
            }
            self.writes.push((channel, setting));
            self.settings[channel as usize] = setting;
            Ok(())
        }
    }

    #[derive(Debug, PartialEq)]
    enum Event {
        Start(StdVec<u8>, u32),
        Stop,
    }

    #[derive(Default)]
    struct MockSampling {
        events: StdVec<Event>,
    }

    impl Sampling for MockSampling {
        fn start(&mut self, channels: &ChannelTable, sample_rate_hz: u32) {
            self.events.push(Event::Start(channels.to_vec(), sample_rate_hz));
        }

        fn stop(&mut self) {
            self.events.push(Event::Stop);
        }
    }

    fn interfaces() -> UsbInterfaces {
        UsbInterfaces {
            control: InterfaceNumber(CONTROL_INTERFACE),
            streaming: InterfaceNumber(STREAMING_INTERFACE),
            endpoints: ENDPOINTS,
        }
    }

    fn control_with(
        potentiometers: MockPotentiometers,
        rate_change: RateChange,
    ) -> AudioControl<MockPotentiometers, MockSampling> {
        AudioControl::new(
            interfaces(),
            potentiometers,
            MockSampling::default(),
            PREAMPLIFIER,
            rate_change,
        )
    }

    fn control() -> AudioControl<MockPotentiometers, MockSampling> {
        control_with(MockPotentiometers::default(), RateChange::Deferred)
    }

    fn request(request_type: u8, request: u8, value: u16, index: u16, length: u16) -> Request {
        let value = value.to_le_bytes();
        let index = index.to_le_bytes();
        let length = length.to_le_bytes();

        Request::parse(&[
            request_type,
            request,
            value[0],
            value[1],
            index[0],
            index[1],
            length[0],
            length[1],
        ])
    }

    fn interface_request(request: u8, control_selector: u8, channel: u8, entity_id: u8, length: u16) -> Request {
        let request_type = if request & 0x80 != 0 { 0xA1 } else { 0x21 };
        request_type_request(request_type, request, control_selector, channel, entity_id, CONTROL_INTERFACE, length)
    }

    fn request_type_request(
        request_type: u8,
        request: u8,
        control_selector: u8,
        channel: u8,
        high_index: u8,
        low_index: u8,
        length: u16,
    ) -> Request {
        self::request(
            request_type,
            request,
            (control_selector as u16) << 8 | channel as u16,
            (high_index as u16) << 8 | low_index as u16,
            length,
        )
    }

    fn endpoint_request(request: u8, endpoint: u8, length: u16) -> Request {
        endpoint_channel_request(request, 0, endpoint, length)
    }

    fn endpoint_channel_request(request: u8, channel: u8, endpoint: u8, length: u16) -> Request {
        let request_type = if request & 0x80 != 0 { 0xA2 } else { 0x22 };
        request_type_request(request_type, request, SAMPLING_FREQ_CONTROL, channel, 0, endpoint, length)
    }

    fn get(control: &mut AudioControl<MockPotentiometers, MockSampling>, req: Request) -> Option<StdVec<u8>> {
        let mut buf = [0u8; 64];
        match control.control_in(req, &mut buf) {
            Some(InResponse::Accepted(data)) => Some(data.to_vec()),
            Some(InResponse::Rejected) => None,
            None => panic!("request was not handled"),
        }
    }

    fn set(control: &mut AudioControl<MockPotentiometers, MockSampling>, req: Request, data: &[u8]) -> OutResponse {
        control.control_out(req, data).expect("request was not handled")
    }

    #[test]
    fn boot_reads_potentiometers() {
        let mut potentiometers = MockPotentiometers::default();
        potentiometers.settings = [10, 20, 30, 40, 50, 60, 70, 80];
        let control = control_with(potentiometers, RateChange::Deferred);

        // Four channel configuration, first grouping is {0, 2, 4, 6}.
        let features = &control.state().features[2];
        assert_eq!(features.volume_8q8_db[1], PREAMPLIFIER.byte_to_gain(30));
        assert_eq!(features.volume_8q8_db[3], PREAMPLIFIER.byte_to_gain(70));
        assert_eq!(control.state().requested_sample_rate_hz, DEFAULT_SAMPLE_RATE_HZ);
    }

    #[test]
    fn boot_falls_back_on_bus_error() {
        let mut potentiometers = MockPotentiometers::default();
        potentiometers.failing = true;
        let control = control_with(potentiometers, RateChange::Deferred);

        let fallback = PREAMPLIFIER.byte_to_gain(FALLBACK_SETTING);
        assert!(control.state().features[3].volume_8q8_db.iter().all(|v| *v == fallback));
    }

    #[test]
    fn get_volume_reads_back_potentiometer() {
        let mut control = control();
        control.potentiometers.settings[2] = 200;

        // Channel 2 of the two channel configuration (feature unit 19), first grouping {0, 2}.
        let data = get(&mut control, interface_request(GET_CUR, VOLUME_CONTROL, 2, 19, 2)).unwrap();
        assert_eq!(data, PREAMPLIFIER.byte_to_gain(200).to_le_bytes());
        assert_eq!(control.state().features[1].volume_8q8_db[1], PREAMPLIFIER.byte_to_gain(200));
    }

    #[test]
    fn get_volume_with_failing_bus_uses_fallback() {
        let mut control = control();
        control.potentiometers.failing = true;

        // Channel 2 of the two channel configuration resolves to physical channel 2.
        let fallback = PREAMPLIFIER.byte_to_gain(FALLBACK_SETTING);
        let data = get(&mut control, interface_request(GET_CUR, VOLUME_CONTROL, 2, 19, 2)).unwrap();
        assert_eq!(data, fallback.to_le_bytes());
        assert_eq!(control.state().features[1].volume_8q8_db[1], fallback);
    }

    #[test]
    fn volume_range() {
        let mut control = control();

        let min = get(&mut control, interface_request(GET_MIN, VOLUME_CONTROL, 1, 21, 2)).unwrap();
        let max = get(&mut control, interface_request(GET_MAX, VOLUME_CONTROL, 1, 21, 2)).unwrap();
        let res = get(&mut control, interface_request(GET_RES, VOLUME_CONTROL, 1, 21, 2)).unwrap();

        assert_eq!(min, PREAMPLIFIER.min_volume().to_le_bytes());
        assert_eq!(max, PREAMPLIFIER.max_volume().to_le_bytes());
        assert_eq!(res, 256i16.to_le_bytes());
    }

    #[test]
    fn set_volume_writes_resolved_channel() {
        let mut control = control();

        // Select grouping {4, 5, 6, 7} on the four channel configuration.
        assert_eq!(set(&mut control, interface_request(SET_CUR, 0, 0, 17, 1), &[4]), OutResponse::Accepted);

        let volume = 20 * VOLUME_STEPS_PER_DB;
        let response = set(
            &mut control,
            interface_request(SET_CUR, VOLUME_CONTROL, 2, 20, 2),
            &volume.to_le_bytes(),
        );

        assert_eq!(response, OutResponse::Accepted);
        assert_eq!(control.potentiometers.writes, [(5, PREAMPLIFIER.gain_to_byte(volume))]);
        assert_eq!(control.state().features[2].volume_8q8_db[1], volume);
    }

    #[test]
    fn set_volume_clamps() {
        let mut control = control();

        set(
            &mut control,
            interface_request(SET_CUR, VOLUME_CONTROL, 1, 18, 2),
            &i16::MAX.to_le_bytes(),
        );

        assert_eq!(control.state().features[0].volume_8q8_db[0], PREAMPLIFIER.max_volume());
        assert_eq!(control.potentiometers.writes, [(0, 255)]);
    }

    #[test]
    fn set_volume_with_failing_bus_completes() {
        let mut control = control();
        control.potentiometers.failing = true;

        let response = set(
            &mut control,
            interface_request(SET_CUR, VOLUME_CONTROL, 1, 18, 2),
            &(10 * VOLUME_STEPS_PER_DB).to_le_bytes(),
        );

        assert_eq!(response, OutResponse::Accepted);
        assert_eq!(control.state().features[0].volume_8q8_db[0], 10 * VOLUME_STEPS_PER_DB);
    }

    #[test]
    fn mute_and_automatic_gain() {
        let mut control = control();

        set(&mut control, interface_request(SET_CUR, MUTE_CONTROL, 3, 20, 1), &[1]);
        set(&mut control, interface_request(SET_CUR, AUTOMATIC_GAIN_CONTROL, 8, 21, 1), &[1]);

        assert_eq!(get(&mut control, interface_request(GET_CUR, MUTE_CONTROL, 3, 20, 1)), Some(vec![1]));
        assert_eq!(get(&mut control, interface_request(GET_CUR, MUTE_CONTROL, 2, 20, 1)), Some(vec![0]));
        assert_eq!(
            get(&mut control, interface_request(GET_CUR, AUTOMATIC_GAIN_CONTROL, 8, 21, 1)),
            Some(vec![1])
        );

        // No hardware side effects.
        assert!(control.potentiometers.writes.is_empty());
        assert!(control.sampling.events.is_empty());
    }

    #[test]
    fn invalid_channels_stall() {
        let mut control = control();

        // Master channel.
        assert_eq!(get(&mut control, interface_request(GET_CUR, VOLUME_CONTROL, 0, 18, 2)), None);

        // Beyond the channel count of the one channel configuration.
        assert_eq!(get(&mut control, interface_request(GET_CUR, MUTE_CONTROL, 2, 18, 1)), None);
        assert_eq!(
            set(&mut control, interface_request(SET_CUR, MUTE_CONTROL, 9, 21, 1), &[1]),
            OutResponse::Rejected
        );
    }

    #[test]
    fn malformed_requests_stall() {
        let mut control = control();

        // Unknown entity (an input terminal).
        assert_eq!(get(&mut control, interface_request(GET_CUR, VOLUME_CONTROL, 1, 1, 2)), None);

        // Unknown control selector.
        assert_eq!(get(&mut control, interface_request(GET_CUR, 0x03, 1, 18, 1)), None);

        // Short data stage.
        assert_eq!(
            set(&mut control, interface_request(SET_CUR, VOLUME_CONTROL, 1, 18, 1), &[0x00]),
            OutResponse::Rejected
        );

        // Unsupported sub-request.
        assert_eq!(get(&mut control, interface_request(GET_MIN, MUTE_CONTROL, 1, 18, 1)), None);
        assert_eq!(
            set(&mut control, interface_request(SET_RES, VOLUME_CONTROL, 1, 18, 2), &[0, 0]),
            OutResponse::Rejected
        );
    }

    #[test]
    fn other_interfaces_are_not_handled() {
        let mut control = control();
        let mut buf = [0u8; 8];

        let req = request_type_request(0xA1, GET_CUR, VOLUME_CONTROL, 1, 18, 5, 2);
        assert!(control.control_in(req, &mut buf).is_none());

        let req = request_type_request(0x22, SET_CUR, SAMPLING_FREQ_CONTROL, 0, 0, 0x86, 3);
        assert!(control.control_out(req, &[0x40, 0x1F, 0x00]).is_none());

        // Standard requests are handled by the device.
        let req = request(0x01, Request::SET_INTERFACE, 1, STREAMING_INTERFACE as u16, 0);
        assert!(control.control_out(req, &[]).is_none());
    }

    #[test]
    fn selector_requests() {
        let mut control = control();

        assert_eq!(get(&mut control, interface_request(GET_CUR, 0, 0, 16, 1)), Some(vec![1]));
        assert_eq!(get(&mut control, interface_request(GET_MIN, 0, 0, 16, 1)), Some(vec![1]));
        assert_eq!(get(&mut control, interface_request(GET_MAX, 0, 0, 16, 1)), Some(vec![4]));
        assert_eq!(get(&mut control, interface_request(GET_MAX, 0, 0, 17, 1)), Some(vec![5]));
        assert_eq!(get(&mut control, interface_request(GET_RES, 0, 0, 17, 1)), Some(vec![1]));

        assert_eq!(set(&mut control, interface_request(SET_CUR, 0, 0, 16, 1), &[3]), OutResponse::Accepted);
        assert_eq!(get(&mut control, interface_request(GET_CUR, 0, 0, 16, 1)), Some(vec![3]));

        // Out of range selections leave the state unchanged.
        assert_eq!(set(&mut control, interface_request(SET_CUR, 0, 0, 16, 1), &[5]), OutResponse::Rejected);
        assert_eq!(set(&mut control, interface_request(SET_CUR, 0, 0, 16, 1), &[0]), OutResponse::Rejected);
        assert_eq!(get(&mut control, interface_request(GET_CUR, 0, 0, 16, 1)), Some(vec![3]));
    }

    #[test]
    fn selector_requests_take_no_control_or_channel() {
        let mut control = control();

        // Volume control and channel 5 are meaningless for a selector unit.
        assert_eq!(
            set(&mut control, interface_request(SET_CUR, VOLUME_CONTROL, 5, 16, 1), &[2]),
            OutResponse::Rejected
        );
        assert_eq!(set(&mut control, interface_request(SET_CUR, 0, 1, 16, 1), &[2]), OutResponse::Rejected);
        assert_eq!(get(&mut control, interface_request(GET_CUR, 0, 0, 16, 1)), Some(vec![1]));

        assert_eq!(get(&mut control, interface_request(GET_CUR, 1, 0, 16, 1)), None);
        assert_eq!(get(&mut control, interface_request(GET_MAX, 0, 2, 17, 1)), None);
    }

    #[test]
    fn sample_rate_requests_take_no_channel() {
        let mut control = control();

        assert_eq!(
            set(&mut control, endpoint_channel_request(SET_CUR, 1, 0x81, 3), &sample_rate_bytes(16_000)),
            OutResponse::Rejected
        );
        assert_eq!(get(&mut control, endpoint_channel_request(GET_CUR, 2, 0x81, 3)), None);
        assert_eq!(
            get(&mut control, endpoint_request(GET_CUR, 0x81, 3)),
            Some(sample_rate_bytes(DEFAULT_SAMPLE_RATE_HZ).to_vec())
        );
    }

    #[test]
    fn selector_change_restarts_active_sampling() {
        let mut control = control();
        control.set_alternate_setting(InterfaceNumber(STREAMING_INTERFACE), 3);

        set(&mut control, interface_request(SET_CUR, 0, 0, 17, 1), &[2]);

        // Selector of an inactive configuration.
        set(&mut control, interface_request(SET_CUR, 0, 0, 15, 1), &[4]);

        assert_eq!(
            control.sampling.events,
            [
                Event::Start(vec![0, 2, 4, 6], DEFAULT_SAMPLE_RATE_HZ),
                Event::Start(vec![0, 1, 2, 3], DEFAULT_SAMPLE_RATE_HZ),
            ]
        );
    }

    #[test]
    fn alternate_settings_drive_sampling() {
        let mut control = control();

        control.set_alternate_setting(InterfaceNumber(STREAMING_INTERFACE), 2);
        assert_eq!(control.state().routing.next_channel_table().as_slice(), &[0, 2]);

        control.set_alternate_setting(InterfaceNumber(STREAMING_INTERFACE), 0);
        assert!(control.state().routing.active().is_none());

        // Other interfaces, and unknown settings, are ignored.
        control.set_alternate_setting(InterfaceNumber(CONTROL_INTERFACE), 1);
        control.set_alternate_setting(InterfaceNumber(STREAMING_INTERFACE), 7);

        assert_eq!(
            control.sampling.events,
            [Event::Start(vec![0, 2], DEFAULT_SAMPLE_RATE_HZ), Event::Stop]
        );
    }

    #[test]
    fn sample_rate_is_clamped() {
        let mut control = control();

        let response = set(&mut control, endpoint_request(SET_CUR, 0x81, 3), &sample_rate_bytes(1_000));
        assert_eq!(response, OutResponse::Accepted);

        let data = get(&mut control, endpoint_request(GET_CUR, 0x81, 3)).unwrap();
        assert_eq!(data, sample_rate_bytes(LOWEST_SAMPLE_RATE_HZ));

        set(&mut control, endpoint_request(SET_CUR, 0x84, 3), &sample_rate_bytes(0x7F_FFFF));
        let data = get(&mut control, endpoint_request(GET_CUR, 0x84, 3)).unwrap();
        assert_eq!(data, sample_rate_bytes(HIGHEST_SAMPLE_RATE_HZ));
    }

    #[test]
    fn sample_rate_limits() {
        let mut control = control();

        assert_eq!(
            get(&mut control, endpoint_request(GET_MIN, 0x82, 3)),
            Some(sample_rate_bytes(LOWEST_SAMPLE_RATE_HZ).to_vec())
        );
        assert_eq!(
            get(&mut control, endpoint_request(GET_MAX, 0x82, 3)),
            Some(sample_rate_bytes(HIGHEST_SAMPLE_RATE_HZ).to_vec())
        );
        assert_eq!(get(&mut control, endpoint_request(GET_RES, 0x82, 3)), Some(vec![1, 0, 0]));

        // Short data stage.
        assert_eq!(set(&mut control, endpoint_request(SET_CUR, 0x82, 2), &[0x40, 0x1F]), OutResponse::Rejected);
    }

    #[test]
    fn deferred_rate_change() {
        let mut control = control();
        control.set_alternate_setting(InterfaceNumber(STREAMING_INTERFACE), 1);

        set(&mut control, endpoint_request(SET_CUR, 0x81, 3), &sample_rate_bytes(16_000));
        assert_eq!(control.state().sample_rate_hz, DEFAULT_SAMPLE_RATE_HZ);

        // Applied with the next activation.
        control.set_alternate_setting(InterfaceNumber(STREAMING_INTERFACE), 1);
        assert_eq!(control.state().sample_rate_hz, 16_000);
        assert_eq!(
            control.sampling.events,
            [
                Event::Start(vec![0], DEFAULT_SAMPLE_RATE_HZ),
                Event::Start(vec![0], 16_000),
            ]
        );
    }

    #[test]
    fn immediate_rate_change() {
        let mut control = control_with(MockPotentiometers::default(), RateChange::Immediate);

        // Not streaming, nothing to restart.
        set(&mut control, endpoint_request(SET_CUR, 0x81, 3), &sample_rate_bytes(11_025));
        assert!(control.sampling.events.is_empty());

        control.set_alternate_setting(InterfaceNumber(STREAMING_INTERFACE), 4);
        set(&mut control, endpoint_request(SET_CUR, 0x84, 3), &sample_rate_bytes(32_000));

        assert_eq!(
            control.sampling.events,
            [
                Event::Start(vec![0, 1, 2, 3, 4, 5, 6, 7], 11_025),
                Event::Start(vec![0, 1, 2, 3, 4, 5, 6, 7], 32_000),
            ]
        );
    }

    #[test]
    fn reset_stops_sampling() {
        let mut control = control();
        control.set_alternate_setting(InterfaceNumber(STREAMING_INTERFACE), 1);

        control.suspended(true);
        assert!(control.state().routing.active().is_none());
        assert_eq!(control.sampling.events.last(), Some(&Event::Stop));
    }
}
