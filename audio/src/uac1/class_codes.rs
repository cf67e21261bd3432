//! USB Audio Class 1.0 codes [UAC Appendix A].
#![allow(unused)]

// Audio interface class codes [UAC A.1 to A.3]
pub const USB_AUDIO_CLASS: u8 = 0x01;
pub const USB_AUDIOCONTROL_SUBCLASS: u8 = 0x01;
pub const USB_AUDIOSTREAMING_SUBCLASS: u8 = 0x02;
pub const PROTOCOL_NONE: u8 = 0x00;

pub const AUDIO_FUNCTION: u8 = USB_AUDIO_CLASS;
pub const FUNCTION_SUBCLASS_UNDEFINED: u8 = 0x00;

/// bcdADC, release 1.0
pub const ADC_VERSION: u16 = 0x0100;

// Class-specific descriptor types [UAC A.4]
pub const CS_INTERFACE: u8 = 0x24;
pub const CS_ENDPOINT: u8 = 0x25;

// Audio control interface descriptor subtypes [UAC A.5]
pub const HEADER_SUBTYPE: u8 = 0x01;
pub const INPUT_TERMINAL: u8 = 0x02;
pub const OUTPUT_TERMINAL: u8 = 0x03;
pub const SELECTOR_UNIT: u8 = 0x05;
pub const FEATURE_UNIT: u8 = 0x06;

// Audio streaming interface descriptor subtypes [UAC A.6]
pub const AS_GENERAL: u8 = 0x01;
pub const FORMAT_TYPE: u8 = 0x02;

// Format types [Audio Data Formats A.1.1, A.2]
pub const FORMAT_TYPE_I: u8 = 0x01;
pub const PCM: u16 = 0x0001;

// Class-specific request codes [UAC A.9]
pub const SET_CUR: u8 = 0x01;
pub const SET_MIN: u8 = 0x02;
pub const SET_MAX: u8 = 0x03;
pub const SET_RES: u8 = 0x04;
pub const GET_CUR: u8 = 0x81;
pub const GET_MIN: u8 = 0x82;
pub const GET_MAX: u8 = 0x83;
pub const GET_RES: u8 = 0x84;

// Feature unit control selectors [UAC A.10.2]
pub const FU_CONTROL_UNDEFINED: u8 = 0x00;
pub const MUTE_CONTROL: u8 = 0x01;
pub const VOLUME_CONTROL: u8 = 0x02;
pub const AUTOMATIC_GAIN_CONTROL: u8 = 0x07;

// Feature unit bmaControls bits [UAC 4.3.2.5]
pub const FU_CONTROLS_MUTE: u8 = 1 << 0;
pub const FU_CONTROLS_VOLUME: u8 = 1 << 1;
pub const FU_CONTROLS_AUTOMATIC_GAIN: u8 = 1 << 6;

// Endpoint control selectors [UAC A.10.5]
pub const SAMPLING_FREQ_CONTROL: u8 = 0x01;

// Class-specific endpoint bmAttributes [UAC 4.6.1.2]
pub const EP_CS_ATTR_SAMPLING_FREQ: u8 = 1 << 0;

/// bLockDelayUnits: decoded PCM samples
pub const LOCK_DELAY_UNITS_PCM_SAMPLES: u8 = 0x02;

// Terminal types [USB Audio Terminal Types 2.1 to 2.2]
pub const TERMINAL_USB_STREAMING: u16 = 0x0101;
pub const TERMINAL_IN_MICROPHONE_ARRAY: u16 = 0x0205;
