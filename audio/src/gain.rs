//! Conversion between host volume values and preamplifier potentiometer settings.
//!
//! The potentiometer sits in the feedback path of the microphone preamplifier. Its resistance grows
//! linearly with the setting, from the wiper resistance at 0 up to wiper plus full-scale at 255.
//! Host volumes are 8q8 values in units of dB, as used by the USB audio class volume control.
use libm::{log10f, powf, roundf};

/// Volume resolution of the USB audio class (8q8 format, 1/256 dB per step).
pub const VOLUME_STEPS_PER_DB: i16 = 256;

/// Lowest setting that is offered to the host.
///
/// Below this, the feedback resistance is dominated by the wiper, and steps become very coarse.
pub const MIN_USABLE_SETTING: u8 = 3;

/// Highest setting that is offered to the host.
pub const MAX_USABLE_SETTING: u8 = 255;

/// Setting that is assumed, when a potentiometer can not be read.
pub const FALLBACK_SETTING: u8 = 0x80;

const FULL_SCALE_SETTING: f32 = 255.0;

/// How the potentiometer is wired into the preamplifier.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Topology {
    /// Gain is `R_feedback / R_input`.
    Inverting,
    /// Gain is `1 + R_feedback / R_input`.
    NonInverting,
}

impl Topology {
    fn offset(self) -> f32 {
        match self {
            Topology::Inverting => 0.0,
            Topology::NonInverting => 1.0,
        }
    }
}

/// Resistor network of one preamplifier stage.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct GainModel {
    pub input_resistance_ohm: f32,
    pub wiper_resistance_ohm: f32,
    pub full_scale_resistance_ohm: f32,
    pub topology: Topology,
}

/// The preamplifier stage of the microphone board.
pub const PREAMPLIFIER: GainModel = GainModel {
    input_resistance_ohm: 1_000.0,
    wiper_resistance_ohm: 50.0,
    full_scale_resistance_ohm: 100_000.0,
    topology: Topology::NonInverting,
};

impl Default for GainModel {
    fn default() -> Self {
        PREAMPLIFIER
    }
}

impl GainModel {
    fn feedback_resistance_ohm(&self, setting: u8) -> f32 {
        self.wiper_resistance_ohm + self.full_scale_resistance_ohm * (setting as f32) / FULL_SCALE_SETTING
    }

    /// Voltage gain for a potentiometer setting.
    pub fn voltage_gain(&self, setting: u8) -> f32 {
        self.topology.offset() + self.feedback_resistance_ohm(setting) / self.input_resistance_ohm
    }

    /// Convert a potentiometer setting to a volume in 8q8 dB.
    pub fn byte_to_gain(&self, setting: u8) -> i16 {
        let db = 20.0 * log10f(self.voltage_gain(setting));

        roundf(db * VOLUME_STEPS_PER_DB as f32) as i16
    }

    /// Convert a volume in 8q8 dB to the nearest potentiometer setting.
    ///
    /// Volumes outside of the reachable range saturate at 0 or 255.
    pub fn gain_to_byte(&self, volume_8q8_db: i16) -> u8 {
        let db = volume_8q8_db as f32 / VOLUME_STEPS_PER_DB as f32;
        let voltage_gain = powf(10.0, db / 20.0);

        let feedback_resistance_ohm = (voltage_gain - self.topology.offset()) * self.input_resistance_ohm;
        let setting = (feedback_resistance_ohm - self.wiper_resistance_ohm) * FULL_SCALE_SETTING
            / self.full_scale_resistance_ohm;

        roundf(setting).clamp(0.0, FULL_SCALE_SETTING) as u8
    }

    /// The lowest volume offered to the host.
    pub fn min_volume(&self) -> i16 {
        self.byte_to_gain(MIN_USABLE_SETTING)
    }

    /// The highest volume offered to the host.
    pub fn max_volume(&self) -> i16 {
        self.byte_to_gain(MAX_USABLE_SETTING)
    }

    /// Limit a host volume to the offered range.
    pub fn clamp(&self, volume_8q8_db: i16) -> i16 {
        volume_8q8_db.clamp(self.min_volume(), self.max_volume())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const INVERTING: GainModel = GainModel {
        topology: Topology::Inverting,
        ..PREAMPLIFIER
    };

    #[test]
    fn round_trip_within_one_step() {
        for model in [PREAMPLIFIER, INVERTING] {
            for setting in MIN_USABLE_SETTING..=MAX_USABLE_SETTING {
                let back = model.gain_to_byte(model.byte_to_gain(setting));
                assert!(
                    (back as i16 - setting as i16).abs() <= 1,
                    "{:?}: {} came back as {}",
                    model.topology,
                    setting,
                    back
                );
            }
        }
    }

    #[test]
    fn gain_is_monotonic() {
        for model in [PREAMPLIFIER, INVERTING] {
            let mut last = model.byte_to_gain(0);

            for setting in 1..=255u8 {
                let volume = model.byte_to_gain(setting);
                assert!(volume >= last, "{:?}: not monotonic at {}", model.topology, setting);
                last = volume;
            }
        }
    }

    #[test]
    fn known_values() {
        // Wiper only: 1 + 50 / 1000.
        let expected = 20.0 * log10f(1.05) * 256.0;
        assert_eq!(PREAMPLIFIER.byte_to_gain(0), roundf(expected) as i16);

        // Full scale: 1 + 100050 / 1000, a little over 40 dB.
        let max = PREAMPLIFIER.max_volume();
        assert!(max > 40 * VOLUME_STEPS_PER_DB && max < 41 * VOLUME_STEPS_PER_DB);

        // The inverting stage attenuates with the wiper only.
        assert!(INVERTING.byte_to_gain(0) < 0);
    }

    #[test]
    fn out_of_range_volumes_saturate() {
        assert_eq!(PREAMPLIFIER.gain_to_byte(i16::MIN), 0);
        assert_eq!(PREAMPLIFIER.gain_to_byte(i16::MAX), 255);
        assert_eq!(PREAMPLIFIER.gain_to_byte(PREAMPLIFIER.max_volume()), 255);
    }

    #[test]
    fn clamp_limits_to_usable_range() {
        let model = PREAMPLIFIER;

        assert_eq!(model.clamp(i16::MIN), model.min_volume());
        assert_eq!(model.clamp(i16::MAX), model.max_volume());
        assert_eq!(model.clamp(10 * VOLUME_STEPS_PER_DB), 10 * VOLUME_STEPS_PER_DB);
    }
}
