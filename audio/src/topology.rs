//! Channel topology of the microphone array, and the state of its selector units.
//!
//! Each operational alternate setting of the streaming interface carries a fixed number of logical
//! channels. A selector unit picks one of several predefined groupings of physical microphones for
//! it, and the resulting mapping from logical to physical channel is kept precomputed for the
//! sampling interrupt.
use heapless::Vec;

/// The number of physical microphone channels.
pub const PHYSICAL_CHANNEL_COUNT: usize = 8;

/// The maximum number of logical channels in any configuration.
pub const MAX_LOGICAL_CHANNEL_COUNT: usize = 8;

/// The number of operational alternate settings.
pub const CONFIGURATION_COUNT: usize = 4;

/// Physical channel indices, one per logical channel, in logical channel order.
pub type ChannelTable = Vec<u8, MAX_LOGICAL_CHANNEL_COUNT>;

/// A set of physical channels that feeds the logical channels of a configuration.
#[derive(Debug)]
pub struct Grouping {
    /// The input terminal that represents this grouping towards the host.
    pub input_terminal_id: u8,
    /// Physical channel per logical channel.
    pub channels: &'static [u8],
}

/// An operational alternate setting of the streaming interface.
#[derive(Debug)]
pub struct Configuration {
    pub alternate_setting: u8,
    /// Chooses among `groupings`. Configurations with a single grouping have no selector.
    pub selector_unit_id: Option<u8>,
    /// Carries volume, mute and automatic gain control per logical channel.
    pub feature_unit_id: u8,
    /// The USB streaming terminal that the streaming interface links to.
    pub output_terminal_id: u8,
    pub groupings: &'static [Grouping],
}

impl Configuration {
    /// The number of logical channels.
    pub fn channel_count(&self) -> usize {
        self.groupings[0].channels.len()
    }

    /// The entity that feeds the feature unit.
    pub fn feature_unit_source_id(&self) -> u8 {
        self.selector_unit_id.unwrap_or(self.groupings[0].input_terminal_id)
    }
}

/// All operational configurations, in alternate setting order.
pub static CONFIGURATIONS: [Configuration; CONFIGURATION_COUNT] = [
    Configuration {
        alternate_setting: 1,
        selector_unit_id: Some(15),
        feature_unit_id: 18,
        output_terminal_id: 22,
        groupings: &[
            Grouping {
                input_terminal_id: 1,
                channels: &[0],
            },
            Grouping {
                input_terminal_id: 2,
                channels: &[2],
            },
            Grouping {
                input_terminal_id: 3,
                channels: &[4],
            },
            Grouping {
                input_terminal_id: 4,
                channels: &[6],
            },
        ],
    },
    Configuration {
        alternate_setting: 2,
        selector_unit_id: Some(16),
        feature_unit_id: 19,
        output_terminal_id: 23,
        groupings: &[
            Grouping {
                input_terminal_id: 5,
                channels: &[0, 2],
            },
            Grouping {
                input_terminal_id: 6,
                channels: &[2, 4],
            },
            Grouping {
                input_terminal_id: 7,
                channels: &[4, 6],
            },
            Grouping {
                input_terminal_id: 8,
                channels: &[6, 0],
            },
        ],
    },
    Configuration {
        alternate_setting: 3,
        selector_unit_id: Some(17),
        feature_unit_id: 20,
        output_terminal_id: 24,
        groupings: &[
            Grouping {
                input_terminal_id: 9,
                channels: &[0, 2, 4, 6],
            },
            Grouping {
                input_terminal_id: 10,
                channels: &[0, 1, 2, 3],
            },
            Grouping {
                input_terminal_id: 11,
                channels: &[2, 3, 4, 5],
            },
            Grouping {
                input_terminal_id: 12,
                channels: &[4, 5, 6, 7],
            },
            Grouping {
                input_terminal_id: 13,
                channels: &[6, 7, 0, 1],
            },
        ],
    },
    Configuration {
        alternate_setting: 4,
        selector_unit_id: None,
        feature_unit_id: 21,
        output_terminal_id: 25,
        groupings: &[Grouping {
            input_terminal_id: 14,
            channels: &[0, 1, 2, 3, 4, 5, 6, 7],
        }],
    },
];

/// Look up the configuration of an operational alternate setting.
pub fn configuration(alternate_setting: u8) -> Option<&'static Configuration> {
    CONFIGURATIONS
        .iter()
        .find(|configuration| configuration.alternate_setting == alternate_setting)
}

/// Look up the configuration that owns a feature unit.
pub fn configuration_by_feature_unit(unit_id: u8) -> Option<&'static Configuration> {
    CONFIGURATIONS
        .iter()
        .find(|configuration| configuration.feature_unit_id == unit_id)
}

/// Look up the configuration that owns a selector unit.
pub fn configuration_by_selector_unit(unit_id: u8) -> Option<&'static Configuration> {
    CONFIGURATIONS
        .iter()
        .find(|configuration| configuration.selector_unit_id == Some(unit_id))
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TopologyError {
    UnknownAlternateSetting(u8),
    UnknownSelectorUnit(u8),
    SelectionOutOfRange { unit_id: u8, index: u8 },
}

/// Selector state, and the derived channel table of the active configuration.
pub struct Routing {
    /// Zero-based grouping index per configuration (in `CONFIGURATIONS` order).
    selections: [u8; CONFIGURATION_COUNT],
    active: Option<&'static Configuration>,
    next_channels: ChannelTable,
}

impl Default for Routing {
    fn default() -> Self {
        Self::new()
    }
}

impl Routing {
    /// All selectors on their first grouping, no active configuration.
    pub fn new() -> Self {
        Routing {
            selections: [0; CONFIGURATION_COUNT],
            active: None,
            next_channels: Vec::new(),
        }
    }

    fn configuration_index(configuration: &Configuration) -> usize {
        configuration.alternate_setting as usize - 1
    }

    fn grouping(&self, configuration: &'static Configuration) -> &'static Grouping {
        &configuration.groupings[self.selections[Self::configuration_index(configuration)] as usize]
    }

    fn recompute(&mut self) {
        self.next_channels.clear();

        if let Some(configuration) = self.active {
            let channels = self.grouping(configuration).channels;

            // Cannot fail, groupings never exceed the table capacity.
            let _ = self.next_channels.extend_from_slice(channels);
        }
    }

    /// Make an operational alternate setting the active configuration.
    pub fn activate_configuration(&mut self, alternate_setting: u8) -> Result<&ChannelTable, TopologyError> {
        let configuration =
            configuration(alternate_setting).ok_or(TopologyError::UnknownAlternateSetting(alternate_setting))?;

        self.active = Some(configuration);
        self.recompute();

        Ok(&self.next_channels)
    }

    /// Return to the zero-bandwidth setting.
    pub fn deactivate(&mut self) {
        self.active = None;
        self.recompute();
    }

    pub fn active(&self) -> Option<&'static Configuration> {
        self.active
    }

    /// Select a grouping (zero-based) on a selector unit.
    ///
    /// Returns `true`, if the selector belongs to the active configuration, so that its channel table changed.
    pub fn set_selector(&mut self, unit_id: u8, index: u8) -> Result<bool, TopologyError> {
        let configuration =
            configuration_by_selector_unit(unit_id).ok_or(TopologyError::UnknownSelectorUnit(unit_id))?;

        if index as usize >= configuration.groupings.len() {
            return Err(TopologyError::SelectionOutOfRange { unit_id, index });
        }

        self.selections[Self::configuration_index(configuration)] = index;

        let is_active = self
            .active
            .is_some_and(|active| active.alternate_setting == configuration.alternate_setting);

        if is_active {
            self.recompute();
        }

        Ok(is_active)
    }

    /// The selected grouping (zero-based) of a selector unit.
    pub fn selection(&self, unit_id: u8) -> Result<u8, TopologyError> {
        let configuration =
            configuration_by_selector_unit(unit_id).ok_or(TopologyError::UnknownSelectorUnit(unit_id))?;

        Ok(self.selections[Self::configuration_index(configuration)])
    }

    /// The physical channel behind a (zero-based) logical channel of the active configuration.
    pub fn resolve_physical_channel(&self, logical_channel: usize) -> Option<u8> {
        self.next_channels.get(logical_channel).copied()
    }

    /// The physical channel behind a (zero-based) logical channel of any configuration.
    pub fn physical_channel(&self, configuration: &'static Configuration, logical_channel: usize) -> Option<u8> {
        self.grouping(configuration).channels.get(logical_channel).copied()
    }

    /// The precomputed table of the active configuration (empty, if none is active).
    pub fn next_channel_table(&self) -> &ChannelTable {
        &self.next_channels
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_is_consistent() {
        let mut input_terminals = std::vec::Vec::new();

        for (index, configuration) in CONFIGURATIONS.iter().enumerate() {
            assert_eq!(configuration.alternate_setting as usize, index + 1);
            assert_eq!(configuration.selector_unit_id.is_some(), configuration.groupings.len() > 1);

            for grouping in configuration.groupings {
                assert_eq!(grouping.channels.len(), configuration.channel_count());
                assert!(grouping
                    .channels
                    .iter()
                    .all(|channel| (*channel as usize) < PHYSICAL_CHANNEL_COUNT));
                input_terminals.push(grouping.input_terminal_id);
            }
        }

        assert_eq!(input_terminals, (1..=14).collect::<std::vec::Vec<u8>>());
        assert_eq!(
            CONFIGURATIONS.iter().map(|c| c.channel_count()).collect::<std::vec::Vec<_>>(),
            [1, 2, 4, 8]
        );
    }

    #[test]
    fn activation_builds_channel_table() {
        let mut routing = Routing::new();
        assert!(routing.next_channel_table().is_empty());

        assert_eq!(routing.activate_configuration(3).unwrap().as_slice(), &[0, 2, 4, 6]);
        assert_eq!(routing.resolve_physical_channel(1), Some(2));
        assert_eq!(routing.resolve_physical_channel(4), None);

        assert_eq!(routing.activate_configuration(4).unwrap().as_slice(), &[0, 1, 2, 3, 4, 5, 6, 7]);
        assert_eq!(routing.activate_configuration(1).unwrap().as_slice(), &[0]);

        routing.deactivate();
        assert!(routing.active().is_none());
        assert!(routing.next_channel_table().is_empty());
    }

    #[test]
    fn unknown_alternate_setting() {
        let mut routing = Routing::new();

        assert_eq!(
            routing.activate_configuration(5),
            Err(TopologyError::UnknownAlternateSetting(5))
        );
        assert_eq!(
            routing.activate_configuration(0),
            Err(TopologyError::UnknownAlternateSetting(0))
        );
    }

    #[test]
    fn selector_on_active_configuration() {
        let mut routing = Routing::new();
        routing.activate_configuration(3).unwrap();

        assert_eq!(routing.set_selector(17, 3), Ok(true));
        assert_eq!(routing.selection(17), Ok(3));
        assert_eq!(routing.next_channel_table().as_slice(), &[4, 5, 6, 7]);
        assert_eq!(routing.resolve_physical_channel(0), Some(4));
    }

    #[test]
    fn selector_on_inactive_configuration() {
        let mut routing = Routing::new();
        routing.activate_configuration(1).unwrap();

        assert_eq!(routing.set_selector(16, 3), Ok(false));
        assert_eq!(routing.next_channel_table().as_slice(), &[0]);

        // The selection applies on the next activation.
        assert_eq!(routing.activate_configuration(2).unwrap().as_slice(), &[6, 0]);
        assert_eq!(routing.physical_channel(&CONFIGURATIONS[1], 0), Some(6));
    }

    #[test]
    fn invalid_selection_leaves_state() {
        let mut routing = Routing::new();
        routing.activate_configuration(2).unwrap();
        routing.set_selector(16, 1).unwrap();

        assert_eq!(
            routing.set_selector(16, 4),
            Err(TopologyError::SelectionOutOfRange { unit_id: 16, index: 4 })
        );
        assert_eq!(routing.selection(16), Ok(1));
        assert_eq!(routing.next_channel_table().as_slice(), &[2, 4]);

        assert_eq!(routing.set_selector(18, 0), Err(TopologyError::UnknownSelectorUnit(18)));
    }

    #[test]
    fn lookups() {
        assert_eq!(configuration_by_feature_unit(20).map(|c| c.alternate_setting), Some(3));
        assert_eq!(configuration_by_selector_unit(15).map(|c| c.alternate_setting), Some(1));
        assert!(configuration_by_selector_unit(21).is_none());
        assert_eq!(CONFIGURATIONS[3].feature_unit_source_id(), 14);
        assert_eq!(CONFIGURATIONS[0].feature_unit_source_id(), 15);
    }
}
