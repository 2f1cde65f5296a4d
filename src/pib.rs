//! # Ranging PIB
//!
//! Runtime configuration of the ranging engine, accessed through attribute
//! identifiers in the same get/set style as the MAC PIB.
//!
//! ## Attributes
//!
//! | Id | Attribute | Type | Default |
//! |---|---|---|---|
//! | 0x00 | RangingEnabled | bool | true |
//! | 0x01 | RangingMethod | u8 | 0x01 (read-only) |
//! | 0x02 | PmuFreqStart | u16 | 2403 |
//! | 0x03 | PmuFreqStep | u8 | 2 |
//! | 0x04 | PmuFreqStop | u16 | 2443 |
//! | 0x05 | PmuVerboseLevel | u8 | 0 |
//! | 0x06 | DefaultAntenna | bool | false |
//! | 0x07 | EnableAntennaDiv | bool | false |
//! | 0x08 | ProvideAntennaDivResults | bool | false |
//! | 0x09 | RangingTransmitPower | u8 | 0xAF |
//! | 0x0A | ProvideRangingTransmitPower | bool | true |
//! | 0x0B | ApplyMinDistThreshold | bool | true |

use crate::pmu::{FrequencySweep, PMU_MAX_FREQ_MHZ, PMU_MAX_STEP_CODE, PMU_MIN_FREQ_MHZ, PMU_MIN_SWEEP_SPAN_MHZ, RANGING_METHOD_PMU};
use crate::status::RtbStatus;

/// Highest PMU verbose level
pub const PMU_VERBOSE_LEVEL_MAX: u8 = 3;

/// Ranging transmit power default in IEEE 802.15.4 PIB encoding
pub const DEFAULT_RANGING_TX_POWER: u8 = 0xAF;

#[derive(Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "std", derive(Debug))]
pub enum PibAttribute {
    RangingEnabled = 0x00,
    RangingMethod = 0x01,
    PmuFreqStart = 0x02,
    PmuFreqStep = 0x03,
    PmuFreqStop = 0x04,
    PmuVerboseLevel = 0x05,
    DefaultAntenna = 0x06,
    EnableAntennaDiv = 0x07,
    ProvideAntennaDivResults = 0x08,
    RangingTransmitPower = 0x09,
    ProvideRangingTransmitPower = 0x0A,
    ApplyMinDistThreshold = 0x0B,
}

impl TryFrom<u8> for PibAttribute {
    type Error = RtbStatus;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x00 => Ok(PibAttribute::RangingEnabled),
            0x01 => Ok(PibAttribute::RangingMethod),
            0x02 => Ok(PibAttribute::PmuFreqStart),
            0x03 => Ok(PibAttribute::PmuFreqStep),
            0x04 => Ok(PibAttribute::PmuFreqStop),
            0x05 => Ok(PibAttribute::PmuVerboseLevel),
            0x06 => Ok(PibAttribute::DefaultAntenna),
            0x07 => Ok(PibAttribute::EnableAntennaDiv),
            0x08 => Ok(PibAttribute::ProvideAntennaDivResults),
            0x09 => Ok(PibAttribute::RangingTransmitPower),
            0x0A => Ok(PibAttribute::ProvideRangingTransmitPower),
            0x0B => Ok(PibAttribute::ApplyMinDistThreshold),
            _ => Err(RtbStatus::UnsupportedAttribute),
        }
    }
}

/// Typed attribute value
#[derive(Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "std", derive(Debug))]
pub enum PibValue {
    Bool(bool),
    U8(u8),
    U16(u16),
}

/// Ranging attribute store
#[derive(Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "std", derive(Debug))]
pub struct RangingPib {
    pub ranging_enabled: bool,
    pub ranging_method: u8,
    pub pmu_freq_start: u16,
    pub pmu_freq_step: u8,
    pub pmu_freq_stop: u16,
    pub pmu_verbose_level: u8,
    /// `false` selects antenna 0, `true` antenna 1
    pub default_antenna: bool,
    pub enable_antenna_div: bool,
    pub provide_antenna_div_results: bool,
    pub ranging_transmit_power: u8,
    pub provide_ranging_transmit_power: bool,
    pub apply_min_dist_threshold: bool,
}

impl RangingPib {
    pub const DEFAULT: RangingPib = RangingPib {
        ranging_enabled: true,
        ranging_method: RANGING_METHOD_PMU,
        pmu_freq_start: 2403,
        pmu_freq_step: 2,
        pmu_freq_stop: 2443,
        pmu_verbose_level: 0,
        default_antenna: false,
        enable_antenna_div: false,
        provide_antenna_div_results: false,
        ranging_transmit_power: DEFAULT_RANGING_TX_POWER,
        provide_ranging_transmit_power: true,
        apply_min_dist_threshold: true,
    };

    pub fn frequency_sweep(&self) -> FrequencySweep {
        FrequencySweep::with(self.pmu_freq_start, self.pmu_freq_step, self.pmu_freq_stop)
    }

    pub fn default_antenna_index(&self) -> u8 {
        self.default_antenna as u8
    }

    pub fn get(&self, attribute: PibAttribute) -> PibValue {
        match attribute {
            PibAttribute::RangingEnabled => PibValue::Bool(self.ranging_enabled),
            PibAttribute::RangingMethod => PibValue::U8(self.ranging_method),
            PibAttribute::PmuFreqStart => PibValue::U16(self.pmu_freq_start),
            PibAttribute::PmuFreqStep => PibValue::U8(self.pmu_freq_step),
            PibAttribute::PmuFreqStop => PibValue::U16(self.pmu_freq_stop),
            PibAttribute::PmuVerboseLevel => PibValue::U8(self.pmu_verbose_level),
            PibAttribute::DefaultAntenna => PibValue::Bool(self.default_antenna),
            PibAttribute::EnableAntennaDiv => PibValue::Bool(self.enable_antenna_div),
            PibAttribute::ProvideAntennaDivResults => PibValue::Bool(self.provide_antenna_div_results),
            PibAttribute::RangingTransmitPower => PibValue::U8(self.ranging_transmit_power),
            PibAttribute::ProvideRangingTransmitPower => PibValue::Bool(self.provide_ranging_transmit_power),
            PibAttribute::ApplyMinDistThreshold => PibValue::Bool(self.apply_min_dist_threshold),
        }
    }

    /// Validates and stores an attribute value
    ///
    /// # Returns
    /// * `ReadOnly` for the ranging method
    /// * `InvalidParameter` for a value of the wrong type or out of range
    pub fn set(&mut self, attribute: PibAttribute, value: PibValue) -> Result<(), RtbStatus> {
        match (attribute, value) {
            (PibAttribute::RangingMethod, _) => return Err(RtbStatus::ReadOnly),
            (PibAttribute::RangingEnabled, PibValue::Bool(v)) => self.ranging_enabled = v,
            (PibAttribute::PmuFreqStart, PibValue::U16(v)) => {
                if !(PMU_MIN_FREQ_MHZ..=PMU_MAX_FREQ_MHZ).contains(&v) || v + PMU_MIN_SWEEP_SPAN_MHZ >= self.pmu_freq_stop {
                    return Err(RtbStatus::InvalidParameter);
                }
                self.pmu_freq_start = v;
            }
            (PibAttribute::PmuFreqStep, PibValue::U8(v)) => {
                if v > PMU_MAX_STEP_CODE {
                    return Err(RtbStatus::InvalidParameter);
                }
                self.pmu_freq_step = v;
            }
            (PibAttribute::PmuFreqStop, PibValue::U16(v)) => {
                if !(PMU_MIN_FREQ_MHZ..=PMU_MAX_FREQ_MHZ).contains(&v) || v <= self.pmu_freq_start + PMU_MIN_SWEEP_SPAN_MHZ {
                    return Err(RtbStatus::InvalidParameter);
                }
                self.pmu_freq_stop = v;
            }
            (PibAttribute::PmuVerboseLevel, PibValue::U8(v)) => {
                if v > PMU_VERBOSE_LEVEL_MAX {
                    return Err(RtbStatus::InvalidParameter);
                }
                self.pmu_verbose_level = v;
            }
            (PibAttribute::DefaultAntenna, PibValue::Bool(v)) => self.default_antenna = v,
            (PibAttribute::EnableAntennaDiv, PibValue::Bool(v)) => self.enable_antenna_div = v,
            (PibAttribute::ProvideAntennaDivResults, PibValue::Bool(v)) => self.provide_antenna_div_results = v,
            (PibAttribute::RangingTransmitPower, PibValue::U8(v)) => self.ranging_transmit_power = v,
            (PibAttribute::ProvideRangingTransmitPower, PibValue::Bool(v)) => self.provide_ranging_transmit_power = v,
            (PibAttribute::ApplyMinDistThreshold, PibValue::Bool(v)) => self.apply_min_dist_threshold = v,
            _ => return Err(RtbStatus::InvalidParameter),
        }
        Ok(())
    }
}

impl Default for RangingPib {
    fn default() -> Self {
        Self::DEFAULT
    }
}

#[cfg(all(test, feature = "std"))]
mod tests {
    use super::*;

    #[test]
    fn defaults_form_a_valid_sweep() {
        let pib = RangingPib::default();
        assert_eq!(pib.frequency_sweep().validate(), Ok(()));
        assert_eq!(pib.get(PibAttribute::RangingTransmitPower), PibValue::U8(0xAF));
        assert_eq!(pib.get(PibAttribute::RangingEnabled), PibValue::Bool(true));
    }

    #[test]
    fn method_is_read_only() {
        let mut pib = RangingPib::default();
        assert_eq!(pib.set(PibAttribute::RangingMethod, PibValue::U8(2)), Err(RtbStatus::ReadOnly));
    }

    #[test]
    fn frequency_boundaries_keep_minimum_span() {
        let mut pib = RangingPib::default();
        // stop is 2443
        assert_eq!(pib.set(PibAttribute::PmuFreqStart, PibValue::U16(2439)), Err(RtbStatus::InvalidParameter));
        assert_eq!(pib.set(PibAttribute::PmuFreqStart, PibValue::U16(2438)), Ok(()));
        assert_eq!(pib.set(PibAttribute::PmuFreqStop, PibValue::U16(2442)), Err(RtbStatus::InvalidParameter));
        assert_eq!(pib.set(PibAttribute::PmuFreqStop, PibValue::U16(2528)), Err(RtbStatus::InvalidParameter));
        assert_eq!(pib.set(PibAttribute::PmuFreqStart, PibValue::U16(2323)), Err(RtbStatus::InvalidParameter));
        assert_eq!(pib.pmu_freq_start, 2438);
    }

    #[test]
    fn out_of_range_and_mistyped_values_are_invalid() {
        let mut pib = RangingPib::default();
        assert_eq!(pib.set(PibAttribute::PmuFreqStep, PibValue::U8(4)), Err(RtbStatus::InvalidParameter));
        assert_eq!(pib.set(PibAttribute::PmuVerboseLevel, PibValue::U8(4)), Err(RtbStatus::InvalidParameter));
        assert_eq!(pib.set(PibAttribute::RangingEnabled, PibValue::U8(1)), Err(RtbStatus::InvalidParameter));
        assert_eq!(pib.set(PibAttribute::PmuVerboseLevel, PibValue::U8(3)), Ok(()));
    }

    #[test]
    fn unknown_attribute_id() {
        assert_eq!(PibAttribute::try_from(0x0C), Err(RtbStatus::UnsupportedAttribute));
        assert_eq!(PibAttribute::try_from(0x09), Ok(PibAttribute::RangingTransmitPower));
    }
}
