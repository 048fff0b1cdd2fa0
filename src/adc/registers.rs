//! ADS1115 register map and config-word packing.
//!
//! The pointer register selects one of four 16-bit registers; every data
//! transfer is most-significant byte first.

pub const DEFAULT_ADDRESS: u8 = 0x48;

pub const POINTER_CONVERSION: u8 = 0x00;
pub const POINTER_CONFIG: u8 = 0x01;
pub const POINTER_LO_THRESH: u8 = 0x02;
pub const POINTER_HI_THRESH: u8 = 0x03;

// Config register bit positions
pub const CONFIG_OS: u16 = 15;
pub const CONFIG_MUX: u16 = 12;
pub const CONFIG_PGA: u16 = 9;
pub const CONFIG_MODE: u16 = 8;
pub const CONFIG_DR: u16 = 5;
pub const CONFIG_COMP_MODE: u16 = 4;
pub const CONFIG_COMP_POL: u16 = 3;
pub const CONFIG_COMP_LAT: u16 = 2;
pub const CONFIG_COMP_QUE: u16 = 0;

/// Set while idle / conversion complete; writing it starts a single-shot conversion.
pub const OS_BIT: u16 = 1 << CONFIG_OS;

/// MUX codes 0b100..=0b111 select AINx against GND.
const MUX_SINGLE_ENDED_BASE: u16 = 0b100;
const MODE_SINGLE_SHOT: u16 = 1;
/// COMP_QUE = 0b11 disables the comparator and puts ALERT/RDY in high-z.
const COMP_QUE_DISABLE: u16 = 0b11;

/// Programmable gain amplifier setting, named by its full-scale range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Gain {
    Fs6_144V,
    #[default]
    Fs4_096V,
    Fs2_048V,
    Fs1_024V,
    Fs0_512V,
    Fs0_256V,
}

impl Gain {
    pub fn code(self) -> u16 {
        match self {
            Gain::Fs6_144V => 0b000,
            Gain::Fs4_096V => 0b001,
            Gain::Fs2_048V => 0b010,
            Gain::Fs1_024V => 0b011,
            Gain::Fs0_512V => 0b100,
            Gain::Fs0_256V => 0b101,
        }
    }

    pub fn full_scale_volts(self) -> f64 {
        match self {
            Gain::Fs6_144V => 6.144,
            Gain::Fs4_096V => 4.096,
            Gain::Fs2_048V => 2.048,
            Gain::Fs1_024V => 1.024,
            Gain::Fs0_512V => 0.512,
            Gain::Fs0_256V => 0.256,
        }
    }
}

/// Conversion rate in samples per second.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataRate {
    Sps8,
    Sps16,
    Sps32,
    Sps64,
    #[default]
    Sps128,
    Sps250,
    Sps475,
    Sps860,
}

impl DataRate {
    pub fn code(self) -> u16 {
        match self {
            DataRate::Sps8 => 0b000,
            DataRate::Sps16 => 0b001,
            DataRate::Sps32 => 0b010,
            DataRate::Sps64 => 0b011,
            DataRate::Sps128 => 0b100,
            DataRate::Sps250 => 0b101,
            DataRate::Sps475 => 0b110,
            DataRate::Sps860 => 0b111,
        }
    }
}

/// Packs a config word that starts a conversion on single-ended `channel`.
///
/// Layout (MSB first): OS[15] MUX[14:12] PGA[11:9] MODE[8] DR[7:5]
/// COMP_MODE[4] COMP_POL[3] COMP_LAT[2] COMP_QUE[1:0]. The comparator is
/// always disabled. Channels wrap to their low two bits.
pub fn config_word(channel: u8, continuous: bool, gain: Gain, data_rate: DataRate) -> u16 {
    let mut config = OS_BIT;

    let mux = MUX_SINGLE_ENDED_BASE | (u16::from(channel) & 0b11);
    config |= mux << CONFIG_MUX;
    config |= gain.code() << CONFIG_PGA;

    if !continuous {
        config |= MODE_SINGLE_SHOT << CONFIG_MODE;
    }

    config |= data_rate.code() << CONFIG_DR;
    config |= COMP_QUE_DISABLE << CONFIG_COMP_QUE;
    config
}

/// Config word with the default ±4.096 V range at 128 SPS.
pub fn build_config(channel: u8, continuous: bool) -> u16 {
    config_word(channel, continuous, Gain::default(), DataRate::default())
}

/// Reinterprets a big-endian register pair as a two's-complement value.
pub fn decode_register(high: u8, low: u8) -> i16 {
    let raw = (u16::from(high) << 8) | u16::from(low);
    raw as i16
}

/// Splits a register value into its bus bytes, most significant first.
pub fn encode_register(value: u16) -> [u8; 2] {
    [(value >> 8) as u8, (value & 0xFF) as u8]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_zero_single_shot_layout() {
        let config = build_config(0, false);

        assert_eq!(config, 0xC383);
        assert_ne!(config & OS_BIT, 0, "start-conversion bit");
        assert_eq!((config >> CONFIG_MUX) & 0b111, 0b100, "AIN0 vs GND");
        assert_eq!((config >> CONFIG_PGA) & 0b111, 0b001, "+/-4.096V");
        assert_eq!((config >> CONFIG_MODE) & 1, 1, "single-shot");
        assert_eq!((config >> CONFIG_DR) & 0b111, 0b100, "128 SPS");
        assert_eq!(config & 0b11, 0b11, "comparator disabled");
        assert_eq!((config >> CONFIG_COMP_MODE) & 1, 0);
        assert_eq!((config >> CONFIG_COMP_POL) & 1, 0);
        assert_eq!((config >> CONFIG_COMP_LAT) & 1, 0);
    }

    #[test]
    fn channel_three_continuous_clears_mode_bit() {
        let config = build_config(3, true);

        assert_eq!(config, 0xF283);
        assert_eq!((config >> CONFIG_MUX) & 0b111, 0b111);
        assert_eq!((config >> CONFIG_MODE) & 1, 0);
    }

    #[test]
    fn gain_and_rate_land_in_their_fields() {
        let config = config_word(1, false, Gain::Fs0_256V, DataRate::Sps860);

        assert_eq!((config >> CONFIG_MUX) & 0b111, 0b101);
        assert_eq!((config >> CONFIG_PGA) & 0b111, 0b101);
        assert_eq!((config >> CONFIG_DR) & 0b111, 0b111);
    }

    #[test]
    fn decode_treats_high_bit_as_sign() {
        assert_eq!(decode_register(0xFF, 0xFF), -1);
        assert_eq!(decode_register(0x80, 0x00), i16::MIN);
        assert_eq!(decode_register(0x7F, 0xFF), i16::MAX);
        assert_eq!(decode_register(0x12, 0x34), 0x1234);
    }

    #[test]
    fn encode_is_msb_first() {
        assert_eq!(encode_register(0xC383), [0xC3, 0x83]);
        assert_eq!(encode_register(0x00FF), [0x00, 0xFF]);
    }
}
