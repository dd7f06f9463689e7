//! Board wiring and calibration presets.
//!
//! Everything in here is fixed when the firmware is built. The calibration
//! enums mirror the step tables of the CAP1106 datasheet so the
//! initialization sequence never has to spell out raw register values.

use embedded_hal::i2c::SevenBitAddress;
use fugit::HertzU32;

/// Default 7-bit I²C address of the CAP1106.
pub const DEFAULT_ADDRESS: SevenBitAddress = 0x28;

/// Number of electrodes wired on the board.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
pub enum ElectrodeCount {
    Three = 3,
    Four = 4,
}

impl ElectrodeCount {
    pub const fn count(self) -> usize {
        self as usize
    }

    /// Bits of the sensor registers that belong to wired electrodes
    /// (CS1 is bit 0).
    pub const fn mask(self) -> u8 {
        (1 << self as u8) - 1
    }
}

/// GPIO numbers used by the board.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
pub struct PinAssignment {
    pub alert: u8,
    pub clock: u8,
    pub data: u8,
    /// One LED per electrode, in electrode order.
    pub leds: &'static [u8],
}

/// Hardware variant description.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
pub struct ElectrodeConfig {
    pub electrodes: ElectrodeCount,
    pub pins: PinAssignment,
    pub bus_frequency: HertzU32,
    pub address: SevenBitAddress,
    /// When false only the LEDs are brought up; the controller is never
    /// touched and no interrupt is armed.
    pub touch_enabled: bool,
}

impl ElectrodeConfig {
    /// Three electrode board with the touch pipeline running.
    pub const THREE_ELECTRODE: Self = Self {
        electrodes: ElectrodeCount::Three,
        pins: PinAssignment {
            alert: 17,
            clock: 18,
            data: 5,
            leds: &[25, 33, 32],
        },
        bus_frequency: HertzU32::from_raw(100_000),
        address: DEFAULT_ADDRESS,
        touch_enabled: true,
    };

    /// Four electrode board. The touch driver is not enabled on this variant.
    pub const FOUR_ELECTRODE: Self = Self {
        electrodes: ElectrodeCount::Four,
        pins: PinAssignment {
            alert: 17,
            clock: 18,
            data: 5,
            leds: &[25, 33, 32, 26],
        },
        bus_frequency: HertzU32::from_raw(100_000),
        address: DEFAULT_ADDRESS,
        touch_enabled: false,
    };

    /// Every electrode drives exactly one LED.
    pub const fn is_consistent(&self) -> bool {
        self.pins.leds.len() == self.electrodes.count()
    }
}

/// Gain applied to the standby channels (STBY_SENSE).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
pub enum StandbySensitivity {
    #[default]
    X128 = 0b000,
    X64 = 0b001,
    /// Power-on default of the controller.
    X32 = 0b010,
    X16 = 0b011,
    X8 = 0b100,
    X4 = 0b101,
    X2 = 0b110,
    X1 = 0b111,
}

impl From<u8> for StandbySensitivity {
    fn from(value: u8) -> Self {
        match value & 0b111 {
            0b000 => Self::X128,
            0b001 => Self::X64,
            0b010 => Self::X32,
            0b011 => Self::X16,
            0b100 => Self::X8,
            0b101 => Self::X4,
            0b110 => Self::X2,
            _ => Self::X1,
        }
    }
}

impl From<StandbySensitivity> for u8 {
    fn from(value: StandbySensitivity) -> Self {
        value as u8
    }
}

/// Standby touch threshold, relative to the controller's nominal 0x40.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
pub enum StandbyThreshold {
    Nominal = 0x40,
    #[default]
    Half = 0x20,
    Quarter = 0x10,
    Eighth = 0x08,
}

impl From<StandbyThreshold> for u8 {
    fn from(value: StandbyThreshold) -> Self {
        value as u8
    }
}

/// 35 ms timing steps shared by the repeat rate (RPT_RATE) and the
/// press-and-hold detection time (M_PRESS).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
pub enum Interval {
    Ms35 = 0x0,
    Ms70 = 0x1,
    Ms105 = 0x2,
    Ms140 = 0x3,
    Ms175 = 0x4,
    Ms210 = 0x5,
    Ms245 = 0x6,
    Ms280 = 0x7,
    Ms315 = 0x8,
    Ms350 = 0x9,
    Ms385 = 0xA,
    Ms420 = 0xB,
    Ms455 = 0xC,
    Ms490 = 0xD,
    Ms525 = 0xE,
    Ms560 = 0xF,
}

const INTERVALS: [Interval; 16] = [
    Interval::Ms35,
    Interval::Ms70,
    Interval::Ms105,
    Interval::Ms140,
    Interval::Ms175,
    Interval::Ms210,
    Interval::Ms245,
    Interval::Ms280,
    Interval::Ms315,
    Interval::Ms350,
    Interval::Ms385,
    Interval::Ms420,
    Interval::Ms455,
    Interval::Ms490,
    Interval::Ms525,
    Interval::Ms560,
];

impl Interval {
    pub const fn millis(self) -> u32 {
        35 * (self as u32 + 1)
    }
}

impl From<u8> for Interval {
    fn from(value: u8) -> Self {
        INTERVALS[(value & 0x0F) as usize]
    }
}

impl From<Interval> for u8 {
    fn from(value: Interval) -> Self {
        value as u8
    }
}

/// Maximum time a touch is reported before the controller recalibrates
/// the channel (MAX_DUR).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
pub enum MaxDuration {
    Ms560 = 0x0,
    Ms840 = 0x1,
    Ms1120 = 0x2,
    Ms1400 = 0x3,
    Ms1680 = 0x4,
    Ms2240 = 0x5,
    Ms2800 = 0x6,
    Ms3360 = 0x7,
    Ms3920 = 0x8,
    Ms4480 = 0x9,
    Ms5600 = 0xA,
    Ms6720 = 0xB,
    Ms7840 = 0xC,
    Ms8906 = 0xD,
    Ms10080 = 0xE,
    Ms11200 = 0xF,
}

const MAX_DURATIONS: [(MaxDuration, u32); 16] = [
    (MaxDuration::Ms560, 560),
    (MaxDuration::Ms840, 840),
    (MaxDuration::Ms1120, 1120),
    (MaxDuration::Ms1400, 1400),
    (MaxDuration::Ms1680, 1680),
    (MaxDuration::Ms2240, 2240),
    (MaxDuration::Ms2800, 2800),
    (MaxDuration::Ms3360, 3360),
    (MaxDuration::Ms3920, 3920),
    (MaxDuration::Ms4480, 4480),
    (MaxDuration::Ms5600, 5600),
    (MaxDuration::Ms6720, 6720),
    (MaxDuration::Ms7840, 7840),
    (MaxDuration::Ms8906, 8906),
    (MaxDuration::Ms10080, 10080),
    (MaxDuration::Ms11200, 11200),
];

impl MaxDuration {
    pub const fn millis(self) -> u32 {
        MAX_DURATIONS[self as usize].1
    }
}

impl From<u8> for MaxDuration {
    fn from(value: u8) -> Self {
        MAX_DURATIONS[(value & 0x0F) as usize].0
    }
}

impl From<MaxDuration> for u8 {
    fn from(value: MaxDuration) -> Self {
        value as u8
    }
}

/// Calibration written during initialization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
pub struct Calibration {
    pub standby_sensitivity: StandbySensitivity,
    pub standby_threshold: StandbyThreshold,
    pub repeat_rate: Interval,
    pub max_duration: MaxDuration,
    pub min_press: Interval,
}

impl Default for Calibration {
    fn default() -> Self {
        Self {
            standby_sensitivity: StandbySensitivity::X128,
            standby_threshold: StandbyThreshold::Half,
            repeat_rate: Interval::Ms525,
            max_duration: MaxDuration::Ms7840,
            min_press: Interval::Ms560,
        }
    }
}
