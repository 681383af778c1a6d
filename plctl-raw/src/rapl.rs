//! RAPL (Running Average Power Limit) package power-limit definitions
//!
//! ## References
//!
//! - Intel® 64 and IA-32 Architectures Software Developer's Manual, Volume 3B
//! - Section 15.10: Platform Specific Power Management Support

use std::fmt;

use crate::register::{bit, field, RegisterLayout};

/// MSR addresses for RAPL
pub mod msr {
    /// RAPL Power Unit MSR - Defines energy, power, and time units
    pub const MSR_RAPL_POWER_UNIT: u64 = 0x606;

    /// Package Power Limit - PL1/PL2 package power limits
    pub const MSR_PKG_POWER_LIMIT: u64 = 0x610;
}

/// Smallest unit value accepted in a power field
pub const PL_UNITS_MIN: u16 = 1;

/// Largest unit value a 15-bit power field can hold
pub const PL_UNITS_MAX: u16 = 0x7FFF;

/// PL1 power field, bits [14:0]
pub const PL1_POWER_MASK: u64 = 0x7FFF;

/// PL2 power field, bits [46:32]
pub const PL2_POWER_MASK: u64 = 0x7FFF << PL2_SHIFT;

/// Every bit `apply` is allowed to change
pub const POWER_FIELDS_MASK: u64 = PL1_POWER_MASK | PL2_POWER_MASK;

const PL2_SHIFT: u32 = 32;

/// Errors raised when a value cannot be encoded into a power field
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RangeError {
    #[error("power limit of {units} units (0x{units:X}) is outside [1, 0x7FFF]")]
    Units { units: u64 },

    #[error("{watts} W converts to {units} units (0x{units:X}) at {unit_watts} W/unit, outside [1, 0x7FFF]")]
    Watts {
        watts: f64,
        units: u64,
        unit_watts: f64,
    },

    #[error("power must be a positive number of watts, got {0}")]
    NonPositiveWatts(f64),

    #[error("{watts} W exceeds the {limit} W safety limit")]
    AboveLimit { watts: f64, limit: f64 },

    #[error("power unit exponent {0} is outside [0, 15]")]
    UnitExponent(u8),
}

/// A power field value known to lie in `[1, 0x7FFF]`
///
/// This is the only type `apply` accepts, so an out-of-range value can never
/// spill into the enable/clamp bits next to the field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PowerLimitUnits(u16);

impl PowerLimitUnits {
    pub fn new(units: u64) -> Result<Self, RangeError> {
        if units < u64::from(PL_UNITS_MIN) || units > u64::from(PL_UNITS_MAX) {
            return Err(RangeError::Units { units });
        }
        Ok(Self(units as u16))
    }

    pub const fn get(self) -> u16 {
        self.0
    }
}

impl fmt::Display for PowerLimitUnits {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (0x{:X})", self.0, self.0)
    }
}

/// RAPL Power Unit Register layout
///
/// Defines the units for energy, power, and time measurements.
///
/// ## Register Format
///
/// | Bits   | Field        | Description                           |
/// |--------|--------------|---------------------------------------|
/// | 0-3    | power_units  | Power units (1/2^PU watts)           |
/// | 4-7    | reserved     |                                       |
/// | 8-12   | energy_units | Energy units (1/2^ESU joules)        |
/// | 13-15  | reserved     |                                       |
/// | 16-19  | time_units   | Time units (1/2^TU seconds)          |
/// | 20-63  | reserved     |                                       |
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PowerUnit {
    /// Power units: watts = value * (1.0 / 2^power_units)
    pub power_units: u8,

    /// Energy units: joules = value * (1.0 / 2^energy_units)
    pub energy_units: u8,

    /// Time units: seconds = value * (1.0 / 2^time_units)
    pub time_units: u8,
}

impl RegisterLayout for PowerUnit {
    fn to_raw(&self) -> u64 {
        (self.power_units as u64 & 0x0F)
            | ((self.energy_units as u64 & 0x1F) << 8)
            | ((self.time_units as u64 & 0x0F) << 16)
    }

    fn from_raw(value: u64) -> Self {
        Self {
            power_units: field(value, 3, 0) as u8,
            energy_units: field(value, 12, 8) as u8,
            time_units: field(value, 19, 16) as u8,
        }
    }

    fn validate(&self) -> Result<(), &'static str> {
        if self.power_units > 15 {
            return Err("Power units must be <= 15 (4 bits)");
        }
        if self.energy_units > 31 {
            return Err("Energy units must be <= 31 (5 bits)");
        }
        if self.time_units > 15 {
            return Err("Time units must be <= 15 (4 bits)");
        }
        Ok(())
    }
}

impl PowerUnit {
    /// The 1/8 W scale older tooling assumed instead of reading 0x606.
    ///
    /// Deprecated: only for hosts where the units register cannot be read.
    pub const FIXED_EIGHTH_WATT: PowerUnit = PowerUnit {
        power_units: 3,
        energy_units: 14,
        time_units: 10,
    };

    /// Build a unit with the given power exponent and default energy/time units
    pub fn from_exponent(power_units: u8) -> Result<Self, RangeError> {
        if power_units > 15 {
            return Err(RangeError::UnitExponent(power_units));
        }
        Ok(Self {
            power_units,
            ..Self::FIXED_EIGHTH_WATT
        })
    }

    /// Watts per LSB of a power field
    pub fn unit_watts(&self) -> f64 {
        1.0 / (1u64 << self.power_units) as f64
    }

    /// Get energy unit multiplier (joules per LSB)
    pub fn energy_unit_multiplier(&self) -> f64 {
        1.0 / (1u64 << self.energy_units) as f64
    }

    /// Get time unit multiplier (seconds per LSB)
    pub fn time_unit_multiplier(&self) -> f64 {
        1.0 / (1u64 << self.time_units) as f64
    }

    /// Convert watts to power field units, rounding to nearest
    ///
    /// Results that round to zero or overflow the 15-bit field are rejected,
    /// never clamped.
    pub fn watts_to_units(&self, watts: f64) -> Result<PowerLimitUnits, RangeError> {
        if !watts.is_finite() || watts <= 0.0 {
            return Err(RangeError::NonPositiveWatts(watts));
        }

        let unit_watts = self.unit_watts();
        let units = (watts / unit_watts).round();
        if units < f64::from(PL_UNITS_MIN) || units > f64::from(PL_UNITS_MAX) {
            return Err(RangeError::Watts {
                watts,
                units: units as u64,
                unit_watts,
            });
        }

        Ok(PowerLimitUnits(units as u16))
    }

    pub fn units_to_watts(&self, units: u16) -> f64 {
        f64::from(units) * self.unit_watts()
    }
}

/// Package Power Limit Register layout
///
/// Shared by `MSR_PKG_POWER_LIMIT` and the MCHBAR copy.
///
/// ## Register Format
///
/// | Bits   | Field          | Description                        |
/// |--------|----------------|------------------------------------|
/// | 0-14   | power_limit_1  | Power limit 1 (power units)       |
/// | 15     | enable_1       | Enable power limit 1              |
/// | 16     | clamp_1        | Clamp to power limit 1            |
/// | 17-23  | time_window_1  | Time window 1                     |
/// | 24-31  | reserved       |                                    |
/// | 32-46  | power_limit_2  | Power limit 2 (power units)       |
/// | 47     | enable_2       | Enable power limit 2              |
/// | 48     | clamp_2        | Clamp to power limit 2            |
/// | 49-55  | time_window_2  | Time window 2                     |
/// | 56-62  | reserved       |                                    |
/// | 63     | lock           | Lock register                     |
///
/// `to_raw` zeroes the reserved bits, so writes go through [`apply`] instead.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PowerLimit {
    /// Power limit 1 (scaled by power units)
    pub power_limit_1: u16,

    /// Enable power limit 1
    pub enable_1: bool,

    /// Clamp to power limit 1
    pub clamp_1: bool,

    /// Time window 1 (bits 17-23)
    pub time_window_1: u8,

    /// Power limit 2 (scaled by power units)
    pub power_limit_2: u16,

    /// Enable power limit 2
    pub enable_2: bool,

    /// Clamp to power limit 2
    pub clamp_2: bool,

    /// Time window 2 (bits 49-55)
    pub time_window_2: u8,

    /// Lock register (prevents further writes until reset)
    pub lock: bool,
}

impl RegisterLayout for PowerLimit {
    fn to_raw(&self) -> u64 {
        (self.power_limit_1 as u64 & 0x7FFF)
            | (if self.enable_1 { 1 << 15 } else { 0 })
            | (if self.clamp_1 { 1 << 16 } else { 0 })
            | ((self.time_window_1 as u64 & 0x7F) << 17)
            | ((self.power_limit_2 as u64 & 0x7FFF) << 32)
            | (if self.enable_2 { 1 << 47 } else { 0 })
            | (if self.clamp_2 { 1 << 48 } else { 0 })
            | ((self.time_window_2 as u64 & 0x7F) << 49)
            | (if self.lock { 1 << 63 } else { 0 })
    }

    fn from_raw(value: u64) -> Self {
        Self {
            power_limit_1: field(value, 14, 0) as u16,
            enable_1: bit(value, 15),
            clamp_1: bit(value, 16),
            time_window_1: field(value, 23, 17) as u8,
            power_limit_2: field(value, 46, 32) as u16,
            enable_2: bit(value, 47),
            clamp_2: bit(value, 48),
            time_window_2: field(value, 55, 49) as u8,
            lock: bit(value, 63),
        }
    }

    fn validate(&self) -> Result<(), &'static str> {
        if self.power_limit_1 > PL_UNITS_MAX {
            return Err("Power limit 1 must be <= 0x7FFF (15 bits)");
        }
        if self.time_window_1 > 127 {
            return Err("Time window 1 must be <= 127 (7 bits)");
        }
        if self.power_limit_2 > PL_UNITS_MAX {
            return Err("Power limit 2 must be <= 0x7FFF (15 bits)");
        }
        if self.time_window_2 > 127 {
            return Err("Time window 2 must be <= 127 (7 bits)");
        }
        Ok(())
    }
}

impl PowerLimit {
    /// Decode a 7-bit time window field into seconds
    ///
    /// The field holds `Y` in bits [4:0] and `Z` in bits [6:5];
    /// the window is `2^Y * (1 + Z/4)` time units.
    pub fn time_window_seconds(window: u8, unit: &PowerUnit) -> f64 {
        let y = i32::from(window & 0x1F);
        let z = f64::from((window >> 5) & 0x3);
        2f64.powi(y) * (1.0 + z / 4.0) * unit.time_unit_multiplier()
    }
}

/// Replace the PL1 and PL2 power fields of `current`
///
/// Bits [14:0] take `pl1`, bits [46:32] take `pl2`; every other bit
/// (enable, clamp, time window, lock, reserved) is carried over unchanged.
pub fn apply(current: u64, pl1: PowerLimitUnits, pl2: PowerLimitUnits) -> u64 {
    (current & !POWER_FIELDS_MASK) | u64::from(pl1.get()) | (u64::from(pl2.get()) << PL2_SHIFT)
}

/// The raw `(pl1, pl2)` power field values of a register
pub fn limit_units(value: u64) -> (u16, u16) {
    (field(value, 14, 0) as u16, field(value, 46, 32) as u16)
}
