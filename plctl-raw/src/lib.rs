//! # plctl-raw
//!
//! Register definitions and codecs for Intel RAPL package power limits.
//!
//! The package power limit exists twice on client parts: once as
//! `MSR_PKG_POWER_LIMIT` (0x610) and once inside the chipset MCHBAR window
//! (commonly at offset 0x59A0). Both share the same 64-bit layout, so the
//! codecs here work on raw values and never touch hardware.
//!
//! ## Usage
//!
//! ```ignore
//! use plctl_raw::rapl::{apply, PowerUnit};
//! use plctl_raw::RegisterLayout;
//!
//! let unit = PowerUnit::from_raw(msr_0x606_value);
//! let pl1 = unit.watts_to_units(45.0)?;
//! let pl2 = unit.watts_to_units(65.0)?;
//!
//! // Only bits [14:0] and [46:32] change
//! let next = apply(current, pl1, pl2);
//! ```

pub mod mchbar;
pub mod rapl;
pub mod register;

// Re-export for convenience
pub use rapl::{apply, PowerLimit, PowerLimitUnits, PowerUnit, RangeError};
pub use register::RegisterLayout;
