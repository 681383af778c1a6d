//! Brute-force search of the MCHBAR window for a known PL1/PL2 pair

use plctl_raw::{PowerLimit, PowerLimitUnits, PowerUnit, RegisterLayout};

use crate::common::MmioWindow;
use crate::error::Result;

/// Watt defaults used when neither `--units` nor explicit watts are given
pub const DEFAULT_PL1_WATTS: f64 = 55.0;
pub const DEFAULT_PL2_WATTS: f64 = 157.0;

const SCAN_STRIDE: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanTarget {
    pub pl1: PowerLimitUnits,
    pub pl2: PowerLimitUnits,
}

impl ScanTarget {
    pub fn from_units(pl1: u16, pl2: u16) -> Result<Self> {
        Ok(Self {
            pl1: PowerLimitUnits::new(u64::from(pl1))?,
            pl2: PowerLimitUnits::new(u64::from(pl2))?,
        })
    }

    pub fn from_watts(pl1_watts: f64, pl2_watts: f64, unit: &PowerUnit) -> Result<Self> {
        Ok(Self {
            pl1: unit.watts_to_units(pl1_watts)?,
            pl2: unit.watts_to_units(pl2_watts)?,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchMode {
    /// Both enable bits (15 and 47) must be set
    RequireEnable,
    /// Power fields only
    Any,
}

impl MatchMode {
    pub fn requires_enable(self) -> bool {
        matches!(self, MatchMode::RequireEnable)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanMatch {
    pub offset: usize,
    pub value: u64,
}

impl ScanMatch {
    pub fn low(&self) -> u32 {
        self.value as u32
    }

    pub fn high(&self) -> u32 {
        (self.value >> 32) as u32
    }
}

/// Whether a register value carries the target limits
pub fn matches(value: u64, target: &ScanTarget, mode: MatchMode) -> bool {
    let limit = PowerLimit::from_raw(value);

    if limit.power_limit_1 != target.pl1.get() || limit.power_limit_2 != target.pl2.get() {
        return false;
    }
    !mode.requires_enable() || (limit.enable_1 && limit.enable_2)
}

/// Read every 8-byte-aligned slot of the window and collect the matches
pub fn scan(window: &MmioWindow, target: &ScanTarget, mode: MatchMode) -> Result<Vec<ScanMatch>> {
    let mut found = Vec::new();

    for offset in (0..window.size() / SCAN_STRIDE).map(|slot| slot * SCAN_STRIDE) {
        let value = window.read64(offset)?;
        if matches(value, target, mode) {
            tracing::debug!("Match at +0x{:05x}: 0x{:016x}", offset, value);
            found.push(ScanMatch { offset, value });
        }
    }

    tracing::info!(
        "Scanned 0x{:X} bytes at 0x{:016x}: {} match(es)",
        window.size(),
        window.base(),
        found.len()
    );
    Ok(found)
}
