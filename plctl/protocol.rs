//! Line protocol spoken to a front end: one snapshot read and three
//! independent write commands

use std::collections::HashMap;
use std::fmt::Write as _;

use plctl_raw::PowerUnit;

use crate::cli::parse_hex_u64;
use crate::common::Powercap;
use crate::error::{PlctlError, Result};
use crate::registers::PowerLimitAccess;

/// Everything a front end needs to display and edit the limits
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    /// Power unit exponent n (unit = 2^-n W)
    pub power_unit: u8,
    pub unit_watts: f64,
    pub msr: u64,
    pub mmio: u64,
}

impl Snapshot {
    pub fn capture(
        unit: &PowerUnit,
        msr: &dyn PowerLimitAccess,
        mmio: &dyn PowerLimitAccess,
    ) -> Result<Self> {
        Ok(Self {
            power_unit: unit.power_units,
            unit_watts: unit.unit_watts(),
            msr: msr.read()?,
            mmio: mmio.read()?,
        })
    }

    /// `KEY=VALUE` lines, register values as 16-digit hex
    pub fn render(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "POWER_UNIT={}", self.power_unit);
        let _ = writeln!(out, "UNIT_WATTS={:.9}", self.unit_watts);
        let _ = writeln!(out, "MSR=0x{:016x}", self.msr);
        let _ = writeln!(out, "MMIO=0x{:016x}", self.mmio);
        out
    }

    /// Read back `render` output; unknown keys and malformed lines are skipped
    pub fn parse(text: &str) -> Result<Self> {
        let values: HashMap<&str, &str> = text
            .lines()
            .filter_map(|line| line.split_once('='))
            .map(|(key, value)| (key.trim(), value.trim()))
            .filter(|(key, _)| !key.is_empty())
            .collect();

        let field = |key: &str| {
            values
                .get(key)
                .copied()
                .ok_or_else(|| PlctlError::ParseError(format!("Missing {key} in snapshot")))
        };
        let invalid = |key: &str, value: &str| {
            PlctlError::ParseError(format!("Invalid {key} value '{value}'"))
        };

        let power_unit = field("POWER_UNIT")?;
        let power_unit = power_unit
            .parse::<u8>()
            .map_err(|_| invalid("POWER_UNIT", power_unit))?;

        let unit_watts = field("UNIT_WATTS")?;
        let unit_watts = unit_watts
            .parse::<f64>()
            .map_err(|_| invalid("UNIT_WATTS", unit_watts))?;

        let msr = field("MSR")?;
        let msr = parse_register(msr).ok_or_else(|| invalid("MSR", msr))?;

        let mmio = field("MMIO")?;
        let mmio = parse_register(mmio).ok_or_else(|| invalid("MMIO", mmio))?;

        Ok(Self {
            power_unit,
            unit_watts,
            msr,
            mmio,
        })
    }
}

/// `0x`-prefixed hex or plain decimal
fn parse_register(text: &str) -> Option<u64> {
    match text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16).ok(),
        None => text.parse().ok(),
    }
}

/// One request from a front end
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Read,
    WriteMsr(u64),
    WriteMmio(u64),
    WritePowercap { pl1_uw: u64, pl2_uw: u64 },
}

/// Result of a successful [`Command::execute`]
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Snapshot(Snapshot),
    Done,
}

impl Command {
    /// Parse `--read`, `--write-msr HEX`, `--write-mmio HEX` or
    /// `--write-powercap UW UW` (program name already stripped)
    pub fn parse<S: AsRef<str>>(args: &[S]) -> Result<Self> {
        let args: Vec<&str> = args.iter().map(AsRef::as_ref).collect();

        let microwatts = |text: &str| {
            text.parse::<u64>()
                .map_err(|_| PlctlError::ParseError(format!("bad microwatt value '{text}'")))
        };

        match args.as_slice() {
            ["--read"] => Ok(Command::Read),
            ["--write-msr", value] => Ok(Command::WriteMsr(parse_hex_u64(value)?)),
            ["--write-mmio", value] => Ok(Command::WriteMmio(parse_hex_u64(value)?)),
            ["--write-powercap", pl1, pl2] => Ok(Command::WritePowercap {
                pl1_uw: microwatts(*pl1)?,
                pl2_uw: microwatts(*pl2)?,
            }),
            _ => Err(PlctlError::ParseError(format!(
                "expected --read, --write-msr HEX, --write-mmio HEX or --write-powercap UW UW, got '{}'",
                args.join(" ")
            ))),
        }
    }

    /// Run against already-open devices; each command stands alone
    pub fn execute(
        &self,
        unit: &PowerUnit,
        msr: &dyn PowerLimitAccess,
        mmio: &dyn PowerLimitAccess,
        powercap: &Powercap,
    ) -> Result<Outcome> {
        match *self {
            Command::Read => Ok(Outcome::Snapshot(Snapshot::capture(unit, msr, mmio)?)),
            Command::WriteMsr(value) => {
                msr.write(value)?;
                Ok(Outcome::Done)
            }
            Command::WriteMmio(value) => {
                mmio.write(value)?;
                Ok(Outcome::Done)
            }
            Command::WritePowercap { pl1_uw, pl2_uw } => {
                powercap.write_limits(pl1_uw, pl2_uw)?;
                Ok(Outcome::Done)
            }
        }
    }
}
