//! Non-interactive set/restore of the MCHBAR power-limit copy

use std::io::Write;

use plctl_raw::{apply, PowerUnit};

use crate::error::Result;
use crate::registers::PowerLimitAccess;
use crate::tools::check_watts;

/// Highest watt value the one-shot tool accepts
pub const MAX_ONESHOT_WATTS: f64 = 500.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Mode {
    Set { pl1_watts: f64, pl2_watts: f64 },
    Restore(u64),
}

/// Pick the power unit for a run
///
/// The hardware unit from MSR 0x606 is used unless `fixed_scale` is set or
/// the register could not be read; the 1/8 W fallback is always announced.
pub fn resolve_unit(hardware: Result<PowerUnit>, fixed_scale: bool) -> PowerUnit {
    match hardware {
        Ok(unit) if !fixed_scale => unit,
        Ok(unit) => {
            if unit != PowerUnit::FIXED_EIGHTH_WATT {
                tracing::warn!(
                    "--fixed-scale overrides the hardware unit of {} W with 0.125 W",
                    unit.unit_watts()
                );
            }
            warn_fixed_scale();
            PowerUnit::FIXED_EIGHTH_WATT
        }
        Err(e) => {
            tracing::warn!("Cannot read the RAPL power unit: {e}");
            warn_fixed_scale();
            PowerUnit::FIXED_EIGHTH_WATT
        }
    }
}

fn warn_fixed_scale() {
    tracing::warn!("Using the deprecated fixed 1/8 W scale; written limits may be wrong on this CPU");
}

/// The value `mode` would write over `current`
pub fn target_value(current: u64, mode: &Mode, unit: &PowerUnit) -> Result<u64> {
    match *mode {
        Mode::Set {
            pl1_watts,
            pl2_watts,
        } => {
            let pl1 = unit.watts_to_units(check_watts(pl1_watts, MAX_ONESHOT_WATTS)?)?;
            let pl2 = unit.watts_to_units(check_watts(pl2_watts, MAX_ONESHOT_WATTS)?)?;
            Ok(apply(current, pl1, pl2))
        }
        Mode::Restore(value) => Ok(value),
    }
}

/// Print the original value and its restore command, write, then print the result
///
/// Returns the value read back after the write.
pub fn run<W: Write>(
    access: &dyn PowerLimitAccess,
    mode: &Mode,
    unit: &PowerUnit,
    restore_program: &str,
    out: &mut W,
) -> Result<u64> {
    let location = access.location();
    let orig = access.read()?;

    writeln!(out, "ORIG  [{location}] = 0x{orig:016x}")?;
    writeln!(
        out,
        "Restore command:\n  sudo {restore_program} --restore 0x{orig:016x}"
    )?;

    let target = target_value(orig, mode, unit)?;
    match *mode {
        Mode::Set {
            pl1_watts,
            pl2_watts,
        } => {
            let (pl1, pl2) = plctl_raw::rapl::limit_units(target);
            writeln!(
                out,
                "SET  PL1={pl1_watts}W (0x{pl1:X})  PL2={pl2_watts}W (0x{pl2:X}) at {} W/unit",
                unit.unit_watts()
            )?;
            writeln!(
                out,
                "NEW  lo32=0x{:08x} hi32=0x{:08x}",
                target as u32,
                (target >> 32) as u32
            )?;
        }
        Mode::Restore(_) => writeln!(out, "RESTORE target = 0x{target:016x}")?,
    }

    access.write(target)?;
    let after = access.read()?;
    writeln!(out, "AFTER [{location}] = 0x{after:016x}")?;

    if after != target {
        tracing::warn!("{location} reads back 0x{after:016x}, expected 0x{target:016x}");
    }
    Ok(after)
}
