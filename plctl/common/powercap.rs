//! Kernel powercap (intel-rapl) constraint files

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use plctl_raw::RangeError;

use crate::config::HostConfig;
use crate::error::{PlctlError, Result};

/// Long-term (PL1) constraint
pub const PL1_CONSTRAINT: &str = "constraint_0_power_limit_uw";

/// Short-term (PL2) constraint
pub const PL2_CONSTRAINT: &str = "constraint_1_power_limit_uw";

/// Convert watts to the integer microwatts the kernel expects
pub fn watts_to_microwatts(watts: f64) -> Result<u64> {
    if !watts.is_finite() || watts <= 0.0 {
        return Err(RangeError::NonPositiveWatts(watts).into());
    }
    let uw = (watts * 1_000_000.0).round() as u64;
    if uw == 0 {
        return Err(RangeError::NonPositiveWatts(watts).into());
    }
    Ok(uw)
}

/// The package-0 RAPL zone, e.g. `/sys/class/powercap/intel-rapl:0`
pub struct Powercap {
    dir: PathBuf,
}

impl Powercap {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn from_config(config: &HostConfig) -> Self {
        Self::new(&config.powercap_dir)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Current `(pl1_uw, pl2_uw)`
    pub fn read_limits(&self) -> Result<(u64, u64)> {
        Ok((self.read_uw(PL1_CONSTRAINT)?, self.read_uw(PL2_CONSTRAINT)?))
    }

    /// Write both constraints as one operation
    ///
    /// If PL2 cannot be written after PL1 was, PL1 is put back to its previous
    /// value before the PL2 error is returned.
    pub fn write_limits(&self, pl1_uw: u64, pl2_uw: u64) -> Result<()> {
        if pl1_uw == 0 || pl2_uw == 0 {
            return Err(RangeError::NonPositiveWatts(0.0).into());
        }

        let previous_pl1 = self.read_uw(PL1_CONSTRAINT)?;
        self.write_uw(PL1_CONSTRAINT, pl1_uw)?;

        if let Err(e) = self.write_uw(PL2_CONSTRAINT, pl2_uw) {
            if let Err(undo) = self.write_uw(PL1_CONSTRAINT, previous_pl1) {
                tracing::error!("Failed to restore {PL1_CONSTRAINT} to {previous_pl1}: {undo}");
            }
            return Err(e);
        }

        tracing::info!("Powercap limits set: PL1={pl1_uw}uW PL2={pl2_uw}uW");
        Ok(())
    }

    fn read_uw(&self, name: &str) -> Result<u64> {
        let path = self.dir.join(name);
        let text = std::fs::read_to_string(&path).map_err(|e| PlctlError::Io {
            op: "read",
            target: path.display().to_string(),
            source: e,
        })?;

        text.trim().parse::<u64>().map_err(|e| {
            PlctlError::HardwareError(format!("{}: '{}': {e}", path.display(), text.trim()))
        })
    }

    fn write_uw(&self, name: &str, value: u64) -> Result<()> {
        let path = self.dir.join(name);
        let io_err = |e| PlctlError::Io {
            op: "write",
            target: path.display().to_string(),
            source: e,
        };

        // No create: a missing attribute means the wrong zone, not a new file
        let mut file = OpenOptions::new()
            .write(true)
            .truncate(true)
            .open(&path)
            .map_err(io_err)?;
        file.write_all(value.to_string().as_bytes()).map_err(io_err)?;

        tracing::debug!("Powercap write: {} = {}", path.display(), value);
        Ok(())
    }
}
