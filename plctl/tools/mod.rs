//! Control surfaces built on the register accessors

pub mod dump;
pub mod interactive;
pub mod oneshot;
pub mod scanner;

use std::io::{self, Write};

use plctl_raw::{PowerLimit, PowerUnit, RangeError, RegisterLayout};

/// Reject watt values outside `(0, limit]` before they reach the codec
pub fn check_watts(watts: f64, limit: f64) -> Result<f64, RangeError> {
    if !watts.is_finite() || watts <= 0.0 {
        return Err(RangeError::NonPositiveWatts(watts));
    }
    if watts > limit {
        return Err(RangeError::AboveLimit { watts, limit });
    }
    Ok(watts)
}

/// Print a power-limit register: raw value, both halves and the lock bit
pub fn write_limit<W: Write>(
    out: &mut W,
    label: &str,
    value: u64,
    unit: &PowerUnit,
) -> io::Result<()> {
    let limit = PowerLimit::from_raw(value);

    writeln!(out, "{label}")?;
    writeln!(out, "  raw  = 0x{value:016x}")?;
    for (name, units, enable, clamp, window) in [
        (
            "PL1",
            limit.power_limit_1,
            limit.enable_1,
            limit.clamp_1,
            limit.time_window_1,
        ),
        (
            "PL2",
            limit.power_limit_2,
            limit.enable_2,
            limit.clamp_2,
            limit.time_window_2,
        ),
    ] {
        writeln!(
            out,
            "  {name}  = {units} ({:.2} W) enable={} clamp={} window={:.6} s",
            unit.units_to_watts(units),
            u8::from(enable),
            u8::from(clamp),
            PowerLimit::time_window_seconds(window, unit)
        )?;
    }
    writeln!(out, "  lock = {}", u8::from(limit.lock))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_watts() {
        assert_eq!(check_watts(45.0, 500.0), Ok(45.0));
        assert_eq!(check_watts(500.0, 500.0), Ok(500.0));
        assert_eq!(
            check_watts(500.5, 500.0),
            Err(RangeError::AboveLimit {
                watts: 500.5,
                limit: 500.0
            })
        );
        assert!(matches!(
            check_watts(0.0, 5000.0),
            Err(RangeError::NonPositiveWatts(_))
        ));
        assert!(check_watts(f64::NAN, 5000.0).is_err());
    }

    #[test]
    fn test_write_limit() {
        let mut out = Vec::new();
        write_limit(
            &mut out,
            "MMIO",
            0x00DF_8320_0042_0190,
            &PowerUnit::FIXED_EIGHTH_WATT,
        )
        .unwrap();
        let text = String::from_utf8(out).unwrap();

        assert!(text.starts_with("MMIO\n  raw  = 0x00df832000420190\n"));
        assert!(text.contains("PL1  = 400 (50.00 W) enable=0 clamp=0"));
        assert!(text.contains("PL2  = 800 (100.00 W) enable=1 clamp=1"));
        assert!(text.ends_with("lock = 0\n"));
    }
}
