//! Read-only listing of the commonly located MCHBAR package registers

use std::io::Write;

use plctl_raw::mchbar::{reg, KNOWN_REGISTERS};
use plctl_raw::{PowerLimit, PowerUnit, RegisterLayout};

use crate::common::MmioWindow;
use crate::error::Result;

/// Print each known register; with a unit, also decode limits and energy
pub fn dump<W: Write>(window: &MmioWindow, unit: Option<&PowerUnit>, out: &mut W) -> Result<()> {
    writeln!(out, "MCHBAR @ 0x{:016x}", window.base())?;

    for &(name, offset) in KNOWN_REGISTERS {
        let value = window.read64(offset)?;
        write!(out, "{name:<28} off=0x{offset:04X} val=0x{value:016x}")?;

        match (offset, unit) {
            (reg::PKG_POWER_LIMIT, Some(unit)) => {
                let limit = PowerLimit::from_raw(value);
                write!(
                    out,
                    "  PL1={:.3}W PL2={:.3}W",
                    unit.units_to_watts(limit.power_limit_1),
                    unit.units_to_watts(limit.power_limit_2)
                )?;
            }
            (reg::PKG_ENERGY_STATUS, Some(unit)) => {
                // Counter occupies the low 32 bits and wraps
                let joules = f64::from(value as u32) * unit.energy_unit_multiplier();
                write!(out, "  energy={joules:.3}J")?;
            }
            _ => {}
        }
        writeln!(out)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::mmio::tests::{put_u64, window_file, WINDOW};
    use crate::common::Access;

    #[test]
    fn test_dump_lists_known_registers() {
        let mut file = window_file();
        put_u64(&mut file, 0x59A0, 0x00DF_81B8_0042_8118);
        put_u64(&mut file, 0x59B0, 0x0000_0000_0000_4000);
        let window = MmioWindow::map(file.path(), 0, WINDOW, Access::ReadOnly).unwrap();

        let mut out = Vec::new();
        dump(&window, None, &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert_eq!(text.lines().count(), 1 + KNOWN_REGISTERS.len());
        assert!(text.contains("off=0x59A0 val=0x00df81b800428118\n"));
        assert!(text.contains("off=0x59E0 val=0x0000000000000000\n"));
    }

    #[test]
    fn test_dump_decodes_with_unit() {
        let mut file = window_file();
        put_u64(&mut file, 0x59A0, 0x00DF_81B8_0042_8118);
        put_u64(&mut file, 0x59B0, 0xFFFF_FFFF_0000_4000);
        let window = MmioWindow::map(file.path(), 0, WINDOW, Access::ReadOnly).unwrap();

        let mut out = Vec::new();
        dump(&window, Some(&PowerUnit::FIXED_EIGHTH_WATT), &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("PL1=35.000W PL2=55.000W"));
        assert!(text.contains("energy=1.000J"));
    }
}
