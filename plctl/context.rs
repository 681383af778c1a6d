//! Per-process state resolved once at startup

use plctl_raw::rapl::msr::MSR_RAPL_POWER_UNIT;
use plctl_raw::{PowerUnit, RegisterLayout};

use crate::common::{Access, HostBridgeLocator, MchbarBase, MmioWindow, MsrHandle, Powercap};
use crate::config::HostConfig;
use crate::error::{PlctlError, Result};
use crate::registers::{MmioPowerLimit, MsrPowerLimit};

/// MCHBAR base and power unit, created once and passed by reference
#[derive(Debug, Clone, PartialEq)]
pub struct Context {
    pub base: MchbarBase,
    pub unit: PowerUnit,
}

impl Context {
    pub fn new(base: MchbarBase, unit: PowerUnit) -> Self {
        Self { base, unit }
    }

    pub fn unit_watts(&self) -> f64 {
        self.unit.unit_watts()
    }
}

/// Locate the host bridge named by `config` and resolve its MCHBAR base
pub fn discover_base(config: &HostConfig) -> Result<MchbarBase> {
    Ok(HostBridgeLocator::from_config(config).discover()?)
}

/// Decode the power/energy/time units from MSR 0x606
pub fn read_power_unit(msr: &MsrHandle) -> Result<PowerUnit> {
    let raw = msr.read(MSR_RAPL_POWER_UNIT)?;
    let unit = PowerUnit::from_raw(raw);
    unit.validate()
        .map_err(|e| PlctlError::HardwareError(format!("MSR 0x606 = 0x{raw:016x}: {e}")))?;

    tracing::info!(
        "Power unit: 2^-{} W ({} W/unit), energy 2^-{} J, time 2^-{} s",
        unit.power_units,
        unit.unit_watts(),
        unit.energy_units,
        unit.time_units
    );
    Ok(unit)
}

/// Open device handles for one tool run; all are released on drop
pub struct Devices {
    pub msr: MsrHandle,
    pub mmio: MmioWindow,
    pub powercap: Powercap,
    pub pl_offset: usize,
}

impl Devices {
    pub fn open(config: &HostConfig, base: &MchbarBase, access: Access) -> Result<Self> {
        let msr = MsrHandle::open(config, access)?;
        let mmio = MmioWindow::open(config, base.address, access)?;

        Ok(Self {
            msr,
            mmio,
            powercap: Powercap::from_config(config),
            pl_offset: config.pl_offset,
        })
    }

    pub fn msr_limit(&self) -> MsrPowerLimit<'_> {
        MsrPowerLimit::new(&self.msr)
    }

    pub fn mmio_limit(&self) -> MmioPowerLimit<'_> {
        MmioPowerLimit::new(&self.mmio, self.pl_offset)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::fs;
    use std::os::unix::fs::FileExt;
    use std::path::Path;

    use crate::common::powercap::{PL1_CONSTRAINT, PL2_CONSTRAINT};

    /// A device root laid out like a real host, for use with `HostConfig::with_root`
    pub(crate) struct FakeHost {
        _root: tempfile::TempDir,
        pub config: HostConfig,
    }

    impl FakeHost {
        pub(crate) fn new(mchbar_raw: u64) -> Self {
            let root = tempfile::tempdir().unwrap();
            let config = HostConfig::with_root(root.path());

            let bridge = config.pci_devices_dir.join("0000:00:00.0");
            fs::create_dir_all(&bridge).unwrap();
            fs::write(bridge.join("vendor"), "0x8086\n").unwrap();
            fs::write(bridge.join("class"), "0x060000\n").unwrap();
            let mut pci_config = vec![0u8; 256];
            pci_config[0x48..0x50].copy_from_slice(&mchbar_raw.to_le_bytes());
            fs::write(bridge.join("config"), pci_config).unwrap();

            // /dev/mem stand-in covering the window at the MCHBAR base
            let base = mchbar_raw & !0xFFF;
            create_sized(&config.dev_mem, base + config.mmio_window_size as u64);

            create_sized(&config.msr_path(), 0x1000);

            fs::create_dir_all(&config.powercap_dir).unwrap();
            fs::write(config.powercap_dir.join(PL1_CONSTRAINT), "157000000\n").unwrap();
            fs::write(config.powercap_dir.join(PL2_CONSTRAINT), "157000000\n").unwrap();

            Self {
                _root: root,
                config,
            }
        }

        pub(crate) fn put_msr(&self, reg: u64, value: u64) {
            write_at(&self.config.msr_path(), reg, value);
        }

        pub(crate) fn put_mmio(&self, base: u64, offset: usize, value: u64) {
            write_at(&self.config.dev_mem, base + offset as u64, value);
        }
    }

    fn create_sized(path: &Path, len: u64) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        let file = fs::File::create(path).unwrap();
        file.set_len(len).unwrap();
    }

    fn write_at(path: &Path, offset: u64, value: u64) {
        let file = fs::OpenOptions::new().write(true).open(path).unwrap();
        file.write_all_at(&value.to_le_bytes(), offset).unwrap();
    }

    #[test]
    fn test_context_from_fake_host() {
        let host = FakeHost::new(0x0020_0001);
        host.put_msr(MSR_RAPL_POWER_UNIT, 0x000A_0E03);
        host.put_mmio(0x0020_0000, 0x59A0, 0x00DF_81B8_0042_0000);

        let base = discover_base(&host.config).unwrap();
        assert_eq!(base.address, 0x0020_0000);

        let devices = Devices::open(&host.config, &base, Access::ReadOnly).unwrap();
        let ctx = Context::new(base, read_power_unit(&devices.msr).unwrap());
        assert_eq!(ctx.unit_watts(), 0.125);
        assert_eq!(ctx.unit.time_units, 10);

        assert_eq!(devices.mmio.read64(0x59A0).unwrap(), 0x00DF_81B8_0042_0000);
        assert_eq!(devices.powercap.read_limits().unwrap(), (157_000_000, 157_000_000));
    }

    #[test]
    fn test_discovery_failure_surfaces_as_discovery_error() {
        let host = FakeHost::new(0x0020_0000);
        assert!(matches!(
            discover_base(&host.config),
            Err(PlctlError::Discovery(_))
        ));
    }
}
