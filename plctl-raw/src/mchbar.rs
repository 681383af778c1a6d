//! MCHBAR (chipset memory-mapped register window) definitions
//!
//! The host bridge (bus 0, device 0, function 0 on Intel client parts)
//! publishes the MCHBAR base address in its PCI configuration space. The
//! package RAPL registers are mirrored inside that window.

use crate::register::{bit, RegisterLayout};

/// PCI identification of the host bridge
pub mod pci {
    /// Intel PCI vendor ID
    pub const VENDOR_INTEL: u32 = 0x8086;

    /// Host bridge class code (base class 0x06, subclass 0x00)
    pub const CLASS_HOST_BRIDGE: u32 = 0x0600_00;

    /// Mask selecting base class and subclass of the 24-bit class code
    pub const CLASS_MASK: u32 = 0xFFFF_00;

    /// Sysfs name of the usual host bridge location
    pub const HOST_BRIDGE_BDF: &str = "0000:00:00.0";

    /// Config space offset of the 64-bit MCHBAR register
    pub const MCHBAR_CONFIG_OFFSET: u64 = 0x48;
}

/// Size of the MMIO mapping; reaches every register below and bounds the scanner
pub const WINDOW_SIZE: usize = 2 * 1024 * 1024;

/// Register offsets inside the MCHBAR window
pub mod reg {
    /// Package power limit mirror of `MSR_PKG_POWER_LIMIT`
    pub const PKG_POWER_LIMIT: usize = 0x59A0;

    /// Package energy status mirror
    pub const PKG_ENERGY_STATUS: usize = 0x59B0;

    /// Package power info mirror
    pub const PKG_POWER_INFO: usize = 0x59C0;

    /// Package performance (throttle) status mirror
    pub const PKG_PERF_STATUS: usize = 0x59E0;
}

/// Registers commonly found at these offsets; the layout moves between
/// chipset generations, so names are hints rather than guarantees.
pub const KNOWN_REGISTERS: &[(&str, usize)] = &[
    ("PKG_POWER_LIMIT", reg::PKG_POWER_LIMIT),
    ("PKG_ENERGY_STATUS", reg::PKG_ENERGY_STATUS),
    ("PKG_POWER_INFO", reg::PKG_POWER_INFO),
    ("PKG_PERF_STATUS", reg::PKG_PERF_STATUS),
];

/// Whether a PCI vendor/class pair identifies an Intel host bridge
pub fn is_intel_host_bridge(vendor: u32, class: u32) -> bool {
    vendor == pci::VENDOR_INTEL && (class & pci::CLASS_MASK) == pci::CLASS_HOST_BRIDGE
}

/// MCHBAR register layout (host bridge config offset 0x48)
///
/// ## Register Format
///
/// | Bits   | Field   | Description                            |
/// |--------|---------|----------------------------------------|
/// | 0      | enable  | Window decode enable                   |
/// | 1-11   | -       | Reserved / alignment                   |
/// | 12-63  | base    | Physical base address (4 KiB aligned)  |
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Mchbar {
    pub enable: bool,
    pub base: u64,
}

impl RegisterLayout for Mchbar {
    fn to_raw(&self) -> u64 {
        (self.base & !0xFFF) | u64::from(self.enable)
    }

    fn from_raw(value: u64) -> Self {
        Self {
            enable: bit(value, 0),
            base: value & !0xFFF,
        }
    }

    fn validate(&self) -> Result<(), &'static str> {
        if !self.enable {
            return Err("MCHBAR decode is disabled");
        }
        if self.base == 0 {
            return Err("MCHBAR base address is zero");
        }
        Ok(())
    }
}
