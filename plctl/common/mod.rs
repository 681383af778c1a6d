pub mod mmio;
pub mod msr;
pub mod pci;
pub mod powercap;

pub use mmio::MmioWindow;
pub use msr::MsrHandle;
pub use pci::{DiscoveryError, HostBridgeDevice, HostBridgeLocator, MchbarBase};
pub use powercap::Powercap;

/// How a device node is opened
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    ReadOnly,
    ReadWrite,
}

impl Access {
    pub fn writable(self) -> bool {
        matches!(self, Access::ReadWrite)
    }
}
