//! The two copies of the package power-limit register behind one interface

use plctl_raw::rapl::msr::MSR_PKG_POWER_LIMIT;

use crate::common::{MmioWindow, MsrHandle};
use crate::error::Result;

/// Raw 64-bit access to one copy of the package power-limit register
pub trait PowerLimitAccess {
    /// Short name used in prompts and status lines ("MSR", "MMIO")
    fn name(&self) -> &'static str;

    /// Where the register lives, for error and status output
    fn location(&self) -> String;

    fn read(&self) -> Result<u64>;

    fn write(&self, value: u64) -> Result<()>;
}

/// `MSR_PKG_POWER_LIMIT` (0x610) on the representative CPU
pub struct MsrPowerLimit<'a> {
    handle: &'a MsrHandle,
}

impl<'a> MsrPowerLimit<'a> {
    pub fn new(handle: &'a MsrHandle) -> Self {
        Self { handle }
    }
}

impl PowerLimitAccess for MsrPowerLimit<'_> {
    fn name(&self) -> &'static str {
        "MSR"
    }

    fn location(&self) -> String {
        format!("MSR 0x{:X} (CPU {})", MSR_PKG_POWER_LIMIT, self.handle.cpu_id())
    }

    fn read(&self) -> Result<u64> {
        self.handle.read(MSR_PKG_POWER_LIMIT)
    }

    fn write(&self, value: u64) -> Result<()> {
        self.handle.write(MSR_PKG_POWER_LIMIT, value)
    }
}

/// The MCHBAR mirror of the package power limit
pub struct MmioPowerLimit<'a> {
    window: &'a MmioWindow,
    offset: usize,
}

impl<'a> MmioPowerLimit<'a> {
    pub fn new(window: &'a MmioWindow, offset: usize) -> Self {
        Self { window, offset }
    }

    pub fn offset(&self) -> usize {
        self.offset
    }
}

impl PowerLimitAccess for MmioPowerLimit<'_> {
    fn name(&self) -> &'static str {
        "MMIO"
    }

    fn location(&self) -> String {
        format!(
            "MCHBAR 0x{:X}+0x{:X}",
            self.window.base(),
            self.offset
        )
    }

    fn read(&self) -> Result<u64> {
        self.window.read64(self.offset)
    }

    fn write(&self, value: u64) -> Result<()> {
        self.window.write64(self.offset, value)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::cell::Cell;

    use crate::common::mmio::tests::{put_u64, window_file, WINDOW};
    use crate::common::Access;
    use crate::error::PlctlError;

    /// In-memory register copy that can be told to fail its next writes
    pub(crate) struct FakeRegister {
        pub name: &'static str,
        pub value: Cell<u64>,
        pub fail_writes: Cell<bool>,
        pub writes: Cell<usize>,
    }

    impl FakeRegister {
        pub(crate) fn new(name: &'static str, value: u64) -> Self {
            Self {
                name,
                value: Cell::new(value),
                fail_writes: Cell::new(false),
                writes: Cell::new(0),
            }
        }
    }

    impl PowerLimitAccess for FakeRegister {
        fn name(&self) -> &'static str {
            self.name
        }

        fn location(&self) -> String {
            format!("fake {}", self.name)
        }

        fn read(&self) -> Result<u64> {
            Ok(self.value.get())
        }

        fn write(&self, value: u64) -> Result<()> {
            if self.fail_writes.get() {
                return Err(PlctlError::Io {
                    op: "write",
                    target: self.location(),
                    source: std::io::Error::from(std::io::ErrorKind::PermissionDenied),
                });
            }
            self.value.set(value);
            self.writes.set(self.writes.get() + 1);
            Ok(())
        }
    }

    #[test]
    fn test_msr_copy_uses_register_0x610() {
        let file = tempfile::NamedTempFile::new().unwrap();
        file.as_file().set_len(0x1000).unwrap();
        let handle = MsrHandle::open_path(file.path(), 0, Access::ReadWrite).unwrap();
        let msr = MsrPowerLimit::new(&handle);

        msr.write(0x0042_84E8_00DF_81B8).unwrap();
        assert_eq!(handle.read(0x610).unwrap(), 0x0042_84E8_00DF_81B8);
        assert_eq!(msr.read().unwrap(), 0x0042_84E8_00DF_81B8);
        assert_eq!(msr.name(), "MSR");
        assert_eq!(msr.location(), "MSR 0x610 (CPU 0)");
    }

    #[test]
    fn test_mmio_copy_uses_configured_offset() {
        let mut file = window_file();
        put_u64(&mut file, 0x59A0, 0x00DF_81B8_0042_0000);
        let window = MmioWindow::map(file.path(), 0, WINDOW, Access::ReadWrite).unwrap();
        let mmio = MmioPowerLimit::new(&window, 0x59A0);

        assert_eq!(mmio.read().unwrap(), 0x00DF_81B8_0042_0000);
        mmio.write(0x00DF_8320_0042_0190).unwrap();
        assert_eq!(window.read64(0x59A0).unwrap(), 0x00DF_8320_0042_0190);
        assert_eq!(mmio.offset(), 0x59A0);
        assert_eq!(mmio.location(), "MCHBAR 0x0+0x59A0");
    }
}
