use std::fs::{File, OpenOptions};
use std::os::unix::fs::FileExt;
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};

use crate::common::Access;
use crate::config::HostConfig;
use crate::error::{PlctlError, Result};

const MSR_WIDTH: usize = 8;

/// Open register file of one logical CPU (`/dev/cpu/N/msr`)
///
/// Every transfer is a positioned 8-byte read or write at the register
/// number; anything shorter is an error.
pub struct MsrHandle {
    file: File,
    cpu_id: u32,
    path: PathBuf,
}

impl MsrHandle {
    pub fn open(config: &HostConfig, access: Access) -> Result<Self> {
        Self::open_path(config.msr_path(), config.cpu, access)
    }

    pub fn open_path(path: impl Into<PathBuf>, cpu: u32, access: Access) -> Result<Self> {
        let path = path.into();
        let file = OpenOptions::new()
            .read(true)
            .write(access.writable())
            .open(&path)
            .map_err(|e| PlctlError::DeviceOpen {
                path: path.clone(),
                source: e,
            })?;

        tracing::info!("Opened MSR handle {} for core {}", file.as_raw_fd(), cpu);

        Ok(Self {
            file,
            cpu_id: cpu,
            path,
        })
    }

    pub fn read(&self, addr: u64) -> Result<u64> {
        let mut buffer = [0u8; MSR_WIDTH];
        let got = self
            .file
            .read_at(&mut buffer, addr)
            .map_err(|e| PlctlError::Io {
                op: "read",
                target: self.describe(addr),
                source: e,
            })?;

        if got != MSR_WIDTH {
            return Err(PlctlError::ShortTransfer {
                op: "read",
                target: self.describe(addr),
                got,
                want: MSR_WIDTH,
            });
        }

        let value = u64::from_ne_bytes(buffer);
        tracing::debug!(
            "MSR read: CPU {} MSR 0x{:08x} = 0x{:016x}",
            self.cpu_id,
            addr,
            value
        );
        Ok(value)
    }

    pub fn write(&self, addr: u64, value: u64) -> Result<()> {
        let written = self
            .file
            .write_at(&value.to_ne_bytes(), addr)
            .map_err(|e| PlctlError::Io {
                op: "write",
                target: self.describe(addr),
                source: e,
            })?;

        if written != MSR_WIDTH {
            return Err(PlctlError::ShortTransfer {
                op: "write",
                target: self.describe(addr),
                got: written,
                want: MSR_WIDTH,
            });
        }

        tracing::debug!(
            "MSR write: CPU {} MSR 0x{:08x} = 0x{:016x}",
            self.cpu_id,
            addr,
            value
        );
        Ok(())
    }

    pub fn cpu_id(&self) -> u32 {
        self.cpu_id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn describe(&self, addr: u64) -> String {
        format!("MSR 0x{:X} on CPU {}", addr, self.cpu_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const REG: u64 = 0x610;

    fn register_file(len: u64) -> tempfile::NamedTempFile {
        let file = tempfile::NamedTempFile::new().unwrap();
        file.as_file().set_len(len).unwrap();
        file
    }

    #[test]
    fn test_read_write_at_register_offset() {
        let file = register_file(0x1000);
        let handle = MsrHandle::open_path(file.path(), 0, Access::ReadWrite).unwrap();

        handle.write(REG, 0x00DF_81B8_0042_0000).unwrap();
        assert_eq!(handle.read(REG).unwrap(), 0x00DF_81B8_0042_0000);
        assert_eq!(handle.read(REG + 8).unwrap(), 0);
    }

    #[test]
    fn test_value_lands_at_register_offset() {
        let mut file = register_file(0);
        file.write_all(&[0u8; 0x606]).unwrap();
        file.write_all(&0x000A_0E03u64.to_ne_bytes()).unwrap();
        file.flush().unwrap();

        let handle = MsrHandle::open_path(file.path(), 0, Access::ReadOnly).unwrap();
        assert_eq!(handle.read(0x606).unwrap(), 0x000A_0E03);
    }

    #[test]
    fn test_short_read_is_an_error() {
        let file = register_file(REG + 4);
        let handle = MsrHandle::open_path(file.path(), 0, Access::ReadOnly).unwrap();

        match handle.read(REG) {
            Err(PlctlError::ShortTransfer { got, want, .. }) => {
                assert_eq!(got, 4);
                assert_eq!(want, 8);
            }
            other => panic!("expected short transfer, got {other:?}"),
        }
    }

    #[test]
    fn test_write_on_read_only_handle_fails() {
        let file = register_file(0x1000);
        let handle = MsrHandle::open_path(file.path(), 0, Access::ReadOnly).unwrap();
        assert!(matches!(
            handle.write(REG, 1),
            Err(PlctlError::Io { op: "write", .. })
        ));
    }

    #[test]
    fn test_missing_device_is_open_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = MsrHandle::open_path(dir.path().join("0/msr"), 0, Access::ReadOnly)
            .err()
            .unwrap();
        assert!(matches!(err, PlctlError::DeviceOpen { .. }));
        assert!(err.to_string().contains("Failed to open"));
    }
}
