//! MCHBAR window mapped from the physical memory device

use std::fs::{File, OpenOptions};
use std::num::NonZeroUsize;
use std::os::unix::fs::OpenOptionsExt;
use std::path::Path;
use std::ptr::{self, NonNull};

use nix::sys::mman::{mmap, munmap, MapFlags, ProtFlags};

use crate::common::Access;
use crate::config::HostConfig;
use crate::error::{PlctlError, Result};

/// A shared mapping of `size` bytes at a physical base address
///
/// Registers are accessed as two volatile 32-bit words so the compiler can
/// neither cache nor merge the hardware accesses. The mapping is released
/// when the window is dropped, and the descriptor closes with it.
pub struct MmioWindow {
    ptr: NonNull<u8>,
    size: usize,
    base: u64,
    access: Access,
    _file: File,
}

impl MmioWindow {
    /// Map the configured window of the physical memory device at `base`
    pub fn open(config: &HostConfig, base: u64, access: Access) -> Result<Self> {
        Self::map(&config.dev_mem, base, config.mmio_window_size, access)
    }

    pub fn map(path: &Path, base: u64, size: usize, access: Access) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(access.writable())
            .custom_flags(libc::O_SYNC)
            .open(path)
            .map_err(|e| PlctlError::DeviceOpen {
                path: path.to_path_buf(),
                source: e,
            })?;

        let map_err = |source| PlctlError::MapFailed { base, size, source };

        let length = NonZeroUsize::new(size).ok_or(map_err(nix::Error::EINVAL))?;
        let offset = libc::off_t::try_from(base).map_err(|_| map_err(nix::Error::EOVERFLOW))?;

        let prot = if access.writable() {
            ProtFlags::PROT_READ | ProtFlags::PROT_WRITE
        } else {
            ProtFlags::PROT_READ
        };

        // SAFETY: a fresh shared mapping of a device we hold open; nothing else
        // in this process aliases it.
        let raw = unsafe { mmap(None, length, prot, MapFlags::MAP_SHARED, Some(&file), offset) }
            .map_err(map_err)?;
        let ptr = NonNull::new(raw.cast::<u8>()).ok_or(map_err(nix::Error::EFAULT))?;

        tracing::info!(
            "Mapped 0x{:X} bytes of {} at 0x{:016x} ({:?})",
            size,
            path.display(),
            base,
            access
        );

        Ok(Self {
            ptr,
            size,
            base,
            access,
            _file: file,
        })
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn base(&self) -> u64 {
        self.base
    }

    /// Read the 64-bit register at `offset`: low word, then high word
    pub fn read64(&self, offset: usize) -> Result<u64> {
        let word = self.word(offset)?;

        // SAFETY: `word` checked the offset against the mapping and alignment
        let (low, high) = unsafe {
            let low = ptr::read_volatile(word);
            let high = ptr::read_volatile(word.add(1));
            (u32::from_le(low), u32::from_le(high))
        };

        let value = u64::from(low) | (u64::from(high) << 32);
        tracing::trace!("MMIO read: +0x{:05x} = 0x{:016x}", offset, value);
        Ok(value)
    }

    /// Write low word, then high word, then read the high word back
    pub fn write64(&self, offset: usize, value: u64) -> Result<()> {
        if !self.access.writable() {
            return Err(PlctlError::ReadOnlyMapping { base: self.base });
        }
        let word = self.word(offset)?;

        // SAFETY: `word` checked the offset against the mapping and alignment,
        // and the mapping is writable.
        unsafe {
            ptr::write_volatile(word, (value as u32).to_le());
            ptr::write_volatile(word.add(1), ((value >> 32) as u32).to_le());
            let _ = ptr::read_volatile(word.add(1));
        }

        tracing::debug!("MMIO write: +0x{:05x} = 0x{:016x}", offset, value);
        Ok(())
    }

    fn word(&self, offset: usize) -> Result<*mut u32> {
        let in_bounds = offset
            .checked_add(8)
            .map_or(false, |end| end <= self.size);

        if offset % 4 != 0 || !in_bounds {
            return Err(PlctlError::OutOfWindow {
                offset,
                size: self.size,
            });
        }

        // SAFETY: offset + 8 <= size, so the pointer stays inside the mapping
        Ok(unsafe { self.ptr.as_ptr().add(offset) }.cast::<u32>())
    }
}

impl Drop for MmioWindow {
    fn drop(&mut self) {
        // SAFETY: ptr/size describe the mapping created in `map`
        if let Err(e) = unsafe { munmap(self.ptr.as_ptr().cast(), self.size) } {
            tracing::warn!("munmap of MMIO window at 0x{:016x} failed: {}", self.base, e);
        }
    }
}
