use std::io;
use std::path::PathBuf;
use thiserror::Error;

use plctl_raw::RangeError;

use crate::common::pci::DiscoveryError;

#[derive(Error, Debug)]
pub enum PlctlError {
    #[error("MCHBAR discovery failed: {0}")]
    Discovery(#[from] DiscoveryError),

    #[error("Failed to open {}: {source}", path.display())]
    DeviceOpen { path: PathBuf, source: io::Error },

    #[error("Failed to {op} {target}: {source}")]
    Io {
        op: &'static str,
        target: String,
        source: io::Error,
    },

    #[error("Short {op} at {target}: {got} of {want} bytes")]
    ShortTransfer {
        op: &'static str,
        target: String,
        got: usize,
        want: usize,
    },

    #[error("Failed to map 0x{size:X} bytes at 0x{base:016X}: {source}")]
    MapFailed {
        base: u64,
        size: usize,
        source: nix::Error,
    },

    #[error("MMIO offset 0x{offset:X} is misaligned or outside the 0x{size:X}-byte window")]
    OutOfWindow { offset: usize, size: usize },

    #[error("MMIO window at 0x{base:016X} is mapped read-only")]
    ReadOnlyMapping { base: u64 },

    #[error("Value out of range: {0}")]
    Range(#[from] RangeError),

    #[error("Invalid hardware state: {0}")]
    HardwareError(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("IO error: {0}")]
    IoError(#[from] io::Error),
}

impl PlctlError {
    /// Process exit status for the command-line tools
    pub fn exit_code(&self) -> u8 {
        match self {
            PlctlError::ParseError(_) => 2,
            _ => 1,
        }
    }
}

pub type Result<T> = std::result::Result<T, PlctlError>;
