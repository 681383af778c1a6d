//! Host bridge discovery and MCHBAR base resolution through PCI sysfs

use std::fs::File;
use std::io;
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};

use plctl_raw::mchbar::{self, pci, Mchbar};
use plctl_raw::RegisterLayout;

use crate::config::HostConfig;

/// Ways MCHBAR discovery can fail; each is reported, never defaulted
#[derive(Debug, thiserror::Error)]
pub enum DiscoveryError {
    #[error("Failed to list PCI devices in {}: {source}", path.display())]
    ListDevices { path: PathBuf, source: io::Error },

    #[error("Intel host bridge not found in {}", .0.display())]
    NoHostBridge(PathBuf),

    #[error("Failed to open PCI config {}: {source}", path.display())]
    ConfigOpen { path: PathBuf, source: io::Error },

    #[error("Failed to read PCI config {} at +0x{offset:X}: {source}", path.display())]
    ConfigRead {
        path: PathBuf,
        offset: u64,
        source: io::Error,
    },

    #[error("Short read of PCI config {} at +0x{offset:X} ({got} bytes)", path.display())]
    ShortConfigRead {
        path: PathBuf,
        offset: u64,
        got: usize,
    },

    #[error("MCHBAR appears disabled (config 0x48 = 0x{raw:016x})")]
    WindowDisabled { raw: u64 },

    #[error("MCHBAR base resolved to 0 (config 0x48 = 0x{raw:016x})")]
    ZeroBase { raw: u64 },
}

type Result<T> = std::result::Result<T, DiscoveryError>;

/// A PCI function accepted as the host bridge
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostBridgeDevice {
    pub path: PathBuf,
    pub vendor: u32,
    pub class: u32,
}

impl HostBridgeDevice {
    /// Read the vendor/class attributes of `path`; `None` unless it is an Intel host bridge
    fn probe(path: &Path) -> Option<Self> {
        let vendor = read_sysfs_hex(&path.join("vendor"))?;
        let class = read_sysfs_hex(&path.join("class"))?;

        if !mchbar::is_intel_host_bridge(vendor, class) {
            return None;
        }

        Some(Self {
            path: path.to_path_buf(),
            vendor,
            class,
        })
    }

    pub fn config_path(&self) -> PathBuf {
        self.path.join("config")
    }

    /// Read a little-endian u64 from raw configuration space
    pub fn read_config_u64(&self, offset: u64) -> Result<u64> {
        let path = self.config_path();
        let file = File::open(&path).map_err(|e| DiscoveryError::ConfigOpen {
            path: path.clone(),
            source: e,
        })?;

        let mut buffer = [0u8; 8];
        let got = file
            .read_at(&mut buffer, offset)
            .map_err(|e| DiscoveryError::ConfigRead {
                path: path.clone(),
                offset,
                source: e,
            })?;

        if got != buffer.len() {
            return Err(DiscoveryError::ShortConfigRead { path, offset, got });
        }

        Ok(u64::from_le_bytes(buffer))
    }
}

/// Resolved MCHBAR window; held for the process lifetime
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MchbarBase {
    /// Physical base address, low 12 bits cleared
    pub address: u64,
    /// Hardware decode enable (bit 0 of config 0x48)
    pub enabled: bool,
    /// Raw config 0x48 value
    pub raw: u64,
    /// Config space file the value came from
    pub config_path: PathBuf,
}

/// Finds the Intel host bridge under a PCI sysfs device directory
pub struct HostBridgeLocator {
    devices_dir: PathBuf,
}

impl HostBridgeLocator {
    pub fn new(devices_dir: impl Into<PathBuf>) -> Self {
        Self {
            devices_dir: devices_dir.into(),
        }
    }

    pub fn from_config(config: &HostConfig) -> Self {
        Self::new(&config.pci_devices_dir)
    }

    /// Locate the host bridge, preferring 0000:00:00.0
    ///
    /// The fallback walk visits entries in sorted order so the result does not
    /// depend on directory enumeration order.
    pub fn find_host_bridge(&self) -> Result<HostBridgeDevice> {
        if let Some(device) = HostBridgeDevice::probe(&self.devices_dir.join(pci::HOST_BRIDGE_BDF))
        {
            return Ok(device);
        }

        let entries = std::fs::read_dir(&self.devices_dir).map_err(|e| {
            DiscoveryError::ListDevices {
                path: self.devices_dir.clone(),
                source: e,
            }
        })?;

        let mut names: Vec<_> = entries
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.file_name())
            .filter(|name| !name.to_string_lossy().starts_with('.'))
            .collect();
        names.sort();

        for name in names {
            let path = self.devices_dir.join(&name);
            if let Some(device) = HostBridgeDevice::probe(&path) {
                tracing::debug!("Host bridge candidate {}", path.display());
                return Ok(device);
            }
        }

        Err(DiscoveryError::NoHostBridge(self.devices_dir.clone()))
    }

    /// Find the host bridge and resolve the MCHBAR base from config 0x48
    pub fn discover(&self) -> Result<MchbarBase> {
        let device = self.find_host_bridge()?;
        let raw = device.read_config_u64(pci::MCHBAR_CONFIG_OFFSET)?;
        let bar = Mchbar::from_raw(raw);

        if !bar.enable {
            return Err(DiscoveryError::WindowDisabled { raw });
        }
        if bar.base == 0 {
            return Err(DiscoveryError::ZeroBase { raw });
        }

        tracing::info!(
            "Located host bridge {} (vendor 0x{:04x}, class 0x{:06x}), MCHBAR at 0x{:016x}",
            device.path.display(),
            device.vendor,
            device.class,
            bar.base
        );

        Ok(MchbarBase {
            address: bar.base,
            enabled: bar.enable,
            raw,
            config_path: device.config_path(),
        })
    }
}

/// Parse a sysfs hex attribute such as `0x8086\n`
fn read_sysfs_hex(path: &Path) -> Option<u32> {
    let text = std::fs::read_to_string(path).ok()?;
    parse_sysfs_hex(&text)
}

fn parse_sysfs_hex(text: &str) -> Option<u32> {
    let text = text.trim();
    let digits = text
        .strip_prefix("0x")
        .or_else(|| text.strip_prefix("0X"))
        .unwrap_or(text);
    u32::from_str_radix(digits, 16).ok()
}
