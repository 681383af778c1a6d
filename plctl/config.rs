use std::path::{Path, PathBuf};

use plctl_raw::mchbar;

/// Environment variable naming a directory that prefixes every device path
pub const ROOT_ENV: &str = "PLCTL_ROOT";

/// Device and sysfs locations used by the tools
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostConfig {
    /// Directory holding one entry per PCI function
    pub pci_devices_dir: PathBuf,
    /// Physical memory device backing the MCHBAR mapping
    pub dev_mem: PathBuf,
    /// Directory holding `<cpu>/msr` register files
    pub msr_dir: PathBuf,
    /// Package-0 RAPL powercap zone
    pub powercap_dir: PathBuf,
    /// Representative logical CPU for package-scoped MSRs
    pub cpu: u32,
    /// Bytes mapped from the MCHBAR base
    pub mmio_window_size: usize,
    /// Offset of the package power limit inside the window
    pub pl_offset: usize,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            pci_devices_dir: PathBuf::from("/sys/bus/pci/devices"),
            dev_mem: PathBuf::from("/dev/mem"),
            msr_dir: PathBuf::from("/dev/cpu"),
            powercap_dir: PathBuf::from("/sys/class/powercap/intel-rapl:0"),
            cpu: 0,
            mmio_window_size: mchbar::WINDOW_SIZE,
            pl_offset: mchbar::reg::PKG_POWER_LIMIT,
        }
    }
}

impl HostConfig {
    /// Default paths, re-rooted under `$PLCTL_ROOT` when it is set
    pub fn from_env() -> Self {
        match std::env::var_os(ROOT_ENV) {
            Some(root) if !root.is_empty() => {
                let root = PathBuf::from(root);
                tracing::info!("Using device root {}", root.display());
                Self::with_root(&root)
            }
            _ => Self::default(),
        }
    }

    /// Default paths with every absolute path moved under `root`
    pub fn with_root(root: &Path) -> Self {
        let defaults = Self::default();
        let reroot = |path: &Path| root.join(path.strip_prefix("/").unwrap_or(path));

        Self {
            pci_devices_dir: reroot(&defaults.pci_devices_dir),
            dev_mem: reroot(&defaults.dev_mem),
            msr_dir: reroot(&defaults.msr_dir),
            powercap_dir: reroot(&defaults.powercap_dir),
            ..defaults
        }
    }

    /// Register file for the representative CPU, e.g. `/dev/cpu/0/msr`
    pub fn msr_path(&self) -> PathBuf {
        self.msr_dir.join(self.cpu.to_string()).join("msr")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_paths() {
        let config = HostConfig::default();
        assert_eq!(config.msr_path(), PathBuf::from("/dev/cpu/0/msr"));
        assert_eq!(config.pl_offset, 0x59A0);
        assert_eq!(config.mmio_window_size, 2 * 1024 * 1024);
    }

    #[test]
    fn test_with_root_prefixes_every_path() {
        let config = HostConfig::with_root(Path::new("/pcm"));
        assert_eq!(config.dev_mem, PathBuf::from("/pcm/dev/mem"));
        assert_eq!(config.msr_path(), PathBuf::from("/pcm/dev/cpu/0/msr"));
        assert_eq!(
            config.pci_devices_dir,
            PathBuf::from("/pcm/sys/bus/pci/devices")
        );
        assert_eq!(
            config.powercap_dir,
            PathBuf::from("/pcm/sys/class/powercap/intel-rapl:0")
        );
        assert_eq!(config.cpu, 0);
    }
}
