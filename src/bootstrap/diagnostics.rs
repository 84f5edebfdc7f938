//! Host information printed before the hand-off.

use std::fmt;
use std::path::Path;

use nix::sys::statvfs::statvfs;

/// Space on the filesystem holding the base directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiskUsage {
    pub total: u64,
    pub used: u64,
    pub available: u64,
}

impl DiskUsage {
    /// Reads the usage of the filesystem containing `path`.
    ///
    /// # Errors
    ///
    /// Returns the OS error if `statvfs` fails.
    #[allow(clippy::useless_conversion)]
    pub fn of(path: &Path) -> Result<Self, nix::Error> {
        let stat = statvfs(path)?;
        let fragment = u64::from(stat.fragment_size());
        let total = u64::from(stat.blocks()).saturating_mul(fragment);
        let free = u64::from(stat.blocks_free()).saturating_mul(fragment);
        let available = u64::from(stat.blocks_available()).saturating_mul(fragment);

        Ok(Self {
            total,
            used: total.saturating_sub(free),
            available,
        })
    }

    /// Used share of the filesystem in percent.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn used_percent(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.used as f64 * 100.0 / self.total as f64
        }
    }
}

impl fmt::Display for DiskUsage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} used of {} ({:.1}%), {} available",
            human_bytes(self.used),
            human_bytes(self.total),
            self.used_percent(),
            human_bytes(self.available)
        )
    }
}

/// Program and host details.
#[derive(Debug, Clone, PartialEq)]
pub struct Diagnostics {
    pub version: &'static str,
    pub os: &'static str,
    pub arch: &'static str,
    pub disk: Option<DiskUsage>,
}

impl Diagnostics {
    /// Collects diagnostics; disk usage is left out when it cannot be read.
    #[must_use]
    pub fn collect(base_dir: &Path) -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION"),
            os: std::env::consts::OS,
            arch: std::env::consts::ARCH,
            disk: DiskUsage::of(base_dir).ok(),
        }
    }
}

/// Formats a byte count with a binary unit.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn human_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];

    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }

    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{value:.1} {}", UNITS[unit])
    }
}
