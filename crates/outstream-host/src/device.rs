//! Startup device discovery
//!
//! The configured candidates are checked in order against a [`DeviceProbe`];
//! the ones that exist become routable device addresses.

use std::path::PathBuf;

use outstream_core::DeviceAddress;

use crate::config::DeviceCandidate;

/// Answers whether a named device is present
pub trait DeviceProbe {
    fn exists(&self, name: &str) -> bool;
}

/// Treats a candidate as present if `<root>/<name>` exists (sysfs style)
pub struct PathProbe {
    root: PathBuf,
}

impl PathProbe {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl DeviceProbe for PathProbe {
    fn exists(&self, name: &str) -> bool {
        // Names must stay inside the probe root
        if name.is_empty() || name.contains('/') || name == ".." {
            return false;
        }
        self.root.join(name).exists()
    }
}

/// Addresses of the candidates that are present, in configured order
pub fn resolve_devices(
    candidates: &[DeviceCandidate],
    probe: &dyn DeviceProbe,
) -> Vec<DeviceAddress> {
    candidates
        .iter()
        .filter_map(|candidate| {
            if probe.exists(&candidate.name) {
                let address = DeviceAddress::new(&*candidate.device_type, &*candidate.address);
                log::info!("resolve_devices: {} present as {}", candidate.name, address);
                Some(address)
            } else {
                log::debug!("resolve_devices: {} not present", candidate.name);
                None
            }
        })
        .collect()
}
