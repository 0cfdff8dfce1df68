//! Hardware backend answered from a static topology file.
//!
//! The file maps GPU address → profile id → possible placements:
//!
//! ```json
//! { "0000:3b:00.0": { "19": [{"start": 0, "size": 1}, {"start": 1, "size": 1}] } }
//! ```
//!
//! Profile slots are assigned in ascending profile-id order.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::Context;
use tracing::debug;

use part_core::Placement;
use partgrid_placement::{BackendError, HardwareBackend, ProfileInfo};

type Topology = BTreeMap<String, BTreeMap<u32, Vec<Placement>>>;

#[derive(Debug, Default)]
pub struct StaticTopologyBackend {
    topology: Topology,
    initialized: AtomicBool,
}

impl StaticTopologyBackend {
    pub fn new(topology: Topology) -> Self {
        Self {
            topology,
            initialized: AtomicBool::new(false),
        }
    }

    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading topology {}", path.display()))?;
        let topology: Topology = serde_json::from_str(&raw)
            .with_context(|| format!("parsing topology {}", path.display()))?;
        debug!(path = %path.display(), gpus = topology.len(), "topology loaded");
        Ok(Self::new(topology))
    }
}

impl HardwareBackend for StaticTopologyBackend {
    type Device = String;

    fn init(&self) -> Result<(), BackendError> {
        if self.initialized.swap(true, Ordering::AcqRel) {
            return Err(BackendError::AlreadyInitialized);
        }
        Ok(())
    }

    fn shutdown(&self) -> Result<(), BackendError> {
        self.initialized.store(false, Ordering::Release);
        Ok(())
    }

    fn device_by_address(&self, address: &str) -> Result<String, BackendError> {
        if self.topology.contains_key(address) {
            Ok(address.to_string())
        } else {
            Err(BackendError::NotFound)
        }
    }

    fn profile_info(&self, device: &String, slot: u32) -> Result<ProfileInfo, BackendError> {
        let profiles = self.topology.get(device).ok_or(BackendError::NotFound)?;
        let (id, placements) = profiles
            .iter()
            .nth(slot as usize)
            .ok_or(BackendError::NotSupported)?;
        Ok(ProfileInfo {
            id: *id,
            slot,
            slice_count: placements.iter().map(|p| p.size).max().unwrap_or(0),
        })
    }

    fn possible_placements(
        &self,
        device: &String,
        profile: &ProfileInfo,
    ) -> Result<Vec<Placement>, BackendError> {
        self.topology
            .get(device)
            .and_then(|profiles| profiles.get(&profile.id))
            .cloned()
            .ok_or(BackendError::InvalidArgument)
    }
}
