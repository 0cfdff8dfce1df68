//! Where GPU capability descriptors come from.

use std::path::PathBuf;

use anyhow::Context;

use partgrid_placement::GpuCapability;

/// Supplies the capability descriptors of this node's GPUs.
pub trait CapabilitySource: Send + Sync {
    fn capabilities(&self) -> anyhow::Result<Vec<GpuCapability>>;
}

/// A fixed list of descriptors.
#[derive(Debug, Clone, Default)]
pub struct StaticCapabilities(pub Vec<GpuCapability>);

impl CapabilitySource for StaticCapabilities {
    fn capabilities(&self) -> anyhow::Result<Vec<GpuCapability>> {
        Ok(self.0.clone())
    }
}

/// Descriptors read from a JSON array on disk, re-read every cycle.
#[derive(Debug, Clone)]
pub struct FileCapabilitySource {
    path: PathBuf,
}

impl FileCapabilitySource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl CapabilitySource for FileCapabilitySource {
    fn capabilities(&self) -> anyhow::Result<Vec<GpuCapability>> {
        let raw = std::fs::read_to_string(&self.path)
            .with_context(|| format!("reading {}", self.path.display()))?;
        let caps: Vec<GpuCapability> = serde_json::from_str(&raw)
            .with_context(|| format!("parsing {}", self.path.display()))?;
        Ok(caps)
    }
}
