//! `partd prepare`: translate one claim against on-disk inventory.

use std::path::Path;

use anyhow::Context;
use tracing::{debug, info};

use part_core::{AgentConfig, PrepareRequest};
use partgrid_resource::{ResourceClaim, ResourceSlice};

/// Load every `*.json` file in `dir` as either a slice list or a single slice.
pub fn load_inventory(dir: &Path) -> anyhow::Result<Vec<ResourceSlice>> {
    let mut paths = Vec::new();
    for entry in std::fs::read_dir(dir).with_context(|| format!("reading {}", dir.display()))? {
        let path = entry?.path();
        if path.extension().is_some_and(|ext| ext == "json") {
            paths.push(path);
        }
    }
    paths.sort();

    let mut inventory = Vec::new();
    for path in paths {
        let raw = std::fs::read_to_string(&path)
            .with_context(|| format!("reading {}", path.display()))?;
        let value: serde_json::Value = serde_json::from_str(&raw)
            .with_context(|| format!("parsing {}", path.display()))?;
        let slices: Vec<ResourceSlice> = if value.is_array() {
            serde_json::from_value(value)
        } else {
            serde_json::from_value(value).map(|s| vec![s])
        }
        .with_context(|| format!("decoding slices in {}", path.display()))?;
        debug!(path = %path.display(), slices = slices.len(), "inventory file loaded");
        inventory.extend(slices);
    }
    Ok(inventory)
}

pub fn prepare(config: &AgentConfig, claim_path: &Path, inventory_dir: &Path) -> anyhow::Result<PrepareRequest> {
    let raw = std::fs::read_to_string(claim_path)
        .with_context(|| format!("reading claim {}", claim_path.display()))?;
    let claim: ResourceClaim = serde_json::from_str(&raw)
        .with_context(|| format!("parsing claim {}", claim_path.display()))?;
    let inventory = load_inventory(inventory_dir)?;
    info!(
        claim = %claim.metadata.name,
        slices = inventory.len(),
        "translating claim"
    );

    let request = partgrid_alloc::translate(&claim, &inventory, &config.node.driver, &config.node.name)?;
    Ok(request)
}
