//! `partd run`: wire the advertisement loop to file-backed collaborators.

use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use tokio::sync::watch;
use tracing::{error, info};

use part_core::AgentConfig;
use partgrid_agent::{
    Advertiser, AdvertiserConfig, CapabilitySource, FileCapabilitySource, FilePublisher, Trigger,
};
use partgrid_gates::{
    FeatureGates, LogRecorder, StaticVersionSource, Thresholds, VersionSource,
};

use crate::topology::StaticTopologyBackend;

/// Version source for a node with no configured control-plane version.
struct UnknownVersion;

impl VersionSource for UnknownVersion {
    fn server_version(&self) -> anyhow::Result<String> {
        anyhow::bail!("control_plane.version is not configured")
    }
}

/// Load the placement topology.
///
/// Without a topology file every placement lookup fails, which fails the
/// whole cycle whenever partitions are enabled. That is only acceptable
/// when no descriptor asserts partitioning support.
fn load_backend(
    topology_file: Option<&Path>,
    capabilities_file: &Path,
) -> anyhow::Result<StaticTopologyBackend> {
    if let Some(path) = topology_file {
        return StaticTopologyBackend::from_file(path);
    }

    let caps = FileCapabilitySource::new(capabilities_file).capabilities()?;
    if let Some(gpu) = caps
        .iter()
        .find(|gpu| gpu.partitioning.as_ref().is_some_and(|p| p.supported))
    {
        anyhow::bail!(
            "hardware.topology_file is required: {} reports partitioning support",
            gpu.hardware_ref()
        );
    }
    info!("no topology file configured, advertising whole devices only");
    Ok(StaticTopologyBackend::default())
}

pub async fn run(config: AgentConfig) -> anyhow::Result<()> {
    info!(node = %config.node.name, driver = %config.node.driver, "partd starting");

    // ── Collaborators ──────────────────────────────────────────

    let capabilities_file = config
        .hardware
        .capabilities_file
        .clone()
        .context("hardware.capabilities_file is required for run")?;
    let backend = load_backend(config.hardware.topology_file.as_deref(), &capabilities_file)?;

    let versions: Arc<dyn VersionSource> = match &config.control_plane.version {
        Some(v) => Arc::new(StaticVersionSource(v.clone())),
        None => Arc::new(UnknownVersion),
    };
    let thresholds = Thresholds::from_config(config.control_plane.thresholds.as_ref())?;

    // ── Feature gates ──────────────────────────────────────────

    let trigger = Trigger::new();
    let republish = trigger.clone();
    let gates = FeatureGates::new(versions, Arc::new(LogRecorder))
        .with_thresholds(thresholds)
        .with_republish(Arc::new(move || republish.notify()))
        .with_error_handler(Arc::new(|err| error!(error = %err, "publish failed")));

    // ── Advertiser ─────────────────────────────────────────────

    let advertiser = Arc::new(
        Advertiser::new(
            AdvertiserConfig::from_agent_config(&config),
            Arc::new(backend),
            Arc::new(FileCapabilitySource::new(capabilities_file)),
            Arc::new(gates),
            Arc::new(FilePublisher::new(&config.advertise.output_dir)),
        )
        .with_trigger(trigger),
    );
    info!(output_dir = %config.advertise.output_dir.display(), "advertiser initialized");

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let loop_handle = tokio::spawn({
        let advertiser = advertiser.clone();
        async move { advertiser.run(shutdown_rx).await }
    });

    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("shutdown signal received"),
        Err(e) => error!(error = %e, "failed to listen for shutdown signal"),
    }
    let _ = shutdown_tx.send(true);
    loop_handle.await?;

    info!(generation = advertiser.generation().await, "partd stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const L4: &str =
        r#"{"name": "gpu-1", "address": "0000:86:00.0", "productName": "L4", "memoryMib": 23034}"#;
    const A100: &str = r#"{"name": "gpu-0", "address": "0000:3b:00.0", "productName": "A100", "memoryMib": 81920, "partitioning": {"supported": true, "totalSlices": 7, "profiles": []}}"#;

    fn write_caps(dir: &Path, descriptors: &[&str]) -> std::path::PathBuf {
        let path = dir.join("capabilities.json");
        std::fs::write(&path, format!("[{}]", descriptors.join(","))).unwrap();
        path
    }

    #[test]
    fn partitioning_without_topology_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let caps = write_caps(dir.path(), &[A100, L4]);

        let err = load_backend(None, &caps).unwrap_err();
        let message = err.to_string();
        assert!(message.contains("topology_file"), "{message}");
        assert!(message.contains("0000:3b:00.0"), "{message}");
    }

    #[test]
    fn whole_device_node_needs_no_topology() {
        let dir = tempfile::tempdir().unwrap();
        let caps = write_caps(dir.path(), &[L4]);
        assert!(load_backend(None, &caps).is_ok());
    }

    #[test]
    fn topology_file_skips_descriptor_check() {
        let dir = tempfile::tempdir().unwrap();
        let topology = dir.path().join("topology.json");
        std::fs::write(&topology, "{}").unwrap();

        let missing_caps = dir.path().join("absent.json");
        assert!(load_backend(Some(&topology), &missing_caps).is_ok());
    }
}
