//! The advertisement cycle.
//!
//! `sync_once` runs resolve → build → render → publish for every GPU on
//! the node. Cycles are serialized by the publish-state lock. A failed
//! cycle publishes nothing, so the last good publication stays in place.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, watch};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use part_core::{AgentConfig, DevicePool};
use partgrid_gates::{FeatureGates, GateDecision, NodeHardware};
use partgrid_placement::{
    BuildOptions, Cancellation, GpuCapability, HardwareBackend, PlacementError, PlacementResult,
    ProfilePlacements, build_partitioned, build_whole_device, open_session, validate_counters,
};
use partgrid_resource::{PoolTarget, render_pool};

use crate::error::{AgentError, AgentResult};
use crate::fingerprint::fingerprint;
use crate::publish::Publisher;
use crate::source::CapabilitySource;
use crate::trigger::Trigger;

/// Identity and timing of one node's advertisement.
#[derive(Debug, Clone)]
pub struct AdvertiserConfig {
    pub driver: String,
    pub node_name: String,
    pub pool_name: String,
    /// Upper bound on one round of hardware backend calls.
    pub backend_deadline: Duration,
    pub resync_interval: Duration,
}

impl AdvertiserConfig {
    /// The pool is named after the node.
    pub fn from_agent_config(config: &AgentConfig) -> Self {
        Self {
            driver: config.node.driver.clone(),
            node_name: config.node.name.clone(),
            pool_name: config.node.name.clone(),
            backend_deadline: Duration::from_secs(config.advertise.backend_deadline_secs),
            resync_interval: Duration::from_secs(config.advertise.resync_interval_secs),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    Published { generation: i64, slices: usize },
    Unchanged { generation: i64 },
}

#[derive(Debug, Default)]
struct PublishState {
    generation: i64,
    fingerprint: Option<String>,
}

/// Per-node advertisement loop.
pub struct Advertiser<B: HardwareBackend> {
    config: AdvertiserConfig,
    backend: Arc<B>,
    capabilities: Arc<dyn CapabilitySource>,
    gates: Arc<FeatureGates>,
    publisher: Arc<dyn Publisher>,
    trigger: Trigger,
    state: Mutex<PublishState>,
}

impl<B: HardwareBackend + 'static> Advertiser<B> {
    pub fn new(
        config: AdvertiserConfig,
        backend: Arc<B>,
        capabilities: Arc<dyn CapabilitySource>,
        gates: Arc<FeatureGates>,
        publisher: Arc<dyn Publisher>,
    ) -> Self {
        Self {
            config,
            backend,
            capabilities,
            gates,
            publisher,
            trigger: Trigger::new(),
            state: Mutex::new(PublishState::default()),
        }
    }

    /// Share a trigger created elsewhere, e.g. the one wired into the
    /// feature gates' re-publish hook.
    pub fn with_trigger(mut self, trigger: Trigger) -> Self {
        self.trigger = trigger;
        self
    }

    pub fn trigger(&self) -> Trigger {
        self.trigger.clone()
    }

    /// Generation of the last successful publication.
    pub async fn generation(&self) -> i64 {
        self.state.lock().await.generation
    }

    // ── Cycle ──────────────────────────────────────────────────────

    /// Run one advertisement cycle.
    ///
    /// The generation is bumped and the pool published only when the
    /// rendered content differs from the last successful publication.
    pub async fn sync_once(&self) -> AgentResult<SyncOutcome> {
        let mut state = self.state.lock().await;

        let caps = self
            .capabilities
            .capabilities()
            .map_err(AgentError::Capabilities)?;
        let hardware = node_hardware(&caps);

        let decision = self.gates.decide(&hardware);
        let placements = if decision.partitionable {
            self.resolve_placements(&caps).await?
        } else {
            BTreeMap::new()
        };
        let pool = build_pool(&caps, &placements, &decision)?;

        let generation = state.generation + 1;
        let target = PoolTarget {
            driver: self.config.driver.clone(),
            pool_name: self.config.pool_name.clone(),
            node_name: self.config.node_name.clone(),
            generation,
        };
        let slices = render_pool(&pool, &target, decision.render_options(), decision.layout);
        let print = fingerprint(&slices)?;

        if state.fingerprint.as_deref() == Some(print.as_str()) {
            debug!(pool = %self.config.pool_name, generation = state.generation, "pool unchanged");
            return Ok(SyncOutcome::Unchanged {
                generation: state.generation,
            });
        }

        match self.publisher.publish(&self.config.pool_name, &slices) {
            Ok(()) => {
                state.generation = generation;
                state.fingerprint = Some(print);
                info!(
                    pool = %self.config.pool_name,
                    generation,
                    devices = pool.devices.len(),
                    slices = slices.len(),
                    "pool published"
                );
                Ok(SyncOutcome::Published {
                    generation,
                    slices: slices.len(),
                })
            }
            Err(err) => {
                warn!(
                    pool = %self.config.pool_name,
                    error = %err,
                    "publish failed, previous publication kept"
                );
                self.gates.handle_publish_error(err, &hardware);
                Err(AgentError::Publish {
                    pool: self.config.pool_name.clone(),
                })
            }
        }
    }

    /// Resolve placements for every partitionable GPU in one backend
    /// session on a blocking thread.
    async fn resolve_placements(
        &self,
        caps: &[GpuCapability],
    ) -> AgentResult<BTreeMap<usize, ProfilePlacements>> {
        let mut requests = Vec::new();
        for (idx, gpu) in caps.iter().enumerate() {
            let Some(parts) = gpu.partition_profiles()? else {
                continue;
            };
            let ids = parts.profile_ids();
            if ids.is_empty() {
                debug!(address = %gpu.address, "no placeable profiles");
                continue;
            }
            requests.push((idx, gpu.address.clone(), ids));
        }
        if requests.is_empty() {
            return Ok(BTreeMap::new());
        }

        let backend = self.backend.clone();
        let cancel = Cancellation::new().with_timeout(self.config.backend_deadline);
        let task_cancel = cancel.clone();
        let handle = tokio::task::spawn_blocking(
            move || -> PlacementResult<BTreeMap<usize, ProfilePlacements>> {
                let session = open_session(backend)?;
                let mut resolved = BTreeMap::new();
                for (idx, address, ids) in requests {
                    resolved.insert(idx, session.read_placements(&address, &ids, &task_cancel)?);
                }
                if let Err(e) = session.close() {
                    warn!(error = %e, "hardware session close failed");
                }
                Ok(resolved)
            },
        );

        match tokio::time::timeout(self.config.backend_deadline, handle).await {
            Ok(joined) => Ok(joined??),
            Err(_) => {
                cancel.cancel();
                Err(PlacementError::DeadlineExceeded.into())
            }
        }
    }

    // ── Loop ───────────────────────────────────────────────────────

    /// Run cycles on every trigger and resync tick until shutdown.
    ///
    /// The first tick fires immediately. Cycle failures are logged and
    /// retried on the next wake-up.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut resync = tokio::time::interval(self.config.resync_interval);
        resync.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            pool = %self.config.pool_name,
            interval = ?self.config.resync_interval,
            "advertiser started"
        );

        loop {
            tokio::select! {
                _ = resync.tick() => debug!("periodic resync"),
                _ = self.trigger.notified() => debug!("re-publish requested"),
                _ = shutdown.changed() => {
                    info!(pool = %self.config.pool_name, "advertiser shutting down");
                    break;
                }
            }

            match self.sync_once().await {
                Ok(outcome) => debug!(?outcome, "advertisement cycle complete"),
                Err(e) => warn!(error = %e, "advertisement cycle failed"),
            }
        }
    }
}

/// Event targets for the gates. A descriptor with inconsistent partition
/// data is not counted as partition-capable here; resolving it fails the
/// cycle later if partitions are enabled.
fn node_hardware(caps: &[GpuCapability]) -> NodeHardware {
    NodeHardware {
        all: caps.iter().map(GpuCapability::hardware_ref).collect(),
        partition_capable: caps
            .iter()
            .filter(|gpu| matches!(gpu.partition_profiles(), Ok(Some(_))))
            .map(GpuCapability::hardware_ref)
            .collect(),
    }
}

/// Whole-device offers for every GPU, plus partitions where placements
/// were resolved. A partitioned GPU's whole-device offer consumes its
/// entire counter set.
fn build_pool(
    caps: &[GpuCapability],
    placements: &BTreeMap<usize, ProfilePlacements>,
    decision: &GateDecision,
) -> AgentResult<DevicePool> {
    let options = BuildOptions {
        consumable_capacity: decision.consumable_capacity,
    };

    let mut pool = DevicePool::default();
    for (idx, gpu) in caps.iter().enumerate() {
        match placements.get(&idx) {
            Some(resolved) => {
                let partitions = build_partitioned(gpu, resolved)?;
                pool.devices
                    .push(build_whole_device(gpu, partitions.counter_sets.first(), options));
                pool.extend(partitions);
            }
            None => pool.devices.push(build_whole_device(gpu, None, options)),
        }
    }
    validate_counters(&pool)?;
    Ok(pool)
}
