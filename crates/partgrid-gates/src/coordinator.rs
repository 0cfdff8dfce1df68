//! Per-cycle feature decisions and runtime degradation.
//!
//! [`FeatureGates::decide`] answers "which optional features may this
//! cycle use" from the control-plane version and the set of features
//! disabled at runtime. [`FeatureGates::handle_publish_error`] reacts to
//! the control plane reporting dropped fields by disabling the named
//! features for the rest of the process lifetime and requesting a
//! re-publish.

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};

use semver::Version;
use tracing::{debug, info, warn};

use part_core::HardwareRef;
use partgrid_resource::{CounterLayout, RenderOptions};

use crate::error::{GateError, PublishError};
use crate::events::{
    EventRecorder, EventType, REASON_EXCLUSIVE_FALLBACK, REASON_FEATURE_DISABLED,
};
use crate::version::{Feature, Thresholds, parse_version};

/// Source of the connected control plane's version string.
pub trait VersionSource: Send + Sync {
    fn server_version(&self) -> anyhow::Result<String>;
}

/// Version source with a fixed answer.
#[derive(Debug, Clone)]
pub struct StaticVersionSource(pub String);

impl VersionSource for StaticVersionSource {
    fn server_version(&self) -> anyhow::Result<String> {
        Ok(self.0.clone())
    }
}

/// Called when a drop report changed the enabled feature set.
pub type RepublishFn = Arc<dyn Fn() + Send + Sync>;

/// Receives publish errors the coordinator does not handle itself.
pub type ErrorHandler = Arc<dyn Fn(PublishError) + Send + Sync>;

/// Features in effect for one advertisement cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GateDecision {
    pub partitionable: bool,
    pub consumable_capacity: bool,
    pub layout: CounterLayout,
    /// Control-plane version the decision was made against.
    pub version: Option<Version>,
    /// Set when the version could not be determined.
    pub version_error: Option<String>,
}

impl GateDecision {
    /// Decision that assumes nothing optional is supported.
    pub fn conservative() -> Self {
        Self {
            partitionable: false,
            consumable_capacity: false,
            layout: CounterLayout::Inline,
            version: None,
            version_error: None,
        }
    }

    pub fn render_options(&self) -> RenderOptions {
        RenderOptions {
            include_capacity: self.consumable_capacity,
            include_multi_allocation: self.consumable_capacity,
        }
    }
}

/// The GPUs a decision or drop report concerns.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeHardware {
    /// Every GPU on the node.
    pub all: Vec<HardwareRef>,
    /// GPUs whose descriptors report usable partitioning.
    pub partition_capable: Vec<HardwareRef>,
}

impl NodeHardware {
    /// GPUs that lose something when `feature` is disabled.
    pub fn affected_by(&self, feature: Feature) -> &[HardwareRef] {
        match feature {
            Feature::PartitionableDevices => &self.partition_capable,
            Feature::ConsumableCapacity | Feature::SeparatedCounters => &self.all,
        }
    }
}

#[derive(Debug, Default)]
struct GateState {
    disabled: BTreeSet<Feature>,
    /// Version behind the most recent decision, `None` if it was unknown.
    last_version: Option<Version>,
    /// (feature, gpu address) pairs that already received events.
    notified: BTreeSet<(Feature, String)>,
}

/// Process-wide feature gate coordinator.
pub struct FeatureGates {
    versions: Arc<dyn VersionSource>,
    thresholds: Thresholds,
    recorder: Arc<dyn EventRecorder>,
    republish: Option<RepublishFn>,
    on_error: Option<ErrorHandler>,
    state: Mutex<GateState>,
}

impl FeatureGates {
    pub fn new(versions: Arc<dyn VersionSource>, recorder: Arc<dyn EventRecorder>) -> Self {
        Self {
            versions,
            thresholds: Thresholds::default(),
            recorder,
            republish: None,
            on_error: None,
            state: Mutex::new(GateState::default()),
        }
    }

    pub fn with_thresholds(mut self, thresholds: Thresholds) -> Self {
        self.thresholds = thresholds;
        self
    }

    pub fn with_republish(mut self, republish: RepublishFn) -> Self {
        self.republish = Some(republish);
        self
    }

    pub fn with_error_handler(mut self, handler: ErrorHandler) -> Self {
        self.on_error = Some(handler);
        self
    }

    pub fn thresholds(&self) -> &Thresholds {
        &self.thresholds
    }

    /// Features disabled at runtime by drop reports.
    pub fn disabled_features(&self) -> BTreeSet<Feature> {
        self.lock().disabled.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, GateState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    // ── Decisions ──────────────────────────────────────────────────

    /// Decide which optional features this cycle may use.
    ///
    /// Queries the control-plane version once. An unavailable or
    /// unparseable version yields the conservative decision; the cause
    /// is logged and returned in `version_error` rather than failing.
    pub fn decide(&self, hardware: &NodeHardware) -> GateDecision {
        let version = self
            .versions
            .server_version()
            .map_err(|e| GateError::VersionQuery(format!("{e:#}")))
            .and_then(|raw| parse_version(&raw));

        let version = match version {
            Ok(v) => v,
            Err(e) => {
                warn!(error = %e, "control plane version unavailable, using conservative feature set");
                self.lock().last_version = None;
                return GateDecision {
                    version_error: Some(e.to_string()),
                    ..GateDecision::conservative()
                };
            }
        };

        let mut state = self.lock();
        state.last_version = Some(version.clone());
        let enabled = |state: &GateState, feature: Feature| {
            self.thresholds.supports(&version, feature) && !state.disabled.contains(&feature)
        };

        let partitionable = enabled(&state, Feature::PartitionableDevices);
        let consumable_capacity = enabled(&state, Feature::ConsumableCapacity);
        let layout = if enabled(&state, Feature::SeparatedCounters) {
            CounterLayout::Separated
        } else {
            CounterLayout::Inline
        };

        if !self.thresholds.supports(&version, Feature::PartitionableDevices) {
            let message = format!(
                "control plane {version} is older than {}; partition offers disabled",
                self.thresholds.partitionable_devices
            );
            self.notify_disabled(&mut state, Feature::PartitionableDevices, hardware, &message);
        }

        debug!(
            %version,
            partitionable,
            consumable_capacity,
            ?layout,
            "feature gates decided"
        );

        GateDecision {
            partitionable,
            consumable_capacity,
            layout,
            version: Some(version),
            version_error: None,
        }
    }

    // ── Degradation ────────────────────────────────────────────────

    /// React to a failed publish.
    ///
    /// A drop report naming known features disables each one that is
    /// still enabled, records events on the affected GPUs, and requests a
    /// single re-publish. Features that were already off, whether from an
    /// earlier report or because the last decided version is below their
    /// threshold, change nothing. Unknown identifiers and other errors are
    /// forwarded to the generic error handler.
    pub fn handle_publish_error(&self, err: PublishError, hardware: &NodeHardware) {
        let ids = match err {
            PublishError::DroppedFields(ids) if !ids.is_empty() => ids,
            other => {
                self.forward(other);
                return;
            }
        };

        let mut unknown = Vec::new();
        let mut changed = false;
        {
            let mut state = self.lock();
            for id in ids {
                let Some(feature) = Feature::from_drop_identifier(&id) else {
                    unknown.push(id);
                    continue;
                };
                let version_allows = state
                    .last_version
                    .as_ref()
                    .is_some_and(|v| self.thresholds.supports(v, feature));
                if !state.disabled.insert(feature) || !version_allows {
                    debug!(%feature, "feature already disabled");
                    continue;
                }
                changed = true;
                info!(%feature, identifier = %id, "control plane dropped feature fields, disabling");
                let message = format!("control plane dropped {id} fields; {feature} disabled");
                self.notify_disabled(&mut state, feature, hardware, &message);
            }
        }

        if changed {
            if let Some(republish) = &self.republish {
                republish();
            }
        }

        if !unknown.is_empty() {
            warn!(identifiers = ?unknown, "control plane dropped fields for unknown features");
            self.forward(PublishError::DroppedFields(unknown));
        }
    }

    fn forward(&self, err: PublishError) {
        match &self.on_error {
            Some(handler) => handler(err),
            None => warn!(error = %err, "publish failed"),
        }
    }

    fn notify_disabled(
        &self,
        state: &mut GateState,
        feature: Feature,
        hardware: &NodeHardware,
        message: &str,
    ) {
        for hw in hardware.affected_by(feature) {
            if !state.notified.insert((feature, hw.address.clone())) {
                continue;
            }
            self.recorder
                .record(hw, EventType::Warning, REASON_FEATURE_DISABLED, message);
            if feature == Feature::PartitionableDevices {
                self.recorder.record(
                    hw,
                    EventType::Normal,
                    REASON_EXCLUSIVE_FALLBACK,
                    &format!("only whole-device offers will be published for {hw}"),
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Barrier;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::events::MemoryRecorder;

    struct FailingVersion;

    impl VersionSource for FailingVersion {
        fn server_version(&self) -> anyhow::Result<String> {
            anyhow::bail!("connection refused")
        }
    }

    fn a100() -> HardwareRef {
        HardwareRef {
            name: "gpu-0".into(),
            address: "0000:3b:00.0".into(),
        }
    }

    fn l4() -> HardwareRef {
        HardwareRef {
            name: "gpu-1".into(),
            address: "0000:86:00.0".into(),
        }
    }

    fn gpus() -> NodeHardware {
        NodeHardware {
            all: vec![a100()],
            partition_capable: vec![a100()],
        }
    }

    /// One partitionable A100 next to an L4 without partitioning.
    fn mixed() -> NodeHardware {
        NodeHardware {
            all: vec![a100(), l4()],
            partition_capable: vec![a100()],
        }
    }

    fn gates(version: &str, recorder: Arc<MemoryRecorder>) -> FeatureGates {
        FeatureGates::new(Arc::new(StaticVersionSource(version.into())), recorder)
    }

    fn counting(version: &str, recorder: Arc<MemoryRecorder>) -> (FeatureGates, Arc<AtomicUsize>) {
        let republished = Arc::new(AtomicUsize::new(0));
        let counter = republished.clone();
        let gates = gates(version, recorder).with_republish(Arc::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }));
        (gates, republished)
    }

    fn partition_drop() -> PublishError {
        PublishError::DroppedFields(vec!["DRAPartitionableDevices".into()])
    }

    #[test]
    fn recent_control_plane_enables_everything() {
        let recorder = Arc::new(MemoryRecorder::new());
        let decision = gates("v1.35.0", recorder.clone()).decide(&gpus());
        assert!(decision.partitionable);
        assert!(decision.consumable_capacity);
        assert_eq!(decision.layout, CounterLayout::Separated);
        assert!(decision.render_options().include_capacity);
        assert!(recorder.events().is_empty());
    }

    #[test]
    fn mid_version_uses_inline_counters() {
        let decision = gates("1.34.1", Arc::new(MemoryRecorder::new())).decide(&gpus());
        assert!(decision.partitionable);
        assert!(decision.consumable_capacity);
        assert_eq!(decision.layout, CounterLayout::Inline);
    }

    #[test]
    fn old_control_plane_emits_events_once() {
        let recorder = Arc::new(MemoryRecorder::new());
        let gates = gates("v1.31.4", recorder.clone());

        let first = gates.decide(&gpus());
        assert!(!first.partitionable);
        assert!(!first.consumable_capacity);
        assert_eq!(first.layout, CounterLayout::Inline);

        gates.decide(&gpus());
        assert_eq!(recorder.count(REASON_FEATURE_DISABLED), 1);
        assert_eq!(recorder.count(REASON_EXCLUSIVE_FALLBACK), 1);
    }

    #[test]
    fn old_control_plane_only_notifies_partition_capable_gpus() {
        let recorder = Arc::new(MemoryRecorder::new());
        gates("v1.31.0", recorder.clone()).decide(&mixed());

        let events = recorder.events();
        assert_eq!(recorder.count(REASON_FEATURE_DISABLED), 1);
        assert_eq!(recorder.count(REASON_EXCLUSIVE_FALLBACK), 1);
        assert!(events.iter().all(|e| e.object == a100()), "{events:?}");
    }

    #[test]
    fn consumable_capacity_drop_notifies_every_gpu() {
        let recorder = Arc::new(MemoryRecorder::new());
        let gates = gates("v1.35.0", recorder.clone());
        gates.decide(&mixed());
        gates.handle_publish_error(
            PublishError::DroppedFields(vec!["DRAConsumableCapacity".into()]),
            &mixed(),
        );

        let notified: Vec<_> = recorder
            .events()
            .into_iter()
            .map(|e| e.object.address)
            .collect();
        assert_eq!(notified, vec!["0000:3b:00.0", "0000:86:00.0"]);
        assert_eq!(recorder.count(REASON_EXCLUSIVE_FALLBACK), 0);
    }

    #[test]
    fn version_failure_is_conservative() {
        let recorder = Arc::new(MemoryRecorder::new());
        let gates = FeatureGates::new(Arc::new(FailingVersion), recorder.clone());
        let decision = gates.decide(&gpus());
        assert!(!decision.partitionable);
        assert_eq!(decision.layout, CounterLayout::Inline);
        assert!(decision.version_error.unwrap().contains("connection refused"));
        assert!(recorder.events().is_empty());
    }

    #[test]
    fn unparseable_version_is_conservative() {
        let decision = gates("unknown", Arc::new(MemoryRecorder::new())).decide(&gpus());
        assert_eq!(decision, GateDecision {
            version_error: decision.version_error.clone(),
            ..GateDecision::conservative()
        });
        assert!(decision.version_error.is_some());
    }

    #[test]
    fn drop_report_disables_and_republishes_once() {
        let recorder = Arc::new(MemoryRecorder::new());
        let (gates, republished) = counting("v1.35.0", recorder.clone());
        assert!(gates.decide(&gpus()).partitionable);

        gates.handle_publish_error(partition_drop(), &gpus());
        gates.handle_publish_error(partition_drop(), &gpus());

        assert_eq!(republished.load(Ordering::SeqCst), 1);
        assert_eq!(recorder.count(REASON_FEATURE_DISABLED), 1);
        assert_eq!(recorder.count(REASON_EXCLUSIVE_FALLBACK), 1);

        let decision = gates.decide(&gpus());
        assert!(!decision.partitionable);
        assert!(decision.consumable_capacity);
    }

    #[test]
    fn concurrent_drop_reports_republish_once() {
        const THREADS: usize = 8;
        let recorder = Arc::new(MemoryRecorder::new());
        let (gates, republished) = counting("v1.35.0", recorder.clone());
        let gates = Arc::new(gates);
        gates.decide(&mixed());

        let barrier = Arc::new(Barrier::new(THREADS));
        let workers: Vec<_> = (0..THREADS)
            .map(|_| {
                let gates = gates.clone();
                let barrier = barrier.clone();
                std::thread::spawn(move || {
                    barrier.wait();
                    gates.handle_publish_error(partition_drop(), &mixed());
                })
            })
            .collect();
        for worker in workers {
            worker.join().unwrap();
        }

        assert_eq!(republished.load(Ordering::SeqCst), 1);
        assert_eq!(recorder.count(REASON_FEATURE_DISABLED), 1);
        assert_eq!(recorder.count(REASON_EXCLUSIVE_FALLBACK), 1);
        assert!(recorder.events().iter().all(|e| e.object == a100()));
    }

    #[test]
    fn drop_report_below_threshold_changes_nothing() {
        let recorder = Arc::new(MemoryRecorder::new());
        let (gates, republished) = counting("v1.31.0", recorder.clone());
        assert!(!gates.decide(&gpus()).partitionable);
        let before = recorder.events().len();

        gates.handle_publish_error(partition_drop(), &gpus());

        assert_eq!(republished.load(Ordering::SeqCst), 0);
        assert_eq!(recorder.events().len(), before);
    }

    #[test]
    fn drop_report_after_unknown_version_changes_nothing() {
        let recorder = Arc::new(MemoryRecorder::new());
        let republished = Arc::new(AtomicUsize::new(0));
        let counter = republished.clone();
        let gates = FeatureGates::new(Arc::new(FailingVersion), recorder.clone()).with_republish(
            Arc::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        );
        gates.decide(&gpus());

        gates.handle_publish_error(partition_drop(), &gpus());

        assert_eq!(republished.load(Ordering::SeqCst), 0);
        assert!(recorder.events().is_empty());
    }

    #[test]
    fn consumable_capacity_drop_has_no_fallback_advisory() {
        let recorder = Arc::new(MemoryRecorder::new());
        let gates = gates("v1.35.0", recorder.clone());
        gates.decide(&gpus());
        gates.handle_publish_error(
            PublishError::DroppedFields(vec!["DRAConsumableCapacity".into()]),
            &gpus(),
        );
        assert_eq!(recorder.count(REASON_FEATURE_DISABLED), 1);
        assert_eq!(recorder.count(REASON_EXCLUSIVE_FALLBACK), 0);
        assert!(!gates.decide(&gpus()).render_options().include_capacity);
    }

    #[test]
    fn unknown_identifiers_are_forwarded() {
        let forwarded = Arc::new(Mutex::new(Vec::new()));
        let sink = forwarded.clone();
        let (gates, republished) = counting("v1.35.0", Arc::new(MemoryRecorder::new()));
        let gates = gates.with_error_handler(Arc::new(move |err| {
            sink.lock().unwrap().push(err.to_string());
        }));
        gates.decide(&gpus());

        gates.handle_publish_error(
            PublishError::DroppedFields(vec![
                "DRAConsumableCapacity".into(),
                "DRAFutureThing".into(),
            ]),
            &gpus(),
        );

        assert_eq!(republished.load(Ordering::SeqCst), 1);
        let forwarded = forwarded.lock().unwrap();
        assert_eq!(forwarded.len(), 1);
        assert!(forwarded[0].contains("DRAFutureThing"));
        assert!(!forwarded[0].contains("DRAConsumableCapacity"));
    }

    #[test]
    fn empty_report_and_other_errors_pass_through() {
        let forwarded = Arc::new(AtomicUsize::new(0));
        let counter = forwarded.clone();
        let gates = gates("v1.35.0", Arc::new(MemoryRecorder::new())).with_error_handler(
            Arc::new(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        );

        gates.handle_publish_error(PublishError::DroppedFields(Vec::new()), &gpus());
        gates.handle_publish_error(anyhow::anyhow!("conflict").into(), &gpus());

        assert_eq!(forwarded.load(Ordering::SeqCst), 2);
        assert!(gates.disabled_features().is_empty());
    }
}
