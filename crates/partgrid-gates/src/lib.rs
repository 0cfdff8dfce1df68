//! partgrid-gates — which optional wire features the control plane accepts.
//!
//! Optional advertisement features (partitionable devices, consumable
//! capacity, separated counter layout) only work against recent control
//! planes. The coordinator decides per cycle which ones to use from the
//! connected control-plane version, and permanently turns features off
//! when the control plane reports that it dropped their fields.
//!
//! # Architecture
//!
//! ```text
//! FeatureGates (one per process)
//!   ├── VersionSource   (queried once per decide())
//!   ├── Thresholds      (minimum version per feature)
//!   ├── EventRecorder   (diagnostic events on GPUs)
//!   ├── republish hook  (called when a drop report changed something)
//!   └── Mutex<GateState>
//!       ├── disabled      (features turned off at runtime)
//!       ├── last_version  (version behind the latest decision)
//!       └── notified      ((feature, gpu) pairs already evented)
//! ```

pub mod coordinator;
pub mod error;
pub mod events;
pub mod version;

pub use coordinator::{
    ErrorHandler, FeatureGates, GateDecision, NodeHardware, RepublishFn, StaticVersionSource,
    VersionSource,
};
pub use error::{GateError, GateResult, PublishError};
pub use events::{
    EventRecorder, EventType, LogRecorder, MemoryRecorder, REASON_EXCLUSIVE_FALLBACK,
    REASON_FEATURE_DISABLED, RecordedEvent,
};
pub use version::{Feature, Thresholds, parse_version};
