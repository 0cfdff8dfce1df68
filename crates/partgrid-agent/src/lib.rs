//! partgrid-agent — the per-node advertisement loop.
//!
//! One [`Advertiser`] runs per node. Each cycle it reads GPU capability
//! descriptors, asks the feature gates what the control plane accepts,
//! resolves partition placements on a blocking thread, builds and
//! renders the node's pool, and publishes it when its content changed.
//!
//! # Architecture
//!
//! ```text
//!            Trigger (coalesced) ─┐
//!            resync interval ─────┤
//!                                 ▼
//! CapabilitySource ──▶ Advertiser::sync_once ──▶ Publisher
//!                        │   ▲                      │
//!       HardwareBackend ◀┘   └── FeatureGates ◀─────┘ (drop reports)
//! ```

pub mod advertiser;
pub mod error;
pub mod fingerprint;
pub mod publish;
pub mod source;
pub mod trigger;

pub use advertiser::{Advertiser, AdvertiserConfig, SyncOutcome};
pub use error::{AgentError, AgentResult};
pub use fingerprint::fingerprint;
pub use publish::{FilePublisher, Publisher};
pub use source::{CapabilitySource, FileCapabilitySource, StaticCapabilities};
pub use trigger::Trigger;
