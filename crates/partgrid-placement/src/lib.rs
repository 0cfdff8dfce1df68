//! PartGrid partition placement — from hardware topology to devices.
//!
//! This crate turns a GPU's static capability descriptor and the
//! placements reported by the hardware backend into the devices and
//! shared counter set the node agent advertises. It does NOT render the
//! wire format (that's `partgrid-resource`) or decide which features
//! the control plane accepts (that's `partgrid-gates`).
//!
//! # Components
//!
//! - **`capability`** — Capability descriptor (profiles, slice count)
//! - **`resolver`** — Hardware backend contract and placement resolution
//! - **`builder`** — Counter totals, partition devices, whole-device offers

pub mod builder;
pub mod capability;
pub mod error;
pub mod resolver;

pub use builder::{
    BuildOptions, build_partitioned, build_whole_device, counter_set_name, counter_totals,
    device_name, total_slices, validate_counters, whole_device_name,
};
pub use capability::{GpuCapability, PartitionCapability, PartitionProfiles, ProfileDescriptor, ResourceKind};
pub use error::{PlacementError, PlacementResult};
pub use resolver::{
    BackendError, Cancellation, HardwareBackend, PROFILE_SLOT_LIMIT, ProfileInfo, ProfilePlacements,
    Session, open_session,
};
