//! partgrid-resource — wire format for the resource-allocation control plane.
//!
//! # Architecture
//!
//! `wire` holds the serde shapes the control plane exchanges: resource
//! slices (what this node advertises) and resource claims (what the
//! scheduler granted). `render` is the pure conversion between those
//! shapes and the `part-core` domain model, in both directions.
//!
//! Empty collections serialize as absent so strict decoders downstream
//! never see `[]` or `{}` where they expect a missing field.

pub mod render;
pub mod wire;

pub use render::{
    CounterLayout, PoolTarget, RenderError, RenderOptions, parse_attribute, parse_device_attributes,
    render_attribute, render_capacity, render_counter_set, render_device, render_pool,
};
pub use wire::*;
