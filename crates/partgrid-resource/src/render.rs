//! Domain ⇄ wire conversion.
//!
//! Rendering is pure and stateless. [`RenderOptions`] lets degraded
//! protocol modes omit fields an older control plane would drop.

use std::collections::BTreeMap;

use thiserror::Error;

use part_core::{AttributeValue, CapacityPolicy, CapacityValue, DevicePool};

use crate::wire;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RenderError {
    #[error("attribute {0} has no value")]
    EmptyAttribute(String),

    #[error("attribute {0} has more than one value")]
    AmbiguousAttribute(String),
}

/// Optional fields to include in rendered devices.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderOptions {
    /// Emit capacity request policies (consumable-capacity semantics).
    pub include_capacity: bool,
    /// Emit the multi-allocation flag.
    pub include_multi_allocation: bool,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            include_capacity: true,
            include_multi_allocation: true,
        }
    }
}

/// Where a pool's counter sets are published.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CounterLayout {
    /// Counter sets get a slice of their own.
    Separated,
    /// Counter sets ride in the same slice as the devices.
    ///
    /// They are still published as that slice's `sharedCounters`; they are
    /// not folded into the devices' own capacities.
    Inline,
}

/// Identity of the pool being rendered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolTarget {
    pub driver: String,
    pub pool_name: String,
    pub node_name: String,
    pub generation: i64,
}

pub fn render_attribute(value: &AttributeValue) -> wire::DeviceAttribute {
    let mut out = wire::DeviceAttribute::default();
    match value {
        AttributeValue::String(s) => out.string_value = Some(s.clone()),
        AttributeValue::Int(v) => out.int_value = Some(*v),
        AttributeValue::Bool(b) => out.bool_value = Some(*b),
    }
    out
}

/// Recover the single populated case of a wire attribute.
///
/// Version attributes come back as strings.
pub fn parse_attribute(
    name: &str,
    attr: &wire::DeviceAttribute,
) -> Result<AttributeValue, RenderError> {
    let mut found = Vec::with_capacity(1);
    if let Some(s) = &attr.string_value {
        found.push(AttributeValue::String(s.clone()));
    }
    if let Some(v) = attr.int_value {
        found.push(AttributeValue::Int(v));
    }
    if let Some(b) = attr.bool_value {
        found.push(AttributeValue::Bool(b));
    }
    if let Some(v) = &attr.version_value {
        found.push(AttributeValue::String(v.clone()));
    }
    match found.len() {
        0 => Err(RenderError::EmptyAttribute(name.to_string())),
        1 => Ok(found.remove(0)),
        _ => Err(RenderError::AmbiguousAttribute(name.to_string())),
    }
}

pub fn parse_device_attributes(
    device: &wire::Device,
) -> Result<BTreeMap<String, AttributeValue>, RenderError> {
    device
        .attributes
        .iter()
        .map(|(name, attr)| Ok((name.clone(), parse_attribute(name, attr)?)))
        .collect()
}

fn render_policy(policy: &CapacityPolicy) -> wire::CapacityRequestPolicy {
    let q = |v: &part_core::UnitValue| v.unit.to_quantity(v.value);
    wire::CapacityRequestPolicy {
        default: Some(q(&policy.default)),
        valid_range: Some(wire::CapacityRequestPolicyRange {
            min: q(&policy.min),
            max: Some(q(&policy.max)),
            step: Some(q(&policy.step)),
        }),
    }
}

pub fn render_capacity(capacity: &CapacityValue, options: RenderOptions) -> wire::DeviceCapacity {
    wire::DeviceCapacity {
        value: capacity.unit.to_quantity(capacity.value),
        request_policy: capacity
            .policy
            .as_ref()
            .filter(|_| options.include_capacity)
            .map(render_policy),
    }
}

fn render_counters(
    counters: &BTreeMap<String, part_core::CounterValue>,
) -> BTreeMap<String, wire::Counter> {
    counters
        .iter()
        .map(|(name, v)| (name.clone(), wire::Counter { value: v.to_quantity() }))
        .collect()
}

pub fn render_counter_set(set: &part_core::CounterSet) -> wire::CounterSet {
    wire::CounterSet {
        name: set.name.clone(),
        counters: render_counters(&set.counters),
    }
}

pub fn render_device(device: &part_core::Device, options: RenderOptions) -> wire::Device {
    wire::Device {
        name: device.name.clone(),
        attributes: device
            .attributes
            .iter()
            .map(|(k, v)| (k.clone(), render_attribute(v)))
            .collect(),
        capacity: device
            .capacity
            .iter()
            .map(|(k, v)| (k.clone(), render_capacity(v, options)))
            .collect(),
        consumes_counters: device
            .consumes_counters
            .iter()
            .map(|c| wire::DeviceCounterConsumption {
                counter_set: c.counter_set.clone(),
                counters: render_counters(&c.counters),
            })
            .collect(),
        allow_multiple_allocations: device
            .allow_multiple_allocations
            .filter(|_| options.include_multi_allocation),
    }
}

/// Render one pool into the slices that publish it.
///
/// `Separated` emits a counters-only slice (when there are counter sets)
/// followed by a devices slice; `Inline` emits a single slice. Every
/// slice records the total slice count of the pool.
pub fn render_pool(
    pool: &DevicePool,
    target: &PoolTarget,
    options: RenderOptions,
    layout: CounterLayout,
) -> Vec<wire::ResourceSlice> {
    let devices: Vec<wire::Device> = pool
        .devices
        .iter()
        .map(|d| render_device(d, options))
        .collect();
    let counters: Vec<wire::CounterSet> = pool.counter_sets.iter().map(render_counter_set).collect();

    let parts: Vec<(String, Vec<wire::Device>, Vec<wire::CounterSet>)> = match layout {
        CounterLayout::Inline => vec![(target.pool_name.clone(), devices, counters)],
        CounterLayout::Separated if counters.is_empty() => {
            vec![(format!("{}-devices", target.pool_name), devices, Vec::new())]
        }
        CounterLayout::Separated => vec![
            (format!("{}-counters", target.pool_name), Vec::new(), counters),
            (format!("{}-devices", target.pool_name), devices, Vec::new()),
        ],
    };

    let slice_count = parts.len() as i64;
    parts
        .into_iter()
        .map(|(name, devices, shared_counters)| wire::ResourceSlice {
            metadata: wire::ObjectMeta {
                name,
                ..wire::ObjectMeta::default()
            },
            spec: wire::ResourceSliceSpec {
                driver: target.driver.clone(),
                pool: wire::ResourcePool {
                    name: target.pool_name.clone(),
                    generation: target.generation,
                    resource_slice_count: slice_count,
                },
                node_name: Some(target.node_name.clone()),
                devices,
                shared_counters,
            },
        })
        .collect()
}
