//! Partition builder — capability + placements → devices and counters.
//!
//! Pure staged transforms with no I/O:
//! 1. [`counter_totals`] and [`total_slices`] size the shared counter set
//! 2. partition devices are built per (profile, placement)
//! 3. [`validate_counters`] checks every consumption against its set
//!
//! Partition layouts on one GPU are mutually exclusive alternatives, so
//! counter totals are the maximum over profiles, never a sum.

use std::collections::BTreeMap;

use tracing::debug;

use part_core::{
    CapacityPolicy, CapacityUnit, CapacityValue, CounterConsumption, CounterSet, CounterValue,
    Device, DevicePool, Placement, UnitValue,
};

use crate::capability::{GpuCapability, PartitionProfiles, ProfileDescriptor, ResourceKind};
use crate::error::{PlacementError, PlacementResult};
use crate::resolver::ProfilePlacements;

/// Smallest memory share a shared whole-device allocation may request.
const MIN_SHARED_MEMORY_MIB: i64 = 1024;

/// Knobs that change what the builder emits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BuildOptions {
    /// Attach request policies and the multi-allocation flag to
    /// whole-device offers.
    pub consumable_capacity: bool,
}

/// Maximum over profiles of `quantity × max(1, max_instances)`.
///
/// Resources no profile declares are left out.
pub fn counter_totals(profiles: &[ProfileDescriptor]) -> BTreeMap<ResourceKind, i64> {
    let mut totals = BTreeMap::new();
    for kind in ResourceKind::ALL {
        let total = profiles
            .iter()
            .filter(|p| p.is_placeable())
            .map(|p| p.quantity(kind).saturating_mul(i64::from(p.max_instances.max(1))))
            .max()
            .unwrap_or(0);
        if total > 0 {
            totals.insert(kind, total);
        }
    }
    totals
}

/// Declared slice count, widened to cover every resolved placement.
pub fn total_slices(declared: u32, placements: &ProfilePlacements) -> u32 {
    placements
        .values()
        .flatten()
        .map(Placement::end)
        .fold(declared, u32::max)
}

/// DNS-label-safe form of a PCI address.
fn address_label(address: &str) -> String {
    address
        .to_ascii_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect()
}

/// Name of the whole-device offer for a GPU.
pub fn whole_device_name(address: &str) -> String {
    format!("gpu-{}", address_label(address))
}

/// Name of a GPU's shared counter set.
pub fn counter_set_name(address: &str) -> String {
    format!("gpu-{}-counters", address_label(address))
}

/// Deterministic partition device name.
pub fn device_name(address: &str, profile_id: u32, placement: Placement) -> String {
    format!(
        "gpu-{}-part-{profile_id}-{}-{}",
        address_label(address),
        placement.start,
        placement.size
    )
}

fn slice_counter(index: u32) -> String {
    format!("slice-{index}")
}

fn build_counter_set(
    gpu: &GpuCapability,
    parts: &PartitionProfiles<'_>,
    slices: u32,
) -> CounterSet {
    let mut counters = BTreeMap::new();
    for (kind, total) in counter_totals(parts.profiles) {
        counters.insert(
            kind.counter_name().to_string(),
            CounterValue {
                value: total,
                unit: kind.unit(),
            },
        );
    }
    for i in 0..slices {
        counters.insert(slice_counter(i), CounterValue::count(1));
    }
    CounterSet {
        name: counter_set_name(&gpu.address),
        counters,
    }
}

fn build_partition_device(
    gpu: &GpuCapability,
    profile: &ProfileDescriptor,
    placement: Placement,
    counter_set: &str,
) -> Device {
    let mut device = Device::new(device_name(&gpu.address, profile.id, placement))
        .with_attribute("type", "partition")
        .with_attribute("profile", profile.name.as_str())
        .with_attribute("profileId", i64::from(profile.id))
        .with_attribute("placementStart", i64::from(placement.start))
        .with_attribute("placementSize", i64::from(placement.size))
        .with_attribute("parentAddress", gpu.address.as_str())
        .with_attribute("productName", gpu.product_name.as_str());
    if let Some(uuid) = &gpu.uuid {
        device = device.with_attribute("parentUuid", uuid.as_str());
    }

    let mut consumed = BTreeMap::new();
    for kind in ResourceKind::ALL {
        let quantity = profile.quantity(kind);
        if quantity <= 0 {
            continue;
        }
        let unit = kind.unit();
        consumed.insert(kind.counter_name().to_string(), CounterValue { value: quantity, unit });
        device
            .capacity
            .insert(kind.counter_name().to_string(), CapacityValue::new(quantity, unit.into()));
    }
    for i in placement.slices() {
        consumed.insert(slice_counter(i), CounterValue::count(1));
    }

    device.consumes_counters.push(CounterConsumption {
        counter_set: counter_set.to_string(),
        counters: consumed,
    });
    device
}

/// Build partition devices and the shared counter set for one GPU.
///
/// A GPU without usable partitioning data yields an empty pool.
pub fn build_partitioned(
    gpu: &GpuCapability,
    placements: &ProfilePlacements,
) -> PlacementResult<DevicePool> {
    let Some(parts) = gpu.partition_profiles()? else {
        debug!(address = %gpu.address, "gpu does not partition, no partition devices");
        return Ok(DevicePool::default());
    };

    let slices = total_slices(parts.total_slices, placements);
    if slices > parts.total_slices {
        debug!(
            address = %gpu.address,
            declared = parts.total_slices,
            widened = slices,
            "placements exceed declared slice count"
        );
    }
    let counter_set = build_counter_set(gpu, &parts, slices);

    let mut devices = Vec::new();
    for profile in parts.placeable() {
        let Some(profile_placements) = placements.get(&profile.id) else {
            continue;
        };
        for &placement in profile_placements {
            devices.push(build_partition_device(gpu, profile, placement, &counter_set.name));
        }
    }
    devices.sort_by(|a, b| a.name.cmp(&b.name));
    devices.dedup_by(|a, b| a.name == b.name);

    debug!(
        address = %gpu.address,
        devices = devices.len(),
        counters = counter_set.counters.len(),
        "built partition devices"
    );
    let pool = DevicePool {
        devices,
        counter_sets: vec![counter_set],
    };
    validate_counters(&pool)?;
    Ok(pool)
}

/// Build the whole-device offer for a GPU.
///
/// When `counter_set` is given the device consumes every counter in it,
/// making it mutually exclusive with the GPU's partitions.
pub fn build_whole_device(
    gpu: &GpuCapability,
    counter_set: Option<&CounterSet>,
    options: BuildOptions,
) -> Device {
    let mut device = Device::new(whole_device_name(&gpu.address))
        .with_attribute("type", "gpu")
        .with_attribute("address", gpu.address.as_str())
        .with_attribute("productName", gpu.product_name.as_str());
    if let Some(uuid) = &gpu.uuid {
        device = device.with_attribute("uuid", uuid.as_str());
    }

    let mut memory = CapacityValue::new(gpu.memory_mib, CapacityUnit::MiB);
    if options.consumable_capacity {
        let mib = |v| UnitValue::new(v, CapacityUnit::MiB);
        let pct = |v| UnitValue::new(v, CapacityUnit::Percent);
        memory = memory.with_policy(CapacityPolicy {
            default: mib(gpu.memory_mib),
            min: mib(MIN_SHARED_MEMORY_MIB.min(gpu.memory_mib)),
            max: mib(gpu.memory_mib),
            step: mib(MIN_SHARED_MEMORY_MIB.min(gpu.memory_mib).max(1)),
        });
        device = device.with_capacity(
            "compute",
            CapacityValue::new(100, CapacityUnit::Percent).with_policy(CapacityPolicy {
                default: pct(100),
                min: pct(1),
                max: pct(100),
                step: pct(1),
            }),
        );
        device.allow_multiple_allocations = Some(true);
    }
    device = device.with_capacity("memory", memory);

    if let Some(set) = counter_set {
        device.consumes_counters.push(CounterConsumption {
            counter_set: set.name.clone(),
            counters: set.counters.clone(),
        });
    }
    device
}

/// Check that every consumed counter is declared by its counter set.
pub fn validate_counters(pool: &DevicePool) -> PlacementResult<()> {
    let sets: BTreeMap<&str, &CounterSet> = pool
        .counter_sets
        .iter()
        .map(|s| (s.name.as_str(), s))
        .collect();

    for device in &pool.devices {
        for consumption in &device.consumes_counters {
            let Some(set) = sets.get(consumption.counter_set.as_str()) else {
                return Err(PlacementError::UnknownCounterSet {
                    device: device.name.clone(),
                    counter_set: consumption.counter_set.clone(),
                });
            };
            if let Some(counter) = consumption
                .counters
                .keys()
                .find(|c| !set.counters.contains_key(*c))
            {
                return Err(PlacementError::UnknownCounter {
                    device: device.name.clone(),
                    counter_set: consumption.counter_set.clone(),
                    counter: counter.clone(),
                });
            }
        }
    }
    Ok(())
}
