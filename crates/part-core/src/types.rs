//! Domain model shared across PartGrid crates.
//!
//! Devices and counter sets are rebuilt from scratch on every
//! advertisement cycle. Maps are `BTreeMap` so that two builds from the
//! same inputs compare and serialize identically.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::quantity::Quantity;

/// Bytes per MiB, used when normalizing memory quantities.
pub const MIB: i64 = 1024 * 1024;

// ── Attributes ────────────────────────────────────────────────────

/// A device attribute. Exactly one case is active.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttributeValue {
    String(String),
    Int(i64),
    Bool(bool),
}

impl AttributeValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            AttributeValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            AttributeValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            AttributeValue::Bool(b) => Some(*b),
            _ => None,
        }
    }
}

impl From<&str> for AttributeValue {
    fn from(s: &str) -> Self {
        AttributeValue::String(s.to_string())
    }
}

impl From<String> for AttributeValue {
    fn from(s: String) -> Self {
        AttributeValue::String(s)
    }
}

impl From<i64> for AttributeValue {
    fn from(v: i64) -> Self {
        AttributeValue::Int(v)
    }
}

impl From<bool> for AttributeValue {
    fn from(b: bool) -> Self {
        AttributeValue::Bool(b)
    }
}

// ── Capacity ──────────────────────────────────────────────────────

/// Unit of a device capacity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CapacityUnit {
    MiB,
    Percent,
    Count,
}

impl CapacityUnit {
    /// Normalize a value to its base unit (MiB → bytes).
    pub fn normalize(self, value: i64) -> i64 {
        match self {
            CapacityUnit::MiB => value.saturating_mul(MIB),
            CapacityUnit::Percent | CapacityUnit::Count => value,
        }
    }

    /// Render a value in this unit as a quantity.
    ///
    /// MiB values become binary-suffixed byte quantities; the other
    /// units are emitted as plain decimal integers.
    pub fn to_quantity(self, value: i64) -> Quantity {
        match self {
            CapacityUnit::MiB => Quantity::from_bytes(self.normalize(value)),
            CapacityUnit::Percent | CapacityUnit::Count => Quantity::from_count(value),
        }
    }
}

/// A `(value, unit)` pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitValue {
    pub value: i64,
    pub unit: CapacityUnit,
}

impl UnitValue {
    pub fn new(value: i64, unit: CapacityUnit) -> Self {
        Self { value, unit }
    }

    pub fn normalized(&self) -> i64 {
        self.unit.normalize(self.value)
    }
}

/// Allowed range for a quantity an allocator may request from a device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapacityPolicy {
    pub default: UnitValue,
    pub min: UnitValue,
    pub max: UnitValue,
    pub step: UnitValue,
}

/// A device capacity with an optional request policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapacityValue {
    pub value: i64,
    pub unit: CapacityUnit,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy: Option<CapacityPolicy>,
}

impl CapacityValue {
    pub fn new(value: i64, unit: CapacityUnit) -> Self {
        Self {
            value,
            unit,
            policy: None,
        }
    }

    pub fn with_policy(mut self, policy: CapacityPolicy) -> Self {
        self.policy = Some(policy);
        self
    }

    /// Value in the unit's base (bytes for MiB).
    pub fn normalized(&self) -> i64 {
        self.unit.normalize(self.value)
    }
}

// ── Counters ──────────────────────────────────────────────────────

/// Unit of a shared counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CounterUnit {
    MiB,
    Count,
}

impl From<CounterUnit> for CapacityUnit {
    fn from(unit: CounterUnit) -> Self {
        match unit {
            CounterUnit::MiB => CapacityUnit::MiB,
            CounterUnit::Count => CapacityUnit::Count,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CounterValue {
    pub value: i64,
    pub unit: CounterUnit,
}

impl CounterValue {
    pub fn mib(value: i64) -> Self {
        Self {
            value,
            unit: CounterUnit::MiB,
        }
    }

    pub fn count(value: i64) -> Self {
        Self {
            value,
            unit: CounterUnit::Count,
        }
    }

    pub fn to_quantity(&self) -> Quantity {
        CapacityUnit::from(self.unit).to_quantity(self.value)
    }
}

/// Shared resource ledger for one physical device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CounterSet {
    pub name: String,
    pub counters: BTreeMap<String, CounterValue>,
}

/// What a device draws from a counter set when allocated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CounterConsumption {
    pub counter_set: String,
    pub counters: BTreeMap<String, CounterValue>,
}

// ── Devices ───────────────────────────────────────────────────────

/// An advertisable device: a whole GPU or one partition placement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    pub name: String,
    pub attributes: BTreeMap<String, AttributeValue>,
    pub capacity: BTreeMap<String, CapacityValue>,
    pub consumes_counters: Vec<CounterConsumption>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allow_multiple_allocations: Option<bool>,
}

impl Device {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            attributes: BTreeMap::new(),
            capacity: BTreeMap::new(),
            consumes_counters: Vec::new(),
            allow_multiple_allocations: None,
        }
    }

    pub fn with_attribute(mut self, key: &str, value: impl Into<AttributeValue>) -> Self {
        self.attributes.insert(key.to_string(), value.into());
        self
    }

    pub fn with_capacity(mut self, key: &str, value: CapacityValue) -> Self {
        self.capacity.insert(key.to_string(), value);
        self
    }
}

/// Everything one node advertises in a single cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DevicePool {
    pub devices: Vec<Device>,
    pub counter_sets: Vec<CounterSet>,
}

impl DevicePool {
    pub fn is_empty(&self) -> bool {
        self.devices.is_empty() && self.counter_sets.is_empty()
    }

    /// Append another pool's devices and counter sets.
    pub fn extend(&mut self, other: DevicePool) {
        self.devices.extend(other.devices);
        self.counter_sets.extend(other.counter_sets);
    }
}

// ── Placement ─────────────────────────────────────────────────────

/// A contiguous range on a GPU's slice axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Placement {
    pub start: u32,
    pub size: u32,
}

impl Placement {
    pub fn new(start: u32, size: u32) -> Self {
        Self { start, size }
    }

    /// One past the last slice index covered.
    pub fn end(&self) -> u32 {
        self.start.saturating_add(self.size)
    }

    pub fn slices(&self) -> std::ops::Range<u32> {
        self.start..self.end()
    }
}

// ── Hardware identity ─────────────────────────────────────────────

/// A physical GPU, used as the target of diagnostic events.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct HardwareRef {
    pub name: String,
    pub address: String,
}

impl std::fmt::Display for HardwareRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.name, self.address)
    }
}

// ── Preparation ───────────────────────────────────────────────────

/// Identity of a resource claim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimRef {
    pub namespace: String,
    pub name: String,
    pub uid: String,
}

impl std::fmt::Display for ClaimRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{} ({})", self.namespace, self.name, self.uid)
    }
}

/// Node-local instructions for preparing the devices of one claim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrepareRequest {
    pub claim: ClaimRef,
    pub node_name: String,
    pub devices: Vec<PrepareDevice>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrepareDevice {
    pub request: String,
    pub driver: String,
    pub pool: String,
    pub device: String,
    /// Empty when the grant is not shared.
    pub share_id: String,
    pub consumed_capacity: BTreeMap<String, Quantity>,
    pub attributes: BTreeMap<String, AttributeValue>,
}
