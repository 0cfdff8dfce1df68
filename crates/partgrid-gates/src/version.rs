//! Optional features and the control-plane versions that support them.

use semver::Version;

use part_core::config::ThresholdsConfig;

use crate::error::{GateError, GateResult};

/// An optional advertisement feature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Feature {
    /// Partition devices with shared counters.
    PartitionableDevices,
    /// Capacity request policies and multi-allocation on whole devices.
    ConsumableCapacity,
    /// Counter sets published in their own slice.
    SeparatedCounters,
}

impl Feature {
    pub const ALL: [Feature; 3] = [
        Feature::PartitionableDevices,
        Feature::ConsumableCapacity,
        Feature::SeparatedCounters,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Feature::PartitionableDevices => "partitionable-devices",
            Feature::ConsumableCapacity => "consumable-capacity",
            Feature::SeparatedCounters => "separated-counters",
        }
    }

    /// Identifier the control plane uses when reporting dropped fields.
    pub fn drop_identifier(self) -> Option<&'static str> {
        match self {
            Feature::PartitionableDevices => Some("DRAPartitionableDevices"),
            Feature::ConsumableCapacity => Some("DRAConsumableCapacity"),
            Feature::SeparatedCounters => None,
        }
    }

    pub fn from_drop_identifier(id: &str) -> Option<Feature> {
        Feature::ALL
            .into_iter()
            .find(|f| f.drop_identifier() == Some(id))
    }
}

impl std::fmt::Display for Feature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Minimum control-plane version per feature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Thresholds {
    pub partitionable_devices: Version,
    pub consumable_capacity: Version,
    pub separated_counters: Version,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            partitionable_devices: Version::new(1, 33, 0),
            consumable_capacity: Version::new(1, 34, 0),
            separated_counters: Version::new(1, 35, 0),
        }
    }
}

impl Thresholds {
    /// Defaults with any configured overrides applied.
    pub fn from_config(config: Option<&ThresholdsConfig>) -> GateResult<Self> {
        let mut thresholds = Self::default();
        let Some(config) = config else {
            return Ok(thresholds);
        };

        let overrides = [
            (Feature::PartitionableDevices, &config.partitionable_devices),
            (Feature::ConsumableCapacity, &config.consumable_capacity),
            (Feature::SeparatedCounters, &config.separated_counters),
        ];
        for (feature, value) in overrides {
            if let Some(raw) = value {
                let version = parse_version(raw).map_err(|_| GateError::InvalidThreshold {
                    feature: feature.name(),
                    value: raw.clone(),
                })?;
                *thresholds.slot_mut(feature) = version;
            }
        }
        Ok(thresholds)
    }

    pub fn minimum(&self, feature: Feature) -> &Version {
        match feature {
            Feature::PartitionableDevices => &self.partitionable_devices,
            Feature::ConsumableCapacity => &self.consumable_capacity,
            Feature::SeparatedCounters => &self.separated_counters,
        }
    }

    fn slot_mut(&mut self, feature: Feature) -> &mut Version {
        match feature {
            Feature::PartitionableDevices => &mut self.partitionable_devices,
            Feature::ConsumableCapacity => &mut self.consumable_capacity,
            Feature::SeparatedCounters => &mut self.separated_counters,
        }
    }

    pub fn supports(&self, version: &Version, feature: Feature) -> bool {
        version >= self.minimum(feature)
    }
}

/// Parse a control-plane version string into `major.minor.patch`.
///
/// Accepts a leading `v`, vendor suffixes (`1.33.2-gke.100`, `1.34+`)
/// and a missing patch component. Pre-release and build metadata are
/// discarded so that `1.33.0-rc.1` compares equal to `1.33.0`.
pub fn parse_version(raw: &str) -> GateResult<Version> {
    let trimmed = raw.trim();
    let stripped = trimmed.strip_prefix('v').unwrap_or(trimmed);

    if let Ok(v) = Version::parse(stripped) {
        return Ok(Version::new(v.major, v.minor, v.patch));
    }

    let numeric_end = stripped
        .find(|c: char| !c.is_ascii_digit() && c != '.')
        .unwrap_or(stripped.len());
    let mut parts = stripped[..numeric_end]
        .split('.')
        .filter(|p| !p.is_empty())
        .map(str::parse::<u64>);

    let invalid = || GateError::InvalidVersion(raw.to_string());
    let major = parts.next().ok_or_else(invalid)?.map_err(|_| invalid())?;
    let minor = parts.next().ok_or_else(invalid)?.map_err(|_| invalid())?;
    let patch = match parts.next() {
        Some(p) => p.map_err(|_| invalid())?,
        None => 0,
    };
    Ok(Version::new(major, minor, patch))
}
