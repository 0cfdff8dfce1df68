//! GPU capability descriptors.
//!
//! A descriptor is static data about one physical GPU: its identity,
//! memory, and (when the hardware supports partitioning) the catalog of
//! partition profiles with their per-profile resource shares.

use serde::{Deserialize, Serialize};

use part_core::{CounterUnit, HardwareRef};

use crate::error::{PlacementError, PlacementResult};

/// Static description of a physical GPU.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GpuCapability {
    /// Stable node-local name, e.g. `gpu-0`.
    pub name: String,
    /// PCI bus address, e.g. `0000:3b:00.0`.
    pub address: String,
    #[serde(default)]
    pub uuid: Option<String>,
    pub product_name: String,
    pub memory_mib: i64,
    #[serde(default)]
    pub partitioning: Option<PartitionCapability>,
}

/// Partitioning support as reported for a GPU.
///
/// The sub-fields are optional on the wire so that inconsistent data
/// (support asserted, catalog missing) can be told apart from a GPU that
/// simply does not partition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartitionCapability {
    pub supported: bool,
    #[serde(default)]
    pub total_slices: Option<u32>,
    #[serde(default)]
    pub profiles: Option<Vec<ProfileDescriptor>>,
}

/// One partition profile and the resources each instance of it holds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileDescriptor {
    pub id: u32,
    /// Human-readable profile name, e.g. `1g.10gb`.
    pub name: String,
    pub memory_mib: i64,
    pub slice_count: u32,
    #[serde(default)]
    pub multiprocessors: i64,
    #[serde(default)]
    pub copy_engines: i64,
    #[serde(default)]
    pub decoders: i64,
    #[serde(default)]
    pub encoders: i64,
    #[serde(default)]
    pub jpeg_engines: i64,
    #[serde(default)]
    pub ofa_engines: i64,
    /// Upper bound on concurrent instances of this profile.
    #[serde(default)]
    pub max_instances: u32,
}

/// A resource tracked by a shared counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ResourceKind {
    Memory,
    Multiprocessors,
    CopyEngines,
    Decoders,
    Encoders,
    JpegEngines,
    OfaEngines,
}

impl ResourceKind {
    pub const ALL: [ResourceKind; 7] = [
        ResourceKind::Memory,
        ResourceKind::Multiprocessors,
        ResourceKind::CopyEngines,
        ResourceKind::Decoders,
        ResourceKind::Encoders,
        ResourceKind::JpegEngines,
        ResourceKind::OfaEngines,
    ];

    pub fn counter_name(self) -> &'static str {
        match self {
            ResourceKind::Memory => "memory",
            ResourceKind::Multiprocessors => "multiprocessors",
            ResourceKind::CopyEngines => "copy-engines",
            ResourceKind::Decoders => "decoders",
            ResourceKind::Encoders => "encoders",
            ResourceKind::JpegEngines => "jpeg-engines",
            ResourceKind::OfaEngines => "ofa-engines",
        }
    }

    pub fn unit(self) -> CounterUnit {
        match self {
            ResourceKind::Memory => CounterUnit::MiB,
            _ => CounterUnit::Count,
        }
    }
}

impl ProfileDescriptor {
    /// Per-instance quantity of a resource.
    pub fn quantity(&self, kind: ResourceKind) -> i64 {
        match kind {
            ResourceKind::Memory => self.memory_mib,
            ResourceKind::Multiprocessors => self.multiprocessors,
            ResourceKind::CopyEngines => self.copy_engines,
            ResourceKind::Decoders => self.decoders,
            ResourceKind::Encoders => self.encoders,
            ResourceKind::JpegEngines => self.jpeg_engines,
            ResourceKind::OfaEngines => self.ofa_engines,
        }
    }

    /// Profiles without memory or slices cannot be placed.
    pub fn is_placeable(&self) -> bool {
        self.memory_mib > 0 && self.slice_count > 0
    }
}

/// A validated view of a partition-capable GPU.
#[derive(Debug, Clone, Copy)]
pub struct PartitionProfiles<'a> {
    pub total_slices: u32,
    pub profiles: &'a [ProfileDescriptor],
}

impl PartitionProfiles<'_> {
    /// Profiles worth asking the backend about.
    pub fn placeable(&self) -> impl Iterator<Item = &ProfileDescriptor> {
        self.profiles.iter().filter(|p| p.is_placeable())
    }

    pub fn profile_ids(&self) -> Vec<u32> {
        let mut ids: Vec<u32> = self.placeable().map(|p| p.id).collect();
        ids.sort_unstable();
        ids.dedup();
        ids
    }
}

impl GpuCapability {
    pub fn hardware_ref(&self) -> HardwareRef {
        HardwareRef {
            name: self.name.clone(),
            address: self.address.clone(),
        }
    }

    /// Validated partition catalog.
    ///
    /// `Ok(None)` when the GPU carries no partitioning data or reports it
    /// unsupported. Asserted support with missing sub-fields is an error.
    pub fn partition_profiles(&self) -> PlacementResult<Option<PartitionProfiles<'_>>> {
        let Some(partitioning) = &self.partitioning else {
            return Ok(None);
        };
        if !partitioning.supported {
            return Ok(None);
        }

        let total_slices = partitioning.total_slices.ok_or_else(|| {
            PlacementError::InconsistentCapability {
                address: self.address.clone(),
                reason: "partitioning supported but total slice count missing".into(),
            }
        })?;
        let profiles = partitioning.profiles.as_deref().ok_or_else(|| {
            PlacementError::InconsistentCapability {
                address: self.address.clone(),
                reason: "partitioning supported but profile catalog missing".into(),
            }
        })?;

        Ok(Some(PartitionProfiles {
            total_slices,
            profiles,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile(id: u32, memory_mib: i64, slice_count: u32, max_instances: u32) -> ProfileDescriptor {
        ProfileDescriptor {
            id,
            name: format!("{slice_count}g.{}gb", memory_mib / 1024),
            memory_mib,
            slice_count,
            multiprocessors: 14 * i64::from(slice_count),
            copy_engines: 1,
            decoders: 0,
            encoders: 0,
            jpeg_engines: 0,
            ofa_engines: 0,
            max_instances,
        }
    }

    fn gpu(partitioning: Option<PartitionCapability>) -> GpuCapability {
        GpuCapability {
            name: "gpu-0".into(),
            address: "0000:3b:00.0".into(),
            uuid: None,
            product_name: "A100-SXM4-80GB".into(),
            memory_mib: 81920,
            partitioning,
        }
    }

    #[test]
    fn no_partitioning_data_is_not_an_error() {
        assert!(gpu(None).partition_profiles().unwrap().is_none());
    }

    #[test]
    fn unsupported_partitioning_is_not_an_error() {
        let cap = gpu(Some(PartitionCapability {
            supported: false,
            total_slices: None,
            profiles: None,
        }));
        assert!(cap.partition_profiles().unwrap().is_none());
    }

    #[test]
    fn supported_without_catalog_is_inconsistent() {
        let cap = gpu(Some(PartitionCapability {
            supported: true,
            total_slices: Some(7),
            profiles: None,
        }));
        assert!(matches!(
            cap.partition_profiles(),
            Err(PlacementError::InconsistentCapability { .. })
        ));
    }

    #[test]
    fn supported_without_slice_count_is_inconsistent() {
        let cap = gpu(Some(PartitionCapability {
            supported: true,
            total_slices: None,
            profiles: Some(vec![profile(19, 10240, 1, 7)]),
        }));
        assert!(matches!(
            cap.partition_profiles(),
            Err(PlacementError::InconsistentCapability { .. })
        ));
    }

    #[test]
    fn profile_ids_skip_unplaceable_profiles() {
        let cap = gpu(Some(PartitionCapability {
            supported: true,
            total_slices: Some(7),
            profiles: Some(vec![
                profile(19, 10240, 1, 7),
                profile(20, 0, 1, 7),
                profile(9, 40960, 0, 1),
                profile(5, 40960, 4, 1),
            ]),
        }));
        let parts = cap.partition_profiles().unwrap().unwrap();
        assert_eq!(parts.profile_ids(), vec![5, 19]);
    }

    #[test]
    fn deserializes_camel_case_descriptor() {
        let json = r#"{
            "name": "gpu-1",
            "address": "0000:86:00.0",
            "productName": "H100",
            "memoryMib": 81920,
            "partitioning": {
                "supported": true,
                "totalSlices": 7,
                "profiles": [
                    {"id": 19, "name": "1g.10gb", "memoryMib": 9856, "sliceCount": 1, "decoders": 1, "maxInstances": 7}
                ]
            }
        }"#;
        let cap: GpuCapability = serde_json::from_str(json).unwrap();
        let parts = cap.partition_profiles().unwrap().unwrap();
        assert_eq!(parts.total_slices, 7);
        assert_eq!(parts.profiles[0].decoders, 1);
        assert_eq!(parts.profiles[0].encoders, 0);
    }
}
