//! Content fingerprint of a rendered pool.

use sha2::{Digest, Sha256};

use partgrid_resource::ResourceSlice;

/// Hex SHA-256 of the slices with their generation numbers zeroed.
///
/// Two renders of the same inventory produce the same fingerprint no
/// matter which generation they were stamped with.
pub fn fingerprint(slices: &[ResourceSlice]) -> Result<String, serde_json::Error> {
    let mut hasher = Sha256::new();
    for slice in slices {
        let mut normalized = slice.clone();
        normalized.spec.pool.generation = 0;
        hasher.update(serde_json::to_vec(&normalized)?);
        hasher.update(b"\n");
    }
    Ok(hex::encode(hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use partgrid_resource::{ObjectMeta, ResourcePool, ResourceSliceSpec};

    use super::*;

    fn slice(generation: i64, driver: &str) -> ResourceSlice {
        ResourceSlice {
            metadata: ObjectMeta {
                name: "node-a".into(),
                ..ObjectMeta::default()
            },
            spec: ResourceSliceSpec {
                driver: driver.into(),
                pool: ResourcePool {
                    name: "node-a".into(),
                    generation,
                    resource_slice_count: 1,
                },
                node_name: Some("node-a".into()),
                devices: Vec::new(),
                shared_counters: Vec::new(),
            },
        }
    }

    #[test]
    fn ignores_generation() {
        let a = fingerprint(&[slice(1, "gpu.partgrid.io")]).unwrap();
        let b = fingerprint(&[slice(7, "gpu.partgrid.io")]).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn content_changes_fingerprint() {
        let a = fingerprint(&[slice(1, "gpu.partgrid.io")]).unwrap();
        let b = fingerprint(&[slice(1, "other.partgrid.io")]).unwrap();
        assert_ne!(a, b);
    }
}
