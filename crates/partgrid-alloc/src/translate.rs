//! Claim → prepare request translation.

use std::collections::BTreeMap;

use tracing::{debug, info};

use part_core::{ClaimRef, PrepareDevice, PrepareRequest};
use partgrid_resource::{ResourceClaim, ResourceSlice, parse_device_attributes, wire};

use crate::error::{AllocError, AllocResult};

#[derive(Debug)]
struct IndexedPool<'a> {
    generation: i64,
    devices: BTreeMap<&'a str, &'a wire::Device>,
}

/// Newest advertised generation of each pool owned by one driver on one node.
///
/// Slices sharing a pool and generation are merged. A slice with a
/// generation below the newest one seen for its pool is ignored.
#[derive(Debug, Default)]
pub struct PoolIndex<'a> {
    pools: BTreeMap<&'a str, IndexedPool<'a>>,
}

impl<'a> PoolIndex<'a> {
    pub fn build(inventory: &'a [ResourceSlice], driver: &str, node_name: &str) -> Self {
        let mut pools: BTreeMap<&'a str, IndexedPool<'a>> = BTreeMap::new();

        let ours = inventory.iter().filter(|s| {
            s.spec.driver == driver && s.spec.node_name.as_deref() == Some(node_name)
        });
        for slice in ours {
            let generation = slice.spec.pool.generation;
            let entry = pools
                .entry(slice.spec.pool.name.as_str())
                .or_insert_with(|| IndexedPool {
                    generation,
                    devices: BTreeMap::new(),
                });

            if generation < entry.generation {
                debug!(
                    pool = %slice.spec.pool.name,
                    generation,
                    current = entry.generation,
                    "ignoring stale slice"
                );
                continue;
            }
            if generation > entry.generation {
                entry.generation = generation;
                entry.devices.clear();
            }
            for device in &slice.spec.devices {
                entry.devices.insert(device.name.as_str(), device);
            }
        }

        Self { pools }
    }

    pub fn generation(&self, pool: &str) -> Option<i64> {
        self.pools.get(pool).map(|p| p.generation)
    }

    pub fn device(&self, pool: &str, device: &str) -> Option<Option<&'a wire::Device>> {
        self.pools
            .get(pool)
            .map(|p| p.devices.get(device).copied())
    }
}

fn claim_ref(claim: &ResourceClaim) -> ClaimRef {
    ClaimRef {
        namespace: claim.metadata.namespace.clone().unwrap_or_default(),
        name: claim.metadata.name.clone(),
        uid: claim.metadata.uid.clone().unwrap_or_default(),
    }
}

/// Resolve a claim's grants for `driver` into a prepare request.
///
/// Fails without a partial result if the claim has no grants, none for
/// this driver, or any grant names a pool or device missing from the
/// newest inventory.
pub fn translate(
    claim: &ResourceClaim,
    inventory: &[ResourceSlice],
    driver: &str,
    node_name: &str,
) -> AllocResult<PrepareRequest> {
    let claim_id = claim_ref(claim);
    let results = claim.allocation_results();
    if results.is_empty() {
        return Err(AllocError::NoAllocation {
            claim: claim_id.to_string(),
        });
    }

    let grants: Vec<_> = results.iter().filter(|r| r.driver == driver).collect();
    if grants.is_empty() {
        return Err(AllocError::NoAllocationForDriver {
            claim: claim_id.to_string(),
            driver: driver.to_string(),
        });
    }

    let index = PoolIndex::build(inventory, driver, node_name);

    let devices = grants
        .into_iter()
        .map(|grant| {
            let device = match index.device(&grant.pool, &grant.device) {
                None => {
                    return Err(AllocError::PoolNotFound {
                        claim: claim_id.to_string(),
                        pool: grant.pool.clone(),
                        device: grant.device.clone(),
                    });
                }
                Some(None) => {
                    return Err(AllocError::DeviceNotFound {
                        claim: claim_id.to_string(),
                        pool: grant.pool.clone(),
                        device: grant.device.clone(),
                    });
                }
                Some(Some(device)) => device,
            };

            let attributes =
                parse_device_attributes(device).map_err(|source| AllocError::Attribute {
                    claim: claim_id.to_string(),
                    device: grant.device.clone(),
                    source,
                })?;

            Ok(PrepareDevice {
                request: grant.request.clone(),
                driver: grant.driver.clone(),
                pool: grant.pool.clone(),
                device: grant.device.clone(),
                share_id: grant.share_id.clone().unwrap_or_default(),
                consumed_capacity: grant.consumed_capacity.clone().unwrap_or_default(),
                attributes,
            })
        })
        .collect::<AllocResult<Vec<_>>>()?;

    info!(claim = %claim_id, devices = devices.len(), "claim translated");

    Ok(PrepareRequest {
        claim: claim_id,
        node_name: node_name.to_string(),
        devices,
    })
}
