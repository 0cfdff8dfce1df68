use thiserror::Error;

use partgrid_resource::RenderError;

#[derive(Debug, Error)]
pub enum AllocError {
    #[error("claim {claim} has no allocation")]
    NoAllocation { claim: String },

    #[error("claim {claim} has no allocation for driver {driver}")]
    NoAllocationForDriver { claim: String, driver: String },

    #[error("claim {claim}: pool {pool} not found in inventory (device {device})")]
    PoolNotFound {
        claim: String,
        pool: String,
        device: String,
    },

    #[error("claim {claim}: device {device} not found in pool {pool}")]
    DeviceNotFound {
        claim: String,
        pool: String,
        device: String,
    },

    #[error("claim {claim}: device {device}: {source}")]
    Attribute {
        claim: String,
        device: String,
        #[source]
        source: RenderError,
    },
}

pub type AllocResult<T> = Result<T, AllocError>;
