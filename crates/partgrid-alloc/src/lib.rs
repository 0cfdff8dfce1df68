//! partgrid-alloc — turn a granted claim into a node-local prepare request.
//!
//! The translator reads a snapshot of advertised inventory, keeps the
//! newest generation of each of this node's pools, and resolves every
//! grant for this driver against it. Any grant that cannot be resolved
//! fails the whole claim.

pub mod error;
pub mod translate;

pub use error::{AllocError, AllocResult};
pub use translate::{PoolIndex, translate};
