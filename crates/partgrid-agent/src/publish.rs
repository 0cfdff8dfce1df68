//! Publishing rendered pools.

use std::path::PathBuf;

use anyhow::Context;
use tracing::debug;

use partgrid_gates::PublishError;
use partgrid_resource::ResourceSlice;

/// Delivers a pool's slices to the control plane.
///
/// A publish replaces the pool's previous slices as a whole. Returning
/// an error must leave the previous publication in place.
pub trait Publisher: Send + Sync {
    fn publish(&self, pool: &str, slices: &[ResourceSlice]) -> Result<(), PublishError>;
}

/// Writes each pool to `<dir>/<pool>.json`.
///
/// The file is written beside its destination and renamed into place,
/// so readers never observe a partial pool.
#[derive(Debug, Clone)]
pub struct FilePublisher {
    dir: PathBuf,
}

impl FilePublisher {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path_for(&self, pool: &str) -> PathBuf {
        self.dir.join(format!("{pool}.json"))
    }

    fn write(&self, pool: &str, slices: &[ResourceSlice]) -> anyhow::Result<PathBuf> {
        std::fs::create_dir_all(&self.dir)
            .with_context(|| format!("creating {}", self.dir.display()))?;
        let path = self.path_for(pool);
        let tmp = self.dir.join(format!(".{pool}.json.tmp"));
        let body = serde_json::to_vec_pretty(slices)?;
        std::fs::write(&tmp, body).with_context(|| format!("writing {}", tmp.display()))?;
        std::fs::rename(&tmp, &path)
            .with_context(|| format!("renaming into {}", path.display()))?;
        Ok(path)
    }
}

impl Publisher for FilePublisher {
    fn publish(&self, pool: &str, slices: &[ResourceSlice]) -> Result<(), PublishError> {
        let path = self.write(pool, slices)?;
        debug!(pool, path = %path.display(), slices = slices.len(), "pool written");
        Ok(())
    }
}
