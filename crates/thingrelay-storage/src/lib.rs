//! Persistence for ThingRelay.
//!
//! Repositories are typed [`Collection`]s over a [`StorageBackend`]: redb for
//! deployments, an in-memory map for tests and `:memory:` configs.

pub mod backend;
pub mod collection;
pub mod error;
pub mod memory;
pub mod redb;

use std::sync::Arc;

use thingrelay_core::config::StorageConfig;

pub use backend::StorageBackend;
pub use collection::Collection;
pub use error::{Error, Result};
pub use memory::MemoryBackend;
pub use self::redb::{RedbBackend, RedbBackendConfig};

pub type SharedBackend = Arc<dyn StorageBackend>;

/// Open the backend named by the storage section.
pub fn open_backend(config: &StorageConfig) -> Result<SharedBackend> {
    if config.is_memory() {
        return Ok(Arc::new(MemoryBackend::new()));
    }
    Ok(Arc::new(RedbBackend::new(RedbBackendConfig::new(
        config.path.clone(),
    ))?))
}
