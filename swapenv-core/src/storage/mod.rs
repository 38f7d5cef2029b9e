//! Storage layer: the project registry and the versioned snapshot store.
//!
//! Both are plain JSON files under the base directory, rewritten whole on
//! every mutation. There is no cross-process locking; two invocations racing
//! on the same file can drop one writer's update.

pub mod models;
pub mod registry;
pub mod versions;

pub use models::{
    is_reserved_environment, EnvValue, Environment, RegistryEntry, Snapshot, METADATA_FIELDS,
};
pub use registry::{Registry, LATEST_TOKEN};
pub use versions::VersionedStore;
