//! swapenv core library
//!
//! Keeps several named sets of environment variables per local project,
//! stores every load as an immutable numbered snapshot, and moves a snapshot
//! between devices through an untrusted relay with end-to-end encryption.

pub mod config;
pub mod dotenv;
pub mod merge;
pub mod platform;
pub mod project;
pub mod storage;
pub mod sync;

pub use config::{Settings, StoreConfig};
pub use merge::{merge, ConflictPriority, MergeConfig};
pub use project::ProjectContext;
pub use storage::{EnvValue, Environment, Registry, RegistryEntry, Snapshot, VersionedStore};
pub use sync::{AuthError, CryptoError, Credentials, CredentialStore};

use thiserror::Error;

/// Result type for swapenv operations
pub type Result<T> = std::result::Result<T, SwapenvError>;

/// General error type for swapenv operations
#[derive(Error, Debug)]
pub enum SwapenvError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Protocol violation: {0}")]
    Protocol(String),

    #[error("Relay error: {0}")]
    Relay(String),

    #[error("Crypto error: {0}")]
    Crypto(#[from] sync::CryptoError),

    #[error("Auth error: {0}")]
    Auth(#[from] sync::AuthError),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<serde_json::Error> for SwapenvError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}
