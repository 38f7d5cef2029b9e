//! Login and end-to-end encrypted sharing through the swapenv relay.
//!
//! - Device-code login with a locally stored bearer credential
//! - Ephemeral X25519 key agreement and AES-256-GCM sealed frames
//! - Sender/receiver pairing over a WebSocket relay

pub mod auth;
pub mod channel;
pub mod client;
pub mod credentials;
pub mod crypto;
pub mod models;
pub mod pairing;

pub use auth::{login, logout, require_credentials, AuthError, DeviceAuthorizer, LoginOutcome};
pub use channel::{Frame, RelayChannel, WsChannel, RECEIVE_PATH, SHARE_PATH};
pub use client::HttpDeviceClient;
pub use credentials::{CredentialStore, Credentials};
pub use crypto::{CryptoError, EphemeralKeyPair};
pub use models::{ControlMessage, SharePayload};
pub use pairing::{
    collect_share, receive, share, store_received, ReceivedProject, SessionEvent, ShareSelection,
};
