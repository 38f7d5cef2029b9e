//! Sender and receiver sides of an encrypted transfer through the relay.
//!
//! The relay pairs one sender with one receiver by session code and forwards
//! frames between them. It only ever sees public keys and sealed frames.
//!
//! Sender: `connecting -> waiting(code) -> awaiting-peer-key -> sending -> done`
//!
//! Receiver: `connecting -> (choosing) -> key-exchange -> awaiting-payload -> done`

use crate::platform::current_owner;
use crate::storage::{is_reserved_environment, Registry, RegistryEntry, Snapshot};
use crate::sync::channel::{Frame, RelayChannel};
use crate::sync::crypto::{parse_public_key, seal, EphemeralKeyPair, MIN_FRAME_LEN};
use crate::sync::models::{ChoiceReply, ControlMessage, SharePayload};
use crate::{Result, SwapenvError};
use base64::{engine::general_purpose::STANDARD, Engine};
use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, info};
use x25519_dalek::PublicKey;

/// Progress notifications for the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// The relay registered the sender under `code`.
    Waiting { code: String },
    /// The receiver is paired with sender `code`.
    Connected { code: String },
    /// A receiver joined and sent its key.
    PeerJoined,
    /// The sealed payload was handed to the relay.
    Sent,
    /// The sealed payload arrived and is being decrypted.
    PayloadReceived,
}

#[derive(Debug)]
enum SenderState {
    Connecting,
    Waiting,
    AwaitingPeerKey,
    Sending(PublicKey),
    Done,
}

/// Run the sender side until the payload has been sent.
pub async fn share<C, E>(channel: &mut C, payload: &SharePayload, mut on_event: E) -> Result<()>
where
    C: RelayChannel + ?Sized,
    E: FnMut(SessionEvent),
{
    let plaintext = payload.encode()?;
    let mut state = SenderState::Connecting;

    loop {
        debug!("Sender state: {:?}", state);
        state = match state {
            SenderState::Connecting | SenderState::Waiting => {
                match next_control(channel).await? {
                    ControlMessage::Waiting { code } => {
                        on_event(SessionEvent::Waiting { code });
                        SenderState::Waiting
                    }
                    ControlMessage::Ready { .. } => SenderState::AwaitingPeerKey,
                    ControlMessage::Error { message } => return Err(SwapenvError::Relay(message)),
                    other => return Err(unexpected(&other)),
                }
            }
            SenderState::AwaitingPeerKey => {
                let key = match next_frame(channel).await? {
                    Frame::Binary(key) => key,
                    Frame::Text(text) => {
                        return Err(match ControlMessage::parse(&text)? {
                            ControlMessage::Error { message } => SwapenvError::Relay(message),
                            other => unexpected(&other),
                        })
                    }
                };
                on_event(SessionEvent::PeerJoined);
                SenderState::Sending(parse_public_key(&key)?)
            }
            SenderState::Sending(recipient) => {
                let sealed = seal(&plaintext, &recipient)?;
                channel.send(Frame::Text(STANDARD.encode(sealed))).await?;
                on_event(SessionEvent::Sent);
                SenderState::Done
            }
            SenderState::Done => {
                info!("Shared '{}'", payload.project_name);
                return Ok(());
            }
        };
    }
}

enum ReceiverState {
    Connecting,
    Choosing(Vec<String>),
    AwaitingConnected,
    KeyExchange,
    AwaitingPayload(EphemeralKeyPair),
}

/// Run the receiver side until a payload has been decrypted.
///
/// When several senders are waiting, `choose` is shown their codes and
/// returns the index of the one to pair with.
pub async fn receive<C, F, E>(channel: &mut C, mut choose: F, mut on_event: E) -> Result<SharePayload>
where
    C: RelayChannel + ?Sized,
    F: FnMut(&[String]) -> Result<usize>,
    E: FnMut(SessionEvent),
{
    let mut state = ReceiverState::Connecting;

    loop {
        state = match state {
            ReceiverState::Connecting => match next_control(channel).await? {
                ControlMessage::Choose { codes } => ReceiverState::Choosing(codes),
                ControlMessage::Connected { code } => {
                    on_event(SessionEvent::Connected { code });
                    ReceiverState::KeyExchange
                }
                ControlMessage::Error { message } => return Err(SwapenvError::Relay(message)),
                other => return Err(unexpected(&other)),
            },
            ReceiverState::Choosing(codes) => {
                if codes.is_empty() {
                    return Err(SwapenvError::Protocol(
                        "Relay offered no streams to choose from".to_string(),
                    ));
                }
                let index = choose(&codes)?;
                let code = codes.get(index).cloned().ok_or_else(|| {
                    SwapenvError::InvalidInput(format!(
                        "Choice {} out of range (1-{})",
                        index + 1,
                        codes.len()
                    ))
                })?;
                let reply = serde_json::to_string(&ChoiceReply { code })?;
                channel.send(Frame::Text(reply)).await?;
                ReceiverState::AwaitingConnected
            }
            ReceiverState::AwaitingConnected => match next_control(channel).await? {
                ControlMessage::Connected { code } => {
                    on_event(SessionEvent::Connected { code });
                    ReceiverState::KeyExchange
                }
                ControlMessage::Error { message } => return Err(SwapenvError::Relay(message)),
                other => {
                    debug!("Ignoring '{}' while waiting for connection", other.kind());
                    ReceiverState::AwaitingConnected
                }
            },
            ReceiverState::KeyExchange => {
                let keys = EphemeralKeyPair::generate();
                channel
                    .send(Frame::Binary(keys.public_bytes().to_vec()))
                    .await?;
                ReceiverState::AwaitingPayload(keys)
            }
            ReceiverState::AwaitingPayload(keys) => {
                let frame = next_frame(channel).await?;
                on_event(SessionEvent::PayloadReceived);
                let sealed = decode_sealed_frame(frame)?;
                let plaintext = keys.open(&sealed)?;
                let payload = SharePayload::decode(&plaintext)?;
                info!(
                    "Received '{}' with {} environment(s)",
                    payload.project_name,
                    payload.environments.len()
                );
                return Ok(payload);
            }
        };
    }
}

fn decode_sealed_frame(frame: Frame) -> Result<Vec<u8>> {
    let encoded = match frame {
        Frame::Text(text) => {
            if let Ok(ControlMessage::Error { message }) = ControlMessage::parse(&text) {
                return Err(SwapenvError::Relay(message));
            }
            text.trim().as_bytes().to_vec()
        }
        Frame::Binary(data) => data,
    };

    let sealed = STANDARD
        .decode(&encoded)
        .map_err(|e| SwapenvError::Protocol(format!("Invalid payload encoding: {}", e)))?;

    if sealed.len() < MIN_FRAME_LEN {
        return Err(SwapenvError::Protocol(format!(
            "Payload frame too short: {} bytes, need at least {}",
            sealed.len(),
            MIN_FRAME_LEN
        )));
    }
    Ok(sealed)
}

async fn next_frame<C: RelayChannel + ?Sized>(channel: &mut C) -> Result<Frame> {
    channel
        .recv()
        .await?
        .ok_or_else(|| SwapenvError::Relay("Relay closed the connection".to_string()))
}

async fn next_control<C: RelayChannel + ?Sized>(channel: &mut C) -> Result<ControlMessage> {
    match next_frame(channel).await? {
        Frame::Text(text) => ControlMessage::parse(&text),
        Frame::Binary(data) => Err(SwapenvError::Protocol(format!(
            "Expected a control frame, got {} binary bytes",
            data.len()
        ))),
    }
}

fn unexpected(message: &ControlMessage) -> SwapenvError {
    SwapenvError::Protocol(format!("Unexpected message: {}", message.kind()))
}

/// The snapshot selected for sharing.
#[derive(Debug, Clone)]
pub struct ShareSelection {
    pub payload: SharePayload,
    pub version: u32,
}

/// Read the environments to share from a project's version.
///
/// `env` picks one environment; `None` shares all of them.
pub fn collect_share(
    registry: &Registry,
    project_name: &str,
    env: Option<&str>,
    version_token: &str,
) -> Result<ShareSelection> {
    if registry.find_by_name(project_name)?.is_none() {
        return Err(SwapenvError::NotFound(format!(
            "Project '{}' not found",
            project_name
        )));
    }
    registry.migrate_if_needed(project_name)?;

    let version = registry.resolve_version(project_name, version_token)?;
    let store = registry.store();
    let path = store.version_file_path(project_name, version)?;
    let mut names = store.list_environments(&path)?;
    if names.is_empty() {
        return Err(SwapenvError::NotFound(
            "No environments found in project".to_string(),
        ));
    }

    if let Some(env) = env {
        if !names.iter().any(|n| n == env) {
            return Err(SwapenvError::NotFound(format!(
                "Environment '{}' not found, available: {}",
                env,
                names.join(", ")
            )));
        }
        names = vec![env.to_string()];
    }

    let mut environments = BTreeMap::new();
    for name in names {
        let values = store.read_environment(&path, &name)?;
        environments.insert(name, values);
    }

    Ok(ShareSelection {
        payload: SharePayload {
            project_name: project_name.to_string(),
            environments,
        },
        version,
    })
}

/// Where a received payload was stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedProject {
    pub project_name: String,
    pub version: u32,
    /// True when the project did not exist locally before.
    pub created: bool,
}

/// Store a received payload as a new version.
///
/// An unknown project gets a registry entry without a local path, to be
/// bound later with `map`. For a known project the received environments
/// replace their namesakes in the current version and the rest carry over.
pub fn store_received(
    registry: &Registry,
    payload: SharePayload,
    max_versions: usize,
) -> Result<ReceivedProject> {
    check_project_name(&payload.project_name)?;
    if let Some(env) = payload
        .environments
        .keys()
        .find(|name| is_reserved_environment(name))
    {
        return Err(SwapenvError::Protocol(format!(
            "Received environment name '{}' is reserved",
            env
        )));
    }
    let project_name = payload.project_name;
    let store = registry.store();

    let (created, local_directory, mut environments) = match registry.find_by_name(&project_name)? {
        None => {
            registry.upsert(RegistryEntry::new(project_name.clone(), PathBuf::new()))?;
            (true, String::new(), BTreeMap::new())
        }
        Some(entry) => {
            registry.migrate_if_needed(&project_name)?;
            let current = registry.resolve_version(&project_name, "")?;
            let path = store.version_file_path(&project_name, current.max(1))?;
            let existing = if path.is_file() {
                store.read_snapshot(&path)?.environments
            } else {
                BTreeMap::new()
            };
            (
                false,
                entry.local_path.to_string_lossy().into_owned(),
                existing,
            )
        }
    };

    environments.extend(payload.environments);

    let encoded =
        Snapshot::new(&project_name, current_owner(), local_directory, environments).to_json()?;
    let version = registry.bump_version(&project_name)?;
    store.write_encoded_version(&project_name, version, &encoded)?;
    registry.prune_versions(&project_name, max_versions)?;

    info!("Stored received '{}' as v{}", project_name, version);
    Ok(ReceivedProject {
        project_name,
        version,
        created,
    })
}

/// A received name becomes a directory under the base dir, so it must stay
/// a plain relative path.
fn check_project_name(name: &str) -> Result<()> {
    let path = Path::new(name);
    let plain = !name.is_empty()
        && path
            .components()
            .all(|c| matches!(c, Component::Normal(_)));
    if plain {
        Ok(())
    } else {
        Err(SwapenvError::Protocol(format!(
            "Refusing received project name {:?}",
            name
        )))
    }
}
