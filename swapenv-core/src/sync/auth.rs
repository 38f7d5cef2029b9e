//! Device-code login: request a code, let the user approve it in a browser,
//! poll until the server hands out a bearer credential.

use crate::sync::credentials::{CredentialStore, Credentials};
use crate::{Result, SwapenvError};
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Added to the polling interval each time the server asks us to slow down.
pub const SLOW_DOWN_INCREMENT: Duration = Duration::from_secs(5);

/// Authentication errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("Login timed out before the code was approved")]
    Timeout,

    #[error("Server rejected the request: {0}")]
    Rejected(String),

    #[error("Request failed: {0}")]
    Transport(String),

    #[error("Invalid server response: {0}")]
    InvalidResponse(String),
}

/// Response of the code-request endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DeviceCode {
    pub device_code: String,
    pub user_code: String,
    pub verification_uri: String,
    /// Seconds until the code expires.
    pub expires_in: u64,
    /// Seconds to wait between polls.
    pub interval: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    Pending,
    SlowDown,
    Authorized(Credentials),
}

/// The two calls of the device-code flow.
#[async_trait]
pub trait DeviceAuthorizer: Send + Sync {
    async fn request_code(&self) -> std::result::Result<DeviceCode, AuthError>;

    async fn poll_once(&self, device_code: &str) -> std::result::Result<PollOutcome, AuthError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoginOutcome {
    AlreadyLoggedIn,
    LoggedIn(Credentials),
}

/// Run the device-code flow unless valid credentials are already stored.
///
/// `on_code` is called once with the code so the caller can show the
/// verification URI and user code. Any failure removes the credential file
/// before it is returned.
pub async fn login<A, F>(
    authorizer: &A,
    store: &CredentialStore,
    on_code: F,
) -> Result<LoginOutcome>
where
    A: DeviceAuthorizer + ?Sized,
    F: FnOnce(&DeviceCode),
{
    match store.valid() {
        Ok(Some(_)) => return Ok(LoginOutcome::AlreadyLoggedIn),
        Ok(None) => {}
        Err(e) => warn!("Ignoring unreadable credentials: {}", e),
    }

    match run_device_flow(authorizer, store, on_code).await {
        Ok(credentials) => {
            info!("Logged in as {}", credentials.user_id);
            Ok(LoginOutcome::LoggedIn(credentials))
        }
        Err(e) => {
            store.discard();
            Err(e)
        }
    }
}

async fn run_device_flow<A, F>(
    authorizer: &A,
    store: &CredentialStore,
    on_code: F,
) -> Result<Credentials>
where
    A: DeviceAuthorizer + ?Sized,
    F: FnOnce(&DeviceCode),
{
    let code = authorizer.request_code().await?;
    on_code(&code);

    let deadline = Instant::now() + Duration::from_secs(code.expires_in);
    let mut interval = Duration::from_secs(code.interval.max(1));

    loop {
        if tokio::time::timeout_at(deadline, tokio::time::sleep(interval))
            .await
            .is_err()
        {
            return Err(AuthError::Timeout.into());
        }

        match authorizer.poll_once(&code.device_code).await? {
            PollOutcome::Pending => debug!("Authorization pending"),
            PollOutcome::SlowDown => {
                interval += SLOW_DOWN_INCREMENT;
                debug!("Server asked to slow down, polling every {:?}", interval);
            }
            PollOutcome::Authorized(credentials) => {
                store.save(&credentials)?;
                return Ok(credentials);
            }
        }
    }
}

/// Forget the stored credential. Logging out twice is not an error.
pub fn logout(store: &CredentialStore) -> Result<bool> {
    let removed = store.delete()?;
    if removed {
        info!("Logged out");
    }
    Ok(removed)
}

/// Valid credentials, or an error telling the user to log in.
pub fn require_credentials(store: &CredentialStore) -> Result<Credentials> {
    store
        .valid()?
        .ok_or_else(|| SwapenvError::Auth(AuthError::Rejected("not logged in".to_string())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    struct ScriptedAuthorizer {
        code: DeviceCode,
        replies: Mutex<VecDeque<std::result::Result<PollOutcome, AuthError>>>,
        polled_at: Mutex<Vec<Instant>>,
    }

    impl ScriptedAuthorizer {
        fn new(
            expires_in: u64,
            interval: u64,
            replies: Vec<std::result::Result<PollOutcome, AuthError>>,
        ) -> Self {
            Self {
                code: DeviceCode {
                    device_code: "dev-123".to_string(),
                    user_code: "ABCD-EFGH".to_string(),
                    verification_uri: "https://swapenv.sh/device".to_string(),
                    expires_in,
                    interval,
                },
                replies: Mutex::new(replies.into()),
                polled_at: Mutex::new(Vec::new()),
            }
        }

        fn gaps(&self, start: Instant) -> Vec<u64> {
            let polled = self.polled_at.lock().unwrap();
            let mut previous = start;
            polled
                .iter()
                .map(|&at| {
                    let gap = (at - previous).as_secs();
                    previous = at;
                    gap
                })
                .collect()
        }
    }

    #[async_trait]
    impl DeviceAuthorizer for ScriptedAuthorizer {
        async fn request_code(&self) -> std::result::Result<DeviceCode, AuthError> {
            Ok(self.code.clone())
        }

        async fn poll_once(
            &self,
            device_code: &str,
        ) -> std::result::Result<PollOutcome, AuthError> {
            assert_eq!(device_code, "dev-123");
            self.polled_at.lock().unwrap().push(Instant::now());
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Ok(PollOutcome::Pending))
        }
    }

    fn credentials() -> Credentials {
        Credentials {
            token: "tok".to_string(),
            user_id: "u1".to_string(),
            org_id: "o1".to_string(),
            expires_at: i64::MAX,
        }
    }

    fn store() -> (tempfile::TempDir, CredentialStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = CredentialStore::at(dir.path().join("credentials.json"));
        (dir, store)
    }

    #[tokio::test(start_paused = true)]
    async fn login_persists_credentials() {
        let (_dir, store) = store();
        let auth = ScriptedAuthorizer::new(
            60,
            2,
            vec![
                Ok(PollOutcome::Pending),
                Ok(PollOutcome::Authorized(credentials())),
            ],
        );

        let mut shown = None;
        let start = Instant::now();
        let outcome = login(&auth, &store, |code| shown = Some(code.user_code.clone()))
            .await
            .unwrap();

        assert_eq!(outcome, LoginOutcome::LoggedIn(credentials()));
        assert_eq!(shown.as_deref(), Some("ABCD-EFGH"));
        assert_eq!(auth.gaps(start), vec![2, 2]);
        assert_eq!(store.valid().unwrap(), Some(credentials()));
    }

    #[tokio::test(start_paused = true)]
    async fn slow_down_increases_interval() {
        let (_dir, store) = store();
        let auth = ScriptedAuthorizer::new(
            120,
            1,
            vec![
                Ok(PollOutcome::SlowDown),
                Ok(PollOutcome::SlowDown),
                Ok(PollOutcome::Pending),
                Ok(PollOutcome::Authorized(credentials())),
            ],
        );

        let start = Instant::now();
        login(&auth, &store, |_| {}).await.unwrap();
        assert_eq!(auth.gaps(start), vec![1, 6, 11, 11]);
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_elapses() {
        let (_dir, store) = store();
        let mut expired = credentials();
        expired.expires_at = 0;
        store.save(&expired).unwrap();
        let auth = ScriptedAuthorizer::new(10, 3, Vec::new());

        let err = login(&auth, &store, |_| {}).await.unwrap_err();
        assert!(matches!(err, SwapenvError::Auth(AuthError::Timeout)));
        assert_eq!(auth.polled_at.lock().unwrap().len(), 3);
        assert!(!store.path().exists());
    }

    #[tokio::test(start_paused = true)]
    async fn poll_error_is_fatal() {
        let (_dir, store) = store();
        let auth = ScriptedAuthorizer::new(
            60,
            1,
            vec![Err(AuthError::Rejected("server returned 403".to_string()))],
        );

        let err = login(&auth, &store, |_| {}).await.unwrap_err();
        assert!(matches!(err, SwapenvError::Auth(AuthError::Rejected(_))));
        assert_eq!(auth.polled_at.lock().unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn valid_credentials_skip_flow() {
        let (_dir, store) = store();
        store.save(&credentials()).unwrap();
        let auth = ScriptedAuthorizer::new(60, 1, Vec::new());

        let outcome = login(&auth, &store, |_| panic!("no code expected"))
            .await
            .unwrap();
        assert_eq!(outcome, LoginOutcome::AlreadyLoggedIn);
        assert!(auth.polled_at.lock().unwrap().is_empty());
    }

    #[test]
    fn logout_is_idempotent() {
        let (_dir, store) = store();
        store.save(&credentials()).unwrap();
        assert!(logout(&store).unwrap());
        assert!(!logout(&store).unwrap());
        assert!(matches!(
            require_credentials(&store),
            Err(SwapenvError::Auth(_))
        ));
    }
}
