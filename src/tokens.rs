//! Access tokens and their holder.
//!
//! The [`TokenHolder`] is the single owner of the current access token. Other
//! components observe it through a [`TokenWatch`], which hands out the token
//! value on demand. A device session that asks its watch for every request
//! picks up refreshed tokens without being rebuilt.
//!
//! A token whose expiry has passed is never handed out as valid.

use std::{
    fmt, fs,
    path::Path,
    time::{Duration, SystemTime},
};

use serde::{Deserialize, Serialize};
use serde_with::{serde_as, TimestampSeconds};
use tokio::{sync::watch, time::Instant};
use veil::Redact;

use crate::{
    auth::Authorization,
    error::{Error, ErrorKind, Result},
    protocol::auth::TokenResponse,
};

#[derive(Clone, PartialEq, Eq, Hash, Redact)]
pub struct AccessToken {
    #[redact]
    token: String,
    expires_at: SystemTime,

    /// `expires_at` on the runtime clock, which timers and validity checks
    /// share.
    deadline: Instant,
}

impl AccessToken {
    #[must_use]
    pub fn new(token: impl Into<String>, expires_at: SystemTime) -> Self {
        let time_to_live = expires_at
            .duration_since(SystemTime::now())
            .unwrap_or(Duration::ZERO);
        Self {
            token: token.into(),
            expires_at,
            deadline: Instant::now() + time_to_live,
        }
    }

    /// Creates a token that expires `time_to_live` from now.
    #[must_use]
    pub fn expiring_in(token: impl Into<String>, time_to_live: Duration) -> Self {
        Self {
            token: token.into(),
            expires_at: SystemTime::now() + time_to_live,
            deadline: Instant::now() + time_to_live,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.token
    }

    #[must_use]
    pub fn expires_at(&self) -> SystemTime {
        self.expires_at
    }

    /// The instant at which the token expires.
    #[must_use]
    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    #[must_use]
    pub fn time_to_live(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    #[must_use]
    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.deadline
    }
}

impl fmt::Display for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.token)
    }
}

/// Owner of the current access token and the refresh token.
///
/// Tokens are only ever replaced as a whole.
#[derive(Debug)]
pub struct TokenHolder {
    current: watch::Sender<Option<AccessToken>>,
    refresh_token: Option<String>,
}

impl Default for TokenHolder {
    fn default() -> Self {
        Self::new()
    }
}

impl TokenHolder {
    /// Lifetime assumed when the authorization server does not state one.
    pub const DEFAULT_TIME_TO_LIVE: Duration = Duration::from_secs(3600);

    #[must_use]
    pub fn new() -> Self {
        let (current, _) = watch::channel(None);
        Self {
            current,
            refresh_token: None,
        }
    }

    pub fn set(&mut self, token: AccessToken) {
        debug!(
            "access token valid for {}s",
            token.time_to_live().as_secs()
        );
        self.current.send_replace(Some(token));
    }

    /// Drops the access token and the refresh token.
    pub fn clear(&mut self) {
        self.refresh_token = None;
        if self.current.send_replace(None).is_some() {
            info!("access token cleared");
        }
    }

    /// The current access token, unless it has expired.
    #[must_use]
    pub fn current(&self) -> Option<AccessToken> {
        self.current
            .borrow()
            .as_ref()
            .filter(|token| !token.is_expired())
            .cloned()
    }

    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.current().is_some()
    }

    /// Expiry of the stored access token, also once it has passed.
    #[must_use]
    pub fn deadline(&self) -> Option<Instant> {
        self.current.borrow().as_ref().map(AccessToken::deadline)
    }

    /// When to refresh the access token: `margin` before it expires, or
    /// right away when there is none. The instant does not move as time
    /// passes, so a timer set to it fires even when it is armed repeatedly.
    #[must_use]
    pub fn refresh_due(&self, margin: Duration) -> Instant {
        self.deadline()
            .and_then(|deadline| deadline.checked_sub(margin))
            .unwrap_or_else(Instant::now)
    }

    #[must_use]
    pub fn refresh_token(&self) -> Option<&str> {
        self.refresh_token.as_deref()
    }

    /// Stores the tokens of a successful code exchange or refresh.
    ///
    /// A response without a refresh token keeps the previous one.
    pub fn apply(&mut self, response: TokenResponse) {
        let time_to_live = response.expires_in.unwrap_or(Self::DEFAULT_TIME_TO_LIVE);
        self.set(AccessToken::expiring_in(response.access_token, time_to_live));

        if let Some(refresh_token) = response.refresh_token {
            self.refresh_token = Some(refresh_token);
        }
    }

    /// Trades the refresh token for a new access token.
    ///
    /// When the authorization server rejects the refresh token, all tokens
    /// are cleared so that the user has to log in again. Transport failures
    /// keep the tokens for a later attempt.
    ///
    /// # Errors
    ///
    /// Will return `Err` if there is no refresh token or the refresh failed.
    pub async fn refresh(&mut self, authorization: &Authorization) -> Result<()> {
        let Some(refresh_token) = self.refresh_token.clone() else {
            return Err(Error::unauthenticated("no refresh token available"));
        };

        match authorization.refresh(&refresh_token).await {
            Ok(response) => {
                self.apply(response);
                info!("access token refreshed");
                Ok(())
            }
            Err(e) => {
                error!("refreshing access token failed: {e}");
                if e.kind.is_authorization() || e.kind == ErrorKind::InvalidArgument {
                    self.clear();
                }
                Err(e)
            }
        }
    }

    #[must_use]
    pub fn subscribe(&self) -> TokenWatch {
        TokenWatch(self.current.subscribe())
    }

    /// Snapshot of the tokens for persisting.
    #[must_use]
    pub fn credentials(&self) -> Credentials {
        let current = self.current.borrow();
        Credentials {
            access_token: current.as_ref().map(|token| token.as_str().to_owned()),
            expires_at: current.as_ref().map(AccessToken::expires_at),
            refresh_token: self.refresh_token.clone(),
        }
    }

    /// Restores persisted tokens. An access token that has expired in the
    /// meantime is discarded, its refresh token is kept.
    pub fn restore(&mut self, credentials: Credentials) {
        self.refresh_token = credentials.refresh_token;

        if let (Some(token), Some(expires_at)) = (credentials.access_token, credentials.expires_at)
        {
            let token = AccessToken::new(token, expires_at);
            if token.is_expired() {
                info!("stored access token has expired");
            } else {
                self.set(token);
            }
        }
    }
}

/// Read-only view on the [`TokenHolder`], handed to everything that needs to
/// present the access token.
#[derive(Clone, Debug)]
pub struct TokenWatch(watch::Receiver<Option<AccessToken>>);

impl TokenWatch {
    /// The current access token value, unless it is absent or expired.
    #[must_use]
    pub fn access_token(&self) -> Option<String> {
        self.0
            .borrow()
            .as_ref()
            .filter(|token| !token.is_expired())
            .map(|token| token.as_str().to_owned())
    }

    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.0
            .borrow()
            .as_ref()
            .is_some_and(|token| !token.is_expired())
    }

    /// Expiry of the current token, also once it has passed.
    #[must_use]
    pub fn deadline(&self) -> Option<Instant> {
        self.0.borrow().as_ref().map(AccessToken::deadline)
    }

    /// Marks the current token as seen, so that [`changed`](Self::changed)
    /// only wakes up for later replacements.
    pub fn mark_seen(&mut self) {
        self.0.borrow_and_update();
    }

    /// Waits until the token is replaced or cleared.
    ///
    /// # Errors
    ///
    /// Returns `Cancelled` when the holder has been dropped.
    pub async fn changed(&mut self) -> Result<()> {
        self.0
            .changed()
            .await
            .map_err(|_| Error::cancelled("token holder was dropped"))
    }
}

/// Tokens as persisted between runs.
#[serde_as]
#[derive(Clone, Default, Redact, Serialize, Deserialize)]
pub struct Credentials {
    #[redact]
    pub access_token: Option<String>,

    #[serde_as(as = "Option<TimestampSeconds<i64>>")]
    pub expires_at: Option<SystemTime>,

    #[redact]
    pub refresh_token: Option<String>,
}

impl Credentials {
    /// Credential files hold three short values: anything larger is suspect.
    const MAX_FILE_SIZE: u64 = 4 * 1024;

    /// # Errors
    ///
    /// Will return `Err` if the file cannot be read, is too large or is not
    /// valid JSON.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        let file_size = fs::metadata(path)?.len();
        if file_size > Self::MAX_FILE_SIZE {
            return Err(Error::out_of_range(format!(
                "{} is too large ({file_size} bytes)",
                path.display()
            )));
        }

        let contents = fs::read_to_string(path)?;
        serde_json::from_str(&contents).map_err(Into::into)
    }

    /// # Errors
    ///
    /// Will return `Err` if the file cannot be written.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let contents = serde_json::to_string_pretty(self)?;
        fs::write(path, contents).map_err(Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expired_token_is_invalid() {
        let mut holder = TokenHolder::new();
        let watch = holder.subscribe();

        holder.set(AccessToken::new("stale", SystemTime::now() - Duration::from_secs(1)));
        assert!(!holder.is_valid());
        assert!(holder.current().is_none());
        assert!(!watch.is_valid());
        assert!(watch.access_token().is_none());
    }

    #[test]
    fn token_at_exact_expiry_is_invalid() {
        let token = AccessToken::new("edge", SystemTime::now());
        assert!(token.is_expired());
        assert_eq!(token.time_to_live(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn token_expires_on_the_runtime_clock() {
        let mut holder = TokenHolder::new();
        let watch = holder.subscribe();
        holder.set(AccessToken::expiring_in("short", Duration::from_millis(200)));
        assert!(watch.is_valid());

        let started = tokio::time::Instant::now();
        tokio::time::sleep_until(watch.deadline().unwrap()).await;

        assert_eq!(started.elapsed(), Duration::from_millis(200));
        assert!(!watch.is_valid());
        assert!(!holder.is_valid());
        assert_eq!(holder.deadline(), Some(started + Duration::from_millis(200)));
    }

    #[tokio::test(start_paused = true)]
    async fn refresh_is_due_at_a_fixed_instant() {
        let margin = Duration::from_secs(60);
        let mut holder = TokenHolder::new();
        let started = tokio::time::Instant::now();
        assert_eq!(holder.refresh_due(margin), started);

        holder.set(AccessToken::expiring_in("one", Duration::from_secs(70)));
        let due = holder.refresh_due(margin);
        assert_eq!(due, started + Duration::from_secs(10));

        // Rearming every second must not push the refresh out.
        for _ in 0..9 {
            tokio::time::sleep(Duration::from_secs(1)).await;
            assert_eq!(holder.refresh_due(margin), due);
        }

        tokio::time::sleep_until(holder.refresh_due(margin)).await;
        assert_eq!(started.elapsed(), Duration::from_secs(10));
        assert!(holder.is_valid());

        holder.set(AccessToken::expiring_in("two", Duration::from_secs(30)));
        assert!(holder.refresh_due(margin) <= tokio::time::Instant::now());
    }

    #[test]
    fn apply_uses_stated_lifetime_and_keeps_refresh_token() {
        let mut holder = TokenHolder::new();
        holder.apply(TokenResponse {
            access_token: "first".to_owned(),
            token_type: "Bearer".to_owned(),
            scope: String::new(),
            expires_in: Some(Duration::from_secs(60)),
            refresh_token: Some("refresh".to_owned()),
        });

        let token = holder.current().unwrap();
        assert!(token.time_to_live() <= Duration::from_secs(60));
        assert!(token.time_to_live() > Duration::from_secs(50));

        holder.apply(TokenResponse {
            access_token: "second".to_owned(),
            token_type: "Bearer".to_owned(),
            scope: String::new(),
            expires_in: None,
            refresh_token: None,
        });

        let token = holder.current().unwrap();
        assert_eq!(token.as_str(), "second");
        assert!(token.time_to_live() > Duration::from_secs(3500));
        assert_eq!(holder.refresh_token(), Some("refresh"));
    }

    #[tokio::test]
    async fn watch_observes_replacement_and_clearing() {
        let mut holder = TokenHolder::new();
        let mut watch = holder.subscribe();

        holder.set(AccessToken::expiring_in("one", Duration::from_secs(60)));
        watch.changed().await.unwrap();
        assert_eq!(watch.access_token().as_deref(), Some("one"));

        holder.clear();
        watch.changed().await.unwrap();
        assert!(!watch.is_valid());

        drop(holder);
        assert!(watch.changed().await.is_err());
    }

    #[test]
    fn restore_discards_expired_access_token() {
        let mut holder = TokenHolder::new();
        holder.restore(Credentials {
            access_token: Some("old".to_owned()),
            expires_at: Some(SystemTime::now() - Duration::from_secs(10)),
            refresh_token: Some("refresh".to_owned()),
        });

        assert!(!holder.is_valid());
        assert_eq!(holder.refresh_token(), Some("refresh"));
    }

    #[test]
    fn credentials_redact_tokens() {
        let credentials = Credentials {
            access_token: Some("secret-access".to_owned()),
            expires_at: None,
            refresh_token: Some("secret-refresh".to_owned()),
        };
        let debug = format!("{credentials:?}");
        assert!(!debug.contains("secret-access"));
        assert!(!debug.contains("secret-refresh"));
    }
}
