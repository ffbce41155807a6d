//! Boundary of the vendor playback SDK.
//!
//! The SDK runtime constructs device players and pushes notifications to
//! them. Notifications are delivered to explicitly registered listeners: a
//! [`Listener`] is the sending half of a channel, registered per
//! [`ListenerKind`]. The controller owns the receiving half, so dropping a
//! device session drops its whole subscription set at once.
//!
//! [`crate::connect`] implements this boundary on top of the Web API.

use std::{collections::HashMap, fmt, time::Duration};

use async_trait::async_trait;
use serde::Deserialize;
use serde_with::{serde_as, DurationMilliSeconds};
use tokio::sync::mpsc;

use crate::{error::Result, protocol::catalog::Track, tokens::TokenWatch};

pub type Listener = mpsc::UnboundedSender<SdkEvent>;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ListenerKind {
    InitializationError,
    AuthenticationError,
    AccountError,
    PlaybackError,
    Ready,
    NotReady,
    PlayerStateChanged,
}

impl ListenerKind {
    pub const ALL: [Self; 7] = [
        Self::InitializationError,
        Self::AuthenticationError,
        Self::AccountError,
        Self::PlaybackError,
        Self::Ready,
        Self::NotReady,
        Self::PlayerStateChanged,
    ];
}

impl fmt::Display for ListenerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::InitializationError => "initialization_error",
            Self::AuthenticationError => "authentication_error",
            Self::AccountError => "account_error",
            Self::PlaybackError => "playback_error",
            Self::Ready => "ready",
            Self::NotReady => "not_ready",
            Self::PlayerStateChanged => "player_state_changed",
        };
        write!(f, "{name}")
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SdkEvent {
    InitializationError { message: String },
    AuthenticationError { message: String },
    AccountError { message: String },
    PlaybackError { message: String },

    /// The device registered with the backend under `device_id`.
    Ready { device_id: String },

    /// The device went offline.
    NotReady { device_id: String },

    /// Authoritative playback snapshot. `None` for an empty payload.
    PlayerStateChanged(Option<StateSnapshot>),
}

impl SdkEvent {
    #[must_use]
    pub fn kind(&self) -> ListenerKind {
        match self {
            Self::InitializationError { .. } => ListenerKind::InitializationError,
            Self::AuthenticationError { .. } => ListenerKind::AuthenticationError,
            Self::AccountError { .. } => ListenerKind::AccountError,
            Self::PlaybackError { .. } => ListenerKind::PlaybackError,
            Self::Ready { .. } => ListenerKind::Ready,
            Self::NotReady { .. } => ListenerKind::NotReady,
            Self::PlayerStateChanged(_) => ListenerKind::PlayerStateChanged,
        }
    }
}

/// Playback snapshot as pushed by the device.
///
/// ```json
/// {
///     "paused": false,
///     "position": 5000,
///     "duration": 200000,
///     "track_window": { "current_track": { "uri": "spotify:track:...", "name": "..." } }
/// }
/// ```
#[serde_as]
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct StateSnapshot {
    pub paused: bool,

    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub position: Duration,

    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub duration: Duration,

    #[serde(default)]
    pub track_window: TrackWindow,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
pub struct TrackWindow {
    #[serde(default)]
    pub current_track: Option<Track>,
}

/// Construction options of a device player.
#[derive(Clone, Debug)]
pub struct PlayerOptions {
    /// Name the device registers under.
    pub name: String,

    /// Initial volume between 0.0 and 1.0.
    pub volume: f32,

    /// Asked for the access token whenever the player needs one.
    pub token_provider: TokenWatch,
}

/// The SDK runtime.
pub trait PlaybackSdk: Send + Sync {
    /// Whether the runtime has loaded and can construct players.
    fn is_available(&self) -> bool;

    /// # Errors
    ///
    /// Will return `Err` if the runtime refuses to construct a player.
    fn create_player(&self, options: PlayerOptions) -> Result<Box<dyn DevicePlayer>>;
}

/// A live device session with the SDK runtime.
#[async_trait]
pub trait DevicePlayer: Send + Sync {
    /// Registers `listener` for `kind`, replacing any previous registration.
    /// Returns whether the registration was accepted.
    fn add_listener(&mut self, kind: ListenerKind, listener: Listener) -> bool;

    /// Returns whether a listener was registered for `kind`.
    fn remove_listener(&mut self, kind: ListenerKind) -> bool;

    /// Connects to the backend. Success does not mean the device is ready:
    /// that is announced with [`SdkEvent::Ready`].
    async fn connect(&self) -> Result<bool>;

    async fn disconnect(&self) -> Result<()>;
    async fn pause(&self) -> Result<()>;
    async fn toggle_play(&self) -> Result<()>;
    async fn next_track(&self) -> Result<()>;
    async fn previous_track(&self) -> Result<()>;
    async fn seek(&self, position: Duration) -> Result<()>;
}

/// Registration list that players can use to dispatch events.
#[derive(Debug, Default)]
pub struct Listeners(HashMap<ListenerKind, Listener>);

impl Listeners {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, kind: ListenerKind, listener: Listener) -> bool {
        self.0.insert(kind, listener);
        true
    }

    pub fn remove(&mut self, kind: ListenerKind) -> bool {
        self.0.remove(&kind).is_some()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Delivers `event` to the listener registered for its kind. Listeners
    /// whose receiver is gone are unregistered.
    ///
    /// Returns whether the event was delivered.
    pub fn emit(&mut self, event: SdkEvent) -> bool {
        let kind = event.kind();
        let Some(listener) = self.0.get(&kind) else {
            trace!("no listener for {kind}");
            return false;
        };

        if listener.send(event).is_err() {
            debug!("listener for {kind} is gone");
            self.0.remove(&kind);
            return false;
        }

        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_state_snapshot() {
        let body = r#"{
            "paused": false,
            "position": 5000,
            "duration": 200000,
            "track_window": {"current_track": {"uri": "spotify:track:a", "name": "A", "duration_ms": 200000}}
        }"#;
        let snapshot: StateSnapshot = serde_json::from_str(body).unwrap();
        assert!(!snapshot.paused);
        assert_eq!(snapshot.position, Duration::from_secs(5));
        assert_eq!(
            snapshot.track_window.current_track.unwrap().uri,
            "spotify:track:a"
        );
    }

    #[test]
    fn emits_only_to_registered_kind() {
        let mut listeners = Listeners::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        listeners.add(ListenerKind::Ready, tx);

        assert!(listeners.emit(SdkEvent::Ready {
            device_id: "abc".to_owned()
        }));
        assert!(!listeners.emit(SdkEvent::NotReady {
            device_id: "abc".to_owned()
        }));

        assert_eq!(
            rx.try_recv().unwrap(),
            SdkEvent::Ready {
                device_id: "abc".to_owned()
            }
        );
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn drops_listeners_without_receiver() {
        let mut listeners = Listeners::new();
        let (tx, rx) = mpsc::unbounded_channel();
        listeners.add(ListenerKind::PlayerStateChanged, tx);
        drop(rx);

        assert!(!listeners.emit(SdkEvent::PlayerStateChanged(None)));
        assert!(listeners.is_empty());
    }
}
