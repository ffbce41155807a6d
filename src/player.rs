//! Local view of what the remote device is playing.
//!
//! The device pushes authoritative snapshots only sporadically. In between,
//! the position is interpolated locally, see [`crate::position`].
//!
//! The position never exceeds the duration.

use std::time::Duration;

use tokio::time::Instant;

use crate::{protocol::catalog::Track, sdk::StateSnapshot};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PlaybackState {
    pub is_paused: bool,
    pub current_track: Option<Track>,
    pub position: Duration,
    pub duration: Duration,

    /// When the last authoritative snapshot arrived.
    pub last_update: Option<Instant>,
}

impl Default for PlaybackState {
    fn default() -> Self {
        Self {
            is_paused: true,
            current_track: None,
            position: Duration::ZERO,
            duration: Duration::ZERO,
            last_update: None,
        }
    }
}

impl PlaybackState {
    /// Replaces all fields from an authoritative device snapshot.
    #[must_use]
    pub fn from_snapshot(snapshot: StateSnapshot) -> Self {
        Self {
            is_paused: snapshot.paused,
            current_track: snapshot.track_window.current_track,
            position: snapshot.position.min(snapshot.duration),
            duration: snapshot.duration,
            last_update: Some(Instant::now()),
        }
    }

    /// Whether the position should advance on its own.
    #[must_use]
    pub fn is_advancing(&self) -> bool {
        !self.is_paused && !self.duration.is_zero()
    }

    /// Moves the position forward by `elapsed`, clamped at the duration.
    /// Does nothing while paused.
    pub fn advance(&mut self, elapsed: Duration) {
        if self.is_paused {
            return;
        }

        self.position = self.position.saturating_add(elapsed).min(self.duration);
    }

    /// Sets the position, clamped at the duration.
    pub fn set_position(&mut self, position: Duration) {
        self.position = position.min(self.duration);
    }

    /// Fraction of the track that has been played, between 0.0 and 1.0.
    #[must_use]
    pub fn progress(&self) -> f64 {
        if self.duration.is_zero() {
            return 0.0;
        }

        self.position.as_secs_f64() / self.duration.as_secs_f64()
    }
}

/// What the presentation layer gets to see.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Status {
    pub is_ready: bool,
    pub is_paused: bool,
    pub current_track: Option<Track>,
    pub position: Duration,
    pub duration: Duration,
}
