//! Playback SDK boundary implemented over the Web API.
//!
//! Instead of hosting a playback runtime, [`ConnectPlayer`] drives an
//! existing Connect device of the account, found by its name. A background
//! task watches the account's devices and playback:
//!
//! * the device appearing in the device list is reported as `Ready` with its
//!   identifier, and the configured volume is applied
//! * the device disappearing is reported as `NotReady`
//! * playback of the device is reported as `PlayerStateChanged`, whenever
//!   it differs from what the previous snapshot predicts
//! * a rejected access token is reported as `AuthenticationError`
//!
//! Player primitives map onto the corresponding Web API commands for the
//! device. The background task stops on [`DevicePlayer::disconnect`] or when
//! the player is dropped.

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, PoisonError,
    },
    time::Duration,
};

use async_trait::async_trait;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::{
    error::{Error, Result},
    protocol::connect::{CurrentPlayback, Device},
    remote::WebApi,
    sdk::{
        DevicePlayer, Listener, ListenerKind, Listeners, PlaybackSdk, PlayerOptions, SdkEvent,
        StateSnapshot, TrackWindow,
    },
    tokens::TokenWatch,
};

/// Web API backed playback SDK.
pub struct ConnectSdk {
    api: Arc<WebApi>,
    poll_interval: Duration,
}

impl ConnectSdk {
    #[must_use]
    pub fn new(api: Arc<WebApi>, poll_interval: Duration) -> Self {
        Self { api, poll_interval }
    }
}

impl PlaybackSdk for ConnectSdk {
    /// The Web API has no runtime to load.
    fn is_available(&self) -> bool {
        true
    }

    fn create_player(&self, options: PlayerOptions) -> Result<Box<dyn DevicePlayer>> {
        if options.name.is_empty() {
            return Err(Error::invalid_argument("device name is empty"));
        }

        Ok(Box::new(ConnectPlayer {
            api: Arc::clone(&self.api),
            name: options.name,
            volume: options.volume,
            tokens: options.token_provider,
            poll_interval: self.poll_interval,
            listeners: Arc::default(),
            shared: Arc::default(),
            started: AtomicBool::new(false),
            cancel: CancellationToken::new(),
        }))
    }
}

/// Device state shared between the player and its watcher task.
#[derive(Debug, Default)]
struct Shared {
    device_id: Mutex<Option<String>>,
    is_paused: AtomicBool,
}

impl Shared {
    fn device_id(&self) -> Option<String> {
        self.device_id
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn set_device_id(&self, device_id: Option<String>) {
        *self.device_id.lock().unwrap_or_else(PoisonError::into_inner) = device_id;
    }
}

pub struct ConnectPlayer {
    api: Arc<WebApi>,
    name: String,
    volume: f32,
    tokens: TokenWatch,
    poll_interval: Duration,
    listeners: Arc<Mutex<Listeners>>,
    shared: Arc<Shared>,
    started: AtomicBool,
    cancel: CancellationToken,
}

impl ConnectPlayer {
    fn device_id(&self) -> Result<String> {
        self.shared
            .device_id()
            .ok_or_else(|| Error::failed_precondition(format!("{} is not ready", self.name)))
    }
}

impl Drop for ConnectPlayer {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[async_trait]
impl DevicePlayer for ConnectPlayer {
    fn add_listener(&mut self, kind: ListenerKind, listener: Listener) -> bool {
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .add(kind, listener)
    }

    fn remove_listener(&mut self, kind: ListenerKind) -> bool {
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(kind)
    }

    async fn connect(&self) -> Result<bool> {
        if self.cancel.is_cancelled() {
            return Ok(false);
        }

        if self.started.swap(true, Ordering::SeqCst) {
            return Ok(true);
        }

        let watcher = Watcher {
            api: Arc::clone(&self.api),
            name: self.name.clone(),
            volume_percent: volume_percent(self.volume),
            tokens: self.tokens.clone(),
            listeners: Arc::clone(&self.listeners),
            shared: Arc::clone(&self.shared),
            last: None,
        };

        let poll_interval = self.poll_interval;
        let cancel = self.cancel.clone();
        tokio::spawn(async move {
            tokio::select! {
                () = cancel.cancelled() => {}
                () = watcher.run(poll_interval) => {}
            }
        });

        debug!("watching for device {}", self.name);
        Ok(true)
    }

    async fn disconnect(&self) -> Result<()> {
        self.cancel.cancel();
        self.shared.set_device_id(None);
        debug!("stopped watching for device {}", self.name);
        Ok(())
    }

    async fn pause(&self) -> Result<()> {
        let device_id = self.device_id()?;
        self.api.pause(&device_id).await?;
        self.shared.is_paused.store(true, Ordering::Relaxed);
        Ok(())
    }

    async fn toggle_play(&self) -> Result<()> {
        let device_id = self.device_id()?;
        if self.shared.is_paused.load(Ordering::Relaxed) {
            self.api.resume(&device_id).await?;
            self.shared.is_paused.store(false, Ordering::Relaxed);
        } else {
            self.api.pause(&device_id).await?;
            self.shared.is_paused.store(true, Ordering::Relaxed);
        }
        Ok(())
    }

    async fn next_track(&self) -> Result<()> {
        self.api.next(&self.device_id()?).await
    }

    async fn previous_track(&self) -> Result<()> {
        self.api.previous(&self.device_id()?).await
    }

    async fn seek(&self, position: Duration) -> Result<()> {
        self.api.seek(&self.device_id()?, position).await
    }
}

/// Background task that turns Web API polls into SDK events.
struct Watcher {
    api: Arc<WebApi>,
    name: String,
    volume_percent: u8,
    tokens: TokenWatch,
    listeners: Arc<Mutex<Listeners>>,
    shared: Arc<Shared>,

    /// Last reported snapshot and when it was taken.
    last: Option<(StateSnapshot, Instant)>,
}

impl Watcher {
    async fn run(mut self, poll_interval: Duration) {
        let mut interval = tokio::time::interval(poll_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            interval.tick().await;

            // Polling without a token only yields rejections.
            if !self.tokens.is_valid() {
                continue;
            }

            if let Err(e) = self.poll().await {
                if e.kind.is_authorization() {
                    self.emit(SdkEvent::AuthenticationError {
                        message: e.to_string(),
                    });
                } else {
                    debug!("polling device {} failed: {e}", self.name);
                }
            }
        }
    }

    async fn poll(&mut self) -> Result<()> {
        let devices = self.api.devices().await?;
        let found = find_device(&devices, &self.name).and_then(|device| device.id.clone());
        let known = self.shared.device_id();

        match (known, found) {
            (None, Some(device_id)) => {
                info!("device {} found with id {device_id}", self.name);
                self.shared.set_device_id(Some(device_id.clone()));
                if let Err(e) = self.api.set_volume(&device_id, self.volume_percent).await {
                    warn!("setting volume of {} failed: {e}", self.name);
                }
                self.emit(SdkEvent::Ready { device_id });
            }
            (Some(device_id), None) => {
                self.shared.set_device_id(None);
                self.last = None;
                self.emit(SdkEvent::NotReady { device_id });
                return Ok(());
            }
            (Some(previous), Some(device_id)) if previous != device_id => {
                self.shared.set_device_id(Some(device_id.clone()));
                self.last = None;
                self.emit(SdkEvent::NotReady {
                    device_id: previous,
                });
                self.emit(SdkEvent::Ready { device_id });
            }
            (None, None) => return Ok(()),
            (Some(_), Some(_)) => {}
        }

        let Some(device_id) = self.shared.device_id() else {
            return Ok(());
        };

        let playback = self.api.playback().await?;
        let snapshot = playback
            .and_then(|playback| snapshot_for(playback, &device_id));

        let now = Instant::now();
        match snapshot {
            Some(snapshot) => {
                let changed = self
                    .last
                    .as_ref()
                    .is_none_or(|(last, at)| differs(last, &snapshot, now - *at));
                self.shared
                    .is_paused
                    .store(snapshot.paused, Ordering::Relaxed);
                if changed {
                    self.emit(SdkEvent::PlayerStateChanged(Some(snapshot.clone())));
                }
                self.last = Some((snapshot, now));
            }
            None => {
                if self.last.take().is_some() {
                    self.emit(SdkEvent::PlayerStateChanged(None));
                }
            }
        }

        Ok(())
    }

    fn emit(&self, event: SdkEvent) {
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .emit(event);
    }
}

/// The device named `name`. Restricted devices cannot be controlled.
fn find_device<'a>(devices: &'a [Device], name: &str) -> Option<&'a Device> {
    devices
        .iter()
        .find(|device| device.name == name && !device.is_restricted)
}

/// The snapshot of `playback`, if it is playing on `device_id`.
fn snapshot_for(playback: CurrentPlayback, device_id: &str) -> Option<StateSnapshot> {
    let device = playback.device?;
    if device.id.as_deref() != Some(device_id) {
        return None;
    }

    let duration = playback
        .item
        .as_ref()
        .map(|track| track.duration)
        .unwrap_or_default();

    Some(StateSnapshot {
        paused: !playback.is_playing,
        position: playback.progress_ms.unwrap_or_default().min(duration),
        duration,
        track_window: TrackWindow {
            current_track: playback.item,
        },
    })
}

/// Largest deviation from the predicted position that is not a seek.
const POSITION_TOLERANCE: Duration = Duration::from_secs(2);

/// Whether `next` differs from what `last` predicts after `elapsed`.
fn differs(last: &StateSnapshot, next: &StateSnapshot, elapsed: Duration) -> bool {
    if last.paused != next.paused
        || last.duration != next.duration
        || last.track_window != next.track_window
    {
        return true;
    }

    let expected = if last.paused {
        last.position
    } else {
        (last.position + elapsed).min(last.duration)
    };

    expected.abs_diff(next.position) > POSITION_TOLERANCE
}

/// Volume between 0.0 and 1.0 in percent.
#[expect(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn volume_percent(volume: f32) -> u8 {
    (volume.clamp(0.0, 1.0) * 100.0).round() as u8
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::catalog::Track;

    fn device(id: &str, name: &str, is_active: bool) -> Device {
        Device {
            id: Some(id.to_owned()),
            is_active,
            is_restricted: false,
            name: name.to_owned(),
            kind: "Speaker".to_owned(),
            volume_percent: Some(50),
        }
    }

    fn snapshot(paused: bool, position: u64) -> StateSnapshot {
        StateSnapshot {
            paused,
            position: Duration::from_millis(position),
            duration: Duration::from_secs(200),
            track_window: TrackWindow::default(),
        }
    }

    #[test]
    fn finds_unrestricted_device_by_name() {
        let mut restricted = device("r", "Kitchen", false);
        restricted.is_restricted = true;
        let devices = [restricted, device("k", "Kitchen", false), device("l", "Living Room", true)];

        assert_eq!(
            find_device(&devices, "Kitchen").and_then(|device| device.id.as_deref()),
            Some("k")
        );
        assert!(find_device(&devices, "Garage").is_none());
    }

    #[test]
    fn snapshot_only_for_own_device() {
        let track: Track = serde_json::from_str(
            r#"{"uri": "spotify:track:a", "name": "A", "duration_ms": 200000}"#,
        )
        .unwrap();
        let playback = CurrentPlayback {
            device: Some(device("abc", "Den", true)),
            is_playing: true,
            progress_ms: Some(Duration::from_secs(5)),
            item: Some(track),
        };

        assert!(snapshot_for(playback.clone(), "xyz").is_none());

        let snapshot = snapshot_for(playback, "abc").unwrap();
        assert!(!snapshot.paused);
        assert_eq!(snapshot.position, Duration::from_secs(5));
        assert_eq!(snapshot.duration, Duration::from_secs(200));
    }

    #[test]
    fn predicted_progress_is_no_change() {
        let last = snapshot(false, 5_000);
        let next = snapshot(false, 6_100);
        assert!(!differs(&last, &next, Duration::from_secs(1)));
    }

    #[test]
    fn seeking_and_pausing_are_changes() {
        let last = snapshot(false, 5_000);
        assert!(differs(&last, &snapshot(false, 60_000), Duration::from_secs(1)));
        assert!(differs(&last, &snapshot(true, 6_000), Duration::from_secs(1)));
    }

    #[test]
    fn volume_is_clamped_to_percent() {
        assert_eq!(volume_percent(0.5), 50);
        assert_eq!(volume_percent(1.7), 100);
        assert_eq!(volume_percent(-0.2), 0);
    }
}
