//! Playback session controller.
//!
//! The controller establishes a device session with the playback SDK, makes
//! that device the account's active device before every command, dispatches
//! playback commands with bounded retries and keeps a local playback state
//! in step with the sparse notifications the device sends.
//!
//! # Lifecycle
//!
//! ```text
//! Uninitialized --valid token--> AwaitingSdk --ready--> Ready
//!       ^                            |
//!       +------ readiness timeout ---+
//!
//! any state --token loss or disconnect--> TornDown --valid token--> AwaitingSdk
//! ```
//!
//! A device going offline does not leave `Ready`. The device is reactivated
//! by the next command that needs it.
//!
//! # Concurrency
//!
//! A controller has a single owner that drives it: commands take `&self` or
//! `&mut self` and run their retry loops to completion before returning.
//! Device notifications, position ticks and token changes are consumed by
//! [`Controller::process_next`], which the owner calls in its event loop:
//!
//! ```rust,ignore
//! controller.start().await?;
//! while controller.process_next().await.is_continue() {}
//! ```
//!
//! # Failure reporting
//!
//! No command returns an error. Failures end up as `false` or as a no-op and
//! are logged. Rejected access tokens are additionally announced with
//! [`Event::AuthorizationFailed`].

use std::{fmt, future, ops::ControlFlow, sync::Arc, time::Duration};

use tokio::sync::mpsc;

use crate::{
    config::PlayerConfig,
    error::{Error, ErrorKind, Result},
    events::Event,
    player::{PlaybackState, Status},
    position::PositionEstimator,
    remote::DeviceControl,
    retry::RetryPolicy,
    sdk::{DevicePlayer, ListenerKind, PlaybackSdk, PlayerOptions, SdkEvent},
    tokens::TokenWatch,
};

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Lifecycle {
    Uninitialized,
    AwaitingSdk,
    Ready,
    TornDown,
}

impl fmt::Display for Lifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Uninitialized => "uninitialized",
            Self::AwaitingSdk => "awaiting sdk",
            Self::Ready => "ready",
            Self::TornDown => "torn down",
        };
        write!(f, "{name}")
    }
}

/// A live device with its subscription set.
struct DeviceSession {
    player: Box<dyn DevicePlayer>,

    /// Assigned by the SDK once the device is ready.
    device_id: Option<String>,

    is_online: bool,

    /// Listener kinds registered with `player`, removed on teardown.
    registered: Vec<ListenerKind>,

    events: mpsc::UnboundedReceiver<SdkEvent>,
}

pub struct Controller {
    config: PlayerConfig,
    sdk: Arc<dyn PlaybackSdk>,
    api: Arc<dyn DeviceControl>,
    tokens: TokenWatch,

    lifecycle: Lifecycle,
    session: Option<DeviceSession>,
    state: PlaybackState,
    estimator: PositionEstimator,

    event_tx: Option<mpsc::UnboundedSender<Event>>,
}

impl Controller {
    #[must_use]
    pub fn new(
        config: PlayerConfig,
        sdk: Arc<dyn PlaybackSdk>,
        api: Arc<dyn DeviceControl>,
        tokens: TokenWatch,
    ) -> Self {
        let estimator = PositionEstimator::new(config.position_tick);
        Self {
            config,
            sdk,
            api,
            tokens,
            lifecycle: Lifecycle::Uninitialized,
            session: None,
            state: PlaybackState::default(),
            estimator,
            event_tx: None,
        }
    }

    /// Sends [`Event`]s to `event_tx`.
    #[must_use]
    pub fn with_events(mut self, event_tx: mpsc::UnboundedSender<Event>) -> Self {
        self.event_tx = Some(event_tx);
        self
    }

    #[must_use]
    pub fn lifecycle(&self) -> Lifecycle {
        self.lifecycle
    }

    #[must_use]
    pub fn device_id(&self) -> Option<&str> {
        self.session
            .as_ref()
            .and_then(|session| session.device_id.as_deref())
    }

    #[must_use]
    pub fn state(&self) -> &PlaybackState {
        &self.state
    }

    /// Whether the device is ready, online and the access token is valid.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.lifecycle == Lifecycle::Ready
            && self
                .session
                .as_ref()
                .is_some_and(|session| session.is_online && session.device_id.is_some())
            && self.tokens.is_valid()
    }

    #[must_use]
    pub fn status(&self) -> Status {
        Status {
            is_ready: self.is_ready(),
            is_paused: self.state.is_paused,
            current_track: self.state.current_track.clone(),
            position: self.state.position,
            duration: self.state.duration,
        }
    }

    /// Number of periodic timers the controller keeps running.
    #[must_use]
    pub fn active_timers(&self) -> usize {
        usize::from(self.estimator.is_running())
    }

    /// Waits for the playback SDK, then creates and connects a device
    /// session. The device is ready once the SDK says so, which arrives
    /// through [`process_next`](Self::process_next).
    ///
    /// # Errors
    ///
    /// Will return `Err` if:
    /// - a session already exists
    /// - there is no valid access token, or it is lost while waiting
    /// - the SDK does not become available within the configured timeout
    /// - the SDK refuses to create a player
    pub async fn start(&mut self) -> Result<()> {
        if self.session.is_some() {
            return Err(Error::already_exists("device session already exists"));
        }

        if !self.tokens.is_valid() {
            return Err(Error::unauthenticated("no valid access token"));
        }

        self.tokens.mark_seen();
        self.transition(Lifecycle::AwaitingSdk);

        if let Err(e) = self.wait_for_sdk().await {
            if e.kind == ErrorKind::DeadlineExceeded {
                error!(
                    "playback sdk did not become available within {}s",
                    self.config.sdk_timeout.as_secs_f32()
                );
                self.emit(Event::SdkUnavailable);
            }
            self.transition(Lifecycle::Uninitialized);
            return Err(e);
        }

        let options = PlayerOptions {
            name: self.config.name.clone(),
            volume: self.config.volume,
            token_provider: self.tokens.clone(),
        };

        let mut player = match self.sdk.create_player(options) {
            Ok(player) => player,
            Err(e) => {
                error!("playback sdk failed to create player: {e}");
                self.emit(Event::SdkError);
                self.transition(Lifecycle::Uninitialized);
                return Err(e);
            }
        };

        let (event_tx, events) = mpsc::unbounded_channel();
        let mut registered = Vec::with_capacity(ListenerKind::ALL.len());
        for kind in ListenerKind::ALL {
            if player.add_listener(kind, event_tx.clone()) {
                registered.push(kind);
            } else {
                warn!("{kind} listener was not accepted");
            }
        }

        match player.connect().await {
            Ok(true) => info!("connected to playback sdk as {}", self.config.name),
            Ok(false) => warn!("playback sdk refused to connect"),
            Err(e) => warn!("connecting to playback sdk failed: {e}"),
        }

        self.session = Some(DeviceSession {
            player,
            device_id: None,
            is_online: false,
            registered,
            events,
        });

        Ok(())
    }

    /// Polls for SDK availability until the configured timeout.
    async fn wait_for_sdk(&self) -> Result<()> {
        let poll = async {
            let mut interval = tokio::time::interval(self.config.sdk_poll_interval);
            loop {
                interval.tick().await;

                if !self.tokens.is_valid() {
                    return Err(Error::cancelled(
                        "access token lost while waiting for playback sdk",
                    ));
                }

                if self.sdk.is_available() {
                    debug!("playback sdk is available");
                    return Ok(());
                }
            }
        };

        tokio::time::timeout(self.config.sdk_timeout, poll).await?
    }

    /// Handles the next device notification, position tick, token change or
    /// token expiry.
    ///
    /// Returns [`ControlFlow::Break`] when the token holder is gone, after
    /// tearing down the session.
    pub async fn process_next(&mut self) -> ControlFlow<()> {
        enum Next {
            Sdk(Option<SdkEvent>),
            Tick,
            Token(Result<()>),
            Expired,
        }

        let Self {
            session,
            estimator,
            tokens,
            ..
        } = self;

        // Only a live session has anything to tear down on expiry.
        let expiry = session.as_ref().and(tokens.deadline());

        let next = tokio::select! {
            event = async {
                match session.as_mut() {
                    Some(session) => session.events.recv().await,
                    None => future::pending().await,
                }
            } => Next::Sdk(event),
            () = estimator.tick() => Next::Tick,
            changed = tokens.changed() => Next::Token(changed),
            () = async {
                match expiry {
                    Some(deadline) => tokio::time::sleep_until(deadline).await,
                    None => future::pending().await,
                }
            } => Next::Expired,
        };

        match next {
            Next::Sdk(Some(event)) => self.handle_sdk_event(event),
            Next::Sdk(None) => {
                warn!("device session stopped sending notifications");
                self.disconnect().await;
            }
            Next::Tick => self.estimator.advance(&mut self.state),
            Next::Token(Ok(())) => self.on_token_change().await,
            Next::Expired => {
                info!("access token expired");
                self.disconnect().await;
            }
            Next::Token(Err(e)) => {
                info!("{e}");
                self.disconnect().await;
                return ControlFlow::Break(());
            }
        }

        ControlFlow::Continue(())
    }

    fn handle_sdk_event(&mut self, event: SdkEvent) {
        match event {
            SdkEvent::Ready { device_id } => {
                info!("device ready with id {device_id}");
                if let Some(session) = self.session.as_mut() {
                    session.device_id = Some(device_id);
                    session.is_online = true;
                }
                self.transition(Lifecycle::Ready);
                self.emit(Event::Ready);
            }

            SdkEvent::NotReady { device_id } => {
                warn!("device {device_id} went offline");
                if let Some(session) = self.session.as_mut() {
                    session.is_online = false;
                }
                self.emit(Event::NotReady);
            }

            SdkEvent::PlayerStateChanged(None) => {
                trace!("ignoring empty player state");
            }

            SdkEvent::PlayerStateChanged(Some(snapshot)) => {
                self.state = PlaybackState::from_snapshot(snapshot);
                self.estimator.rebase(&self.state);
                debug!(
                    "player state: {} at {}/{}ms",
                    if self.state.is_paused {
                        "paused"
                    } else {
                        "playing"
                    },
                    self.state.position.as_millis(),
                    self.state.duration.as_millis()
                );
                self.emit(Event::StateChanged);
            }

            SdkEvent::InitializationError { message } => {
                error!("playback sdk failed to initialize: {message}");
                self.emit(Event::SdkError);
            }

            SdkEvent::AuthenticationError { message } => {
                error!("playback sdk rejected the access token: {message}");
                self.emit(Event::AuthorizationFailed);
            }

            SdkEvent::AccountError { message } => {
                error!("account cannot use playback sdk: {message}");
                self.emit(Event::SdkError);
            }

            SdkEvent::PlaybackError { message } => {
                error!("playback failed: {message}");
                self.emit(Event::SdkError);
            }
        }
    }

    async fn on_token_change(&mut self) {
        if !self.tokens.is_valid() {
            info!("access token lost");
            self.disconnect().await;
            return;
        }

        match self.lifecycle {
            Lifecycle::Uninitialized | Lifecycle::TornDown => {
                if let Err(e) = self.start().await {
                    error!("starting device session failed: {e}");
                }
            }
            Lifecycle::AwaitingSdk | Lifecycle::Ready => {
                debug!("access token replaced");
            }
        }
    }

    /// Makes the device the account's active device.
    ///
    /// Returns `false` without network activity when the device is not
    /// ready or the access token is invalid.
    pub async fn ensure_active(&self) -> bool {
        match self.activate().await {
            Ok(()) => true,
            Err(e) => {
                self.report(&e, "activating device");
                false
            }
        }
    }

    async fn activate(&self) -> Result<()> {
        let device_id = self.actionable_device()?;

        match self.api.current_playback().await {
            Ok(Some(device)) if device.is_active_with_id(device_id) => {
                trace!("device {device_id} is already active");
                return Ok(());
            }
            Ok(_) => debug!("transferring playback to {device_id}"),
            Err(e) if e.kind.is_authorization() => return Err(e),
            Err(e) => debug!("querying active device failed, transferring anyway: {e}"),
        }

        RetryPolicy::new(self.config.transfer_attempts, self.config.transfer_delay)
            .run(
                |attempt| async move {
                    self.check_token()?;
                    trace!("transfer attempt {attempt}");
                    self.api.transfer_playback(device_id, false).await
                },
                |e| !e.kind.is_authorization() && e.kind != ErrorKind::Cancelled,
            )
            .await?;

        info!("playback transferred to {device_id}");
        Ok(())
    }

    /// Plays `track` on the device, activating it first.
    ///
    /// Returns `false` immediately when the device is not ready, the access
    /// token is invalid or `track` is empty.
    pub async fn play(&self, track: &str) -> bool {
        if track.is_empty() {
            warn!("not playing: no track given");
            return false;
        }

        if let Err(e) = self.actionable_device() {
            self.report(&e, "playing");
            return false;
        }

        let uris = [track.to_owned()];
        let uris = &uris;

        let result = RetryPolicy::new(self.config.play_attempts, self.config.play_backoff)
            .run(
                |attempt| async move {
                    let device_id = self.actionable_device()?;
                    trace!("play attempt {attempt}");

                    self.activate().await?;
                    tokio::time::sleep(self.config.settle_delay).await;

                    self.check_token()?;
                    self.api.start_playback(device_id, uris).await
                },
                |e| {
                    !e.kind.is_authorization()
                        && !matches!(
                            e.kind,
                            ErrorKind::Cancelled | ErrorKind::FailedPrecondition
                        )
                },
            )
            .await;

        match result {
            Ok(()) => {
                info!("playing {track}");
                true
            }
            Err(e) => {
                self.report(&e, &format!("playing {track}"));
                false
            }
        }
    }

    pub async fn toggle_play(&self) {
        if let Some(session) = &self.session {
            if let Err(e) = session.player.toggle_play().await {
                self.report(&e, "toggling playback");
            }
        }
    }

    pub async fn skip_next(&self) {
        if let Some(session) = &self.session {
            if let Err(e) = session.player.next_track().await {
                self.report(&e, "skipping to next track");
            }
        }
    }

    pub async fn skip_previous(&self) {
        if let Some(session) = &self.session {
            if let Err(e) = session.player.previous_track().await {
                self.report(&e, "skipping to previous track");
            }
        }
    }

    /// Seeks to `position`. The local position follows immediately, clamped
    /// at the duration, and stays put if the device fails to seek: the next
    /// notification corrects it.
    pub async fn seek(&mut self, position: Duration) {
        let Some(session) = self.session.as_ref() else {
            return;
        };

        self.state.set_position(position);
        if self.estimator.is_running() {
            self.estimator.rebase(&self.state);
        }

        if let Err(e) = session.player.seek(position).await {
            warn!("seeking to {}ms failed: {e}", position.as_millis());
        }
    }

    /// Tears down the session: stops the position ticker, pauses and
    /// disconnects the device and resets all state.
    ///
    /// Never fails: failing steps are logged and skipped. Calling it again
    /// has no further effect. The session is only released after the device
    /// is disconnected, so a teardown that is dropped midway is completed by
    /// the next call.
    pub async fn disconnect(&mut self) {
        self.estimator.stop();

        if let Some(session) = self.session.as_mut() {
            if let Err(e) = session.player.pause().await {
                warn!("pausing device failed: {e}");
            }

            for kind in session.registered.drain(..) {
                if !session.player.remove_listener(kind) {
                    debug!("{kind} listener was already removed");
                }
            }

            if let Err(e) = session.player.disconnect().await {
                warn!("disconnecting device failed: {e}");
            }
        }

        self.session = None;
        self.state = PlaybackState::default();

        if self.lifecycle != Lifecycle::TornDown {
            self.transition(Lifecycle::TornDown);
            self.emit(Event::TornDown);
        }
    }

    /// The device identifier, if the controller may act on the device.
    fn actionable_device(&self) -> Result<&str> {
        if self.lifecycle != Lifecycle::Ready {
            return Err(Error::failed_precondition(format!(
                "session is {}",
                self.lifecycle
            )));
        }

        let device_id = self
            .device_id()
            .ok_or_else(|| Error::failed_precondition("device has no id yet"))?;

        if !self.tokens.is_valid() {
            return Err(Error::unauthenticated("no valid access token"));
        }

        Ok(device_id)
    }

    fn check_token(&self) -> Result<()> {
        if self.tokens.is_valid() {
            Ok(())
        } else {
            Err(Error::cancelled("access token expired"))
        }
    }

    fn report(&self, e: &Error, action: &str) {
        match e.kind {
            kind if kind.is_authorization() => {
                error!("{action} failed: {e}");
                self.emit(Event::AuthorizationFailed);
            }
            ErrorKind::NotFound => debug!("{action} failed: {e}"),
            _ => warn!("{action} failed: {e}"),
        }
    }

    fn transition(&mut self, lifecycle: Lifecycle) {
        if self.lifecycle != lifecycle {
            info!("session {} -> {lifecycle}", self.lifecycle);
            self.lifecycle = lifecycle;
        }
    }

    fn emit(&self, event: Event) {
        if let Some(event_tx) = &self.event_tx {
            if event_tx.send(event).is_err() {
                trace!("no receiver for {event:?}");
            }
        }
    }
}
