//! Events emitted by the playback session controller.
//!
//! Controller commands report failure as `false` or as a silent no-op, so
//! that callers need not handle errors on every button press. Conditions the
//! surrounding application has to act upon are announced here instead: most
//! importantly [`Event::AuthorizationFailed`], upon which the token lifecycle
//! should refresh the token or send the user back to the login.
//!
//! # Example
//!
//! ```rust
//! use remoteplay::events::Event;
//!
//! fn handle_event(event: Event) {
//!     match event {
//!         Event::Ready => println!("device ready"),
//!         Event::AuthorizationFailed => println!("please log in again"),
//!         _ => {}
//!     }
//! }
//! ```

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Event {
    /// The device received its identifier and accepts commands.
    Ready,

    /// The device went offline. It is reactivated by the next command.
    NotReady,

    /// An authoritative playback snapshot replaced the local state.
    StateChanged,

    /// The access token was rejected.
    AuthorizationFailed,

    /// The playback SDK did not become available in time. The session is
    /// abandoned until a new token arrives.
    SdkUnavailable,

    /// The playback SDK reported an initialization, account or playback
    /// error.
    SdkError,

    /// The session was torn down.
    TornDown,
}
