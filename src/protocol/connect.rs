//! Devices and playback targets of the remote device control API.
//!
//! # Wire Format
//!
//! `GET me/player`:
//! ```json
//! {
//!     "device": {
//!         "id": "0d1841b0976bae2a3a310dd74c0f3df354899bc8",
//!         "is_active": true,
//!         "name": "Living Room",
//!         "type": "Computer",
//!         "volume_percent": 50
//!     },
//!     "progress_ms": 5000,
//!     "is_playing": true,
//!     "item": { "uri": "spotify:track:...", "name": "...", "duration_ms": 200000 }
//! }
//! ```
//!
//! Answered with `204 No Content` when the account has no active device.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DefaultOnNull, DurationMilliSeconds};

use super::catalog::Track;

#[derive(Clone, Debug, Eq, PartialEq, Deserialize, Hash)]
pub struct Device {
    /// Restricted devices may not report an identifier.
    #[serde(default)]
    pub id: Option<String>,

    #[serde(default)]
    pub is_active: bool,

    #[serde(default)]
    pub is_restricted: bool,

    pub name: String,

    #[serde(rename = "type", default)]
    pub kind: String,

    #[serde(default)]
    pub volume_percent: Option<u8>,
}

impl Device {
    /// Whether this device is the account's active playback target and has
    /// identifier `device_id`.
    #[must_use]
    pub fn is_active_with_id(&self, device_id: &str) -> bool {
        self.is_active && self.id.as_deref() == Some(device_id)
    }
}

#[serde_as]
#[derive(Clone, Debug, Eq, PartialEq, Deserialize)]
pub struct Devices {
    #[serde_as(as = "DefaultOnNull")]
    #[serde(default)]
    pub devices: Vec<Device>,
}

/// The account's current playback target and what it plays.
#[serde_as]
#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct CurrentPlayback {
    #[serde(default)]
    pub device: Option<Device>,

    #[serde(default)]
    pub is_playing: bool,

    #[serde_as(as = "Option<DurationMilliSeconds<u64>>")]
    pub progress_ms: Option<Duration>,

    #[serde(default)]
    pub item: Option<Track>,
}

/// Body of `PUT me/player`.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct TransferPlayback<'a> {
    pub device_ids: [&'a str; 1],

    /// Whether to start playing on the new device. Activation never wants
    /// this, so that transferring does not start playback as a side effect.
    pub play: bool,
}

/// Body of `PUT me/player/play`.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct StartPlayback<'a> {
    pub uris: &'a [String],
}

/// Error body of the Web API.
///
/// ```json
/// { "error": { "status": 404, "message": "Device not found" } }
/// ```
#[derive(Clone, Debug, Eq, PartialEq, Deserialize)]
pub struct ApiErrorResponse {
    pub error: ApiError,
}

#[derive(Clone, Debug, Eq, PartialEq, Deserialize)]
pub struct ApiError {
    pub status: u16,

    #[serde(default)]
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_current_playback() {
        let body = r#"{
            "device": {"id": "abc", "is_active": true, "name": "Den", "type": "Computer", "volume_percent": 40},
            "progress_ms": 5000,
            "is_playing": true,
            "item": {"id": "t1", "uri": "spotify:track:t1", "name": "Song", "duration_ms": 200000}
        }"#;
        let playback: CurrentPlayback = serde_json::from_str(body).unwrap();

        let device = playback.device.unwrap();
        assert!(device.is_active_with_id("abc"));
        assert!(!device.is_active_with_id("xyz"));
        assert_eq!(playback.progress_ms, Some(Duration::from_secs(5)));
        assert_eq!(playback.item.unwrap().duration, Duration::from_secs(200));
    }

    #[test]
    fn transfer_body_never_implies_play() {
        let body = TransferPlayback {
            device_ids: ["abc"],
            play: false,
        };
        assert_eq!(
            serde_json::to_string(&body).unwrap(),
            r#"{"device_ids":["abc"],"play":false}"#
        );
    }

    #[test]
    fn null_device_list_is_empty() {
        let devices: Devices = serde_json::from_str(r#"{"devices":null}"#).unwrap();
        assert!(devices.devices.is_empty());
    }

    #[test]
    fn parses_error_body() {
        let body = r#"{"error": {"status": 404, "message": "Device not found"}}"#;
        let response: ApiErrorResponse = serde_json::from_str(body).unwrap();
        assert_eq!(response.error.status, 404);
        assert_eq!(response.error.message, "Device not found");
    }
}
