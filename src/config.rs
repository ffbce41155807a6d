//! Configuration for the authorization flow, the Web API and the player.
//!
//! Configuration is read from a TOML file. Only the client credentials and
//! the redirect URI are required; everything else has a default.
//!
//! ```toml
//! client_id = "..."
//! client_secret = "..."
//! redirect_uri = "http://127.0.0.1:8888/callback"
//!
//! [player]
//! name = "Living Room"
//! volume = 0.5
//! transfer_attempts = 3
//! ```

use std::{fs, path::Path, time::Duration};

use serde::Deserialize;
use serde_with::{serde_as, DurationMilliSeconds};
use url::Url;
use veil::Redact;

use crate::error::{Error, Result};

/// Configuration files hold a handful of keys: anything larger is suspect.
const MAX_FILE_SIZE: u64 = 8 * 1024;

#[derive(Clone, Redact, Deserialize)]
pub struct Config {
    pub client_id: String,

    #[redact]
    pub client_secret: String,

    pub redirect_uri: Url,

    #[serde(default = "Config::default_scopes")]
    pub scopes: Vec<String>,

    #[serde(default = "Config::default_authorize_url")]
    pub authorize_url: Url,

    #[serde(default = "Config::default_token_url")]
    pub token_url: Url,

    /// Base of the Web API. Must end with a slash so that relative paths
    /// join below it.
    #[serde(default = "Config::default_api_url")]
    pub api_url: Url,

    #[serde(default)]
    pub player: PlayerConfig,
}

/// Tunables of the playback session controller.
///
/// Durations are given in milliseconds in the configuration file.
#[serde_as]
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default)]
pub struct PlayerConfig {
    /// Name under which the playback device is registered.
    pub name: String,

    /// Initial volume between 0.0 and 1.0.
    pub volume: f32,

    /// How often to check whether the playback SDK became available.
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub sdk_poll_interval: Duration,

    /// How long to wait for the playback SDK before giving up on the session.
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub sdk_timeout: Duration,

    /// Maximum number of playback transfer requests per activation.
    pub transfer_attempts: u32,

    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub transfer_delay: Duration,

    /// Maximum number of full play attempts, each including activation.
    pub play_attempts: u32,

    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub play_backoff: Duration,

    /// Pause between activating the device and starting playback on it.
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub settle_delay: Duration,

    /// Interval at which the position is interpolated while playing.
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub position_tick: Duration,

    /// How often the Web API device adapter polls devices and state.
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub device_poll_interval: Duration,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            name: env!("CARGO_PKG_NAME").to_owned(),
            volume: 0.5,
            sdk_poll_interval: Duration::from_millis(100),
            sdk_timeout: Duration::from_secs(10),
            transfer_attempts: 3,
            transfer_delay: Duration::from_secs(1),
            play_attempts: 2,
            play_backoff: Duration::from_millis(500),
            settle_delay: Duration::from_millis(500),
            position_tick: Duration::from_secs(1),
            device_poll_interval: Duration::from_secs(1),
        }
    }
}

impl Config {
    fn default_scopes() -> Vec<String> {
        [
            "user-read-private",
            "user-read-email",
            "user-read-playback-state",
            "user-modify-playback-state",
            "streaming",
        ]
        .into_iter()
        .map(ToOwned::to_owned)
        .collect()
    }

    fn default_authorize_url() -> Url {
        Url::parse("https://accounts.spotify.com/authorize").expect("invalid authorize url")
    }

    fn default_token_url() -> Url {
        Url::parse("https://accounts.spotify.com/api/token").expect("invalid token url")
    }

    fn default_api_url() -> Url {
        Url::parse("https://api.spotify.com/v1/").expect("invalid api url")
    }

    /// Loads the configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Will return `Err` if:
    /// - the file does not exist or cannot be read
    /// - the file is larger than a configuration file should be
    /// - the contents are not valid TOML or miss required keys
    /// - the player settings are out of range
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        // Prevent out-of-memory condition: the file should be small.
        let file_size = fs::metadata(path)?.len();
        if file_size > MAX_FILE_SIZE {
            return Err(Error::out_of_range(format!(
                "{} is too large ({file_size} bytes)",
                path.display()
            )));
        }

        let contents = fs::read_to_string(path)?;
        contents.parse()
    }

    /// The `User-Agent` to present to the authorization server and Web API.
    #[must_use]
    pub fn user_agent() -> String {
        let app_name = env!("CARGO_PKG_NAME");
        let app_version = env!("CARGO_PKG_VERSION");

        let os_name = match std::env::consts::OS {
            "macos" => "osx",
            other => other,
        };
        let os_version = sysinfo::System::os_version().unwrap_or_else(|| String::from("0"));

        let user_agent = format!("{app_name}/{app_version} (Rust; {os_name}/{os_version})");
        trace!("user agent: {user_agent}");

        user_agent
    }
}

impl std::str::FromStr for Config {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let config: Self = toml::from_str(s)?;

        if config.client_id.is_empty() {
            return Err(Error::invalid_argument("client_id must not be empty"));
        }

        if !(0.0..=1.0).contains(&config.player.volume) {
            return Err(Error::out_of_range(format!(
                "volume must be between 0.0 and 1.0 but is {}",
                config.player.volume
            )));
        }

        if config.player.transfer_attempts == 0 || config.player.play_attempts == 0 {
            return Err(Error::out_of_range("attempt bounds must be at least 1"));
        }

        if config.player.position_tick.is_zero() || config.player.sdk_poll_interval.is_zero() {
            return Err(Error::out_of_range("timer intervals must not be zero"));
        }

        if !config.api_url.path().ends_with('/') {
            warn!("api_url {} does not end with a slash", config.api_url);
        }

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    const MINIMAL: &str = r#"
        client_id = "abc"
        client_secret = "shh"
        redirect_uri = "http://127.0.0.1:8888/callback"
    "#;

    #[test]
    fn minimal_config_uses_defaults() {
        let config: Config = MINIMAL.parse().unwrap();
        assert_eq!(config.player, PlayerConfig::default());
        assert_eq!(config.scopes.len(), 5);
        assert_eq!(config.api_url.as_str(), "https://api.spotify.com/v1/");
    }

    #[test]
    fn player_durations_are_milliseconds() {
        let toml = format!("{MINIMAL}\n[player]\ntransfer_delay = 250\nname = \"Kitchen\"\n");
        let config: Config = toml.parse().unwrap();
        assert_eq!(config.player.transfer_delay, Duration::from_millis(250));
        assert_eq!(config.player.name, "Kitchen");
        assert_eq!(config.player.transfer_attempts, 3);
    }

    #[test]
    fn rejects_zero_attempts() {
        let toml = format!("{MINIMAL}\n[player]\nplay_attempts = 0\n");
        let err = toml.parse::<Config>().unwrap_err();
        assert_eq!(err.kind, ErrorKind::OutOfRange);
    }

    #[test]
    fn secret_is_redacted() {
        let config: Config = MINIMAL.parse().unwrap();
        assert!(!format!("{config:?}").contains("shh"));
    }
}
