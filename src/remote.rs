//! Remote device control over the Web API.
//!
//! [`DeviceControl`] is the part of the Web API that the controller needs to
//! make its device the account's active device and to start playback on it.
//! [`WebApi`] implements it over HTTP, and offers the remaining player
//! endpoints used by [`crate::connect`] and the JSON listing used by
//! [`crate::catalog`].
//!
//! Every call bears the current access token, asked from a [`TokenWatch`]
//! right before the request. Without a valid token, calls fail with
//! `Unauthenticated` before anything goes over the network.
//!
//! Commands are acknowledged with `200 OK`, `202 Accepted` or
//! `204 No Content`. Any other status is an error of the kind that
//! [`Error::from_status`] maps it to, so that a `404` reads as `NotFound`:
//! the device is not (yet) known to the backend.

use std::{fmt::Debug, time::Duration};

use async_trait::async_trait;
use reqwest::{Method, StatusCode};
use serde::Deserialize;
use url::Url;

use crate::{
    config::Config,
    error::{Error, Result},
    http::Client as HttpClient,
    protocol::{
        self,
        connect::{
            ApiErrorResponse, CurrentPlayback, Device, Devices, StartPlayback, TransferPlayback,
        },
    },
    tokens::TokenWatch,
};

/// Device endpoints the controller depends on.
#[async_trait]
pub trait DeviceControl: Send + Sync {
    /// The account's current playback device, or `None` if no device is
    /// active.
    async fn current_playback(&self) -> Result<Option<Device>>;

    /// Moves playback to `device_id`. With `play` unset, playback does not
    /// start as a side effect.
    async fn transfer_playback(&self, device_id: &str, play: bool) -> Result<()>;

    /// Starts playing `uris` on `device_id`.
    async fn start_playback(&self, device_id: &str, uris: &[String]) -> Result<()>;
}

/// Web API client.
pub struct WebApi {
    http_client: HttpClient,
    base: Url,
    tokens: TokenWatch,
}

impl WebApi {
    /// # Errors
    ///
    /// Will return `Err` if the HTTP client cannot be built.
    pub fn new(config: &Config, tokens: TokenWatch) -> Result<Self> {
        Ok(Self {
            http_client: HttpClient::new(&Config::user_agent())?,
            base: config.api_url.clone(),
            tokens,
        })
    }

    /// Resolves `path` against the API base.
    ///
    /// # Errors
    ///
    /// Will return `Err` if `path` does not form a valid URL.
    pub fn url(&self, path: &str) -> Result<Url> {
        endpoint(&self.base, path, &[])
    }

    /// Fetches and parses a JSON document. Returns `None` when the server
    /// answers `204 No Content`.
    ///
    /// # Errors
    ///
    /// Will return `Err` if there is no valid access token, the request
    /// fails, the server does not answer with success or the body does not
    /// parse.
    pub async fn get_json<T>(&self, url: Url) -> Result<Option<T>>
    where
        T: for<'de> Deserialize<'de> + Debug,
    {
        let origin = url.path().to_owned();
        let request = self.authorized(Method::GET, url, String::new())?;

        let response = self.http_client.execute(request).await?;
        let status = response.status();
        let body = response.text().await?;

        if status == StatusCode::NO_CONTENT {
            trace!("{origin}: no content");
            return Ok(None);
        }

        if !status.is_success() {
            return Err(status_error(status, &body, &origin));
        }

        protocol::json(&body, &origin).map(Some)
    }

    /// The account's current playback, or `None` if no device is active.
    ///
    /// # Errors
    ///
    /// See [`get_json`](Self::get_json).
    pub async fn playback(&self) -> Result<Option<CurrentPlayback>> {
        self.get_json(self.url("me/player")?).await
    }

    /// Devices currently available to the account.
    ///
    /// # Errors
    ///
    /// See [`get_json`](Self::get_json).
    pub async fn devices(&self) -> Result<Vec<Device>> {
        let devices: Option<Devices> = self.get_json(self.url("me/player/devices")?).await?;
        Ok(devices.map(|list| list.devices).unwrap_or_default())
    }

    /// # Errors
    ///
    /// Will return `Err` if the command is not acknowledged.
    pub async fn pause(&self, device_id: &str) -> Result<()> {
        let url = endpoint(&self.base, "me/player/pause", &[("device_id", device_id)])?;
        self.command(Method::PUT, url, String::new()).await
    }

    /// Resumes the current context.
    ///
    /// # Errors
    ///
    /// Will return `Err` if the command is not acknowledged.
    pub async fn resume(&self, device_id: &str) -> Result<()> {
        let url = endpoint(&self.base, "me/player/play", &[("device_id", device_id)])?;
        self.command(Method::PUT, url, String::new()).await
    }

    /// # Errors
    ///
    /// Will return `Err` if the command is not acknowledged.
    pub async fn seek(&self, device_id: &str, position: Duration) -> Result<()> {
        let position_ms = position.as_millis().to_string();
        let url = endpoint(
            &self.base,
            "me/player/seek",
            &[("position_ms", &position_ms), ("device_id", device_id)],
        )?;
        self.command(Method::PUT, url, String::new()).await
    }

    /// # Errors
    ///
    /// Will return `Err` if the command is not acknowledged.
    pub async fn next(&self, device_id: &str) -> Result<()> {
        let url = endpoint(&self.base, "me/player/next", &[("device_id", device_id)])?;
        self.command(Method::POST, url, String::new()).await
    }

    /// # Errors
    ///
    /// Will return `Err` if the command is not acknowledged.
    pub async fn previous(&self, device_id: &str) -> Result<()> {
        let url = endpoint(&self.base, "me/player/previous", &[("device_id", device_id)])?;
        self.command(Method::POST, url, String::new()).await
    }

    /// Sets the volume in percent, clamped at 100.
    ///
    /// # Errors
    ///
    /// Will return `Err` if the command is not acknowledged.
    pub async fn set_volume(&self, device_id: &str, percent: u8) -> Result<()> {
        let percent = percent.min(100).to_string();
        let url = endpoint(
            &self.base,
            "me/player/volume",
            &[("volume_percent", &percent), ("device_id", device_id)],
        )?;
        self.command(Method::PUT, url, String::new()).await
    }

    /// Builds a request bearing the current access token.
    fn authorized(&self, method: Method, url: Url, body: String) -> Result<reqwest::Request> {
        let Some(token) = self.tokens.access_token() else {
            return Err(Error::unauthenticated("no valid access token"));
        };

        let mut request = self.http_client.request(method, url, body);
        HttpClient::bearer(&mut request, &token)?;
        Ok(request)
    }

    async fn command(&self, method: Method, url: Url, body: String) -> Result<()> {
        let origin = format!("{method} {}", url.path());
        let has_body = !body.is_empty();
        let mut request = self.authorized(method, url, body)?;
        if has_body {
            request
                .headers_mut()
                .try_insert(reqwest::header::CONTENT_TYPE, HttpClient::JSON_CONTENT)?;
        }

        let response = self.http_client.execute(request).await?;
        let status = response.status();
        let body = response.text().await?;
        acknowledge(status, &body, &origin)
    }
}

#[async_trait]
impl DeviceControl for WebApi {
    async fn current_playback(&self) -> Result<Option<Device>> {
        Ok(self.playback().await?.and_then(|playback| playback.device))
    }

    async fn transfer_playback(&self, device_id: &str, play: bool) -> Result<()> {
        let body = serde_json::to_string(&TransferPlayback {
            device_ids: [device_id],
            play,
        })?;
        self.command(Method::PUT, self.url("me/player")?, body).await
    }

    async fn start_playback(&self, device_id: &str, uris: &[String]) -> Result<()> {
        let url = endpoint(&self.base, "me/player/play", &[("device_id", device_id)])?;
        let body = serde_json::to_string(&StartPlayback { uris })?;
        self.command(Method::PUT, url, body).await
    }
}

/// Resolves `path` against `base` and appends `query`.
fn endpoint(base: &Url, path: &str, query: &[(&str, &str)]) -> Result<Url> {
    let mut url = base.join(path)?;
    if !query.is_empty() {
        url.query_pairs_mut().extend_pairs(query);
    }
    Ok(url)
}

/// Whether `status` acknowledges a command.
#[must_use]
pub fn is_acknowledgement(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::OK | StatusCode::ACCEPTED | StatusCode::NO_CONTENT
    )
}

fn acknowledge(status: StatusCode, body: &str, origin: &str) -> Result<()> {
    if is_acknowledgement(status) {
        trace!("{origin}: {status}");
        return Ok(());
    }

    Err(status_error(status, body, origin))
}

fn status_error(status: StatusCode, body: &str, origin: &str) -> Error {
    let detail = match serde_json::from_str::<ApiErrorResponse>(body) {
        Ok(response) if !response.error.message.is_empty() => {
            format!("{origin}: {status} ({})", response.error.message)
        }
        _ => format!("{origin}: {status}"),
    };

    Error::from_status(status, detail)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn acknowledges_success_statuses_only() {
        for status in [StatusCode::OK, StatusCode::ACCEPTED, StatusCode::NO_CONTENT] {
            assert!(acknowledge(status, "", "PUT /v1/me/player").is_ok());
        }

        let e = acknowledge(StatusCode::CREATED, "", "PUT /v1/me/player").unwrap_err();
        assert_eq!(e.kind, ErrorKind::Unknown);
    }

    #[test]
    fn device_not_found_is_not_found() {
        let body = r#"{"error": {"status": 404, "message": "Device not found"}}"#;
        let e = acknowledge(StatusCode::NOT_FOUND, body, "PUT /v1/me/player").unwrap_err();
        assert_eq!(e.kind, ErrorKind::NotFound);
        assert!(e.to_string().contains("Device not found"));
    }

    #[test]
    fn expired_token_is_authorization_failure() {
        let e = acknowledge(StatusCode::UNAUTHORIZED, "", "PUT /v1/me/player").unwrap_err();
        assert!(e.kind.is_authorization());
    }

    #[test]
    fn endpoints_resolve_below_base() {
        let base = Url::parse("https://api.spotify.com/v1/").unwrap();
        let url = endpoint(&base, "me/player/play", &[("device_id", "abc")]).unwrap();
        assert_eq!(
            url.as_str(),
            "https://api.spotify.com/v1/me/player/play?device_id=abc"
        );

        let url = endpoint(&base, "me/player", &[]).unwrap();
        assert_eq!(url.as_str(), "https://api.spotify.com/v1/me/player");
    }
}
