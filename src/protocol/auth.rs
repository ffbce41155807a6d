//! Token responses from the authorization server.
//!
//! # Example Response
//!
//! ```json
//! {
//!     "access_token": "secret_token",
//!     "token_type": "Bearer",
//!     "scope": "streaming user-read-email",
//!     "expires_in": 3600,
//!     "refresh_token": "secret_refresh_token"
//! }
//! ```
//!
//! Refresh responses may omit `refresh_token`, in which case the previous
//! refresh token stays valid.

use std::time::Duration;

use serde::Deserialize;
use serde_with::{formats::Flexible, serde_as, DurationSeconds};
use veil::Redact;

#[serde_as]
#[derive(Clone, Eq, PartialEq, Deserialize, Redact, Hash)]
pub struct TokenResponse {
    #[redact]
    pub access_token: String,

    #[serde(default)]
    pub token_type: String,

    #[serde(default)]
    pub scope: String,

    /// How long the access token remains valid.
    #[serde_as(as = "Option<DurationSeconds<u64, Flexible>>")]
    pub expires_in: Option<Duration>,

    #[redact]
    #[serde(default)]
    pub refresh_token: Option<String>,
}

/// Error body of a rejected token request.
#[derive(Clone, Debug, Eq, PartialEq, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(default)]
    pub error_description: Option<String>,
}
