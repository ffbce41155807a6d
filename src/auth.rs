//! Authorization code flow against the authorization server.
//!
//! The flow has three legs:
//! 1. Send the user to [`Authorization::authorize_url`]
//! 2. Parse the redirect with [`Callback::parse`]
//! 3. Trade the code with [`Authorization::exchange_code`]
//!
//! Afterwards [`Authorization::refresh`] trades the refresh token for new
//! access tokens. Token requests authenticate the client with HTTP Basic
//! credentials and a form-encoded body.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use url::{form_urlencoded, Url};
use veil::Redact;

use crate::{
    config::Config,
    error::{Error, Result},
    http::Client as HttpClient,
    protocol::{
        self,
        auth::{ErrorResponse, TokenResponse},
    },
};

pub struct Authorization {
    http_client: HttpClient,
    client_id: String,
    credentials: String,
    redirect_uri: Url,
    scopes: Vec<String>,
    authorize_url: Url,
    token_url: Url,
}

/// Query parameters of the redirect back from the authorization page.
#[derive(Clone, Default, PartialEq, Eq, Redact)]
pub struct Callback {
    #[redact]
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
}

impl Callback {
    /// Extracts `code`, `state` and `error` from the redirect URL.
    #[must_use]
    pub fn parse(url: &Url) -> Self {
        let mut callback = Self::default();
        for (key, value) in url.query_pairs() {
            match key.as_ref() {
                "code" => callback.code = Some(value.into_owned()),
                "state" => callback.state = Some(value.into_owned()),
                "error" => callback.error = Some(value.into_owned()),
                _ => {}
            }
        }
        callback
    }

    /// The authorization code, if the user granted access and the `state`
    /// matches the one sent out.
    ///
    /// # Errors
    ///
    /// Will return `Err` if access was denied, the state does not match or
    /// the redirect carries no code.
    pub fn into_code(self, expected_state: Option<&str>) -> Result<String> {
        if let Some(error) = self.error {
            return Err(Error::permission_denied(format!("authorization denied: {error}")));
        }

        if let Some(expected) = expected_state {
            if self.state.as_deref() != Some(expected) {
                return Err(Error::invalid_argument("authorization state mismatch"));
            }
        }

        self.code
            .ok_or_else(|| Error::invalid_argument("redirect carries no authorization code"))
    }
}

/// Builds the URL of the authorization page.
///
/// `state` is echoed back in the redirect and should be checked with
/// [`Callback::into_code`].
#[must_use]
pub fn authorize_url(
    base: &Url,
    client_id: &str,
    redirect_uri: &Url,
    scopes: &[String],
    state: &str,
) -> Url {
    let mut url = base.clone();
    url.query_pairs_mut()
        .append_pair("client_id", client_id)
        .append_pair("response_type", "code")
        .append_pair("redirect_uri", redirect_uri.as_str())
        .append_pair("scope", &scopes.join(" "))
        .append_pair("state", state);
    url
}

impl Authorization {
    /// # Errors
    ///
    /// Will return `Err` if the HTTP client cannot be built.
    pub fn new(config: &Config) -> Result<Self> {
        let http_client = HttpClient::new(&Config::user_agent())?;
        let credentials =
            STANDARD.encode(format!("{}:{}", config.client_id, config.client_secret));

        Ok(Self {
            http_client,
            client_id: config.client_id.clone(),
            credentials,
            redirect_uri: config.redirect_uri.clone(),
            scopes: config.scopes.clone(),
            authorize_url: config.authorize_url.clone(),
            token_url: config.token_url.clone(),
        })
    }

    /// The URL of the authorization page to send the user to.
    #[must_use]
    pub fn authorize_url(&self, state: &str) -> Url {
        authorize_url(
            &self.authorize_url,
            &self.client_id,
            &self.redirect_uri,
            &self.scopes,
            state,
        )
    }

    /// Exchanges an authorization code for tokens.
    ///
    /// # Errors
    ///
    /// Will return `Err` if the request fails or the server rejects the code.
    pub async fn exchange_code(&self, code: &str) -> Result<TokenResponse> {
        debug!("exchanging authorization code");
        let body = form_urlencoded::Serializer::new(String::new())
            .append_pair("grant_type", "authorization_code")
            .append_pair("code", code)
            .append_pair("redirect_uri", self.redirect_uri.as_str())
            .finish();

        self.token_request(body, "token (authorization_code)").await
    }

    /// Exchanges a refresh token for a new access token.
    ///
    /// # Errors
    ///
    /// Will return `Err` if the request fails or the server rejects the
    /// refresh token.
    pub async fn refresh(&self, refresh_token: &str) -> Result<TokenResponse> {
        debug!("refreshing access token");
        let body = form_urlencoded::Serializer::new(String::new())
            .append_pair("grant_type", "refresh_token")
            .append_pair("refresh_token", refresh_token)
            .finish();

        self.token_request(body, "token (refresh_token)").await
    }

    async fn token_request(&self, body: String, origin: &str) -> Result<TokenResponse> {
        let mut request = self.http_client.post(self.token_url.clone(), body);
        request
            .headers_mut()
            .try_insert(reqwest::header::CONTENT_TYPE, HttpClient::FORM_CONTENT)?;
        HttpClient::basic(&mut request, &self.credentials)?;

        let response = self.http_client.execute(request).await?;
        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            let detail = serde_json::from_str::<ErrorResponse>(&body).map_or_else(
                |_| format!("{origin} failed with {status}"),
                |e| match e.error_description {
                    Some(description) => format!("{}: {description}", e.error),
                    None => e.error,
                },
            );
            // The server answers rejected grants with 400 `invalid_grant`.
            return Err(Error::from_status(status, detail));
        }

        protocol::json(&body, origin)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn config() -> Config {
        r#"
            client_id = "client"
            client_secret = "secret"
            redirect_uri = "http://127.0.0.1:8888/callback"
        "#
        .parse()
        .unwrap()
    }

    #[test]
    fn authorize_url_carries_client_and_scopes() {
        let config = config();
        let url = authorize_url(
            &config.authorize_url,
            &config.client_id,
            &config.redirect_uri,
            &config.scopes,
            "xyz",
        );

        let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        assert!(pairs.contains(&("client_id".to_owned(), "client".to_owned())));
        assert!(pairs.contains(&("response_type".to_owned(), "code".to_owned())));
        assert!(pairs.contains(&("state".to_owned(), "xyz".to_owned())));
        assert!(pairs
            .iter()
            .any(|(key, value)| key == "scope" && value.split(' ').any(|s| s == "streaming")));
    }

    #[test]
    fn callback_yields_code_for_matching_state() {
        let url = Url::parse("http://127.0.0.1:8888/callback?code=abc&state=xyz").unwrap();
        let code = Callback::parse(&url).into_code(Some("xyz")).unwrap();
        assert_eq!(code, "abc");
    }

    #[test]
    fn callback_rejects_denial_and_state_mismatch() {
        let denied = Url::parse("http://127.0.0.1:8888/callback?error=access_denied").unwrap();
        let err = Callback::parse(&denied).into_code(None).unwrap_err();
        assert_eq!(err.kind, ErrorKind::PermissionDenied);

        let forged = Url::parse("http://127.0.0.1:8888/callback?code=abc&state=evil").unwrap();
        let err = Callback::parse(&forged).into_code(Some("xyz")).unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidArgument);
    }
}
