//! HTTP client with rate limiting for the authorization server and Web API.
//!
//! This module provides a wrapper around `reqwest::Client` that adds:
//! * Request rate limiting so that retry loops cannot hammer the API
//! * Bearer and basic authorization helpers
//! * Consistent timeouts and headers
//!
//! # Example
//!
//! ```rust
//! use remoteplay::http::Client;
//!
//! let client = Client::new(&Config::user_agent())?;
//! let mut request = client.get(url, "");
//! Client::bearer(&mut request, &access_token)?;
//! let response = client.execute(request).await?;
//! ```

use std::{future::Future, num::NonZeroU32, time::Duration};

use futures_util::{FutureExt, TryFutureExt};
use governor::{DefaultDirectRateLimiter, Quota};
use reqwest::{
    self,
    header::{HeaderValue, AUTHORIZATION, CONTENT_TYPE},
    Body, Method, Url,
};

use crate::error::Result;

/// HTTP client with built-in rate limiting.
pub struct Client {
    /// Direct access to the underlying client without rate limiting.
    pub unlimited: reqwest::Client,

    rate_limiter: DefaultDirectRateLimiter,
}

impl Client {
    /// Rolling window in which at most [`Self::RATE_LIMIT_CALLS_PER_INTERVAL`]
    /// calls go out.
    const RATE_LIMIT_INTERVAL: Duration = Duration::from_secs(5);

    /// Maximum calls per interval. Bursts up to this amount pass unthrottled,
    /// requests beyond it are delayed.
    const RATE_LIMIT_CALLS_PER_INTERVAL: u8 = 50;

    /// Duration to keep idle connections alive.
    const KEEPALIVE_TIMEOUT: Duration = Duration::from_secs(60);

    /// Duration to wait for individual network reads.
    ///
    /// Keeps a stalled request from blocking a retry loop past its bound.
    const READ_TIMEOUT: Duration = Duration::from_secs(5);

    pub const JSON_CONTENT: HeaderValue = HeaderValue::from_static("application/json");

    pub const FORM_CONTENT: HeaderValue =
        HeaderValue::from_static("application/x-www-form-urlencoded");

    /// Creates a new client.
    ///
    /// # Errors
    ///
    /// Returns error if the HTTP client cannot be built, for example when the
    /// user agent is not a valid header value.
    ///
    /// # Panics
    ///
    /// Panics if rate limit parameters are zero.
    pub fn new(user_agent: &str) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .tcp_keepalive(Self::KEEPALIVE_TIMEOUT)
            .read_timeout(Self::READ_TIMEOUT)
            .user_agent(user_agent);

        let replenish_interval =
            Self::RATE_LIMIT_INTERVAL / u32::from(Self::RATE_LIMIT_CALLS_PER_INTERVAL);
        let quota = Quota::with_period(replenish_interval)
            .expect("quota time interval is zero")
            .allow_burst(
                NonZeroU32::new(Self::RATE_LIMIT_CALLS_PER_INTERVAL.into())
                    .expect("calls per interval is zero"),
            );

        Ok(Self {
            unlimited: http_client.build()?,
            rate_limiter: governor::RateLimiter::direct(quota),
        })
    }

    /// Builds a request with specified method, URL and body.
    pub fn request<U, T>(&self, method: Method, url: U, body: T) -> reqwest::Request
    where
        U: Into<Url>,
        T: Into<Body>,
    {
        let mut request = reqwest::Request::new(method, url.into());
        let body_mut = request.body_mut();
        *body_mut = Some(body.into());

        request
    }

    pub fn get<U, T>(&self, url: U, body: T) -> reqwest::Request
    where
        U: Into<Url>,
        T: Into<Body>,
    {
        self.request(Method::GET, url, body)
    }

    pub fn post<U, T>(&self, url: U, body: T) -> reqwest::Request
    where
        U: Into<Url>,
        T: Into<Body>,
    {
        self.request(Method::POST, url, body)
    }

    pub fn put<U, T>(&self, url: U, body: T) -> reqwest::Request
    where
        U: Into<Url>,
        T: Into<Body>,
    {
        self.request(Method::PUT, url, body)
    }

    /// Builds a PUT request with a JSON body.
    pub fn put_json<U>(&self, url: U, json: String) -> Result<reqwest::Request>
    where
        U: Into<Url>,
    {
        let mut request = self.put(url, json);
        request
            .headers_mut()
            .try_insert(CONTENT_TYPE, Self::JSON_CONTENT)?;
        Ok(request)
    }

    /// Sets `Authorization: Bearer <token>` on the request.
    ///
    /// # Errors
    ///
    /// Returns error if the token contains characters that are not allowed in
    /// a header value.
    pub fn bearer(request: &mut reqwest::Request, token: &str) -> Result<()> {
        let mut value = HeaderValue::from_str(&format!("Bearer {token}"))?;
        value.set_sensitive(true);
        request.headers_mut().try_insert(AUTHORIZATION, value)?;
        Ok(())
    }

    /// Sets `Authorization: Basic <credentials>` on the request.
    pub fn basic(request: &mut reqwest::Request, credentials: &str) -> Result<()> {
        let mut value = HeaderValue::from_str(&format!("Basic {credentials}"))?;
        value.set_sensitive(true);
        request.headers_mut().try_insert(AUTHORIZATION, value)?;
        Ok(())
    }

    /// Executes a request with rate limiting.
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// * Request execution fails
    /// * Network error occurs
    pub fn execute(
        &self,
        request: reqwest::Request,
    ) -> impl Future<Output = Result<reqwest::Response>> + '_ {
        // No need to await with jitter because the level of concurrency is low.
        let throttle = self.rate_limiter.until_ready();
        throttle.then(|()| self.unlimited.execute(request).map_err(Into::into))
    }
}
