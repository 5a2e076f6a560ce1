//! Fetch-style transport

use super::{TransportBody, TransportGuard};
use crate::error::{Result, ShieldError};
use crate::types::Context;
use async_trait::async_trait;
use bytes::Bytes;
use serde::de::DeserializeOwned;
use std::sync::Arc;

/// Outbound request for a fetch-style call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    pub method: String,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<TransportBody>,
}

impl FetchRequest {
    pub fn new(method: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            url: url.into(),
            headers: Vec::new(),
            body: None,
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new("GET", url)
    }

    pub fn post(url: impl Into<String>, body: impl Into<TransportBody>) -> Self {
        Self::new("POST", url).body(body)
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn body(mut self, body: impl Into<TransportBody>) -> Self {
        self.body = Some(body.into());
        self
    }
}

impl From<&str> for FetchRequest {
    fn from(url: &str) -> Self {
        Self::get(url)
    }
}

/// Response to a fetch-style call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
}

impl FetchResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_slice(&self.body)?)
    }
}

/// Async request/response transport
#[async_trait]
pub trait Fetch: Send + Sync {
    async fn fetch(&self, request: FetchRequest) -> Result<FetchResponse>;

    /// Whether this transport already carries the shield
    fn is_guarded(&self) -> bool {
        false
    }
}

#[async_trait]
impl<T: Fetch + ?Sized> Fetch for Arc<T> {
    async fn fetch(&self, request: FetchRequest) -> Result<FetchResponse> {
        (**self).fetch(request).await
    }

    fn is_guarded(&self) -> bool {
        (**self).is_guarded()
    }
}

/// Fetch decorator that refuses calls carrying forbidden keys.
///
/// A blocked call fails with `ShieldError::Blocked` and the inner transport
/// is never invoked.
pub struct GuardedFetch<F> {
    inner: F,
    guard: TransportGuard,
}

impl<F: Fetch> GuardedFetch<F> {
    pub fn new(inner: F, guard: TransportGuard) -> Self {
        Self { inner, guard }
    }

    pub fn into_inner(self) -> F {
        self.inner
    }
}

#[async_trait]
impl<F: Fetch> Fetch for GuardedFetch<F> {
    async fn fetch(&self, request: FetchRequest) -> Result<FetchResponse> {
        if let Some(reason) =
            self.guard
                .check(Context::Fetch, Some(&request.url), request.body.as_ref())
        {
            return Err(reason.into_error(Context::Fetch));
        }
        self.inner.fetch(request).await
    }

    fn is_guarded(&self) -> bool {
        true
    }
}

/// `reqwest`-backed fetch transport
#[derive(Debug, Clone, Default)]
pub struct ReqwestFetch {
    client: reqwest::Client,
}

impl ReqwestFetch {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Fetch for ReqwestFetch {
    async fn fetch(&self, request: FetchRequest) -> Result<FetchResponse> {
        execute(&self.client, request).await
    }
}

/// Dispatch a request on `client` and buffer the response
pub(crate) async fn execute(
    client: &reqwest::Client,
    request: FetchRequest,
) -> Result<FetchResponse> {
    let method = reqwest::Method::from_bytes(request.method.to_uppercase().as_bytes())
        .map_err(|e| ShieldError::Transport(format!("invalid method: {}", e)))?;

    let mut builder = client.request(method, request.url.as_str());
    for (name, value) in &request.headers {
        builder = builder.header(name.as_str(), value.as_str());
    }
    if let Some(body) = request.body {
        builder = builder.body(body);
    }

    let response = builder.send().await?;
    let status = response.status().as_u16();
    let headers = response
        .headers()
        .iter()
        .filter_map(|(k, v)| v.to_str().ok().map(|v| (k.to_string(), v.to_string())))
        .collect();
    let body = response.bytes().await?;

    Ok(FetchResponse {
        status,
        headers,
        body,
    })
}
