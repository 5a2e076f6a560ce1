//! Request-object transport
//!
//! Calls happen in two phases: `open` records the method and target, `send`
//! dispatches with an optional body. The guard decides at `send` time, when
//! both the target and the body are known.

use super::fetch::{execute, FetchRequest, FetchResponse};
use super::{redact_url, TransportBody, TransportGuard, DETAIL_BEFORE_SEND};
use crate::error::{Result, ShieldError};
use crate::types::{Context, IncidentMeta};
use std::sync::Arc;
use tokio::task::JoinHandle;

/// Handle to a dispatched request
pub struct PendingResponse(JoinHandle<Result<FetchResponse>>);

impl PendingResponse {
    pub async fn wait(self) -> Result<FetchResponse> {
        self.0
            .await
            .map_err(|e| ShieldError::Transport(format!("request task failed: {}", e)))?
    }
}

/// A single outbound request with separate open and send phases
pub trait RequestObject: Send {
    fn open(&mut self, method: &str, url: &str) -> Result<()>;

    fn send(&mut self, body: Option<TransportBody>) -> Result<()>;

    /// Take the in-flight response, if the transport exposes one
    fn take_response(&mut self) -> Option<PendingResponse> {
        None
    }
}

impl<R: RequestObject + ?Sized> RequestObject for Box<R> {
    fn open(&mut self, method: &str, url: &str) -> Result<()> {
        (**self).open(method, url)
    }

    fn send(&mut self, body: Option<TransportBody>) -> Result<()> {
        (**self).send(body)
    }

    fn take_response(&mut self) -> Option<PendingResponse> {
        (**self).take_response()
    }
}

/// Constructor for request objects
pub trait RequestFactory: Send + Sync {
    fn create(&self) -> Box<dyn RequestObject>;

    /// Whether objects from this factory already carry the shield
    fn is_guarded(&self) -> bool {
        false
    }
}

impl<T: RequestFactory + ?Sized> RequestFactory for Arc<T> {
    fn create(&self) -> Box<dyn RequestObject> {
        (**self).create()
    }

    fn is_guarded(&self) -> bool {
        (**self).is_guarded()
    }
}

/// Request-object decorator.
///
/// `open` is forwarded unchanged. A blocked `send` reports an additional
/// `blocked_before_send` incident and fails without dispatching.
pub struct GuardedRequest<R> {
    inner: R,
    guard: TransportGuard,
    method: Option<String>,
    url: Option<String>,
}

impl<R: RequestObject> GuardedRequest<R> {
    pub fn new(inner: R, guard: TransportGuard) -> Self {
        Self {
            inner,
            guard,
            method: None,
            url: None,
        }
    }
}

impl<R: RequestObject> RequestObject for GuardedRequest<R> {
    fn open(&mut self, method: &str, url: &str) -> Result<()> {
        self.method = Some(method.to_string());
        self.url = Some(url.to_string());
        self.inner.open(method, url)
    }

    fn send(&mut self, body: Option<TransportBody>) -> Result<()> {
        if let Some(reason) = self
            .guard
            .check(Context::Xhr, self.url.as_deref(), body.as_ref())
        {
            let mut meta = self
                .url
                .as_deref()
                .map(|u| IncidentMeta::for_url(redact_url(u)))
                .unwrap_or_default();
            if let Some(method) = &self.method {
                meta = meta.with_method(method.clone());
            }
            self.guard.report(Context::Xhr, DETAIL_BEFORE_SEND, meta);
            return Err(reason.into_error(Context::Xhr));
        }
        self.inner.send(body)
    }

    fn take_response(&mut self) -> Option<PendingResponse> {
        self.inner.take_response()
    }
}

/// Factory decorator producing `GuardedRequest`s
pub struct GuardedRequestFactory<F> {
    inner: F,
    guard: TransportGuard,
}

impl<F: RequestFactory> GuardedRequestFactory<F> {
    pub fn new(inner: F, guard: TransportGuard) -> Self {
        Self { inner, guard }
    }
}

impl<F: RequestFactory> RequestFactory for GuardedRequestFactory<F> {
    fn create(&self) -> Box<dyn RequestObject> {
        Box::new(GuardedRequest::new(self.inner.create(), self.guard.clone()))
    }

    fn is_guarded(&self) -> bool {
        true
    }
}

/// `reqwest`-backed request object.
///
/// `send` spawns the request on the ambient tokio runtime; the response is
/// collected through `take_response`.
#[derive(Debug)]
pub struct ReqwestRequest {
    client: reqwest::Client,
    method: Option<String>,
    url: Option<String>,
    pending: Option<JoinHandle<Result<FetchResponse>>>,
}

impl ReqwestRequest {
    pub fn new(client: reqwest::Client) -> Self {
        Self {
            client,
            method: None,
            url: None,
            pending: None,
        }
    }
}

impl RequestObject for ReqwestRequest {
    fn open(&mut self, method: &str, url: &str) -> Result<()> {
        self.method = Some(method.to_string());
        self.url = Some(url.to_string());
        Ok(())
    }

    fn send(&mut self, body: Option<TransportBody>) -> Result<()> {
        let (method, url) = match (&self.method, &self.url) {
            (Some(m), Some(u)) => (m.clone(), u.clone()),
            _ => return Err(ShieldError::Transport("send called before open".to_string())),
        };
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| ShieldError::Transport(e.to_string()))?;

        let mut request = FetchRequest::new(method, url);
        request.body = body;
        let client = self.client.clone();
        self.pending = Some(runtime.spawn(async move { execute(&client, request).await }));
        Ok(())
    }

    fn take_response(&mut self) -> Option<PendingResponse> {
        self.pending.take().map(PendingResponse)
    }
}

/// Factory for `ReqwestRequest`s sharing one client
#[derive(Debug, Clone, Default)]
pub struct ReqwestRequestFactory {
    client: reqwest::Client,
}

impl ReqwestRequestFactory {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

impl RequestFactory for ReqwestRequestFactory {
    fn create(&self) -> Box<dyn RequestObject> {
        Box::new(ReqwestRequest::new(self.client.clone()))
    }
}
