//! Fire-and-forget beacon transport

use super::fetch::{execute, FetchRequest};
use super::{TransportBody, TransportGuard};
use crate::types::Context;
use std::sync::Arc;

/// Fire-and-forget transport. Returns whether the call was queued.
pub trait Beacon: Send + Sync {
    fn send_beacon(&self, url: &str, data: Option<TransportBody>) -> bool;

    /// Whether this transport already carries the shield
    fn is_guarded(&self) -> bool {
        false
    }
}

impl<T: Beacon + ?Sized> Beacon for Arc<T> {
    fn send_beacon(&self, url: &str, data: Option<TransportBody>) -> bool {
        (**self).send_beacon(url, data)
    }

    fn is_guarded(&self) -> bool {
        (**self).is_guarded()
    }
}

/// Beacon decorator; a blocked call returns `false` without queuing
pub struct GuardedBeacon<B> {
    inner: B,
    guard: TransportGuard,
}

impl<B: Beacon> GuardedBeacon<B> {
    pub fn new(inner: B, guard: TransportGuard) -> Self {
        Self { inner, guard }
    }
}

impl<B: Beacon> Beacon for GuardedBeacon<B> {
    fn send_beacon(&self, url: &str, data: Option<TransportBody>) -> bool {
        if self
            .guard
            .should_block(Context::SendBeacon, Some(url), data.as_ref())
        {
            return false;
        }
        self.inner.send_beacon(url, data)
    }

    fn is_guarded(&self) -> bool {
        true
    }
}

/// `reqwest`-backed beacon: a POST spawned on the ambient tokio runtime.
///
/// Returns `false` when no runtime is available. Delivery failures are
/// logged and otherwise dropped.
#[derive(Debug, Clone, Default)]
pub struct ReqwestBeacon {
    client: reqwest::Client,
}

impl ReqwestBeacon {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

impl Beacon for ReqwestBeacon {
    fn send_beacon(&self, url: &str, data: Option<TransportBody>) -> bool {
        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(handle) => handle,
            Err(_) => return false,
        };

        let mut request = FetchRequest::new("POST", url);
        request.body = data;
        let client = self.client.clone();
        runtime.spawn(async move {
            if let Err(e) = execute(&client, request).await {
                tracing::debug!(error = %e, "Beacon delivery failed");
            }
        });
        true
    }
}
