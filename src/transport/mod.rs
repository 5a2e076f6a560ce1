//! Transport interceptor
//!
//! Decorators over the three outbound call styles:
//! - **fetch** — async request/response (`Fetch`)
//! - **xhr** — request object with `open` / `send` phases (`RequestFactory`)
//! - **sendBeacon** — fire-and-forget, returns whether the call was queued (`Beacon`)
//!
//! All three share `TransportGuard::should_block`: a call is blocked when its
//! URL query or its JSON text body carries a forbidden top-level key. Binary
//! bodies are not inspected.
//!
//! Guards are installed into a `Transports` registry at the composition
//! boundary. Installation is idempotent and skips absent primitives.

pub mod beacon;
pub mod fetch;
pub mod xhr;

pub use beacon::{Beacon, GuardedBeacon, ReqwestBeacon};
pub use fetch::{Fetch, FetchRequest, FetchResponse, GuardedFetch, ReqwestFetch};
pub use xhr::{
    GuardedRequest, GuardedRequestFactory, PendingResponse, ReqwestRequest,
    ReqwestRequestFactory, RequestFactory, RequestObject,
};

use crate::config::ShieldConfig;
use crate::error::ShieldError;
use crate::policy::PolicyView;
use crate::scanner::is_forbidden;
use crate::types::{Context, IncidentEvent, IncidentKind, IncidentMeta};
use bytes::Bytes;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use url::Url;

/// Base used to resolve relative call targets
pub const DEFAULT_BASE_URL: &str = "http://localhost";

pub(crate) const DETAIL_URL: &str = "forbidden_key_in_url";
pub(crate) const DETAIL_BODY: &str = "forbidden_key_in_body";
pub(crate) const DETAIL_BEFORE_SEND: &str = "blocked_before_send";

/// Body of an outbound call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportBody {
    /// String body; inspected when it is a JSON object
    Text(String),
    /// Binary body; never inspected
    Binary(Bytes),
}

impl TransportBody {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            TransportBody::Text(s) => Some(s),
            TransportBody::Binary(_) => None,
        }
    }
}

impl From<String> for TransportBody {
    fn from(s: String) -> Self {
        TransportBody::Text(s)
    }
}

impl From<&str> for TransportBody {
    fn from(s: &str) -> Self {
        TransportBody::Text(s.to_string())
    }
}

impl From<Bytes> for TransportBody {
    fn from(b: Bytes) -> Self {
        TransportBody::Binary(b)
    }
}

impl From<Vec<u8>> for TransportBody {
    fn from(b: Vec<u8>) -> Self {
        TransportBody::Binary(Bytes::from(b))
    }
}

impl From<TransportBody> for reqwest::Body {
    fn from(body: TransportBody) -> Self {
        match body {
            TransportBody::Text(s) => reqwest::Body::from(s),
            TransportBody::Binary(b) => reqwest::Body::from(b),
        }
    }
}

/// Why a call was blocked
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockReason {
    /// `forbidden_key_in_url` or `forbidden_key_in_body`
    pub detail: &'static str,
    /// Offending key as it appeared in the call
    pub key: String,
}

impl BlockReason {
    pub(crate) fn into_error(self, context: Context) -> ShieldError {
        ShieldError::Blocked {
            context,
            detail: self.detail.to_string(),
        }
    }
}

/// Blocking predicate shared by all interceptors
#[derive(Debug, Clone)]
pub struct TransportGuard {
    policy: PolicyView,
    base: Option<Url>,
}

impl TransportGuard {
    pub fn new(policy: PolicyView) -> Self {
        Self {
            policy,
            base: Url::parse(DEFAULT_BASE_URL).ok(),
        }
    }

    /// Resolve relative call targets against `base` instead of localhost
    pub fn with_base(mut self, base: Url) -> Self {
        self.base = Some(base);
        self
    }

    /// Whether a call with this target and body must not be dispatched
    pub fn should_block(
        &self,
        context: Context,
        url: Option<&str>,
        body: Option<&TransportBody>,
    ) -> bool {
        self.check(context, url, body).is_some()
    }

    /// Inspect a call and report a `transport_block` incident when blocked.
    ///
    /// Disabled contexts and inspection failures never block.
    pub fn check(
        &self,
        context: Context,
        url: Option<&str>,
        body: Option<&TransportBody>,
    ) -> Option<BlockReason> {
        let config = self.policy.snapshot();
        if !config.enabled_contexts.is_enabled(context) {
            return None;
        }

        let meta = url
            .map(|u| IncidentMeta::for_url(redact_url(u)))
            .unwrap_or_default();

        if let Some(url) = url {
            if let Some(key) = self.forbidden_in_url(&config, context, url, &meta) {
                return Some(self.block(&config, context, DETAIL_URL, key, meta));
            }
        }

        if let Some(text) = body.and_then(TransportBody::as_text) {
            if let Some(key) = forbidden_in_body(&config, context, text, &meta) {
                return Some(self.block(&config, context, DETAIL_BODY, key, meta));
            }
        }

        None
    }

    /// Record an extra incident for a blocked call
    pub(crate) fn report(&self, context: Context, detail: &str, meta: IncidentMeta) {
        let config = self.policy.snapshot();
        config.sink.record(
            &IncidentEvent::new(IncidentKind::TransportBlock, context, meta).with_detail(detail),
        );
    }

    fn block(
        &self,
        config: &ShieldConfig,
        context: Context,
        detail: &'static str,
        key: String,
        meta: IncidentMeta,
    ) -> BlockReason {
        tracing::warn!(
            context = %context,
            detail = detail,
            url = meta.url.as_deref().unwrap_or(""),
            "Outbound call blocked by shield"
        );
        config.sink.record(
            &IncidentEvent::new(IncidentKind::TransportBlock, context, meta)
                .with_key(key.clone())
                .with_detail(detail),
        );
        BlockReason { detail, key }
    }

    fn forbidden_in_url(
        &self,
        config: &ShieldConfig,
        context: Context,
        url: &str,
        meta: &IncidentMeta,
    ) -> Option<String> {
        let parsed = match &self.base {
            Some(base) => base.join(url),
            None => Url::parse(url),
        };
        match parsed {
            Ok(parsed) => parsed
                .query_pairs()
                .map(|(k, _)| k.into_owned())
                .find(|k| is_forbidden(config, k)),
            Err(e) => {
                report_parse_error(config, context, "unparseable_url", &e.to_string(), meta);
                None
            }
        }
    }
}

/// Only bodies that look like JSON objects are parsed; other text is not a
/// keyed structure and is left alone.
fn forbidden_in_body(
    config: &ShieldConfig,
    context: Context,
    text: &str,
    meta: &IncidentMeta,
) -> Option<String> {
    if !text.trim_start().starts_with('{') {
        return None;
    }
    match serde_json::from_str::<Value>(text) {
        Ok(Value::Object(map)) => map.keys().find(|k| is_forbidden(config, k)).cloned(),
        Ok(_) => None,
        Err(e) => {
            report_parse_error(config, context, "unparseable_body", &e.to_string(), meta);
            None
        }
    }
}

fn report_parse_error(
    config: &ShieldConfig,
    context: Context,
    detail: &str,
    error: &str,
    meta: &IncidentMeta,
) {
    let err = ShieldError::Parse(error.to_string());
    tracing::debug!(context = %context, error = %err, "Transport inspection skipped");
    config
        .sink
        .record(&IncidentEvent::new(IncidentKind::Error, context, meta.clone()).with_detail(detail));
}

/// Drop query and fragment so incidents never carry credential values
pub(crate) fn redact_url(url: &str) -> String {
    url.split(['?', '#']).next().unwrap_or("").to_string()
}

/// Outbound primitives available at the composition boundary
#[derive(Clone, Default)]
pub struct Transports {
    pub fetch: Option<Arc<dyn Fetch>>,
    pub xhr: Option<Arc<dyn RequestFactory>>,
    pub beacon: Option<Arc<dyn Beacon>>,
}

impl fmt::Debug for Transports {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let describe = |present: bool, guarded: bool| match (present, guarded) {
            (false, _) => "absent",
            (true, false) => "raw",
            (true, true) => "guarded",
        };
        f.debug_struct("Transports")
            .field(
                "fetch",
                &describe(
                    self.fetch.is_some(),
                    self.fetch.as_ref().map(|t| t.is_guarded()).unwrap_or(false),
                ),
            )
            .field(
                "xhr",
                &describe(
                    self.xhr.is_some(),
                    self.xhr.as_ref().map(|t| t.is_guarded()).unwrap_or(false),
                ),
            )
            .field(
                "beacon",
                &describe(
                    self.beacon.is_some(),
                    self.beacon.as_ref().map(|t| t.is_guarded()).unwrap_or(false),
                ),
            )
            .finish()
    }
}

impl Transports {
    /// Registry with all three primitives backed by one `reqwest` client
    pub fn reqwest(client: reqwest::Client) -> Self {
        Self {
            fetch: Some(Arc::new(ReqwestFetch::new(client.clone()))),
            xhr: Some(Arc::new(ReqwestRequestFactory::new(client.clone()))),
            beacon: Some(Arc::new(ReqwestBeacon::new(client))),
        }
    }

    pub fn with_fetch(mut self, fetch: impl Fetch + 'static) -> Self {
        self.fetch = Some(Arc::new(fetch));
        self
    }

    pub fn with_xhr(mut self, factory: impl RequestFactory + 'static) -> Self {
        self.xhr = Some(Arc::new(factory));
        self
    }

    pub fn with_beacon(mut self, beacon: impl Beacon + 'static) -> Self {
        self.beacon = Some(Arc::new(beacon));
        self
    }
}

/// Wrap the fetch primitive once; absent or already guarded is a no-op
pub fn patch_fetch(transports: &mut Transports, guard: &TransportGuard) {
    match transports.fetch.take() {
        Some(inner) if !inner.is_guarded() => {
            transports.fetch = Some(Arc::new(GuardedFetch::new(inner, guard.clone())));
            tracing::info!("Shield installed on fetch transport");
        }
        other => transports.fetch = other,
    }
}

/// Wrap the request-object factory once; absent or already guarded is a no-op
pub fn patch_xhr(transports: &mut Transports, guard: &TransportGuard) {
    match transports.xhr.take() {
        Some(inner) if !inner.is_guarded() => {
            transports.xhr = Some(Arc::new(GuardedRequestFactory::new(inner, guard.clone())));
            tracing::info!("Shield installed on request-object transport");
        }
        other => transports.xhr = other,
    }
}

/// Wrap the beacon primitive once; absent or already guarded is a no-op
pub fn patch_send_beacon(transports: &mut Transports, guard: &TransportGuard) {
    match transports.beacon.take() {
        Some(inner) if !inner.is_guarded() => {
            transports.beacon = Some(Arc::new(GuardedBeacon::new(inner, guard.clone())));
            tracing::info!("Shield installed on beacon transport");
        }
        other => transports.beacon = other,
    }
}

/// Install guards on every present primitive
pub fn patch_transports(transports: &mut Transports, guard: &TransportGuard) {
    patch_fetch(transports, guard);
    patch_xhr(transports, guard);
    patch_send_beacon(transports, guard);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigPatch;
    use crate::policy::PolicyEngine;
    use crate::sink::MemorySink;

    fn setup() -> (PolicyEngine, TransportGuard, Arc<MemorySink>) {
        let sink = Arc::new(MemorySink::new());
        let engine = PolicyEngine::new();
        engine.configure(ConfigPatch::new().sink(sink.clone())).unwrap();
        let guard = TransportGuard::new(engine.view());
        (engine, guard, sink)
    }

    #[test]
    fn test_block_forbidden_key_in_url() {
        let (_engine, guard, sink) = setup();
        assert!(guard.should_block(Context::Fetch, Some("/api?access_token=abc"), None));

        let events = sink.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, IncidentKind::TransportBlock);
        assert_eq!(events[0].detail.as_deref(), Some("forbidden_key_in_url"));
        assert_eq!(events[0].key.as_deref(), Some("access_token"));
        assert_eq!(events[0].meta.url.as_deref(), Some("/api"));
    }

    #[test]
    fn test_url_keys_case_insensitive_and_absolute() {
        let (_engine, guard, _) = setup();
        assert!(guard.should_block(
            Context::Xhr,
            Some("https://api.example.com/v1?JWT=x"),
            None
        ));
        assert!(!guard.should_block(Context::Xhr, Some("/v1?tokenized=1"), None));
        assert!(!guard.should_block(Context::Xhr, Some("/v1#token=1"), None));
    }

    #[test]
    fn test_block_forbidden_key_in_json_body() {
        let (_engine, guard, sink) = setup();
        let body = TransportBody::from(r#"{"user":"a","refresh_token":"r"}"#);
        assert!(guard.should_block(Context::Fetch, Some("/api"), Some(&body)));
        assert_eq!(
            sink.events()[0].detail.as_deref(),
            Some("forbidden_key_in_body")
        );
    }

    #[test]
    fn test_nested_body_keys_not_inspected() {
        let (_engine, guard, _) = setup();
        let body = TransportBody::from(r#"{"data":{"token":"x"}}"#);
        assert!(!guard.should_block(Context::Fetch, Some("/api"), Some(&body)));
    }

    #[test]
    fn test_binary_body_never_inspected() {
        let (_engine, guard, sink) = setup();
        let body = TransportBody::from(br#"{"token":"x"}"#.to_vec());
        assert!(!guard.should_block(Context::SendBeacon, Some("/log"), Some(&body)));
        assert!(sink.is_empty());
    }

    #[test]
    fn test_plain_text_body_not_inspected() {
        let (_engine, guard, sink) = setup();
        let body = TransportBody::from("token=abc");
        assert!(!guard.should_block(Context::Fetch, Some("/api"), Some(&body)));
        assert!(sink.is_empty());
    }

    #[test]
    fn test_malformed_json_body_fails_open() {
        let (_engine, guard, sink) = setup();
        let body = TransportBody::from(r#"{"token": "#);
        assert!(!guard.should_block(Context::Fetch, Some("/api"), Some(&body)));
        let events = sink.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, IncidentKind::Error);
        assert_eq!(events[0].detail.as_deref(), Some("unparseable_body"));
    }

    #[test]
    fn test_malformed_url_fails_open() {
        let (_engine, guard, sink) = setup();
        assert!(!guard.should_block(Context::Fetch, Some("http://[::1/?token=x"), None));
        let events = sink.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, IncidentKind::Error);
        assert_eq!(events[0].detail.as_deref(), Some("unparseable_url"));
    }

    #[test]
    fn test_disabled_context_never_blocks() {
        let (engine, guard, sink) = setup();
        engine
            .configure(ConfigPatch::new().context(Context::Fetch, false))
            .unwrap();
        assert!(!guard.should_block(Context::Fetch, Some("/api?token=x"), None));
        assert!(guard.should_block(Context::Xhr, Some("/api?token=x"), None));
        assert_eq!(sink.len(), 1);
    }

    #[test]
    fn test_custom_base_url() {
        let (_engine, guard, _) = setup();
        let guard = guard.with_base(Url::parse("https://app.example.com/sub/").unwrap());
        assert!(guard.should_block(Context::Fetch, Some("api?id_token=1"), None));
    }

    #[test]
    fn test_redact_url() {
        assert_eq!(redact_url("/a/b?token=x#frag"), "/a/b");
        assert_eq!(redact_url("https://h/p#token=1"), "https://h/p");
        assert_eq!(redact_url("/plain"), "/plain");
    }

    #[test]
    fn test_patch_absent_primitives_is_noop() {
        let (_engine, guard, _) = setup();
        let mut transports = Transports::default();
        patch_transports(&mut transports, &guard);
        assert!(transports.fetch.is_none());
        assert!(transports.xhr.is_none());
        assert!(transports.beacon.is_none());
    }

    #[test]
    fn test_patch_reqwest_transports() {
        let (_engine, guard, _) = setup();
        let mut transports = Transports::reqwest(reqwest::Client::new());
        assert!(!transports.fetch.as_ref().unwrap().is_guarded());
        patch_transports(&mut transports, &guard);
        assert!(transports.fetch.as_ref().unwrap().is_guarded());
        assert!(transports.xhr.as_ref().unwrap().is_guarded());
        assert!(transports.beacon.as_ref().unwrap().is_guarded());
        assert!(format!("{:?}", transports).contains("guarded"));
    }
}
