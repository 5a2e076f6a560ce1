//! axum middleware for the request-side enforcer
//!
//! ```rust,no_run
//! use a3s_shield::{HttpShield, Shield};
//! use axum::{routing::get, Router};
//!
//! let shield = Shield::new();
//! let app: Router = HttpShield::new(shield.enforcer())
//!     .protect(Router::new().route("/", get(|| async { "ok" })));
//! ```

use super::{Enforcer, Rejection, RequestSurface, Verdict};
use crate::types::{Context, IncidentEvent, IncidentKind, IncidentMeta, Mode};
use axum::{
    body::{Body, Bytes},
    extract::{ConnectInfo, Request, State},
    http::{header, request::Parts, uri::PathAndQuery, HeaderValue, StatusCode, Uri},
    middleware::Next,
    response::{IntoResponse, Response},
    Json, Router,
};
use bytes::BytesMut;
use futures::StreamExt;
use serde_json::{Map, Value};
use std::net::SocketAddr;

/// Largest body the middleware buffers for inspection
pub const DEFAULT_BODY_LIMIT: usize = 2 * 1024 * 1024;

impl IntoResponse for Rejection {
    fn into_response(self) -> Response {
        (StatusCode::BAD_REQUEST, Json(self)).into_response()
    }
}

/// Middleware state: the enforcer plus HTTP-specific limits
#[derive(Debug, Clone)]
pub struct HttpShield {
    enforcer: Enforcer,
    body_limit: usize,
}

impl HttpShield {
    pub fn new(enforcer: Enforcer) -> Self {
        Self {
            enforcer,
            body_limit: DEFAULT_BODY_LIMIT,
        }
    }

    /// Override the body inspection limit
    pub fn with_body_limit(mut self, limit: usize) -> Self {
        self.body_limit = limit;
        self
    }

    /// Wrap every route of `router` with the shield middleware
    pub fn protect<S>(self, router: Router<S>) -> Router<S>
    where
        S: Clone + Send + Sync + 'static,
    {
        router.layer(axum::middleware::from_fn_with_state(
            self,
            shield_middleware,
        ))
    }
}

/// Enforce the shield policy on an inbound request.
///
/// Rejections answer `400` with `{"error", "message", "context"}`. In
/// sanitize mode the query string, body and `Cookie` header forwarded to
/// the next stage are re-encoded from their sanitized form.
///
/// Only JSON and form bodies are buffered, and only while the body context
/// is enabled; anything else streams through untouched. A scannable body
/// over the limit is reported as an `error` incident. Monitor mode forwards
/// it uninspected, reject and sanitize answer `413`.
pub async fn shield_middleware(
    State(shield): State<HttpShield>,
    request: Request,
    next: Next,
) -> Response {
    let (mut parts, body) = request.into_parts();
    let config = shield.enforcer.policy().snapshot();

    if !config.enabled_contexts.body || body_kind(&parts) == BodyKind::Opaque {
        return enforce_and_forward(&shield, parts, body, next).await;
    }

    match buffer_body(&parts, body, shield.body_limit).await {
        Ok(Buffered::Complete(bytes)) => {
            let mut surface = HttpSurface::from_parts(&parts, &bytes);
            if let Verdict::Rejected(rejection) = shield.enforcer.enforce(&mut surface) {
                return rejection.into_response();
            }
            let body = surface.apply(&mut parts, bytes);
            next.run(Request::from_parts(parts, body)).await
        }
        Ok(Buffered::Overflow(body)) => {
            let meta = request_meta(&parts);
            tracing::warn!(
                path = parts.uri.path(),
                limit = shield.body_limit,
                "Request body exceeds the inspection limit"
            );
            config.sink.record(
                &IncidentEvent::new(IncidentKind::Error, Context::Body, meta)
                    .with_detail(DETAIL_BODY_TOO_LARGE),
            );
            if config.mode == Mode::Monitor {
                return enforce_and_forward(&shield, parts, body, next).await;
            }
            body_not_inspectable(
                StatusCode::PAYLOAD_TOO_LARGE,
                "Request body exceeds the inspection limit.",
            )
        }
        Err(e) => {
            tracing::warn!(path = parts.uri.path(), error = %e, "Request body could not be read");
            body_not_inspectable(StatusCode::BAD_REQUEST, "Request body could not be read.")
        }
    }
}

/// Incident detail for a scannable body that was too large to buffer
pub const DETAIL_BODY_TOO_LARGE: &str = "body_too_large";

/// Enforce the non-body contexts and forward `body` as received
async fn enforce_and_forward(
    shield: &HttpShield,
    mut parts: Parts,
    body: Body,
    next: Next,
) -> Response {
    let mut surface = HttpSurface::from_parts(&parts, &Bytes::new());
    if let Verdict::Rejected(rejection) = shield.enforcer.enforce(&mut surface) {
        return rejection.into_response();
    }
    surface.apply_parts(&mut parts);
    next.run(Request::from_parts(parts, body)).await
}

fn body_not_inspectable(status: StatusCode, message: &str) -> Response {
    (
        status,
        Json(serde_json::json!({
            "error": "BODY_NOT_INSPECTABLE",
            "message": message,
        })),
    )
        .into_response()
}

enum Buffered {
    Complete(Bytes),
    /// Limit exceeded; the body is rebuilt from what was read plus the rest
    Overflow(Body),
}

async fn buffer_body(
    parts: &Parts,
    body: Body,
    limit: usize,
) -> std::result::Result<Buffered, axum::Error> {
    let declared = parts
        .headers
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<usize>().ok());
    if declared.map_or(false, |len| len > limit) {
        return Ok(Buffered::Overflow(body));
    }

    let mut stream = body.into_data_stream();
    let mut chunks: Vec<Bytes> = Vec::new();
    let mut size = 0;
    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        size += chunk.len();
        chunks.push(chunk);
        if size > limit {
            let head = futures::stream::iter(chunks.into_iter().map(Ok::<_, axum::Error>));
            return Ok(Buffered::Overflow(Body::from_stream(head.chain(stream))));
        }
    }

    let mut buf = BytesMut::with_capacity(size);
    for chunk in chunks {
        buf.extend_from_slice(&chunk);
    }
    Ok(Buffered::Complete(buf.freeze()))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BodyKind {
    Json,
    Form,
    Opaque,
}

/// `RequestSurface` over a buffered HTTP request
#[derive(Debug, Clone)]
pub struct HttpSurface {
    query: Option<Value>,
    headers: Option<Value>,
    body: Option<Value>,
    body_kind: BodyKind,
    cookies: Option<Value>,
    meta: IncidentMeta,
    query_dirty: bool,
    body_dirty: bool,
    cookies_dirty: bool,
}

impl HttpSurface {
    /// Extract the inspectable contexts of a request
    pub fn from_parts(parts: &Parts, body: &Bytes) -> Self {
        let query = parts.uri.query().map(|q| pairs_to_object(parse_pairs(q)));

        let headers: Map<String, Value> = parts
            .headers
            .iter()
            .map(|(name, value)| {
                (
                    name.as_str().to_string(),
                    Value::String(String::from_utf8_lossy(value.as_bytes()).into_owned()),
                )
            })
            .collect();

        let cookies = parse_cookies(parts);

        let body_kind = body_kind(parts);
        let parsed_body = if body.is_empty() {
            None
        } else {
            match body_kind {
                BodyKind::Json => match serde_json::from_slice::<Value>(body) {
                    Ok(value) => Some(value),
                    Err(e) => {
                        tracing::debug!(error = %e, "JSON body not parseable, skipping body scan");
                        None
                    }
                },
                BodyKind::Form => Some(pairs_to_object(form_pairs(body))),
                BodyKind::Opaque => None,
            }
        };

        Self {
            query,
            headers: Some(Value::Object(headers)),
            body: parsed_body,
            body_kind,
            cookies,
            meta: request_meta(parts),
            query_dirty: false,
            body_dirty: false,
            cookies_dirty: false,
        }
    }

    /// Write sanitized contexts back into the request and return the body
    /// to forward.
    pub fn apply(self, parts: &mut Parts, original: Bytes) -> Body {
        self.apply_parts(parts);

        if !self.body_dirty {
            return Body::from(original);
        }

        let encoded = match (&self.body, self.body_kind) {
            (Some(body), BodyKind::Json) => match serde_json::to_vec(body) {
                Ok(bytes) => bytes,
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to re-encode sanitized JSON body");
                    return Body::from(original);
                }
            },
            (Some(body), BodyKind::Form) => object_to_pairs(body).into_bytes(),
            _ => return Body::from(original),
        };

        parts
            .headers
            .insert(header::CONTENT_LENGTH, HeaderValue::from(encoded.len()));
        Body::from(encoded)
    }

    /// Write the sanitized query and cookies back into the request head
    pub fn apply_parts(&self, parts: &mut Parts) {
        if self.query_dirty {
            if let Some(query) = &self.query {
                rewrite_query(parts, &object_to_pairs(query));
            }
        }

        if self.cookies_dirty {
            if let Some(cookies) = &self.cookies {
                rewrite_cookies(parts, cookies);
            }
        }
    }
}

impl RequestSurface for HttpSurface {
    fn query(&self) -> Option<&Value> {
        self.query.as_ref()
    }

    fn headers(&self) -> Option<&Value> {
        self.headers.as_ref()
    }

    fn body(&self) -> Option<&Value> {
        self.body.as_ref()
    }

    fn cookies(&self) -> Option<&Value> {
        self.cookies.as_ref()
    }

    fn meta(&self) -> IncidentMeta {
        self.meta.clone()
    }

    fn set_query(&mut self, query: Value) {
        self.query = Some(query);
        self.query_dirty = true;
    }

    fn set_body(&mut self, body: Value) {
        self.body = Some(body);
        self.body_dirty = true;
    }

    fn set_cookies(&mut self, cookies: Value) {
        self.cookies = Some(cookies);
        self.cookies_dirty = true;
    }
}

fn body_kind(parts: &Parts) -> BodyKind {
    let content_type = parts
        .headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.to_ascii_lowercase())
        .unwrap_or_default();
    let mime = content_type.split(';').next().unwrap_or("").trim();

    if mime == "application/json" || mime.ends_with("+json") {
        BodyKind::Json
    } else if mime == "application/x-www-form-urlencoded" {
        BodyKind::Form
    } else {
        BodyKind::Opaque
    }
}

/// Caller meta for incidents. Without `ConnectInfo` the ip comes from the
/// client-supplied `x-forwarded-for` header and must not be trusted.
fn request_meta(parts: &Parts) -> IncidentMeta {
    let ip = parts
        .extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .or_else(|| {
            parts
                .headers
                .get("x-forwarded-for")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.split(',').next())
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        });

    IncidentMeta {
        ip,
        path: Some(parts.uri.path().to_string()),
        method: Some(parts.method.as_str().to_string()),
        url: None,
    }
}

fn parse_pairs(input: &str) -> Vec<(String, String)> {
    url::form_urlencoded::parse(input.as_bytes())
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect()
}

fn form_pairs(body: &Bytes) -> Vec<(String, String)> {
    url::form_urlencoded::parse(body)
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect()
}

/// Collect pairs into an object; repeated keys become arrays
fn pairs_to_object(pairs: Vec<(String, String)>) -> Value {
    let mut map = Map::new();
    for (key, value) in pairs {
        match map.get_mut(&key) {
            Some(Value::Array(values)) => values.push(Value::String(value)),
            Some(existing) => {
                let first = existing.take();
                *existing = Value::Array(vec![first, Value::String(value)]);
            }
            None => {
                map.insert(key, Value::String(value));
            }
        }
    }
    Value::Object(map)
}

fn object_to_pairs(value: &Value) -> String {
    let mut serializer = url::form_urlencoded::Serializer::new(String::new());
    if let Value::Object(map) = value {
        for (key, value) in map {
            match value {
                Value::Array(values) => {
                    for v in values {
                        serializer.append_pair(key, &scalar_to_string(v));
                    }
                }
                other => {
                    serializer.append_pair(key, &scalar_to_string(other));
                }
            }
        }
    }
    serializer.finish()
}

fn scalar_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn parse_cookies(parts: &Parts) -> Option<Value> {
    let mut map = Map::new();
    let mut seen = false;
    for value in parts.headers.get_all(header::COOKIE) {
        seen = true;
        let raw = String::from_utf8_lossy(value.as_bytes());
        for pair in raw.split(';') {
            let pair = pair.trim();
            if pair.is_empty() {
                continue;
            }
            let (name, value) = pair.split_once('=').unwrap_or((pair, ""));
            map.insert(name.trim().to_string(), Value::String(value.trim().to_string()));
        }
    }
    seen.then_some(Value::Object(map))
}

fn rewrite_query(parts: &mut Parts, query: &str) {
    let path_and_query = if query.is_empty() {
        parts.uri.path().to_string()
    } else {
        format!("{}?{}", parts.uri.path(), query)
    };

    let mut uri_parts = parts.uri.clone().into_parts();
    let rebuilt = path_and_query
        .parse::<PathAndQuery>()
        .ok()
        .and_then(|pq| {
            uri_parts.path_and_query = Some(pq);
            Uri::from_parts(uri_parts).ok()
        });

    match rebuilt {
        Some(uri) => parts.uri = uri,
        None => tracing::warn!(path = parts.uri.path(), "Failed to rewrite sanitized query"),
    }
}

fn rewrite_cookies(parts: &mut Parts, cookies: &Value) {
    parts.headers.remove(header::COOKIE);
    let Value::Object(map) = cookies else {
        return;
    };
    if map.is_empty() {
        return;
    }
    let header_value = map
        .iter()
        .map(|(k, v)| format!("{}={}", k, scalar_to_string(v)))
        .collect::<Vec<_>>()
        .join("; ");
    match HeaderValue::from_str(&header_value) {
        Ok(value) => {
            parts.headers.insert(header::COOKIE, value);
        }
        Err(e) => tracing::warn!(error = %e, "Failed to rewrite sanitized cookies"),
    }
}
