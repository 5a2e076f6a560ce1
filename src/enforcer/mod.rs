//! Request-side enforcer
//!
//! Runs the object scanner over the contexts of an inbound request in a
//! fixed order (query → headers → body → cookies) and decides whether the
//! request is admitted, rewritten or rejected.
//!
//! Framework glue implements `RequestSurface`; `http` provides the axum
//! middleware.

pub mod http;

use crate::error::ShieldError;
use crate::policy::PolicyView;
use crate::scanner::scan;
use crate::types::{Context, IncidentMeta, Mode};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Contexts inspected on inbound requests, in evaluation order
pub const REQUEST_CONTEXTS: [Context; 4] = [
    Context::Query,
    Context::Headers,
    Context::Body,
    Context::Cookies,
];

/// Adapter over a framework-specific inbound request
pub trait RequestSurface {
    /// Parsed query parameters
    fn query(&self) -> Option<&Value>;

    /// Request headers keyed by name; names are lower-cased before scanning
    fn headers(&self) -> Option<&Value>;

    /// Parsed body, when it is a keyed structure
    fn body(&self) -> Option<&Value>;

    /// Parsed cookies
    fn cookies(&self) -> Option<&Value>;

    /// Caller context (remote address, path, method)
    fn meta(&self) -> IncidentMeta;

    /// Replace the query with its sanitized form
    fn set_query(&mut self, query: Value);

    /// Replace the body with its sanitized form
    fn set_body(&mut self, body: Value);

    /// Replace the cookies with their sanitized form
    fn set_cookies(&mut self, cookies: Value);
}

/// Framework-agnostic request representation
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RequestParts {
    pub query: Option<Value>,
    pub headers: Option<Value>,
    pub body: Option<Value>,
    pub cookies: Option<Value>,
    pub meta: IncidentMeta,
}

impl RequestSurface for RequestParts {
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
    }

    fn set_body(&mut self, body: Value) {
        self.body = Some(body);
    }

    fn set_cookies(&mut self, cookies: Value) {
        self.cookies = Some(cookies);
    }
}

/// Machine-readable rejection code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RejectionCode {
    TokenInQuery,
    TokenInHeaders,
    TokenInBody,
    TokenInCookies,
}

impl RejectionCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            RejectionCode::TokenInQuery => "TOKEN_IN_QUERY",
            RejectionCode::TokenInHeaders => "TOKEN_IN_HEADERS",
            RejectionCode::TokenInBody => "TOKEN_IN_BODY",
            RejectionCode::TokenInCookies => "TOKEN_IN_COOKIES",
        }
    }
}

/// A rejected request: client-correctable, never retried
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rejection {
    /// Error code (`TOKEN_IN_QUERY`, ...)
    #[serde(rename = "error")]
    pub code: RejectionCode,
    /// Human-readable message
    pub message: String,
    /// Context that triggered the rejection
    pub context: Context,
}

impl Rejection {
    /// Rejection for a request context; `None` for outbound-only contexts
    pub fn for_context(context: Context) -> Option<Self> {
        let (code, message) = match context {
            Context::Query => (
                RejectionCode::TokenInQuery,
                "Tokens are not allowed in URL query parameters.",
            ),
            Context::Headers => (
                RejectionCode::TokenInHeaders,
                "Request headers carry a forbidden sensitive key.",
            ),
            Context::Body => (
                RejectionCode::TokenInBody,
                "Request body carries a forbidden sensitive key.",
            ),
            Context::Cookies => (
                RejectionCode::TokenInCookies,
                "Cookies carry a forbidden sensitive key.",
            ),
            _ => return None,
        };
        Some(Self {
            code,
            message: message.to_string(),
            context,
        })
    }
}

impl From<Rejection> for ShieldError {
    fn from(rejection: Rejection) -> Self {
        ShieldError::Blocked {
            context: rejection.context,
            detail: rejection.code.as_str().to_string(),
        }
    }
}

/// Terminal outcome of enforcing one request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// Continue to the next stage (possibly with rewritten query/body/cookies)
    Admitted,
    /// Stop and answer with the rejection
    Rejected(Rejection),
}

impl Verdict {
    pub fn is_admitted(&self) -> bool {
        matches!(self, Verdict::Admitted)
    }
}

/// Request-side enforcer
#[derive(Debug, Clone)]
pub struct Enforcer {
    policy: PolicyView,
}

impl Enforcer {
    pub fn new(policy: PolicyView) -> Self {
        Self { policy }
    }

    /// Configuration handle this enforcer reads from
    pub fn policy(&self) -> &PolicyView {
        &self.policy
    }

    /// Enforce the policy on one request.
    ///
    /// Reads the configuration once. In reject mode the first context with an
    /// incident short-circuits. In sanitize mode query, body and cookies are
    /// replaced by their sanitized copies; headers are only inspected. In
    /// monitor mode the request is never changed.
    pub fn enforce<R: RequestSurface + ?Sized>(&self, request: &mut R) -> Verdict {
        let config = self.policy.snapshot();
        let meta = request.meta();

        for context in REQUEST_CONTEXTS {
            if !config.enabled_contexts.is_enabled(context) {
                continue;
            }

            let result = match context {
                Context::Query => scan(&config, request.query(), context, &meta),
                Context::Headers => {
                    let lowered = request.headers().map(lowercase_keys);
                    scan(&config, lowered.as_ref(), context, &meta)
                }
                Context::Body => scan(&config, request.body(), context, &meta),
                _ => scan(&config, request.cookies(), context, &meta),
            };

            if !result.incident {
                continue;
            }

            match config.mode {
                Mode::Reject => {
                    tracing::warn!(
                        context = %context,
                        path = meta.path.as_deref().unwrap_or(""),
                        method = meta.method.as_deref().unwrap_or(""),
                        "Request rejected: forbidden key detected"
                    );
                    if let Some(rejection) = Rejection::for_context(context) {
                        return Verdict::Rejected(rejection);
                    }
                }
                Mode::Sanitize => {
                    if let Some(sanitized) = result.sanitized {
                        match context {
                            Context::Query => request.set_query(sanitized),
                            Context::Body => request.set_body(sanitized),
                            Context::Cookies => request.set_cookies(sanitized),
                            _ => {}
                        }
                    }
                }
                Mode::Monitor => {}
            }
        }

        Verdict::Admitted
    }
}

fn lowercase_keys(headers: &Value) -> Value {
    match headers {
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.to_lowercase(), v.clone()))
                .collect::<Map<String, Value>>(),
        ),
        other => other.clone(),
    }
}
