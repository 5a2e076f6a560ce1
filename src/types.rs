//! Core types shared by the scanner, enforcer, sanitizer and interceptors
//!
//! All types use camelCase JSON serialization for wire compatibility.

use crate::error::ShieldError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A location where data is inspected
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Context {
    Query,
    Headers,
    Body,
    Cookies,
    UrlFragment,
    Fetch,
    Xhr,
    SendBeacon,
}

impl Context {
    /// Wire name of the context (matches the `enabledContexts` keys)
    pub fn as_str(&self) -> &'static str {
        match self {
            Context::Query => "query",
            Context::Headers => "headers",
            Context::Body => "body",
            Context::Cookies => "cookies",
            Context::UrlFragment => "urlFragment",
            Context::Fetch => "fetch",
            Context::Xhr => "xhr",
            Context::SendBeacon => "sendBeacon",
        }
    }
}

impl fmt::Display for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Enforcement policy applied to every detected incident
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", try_from = "String")]
pub enum Mode {
    /// Block the request or call
    #[default]
    Reject,
    /// Replace forbidden values with the placeholder and continue
    Sanitize,
    /// Log only
    Monitor,
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Reject => "reject",
            Mode::Sanitize => "sanitize",
            Mode::Monitor => "monitor",
        }
    }
}

impl TryFrom<String> for Mode {
    type Error = ShieldError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Mode {
    type Err = ShieldError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "reject" => Ok(Mode::Reject),
            "sanitize" => Ok(Mode::Sanitize),
            "monitor" => Ok(Mode::Monitor),
            other => Err(ShieldError::Config(format!(
                "Unknown mode '{}' (expected reject, sanitize or monitor)",
                other
            ))),
        }
    }
}

/// Kind of incident reported to the sink
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IncidentKind {
    /// A forbidden key was found by the object scanner
    ForbiddenKey,
    /// An outbound call was blocked
    TransportBlock,
    /// Inspection failed and was recovered locally
    Error,
}

/// Caller-identifying context attached to an incident
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IncidentMeta {
    /// Remote address of the caller
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
    /// Request path
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    /// Request method
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    /// Target URL of an outbound call
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

impl IncidentMeta {
    /// Meta for an outbound call to `url`
    pub fn for_url(url: impl Into<String>) -> Self {
        Self {
            url: Some(url.into()),
            ..Default::default()
        }
    }

    pub fn with_method(mut self, method: impl Into<String>) -> Self {
        self.method = Some(method.into());
        self
    }
}

/// A single incident passed to the configured sink
///
/// Never carries the value of the offending field.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IncidentEvent {
    /// Unique incident ID (inc-<uuid>)
    pub id: String,
    /// What happened
    #[serde(rename = "type")]
    pub kind: IncidentKind,
    /// Where it happened
    pub context: Context,
    /// Offending key, in the casing it was received
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    /// Short machine-readable detail (e.g. `forbidden_key_in_url`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    /// Caller context
    #[serde(default)]
    pub meta: IncidentMeta,
    /// Timestamp (milliseconds since epoch)
    pub timestamp: i64,
}

impl IncidentEvent {
    /// Create a new incident
    pub fn new(kind: IncidentKind, context: Context, meta: IncidentMeta) -> Self {
        Self {
            id: format!("inc-{}", uuid::Uuid::new_v4()),
            kind,
            context,
            key: None,
            detail: None,
            meta,
            timestamp: chrono::Utc::now().timestamp_millis(),
        }
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

/// Result of scanning one keyed container
#[derive(Debug, Clone, PartialEq)]
pub struct ScanResult {
    /// Whether any forbidden key was found
    pub incident: bool,
    /// Copy of the input with forbidden keys redacted or omitted
    pub sanitized: Option<serde_json::Value>,
}
