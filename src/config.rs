//! Shield configuration
//!
//! `ShieldConfig` is the live configuration. It is never replaced wholesale:
//! changes arrive as a `ConfigPatch` and are merged field by field, with
//! `enabledContexts` merged per flag.

use crate::error::{Result, ShieldError};
use crate::sink::{IncidentSink, TracingSink};
use crate::types::{Context, Mode};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::sync::Arc;

/// Default placeholder written over forbidden values in sanitize mode
pub const DEFAULT_REDACT_VALUE: &str = "[REDACTED_TOKEN]";

/// Keys considered sensitive unless configured otherwise
pub const DEFAULT_FORBIDDEN_KEYS: &[&str] = &[
    "token",
    "access_token",
    "id_token",
    "auth_token",
    "jwt",
    "refresh_token",
    "sess_token",
];

fn default_true() -> bool {
    true
}

fn default_forbidden_keys() -> Vec<String> {
    DEFAULT_FORBIDDEN_KEYS.iter().map(|k| k.to_string()).collect()
}

fn default_redact_value() -> String {
    DEFAULT_REDACT_VALUE.to_string()
}

fn default_sink() -> Arc<dyn IncidentSink> {
    Arc::new(TracingSink)
}

/// Per-context enable flags. Disabled contexts are never scanned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnabledContexts {
    #[serde(default = "default_true")]
    pub query: bool,
    #[serde(default = "default_true")]
    pub headers: bool,
    #[serde(default = "default_true")]
    pub body: bool,
    #[serde(default = "default_true")]
    pub cookies: bool,
    #[serde(default = "default_true", alias = "url_fragment")]
    pub url_fragment: bool,
    #[serde(default = "default_true")]
    pub fetch: bool,
    #[serde(default = "default_true")]
    pub xhr: bool,
    #[serde(default = "default_true", alias = "send_beacon")]
    pub send_beacon: bool,
}

impl Default for EnabledContexts {
    fn default() -> Self {
        Self {
            query: true,
            headers: true,
            body: true,
            cookies: true,
            url_fragment: true,
            fetch: true,
            xhr: true,
            send_beacon: true,
        }
    }
}

impl EnabledContexts {
    /// Whether `context` is scanned
    pub fn is_enabled(&self, context: Context) -> bool {
        *self.flag(context)
    }

    pub fn set(&mut self, context: Context, enabled: bool) {
        *self.flag_mut(context) = enabled;
    }

    fn flag(&self, context: Context) -> &bool {
        match context {
            Context::Query => &self.query,
            Context::Headers => &self.headers,
            Context::Body => &self.body,
            Context::Cookies => &self.cookies,
            Context::UrlFragment => &self.url_fragment,
            Context::Fetch => &self.fetch,
            Context::Xhr => &self.xhr,
            Context::SendBeacon => &self.send_beacon,
        }
    }

    fn flag_mut(&mut self, context: Context) -> &mut bool {
        match context {
            Context::Query => &mut self.query,
            Context::Headers => &mut self.headers,
            Context::Body => &mut self.body,
            Context::Cookies => &mut self.cookies,
            Context::UrlFragment => &mut self.url_fragment,
            Context::Fetch => &mut self.fetch,
            Context::Xhr => &mut self.xhr,
            Context::SendBeacon => &mut self.send_beacon,
        }
    }

    /// Merge a partial set of flags; absent flags keep their value
    pub fn merge(&mut self, patch: &ContextsPatch) {
        for (context, value) in patch.entries() {
            if let Some(enabled) = value {
                self.set(context, enabled);
            }
        }
    }
}

/// Live shield configuration
#[derive(Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShieldConfig {
    /// Lower-cased, de-duplicated deny-list in insertion order
    #[serde(default = "default_forbidden_keys")]
    pub forbidden_keys: Vec<String>,

    /// Enforcement mode
    #[serde(default)]
    pub mode: Mode,

    /// Placeholder for redacted values (sanitize mode)
    #[serde(default = "default_redact_value")]
    pub redact_value: String,

    /// Per-context enable flags
    #[serde(default)]
    pub enabled_contexts: EnabledContexts,

    /// Incident hook
    #[serde(skip, default = "default_sink")]
    pub sink: Arc<dyn IncidentSink>,
}

impl Default for ShieldConfig {
    fn default() -> Self {
        Self {
            forbidden_keys: default_forbidden_keys(),
            mode: Mode::default(),
            redact_value: default_redact_value(),
            enabled_contexts: EnabledContexts::default(),
            sink: default_sink(),
        }
    }
}

impl fmt::Debug for ShieldConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShieldConfig")
            .field("forbidden_keys", &self.forbidden_keys)
            .field("mode", &self.mode)
            .field("redact_value", &self.redact_value)
            .field("enabled_contexts", &self.enabled_contexts)
            .finish_non_exhaustive()
    }
}

impl ShieldConfig {
    /// Merge `patch` into this configuration.
    ///
    /// The patch is validated first; on error nothing is changed.
    pub fn merge(&mut self, patch: ConfigPatch) -> Result<()> {
        let keys = patch
            .forbidden_keys
            .as_deref()
            .map(normalize_keys)
            .transpose()?;

        if let Some(keys) = keys {
            self.forbidden_keys = keys;
        }
        if let Some(mode) = patch.mode {
            self.mode = mode;
        }
        if let Some(redact_value) = patch.redact_value {
            self.redact_value = redact_value;
        }
        if let Some(contexts) = &patch.enabled_contexts {
            self.enabled_contexts.merge(contexts);
        }
        if let Some(sink) = patch.sink {
            self.sink = sink;
        }
        Ok(())
    }
}

/// Validate deny-list entries and normalize them to lower case.
///
/// Entries must be non-empty and contain no whitespace or control
/// characters. Duplicates (after lower-casing) keep their first position.
pub fn normalize_keys(keys: &[String]) -> Result<Vec<String>> {
    let mut normalized: Vec<String> = Vec::with_capacity(keys.len());
    for key in keys {
        if key.is_empty() {
            return Err(ShieldError::Config(
                "Forbidden key entries must not be empty".to_string(),
            ));
        }
        if key.chars().any(|c| c.is_whitespace() || c.is_control()) {
            return Err(ShieldError::Config(format!(
                "Forbidden key '{}' contains whitespace or control characters",
                key.escape_debug()
            )));
        }
        let lower = key.to_lowercase();
        if !normalized.contains(&lower) {
            normalized.push(lower);
        }
    }
    Ok(normalized)
}

/// Partial per-context flags
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextsPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub headers: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cookies: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none", alias = "url_fragment")]
    pub url_fragment: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fetch: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub xhr: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none", alias = "send_beacon")]
    pub send_beacon: Option<bool>,
}

impl ContextsPatch {
    fn entries(&self) -> [(Context, Option<bool>); 8] {
        [
            (Context::Query, self.query),
            (Context::Headers, self.headers),
            (Context::Body, self.body),
            (Context::Cookies, self.cookies),
            (Context::UrlFragment, self.url_fragment),
            (Context::Fetch, self.fetch),
            (Context::Xhr, self.xhr),
            (Context::SendBeacon, self.send_beacon),
        ]
    }

    fn set(&mut self, context: Context, enabled: bool) {
        let slot = match context {
            Context::Query => &mut self.query,
            Context::Headers => &mut self.headers,
            Context::Body => &mut self.body,
            Context::Cookies => &mut self.cookies,
            Context::UrlFragment => &mut self.url_fragment,
            Context::Fetch => &mut self.fetch,
            Context::Xhr => &mut self.xhr,
            Context::SendBeacon => &mut self.send_beacon,
        };
        *slot = Some(enabled);
    }
}

/// Partial configuration update
///
/// Every field is optional. Presets can be loaded from JSON or HCL:
///
/// ```rust
/// use a3s_shield::{ConfigPatch, Mode};
///
/// let patch = ConfigPatch::from_json(r#"{"mode": "sanitize", "enabledContexts": {"cookies": false}}"#).unwrap();
/// assert_eq!(patch.mode, Some(Mode::Sanitize));
/// ```
#[derive(Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigPatch {
    /// Replacement deny-list
    #[serde(default, skip_serializing_if = "Option::is_none", alias = "forbidden_keys")]
    pub forbidden_keys: Option<Vec<String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<Mode>,

    #[serde(default, skip_serializing_if = "Option::is_none", alias = "redact_value")]
    pub redact_value: Option<String>,

    /// Flags to change; absent flags keep their current value
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        alias = "enabled_contexts"
    )]
    pub enabled_contexts: Option<ContextsPatch>,

    #[serde(skip)]
    pub sink: Option<Arc<dyn IncidentSink>>,
}

impl fmt::Debug for ConfigPatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConfigPatch")
            .field("forbidden_keys", &self.forbidden_keys)
            .field("mode", &self.mode)
            .field("redact_value", &self.redact_value)
            .field("enabled_contexts", &self.enabled_contexts)
            .field("sink", &self.sink.as_ref().map(|_| "<sink>"))
            .finish()
    }
}

impl ConfigPatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn forbidden_keys<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.forbidden_keys = Some(keys.into_iter().map(Into::into).collect());
        self
    }

    pub fn mode(mut self, mode: Mode) -> Self {
        self.mode = Some(mode);
        self
    }

    pub fn redact_value(mut self, value: impl Into<String>) -> Self {
        self.redact_value = Some(value.into());
        self
    }

    /// Set a single context flag, keeping any flags already in the patch
    pub fn context(mut self, context: Context, enabled: bool) -> Self {
        self.enabled_contexts
            .get_or_insert_with(ContextsPatch::default)
            .set(context, enabled);
        self
    }

    pub fn sink(mut self, sink: Arc<dyn IncidentSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Parse a patch from JSON
    pub fn from_json(content: &str) -> Result<Self> {
        serde_json::from_str(content)
            .map_err(|e| ShieldError::Config(format!("Invalid JSON configuration: {}", e)))
    }

    /// Parse a patch from HCL
    ///
    /// ```hcl
    /// mode          = "sanitize"
    /// forbidden_keys = ["token", "api_key"]
    ///
    /// enabled_contexts {
    ///   cookies = false
    /// }
    /// ```
    pub fn from_hcl(content: &str) -> Result<Self> {
        hcl::from_str(content)
            .map_err(|e| ShieldError::Config(format!("Invalid HCL configuration: {}", e)))
    }

    /// Load a patch from a file; `.hcl` files are parsed as HCL, anything
    /// else as JSON.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            ShieldError::Config(format!(
                "Failed to read configuration {}: {}",
                path.display(),
                e
            ))
        })?;

        let is_hcl = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.eq_ignore_ascii_case("hcl"))
            .unwrap_or(false);

        if is_hcl {
            Self::from_hcl(&content)
        } else {
            Self::from_json(&content)
        }
    }
}
