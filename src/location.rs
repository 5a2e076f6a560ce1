//! Location sanitizer
//!
//! Strips forbidden keys from the query and fragment of a navigable address
//! without navigating. The two parts are handled independently: each part
//! that changes triggers exactly one `replace_state`, and every replacement
//! carries the sanitized form of the other part as well.
//!
//! Failures are recorded as `error` incidents and otherwise ignored; the
//! sanitizer never fails its caller.

use crate::config::ShieldConfig;
use crate::error::{Result, ShieldError};
use crate::policy::PolicyView;
use crate::scanner::is_forbidden;
use crate::types::{Context, IncidentEvent, IncidentKind, IncidentMeta};
use url::Url;

/// Base used to resolve relative addresses; never appears in the output
const RESOLVE_BASE: &str = "http://localhost";

/// An address that can be rewritten in place without navigation
pub trait Navigable {
    /// Current address (absolute or relative to the origin)
    fn href(&self) -> String;

    /// Replace the visible address with a relative `path[?query][#fragment]`
    fn replace_state(&mut self, url: &str) -> Result<()>;
}

/// In-memory `Navigable` that records every replacement
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemoryLocation {
    href: String,
    replacements: Vec<String>,
}

impl MemoryLocation {
    pub fn new(href: impl Into<String>) -> Self {
        Self {
            href: href.into(),
            replacements: Vec::new(),
        }
    }

    /// Addresses passed to `replace_state`, oldest first
    pub fn replacements(&self) -> &[String] {
        &self.replacements
    }
}

impl Navigable for MemoryLocation {
    fn href(&self) -> String {
        self.href.clone()
    }

    fn replace_state(&mut self, url: &str) -> Result<()> {
        self.href = url.to_string();
        self.replacements.push(url.to_string());
        Ok(())
    }
}

/// Sanitizer bound to the live policy
#[derive(Debug, Clone)]
pub struct LocationSanitizer {
    policy: PolicyView,
}

impl LocationSanitizer {
    pub fn new(policy: PolicyView) -> Self {
        Self { policy }
    }

    /// Remove forbidden keys from the location's query and fragment
    pub fn harden<N: Navigable + ?Sized>(&self, location: &mut N) {
        let config = self.policy.snapshot();
        let contexts = &config.enabled_contexts;
        if !contexts.query && !contexts.url_fragment {
            return;
        }
        let href = location.href();

        let parsed = match Url::parse(RESOLVE_BASE).and_then(|base| base.join(&href)) {
            Ok(url) => url,
            Err(e) => {
                let context = if contexts.query {
                    Context::Query
                } else {
                    Context::UrlFragment
                };
                report_error(&config, context, &href, &format!("unparseable_location: {}", e));
                return;
            }
        };

        let path = parsed.path().to_string();
        let mut query = parsed.query().map(str::to_string);
        let mut fragment = parsed.fragment().map(str::to_string);

        if config.enabled_contexts.query {
            if let Some(current) = query.as_deref() {
                if let Some(cleaned) = strip_forbidden(&config, current) {
                    query = non_empty(cleaned);
                    let target = compose(&path, query.as_deref(), fragment.as_deref());
                    if let Err(e) = location.replace_state(&target) {
                        report_error(&config, Context::Query, &href, &e.to_string());
                        return;
                    }
                    tracing::debug!(path = %path, "Forbidden keys removed from location query");
                }
            }
        }

        if config.enabled_contexts.url_fragment {
            if let Some(current) = fragment.as_deref() {
                if let Some(cleaned) = strip_forbidden(&config, current) {
                    fragment = non_empty(cleaned);
                    let target = compose(&path, query.as_deref(), fragment.as_deref());
                    if let Err(e) = location.replace_state(&target) {
                        report_error(&config, Context::UrlFragment, &href, &e.to_string());
                        return;
                    }
                    tracing::debug!(path = %path, "Forbidden keys removed from location fragment");
                }
            }
        }
    }
}

/// Remove forbidden pairs from a URL-encoded component.
///
/// Returns `None` when nothing was removed, so callers leave the part
/// untouched byte for byte.
fn strip_forbidden(config: &ShieldConfig, component: &str) -> Option<String> {
    let pairs: Vec<(String, String)> = url::form_urlencoded::parse(component.as_bytes())
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();

    let total = pairs.len();
    let kept: Vec<&(String, String)> = pairs
        .iter()
        .filter(|(key, _)| !is_forbidden(config, key))
        .collect();

    if kept.len() == total {
        return None;
    }

    let mut serializer = url::form_urlencoded::Serializer::new(String::new());
    for (key, value) in kept {
        serializer.append_pair(key, value);
    }
    Some(serializer.finish())
}

fn non_empty(s: String) -> Option<String> {
    (!s.is_empty()).then_some(s)
}

fn compose(path: &str, query: Option<&str>, fragment: Option<&str>) -> String {
    let mut out = path.to_string();
    if let Some(q) = query {
        out.push('?');
        out.push_str(q);
    }
    if let Some(f) = fragment {
        out.push('#');
        out.push_str(f);
    }
    out
}

fn report_error(config: &ShieldConfig, context: Context, href: &str, detail: &str) {
    let err = ShieldError::Parse(detail.to_string());
    tracing::debug!(error = %err, "Location hardening skipped");
    // The address itself may carry a credential, so only the path is kept.
    let path = href.split(['?', '#']).next().unwrap_or("").to_string();
    let meta = IncidentMeta {
        path: Some(path),
        ..Default::default()
    };
    config.sink.record(
        &IncidentEvent::new(IncidentKind::Error, context, meta).with_detail(detail),
    );
}
