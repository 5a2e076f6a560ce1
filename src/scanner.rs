//! Key classifier and object scanner
//!
//! The classifier is an exact, case-insensitive membership test: `tokenized`
//! is not forbidden even when `token` is. The scanner walks one flat keyed
//! container and reports one incident per forbidden key.

use crate::config::ShieldConfig;
use crate::types::{Context, IncidentEvent, IncidentKind, IncidentMeta, Mode, ScanResult};
use serde_json::{Map, Value};

/// Whether `key` is on the deny-list (case-insensitive, exact match).
///
/// Both sides are lower-cased, so a deny-list that bypassed `merge` still
/// matches.
pub fn is_forbidden(config: &ShieldConfig, key: &str) -> bool {
    let lower = key.to_lowercase();
    config
        .forbidden_keys
        .iter()
        .any(|k| *k == lower || k.to_lowercase() == lower)
}

/// Scan a keyed container for forbidden keys.
///
/// Absent input and non-container values are returned unchanged with no
/// incident. Objects keep their key order; arrays are keyed by element
/// index. Under `Sanitize` forbidden values are replaced by the
/// placeholder, under `Reject` and `Monitor` they are left out of the
/// sanitized copy. Omitted array elements become `null` so later elements
/// keep their index.
pub fn scan(
    config: &ShieldConfig,
    obj: Option<&Value>,
    context: Context,
    meta: &IncidentMeta,
) -> ScanResult {
    match obj {
        Some(Value::Object(map)) => scan_object(config, map, context, meta),
        Some(Value::Array(items)) => scan_array(config, items, context, meta),
        other => ScanResult {
            incident: false,
            sanitized: other.cloned(),
        },
    }
}

fn scan_object(
    config: &ShieldConfig,
    map: &Map<String, Value>,
    context: Context,
    meta: &IncidentMeta,
) -> ScanResult {
    let mut incident = false;
    let mut sanitized = Map::with_capacity(map.len());

    for (key, value) in map {
        if is_forbidden(config, key) {
            incident = true;
            report(config, key, context, meta);
            if config.mode == Mode::Sanitize {
                sanitized.insert(key.clone(), Value::String(config.redact_value.clone()));
            }
        } else {
            sanitized.insert(key.clone(), value.clone());
        }
    }

    ScanResult {
        incident,
        sanitized: Some(Value::Object(sanitized)),
    }
}

fn scan_array(
    config: &ShieldConfig,
    items: &[Value],
    context: Context,
    meta: &IncidentMeta,
) -> ScanResult {
    let mut incident = false;
    let mut sanitized = Vec::with_capacity(items.len());

    for (index, value) in items.iter().enumerate() {
        let key = index.to_string();
        if is_forbidden(config, &key) {
            incident = true;
            report(config, &key, context, meta);
            sanitized.push(match config.mode {
                Mode::Sanitize => Value::String(config.redact_value.clone()),
                _ => Value::Null,
            });
        } else {
            sanitized.push(value.clone());
        }
    }

    ScanResult {
        incident,
        sanitized: Some(Value::Array(sanitized)),
    }
}

fn report(config: &ShieldConfig, key: &str, context: Context, meta: &IncidentMeta) {
    let event =
        IncidentEvent::new(IncidentKind::ForbiddenKey, context, meta.clone()).with_key(key);
    config.sink.record(&event);
}
