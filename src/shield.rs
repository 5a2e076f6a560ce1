//! Shield facade
//!
//! Bundles the policy owner with the enforcement surfaces. Every handle a
//! `Shield` hands out reads the same live configuration.

use crate::config::{ConfigPatch, ShieldConfig};
use crate::enforcer::{http::HttpShield, Enforcer};
use crate::error::Result;
use crate::location::{LocationSanitizer, Navigable};
use crate::policy::{PolicyEngine, PolicyView};
use crate::scanner;
use crate::transport::{self, TransportGuard, Transports};
use crate::types::{Context, IncidentMeta, ScanResult};
use serde_json::Value;

/// Entry point owning the live configuration
#[derive(Debug, Default)]
pub struct Shield {
    policy: PolicyEngine,
}

impl Shield {
    /// Shield with the default configuration
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: ShieldConfig) -> Self {
        Self {
            policy: PolicyEngine::with_config(config),
        }
    }

    /// Merge a partial configuration; see `PolicyEngine::configure`
    pub fn configure(&self, patch: ConfigPatch) -> Result<()> {
        self.policy.configure(patch)
    }

    pub fn get_config(&self) -> ShieldConfig {
        self.policy.get_config()
    }

    pub fn policy(&self) -> &PolicyEngine {
        &self.policy
    }

    pub fn view(&self) -> PolicyView {
        self.policy.view()
    }

    /// Scan one keyed container against the current configuration
    pub fn scan(&self, obj: Option<&Value>, context: Context, meta: &IncidentMeta) -> ScanResult {
        scanner::scan(&self.policy.view().snapshot(), obj, context, meta)
    }

    pub fn enforcer(&self) -> Enforcer {
        Enforcer::new(self.view())
    }

    /// axum middleware state bound to this shield
    pub fn http(&self) -> HttpShield {
        HttpShield::new(self.enforcer())
    }

    pub fn transport_guard(&self) -> TransportGuard {
        TransportGuard::new(self.view())
    }

    /// Strip forbidden keys from the location's query and fragment
    pub fn harden_location<N: Navigable + ?Sized>(&self, location: &mut N) {
        LocationSanitizer::new(self.view()).harden(location);
    }

    /// Guard every present outbound primitive; safe to call repeatedly
    pub fn patch_transports(&self, transports: &mut Transports) {
        transport::patch_transports(transports, &self.transport_guard());
    }

    /// Apply an optional preset, harden the location, then guard transports.
    ///
    /// An invalid preset fails before anything is installed.
    pub fn auto_init<N: Navigable + ?Sized>(
        &self,
        preset: Option<ConfigPatch>,
        location: Option<&mut N>,
        transports: &mut Transports,
    ) -> Result<()> {
        if let Some(patch) = preset {
            self.configure(patch)?;
        }
        if let Some(location) = location {
            self.harden_location(location);
        }
        self.patch_transports(transports);
        tracing::info!(mode = %self.get_config().mode, "Shield initialized");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::location::MemoryLocation;
    use crate::sink::MemorySink;
    use crate::types::Mode;
    use serde_json::json;
    use std::sync::Arc;

    #[test]
    fn test_configure_partial_merge() {
        let shield = Shield::new();
        shield
            .configure(ConfigPatch::new().mode(Mode::Sanitize))
            .unwrap();
        shield
            .configure(ConfigPatch::new().context(Context::Cookies, false))
            .unwrap();

        let config = shield.get_config();
        assert_eq!(config.mode, Mode::Sanitize);
        assert!(!config.enabled_contexts.cookies);
        assert!(config.enabled_contexts.query);
        assert_eq!(config.forbidden_keys.len(), 7);
    }

    #[test]
    fn test_get_config_is_a_copy() {
        let shield = Shield::new();
        let mut copy = shield.get_config();
        copy.forbidden_keys.clear();
        assert_eq!(shield.get_config().forbidden_keys.len(), 7);
    }

    #[test]
    fn test_scan_uses_live_config() {
        let shield = Shield::new();
        let input = json!({"api_key": "x"});
        assert!(!shield
            .scan(Some(&input), Context::Body, &IncidentMeta::default())
            .incident);
        shield
            .configure(ConfigPatch::new().forbidden_keys(["api_key"]))
            .unwrap();
        assert!(shield
            .scan(Some(&input), Context::Body, &IncidentMeta::default())
            .incident);
    }

    #[test]
    fn test_auto_init() {
        let sink = Arc::new(MemorySink::new());
        let shield = Shield::new();
        let mut location = MemoryLocation::new("/cb?code=1&access_token=abc");
        let mut transports = Transports::reqwest(reqwest::Client::new());

        shield
            .auto_init(
                Some(ConfigPatch::new().sink(sink.clone())),
                Some(&mut location),
                &mut transports,
            )
            .unwrap();

        assert_eq!(location.href(), "/cb?code=1");
        assert!(transports.fetch.as_ref().unwrap().is_guarded());
        assert!(transports.xhr.as_ref().unwrap().is_guarded());
        assert!(transports.beacon.as_ref().unwrap().is_guarded());
    }

    #[test]
    fn test_auto_init_invalid_preset_installs_nothing() {
        let shield = Shield::new();
        let mut location = MemoryLocation::new("/?token=1");
        let mut transports = Transports::reqwest(reqwest::Client::new());

        let result = shield.auto_init(
            Some(ConfigPatch::new().forbidden_keys(["bad key"])),
            Some(&mut location),
            &mut transports,
        );
        assert!(result.is_err());
        assert!(location.replacements().is_empty());
        assert!(!transports.fetch.as_ref().unwrap().is_guarded());
    }

    #[test]
    fn test_auto_init_without_location() {
        let shield = Shield::new();
        let mut transports = Transports::default();
        shield
            .auto_init::<MemoryLocation>(None, None, &mut transports)
            .unwrap();
        assert!(transports.fetch.is_none());
    }
}
