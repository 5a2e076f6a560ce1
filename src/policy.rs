//! Policy engine: single owner of the live configuration
//!
//! `PolicyEngine` is the only handle that can change the configuration.
//! Scanners, enforcers, sanitizers and interceptors hold a `PolicyView`
//! and take one snapshot per decision, so an update applies to every call
//! issued after `configure` returns and never to a call already in flight.

use crate::config::{ConfigPatch, ShieldConfig};
use crate::error::Result;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Owner of the live configuration
#[derive(Debug, Default)]
pub struct PolicyEngine {
    config: Arc<RwLock<ShieldConfig>>,
}

impl PolicyEngine {
    /// Create an engine with the default configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an engine from a full configuration
    pub fn with_config(config: ShieldConfig) -> Self {
        Self {
            config: Arc::new(RwLock::new(config)),
        }
    }

    /// Merge a partial configuration into the live one.
    ///
    /// Invalid patches leave the configuration untouched.
    pub fn configure(&self, patch: ConfigPatch) -> Result<()> {
        let mut config = self.write();
        config.merge(patch)?;
        tracing::debug!(
            mode = %config.mode,
            forbidden_keys = config.forbidden_keys.len(),
            "Shield configuration updated"
        );
        Ok(())
    }

    /// Copy of the live configuration; mutating it has no effect
    pub fn get_config(&self) -> ShieldConfig {
        self.read().clone()
    }

    /// Restore the default configuration
    pub fn reset(&self) {
        *self.write() = ShieldConfig::default();
    }

    /// Read-only handle for consumers
    pub fn view(&self) -> PolicyView {
        PolicyView {
            config: self.config.clone(),
        }
    }

    // Configuration is plain data, so a poisoned lock still holds a usable value.
    fn read(&self) -> RwLockReadGuard<'_, ShieldConfig> {
        self.config.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, ShieldConfig> {
        self.config.write().unwrap_or_else(|e| e.into_inner())
    }
}

/// Read-only view of the live configuration
#[derive(Debug, Clone)]
pub struct PolicyView {
    config: Arc<RwLock<ShieldConfig>>,
}

impl PolicyView {
    /// Consistent copy of the configuration for one decision
    pub fn snapshot(&self) -> ShieldConfig {
        self.config
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}
