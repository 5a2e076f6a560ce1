//! # a3s-shield
//!
//! Credential-leak firewall for the A3S ecosystem.
//!
//! ## Overview
//!
//! `a3s-shield` inspects structured request data for forbidden keys (tokens,
//! JWTs, session secrets) and applies one of three modes: reject, sanitize
//! or monitor. The same classifier and configuration guard both sides of a
//! service boundary: inbound requests through an axum middleware, outbound
//! calls through transport decorators.
//!
//! ## Quick Start
//!
//! ```rust
//! use a3s_shield::{Context, ConfigPatch, IncidentMeta, Mode, Shield};
//!
//! # fn example() -> a3s_shield::Result<()> {
//! let shield = Shield::new();
//! shield.configure(ConfigPatch::new().mode(Mode::Sanitize))?;
//!
//! let body = serde_json::json!({"user": "alice", "access_token": "abc"});
//! let result = shield.scan(Some(&body), Context::Body, &IncidentMeta::default());
//!
//! assert!(result.incident);
//! assert_eq!(result.sanitized.unwrap()["access_token"], "[REDACTED_TOKEN]");
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - **scanner** — case-insensitive key classifier and flat object scanner
//! - **policy** — `PolicyEngine` owns the live configuration, `PolicyView` reads it
//! - **enforcer** — request-side verdicts plus the axum middleware
//! - **location** — strips forbidden keys from a navigable address
//! - **transport** — guarded fetch, request-object and beacon transports
//! - **sink** — incident destinations (tracing, memory, broadcast)

pub mod config;
pub mod enforcer;
pub mod error;
pub mod location;
pub mod policy;
pub mod scanner;
pub mod shield;
pub mod sink;
pub mod transport;
pub mod types;

// Re-export core types
pub use config::{
    ConfigPatch, ContextsPatch, EnabledContexts, ShieldConfig, DEFAULT_FORBIDDEN_KEYS,
    DEFAULT_REDACT_VALUE,
};
pub use error::{Result, ShieldError};
pub use policy::{PolicyEngine, PolicyView};
pub use scanner::{is_forbidden, scan};
pub use shield::Shield;
pub use types::{Context, IncidentEvent, IncidentKind, IncidentMeta, Mode, ScanResult};

// Re-export enforcement surfaces for convenience
pub use enforcer::http::{shield_middleware, HttpShield, HttpSurface};
pub use enforcer::{Enforcer, Rejection, RejectionCode, RequestParts, RequestSurface, Verdict};
pub use location::{LocationSanitizer, MemoryLocation, Navigable};
pub use sink::{BroadcastSink, FnSink, IncidentSink, MemorySink, NullSink, TracingSink};
pub use transport::{
    patch_fetch, patch_send_beacon, patch_transports, patch_xhr, Beacon, Fetch, FetchRequest,
    FetchResponse, GuardedBeacon, GuardedFetch, GuardedRequest, GuardedRequestFactory,
    ReqwestBeacon, ReqwestFetch, ReqwestRequest, ReqwestRequestFactory, RequestFactory,
    RequestObject, TransportBody, TransportGuard, Transports,
};
