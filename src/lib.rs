//! vulx-core: DAST orchestration core.
//!
//! Drives up to three external scan engines (a template-based vulnerability
//! scanner, a schema-driven API fuzzer, and a full DAST proxy) under one
//! authenticated session, normalizes their output into a common finding
//! model, enriches findings with compliance-control mappings and
//! remediation guidance, and reconciles them against prior scans so a
//! finding's lifecycle survives across runs.
//!
//! The queue worker and its database/queue backends live behind the
//! `storage` feature; the HTTP-driven pieces (auth token grants, the DAST
//! REST control plane, notification/upload sinks) live behind `http`.
//! Both are enabled by default.

pub mod auth;
pub mod compliance;
pub mod config;
pub mod core;
pub mod custom_rules;
pub mod engines;
pub mod error;
pub mod models;
pub mod openapi_scanner;
pub mod remediation;

#[cfg(feature = "storage")]
pub mod worker;

pub use auth::{AuthConfig, AuthContext, AuthMethod};
#[cfg(feature = "http")]
pub use auth::AuthHandler;
pub use compliance::{ComplianceMapper, Framework};
pub use core::{OrchestratorConfig, ScanOrchestrator, StatusCallback};
pub use custom_rules::{CustomRule, CustomRulesScanner};
pub use error::{VulxError, VulxResult};
pub use models::{
    Confidence, Finding, ScanConfig, ScanResult, ScanStatus, ScanTarget, ScanType, Severity,
};
pub use openapi_scanner::OpenApiScanner;
pub use remediation::{get_remediation, Language, Remediation};

#[cfg(feature = "storage")]
pub use worker::Worker;
