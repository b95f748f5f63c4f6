// Engine adapters (C6): drive each external tool's subprocess or HTTP
// lifecycle and normalize its native output into `Finding` values. Every
// adapter implements the same contract and never lets a failure escape
// its own boundary — on any error it logs and returns an empty list, so
// the orchestrator can always proceed to the next phase.

pub mod dast;
pub mod fuzzer;
pub mod template;

use async_trait::async_trait;

use crate::auth::AuthContext;
use crate::models::{Finding, ScanTarget};

/// Per-engine knobs threaded down from `OrchestratorConfig`; each adapter
/// only reads the fields relevant to it.
#[derive(Debug, Clone)]
pub struct EngineOptions {
    pub template_binary: String,
    pub template_severity_filter: Vec<String>,
    pub template_concurrency: u32,
    pub template_bulk_size: u32,
    pub template_retries: u32,
    pub template_rate_limit: u32,
    pub template_root: Option<String>,
    pub template_tags: Option<String>,
    pub template_timeout_secs: u64,

    pub fuzzer_binary: String,
    pub fuzzer_max_examples: u32,
    pub fuzzer_deadline_ms: u64,
    pub fuzzer_workers: u32,
    pub fuzzer_request_timeout_ms: u64,
    pub fuzzer_checks: Vec<String>,
    pub fuzzer_stateful: bool,
    pub fuzzer_timeout_secs: u64,

    pub dast_binary: String,
    pub dast_host: String,
    pub dast_port: u16,
    pub dast_api_key: String,
    pub dast_ajax_spider: bool,
    pub dast_max_duration_secs: u64,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            template_binary: "nuclei".to_string(),
            template_severity_filter: vec![
                "critical".to_string(),
                "high".to_string(),
                "medium".to_string(),
                "low".to_string(),
            ],
            template_concurrency: 25,
            template_bulk_size: 25,
            template_retries: 1,
            template_rate_limit: 100,
            template_root: None,
            template_tags: None,
            template_timeout_secs: 600,

            fuzzer_binary: "schemathesis".to_string(),
            fuzzer_max_examples: 100,
            fuzzer_deadline_ms: 15_000,
            fuzzer_workers: 4,
            fuzzer_request_timeout_ms: 30_000,
            fuzzer_checks: vec![
                "not_a_server_error".to_string(),
                "status_code_conformance".to_string(),
                "content_type_conformance".to_string(),
                "response_schema_conformance".to_string(),
                "response_headers_conformance".to_string(),
                "negative_data_rejection".to_string(),
                "use_after_free".to_string(),
            ],
            fuzzer_stateful: true,
            fuzzer_timeout_secs: 900,

            dast_binary: "zap.sh".to_string(),
            dast_host: "localhost".to_string(),
            dast_port: 8080,
            dast_api_key: String::new(),
            dast_ajax_spider: false,
            dast_max_duration_secs: 3600,
        }
    }
}

/// Common adapter contract every engine implements. `scan` never returns
/// `Err`; adapter-internal failures are caught, logged, and surfaced as
/// an empty finding list so the orchestrator can tell "ran, found
/// nothing" apart from "ran" at all only through its own bookkeeping of
/// `engines_used`.
#[async_trait]
pub trait EngineAdapter {
    fn name(&self) -> &'static str;

    async fn scan(
        &self,
        target: &ScanTarget,
        auth: &AuthContext,
        options: &EngineOptions,
    ) -> Vec<Finding>;
}

/// Strips the query string from a URL or path, keeping only the path
/// component. Falls back to the input unchanged if it doesn't parse as
/// an absolute URL (the adapters frequently see bare paths).
pub fn endpoint_path_only(raw: &str) -> String {
    if let Ok(url) = url::Url::parse(raw) {
        let mut path = url.path().to_string();
        if path.is_empty() {
            path = "/".to_string();
        }
        path
    } else {
        raw.split('?').next().unwrap_or(raw).to_string()
    }
}
