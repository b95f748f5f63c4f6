// Scan orchestrator (C7): the phased state machine that drives the
// template/fuzzer/DAST engines under one authenticated session, merges
// and deduplicates their findings, and enriches the survivors with
// compliance mappings and remediation guidance.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use chrono::Utc;

use crate::auth::{AuthConfig, AuthContext};
use crate::compliance::{ComplianceMapper, Framework};
use crate::engines::template::TemplateEngine;
#[cfg(feature = "http")]
use crate::engines::dast::DastEngine;
use crate::engines::fuzzer::FuzzerEngine;
use crate::engines::{EngineAdapter, EngineOptions};
use crate::models::{
    calculate_coverage, calculate_risk_score, calculate_summary, Finding, ScanResult, ScanStatus, ScanTarget, ScanType,
};
use crate::remediation::{self, Language};

/// Fired on every state transition: `(scan_id, state, percent, message)`.
/// Fire-and-forget — a panicking callback is caught and discarded so it
/// can never abort the scan it is merely observing.
pub type StatusCallback = Arc<dyn Fn(&str, ScanStatus, u8, &str) + Send + Sync>;

#[derive(Clone)]
pub struct OrchestratorConfig {
    pub engine_options: EngineOptions,
    pub compliance_frameworks: Option<Vec<Framework>>,
    pub remediation_language: Language,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            engine_options: EngineOptions::default(),
            compliance_frameworks: None,
            remediation_language: Language::default(),
        }
    }
}

pub struct ScanOrchestrator {
    config: OrchestratorConfig,
    compliance: ComplianceMapper,
    #[cfg(feature = "http")]
    auth_handler: crate::auth::AuthHandler,
}

impl Default for ScanOrchestrator {
    fn default() -> Self {
        Self::new(OrchestratorConfig::default())
    }
}

impl ScanOrchestrator {
    pub fn new(config: OrchestratorConfig) -> Self {
        let compliance = match &config.compliance_frameworks {
            Some(frameworks) => ComplianceMapper::with_frameworks(frameworks.clone()),
            None => ComplianceMapper::new(),
        };

        Self {
            config,
            compliance,
            #[cfg(feature = "http")]
            auth_handler: crate::auth::AuthHandler::new(),
        }
    }

    fn emit(&self, status_cb: &Option<StatusCallback>, scan_id: &str, state: ScanStatus, pct: u8, message: &str) {
        log::info!("scan {scan_id}: {state:?} ({pct}%) {message}");
        if let Some(cb) = status_cb {
            let cb = cb.clone();
            let scan_id = scan_id.to_string();
            let message = message.to_string();
            // A panicking callback must never affect the scan it reports on.
            if catch_unwind(AssertUnwindSafe(|| cb(&scan_id, state, pct, &message))).is_err() {
                log::warn!("scan {scan_id}: status callback panicked, discarding");
            }
        }
    }

    /// Runs a full scan per §4.7. Always returns a `ScanResult`: even a
    /// failed scan is a result, with `status=FAILED` and
    /// `summary.error` populated, never a propagated error.
    pub async fn run_scan(
        &self,
        scan_id: &str,
        target: ScanTarget,
        scan_type: ScanType,
        auth_config: Option<AuthConfig>,
        status_cb: Option<StatusCallback>,
    ) -> ScanResult {
        let started_at = Utc::now();
        self.emit(&status_cb, scan_id, ScanStatus::Initializing, 5, "initializing scan");

        let authenticated = auth_config.is_some();
        let auth_context = match self.authenticate(scan_id, &auth_config, &status_cb).await {
            Ok(ctx) => ctx,
            Err(message) => {
                return self.failed_result(scan_id, &target, scan_type, started_at, message);
            }
        };

        let mut findings: Vec<Finding> = Vec::new();
        let mut engines_used: Vec<String> = Vec::new();

        self.emit(&status_cb, scan_id, ScanStatus::ScanningQuick, 15, "running template engine");
        let template = TemplateEngine::new();
        findings.extend(template.scan(&target, &auth_context, &self.config.engine_options).await);
        engines_used.push(template.name().to_string());

        if matches!(scan_type, ScanType::Standard | ScanType::Full | ScanType::Continuous) && target.has_spec() {
            self.emit(&status_cb, scan_id, ScanStatus::ScanningFuzzing, 35, "running fuzzer engine");
            let fuzzer = FuzzerEngine::new();
            findings.extend(fuzzer.scan(&target, &auth_context, &self.config.engine_options).await);
            engines_used.push(fuzzer.name().to_string());
        }

        #[cfg(feature = "http")]
        if matches!(scan_type, ScanType::Full | ScanType::Continuous) {
            self.emit(&status_cb, scan_id, ScanStatus::ScanningDast, 55, "running DAST engine");
            let dast = DastEngine::new();
            findings.extend(dast.scan(&target, &auth_context, &self.config.engine_options).await);
            engines_used.push(dast.name().to_string());
        }

        self.emit(&status_cb, scan_id, ScanStatus::Analyzing, 85, "deduplicating and enriching findings");
        let deduped = dedupe_within_scan(findings);
        let enriched = self.enrich(deduped);

        let summary = calculate_summary(&enriched);
        let risk_score = calculate_risk_score(&enriched);
        let coverage = calculate_coverage(&enriched, &target, &engines_used, authenticated);
        let compliance_summary = Some(self.compliance.get_summary(&enriched));
        let completed_at = Utc::now();

        self.emit(&status_cb, scan_id, ScanStatus::Completed, 100, "scan completed");

        ScanResult {
            scan_id: scan_id.to_string(),
            target_url: target.url.clone(),
            scan_type,
            status: ScanStatus::Completed,
            started_at,
            completed_at: Some(completed_at),
            duration_ms: Some((completed_at - started_at).num_milliseconds()),
            findings: enriched,
            summary,
            engines_used,
            auth_method: Some(auth_context.method.clone()),
            coverage,
            compliance_summary,
            risk_score,
        }
    }

    async fn authenticate(
        &self,
        scan_id: &str,
        auth_config: &Option<AuthConfig>,
        status_cb: &Option<StatusCallback>,
    ) -> Result<AuthContext, String> {
        let Some(_config) = auth_config else {
            return Ok(AuthContext::new("none"));
        };

        self.emit(status_cb, scan_id, ScanStatus::Authenticating, 10, "authenticating");

        #[cfg(feature = "http")]
        {
            self.auth_handler
                .authenticate(_config)
                .await
                .map_err(|e| format!("authentication failed: {e}"))
        }
        #[cfg(not(feature = "http"))]
        {
            Err("authentication requires the `http` feature".to_string())
        }
    }

    fn enrich(&self, findings: Vec<Finding>) -> Vec<Finding> {
        findings
            .into_iter()
            .map(|mut f| {
                f.compliance_mappings = self.compliance.map_finding(&f);
                let rem = remediation::get_remediation(&f, self.config.remediation_language);
                f.remediation = Some(rem.description);
                f.code_fix = rem.code_example;
                f
            })
            .collect()
    }

    fn failed_result(
        &self,
        scan_id: &str,
        target: &ScanTarget,
        scan_type: ScanType,
        started_at: chrono::DateTime<Utc>,
        error: String,
    ) -> ScanResult {
        log::error!("scan {scan_id} failed: {error}");
        let completed_at = Utc::now();
        let mut summary = calculate_summary(&[]);
        summary.error = Some(error);

        ScanResult {
            scan_id: scan_id.to_string(),
            target_url: target.url.clone(),
            scan_type,
            status: ScanStatus::Failed,
            started_at,
            completed_at: Some(completed_at),
            duration_ms: Some((completed_at - started_at).num_milliseconds()),
            findings: Vec::new(),
            summary,
            engines_used: Vec::new(),
            auth_method: None,
            coverage: calculate_coverage(&[], target, &[], false),
            compliance_summary: None,
            risk_score: 0,
        }
    }
}

/// Within-scan dedup by `(type, endpoint, method, parameter)`: on
/// collision keep the strictly-higher-severity instance; ties keep the
/// first-seen one.
pub fn dedupe_within_scan(findings: Vec<Finding>) -> Vec<Finding> {
    let mut order: Vec<(String, String, String, Option<String>)> = Vec::new();
    let mut by_key: HashMap<(String, String, String, Option<String>), Finding> = HashMap::new();

    for finding in findings {
        let key = finding.scan_key();
        match by_key.get(&key) {
            Some(existing) if finding.severity.rank() > existing.severity.rank() => {
                by_key.insert(key, finding);
            }
            Some(_) => {}
            None => {
                order.push(key.clone());
                by_key.insert(key, finding);
            }
        }
    }

    order.into_iter().filter_map(|key| by_key.remove(&key)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Confidence, EngineOrigin, Severity};

    fn finding(type_: &str, endpoint: &str, method: &str, parameter: Option<&str>, severity: Severity) -> Finding {
        Finding {
            id: uuid::Uuid::new_v4().to_string(),
            engine: EngineOrigin::Template,
            type_: type_.to_string(),
            severity,
            confidence: Confidence::High,
            title: type_.to_string(),
            description: String::new(),
            remediation: None,
            code_fix: None,
            evidence: None,
            request: None,
            response: None,
            endpoint: endpoint.to_string(),
            method: method.to_string(),
            parameter: parameter.map(|s| s.to_string()),
            cwe_id: None,
            cve_id: None,
            owasp_category: None,
            cvss_score: None,
            references: Vec::new(),
            compliance_mappings: HashMap::new(),
            detected_at: Utc::now(),
        }
    }

    #[test]
    fn dedup_keeps_higher_severity_on_collision() {
        let findings = vec![
            finding("Cross-Site Scripting", "/q", "GET", Some("q"), Severity::Low),
            finding("Cross-Site Scripting", "/q", "GET", Some("q"), Severity::High),
        ];
        let deduped = dedupe_within_scan(findings);
        assert_eq!(deduped.len(), 1);
        assert_eq!(deduped[0].severity, Severity::High);
    }

    #[test]
    fn dedup_keeps_first_seen_on_tie() {
        let mut a = finding("SQLI", "/x", "POST", None, Severity::High);
        a.title = "first".to_string();
        let mut b = finding("SQLI", "/x", "POST", None, Severity::High);
        b.title = "second".to_string();
        let deduped = dedupe_within_scan(vec![a, b]);
        assert_eq!(deduped.len(), 1);
        assert_eq!(deduped[0].title, "first");
    }

    #[test]
    fn dedup_preserves_distinct_keys() {
        let findings = vec![
            finding("A", "/a", "GET", None, Severity::Low),
            finding("B", "/b", "GET", None, Severity::Low),
        ];
        assert_eq!(dedupe_within_scan(findings).len(), 2);
    }

    #[test]
    fn different_parameters_are_distinct_findings() {
        let findings = vec![
            finding("IDOR", "/x", "GET", Some("id"), Severity::Medium),
            finding("IDOR", "/x", "GET", Some("order_id"), Severity::Medium),
        ];
        assert_eq!(dedupe_within_scan(findings).len(), 2);
    }
}
