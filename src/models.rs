// Common finding shape, severity algebra, and the scan-level data model
// (C1). Every engine adapter produces `Finding` values directly; nothing
// downstream works with untyped maps.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Info,
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    /// CRITICAL=5 .. INFO=1, matching the mapper's rank table exactly.
    pub fn rank(self) -> u8 {
        match self {
            Severity::Critical => 5,
            Severity::High => 4,
            Severity::Medium => 3,
            Severity::Low => 2,
            Severity::Info => 1,
        }
    }

    /// Risk-score contribution weight: {25,15,5,2,0}.
    pub fn weight(self) -> u32 {
        match self {
            Severity::Critical => 25,
            Severity::High => 15,
            Severity::Medium => 5,
            Severity::Low => 2,
            Severity::Info => 0,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Critical => "CRITICAL",
            Severity::High => "HIGH",
            Severity::Medium => "MEDIUM",
            Severity::Low => "LOW",
            Severity::Info => "INFO",
        }
    }

    pub fn parse(s: &str) -> Severity {
        match s.to_ascii_uppercase().as_str() {
            "CRITICAL" => Severity::Critical,
            "HIGH" => Severity::High,
            "MEDIUM" => Severity::Medium,
            "LOW" => Severity::Low,
            _ => Severity::Info,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Confidence {
    Low,
    Medium,
    High,
}

impl Confidence {
    pub fn as_str(self) -> &'static str {
        match self {
            Confidence::High => "HIGH",
            Confidence::Medium => "MEDIUM",
            Confidence::Low => "LOW",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineOrigin {
    Static,
    Template,
    Fuzzer,
    Dast,
    Custom,
}

impl EngineOrigin {
    pub fn as_str(self) -> &'static str {
        match self {
            EngineOrigin::Static => "static",
            EngineOrigin::Template => "template",
            EngineOrigin::Fuzzer => "fuzzer",
            EngineOrigin::Dast => "dast",
            EngineOrigin::Custom => "custom",
        }
    }
}

/// A single, immutable-once-emitted finding. Engine adapters construct this
/// directly; nothing downstream mutates it except the orchestrator's
/// enrichment pass, which only fills `compliance_mappings`, `remediation`,
/// and `code_fix`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Finding {
    pub id: String,
    pub engine: EngineOrigin,
    #[serde(rename = "type")]
    pub type_: String,
    pub severity: Severity,
    pub confidence: Confidence,
    pub title: String,
    pub description: String,
    #[serde(default)]
    pub remediation: Option<String>,
    #[serde(default)]
    pub code_fix: Option<String>,
    #[serde(default)]
    pub evidence: Option<String>,
    #[serde(default)]
    pub request: Option<String>,
    #[serde(default)]
    pub response: Option<String>,
    pub endpoint: String,
    pub method: String,
    #[serde(default)]
    pub parameter: Option<String>,
    #[serde(default)]
    pub cwe_id: Option<String>,
    #[serde(default)]
    pub cve_id: Option<String>,
    #[serde(default)]
    pub owasp_category: Option<String>,
    #[serde(default)]
    pub cvss_score: Option<f64>,
    #[serde(default)]
    pub references: Vec<String>,
    #[serde(default)]
    pub compliance_mappings: HashMap<String, Vec<String>>,
    pub detected_at: DateTime<Utc>,
}

impl Finding {
    /// Natural key within a single scan: `(type, endpoint, method, parameter)`.
    pub fn scan_key(&self) -> (String, String, String, Option<String>) {
        (
            self.type_.clone(),
            self.endpoint.clone(),
            self.method.to_ascii_uppercase(),
            self.parameter.clone(),
        )
    }

    /// Natural key across scans of the same project+environment:
    /// `(type, method_upper, endpoint)`.
    pub fn natural_key(&self) -> (String, String, String) {
        (self.type_.clone(), self.method.to_ascii_uppercase(), self.endpoint.clone())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ScanType {
    Quick,
    Standard,
    Full,
    Continuous,
}

/// Target + scan type + optional auth, as submitted by a caller (the CLI
/// front-end or the queue worker after parsing a job payload).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanConfig {
    pub target: ScanTarget,
    pub scan_type: ScanType,
    #[serde(default)]
    pub auth_config: Option<crate::auth::AuthConfig>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ScanStatus {
    Queued,
    Initializing,
    Authenticating,
    ScanningQuick,
    ScanningFuzzing,
    ScanningDast,
    Analyzing,
    GeneratingReport,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanTarget {
    pub url: String,
    #[serde(default)]
    pub openapi_spec_url: Option<String>,
    #[serde(default)]
    pub openapi_spec_content: Option<String>,
    #[serde(default)]
    pub include_paths: Vec<String>,
    #[serde(default = "default_exclude_paths")]
    pub exclude_paths: Vec<String>,
    #[serde(default = "default_rate_limit")]
    pub rate_limit: u32,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_max_depth")]
    pub max_depth: u32,
}

fn default_exclude_paths() -> Vec<String> {
    vec![
        "/health".to_string(),
        "/metrics".to_string(),
        "/ready".to_string(),
        "/live".to_string(),
        "/.well-known/*".to_string(),
        "/favicon.ico".to_string(),
    ]
}

fn default_rate_limit() -> u32 {
    100
}

fn default_timeout_ms() -> u64 {
    30_000
}

fn default_max_depth() -> u32 {
    10
}

impl ScanTarget {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            openapi_spec_url: None,
            openapi_spec_content: None,
            include_paths: Vec::new(),
            exclude_paths: default_exclude_paths(),
            rate_limit: default_rate_limit(),
            timeout_ms: default_timeout_ms(),
            max_depth: default_max_depth(),
        }
    }

    pub fn has_spec(&self) -> bool {
        self.openapi_spec_url.is_some() || self.openapi_spec_content.is_some()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Coverage {
    pub endpoints_discovered: usize,
    pub http_methods_tested: Vec<String>,
    pub engines_used: Vec<String>,
    pub authenticated: bool,
    pub depth_reached: u32,
    pub owasp_categories_covered: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Summary {
    pub total: usize,
    pub by_severity: HashMap<String, usize>,
    pub by_type: HashMap<String, usize>,
    pub by_endpoint: HashMap<String, usize>,
    pub by_engine: HashMap<String, usize>,
    pub critical_count: usize,
    pub high_count: usize,
    pub actionable: usize,
    #[serde(default)]
    pub error: Option<String>,
}

/// Tally findings into the standard scan summary: by-severity, by-type,
/// top-10 by-endpoint, by-engine, plus the critical/high/actionable counts.
pub fn calculate_summary(findings: &[Finding]) -> Summary {
    let mut by_severity: HashMap<String, usize> = HashMap::new();
    let mut by_type: HashMap<String, usize> = HashMap::new();
    let mut by_endpoint: HashMap<String, usize> = HashMap::new();
    let mut by_engine: HashMap<String, usize> = HashMap::new();

    for f in findings {
        *by_severity.entry(f.severity.as_str().to_string()).or_insert(0) += 1;
        *by_type.entry(f.type_.clone()).or_insert(0) += 1;
        *by_endpoint.entry(f.endpoint.clone()).or_insert(0) += 1;
        *by_engine.entry(f.engine.as_str().to_string()).or_insert(0) += 1;
    }

    let mut endpoint_counts: Vec<(String, usize)> = by_endpoint.into_iter().collect();
    endpoint_counts.sort_by(|a, b| b.1.cmp(&a.1));
    endpoint_counts.truncate(10);
    let by_endpoint: HashMap<String, usize> = endpoint_counts.into_iter().collect();

    let critical_count = *by_severity.get("CRITICAL").unwrap_or(&0);
    let high_count = *by_severity.get("HIGH").unwrap_or(&0);

    Summary {
        total: findings.len(),
        by_severity,
        by_type,
        by_endpoint,
        by_engine,
        critical_count,
        high_count,
        actionable: critical_count + high_count,
        error: None,
    }
}

/// `min(100, sum(weight(severity)))`; 0 for an empty finding set.
pub fn calculate_risk_score(findings: &[Finding]) -> u32 {
    let total: u32 = findings.iter().map(|f| f.severity.weight()).sum();
    total.min(100)
}

pub fn calculate_coverage(findings: &[Finding], target: &ScanTarget, engines_used: &[String], authenticated: bool) -> Coverage {
    let mut endpoints: Vec<String> = findings.iter().map(|f| f.endpoint.clone()).collect();
    endpoints.sort();
    endpoints.dedup();

    let mut methods: Vec<String> = findings.iter().map(|f| f.method.to_ascii_uppercase()).collect();
    methods.sort();
    methods.dedup();

    let mut owasp: Vec<String> = findings.iter().filter_map(|f| f.owasp_category.clone()).collect();
    owasp.sort();
    owasp.dedup();

    Coverage {
        endpoints_discovered: endpoints.len(),
        http_methods_tested: methods,
        engines_used: engines_used.to_vec(),
        authenticated,
        depth_reached: target.max_depth,
        owasp_categories_covered: owasp,
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanResult {
    pub scan_id: String,
    pub target_url: String,
    pub scan_type: ScanType,
    pub status: ScanStatus,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub duration_ms: Option<i64>,
    pub findings: Vec<Finding>,
    pub summary: Summary,
    pub engines_used: Vec<String>,
    #[serde(default)]
    pub auth_method: Option<String>,
    pub coverage: Coverage,
    #[serde(default)]
    pub compliance_summary: Option<crate::compliance::ComplianceSummary>,
    pub risk_score: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PersistedScanStatus {
    Queued,
    Processing,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistedScan {
    pub id: Uuid,
    pub project_id: Uuid,
    pub environment: String,
    pub status: PersistedScanStatus,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FindingStatus {
    Open,
    InProgress,
    Fixed,
    FalsePositive,
    Accepted,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistedFinding {
    pub id: Uuid,
    pub scan_id: Uuid,
    #[serde(rename = "type")]
    pub type_: String,
    pub severity: Severity,
    pub description: String,
    pub endpoint: String,
    pub method: String,
    #[serde(default)]
    pub remediation: Option<String>,
    #[serde(default)]
    pub owasp_category: Option<String>,
    #[serde(default)]
    pub cwe_id: Option<String>,
    #[serde(default)]
    pub evidence: Option<String>,
    pub created_at: DateTime<Utc>,
    pub status: FindingStatus,
    #[serde(default)]
    pub resolution_notes: Option<String>,
    #[serde(default)]
    pub assigned_to: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn finding(type_: &str, endpoint: &str, method: &str, severity: Severity) -> Finding {
        Finding {
            id: Uuid::new_v4().to_string(),
            engine: EngineOrigin::Static,
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
            parameter: None,
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
    fn risk_score_matches_worked_example() {
        let findings = vec![
            finding("a", "/a", "GET", Severity::Critical),
            finding("b", "/b", "GET", Severity::High),
            finding("c", "/c", "GET", Severity::High),
            finding("d", "/d", "GET", Severity::Medium),
            finding("e", "/e", "GET", Severity::Low),
        ];
        assert_eq!(calculate_risk_score(&findings), 62);
    }

    #[test]
    fn risk_score_caps_at_100() {
        let findings: Vec<Finding> = (0..10).map(|i| finding(&format!("f{i}"), "/x", "GET", Severity::Critical)).collect();
        assert_eq!(calculate_risk_score(&findings), 100);
    }

    #[test]
    fn risk_score_empty_is_zero() {
        assert_eq!(calculate_risk_score(&[]), 0);
    }

    #[test]
    fn severity_rank_orders_correctly() {
        assert!(Severity::Critical.rank() > Severity::High.rank());
        assert!(Severity::High.rank() > Severity::Medium.rank());
        assert!(Severity::Medium.rank() > Severity::Low.rank());
        assert!(Severity::Low.rank() > Severity::Info.rank());
    }

    #[test]
    fn summary_counts_actionable_as_critical_plus_high() {
        let findings = vec![
            finding("a", "/a", "GET", Severity::Critical),
            finding("b", "/b", "GET", Severity::High),
            finding("c", "/c", "GET", Severity::Low),
        ];
        let summary = calculate_summary(&findings);
        assert_eq!(summary.actionable, 2);
        assert_eq!(summary.total, 3);
    }
}
