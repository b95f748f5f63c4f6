// Fuzzer engine adapter (C6.2): drives the external schema-driven API
// fuzzer (a schemathesis-shaped CLI) as a subprocess, parsing failures
// from both its stdout stream and its JUnit XML report.

use std::collections::HashSet;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use tokio::process::Command;

use crate::auth::AuthContext;
use crate::models::{Confidence, EngineOrigin, Finding, ScanTarget, Severity};

use super::{EngineAdapter, EngineOptions};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FailureType {
    ServerError,
    StatusCodeConformance,
    ContentTypeConformance,
    ResponseSchemaConformance,
    ResponseHeadersConformance,
    NegativeDataRejection,
    UseAfterFree,
}

impl FailureType {
    fn severity(self) -> Severity {
        match self {
            FailureType::ServerError => Severity::High,
            FailureType::StatusCodeConformance => Severity::Medium,
            FailureType::ContentTypeConformance => Severity::Low,
            FailureType::ResponseSchemaConformance => Severity::Medium,
            FailureType::ResponseHeadersConformance => Severity::Low,
            FailureType::NegativeDataRejection => Severity::High,
            FailureType::UseAfterFree => Severity::Critical,
        }
    }

    fn owasp_category(self) -> Option<&'static str> {
        match self {
            FailureType::ServerError => Some("API8:2023 - Security Misconfiguration"),
            FailureType::StatusCodeConformance => Some("API8:2023 - Security Misconfiguration"),
            FailureType::ResponseSchemaConformance => Some("API3:2023 - Broken Object Property Level Authorization"),
            FailureType::NegativeDataRejection => Some("API8:2023 - Security Misconfiguration"),
            FailureType::UseAfterFree => Some("API1:2023 - Broken Object Level Authorization"),
            FailureType::ContentTypeConformance | FailureType::ResponseHeadersConformance => None,
        }
    }

    fn label(self) -> &'static str {
        match self {
            FailureType::ServerError => "server_error",
            FailureType::StatusCodeConformance => "status_code_conformance",
            FailureType::ContentTypeConformance => "content_type_conformance",
            FailureType::ResponseSchemaConformance => "response_schema_conformance",
            FailureType::ResponseHeadersConformance => "response_headers_conformance",
            FailureType::NegativeDataRejection => "negative_data_rejection",
            FailureType::UseAfterFree => "use_after_free",
        }
    }

    fn classify_stdout(message: &str) -> FailureType {
        let lower = message.to_ascii_lowercase();
        if lower.contains("status_code") {
            FailureType::StatusCodeConformance
        } else if lower.contains("content_type") {
            FailureType::ContentTypeConformance
        } else if lower.contains("schema") {
            FailureType::ResponseSchemaConformance
        } else {
            FailureType::ServerError
        }
    }
}

fn finding_from(
    failure: FailureType,
    endpoint: &str,
    method: &str,
    description: String,
    evidence: Option<String>,
) -> Finding {
    Finding {
        id: uuid::Uuid::new_v4().to_string(),
        engine: EngineOrigin::Fuzzer,
        type_: failure.label().to_string(),
        severity: failure.severity(),
        confidence: Confidence::High,
        title: failure.label().replace('_', " "),
        description,
        remediation: None,
        code_fix: None,
        evidence,
        request: None,
        response: None,
        endpoint: endpoint.to_string(),
        method: method.to_ascii_uppercase(),
        parameter: None,
        cwe_id: None,
        cve_id: None,
        owasp_category: failure.owasp_category().map(|s| s.to_string()),
        cvss_score: None,
        references: Vec::new(),
        compliance_mappings: Default::default(),
        detected_at: chrono::Utc::now(),
    }
}

const METHOD_KEYWORDS: &[&str] = &["GET", "POST", "PUT", "PATCH", "DELETE", "HEAD", "OPTIONS"];

/// Pure parsing of the fuzzer's stdout stream: a breadcrumb line carrying
/// " -> " and an HTTP method keyword updates the tracked endpoint; a
/// subsequent FAILED/ERROR line is classified and emitted against it.
pub fn parse_stdout(stdout: &str) -> Vec<Finding> {
    let mut findings = Vec::new();
    let mut current: Option<(String, String)> = None;

    for raw_line in stdout.lines() {
        let line = raw_line.trim();
        if line.contains(" -> ") {
            if let Some(method) = METHOD_KEYWORDS.iter().find(|m| line.contains(*m)) {
                if let Some(endpoint_part) = line.split(" -> ").next() {
                    let endpoint = endpoint_part
                        .split_whitespace()
                        .find(|tok| tok.starts_with('/'))
                        .unwrap_or(endpoint_part)
                        .to_string();
                    current = Some((endpoint, method.to_string()));
                }
            }
            continue;
        }

        if (line.contains("FAILED") || line.contains("ERROR")) && current.is_some() {
            let (endpoint, method) = current.clone().unwrap();
            let failure = FailureType::classify_stdout(line);
            findings.push(finding_from(failure, &endpoint, &method, line.to_string(), Some(raw_line.to_string())));
        }
    }

    findings
}

/// Pure parsing of JUnit XML: `<testcase name="test_api[METHOD /path]">`
/// elements containing a `<failure>` or `<error>` child.
pub fn parse_junit_xml(xml: &str) -> Vec<Finding> {
    let mut findings = Vec::new();

    let testcase_re = Regex::new(r#"(?s)<testcase[^>]*name="([^"]+)"[^>]*>(.*?)</testcase>"#)
        .expect("static regex is valid");
    let self_closing_re = Regex::new(r#"<testcase[^>]*name="([^"]+)"[^>]*/>"#).expect("static regex is valid");
    let name_re = Regex::new(r"test_api\[(\w+)\s+([^\]]+)\]").expect("static regex is valid");
    let message_re = Regex::new(r#"(?s)<(?:failure|error)[^>]*message="([^"]*)""#).expect("static regex is valid");
    let has_failure_re = Regex::new(r"<(?:failure|error)\b").expect("static regex is valid");

    for cap in testcase_re.captures_iter(xml) {
        let name = &cap[1];
        let body = &cap[2];
        if !has_failure_re.is_match(body) {
            continue;
        }
        let Some(parsed) = name_re.captures(name) else { continue };
        let method = parsed[1].to_string();
        let endpoint = parsed[2].to_string();

        let message = message_re
            .captures(body)
            .map(|c| c[1].to_string())
            .unwrap_or_default();
        let lower = message.to_ascii_lowercase();
        let severity = if lower.contains("500") || lower.contains("server") {
            Severity::High
        } else if lower.contains("schema") {
            Severity::Medium
        } else {
            Severity::Medium
        };

        findings.push(Finding {
            id: uuid::Uuid::new_v4().to_string(),
            engine: EngineOrigin::Fuzzer,
            type_: "schema_conformance_failure".to_string(),
            severity,
            confidence: Confidence::High,
            title: name.to_string(),
            description: if message.is_empty() { name.to_string() } else { message.clone() },
            remediation: None,
            code_fix: None,
            evidence: Some(message),
            request: None,
            response: None,
            endpoint,
            method: method.to_ascii_uppercase(),
            parameter: None,
            cwe_id: Some("CWE-754".to_string()),
            cve_id: None,
            owasp_category: Some("API8:2023 - Security Misconfiguration".to_string()),
            cvss_score: None,
            references: Vec::new(),
            compliance_mappings: Default::default(),
            detected_at: chrono::Utc::now(),
        });
    }

    // Self-closing testcases never carry a failure/error child; skip them.
    let _ = self_closing_re;

    findings
}

fn dedupe_within_engine(findings: Vec<Finding>) -> Vec<Finding> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for f in findings {
        let key = (f.type_.clone(), f.endpoint.clone(), f.method.clone());
        if seen.insert(key) {
            out.push(f);
        }
    }
    out
}

pub struct FuzzerEngine;

impl Default for FuzzerEngine {
    fn default() -> Self {
        Self
    }
}

impl FuzzerEngine {
    pub fn new() -> Self {
        Self::default()
    }

    fn build_args(
        &self,
        target: &ScanTarget,
        auth: &AuthContext,
        options: &EngineOptions,
        junit_path: &std::path::Path,
    ) -> Vec<String> {
        let spec_source = target
            .openapi_spec_url
            .clone()
            .or_else(|| target.openapi_spec_content.clone())
            .unwrap_or_default();

        let mut args = vec![
            "run".to_string(),
            spec_source,
            "--base-url".to_string(),
            target.url.clone(),
            "--hypothesis-max-examples".to_string(),
            options.fuzzer_max_examples.to_string(),
            "--hypothesis-deadline".to_string(),
            options.fuzzer_deadline_ms.to_string(),
            "--workers".to_string(),
            options.fuzzer_workers.to_string(),
            "--request-timeout".to_string(),
            options.fuzzer_request_timeout_ms.to_string(),
            "--junit-xml".to_string(),
            junit_path.display().to_string(),
        ];

        for check in &options.fuzzer_checks {
            args.push("--checks".to_string());
            args.push(check.clone());
        }

        if options.fuzzer_stateful {
            args.push("--stateful=links".to_string());
        }

        if let Some(token) = &auth.bearer_token {
            args.push("--header".to_string());
            args.push(format!("Authorization: Bearer {token}"));
        }
        for (key, value) in &auth.headers {
            if key.eq_ignore_ascii_case("Authorization") {
                continue;
            }
            args.push("--header".to_string());
            args.push(format!("{key}: {value}"));
        }
        if !auth.cookies.is_empty() {
            let cookie_header = auth.cookies.iter().map(|(k, v)| format!("{k}={v}")).collect::<Vec<_>>().join("; ");
            args.push("--header".to_string());
            args.push(format!("Cookie: {cookie_header}"));
        }

        args
    }
}

#[async_trait]
impl EngineAdapter for FuzzerEngine {
    fn name(&self) -> &'static str {
        "fuzzer"
    }

    async fn scan(&self, target: &ScanTarget, auth: &AuthContext, options: &EngineOptions) -> Vec<Finding> {
        if !target.has_spec() {
            log::warn!("fuzzer engine skipped: no OpenAPI spec available for this scan");
            return Vec::new();
        }

        let junit_path = std::env::temp_dir().join(format!("vulx-fuzzer-{}.xml", uuid::Uuid::new_v4()));
        let args = self.build_args(target, auth, options, &junit_path);

        let spawn = Command::new(&options.fuzzer_binary)
            .args(&args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn();

        let child = match spawn {
            Ok(child) => child,
            Err(e) => {
                log::warn!("fuzzer engine binary '{}' failed to launch: {e}", options.fuzzer_binary);
                return Vec::new();
            }
        };

        // `kill_on_drop` ensures that if the timeout branch wins the select,
        // the losing `wait_with_output` future (and the `Child` it owns) is
        // dropped, sending SIGKILL instead of leaking the subprocess.
        let stdout_text = tokio::select! {
            output = child.wait_with_output() => match output {
                Ok(out) => String::from_utf8_lossy(&out.stdout).to_string(),
                Err(e) => {
                    log::warn!("fuzzer engine wait failed: {e}");
                    String::new()
                }
            },
            _ = tokio::time::sleep(Duration::from_secs(options.fuzzer_timeout_secs)) => {
                log::warn!("fuzzer engine timed out after {}s", options.fuzzer_timeout_secs);
                return Vec::new();
            }
        };

        let mut findings = parse_stdout(&stdout_text);

        if let Ok(xml) = tokio::fs::read_to_string(&junit_path).await {
            findings.extend(parse_junit_xml(&xml));
        }
        let _ = tokio::fs::remove_file(&junit_path).await;

        dedupe_within_engine(findings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_stdout_breadcrumb_then_failure() {
        let stdout = "GET /api/users -> running checks\nFAILED: status_code check failed\n";
        let findings = parse_stdout(stdout);
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].endpoint, "/api/users");
        assert_eq!(findings[0].method, "GET");
        assert_eq!(findings[0].severity, Severity::Medium);
    }

    #[test]
    fn failure_without_prior_endpoint_is_ignored() {
        let stdout = "FAILED: status_code check failed\n";
        assert!(parse_stdout(stdout).is_empty());
    }

    #[test]
    fn defaults_to_server_error_when_unclassified() {
        let stdout = "POST /api/orders -> running checks\nERROR: unexpected 500 response\n";
        let findings = parse_stdout(stdout);
        assert_eq!(findings[0].severity, Severity::High);
    }

    #[test]
    fn parses_junit_failure_testcase() {
        let xml = r#"
            <testsuite>
                <testcase name="test_api[POST /login]" time="0.1">
                    <failure message="schema mismatch on response body">assertion details</failure>
                </testcase>
                <testcase name="test_api[GET /health]" time="0.05" />
            </testsuite>
        "#;
        let findings = parse_junit_xml(xml);
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].endpoint, "/login");
        assert_eq!(findings[0].method, "POST");
        assert_eq!(findings[0].severity, Severity::Medium);
        assert_eq!(findings[0].cwe_id.as_deref(), Some("CWE-754"));
    }

    #[test]
    fn dedupes_within_engine_by_type_endpoint_method() {
        let findings = vec![
            finding_from(FailureType::ServerError, "/a", "GET", "first".to_string(), None),
            finding_from(FailureType::ServerError, "/a", "GET", "second".to_string(), None),
        ];
        let deduped = dedupe_within_engine(findings);
        assert_eq!(deduped.len(), 1);
        assert_eq!(deduped[0].description, "first");
    }
}
