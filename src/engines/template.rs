// Template engine adapter (C6.1): drives the external template-based
// vulnerability scanner (a nuclei-shaped CLI) as a subprocess and
// normalizes its line-delimited JSON results file into `Finding`s.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::process::Command;

use crate::auth::AuthContext;
use crate::models::{Confidence, EngineOrigin, Finding, ScanTarget, Severity};

use super::{endpoint_path_only, EngineAdapter, EngineOptions};

/// First matching key wins; order matters. Matched against the template
/// id and its tags, lowercased.
const OWASP_BY_KEYWORD: &[(&str, &str)] = &[
    ("cve", "API8:2023 - Security Misconfiguration"),
    ("default-login", "API2:2023 - Broken Authentication"),
    ("exposed-panels", "API8:2023 - Security Misconfiguration"),
    ("exposures", "API3:2023 - Broken Object Property Level Authorization"),
    ("file", "API8:2023 - Security Misconfiguration"),
    ("misconfiguration", "API8:2023 - Security Misconfiguration"),
    ("takeover", "API8:2023 - Security Misconfiguration"),
    ("sqli", "API8:2023 - Security Misconfiguration"),
    ("xss", "API8:2023 - Security Misconfiguration"),
    ("ssrf", "API7:2023 - Server Side Request Forgery"),
    ("lfi", "API8:2023 - Security Misconfiguration"),
    ("rce", "API8:2023 - Security Misconfiguration"),
    ("idor", "API1:2023 - Broken Object Level Authorization"),
    ("injection", "API8:2023 - Security Misconfiguration"),
    ("auth-bypass", "API2:2023 - Broken Authentication"),
    ("rate-limit", "API4:2023 - Unrestricted Resource Consumption"),
];

pub struct TemplateEngine;

impl Default for TemplateEngine {
    fn default() -> Self {
        Self
    }
}

impl TemplateEngine {
    pub fn new() -> Self {
        Self::default()
    }

    fn build_args(
        &self,
        target: &ScanTarget,
        auth: &AuthContext,
        options: &EngineOptions,
        results_path: &std::path::Path,
    ) -> Vec<String> {
        let mut args = vec![
            "-target".to_string(),
            target.url.clone(),
            "-json-export".to_string(),
            results_path.display().to_string(),
            "-severity".to_string(),
            options.template_severity_filter.join(","),
            "-rate-limit".to_string(),
            options.template_rate_limit.to_string(),
            "-bulk-size".to_string(),
            options.template_bulk_size.to_string(),
            "-concurrency".to_string(),
            options.template_concurrency.to_string(),
            "-timeout".to_string(),
            (target.timeout_ms / 1000).max(1).to_string(),
            "-retries".to_string(),
            options.template_retries.to_string(),
            "-silent".to_string(),
        ];

        if let Some(root) = &options.template_root {
            args.push("-templates".to_string());
            args.push(root.clone());
        }
        if let Some(tags) = &options.template_tags {
            args.push("-tags".to_string());
            args.push(tags.clone());
        }

        for (key, value) in &auth.headers {
            args.push("-header".to_string());
            args.push(format!("{key}: {value}"));
        }
        if !auth.cookies.is_empty() {
            let cookie_header = auth
                .cookies
                .iter()
                .map(|(k, v)| format!("{k}={v}"))
                .collect::<Vec<_>>()
                .join("; ");
            args.push("-header".to_string());
            args.push(format!("Cookie: {cookie_header}"));
        }

        args
    }

    async fn run_tool(
        &self,
        target: &ScanTarget,
        auth: &AuthContext,
        options: &EngineOptions,
    ) -> Option<PathBuf> {
        let results_path = std::env::temp_dir().join(format!("vulx-template-{}.jsonl", uuid::Uuid::new_v4()));
        let args = self.build_args(target, auth, options, &results_path);

        let spawn = Command::new(&options.template_binary)
            .args(&args)
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn();

        let mut child = match spawn {
            Ok(child) => child,
            Err(e) => {
                log::warn!("template engine binary '{}' failed to launch: {e}", options.template_binary);
                return None;
            }
        };

        let wait = tokio::time::timeout(
            Duration::from_secs(options.template_timeout_secs),
            child.wait(),
        )
        .await;

        match wait {
            Ok(Ok(status)) if !status.success() => {
                log::warn!("template engine exited with status {status}");
            }
            Ok(Err(e)) => {
                log::warn!("template engine wait failed: {e}");
                return None;
            }
            Err(_) => {
                log::warn!("template engine timed out after {}s", options.template_timeout_secs);
                let _ = child.kill().await;
                return None;
            }
            Ok(Ok(_)) => {}
        }

        Some(results_path)
    }
}

/// Pure parsing: one JSON line from the results file -> a `Finding`.
/// Malformed lines return `None` and are skipped by the caller.
pub fn parse_result_line(line: &str) -> Option<Finding> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    let value: Value = serde_json::from_str(line).ok()?;

    let info = value.get("info").cloned().unwrap_or(Value::Null);
    let severity = info
        .get("severity")
        .and_then(|v| v.as_str())
        .map(Severity::parse)
        .unwrap_or(Severity::Info);

    let matched_at = value.get("matched-at").and_then(|v| v.as_str()).unwrap_or("");
    let endpoint = if matched_at.is_empty() {
        value.get("host").and_then(|v| v.as_str()).unwrap_or("/").to_string()
    } else {
        endpoint_path_only(matched_at)
    };

    let method = value
        .get("type")
        .and_then(|v| v.as_str())
        .map(|s| s.to_ascii_uppercase())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "GET".to_string());

    let template_id = value.get("template-id").and_then(|v| v.as_str()).unwrap_or("").to_lowercase();
    let tags: Vec<String> = info
        .get("tags")
        .and_then(|v| v.as_array())
        .map(|arr| arr.iter().filter_map(|t| t.as_str()).map(|s| s.to_lowercase()).collect())
        .unwrap_or_default();

    let haystack = format!("{template_id} {}", tags.join(" "));
    let owasp_category = OWASP_BY_KEYWORD
        .iter()
        .find(|(kw, _)| haystack.contains(kw))
        .map(|(_, cat)| cat.to_string());

    let cwe_id = info
        .get("classification")
        .and_then(|c| c.get("cwe-id"))
        .and_then(|v| v.as_array())
        .and_then(|arr| arr.first())
        .and_then(|v| v.as_str())
        .map(|id| {
            if id.to_ascii_uppercase().starts_with("CWE-") {
                id.to_ascii_uppercase()
            } else {
                format!("CWE-{id}")
            }
        });

    let cve_id = tags
        .iter()
        .find(|t| t.starts_with("cve-") || t.to_ascii_uppercase().starts_with("CVE-"))
        .map(|t| t.to_ascii_uppercase());

    let cvss_score = info
        .get("classification")
        .and_then(|c| c.get("cvss-score"))
        .and_then(|v| v.as_f64());

    let references = info
        .get("reference")
        .and_then(|v| v.as_array())
        .map(|arr| arr.iter().filter_map(|r| r.as_str()).map(|s| s.to_string()).collect())
        .unwrap_or_default();

    let name = info.get("name").and_then(|v| v.as_str()).unwrap_or(&template_id).to_string();
    let description = info
        .get("description")
        .and_then(|v| v.as_str())
        .unwrap_or(&name)
        .to_string();

    Some(Finding {
        id: uuid::Uuid::new_v4().to_string(),
        engine: EngineOrigin::Template,
        type_: if name.is_empty() { template_id.clone() } else { name.clone() },
        severity,
        confidence: Confidence::High,
        title: name,
        description,
        remediation: None,
        code_fix: None,
        evidence: value.get("matched-at").and_then(|v| v.as_str()).map(|s| s.to_string()),
        request: value.get("request").and_then(|v| v.as_str()).map(|s| s.to_string()),
        response: value.get("response").and_then(|v| v.as_str()).map(|s| s.to_string()),
        endpoint,
        method,
        parameter: None,
        cwe_id,
        cve_id,
        owasp_category,
        cvss_score,
        references,
        compliance_mappings: Default::default(),
        detected_at: chrono::Utc::now(),
    })
}

#[async_trait]
impl EngineAdapter for TemplateEngine {
    fn name(&self) -> &'static str {
        "template"
    }

    async fn scan(&self, target: &ScanTarget, auth: &AuthContext, options: &EngineOptions) -> Vec<Finding> {
        let Some(results_path) = self.run_tool(target, auth, options).await else {
            return Vec::new();
        };

        let contents = match tokio::fs::read_to_string(&results_path).await {
            Ok(contents) => contents,
            Err(e) => {
                log::warn!("template engine results file unreadable: {e}");
                let _ = tokio::fs::remove_file(&results_path).await;
                return Vec::new();
            }
        };
        let _ = tokio::fs::remove_file(&results_path).await;

        contents.lines().filter_map(parse_result_line).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(severity: &str, matched_at: &str, template_id: &str, tags: &str, cwe: &str) -> String {
        format!(
            r#"{{"template-id":"{template_id}","type":"http","matched-at":"{matched_at}","info":{{"name":"test finding","severity":"{severity}","tags":[{tags}],"classification":{{"cwe-id":["{cwe}"],"cvss-score":7.5}},"reference":["https://example.com"]}}}}"#
        )
    }

    #[test]
    fn parses_a_well_formed_line() {
        let l = line("high", "https://target.test/api/users?x=1", "sqli-detect", "\"sqli\",\"injection\"", "89");
        let finding = parse_result_line(&l).expect("should parse");
        assert_eq!(finding.severity, Severity::High);
        assert_eq!(finding.endpoint, "/api/users");
        assert_eq!(finding.cwe_id.as_deref(), Some("CWE-89"));
        assert_eq!(finding.owasp_category.as_deref(), Some("API8:2023 - Security Misconfiguration"));
        assert_eq!(finding.confidence, Confidence::High);
        assert_eq!(finding.engine, EngineOrigin::Template);
    }

    #[test]
    fn malformed_line_returns_none() {
        assert!(parse_result_line("not json").is_none());
        assert!(parse_result_line("").is_none());
    }

    #[test]
    fn idor_template_maps_to_bola_owasp_category() {
        let l = line("medium", "https://target.test/orders/1", "idor-orders", "\"idor\"", "639");
        let finding = parse_result_line(&l).expect("should parse");
        assert_eq!(finding.owasp_category.as_deref(), Some("API1:2023 - Broken Object Level Authorization"));
    }

    #[test]
    fn missing_severity_defaults_to_info() {
        let l = r#"{"template-id":"generic","type":"http","matched-at":"https://t.test/x","info":{"name":"n"}}"#;
        let finding = parse_result_line(l).expect("should parse");
        assert_eq!(finding.severity, Severity::Info);
        assert_eq!(finding.method, "HTTP");
    }
}
