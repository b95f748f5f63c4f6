// Full DAST engine adapter (C6.3): drives a local REST-controlled proxy
// (a ZAP-shaped daemon) through its JSON API: start/probe, new session,
// auth replacer rules, spec import, spider, optional ajax spider, active
// scan bounded by a wall-clock budget, then alert collection.

use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::Value;
use tokio::process::Command;

use crate::auth::AuthContext;
use crate::models::{Confidence, EngineOrigin, Finding, ScanTarget, Severity};

use super::{endpoint_path_only, EngineAdapter, EngineOptions};

const OWASP_BY_ALERT_NAME: &[(&str, &str)] = &[
    ("sql injection", "API8:2023 - Security Misconfiguration"),
    ("cross site scripting", "API8:2023 - Security Misconfiguration"),
    ("path traversal", "API8:2023 - Security Misconfiguration"),
    ("remote file inclusion", "API8:2023 - Security Misconfiguration"),
    ("external redirect", "API7:2023 - Server Side Request Forgery"),
    ("session id in url", "API2:2023 - Broken Authentication"),
    ("weak authentication", "API2:2023 - Broken Authentication"),
    ("missing anti-csrf", "API2:2023 - Broken Authentication"),
    ("insecure http method", "API8:2023 - Security Misconfiguration"),
    ("server side request forgery", "API7:2023 - Server Side Request Forgery"),
    ("mass assignment", "API3:2023 - Broken Object Property Level Authorization"),
    ("rate limiting", "API4:2023 - Unrestricted Resource Consumption"),
];

fn risk_to_severity(risk: &str) -> Severity {
    match risk.to_ascii_lowercase().as_str() {
        "critical" => Severity::Critical,
        "high" => Severity::High,
        "medium" => Severity::Medium,
        "low" => Severity::Low,
        _ => Severity::Info,
    }
}

fn confidence_to_ours(confidence: &str) -> Confidence {
    match confidence.to_ascii_lowercase().as_str() {
        "high" | "confirmed" | "user confirmed" => Confidence::High,
        "medium" => Confidence::Medium,
        _ => Confidence::Low,
    }
}

fn owasp_for_alert(name: &str) -> Option<String> {
    let lower = name.to_ascii_lowercase();
    OWASP_BY_ALERT_NAME
        .iter()
        .find(|(kw, _)| lower.contains(kw))
        .map(|(_, cat)| cat.to_string())
}

/// Pure mapping: one ZAP-shaped alert object -> a `Finding`.
pub fn alert_to_finding(alert: &Value) -> Finding {
    let name = alert.get("name").or_else(|| alert.get("alert")).and_then(|v| v.as_str()).unwrap_or("").to_string();
    let risk = alert.get("risk").and_then(|v| v.as_str()).unwrap_or("Informational");
    let confidence = alert.get("confidence").and_then(|v| v.as_str()).unwrap_or("Medium");
    let url = alert.get("url").and_then(|v| v.as_str()).unwrap_or("/");
    let method = alert.get("method").and_then(|v| v.as_str()).unwrap_or("GET").to_ascii_uppercase();
    let cweid = alert.get("cweid").and_then(|v| v.as_str().map(|s| s.to_string()).or_else(|| v.as_i64().map(|n| n.to_string())));

    let references = alert
        .get("reference")
        .and_then(|v| v.as_str())
        .map(|s| s.lines().filter(|l| !l.trim().is_empty()).map(|l| l.trim().to_string()).collect())
        .unwrap_or_default();

    Finding {
        id: uuid::Uuid::new_v4().to_string(),
        engine: EngineOrigin::Dast,
        type_: name.clone(),
        severity: risk_to_severity(risk),
        confidence: confidence_to_ours(confidence),
        title: name,
        description: alert.get("description").and_then(|v| v.as_str()).unwrap_or_default().to_string(),
        remediation: alert.get("solution").and_then(|v| v.as_str()).map(|s| s.to_string()),
        code_fix: None,
        evidence: alert.get("evidence").and_then(|v| v.as_str()).map(|s| s.to_string()),
        request: None,
        response: None,
        endpoint: endpoint_path_only(url),
        method,
        parameter: alert.get("param").and_then(|v| v.as_str()).filter(|s| !s.is_empty()).map(|s| s.to_string()),
        cwe_id: cweid.map(|id| format!("CWE-{id}")),
        cve_id: None,
        owasp_category: alert.get("name").and_then(|v| v.as_str()).and_then(owasp_for_alert),
        cvss_score: None,
        references,
        compliance_mappings: Default::default(),
        detected_at: chrono::Utc::now(),
    }
}

#[cfg(feature = "http")]
pub struct DastEngine {
    client: reqwest::Client,
}

#[cfg(feature = "http")]
impl Default for DastEngine {
    fn default() -> Self {
        Self { client: reqwest::Client::new() }
    }
}

#[cfg(feature = "http")]
impl DastEngine {
    pub fn new() -> Self {
        Self::default()
    }

    fn base_url(&self, options: &EngineOptions) -> String {
        format!("http://{}:{}", options.dast_host, options.dast_port)
    }

    async fn call(
        &self,
        options: &EngineOptions,
        component: &str,
        kind: &str,
        action: &str,
        params: &[(&str, &str)],
    ) -> Option<Value> {
        let url = format!("{}/JSON/{component}/{kind}/{action}/", self.base_url(options));
        let mut request = self.client.get(&url);
        let mut query: Vec<(&str, &str)> = params.to_vec();
        if !options.dast_api_key.is_empty() {
            query.push(("apikey", &options.dast_api_key));
        }
        request = request.query(&query);

        match request.send().await {
            Ok(response) if response.status().is_success() => response.json::<Value>().await.ok(),
            Ok(response) => {
                log::warn!("DAST proxy call {component}/{kind}/{action} returned {}", response.status());
                None
            }
            Err(e) => {
                log::warn!("DAST proxy call {component}/{kind}/{action} failed: {e}");
                None
            }
        }
    }

    async fn probe_version(&self, options: &EngineOptions) -> bool {
        self.call(options, "core", "view", "version", &[]).await.is_some()
    }

    async fn ensure_daemon(&self, options: &EngineOptions) -> bool {
        if self.probe_version(options).await {
            return true;
        }

        let spawn = Command::new(&options.dast_binary)
            .args(["-daemon", "-port", &options.dast_port.to_string(), "-host", "0.0.0.0"])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(false)
            .spawn();

        if let Err(e) = spawn {
            log::warn!("DAST proxy binary '{}' failed to launch: {e}", options.dast_binary);
            return false;
        }

        for _ in 0..60 {
            if self.probe_version(options).await {
                return true;
            }
            tokio::time::sleep(Duration::from_secs(1)).await;
        }
        log::warn!("DAST proxy did not answer within 60s of startup");
        false
    }

    async fn new_session(&self, options: &EngineOptions) {
        self.call(options, "core", "action", "newSession", &[("name", "vulx"), ("overwrite", "true")]).await;
    }

    async fn configure_auth(&self, options: &EngineOptions, auth: &AuthContext) {
        for (key, value) in &auth.headers {
            let replace = format!("{key}: {value}");
            self.call(
                options,
                "replacer",
                "action",
                "addRule",
                &[
                    ("description", key.as_str()),
                    ("enabled", "true"),
                    ("matchType", "REQ_HEADER"),
                    ("matchRegex", "false"),
                    ("matchString", key.as_str()),
                    ("replacement", replace.as_str()),
                ],
            )
            .await;
        }

        for (name, value) in &auth.cookies {
            self.call(
                options,
                "httpsessions",
                "action",
                "setSessionTokenValue",
                &[("site", ""), ("session", "vulx"), ("tokenName", name.as_str()), ("tokenValue", value.as_str())],
            )
            .await;
        }
    }

    async fn import_spec(&self, target: &ScanTarget, options: &EngineOptions) {
        if let Some(url) = &target.openapi_spec_url {
            self.call(options, "openapi", "action", "importUrl", &[("url", url.as_str())]).await;
        } else if target.openapi_spec_content.is_some() {
            log::debug!("DAST engine: inline spec import is not part of the REST surface, skipped");
        }
    }

    async fn configure_context(&self, target: &ScanTarget, options: &EngineOptions) {
        self.call(options, "context", "action", "newContext", &[("contextName", "vulx")]).await;
        self.call(
            options,
            "context",
            "action",
            "includeInContext",
            &[("contextName", "vulx"), ("regex", &format!("{}.*", regex::escape(&target.url)))],
        )
        .await;

        for excluded in &target.exclude_paths {
            self.call(
                options,
                "context",
                "action",
                "excludeFromContext",
                &[("contextName", "vulx"), ("regex", &format!(".*{}.*", regex::escape(excluded)))],
            )
            .await;
        }
    }

    async fn spider(&self, target: &ScanTarget, options: &EngineOptions) {
        let response = self
            .call(
                options,
                "spider",
                "action",
                "scan",
                &[("url", target.url.as_str()), ("maxChildren", "100"), ("recurse", "true"), ("contextName", "vulx")],
            )
            .await;
        let Some(scan_id) = response.and_then(|v| v.get("scan").and_then(|s| s.as_str()).map(|s| s.to_string())) else {
            log::warn!("DAST spider did not return a scan id; skipping wait");
            return;
        };

        loop {
            let status = self.call(options, "spider", "view", "status", &[("scanId", &scan_id)]).await;
            let pct: i64 = status
                .and_then(|v| v.get("status").and_then(|s| s.as_str()).and_then(|s| s.parse().ok()))
                .unwrap_or(100);
            if pct >= 100 {
                break;
            }
            tokio::time::sleep(Duration::from_secs(2)).await;
        }
    }

    async fn ajax_spider(&self, target: &ScanTarget, options: &EngineOptions) {
        if !options.dast_ajax_spider {
            return;
        }
        self.call(options, "ajaxSpider", "action", "scan", &[("url", target.url.as_str())]).await;

        loop {
            let status = self.call(options, "ajaxSpider", "view", "status", &[]).await;
            let stopped = status.and_then(|v| v.get("status").and_then(|s| s.as_str().map(|s| s == "stopped"))).unwrap_or(true);
            if stopped {
                break;
            }
            tokio::time::sleep(Duration::from_secs(2)).await;
        }
    }

    async fn active_scan(&self, target: &ScanTarget, options: &EngineOptions) {
        let response = self
            .call(options, "ascan", "action", "scan", &[("url", target.url.as_str()), ("recurse", "true"), ("contextId", "")])
            .await;
        let Some(scan_id) = response.and_then(|v| v.get("scan").and_then(|s| s.as_str()).map(|s| s.to_string())) else {
            log::warn!("DAST active scan did not return a scan id; skipping wait");
            return;
        };

        let deadline = Instant::now() + Duration::from_secs(options.dast_max_duration_secs);

        loop {
            let status = self.call(options, "ascan", "view", "status", &[("scanId", &scan_id)]).await;
            let pct: i64 = status
                .and_then(|v| v.get("status").and_then(|s| s.as_str()).and_then(|s| s.parse().ok()))
                .unwrap_or(100);
            if pct >= 100 {
                break;
            }
            if Instant::now() >= deadline {
                log::warn!("DAST active scan exceeded max_duration; stopping early with partial alerts");
                self.call(options, "ascan", "action", "stop", &[("scanId", &scan_id)]).await;
                break;
            }
            tokio::time::sleep(Duration::from_secs(5)).await;
        }
    }

    async fn collect_alerts(&self, target: &ScanTarget, options: &EngineOptions) -> Vec<Finding> {
        let response = self.call(options, "core", "view", "alerts", &[("baseurl", target.url.as_str())]).await;
        let Some(alerts) = response.and_then(|v| v.get("alerts").and_then(|a| a.as_array().cloned())) else {
            return Vec::new();
        };
        alerts.iter().map(alert_to_finding).collect()
    }
}

#[cfg(feature = "http")]
#[async_trait]
impl EngineAdapter for DastEngine {
    fn name(&self) -> &'static str {
        "dast"
    }

    async fn scan(&self, target: &ScanTarget, auth: &AuthContext, options: &EngineOptions) -> Vec<Finding> {
        if !self.ensure_daemon(options).await {
            return Vec::new();
        }

        self.new_session(options).await;
        self.configure_auth(options, auth).await;
        self.import_spec(target, options).await;
        self.configure_context(target, options).await;
        self.spider(target, options).await;
        self.ajax_spider(target, options).await;
        self.active_scan(target, options).await;
        self.collect_alerts(target, options).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn maps_alert_severity_and_confidence() {
        let alert = json!({
            "name": "SQL Injection",
            "risk": "High",
            "confidence": "Confirmed",
            "url": "https://target.test/api/login?x=1",
            "method": "POST",
            "param": "username",
            "cweid": "89",
            "reference": "https://owasp.org/a\nhttps://example.com/b",
            "description": "desc",
            "solution": "fix it",
        });
        let finding = alert_to_finding(&alert);
        assert_eq!(finding.severity, Severity::High);
        assert_eq!(finding.confidence, Confidence::High);
        assert_eq!(finding.endpoint, "/api/login");
        assert_eq!(finding.cwe_id.as_deref(), Some("CWE-89"));
        assert_eq!(finding.owasp_category.as_deref(), Some("API8:2023 - Security Misconfiguration"));
        assert_eq!(finding.references.len(), 2);
    }

    #[test]
    fn unknown_risk_defaults_to_info() {
        let alert = json!({"name": "Something", "risk": "bogus", "url": "/x", "method": "GET"});
        let finding = alert_to_finding(&alert);
        assert_eq!(finding.severity, Severity::Info);
    }

    #[test]
    fn ssrf_alert_maps_to_api7() {
        let alert = json!({"name": "Server Side Request Forgery", "risk": "High", "url": "/fetch", "method": "POST"});
        let finding = alert_to_finding(&alert);
        assert_eq!(finding.owasp_category.as_deref(), Some("API7:2023 - Server Side Request Forgery"));
    }
}
