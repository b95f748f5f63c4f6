// Custom rules extension point (C10). Not wired into the default
// orchestrator phases: a caller with captured request/response content
// (e.g. from a proxy log, or its own test harness) can invoke
// `CustomRulesScanner::scan_content` directly to apply an organization's
// own pattern rules on top of the built-in engines.

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::models::{Confidence, EngineOrigin, Finding, Severity};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternType {
    Regex,
    Contains,
    Exact,
    JsonPath,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleTarget {
    Request,
    Response,
    Header,
    Url,
    Body,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CustomRule {
    pub id: String,
    pub name: String,
    pub pattern: String,
    pub pattern_type: PatternType,
    pub target: RuleTarget,
    pub severity: Severity,
    pub message: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

impl CustomRule {
    /// Evaluates this rule's pattern against `content`; `json_path` rules
    /// fall back to a plain `contains` check on the path fragment, since
    /// this scanner works over opaque captured text, not a parsed
    /// document a JSON Path query could traverse.
    fn matches(&self, content: &str) -> Option<String> {
        match self.pattern_type {
            PatternType::Contains | PatternType::JsonPath => {
                content.contains(&self.pattern).then(|| self.pattern.clone())
            }
            PatternType::Exact => (content == self.pattern).then(|| self.pattern.clone()),
            PatternType::Regex => {
                let re = Regex::new(&self.pattern).ok()?;
                re.find(content).map(|m| m.as_str().to_string())
            }
        }
    }
}

/// Loads an organization's active custom rules and applies them to
/// captured request/response content. A library-level extension point;
/// the default orchestrator phases never invoke it.
pub struct CustomRulesScanner {
    rules: Vec<CustomRule>,
}

impl CustomRulesScanner {
    pub fn new(rules: Vec<CustomRule>) -> Self {
        Self { rules: rules.into_iter().filter(|r| r.enabled).collect() }
    }

    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }

    /// `content` is matched against every rule whose `target` equals
    /// `target_type`; each match produces one `Finding` tagged
    /// `engine=custom`, `type="CUSTOM_RULE"`, `owasp_category="Custom"`,
    /// with no `cwe_id`.
    pub fn scan_content(&self, content: &str, target_type: RuleTarget, endpoint: &str, method: &str) -> Vec<Finding> {
        self.rules
            .iter()
            .filter(|rule| rule.target == target_type)
            .filter_map(|rule| {
                let evidence = rule.matches(content)?;
                Some(Finding {
                    id: uuid::Uuid::new_v4().to_string(),
                    engine: EngineOrigin::Custom,
                    type_: "CUSTOM_RULE".to_string(),
                    severity: rule.severity,
                    confidence: Confidence::Medium,
                    title: rule.name.clone(),
                    description: rule.message.clone(),
                    remediation: None,
                    code_fix: None,
                    evidence: Some(evidence),
                    request: None,
                    response: None,
                    endpoint: endpoint.to_string(),
                    method: method.to_ascii_uppercase(),
                    parameter: None,
                    cwe_id: None,
                    cve_id: None,
                    owasp_category: Some("Custom".to_string()),
                    cvss_score: None,
                    references: Vec::new(),
                    compliance_mappings: Default::default(),
                    detected_at: chrono::Utc::now(),
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule(pattern: &str, pattern_type: PatternType, target: RuleTarget) -> CustomRule {
        CustomRule {
            id: "r1".to_string(),
            name: "test rule".to_string(),
            pattern: pattern.to_string(),
            pattern_type,
            target,
            severity: Severity::Medium,
            message: "matched".to_string(),
            enabled: true,
        }
    }

    #[test]
    fn contains_rule_matches_substring() {
        let scanner = CustomRulesScanner::new(vec![rule("internal-secret", PatternType::Contains, RuleTarget::Response)]);
        let findings = scanner.scan_content("body contains internal-secret here", RuleTarget::Response, "/x", "GET");
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].type_, "CUSTOM_RULE");
        assert_eq!(findings[0].owasp_category.as_deref(), Some("Custom"));
        assert!(findings[0].cwe_id.is_none());
    }

    #[test]
    fn regex_rule_matches() {
        let scanner = CustomRulesScanner::new(vec![rule(r"sk-[a-zA-Z0-9]{8,}", PatternType::Regex, RuleTarget::Body)]);
        let findings = scanner.scan_content("key=sk-abcdefgh12345", RuleTarget::Body, "/y", "POST");
        assert_eq!(findings.len(), 1);
    }

    #[test]
    fn disabled_rules_are_never_loaded() {
        let mut r = rule("x", PatternType::Contains, RuleTarget::Url);
        r.enabled = false;
        let scanner = CustomRulesScanner::new(vec![r]);
        assert_eq!(scanner.rule_count(), 0);
    }

    #[test]
    fn target_mismatch_produces_no_finding() {
        let scanner = CustomRulesScanner::new(vec![rule("x", PatternType::Contains, RuleTarget::Header)]);
        let findings = scanner.scan_content("x present", RuleTarget::Body, "/z", "GET");
        assert!(findings.is_empty());
    }
}
