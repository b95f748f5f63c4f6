// Auto-remediation knowledge base (C3): language-tagged fix guidance for
// security findings. Seven templates keyed by vulnerability type, reached
// via a three-stage dispatch: CWE id, then OWASP category, then a keyword
// scan over the finding's type string.

use std::collections::HashMap;

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

use crate::models::Finding;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Python,
    Javascript,
    Typescript,
    Java,
    Go,
    Csharp,
    Php,
    Ruby,
}

impl Language {
    pub fn as_str(self) -> &'static str {
        match self {
            Language::Python => "python",
            Language::Javascript => "javascript",
            Language::Typescript => "typescript",
            Language::Java => "java",
            Language::Go => "go",
            Language::Csharp => "csharp",
            Language::Php => "php",
            Language::Ruby => "ruby",
        }
    }
}

impl Default for Language {
    fn default() -> Self {
        Language::Javascript
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Immediate,
    ShortTerm,
    MediumTerm,
}

impl Priority {
    fn as_str(self) -> &'static str {
        match self {
            Priority::Immediate => "immediate",
            Priority::ShortTerm => "short_term",
            Priority::MediumTerm => "medium_term",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Effort {
    Low,
    Medium,
    High,
}

impl Effort {
    fn hours(self) -> u32 {
        match self {
            Effort::Low => 2,
            Effort::Medium => 8,
            Effort::High => 24,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Remediation {
    pub description: String,
    pub priority: String,
    pub effort: String,
    pub code_example: Option<String>,
    pub steps: Vec<String>,
    pub references: Vec<String>,
    pub automated_fix_available: bool,
}

struct RemediationTemplate {
    description: &'static str,
    priority: Priority,
    effort: Effort,
    steps: &'static [&'static str],
    references: &'static [&'static str],
    code_examples: &'static [(Language, &'static str)],
}

impl RemediationTemplate {
    fn code_for(&self, language: Language) -> Option<&'static str> {
        self.code_examples
            .iter()
            .find(|(lang, _)| *lang == language)
            .or_else(|| self.code_examples.first())
            .map(|(_, code)| *code)
    }

    fn to_remediation(&self, language: Language) -> Remediation {
        Remediation {
            description: self.description.to_string(),
            priority: self.priority.as_str().to_string(),
            effort: format!("{:?}", self.effort).to_lowercase(),
            code_example: self.code_for(language).map(|s| s.to_string()),
            steps: self.steps.iter().map(|s| s.to_string()).collect(),
            references: self.references.iter().map(|s| s.to_string()).collect(),
            automated_fix_available: false,
        }
    }
}

static REMEDIATIONS: Lazy<HashMap<&'static str, RemediationTemplate>> = Lazy::new(|| {
    HashMap::from([
        ("sql_injection", RemediationTemplate {
            description: "Use parameterized queries or prepared statements to prevent SQL injection. Never concatenate user input directly into SQL queries.",
            priority: Priority::Immediate,
            effort: Effort::Medium,
            steps: &[
                "Identify all SQL queries that use user input",
                "Replace string concatenation with parameterized queries",
                "Use an ORM or query builder when possible",
                "Implement input validation as defense in depth",
                "Add SQL injection tests to your CI/CD pipeline",
            ],
            references: &[
                "https://cheatsheetseries.owasp.org/cheatsheets/Query_Parameterization_Cheat_Sheet.html",
                "https://cwe.mitre.org/data/definitions/89.html",
            ],
            code_examples: &[
                (Language::Python, "# VULNERABLE CODE - DO NOT USE\nquery = f\"SELECT * FROM users WHERE id = {user_id}\"\n\n# SECURE CODE - Use parameterized queries\ncursor.execute(\"SELECT * FROM users WHERE id = %s\", (user_id,))"),
                (Language::Javascript, "// VULNERABLE CODE - DO NOT USE\nconst query = `SELECT * FROM users WHERE id = ${userId}`;\n\n// SECURE CODE\nconst result = await pool.query('SELECT * FROM users WHERE id = $1', [userId]);"),
                (Language::Java, "// SECURE CODE - Use PreparedStatement\nString sql = \"SELECT * FROM users WHERE id = ?\";\nPreparedStatement stmt = connection.prepareStatement(sql);\nstmt.setInt(1, userId);"),
                (Language::Go, "// SECURE CODE - Use parameterized queries\nrow := db.QueryRow(\"SELECT * FROM users WHERE id = $1\", userID)"),
            ],
        }),
        ("xss", RemediationTemplate {
            description: "Encode all user-supplied data before rendering in HTML context. Use Content Security Policy (CSP) headers and modern frameworks that auto-escape output.",
            priority: Priority::Immediate,
            effort: Effort::Medium,
            steps: &[
                "Enable automatic output encoding in your framework",
                "Implement Content-Security-Policy headers",
                "Validate and sanitize user input",
                "Use HTTPOnly and Secure flags on cookies",
                "Add XSS tests to your security testing suite",
            ],
            references: &[
                "https://cheatsheetseries.owasp.org/cheatsheets/Cross_Site_Scripting_Prevention_Cheat_Sheet.html",
                "https://cwe.mitre.org/data/definitions/79.html",
            ],
            code_examples: &[
                (Language::Javascript, "// VULNERABLE CODE - DO NOT USE\nelement.innerHTML = userInput;\n\n// SECURE CODE\nelement.textContent = userInput;\n// or: element.innerHTML = DOMPurify.sanitize(userInput);"),
                (Language::Python, "# Django - Auto-escapes by default\n# Templates: {{ user_input }} is safe\nfrom django.utils.html import escape\nsafe_content = escape(user_input)"),
            ],
        }),
        ("bola", RemediationTemplate {
            description: "Implement proper authorization checks before accessing any object. Verify the authenticated user has permission to access the requested resource.",
            priority: Priority::Immediate,
            effort: Effort::Medium,
            steps: &[
                "Implement authorization checks on every data access",
                "Use indirect object references (UUIDs) instead of sequential IDs",
                "Verify object ownership before returning data",
                "Implement role-based or attribute-based access control",
                "Log and monitor access attempts",
            ],
            references: &[
                "https://owasp.org/API-Security/editions/2023/en/0xa1-broken-object-level-authorization/",
                "https://cwe.mitre.org/data/definitions/639.html",
            ],
            code_examples: &[
                (Language::Javascript, "// SECURE CODE - With authorization check\napp.get('/api/orders/:orderId', authenticate, async (req, res) => {\n  const order = await Order.findOne({ _id: req.params.orderId, userId: req.user.id });\n  if (!order) return res.status(404).json({ error: 'Order not found' });\n  res.json(order);\n});"),
                (Language::Python, "# SECURE CODE - With authorization check\n@app.get(\"/orders/{order_id}\")\nasync def get_order(order_id: int, current_user: User = Depends(get_current_user)):\n    order = await Order.filter(id=order_id, user_id=current_user.id).first()\n    if not order:\n        raise HTTPException(status_code=404, detail=\"Order not found\")\n    return order"),
            ],
        }),
        ("broken_auth", RemediationTemplate {
            description: "Implement secure authentication mechanisms including strong password policies, MFA, secure session management, and account lockout.",
            priority: Priority::Immediate,
            effort: Effort::High,
            steps: &[
                "Enforce strong password requirements",
                "Implement multi-factor authentication (MFA)",
                "Use secure session management",
                "Implement account lockout after failed attempts",
                "Use secure password hashing (bcrypt, Argon2)",
                "Implement proper logout functionality",
            ],
            references: &[
                "https://cheatsheetseries.owasp.org/cheatsheets/Authentication_Cheat_Sheet.html",
                "https://owasp.org/API-Security/editions/2023/en/0xa2-broken-authentication/",
            ],
            code_examples: &[
                (Language::Javascript, "const bcrypt = require('bcrypt');\nconst SALT_ROUNDS = 12;\n\nasync function hashPassword(password) {\n  return await bcrypt.hash(password, SALT_ROUNDS);\n}"),
                (Language::Python, "from argon2 import PasswordHasher\nph = PasswordHasher()\n\ndef hash_password(password: str) -> str:\n    return ph.hash(password)"),
            ],
        }),
        ("rate_limiting", RemediationTemplate {
            description: "Implement rate limiting to prevent abuse, DoS attacks, and brute force attempts. Use sliding window or token bucket algorithms.",
            priority: Priority::ShortTerm,
            effort: Effort::Low,
            steps: &[
                "Identify endpoints that need rate limiting",
                "Choose appropriate limits based on use case",
                "Implement rate limiting middleware",
                "Return proper 429 status codes with Retry-After header",
                "Monitor and adjust limits based on traffic patterns",
            ],
            references: &[
                "https://owasp.org/API-Security/editions/2023/en/0xa4-unrestricted-resource-consumption/",
                "https://cloud.google.com/architecture/rate-limiting-strategies-techniques",
            ],
            code_examples: &[
                (Language::Javascript, "const rateLimit = require('express-rate-limit');\n\nconst apiLimiter = rateLimit({\n  windowMs: 15 * 60 * 1000,\n  max: 100,\n});\napp.use('/api/', apiLimiter);"),
                (Language::Python, "from slowapi import Limiter\nfrom slowapi.util import get_remote_address\n\nlimiter = Limiter(key_func=get_remote_address)\n\n@app.get(\"/api/data\")\n@limiter.limit(\"100/minute\")\nasync def get_data():\n    return {\"data\": \"...\"}"),
            ],
        }),
        ("ssrf", RemediationTemplate {
            description: "Validate and sanitize all user-supplied URLs. Use allowlists for permitted domains and block internal network ranges.",
            priority: Priority::Immediate,
            effort: Effort::Medium,
            steps: &[
                "Implement URL allowlist validation",
                "Block internal IP ranges (10.x, 172.16.x, 192.168.x, 127.x)",
                "Use a dedicated HTTP client with security settings",
                "Disable redirects or validate redirect destinations",
                "Consider using a proxy service for external requests",
            ],
            references: &[
                "https://cheatsheetseries.owasp.org/cheatsheets/Server_Side_Request_Forgery_Prevention_Cheat_Sheet.html",
                "https://owasp.org/API-Security/editions/2023/en/0xa7-server-side-request-forgery/",
            ],
            code_examples: &[
                (Language::Python, "import ipaddress\nfrom urllib.parse import urlparse\n\nALLOWED_DOMAINS = ['api.trusted-service.com']\n\ndef is_safe_url(url: str) -> bool:\n    parsed = urlparse(url)\n    if parsed.scheme != 'https':\n        return False\n    return parsed.hostname in ALLOWED_DOMAINS"),
                (Language::Javascript, "const ALLOWED_DOMAINS = new Set(['api.trusted-service.com']);\n\nasync function isUrlSafe(urlString) {\n  const url = new URL(urlString);\n  if (url.protocol !== 'https:') return false;\n  return ALLOWED_DOMAINS.has(url.hostname);\n}"),
            ],
        }),
        ("security_headers", RemediationTemplate {
            description: "Implement security headers to protect against common attacks like XSS, clickjacking, and MIME sniffing.",
            priority: Priority::ShortTerm,
            effort: Effort::Low,
            steps: &[
                "Add Content-Security-Policy header",
                "Add X-Content-Type-Options: nosniff",
                "Add X-Frame-Options: DENY",
                "Add Strict-Transport-Security header",
                "Remove server version headers",
            ],
            references: &[
                "https://cheatsheetseries.owasp.org/cheatsheets/HTTP_Headers_Cheat_Sheet.html",
                "https://securityheaders.com/",
            ],
            code_examples: &[
                (Language::Javascript, "const helmet = require('helmet');\napp.use(helmet({\n  hsts: { maxAge: 31536000, includeSubDomains: true, preload: true },\n  frameguard: { action: 'deny' },\n  noSniff: true,\n}));\napp.disable('x-powered-by');"),
                (Language::Python, "@app.middleware(\"http\")\nasync def add_security_headers(request, call_next):\n    response = await call_next(request)\n    response.headers[\"X-Content-Type-Options\"] = \"nosniff\"\n    response.headers[\"X-Frame-Options\"] = \"DENY\"\n    response.headers[\"Strict-Transport-Security\"] = \"max-age=31536000; includeSubDomains\"\n    return response"),
            ],
        }),
    ])
});

static CWE_TO_TYPE: Lazy<HashMap<&'static str, &'static str>> = Lazy::new(|| {
    HashMap::from([
        ("CWE-89", "sql_injection"),
        ("CWE-79", "xss"),
        ("CWE-639", "bola"),
        ("CWE-287", "broken_auth"),
        ("CWE-306", "broken_auth"),
        ("CWE-770", "rate_limiting"),
        ("CWE-918", "ssrf"),
        ("CWE-16", "security_headers"),
        ("CWE-693", "security_headers"),
    ])
});

static OWASP_TO_TYPE: Lazy<HashMap<&'static str, &'static str>> = Lazy::new(|| {
    HashMap::from([
        ("API1:2023", "bola"),
        ("API2:2023", "broken_auth"),
        ("API3:2023", "bola"),
        ("API4:2023", "rate_limiting"),
        ("API7:2023", "ssrf"),
        ("API8:2023", "security_headers"),
    ])
});

const KEYWORD_FALLBACKS: &[(&[&str], &str)] = &[
    (&["sql", "injection", "sqli"], "sql_injection"),
    (&["xss", "cross-site scripting", "script"], "xss"),
    (&["bola", "idor", "authorization"], "bola"),
    (&["auth", "login", "password"], "broken_auth"),
    (&["rate", "limit", "dos", "throttl"], "rate_limiting"),
    (&["ssrf", "server-side request"], "ssrf"),
];

fn remediation_type(finding: &Finding) -> Option<&'static str> {
    if let Some(cwe) = &finding.cwe_id {
        let cwe_clean = cwe.trim_start_matches("CWE-");
        let cwe_key = format!("CWE-{cwe_clean}");
        if let Some(t) = CWE_TO_TYPE.get(cwe_key.as_str()) {
            return Some(t);
        }
    }

    if let Some(owasp) = &finding.owasp_category {
        let owasp_id = owasp.split(" - ").next().unwrap_or(owasp.as_str());
        if let Some(t) = OWASP_TO_TYPE.get(owasp_id) {
            return Some(t);
        }
    }

    let type_lower = finding.type_.to_lowercase();
    for (keywords, remediation) in KEYWORD_FALLBACKS {
        if keywords.iter().any(|k| type_lower.contains(k)) {
            return Some(remediation);
        }
    }

    None
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupedRemediations {
    pub immediate: Vec<Remediation>,
    pub short_term: Vec<Remediation>,
    pub medium_term: Vec<Remediation>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EffortEstimate {
    pub total_estimated_hours: u32,
    pub by_priority: HashMap<String, u32>,
    pub unique_fix_types: usize,
    pub recommendation: String,
}

pub fn get_remediation(finding: &Finding, language: Language) -> Remediation {
    match remediation_type(finding).and_then(|t| REMEDIATIONS.get(t)) {
        Some(template) => template.to_remediation(language),
        None => Remediation {
            description: format!(
                "Review and fix the {} vulnerability. Implement proper input validation, output encoding, and access controls.",
                finding.type_
            ),
            priority: Priority::ShortTerm.as_str().to_string(),
            effort: "medium".to_string(),
            code_example: None,
            steps: vec![
                "Analyze the finding and understand the attack vector".to_string(),
                "Implement appropriate security controls".to_string(),
                "Test the fix thoroughly".to_string(),
                "Add security tests to prevent regression".to_string(),
            ],
            references: vec!["https://owasp.org/www-project-web-security-testing-guide/".to_string()],
            automated_fix_available: false,
        },
    }
}

pub fn get_all_remediations(findings: &[Finding], language: Language) -> GroupedRemediations {
    let mut grouped = GroupedRemediations { immediate: Vec::new(), short_term: Vec::new(), medium_term: Vec::new() };
    let mut seen = std::collections::HashSet::new();

    for finding in findings {
        if let Some(t) = remediation_type(finding) {
            if seen.insert(t) {
                let remediation = get_remediation(finding, language);
                match remediation.priority.as_str() {
                    "immediate" => grouped.immediate.push(remediation),
                    "short_term" => grouped.short_term.push(remediation),
                    _ => grouped.medium_term.push(remediation),
                }
            }
        }
    }

    grouped
}

pub fn estimate_fix_effort(findings: &[Finding]) -> EffortEstimate {
    let mut total_hours = 0u32;
    let mut by_priority: HashMap<String, u32> = HashMap::from([
        ("immediate".to_string(), 0),
        ("short_term".to_string(), 0),
        ("medium_term".to_string(), 0),
    ]);
    let mut seen = std::collections::HashSet::new();

    for finding in findings {
        if let Some(t) = remediation_type(finding) {
            if seen.insert(t) {
                if let Some(template) = REMEDIATIONS.get(t) {
                    let hours = template.effort.hours();
                    total_hours += hours;
                    *by_priority.entry(template.priority.as_str().to_string()).or_insert(0) += hours;
                }
            }
        }
    }

    EffortEstimate {
        total_estimated_hours: total_hours,
        by_priority,
        unique_fix_types: seen.len(),
        recommendation: effort_recommendation(total_hours).to_string(),
    }
}

fn effort_recommendation(hours: u32) -> &'static str {
    if hours <= 8 {
        "Fixes can likely be completed in a single sprint"
    } else if hours <= 40 {
        "Plan for 1-2 weeks of dedicated security work"
    } else if hours <= 80 {
        "Consider dedicating a full sprint to security improvements"
    } else {
        "Significant security debt - consider a phased remediation approach"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Confidence, EngineOrigin, Severity};
    use chrono::Utc;

    fn finding(type_: &str, cwe: Option<&str>, owasp: Option<&str>) -> Finding {
        Finding {
            id: "f1".to_string(),
            engine: EngineOrigin::Static,
            type_: type_.to_string(),
            severity: Severity::High,
            confidence: Confidence::High,
            title: type_.to_string(),
            description: String::new(),
            remediation: None,
            code_fix: None,
            evidence: None,
            request: None,
            response: None,
            endpoint: "/x".to_string(),
            method: "GET".to_string(),
            parameter: None,
            cwe_id: cwe.map(|s| s.to_string()),
            cve_id: None,
            owasp_category: owasp.map(|s| s.to_string()),
            cvss_score: None,
            references: Vec::new(),
            compliance_mappings: HashMap::new(),
            detected_at: Utc::now(),
        }
    }

    #[test]
    fn cwe_takes_priority_over_keyword() {
        let f = finding("something odd", Some("CWE-89"), None);
        let r = get_remediation(&f, Language::Python);
        assert!(r.description.contains("parameterized"));
        assert_eq!(r.priority, "immediate");
    }

    #[test]
    fn owasp_dispatch_when_no_cwe() {
        let f = finding("broken access", None, Some("API1:2023 - Broken Object Level Authorization"));
        let r = get_remediation(&f, Language::Javascript);
        assert!(r.description.to_lowercase().contains("authorization"));
    }

    #[test]
    fn keyword_fallback_matches_xss() {
        let f = finding("Reflected XSS", None, None);
        let r = get_remediation(&f, Language::Javascript);
        assert!(r.description.to_lowercase().contains("encod"));
    }

    #[test]
    fn unknown_type_gets_generic_remediation() {
        let f = finding("some unclassified issue", None, None);
        let r = get_remediation(&f, Language::Go);
        assert!(r.description.contains("some unclassified issue"));
        assert_eq!(r.priority, "short_term");
    }

    #[test]
    fn code_example_falls_back_to_first_language() {
        let f = finding("x", Some("CWE-770"), None);
        let r = get_remediation(&f, Language::Ruby);
        assert!(r.code_example.is_some());
    }

    #[test]
    fn effort_estimate_dedupes_by_type() {
        let findings = vec![
            finding("a", Some("CWE-89"), None),
            finding("b", Some("CWE-89"), None),
            finding("c", Some("CWE-770"), None),
        ];
        let estimate = estimate_fix_effort(&findings);
        assert_eq!(estimate.unique_fix_types, 2);
        assert_eq!(estimate.total_estimated_hours, 8 + 2);
    }

    #[test]
    fn effort_recommendation_buckets() {
        assert_eq!(effort_recommendation(8), "Fixes can likely be completed in a single sprint");
        assert_eq!(effort_recommendation(40), "Plan for 1-2 weeks of dedicated security work");
        assert_eq!(effort_recommendation(80), "Consider dedicating a full sprint to security improvements");
        assert_eq!(effort_recommendation(81), "Significant security debt - consider a phased remediation approach");
    }
}
