// Static OpenAPI analyzer (C4): OWASP API Security Top 10 (2023) checks
// over a parsed OpenAPI 2.0/3.x document. Pattern-based, no network
// traffic — every finding is derived purely from the spec's shape.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

use crate::error::SpecParseError;
use crate::models::{Confidence, EngineOrigin, Finding, Severity};

const SENSITIVE_FIELDS: &[&str] = &[
    "password", "passwd", "secret", "token", "apikey", "api_key", "api-key",
    "auth", "credential", "private", "ssn", "social_security", "credit_card",
    "card_number", "cvv", "pin", "bank_account", "routing_number", "access_token",
    "refresh_token", "bearer", "jwt", "session", "cookie",
];

static ID_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"(?i)\{.*id\}", r"(?i)\{.*Id\}", r"(?i)\{.*ID\}",
        r"(?i)\{user.*\}", r"(?i)\{account.*\}", r"(?i)\{order.*\}",
        r"(?i)\{customer.*\}", r"(?i)\{profile.*\}", r"(?i)\{document.*\}",
        r"(?i)\{file.*\}", r"(?i)\{record.*\}", r"(?i)\{item.*\}",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("static ID pattern is valid"))
    .collect()
});

const ADMIN_PATTERNS: &[&str] = &[
    "admin", "manage", "management", "internal", "system", "config",
    "configuration", "settings", "control", "super", "root", "master",
    "privileged", "staff", "operator", "debug", "test", "dev",
];

const BUSINESS_FLOW_PATTERNS: &[&str] = &[
    "payment", "pay", "checkout", "purchase", "buy", "order", "transaction",
    "transfer", "withdraw", "deposit", "refund", "invoice", "billing",
    "subscription", "upgrade", "downgrade", "cancel", "delete", "remove",
    "approve", "reject", "verify", "confirm", "reset", "change-password",
    "change_password", "forgot-password", "forgot_password", "signup", "register",
];

const SSRF_PATTERNS: &[&str] = &[
    "url", "uri", "link", "callback", "webhook", "redirect", "return_url",
    "returnurl", "return-url", "next", "destination", "target", "fetch",
    "proxy", "forward", "load", "image_url", "imageurl", "image-url",
    "file_url", "fileurl", "file-url", "resource", "source",
];

fn new_finding(
    type_: &str,
    severity: Severity,
    description: String,
    endpoint: &str,
    method: &str,
    remediation: &str,
    owasp_category: &str,
    cwe_id: Option<&str>,
    evidence: Option<String>,
) -> Finding {
    Finding {
        id: uuid::Uuid::new_v4().to_string(),
        engine: EngineOrigin::Static,
        type_: type_.to_string(),
        severity,
        confidence: Confidence::Medium,
        title: type_.to_string(),
        description,
        remediation: Some(remediation.to_string()),
        code_fix: None,
        evidence,
        request: None,
        response: None,
        endpoint: endpoint.to_string(),
        method: method.to_string(),
        parameter: None,
        cwe_id: cwe_id.map(|s| s.to_string()),
        cve_id: None,
        owasp_category: Some(owasp_category.to_string()),
        cvss_score: None,
        references: Vec::new(),
        compliance_mappings: std::collections::HashMap::new(),
        detected_at: chrono::Utc::now(),
    }
}

/// Parses an OpenAPI document from either YAML or JSON text.
pub fn parse_document(content: &str) -> Result<Value, SpecParseError> {
    let trimmed = content.trim_start();
    let value: Value = if trimmed.starts_with('{') {
        serde_json::from_str(content).map_err(|e| SpecParseError::InvalidJson(e.to_string()))?
    } else {
        serde_yaml::from_str(content).map_err(|e| SpecParseError::InvalidYaml(e.to_string()))?
    };

    if !value.is_object() {
        return Err(SpecParseError::NotAnObject);
    }

    Ok(value)
}

/// Inlines local `$ref: "#/a/b/c"` pointers against the document root,
/// bounded by the same depth-5 rule as the property walker below. A ref
/// that exceeds the bound, or points outside the document, is left as
/// an unresolved `$ref` node rather than failing the whole document.
pub fn resolve_refs(spec: Value) -> Result<Value, SpecParseError> {
    let root = spec.clone();
    Ok(resolve_node(&root, &spec, 0))
}

fn resolve_node(root: &Value, node: &Value, depth: u32) -> Value {
    if depth > 5 {
        return node.clone();
    }

    match node {
        Value::Object(map) => {
            if let Some(Value::String(pointer)) = map.get("$ref") {
                if let Some(target) = pointer.strip_prefix("#/").and_then(|path| lookup_pointer(root, path)) {
                    return resolve_node(root, target, depth + 1);
                }
                return node.clone();
            }

            let resolved: serde_json::Map<String, Value> =
                map.iter().map(|(k, v)| (k.clone(), resolve_node(root, v, depth + 1))).collect();
            Value::Object(resolved)
        }
        Value::Array(items) => Value::Array(items.iter().map(|v| resolve_node(root, v, depth + 1)).collect()),
        other => other.clone(),
    }
}

fn lookup_pointer<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('/').try_fold(root, |node, segment| node.get(segment))
}

pub struct OpenApiScanner {
    spec: Value,
    security_definitions: Value,
    global_security: Vec<Value>,
}

impl OpenApiScanner {
    pub fn new(spec: Value) -> Self {
        let security_definitions = spec
            .get("securityDefinitions")
            .or_else(|| spec.get("components").and_then(|c| c.get("securitySchemes")))
            .cloned()
            .unwrap_or_else(|| Value::Object(Default::default()));

        let global_security = spec
            .get("security")
            .and_then(|s| s.as_array())
            .cloned()
            .unwrap_or_default();

        Self { spec, security_definitions, global_security }
    }

    pub fn scan(&self) -> Vec<Finding> {
        let mut findings = Vec::new();

        if let Some(paths) = self.spec.get("paths").and_then(|p| p.as_object()) {
            for (path, path_item) in paths {
                let Some(path_item) = path_item.as_object() else { continue };
                for (method, operation) in path_item {
                    let method_lower = method.to_lowercase();
                    if !["get", "post", "put", "patch", "delete", "head", "options"].contains(&method_lower.as_str()) {
                        continue;
                    }
                    let Some(operation) = operation.as_object() else { continue };
                    self.scan_endpoint(path, &method.to_uppercase(), operation, &mut findings);
                }
            }
        }

        self.check_global_security(&mut findings);
        self.check_inventory_management(&mut findings);

        findings
    }

    fn scan_endpoint(
        &self,
        path: &str,
        method: &str,
        operation: &serde_json::Map<String, Value>,
        findings: &mut Vec<Finding>,
    ) {
        self.check_bola(path, method, operation, findings);
        self.check_authentication(path, method, operation, findings);
        self.check_property_authorization(path, method, operation, findings);
        self.check_resource_consumption(path, method, operation, findings);
        self.check_function_authorization(path, method, operation, findings);
        self.check_sensitive_flows(path, method, operation, findings);
        self.check_ssrf(path, method, operation, findings);
        self.check_security_misconfiguration(path, method, operation, findings);
        self.check_unsafe_api_consumption(path, method, operation, findings);
    }

    // API1: Broken Object Level Authorization
    fn check_bola(&self, path: &str, method: &str, operation: &serde_json::Map<String, Value>, findings: &mut Vec<Finding>) {
        for pattern in ID_PATTERNS.iter() {
            if pattern.is_match(path) {
                let has_security = self.endpoint_has_security(operation);
                let severity = if has_security { Severity::Medium } else { Severity::High };
                let security_note = if has_security { "" } else { " No authentication/authorization defined for this endpoint." };

                findings.push(new_finding(
                    "BOLA",
                    severity,
                    format!(
                        "Endpoint contains object identifier parameter that may be vulnerable to BOLA attacks. \
                         Attackers could manipulate the ID to access unauthorized resources.{security_note}"
                    ),
                    path,
                    method,
                    "1. Implement object-level authorization checks in your business logic.\n\
                     2. Verify the authenticated user has permission to access the requested resource.\n\
                     3. Use indirect references (e.g., user-specific indices) instead of direct database IDs.",
                    "API1:2023 - Broken Object Level Authorization",
                    Some("CWE-639"),
                    Some(format!("Path parameter pattern detected: {path}")),
                ));
                break;
            }
        }
    }

    // API2: Broken Authentication
    fn check_authentication(&self, path: &str, method: &str, operation: &serde_json::Map<String, Value>, findings: &mut Vec<Finding>) {
        let has_security = self.endpoint_has_security(operation);
        let path_lower = path.to_lowercase();
        let is_sensitive = BUSINESS_FLOW_PATTERNS.iter().chain(ADMIN_PATTERNS.iter()).any(|p| path_lower.contains(p));

        if !has_security {
            let severity = if is_sensitive { Severity::Critical } else { Severity::High };
            let sensitive_word = if is_sensitive { "sensitive " } else { "" };
            findings.push(new_finding(
                "AUTH_MISSING",
                severity,
                format!("No authentication defined for {sensitive_word}endpoint. This may allow unauthorized access to the API."),
                path,
                method,
                "1. Add security requirements to this endpoint in your OpenAPI spec.\n\
                 2. Implement proper authentication (OAuth2, JWT, API keys with proper scoping).\n\
                 3. Validate tokens server-side and check expiration.\n\
                 4. Use HTTPS to protect credentials in transit.",
                "API2:2023 - Broken Authentication",
                Some("CWE-306"),
                None,
            ));
            return;
        }

        for scheme in self.endpoint_security_schemes(operation) {
            let scheme_type = scheme.get("type").and_then(|t| t.as_str()).unwrap_or("").to_lowercase();

            if scheme_type == "http" && scheme.get("scheme").and_then(|s| s.as_str()).unwrap_or("").to_lowercase() == "basic" {
                findings.push(new_finding(
                    "WEAK_AUTH",
                    Severity::Medium,
                    "Basic authentication is used. While functional, it transmits credentials in easily \
                     decodable format and lacks modern security features."
                        .to_string(),
                    path,
                    method,
                    "1. Upgrade to token-based authentication (JWT, OAuth2).\n\
                     2. If Basic auth is required, ensure HTTPS is enforced.\n\
                     3. Implement rate limiting to prevent brute force attacks.",
                    "API2:2023 - Broken Authentication",
                    Some("CWE-287"),
                    None,
                ));
            }

            if scheme_type == "apikey" {
                let api_key_in = scheme.get("in").and_then(|i| i.as_str()).unwrap_or("");
                if api_key_in == "query" {
                    findings.push(new_finding(
                        "APIKEY_IN_QUERY",
                        Severity::Medium,
                        "API key is passed in query string. This can expose the key in browser history, \
                         server logs, and referrer headers."
                            .to_string(),
                        path,
                        method,
                        "1. Move API key to request header instead of query parameter.\n\
                         2. Ensure keys are not logged by your server.\n\
                         3. Implement key rotation policies.",
                        "API2:2023 - Broken Authentication",
                        Some("CWE-598"),
                        None,
                    ));
                }
            }
        }
    }

    // API3: Broken Object Property Level Authorization
    fn check_property_authorization(&self, path: &str, method: &str, operation: &serde_json::Map<String, Value>, findings: &mut Vec<Finding>) {
        if ["POST", "PUT", "PATCH"].contains(&method) {
            if let Some(request_body) = operation.get("requestBody") {
                if has_sensitive_properties_in_schema(request_body) {
                    findings.push(new_finding(
                        "MASS_ASSIGNMENT",
                        Severity::High,
                        "Request body may accept sensitive properties that should not be user-controllable. \
                         This could allow attackers to modify privileged fields."
                            .to_string(),
                        path,
                        method,
                        "1. Create separate DTOs for input that only include allowed fields.\n\
                         2. Explicitly whitelist properties that users can modify.\n\
                         3. Never bind request data directly to database models.",
                        "API3:2023 - Broken Object Property Level Authorization",
                        Some("CWE-915"),
                        None,
                    ));
                }
            }
        }

        if let Some(responses) = operation.get("responses").and_then(|r| r.as_object()) {
            for (status_code, response) in responses {
                if status_code.starts_with('2') && response_may_expose_sensitive_data(response) {
                    findings.push(new_finding(
                        "EXCESSIVE_DATA_EXPOSURE",
                        Severity::Medium,
                        "Response may expose sensitive data fields. Review the response schema to ensure \
                         only necessary data is returned."
                            .to_string(),
                        path,
                        method,
                        "1. Return only the data necessary for the client.\n\
                         2. Use response DTOs to filter out sensitive fields.\n\
                         3. Never return password hashes, tokens, or internal IDs.",
                        "API3:2023 - Broken Object Property Level Authorization",
                        Some("CWE-213"),
                        None,
                    ));
                    break;
                }
            }
        }
    }

    // API4: Unrestricted Resource Consumption
    fn check_resource_consumption(&self, path: &str, method: &str, operation: &serde_json::Map<String, Value>, findings: &mut Vec<Finding>) {
        if method == "GET" {
            let parameters = operation.get("parameters").and_then(|p| p.as_array()).cloned().unwrap_or_default();
            let has_pagination = parameters.iter().any(|p| {
                p.get("name")
                    .and_then(|n| n.as_str())
                    .map(|n| ["limit", "page", "pagesize", "page_size", "per_page", "offset"].contains(&n.to_lowercase().as_str()))
                    .unwrap_or(false)
            });

            let ends_with_id = Regex::new(r"\{[^}]+\}$").unwrap().is_match(path);
            let might_return_list = !ends_with_id || path.to_lowercase().contains("list") || path.ends_with('s');

            if might_return_list && !has_pagination {
                findings.push(new_finding(
                    "NO_PAGINATION",
                    Severity::Medium,
                    "List endpoint may lack pagination controls. This could allow attackers to request \
                     excessive data, causing performance issues or denial of service."
                        .to_string(),
                    path,
                    method,
                    "1. Implement pagination with limit and offset/cursor parameters.\n\
                     2. Set reasonable default and maximum limits.\n\
                     3. Return total count in response headers or body.",
                    "API4:2023 - Unrestricted Resource Consumption",
                    Some("CWE-770"),
                    None,
                ));
            }
        }

        if ["POST", "PUT"].contains(&method) {
            if let Some(content) = operation.get("requestBody").and_then(|rb| rb.get("content")).and_then(|c| c.as_object()) {
                for content_type in content.keys() {
                    if content_type.contains("multipart") || content_type.contains("octet-stream") {
                        findings.push(new_finding(
                            "FILE_UPLOAD_NO_LIMIT",
                            Severity::Medium,
                            "File upload endpoint detected. Ensure proper size limits and file type \
                             validation are implemented to prevent resource exhaustion."
                                .to_string(),
                            path,
                            method,
                            "1. Implement file size limits (e.g., max 10MB).\n\
                             2. Validate file types against a whitelist.\n\
                             3. Scan uploaded files for malware.\n\
                             4. Store files outside web root.",
                            "API4:2023 - Unrestricted Resource Consumption",
                            Some("CWE-400"),
                            None,
                        ));
                        break;
                    }
                }
            }
        }

        if ["POST", "PUT", "DELETE", "PATCH"].contains(&method) {
            findings.push(new_finding(
                "RATE_LIMIT_RECOMMENDED",
                Severity::Low,
                "Ensure rate limiting is implemented for this modifying endpoint to prevent abuse and \
                 denial of service attacks."
                    .to_string(),
                path,
                method,
                "1. Implement rate limiting per user/IP.\n\
                 2. Use sliding window or token bucket algorithms.\n\
                 3. Return 429 Too Many Requests when limit exceeded.\n\
                 4. Include rate limit headers: X-RateLimit-Limit, X-RateLimit-Remaining.",
                "API4:2023 - Unrestricted Resource Consumption",
                Some("CWE-770"),
                None,
            ));
        }
    }

    // API5: Broken Function Level Authorization
    fn check_function_authorization(&self, path: &str, method: &str, operation: &serde_json::Map<String, Value>, findings: &mut Vec<Finding>) {
        let path_lower = path.to_lowercase();

        for pattern in ADMIN_PATTERNS {
            if path_lower.contains(pattern) {
                let has_security = self.endpoint_has_security(operation);

                if !has_security {
                    findings.push(new_finding(
                        "ADMIN_NO_AUTH",
                        Severity::Critical,
                        format!(
                            "Administrative endpoint \"{path}\" has no authentication defined. \
                             This could allow unauthorized access to privileged functions."
                        ),
                        path,
                        method,
                        "1. Require authentication for all admin endpoints.\n\
                         2. Implement role-based access control (RBAC).\n\
                         3. Verify user has admin/appropriate role before processing.\n\
                         4. Log all access attempts to admin functions.",
                        "API5:2023 - Broken Function Level Authorization",
                        Some("CWE-285"),
                        None,
                    ));
                } else {
                    findings.push(new_finding(
                        "ADMIN_ENDPOINT",
                        Severity::Info,
                        "Administrative endpoint detected. Ensure proper role-based access control is \
                         implemented beyond just authentication."
                            .to_string(),
                        path,
                        method,
                        "1. Implement role checks (e.g., isAdmin, hasRole(\"admin\")).\n\
                         2. Use principle of least privilege.\n\
                         3. Implement audit logging for all admin actions.",
                        "API5:2023 - Broken Function Level Authorization",
                        Some("CWE-285"),
                        None,
                    ));
                }
                break;
            }
        }
    }

    // API6: Unrestricted Access to Sensitive Business Flows
    fn check_sensitive_flows(&self, path: &str, method: &str, operation: &serde_json::Map<String, Value>, findings: &mut Vec<Finding>) {
        let path_lower = path.to_lowercase();

        for pattern in BUSINESS_FLOW_PATTERNS {
            if path_lower.contains(pattern) {
                let has_security = self.endpoint_has_security(operation);
                let severity = if has_security { Severity::Medium } else { Severity::High };

                findings.push(new_finding(
                    "SENSITIVE_FLOW",
                    severity,
                    format!(
                        "Sensitive business flow endpoint detected ({pattern}). This endpoint may require \
                         additional protection against automated abuse."
                    ),
                    path,
                    method,
                    "1. Implement CAPTCHA or proof-of-work for user-facing flows.\n\
                     2. Add velocity checks (e.g., max 3 password resets per hour).\n\
                     3. Require step-up authentication for sensitive operations.\n\
                     4. Implement transaction signing for financial operations.",
                    "API6:2023 - Unrestricted Access to Sensitive Business Flows",
                    Some("CWE-799"),
                    None,
                ));
                break;
            }
        }
    }

    // API7: Server-Side Request Forgery
    fn check_ssrf(&self, path: &str, method: &str, operation: &serde_json::Map<String, Value>, findings: &mut Vec<Finding>) {
        if let Some(parameters) = operation.get("parameters").and_then(|p| p.as_array()) {
            for param in parameters {
                let param_name = param.get("name").and_then(|n| n.as_str()).unwrap_or("").to_lowercase();

                for ssrf_pattern in SSRF_PATTERNS {
                    if param_name.contains(ssrf_pattern) {
                        findings.push(new_finding(
                            "SSRF_RISK",
                            Severity::High,
                            format!(
                                "Parameter \"{}\" may be used to fetch external resources. This could be \
                                 exploited for Server-Side Request Forgery attacks.",
                                param.get("name").and_then(|n| n.as_str()).unwrap_or("")
                            ),
                            path,
                            method,
                            "1. Validate and sanitize all URL inputs.\n\
                             2. Use allowlist for permitted domains/IPs.\n\
                             3. Block requests to internal networks (10.x, 172.16.x, 192.168.x, localhost).\n\
                             4. Disable unnecessary URL schemes (file://, gopher://, etc.).",
                            "API7:2023 - Server Side Request Forgery",
                            Some("CWE-918"),
                            Some(format!("Suspicious parameter: {}", param.get("name").and_then(|n| n.as_str()).unwrap_or(""))),
                        ));
                        break;
                    }
                }
            }
        }

        if let Some(request_body) = operation.get("requestBody") {
            if has_url_properties_in_schema(request_body) {
                findings.push(new_finding(
                    "SSRF_BODY_RISK",
                    Severity::Medium,
                    "Request body contains URL-like properties. Ensure proper validation to prevent SSRF attacks.".to_string(),
                    path,
                    method,
                    "1. Validate all URL inputs against an allowlist.\n\
                     2. Never fetch URLs provided by users without validation.\n\
                     3. Block private IP ranges and localhost.",
                    "API7:2023 - Server Side Request Forgery",
                    Some("CWE-918"),
                    None,
                ));
            }
        }
    }

    // API8: Security Misconfiguration
    fn check_security_misconfiguration(&self, path: &str, method: &str, operation: &serde_json::Map<String, Value>, findings: &mut Vec<Finding>) {
        let path_lower = path.to_lowercase();
        const DEBUG_PATTERNS: &[&str] = &["debug", "test", "dev", "staging", "swagger", "docs", "graphql", "playground"];

        for pattern in DEBUG_PATTERNS {
            if path_lower.contains(pattern) {
                let severity = if ["swagger", "docs", "graphql"].contains(pattern) { Severity::Low } else { Severity::Medium };
                findings.push(new_finding(
                    "DEBUG_ENDPOINT",
                    severity,
                    "Development/debug endpoint detected. Ensure this is disabled or properly protected in production.".to_string(),
                    path,
                    method,
                    "1. Disable debug endpoints in production.\n\
                     2. Use environment variables to control endpoint availability.\n\
                     3. Remove Swagger/API docs from production or protect them.",
                    "API8:2023 - Security Misconfiguration",
                    Some("CWE-489"),
                    None,
                ));
                break;
            }
        }

        if let Some(responses) = operation.get("responses").and_then(|r| r.as_object()) {
            for (status_code, response) in responses {
                if status_code.starts_with('5') {
                    let desc = response.get("description").and_then(|d| d.as_str()).unwrap_or("").to_lowercase();
                    if ["stack", "trace", "debug", "internal"].iter().any(|w| desc.contains(w)) {
                        findings.push(new_finding(
                            "VERBOSE_ERROR",
                            Severity::Low,
                            "Error response may expose internal details. Ensure production errors do not \
                             leak stack traces or internal information."
                                .to_string(),
                            path,
                            method,
                            "1. Use generic error messages in production.\n\
                             2. Log detailed errors server-side, not in responses.\n\
                             3. Include correlation ID for debugging without exposing details.",
                            "API8:2023 - Security Misconfiguration",
                            Some("CWE-209"),
                            None,
                        ));
                        break;
                    }
                }
            }
        }
    }

    // API10: Unsafe Consumption of APIs
    fn check_unsafe_api_consumption(&self, path: &str, method: &str, operation: &serde_json::Map<String, Value>, findings: &mut Vec<Finding>) {
        let description = operation.get("description").and_then(|d| d.as_str()).unwrap_or("").to_lowercase();
        let summary = operation.get("summary").and_then(|s| s.as_str()).unwrap_or("").to_lowercase();

        const EXTERNAL_INDICATORS: &[&str] = &["external", "third-party", "3rd party", "integration", "webhook", "callback", "partner", "provider"];

        if EXTERNAL_INDICATORS.iter().any(|i| description.contains(i) || summary.contains(i)) {
            findings.push(new_finding(
                "EXTERNAL_API_CONSUMPTION",
                Severity::Low,
                "Endpoint appears to interact with external/third-party APIs. Ensure proper validation of external data.".to_string(),
                path,
                method,
                "1. Validate and sanitize all data from external APIs.\n\
                 2. Implement timeouts for external requests.\n\
                 3. Use circuit breaker pattern for resilience.\n\
                 4. Validate TLS certificates of external services.",
                "API10:2023 - Unsafe Consumption of APIs",
                Some("CWE-20"),
                None,
            ));
        }
    }

    // Global/spec-level checks
    fn check_global_security(&self, findings: &mut Vec<Finding>) {
        let no_security_defs = self.security_definitions.as_object().map(|o| o.is_empty()).unwrap_or(true);
        if self.global_security.is_empty() && no_security_defs {
            findings.push(new_finding(
                "NO_GLOBAL_SECURITY",
                Severity::High,
                "No global security scheme defined in the API specification. All endpoints may be \
                 accessible without authentication."
                    .to_string(),
                "/api",
                "*",
                "1. Define security schemes in your OpenAPI spec.\n\
                 2. Apply global security requirement.",
                "API2:2023 - Broken Authentication",
                Some("CWE-306"),
                None,
            ));
        }

        if let Some(servers) = self.spec.get("servers").and_then(|s| s.as_array()) {
            for server in servers {
                if let Some(url) = server.get("url").and_then(|u| u.as_str()) {
                    if url.starts_with("http://") && !url.contains("localhost") && !url.contains("127.0.0.1") {
                        findings.push(new_finding(
                            "HTTP_SERVER",
                            Severity::High,
                            format!("Non-HTTPS server URL defined: {url}. API traffic should be encrypted."),
                            "/api",
                            "*",
                            "1. Use HTTPS for all production API traffic.\n\
                             2. Redirect HTTP to HTTPS.\n\
                             3. Use HSTS header to enforce HTTPS.",
                            "API8:2023 - Security Misconfiguration",
                            Some("CWE-319"),
                            None,
                        ));
                    }
                }
            }
        }
    }

    // API9: Improper Inventory Management
    fn check_inventory_management(&self, findings: &mut Vec<Finding>) {
        let Some(paths) = self.spec.get("paths").and_then(|p| p.as_object()) else { return };

        for (path, path_item) in paths {
            let Some(path_item) = path_item.as_object() else { continue };
            for (method, operation) in path_item {
                let Some(operation) = operation.as_object() else { continue };
                if operation.get("deprecated").and_then(|d| d.as_bool()).unwrap_or(false) {
                    findings.push(new_finding(
                        "DEPRECATED_ENDPOINT",
                        Severity::Low,
                        "Deprecated endpoint still documented. Consider removing from production or \
                         setting a sunset date."
                            .to_string(),
                        path,
                        &method.to_uppercase(),
                        "1. Set a sunset date and communicate to API consumers.\n\
                         2. Return deprecation headers: Deprecation, Sunset.\n\
                         3. Monitor usage and remove when safe.",
                        "API9:2023 - Improper Inventory Management",
                        Some("CWE-1059"),
                        None,
                    ));
                }
            }
        }

        let version_patterns = [
            Regex::new(r"/v\d+/").unwrap(),
            Regex::new(r"/api/v\d+/").unwrap(),
            Regex::new(r"/version\d+/").unwrap(),
        ];
        let mut versions_found = std::collections::BTreeSet::new();

        for path in paths.keys() {
            for pattern in &version_patterns {
                if let Some(m) = pattern.find(path) {
                    versions_found.insert(m.as_str().to_string());
                }
            }
        }

        if versions_found.len() > 1 {
            findings.push(new_finding(
                "MULTIPLE_API_VERSIONS",
                Severity::Info,
                format!(
                    "Multiple API versions detected: {}. Ensure old versions are properly maintained or deprecated.",
                    versions_found.into_iter().collect::<Vec<_>>().join(", ")
                ),
                "/api",
                "*",
                "1. Maintain documentation for all supported versions.\n\
                 2. Set deprecation timelines for old versions.\n\
                 3. Apply security patches to all supported versions.",
                "API9:2023 - Improper Inventory Management",
                Some("CWE-1059"),
                None,
            ));
        }
    }

    fn endpoint_has_security(&self, operation: &serde_json::Map<String, Value>) -> bool {
        if let Some(security) = operation.get("security").and_then(|s| s.as_array()) {
            return !security.is_empty();
        }
        !self.global_security.is_empty()
    }

    fn endpoint_security_schemes(&self, operation: &serde_json::Map<String, Value>) -> Vec<Value> {
        let security = operation
            .get("security")
            .and_then(|s| s.as_array())
            .cloned()
            .unwrap_or_else(|| self.global_security.clone());

        let mut schemes = Vec::new();
        for requirement in &security {
            if let Some(requirement) = requirement.as_object() {
                for scheme_name in requirement.keys() {
                    if let Some(scheme) = self.security_definitions.get(scheme_name) {
                        schemes.push(scheme.clone());
                    }
                }
            }
        }
        schemes
    }
}

fn get_all_properties(schema: &Value, depth: u32) -> Vec<String> {
    if depth > 5 {
        return Vec::new();
    }

    let mut properties = Vec::new();

    if let Some(props) = schema.get("properties").and_then(|p| p.as_object()) {
        for (name, prop_schema) in props {
            properties.push(name.clone());
            if prop_schema.is_object() {
                properties.extend(get_all_properties(prop_schema, depth + 1));
            }
        }
    }

    if let Some(items) = schema.get("items") {
        properties.extend(get_all_properties(items, depth + 1));
    }

    for keyword in ["allOf", "oneOf", "anyOf"] {
        if let Some(subschemas) = schema.get(keyword).and_then(|s| s.as_array()) {
            for sub in subschemas {
                properties.extend(get_all_properties(sub, depth + 1));
            }
        }
    }

    properties
}

fn schema_properties_from_content(container: &Value) -> Vec<String> {
    let Some(content) = container.get("content").and_then(|c| c.as_object()) else { return Vec::new() };
    let mut properties = Vec::new();
    for media_type in content.values() {
        if let Some(schema) = media_type.get("schema") {
            properties.extend(get_all_properties(schema, 0));
        }
    }
    properties
}

fn has_sensitive_properties_in_schema(request_body: &Value) -> bool {
    const FLAGS: &[&str] = &["role", "admin", "privilege", "permission", "level", "type", "status", "verified", "approved", "active", "enabled"];
    schema_properties_from_content(request_body)
        .iter()
        .any(|p| FLAGS.iter().any(|f| p.to_lowercase().contains(f)))
}

fn response_may_expose_sensitive_data(response: &Value) -> bool {
    schema_properties_from_content(response)
        .iter()
        .any(|p| SENSITIVE_FIELDS.iter().any(|f| p.to_lowercase().contains(f)))
}

fn has_url_properties_in_schema(request_body: &Value) -> bool {
    schema_properties_from_content(request_body)
        .iter()
        .any(|p| SSRF_PATTERNS.iter().any(|f| p.to_lowercase().contains(f)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn bola_flagged_on_id_path_without_security() {
        let spec = json!({
            "openapi": "3.0.0",
            "paths": {
                "/users/{userId}": {
                    "get": {}
                }
            }
        });
        let scanner = OpenApiScanner::new(spec);
        let findings = scanner.scan();
        assert!(findings.iter().any(|f| f.type_ == "BOLA" && f.severity == Severity::High));
    }

    #[test]
    fn admin_endpoint_without_auth_is_critical() {
        let spec = json!({
            "openapi": "3.0.0",
            "paths": {
                "/admin/users": {
                    "get": {}
                }
            }
        });
        let scanner = OpenApiScanner::new(spec);
        let findings = scanner.scan();
        assert!(findings.iter().any(|f| f.type_ == "ADMIN_NO_AUTH" && f.severity == Severity::Critical));
    }

    #[test]
    fn api_key_in_query_is_flagged() {
        let spec = json!({
            "openapi": "3.0.0",
            "components": {
                "securitySchemes": {
                    "apiKeyAuth": { "type": "apiKey", "in": "query", "name": "api_key" }
                }
            },
            "paths": {
                "/data": {
                    "get": { "security": [{"apiKeyAuth": []}] }
                }
            }
        });
        let scanner = OpenApiScanner::new(spec);
        let findings = scanner.scan();
        assert!(findings.iter().any(|f| f.type_ == "APIKEY_IN_QUERY"));
    }

    #[test]
    fn no_global_security_flagged_when_spec_has_no_schemes() {
        let spec = json!({ "openapi": "3.0.0", "paths": {} });
        let scanner = OpenApiScanner::new(spec);
        let findings = scanner.scan();
        assert!(findings.iter().any(|f| f.type_ == "NO_GLOBAL_SECURITY"));
    }

    #[test]
    fn bounded_depth_recursion_does_not_overflow() {
        let mut schema = json!({"type": "object"});
        for i in 0..20 {
            schema = json!({"properties": {format!("level{i}"): schema}});
        }
        let properties = get_all_properties(&schema, 0);
        assert!(properties.len() < 10);
    }

    #[test]
    fn resolve_refs_inlines_local_pointer() {
        let spec = json!({
            "openapi": "3.0.0",
            "paths": {
                "/users/{userId}": {
                    "get": {
                        "responses": {
                            "200": { "$ref": "#/components/responses/UserResponse" }
                        }
                    }
                }
            },
            "components": {
                "responses": {
                    "UserResponse": { "description": "a user" }
                }
            }
        });
        let resolved = resolve_refs(spec).unwrap();
        let response = &resolved["paths"]["/users/{userId}"]["get"]["responses"]["200"];
        assert_eq!(response["description"], "a user");
    }

    #[test]
    fn resolve_refs_leaves_unresolvable_pointer_untouched() {
        let spec = json!({ "paths": { "/x": { "$ref": "#/components/missing" } } });
        let resolved = resolve_refs(spec).unwrap();
        assert_eq!(resolved["paths"]["/x"]["$ref"], "#/components/missing");
    }
}
