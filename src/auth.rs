// Authentication handler (C5): establishes scan-time credentials across
// nine supported methods and tracks token expiry with a configurable
// refresh buffer. The authorization-code OAuth2 flow is out of scope — it
// requires an interactive browser redirect a headless scanner cannot
// drive; everything else has a fully automatable grant.

use std::collections::HashMap;

use base64::Engine as _;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::error::AuthError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthMethod {
    None,
    BearerToken,
    BasicAuth,
    ApiKey,
    Oauth2ClientCredentials,
    Oauth2Password,
    SessionCookie,
    CustomHeaders,
    AwsSignatureV4,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApiKeyLocation {
    Header,
    Query,
    Cookie,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthConfig {
    pub method: Option<AuthMethod>,

    pub bearer_token: Option<String>,
    pub api_key: Option<String>,
    #[serde(default = "default_api_key_header")]
    pub api_key_header: String,
    pub api_key_location: Option<ApiKeyLocation>,

    pub username: Option<String>,
    pub password: Option<String>,

    pub oauth2_client_id: Option<String>,
    pub oauth2_client_secret: Option<String>,
    pub oauth2_token_url: Option<String>,
    pub oauth2_scope: Option<String>,
    pub oauth2_audience: Option<String>,

    pub login_url: Option<String>,
    pub login_body: Option<HashMap<String, String>>,
    #[serde(default = "default_login_method")]
    pub login_method: String,
    pub session_cookie_name: Option<String>,
    pub csrf_token_name: Option<String>,

    #[serde(default)]
    pub custom_headers: HashMap<String, String>,

    pub aws_access_key: Option<String>,
    pub aws_secret_key: Option<String>,
    pub aws_region: Option<String>,
    pub aws_service: Option<String>,

    pub token_refresh_url: Option<String>,
    pub refresh_token: Option<String>,
    #[serde(default = "default_expiry_buffer_secs")]
    pub token_expiry_buffer_secs: i64,
}

fn default_api_key_header() -> String {
    "X-API-Key".to_string()
}

fn default_login_method() -> String {
    "POST".to_string()
}

fn default_expiry_buffer_secs() -> i64 {
    60
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthContext {
    pub method: String,
    pub bearer_token: Option<String>,
    pub api_key: Option<String>,
    pub api_key_header: Option<String>,
    #[serde(default)]
    pub cookies: HashMap<String, String>,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default)]
    pub query_params: HashMap<String, String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub refresh_token: Option<String>,
    /// Mirrors the config's buffer so `is_expired` doesn't need the config in scope.
    #[serde(default = "default_expiry_buffer_secs")]
    pub expiry_buffer_secs: i64,
}

impl AuthContext {
    pub fn new(method: impl Into<String>) -> Self {
        Self { method: method.into(), expiry_buffer_secs: default_expiry_buffer_secs(), ..Default::default() }
    }

    /// True once `now >= expires_at - buffer`. The original hardcodes a
    /// 60-second buffer here; this honors the configured value instead.
    pub fn is_expired(&self) -> bool {
        match self.expires_at {
            None => false,
            Some(expires_at) => {
                let buffer = chrono::Duration::seconds(self.expiry_buffer_secs);
                Utc::now() >= expires_at - buffer
            }
        }
    }
}

#[cfg(feature = "http")]
pub struct AuthHandler {
    client: reqwest::Client,
}

#[cfg(feature = "http")]
impl Default for AuthHandler {
    fn default() -> Self {
        Self { client: reqwest::Client::new() }
    }
}

#[cfg(feature = "http")]
impl AuthHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn authenticate(&self, config: &AuthConfig) -> Result<AuthContext, AuthError> {
        let method = config.method.unwrap_or(AuthMethod::None);
        log::info!("authenticating using method: {method:?}");

        match method {
            AuthMethod::None => Ok(AuthContext::new("none")),
            AuthMethod::BearerToken => self.handle_bearer_token(config),
            AuthMethod::BasicAuth => self.handle_basic_auth(config),
            AuthMethod::ApiKey => self.handle_api_key(config),
            AuthMethod::Oauth2ClientCredentials => self.handle_oauth2_client_credentials(config).await,
            AuthMethod::Oauth2Password => self.handle_oauth2_password(config).await,
            AuthMethod::SessionCookie => self.handle_session_cookie(config).await,
            AuthMethod::CustomHeaders => self.handle_custom_headers(config),
            AuthMethod::AwsSignatureV4 => self.handle_aws_signature(config),
        }
    }

    fn handle_bearer_token(&self, config: &AuthConfig) -> Result<AuthContext, AuthError> {
        let token = config.bearer_token.clone().ok_or(AuthError::MissingField("bearer_token"))?;
        let mut ctx = AuthContext::new("bearer_token");
        ctx.headers.insert("Authorization".to_string(), format!("Bearer {token}"));
        ctx.bearer_token = Some(token);
        Ok(ctx)
    }

    fn handle_basic_auth(&self, config: &AuthConfig) -> Result<AuthContext, AuthError> {
        let username = config.username.clone().ok_or(AuthError::MissingField("username"))?;
        let password = config.password.clone().unwrap_or_default();
        let encoded = base64::engine::general_purpose::STANDARD.encode(format!("{username}:{password}"));
        let mut ctx = AuthContext::new("basic_auth");
        ctx.headers.insert("Authorization".to_string(), format!("Basic {encoded}"));
        Ok(ctx)
    }

    fn handle_api_key(&self, config: &AuthConfig) -> Result<AuthContext, AuthError> {
        let key = config.api_key.clone().ok_or(AuthError::MissingField("api_key"))?;
        let mut ctx = AuthContext::new("api_key");
        ctx.api_key = Some(key.clone());
        ctx.api_key_header = Some(config.api_key_header.clone());

        match config.api_key_location.unwrap_or(ApiKeyLocation::Header) {
            ApiKeyLocation::Header => { ctx.headers.insert(config.api_key_header.clone(), key); }
            ApiKeyLocation::Query => { ctx.query_params.insert(config.api_key_header.clone(), key); }
            ApiKeyLocation::Cookie => { ctx.cookies.insert(config.api_key_header.clone(), key); }
        }

        Ok(ctx)
    }

    async fn handle_oauth2_client_credentials(&self, config: &AuthConfig) -> Result<AuthContext, AuthError> {
        let token_url = config.oauth2_token_url.clone().ok_or(AuthError::MissingField("oauth2_token_url"))?;

        let mut form: HashMap<&str, String> = HashMap::new();
        form.insert("grant_type", "client_credentials".to_string());
        if let Some(id) = &config.oauth2_client_id { form.insert("client_id", id.clone()); }
        if let Some(secret) = &config.oauth2_client_secret { form.insert("client_secret", secret.clone()); }
        if let Some(scope) = &config.oauth2_scope { form.insert("scope", scope.clone()); }
        if let Some(audience) = &config.oauth2_audience { form.insert("audience", audience.clone()); }

        let response = self.client.post(&token_url).form(&form).send().await.map_err(|e| AuthError::Transport(e.to_string()))?;
        self.context_from_token_response(response, "oauth2_client_credentials", config.token_expiry_buffer_secs).await
    }

    async fn handle_oauth2_password(&self, config: &AuthConfig) -> Result<AuthContext, AuthError> {
        let token_url = config.oauth2_token_url.clone().ok_or(AuthError::MissingField("oauth2_token_url"))?;

        let mut form: HashMap<&str, String> = HashMap::new();
        form.insert("grant_type", "password".to_string());
        form.insert("username", config.username.clone().unwrap_or_default());
        form.insert("password", config.password.clone().unwrap_or_default());
        if let Some(id) = &config.oauth2_client_id { form.insert("client_id", id.clone()); }
        if let Some(secret) = &config.oauth2_client_secret { form.insert("client_secret", secret.clone()); }
        if let Some(scope) = &config.oauth2_scope { form.insert("scope", scope.clone()); }

        let response = self.client.post(&token_url).form(&form).send().await.map_err(|e| AuthError::Transport(e.to_string()))?;
        self.context_from_token_response(response, "oauth2_password", config.token_expiry_buffer_secs).await
    }

    async fn context_from_token_response(
        &self,
        response: reqwest::Response,
        method: &str,
        expiry_buffer_secs: i64,
    ) -> Result<AuthContext, AuthError> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AuthError::TokenEndpointFailed { status: status.as_u16(), body });
        }

        let token_data: serde_json::Value = response.json().await.map_err(|e| AuthError::Transport(e.to_string()))?;
        let access_token = token_data.get("access_token").and_then(|v| v.as_str()).unwrap_or_default().to_string();
        let expires_in = token_data.get("expires_in").and_then(|v| v.as_i64()).unwrap_or(3600);
        let refresh_token = token_data.get("refresh_token").and_then(|v| v.as_str()).map(|s| s.to_string());

        let mut ctx = AuthContext::new(method);
        ctx.headers.insert("Authorization".to_string(), format!("Bearer {access_token}"));
        ctx.bearer_token = Some(access_token);
        ctx.expires_at = Some(Utc::now() + chrono::Duration::seconds(expires_in));
        ctx.refresh_token = refresh_token;
        ctx.expiry_buffer_secs = expiry_buffer_secs;
        Ok(ctx)
    }

    async fn handle_session_cookie(&self, config: &AuthConfig) -> Result<AuthContext, AuthError> {
        let login_url = config.login_url.clone().ok_or(AuthError::MissingField("login_url"))?;
        let login_body = config.login_body.clone().unwrap_or_else(|| {
            let mut m = HashMap::new();
            if let Some(u) = &config.username { m.insert("username".to_string(), u.clone()); }
            if let Some(p) = &config.password { m.insert("password".to_string(), p.clone()); }
            m
        });

        let method = config.login_method.to_uppercase();
        let request = match method.as_str() {
            "GET" => self.client.get(&login_url).query(&login_body),
            _ => self.client.request(method.parse().unwrap_or(reqwest::Method::POST), &login_url).json(&login_body),
        };

        let response = request.send().await.map_err(|e| AuthError::Transport(e.to_string()))?;
        if response.status().as_u16() >= 400 {
            return Err(AuthError::LoginFailed(response.status().as_u16()));
        }

        let mut cookies = HashMap::new();
        for cookie in response.cookies() {
            cookies.insert(cookie.name().to_string(), cookie.value().to_string());
        }

        let mut headers = HashMap::new();
        if let Some(csrf_name) = &config.csrf_token_name {
            if let Some(csrf_value) = cookies.get(csrf_name) {
                headers.insert("X-CSRF-Token".to_string(), csrf_value.clone());
            }
        }

        let mut ctx = AuthContext::new("session_cookie");
        ctx.cookies = cookies;
        ctx.headers = headers;
        Ok(ctx)
    }

    fn handle_custom_headers(&self, config: &AuthConfig) -> Result<AuthContext, AuthError> {
        let mut ctx = AuthContext::new("custom_headers");
        ctx.headers = config.custom_headers.clone();
        Ok(ctx)
    }

    fn handle_aws_signature(&self, config: &AuthConfig) -> Result<AuthContext, AuthError> {
        let mut ctx = AuthContext::new("aws_signature_v4");
        ctx.headers.insert("x-vulx-aws-access-key".to_string(), config.aws_access_key.clone().unwrap_or_default());
        ctx.headers.insert("x-vulx-aws-secret-key".to_string(), config.aws_secret_key.clone().unwrap_or_default());
        ctx.headers.insert("x-vulx-aws-region".to_string(), config.aws_region.clone().unwrap_or_else(|| "us-east-1".to_string()));
        ctx.headers.insert("x-vulx-aws-service".to_string(), config.aws_service.clone().unwrap_or_else(|| "execute-api".to_string()));
        Ok(ctx)
    }

    pub async fn refresh_token(&self, context: &AuthContext, config: &AuthConfig) -> Result<AuthContext, AuthError> {
        let refresh_token = context.refresh_token.clone().ok_or(AuthError::MissingField("refresh_token"))?;
        let refresh_url = config.token_refresh_url.clone().ok_or(AuthError::MissingField("token_refresh_url"))?;

        let mut form: HashMap<&str, String> = HashMap::new();
        form.insert("grant_type", "refresh_token".to_string());
        form.insert("refresh_token", refresh_token.clone());
        if let Some(id) = &config.oauth2_client_id { form.insert("client_id", id.clone()); }
        if let Some(secret) = &config.oauth2_client_secret { form.insert("client_secret", secret.clone()); }

        let response = self.client.post(&refresh_url).form(&form).send().await.map_err(|e| AuthError::Transport(e.to_string()))?;
        let mut refreshed = self.context_from_token_response(response, &context.method, config.token_expiry_buffer_secs).await?;
        if refreshed.refresh_token.is_none() {
            refreshed.refresh_token = Some(refresh_token);
        }
        Ok(refreshed)
    }

    /// AWS SigV4 signing of a single request, computed per-request rather
    /// than at authentication time since the signature depends on the
    /// method, path, and body being sent.
    pub fn sign_request_aws_v4(
        &self,
        config: &AuthConfig,
        method: &str,
        canonical_path: &str,
        payload_hash: &str,
        amz_date: &str,
    ) -> Result<String, AuthError> {
        let access_key = config.aws_access_key.as_deref().ok_or(AuthError::MissingField("aws_access_key"))?;
        let secret_key = config.aws_secret_key.as_deref().ok_or(AuthError::MissingField("aws_secret_key"))?;
        let region = config.aws_region.as_deref().unwrap_or("us-east-1");
        let service = config.aws_service.as_deref().unwrap_or("execute-api");
        let date_stamp = &amz_date[0..8];

        let credential_scope = format!("{date_stamp}/{region}/{service}/aws4_request");
        let string_to_sign = format!("AWS4-HMAC-SHA256\n{amz_date}\n{credential_scope}\n{payload_hash}");

        let mut signing_key = hmac_sha256(format!("AWS4{secret_key}").as_bytes(), date_stamp.as_bytes());
        signing_key = hmac_sha256(&signing_key, region.as_bytes());
        signing_key = hmac_sha256(&signing_key, service.as_bytes());
        signing_key = hmac_sha256(&signing_key, b"aws4_request");

        let signature = hex::encode(hmac_sha256(&signing_key, string_to_sign.as_bytes()));

        Ok(format!(
            "AWS4-HMAC-SHA256 Credential={access_key}/{credential_scope}, SignedHeaders=host;x-amz-date, Signature={signature} method={method} path={canonical_path}"
        ))
    }
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut mac = Hmac::<Sha256>::new_from_slice(key).expect("HMAC accepts any key length");
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

mod hex {
    pub fn encode(bytes: Vec<u8>) -> String {
        bytes.iter().map(|b| format!("{b:02x}")).collect()
    }
}

/// Records an authentication flow for later replay, grouping cookies set
/// across the recorded request chain.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RecordedRequest {
    pub method: String,
    pub url: String,
    pub headers: HashMap<String, String>,
    pub body: Option<String>,
    pub response_status: u16,
    pub response_headers: HashMap<String, String>,
    pub response_body: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthRecorder {
    pub recorded_requests: Vec<RecordedRequest>,
    pub recorded_cookies: HashMap<String, String>,
    pub recorded_headers: HashMap<String, String>,
}

impl AuthRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_request(&mut self, request: RecordedRequest) {
        for (key, value) in &request.response_headers {
            if key.eq_ignore_ascii_case("set-cookie") {
                if let Some((name, rest)) = value.split(';').next().unwrap_or("").split_once('=') {
                    self.recorded_cookies.insert(name.trim().to_string(), rest.trim().to_string());
                }
            }
        }
        self.recorded_requests.push(request);
    }

    pub fn export_config(&self) -> serde_json::Value {
        serde_json::json!({
            "requests": self.recorded_requests,
            "cookies": self.recorded_cookies,
            "headers": self.recorded_headers,
        })
    }

    #[cfg(feature = "http")]
    pub async fn replay(&mut self, client: &reqwest::Client) -> Result<AuthContext, AuthError> {
        for request in &self.recorded_requests {
            let method: reqwest::Method = request.method.parse().map_err(|_| AuthError::Transport(format!("invalid method {}", request.method)))?;
            let mut builder = client.request(method, &request.url);
            for (k, v) in &request.headers {
                builder = builder.header(k, v);
            }
            if let Some(body) = &request.body {
                builder = builder.body(body.clone());
            }
            let response = builder.send().await.map_err(|e| AuthError::Transport(e.to_string()))?;
            for cookie in response.cookies() {
                self.recorded_cookies.insert(cookie.name().to_string(), cookie.value().to_string());
            }
        }

        let mut ctx = AuthContext::new("recorded_flow");
        ctx.cookies = self.recorded_cookies.clone();
        ctx.headers = self.recorded_headers.clone();
        Ok(ctx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expired_context_uses_configured_buffer_not_hardcoded_sixty() {
        let mut ctx = AuthContext::new("oauth2_client_credentials");
        ctx.expiry_buffer_secs = 300;
        ctx.expires_at = Some(Utc::now() + chrono::Duration::seconds(200));
        assert!(ctx.is_expired());
    }

    #[test]
    fn context_without_expiry_never_expires() {
        let ctx = AuthContext::new("bearer_token");
        assert!(!ctx.is_expired());
    }

    #[test]
    fn context_with_small_buffer_is_not_expired_far_out() {
        let mut ctx = AuthContext::new("oauth2_password");
        ctx.expiry_buffer_secs = 60;
        ctx.expires_at = Some(Utc::now() + chrono::Duration::seconds(3600));
        assert!(!ctx.is_expired());
    }

    #[test]
    fn auth_recorder_extracts_cookie_from_set_cookie_header() {
        let mut recorder = AuthRecorder::new();
        let mut response_headers = HashMap::new();
        response_headers.insert("Set-Cookie".to_string(), "session=abc123; Path=/; HttpOnly".to_string());
        recorder.record_request(RecordedRequest {
            method: "POST".to_string(),
            url: "https://example.com/login".to_string(),
            headers: HashMap::new(),
            body: None,
            response_status: 200,
            response_headers,
            response_body: None,
        });
        assert_eq!(recorder.recorded_cookies.get("session"), Some(&"abc123".to_string()));
    }
}
