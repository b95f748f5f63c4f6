// Layered configuration: typed structs with `Default` impls mirroring the
// environment variables the original system reads via `os.environ.get`.

use std::env;

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_or_u16(key: &str, default: u16) -> u16 {
    env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

/// Database + queue connection settings read once at worker startup.
#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub redis_host: String,
    pub redis_port: u16,
    pub db_host: String,
    pub db_name: String,
    pub db_user: String,
    pub db_pass: String,
    pub queue_key: String,
    pub queue_poll_timeout_secs: u64,
    pub queue_retry_backoff_secs: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            redis_host: env_or("REDIS_HOST", "localhost"),
            redis_port: env_or_u16("REDIS_PORT", 6379),
            db_host: env_or("DB_HOST", "localhost"),
            db_name: env_or("DB_NAME", "vulx_db"),
            db_user: env_or("DB_USER", "vulx"),
            db_pass: env_or("DB_PASS", "vulx_password"),
            queue_key: "vulx:scan-queue".to_string(),
            queue_poll_timeout_secs: 5,
            queue_retry_backoff_secs: 5,
        }
    }
}

impl StorageConfig {
    pub fn redis_url(&self) -> String {
        format!("redis://{}:{}", self.redis_host, self.redis_port)
    }

    pub fn postgres_url(&self) -> String {
        format!(
            "postgres://{}:{}@{}/{}",
            self.db_user, self.db_pass, self.db_host, self.db_name
        )
    }
}

/// Settings for the three external engine adapters.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub nuclei_templates_path: String,
    pub zap_host: String,
    pub zap_port: u16,
    pub zap_api_key: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            nuclei_templates_path: env_or("NUCLEI_TEMPLATES_PATH", "/opt/nuclei-templates"),
            zap_host: env_or("ZAP_HOST", "localhost"),
            zap_port: env_or_u16("ZAP_PORT", 8080),
            zap_api_key: env_or("ZAP_API_KEY", ""),
        }
    }
}

/// Notification and upstream reporting endpoints.
#[derive(Debug, Clone)]
pub struct ReportingConfig {
    pub api_url: String,
    pub vulx_api_url: String,
    pub vulx_api_key: Option<String>,
    pub vulx_project_id: Option<String>,
}

impl Default for ReportingConfig {
    fn default() -> Self {
        Self {
            api_url: env_or("API_URL", "http://localhost:3000"),
            vulx_api_url: env_or("VULX_API_URL", "https://api.vulx.io"),
            vulx_api_key: env::var("VULX_API_KEY").ok(),
            vulx_project_id: env::var("VULX_PROJECT_ID").ok(),
        }
    }
}

/// Top-level worker configuration bundling the above.
#[derive(Debug, Clone, Default)]
pub struct WorkerConfig {
    pub storage: StorageConfig,
    pub engines: EngineConfig,
    pub reporting: ReportingConfig,
}

pub fn init_logging() {
    let _ = env_logger::try_init();
}
