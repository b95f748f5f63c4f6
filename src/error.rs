// Typed error hierarchy for the scan core. Adapter-internal failures are
// caught and logged at the adapter boundary and never surface here; only
// authentication, spec parsing, and the storage/reconciliation layer are
// allowed to fail a scan or a job.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("unsupported authentication method: {0}")]
    UnsupportedMethod(String),
    #[error("auth config missing required field: {0}")]
    MissingField(&'static str),
    #[error("token endpoint returned status {status}: {body}")]
    TokenEndpointFailed { status: u16, body: String },
    #[error("login request failed with status {0}")]
    LoginFailed(u16),
    #[error("http transport error: {0}")]
    Transport(String),
}

#[derive(Debug, Error)]
pub enum SpecParseError {
    #[error("invalid YAML: {0}")]
    InvalidYaml(String),
    #[error("invalid JSON: {0}")]
    InvalidJson(String),
    #[error("document is not a JSON object at its root")]
    NotAnObject,
    #[error("unresolved reference: {0}")]
    UnresolvedRef(String),
    #[error("reference depth exceeded bound while resolving {0}")]
    RefDepthExceeded(String),
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("queue connection error: {0}")]
    QueueConnection(String),
    #[error("database connection error: {0}")]
    DbConnection(String),
    #[error("query failed: {0}")]
    Query(String),
    #[error("malformed job payload: {0}")]
    MalformedJob(String),
}

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("authentication failed during phase {phase}: {source}")]
    Auth {
        phase: &'static str,
        #[source]
        source: AuthError,
    },
    #[error(transparent)]
    Storage(#[from] StorageError),
}

#[derive(Debug, Error)]
pub enum VulxError {
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error(transparent)]
    Spec(#[from] SpecParseError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Orchestrator(#[from] OrchestratorError),
}

pub type VulxResult<T> = Result<T, VulxError>;
