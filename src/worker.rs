// Queue worker & cross-scan reconciler (C8): pops scan jobs off the work
// queue, runs the static analyzer against the submitted OpenAPI document,
// and reconciles the results against prior completed scans of the same
// project+environment so a finding's lifecycle (open, accepted, fixed,
// regressed) survives across runs.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};
use serde::Deserialize;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::config::WorkerConfig;
use crate::error::{StorageError, VulxResult};
use crate::models::{Finding, FindingStatus};
use crate::openapi_scanner::{self, OpenApiScanner};

#[derive(Debug, Deserialize)]
struct ScanJob {
    #[serde(rename = "scanId")]
    scan_id: Uuid,
    #[serde(rename = "specContent")]
    spec_content: Option<String>,
}

/// Prior state of one natural key, carried forward from the most recent
/// row across all of the project+environment's completed scans.
#[derive(Debug, Clone)]
struct PriorFindingState {
    status: FindingStatus,
    resolution_notes: Option<String>,
    assigned_to: Option<String>,
}

pub struct Worker {
    config: WorkerConfig,
    db: PgPool,
    redis: ConnectionManager,
    http: reqwest::Client,
}

impl Worker {
    pub async fn connect(config: WorkerConfig) -> VulxResult<Self> {
        let db = PgPool::connect(&config.storage.postgres_url())
            .await
            .map_err(|e| StorageError::DbConnection(e.to_string()))?;

        let client = Client::open(config.storage.redis_url())
            .map_err(|e| StorageError::QueueConnection(e.to_string()))?;
        let redis = ConnectionManager::new(client)
            .await
            .map_err(|e| StorageError::QueueConnection(e.to_string()))?;

        Ok(Self { config, db, redis, http: reqwest::Client::new() })
    }

    /// Runs forever: blocking pop, process to completion, poll again.
    /// Single-threaded per worker instance; multiple instances may run
    /// concurrently against the same queue.
    pub async fn run(&mut self) -> ! {
        log::info!("worker started, polling queue '{}'", self.config.storage.queue_key);
        loop {
            match self.pop_job().await {
                Ok(Some(job)) => {
                    let scan_id = job.scan_id;
                    if let Err(e) = self.process_job(job).await {
                        log::error!("scan {scan_id}: job processing error: {e}");
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    log::warn!("queue error: {e}, retrying in {}s", self.config.storage.queue_retry_backoff_secs);
                    tokio::time::sleep(Duration::from_secs(self.config.storage.queue_retry_backoff_secs)).await;
                }
            }
        }
    }

    async fn pop_job(&mut self) -> Result<Option<ScanJob>, StorageError> {
        let timeout_secs = self.config.storage.queue_poll_timeout_secs as f64;
        let popped: Option<(String, String)> = self
            .redis
            .blpop(&self.config.storage.queue_key, timeout_secs)
            .await
            .map_err(|e| StorageError::QueueConnection(e.to_string()))?;

        match popped {
            None => Ok(None),
            Some((_key, raw)) => match serde_json::from_str::<ScanJob>(&raw) {
                Ok(job) => Ok(Some(job)),
                Err(e) => {
                    log::warn!("malformed job payload, skipping: {e}");
                    Ok(None)
                }
            },
        }
    }

    async fn process_job(&mut self, job: ScanJob) -> VulxResult<()> {
        let scan_id = job.scan_id;
        log::info!("scan {scan_id}: processing");
        self.set_scan_status(scan_id, "PROCESSING", None).await?;

        match self.run_static_scan(scan_id, &job).await {
            Ok(count) => {
                self.set_scan_status(scan_id, "COMPLETED", Some(Utc::now())).await?;
                log::info!("scan {scan_id}: completed, {count} findings written");
            }
            Err(e) => {
                log::error!("scan {scan_id}: failed: {e}");
                self.set_scan_status(scan_id, "FAILED", None).await?;
            }
        }

        self.notify_scan_complete(scan_id).await;
        Ok(())
    }

    async fn run_static_scan(&self, scan_id: Uuid, job: &ScanJob) -> VulxResult<usize> {
        let spec_content = job
            .spec_content
            .clone()
            .ok_or_else(|| StorageError::MalformedJob("missing specContent".to_string()))?;

        let parsed = openapi_scanner::parse_document(&spec_content)?;
        let resolved = openapi_scanner::resolve_refs(parsed)?;
        let findings = OpenApiScanner::new(resolved).scan();

        let (project_id, environment) = self.fetch_scan_context(scan_id).await?;
        let state_map = self.load_state_map(project_id, &environment).await;

        let mut written = 0;
        for finding in &findings {
            if self.reconcile_and_insert(scan_id, finding, &state_map).await? {
                written += 1;
            }
        }

        Ok(written)
    }

    async fn fetch_scan_context(&self, scan_id: Uuid) -> Result<(Uuid, String), StorageError> {
        let row = sqlx::query(r#"SELECT "projectId", environment FROM "Scan" WHERE id = $1"#)
            .bind(scan_id)
            .fetch_one(&self.db)
            .await
            .map_err(|e| StorageError::Query(e.to_string()))?;

        let project_id: Uuid = row.try_get("projectId").map_err(|e| StorageError::Query(e.to_string()))?;
        let environment: String = row.try_get("environment").map_err(|e| StorageError::Query(e.to_string()))?;
        Ok((project_id, environment))
    }

    /// Most-recent-row-wins state map, scoped to the same project and
    /// environment across all COMPLETED scans. A query failure here is
    /// treated as "no prior state exists" rather than failing the job.
    async fn load_state_map(&self, project_id: Uuid, environment: &str) -> HashMap<(String, String, String), PriorFindingState> {
        let rows = sqlx::query(
            r#"
            SELECT f.type, f.method, f.endpoint, f.status, f."resolutionNotes", f."assignedTo"
            FROM "Finding" f
            JOIN "Scan" s ON f."scanId" = s.id
            WHERE s."projectId" = $1 AND s.environment = $2 AND s.status = 'COMPLETED'
            ORDER BY f."createdAt" DESC
            "#,
        )
        .bind(project_id)
        .bind(environment)
        .fetch_all(&self.db)
        .await;

        let rows = match rows {
            Ok(rows) => rows,
            Err(e) => {
                log::warn!("prior-state lookup failed, treating as no prior state: {e}");
                return HashMap::new();
            }
        };

        let mut state_map = HashMap::new();
        for row in rows {
            let type_: String = row.try_get("type").unwrap_or_default();
            let method: String = row.try_get("method").unwrap_or_default();
            let endpoint: String = row.try_get("endpoint").unwrap_or_default();
            let status_str: String = row.try_get("status").unwrap_or_default();
            let Some(status) = parse_finding_status(&status_str) else { continue };

            let key = (type_, method.to_ascii_uppercase(), endpoint);
            // Ordered by createdAt desc: first occurrence per key is the most recent.
            state_map.entry(key).or_insert(PriorFindingState {
                status,
                resolution_notes: row.try_get("resolutionNotes").ok(),
                assigned_to: row.try_get("assignedTo").ok(),
            });
        }

        state_map
    }

    /// Applies the four-way reconciliation rule and writes (or
    /// suppresses) the row. Returns whether a row was inserted.
    async fn reconcile_and_insert(
        &self,
        scan_id: Uuid,
        finding: &Finding,
        state_map: &HashMap<(String, String, String), PriorFindingState>,
    ) -> Result<bool, StorageError> {
        let key = finding.natural_key();
        let prior = state_map.get(&key);

        let Some((status, resolution_notes, assigned_to)) = reconcile_decision(prior) else {
            return Ok(false);
        };

        sqlx::query(
            r#"
            INSERT INTO "Finding"
                (id, "scanId", type, severity, description, endpoint, method, remediation,
                 "owaspCategory", "cweId", evidence, "createdAt", status, "resolutionNotes", "assignedTo")
            VALUES (gen_random_uuid(), $1, $2, $3, $4, $5, $6, $7, $8, $9, $10, NOW(), $11, $12, $13)
            "#,
        )
        .bind(scan_id)
        .bind(&finding.type_)
        .bind(finding.severity.as_str())
        .bind(&finding.description)
        .bind(&finding.endpoint)
        .bind(&finding.method)
        .bind(&finding.remediation)
        .bind(&finding.owasp_category)
        .bind(&finding.cwe_id)
        .bind(&finding.evidence)
        .bind(finding_status_str(status))
        .bind(&resolution_notes)
        .bind(&assigned_to)
        .execute(&self.db)
        .await
        .map_err(|e| StorageError::Query(e.to_string()))?;

        Ok(true)
    }

    async fn set_scan_status(&self, scan_id: Uuid, status: &str, completed_at: Option<DateTime<Utc>>) -> Result<(), StorageError> {
        let result = if let Some(completed_at) = completed_at {
            sqlx::query(r#"UPDATE "Scan" SET status = $2, "completedAt" = $3 WHERE id = $1"#)
                .bind(scan_id)
                .bind(status)
                .bind(completed_at)
                .execute(&self.db)
                .await
        } else {
            sqlx::query(r#"UPDATE "Scan" SET status = $2 WHERE id = $1"#)
                .bind(scan_id)
                .bind(status)
                .execute(&self.db)
                .await
        };

        result.map(|_| ()).map_err(|e| StorageError::Query(e.to_string()))
    }

    /// Fire-and-forget completion notice; a failure here never affects
    /// the scan's own persisted status.
    async fn notify_scan_complete(&self, scan_id: Uuid) {
        let url = format!("{}/api/internal/notify-scan-complete", self.config.reporting.api_url);
        let result = self
            .http
            .post(&url)
            .json(&serde_json::json!({ "scanId": scan_id }))
            .timeout(Duration::from_secs(5))
            .send()
            .await;

        match result {
            Ok(response) if response.status().is_success() => {}
            Ok(response) => log::warn!("notify-scan-complete returned {}", response.status()),
            Err(e) => log::warn!("notify-scan-complete failed: {e}"),
        }
    }
}

/// The four-way reconciliation rule from §4.8 step 6, pulled out of the
/// async DB call so it can be unit-tested on its own: `None` means
/// "suppress, do not insert"; `Some` carries the status/notes/assignee to
/// write.
fn reconcile_decision(prior: Option<&PriorFindingState>) -> Option<(FindingStatus, Option<String>, Option<String>)> {
    match prior {
        None => Some((FindingStatus::Open, None, None)),
        Some(p) if p.status == FindingStatus::FalsePositive || p.status == FindingStatus::Accepted => None,
        Some(p) if p.status == FindingStatus::Fixed => Some((
            FindingStatus::Open,
            Some("REGRESSION: reappeared after being marked fixed".to_string()),
            p.assigned_to.clone(),
        )),
        Some(p) => Some((p.status, p.resolution_notes.clone(), p.assigned_to.clone())),
    }
}

fn parse_finding_status(s: &str) -> Option<FindingStatus> {
    match s {
        "OPEN" => Some(FindingStatus::Open),
        "IN_PROGRESS" => Some(FindingStatus::InProgress),
        "FIXED" => Some(FindingStatus::Fixed),
        "FALSE_POSITIVE" => Some(FindingStatus::FalsePositive),
        "ACCEPTED" => Some(FindingStatus::Accepted),
        _ => None,
    }
}

fn finding_status_str(status: FindingStatus) -> &'static str {
    match status {
        FindingStatus::Open => "OPEN",
        FindingStatus::InProgress => "IN_PROGRESS",
        FindingStatus::Fixed => "FIXED",
        FindingStatus::FalsePositive => "FALSE_POSITIVE",
        FindingStatus::Accepted => "ACCEPTED",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Confidence, EngineOrigin, Severity};

    fn finding(type_: &str, endpoint: &str, method: &str) -> Finding {
        Finding {
            id: Uuid::new_v4().to_string(),
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
            endpoint: endpoint.to_string(),
            method: method.to_string(),
            parameter: None,
            cwe_id: None,
            cve_id: None,
            owasp_category: None,
            cvss_score: None,
            references: Vec::new(),
            compliance_mappings: Default::default(),
            detected_at: Utc::now(),
        }
    }

    fn state(status: FindingStatus, assigned_to: Option<&str>) -> PriorFindingState {
        PriorFindingState { status, resolution_notes: None, assigned_to: assigned_to.map(str::to_string) }
    }

    #[test]
    fn finding_status_round_trips_through_its_string_form() {
        for status in [
            FindingStatus::Open,
            FindingStatus::InProgress,
            FindingStatus::Fixed,
            FindingStatus::FalsePositive,
            FindingStatus::Accepted,
        ] {
            assert_eq!(parse_finding_status(finding_status_str(status)), Some(status));
        }
    }

    #[test]
    fn new_key_with_no_prior_state_resolves_to_open() {
        let decision = reconcile_decision(None).expect("new finding must be inserted");
        assert_eq!(decision.0, FindingStatus::Open);
        assert!(decision.1.is_none());
        assert!(decision.2.is_none());
    }

    /// Scenario 2: a finding previously marked FALSE_POSITIVE (or
    /// ACCEPTED) must not be re-inserted when it reappears.
    #[test]
    fn suppressed_keys_are_not_reinserted() {
        let false_positive = state(FindingStatus::FalsePositive, None);
        assert!(reconcile_decision(Some(&false_positive)).is_none());

        let accepted = state(FindingStatus::Accepted, None);
        assert!(reconcile_decision(Some(&accepted)).is_none());
    }

    /// Scenario 3: a finding previously marked FIXED that reappears is
    /// inserted OPEN with a "REGRESSION:"-prefixed note and the prior
    /// assignee preserved.
    #[test]
    fn fixed_reappearing_regresses_to_open_and_preserves_assignee() {
        let prior = state(FindingStatus::Fixed, Some("alice"));
        let (status, notes, assigned_to) = reconcile_decision(Some(&prior)).expect("regression must be inserted");
        assert_eq!(status, FindingStatus::Open);
        assert!(notes.unwrap().starts_with("REGRESSION:"));
        assert_eq!(assigned_to.as_deref(), Some("alice"));
    }

    /// OPEN/IN_PROGRESS findings are re-inserted inheriting prior status,
    /// notes, and assignee unchanged.
    #[test]
    fn open_and_in_progress_states_are_inherited_unchanged() {
        let mut prior = state(FindingStatus::InProgress, Some("bob"));
        prior.resolution_notes = Some("investigating".to_string());
        let (status, notes, assigned_to) = reconcile_decision(Some(&prior)).expect("inherited finding must be inserted");
        assert_eq!(status, FindingStatus::InProgress);
        assert_eq!(notes.as_deref(), Some("investigating"));
        assert_eq!(assigned_to.as_deref(), Some("bob"));
    }

    #[test]
    fn suppressed_keys_are_recognized_as_sticky() {
        let f = finding("XSS", "/search", "GET");
        let mut state_map = HashMap::new();
        state_map.insert(f.natural_key(), state(FindingStatus::FalsePositive, None));
        let prior = state_map.get(&f.natural_key()).unwrap();
        assert!(prior.status == FindingStatus::FalsePositive || prior.status == FindingStatus::Accepted);
    }

    #[test]
    fn fixed_reappearing_preserves_assignee() {
        let f = finding("SQL_INJECTION", "/login", "POST");
        let mut state_map = HashMap::new();
        state_map.insert(f.natural_key(), state(FindingStatus::Fixed, Some("alice")));
        let prior = state_map.get(&f.natural_key()).unwrap();
        assert_eq!(prior.status, FindingStatus::Fixed);
        assert_eq!(prior.assigned_to.as_deref(), Some("alice"));
    }
}
