//! Reconciliation of recent judge submissions against tracker rows.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, FixedOffset, Local, NaiveDate, Utc};
use leetnote_adapters::{
    AdapterError, JudgeClient, LeetCodeClient, NotionClient, TrackerClient, LEETCODE_GRAPHQL_URL,
    NOTION_API_URL,
};
use leetnote_core::{review_date, NewTrackerRow, RowPatch, Submission, TrackerRow};
use leetnote_http::{HttpClientConfig, JsonClient, DEFAULT_USER_AGENT};
use serde::Serialize;
use thiserror::Error;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

pub const CRATE_NAME: &str = "leetnote-sync";

pub const DEFAULT_SUBMISSION_LIMIT: usize = 15;

#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub leetcode_username: String,
    pub notion_token: String,
    pub notion_database_id: String,
    pub submission_limit: usize,
    pub http_timeout_secs: u64,
    pub user_agent: String,
    pub leetcode_url: String,
    pub notion_url: String,
    /// Fixed zone for review dates. `None` uses the host's local zone.
    pub review_offset: Option<FixedOffset>,
    pub scheduler_enabled: bool,
    pub sync_cron: String,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            leetcode_username: String::new(),
            notion_token: String::new(),
            notion_database_id: String::new(),
            submission_limit: DEFAULT_SUBMISSION_LIMIT,
            http_timeout_secs: 60,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            leetcode_url: LEETCODE_GRAPHQL_URL.to_string(),
            notion_url: NOTION_API_URL.to_string(),
            review_offset: None,
            scheduler_enabled: false,
            sync_cron: "0 0 6 * * *".to_string(),
        }
    }
}

impl SyncConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            leetcode_username: std::env::var("LC_USERNAME").unwrap_or_default(),
            notion_token: std::env::var("PERSONAL_NOTION_TOKEN").unwrap_or_default(),
            notion_database_id: std::env::var("PERSONAL_DB_ID").unwrap_or_default(),
            submission_limit: std::env::var("LEETNOTE_SUBMISSION_LIMIT")
                .ok()
                .and_then(|v| v.parse().ok())
                .filter(|n: &usize| *n > 0)
                .unwrap_or(defaults.submission_limit),
            http_timeout_secs: std::env::var("LEETNOTE_HTTP_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.http_timeout_secs),
            user_agent: std::env::var("LEETNOTE_USER_AGENT").unwrap_or(defaults.user_agent),
            leetcode_url: std::env::var("LEETNOTE_LEETCODE_URL").unwrap_or(defaults.leetcode_url),
            notion_url: std::env::var("LEETNOTE_NOTION_URL").unwrap_or(defaults.notion_url),
            review_offset: std::env::var("LEETNOTE_UTC_OFFSET_MINUTES")
                .ok()
                .and_then(|v| v.parse::<i32>().ok())
                .and_then(|minutes| minutes.checked_mul(60))
                .and_then(FixedOffset::east_opt)
                .or(defaults.review_offset),
            scheduler_enabled: std::env::var("LEETNOTE_SCHEDULER_ENABLED")
                .map(|v| matches!(v.as_str(), "1" | "true" | "TRUE" | "True"))
                .unwrap_or(false),
            sync_cron: std::env::var("LEETNOTE_SYNC_CRON").unwrap_or(defaults.sync_cron),
        }
    }

    /// Names of required settings that are empty. Not fatal: the run fails downstream.
    pub fn missing_required(&self) -> Vec<&'static str> {
        [
            ("LC_USERNAME", &self.leetcode_username),
            ("PERSONAL_NOTION_TOKEN", &self.notion_token),
            ("PERSONAL_DB_ID", &self.notion_database_id),
        ]
        .into_iter()
        .filter(|(_, value)| value.trim().is_empty())
        .map(|(name, _)| name)
        .collect()
    }
}

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("fetching recent submissions failed: {0}")]
    Submissions(#[source] AdapterError),
    #[error("querying tracker rows failed: {0}")]
    Query(#[source] AdapterError),
    #[error("updating tracker row {id} ({slug}) failed: {source}")]
    Patch {
        id: String,
        slug: String,
        #[source]
        source: AdapterError,
    },
    #[error("fetching metadata for {slug} failed: {source}")]
    Metadata {
        slug: String,
        #[source]
        source: AdapterError,
    },
    #[error("creating tracker row for {slug} failed: {source}")]
    Create {
        slug: String,
        #[source]
        source: AdapterError,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub submissions: usize,
    pub distinct_slugs: usize,
    pub matched: usize,
    pub patched: usize,
    pub unchanged: usize,
    pub created: usize,
}

/// Collapse submissions to one timestamp per slug, keeping the earliest solve.
pub fn earliest_by_slug(submissions: &[Submission]) -> BTreeMap<String, DateTime<Utc>> {
    let mut out: BTreeMap<String, DateTime<Utc>> = BTreeMap::new();
    for sub in submissions.iter().rev() {
        out.entry(sub.problem_slug.clone())
            .and_modify(|at| *at = (*at).min(sub.solved_at))
            .or_insert(sub.solved_at);
    }
    out
}

/// Patch needed to move `row` to `review_date`, or `None` when it is already there.
pub fn plan_patch(row: &TrackerRow, review_date: NaiveDate) -> Option<RowPatch> {
    if row.last_reviewed == Some(review_date) {
        return None;
    }
    Some(RowPatch {
        last_reviewed: review_date,
        stage: row.stage.map(|stage| stage.next()),
    })
}

pub struct Reconciler {
    judge: Arc<dyn JudgeClient>,
    tracker: Arc<dyn TrackerClient>,
    username: String,
    limit: usize,
    review_offset: Option<FixedOffset>,
}

impl Reconciler {
    pub fn new(
        judge: Arc<dyn JudgeClient>,
        tracker: Arc<dyn TrackerClient>,
        username: impl Into<String>,
        limit: usize,
    ) -> Self {
        Self {
            judge,
            tracker,
            username: username.into(),
            limit: limit.max(1),
            review_offset: None,
        }
    }

    pub fn with_review_offset(mut self, offset: Option<FixedOffset>) -> Self {
        self.review_offset = offset;
        self
    }

    fn review_date_of(&self, at: DateTime<Utc>) -> NaiveDate {
        match &self.review_offset {
            Some(offset) => review_date(at, offset),
            None => review_date(at, &Local),
        }
    }

    /// Wire the LeetCode and Notion clients described by `config`.
    pub fn from_config(config: &SyncConfig) -> Result<Self> {
        let http = JsonClient::new(HttpClientConfig {
            timeout: Duration::from_secs(config.http_timeout_secs),
            user_agent: Some(config.user_agent.clone()),
        })?;
        let judge = LeetCodeClient::new(http.clone(), config.leetcode_url.clone());
        let tracker = NotionClient::new(
            http,
            config.notion_url.clone(),
            &config.notion_token,
            config.notion_database_id.clone(),
        )
        .context("building notion client")?;

        Ok(Self::new(
            Arc::new(judge),
            Arc::new(tracker),
            config.leetcode_username.clone(),
            config.submission_limit,
        )
        .with_review_offset(config.review_offset))
    }

    pub async fn run_once(&self) -> Result<RunSummary, SyncError> {
        let run_id = Uuid::new_v4();
        let span = info_span!("sync_run", %run_id, username = %self.username);
        self.run(run_id).instrument(span).await
    }

    async fn run(&self, run_id: Uuid) -> Result<RunSummary, SyncError> {
        let started_at = Utc::now();
        let mut summary = RunSummary {
            run_id,
            started_at,
            finished_at: started_at,
            submissions: 0,
            distinct_slugs: 0,
            matched: 0,
            patched: 0,
            unchanged: 0,
            created: 0,
        };

        let submissions = self
            .judge
            .fetch_recent_submissions(&self.username, self.limit)
            .await
            .map_err(SyncError::Submissions)?;
        summary.submissions = submissions.len();

        let mut pending = earliest_by_slug(&submissions);
        summary.distinct_slugs = pending.len();
        if pending.is_empty() {
            info!("no recent submissions; nothing to reconcile");
            summary.finished_at = Utc::now();
            return Ok(summary);
        }

        let slugs: BTreeSet<String> = pending.keys().cloned().collect();
        let rows = self
            .tracker
            .find_rows_by_slugs(&slugs, self.limit)
            .await
            .map_err(SyncError::Query)?;

        for row in rows {
            let Some(solved_at) = pending.remove(&row.problem_slug) else {
                warn!(
                    row_id = %row.id,
                    slug = %row.problem_slug,
                    "ignoring duplicate or unrequested tracker row"
                );
                continue;
            };
            summary.matched += 1;

            let date = self.review_date_of(solved_at);
            match plan_patch(&row, date) {
                Some(patch) => {
                    if row.stage.is_none() {
                        warn!(slug = %row.problem_slug, "row has no usable stage; refreshing date only");
                    }
                    self.tracker
                        .patch_row(&row.id, &patch)
                        .await
                        .map_err(|source| SyncError::Patch {
                            id: row.id.clone(),
                            slug: row.problem_slug.clone(),
                            source,
                        })?;
                    info!(
                        slug = %row.problem_slug,
                        review_date = %date,
                        stage = ?patch.stage,
                        "advanced tracker row"
                    );
                    summary.patched += 1;
                }
                None => {
                    debug!(slug = %row.problem_slug, "tracker row already up to date");
                    summary.unchanged += 1;
                }
            }
        }

        for (slug, solved_at) in &pending {
            let metadata = self
                .judge
                .fetch_problem_metadata(slug)
                .await
                .map_err(|source| SyncError::Metadata {
                    slug: slug.clone(),
                    source,
                })?;
            let row = NewTrackerRow::from_metadata(
                slug,
                self.review_date_of(*solved_at),
                &metadata,
            );
            self.tracker
                .create_row(&row)
                .await
                .map_err(|source| SyncError::Create {
                    slug: slug.clone(),
                    source,
                })?;
            info!(slug = %slug, title = %row.title, "created tracker row");
            summary.created += 1;
        }

        summary.finished_at = Utc::now();
        info!(
            submissions = summary.submissions,
            matched = summary.matched,
            patched = summary.patched,
            unchanged = summary.unchanged,
            created = summary.created,
            "sync run complete"
        );
        Ok(summary)
    }
}

pub async fn run_sync_once(config: &SyncConfig) -> Result<RunSummary> {
    let reconciler = Reconciler::from_config(config)?;
    Ok(reconciler.run_once().await?)
}

/// Cron-driven runs, for deployments without an external trigger.
pub async fn maybe_build_scheduler(
    config: &SyncConfig,
    reconciler: Arc<Reconciler>,
) -> Result<Option<JobScheduler>> {
    if !config.scheduler_enabled {
        return Ok(None);
    }

    let sched = JobScheduler::new().await.context("creating scheduler")?;
    let cron = config.sync_cron.as_str();
    let job = Job::new_async(cron, move |_uuid, _l| {
        let reconciler = Arc::clone(&reconciler);
        Box::pin(async move {
            if let Err(err) = reconciler.run_once().await {
                error!(error = %err, "scheduled sync run failed");
            }
        })
    })
    .with_context(|| format!("creating scheduler job for cron {cron}"))?;
    sched.add(job).await.context("adding scheduler job")?;
    info!(cron, "sync scheduler configured");
    Ok(Some(sched))
}
