//! Client contracts for the judge and tracker services, plus their HTTP implementations.

use std::collections::BTreeSet;

use async_trait::async_trait;
use leetnote_core::{
    NewTrackerRow, ProblemMetadata, RowPatch, Submission, TimestampError, TrackerRow,
};
use leetnote_http::HttpError;
use thiserror::Error;

pub mod judge;
pub mod tracker;

pub use judge::{LeetCodeClient, LEETCODE_GRAPHQL_URL};
pub use tracker::{NotionClient, NOTION_API_URL, NOTION_VERSION};

pub const CRATE_NAME: &str = "leetnote-adapters";

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error(transparent)]
    Http(#[from] HttpError),
    #[error("graphql query {query} failed: {message}")]
    GraphQl { query: &'static str, message: String },
    #[error("judge returned no data for {0}")]
    MissingData(String),
    #[error("bad submission timestamp: {0}")]
    Timestamp(#[from] TimestampError),
    #[error("invalid header value for {0}")]
    InvalidHeader(&'static str),
    #[error("tracker query paging stalled: {0}")]
    Paging(String),
}

/// Read side of the judge platform.
#[async_trait]
pub trait JudgeClient: Send + Sync {
    /// Recent accepted submissions, in whatever order the platform returns them.
    async fn fetch_recent_submissions(
        &self,
        username: &str,
        limit: usize,
    ) -> Result<Vec<Submission>, AdapterError>;

    async fn fetch_problem_metadata(&self, slug: &str) -> Result<ProblemMetadata, AdapterError>;
}

/// Read/write side of the spaced-repetition tracker.
#[async_trait]
pub trait TrackerClient: Send + Sync {
    /// Every row whose slug exactly matches one of `slugs`. An empty set yields no rows.
    async fn find_rows_by_slugs(
        &self,
        slugs: &BTreeSet<String>,
        page_size: usize,
    ) -> Result<Vec<TrackerRow>, AdapterError>;

    async fn create_row(&self, row: &NewTrackerRow) -> Result<(), AdapterError>;

    async fn patch_row(&self, id: &str, patch: &RowPatch) -> Result<(), AdapterError>;
}
