//! Core domain model for leetnote: submissions, tracker rows and the review ladder.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const CRATE_NAME: &str = "leetnote-core";

/// Source label written on every row this tool creates.
pub const DEFAULT_SOURCE: &str = "Website";

/// Date format used by the tracker's date properties.
pub const REVIEW_DATE_FORMAT: &str = "%Y-%m-%d";

/// One accepted submission from the judge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Submission {
    pub problem_slug: String,
    pub solved_at: DateTime<Utc>,
}

impl Submission {
    pub fn new(problem_slug: impl Into<String>, solved_at: DateTime<Utc>) -> Self {
        Self {
            problem_slug: problem_slug.into(),
            solved_at,
        }
    }
}

/// Point on the spaced-repetition ladder, in days until the next review.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RepetitionStage {
    #[serde(rename = "1")]
    One,
    #[serde(rename = "7")]
    Seven,
    #[serde(rename = "30")]
    Thirty,
    #[serde(rename = "90")]
    Ninety,
    #[serde(rename = "180")]
    OneEighty,
    #[serde(rename = "365")]
    ThreeSixtyFive,
    Done,
}

impl RepetitionStage {
    pub const INITIAL: Self = Self::One;

    /// Next rung of the ladder. `Done` is terminal.
    pub fn next(self) -> Self {
        match self {
            Self::One => Self::Seven,
            Self::Seven => Self::Thirty,
            Self::Thirty => Self::Ninety,
            Self::Ninety => Self::OneEighty,
            Self::OneEighty => Self::ThreeSixtyFive,
            Self::ThreeSixtyFive | Self::Done => Self::Done,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::One => "1",
            Self::Seven => "7",
            Self::Thirty => "30",
            Self::Ninety => "90",
            Self::OneEighty => "180",
            Self::ThreeSixtyFive => "365",
            Self::Done => "Done",
        }
    }

    pub fn is_done(self) -> bool {
        self == Self::Done
    }
}

impl fmt::Display for RepetitionStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown repetition stage {0:?}")]
pub struct UnknownStage(pub String);

impl FromStr for RepetitionStage {
    type Err = UnknownStage;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "1" => Ok(Self::One),
            "7" => Ok(Self::Seven),
            "30" => Ok(Self::Thirty),
            "90" => Ok(Self::Ninety),
            "180" => Ok(Self::OneEighty),
            "365" => Ok(Self::ThreeSixtyFive),
            "Done" => Ok(Self::Done),
            other => Err(UnknownStage(other.to_string())),
        }
    }
}

/// Tracker row as read back from the knowledge base.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackerRow {
    pub id: String,
    pub problem_slug: String,
    pub last_reviewed: Option<NaiveDate>,
    /// `None` when the stored select is empty or not on the ladder.
    pub stage: Option<RepetitionStage>,
    pub level: Option<String>,
    pub title: Option<String>,
    pub source_url: Option<String>,
}

/// Problem details needed to create a new row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ProblemMetadata {
    pub question_id: String,
    pub title: String,
    pub difficulty: String,
    pub topic_tags: Vec<String>,
}

impl ProblemMetadata {
    pub fn display_title(&self) -> String {
        format!("{}. {}", self.question_id, self.title)
    }
}

/// Full property set for a row the tracker does not have yet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NewTrackerRow {
    pub problem_slug: String,
    pub last_reviewed: NaiveDate,
    pub stage: RepetitionStage,
    pub level: String,
    pub source: String,
    pub materials_url: String,
    pub title: String,
}

impl NewTrackerRow {
    pub fn from_metadata(slug: &str, last_reviewed: NaiveDate, metadata: &ProblemMetadata) -> Self {
        Self {
            problem_slug: slug.to_string(),
            last_reviewed,
            stage: RepetitionStage::INITIAL,
            level: metadata.difficulty.clone(),
            source: DEFAULT_SOURCE.to_string(),
            materials_url: problem_url(slug),
            title: metadata.display_title(),
        }
    }
}

/// Partial update for an existing row. `stage: None` leaves the stored stage as is.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RowPatch {
    pub last_reviewed: NaiveDate,
    pub stage: Option<RepetitionStage>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TimestampError {
    #[error("timestamp {0:?} is not an integer")]
    NotAnInteger(String),
    #[error("timestamp {0} is out of range")]
    OutOfRange(i64),
}

/// Parse the judge's decimal Unix-seconds string.
pub fn parse_unix_timestamp(raw: &str) -> Result<DateTime<Utc>, TimestampError> {
    let secs: i64 = raw
        .trim()
        .parse()
        .map_err(|_| TimestampError::NotAnInteger(raw.to_string()))?;
    DateTime::from_timestamp(secs, 0).ok_or(TimestampError::OutOfRange(secs))
}

/// Calendar date of `at` as seen from `zone`.
pub fn review_date<Tz: TimeZone>(at: DateTime<Utc>, zone: &Tz) -> NaiveDate {
    at.with_timezone(zone).date_naive()
}

pub fn format_review_date(date: NaiveDate) -> String {
    date.format(REVIEW_DATE_FORMAT).to_string()
}

pub fn parse_review_date(raw: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(raw.trim(), REVIEW_DATE_FORMAT).ok()
}

pub fn problem_url(slug: &str) -> String {
    format!("https://leetcode.com/problems/{slug}/")
}
