//! LeetCode GraphQL client.

use async_trait::async_trait;
use chrono::DateTime;
use leetnote_core::{parse_unix_timestamp, ProblemMetadata, Submission, TimestampError};
use leetnote_http::JsonClient;
use reqwest::header::HeaderMap;
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{AdapterError, JudgeClient};

pub const LEETCODE_GRAPHQL_URL: &str = "https://leetcode.com/graphql/";

const RECENT_AC_QUERY_NAME: &str = "recentAcSubmissions";
const RECENT_AC_QUERY: &str = r#"
    query recentAcSubmissions($username: String!, $limit: Int!) {
        recentAcSubmissionList(username: $username, limit: $limit) {
            titleSlug
            timestamp
        }
    }
"#;

const QUESTION_QUERY_NAME: &str = "questionData";
const QUESTION_QUERY: &str = r#"
    query questionData($titleSlug: String!) {
        question(titleSlug: $titleSlug) {
            questionId
            title
            difficulty
            similarQuestions
            topicTags {
                name
            }
        }
    }
"#;

#[derive(Debug, Serialize)]
struct GraphQlRequest<'a, V> {
    query: &'a str,
    variables: V,
}

#[derive(Debug, Deserialize)]
struct GraphQlResponse<D> {
    data: Option<D>,
    #[serde(default)]
    errors: Vec<GraphQlError>,
}

#[derive(Debug, Deserialize)]
struct GraphQlError {
    message: String,
}

#[derive(Debug, Serialize)]
struct RecentAcVariables<'a> {
    username: &'a str,
    limit: usize,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RecentAcData {
    recent_ac_submission_list: Option<Vec<RawSubmission>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawSubmission {
    title_slug: String,
    timestamp: RawTimestamp,
}

/// LeetCode sends the timestamp as a decimal string; accept a bare number too.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawTimestamp {
    Text(String),
    Number(i64),
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct QuestionVariables<'a> {
    title_slug: &'a str,
}

#[derive(Debug, Deserialize)]
struct QuestionData {
    question: Option<RawQuestion>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawQuestion {
    question_id: String,
    title: String,
    difficulty: String,
    #[serde(default)]
    topic_tags: Vec<RawTopicTag>,
}

#[derive(Debug, Deserialize)]
struct RawTopicTag {
    name: String,
}

#[derive(Debug, Clone)]
pub struct LeetCodeClient {
    http: JsonClient,
    endpoint: String,
}

impl LeetCodeClient {
    pub fn new(http: JsonClient, endpoint: impl Into<String>) -> Self {
        Self {
            http,
            endpoint: endpoint.into(),
        }
    }

    async fn query<V, D>(&self, name: &'static str, query: &str, variables: V) -> Result<D, AdapterError>
    where
        V: Serialize + Send + Sync,
        D: DeserializeOwned + Send,
    {
        let body = GraphQlRequest { query, variables };
        let resp: GraphQlResponse<D> = self
            .http
            .send_json(Method::POST, &self.endpoint, &HeaderMap::new(), &body)
            .await?;

        if !resp.errors.is_empty() {
            let message = resp
                .errors
                .into_iter()
                .map(|e| e.message)
                .collect::<Vec<_>>()
                .join("; ");
            return Err(AdapterError::GraphQl {
                query: name,
                message,
            });
        }

        resp.data
            .ok_or_else(|| AdapterError::MissingData(name.to_string()))
    }
}

#[async_trait]
impl JudgeClient for LeetCodeClient {
    async fn fetch_recent_submissions(
        &self,
        username: &str,
        limit: usize,
    ) -> Result<Vec<Submission>, AdapterError> {
        let data: RecentAcData = self
            .query(
                RECENT_AC_QUERY_NAME,
                RECENT_AC_QUERY,
                RecentAcVariables { username, limit },
            )
            .await?;
        let raw = data
            .recent_ac_submission_list
            .ok_or_else(|| AdapterError::MissingData(format!("recent submissions of {username}")))?;

        let submissions = raw
            .into_iter()
            .map(|s| -> Result<Submission, AdapterError> {
                let solved_at = match s.timestamp {
                    RawTimestamp::Text(text) => parse_unix_timestamp(&text)?,
                    RawTimestamp::Number(n) => DateTime::from_timestamp(n, 0)
                        .ok_or(TimestampError::OutOfRange(n))?,
                };
                Ok(Submission::new(s.title_slug, solved_at))
            })
            .collect::<Result<Vec<_>, _>>()?;
        debug!(username, count = submissions.len(), "fetched recent submissions");
        Ok(submissions)
    }

    async fn fetch_problem_metadata(&self, slug: &str) -> Result<ProblemMetadata, AdapterError> {
        let data: QuestionData = self
            .query(
                QUESTION_QUERY_NAME,
                QUESTION_QUERY,
                QuestionVariables { title_slug: slug },
            )
            .await?;
        let question = data
            .question
            .ok_or_else(|| AdapterError::MissingData(format!("question {slug}")))?;

        Ok(ProblemMetadata {
            question_id: question.question_id,
            title: question.title,
            difficulty: question.difficulty,
            topic_tags: question.topic_tags.into_iter().map(|t| t.name).collect(),
        })
    }
}
