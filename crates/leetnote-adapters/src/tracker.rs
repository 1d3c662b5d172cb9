//! Notion database client for the review tracker.
//!
//! Rows are pages in one database. The properties this client reads and
//! writes are fixed by the tracker template:
//!
//! | property | type |
//! |---|---|
//! | `titleSlug` | rich_text |
//! | `Last Reviewed` | date |
//! | `Repetition Gap` | select |
//! | `Level` | select |
//! | `Source` | select |
//! | `Materials` | files |
//! | `Name` | title |

use std::collections::BTreeSet;

use async_trait::async_trait;
use chrono::NaiveDate;
use leetnote_core::{
    format_review_date, parse_review_date, NewTrackerRow, RepetitionStage, RowPatch, TrackerRow,
};
use leetnote_http::JsonClient;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use reqwest::Method;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::{AdapterError, TrackerClient};

pub const NOTION_API_URL: &str = "https://api.notion.com/v1";
pub const NOTION_VERSION: &str = "2022-02-22";

/// Notion rejects larger query pages.
pub const MAX_PAGE_SIZE: usize = 100;
/// Upper bound on query pages followed in one lookup.
pub const MAX_QUERY_PAGES: usize = 50;

const PROP_SLUG: &str = "titleSlug";
const PROP_LAST_REVIEWED: &str = "Last Reviewed";
const PROP_STAGE: &str = "Repetition Gap";
const PROP_LEVEL: &str = "Level";
const PROP_SOURCE: &str = "Source";
const PROP_MATERIALS: &str = "Materials";
const PROP_NAME: &str = "Name";

#[derive(Debug, Serialize)]
struct QueryRequest<'a> {
    page_size: usize,
    filter: OrFilter<'a>,
    #[serde(skip_serializing_if = "Option::is_none")]
    start_cursor: Option<&'a str>,
}

#[derive(Debug, Serialize)]
struct OrFilter<'a> {
    or: Vec<SlugFilter<'a>>,
}

#[derive(Debug, Serialize)]
struct SlugFilter<'a> {
    property: &'a str,
    rich_text: TextEquals<'a>,
}

#[derive(Debug, Serialize)]
struct TextEquals<'a> {
    equals: &'a str,
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    results: Vec<PageObject>,
    #[serde(default)]
    has_more: bool,
    #[serde(default)]
    next_cursor: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PageObject {
    id: String,
    properties: PageProperties,
}

#[derive(Debug, Deserialize)]
struct PageProperties {
    #[serde(rename = "titleSlug", default)]
    title_slug: Option<RichTextProperty>,
    #[serde(rename = "Last Reviewed", default)]
    last_reviewed: Option<DateProperty>,
    #[serde(rename = "Repetition Gap", default)]
    repetition_gap: Option<SelectProperty>,
    #[serde(rename = "Level", default)]
    level: Option<SelectProperty>,
    #[serde(rename = "Materials", default)]
    materials: Option<FilesProperty>,
    #[serde(rename = "Name", default)]
    name: Option<TitleProperty>,
}

#[derive(Debug, Deserialize)]
struct RichTextProperty {
    #[serde(default)]
    rich_text: Vec<TextItem>,
}

#[derive(Debug, Deserialize)]
struct TitleProperty {
    #[serde(default)]
    title: Vec<TextItem>,
}

#[derive(Debug, Deserialize)]
struct TextItem {
    #[serde(default)]
    plain_text: String,
}

#[derive(Debug, Deserialize)]
struct DateProperty {
    date: Option<DateValue>,
}

#[derive(Debug, Deserialize)]
struct DateValue {
    start: String,
}

#[derive(Debug, Deserialize)]
struct SelectProperty {
    select: Option<SelectValue>,
}

#[derive(Debug, Deserialize)]
struct SelectValue {
    name: String,
}

#[derive(Debug, Deserialize)]
struct FilesProperty {
    #[serde(default)]
    files: Vec<FileObject>,
}

#[derive(Debug, Deserialize)]
struct FileObject {
    #[serde(default)]
    external: Option<ExternalFile>,
}

#[derive(Debug, Deserialize)]
struct ExternalFile {
    url: String,
}

fn plain_text(items: &[TextItem]) -> String {
    items.iter().map(|t| t.plain_text.as_str()).collect()
}

fn select_name(prop: Option<SelectProperty>) -> Option<String> {
    prop.and_then(|p| p.select).map(|s| s.name)
}

impl PageObject {
    fn into_row(self) -> Option<TrackerRow> {
        let props = self.properties;
        let slug = props
            .title_slug
            .map(|p| plain_text(&p.rich_text))
            .unwrap_or_default();
        if slug.is_empty() {
            warn!(page_id = %self.id, "tracker row has no titleSlug; skipping");
            return None;
        }

        let stage_name = select_name(props.repetition_gap);
        let stage = stage_name.as_deref().and_then(|name| match name.parse::<RepetitionStage>() {
            Ok(stage) => Some(stage),
            Err(err) => {
                warn!(page_id = %self.id, %err, "unrecognised repetition stage");
                None
            }
        });

        Some(TrackerRow {
            id: self.id,
            problem_slug: slug,
            last_reviewed: props
                .last_reviewed
                .and_then(|p| p.date)
                .and_then(|d| parse_review_date(&d.start)),
            stage,
            level: select_name(props.level),
            title: props
                .name
                .map(|p| plain_text(&p.title))
                .filter(|t| !t.is_empty()),
            source_url: props
                .materials
                .and_then(|p| p.files.into_iter().find_map(|f| f.external))
                .map(|e| e.url),
        })
    }
}

fn date_property(date: NaiveDate) -> Value {
    json!({ "date": { "start": format_review_date(date) } })
}

fn select_property(name: &str) -> Value {
    json!({ "select": { "name": name } })
}

/// Property map for a brand new tracker row.
pub fn new_row_properties(row: &NewTrackerRow) -> Value {
    json!({
        PROP_SLUG: {
            "rich_text": [{
                "type": "text",
                "text": { "content": row.problem_slug }
            }]
        },
        PROP_LAST_REVIEWED: date_property(row.last_reviewed),
        PROP_STAGE: select_property(row.stage.as_str()),
        PROP_LEVEL: select_property(&row.level),
        PROP_SOURCE: select_property(&row.source),
        PROP_MATERIALS: {
            "files": [{
                "name": row.materials_url,
                "type": "external",
                "external": { "url": row.materials_url }
            }]
        },
        PROP_NAME: {
            "title": [{ "text": { "content": row.title } }]
        }
    })
}

/// Property map for a review-date/stage update.
pub fn patch_properties(patch: &RowPatch) -> Value {
    let mut props = serde_json::Map::new();
    props.insert(PROP_LAST_REVIEWED.to_string(), date_property(patch.last_reviewed));
    if let Some(stage) = patch.stage {
        props.insert(PROP_STAGE.to_string(), select_property(stage.as_str()));
    }
    Value::Object(props)
}

#[derive(Debug, Clone)]
pub struct NotionClient {
    http: JsonClient,
    base_url: String,
    database_id: String,
    headers: HeaderMap,
}

impl NotionClient {
    pub fn new(
        http: JsonClient,
        base_url: impl Into<String>,
        token: &str,
        database_id: impl Into<String>,
    ) -> Result<Self, AdapterError> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        headers.insert(
            HeaderName::from_static("notion-version"),
            HeaderValue::from_static(NOTION_VERSION),
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let mut bearer = HeaderValue::from_str(&format!("Bearer {token}"))
            .map_err(|_| AdapterError::InvalidHeader("Authorization"))?;
        bearer.set_sensitive(true);
        headers.insert(AUTHORIZATION, bearer);

        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            database_id: database_id.into(),
            headers,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

#[async_trait]
impl TrackerClient for NotionClient {
    async fn find_rows_by_slugs(
        &self,
        slugs: &BTreeSet<String>,
        page_size: usize,
    ) -> Result<Vec<TrackerRow>, AdapterError> {
        if slugs.is_empty() {
            return Ok(Vec::new());
        }

        let url = self.url(&format!("/databases/{}/query", self.database_id));
        let filter_clauses = || {
            slugs
                .iter()
                .map(|slug| SlugFilter {
                    property: PROP_SLUG,
                    rich_text: TextEquals { equals: slug },
                })
                .collect::<Vec<_>>()
        };

        let mut rows = Vec::new();
        let mut cursor: Option<String> = None;
        let mut pages = 0usize;
        loop {
            let body = QueryRequest {
                page_size: page_size.clamp(1, MAX_PAGE_SIZE),
                filter: OrFilter {
                    or: filter_clauses(),
                },
                start_cursor: cursor.as_deref(),
            };
            let resp: QueryResponse = self
                .http
                .send_json(Method::POST, &url, &self.headers, &body)
                .await?;
            pages += 1;

            rows.extend(resp.results.into_iter().filter_map(PageObject::into_row));

            match (resp.has_more, resp.next_cursor) {
                (true, Some(next)) => {
                    if cursor.as_deref() == Some(next.as_str()) {
                        return Err(AdapterError::Paging(format!("cursor {next} repeated")));
                    }
                    if pages >= MAX_QUERY_PAGES {
                        return Err(AdapterError::Paging(format!(
                            "more than {MAX_QUERY_PAGES} pages"
                        )));
                    }
                    cursor = Some(next);
                }
                _ => break,
            }
        }

        debug!(slugs = slugs.len(), rows = rows.len(), pages, "queried tracker rows");
        Ok(rows)
    }

    async fn create_row(&self, row: &NewTrackerRow) -> Result<(), AdapterError> {
        let body = json!({
            "parent": { "database_id": self.database_id },
            "properties": new_row_properties(row),
        });
        self.http
            .send(Method::POST, &self.url("/pages/"), &self.headers, &body)
            .await?;
        Ok(())
    }

    async fn patch_row(&self, id: &str, patch: &RowPatch) -> Result<(), AdapterError> {
        let body = json!({ "properties": patch_properties(patch) });
        self.http
            .send(
                Method::PATCH,
                &self.url(&format!("/pages/{id}")),
                &self.headers,
                &body,
            )
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use leetnote_core::ProblemMetadata;
    use leetnote_http::HttpClientConfig;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

    fn client_for(server: &MockServer) -> NotionClient {
        let http = JsonClient::new(HttpClientConfig::default()).expect("http client");
        NotionClient::new(http, server.uri(), "secret-token", "db-123").expect("notion client")
    }

    fn page(id: &str, slug: &str, last_reviewed: &str, stage: &str) -> Value {
        json!({
            "object": "page",
            "id": id,
            "properties": {
                "titleSlug": {"id": "a", "type": "rich_text", "rich_text": [
                    {"type": "text", "text": {"content": slug, "link": null}, "plain_text": slug}
                ]},
                "Last Reviewed": {"id": "b", "type": "date", "date": {"start": last_reviewed, "end": null}},
                "Repetition Gap": {"id": "c", "type": "select", "select": {"name": stage}},
                "Level": {"id": "d", "type": "select", "select": {"name": "Easy"}},
                "Name": {"id": "title", "type": "title", "title": [{"plain_text": "1. Two Sum"}]},
                "Materials": {"id": "e", "type": "files", "files": [
                    {"name": "x", "type": "external", "external": {"url": "https://leetcode.com/problems/two-sum/"}}
                ]}
            }
        })
    }

    /// Serves two result pages, keyed on `start_cursor`.
    struct PagedQuery;

    impl Respond for PagedQuery {
        fn respond(&self, request: &Request) -> ResponseTemplate {
            let body: Value = serde_json::from_slice(&request.body).unwrap_or(Value::Null);
            if body.get("start_cursor").is_none() {
                ResponseTemplate::new(200).set_body_json(json!({
                    "object": "list",
                    "results": [page("p1", "two-sum", "2024-01-01", "7")],
                    "has_more": true,
                    "next_cursor": "cursor-2"
                }))
            } else {
                ResponseTemplate::new(200).set_body_json(json!({
                    "object": "list",
                    "results": [page("p2", "valid-anagram", "2024-01-02", "Done")],
                    "has_more": false,
                    "next_cursor": null
                }))
            }
        }
    }

    #[tokio::test]
    async fn query_sends_headers_and_follows_cursors() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/databases/db-123/query"))
            .and(header("Notion-Version", NOTION_VERSION))
            .and(header("Authorization", "Bearer secret-token"))
            .and(header("Accept", "application/json"))
            .respond_with(PagedQuery)
            .expect(2)
            .mount(&server)
            .await;

        let slugs: BTreeSet<String> = ["two-sum", "valid-anagram"]
            .into_iter()
            .map(String::from)
            .collect();
        let rows = client_for(&server)
            .find_rows_by_slugs(&slugs, 1)
            .await
            .expect("query");

        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].id, "p1");
        assert_eq!(rows[0].problem_slug, "two-sum");
        assert_eq!(rows[0].stage, Some(RepetitionStage::Seven));
        assert_eq!(rows[0].last_reviewed, parse_review_date("2024-01-01"));
        assert_eq!(rows[0].title.as_deref(), Some("1. Two Sum"));
        assert_eq!(
            rows[0].source_url.as_deref(),
            Some("https://leetcode.com/problems/two-sum/")
        );
        assert_eq!(rows[1].stage, Some(RepetitionStage::Done));

        let received = server.received_requests().await.expect("recording on");
        let first: Value = serde_json::from_slice(&received[0].body).expect("json");
        assert_eq!(first["page_size"], 1);
        assert_eq!(
            first["filter"]["or"],
            json!([
                {"property": "titleSlug", "rich_text": {"equals": "two-sum"}},
                {"property": "titleSlug", "rich_text": {"equals": "valid-anagram"}}
            ])
        );
        let second: Value = serde_json::from_slice(&received[1].body).expect("json");
        assert_eq!(second["start_cursor"], "cursor-2");
    }

    #[tokio::test]
    async fn repeated_cursor_stops_paging() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/databases/db-123/query"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "results": [],
                "has_more": true,
                "next_cursor": "same"
            })))
            .expect(2)
            .mount(&server)
            .await;

        let slugs = BTreeSet::from(["two-sum".to_string()]);
        let err = client_for(&server)
            .find_rows_by_slugs(&slugs, 15)
            .await
            .expect_err("stalled cursor");
        assert!(matches!(err, AdapterError::Paging(_)));
    }

    #[tokio::test]
    async fn empty_slug_set_skips_the_request() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .expect(0)
            .mount(&server)
            .await;

        let rows = client_for(&server)
            .find_rows_by_slugs(&BTreeSet::new(), 15)
            .await
            .expect("no-op");
        assert!(rows.is_empty());
    }

    #[tokio::test]
    async fn rows_without_slug_or_known_stage_are_tolerated() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "results": [
                    {"id": "blank", "properties": {"titleSlug": {"rich_text": []}}},
                    page("odd", "two-sum", "not-a-date", "14")
                ],
                "has_more": false
            })))
            .mount(&server)
            .await;

        let slugs = BTreeSet::from(["two-sum".to_string()]);
        let rows = client_for(&server)
            .find_rows_by_slugs(&slugs, 15)
            .await
            .expect("query");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].id, "odd");
        assert_eq!(rows[0].stage, None);
        assert_eq!(rows[0].last_reviewed, None);
    }

    #[tokio::test]
    async fn create_posts_full_property_set() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/pages/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"object": "page", "id": "new"})))
            .expect(1)
            .mount(&server)
            .await;

        let metadata = ProblemMetadata {
            question_id: "1".into(),
            title: "Two Sum".into(),
            difficulty: "Easy".into(),
            topic_tags: vec![],
        };
        let date = parse_review_date("1970-01-01").expect("date");
        let row = NewTrackerRow::from_metadata("two-sum", date, &metadata);
        client_for(&server).create_row(&row).await.expect("create");

        let received = server.received_requests().await.expect("recording on");
        let body: Value = serde_json::from_slice(&received[0].body).expect("json");
        assert_eq!(body["parent"]["database_id"], "db-123");
        let props = &body["properties"];
        assert_eq!(props["titleSlug"]["rich_text"][0]["text"]["content"], "two-sum");
        assert_eq!(props["Last Reviewed"]["date"]["start"], "1970-01-01");
        assert_eq!(props["Repetition Gap"]["select"]["name"], "1");
        assert_eq!(props["Level"]["select"]["name"], "Easy");
        assert_eq!(props["Source"]["select"]["name"], "Website");
        assert_eq!(
            props["Materials"]["files"][0]["external"]["url"],
            "https://leetcode.com/problems/two-sum/"
        );
        assert_eq!(props["Name"]["title"][0]["text"]["content"], "1. Two Sum");
    }

    #[tokio::test]
    async fn patch_targets_page_and_omits_unknown_stage() {
        let server = MockServer::start().await;
        Mock::given(method("PATCH"))
            .and(path("/pages/p1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"object": "page", "id": "p1"})))
            .expect(2)
            .mount(&server)
            .await;

        let client = client_for(&server);
        let date = parse_review_date("2024-02-02").expect("date");
        client
            .patch_row(
                "p1",
                &RowPatch {
                    last_reviewed: date,
                    stage: Some(RepetitionStage::Ninety),
                },
            )
            .await
            .expect("patch");
        client
            .patch_row(
                "p1",
                &RowPatch {
                    last_reviewed: date,
                    stage: None,
                },
            )
            .await
            .expect("patch");

        let received = server.received_requests().await.expect("recording on");
        let with_stage: Value = serde_json::from_slice(&received[0].body).expect("json");
        assert_eq!(with_stage["properties"]["Last Reviewed"]["date"]["start"], "2024-02-02");
        assert_eq!(with_stage["properties"]["Repetition Gap"]["select"]["name"], "90");
        let without_stage: Value = serde_json::from_slice(&received[1].body).expect("json");
        assert!(without_stage["properties"].get("Repetition Gap").is_none());
    }

    #[tokio::test]
    async fn tracker_error_status_propagates() {
        let server = MockServer::start().await;
        Mock::given(method("PATCH"))
            .respond_with(ResponseTemplate::new(401).set_body_string("unauthorized"))
            .mount(&server)
            .await;

        let date = parse_review_date("2024-02-02").expect("date");
        let err = client_for(&server)
            .patch_row("p1", &RowPatch { last_reviewed: date, stage: None })
            .await
            .expect_err("401");
        assert!(matches!(err, AdapterError::Http(_)));
    }
}
