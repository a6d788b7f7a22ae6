//! # Notion content source
//!
//! [`NotionClient`] implements the core [`ContentSource`] trait against the Notion
//! REST API:
//!
//! - `POST /databases/{id}/query` lists documents whose checkpoint checkbox is unset
//! - `GET /blocks/{id}/children` lists one page of a block's children
//! - `PATCH /pages/{id}` sets the checkpoint checkbox
//!
//! Records are handed to the pipeline as raw JSON; only the pagination envelope
//! is interpreted here.

use async_trait::async_trait;
use blockpress_core::contract::{ContentSource, RemoteError};
use blockpress_core::model::{Page, PageRequest};
use blockpress_core::schema::{DocumentFilter, FilterPredicate};
use reqwest::{Method, RequestBuilder, Response};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::load_config::SourceSection;

pub struct NotionClient {
    http: reqwest::Client,
    api_base: String,
    notion_version: String,
    api_key: String,
    database_id: String,
}

#[derive(Deserialize)]
struct ListEnvelope {
    #[serde(default)]
    results: Vec<Value>,
    #[serde(default)]
    has_more: bool,
    #[serde(default)]
    next_cursor: Option<String>,
}

impl From<ListEnvelope> for Page<Value> {
    fn from(envelope: ListEnvelope) -> Self {
        Page {
            results: envelope.results,
            has_more: envelope.has_more,
            next_cursor: envelope.next_cursor,
        }
    }
}

impl NotionClient {
    pub fn new(section: &SourceSection) -> Self {
        tracing::info!(
            api_base = %section.api_base,
            notion_version = %section.notion_version,
            api_key_set = !section.api_key.is_empty(),
            "Initialised Notion client"
        );
        Self {
            http: reqwest::Client::new(),
            api_base: section.api_base.trim_end_matches('/').to_string(),
            notion_version: section.notion_version.clone(),
            api_key: section.api_key.clone(),
            database_id: section.database_id.clone(),
        }
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.http
            .request(method, format!("{}{}", self.api_base, path))
            .bearer_auth(&self.api_key)
            .header("Notion-Version", &self.notion_version)
    }

    async fn send(&self, request: RequestBuilder, operation: &'static str) -> Result<Value, RemoteError> {
        let response = request.send().await.map_err(|e| {
            tracing::error!(operation, error = %e, "Notion request failed");
            e
        })?;
        read_json(response, operation).await
    }
}

/// Parse a Notion response. A success status with a body that is not JSON is an
/// error, so a garbled reply never counts as a confirmed write.
async fn read_json(response: Response, operation: &'static str) -> Result<Value, RemoteError> {
    let status = response.status();
    let text = response.text().await?;
    let body = match serde_json::from_str::<Value>(&text) {
        Ok(body) => body,
        Err(e) => {
            tracing::error!(operation, status = status.as_u16(), error = %e, "Notion response body is not JSON");
            if status.is_success() {
                return Err(format!("Notion {operation} returned an unreadable body: {e}").into());
            }
            Value::Null
        }
    };
    if status.is_success() {
        return Ok(body);
    }
    let message = body
        .get("message")
        .and_then(Value::as_str)
        .unwrap_or("no message");
    tracing::error!(operation, status = status.as_u16(), api_message = message, "Notion API returned an error");
    Err(format!("Notion {operation} returned HTTP {}: {message}", status.as_u16()).into())
}

/// Notion filter object for `filter`.
pub fn query_filter(filter: &DocumentFilter) -> Value {
    let mut conditions = vec![json!({
        "property": filter.synced_property,
        "checkbox": { "equals": false }
    })];
    conditions.extend(filter.predicates.iter().map(|predicate| match predicate {
        FilterPredicate::Checkbox { property, equals } => json!({
            "property": property,
            "checkbox": { "equals": equals }
        }),
        FilterPredicate::Select { property, equals } => json!({
            "property": property,
            "select": { "equals": equals }
        }),
    }));
    if conditions.len() == 1 {
        conditions.remove(0)
    } else {
        json!({ "and": conditions })
    }
}

#[async_trait]
impl ContentSource for NotionClient {
    async fn query_documents(
        &self,
        filter: &DocumentFilter,
        page: &PageRequest,
    ) -> Result<Page<Value>, RemoteError> {
        let mut body = json!({
            "filter": query_filter(filter),
            "page_size": page.page_size,
        });
        if let Some(cursor) = &page.cursor {
            body["start_cursor"] = json!(cursor);
        }
        tracing::debug!(database_id = %self.database_id, cursor = ?page.cursor, "Querying Notion database");
        let request = self
            .request(Method::POST, &format!("/databases/{}/query", self.database_id))
            .json(&body);
        let value = self.send(request, "query_documents").await?;
        let envelope: ListEnvelope = serde_json::from_value(value)?;
        Ok(envelope.into())
    }

    async fn list_children(
        &self,
        block_id: &str,
        page: &PageRequest,
    ) -> Result<Page<Value>, RemoteError> {
        let mut query = vec![("page_size", page.page_size.to_string())];
        if let Some(cursor) = &page.cursor {
            query.push(("start_cursor", cursor.clone()));
        }
        let request = self
            .request(Method::GET, &format!("/blocks/{block_id}/children"))
            .query(&query);
        let value = self.send(request, "list_children").await?;
        let envelope: ListEnvelope = serde_json::from_value(value)?;
        Ok(envelope.into())
    }

    async fn mark_synced(&self, document_id: &str, synced_property: &str) -> Result<(), RemoteError> {
        let body = json!({
            "properties": { synced_property: { "checkbox": true } }
        });
        let request = self
            .request(Method::PATCH, &format!("/pages/{document_id}"))
            .json(&body);
        self.send(request, "mark_synced").await?;
        tracing::info!(document_id, synced_property, "Checkpoint flag set");
        Ok(())
    }
}
