//! Mapping between source document records and [`Document`].
//!
//! The source exposes documents as records with named, typed properties. One
//! canonical [`DocumentSchema`] says which property plays which role; a record
//! that does not satisfy it is a validation failure for that document only.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::DocumentError;
use crate::model::{file_url, parse_rich_text, ContentTree, Document, MediaDescriptor, MediaKind};

/// Property names of the canonical document schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DocumentSchema {
    /// Title property. When unset, the record's single `title`-typed property is used.
    pub title_property: Option<String>,
    /// Checkbox marking a document as synchronised.
    pub synced_property: String,
    pub author_property: Option<String>,
    pub summary_property: Option<String>,
    /// URL property linking back to the original. Falls back to the record URL.
    pub source_url_property: Option<String>,
    /// Files property holding the cover. Falls back to the record's page cover.
    pub cover_property: Option<String>,
    /// Further predicates every synchronised document must match.
    pub extra_filters: Vec<FilterPredicate>,
}

impl Default for DocumentSchema {
    fn default() -> Self {
        Self {
            title_property: None,
            synced_property: "Synced".to_string(),
            author_property: Some("Author".to_string()),
            summary_property: Some("Summary".to_string()),
            source_url_property: None,
            cover_property: None,
            extra_filters: Vec::new(),
        }
    }
}

/// A property predicate applied by the source when querying documents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FilterPredicate {
    Checkbox { property: String, equals: bool },
    Select { property: String, equals: String },
}

/// Query filter: documents whose checkpoint is unset and which match every predicate.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DocumentFilter {
    pub synced_property: String,
    pub predicates: Vec<FilterPredicate>,
}

impl DocumentSchema {
    pub fn unsynced_filter(&self) -> DocumentFilter {
        DocumentFilter {
            synced_property: self.synced_property.clone(),
            predicates: self.extra_filters.clone(),
        }
    }

    /// Validate a raw record into a [`Document`] with an empty body.
    pub fn parse(&self, record: &Value, default_author: &str) -> Result<Document, DocumentError> {
        let id = document_id(record).ok_or_else(|| DocumentError::Malformed {
            reason: "record has no id".to_string(),
        })?;
        let properties = record
            .get("properties")
            .and_then(Value::as_object)
            .ok_or_else(|| DocumentError::Malformed {
                reason: format!("record {id} has no properties"),
            })?;

        let title_value = match &self.title_property {
            Some(name) => properties.get(name),
            None => properties
                .values()
                .find(|p| p.get("type").and_then(Value::as_str) == Some("title")),
        };
        let title = title_value
            .and_then(property_text)
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .ok_or(DocumentError::MissingField { field: "title" })?;

        let author = self
            .author_property
            .as_ref()
            .and_then(|name| properties.get(name))
            .and_then(property_text)
            .map(|a| a.trim().to_string())
            .filter(|a| !a.is_empty())
            .unwrap_or_else(|| default_author.to_string());

        let summary = self
            .summary_property
            .as_ref()
            .and_then(|name| properties.get(name))
            .and_then(property_text)
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());

        let source_url = self
            .source_url_property
            .as_ref()
            .and_then(|name| properties.get(name))
            .and_then(property_text)
            .filter(|u| !u.is_empty())
            .or_else(|| record.get("url").and_then(Value::as_str).map(str::to_string))
            .unwrap_or_default();

        let cover_url = match &self.cover_property {
            Some(name) => properties.get(name).and_then(first_file_url),
            None => record.get("cover").and_then(file_url),
        };

        let synced = properties
            .get(&self.synced_property)
            .and_then(|p| p.get("checkbox"))
            .and_then(Value::as_bool)
            .unwrap_or(false);

        Ok(Document {
            id: id.to_string(),
            title,
            author,
            summary,
            cover: cover_url.map(|url| MediaDescriptor {
                url,
                kind: MediaKind::Cover,
            }),
            source_url,
            synced,
            content: ContentTree::new(),
        })
    }
}

/// Identifier of a raw record, if it has one.
pub fn document_id(record: &Value) -> Option<&str> {
    record
        .get("id")
        .and_then(Value::as_str)
        .filter(|id| !id.is_empty())
}

/// Text value of a title, rich_text, url, email, or select property.
fn property_text(property: &Value) -> Option<String> {
    let property_type = property.get("type").and_then(Value::as_str)?;
    let value = property.get(property_type)?;
    match property_type {
        "title" | "rich_text" => parse_rich_text(Some(value))
            .ok()
            .map(|runs| runs.into_iter().map(|r| r.text).collect::<String>()),
        "url" | "email" | "phone_number" => value.as_str().map(str::to_string),
        "select" => value.get("name").and_then(Value::as_str).map(str::to_string),
        _ => None,
    }
}

fn first_file_url(property: &Value) -> Option<String> {
    property
        .get("files")
        .and_then(Value::as_array)
        .and_then(|files| files.iter().find_map(file_url))
}
