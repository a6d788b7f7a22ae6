#![allow(unused)]

//! # contract: interfaces to the remote collaborators
//!
//! The pipeline talks to three outside systems, each behind a trait defined here:
//!
//! - [`ContentSource`]: the document store (query unsynced documents, list a
//!   block's children, set the checkpoint flag).
//! - [`MediaFetcher`] and [`MediaStore`]: fetching media bytes from their source
//!   URL and storing them with the target platform.
//! - [`Publisher`]: creating a draft of an assembled article on the target
//!   platform and submitting it.
//!
//! Records cross the source boundary as raw JSON (`serde_json::Value`); parsing
//! into the domain model happens inside the pipeline so that one malformed record
//! only costs its own document.
//!
//! ## Mocking & Testing
//! - Every trait is annotated for `mockall`, exported under the
//!   `test-export-mocks` feature so integration tests can script remote behaviour.

use async_trait::async_trait;
use bytes::Bytes;
use serde::Serialize;
use serde_json::Value;

use mockall::{automock, predicate::*};

pub use crate::error::{PublishError, RemoteError};
use crate::error::MediaError;
use crate::media::MediaLimits;
use crate::model::{MediaKind, Page, PageRequest};
use crate::schema::DocumentFilter;

/// Media bytes that passed size and type validation.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchedMedia {
    pub source_url: String,
    pub content_type: Option<String>,
    pub bytes: Bytes,
}

/// Article submitted to the target platform.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PublishPayload {
    pub title: String,
    pub author: String,
    pub digest: String,
    /// Rendered markup.
    pub content: String,
    pub content_source_url: String,
    /// Storage reference of the cover image.
    pub cover_reference: String,
}

/// What the target platform returned for a publish.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PublishReceipt {
    pub publish_id: String,
}

/// Document store holding the source documents and their block trees.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait ContentSource: Send + Sync {
    /// One page of documents matching `filter`, as raw records.
    async fn query_documents(
        &self,
        filter: &DocumentFilter,
        page: &PageRequest,
    ) -> Result<Page<Value>, RemoteError>;

    /// One page of the direct children of `block_id`, as raw block objects.
    async fn list_children(
        &self,
        block_id: &str,
        page: &PageRequest,
    ) -> Result<Page<Value>, RemoteError>;

    /// Set the checkbox property `synced_property` of a document to true.
    async fn mark_synced(&self, document_id: &str, synced_property: &str)
        -> Result<(), RemoteError>;
}

/// Downloads media from its source URL under the given limits.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait MediaFetcher: Send + Sync {
    async fn fetch(&self, url: &str, limits: &MediaLimits) -> Result<FetchedMedia, MediaError>;
}

/// Stores media with the target platform and returns an opaque reference.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait MediaStore: Send + Sync {
    async fn store(&self, media: &FetchedMedia, kind: MediaKind) -> Result<String, RemoteError>;
}

/// Submits articles to the target platform in two steps, each retried on its own:
/// a draft is created once, then submitted for publication.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait Publisher: Send + Sync {
    /// Create a draft article and return its id.
    async fn create_draft(&self, payload: &PublishPayload) -> Result<String, PublishError>;

    /// Publish the draft `draft_id`.
    async fn submit(&self, draft_id: &str) -> Result<PublishReceipt, PublishError>;
}
