//! High-level pipeline: list unsynced documents → fetch → render → publish → checkpoint.
//!
//! This module provides the orchestration of one synchronisation run. A run:
//!   - Pages through the source's documents whose checkpoint flag is unset
//!   - For each document, strictly one at a time: validates the record, fetches
//!     its block tree, renders it (relaying inline images), relays the cover,
//!     publishes the article and sets the checkpoint flag
//!   - Pauses after every document and between pages to stay under the source's
//!     rate limits
//!   - Returns a [`SynchroniseReport`] of what was published and what was skipped
//!
//! # Error Handling
//! Failures inside one document are caught at the document boundary: the document
//! is logged and reported as skipped, its checkpoint stays unset (so the next run
//! picks it up again), and the batch continues. Only a failure of the document
//! listing itself aborts the run with a [`SyncError`].
//!
//! # Navigation
//! - Main entrypoint: [`Synchroniser::run`]
//! - Supporting types: [`SynchroniseReport`], [`PublishedDocument`], [`SkippedDocument`]

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::backoff::warn_on_retry;
use crate::config::SyncConfig;
use crate::contract::{
    ContentSource, MediaFetcher, MediaStore, PublishError, PublishPayload, Publisher,
};
use crate::error::{DocumentError, SkipStage, SyncError};
use crate::fetch::TreeFetcher;
use crate::media::MediaRelay;
use crate::model::{Document, PageRequest};
use crate::render::{plain_text_excerpt, truncate_chars, ContentRenderer};
use crate::schema;

/// Outcome of one run.
#[derive(Debug, Default, Serialize)]
pub struct SynchroniseReport {
    pub published: Vec<PublishedDocument>,
    pub skipped: Vec<SkippedDocument>,
}

impl SynchroniseReport {
    /// Number of documents published and checkpointed in this run.
    pub fn processed(&self) -> usize {
        self.published.len()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PublishedDocument {
    pub document_id: String,
    pub title: String,
    pub publish_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SkippedDocument {
    pub document_id: String,
    pub stage: SkipStage,
    pub reason: String,
}

/// Client handles plus configuration for synchronisation runs.
pub struct Synchroniser<'a, Src, F, St, P> {
    source: &'a Src,
    fetcher: &'a F,
    store: &'a St,
    publisher: &'a P,
    config: &'a SyncConfig,
}

impl<'a, Src, F, St, P> Synchroniser<'a, Src, F, St, P>
where
    Src: ContentSource,
    F: MediaFetcher,
    St: MediaStore,
    P: Publisher,
{
    pub fn new(
        source: &'a Src,
        fetcher: &'a F,
        store: &'a St,
        publisher: &'a P,
        config: &'a SyncConfig,
    ) -> Self {
        Self {
            source,
            fetcher,
            store,
            publisher,
            config,
        }
    }

    /// Process every unsynced document once.
    pub async fn run(&self) -> Result<SynchroniseReport, SyncError> {
        let run_id = Uuid::new_v4();
        self.run_inner()
            .instrument(info_span!("sync_run", %run_id))
            .await
    }

    async fn run_inner(&self) -> Result<SynchroniseReport, SyncError> {
        info!("[SYNC] Starting synchronisation run");
        let filter = self.config.schema.unsynced_filter();
        let mut report = SynchroniseReport::default();
        let mut request = PageRequest::first(self.config.page_size);
        let mut page_number = 0u32;

        loop {
            page_number += 1;
            let page = self
                .config
                .listing_policy
                .execute(
                    || self.source.query_documents(&filter, &request),
                    warn_on_retry("query_documents", &filter.synced_property),
                )
                .await
                .map_err(|e| {
                    error!(page = page_number, error = %e, "[SYNC][ERROR] Listing unsynced documents failed");
                    SyncError::Listing(e)
                })?;
            info!(page = page_number, documents = page.results.len(), has_more = page.has_more, "[SYNC] Listed page");

            for record in &page.results {
                match self.process_record(record).await {
                    Ok(published) => report.published.push(published),
                    Err(skipped) => report.skipped.push(skipped),
                }
                tokio::time::sleep(self.config.inter_document_delay).await;
            }

            if !page.has_more {
                break;
            }
            let Some(cursor) = page.next_cursor else {
                warn!(page = page_number, "[SYNC] Listing reports more results but no cursor, stopping");
                break;
            };
            request.cursor = Some(cursor);
            tokio::time::sleep(self.config.inter_page_delay).await;
        }

        info!(
            processed = report.processed(),
            skipped = report.skipped.len(),
            "[SYNC] Synchronisation run complete"
        );
        Ok(report)
    }

    /// Per-document failure boundary.
    async fn process_record(&self, record: &Value) -> Result<PublishedDocument, SkippedDocument> {
        let document_id = schema::document_id(record).unwrap_or("<unknown>").to_string();
        match self.process_document(record).await {
            Ok(published) => {
                info!(
                    document_id = %published.document_id,
                    publish_id = %published.publish_id,
                    title = %published.title,
                    "[SYNC] Document published and checkpointed"
                );
                Ok(published)
            }
            Err(e) => {
                error!(
                    document_id = %document_id,
                    stage = %e.stage(),
                    error = %e,
                    "[SYNC][ERROR] Skipping document"
                );
                Err(SkippedDocument {
                    document_id,
                    stage: e.stage(),
                    reason: e.to_string(),
                })
            }
        }
    }

    async fn process_document(&self, record: &Value) -> Result<PublishedDocument, DocumentError> {
        let mut document = self
            .config
            .schema
            .parse(record, &self.config.default_author)?;
        debug!(document_id = %document.id, title = %document.title, "[SYNC] Processing document");

        document.content = TreeFetcher::new(self.source, &self.config.tree)
            .fetch_tree(&document.id)
            .await?;

        let relay = MediaRelay::new(self.fetcher, self.store, &self.config.media);
        let content = ContentRenderer::new(&relay, &self.config.render)
            .render(&document.content)
            .await;
        let cover_reference = match &document.cover {
            Some(cover) => relay.relay(cover).await,
            None => self.config.media.cover_fallback.clone(),
        };

        let payload = assemble_payload(&document, content, cover_reference, self.config.digest_max_chars);

        let draft_id = self
            .config
            .publish_policy
            .execute_when(
                || self.publisher.create_draft(&payload),
                PublishError::is_transient,
                warn_on_retry("create_draft", &document.id),
            )
            .await
            .map_err(DocumentError::Draft)?;
        debug!(document_id = %document.id, draft_id = %draft_id, "[SYNC][PUBLISH] Draft created");

        let receipt = self
            .config
            .publish_policy
            .execute_when(
                || self.publisher.submit(&draft_id),
                PublishError::is_transient,
                warn_on_retry("submit", &document.id),
            )
            .await
            .map_err(DocumentError::Submit)?;
        info!(document_id = %document.id, publish_id = %receipt.publish_id, "[SYNC][PUBLISH] Published");

        self.config
            .checkpoint_policy
            .execute(
                || {
                    self.source
                        .mark_synced(&document.id, &self.config.schema.synced_property)
                },
                warn_on_retry("mark_synced", &document.id),
            )
            .await
            .map_err(DocumentError::Checkpoint)?;

        Ok(PublishedDocument {
            document_id: document.id,
            title: document.title,
            publish_id: receipt.publish_id,
        })
    }
}

/// Build the article for `document`. The digest is the summary, or an excerpt of
/// the body when there is none, cut to `digest_max_chars` characters.
pub fn assemble_payload(
    document: &Document,
    content: String,
    cover_reference: String,
    digest_max_chars: usize,
) -> PublishPayload {
    let digest = match &document.summary {
        Some(summary) => truncate_chars(summary, digest_max_chars),
        None => plain_text_excerpt(&document.content, digest_max_chars),
    };
    PublishPayload {
        title: document.title.clone(),
        author: document.author.clone(),
        digest,
        content,
        content_source_url: document.source_url.clone(),
        cover_reference,
    }
}
