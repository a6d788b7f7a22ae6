//! Retrieval of a document's complete block tree.
//!
//! Children are listed page by page under the tree [`BackoffPolicy`]. Once a
//! level is complete, every child flagged `has_children` is expanded; sibling
//! subtrees are fetched concurrently and grafted back in listing order. A single
//! semaphore caps the listing calls in flight for the whole tree at
//! `concurrency`, however deep it is. Any failure below the root fails the whole
//! call.

use std::time::Duration;

use futures::future::{BoxFuture, FutureExt};
use futures::stream::{self, StreamExt, TryStreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Semaphore;
use tracing::{debug, info};

use crate::backoff::{warn_on_retry, BackoffPolicy};
use crate::config::millis;
use crate::contract::ContentSource;
use crate::error::FetchError;
use crate::model::{ContentNode, ContentTree, NodeId, PageRequest};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TreeConfig {
    /// Children requested per listing call.
    pub page_size: u32,
    /// Pause between two pages of the same listing.
    #[serde(rename = "inter_page_delay_ms", with = "millis")]
    pub inter_page_delay: Duration,
    /// Deepest nesting level fetched; the document's own children are level 0.
    pub max_depth: usize,
    /// Listing calls in flight at once for the whole tree, all levels together.
    pub concurrency: usize,
    pub policy: BackoffPolicy,
}

impl Default for TreeConfig {
    fn default() -> Self {
        Self {
            page_size: 100,
            inter_page_delay: Duration::from_millis(350),
            max_depth: 16,
            concurrency: 3,
            policy: BackoffPolicy::new(6, Duration::from_millis(300), Duration::from_secs(5))
                .with_jitter(true),
        }
    }
}

pub struct TreeFetcher<'a, S> {
    source: &'a S,
    config: &'a TreeConfig,
    /// Bounds listing calls in flight across every level of one tree.
    permits: Semaphore,
}

impl<'a, S: ContentSource> TreeFetcher<'a, S> {
    pub fn new(source: &'a S, config: &'a TreeConfig) -> Self {
        Self {
            source,
            config,
            permits: Semaphore::new(config.concurrency.max(1)),
        }
    }

    /// Fetch every block below `root_id`.
    pub async fn fetch_tree(&self, root_id: &str) -> Result<ContentTree, FetchError> {
        let tree = self.fetch_level(root_id.to_string(), Vec::new()).await?;
        info!(root_id, nodes = tree.len(), "[FETCH] Block tree complete");
        Ok(tree)
    }

    fn fetch_level<'b>(
        &'b self,
        block_id: String,
        ancestors: Vec<String>,
    ) -> BoxFuture<'b, Result<ContentTree, FetchError>> {
        async move {
            let depth = ancestors.len();
            if depth > self.config.max_depth {
                return Err(FetchError::DepthExceeded {
                    block_id,
                    max_depth: self.config.max_depth,
                });
            }

            let raw_children = self.list_all_children(&block_id).await?;

            let mut tree = ContentTree::new();
            let mut expand: Vec<(NodeId, String)> = Vec::new();
            for raw in &raw_children {
                let node = ContentNode::from_block(raw).map_err(|reason| FetchError::Malformed {
                    block_id: block_id.clone(),
                    reason,
                })?;
                let child_id = node.id.clone();
                let has_children = node.has_children;
                let id = tree.push_root(node);
                if has_children {
                    expand.push((id, child_id));
                }
            }

            let mut path = ancestors;
            path.push(block_id.clone());
            if let Some((_, repeated)) = expand.iter().find(|(_, child)| path.contains(child)) {
                return Err(FetchError::Cycle {
                    block_id: repeated.clone(),
                });
            }

            debug!(
                block_id = %block_id,
                depth,
                children = raw_children.len(),
                expanding = expand.len(),
                "[FETCH] Level listed"
            );

            let pending: Vec<_> = expand
                .iter()
                .map(|(_, child)| self.fetch_level(child.clone(), path.clone()))
                .collect();
            let fragments: Vec<ContentTree> = stream::iter(pending)
                .buffered(self.config.concurrency.max(1))
                .try_collect()
                .await?;

            for ((parent, _), fragment) in expand.into_iter().zip(fragments) {
                tree.graft(parent, fragment);
            }
            Ok(tree)
        }
        .boxed()
    }

    /// All direct children of `block_id`, following the cursor until exhausted.
    async fn list_all_children(&self, block_id: &str) -> Result<Vec<Value>, FetchError> {
        let mut children = Vec::new();
        let mut request = PageRequest::first(self.config.page_size);
        let source = self.source;
        let permits = &self.permits;
        loop {
            let current = &request;
            let page = self
                .config
                .policy
                .execute(
                    move || async move {
                        let _permit = permits.acquire().await?;
                        source.list_children(block_id, current).await
                    },
                    warn_on_retry("list_children", block_id),
                )
                .await
                .map_err(|source| FetchError::Listing {
                    block_id: block_id.to_string(),
                    source,
                })?;

            children.extend(page.results);
            if !page.has_more {
                return Ok(children);
            }
            let Some(cursor) = page.next_cursor else {
                return Err(FetchError::Malformed {
                    block_id: block_id.to_string(),
                    reason: "listing reports more results but no cursor".to_string(),
                });
            };
            request.cursor = Some(cursor);
            tokio::time::sleep(self.config.inter_page_delay).await;
        }
    }
}
