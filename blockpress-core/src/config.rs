use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::backoff::BackoffPolicy;
use crate::fetch::TreeConfig;
use crate::media::MediaConfig;
use crate::render::RenderOptions;
use crate::schema::DocumentSchema;

/// Everything the orchestrator needs besides its client handles.
///
/// Every field has a default, so a configuration file only lists what it changes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Page size for the unsynced-document query.
    pub page_size: u32,
    /// Pause after every document, processed or skipped.
    #[serde(rename = "inter_document_delay_ms", with = "millis")]
    pub inter_document_delay: Duration,
    /// Pause between pages of the document query.
    #[serde(rename = "inter_page_delay_ms", with = "millis")]
    pub inter_page_delay: Duration,
    pub listing_policy: BackoffPolicy,
    pub publish_policy: BackoffPolicy,
    pub checkpoint_policy: BackoffPolicy,
    pub tree: TreeConfig,
    pub media: MediaConfig,
    pub render: RenderOptions,
    pub schema: DocumentSchema,
    /// Digests longer than this many characters are cut.
    pub digest_max_chars: usize,
    /// Author used when a document has none.
    pub default_author: String,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            page_size: 100,
            inter_document_delay: Duration::from_secs(1),
            inter_page_delay: Duration::from_secs(2),
            listing_policy: BackoffPolicy::listing(),
            publish_policy: BackoffPolicy::publish(),
            checkpoint_policy: BackoffPolicy::listing(),
            tree: TreeConfig::default(),
            media: MediaConfig::default(),
            render: RenderOptions::default(),
            schema: DocumentSchema::default(),
            digest_max_chars: 120,
            default_author: String::new(),
        }
    }
}

impl SyncConfig {
    pub fn trace_loaded(&self) {
        info!(
            page_size = self.page_size,
            inter_document_delay_ms = self.inter_document_delay.as_millis() as u64,
            inter_page_delay_ms = self.inter_page_delay.as_millis() as u64,
            synced_property = %self.schema.synced_property,
            max_depth = self.tree.max_depth,
            media_max_bytes = self.media.max_bytes,
            "Loaded SyncConfig"
        );
        debug!(?self, "SyncConfig loaded (full debug)");
    }
}

/// Serde adapter for durations written as whole milliseconds.
pub(crate) mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis().min(u64::MAX as u128) as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}
