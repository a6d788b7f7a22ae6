//! Media relay: download from the source, re-upload to the target store.
//!
//! [`MediaRelay::relay`] never fails. Download and upload are retried under
//! separate policies, so a flaky store does not cause the bytes to be
//! downloaded again; when either step gives up, the configured fallback
//! reference for that media kind is returned and the failure is logged.

use std::time::Duration;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::{pin_mut, Stream, StreamExt};
use reqwest::header::CONTENT_TYPE;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::backoff::{warn_on_retry, BackoffPolicy};
use crate::config::millis;
use crate::contract::{FetchedMedia, MediaFetcher, MediaStore, RemoteError};
use crate::error::{MediaError, RelayError};
use crate::model::{MediaDescriptor, MediaKind};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MediaConfig {
    /// Largest accepted download.
    pub max_bytes: u64,
    #[serde(rename = "timeout_ms", with = "millis")]
    pub timeout: Duration,
    /// Content types accepted for covers; `None` accepts anything.
    pub cover_types: Option<Vec<String>>,
    /// Content types accepted for inline images; `None` accepts anything.
    pub inline_types: Option<Vec<String>>,
    pub download_policy: BackoffPolicy,
    pub upload_policy: BackoffPolicy,
    /// Reference used when a cover cannot be relayed or a document has none.
    pub cover_fallback: String,
    /// Reference used when an inline image cannot be relayed. Empty drops the image.
    pub inline_fallback: String,
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            max_bytes: 10 * 1024 * 1024,
            timeout: Duration::from_secs(30),
            cover_types: Some(vec!["image/jpeg".to_string(), "image/png".to_string()]),
            inline_types: Some(vec!["image/*".to_string()]),
            download_policy: BackoffPolicy::new(3, Duration::from_secs(1), Duration::from_secs(10))
                .with_jitter(true),
            upload_policy: BackoffPolicy::new(3, Duration::from_secs(2), Duration::from_secs(20))
                .with_jitter(true),
            cover_fallback: String::new(),
            inline_fallback: String::new(),
        }
    }
}

impl MediaConfig {
    pub fn limits_for(&self, kind: MediaKind) -> MediaLimits {
        MediaLimits {
            max_bytes: self.max_bytes,
            timeout: self.timeout,
            allowed_types: match kind {
                MediaKind::Cover => self.cover_types.clone(),
                MediaKind::InlineImage => self.inline_types.clone(),
            },
        }
    }

    pub fn fallback_for(&self, kind: MediaKind) -> &str {
        match kind {
            MediaKind::Cover => &self.cover_fallback,
            MediaKind::InlineImage => &self.inline_fallback,
        }
    }
}

/// Constraints for one download.
#[derive(Debug, Clone, PartialEq)]
pub struct MediaLimits {
    pub max_bytes: u64,
    pub timeout: Duration,
    pub allowed_types: Option<Vec<String>>,
}

pub struct MediaRelay<'a, F, S> {
    fetcher: &'a F,
    store: &'a S,
    config: &'a MediaConfig,
}

impl<'a, F: MediaFetcher, S: MediaStore> MediaRelay<'a, F, S> {
    pub fn new(fetcher: &'a F, store: &'a S, config: &'a MediaConfig) -> Self {
        Self {
            fetcher,
            store,
            config,
        }
    }

    /// Storage reference for `media`, or the fallback reference for its kind.
    pub async fn relay(&self, media: &MediaDescriptor) -> String {
        match self.try_relay(media).await {
            Ok(reference) => {
                info!(url = %media.url, kind = ?media.kind, "[MEDIA] Relayed media");
                reference
            }
            Err(e) => {
                let fallback = self.config.fallback_for(media.kind);
                warn!(
                    url = %media.url,
                    kind = ?media.kind,
                    error = %e,
                    fallback = %fallback,
                    "[MEDIA] Relay failed, using fallback reference"
                );
                fallback.to_string()
            }
        }
    }

    pub async fn try_relay(&self, media: &MediaDescriptor) -> Result<String, RelayError> {
        let limits = self.config.limits_for(media.kind);
        let fetched = self
            .config
            .download_policy
            .execute_when(
                || self.fetcher.fetch(&media.url, &limits),
                MediaError::is_transient,
                warn_on_retry("download_media", &media.url),
            )
            .await
            .map_err(RelayError::Download)?;
        debug!(
            url = %media.url,
            size = fetched.bytes.len(),
            content_type = ?fetched.content_type,
            "[MEDIA] Downloaded"
        );

        self.config
            .upload_policy
            .execute(
                || self.store.store(&fetched, media.kind),
                warn_on_retry::<RemoteError>("upload_media", &media.url),
            )
            .await
            .map_err(RelayError::Upload)
    }
}

/// Reject `found` unless it matches an entry of `allowed`. Parameters after `;`
/// are ignored and `type/*` entries match any subtype.
pub fn check_content_type(found: Option<&str>, allowed: Option<&[String]>) -> Result<(), MediaError> {
    let Some(allowed) = allowed else {
        return Ok(());
    };
    let essence = found
        .and_then(|ct| ct.split(';').next())
        .map(|ct| ct.trim().to_ascii_lowercase())
        .filter(|ct| !ct.is_empty());
    let Some(essence) = essence else {
        return Err(MediaError::DisallowedType { found: None });
    };
    let matches = allowed.iter().any(|entry| {
        let entry = entry.trim().to_ascii_lowercase();
        match entry.strip_suffix("/*") {
            Some(top) => essence.split('/').next() == Some(top),
            None => entry == essence,
        }
    });
    if matches {
        Ok(())
    } else {
        Err(MediaError::DisallowedType {
            found: found.map(str::to_string),
        })
    }
}

/// Collect a byte stream, refusing to hand out anything beyond `limit` bytes.
///
/// A declared length above the limit is rejected before the stream is polled;
/// otherwise the running total is checked after every chunk.
pub async fn read_capped<St, B, E>(
    declared: Option<u64>,
    body: St,
    limit: u64,
) -> Result<Bytes, MediaError>
where
    St: Stream<Item = Result<B, E>>,
    B: AsRef<[u8]>,
    E: Into<RemoteError>,
{
    if let Some(declared) = declared {
        if declared > limit {
            return Err(MediaError::DeclaredTooLarge { declared, limit });
        }
    }
    let capacity = declared.unwrap_or(0).min(limit) as usize;
    let mut buffer = BytesMut::with_capacity(capacity);
    pin_mut!(body);
    while let Some(chunk) = body.next().await {
        let chunk = chunk.map_err(|e| MediaError::Transport(e.into()))?;
        let chunk = chunk.as_ref();
        if buffer.len() as u64 + chunk.len() as u64 > limit {
            return Err(MediaError::TransferTooLarge { limit });
        }
        buffer.extend_from_slice(chunk);
    }
    Ok(buffer.freeze())
}

/// [`MediaFetcher`] over plain HTTP GET.
#[derive(Clone, Default)]
pub struct HttpMediaFetcher {
    client: reqwest::Client,
}

impl HttpMediaFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl MediaFetcher for HttpMediaFetcher {
    async fn fetch(&self, url: &str, limits: &MediaLimits) -> Result<FetchedMedia, MediaError> {
        let response = self
            .client
            .get(url)
            .timeout(limits.timeout)
            .send()
            .await
            .map_err(|e| MediaError::Transport(Box::new(e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(MediaError::Status {
                status: status.as_u16(),
            });
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        check_content_type(content_type.as_deref(), limits.allowed_types.as_deref())?;

        let declared = response.content_length();
        let bytes = read_capped(declared, response.bytes_stream(), limits.max_bytes).await?;
        Ok(FetchedMedia {
            source_url: url.to_string(),
            content_type,
            bytes,
        })
    }
}
