//! Error taxonomy for the synchronisation pipeline.
//!
//! Remote collaborators report failures as boxed errors ([`RemoteError`]); the
//! pipeline wraps them into typed errors that carry the block or document they
//! belong to and, where a retry loop was involved, the number of attempts made.

use std::fmt;

use thiserror::Error;

/// Error type returned by the remote collaborator traits in [`crate::contract`].
pub type RemoteError = Box<dyn std::error::Error + Send + Sync>;

/// The last error of a retried operation, annotated with how many attempts were made.
#[derive(Debug)]
pub struct RetryError<E> {
    pub attempts: u32,
    pub last_error: E,
}

impl<E> RetryError<E> {
    pub fn into_inner(self) -> E {
        self.last_error
    }
}

impl<E: fmt::Display> fmt::Display for RetryError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (gave up after {} attempt(s))", self.last_error, self.attempts)
    }
}

impl<E: fmt::Debug + fmt::Display> std::error::Error for RetryError<E> {}

/// Failure to retrieve a complete block tree. Partial trees are never returned.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("listing children of block {block_id} failed: {source}")]
    Listing {
        block_id: String,
        #[source]
        source: RetryError<RemoteError>,
    },

    #[error("block listing for {block_id} is malformed: {reason}")]
    Malformed { block_id: String, reason: String },

    #[error("block {block_id} is nested deeper than the maximum depth of {max_depth}")]
    DepthExceeded { block_id: String, max_depth: usize },

    #[error("block {block_id} appears among its own ancestors")]
    Cycle { block_id: String },
}

/// Failure of a single media download or validation attempt.
#[derive(Debug, Error)]
pub enum MediaError {
    #[error("declared size of {declared} bytes exceeds the ceiling of {limit} bytes")]
    DeclaredTooLarge { declared: u64, limit: u64 },

    #[error("transfer exceeded the ceiling of {limit} bytes")]
    TransferTooLarge { limit: u64 },

    #[error("content type {found:?} is not allowed")]
    DisallowedType { found: Option<String> },

    #[error("media request returned HTTP {status}")]
    Status { status: u16 },

    #[error("media transfer failed: {0}")]
    Transport(#[source] RemoteError),
}

impl MediaError {
    /// Whether another attempt could succeed. Size and type violations are final.
    pub fn is_transient(&self) -> bool {
        match self {
            MediaError::DeclaredTooLarge { .. }
            | MediaError::TransferTooLarge { .. }
            | MediaError::DisallowedType { .. } => false,
            MediaError::Status { status } => *status == 429 || *status >= 500,
            MediaError::Transport(_) => true,
        }
    }
}

/// Failure reported by the target platform for a draft or a submission.
#[derive(Debug, Error)]
pub enum PublishError {
    /// Rate limits, server errors and broken connections. Worth another attempt.
    #[error("{0}")]
    Transient(#[source] RemoteError),

    /// The platform refused the request; repeating it gives the same answer.
    #[error("{0}")]
    Rejected(#[source] RemoteError),
}

impl PublishError {
    pub fn transient(error: impl Into<RemoteError>) -> Self {
        PublishError::Transient(error.into())
    }

    pub fn rejected(error: impl Into<RemoteError>) -> Self {
        PublishError::Rejected(error.into())
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, PublishError::Transient(_))
    }
}

/// Why a relay fell back to the configured fallback reference.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("download failed: {0}")]
    Download(#[source] RetryError<MediaError>),

    #[error("upload to media store failed: {0}")]
    Upload(#[source] RetryError<RemoteError>),
}

/// Pipeline stage at which a document was abandoned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipStage {
    Validate,
    Fetch,
    Publish,
    Checkpoint,
}

impl fmt::Display for SkipStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SkipStage::Validate => "validate",
            SkipStage::Fetch => "fetch",
            SkipStage::Publish => "publish",
            SkipStage::Checkpoint => "checkpoint",
        };
        f.write_str(name)
    }
}

/// Failure inside one document's pipeline. Caught at the per-document boundary.
#[derive(Debug, Error)]
pub enum DocumentError {
    #[error("document has no {field}")]
    MissingField { field: &'static str },

    #[error("document record is malformed: {reason}")]
    Malformed { reason: String },

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error("creating the draft failed: {0}")]
    Draft(#[source] RetryError<PublishError>),

    #[error("submitting the draft failed: {0}")]
    Submit(#[source] RetryError<PublishError>),

    #[error("setting the checkpoint flag failed: {0}")]
    Checkpoint(#[source] RetryError<RemoteError>),
}

impl DocumentError {
    pub fn stage(&self) -> SkipStage {
        match self {
            DocumentError::MissingField { .. } | DocumentError::Malformed { .. } => {
                SkipStage::Validate
            }
            DocumentError::Fetch(_) => SkipStage::Fetch,
            DocumentError::Draft(_) | DocumentError::Submit(_) => SkipStage::Publish,
            DocumentError::Checkpoint(_) => SkipStage::Checkpoint,
        }
    }
}

/// Run-level failure: the outer document listing could not be completed.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("listing unsynced documents failed: {0}")]
    Listing(#[source] RetryError<RemoteError>),
}
