//! Shared error taxonomy for the status-index allocator.
//!
//! Every crate in this workspace returns `anyhow::Result<T>` and tags
//! recoverable-vs-fatal failures by attaching an [`ErrorMetadata`] to the
//! error chain via `.context(ErrorMetadata::conflict(...))`. Callers that
//! need to branch on the kind of failure use the [`ErrorMetadataAnyhowExt`]
//! extension trait rather than matching on a bespoke error enum per crate.

use std::borrow::Cow;

/// Tag attached to an `anyhow::Error` classifying it for recovery logic,
/// logging, and (eventually) HTTP status mapping. See `spec.md` §7.
#[derive(thiserror::Error, Clone, Debug, PartialEq, Eq)]
#[error("{msg}")]
pub struct ErrorMetadata {
    pub code: ErrorCode,
    /// Short, ScreamingCamelCase, stable across wording changes. Used in
    /// tests and metrics.
    pub short_msg: Cow<'static, str>,
    /// Human-readable, developer-facing detail.
    pub msg: Cow<'static, str>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    /// CAS failure on a document update. Always recoverable: retried by
    /// re-reading and repeating, or ignored because another worker did
    /// functionally equivalent work. Never surfaced to a caller.
    Conflict,
    /// Unique-index violation. On LMD/BAD/IAD creation, converted to "read
    /// the winner". On VC insert, drives the issuer's retry loop.
    Duplicate,
    /// Read of a document expected to exist lazily. Triggers a lazy-create
    /// path, or (on a status-list-credential lookup) a 404.
    NotFound,
    /// Detected via `slSequence` comparison; the reader's view of a parent
    /// document is behind the true state. Handled by re-reading and looping.
    Stale,
    /// `LMD.active` is empty and no further status lists can be created.
    /// Surfaced to the caller; the issuance is rejected.
    InsufficientCapacity,
    /// Malformed input (bad credential, unsupported suite/type).
    BadRequest,
    /// Unexpected, non-retriable failure (signing failure, store
    /// unavailable). No retry.
    Fatal,
}

impl ErrorMetadata {
    pub fn conflict(short_msg: impl Into<Cow<'static, str>>, msg: impl Into<Cow<'static, str>>) -> Self {
        Self {
            code: ErrorCode::Conflict,
            short_msg: short_msg.into(),
            msg: msg.into(),
        }
    }

    pub fn duplicate(short_msg: impl Into<Cow<'static, str>>, msg: impl Into<Cow<'static, str>>) -> Self {
        Self {
            code: ErrorCode::Duplicate,
            short_msg: short_msg.into(),
            msg: msg.into(),
        }
    }

    pub fn not_found(short_msg: impl Into<Cow<'static, str>>, msg: impl Into<Cow<'static, str>>) -> Self {
        Self {
            code: ErrorCode::NotFound,
            short_msg: short_msg.into(),
            msg: msg.into(),
        }
    }

    pub fn stale(short_msg: impl Into<Cow<'static, str>>, msg: impl Into<Cow<'static, str>>) -> Self {
        Self {
            code: ErrorCode::Stale,
            short_msg: short_msg.into(),
            msg: msg.into(),
        }
    }

    pub fn insufficient_capacity(msg: impl Into<Cow<'static, str>>) -> Self {
        Self {
            code: ErrorCode::InsufficientCapacity,
            short_msg: "InsufficientCapacity".into(),
            msg: msg.into(),
        }
    }

    pub fn bad_request(short_msg: impl Into<Cow<'static, str>>, msg: impl Into<Cow<'static, str>>) -> Self {
        Self {
            code: ErrorCode::BadRequest,
            short_msg: short_msg.into(),
            msg: msg.into(),
        }
    }

    pub fn fatal(short_msg: impl Into<Cow<'static, str>>, msg: impl Into<Cow<'static, str>>) -> Self {
        Self {
            code: ErrorCode::Fatal,
            short_msg: short_msg.into(),
            msg: msg.into(),
        }
    }

    pub fn is_conflict(&self) -> bool {
        self.code == ErrorCode::Conflict
    }

    pub fn is_duplicate(&self) -> bool {
        self.code == ErrorCode::Duplicate
    }

    pub fn is_not_found(&self) -> bool {
        self.code == ErrorCode::NotFound
    }

    pub fn is_stale(&self) -> bool {
        self.code == ErrorCode::Stale
    }

    pub fn is_insufficient_capacity(&self) -> bool {
        self.code == ErrorCode::InsufficientCapacity
    }

    /// HTTP status a future router would map this to, per `spec.md` §6.
    pub fn http_status(&self) -> u16 {
        match self.code {
            ErrorCode::BadRequest => 400,
            ErrorCode::NotFound => 404,
            ErrorCode::InsufficientCapacity => 503,
            ErrorCode::Conflict | ErrorCode::Duplicate | ErrorCode::Stale => 500,
            ErrorCode::Fatal => 500,
        }
    }
}

/// Extension trait so call sites can ask `err.is_conflict()` on a plain
/// `anyhow::Error` without downcasting by hand everywhere.
pub trait ErrorMetadataAnyhowExt {
    fn error_metadata(&self) -> Option<&ErrorMetadata>;
    fn is_conflict(&self) -> bool;
    fn is_duplicate(&self) -> bool;
    fn is_not_found(&self) -> bool;
    fn is_stale(&self) -> bool;
    fn is_insufficient_capacity(&self) -> bool;
}

impl ErrorMetadataAnyhowExt for anyhow::Error {
    fn error_metadata(&self) -> Option<&ErrorMetadata> {
        self.downcast_ref::<ErrorMetadata>()
    }

    fn is_conflict(&self) -> bool {
        self.error_metadata().is_some_and(ErrorMetadata::is_conflict)
    }

    fn is_duplicate(&self) -> bool {
        self.error_metadata().is_some_and(ErrorMetadata::is_duplicate)
    }

    fn is_not_found(&self) -> bool {
        self.error_metadata().is_some_and(ErrorMetadata::is_not_found)
    }

    fn is_stale(&self) -> bool {
        self.error_metadata().is_some_and(ErrorMetadata::is_stale)
    }

    fn is_insufficient_capacity(&self) -> bool {
        self.error_metadata()
            .is_some_and(ErrorMetadata::is_insufficient_capacity)
    }
}
