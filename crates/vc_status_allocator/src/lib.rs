//! Concurrent status-index allocation for a Verifiable Credential issuer.
//! `spec.md` §4.
//!
//! Built on `vc_status_model` (document shapes, no store dependency) and
//! `vc_status_store` (the generic `DocStore`, no model dependency). This
//! crate is where the two meet: `TypedDocument<BadContent, _>` and friends
//! get instantiated here, and the OCC retry loops that make concurrent
//! allocation safe live here.

pub mod cache;
pub mod issuer;
pub mod list_manager;
pub mod list_source;
pub mod reuse;
pub mod writer;

pub use cache::{
    CacheRecord,
    IndexAllocationCache,
    Shard,
};
pub use issuer::{
    CredentialStatusIssuer,
    IssuedStatus,
};
pub use list_manager::ListManager;
pub use list_source::ListSource;
pub use reuse::ShardReuseCache;
pub use writer::{
    CredentialStatusWriter,
    RetryToken,
    StatusResult,
};
