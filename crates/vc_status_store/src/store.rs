use async_trait::async_trait;
use serde_json::Value;

use crate::document::RawDocument;

/// An equality predicate over one or more dotted attribute paths, e.g.
/// `[("content.id", json!("abc"))]`.
pub type Equals<'a> = [(&'a str, Value)];

/// The encrypted document vault, as seen by the allocator. `spec.md` §4.2.
///
/// Every method is a suspension point (`spec.md` §5): between two calls on
/// the same task, no invariant about the store's state may be assumed beyond
/// what was just observed, since any number of other workers may have run
/// concurrently.
#[async_trait]
pub trait DocStore: Send + Sync {
    /// Fetch a document by id. Fails with an `ErrorMetadata::not_found` when
    /// absent.
    async fn get(&self, id: &str) -> anyhow::Result<RawDocument>;

    /// Equality match on indexed attributes, returning at most `limit`
    /// documents. Order across matches is unspecified.
    async fn find(&self, equals: &Equals<'_>, limit: usize) -> anyhow::Result<Vec<RawDocument>>;

    /// Insert-or-update with compare-and-swap on `sequence`.
    ///
    /// - `doc.sequence == 0`: treated as an insert. Fails with
    ///   `ErrorMetadata::duplicate` if a registered unique index would be
    ///   violated.
    /// - `doc.sequence != 0`: treated as CAS. Succeeds iff the stored
    ///   document's sequence equals `doc.sequence`, after which the stored
    ///   sequence becomes `doc.sequence + 1`. Fails with
    ///   `ErrorMetadata::conflict` otherwise, or `ErrorMetadata::duplicate` if
    ///   the update would violate a registered unique index on some other
    ///   document.
    ///
    /// Returns the document as now stored (with the bumped sequence).
    async fn update(&self, doc: RawDocument) -> anyhow::Result<RawDocument>;

    /// Count documents matching `equals`.
    async fn count(&self, equals: &Equals<'_>) -> anyhow::Result<usize>;

    /// Generate a fresh, store-unique id for a not-yet-persisted document.
    fn generate_id(&self) -> String;

    /// Declare an index over `attribute` (a dotted path), optionally unique.
    /// Idempotent. Must be called before the attribute is relied on by
    /// `find`/`count`/uniqueness enforcement in a production store; the
    /// in-memory reference store in this crate enforces uniqueness only for
    /// attributes that have had `ensure_index(_, true)` called on them.
    async fn ensure_index(&self, attribute: &str, unique: bool) -> anyhow::Result<()>;
}
