use serde::{
    de::DeserializeOwned,
    Deserialize,
    Serialize,
};

/// A document exactly as the store sees it: an opaque id, a CAS `sequence`,
/// and an opaque JSON payload shaped `{"content": ..., "meta": ...}`. Keeps
/// the raw envelope separate from typed content, the same split
/// `common::document::{ResolvedDocument, ParsedDocument}` makes.
#[derive(Clone, Debug, PartialEq)]
pub struct RawDocument {
    pub id: String,
    pub sequence: u64,
    pub value: serde_json::Value,
}

/// `sequence == 0` means "not yet persisted"; `update` treats it as an
/// insert rather than a CAS. See `spec.md` §4.2.
pub const UNPERSISTED_SEQUENCE: u64 = 0;

#[derive(Serialize, Deserialize)]
struct Envelope<C, M> {
    content: C,
    meta: M,
}

/// Typed view of a [`RawDocument`] for one of the four document shapes (LMD,
/// BAD, IAD, VC). `C` is the type-specific content; `M` is the subset of
/// fields the store's unique/equality indexes are built over (`()` when a
/// document type has no indexed meta fields of its own, e.g. BAD, which is
/// addressed purely by its store id).
#[derive(Clone, Debug, PartialEq)]
pub struct TypedDocument<C, M> {
    pub id: String,
    pub sequence: u64,
    pub content: C,
    pub meta: M,
}

impl<C, M> TypedDocument<C, M> {
    /// A not-yet-persisted document, ready to be passed to `DocStore::update`
    /// as an insert.
    pub fn new_unpersisted(id: String, content: C, meta: M) -> Self {
        Self {
            id,
            sequence: UNPERSISTED_SEQUENCE,
            content,
            meta,
        }
    }
}

impl<C: Serialize, M: Serialize> TypedDocument<C, M> {
    pub fn into_raw(self) -> anyhow::Result<RawDocument> {
        let value = serde_json::to_value(Envelope {
            content: self.content,
            meta: self.meta,
        })?;
        Ok(RawDocument {
            id: self.id,
            sequence: self.sequence,
            value,
        })
    }
}

impl<C: DeserializeOwned, M: DeserializeOwned> TypedDocument<C, M> {
    pub fn from_raw(raw: RawDocument) -> anyhow::Result<Self> {
        let envelope: Envelope<C, M> = serde_json::from_value(raw.value)
            .map_err(|e| anyhow::anyhow!("document {} failed to parse: {e}", raw.id))?;
        Ok(Self {
            id: raw.id,
            sequence: raw.sequence,
            content: envelope.content,
            meta: envelope.meta,
        })
    }
}
