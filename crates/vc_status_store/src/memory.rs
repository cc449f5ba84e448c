use std::collections::HashMap;

use async_trait::async_trait;
use errors::ErrorMetadata;
use parking_lot::Mutex;

use crate::{
    document::RawDocument,
    path::get_path,
    store::{
        DocStore,
        Equals,
    },
};

struct Inner {
    docs: HashMap<String, RawDocument>,
    /// Dotted attribute path -> whether it's a unique index.
    indexes: HashMap<String, bool>,
}

/// An in-memory `DocStore`. Not persistent, not distributed — it exists so
/// this workspace's tests can exercise the allocator's concurrency
/// properties (`spec.md` §8) without a real database, the same role the
/// teacher's in-memory/test persistence layers play for `database`'s tests.
///
/// Safe to share across tasks/threads via `Arc`; every operation takes the
/// lock only for the duration of one map access, so it does not hold a lock
/// across an `.await` point.
pub struct InMemoryDocStore {
    inner: Mutex<Inner>,
}

impl Default for InMemoryDocStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryDocStore {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                docs: HashMap::new(),
                indexes: HashMap::new(),
            }),
        }
    }

    fn matches(doc: &RawDocument, equals: &Equals<'_>) -> bool {
        equals
            .iter()
            .all(|(path, expected)| attribute_matches(get_path(&doc.value, path), expected))
    }
}

/// `expected` matches an indexed attribute if it equals the attribute
/// directly, or — when the attribute is a JSON array, as `meta.*_ids`
/// fields are — if it appears among the array's elements. This lets one
/// code path serve both plain scalar indexes (`content.id`) and the
/// per-element uniqueness/existence checks the VC document's
/// `meta.credential_status_ids` needs (`spec.md` §4.5 `exists`, §4.2
/// `unique(meta.credentialStatus.id)`).
fn attribute_matches(actual: Option<&serde_json::Value>, expected: &serde_json::Value) -> bool {
    match actual {
        Some(serde_json::Value::Array(items)) => items.contains(expected),
        other => other == Some(expected),
    }
}

/// The set of values a unique index must check for an attribute: the
/// elements of an array attribute, or the single scalar value.
fn index_values(actual: Option<&serde_json::Value>) -> Vec<serde_json::Value> {
    match actual {
        Some(serde_json::Value::Array(items)) => items.clone(),
        Some(other) => vec![other.clone()],
        None => Vec::new(),
    }
}

#[async_trait]
impl DocStore for InMemoryDocStore {
    async fn get(&self, id: &str) -> anyhow::Result<RawDocument> {
        let inner = self.inner.lock();
        inner.docs.get(id).cloned().ok_or_else(|| {
            anyhow::anyhow!("document {id} not found")
                .context(ErrorMetadata::not_found("DocumentNotFound", format!("no document with id {id}")))
        })
    }

    async fn find(&self, equals: &Equals<'_>, limit: usize) -> anyhow::Result<Vec<RawDocument>> {
        let inner = self.inner.lock();
        Ok(inner
            .docs
            .values()
            .filter(|doc| Self::matches(doc, equals))
            .take(limit)
            .cloned()
            .collect())
    }

    async fn update(&self, doc: RawDocument) -> anyhow::Result<RawDocument> {
        let mut inner = self.inner.lock();

        let stored_sequence = inner.docs.get(&doc.id).map(|d| d.sequence).unwrap_or(0);
        if stored_sequence != doc.sequence {
            return Err(anyhow::anyhow!("sequence mismatch on {}", doc.id).context(
                ErrorMetadata::conflict(
                    "WriteConflict",
                    format!(
                        "expected sequence {}, found {stored_sequence}",
                        doc.sequence
                    ),
                ),
            ));
        }

        let unique_attrs: Vec<String> = inner
            .indexes
            .iter()
            .filter(|(_, unique)| **unique)
            .map(|(attr, _)| attr.clone())
            .collect();
        for attr in &unique_attrs {
            for value in index_values(get_path(&doc.value, attr)) {
                let conflict = inner.docs.values().any(|other| {
                    other.id != doc.id && attribute_matches(get_path(&other.value, attr), &value)
                });
                if conflict {
                    return Err(anyhow::anyhow!("unique index {attr} violated").context(
                        ErrorMetadata::duplicate(
                            "UniqueIndexViolation",
                            format!("another document already has {attr} = {value}"),
                        ),
                    ));
                }
            }
        }

        let new_doc = RawDocument {
            id: doc.id.clone(),
            sequence: doc.sequence + 1,
            value: doc.value,
        };
        inner.docs.insert(doc.id, new_doc.clone());
        Ok(new_doc)
    }

    async fn count(&self, equals: &Equals<'_>) -> anyhow::Result<usize> {
        let inner = self.inner.lock();
        Ok(inner
            .docs
            .values()
            .filter(|doc| Self::matches(doc, equals))
            .count())
    }

    fn generate_id(&self) -> String {
        uuid::Uuid::new_v4().to_string()
    }

    async fn ensure_index(&self, attribute: &str, unique: bool) -> anyhow::Result<()> {
        let mut inner = self.inner.lock();
        inner.indexes.insert(attribute.to_string(), unique);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use errors::ErrorMetadataAnyhowExt;
    use serde_json::json;

    use super::*;

    fn doc(id: &str, sequence: u64, value: serde_json::Value) -> RawDocument {
        RawDocument {
            id: id.to_string(),
            sequence,
            value,
        }
    }

    #[tokio::test]
    async fn insert_then_get() {
        let store = InMemoryDocStore::new();
        let id = store.generate_id();
        let inserted = store.update(doc(&id, 0, json!({"content": {"x": 1}}))).await.unwrap();
        assert_eq!(inserted.sequence, 1);
        let fetched = store.get(&id).await.unwrap();
        assert_eq!(fetched, inserted);
    }

    #[tokio::test]
    async fn get_missing_is_not_found() {
        let store = InMemoryDocStore::new();
        let err = store.get("nope").await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn cas_conflict_on_stale_sequence() {
        let store = InMemoryDocStore::new();
        let id = store.generate_id();
        store.update(doc(&id, 0, json!({"content": {"x": 1}}))).await.unwrap();
        // Stale sequence=0 retry after someone else already bumped to 1.
        let err = store
            .update(doc(&id, 0, json!({"content": {"x": 2}})))
            .await
            .unwrap_err();
        assert!(err.is_conflict());
    }

    #[tokio::test]
    async fn cas_succeeds_with_correct_sequence() {
        let store = InMemoryDocStore::new();
        let id = store.generate_id();
        let v1 = store.update(doc(&id, 0, json!({"content": {"x": 1}}))).await.unwrap();
        let v2 = store
            .update(doc(&id, v1.sequence, json!({"content": {"x": 2}})))
            .await
            .unwrap();
        assert_eq!(v2.sequence, v1.sequence + 1);
    }

    #[tokio::test]
    async fn unique_index_rejects_duplicate() {
        let store = InMemoryDocStore::new();
        store.ensure_index("content.id", true).await.unwrap();
        let id_a = store.generate_id();
        let id_b = store.generate_id();
        store
            .update(doc(&id_a, 0, json!({"content": {"id": "same"}})))
            .await
            .unwrap();
        let err = store
            .update(doc(&id_b, 0, json!({"content": {"id": "same"}})))
            .await
            .unwrap_err();
        assert!(err.is_duplicate());
    }

    #[tokio::test]
    async fn find_matches_nested_path() {
        let store = InMemoryDocStore::new();
        let id = store.generate_id();
        store
            .update(doc(&id, 0, json!({"content": {"id": "abc"}, "meta": {}})))
            .await
            .unwrap();
        let found = store
            .find(&[("content.id", json!("abc"))], 10)
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, id);
    }

    #[tokio::test]
    async fn array_attribute_enforces_per_element_uniqueness() {
        let store = InMemoryDocStore::new();
        store.ensure_index("meta.credential_status_ids", true).await.unwrap();
        let vc_a = store.generate_id();
        let vc_b = store.generate_id();
        store
            .update(doc(
                &vc_a,
                0,
                json!({"content": {}, "meta": {"credential_status_ids": ["list#1", "list#2"]}}),
            ))
            .await
            .unwrap();
        let err = store
            .update(doc(
                &vc_b,
                0,
                json!({"content": {}, "meta": {"credential_status_ids": ["list#2"]}}),
            ))
            .await
            .unwrap_err();
        assert!(err.is_duplicate());
    }

    #[tokio::test]
    async fn count_matches_array_attribute_element() {
        let store = InMemoryDocStore::new();
        let id = store.generate_id();
        store
            .update(doc(
                &id,
                0,
                json!({"content": {}, "meta": {"credential_status_ids": ["list#1"]}}),
            ))
            .await
            .unwrap();
        let n = store
            .count(&[("meta.credential_status_ids", json!("list#1"))])
            .await
            .unwrap();
        assert_eq!(n, 1);
    }
}
