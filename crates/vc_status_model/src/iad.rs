//! Index Assignment Document content and indexed metadata. `spec.md` §3.

use serde::{
    Deserialize,
    Serialize,
};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IadContent {
    pub sl_sequence: u64,
    pub next_local_index: u32,
}

impl IadContent {
    pub fn fresh(sl_sequence: u64) -> Self {
        Self {
            sl_sequence,
            next_local_index: 0,
        }
    }

    pub fn is_block_full(&self, block_size: u32) -> bool {
        self.next_local_index == block_size
    }
}

/// Keyed in the store by the unique compound index
/// `(meta.blockAssignmentDocId, meta.blockIndex)`. `spec.md` §3, §4.2.
///
/// `DocStore::ensure_index` only expresses single-attribute uniqueness, so
/// the compound key is flattened into `compound_key` and that's the
/// attribute registered as unique; `block_assignment_doc_id`/`block_index`
/// stay around unflattened for equality lookups (`find`/`count` support
/// multi-attribute AND matching natively).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IadMeta {
    pub block_assignment_doc_id: String,
    pub block_index: u32,
    pub compound_key: String,
}

impl IadMeta {
    pub fn new(block_assignment_doc_id: impl Into<String>, block_index: u32) -> Self {
        let block_assignment_doc_id = block_assignment_doc_id.into();
        let compound_key = Self::key(&block_assignment_doc_id, block_index);
        Self {
            block_assignment_doc_id,
            block_index,
            compound_key,
        }
    }

    pub fn key(block_assignment_doc_id: &str, block_index: u32) -> String {
        format!("{block_assignment_doc_id}#{block_index}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_iad_starts_at_zero() {
        let iad = IadContent::fresh(3);
        assert_eq!(iad.next_local_index, 0);
        assert!(!iad.is_block_full(4));
    }

    #[test]
    fn full_block_is_detected() {
        let iad = IadContent {
            sl_sequence: 1,
            next_local_index: 4,
        };
        assert!(iad.is_block_full(4));
    }

    #[test]
    fn compound_key_is_derived_from_bad_id_and_block_index() {
        let meta = IadMeta::new("bad-1", 3);
        assert_eq!(meta.compound_key, "bad-1#3");
    }
}
