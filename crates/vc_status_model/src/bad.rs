//! Block Assignment Document content. `spec.md` §3.

use serde::{
    Deserialize,
    Serialize,
};

use crate::bitstring::Bitstring;

/// `spec.md` §3. Bitstring fields are stored on the wire in their encoded
/// (compressed, base64) form via `assigned_blocks`; callers decode with
/// [`Bitstring::decode`] using `block_count` as the expected length.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BadContent {
    pub sl_sequence: u64,
    pub block_count: u32,
    pub block_size: u32,
    pub assigned_blocks: String,
    pub assigned_block_count: u32,
}

impl BadContent {
    /// A freshly created or reset BAD: zero bitstring, `sl_sequence` as
    /// given by the caller (the owning item's current `slSequence`).
    pub fn fresh(sl_sequence: u64, block_count: u32, block_size: u32) -> Self {
        Self {
            sl_sequence,
            block_count,
            block_size,
            assigned_blocks: Bitstring::new(block_count as usize).encode(),
            assigned_block_count: 0,
        }
    }

    pub fn decode_assigned_blocks(&self) -> anyhow::Result<Bitstring> {
        Bitstring::decode(&self.assigned_blocks, self.block_count as usize)
    }

    pub fn is_fully_assigned(&self) -> bool {
        self.assigned_block_count == self.block_count
    }
}

/// BADs carry no indexed metadata; they're looked up by document id.
pub type BadMeta = ();

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_bad_has_zero_count_and_matching_length_bitstring() {
        let bad = BadContent::fresh(1, 16, 8);
        assert_eq!(bad.assigned_block_count, 0);
        let bits = bad.decode_assigned_blocks().unwrap();
        assert_eq!(bits.len(), 16);
        assert!(!bad.is_fully_assigned());
    }

    #[test]
    fn is_fully_assigned_compares_count_to_block_count() {
        let mut bad = BadContent::fresh(1, 4, 8);
        bad.assigned_block_count = 4;
        assert!(bad.is_fully_assigned());
    }
}
