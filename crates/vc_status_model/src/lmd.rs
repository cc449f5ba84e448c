//! List Management Document content. `spec.md` §3.

use serde::{
    Deserialize,
    Serialize,
};

use crate::credential_status::StatusPurpose;

/// One entry of `LMD.nextSlcIds`: a pre-allocated, not-yet-created status
/// list the issuer intends to create next.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NextSlc {
    pub id: String,
    pub status_purpose: StatusPurpose,
    pub length: u64,
}

/// One entry of `LMD.blockAssignment.active` or `.inactive`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LmdItem {
    pub block_assignment_doc_id: String,
    pub status_list_credential: String,
    pub sl_sequence: u64,
    /// Ordinal position of this status list among every list ever activated
    /// for this LMD, assigned once when the list is first activated and
    /// carried unchanged through rotation. `spec.md` §6 `terseStatusListIndex`
    /// needs this to place the list's indexes in the cross-list index space.
    pub list_index: u64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct BlockAssignment {
    pub active: Vec<LmdItem>,
    pub inactive: Vec<LmdItem>,
}

/// `spec.md` §3. `id` is the caller-supplied `indexAllocator`; the store's
/// unique index on `content.id` is what makes LMD creation a race any number
/// of workers can lose gracefully.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LmdContent {
    pub id: String,
    pub next_slc_ids: Vec<NextSlc>,
    pub block_assignment: BlockAssignment,
    /// Next `LmdItem::list_index` to hand out. Incremented every time a new
    /// status list is activated, whether into a fresh slot or a rotated-out
    /// one, so each list's ordinal is unique and never reused.
    pub next_list_index: u64,
}

impl LmdContent {
    pub fn empty(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            next_slc_ids: Vec::new(),
            block_assignment: BlockAssignment::default(),
            next_list_index: 0,
        }
    }

    /// Hand out the next `list_index` ordinal and advance the counter.
    pub fn take_next_list_index(&mut self) -> u64 {
        let index = self.next_list_index;
        self.next_list_index += 1;
        index
    }

    /// `max(slSequence)` over active ∪ inactive, or 0 if both are empty.
    pub fn max_sl_sequence(&self) -> u64 {
        self.block_assignment
            .active
            .iter()
            .chain(self.block_assignment.inactive.iter())
            .map(|item| item.sl_sequence)
            .max()
            .unwrap_or(0)
    }
}

/// LMDs carry no indexed metadata beyond `content.id` itself.
pub type LmdMeta = ();
