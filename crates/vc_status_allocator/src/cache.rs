//! In-memory snapshot of one LMD's active BADs. `spec.md` §4.3.

use errors::ErrorMetadataAnyhowExt;
use rand::Rng;
use vc_status_model::{
    BadContent,
    BadMeta,
    BlockAssignment,
    IadContent,
    IadMeta,
    LmdItem,
    StatusListConfig,
};
use vc_status_store::{
    DocStore,
    TypedDocument,
};

/// One active item together with the BAD it currently refers to.
#[derive(Clone, Debug)]
pub struct CacheRecord {
    pub item: LmdItem,
    pub bad: TypedDocument<BadContent, BadMeta>,
}

/// A reserved `(item, BAD, blockIndex, IAD)` tuple a Writer may assign
/// indexes from. `spec.md` GLOSSARY.
#[derive(Clone, Debug)]
pub struct Shard {
    pub item: LmdItem,
    pub bad: TypedDocument<BadContent, BadMeta>,
    pub block_index: u32,
    pub iad: TypedDocument<IadContent, IadMeta>,
}

/// `spec.md` §4.3.
#[derive(Default)]
pub struct IndexAllocationCache {
    records: Vec<CacheRecord>,
    out_of_sync: bool,
}

impl IndexAllocationCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> &[CacheRecord] {
        &self.records
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Sticky until the next `populate`. Also true if any BAD's `slSequence`
    /// is ahead of its item's (the LMD's view is stale).
    pub fn out_of_sync(&self) -> bool {
        self.out_of_sync
    }

    /// Read each item's BAD, lazily creating one (using `config`'s
    /// block_count/block_size) when missing. Clears `out_of_sync` first.
    pub async fn populate(
        &mut self,
        store: &dyn DocStore,
        items: &[LmdItem],
        config: &StatusListConfig,
    ) -> anyhow::Result<()> {
        self.records.clear();
        self.out_of_sync = false;
        for item in items {
            let bad = match store.get(&item.block_assignment_doc_id).await {
                Ok(raw) => TypedDocument::<BadContent, BadMeta>::from_raw(raw)?,
                Err(e) if e.is_not_found() => self.lazily_create_bad(store, item, config).await?,
                Err(e) => return Err(e),
            };
            if bad.content.sl_sequence > item.sl_sequence {
                self.out_of_sync = true;
            }
            self.records.push(CacheRecord {
                item: item.clone(),
                bad,
            });
        }
        Ok(())
    }

    async fn lazily_create_bad(
        &self,
        store: &dyn DocStore,
        item: &LmdItem,
        config: &StatusListConfig,
    ) -> anyhow::Result<TypedDocument<BadContent, BadMeta>> {
        let content = BadContent::fresh(item.sl_sequence, config.block_count, config.block_size);
        let unpersisted =
            TypedDocument::new_unpersisted(item.block_assignment_doc_id.clone(), content, ());
        let raw = unpersisted.into_raw()?;
        match store.update(raw).await {
            Ok(raw) => TypedDocument::from_raw(raw),
            Err(e) if e.is_duplicate() => {
                let raw = store.get(&item.block_assignment_doc_id).await?;
                TypedDocument::from_raw(raw)
            }
            Err(e) => Err(e),
        }
    }

    /// If the record's BAD is behind the item's `slSequence`, reset it (new
    /// `slSequence`, zero bitstring) via CAS. A conflict is resolved by
    /// rereading; if the reread still doesn't match, `out_of_sync` is set.
    pub async fn sync_cache_record(&mut self, store: &dyn DocStore, index: usize) -> anyhow::Result<()> {
        let (bad_id, bad_sequence, bad_content, item_sl_sequence) = {
            let record = &self.records[index];
            (
                record.bad.id.clone(),
                record.bad.sequence,
                record.bad.content.clone(),
                record.item.sl_sequence,
            )
        };
        if bad_content.sl_sequence >= item_sl_sequence {
            return Ok(());
        }
        let reset = TypedDocument {
            id: bad_id.clone(),
            sequence: bad_sequence,
            content: BadContent::fresh(item_sl_sequence, bad_content.block_count, bad_content.block_size),
            meta: (),
        };
        let raw = reset.into_raw()?;
        match store.update(raw).await {
            Ok(raw) => {
                self.records[index].bad = TypedDocument::from_raw(raw)?;
            }
            Err(e) if e.is_conflict() => {
                let raw = store.get(&bad_id).await?;
                let reread = TypedDocument::<BadContent, BadMeta>::from_raw(raw)?;
                if reread.content.sl_sequence != item_sl_sequence {
                    self.out_of_sync = true;
                }
                self.records[index].bad = reread;
            }
            Err(e) => return Err(e),
        }
        Ok(())
    }

    /// Move fully-assigned records from `active` to `inactive` in
    /// `block_assignment`, dropping them from this cache. Purely in-memory;
    /// the caller persists the LMD afterwards.
    pub fn rotate(&mut self, block_assignment: &mut BlockAssignment) -> Vec<CacheRecord> {
        let mut rotated = Vec::new();
        let mut remaining = Vec::new();
        for record in self.records.drain(..) {
            if record.bad.content.is_fully_assigned() {
                block_assignment
                    .active
                    .retain(|i| i.block_assignment_doc_id != record.item.block_assignment_doc_id);
                block_assignment.inactive.push(record.item.clone());
                rotated.push(record);
            } else {
                remaining.push(record);
            }
        }
        self.records = remaining;
        rotated
    }

    /// `spec.md` §4.3 `selectShard`. Returns `Ok(None)` when no shard could
    /// be produced this attempt (caller loops); propagates `Conflict`/
    /// `Duplicate` from the IAD create/reset so the caller can count
    /// contention (`spec.md` §4.4).
    pub async fn select_shard(
        &mut self,
        store: &dyn DocStore,
        rng: &mut impl Rng,
    ) -> anyhow::Result<Option<Shard>> {
        let total_unassigned: u64 = self
            .records
            .iter()
            .map(|r| (r.bad.content.block_count - r.bad.content.assigned_block_count) as u64)
            .sum();
        if total_unassigned == 0 {
            return Ok(None);
        }
        let mut choice = rng.random_range(0..total_unassigned);

        let mut chosen = None;
        for (record_index, record) in self.records.iter().enumerate() {
            let unassigned_here = (record.bad.content.block_count - record.bad.content.assigned_block_count) as u64;
            if choice >= unassigned_here {
                choice -= unassigned_here;
                continue;
            }
            let bits = record.bad.content.decode_assigned_blocks()?;
            let mut seen = 0u64;
            for block_index in 0..record.bad.content.block_count {
                if !bits.get(block_index as usize) {
                    if seen == choice {
                        chosen = Some((record_index, block_index));
                        break;
                    }
                    seen += 1;
                }
            }
            break;
        }

        let Some((record_index, block_index)) = chosen else {
            return Ok(None);
        };

        let item = self.records[record_index].item.clone();
        let bad = self.records[record_index].bad.clone();

        let mut iad = self.find_or_create_iad(store, &bad, block_index).await?;

        if iad.content.sl_sequence < bad.content.sl_sequence {
            iad = self.reset_iad(store, &iad, &bad).await?;
        }

        if iad.content.sl_sequence > bad.content.sl_sequence {
            return Ok(None);
        }

        if iad.content.is_block_full(bad.content.block_size) {
            self.mark_block_assigned(store, record_index, &bad, block_index).await?;
            return Ok(None);
        }

        Ok(Some(Shard {
            item,
            bad,
            block_index,
            iad,
        }))
    }

    async fn find_or_create_iad(
        &self,
        store: &dyn DocStore,
        bad: &TypedDocument<BadContent, BadMeta>,
        block_index: u32,
    ) -> anyhow::Result<TypedDocument<IadContent, IadMeta>> {
        let equals = [(
            "meta.compound_key",
            serde_json::json!(IadMeta::key(&bad.id, block_index)),
        )];
        if let Some(raw) = store.find(&equals, 1).await?.into_iter().next() {
            return TypedDocument::from_raw(raw);
        }
        let id = store.generate_id();
        let content = IadContent::fresh(bad.content.sl_sequence);
        let meta = IadMeta::new(bad.id.clone(), block_index);
        let unpersisted = TypedDocument::new_unpersisted(id, content, meta);
        let raw = unpersisted.into_raw()?;
        // Any duplicate/conflict here is re-raised: it's the primary
        // contention signal `ListManager::select_shard` counts.
        let raw = store.update(raw).await?;
        TypedDocument::from_raw(raw)
    }

    async fn reset_iad(
        &self,
        store: &dyn DocStore,
        iad: &TypedDocument<IadContent, IadMeta>,
        bad: &TypedDocument<BadContent, BadMeta>,
    ) -> anyhow::Result<TypedDocument<IadContent, IadMeta>> {
        let reset = TypedDocument {
            id: iad.id.clone(),
            sequence: iad.sequence,
            content: IadContent::fresh(bad.content.sl_sequence),
            meta: iad.meta.clone(),
        };
        let raw = reset.into_raw()?;
        let raw = store.update(raw).await?;
        TypedDocument::from_raw(raw)
    }

    async fn mark_block_assigned(
        &mut self,
        store: &dyn DocStore,
        record_index: usize,
        bad: &TypedDocument<BadContent, BadMeta>,
        block_index: u32,
    ) -> anyhow::Result<()> {
        let mut bits = bad.content.decode_assigned_blocks()?;
        bits.set(block_index as usize, true);
        let new_content = BadContent {
            sl_sequence: bad.content.sl_sequence,
            block_count: bad.content.block_count,
            block_size: bad.content.block_size,
            assigned_blocks: bits.encode(),
            assigned_block_count: bad.content.assigned_block_count + 1,
        };
        let updated = TypedDocument {
            id: bad.id.clone(),
            sequence: bad.sequence,
            content: new_content,
            meta: (),
        };
        let raw = updated.into_raw()?;
        match store.update(raw).await {
            Ok(raw) => {
                self.records[record_index].bad = TypedDocument::from_raw(raw)?;
                Ok(())
            }
            // Another worker marked the same block; functionally equivalent.
            Err(e) if e.is_conflict() => Ok(()),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;
    use vc_status_model::{
        StatusListType,
        StatusPurpose,
    };
    use vc_status_store::InMemoryDocStore;

    use super::*;

    fn config() -> StatusListConfig {
        StatusListConfig::new(StatusListType::StatusList2021, StatusPurpose::Revocation, 2, 4).unwrap()
    }

    fn item(bad_id: &str, sl_sequence: u64) -> LmdItem {
        LmdItem {
            block_assignment_doc_id: bad_id.to_string(),
            status_list_credential: "https://example.com/slc".to_string(),
            sl_sequence,
            list_index: 0,
        }
    }

    #[tokio::test]
    async fn populate_lazily_creates_missing_bad() {
        let store = InMemoryDocStore::new();
        let mut cache = IndexAllocationCache::new();
        cache
            .populate(&store, &[item("bad-1", 1)], &config())
            .await
            .unwrap();
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.records()[0].bad.content.block_count, 2);
        assert!(!cache.out_of_sync());
    }

    #[tokio::test]
    async fn populate_flags_out_of_sync_when_bad_is_ahead() {
        let store = InMemoryDocStore::new();
        let mut cache = IndexAllocationCache::new();
        cache
            .populate(&store, &[item("bad-1", 5)], &config())
            .await
            .unwrap();
        // bad was just created at slSequence=5; now simulate a stale item.
        let stale_item = item("bad-1", 4);
        cache.populate(&store, &[stale_item], &config()).await.unwrap();
        assert!(cache.out_of_sync());
    }

    #[tokio::test]
    async fn select_shard_returns_none_when_fully_assigned() {
        let store = InMemoryDocStore::new();
        let mut cache = IndexAllocationCache::new();
        let mut cfg = config();
        cfg.block_count = 1;
        cfg.block_size = 8;
        cache.populate(&store, &[item("bad-1", 1)], &cfg).await.unwrap();
        cache.records[0].bad.content.assigned_block_count = 1;
        cache.records[0].bad.content.assigned_blocks = {
            let mut bits = vc_status_model::Bitstring::new(1);
            bits.set(0, true);
            bits.encode()
        };
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let shard = cache.select_shard(&store, &mut rng).await.unwrap();
        assert!(shard.is_none());
    }

    #[tokio::test]
    async fn select_shard_returns_a_shard_with_room() {
        let store = InMemoryDocStore::new();
        store.ensure_index("meta.compound_key", true).await.unwrap();
        let mut cache = IndexAllocationCache::new();
        cache.populate(&store, &[item("bad-1", 1)], &config()).await.unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        let shard = cache.select_shard(&store, &mut rng).await.unwrap();
        let shard = shard.expect("capacity available");
        assert_eq!(shard.iad.content.next_local_index, 0);
    }

    #[tokio::test]
    async fn sync_cache_record_resets_a_bad_behind_its_item() {
        let store = InMemoryDocStore::new();
        let mut cache = IndexAllocationCache::new();
        cache.populate(&store, &[item("bad-1", 1)], &config()).await.unwrap();
        // Fill the BAD and advance the item's slSequence past it, as rotation
        // would leave things if the reactivation CAS lost a race.
        cache.records[0].bad.content.assigned_block_count = cache.records[0].bad.content.block_count;
        let stale_bad = cache.records[0].bad.clone();
        let raw = stale_bad.into_raw().unwrap();
        store.update(raw).await.unwrap();
        cache.populate(&store, &[item("bad-1", 2)], &config()).await.unwrap();
        assert!(cache.records[0].bad.content.is_fully_assigned());

        cache.sync_cache_record(&store, 0).await.unwrap();

        assert!(!cache.records[0].bad.content.is_fully_assigned());
        assert_eq!(cache.records[0].bad.content.sl_sequence, 2);
        assert!(!cache.out_of_sync());
    }

    #[tokio::test]
    async fn sync_cache_record_is_a_no_op_when_bad_already_current() {
        let store = InMemoryDocStore::new();
        let mut cache = IndexAllocationCache::new();
        cache.populate(&store, &[item("bad-1", 1)], &config()).await.unwrap();
        let sequence_before = cache.records[0].bad.sequence;

        cache.sync_cache_record(&store, 0).await.unwrap();

        assert_eq!(cache.records[0].bad.sequence, sequence_before);
    }

    proptest! {
        /// `spec.md` §8: `BAD.assignedBlockCount == popcount(BAD.assignedBlocks)`,
        /// driven through the real `mark_block_assigned` CAS path rather than
        /// asserted against a hand-rolled model.
        #[test]
        fn assigned_block_count_tracks_popcount_after_marks(
            block_count in 2u32..16,
            marks in prop::collection::vec(0u32..16, 0..16),
        ) {
            let rt = tokio::runtime::Runtime::new().unwrap();
            rt.block_on(async {
                let store = InMemoryDocStore::new();
                let mut cache = IndexAllocationCache::new();
                let mut cfg = config();
                cfg.block_count = block_count;
                cfg.block_size = 8;
                cache.populate(&store, &[item("bad-1", 1)], &cfg).await.unwrap();

                for block_index in marks {
                    if block_index >= block_count {
                        continue;
                    }
                    let bad = cache.records()[0].bad.clone();
                    // `mark_block_assigned` is only ever invoked by `select_shard`
                    // for a block it just determined was not yet assigned; mirror
                    // that precondition here rather than double-marking.
                    if bad.content.decode_assigned_blocks().unwrap().get(block_index as usize) {
                        continue;
                    }
                    cache.mark_block_assigned(&store, 0, &bad, block_index).await.unwrap();

                    let bad = &cache.records()[0].bad;
                    let bits = bad.content.decode_assigned_blocks().unwrap();
                    prop_assert_eq!(bad.content.assigned_block_count as usize, bits.popcount());
                }
            });
        }

        /// `spec.md` §8 `selectShard` uniformity: with `blockSize=1` every
        /// shard consumes its whole block, so repeatedly selecting and then
        /// retiring a block (as a writer's `finish()` would) must walk
        /// through every unassigned block before `select_shard` reports
        /// `None`, rather than fixating on a biased subset.
        #[test]
        fn select_shard_is_uniform_over_unassigned_blocks(
            block_count in 2u32..8,
            seed in any::<u64>(),
        ) {
            let rt = tokio::runtime::Runtime::new().unwrap();
            rt.block_on(async {
                let store = InMemoryDocStore::new();
                store.ensure_index("meta.compound_key", true).await.unwrap();
                let mut cache = IndexAllocationCache::new();
                let mut cfg = config();
                cfg.block_count = block_count;
                cfg.block_size = 1;
                cache.populate(&store, &[item("bad-1", 1)], &cfg).await.unwrap();

                let mut rng = ChaCha8Rng::seed_from_u64(seed);
                let mut seen = std::collections::HashSet::new();
                for _ in 0..(block_count as usize * 10) {
                    let Some(shard) = cache.select_shard(&store, &mut rng).await.unwrap() else {
                        break;
                    };
                    prop_assert!(shard.block_index < block_count);
                    prop_assert!(seen.insert(shard.block_index), "select_shard re-offered an already-seen block");
                    cache.mark_block_assigned(&store, 0, &shard.bad, shard.block_index).await.unwrap();
                }
                prop_assert_eq!(seen.len(), block_count as usize);
                prop_assert!(cache.select_shard(&store, &mut rng).await.unwrap().is_none());
            });
        }
    }
}
