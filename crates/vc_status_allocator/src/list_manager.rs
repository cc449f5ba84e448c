//! Owns one LMD's lifecycle. `spec.md` §4.4.

use std::sync::Arc;

use cmd_util::Backoff;
use errors::{
    ErrorMetadata,
    ErrorMetadataAnyhowExt,
};
use rand::Rng;
use std::time::Duration;
use vc_status_model::{
    LmdContent,
    LmdItem,
    LmdMeta,
    NextSlc,
    StatusListConfig,
};
use vc_status_store::{
    DocStore,
    TypedDocument,
};

use crate::{
    cache::{
        IndexAllocationCache,
        Shard,
    },
    list_source::ListSource,
};

const INITIAL_BACKOFF: Duration = Duration::from_millis(5);
const MAX_BACKOFF: Duration = Duration::from_millis(500);

/// `spec.md` §4.4. One manager owns exactly one LMD — in practice one LMD
/// per `(indexAllocator, statusPurpose)` pair, since every field on
/// `LmdItem`/`BadContent` is purpose-agnostic and `nextSlcIds` is consumed
/// one entry at a time by `try_add_capacity`. See `DESIGN.md` for why this
/// workspace scopes one manager to one status-list configuration rather than
/// fanning a single LMD out across several purposes.
pub struct ListManager {
    store: Arc<dyn DocStore>,
    list_source: Arc<dyn ListSource>,
    config: StatusListConfig,
    lmd_id: String,
    max_active_list_size: usize,
}

impl ListManager {
    pub fn new(
        store: Arc<dyn DocStore>,
        list_source: Arc<dyn ListSource>,
        config: StatusListConfig,
        lmd_id: impl Into<String>,
        max_active_list_size: usize,
    ) -> Self {
        Self {
            store,
            list_source,
            config,
            lmd_id: lmd_id.into(),
            max_active_list_size,
        }
    }

    pub async fn get_shard(&self) -> anyhow::Result<Shard> {
        self.store.ensure_index("content.id", true).await?;
        self.store.ensure_index("meta.compound_key", true).await?;
        let mut lmd = self.ensure_lmd().await?;

        let mut rng = rand::rng();
        let mut conflicts: u32 = 0;
        loop {
            let mut cache = self.read_active_block_assignment_docs(&mut lmd).await?;
            if let Some(shard) = self.select_shard(&mut cache, &mut lmd, &mut conflicts, &mut rng).await? {
                return Ok(shard);
            }
        }
    }

    async fn ensure_lmd(&self) -> anyhow::Result<TypedDocument<LmdContent, LmdMeta>> {
        loop {
            let existing = self
                .store
                .find(&[("content.id", serde_json::json!(self.lmd_id))], 1)
                .await?;
            if let Some(raw) = existing.into_iter().next() {
                return TypedDocument::from_raw(raw);
            }
            let next_slc_ids = vec![self.fresh_pending_slc()];
            let mut content = LmdContent::empty(self.lmd_id.clone());
            content.next_slc_ids = next_slc_ids;
            let unpersisted = TypedDocument::new_unpersisted(self.store.generate_id(), content, ());
            let raw = unpersisted.into_raw()?;
            match self.store.update(raw).await {
                Ok(raw) => return TypedDocument::from_raw(raw),
                Err(e) if e.is_duplicate() => continue,
                Err(e) => return Err(e),
            }
        }
    }

    fn fresh_pending_slc(&self) -> NextSlc {
        NextSlc {
            id: self.store.generate_id(),
            status_purpose: self.config.status_purpose,
            length: self.config.length(),
        }
    }

    async fn read_active_block_assignment_docs(
        &self,
        lmd: &mut TypedDocument<LmdContent, LmdMeta>,
    ) -> anyhow::Result<IndexAllocationCache> {
        loop {
            let mut cache = IndexAllocationCache::new();
            cache
                .populate(&*self.store, &lmd.content.block_assignment.active, &self.config)
                .await?;

            for index in 0..cache.len() {
                cache.sync_cache_record(&*self.store, index).await?;
            }

            if cache.out_of_sync() {
                *lmd = self.reread_lmd().await?;
                continue;
            }

            let rotated = cache.rotate(&mut lmd.content.block_assignment);
            if !rotated.is_empty() {
                let mut repurposed_bad_update = None;
                if cache.is_empty() {
                    if let Some((item, bad_content)) = self.reactivate_after_rotation(lmd, &rotated).await? {
                        lmd.content.block_assignment.active.push(item.clone());
                        repurposed_bad_update = Some((item, bad_content));
                    }
                }

                let raw = TypedDocument {
                    id: lmd.id.clone(),
                    sequence: lmd.sequence,
                    content: lmd.content.clone(),
                    meta: (),
                }
                .into_raw()?;
                match self.store.update(raw).await {
                    Ok(raw) => *lmd = TypedDocument::from_raw(raw)?,
                    Err(e) if e.is_conflict() => {
                        *lmd = self.reread_lmd().await?;
                        continue;
                    }
                    Err(e) => return Err(e),
                }

                if let Some((item, bad_content)) = repurposed_bad_update {
                    let reset = TypedDocument::new_unpersisted(item.block_assignment_doc_id.clone(), bad_content, ());
                    // The BAD already exists (it's a rotated item being reused), so
                    // this is a CAS against its current sequence, not an insert.
                    let existing = self.store.get(&item.block_assignment_doc_id).await?;
                    let reset = TypedDocument {
                        sequence: existing.sequence,
                        ..reset
                    };
                    let raw = reset.into_raw()?;
                    match self.store.update(raw).await {
                        Ok(_) => {}
                        Err(e) if e.is_conflict() => {
                            *lmd = self.reread_lmd().await?;
                            continue;
                        }
                        Err(e) => return Err(e),
                    }
                }
            }

            if cache.is_empty() {
                self.try_add_capacity(lmd, 1).await?;
                *lmd = self.reread_lmd().await?;
                continue;
            }

            return Ok(cache);
        }
    }

    /// Optimistically reactivate the first rotated (now-inactive) record:
    /// pop it back out of `inactive`, assign it a fresh `slSequence` and the
    /// next pending status-list credential, and reset its BAD content
    /// in-memory so the caller can avoid a reread. `spec.md` §4.4 step 3.
    async fn reactivate_after_rotation(
        &self,
        lmd: &mut TypedDocument<LmdContent, LmdMeta>,
        rotated: &[crate::cache::CacheRecord],
    ) -> anyhow::Result<Option<(LmdItem, vc_status_model::BadContent)>> {
        let Some(first) = rotated.first() else {
            return Ok(None);
        };
        let created = self.create_next_status_lists(lmd).await?;
        let new_credential = created
            .first()
            .expect("create_next_status_lists never returns an empty batch")
            .id
            .clone();

        // Computed before removing `first` from `inactive`: with only one
        // item total, active and inactive could otherwise both be empty at
        // the moment of computation, losing the item's own slSequence.
        let new_sl_sequence = lmd.content.max_sl_sequence() + 1;

        lmd.content
            .block_assignment
            .inactive
            .retain(|i| i.block_assignment_doc_id != first.item.block_assignment_doc_id);
        let item = LmdItem {
            block_assignment_doc_id: first.item.block_assignment_doc_id.clone(),
            status_list_credential: new_credential,
            sl_sequence: new_sl_sequence,
            list_index: lmd.content.take_next_list_index(),
        };
        let bad_content =
            vc_status_model::BadContent::fresh(new_sl_sequence, self.config.block_count, self.config.block_size);
        Ok(Some((item, bad_content)))
    }

    async fn reread_lmd(&self) -> anyhow::Result<TypedDocument<LmdContent, LmdMeta>> {
        let raw = self
            .store
            .find(&[("content.id", serde_json::json!(self.lmd_id))], 1)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| {
                anyhow::anyhow!("LMD {} disappeared", self.lmd_id)
                    .context(ErrorMetadata::not_found("LmdVanished", "LMD document no longer present"))
            })?;
        TypedDocument::from_raw(raw)
    }

    async fn select_shard(
        &self,
        cache: &mut IndexAllocationCache,
        lmd: &mut TypedDocument<LmdContent, LmdMeta>,
        conflicts: &mut u32,
        rng: &mut impl Rng,
    ) -> anyhow::Result<Option<Shard>> {
        match cache.select_shard(&*self.store, rng).await {
            Ok(shard) => Ok(shard),
            Err(e) if e.is_conflict() || e.is_duplicate() => {
                *conflicts += 1;
                if self.prefer_new_list(*conflicts, cache) {
                    self.try_add_capacity(lmd, cache.len() + 1).await?;
                    *conflicts = 0;
                }
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    fn prefer_new_list(&self, conflicts: u32, cache: &IndexAllocationCache) -> bool {
        conflicts >= 2
            && cache.records().iter().all(|r| {
                r.bad.content.assigned_block_count as f64 / r.bad.content.block_count as f64 >= 0.5
            })
    }

    /// `spec.md` §4.4 `tryAddCapacity`. Returns once `target` is reached, the
    /// cap is hit, or capacity is exhausted (in which case it raises
    /// `InsufficientCapacity`).
    async fn try_add_capacity(&self, lmd: &mut TypedDocument<LmdContent, LmdMeta>, target: usize) -> anyhow::Result<bool> {
        let mut backoff = Backoff::new(INITIAL_BACKOFF, MAX_BACKOFF);
        let mut rng = rand::rng();
        while lmd.content.block_assignment.active.len() < target && !lmd.content.next_slc_ids.is_empty() {
            if lmd.content.block_assignment.active.len() >= self.config_max_active_list_size() {
                return Ok(false);
            }
            let new_sl_sequence = lmd.content.max_sl_sequence() + 1;
            let created = self.create_next_status_lists(lmd).await?;
            let new_credential = created
                .first()
                .expect("create_next_status_lists never returns an empty batch")
                .id
                .clone();

            let list_index = lmd.content.take_next_list_index();
            let item = if let Some(reused) = lmd.content.block_assignment.inactive.pop() {
                LmdItem {
                    sl_sequence: new_sl_sequence,
                    status_list_credential: new_credential,
                    list_index,
                    ..reused
                }
            } else {
                LmdItem {
                    block_assignment_doc_id: self.store.generate_id(),
                    status_list_credential: new_credential,
                    sl_sequence: new_sl_sequence,
                    list_index,
                }
            };
            lmd.content.block_assignment.active.push(item);

            let raw = TypedDocument {
                id: lmd.id.clone(),
                sequence: lmd.sequence,
                content: lmd.content.clone(),
                meta: (),
            }
            .into_raw()?;
            match self.store.update(raw).await {
                Ok(raw) => {
                    *lmd = TypedDocument::from_raw(raw)?;
                    return Ok(true);
                }
                Err(e) if e.is_conflict() => {
                    tokio::time::sleep(backoff.fail(&mut rng)).await;
                    *lmd = self.reread_lmd().await?;
                    continue;
                }
                Err(e) => return Err(e),
            }
        }
        if lmd.content.block_assignment.active.is_empty() {
            return Err(ErrorMetadata::insufficient_capacity(
                "no active status lists and no pending credentials to activate",
            )
            .into());
        }
        Ok(false)
    }

    /// `spec.md` §4.4.1. Calls `ListSource.createStatusList` for every
    /// pending entry, returning the now-live entries (real URL as `id`) for
    /// the caller to activate, and leaves `lmd.content.next_slc_ids`
    /// refreshed with a fresh batch of not-yet-created placeholders. Since
    /// one manager handles one status purpose, there is always exactly one
    /// pending entry at a time.
    async fn create_next_status_lists(&self, lmd: &mut TypedDocument<LmdContent, LmdMeta>) -> anyhow::Result<Vec<NextSlc>> {
        if lmd.content.next_slc_ids.is_empty() {
            return Err(ErrorMetadata::insufficient_capacity("no pending status list credentials").into());
        }
        let mut created = Vec::with_capacity(lmd.content.next_slc_ids.len());
        for pending in &lmd.content.next_slc_ids {
            let url = self
                .list_source
                .create_status_list(&pending.id, pending.status_purpose, pending.length)
                .await?;
            created.push(NextSlc {
                id: url,
                status_purpose: pending.status_purpose,
                length: pending.length,
            });
        }
        lmd.content.next_slc_ids = (0..created.len()).map(|_| self.fresh_pending_slc()).collect();
        Ok(created)
    }

    fn config_max_active_list_size(&self) -> usize {
        self.max_active_list_size
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{
        AtomicU64,
        Ordering,
    };

    use vc_status_model::{
        StatusListType,
        StatusPurpose,
    };
    use vc_status_store::InMemoryDocStore;

    use super::*;

    struct FakeListSource {
        counter: AtomicU64,
    }

    impl FakeListSource {
        fn new() -> Self {
            Self {
                counter: AtomicU64::new(0),
            }
        }
    }

    #[async_trait::async_trait]
    impl ListSource for FakeListSource {
        async fn create_status_list(&self, _id: &str, _purpose: StatusPurpose, _length: u64) -> anyhow::Result<String> {
            let n = self.counter.fetch_add(1, Ordering::SeqCst);
            Ok(format!("https://example.com/status/{n}"))
        }
    }

    fn manager(store: Arc<dyn DocStore>, block_count: u32, block_size: u32, max_active: usize) -> ListManager {
        let config = StatusListConfig::new(
            StatusListType::StatusList2021,
            StatusPurpose::Revocation,
            block_count,
            block_size,
        )
        .unwrap();
        ListManager::new(store, Arc::new(FakeListSource::new()), config, "allocator-1", max_active)
    }

    #[tokio::test]
    async fn cold_start_creates_lmd_and_returns_a_shard() {
        let store: Arc<dyn DocStore> = Arc::new(InMemoryDocStore::new());
        let manager = manager(store.clone(), 2, 4, 4);
        let shard = manager.get_shard().await.unwrap();
        assert_eq!(shard.iad.content.next_local_index, 0);
        assert!(shard.block_index < 2);

        let lmd_raw = store
            .find(&[("content.id", serde_json::json!("allocator-1"))], 1)
            .await
            .unwrap();
        assert_eq!(lmd_raw.len(), 1);
    }

    #[tokio::test]
    async fn exhausting_the_only_block_forces_rotation_and_a_new_list() {
        let store: Arc<dyn DocStore> = Arc::new(InMemoryDocStore::new());
        let manager = manager(store.clone(), 1, 2, 4);

        // First shard: the only block, index 0.
        let first = manager.get_shard().await.unwrap();
        assert_eq!(first.block_index, 0);

        // Simulate the writer finishing both indexes in the block: advance
        // the IAD to `blockSize`, then mark the BAD's only bit and bump its
        // count, as `CredentialStatusWriter::finish` would.
        let iad_raw = store.get(&first.iad.id).await.unwrap();
        let mut iad: TypedDocument<vc_status_model::IadContent, vc_status_model::IadMeta> =
            TypedDocument::from_raw(iad_raw).unwrap();
        iad.content.next_local_index = 2;
        let raw = iad.into_raw().unwrap();
        store.update(raw).await.unwrap();

        let bad_raw = store.get(&first.bad.id).await.unwrap();
        let mut bad: TypedDocument<vc_status_model::BadContent, vc_status_model::BadMeta> =
            TypedDocument::from_raw(bad_raw).unwrap();
        let mut bits = vc_status_model::Bitstring::new(1);
        bits.set(0, true);
        bad.content.assigned_blocks = bits.encode();
        bad.content.assigned_block_count = 1;
        let raw = bad.into_raw().unwrap();
        store.update(raw).await.unwrap();

        // Next call must rotate the exhausted item out and activate a fresh
        // list before returning a shard.
        let second = manager.get_shard().await.unwrap();
        assert_ne!(second.item.status_list_credential, first.item.status_list_credential);
        assert_eq!(second.iad.content.next_local_index, 0);
    }

    /// Regression: an active item can legitimately outrun its own BAD's
    /// `slSequence` when a reactivation's LMD-CAS commits but the paired
    /// BAD-reset CAS loses a race and is never retried in-place. `get_shard`
    /// must reset that stale, still-fully-assigned BAD in place rather than
    /// reading it as full and bouncing the item back to `inactive`.
    #[tokio::test]
    async fn get_shard_resets_a_bad_left_behind_its_item_instead_of_re_rotating() {
        let store: Arc<dyn DocStore> = Arc::new(InMemoryDocStore::new());
        let manager = manager(store.clone(), 1, 2, 4);

        let first = manager.get_shard().await.unwrap();

        // Leave the BAD as stale, fully-assigned content at its original
        // slSequence.
        let bad_raw = store.get(&first.bad.id).await.unwrap();
        let mut bad: TypedDocument<vc_status_model::BadContent, vc_status_model::BadMeta> =
            TypedDocument::from_raw(bad_raw).unwrap();
        let mut bits = vc_status_model::Bitstring::new(1);
        bits.set(0, true);
        bad.content.assigned_blocks = bits.encode();
        bad.content.assigned_block_count = 1;
        let raw = bad.into_raw().unwrap();
        store.update(raw).await.unwrap();

        // But the LMD's active item already moved on to a new slSequence and
        // credential, as if a reactivation's LMD-CAS had won while the BAD
        // reset lost its own race.
        let lmd_raw = store
            .find(&[("content.id", serde_json::json!("allocator-1"))], 1)
            .await
            .unwrap()
            .into_iter()
            .next()
            .unwrap();
        let mut lmd: TypedDocument<vc_status_model::LmdContent, vc_status_model::LmdMeta> =
            TypedDocument::from_raw(lmd_raw).unwrap();
        let reactivated_credential = "https://example.com/status/reactivated".to_string();
        for item in &mut lmd.content.block_assignment.active {
            if item.block_assignment_doc_id == first.bad.id {
                item.sl_sequence += 1;
                item.status_list_credential = reactivated_credential.clone();
            }
        }
        let raw = lmd.into_raw().unwrap();
        store.update(raw).await.unwrap();

        let second = manager.get_shard().await.unwrap();
        assert_eq!(second.item.status_list_credential, reactivated_credential);
        assert_eq!(second.bad.id, first.bad.id);
        assert!(!second.bad.content.is_fully_assigned());
        assert_eq!(second.block_index, 0);
    }
}
