//! Assigns and finalizes one `credentialStatus` entry per write. `spec.md` §4.5.

use std::sync::Arc;

use errors::ErrorMetadataAnyhowExt;
use vc_status_model::{
    BadContent,
    BadMeta,
    CredentialStatusEntry,
    IadContent,
    IadMeta,
    IndexAsString,
    StatusListConfig,
    StatusListType,
};
use vc_status_store::{
    DocStore,
    TypedDocument,
};

use crate::{
    cache::Shard,
    list_manager::ListManager,
    reuse::ShardReuseCache,
};

/// A single assigned index, ready to be stamped into a credential. Holding
/// one of these open keeps the backing [`Shard`] pinned to this writer until
/// [`CredentialStatusWriter::finish`] releases it.
#[derive(Clone, Debug, PartialEq)]
pub struct StatusResult {
    pub entry: CredentialStatusEntry,
    pub reference: vc_status_model::CredentialStatusRef,
    local_index: u32,
}

impl StatusResult {
    /// Opaque token describing this assignment, to pass back into
    /// [`CredentialStatusWriter::write`] if the issuance that used it turns
    /// out to be a retry of a duplicate the caller already persisted.
    pub fn retry_token(&self) -> RetryToken {
        RetryToken {
            local_index: self.local_index,
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub struct RetryToken {
    local_index: u32,
}

/// Hands out `credentialStatus` entries for one configured status purpose,
/// holding a [`Shard`] open across calls so consecutive writes for the same
/// issuance batch don't each pay for a fresh `ListManager::get_shard`.
/// `spec.md` §4.5.
pub struct CredentialStatusWriter {
    store: Arc<dyn DocStore>,
    list_manager: Arc<ListManager>,
    reuse: Arc<ShardReuseCache>,
    config: StatusListConfig,
    index_allocator: String,
    held: Option<Shard>,
}

impl CredentialStatusWriter {
    pub fn new(
        store: Arc<dyn DocStore>,
        list_manager: Arc<ListManager>,
        reuse: Arc<ShardReuseCache>,
        config: StatusListConfig,
        index_allocator: impl Into<String>,
    ) -> Self {
        Self {
            store,
            list_manager,
            reuse,
            config,
            index_allocator: index_allocator.into(),
            held: None,
        }
    }

    /// Assign the next index. If `retry` is `Some`, the previous
    /// [`StatusResult`] this writer produced turned out to be a duplicate
    /// already persisted elsewhere; the held shard's index is first advanced
    /// past it before a fresh index is drawn. `spec.md` §4.5 step 1.
    pub async fn write(&mut self, retry: Option<RetryToken>) -> anyhow::Result<StatusResult> {
        if let Some(retry) = retry {
            self.recover_from_duplicate(retry).await?;
        }

        if self.held.is_none() {
            self.held = Some(match self.reuse.pop(&self.index_allocator) {
                Some(shard) => shard,
                None => self.list_manager.get_shard().await?,
            });
        }

        let shard = self.held.as_ref().expect("populated above");
        let local_index = shard.iad.content.next_local_index;
        let global_index = shard.block_index as u64 * self.config.block_size as u64 + local_index as u64;
        let entry = build_entry(
            &self.config,
            &shard.item.status_list_credential,
            global_index,
            shard.item.list_index,
        );
        let reference = vc_status_model::CredentialStatusRef {
            credential_status_id: entry.id().to_string(),
            status_list_credential: shard.item.status_list_credential.clone(),
            status_list_index: global_index,
            status_purpose: self.config.status_purpose,
        };
        Ok(StatusResult {
            entry,
            reference,
            local_index,
        })
    }

    /// Advance the held IAD past the duplicate index, then drop it so the
    /// next `write` draws a fresh shard. `spec.md` §4.5 step 1: "advance past
    /// the conflicting index and return the shard to the reuse queue if
    /// indexes remain".
    async fn recover_from_duplicate(&mut self, retry: RetryToken) -> anyhow::Result<()> {
        let Some(shard) = self.held.take() else {
            return Ok(());
        };
        let raw = self.store.get(&shard.iad.id).await?;
        let iad: TypedDocument<IadContent, IadMeta> = TypedDocument::from_raw(raw)?;
        if iad.content.sl_sequence != shard.iad.content.sl_sequence
            || iad.content.next_local_index > retry.local_index
        {
            // Someone else already advanced past this index, or the block
            // was reset under us; either way there's nothing to recover.
            return Ok(());
        }

        let advanced = (retry.local_index + 1).min(self.config.block_size);
        let updated = TypedDocument {
            content: IadContent {
                next_local_index: advanced,
                ..iad.content
            },
            ..iad
        };
        let raw = updated.into_raw()?;
        match self.store.update(raw).await {
            Ok(raw) => {
                let updated: TypedDocument<IadContent, IadMeta> = TypedDocument::from_raw(raw)?;
                if updated.content.next_local_index < self.config.block_size {
                    self.reuse.push(&self.index_allocator, Shard { iad: updated, ..shard });
                }
            }
            Err(e) if e.is_conflict() => {}
            Err(e) => return Err(e),
        }
        Ok(())
    }

    /// Release the held shard: advance its IAD past the index just written,
    /// mark the BAD block full if that emptied it, and otherwise return the
    /// shard to the process-wide reuse queue. `spec.md` §4.5 step 2.
    pub async fn finish(&mut self) -> anyhow::Result<()> {
        let Some(shard) = self.held.take() else {
            return Ok(());
        };

        let advanced = (shard.iad.content.next_local_index + 1).min(self.config.block_size);
        let updated = TypedDocument {
            content: IadContent {
                next_local_index: advanced,
                ..shard.iad.content.clone()
            },
            ..shard.iad.clone()
        };
        let raw = updated.into_raw()?;
        let updated_iad: TypedDocument<IadContent, IadMeta> = match self.store.update(raw).await {
            Ok(raw) => TypedDocument::from_raw(raw)?,
            Err(e) if e.is_conflict() => {
                let raw = self.store.get(&shard.iad.id).await?;
                TypedDocument::from_raw(raw)?
            }
            Err(e) => return Err(e),
        };

        if updated_iad.content.is_block_full(self.config.block_size) {
            self.mark_bad_block_full(&shard, &updated_iad).await?;
        } else {
            self.reuse.push(
                &self.index_allocator,
                Shard {
                    iad: updated_iad,
                    ..shard
                },
            );
        }
        Ok(())
    }

    async fn mark_bad_block_full(
        &self,
        shard: &Shard,
        iad: &TypedDocument<IadContent, IadMeta>,
    ) -> anyhow::Result<()> {
        let raw = self.store.get(&shard.bad.id).await?;
        let bad: TypedDocument<BadContent, BadMeta> = TypedDocument::from_raw(raw)?;
        if bad.content.sl_sequence != iad.content.sl_sequence {
            return Ok(());
        }
        let mut bits = bad.content.decode_assigned_blocks()?;
        if bits.get(shard.block_index as usize) {
            return Ok(());
        }
        bits.set(shard.block_index as usize, true);
        let content = BadContent {
            assigned_blocks: bits.encode(),
            assigned_block_count: bad.content.assigned_block_count + 1,
            ..bad.content.clone()
        };
        let doc = TypedDocument { content, ..bad };
        let raw = doc.into_raw()?;
        match self.store.update(raw).await {
            Ok(_) => Ok(()),
            // Another writer marked the same block already.
            Err(e) if e.is_conflict() => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Whether some other VC already claims `result`'s `credentialStatus.id`.
    /// `spec.md` §4.5 `exists`.
    pub async fn exists(&self, result: &StatusResult) -> anyhow::Result<bool> {
        let count = self
            .store
            .count(&[(
                "meta.credential_status_ids",
                serde_json::json!(result.reference.credential_status_id),
            )])
            .await?;
        Ok(count > 0)
    }
}

fn build_entry(
    config: &StatusListConfig,
    status_list_credential: &str,
    index: u64,
    list_index: u64,
) -> CredentialStatusEntry {
    let id = format!("{status_list_credential}#{index}");
    match config.status_type {
        StatusListType::RevocationList2020 => CredentialStatusEntry::RevocationList2020 {
            id,
            revocation_list_credential: status_list_credential.to_string(),
            revocation_list_index: IndexAsString(index),
        },
        StatusListType::StatusList2021 => CredentialStatusEntry::StatusList2021 {
            id,
            status_list_credential: status_list_credential.to_string(),
            status_list_index: IndexAsString(index),
            status_purpose: config.status_purpose,
        },
        StatusListType::BitstringStatusList => CredentialStatusEntry::BitstringStatusList {
            id,
            status_list_credential: status_list_credential.to_string(),
            status_list_index: IndexAsString(index),
            status_purpose: config.status_purpose,
        },
        StatusListType::TerseBitstringStatusList => CredentialStatusEntry::TerseBitstringStatusList {
            id,
            status_list_credential: status_list_credential.to_string(),
            terse_status_list_index: list_index * config.length() + index,
        },
    }
}
