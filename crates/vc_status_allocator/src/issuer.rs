//! Fans a single issuance out across every configured status-list option.
//! `spec.md` §4.6.

use std::sync::Arc;

use tokio::sync::Mutex;
use vc_status_model::IssuerConfig;
use vc_status_store::DocStore;

use crate::{
    list_manager::ListManager,
    list_source::ListSource,
    reuse::ShardReuseCache,
    writer::{
        CredentialStatusWriter,
        StatusResult,
    },
};

/// One [`StatusResult`] per configured status-list option, in configuration
/// order. `spec.md` §4.6.
#[derive(Clone, Debug)]
pub struct IssuedStatus {
    pub results: Vec<StatusResult>,
}

/// Owns one [`CredentialStatusWriter`] per configured status purpose for a
/// single `indexAllocator`. `spec.md` §4.6.
///
/// Every writer gets its own `ListManager` (and so its own LMD), scoped as
/// `{indexAllocator}:{statusPurpose}` — see `DESIGN.md` for why one manager
/// is scoped to one purpose rather than one LMD fanning out across several.
pub struct CredentialStatusIssuer {
    writers: Vec<Mutex<CredentialStatusWriter>>,
}

impl CredentialStatusIssuer {
    /// `spec.md` §4.6 `initialize`: build one writer per configured status
    /// option, each with its own `ListManager`, sharing one process-wide
    /// shard-reuse cache.
    pub fn initialize(
        store: Arc<dyn DocStore>,
        list_source: Arc<dyn ListSource>,
        reuse: Arc<ShardReuseCache>,
        config: IssuerConfig,
    ) -> Self {
        let writers = config
            .statuses
            .into_iter()
            .map(|status_config| {
                let lmd_id = format!("{}:{:?}", config.index_allocator, status_config.status_purpose);
                let manager = Arc::new(ListManager::new(
                    store.clone(),
                    list_source.clone(),
                    status_config.clone(),
                    lmd_id.clone(),
                    config.max_active_list_size,
                ));
                Mutex::new(CredentialStatusWriter::new(
                    store.clone(),
                    manager,
                    reuse.clone(),
                    status_config,
                    lmd_id,
                ))
            })
            .collect();
        Self { writers }
    }

    /// Assign a fresh index from every configured status option. `spec.md`
    /// §4.6 `issue`.
    pub async fn issue(&self) -> anyhow::Result<IssuedStatus> {
        let results = futures::future::try_join_all(self.writers.iter().map(|writer| async move {
            writer.lock().await.write(None).await
        }))
        .await?;
        Ok(IssuedStatus { results })
    }

    /// `spec.md` §4.6 `hasDuplicate`: check every still-pending result against
    /// the VC store, and for each one that's already claimed, move it from
    /// the conceptual `statusResultMap` to `duplicateResultMap` by re-drawing
    /// it through its writer (which recovers the held shard past the
    /// conflicting index first, per §4.5 step 1). Results that aren't
    /// duplicates are carried over unchanged. Returns `None` if nothing was
    /// a duplicate, so the caller knows to rethrow instead of retrying.
    pub async fn recover_duplicates(&self, issued: &IssuedStatus) -> anyhow::Result<Option<IssuedStatus>> {
        let mut is_duplicate = Vec::with_capacity(self.writers.len());
        for (writer, result) in self.writers.iter().zip(&issued.results) {
            is_duplicate.push(writer.lock().await.exists(result).await?);
        }
        if !is_duplicate.iter().any(|d| *d) {
            return Ok(None);
        }

        let mut results = issued.results.clone();
        for (i, writer) in self.writers.iter().enumerate() {
            if is_duplicate[i] {
                let token = issued.results[i].retry_token();
                results[i] = writer.lock().await.write(Some(token)).await?;
            }
        }
        Ok(Some(IssuedStatus { results }))
    }

    /// Release every held shard. Fire-and-forget: a failure here only costs
    /// a missed reuse-queue opportunity or a delayed block-full flag, never
    /// issuance correctness, so it's logged rather than propagated. `spec.md`
    /// §4.6 `finish`.
    pub fn finish(self: &Arc<Self>) {
        let issuer = Arc::clone(self);
        tokio::spawn(async move {
            for writer in &issuer.writers {
                if let Err(e) = writer.lock().await.finish().await {
                    tracing::warn!(error = %e, "failed to finish a credential status shard");
                }
            }
        });
    }
}
