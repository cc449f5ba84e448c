//! The remote status-list creation collaborator. `spec.md` §1, §4.4.1 —
//! status-list *creation* lives on a remote service; the core only needs an
//! opaque call that hands back the new list credential's URL.

use async_trait::async_trait;
use vc_status_model::StatusPurpose;

#[async_trait]
pub trait ListSource: Send + Sync {
    async fn create_status_list(&self, id: &str, purpose: StatusPurpose, length: u64) -> anyhow::Result<String>;
}
