//! Minimal end-to-end demo of the issuance loop against an in-memory store,
//! a fake `ListSource`, and a no-op `Signer`. Not a production issuer — see
//! `spec.md` §1 Out of scope for what's deliberately missing (HTTP routing,
//! real signing, a real status-list service).

use std::sync::{
    atomic::{
        AtomicU64,
        Ordering,
    },
    Arc,
};

use async_trait::async_trait;
use clap::Parser;
use vc_status_allocator::{
    CredentialStatusIssuer,
    ListSource,
    ShardReuseCache,
};
use vc_status_model::{
    IssuerConfig,
    StatusListConfig,
    StatusListType,
    StatusPurpose,
};
use vc_status_store::{
    DocStore,
    InMemoryDocStore,
};
use vc_status_issuer::{
    issue_credential,
    Signer,
};

#[derive(Parser, Debug)]
#[command(about = "Issue a handful of demo credentials against an in-memory status-index allocator")]
struct Args {
    #[arg(long, env = "VC_STATUS_INDEX_ALLOCATOR", default_value = "demo-allocator")]
    index_allocator: String,
    #[arg(long, default_value_t = 4)]
    block_count: u32,
    #[arg(long, default_value_t = 8)]
    block_size: u32,
    #[arg(long, default_value_t = 5)]
    count: u32,
}

struct FakeListSource {
    counter: AtomicU64,
}

#[async_trait]
impl ListSource for FakeListSource {
    async fn create_status_list(&self, _id: &str, purpose: StatusPurpose, length: u64) -> anyhow::Result<String> {
        let n = self.counter.fetch_add(1, Ordering::SeqCst);
        tracing::info!(purpose = ?purpose, length, "created demo status list");
        Ok(format!("https://example.com/status-lists/{n}"))
    }
}

struct NoopSigner;

#[async_trait]
impl Signer for NoopSigner {
    async fn sign(&self, mut credential: serde_json::Value) -> anyhow::Result<serde_json::Value> {
        if let Some(obj) = credential.as_object_mut() {
            obj.insert(
                "proof".to_string(),
                serde_json::json!({"type": "DataIntegrityProof", "proofPurpose": "assertionMethod"}),
            );
        }
        Ok(credential)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    cmd_util::config_service();
    let args = Args::parse();

    let store: Arc<dyn DocStore> = Arc::new(InMemoryDocStore::new());
    let list_source = Arc::new(FakeListSource {
        counter: AtomicU64::new(0),
    });
    let reuse = Arc::new(ShardReuseCache::new());
    let config = IssuerConfig::new(
        args.index_allocator.clone(),
        vec![StatusListConfig::new(
            StatusListType::StatusList2021,
            StatusPurpose::Revocation,
            args.block_count,
            args.block_size,
        )?],
    );
    let issuer = Arc::new(CredentialStatusIssuer::initialize(
        store.clone(),
        list_source,
        reuse,
        config,
    ));

    for i in 0..args.count {
        let credential = serde_json::json!({
            "@context": ["https://www.w3.org/ns/credentials/v2"],
            "id": format!("urn:uuid:demo-{i}"),
            "type": ["VerifiableCredential"],
        });
        let signed = issue_credential(&*store, &issuer, &NoopSigner, credential).await?;
        println!("{}", serde_json::to_string_pretty(&signed)?);
    }

    Ok(())
}
