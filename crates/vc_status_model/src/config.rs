//! Tunable knobs and per-issuer configuration. Defaults are declared as
//! env-overridable constants in the `common::knobs` style (`LazyLock` +
//! `cmd_util::env_config`) rather than hardcoding magic numbers or reaching
//! for a config-file framework this crate has no use for.

use std::sync::LazyLock;

use errors::ErrorMetadata;
use serde::{
    Deserialize,
    Serialize,
};

use crate::credential_status::{
    StatusListType,
    StatusPurpose,
};

/// `2^26`. `spec.md` §6.
pub const MAX_LIST_SIZE: u64 = 1 << 26;
/// `spec.md` §6.
pub const MAX_BLOCK_SIZE: u32 = 32;
/// `2^21`. `spec.md` §6.
pub const MAX_BLOCK_COUNT: u32 = 1 << 21;

pub static DEFAULT_BLOCK_COUNT: LazyLock<u32> =
    LazyLock::new(|| cmd_util::env_config("VC_STATUS_DEFAULT_BLOCK_COUNT", 4096u32));
pub static DEFAULT_BLOCK_SIZE: LazyLock<u32> =
    LazyLock::new(|| cmd_util::env_config("VC_STATUS_DEFAULT_BLOCK_SIZE", 32u32));
pub static DEFAULT_MAX_ACTIVE_LIST_SIZE: LazyLock<usize> =
    LazyLock::new(|| cmd_util::env_config("VC_STATUS_DEFAULT_MAX_ACTIVE_LIST_SIZE", 4usize));

/// Cap on the number of distinct `indexAllocator`s with a live shard-reuse
/// queue in one process. `spec.md` §4.5.
pub static MAX_SHARD_QUEUES: LazyLock<usize> =
    LazyLock::new(|| cmd_util::env_config("VC_STATUS_MAX_SHARD_QUEUES", 1000usize));
/// Cap on reusable shards held per `indexAllocator`. `spec.md` §4.5.
pub static MAX_SHARD_QUEUE_SIZE: LazyLock<usize> =
    LazyLock::new(|| cmd_util::env_config("VC_STATUS_MAX_SHARD_QUEUE_SIZE", 10usize));

/// One configured status-list option for an issuer (one per `statusPurpose`
/// the issuer stamps into credentials). `spec.md` §6.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusListConfig {
    pub status_type: StatusListType,
    pub status_purpose: StatusPurpose,
    pub block_count: u32,
    pub block_size: u32,
}

impl StatusListConfig {
    pub fn new(
        status_type: StatusListType,
        status_purpose: StatusPurpose,
        block_count: u32,
        block_size: u32,
    ) -> anyhow::Result<Self> {
        let config = Self {
            status_type,
            status_purpose,
            block_count,
            block_size,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn with_defaults(status_type: StatusListType, status_purpose: StatusPurpose) -> Self {
        Self {
            status_type,
            status_purpose,
            block_count: *DEFAULT_BLOCK_COUNT,
            block_size: *DEFAULT_BLOCK_SIZE,
        }
        // Defaults are always valid; see the `default_config_is_valid` test.
    }

    /// Total bit length of one status list under this config.
    pub fn length(&self) -> u64 {
        self.block_count as u64 * self.block_size as u64
    }

    fn validate(&self) -> anyhow::Result<()> {
        if self.block_size > MAX_BLOCK_SIZE {
            return Err(bad_request(format!(
                "blockSize {} exceeds MAX_BLOCK_SIZE {MAX_BLOCK_SIZE}",
                self.block_size
            )));
        }
        if self.block_count > MAX_BLOCK_COUNT {
            return Err(bad_request(format!(
                "blockCount {} exceeds MAX_BLOCK_COUNT {MAX_BLOCK_COUNT}",
                self.block_count
            )));
        }
        let length = self.length();
        if length % 8 != 0 {
            return Err(bad_request(format!(
                "blockCount * blockSize = {length} must be a multiple of 8"
            )));
        }
        if length > MAX_LIST_SIZE {
            return Err(bad_request(format!(
                "blockCount * blockSize = {length} exceeds MAX_LIST_SIZE {MAX_LIST_SIZE}"
            )));
        }
        Ok(())
    }
}

fn bad_request(msg: String) -> anyhow::Error {
    anyhow::anyhow!(msg.clone()).context(ErrorMetadata::bad_request("InvalidStatusListConfig", msg))
}

/// Per-issuer configuration: which LMD to use and which status-list options
/// to stamp into every issued credential. `spec.md` §6.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssuerConfig {
    /// Caller-supplied UUID-shaped id identifying the LMD. `spec.md` §3.
    pub index_allocator: String,
    pub max_active_list_size: usize,
    pub statuses: Vec<StatusListConfig>,
}

impl IssuerConfig {
    pub fn new(index_allocator: impl Into<String>, statuses: Vec<StatusListConfig>) -> Self {
        Self {
            index_allocator: index_allocator.into(),
            max_active_list_size: *DEFAULT_MAX_ACTIVE_LIST_SIZE,
            statuses,
        }
    }
}
