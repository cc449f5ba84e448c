pub mod bad;
pub mod bitstring;
pub mod config;
pub mod credential_status;
pub mod iad;
pub mod lmd;
pub mod vc;

pub use bad::{
    BadContent,
    BadMeta,
};
pub use bitstring::Bitstring;
pub use config::{
    IssuerConfig,
    StatusListConfig,
    MAX_BLOCK_COUNT,
    MAX_BLOCK_SIZE,
    MAX_LIST_SIZE,
    MAX_SHARD_QUEUES,
    MAX_SHARD_QUEUE_SIZE,
};
pub use credential_status::{
    CredentialStatusEntry,
    IndexAsString,
    StatusListType,
    StatusPurpose,
};
pub use iad::{
    IadContent,
    IadMeta,
};
pub use lmd::{
    BlockAssignment,
    LmdContent,
    LmdItem,
    LmdMeta,
    NextSlc,
};
pub use vc::{
    CredentialStatusRef,
    VcContent,
    VcMeta,
};
