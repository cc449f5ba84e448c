//! Persisted VC content and the indexed metadata that makes
//! `credentialStatus.id` uniqueness enforceable by the store. `spec.md` §3, §6.

use serde::{
    Deserialize,
    Serialize,
};

/// The signed credential payload, opaque to this workspace beyond the
/// `credentialStatus` entries an issuance stamps into it. DID/context/JWT
/// envelope concerns live entirely outside this crate.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct VcContent(pub serde_json::Value);

/// One `credentialStatus.id` this VC claims, with the detail needed for a
/// later existence check (`spec.md` §4.5 `exists`). A VC configured with
/// several status-list options carries one entry per option, so the store's
/// uniqueness index is enforced per element of `credential_status_ids`
/// rather than over the VC document as a whole.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialStatusRef {
    pub credential_status_id: String,
    pub status_list_credential: String,
    pub status_list_index: u64,
    pub status_purpose: crate::credential_status::StatusPurpose,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct VcMeta {
    pub credential_status_ids: Vec<String>,
    pub credential_statuses: Vec<CredentialStatusRef>,
}
