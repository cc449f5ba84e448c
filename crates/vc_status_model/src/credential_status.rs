//! The `credentialStatus` entry stamped into an issued credential, and the
//! small vocabulary of status-list flavors this service supports. Wire
//! shapes are fixed by the relevant W3C specs (RevocationList2020,
//! StatusList2021, BitstringStatusList, and the terse variant); they are
//! spelled out byte-for-byte in `spec.md` §6.

use serde::{
    de::Error as _,
    Deserialize,
    Deserializer,
    Serialize,
    Serializer,
};

/// Which status-list implementation a configured list uses. Distinct from
/// [`CredentialStatusEntry`]'s own `type` tag, which names the credential's
/// embedded entry rather than the list.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StatusListType {
    RevocationList2020,
    StatusList2021,
    BitstringStatusList,
    TerseBitstringStatusList,
}

/// `spec.md` §6. Serializes lowercase per the StatusList2021/BitstringStatusList specs.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum StatusPurpose {
    Revocation,
    Suspension,
}

/// A list/block index serialized as a JSON string rather than a number, as
/// the RevocationList2020 and StatusList2021/BitstringStatusList entry
/// shapes require.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct IndexAsString(pub u64);

impl Serialize for IndexAsString {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0.to_string())
    }
}

impl<'de> Deserialize<'de> for IndexAsString {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse::<u64>().map(IndexAsString).map_err(D::Error::custom)
    }
}

/// The `credentialStatus` object embedded in an issued VC. One variant per
/// supported `type`. `spec.md` §6.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(tag = "type")]
pub enum CredentialStatusEntry {
    #[serde(rename = "RevocationList2020Status")]
    RevocationList2020 {
        id: String,
        #[serde(rename = "revocationListCredential")]
        revocation_list_credential: String,
        #[serde(rename = "revocationListIndex")]
        revocation_list_index: IndexAsString,
    },
    #[serde(rename = "StatusList2021Entry")]
    StatusList2021 {
        id: String,
        #[serde(rename = "statusListCredential")]
        status_list_credential: String,
        #[serde(rename = "statusListIndex")]
        status_list_index: IndexAsString,
        #[serde(rename = "statusPurpose")]
        status_purpose: StatusPurpose,
    },
    #[serde(rename = "BitstringStatusListEntry")]
    BitstringStatusList {
        id: String,
        #[serde(rename = "statusListCredential")]
        status_list_credential: String,
        #[serde(rename = "statusListIndex")]
        status_list_index: IndexAsString,
        #[serde(rename = "statusPurpose")]
        status_purpose: StatusPurpose,
    },
    /// `terseStatusListIndex` is `listIndex * listSize + statusListIndex`,
    /// serialized as a number (not a string, unlike the other three
    /// variants). `spec.md` §6.
    #[serde(rename = "TerseBitstringStatusListEntry")]
    TerseBitstringStatusList {
        id: String,
        #[serde(rename = "statusListCredential")]
        status_list_credential: String,
        #[serde(rename = "terseStatusListIndex")]
        terse_status_list_index: u64,
    },
}

impl CredentialStatusEntry {
    pub fn status_list_type(&self) -> StatusListType {
        match self {
            Self::RevocationList2020 { .. } => StatusListType::RevocationList2020,
            Self::StatusList2021 { .. } => StatusListType::StatusList2021,
            Self::BitstringStatusList { .. } => StatusListType::BitstringStatusList,
            Self::TerseBitstringStatusList { .. } => StatusListType::TerseBitstringStatusList,
        }
    }

    pub fn id(&self) -> &str {
        match self {
            Self::RevocationList2020 { id, .. }
            | Self::StatusList2021 { id, .. }
            | Self::BitstringStatusList { id, .. }
            | Self::TerseBitstringStatusList { id, .. } => id,
        }
    }
}
