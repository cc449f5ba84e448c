//! Typed payload shapes for the four HTTP endpoints named in `spec.md` §6.
//! No router is implemented here (out of scope, `spec.md` §1); these types
//! exist so a future HTTP layer has a typed contract to bind to, the way the
//! teacher keeps `model`'s document types free of `local_backend`'s route
//! handlers.

use serde::{
    Deserialize,
    Serialize,
};
use serde_json::Value;
use vc_status_model::{
    StatusListType,
    StatusPurpose,
};

/// `POST /issuers/{id}/credentials/issue` request body.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IssueCredentialRequest {
    pub credential: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<Value>,
}

/// `POST /issuers/{id}/credentials/issue` response body (`201`).
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IssueCredentialResponse {
    pub verifiable_credential: Value,
}

/// `POST /issuers/{id}/credentials/status` request body.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateCredentialStatusRequest {
    pub credential_id: String,
    pub credential_status: CredentialStatusSelector,
}

/// The `{type, statusPurpose?}` selector naming which configured status
/// option a status-update request targets.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CredentialStatusSelector {
    #[serde(rename = "type")]
    pub status_type: StatusListType,
    #[serde(default, rename = "statusPurpose", skip_serializing_if = "Option::is_none")]
    pub status_purpose: Option<StatusPurpose>,
}

/// `GET /issuers/{id}/slcs/{slcId}` response body: the status list
/// credential itself, opaque beyond being a JSON document.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StatusListCredentialResponse(pub Value);

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn issue_request_round_trips_camel_case() {
        let raw = json!({"credential": {"id": "urn:uuid:1"}, "options": {"foo": 1}});
        let req: IssueCredentialRequest = serde_json::from_value(raw.clone()).unwrap();
        assert_eq!(serde_json::to_value(&req).unwrap(), raw);
    }

    #[test]
    fn status_update_request_parses_optional_purpose() {
        let raw = json!({
            "credentialId": "urn:uuid:1",
            "credentialStatus": {"type": "StatusList2021", "statusPurpose": "revocation"}
        });
        let req: UpdateCredentialStatusRequest = serde_json::from_value(raw).unwrap();
        assert_eq!(req.credential_status.status_purpose, Some(StatusPurpose::Revocation));
    }
}
