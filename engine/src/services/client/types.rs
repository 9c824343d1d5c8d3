use std::collections::BTreeMap;
use std::fmt;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Seconds before expiry at which a session is proactively refreshed.
const REFRESH_MARGIN_SECS: u64 = 300;

fn current_time_secs() -> u64 {
    chrono::Utc::now().timestamp().max(0) as u64
}

/// Authenticated session on one PDS
#[derive(Serialize, Deserialize, Clone, PartialEq)]
pub struct ClientSessionCredentials {
    pub did: String,
    pub handle: String,
    pub pds: String,
    #[serde(rename = "accessJwt")]
    pub access_jwt: String,
    #[serde(rename = "refreshJwt")]
    pub refresh_jwt: String,
    pub expires_at: Option<u64>,
}

impl ClientSessionCredentials {
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(current_time_secs())
    }

    pub fn is_expired_at(&self, now: u64) -> bool {
        matches!(self.expires_at, Some(expires_at) if now >= expires_at)
    }

    pub fn needs_refresh(&self) -> bool {
        self.needs_refresh_at(current_time_secs())
    }

    pub fn needs_refresh_at(&self, now: u64) -> bool {
        matches!(self.expires_at, Some(expires_at) if now + REFRESH_MARGIN_SECS >= expires_at)
    }
}

impl fmt::Debug for ClientSessionCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientSessionCredentials")
            .field("did", &self.did)
            .field("handle", &self.handle)
            .field("pds", &self.pds)
            .field("expires_at", &self.expires_at)
            .finish_non_exhaustive()
    }
}

/// `com.atproto.server.createSession` / `refreshSession` response
#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct SessionResponse {
    pub did: String,
    pub handle: String,
    pub access_jwt: String,
    pub refresh_jwt: String,
    #[serde(default)]
    pub active: Option<bool>,
    #[serde(default)]
    pub status: Option<RepoStatus>,
}

/// Input to `com.atproto.server.createAccount`
#[derive(Serialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct CreateAccountRequest {
    pub did: String,
    pub handle: String,
    pub email: String,
    pub password: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub invite_code: Option<String>,
    /// Sent as the bearer token, not in the body
    #[serde(skip)]
    pub service_auth_token: String,
}

impl fmt::Debug for CreateAccountRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CreateAccountRequest")
            .field("did", &self.did)
            .field("handle", &self.handle)
            .field("email", &self.email)
            .field("invite_code", &self.invite_code)
            .finish_non_exhaustive()
    }
}

/// Hosting status of a repository on a server
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum RepoStatus {
    Active,
    Deactivated,
    Takendown,
    Suspended,
    Deleted,
}

impl fmt::Display for RepoStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            RepoStatus::Active => "active",
            RepoStatus::Deactivated => "deactivated",
            RepoStatus::Takendown => "takendown",
            RepoStatus::Suspended => "suspended",
            RepoStatus::Deleted => "deleted",
        };
        f.write_str(label)
    }
}

/// `com.atproto.sync.getRepoStatus` response
#[derive(Deserialize, Debug, Clone)]
pub struct RepoStatusInfo {
    pub did: String,
    pub active: bool,
    #[serde(default)]
    pub status: Option<RepoStatus>,
    #[serde(default)]
    pub rev: Option<String>,
}

impl RepoStatusInfo {
    /// Inactive repos without an explicit status are treated as deactivated.
    pub fn effective_status(&self) -> RepoStatus {
        if self.active {
            RepoStatus::Active
        } else {
            self.status.unwrap_or(RepoStatus::Deactivated)
        }
    }
}

/// One page of `com.atproto.repo.listMissingBlobs`
#[derive(Debug, Clone, Default)]
pub struct MissingBlobsPage {
    pub cids: Vec<String>,
    pub cursor: Option<String>,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub(crate) struct MissingBlobsWire {
    #[serde(default)]
    pub cursor: Option<String>,
    #[serde(default)]
    pub blobs: Vec<MissingBlobWire>,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub(crate) struct MissingBlobWire {
    pub cid: String,
    #[serde(default)]
    pub record_uri: Option<String>,
}

/// Raw blob bytes plus the content type the source served them with
#[derive(Debug, Clone)]
pub struct BlobPayload {
    pub data: Bytes,
    pub content_type: Option<String>,
}

/// `com.atproto.server.describeServer` response
#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ServerDescription {
    pub did: String,
    #[serde(default)]
    pub available_user_domains: Vec<String>,
    #[serde(default)]
    pub invite_code_required: Option<bool>,
    #[serde(default)]
    pub phone_verification_required: Option<bool>,
    #[serde(default)]
    pub links: Option<ServerLinks>,
    #[serde(default)]
    pub contact: Option<ServerContact>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ServerLinks {
    #[serde(default)]
    pub privacy_policy: Option<String>,
    #[serde(default)]
    pub terms_of_service: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct ServerContact {
    #[serde(default)]
    pub email: Option<String>,
}

/// Service entry shared by DID documents and PLC operations
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ServiceEndpoint {
    #[serde(rename = "type")]
    pub service_type: String,
    pub endpoint: String,
}

/// Credentials a server recommends for a DID it will host
/// (`com.atproto.identity.getRecommendedDidCredentials`)
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct IdentityCredentials {
    #[serde(default)]
    pub rotation_keys: Vec<String>,
    #[serde(default)]
    pub also_known_as: Vec<String>,
    #[serde(default)]
    pub verification_methods: BTreeMap<String, String>,
    #[serde(default)]
    pub services: BTreeMap<String, ServiceEndpoint>,
}

impl IdentityCredentials {
    /// `did:key` the target will sign repository commits with
    pub fn signing_key(&self) -> Option<&str> {
        self.verification_methods.get("atproto").map(String::as_str)
    }

    pub fn pds_endpoint(&self) -> Option<&str> {
        self.services
            .get("atproto_pds")
            .map(|service| service.endpoint.as_str())
    }

    pub fn handle(&self) -> Option<&str> {
        self.also_known_as
            .iter()
            .find_map(|aka| aka.strip_prefix("at://"))
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VerificationMethod {
    pub id: String,
    #[serde(rename = "type")]
    pub method_type: String,
    pub controller: String,
    #[serde(default)]
    pub public_key_multibase: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DidService {
    pub id: String,
    #[serde(rename = "type")]
    pub service_type: String,
    pub service_endpoint: String,
}

/// Resolved DID document (did:plc or did:web)
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DidDocument {
    pub id: String,
    #[serde(default)]
    pub also_known_as: Vec<String>,
    #[serde(default)]
    pub verification_method: Vec<VerificationMethod>,
    #[serde(default)]
    pub service: Vec<DidService>,
}

impl DidDocument {
    pub fn pds_endpoint(&self) -> Option<&str> {
        self.service
            .iter()
            .find(|service| {
                service.id.ends_with("#atproto_pds")
                    || service.service_type == "AtprotoPersonalDataServer"
            })
            .map(|service| service.service_endpoint.as_str())
    }

    /// Multibase public key of the `#atproto` verification method
    pub fn atproto_key(&self) -> Option<&str> {
        self.verification_method
            .iter()
            .find(|method| method.id.ends_with("#atproto"))
            .and_then(|method| method.public_key_multibase.as_deref())
    }

    pub fn handle(&self) -> Option<&str> {
        self.also_known_as
            .iter()
            .find_map(|aka| aka.strip_prefix("at://"))
    }
}
