//! In-memory stand-in for the source server, target server and PLC
//! directory, shared by the migration tests.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, TimeZone, Utc};
use serde_json::{json, Value};

use crate::migration::clock::ManualClock;
use crate::migration::orchestrator::EngineDeps;
use crate::migration::storage::MemorySessionStore;
use crate::migration::types::{MigrationSession, ServerDescriptor};
use crate::services::client::errors::{ClientError, ClientResult};
use crate::services::client::transport::PdsTransport;
use crate::services::client::types::*;
use crate::services::config::MigrationConfig;
use crate::services::plc::RotationKey;

pub const SOURCE: &str = "https://old.test";
pub const TARGET: &str = "https://new.test";
pub const DID: &str = "did:plc:abc123";
pub const TARGET_DID: &str = "did:web:new.test";
pub const ROTATION_KEY_HEX: &str =
    "0000000000000000000000000000000000000000000000000000000000000001";

pub enum HealthBehavior {
    Payload(Value),
    Hang,
    Unreachable,
}

pub struct FakeState {
    /// Target's view of the account; `None` means no repository
    pub repo_status: Option<RepoStatus>,
    /// Blobs the target is missing, in listing order
    pub missing: Vec<String>,
    /// Uploads that report success but never land
    pub stubborn: HashSet<String>,
    /// Downloads that fail
    pub broken_downloads: HashSet<String>,
    pub health: HealthBehavior,
    pub description: ServerDescription,
    pub did_document: Option<DidDocument>,
    pub credentials: IdentityCredentials,
    pub last_operation: Value,
    /// Operation names that are rejected by the remote
    pub fail: HashSet<&'static str>,
    pub submitted: Vec<Value>,
    pub uploaded_content_types: Vec<Option<String>>,
    pub deactivated_with: Option<Option<DateTime<Utc>>>,
    pub preferences: Value,
    pub stored_preferences: Option<Value>,
    pub created_accounts: Vec<CreateAccountRequest>,
    pub service_auth_requests: Vec<(String, Option<String>, Option<i64>)>,
}

pub fn blob_cids(count: usize) -> Vec<String> {
    (0..count).map(|i| format!("bafkreiblob{:05}", i)).collect()
}

pub fn start_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).single().unwrap_or_else(Utc::now)
}

pub fn session(server: &str) -> ClientSessionCredentials {
    ClientSessionCredentials {
        did: DID.to_string(),
        handle: "alice.old.test".to_string(),
        pds: server.to_string(),
        access_jwt: format!("access-{}", server),
        refresh_jwt: format!("refresh-{}", server),
        expires_at: None,
    }
}

pub fn descriptor() -> ServerDescriptor {
    ServerDescriptor {
        endpoint: TARGET.to_string(),
        did: TARGET_DID.to_string(),
        available_handle_suffixes: vec![".new.test".to_string()],
        invite_code_required: false,
        phone_verification_required: false,
        links: ServerLinks::default(),
        contact: ServerContact::default(),
    }
}

pub fn migration_session() -> MigrationSession {
    MigrationSession::new(
        SOURCE.to_string(),
        TARGET.to_string(),
        DID.to_string(),
        Some("new-test-abcde-12345".to_string()),
        "alice.new.test".to_string(),
        "alice@example.com".to_string(),
        "hunter2".to_string(),
        start_time(),
    )
}

pub fn did_document(did: &str, endpoint: &str, key: &str) -> DidDocument {
    serde_json::from_value(json!({
        "id": did,
        "alsoKnownAs": ["at://alice.new.test"],
        "verificationMethod": [{
            "id": format!("{}#atproto", did),
            "type": "Multikey",
            "controller": did,
            "publicKeyMultibase": key
        }],
        "service": [{
            "id": "#atproto_pds",
            "type": "AtprotoPersonalDataServer",
            "serviceEndpoint": endpoint
        }]
    }))
    .unwrap()
}

impl Default for FakeState {
    fn default() -> Self {
        let owner_key = RotationKey::parse(ROTATION_KEY_HEX).unwrap().did_key();
        Self {
            repo_status: None,
            missing: Vec::new(),
            stubborn: HashSet::new(),
            broken_downloads: HashSet::new(),
            health: HealthBehavior::Payload(json!({"version": "0.4.107"})),
            description: serde_json::from_value(json!({
                "did": TARGET_DID,
                "availableUserDomains": [".new.test"],
                "inviteCodeRequired": false,
                "links": {"privacyPolicy": "https://new.test/privacy"},
                "contact": {"email": "admin@new.test"}
            }))
            .unwrap(),
            did_document: Some(did_document(DID, SOURCE, "zQ3shOldSigning")),
            credentials: serde_json::from_value(json!({
                "rotationKeys": ["did:key:zQ3shTargetRotation"],
                "alsoKnownAs": ["at://alice.new.test"],
                "verificationMethods": {"atproto": "did:key:zQ3shNewSigning"},
                "services": {
                    "atproto_pds": {"type": "AtprotoPersonalDataServer", "endpoint": TARGET}
                }
            }))
            .unwrap(),
            last_operation: json!({
                "type": "plc_operation",
                "rotationKeys": [owner_key, "did:key:zQ3shSourceRotation"],
                "verificationMethods": {"atproto": "did:key:zQ3shOldSigning"},
                "alsoKnownAs": ["at://alice.old.test"],
                "services": {
                    "atproto_pds": {"type": "AtprotoPersonalDataServer", "endpoint": SOURCE}
                },
                "prev": null,
                "sig": "c2lnbmF0dXJl"
            }),
            fail: HashSet::new(),
            submitted: Vec::new(),
            uploaded_content_types: Vec::new(),
            deactivated_with: None,
            preferences: json!({"preferences": [{"$type": "app.bsky.actor.defs#adultContentPref", "enabled": false}]}),
            stored_preferences: None,
            created_accounts: Vec::new(),
            service_auth_requests: Vec::new(),
        }
    }
}

pub struct FakeTransport {
    state: Mutex<FakeState>,
    calls: Mutex<Vec<String>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    blob_delay: Duration,
}

impl FakeTransport {
    pub fn new() -> Self {
        Self::with_state(|_| {})
    }

    pub fn with_state(configure: impl FnOnce(&mut FakeState)) -> Self {
        let mut state = FakeState::default();
        configure(&mut state);
        Self {
            state: Mutex::new(state),
            calls: Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            blob_delay: Duration::from_millis(2),
        }
    }

    pub fn state(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap()
    }

    pub fn calls(&self, operation: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|name| name.as_str() == operation)
            .count()
    }

    pub fn call_log(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn record(&self, operation: &'static str) -> ClientResult<()> {
        self.calls.lock().unwrap().push(operation.to_string());
        if self.state().fail.contains(operation) {
            return Err(ClientError::PdsOperationFailed {
                operation: operation.to_string(),
                status: 400,
                error_code: Some("InvalidRequest".to_string()),
                message: format!("{} rejected by server", operation),
            });
        }
        Ok(())
    }
}

/// Engine dependencies wired to fakes
pub fn deps(transport: Arc<FakeTransport>) -> (EngineDeps, Arc<MemorySessionStore>, ManualClock) {
    let store = Arc::new(MemorySessionStore::new());
    let clock = ManualClock::new(start_time());
    let deps = EngineDeps {
        transport,
        store: store.clone(),
        clock: Arc::new(clock.clone()),
        reporter: Arc::new(crate::migration::progress::LoggingReporter),
        config: MigrationConfig::default(),
    };
    (deps, store, clock)
}

#[async_trait]
impl PdsTransport for FakeTransport {
    async fn check_health(&self, _server: &str) -> ClientResult<Value> {
        self.record("check_health")?;
        let immediate = match &self.state().health {
            HealthBehavior::Payload(payload) => Some(Ok(payload.clone())),
            HealthBehavior::Unreachable => Some(Err(ClientError::NetworkError {
                message: "connection refused".to_string(),
            })),
            HealthBehavior::Hang => None,
        };
        match immediate {
            Some(result) => result,
            None => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(json!({"version": "late"}))
            }
        }
    }

    async fn describe_server(&self, _server: &str) -> ClientResult<ServerDescription> {
        self.record("describe_server")?;
        Ok(self.state().description.clone())
    }

    async fn login(
        &self,
        server: &str,
        identifier: &str,
        _password: &str,
    ) -> ClientResult<ClientSessionCredentials> {
        self.record("login")?;
        let mut creds = session(server);
        if identifier.starts_with("did:") {
            creds.did = identifier.to_string();
        }
        Ok(creds)
    }

    async fn refresh_session(
        &self,
        session: &ClientSessionCredentials,
    ) -> ClientResult<ClientSessionCredentials> {
        self.record("refresh_session")?;
        let mut refreshed = session.clone();
        refreshed.access_jwt = format!("{}-refreshed", session.access_jwt);
        refreshed.expires_at = None;
        Ok(refreshed)
    }

    async fn get_service_auth(
        &self,
        _session: &ClientSessionCredentials,
        audience: &str,
        lexicon_method: Option<&str>,
        expires_at: Option<i64>,
    ) -> ClientResult<String> {
        self.record("get_service_auth")?;
        self.state().service_auth_requests.push((
            audience.to_string(),
            lexicon_method.map(str::to_string),
            expires_at,
        ));
        Ok("service-auth-token".to_string())
    }

    async fn create_account(
        &self,
        server: &str,
        request: &CreateAccountRequest,
    ) -> ClientResult<ClientSessionCredentials> {
        self.record("create_account")?;
        let mut state = self.state();
        state.repo_status = Some(RepoStatus::Deactivated);
        state.created_accounts.push(request.clone());
        let mut creds = session(server);
        creds.handle = request.handle.clone();
        Ok(creds)
    }

    async fn get_repo_status(
        &self,
        server: &str,
        did: &str,
    ) -> ClientResult<Option<RepoStatusInfo>> {
        self.record("get_repo_status")?;
        if server != TARGET {
            return Ok(Some(RepoStatusInfo {
                did: did.to_string(),
                active: true,
                status: None,
                rev: None,
            }));
        }
        Ok(self.state().repo_status.map(|status| RepoStatusInfo {
            did: did.to_string(),
            active: status == RepoStatus::Active,
            status: (status != RepoStatus::Active).then_some(status),
            rev: None,
        }))
    }

    async fn activate_account(&self, session: &ClientSessionCredentials) -> ClientResult<()> {
        self.record("activate_account")?;
        if session.pds == TARGET {
            self.state().repo_status = Some(RepoStatus::Active);
        }
        Ok(())
    }

    async fn deactivate_account(
        &self,
        _session: &ClientSessionCredentials,
        delete_after: Option<DateTime<Utc>>,
    ) -> ClientResult<()> {
        self.record("deactivate_account")?;
        self.state().deactivated_with = Some(delete_after);
        Ok(())
    }

    async fn request_account_delete(
        &self,
        _session: &ClientSessionCredentials,
    ) -> ClientResult<()> {
        self.record("request_account_delete")
    }

    async fn delete_account(
        &self,
        _server: &str,
        _did: &str,
        _password: &str,
        _token: &str,
    ) -> ClientResult<()> {
        self.record("delete_account")?;
        self.state().repo_status = None;
        Ok(())
    }

    async fn export_repo(&self, _session: &ClientSessionCredentials) -> ClientResult<Bytes> {
        self.record("export_repo")?;
        Ok(Bytes::from_static(b"car-bytes"))
    }

    async fn import_repo(
        &self,
        _session: &ClientSessionCredentials,
        _car: Bytes,
    ) -> ClientResult<()> {
        self.record("import_repo")
    }

    async fn list_missing_blobs(
        &self,
        _session: &ClientSessionCredentials,
        cursor: Option<&str>,
        limit: usize,
    ) -> ClientResult<MissingBlobsPage> {
        self.record("list_missing_blobs")?;
        let state = self.state();
        let start = cursor.and_then(|c| c.parse::<usize>().ok()).unwrap_or(0);
        let end = (start + limit).min(state.missing.len());
        let cids = state.missing.get(start..end).unwrap_or_default().to_vec();
        let cursor = (cids.len() == limit).then(|| end.to_string());
        Ok(MissingBlobsPage { cids, cursor })
    }

    async fn get_blob(
        &self,
        _session: &ClientSessionCredentials,
        _did: &str,
        cid: &str,
    ) -> ClientResult<BlobPayload> {
        self.calls.lock().unwrap().push("get_blob".to_string());
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(self.blob_delay).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if self.state().broken_downloads.contains(cid) {
            return Err(ClientError::NetworkError {
                message: format!("download of {} reset", cid),
            });
        }
        Ok(BlobPayload {
            data: Bytes::from(cid.to_string()),
            content_type: Some("image/jpeg".to_string()),
        })
    }

    async fn upload_blob(
        &self,
        _session: &ClientSessionCredentials,
        blob: BlobPayload,
    ) -> ClientResult<()> {
        self.record("upload_blob")?;
        let cid = String::from_utf8_lossy(&blob.data).to_string();
        let mut state = self.state();
        state.uploaded_content_types.push(blob.content_type);
        if !state.stubborn.contains(&cid) {
            state.missing.retain(|missing| *missing != cid);
        }
        Ok(())
    }

    async fn get_preferences(&self, _session: &ClientSessionCredentials) -> ClientResult<Value> {
        self.record("get_preferences")?;
        Ok(self.state().preferences.clone())
    }

    async fn put_preferences(
        &self,
        _session: &ClientSessionCredentials,
        preferences: &Value,
    ) -> ClientResult<()> {
        self.record("put_preferences")?;
        self.state().stored_preferences = Some(preferences.clone());
        Ok(())
    }

    async fn resolve_handle(&self, _handle: &str) -> ClientResult<String> {
        self.record("resolve_handle")?;
        Ok(DID.to_string())
    }

    async fn resolve_did_document(&self, did: &str) -> ClientResult<DidDocument> {
        self.record("resolve_did_document")?;
        self.state()
            .did_document
            .clone()
            .ok_or_else(|| ClientError::PdsOperationFailed {
                operation: "resolveDid".to_string(),
                status: 404,
                error_code: None,
                message: format!("{} not found", did),
            })
    }

    async fn get_recommended_did_credentials(
        &self,
        _session: &ClientSessionCredentials,
    ) -> ClientResult<IdentityCredentials> {
        self.record("get_recommended_did_credentials")?;
        Ok(self.state().credentials.clone())
    }

    async fn request_plc_operation_signature(
        &self,
        _session: &ClientSessionCredentials,
    ) -> ClientResult<()> {
        self.record("request_plc_operation_signature")
    }

    async fn sign_plc_operation(
        &self,
        _session: &ClientSessionCredentials,
        token: &str,
        credentials: &IdentityCredentials,
    ) -> ClientResult<Value> {
        self.record("sign_plc_operation")?;
        Ok(json!({
            "type": "plc_operation",
            "token": token,
            "services": credentials.services,
            "sig": "signed-by-source"
        }))
    }

    async fn submit_plc_operation(
        &self,
        session: &ClientSessionCredentials,
        operation: &Value,
    ) -> ClientResult<()> {
        self.record("submit_plc_operation")?;
        let mut state = self.state();
        state.submitted.push(operation.clone());
        let key = state
            .credentials
            .verification_methods
            .get("atproto")
            .cloned()
            .unwrap_or_default();
        state.did_document = Some(did_document(DID, &session.pds, &key));
        Ok(())
    }

    async fn get_last_plc_operation(&self, _did: &str) -> ClientResult<Value> {
        self.record("get_last_plc_operation")?;
        Ok(self.state().last_operation.clone())
    }
}
