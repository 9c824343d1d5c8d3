use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde_json::Value;

use super::errors::ClientResult;
use super::types::{
    BlobPayload, ClientSessionCredentials, CreateAccountRequest, DidDocument,
    IdentityCredentials, MissingBlobsPage, RepoStatusInfo, ServerDescription,
};

/// Remote operations the migration needs from the source server, the target
/// server and the identity directory.
///
/// `server` arguments are normalized base URLs (`https://host[:port]`);
/// session-bound calls go to `session.pds`.
#[async_trait]
pub trait PdsTransport: Send + Sync {
    // Server discovery
    async fn check_health(&self, server: &str) -> ClientResult<Value>;
    async fn describe_server(&self, server: &str) -> ClientResult<ServerDescription>;

    // Sessions
    async fn login(
        &self,
        server: &str,
        identifier: &str,
        password: &str,
    ) -> ClientResult<ClientSessionCredentials>;
    async fn refresh_session(
        &self,
        session: &ClientSessionCredentials,
    ) -> ClientResult<ClientSessionCredentials>;

    // Accounts
    async fn get_service_auth(
        &self,
        session: &ClientSessionCredentials,
        audience: &str,
        lexicon_method: Option<&str>,
        expires_at: Option<i64>,
    ) -> ClientResult<String>;
    async fn create_account(
        &self,
        server: &str,
        request: &CreateAccountRequest,
    ) -> ClientResult<ClientSessionCredentials>;
    /// `Ok(None)` when the server holds no repository for `did`.
    async fn get_repo_status(&self, server: &str, did: &str)
        -> ClientResult<Option<RepoStatusInfo>>;
    async fn activate_account(&self, session: &ClientSessionCredentials) -> ClientResult<()>;
    async fn deactivate_account(
        &self,
        session: &ClientSessionCredentials,
        delete_after: Option<DateTime<Utc>>,
    ) -> ClientResult<()>;
    async fn request_account_delete(&self, session: &ClientSessionCredentials)
        -> ClientResult<()>;
    async fn delete_account(
        &self,
        server: &str,
        did: &str,
        password: &str,
        token: &str,
    ) -> ClientResult<()>;

    // Repository
    async fn export_repo(&self, session: &ClientSessionCredentials) -> ClientResult<Bytes>;
    async fn import_repo(&self, session: &ClientSessionCredentials, car: Bytes)
        -> ClientResult<()>;

    // Blobs
    async fn list_missing_blobs(
        &self,
        session: &ClientSessionCredentials,
        cursor: Option<&str>,
        limit: usize,
    ) -> ClientResult<MissingBlobsPage>;
    async fn get_blob(
        &self,
        session: &ClientSessionCredentials,
        did: &str,
        cid: &str,
    ) -> ClientResult<BlobPayload>;
    async fn upload_blob(
        &self,
        session: &ClientSessionCredentials,
        blob: BlobPayload,
    ) -> ClientResult<()>;

    // Preferences
    async fn get_preferences(&self, session: &ClientSessionCredentials) -> ClientResult<Value>;
    async fn put_preferences(
        &self,
        session: &ClientSessionCredentials,
        preferences: &Value,
    ) -> ClientResult<()>;

    // Identity
    async fn resolve_handle(&self, handle: &str) -> ClientResult<String>;
    async fn resolve_did_document(&self, did: &str) -> ClientResult<DidDocument>;
    async fn get_recommended_did_credentials(
        &self,
        session: &ClientSessionCredentials,
    ) -> ClientResult<IdentityCredentials>;
    async fn request_plc_operation_signature(
        &self,
        session: &ClientSessionCredentials,
    ) -> ClientResult<()>;
    async fn sign_plc_operation(
        &self,
        session: &ClientSessionCredentials,
        token: &str,
        credentials: &IdentityCredentials,
    ) -> ClientResult<Value>;
    async fn submit_plc_operation(
        &self,
        session: &ClientSessionCredentials,
        operation: &Value,
    ) -> ClientResult<()>;
    async fn get_last_plc_operation(&self, did: &str) -> ClientResult<Value>;
}
