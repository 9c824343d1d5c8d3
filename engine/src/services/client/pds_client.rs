use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde_json::Value;

use super::api::{blob, plc, preferences, repo, server};
use super::auth;
use super::errors::{ClientError, ClientResult};
use super::transport::PdsTransport;
use super::types::*;
use crate::services::config::NetworkConfig;

/// reqwest-backed [`PdsTransport`] speaking XRPC to real servers
#[derive(Clone)]
pub struct PdsClient {
    pub(crate) http_client: Client,
    pub(crate) plc_directory: String,
}

impl PdsClient {
    pub fn new(config: &NetworkConfig) -> ClientResult<Self> {
        let http_client = Client::builder()
            .user_agent(config.user_agent.as_str())
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| ClientError::NetworkError {
                message: format!("Failed to create HTTP client: {}", e),
            })?;

        Ok(Self {
            http_client,
            plc_directory: config.plc_directory.clone(),
        })
    }
}

#[async_trait]
impl PdsTransport for PdsClient {
    async fn check_health(&self, server: &str) -> ClientResult<Value> {
        server::check_health_impl(self, server).await
    }

    async fn describe_server(&self, server: &str) -> ClientResult<ServerDescription> {
        server::describe_server_impl(self, server).await
    }

    async fn login(
        &self,
        server: &str,
        identifier: &str,
        password: &str,
    ) -> ClientResult<ClientSessionCredentials> {
        auth::login_impl(self, server, identifier, password).await
    }

    async fn refresh_session(
        &self,
        session: &ClientSessionCredentials,
    ) -> ClientResult<ClientSessionCredentials> {
        auth::refresh_session_impl(self, session).await
    }

    async fn get_service_auth(
        &self,
        session: &ClientSessionCredentials,
        audience: &str,
        lexicon_method: Option<&str>,
        expires_at: Option<i64>,
    ) -> ClientResult<String> {
        auth::get_service_auth_impl(self, session, audience, lexicon_method, expires_at).await
    }

    async fn create_account(
        &self,
        server: &str,
        request: &CreateAccountRequest,
    ) -> ClientResult<ClientSessionCredentials> {
        auth::create_account_impl(self, server, request).await
    }

    async fn get_repo_status(
        &self,
        server: &str,
        did: &str,
    ) -> ClientResult<Option<RepoStatusInfo>> {
        auth::get_repo_status_impl(self, server, did).await
    }

    async fn activate_account(&self, session: &ClientSessionCredentials) -> ClientResult<()> {
        auth::activate_account_impl(self, session).await
    }

    async fn deactivate_account(
        &self,
        session: &ClientSessionCredentials,
        delete_after: Option<DateTime<Utc>>,
    ) -> ClientResult<()> {
        auth::deactivate_account_impl(self, session, delete_after).await
    }

    async fn request_account_delete(
        &self,
        session: &ClientSessionCredentials,
    ) -> ClientResult<()> {
        auth::request_account_delete_impl(self, session).await
    }

    async fn delete_account(
        &self,
        server: &str,
        did: &str,
        password: &str,
        token: &str,
    ) -> ClientResult<()> {
        auth::delete_account_impl(self, server, did, password, token).await
    }

    async fn export_repo(&self, session: &ClientSessionCredentials) -> ClientResult<Bytes> {
        repo::export_repository_impl(self, session).await
    }

    async fn import_repo(
        &self,
        session: &ClientSessionCredentials,
        car: Bytes,
    ) -> ClientResult<()> {
        repo::import_repository_impl(self, session, car).await
    }

    async fn list_missing_blobs(
        &self,
        session: &ClientSessionCredentials,
        cursor: Option<&str>,
        limit: usize,
    ) -> ClientResult<MissingBlobsPage> {
        blob::list_missing_blobs_impl(self, session, cursor, limit).await
    }

    async fn get_blob(
        &self,
        session: &ClientSessionCredentials,
        did: &str,
        cid: &str,
    ) -> ClientResult<BlobPayload> {
        blob::get_blob_impl(self, session, did, cid).await
    }

    async fn upload_blob(
        &self,
        session: &ClientSessionCredentials,
        blob: BlobPayload,
    ) -> ClientResult<()> {
        blob::upload_blob_impl(self, session, blob).await
    }

    async fn get_preferences(&self, session: &ClientSessionCredentials) -> ClientResult<Value> {
        preferences::export_preferences_impl(self, session).await
    }

    async fn put_preferences(
        &self,
        session: &ClientSessionCredentials,
        preferences: &Value,
    ) -> ClientResult<()> {
        preferences::import_preferences_impl(self, session, preferences).await
    }

    async fn resolve_handle(&self, handle: &str) -> ClientResult<String> {
        plc::resolve_handle_impl(self, handle).await
    }

    async fn resolve_did_document(&self, did: &str) -> ClientResult<DidDocument> {
        plc::resolve_did_document_impl(self, did).await
    }

    async fn get_recommended_did_credentials(
        &self,
        session: &ClientSessionCredentials,
    ) -> ClientResult<IdentityCredentials> {
        plc::get_plc_recommendation_impl(self, session).await
    }

    async fn request_plc_operation_signature(
        &self,
        session: &ClientSessionCredentials,
    ) -> ClientResult<()> {
        plc::request_plc_token_impl(self, session).await
    }

    async fn sign_plc_operation(
        &self,
        session: &ClientSessionCredentials,
        token: &str,
        credentials: &IdentityCredentials,
    ) -> ClientResult<Value> {
        plc::sign_plc_operation_impl(self, session, token, credentials).await
    }

    async fn submit_plc_operation(
        &self,
        session: &ClientSessionCredentials,
        operation: &Value,
    ) -> ClientResult<()> {
        plc::submit_plc_operation_impl(self, session, operation).await
    }

    async fn get_last_plc_operation(&self, did: &str) -> ClientResult<Value> {
        plc::get_last_plc_operation_impl(self, did).await
    }
}
