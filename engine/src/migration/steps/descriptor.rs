//! Target server validation and capability discovery.

use std::num::NonZeroUsize;
use std::sync::Arc;

use lru::LruCache;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{debug, info, instrument, warn};
use url::Url;

use crate::migration::types::ServerDescriptor;
use crate::migration::validation::ensure_scheme;
use crate::services::client::errors::ClientError;
use crate::services::client::transport::PdsTransport;
use crate::services::config::NetworkConfig;
use crate::services::errors::MigrationError;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum DescriptorError {
    #[error("Please enter a server address")]
    Empty,

    #[error("'{address}' is not a valid server address")]
    Malformed { address: String },

    #[error("Migrating to {host} is not supported")]
    NotMigratable { host: String },

    #[error("{host} is the server you are migrating from")]
    SameAsSource { host: String },

    #[error("{endpoint} did not respond within {seconds} seconds")]
    Timeout { endpoint: String, seconds: u64 },

    #[error("{endpoint} is offline or unreachable: {message}")]
    Unreachable { endpoint: String, message: String },

    #[error("{endpoint} does not look like a PDS: {message}")]
    InvalidServer { endpoint: String, message: String },
}

impl From<DescriptorError> for MigrationError {
    fn from(error: DescriptorError) -> Self {
        match error {
            DescriptorError::Empty
            | DescriptorError::Malformed { .. }
            | DescriptorError::NotMigratable { .. }
            | DescriptorError::SameAsSource { .. } => {
                MigrationError::validation("target_server", error.to_string())
            }
            DescriptorError::Timeout { .. } | DescriptorError::Unreachable { .. } => {
                MigrationError::RemoteUnavailable {
                    message: error.to_string(),
                }
            }
            DescriptorError::InvalidServer { .. } => MigrationError::RemoteRejected {
                operation: "describeServer".to_string(),
                message: error.to_string(),
            },
        }
    }
}

/// A healthy PDS answers `/xrpc/_health` with a JSON string or with an object
/// holding nothing but a string `version`.
pub fn is_valid_health_payload(payload: &Value) -> bool {
    match payload {
        Value::String(_) => true,
        Value::Object(fields) => {
            fields.len() == 1 && fields.get("version").is_some_and(Value::is_string)
        }
        _ => false,
    }
}

/// Parses a user-typed address into a base URL, adding `https://` when the
/// scheme is missing.
pub fn normalize_address(address: &str) -> Result<Url, DescriptorError> {
    let trimmed = address.trim();
    if trimmed.is_empty() {
        return Err(DescriptorError::Empty);
    }

    let malformed = || DescriptorError::Malformed {
        address: trimmed.to_string(),
    };
    if let Some((scheme, _)) = trimmed.split_once("://") {
        if !scheme.eq_ignore_ascii_case("http") && !scheme.eq_ignore_ascii_case("https") {
            return Err(malformed());
        }
    }

    let url = Url::parse(&ensure_scheme(trimmed)).map_err(|_| malformed())?;
    if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
        return Err(malformed());
    }
    Ok(url)
}

/// `scheme://host[:port][/path]` without a trailing slash
pub fn endpoint_of(url: &Url) -> String {
    url.as_str()
        .split(['?', '#'])
        .next()
        .unwrap_or_default()
        .trim_end_matches('/')
        .to_string()
}

fn authority(url: &Url) -> String {
    let host = url.host_str().unwrap_or_default();
    match url.port() {
        Some(port) => format!("{}:{}", host, port),
        None => host.to_string(),
    }
}

pub struct ServerDescriptorResolver {
    transport: Arc<dyn PdsTransport>,
    config: NetworkConfig,
    source_authority: Option<String>,
    cache: Mutex<LruCache<String, ServerDescriptor>>,
}

impl ServerDescriptorResolver {
    pub fn new(transport: Arc<dyn PdsTransport>, config: NetworkConfig) -> Self {
        let capacity = NonZeroUsize::new(config.descriptor_cache_size).unwrap_or(NonZeroUsize::MIN);
        Self {
            transport,
            config,
            source_authority: None,
            cache: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Rejects `source` as a target from now on.
    pub fn with_source_server(mut self, source: &str) -> Self {
        self.source_authority = normalize_address(source).ok().map(|url| authority(&url));
        self
    }

    fn check_allowed(&self, url: &Url) -> Result<(), DescriptorError> {
        let host = url.host_str().unwrap_or_default().to_string();

        let denied = self.config.denied_hosts.iter().any(|denied| *denied == host)
            || self
                .config
                .denied_host_suffixes
                .iter()
                .any(|suffix| host.ends_with(suffix.as_str()));
        if denied {
            return Err(DescriptorError::NotMigratable { host });
        }

        if self.source_authority.as_deref() == Some(authority(url).as_str()) {
            return Err(DescriptorError::SameAsSource { host });
        }
        Ok(())
    }

    async fn check_health(&self, endpoint: &str) -> Result<(), DescriptorError> {
        let limit = self.config.health_timeout;
        let timed_out = || DescriptorError::Timeout {
            endpoint: endpoint.to_string(),
            seconds: limit.as_secs(),
        };

        let payload = match timeout(limit, self.transport.check_health(endpoint)).await {
            Err(_) => return Err(timed_out()),
            Ok(Err(ClientError::Timeout { .. })) => return Err(timed_out()),
            Ok(Err(e @ ClientError::NetworkError { .. })) => {
                return Err(DescriptorError::Unreachable {
                    endpoint: endpoint.to_string(),
                    message: e.to_string(),
                })
            }
            Ok(Err(e)) if e.is_transient() => {
                return Err(DescriptorError::Unreachable {
                    endpoint: endpoint.to_string(),
                    message: e.to_string(),
                })
            }
            Ok(Err(e)) => {
                return Err(DescriptorError::InvalidServer {
                    endpoint: endpoint.to_string(),
                    message: e.to_string(),
                })
            }
            Ok(Ok(payload)) => payload,
        };

        if is_valid_health_payload(&payload) {
            Ok(())
        } else {
            warn!("[Resolver] Unexpected health payload from {}: {}", endpoint, payload);
            Err(DescriptorError::InvalidServer {
                endpoint: endpoint.to_string(),
                message: "unexpected health check response".to_string(),
            })
        }
    }

    /// Validates `address` and fetches the server's capabilities. Successful
    /// lookups are cached by normalized address.
    #[instrument(skip(self), err)]
    pub async fn resolve(&self, address: &str) -> Result<ServerDescriptor, DescriptorError> {
        let url = normalize_address(address)?;
        self.check_allowed(&url)?;
        let endpoint = endpoint_of(&url);

        if let Some(cached) = self.cache.lock().await.get(&endpoint) {
            debug!("[Resolver] Using cached descriptor for {}", endpoint);
            return Ok(cached.clone());
        }

        self.check_health(&endpoint).await?;

        let description = self.transport.describe_server(&endpoint).await.map_err(|e| {
            DescriptorError::InvalidServer {
                endpoint: endpoint.clone(),
                message: e.to_string(),
            }
        })?;
        if description.did.is_empty() {
            return Err(DescriptorError::InvalidServer {
                endpoint,
                message: "server did not report its DID".to_string(),
            });
        }

        let descriptor = ServerDescriptor {
            endpoint: endpoint.clone(),
            did: description.did,
            available_handle_suffixes: description.available_user_domains,
            invite_code_required: description.invite_code_required.unwrap_or(false),
            phone_verification_required: description.phone_verification_required.unwrap_or(false),
            links: description.links.unwrap_or_default(),
            contact: description.contact.unwrap_or_default(),
        };

        info!(
            "[Resolver] {} resolved (invite required: {})",
            endpoint, descriptor.invite_code_required
        );
        self.cache.lock().await.put(endpoint, descriptor.clone());
        Ok(descriptor)
    }

    pub async fn invalidate(&self, address: &str) {
        if let Ok(url) = normalize_address(address) {
            self.cache.lock().await.pop(&endpoint_of(&url));
        }
    }
}
