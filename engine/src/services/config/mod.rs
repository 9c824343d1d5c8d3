use std::sync::OnceLock;
use std::time::Duration;

use tracing::warn;

/// Environment variable prefix for configuration overrides
pub const ENV_PREFIX: &str = "TEKTITE_";

/// Upper bound on blob transfers in flight
pub const MAX_BLOB_CONCURRENCY: usize = 5;
/// Upper bound on blob discovery/transfer rounds
pub const MAX_BLOB_PASSES: u32 = 3;
pub const MAX_DEACTIVATION_GRACE_DAYS: u64 = 365;

const SECS_PER_DAY: u64 = 24 * 60 * 60;

#[derive(Debug, Clone)]
pub struct MigrationConfig {
    pub blob: BlobConfig,
    pub network: NetworkConfig,
    pub session: SessionConfig,
    pub identity: IdentityConfig,
    pub finalize: FinalizeConfig,
}

#[derive(Debug, Clone)]
pub struct BlobConfig {
    /// `listMissingBlobs` page size; a shorter page ends discovery
    pub page_size: usize,
    /// Blob transfers in flight at once
    pub concurrency: usize,
    /// Discovery/transfer rounds before giving up on stubborn blobs
    pub max_passes: u32,
}

#[derive(Debug, Clone)]
pub struct NetworkConfig {
    pub health_timeout: Duration,
    pub request_timeout: Duration,
    pub user_agent: String,
    pub plc_directory: String,
    /// Hosts that cannot be migrated to
    pub denied_hosts: Vec<String>,
    /// Host suffixes that cannot be migrated to
    pub denied_host_suffixes: Vec<String>,
    pub descriptor_cache_size: usize,
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Idle lifetime of a persisted migration record
    pub ttl: Duration,
}

#[derive(Debug, Clone)]
pub struct IdentityConfig {
    /// Minimum spacing between PLC token requests
    pub token_cooldown: Duration,
    /// Lifetime requested for the createAccount service auth token
    pub service_auth_lifetime: Duration,
}

#[derive(Debug, Clone)]
pub struct FinalizeConfig {
    /// How long the deactivated source account is kept before deletion
    pub deactivation_grace: Duration,
}

impl Default for BlobConfig {
    fn default() -> Self {
        Self {
            page_size: 1000,
            concurrency: 5,
            max_passes: 3,
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            health_timeout: Duration::from_secs(15),
            request_timeout: Duration::from_secs(300),
            user_agent: "tektite-cc-atproto-migration-service/1.0".to_string(),
            plc_directory: "https://plc.directory".to_string(),
            denied_hosts: vec!["bsky.social".to_string(), "bsky.app".to_string()],
            denied_host_suffixes: vec![".bsky.network".to_string()],
            descriptor_cache_size: 32,
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(30 * 60),
        }
    }
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            token_cooldown: Duration::from_secs(60),
            service_auth_lifetime: Duration::from_secs(60 * 60),
        }
    }
}

impl Default for FinalizeConfig {
    fn default() -> Self {
        Self {
            deactivation_grace: Duration::from_secs(7 * SECS_PER_DAY),
        }
    }
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl MigrationConfig {
    pub fn new() -> Self {
        Self {
            blob: BlobConfig::default(),
            network: NetworkConfig::default(),
            session: SessionConfig::default(),
            identity: IdentityConfig::default(),
            finalize: FinalizeConfig::default(),
        }
    }

    /// Defaults with `TEKTITE_*` environment overrides applied
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Applies overrides from `lookup`; unparseable values are logged and ignored.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::new();
        let var = |name: &str| lookup(&format!("{}{}", ENV_PREFIX, name));

        if let Some(value) = parse_var::<usize>("BLOB_CONCURRENCY", var("BLOB_CONCURRENCY")) {
            config.blob.concurrency = value;
        }
        if let Some(value) = parse_var::<u32>("BLOB_MAX_PASSES", var("BLOB_MAX_PASSES")) {
            config.blob.max_passes = value;
        }
        if let Some(value) = parse_var::<u64>("HEALTH_TIMEOUT_SECS", var("HEALTH_TIMEOUT_SECS")) {
            config.network.health_timeout = Duration::from_secs(value);
        }
        if let Some(value) = parse_var::<u64>("REQUEST_TIMEOUT_SECS", var("REQUEST_TIMEOUT_SECS")) {
            config.network.request_timeout = Duration::from_secs(value);
        }
        if let Some(value) = var("PLC_DIRECTORY") {
            config.network.plc_directory = value.trim_end_matches('/').to_string();
        }
        if let Some(value) = parse_var::<u64>("SESSION_TTL_SECS", var("SESSION_TTL_SECS")) {
            config.session.ttl = Duration::from_secs(value);
        }
        if let Some(days) = parse_var::<u64>("DEACTIVATION_GRACE_DAYS", var("DEACTIVATION_GRACE_DAYS")) {
            match days.checked_mul(SECS_PER_DAY) {
                Some(secs) => config.finalize.deactivation_grace = Duration::from_secs(secs),
                None => warn!(
                    "Ignoring {}DEACTIVATION_GRACE_DAYS={}: out of range",
                    ENV_PREFIX, days
                ),
            }
        }

        config
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.blob.concurrency == 0 || self.blob.concurrency > MAX_BLOB_CONCURRENCY {
            return Err(format!(
                "blob.concurrency must be between 1 and {}",
                MAX_BLOB_CONCURRENCY
            ));
        }

        if self.blob.page_size == 0 {
            return Err("blob.page_size must be greater than 0".to_string());
        }

        if self.blob.max_passes == 0 || self.blob.max_passes > MAX_BLOB_PASSES {
            return Err(format!(
                "blob.max_passes must be between 1 and {}",
                MAX_BLOB_PASSES
            ));
        }

        if self.network.health_timeout.is_zero() {
            return Err("network.health_timeout must be greater than 0".to_string());
        }

        if self.network.descriptor_cache_size == 0 {
            return Err("network.descriptor_cache_size must be greater than 0".to_string());
        }

        if self.session.ttl.is_zero() {
            return Err("session.ttl must be greater than 0".to_string());
        }

        if self.finalize.deactivation_grace
            > Duration::from_secs(MAX_DEACTIVATION_GRACE_DAYS * SECS_PER_DAY)
        {
            return Err(format!(
                "finalize.deactivation_grace must be at most {} days",
                MAX_DEACTIVATION_GRACE_DAYS
            ));
        }

        Ok(())
    }
}

fn parse_var<T: std::str::FromStr>(name: &str, value: Option<String>) -> Option<T> {
    let raw = value?;
    match raw.trim().parse::<T>() {
        Ok(parsed) => Some(parsed),
        Err(_) => {
            warn!("Ignoring {}{}={:?}: not a valid value", ENV_PREFIX, name, raw);
            None
        }
    }
}

static GLOBAL_CONFIG: OnceLock<MigrationConfig> = OnceLock::new();

/// Process-wide configuration, read from the environment on first access
pub fn get_global_config() -> MigrationConfig {
    GLOBAL_CONFIG
        .get_or_init(|| {
            let config = MigrationConfig::from_env();
            if let Err(e) = config.validate() {
                warn!("Invalid configuration: {}", e);
                MigrationConfig::new()
            } else {
                config
            }
        })
        .clone()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn defaults_match_protocol_constants() {
        let config = MigrationConfig::default();
        assert_eq!(config.blob.page_size, 1000);
        assert_eq!(config.blob.concurrency, 5);
        assert_eq!(config.blob.max_passes, 3);
        assert_eq!(config.network.health_timeout, Duration::from_secs(15));
        assert_eq!(config.session.ttl, Duration::from_secs(1800));
        assert_eq!(config.identity.token_cooldown, Duration::from_secs(60));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn lookup_overrides_apply() {
        let vars: HashMap<&str, &str> = [
            ("TEKTITE_BLOB_CONCURRENCY", "3"),
            ("TEKTITE_PLC_DIRECTORY", "https://plc.example/"),
            ("TEKTITE_DEACTIVATION_GRACE_DAYS", "3"),
        ]
        .into_iter()
        .collect();

        let config = MigrationConfig::from_lookup(|key| vars.get(key).map(|v| v.to_string()));
        assert_eq!(config.blob.concurrency, 3);
        assert_eq!(config.network.plc_directory, "https://plc.example");
        assert_eq!(
            config.finalize.deactivation_grace,
            Duration::from_secs(3 * 24 * 60 * 60)
        );
        assert!(config.validate().is_ok());
    }

    #[test]
    fn invalid_overrides_are_ignored() {
        let config = MigrationConfig::from_lookup(|key| {
            (key == "TEKTITE_BLOB_CONCURRENCY").then(|| "lots".to_string())
        });
        assert_eq!(config.blob.concurrency, 5);
    }

    #[test]
    fn zero_concurrency_is_invalid() {
        let mut config = MigrationConfig::default();
        config.blob.concurrency = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn blob_limits_cannot_be_raised() {
        let vars: HashMap<&str, &str> = [
            ("TEKTITE_BLOB_CONCURRENCY", "12"),
            ("TEKTITE_BLOB_MAX_PASSES", "3"),
        ]
        .into_iter()
        .collect();
        let config = MigrationConfig::from_lookup(|key| vars.get(key).map(|v| v.to_string()));
        assert!(config.validate().is_err());

        let mut config = MigrationConfig::default();
        config.blob.max_passes = 4;
        assert!(config.validate().is_err());
    }

    #[test]
    fn oversized_grace_period_is_rejected() {
        let config = MigrationConfig::from_lookup(|key| {
            (key == "TEKTITE_DEACTIVATION_GRACE_DAYS").then(|| u64::MAX.to_string())
        });
        assert_eq!(
            config.finalize.deactivation_grace,
            Duration::from_secs(7 * SECS_PER_DAY)
        );

        let config = MigrationConfig::from_lookup(|key| {
            (key == "TEKTITE_DEACTIVATION_GRACE_DAYS").then(|| "100000".to_string())
        });
        assert!(config.validate().is_err());
    }
}
