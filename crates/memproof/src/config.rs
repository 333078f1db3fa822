//! Service configuration.
//!
//! Every section has a `Default`. [`ServiceConfig::from_env`] fills the
//! required values (ledger endpoint, signing credential, contract address)
//! from `MEMPROOF_*` environment variables and applies optional tuning
//! overrides on top of the defaults.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use memproof_core::{Address, Keypair};

pub use memproof_aggregate::IngestorConfig;

use crate::error::{Result, ServiceError};

/// Bounded exponential backoff for transient ledger failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Submission attempts before the batch is marked failed.
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub multiplier: u32,
}

impl RetryPolicy {
    /// Delay to wait after failed attempt number `attempt` (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = self
            .multiplier
            .max(1)
            .saturating_pow(attempt.saturating_sub(1));
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(30),
            multiplier: 2,
        }
    }
}

/// Configuration for the batch commit coordinator.
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    pub retry: RetryPolicy,
    /// Delay between receipt polls while waiting for inclusion.
    pub confirmation_interval: Duration,
    /// Receipt polls before a submitted batch is considered timed out.
    pub max_confirmation_polls: u32,
    /// Largest number of pending leaves one batch takes.
    pub max_leaves_per_batch: usize,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            confirmation_interval: Duration::from_secs(2),
            max_confirmation_polls: 90,
            max_leaves_per_batch: 1024,
        }
    }
}

/// Configuration for the query cache.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub ttl: Duration,
    /// Maximum live entries per cache.
    pub capacity: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(60),
            capacity: 10_000,
        }
    }
}

/// Full service configuration.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Endpoint of the ledger node, handed to the ledger client.
    pub ledger_url: String,
    /// Relayer key used to sign batch submissions.
    pub signing_key: Keypair,
    /// The memory registry contract.
    pub contract: Address,
    /// SQLite file; in-memory when absent.
    pub database_path: Option<PathBuf>,
    pub coordinator: CoordinatorConfig,
    pub ingestor: IngestorConfig,
    pub cache: CacheConfig,
}

impl ServiceConfig {
    /// Configuration with default tuning.
    pub fn new(ledger_url: impl Into<String>, signing_key: Keypair, contract: Address) -> Self {
        Self {
            ledger_url: ledger_url.into(),
            signing_key,
            contract,
            database_path: None,
            coordinator: CoordinatorConfig::default(),
            ingestor: IngestorConfig::default(),
            cache: CacheConfig::default(),
        }
    }

    /// Read configuration from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Read configuration through `lookup`, which maps a variable name to
    /// its value.
    ///
    /// Required: `MEMPROOF_LEDGER_URL`, `MEMPROOF_SIGNING_KEY` (32-byte hex
    /// seed), `MEMPROOF_CONTRACT_ADDRESS`. Optional: `MEMPROOF_DATABASE_PATH`,
    /// `MEMPROOF_MAX_ATTEMPTS`, `MEMPROOF_MAX_LEAVES_PER_BATCH`,
    /// `MEMPROOF_CONFIRMATION_POLLS`, `MEMPROOF_INGEST_PAGE_SIZE`,
    /// `MEMPROOF_CACHE_TTL_SECS`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let required = |name: &str| {
            lookup(name)
                .filter(|v| !v.trim().is_empty())
                .ok_or_else(|| ServiceError::Config(format!("{name} is not set")))
        };

        let ledger_url = required("MEMPROOF_LEDGER_URL")?;
        let signing_key = Keypair::from_hex_seed(&required("MEMPROOF_SIGNING_KEY")?)
            .map_err(|e| ServiceError::Config(format!("MEMPROOF_SIGNING_KEY: {e}")))?;
        let contract = Address::from_hex(&required("MEMPROOF_CONTRACT_ADDRESS")?)
            .map_err(|e| ServiceError::Config(format!("MEMPROOF_CONTRACT_ADDRESS: {e}")))?;

        let mut config = Self::new(ledger_url, signing_key, contract);
        config.database_path = lookup("MEMPROOF_DATABASE_PATH").map(PathBuf::from);

        if let Some(v) = parse_opt(&lookup, "MEMPROOF_MAX_ATTEMPTS")? {
            config.coordinator.retry.max_attempts = v;
        }
        if let Some(v) = parse_opt(&lookup, "MEMPROOF_MAX_LEAVES_PER_BATCH")? {
            config.coordinator.max_leaves_per_batch = v;
        }
        if let Some(v) = parse_opt(&lookup, "MEMPROOF_CONFIRMATION_POLLS")? {
            config.coordinator.max_confirmation_polls = v;
        }
        if let Some(v) = parse_opt(&lookup, "MEMPROOF_INGEST_PAGE_SIZE")? {
            config.ingestor.page_size = v;
        }
        if let Some(secs) = parse_opt(&lookup, "MEMPROOF_CACHE_TTL_SECS")? {
            config.cache.ttl = Duration::from_secs(secs);
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject settings the coordinator and ingestor cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.coordinator.retry.max_attempts == 0 {
            return Err(ServiceError::Config("max_attempts must be at least 1".into()));
        }
        if self.coordinator.max_leaves_per_batch == 0
            || self.coordinator.max_leaves_per_batch > u32::MAX as usize
        {
            return Err(ServiceError::Config(
                "max_leaves_per_batch must be between 1 and u32::MAX".into(),
            ));
        }
        if self.ingestor.page_size == 0 {
            return Err(ServiceError::Config("page_size must be at least 1".into()));
        }
        Ok(())
    }
}

fn parse_opt<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> Result<Option<T>>
where
    T::Err: std::fmt::Display,
{
    lookup(name)
        .map(|raw| {
            raw.trim()
                .parse()
                .map_err(|e| ServiceError::Config(format!("{name}: {e}")))
        })
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    const BASE: [(&str, &str); 3] = [
        ("MEMPROOF_LEDGER_URL", "http://localhost:8545"),
        (
            "MEMPROOF_SIGNING_KEY",
            "0x0101010101010101010101010101010101010101010101010101010101010101",
        ),
        (
            "MEMPROOF_CONTRACT_ADDRESS",
            "0xc0c0c0c0c0c0c0c0c0c0c0c0c0c0c0c0c0c0c0c0",
        ),
    ];

    #[test]
    fn test_from_lookup_required_values() {
        let config = ServiceConfig::from_lookup(env(&BASE)).unwrap();
        assert_eq!(config.ledger_url, "http://localhost:8545");
        assert_eq!(config.contract, Address::from_bytes([0xc0; 20]));
        assert_eq!(
            config.signing_key.public_key(),
            Keypair::from_seed(&[1; 32]).public_key()
        );
        assert!(config.database_path.is_none());
        assert_eq!(config.coordinator.retry, RetryPolicy::default());
    }

    #[test]
    fn test_missing_value_is_config_error() {
        let err = ServiceConfig::from_lookup(env(&BASE[..2])).unwrap_err();
        assert!(
            matches!(err, ServiceError::Config(ref msg) if msg.contains("MEMPROOF_CONTRACT_ADDRESS"))
        );
    }

    #[test]
    fn test_bad_key_is_config_error() {
        let mut pairs = BASE.to_vec();
        pairs[1] = ("MEMPROOF_SIGNING_KEY", "abcd");
        assert!(matches!(
            ServiceConfig::from_lookup(env(&pairs)),
            Err(ServiceError::Config(_))
        ));
    }

    #[test]
    fn test_overrides() {
        let mut pairs = BASE.to_vec();
        pairs.push(("MEMPROOF_DATABASE_PATH", "/tmp/memproof.db"));
        pairs.push(("MEMPROOF_MAX_ATTEMPTS", "3"));
        pairs.push(("MEMPROOF_MAX_LEAVES_PER_BATCH", "16"));
        pairs.push(("MEMPROOF_CACHE_TTL_SECS", "5"));
        let config = ServiceConfig::from_lookup(env(&pairs)).unwrap();
        assert_eq!(config.database_path, Some(PathBuf::from("/tmp/memproof.db")));
        assert_eq!(config.coordinator.retry.max_attempts, 3);
        assert_eq!(config.coordinator.max_leaves_per_batch, 16);
        assert_eq!(config.cache.ttl, Duration::from_secs(5));

        pairs.push(("MEMPROOF_INGEST_PAGE_SIZE", "lots"));
        assert!(ServiceConfig::from_lookup(env(&pairs)).is_err());
    }

    #[test]
    fn test_backoff_is_bounded() {
        let policy = RetryPolicy {
            max_attempts: 10,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(1),
            multiplier: 2,
        };
        assert_eq!(policy.backoff(1), Duration::from_millis(100));
        assert_eq!(policy.backoff(2), Duration::from_millis(200));
        assert_eq!(policy.backoff(4), Duration::from_millis(800));
        assert_eq!(policy.backoff(5), Duration::from_secs(1));
        assert_eq!(policy.backoff(60), Duration::from_secs(1));
    }
}
