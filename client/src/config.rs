//! Client configuration
//!
//! Configuration is loaded from environment variables. Unset or unparsable
//! variables fall back to the defaults below.

use std::env;
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;

/// Configuration errors detected before any backend is contacted
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing Supabase environment variables: {0}")]
    MissingSupabase(&'static str),

    #[error("unknown backend mode: {0}")]
    UnknownBackend(String),
}

/// Which backend the client talks to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BackendMode {
    /// Hosted Supabase project (GoTrue + PostgREST)
    #[default]
    Supabase,
    /// Process-local tables and accounts
    InMemory,
}

impl BackendMode {
    fn parse(value: &str) -> Result<Self, ConfigError> {
        match value.to_lowercase().as_str() {
            "supabase" => Ok(BackendMode::Supabase),
            "memory" | "in-memory" | "inmemory" => Ok(BackendMode::InMemory),
            other => Err(ConfigError::UnknownBackend(other.to_string())),
        }
    }
}

/// Main client configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Backend selection
    pub backend: BackendMode,

    /// Hosted backend configuration
    pub supabase: SupabaseConfig,

    /// Query cache configuration
    pub cache: CacheConfig,

    /// Prometheus exporter listen address (disabled when unset)
    pub metrics_addr: Option<SocketAddr>,
}

/// Hosted backend configuration
#[derive(Debug, Clone)]
pub struct SupabaseConfig {
    /// Project URL, e.g. `https://xyzcompany.supabase.co`
    pub url: String,
    /// Public anon key sent as `apikey`
    pub anon_key: String,
    /// Per-request timeout
    pub request_timeout: Duration,
}

/// Default bound on cached query keys
pub const DEFAULT_MAX_ENTRIES: usize = 500;

/// Query cache configuration
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Entries older than this are refetched even without invalidation
    pub max_age: Option<Duration>,
    /// Past this many keys, the least recently used idle entries are dropped
    pub max_entries: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_age: None,
            max_entries: DEFAULT_MAX_ENTRIES,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            backend: BackendMode::default(),
            supabase: SupabaseConfig::default(),
            cache: CacheConfig::default(),
            metrics_addr: None,
        }
    }
}

impl Default for SupabaseConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            anon_key: String::new(),
            request_timeout: Duration::from_secs(15),
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Ok(mode) = env::var("BACKEND_MODE")
            && !mode.is_empty()
        {
            config.backend = BackendMode::parse(&mode)?;
        }

        // Supabase config
        if let Ok(url) = env::var("SUPABASE_URL") {
            config.supabase.url = url.trim_end_matches('/').to_string();
        }
        if let Ok(key) = env::var("SUPABASE_ANON_KEY") {
            config.supabase.anon_key = key;
        }
        if let Ok(val) = env::var("SUPABASE_TIMEOUT_SECS")
            && let Ok(secs) = val.parse::<u64>()
        {
            config.supabase.request_timeout = Duration::from_secs(secs);
        }

        // Cache config
        if let Ok(val) = env::var("QUERY_MAX_AGE_SECS")
            && let Ok(secs) = val.parse::<u64>()
        {
            config.cache.max_age = (secs > 0).then(|| Duration::from_secs(secs));
        }
        if let Ok(val) = env::var("QUERY_MAX_ENTRIES")
            && let Ok(max) = val.parse::<usize>()
            && max > 0
        {
            config.cache.max_entries = max;
        }

        if let Ok(addr) = env::var("METRICS_ADDR")
            && let Ok(addr) = addr.parse()
        {
            config.metrics_addr = Some(addr);
        }

        Ok(config)
    }

    /// Check that the selected backend has what it needs
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.backend == BackendMode::Supabase {
            if self.supabase.url.is_empty() {
                return Err(ConfigError::MissingSupabase("SUPABASE_URL"));
            }
            if self.supabase.anon_key.is_empty() {
                return Err(ConfigError::MissingSupabase("SUPABASE_ANON_KEY"));
            }
        }
        Ok(())
    }
}
