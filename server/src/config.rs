//! Configuration management for the server.

use std::env;
use std::path::PathBuf;
use std::str::FromStr;

/// Largest batch a sync request may ask for.
pub const MAX_BATCH_SIZE: usize = 500;

/// Server configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Server host address
    pub host: String,
    /// Server port
    pub port: u16,
    /// PostgreSQL connection URL
    pub database_url: String,
    /// Bearer token required on sync requests, if set
    pub auth_secret: Option<String>,
    /// Default records per batch commit
    pub sync_batch_size: usize,
    /// Concurrent batch commits per sync
    pub sync_max_in_flight: usize,
    /// Documents fetched per page when scanning a collection
    pub sync_page_size: usize,
    pub database_max_connections: u32,
    /// JSON file of kind profiles layered over the built-in ones
    pub profiles_path: Option<PathBuf>,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let host = lookup("HOST").unwrap_or_else(|| "0.0.0.0".to_string());

        let port = lookup("PORT")
            .unwrap_or_else(|| "3000".to_string())
            .parse()
            .map_err(|_| ConfigError::InvalidPort)?;

        let database_url = lookup("DATABASE_URL").ok_or(ConfigError::MissingDatabaseUrl)?;

        let auth_secret = lookup("AUTH_SECRET").filter(|s| !s.is_empty());

        let sync_batch_size = parse_var(&lookup, "SYNC_BATCH_SIZE", MAX_BATCH_SIZE)?;
        if !(1..=MAX_BATCH_SIZE).contains(&sync_batch_size) {
            return Err(ConfigError::BatchSizeOutOfRange(sync_batch_size));
        }

        let sync_max_in_flight = parse_var(&lookup, "SYNC_MAX_IN_FLIGHT", 1usize)?.max(1);
        let sync_page_size = parse_var(&lookup, "SYNC_PAGE_SIZE", 1000usize)?.max(1);
        let database_max_connections = parse_var(&lookup, "DATABASE_MAX_CONNECTIONS", 10u32)?;

        let profiles_path = lookup("PROFILES_PATH")
            .filter(|s| !s.is_empty())
            .map(PathBuf::from);

        Ok(Self {
            host,
            port,
            database_url,
            auth_secret,
            sync_batch_size,
            sync_max_in_flight,
            sync_page_size,
            database_max_connections,
            profiles_path,
        })
    }
}

fn parse_var<F, T>(lookup: &F, name: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(name) {
        None => Ok(default),
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { name, value }),
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("DATABASE_URL environment variable is required")]
    MissingDatabaseUrl,

    #[error("Invalid PORT value")]
    InvalidPort,

    #[error("Invalid {name} value: {value}")]
    Invalid { name: &'static str, value: String },

    #[error("SYNC_BATCH_SIZE must be between 1 and {MAX_BATCH_SIZE}, got {0}")]
    BatchSizeOutOfRange(usize),
}
