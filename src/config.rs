//! Configuration management
//!
//! Loads configuration from config.toml with support for:
//! - Server binding and the public base URL used in links
//! - Database pool sizing
//! - Admin setup key, session lifetime and invite expiry
//! - Image bucket location and limits
//! - Point values for the leaderboard
//! - Reverse geocoding credentials

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

const DEFAULT_CONFIG: &str = include_str!("../config.toml");

/// Main configuration structure matching config.toml
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    pub admin: AdminConfig,
    pub invites: InviteConfig,
    pub media: MediaConfig,
    pub scoring: ScoringConfig,
    pub leaderboard: LeaderboardConfig,
    #[serde(default)]
    pub geocoding: GeocodingConfig,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Base URL used when building invite links and image URLs
    pub public_url: String,
}

/// Database configuration (the URL itself comes from DATABASE_URL)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub pool_max_size: usize,
    pub query_timeout_secs: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            pool_max_size: 20,
            query_timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdminConfig {
    /// Empty means no key is configured
    #[serde(default)]
    pub setup_key: String,
    pub session_ttl_days: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InviteConfig {
    pub expiry_days: i64,
}

/// Image bucket configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaConfig {
    /// Directory holding all buckets
    pub root: PathBuf,
    pub bucket: String,
    /// Maximum upload size in bytes
    pub max_file_size: usize,
}

/// Environmental points awarded per report
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct ScoringConfig {
    pub base_points: u32,
    pub verified_bonus: u32,
    pub resolved_bonus: u32,
    pub clean_up_bonus: u32,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            base_points: 10,
            verified_bonus: 5,
            resolved_bonus: 15,
            clean_up_bonus: 50,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct LeaderboardConfig {
    pub default_limit: usize,
    pub max_limit: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeocodingConfig {
    #[serde(default)]
    pub api_key: String,
    pub endpoint: String,
}

impl Default for GeocodingConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            endpoint: "https://api.geoapify.com/v1/geocode/reverse".to_string(),
        }
    }
}

impl Config {
    /// Load from config.toml or use defaults
    pub fn load() -> Result<Self> {
        Self::load_from("config.toml")
    }

    /// Load from specific path, then apply environment overrides
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let mut config: Config = if path.exists() {
            let content = std::fs::read_to_string(path).context("Failed to read config file")?;
            toml::from_str(&content).context("Failed to parse config file")?
        } else {
            // Use embedded default config
            toml::from_str(DEFAULT_CONFIG).context("Failed to parse default config")?
        };

        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the server cannot run with
    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(
            self.leaderboard.max_limit >= 1,
            "leaderboard.max_limit must be at least 1"
        );
        anyhow::ensure!(
            self.media.max_file_size > 0,
            "media.max_file_size must be greater than 0"
        );
        Ok(())
    }

    fn apply_env(&mut self) {
        if let Some(host) = env_non_empty("TRASHCLICK_HOST") {
            self.server.host = host;
        }
        if let Some(port) = env_non_empty("TRASHCLICK_PORT").and_then(|p| p.parse().ok()) {
            self.server.port = port;
        }
        if let Some(url) = env_non_empty("TRASHCLICK_PUBLIC_URL") {
            self.server.public_url = url;
        }
        if let Some(key) = env_non_empty("TRASHCLICK_SETUP_KEY") {
            self.admin.setup_key = key;
        }
        if let Some(key) = env_non_empty("GEOAPIFY_API_KEY") {
            self.geocoding.api_key = key;
        }
    }

    /// Public base URL without a trailing slash
    pub fn public_url(&self) -> &str {
        self.server.public_url.trim_end_matches('/')
    }

    pub fn setup_key(&self) -> Option<&str> {
        if self.admin.setup_key.is_empty() {
            None
        } else {
            Some(&self.admin.setup_key)
        }
    }

    /// Clamp a requested leaderboard size to the configured bounds
    pub fn leaderboard_limit(&self, requested: Option<usize>) -> usize {
        requested
            .unwrap_or(self.leaderboard.default_limit)
            .min(self.leaderboard.max_limit)
            .max(1)
    }
}

fn env_non_empty(name: &str) -> Option<String> {
    match std::env::var(name) {
        Ok(v) if !v.is_empty() => Some(v),
        _ => None,
    }
}

impl Default for Config {
    fn default() -> Self {
        // The embedded default config is checked by the tests below.
        toml::from_str(DEFAULT_CONFIG).unwrap_or_else(|_| Self {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 8080,
                public_url: "http://localhost:8080".to_string(),
            },
            database: DatabaseConfig::default(),
            admin: AdminConfig {
                setup_key: String::new(),
                session_ttl_days: 7,
            },
            invites: InviteConfig { expiry_days: 7 },
            media: MediaConfig {
                root: PathBuf::from("data/media"),
                bucket: "report-images".to_string(),
                max_file_size: 5 * 1024 * 1024,
            },
            scoring: ScoringConfig::default(),
            leaderboard: LeaderboardConfig {
                default_limit: 5,
                max_limit: 100,
            },
            geocoding: GeocodingConfig::default(),
        })
    }
}
