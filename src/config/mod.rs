//! Configuration Management
//!
//! Server and client settings come from environment variables. The client
//! additionally keeps a small JSON profile so a workstation does not need the
//! variables exported in every shell.
//!
//! # Configuration Locations
//! - Client profile: `~/.config/subpulse/client.json` (per-user)
//!
//! # Resolution Precedence (client)
//! 1. Environment variables (highest priority)
//! 2. Client profile
//! 3. Built-in defaults
//!
//! Every loader takes a variable lookup function, so tests never touch the
//! process environment. `from_env()` wraps the loaders with [`std::env::var`].

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use crate::error::{AnalyticsError, Result};
use crate::session::SessionOptions;

/// Default listen host
pub const DEFAULT_HOST: &str = "0.0.0.0";

/// Default listen port
pub const DEFAULT_PORT: u16 = 8765;

/// Default client endpoint
pub const DEFAULT_SERVER_URL: &str = "ws://localhost:8765";

/// Key accepted when no credential is configured; development only
pub const FALLBACK_API_KEY: &str = "test_key_123";

/// Primary credential variable; alternates are `ANALYTICS_API_KEY_1` ..= `_5`
pub const API_KEY_VAR: &str = "ANALYTICS_API_KEY";

const ALTERNATE_KEY_COUNT: usize = 5;
const DEFAULT_AUTH_TIMEOUT_SECS: u64 = 30;
const DEFAULT_TIMEOUT_SECS: u64 = 30;
const DEFAULT_RETRIES: u32 = 3;
const DEFAULT_PING_INTERVAL_SECS: u64 = 20;
const DEFAULT_BACKOFF_MS: u64 = 500;

/// Mask a secret for logging: `abcd...wxyz`, or `****` when too short
#[must_use]
pub fn mask_secret(secret: &str) -> String {
    let chars: Vec<char> = secret.chars().collect();
    if chars.len() <= 8 {
        return "****".to_string();
    }
    let head: String = chars[..4].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{head}...{tail}")
}

/// Read a variable, treating empty values as unset
fn read<F>(lookup: &F, name: &str) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

/// Parse a variable, falling back to `default` when unset
fn parse_or<F, T>(lookup: &F, name: &str, default: T) -> Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match read(lookup, name) {
        None => Ok(default),
        Some(raw) => raw
            .parse()
            .map_err(|_| AnalyticsError::config(format!("Invalid value for {name}: '{raw}'"))),
    }
}

fn env_lookup(name: &str) -> Option<String> {
    std::env::var(name).ok()
}

/// Immutable set of accepted API keys
///
/// Built once at startup and shared by every connection handler.
#[derive(Clone)]
pub struct CredentialSet {
    keys: Vec<String>,
    fallback: bool,
}

impl CredentialSet {
    /// Accept exactly the given non-empty keys, or the fallback key if none
    pub fn from_keys<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let keys: Vec<String> =
            keys.into_iter().map(Into::into).filter(|k: &String| !k.is_empty()).collect();

        if keys.is_empty() {
            tracing::warn!(
                "No {API_KEY_VAR} configured; accepting the development fallback key. Do not run like this in production"
            );
            return Self { keys: vec![FALLBACK_API_KEY.to_string()], fallback: true };
        }

        Self { keys, fallback: false }
    }

    /// Primary key plus numbered alternates
    pub fn from_vars<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let primary = read(&lookup, API_KEY_VAR);
        let alternates =
            (1..=ALTERNATE_KEY_COUNT).filter_map(|i| read(&lookup, &format!("{API_KEY_VAR}_{i}")));
        Self::from_keys(primary.into_iter().chain(alternates))
    }

    #[must_use]
    pub fn from_env() -> Self {
        Self::from_vars(env_lookup)
    }

    /// Whether only the development fallback key is accepted
    #[must_use]
    pub const fn is_fallback(&self) -> bool {
        self.fallback
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Check a presented key
    #[must_use]
    pub fn verify(&self, candidate: &str) -> bool {
        let accepted = self.keys.iter().any(|k| k == candidate);
        if accepted && self.fallback {
            tracing::warn!("Client authenticated with the development fallback key");
        }
        accepted
    }
}

impl std::fmt::Debug for CredentialSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialSet")
            .field("keys", &self.keys.iter().map(|k| mask_secret(k)).collect::<Vec<_>>())
            .field("fallback", &self.fallback)
            .finish()
    }
}

/// MySQL connection settings
#[derive(Clone, PartialEq, Eq)]
pub struct DatabaseConfig {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub user: String,

    /// WARNING: Sensitive data, do not log
    pub password: String,
}

impl DatabaseConfig {
    pub fn from_vars<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        Ok(Self {
            host: read(&lookup, "DB_HOST").unwrap_or_else(|| "localhost".to_string()),
            port: parse_or(&lookup, "DB_PORT", 3306)?,
            database: read(&lookup, "DB_NAME").unwrap_or_else(|| "test".to_string()),
            user: read(&lookup, "DB_USER").unwrap_or_else(|| "root".to_string()),
            password: lookup("DB_PASSWORD").unwrap_or_default(),
        })
    }
}

impl std::fmt::Debug for DatabaseConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatabaseConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &"****")
            .finish()
    }
}

/// Everything `subpulse serve` needs
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,

    /// Limit for the first (auth) frame of a connection
    pub auth_timeout: Duration,

    pub database: DatabaseConfig,
    pub credentials: CredentialSet,
}

impl ServerConfig {
    pub fn from_vars<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let auth_timeout_secs: u64 =
            parse_or(&lookup, "ANALYTICS_AUTH_TIMEOUT", DEFAULT_AUTH_TIMEOUT_SECS)?;
        if auth_timeout_secs == 0 {
            return Err(AnalyticsError::config("ANALYTICS_AUTH_TIMEOUT must be at least 1 second"));
        }

        Ok(Self {
            host: read(&lookup, "MCP_HOST").unwrap_or_else(|| DEFAULT_HOST.to_string()),
            port: parse_or(&lookup, "MCP_PORT", DEFAULT_PORT)?,
            auth_timeout: Duration::from_secs(auth_timeout_secs),
            database: DatabaseConfig::from_vars(&lookup)?,
            credentials: CredentialSet::from_vars(&lookup),
        })
    }

    pub fn from_env() -> Result<Self> {
        Self::from_vars(env_lookup)
    }

    /// `host:port` to bind
    #[must_use]
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Persisted client settings; every field is optional
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientProfile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_url: Option<String>,

    /// WARNING: Sensitive data, stored in plain text
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_attempts: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ping_interval_secs: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backoff_ms: Option<u64>,
}

/// Get path to the client profile (`~/.config/subpulse/client.json`)
pub fn profile_path() -> Result<PathBuf> {
    let config_dir = dirs::config_dir()
        .ok_or_else(|| AnalyticsError::config("Could not determine user config directory"))?;

    Ok(config_dir.join("subpulse").join("client.json"))
}

/// Load a client profile; a missing file is an empty profile
pub fn load_profile(path: &Path) -> Result<ClientProfile> {
    if !path.exists() {
        return Ok(ClientProfile::default());
    }

    let contents = fs::read_to_string(path)
        .map_err(|e| AnalyticsError::config(format!("Could not read client profile: {e}")))?;

    serde_json::from_str(&contents)
        .map_err(|e| AnalyticsError::config(format!("Invalid client profile format: {e}")))
}

/// Write a client profile, creating its directory if needed
pub fn save_profile(path: &Path, profile: &ClientProfile) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| {
            AnalyticsError::config(format!("Could not create config directory: {e}"))
        })?;
    }

    let contents = serde_json::to_string_pretty(profile)
        .map_err(|e| AnalyticsError::config(format!("Could not serialize client profile: {e}")))?;

    fs::write(path, contents)
        .map_err(|e| AnalyticsError::config(format!("Could not write client profile: {e}")))
}

/// Resolved client settings
#[derive(Clone, PartialEq, Eq)]
pub struct ClientConfig {
    pub server_url: String,

    /// WARNING: Sensitive data, do not log
    pub api_key: Option<String>,

    pub timeout: Duration,
    pub retry_attempts: u32,
    pub ping_interval: Duration,
    pub backoff_base: Duration,
}

impl ClientConfig {
    /// Layer environment variables over a profile
    pub fn from_sources<F>(profile: &ClientProfile, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let timeout_secs =
            parse_or(&lookup, "ANALYTICS_TIMEOUT", profile.timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS))?;
        let retry_attempts =
            parse_or(&lookup, "ANALYTICS_RETRIES", profile.retry_attempts.unwrap_or(DEFAULT_RETRIES))?;
        let ping_secs = parse_or(
            &lookup,
            "ANALYTICS_PING_INTERVAL",
            profile.ping_interval_secs.unwrap_or(DEFAULT_PING_INTERVAL_SECS),
        )?;
        let backoff_ms =
            parse_or(&lookup, "ANALYTICS_BACKOFF_MS", profile.backoff_ms.unwrap_or(DEFAULT_BACKOFF_MS))?;

        if timeout_secs == 0 {
            return Err(AnalyticsError::config("ANALYTICS_TIMEOUT must be at least 1 second"));
        }
        if retry_attempts == 0 {
            return Err(AnalyticsError::config("ANALYTICS_RETRIES must be at least 1"));
        }

        let server_url = read(&lookup, "ANALYTICS_SERVER_URL")
            .or_else(|| profile.server_url.clone())
            .unwrap_or_else(|| DEFAULT_SERVER_URL.to_string());
        if !server_url.starts_with("ws://") && !server_url.starts_with("wss://") {
            return Err(AnalyticsError::config(format!(
                "ANALYTICS_SERVER_URL must be a ws:// or wss:// URL, got '{server_url}'"
            )));
        }

        Ok(Self {
            server_url,
            api_key: read(&lookup, API_KEY_VAR).or_else(|| profile.api_key.clone()),
            timeout: Duration::from_secs(timeout_secs),
            retry_attempts,
            ping_interval: Duration::from_secs(ping_secs),
            backoff_base: Duration::from_millis(backoff_ms),
        })
    }

    /// Profile at the default location, overridden by the process environment
    pub fn load() -> Result<Self> {
        let profile = load_profile(&profile_path()?)?;
        Self::from_sources(&profile, env_lookup)
    }

    /// The API key, or a configuration error naming the variable to set
    pub fn require_api_key(&self) -> Result<&str> {
        self.api_key.as_deref().ok_or_else(|| {
            AnalyticsError::config(format!(
                "No API key configured. Set {API_KEY_VAR} or run `subpulse configure --api-key`"
            ))
        })
    }

    /// Session tuning derived from these settings
    #[must_use]
    pub const fn session_options(&self) -> SessionOptions {
        SessionOptions {
            timeout: self.timeout,
            retry_attempts: self.retry_attempts,
            ping_interval: self.ping_interval,
            backoff_base: self.backoff_base,
        }
    }
}

impl std::fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientConfig")
            .field("server_url", &self.server_url)
            .field("api_key", &self.api_key.as_deref().map(mask_secret))
            .field("timeout", &self.timeout)
            .field("retry_attempts", &self.retry_attempts)
            .field("ping_interval", &self.ping_interval)
            .field("backoff_base", &self.backoff_base)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;

    fn vars(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> =
            pairs.iter().map(|(k, v)| ((*k).to_string(), (*v).to_string())).collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_mask_secret() {
        assert_eq!(mask_secret("abcdefghijklmnop"), "abcd...mnop");
        assert_eq!(mask_secret("short"), "****");
    }

    #[test]
    fn test_credentials_primary_and_alternates() {
        let creds = CredentialSet::from_vars(vars(&[
            ("ANALYTICS_API_KEY", "primary"),
            ("ANALYTICS_API_KEY_2", "second"),
            ("ANALYTICS_API_KEY_5", "fifth"),
            ("ANALYTICS_API_KEY_6", "ignored"),
        ]));
        assert!(!creds.is_fallback());
        assert_eq!(creds.len(), 3);
        assert!(creds.verify("primary"));
        assert!(creds.verify("fifth"));
        assert!(!creds.verify("ignored"));
        assert!(!creds.verify(FALLBACK_API_KEY));
    }

    #[test]
    fn test_credentials_fallback_when_unset() {
        let creds = CredentialSet::from_vars(vars(&[("ANALYTICS_API_KEY", "  ")]));
        assert!(creds.is_fallback());
        assert!(creds.verify(FALLBACK_API_KEY));
        assert!(!creds.verify(""));
    }

    #[test]
    fn test_credentials_debug_is_masked() {
        let creds = CredentialSet::from_keys(["supersecretvalue"]);
        let debug = format!("{creds:?}");
        assert!(!debug.contains("supersecretvalue"));
        assert!(debug.contains("supe...alue"));
    }

    #[test]
    fn test_server_config_defaults() {
        let config = ServerConfig::from_vars(vars(&[])).unwrap();
        assert_eq!(config.bind_address(), "0.0.0.0:8765");
        assert_eq!(config.auth_timeout, Duration::from_secs(30));
        assert_eq!(config.database.port, 3306);
        assert_eq!(config.database.database, "test");
        assert!(config.credentials.is_fallback());
    }

    #[test]
    fn test_server_config_rejects_bad_port() {
        let err = ServerConfig::from_vars(vars(&[("MCP_PORT", "eighty")])).unwrap_err();
        assert!(matches!(err, AnalyticsError::Config(_)));
        assert!(err.detail().contains("MCP_PORT"));
    }

    #[test]
    fn test_database_config_debug_hides_password() {
        let db = DatabaseConfig::from_vars(vars(&[("DB_PASSWORD", "hunter2")])).unwrap();
        assert_eq!(db.password, "hunter2");
        assert!(!format!("{db:?}").contains("hunter2"));
    }

    #[test]
    fn test_client_config_defaults() {
        let config = ClientConfig::from_sources(&ClientProfile::default(), vars(&[])).unwrap();
        assert_eq!(config.server_url, DEFAULT_SERVER_URL);
        assert_eq!(config.timeout, Duration::from_secs(30));
        assert_eq!(config.retry_attempts, 3);
        assert_eq!(config.ping_interval, Duration::from_secs(20));
        assert_eq!(config.backoff_base, Duration::from_millis(500));
        assert!(config.require_api_key().is_err());
    }

    #[test]
    fn test_env_overrides_profile() {
        let profile = ClientProfile {
            server_url: Some("ws://profile:1".into()),
            api_key: Some("from-profile".into()),
            retry_attempts: Some(7),
            ..ClientProfile::default()
        };
        let config = ClientConfig::from_sources(
            &profile,
            vars(&[("ANALYTICS_SERVER_URL", "wss://env:2"), ("ANALYTICS_TIMEOUT", "5")]),
        )
        .unwrap();
        assert_eq!(config.server_url, "wss://env:2");
        assert_eq!(config.require_api_key().unwrap(), "from-profile");
        assert_eq!(config.retry_attempts, 7);
        assert_eq!(config.timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_client_config_validation() {
        let zero = ClientConfig::from_sources(&ClientProfile::default(), vars(&[("ANALYTICS_RETRIES", "0")]));
        assert!(matches!(zero, Err(AnalyticsError::Config(_))));

        let http = ClientConfig::from_sources(
            &ClientProfile::default(),
            vars(&[("ANALYTICS_SERVER_URL", "http://localhost:8000")]),
        );
        assert!(matches!(http, Err(AnalyticsError::Config(_))));
    }

    #[test]
    fn test_profile_save_and_load() {
        let dir = std::env::temp_dir().join(format!("subpulse-profile-{}", std::process::id()));
        let path = dir.join("nested").join("client.json");

        assert_eq!(load_profile(&path).unwrap(), ClientProfile::default());

        let profile = ClientProfile {
            server_url: Some("ws://example:8765".into()),
            timeout_secs: Some(10),
            ..ClientProfile::default()
        };
        save_profile(&path, &profile).unwrap();
        assert_eq!(load_profile(&path).unwrap(), profile);

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_invalid_profile_is_config_error() {
        let dir = std::env::temp_dir().join(format!("subpulse-badprofile-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join("client.json");
        fs::write(&path, "{not json").unwrap();

        assert!(matches!(load_profile(&path), Err(AnalyticsError::Config(_))));

        let _ = fs::remove_dir_all(&dir);
    }
}
