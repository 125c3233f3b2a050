use std::env;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Load .env file (silently ignores if missing).
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.is_empty())
}

/// Read a profiled env var: tries {PROFILE}_{KEY} first, falls back to {KEY}.
fn profiled_env_opt(profile: &str, key: &str) -> Option<String> {
    if !profile.is_empty() {
        let prefixed = format!("{}_{}", profile, key);
        if let Some(v) = env_opt(&prefixed) {
            return Some(v);
        }
    }
    env_opt(key)
}

fn profiled_env_or(profile: &str, key: &str, default: &str) -> String {
    profiled_env_opt(profile, key).unwrap_or_else(|| default.to_string())
}

fn profiled_env_u16(profile: &str, key: &str, default: u16) -> u16 {
    profiled_env_opt(profile, key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn profiled_env_u32(profile: &str, key: &str, default: u32) -> u32 {
    profiled_env_opt(profile, key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn profiled_env_u64(profile: &str, key: &str, default: u64) -> u64 {
    profiled_env_opt(profile, key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

// ── Top-level config ──────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Active profile name (empty = default).
    pub profile: String,
    pub server: ServerConfig,
    pub redis: RedisConfig,
    pub postgres: PostgresConfig,
    pub auth: AuthConfig,
    pub stream: StreamConfig,
}

/// Well-known env keys that identify a profile when prefixed.
const PROFILE_MARKER_KEYS: &[&str] = &["REDIS_URL", "REDIS_HOST", "PG_URL", "PG_HOST", "JWT_SECRET"];

impl Config {
    /// Build config from environment variables (call `load_dotenv()` first).
    /// Profile is read from `AGENTRUN_PROFILE` env var. When set (e.g. `PROD`),
    /// every key is first looked up as `{PROFILE}_{KEY}`, falling back to `{KEY}`.
    pub fn from_env() -> Self {
        let profile = env_or("AGENTRUN_PROFILE", "").to_uppercase();
        Self::for_profile(&profile)
    }

    /// Build config for a specific named profile (empty string = default).
    pub fn for_profile(profile: &str) -> Self {
        let p = profile.to_uppercase();
        let p = p.as_str();
        Self {
            profile: p.to_string(),
            server: ServerConfig::from_env_profiled(p),
            redis: RedisConfig::from_env_profiled(p),
            postgres: PostgresConfig::from_env_profiled(p),
            auth: AuthConfig::from_env_profiled(p),
            stream: StreamConfig::from_env_profiled(p),
        }
    }

    /// Discover available profiles by scanning env vars for `{PREFIX}_{MARKER_KEY}` patterns.
    /// Always includes "default" (the unprefixed config).
    pub fn available_profiles() -> Vec<String> {
        let mut profiles = std::collections::BTreeSet::new();
        profiles.insert("default".to_string());

        for (key, _) in env::vars() {
            for marker in PROFILE_MARKER_KEYS {
                if let Some(prefix) = key.strip_suffix(&format!("_{}", marker)) {
                    if !prefix.is_empty()
                        && prefix.chars().all(|c| c.is_ascii_uppercase() || c == '_')
                    {
                        profiles.insert(prefix.to_string());
                    }
                }
            }
        }

        profiles.into_iter().collect()
    }

    pub fn profile_label(&self) -> &str {
        if self.profile.is_empty() { "default" } else { &self.profile }
    }

    /// Print a redacted summary for startup logs.
    pub fn log_summary(&self) {
        tracing::info!("Config loaded (profile: {}):", self.profile_label());
        tracing::info!("  server:    {}:{}, instance={}", self.server.host, self.server.port, self.server.instance_id);
        tracing::info!("  redis:     host={}, port={}, ssl={}", self.redis.host, self.redis.port, self.redis.ssl);
        tracing::info!("  postgres:  host={}, db={}, configured={}", self.postgres.host, self.postgres.database, self.postgres.is_configured());
        tracing::info!("  auth:      signature_check={}, user_prefix={}", self.auth.verifies_signature(), self.auth.user_id_prefix);
        tracing::info!("  stream:    cleanup_grace={}ms, frame_buffer={}", self.stream.cleanup_grace_ms, self.stream.frame_buffer);
    }
}

// ── Server ────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub cors_origin: String,
    /// Identifies this API instance in logs and broker keys.
    pub instance_id: String,
}

impl ServerConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            host: profiled_env_or(p, "HOST", "0.0.0.0"),
            port: profiled_env_u16(p, "PORT", 8000),
            cors_origin: profiled_env_or(p, "CORS_ORIGIN", "*"),
            instance_id: profiled_env_opt(p, "INSTANCE_ID").unwrap_or_else(generate_instance_id),
        }
    }
}

fn generate_instance_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()[..8].to_string()
}

// ── Redis ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    /// Full connection URL; takes precedence over the individual fields.
    pub url: Option<String>,
    pub host: String,
    pub port: u16,
    pub password: Option<String>,
    pub ssl: bool,
    /// TTL applied to a run's response list once the run is stopped.
    pub response_list_ttl_secs: u64,
}

impl RedisConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            url: profiled_env_opt(p, "REDIS_URL"),
            host: profiled_env_or(p, "REDIS_HOST", "localhost"),
            port: profiled_env_u16(p, "REDIS_PORT", 6379),
            password: profiled_env_opt(p, "REDIS_PASSWORD"),
            ssl: profiled_env_or(p, "REDIS_SSL", "false") == "true",
            response_list_ttl_secs: profiled_env_u64(p, "REDIS_RESPONSE_LIST_TTL_SECS", 3600 * 24),
        }
    }

    pub fn connection_url(&self) -> String {
        if let Some(url) = &self.url {
            return url.clone();
        }
        let scheme = if self.ssl { "rediss" } else { "redis" };
        match &self.password {
            Some(pass) => format!("{}://:{}@{}:{}", scheme, pass, self.host, self.port),
            None => format!("{}://{}:{}", scheme, self.host, self.port),
        }
    }

    pub fn response_list_ttl(&self) -> Duration {
        Duration::from_secs(self.response_list_ttl_secs)
    }
}

// ── PostgreSQL ────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostgresConfig {
    /// Full connection URL (e.g. the Supabase pooler URL).
    pub url: Option<String>,
    pub host: String,
    pub port: u16,
    pub database: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub ssl_mode: String,
    pub max_connections: u32,
}

impl PostgresConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            url: profiled_env_opt(p, "PG_URL"),
            host: profiled_env_or(p, "PG_HOST", "localhost"),
            port: profiled_env_u16(p, "PG_PORT", 5432),
            database: profiled_env_or(p, "PG_DATABASE", "postgres"),
            username: profiled_env_opt(p, "PG_USERNAME"),
            password: profiled_env_opt(p, "PG_PASSWORD"),
            ssl_mode: profiled_env_or(p, "PG_SSL_MODE", "prefer"),
            max_connections: profiled_env_u32(p, "PG_MAX_CONNECTIONS", 10),
        }
    }

    pub fn database_url(&self) -> String {
        if let Some(url) = &self.url {
            return url.clone();
        }
        let user = self.username.as_deref().unwrap_or("postgres");
        let pass = self.password.as_deref().unwrap_or("");
        format!(
            "postgres://{}:{}@{}:{}/{}?sslmode={}",
            user, pass, self.host, self.port, self.database, self.ssl_mode
        )
    }

    pub fn is_configured(&self) -> bool {
        self.url.is_some() || self.username.is_some()
    }
}

// ── Auth ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// HS256 secret. When unset, tokens are trusted as verified upstream and
    /// only their claims are read.
    #[serde(skip_serializing)]
    pub jwt_secret: Option<String>,
    /// Required prefix of the `sub` claim.
    pub user_id_prefix: String,
}

impl AuthConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            jwt_secret: profiled_env_opt(p, "JWT_SECRET"),
            user_id_prefix: profiled_env_or(p, "AUTH_USER_ID_PREFIX", "user_"),
        }
    }

    pub fn verifies_signature(&self) -> bool {
        self.jwt_secret.is_some()
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: None,
            user_id_prefix: "user_".to_string(),
        }
    }
}

// ── Stream relay ──────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamConfig {
    /// Pause after subscription cleanup before the response body closes.
    pub cleanup_grace_ms: u64,
    /// Frames buffered between the relay task and the HTTP body.
    pub frame_buffer: usize,
}

impl StreamConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            cleanup_grace_ms: profiled_env_u64(p, "STREAM_CLEANUP_GRACE_MS", 100),
            frame_buffer: profiled_env_u32(p, "STREAM_FRAME_BUFFER", 64).max(1) as usize,
        }
    }

    pub fn cleanup_grace(&self) -> Duration {
        Duration::from_millis(self.cleanup_grace_ms)
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            cleanup_grace_ms: 100,
            frame_buffer: 64,
        }
    }
}
