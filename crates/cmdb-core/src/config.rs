//! Configuration management for GraphCMDB.
//!
//! Configuration is loaded from (in priority order):
//! 1. Environment variables (`GRAPHCMDB__SECTION__KEY`)
//! 2. Config file (`graphcmdb.toml`, or the prefix given with `--config`)
//! 3. Defaults

use serde::{Deserialize, Serialize};

use crate::error::CmdbError;

pub const ENV_PREFIX: &str = "GRAPHCMDB";
pub const DEFAULT_CONFIG_PREFIX: &str = "graphcmdb";

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct CmdbConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub neo4j: Neo4jConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub packs: PacksConfig,
    #[serde(default)]
    pub auth: AuthConfig,
}

impl CmdbConfig {
    /// Load from `{file_prefix}.toml` (optional) layered under the environment.
    pub fn load(file_prefix: &str) -> Result<Self, CmdbError> {
        let cfg = config::Config::builder()
            .add_source(config::File::with_name(file_prefix).required(false))
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| CmdbError::Config(e.to_string()))?;

        cfg.try_deserialize::<CmdbConfig>()
            .map_err(|e| CmdbError::Config(e.to_string()))
    }

    /// Problems that would make the server unusable or unsafe.
    pub fn warnings(&self) -> Vec<String> {
        let mut out = Vec::new();
        if self.server.session_secret == default_session_secret() {
            out.push("server.session_secret is the built-in default; set a real secret".to_string());
        }
        if self.auth.users.is_empty() {
            out.push("no users configured under [[auth.users]]; nobody can log in".to_string());
        }
        for user in &self.auth.users {
            if !user.password_hash.starts_with("$2") {
                out.push(format!(
                    "user {} has a password_hash that is not a bcrypt hash",
                    user.username
                ));
            }
            for group in &user.groups {
                if !self.auth.groups.iter().any(|g| &g.name == group) {
                    out.push(format!(
                        "user {} references unknown group {group}",
                        user.username
                    ));
                }
            }
        }
        out
    }
}

// ── Sections ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    /// Socket address to listen on.
    #[serde(default = "default_bind")]
    pub bind: String,

    /// HMAC secret for session and API tokens.
    #[serde(default = "default_session_secret")]
    pub session_secret: String,

    /// Lifetime of a session or API token, in seconds.
    #[serde(default = "default_session_ttl")]
    pub session_ttl_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Neo4jConfig {
    #[serde(default = "default_neo4j_uri")]
    pub uri: String,
    #[serde(default = "default_neo4j_user")]
    pub user: String,
    #[serde(default = "default_neo4j_password")]
    pub password: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    #[serde(default = "default_fetch_size")]
    pub fetch_size: usize,
}

#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    Neo4j,
    /// Process-local store; nothing survives a restart.
    Memory,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub backend: StorageBackend,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PacksConfig {
    #[serde(default = "default_packs_dir")]
    pub dir: String,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AuthConfig {
    #[serde(default)]
    pub users: Vec<UserConfig>,
    #[serde(default)]
    pub groups: Vec<GroupConfig>,
}

/// A login account. `password_hash` is a bcrypt hash (see `graphcmdb hash-password`).
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct UserConfig {
    pub username: String,
    pub password_hash: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub is_staff: bool,
    #[serde(default)]
    pub is_superuser: bool,
    #[serde(default = "default_true")]
    pub is_active: bool,
    #[serde(default)]
    pub groups: Vec<String>,
    #[serde(default)]
    pub permissions: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GroupConfig {
    pub name: String,
    #[serde(default)]
    pub permissions: Vec<String>,
}

fn default_bind() -> String {
    "127.0.0.1:8000".to_string()
}

fn default_session_secret() -> String {
    "graphcmdb-dev-secret".to_string()
}

fn default_session_ttl() -> u64 {
    8 * 3600
}

fn default_neo4j_uri() -> String {
    "bolt://localhost:7687".to_string()
}

fn default_neo4j_user() -> String {
    "neo4j".to_string()
}

fn default_neo4j_password() -> String {
    "password".to_string()
}

fn default_max_connections() -> usize {
    16
}

fn default_fetch_size() -> usize {
    500
}

fn default_packs_dir() -> String {
    "feature_packs".to_string()
}

fn default_true() -> bool {
    true
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            session_secret: default_session_secret(),
            session_ttl_secs: default_session_ttl(),
        }
    }
}

impl Default for Neo4jConfig {
    fn default() -> Self {
        Self {
            uri: default_neo4j_uri(),
            user: default_neo4j_user(),
            password: default_neo4j_password(),
            max_connections: default_max_connections(),
            fetch_size: default_fetch_size(),
        }
    }
}

impl Default for PacksConfig {
    fn default() -> Self {
        Self {
            dir: default_packs_dir(),
        }
    }
}
