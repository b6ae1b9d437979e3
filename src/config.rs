//! Process configuration, read once from the environment at startup.

use std::path::PathBuf;

use tracing::warn;

use crate::error::ForagerError;

/// Resolved pipeline configuration.
///
/// Every field comes from an environment variable; optional keys fall back
/// to defaults under the local data directory. Handles are passed by value
/// into collectors and the generator — there is no global config state.
#[derive(Debug, Clone)]
pub struct Config {
    /// Document store location (`DB_PATH`).
    pub db_path: PathBuf,
    /// Blob store root (`LOCAL_STORAGE_PATH`).
    pub storage_path: PathBuf,
    /// URL prefix for composed `external_url` values (`BASE_URL`).
    pub base_url: String,
    /// Static blob server port (`PORT`).
    pub port: u16,
    /// Forge API token (`GITHUB_TOKEN`); required for network commands.
    pub github_token: Option<String>,
    /// Default owner/organization (`GITHUB_ORG`).
    pub github_org: Option<String>,
    /// Space-separated default repository list (`GITHUB_REPOS`).
    pub github_repos: Vec<String>,
    /// Embedding backend identifier (`EMBEDDING_MODEL`).
    pub embedding_model: String,
}

/// Default data directory: `<platform data dir>/forager`.
pub fn data_dir() -> PathBuf {
    let base = dirs::data_local_dir().unwrap_or_else(|| PathBuf::from("."));
    base.join("forager")
}

impl Config {
    /// Read configuration from process environment variables.
    pub fn from_env() -> Result<Self, ForagerError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read configuration through an arbitrary lookup (tests inject a map).
    pub fn from_lookup<F>(get: F) -> Result<Self, ForagerError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let db_path = match get("DB_PATH") {
            Some(p) => PathBuf::from(p),
            None => {
                let fallback = data_dir().join("forager.db");
                warn!(path = %fallback.display(), "DB_PATH not set, using default");
                fallback
            }
        };

        let storage_path = match get("LOCAL_STORAGE_PATH") {
            Some(p) => PathBuf::from(p),
            None => {
                let fallback = data_dir().join("local_storage");
                warn!(path = %fallback.display(), "LOCAL_STORAGE_PATH not set, using default");
                fallback
            }
        };

        let port: u16 = match get("PORT") {
            Some(raw) => raw
                .parse()
                .map_err(|_| ForagerError::Config(format!("PORT is not a valid port number: '{}'", raw)))?,
            None => 8000,
        };

        let base_url = get("BASE_URL").unwrap_or_else(|| format!("http://localhost:{}", port));

        let github_repos = get("GITHUB_REPOS")
            .map(|raw| raw.split_whitespace().map(str::to_string).collect())
            .unwrap_or_default();

        Ok(Config {
            db_path,
            storage_path,
            base_url,
            port,
            github_token: get("GITHUB_TOKEN"),
            github_org: get("GITHUB_ORG"),
            github_repos,
            embedding_model: get("EMBEDDING_MODEL").unwrap_or_else(|| "hashed".to_string()),
        })
    }

    /// Root directory for persisted vector index artifacts.
    pub fn index_root(&self) -> PathBuf {
        self.storage_path.join("indexes")
    }

    /// Append-only RAG query log location.
    pub fn query_log_path(&self) -> PathBuf {
        data_dir().join("rag_queries.jsonl")
    }

    /// Forge token, or a descriptive configuration error for commands that
    /// cannot run without one.
    pub fn require_token(&self) -> Result<&str, ForagerError> {
        self.github_token
            .as_deref()
            .ok_or_else(|| ForagerError::Config("GITHUB_TOKEN is not set".to_string()))
    }
}
