//! Process configuration read from the environment

use crate::llm::LlmConfig;
use crate::runtime::EngineConfig;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_PORT: u16 = 8000;
pub const DEFAULT_AUTH_BASE_URL: &str = "http://localhost:8000/auth";

#[derive(Debug, Clone)]
pub struct ArcherConfig {
    pub port: u16,
    /// Base directory for user preference records
    pub data_dir: PathBuf,
    pub db_path: PathBuf,
    pub auth_base_url: String,
    /// Shared secret required on `POST /auth/complete` when set
    pub auth_complete_token: Option<String>,
    pub engine: EngineConfig,
    pub llm: LlmConfig,
}

impl ArcherConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary variable source. Unparseable numbers fall
    /// back to their defaults.
    pub fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Self {
        let parsed = |key: &str| var(key).and_then(|v| v.trim().parse::<u64>().ok());

        let data_dir =
            var("ARCHER_DATA_DIR").map_or_else(|| PathBuf::from("./data"), PathBuf::from);
        let db_path = var("ARCHER_DB_PATH")
            .map_or_else(|| data_dir.join("checkpoints.db"), PathBuf::from);

        let defaults = EngineConfig::default();
        // 0 disables the cap
        let max_iterations = match parsed("ARCHER_MAX_ITERATIONS") {
            Some(0) => None,
            Some(n) => usize::try_from(n).ok(),
            None => defaults.max_iterations,
        };
        let engine = EngineConfig {
            max_iterations,
            model_timeout: parsed("ARCHER_MODEL_TIMEOUT_SECS")
                .map_or(defaults.model_timeout, Duration::from_secs),
            tool_timeout: parsed("ARCHER_TOOL_TIMEOUT_SECS")
                .map_or(defaults.tool_timeout, Duration::from_secs),
            max_tokens: parsed("ARCHER_MAX_TOKENS").and_then(|n| u32::try_from(n).ok()),
        };

        Self {
            port: parsed("ARCHER_PORT")
                .and_then(|p| u16::try_from(p).ok())
                .unwrap_or(DEFAULT_PORT),
            data_dir,
            db_path,
            auth_base_url: var("ARCHER_AUTH_BASE_URL")
                .unwrap_or_else(|| DEFAULT_AUTH_BASE_URL.to_string()),
            auth_complete_token: var("ARCHER_AUTH_COMPLETE_TOKEN")
                .map(|t| t.trim().to_string())
                .filter(|t| !t.is_empty()),
            engine,
            llm: LlmConfig::from_lookup(&var),
        }
    }
}
