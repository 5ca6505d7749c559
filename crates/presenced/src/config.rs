use std::path::PathBuf;

/// Daemon configuration, loaded from environment variables.
pub struct Config {
    /// Path to the SQLite database file.
    pub db_path: PathBuf,
    /// Embedding dimension D, fixed for the whole system.
    pub embedding_dim: usize,
    /// Euclidean distance threshold for a positive match.
    pub distance_threshold: f32,
    /// Cooldown in milliseconds after a success/error before returning to idle.
    pub cooldown_ms: u64,
    /// Timeout in seconds for a single detection call.
    pub detect_timeout_secs: u64,
}

impl Config {
    /// Load configuration from `PRESENCE_*` environment variables with defaults.
    pub fn from_env() -> Self {
        let data_dir = std::env::var("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
                PathBuf::from(home).join(".local/share")
            })
            .join("presence");

        let db_path = std::env::var("PRESENCE_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_dir.join("presence.db"));

        Self {
            db_path,
            embedding_dim: env_usize("PRESENCE_EMBEDDING_DIM", 128),
            distance_threshold: env_f32(
                "PRESENCE_DISTANCE_THRESHOLD",
                presence_core::DEFAULT_DISTANCE_THRESHOLD,
            ),
            cooldown_ms: env_u64("PRESENCE_COOLDOWN_MS", 3000),
            detect_timeout_secs: env_u64("PRESENCE_DETECT_TIMEOUT_SECS", 10),
        }
    }
}

fn env_f32(key: &str, default: f32) -> f32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_usize(key: &str, default: usize) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
