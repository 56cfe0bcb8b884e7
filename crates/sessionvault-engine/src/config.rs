use std::time::Duration;

/// Environment-tunable configuration, read once at `SessionStore`
/// construction. Grounded on `weavegraph::runtimes::RuntimeConfig`'s
/// `dotenvy::dotenv().ok()` + `std::env::var(...).unwrap_or_else(...)`
/// idiom rather than `clap`, since this workspace ships no CLI binary.
#[derive(Debug, Clone)]
pub struct Config {
    /// WAL tip at which compaction is triggered after an append.
    pub wal_compact_threshold: u64,
    /// Streaming chunk size for blob I/O.
    pub checkpoint_chunk_size: usize,
    /// Distributed lock TTL.
    pub lock_ttl: Duration,
    /// External change debounce window.
    pub debounce: Duration,
    /// Whether to push local edits to the external source after append.
    pub auto_sync: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            wal_compact_threshold: 50,
            checkpoint_chunk_size: 256 * 1024,
            lock_ttl: Duration::from_secs(30),
            debounce: Duration::from_millis(500),
            auto_sync: true,
        }
    }
}

impl Config {
    /// Loads configuration from environment variables, falling back to
    /// spec defaults for anything unset or unparsable. A `.env` file in the
    /// working directory is loaded first, best-effort.
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();
        let default = Self::default();
        Self {
            wal_compact_threshold: env_u64("WAL_COMPACT_THRESHOLD", default.wal_compact_threshold),
            checkpoint_chunk_size: env_usize(
                "CHECKPOINT_CHUNK_SIZE",
                default.checkpoint_chunk_size,
            ),
            lock_ttl: Duration::from_secs(env_u64(
                "LOCK_TTL_SECONDS",
                default.lock_ttl.as_secs(),
            )),
            debounce: Duration::from_millis(env_u64(
                "DEBOUNCE_MS",
                default.debounce.as_millis() as u64,
            )),
            auto_sync: env_bool("AUTO_SYNC", default.auto_sync),
        }
    }
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

fn env_bool(key: &str, default: bool) -> bool {
    std::env::var(key)
        .ok()
        .and_then(|v| match v.to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" => Some(true),
            "0" | "false" | "no" => Some(false),
            _ => None,
        })
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_table() {
        let c = Config::default();
        assert_eq!(c.wal_compact_threshold, 50);
        assert_eq!(c.checkpoint_chunk_size, 256 * 1024);
        assert_eq!(c.lock_ttl, Duration::from_secs(30));
        assert_eq!(c.debounce, Duration::from_millis(500));
        assert!(c.auto_sync);
    }
}
