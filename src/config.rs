use std::path::PathBuf;
use std::str::FromStr;

use crate::model::Ms;

const SECOND: Ms = 1_000;
const MINUTE: Ms = 60 * SECOND;

/// Hold and sweep tuning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Cap on unexpired holds per user, existing plus requested.
    pub max_holds_per_user: usize,
    pub hold_timeout_ms: Ms,
    /// Slack after `hold_expires_at` during which confirmation is still accepted.
    pub hold_grace_ms: Ms,
    pub cleanup_interval_ms: Ms,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_holds_per_user: 10,
            hold_timeout_ms: 5 * MINUTE,
            hold_grace_ms: 10 * SECOND,
            cleanup_interval_ms: 30 * SECOND,
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; unset or unparsable keys keep their default.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            max_holds_per_user: parse_or(&lookup, "BERTH_MAX_HOLDS_PER_USER", defaults.max_holds_per_user),
            hold_timeout_ms: parse_or(&lookup, "BERTH_SEAT_HOLD_TIMEOUT_MINUTES", defaults.hold_timeout_ms / MINUTE)
                * MINUTE,
            hold_grace_ms: parse_or(&lookup, "BERTH_HOLD_GRACE_PERIOD_SECONDS", defaults.hold_grace_ms / SECOND)
                * SECOND,
            cleanup_interval_ms: parse_or(
                &lookup,
                "BERTH_HOLD_CLEANUP_INTERVAL_SECONDS",
                defaults.cleanup_interval_ms / SECOND,
            )
            .max(1)
                * SECOND,
        }
    }
}

/// Process-level settings for the `berth` binary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub data_dir: PathBuf,
    pub metrics_port: Option<u16>,
    /// WAL commits since the last compaction that trigger a new one.
    pub compact_threshold: u64,
}

impl ServerConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        Self {
            data_dir: lookup("BERTH_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("./data")),
            metrics_port: lookup("BERTH_METRICS_PORT").and_then(|s| s.parse().ok()),
            compact_threshold: parse_or(&lookup, "BERTH_COMPACT_THRESHOLD", 1000),
        }
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join("berth.wal")
    }
}

fn parse_or<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T {
    lookup(key).and_then(|s| s.trim().parse().ok()).unwrap_or(default)
}
