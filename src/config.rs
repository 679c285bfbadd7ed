//! Application-level configuration loading: match durations, retry budgets,
//! sweep cadence, and the movement plausibility limit.

use std::{collections::HashMap, env, fs, io::ErrorKind, path::PathBuf, time::Duration};

use serde::Deserialize;
use tracing::{info, warn};

/// Default location on disk where the server looks for the JSON configuration.
const DEFAULT_CONFIG_PATH: &str = "config/app.json";
/// Environment variable that overrides [`DEFAULT_CONFIG_PATH`].
const CONFIG_PATH_ENV: &str = "TREASURE_MATCH_CONFIG_PATH";

const DEFAULT_MATCH_DURATION: Duration = Duration::from_secs(60 * 60);
const DEFAULT_JOIN_ATTEMPT_LIMIT: u32 = 3;
const DEFAULT_CONFLICT_RETRY_LIMIT: u32 = 5;
const DEFAULT_BACKOFF_BASE: Duration = Duration::from_millis(50);
const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60);
const DEFAULT_ORPHAN_GRACE: Duration = Duration::from_secs(5 * 60);
const DEFAULT_MAX_SPEED_KMH: f64 = 1000.0;

#[derive(Debug, Clone)]
/// Immutable runtime configuration shared across the application.
pub struct AppConfig {
    default_match_duration: Duration,
    match_durations: HashMap<String, Duration>,
    join_attempt_limit: u32,
    conflict_retry_limit: u32,
    backoff_base: Duration,
    sweep_interval: Duration,
    orphan_grace: Duration,
    max_speed_kmh: f64,
}

impl AppConfig {
    /// Load the application configuration from disk, falling back to built-in defaults.
    pub fn load() -> Self {
        let path = resolve_config_path();
        match fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str::<RawConfig>(&contents) {
                Ok(raw) => {
                    let config: Self = raw.into();
                    info!(path = %path.display(), "loaded configuration");
                    config
                }
                Err(err) => {
                    warn!(
                        path = %path.display(),
                        error = %err,
                        "failed to parse config; falling back to defaults"
                    );
                    Self::default()
                }
            },
            Err(err) if err.kind() == ErrorKind::NotFound => {
                info!(
                    path = %path.display(),
                    "config file not found; using built-in defaults"
                );
                Self::default()
            }
            Err(err) => {
                warn!(
                    path = %path.display(),
                    error = %err,
                    "failed to read config; falling back to defaults"
                );
                Self::default()
            }
        }
    }

    /// Auto-end duration for a match of the given type.
    pub fn match_duration(&self, match_type: &str) -> Duration {
        self.match_durations
            .get(match_type)
            .copied()
            .unwrap_or(self.default_match_duration)
    }

    /// Number of distinct matches a join attempt may fall back to.
    pub fn join_attempt_limit(&self) -> u32 {
        self.join_attempt_limit
    }

    /// Number of re-read-and-retry rounds per conditional write.
    pub fn conflict_retry_limit(&self) -> u32 {
        self.conflict_retry_limit
    }

    /// Base delay for jittered retry backoff.
    pub fn backoff_base(&self) -> Duration {
        self.backoff_base
    }

    /// Period of the reconciliation sweep.
    pub fn sweep_interval(&self) -> Duration {
        self.sweep_interval
    }

    /// Minimum age before an empty matching-status match is reaped.
    pub fn orphan_grace(&self) -> Duration {
        self.orphan_grace
    }

    /// Plausibility limit for reported movement speed.
    pub fn max_speed_kmh(&self) -> f64 {
        self.max_speed_kmh
    }

    #[cfg(test)]
    pub(crate) fn set_default_match_duration(&mut self, duration: Duration) {
        self.default_match_duration = duration;
    }

    #[cfg(test)]
    pub(crate) fn set_orphan_grace(&mut self, grace: Duration) {
        self.orphan_grace = grace;
    }

    #[cfg(test)]
    pub(crate) fn set_backoff_base(&mut self, base: Duration) {
        self.backoff_base = base;
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            default_match_duration: DEFAULT_MATCH_DURATION,
            match_durations: HashMap::new(),
            join_attempt_limit: DEFAULT_JOIN_ATTEMPT_LIMIT,
            conflict_retry_limit: DEFAULT_CONFLICT_RETRY_LIMIT,
            backoff_base: DEFAULT_BACKOFF_BASE,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
            orphan_grace: DEFAULT_ORPHAN_GRACE,
            max_speed_kmh: DEFAULT_MAX_SPEED_KMH,
        }
    }
}

/// On-disk JSON shape; every field optional so partial configs stay valid.
#[derive(Debug, Deserialize)]
struct RawConfig {
    #[serde(default)]
    default_match_duration_secs: Option<u64>,
    #[serde(default)]
    match_duration_secs: Option<HashMap<String, u64>>,
    #[serde(default)]
    join_attempt_limit: Option<u32>,
    #[serde(default)]
    conflict_retry_limit: Option<u32>,
    #[serde(default)]
    backoff_base_ms: Option<u64>,
    #[serde(default)]
    sweep_interval_secs: Option<u64>,
    #[serde(default)]
    orphan_grace_secs: Option<u64>,
    #[serde(default)]
    max_speed_kmh: Option<f64>,
}

impl From<RawConfig> for AppConfig {
    fn from(raw: RawConfig) -> Self {
        let defaults = AppConfig::default();
        Self {
            default_match_duration: raw
                .default_match_duration_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.default_match_duration),
            match_durations: raw
                .match_duration_secs
                .unwrap_or_default()
                .into_iter()
                .map(|(label, secs)| (label, Duration::from_secs(secs)))
                .collect(),
            join_attempt_limit: raw.join_attempt_limit.unwrap_or(defaults.join_attempt_limit),
            conflict_retry_limit: raw
                .conflict_retry_limit
                .unwrap_or(defaults.conflict_retry_limit),
            backoff_base: raw
                .backoff_base_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.backoff_base),
            sweep_interval: raw
                .sweep_interval_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.sweep_interval),
            orphan_grace: raw
                .orphan_grace_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.orphan_grace),
            max_speed_kmh: raw.max_speed_kmh.unwrap_or(defaults.max_speed_kmh),
        }
    }
}

fn resolve_config_path() -> PathBuf {
    env::var(CONFIG_PATH_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_when_raw_is_empty() {
        let raw: RawConfig = serde_json::from_str("{}").unwrap();
        let config: AppConfig = raw.into();
        assert_eq!(config.match_duration("2v2"), DEFAULT_MATCH_DURATION);
        assert_eq!(config.join_attempt_limit(), DEFAULT_JOIN_ATTEMPT_LIMIT);
        assert_eq!(config.max_speed_kmh(), DEFAULT_MAX_SPEED_KMH);
    }

    #[test]
    fn per_type_duration_overrides_default() {
        let raw: RawConfig = serde_json::from_str(
            r#"{"default_match_duration_secs": 600, "match_duration_secs": {"3v3": 1800}}"#,
        )
        .unwrap();
        let config: AppConfig = raw.into();
        assert_eq!(config.match_duration("3v3"), Duration::from_secs(1800));
        assert_eq!(config.match_duration("2v2"), Duration::from_secs(600));
    }
}
