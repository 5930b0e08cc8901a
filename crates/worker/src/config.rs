use std::str::FromStr;
use std::time::Duration;

use anyhow::{bail, Context};
use roster_core::scheduling::BattleCategory;
use roster_core::types::DbId;
use roster_engine::LockConfig;

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

/// Worker configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub database_url: String,
    pub max_connections: u32,
    pub lock: LockConfig,
    /// Per-table change channel capacity.
    pub feed_capacity: usize,
    /// First re-subscribe delay after the feed drops.
    pub resync_backoff: Duration,
    /// Identity of the watching session.
    pub operator_id: DbId,
    pub category: BattleCategory,
    pub log_format: LogFormat,
}

impl WorkerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var              | Default    |
    /// |----------------------|------------|
    /// | `DATABASE_URL`       | (required) |
    /// | `DB_MAX_CONNECTIONS` | `20`       |
    /// | `LOCK_TTL_SECS`      | `300`      |
    /// | `FEED_CAPACITY`      | `1024`     |
    /// | `RESYNC_BACKOFF_MS`  | `500`      |
    /// | `OPERATOR_ID`        | `0`        |
    /// | `BATTLE_CATEGORY`    | `DESERT`   |
    /// | `LOG_FORMAT`         | `pretty`   |
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let database_url = lookup("DATABASE_URL").context("DATABASE_URL must be set")?;

        let ttl_secs: u64 = parse_or(&lookup, "LOCK_TTL_SECS", 300)?;
        let lock = LockConfig::new(Duration::from_secs(ttl_secs))
            .context("LOCK_TTL_SECS out of range")?;

        let category = match lookup("BATTLE_CATEGORY") {
            Some(raw) => raw
                .parse::<BattleCategory>()
                .context("BATTLE_CATEGORY is not a known category")?,
            None => BattleCategory::Desert,
        };

        let log_format = match lookup("LOG_FORMAT").as_deref() {
            None | Some("pretty") => LogFormat::Pretty,
            Some("json") => LogFormat::Json,
            Some(other) => bail!("LOG_FORMAT must be 'pretty' or 'json', got '{other}'"),
        };

        Ok(Self {
            database_url,
            max_connections: parse_or(&lookup, "DB_MAX_CONNECTIONS", 20)?,
            lock,
            feed_capacity: parse_or(&lookup, "FEED_CAPACITY", 1024)?,
            resync_backoff: Duration::from_millis(parse_or(&lookup, "RESYNC_BACKOFF_MS", 500)?),
            operator_id: parse_or(&lookup, "OPERATOR_ID", 0)?,
            category,
            log_format,
        })
    }
}

fn parse_or<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("{key} must be a valid number, got '{raw}'")),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn load(vars: &[(&str, &str)]) -> anyhow::Result<WorkerConfig> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        WorkerConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_apply() {
        let config = load(&[("DATABASE_URL", "postgres://localhost/roster")]).unwrap();
        assert_eq!(config.max_connections, 20);
        assert_eq!(config.lock.ttl, Duration::from_secs(300));
        assert_eq!(config.feed_capacity, 1024);
        assert_eq!(config.resync_backoff, Duration::from_millis(500));
        assert_eq!(config.operator_id, 0);
        assert_eq!(config.category, BattleCategory::Desert);
        assert_eq!(config.log_format, LogFormat::Pretty);
    }

    #[test]
    fn database_url_is_required() {
        assert!(load(&[]).is_err());
    }

    #[test]
    fn overrides_are_parsed() {
        let config = load(&[
            ("DATABASE_URL", "postgres://db/roster"),
            ("LOCK_TTL_SECS", "120"),
            ("OPERATOR_ID", "42"),
            ("LOG_FORMAT", "json"),
        ])
        .unwrap();
        assert_eq!(config.lock.ttl, Duration::from_secs(120));
        assert_eq!(config.operator_id, 42);
        assert_eq!(config.log_format, LogFormat::Json);
    }

    #[test]
    fn bad_values_are_rejected() {
        let url = ("DATABASE_URL", "postgres://db/roster");
        assert!(load(&[url, ("LOCK_TTL_SECS", "5")]).is_err());
        assert!(load(&[url, ("FEED_CAPACITY", "lots")]).is_err());
        assert!(load(&[url, ("BATTLE_CATEGORY", "OCEAN")]).is_err());
        assert!(load(&[url, ("LOG_FORMAT", "xml")]).is_err());
    }
}
