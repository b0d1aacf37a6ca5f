//! Infrastructure configuration from environment variables.

use std::env;

use anyhow::{Context, Result};
use chrono::Duration;

use cyclekit_order_cycles::RECENTLY_CLOSED_DAYS;

pub const DEFAULT_MAX_CONNECTIONS: u32 = 5;

/// Longest accepted recently-closed window (one century).
pub const MAX_RECENTLY_CLOSED_DAYS: i64 = 36_500;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InfraConfig {
    /// Postgres connection string. `None` selects the in-memory store.
    pub database_url: Option<String>,

    /// Upper bound for the Postgres connection pool.
    pub max_connections: u32,

    /// Look-back window of the `recently_closed` scope, in days.
    pub recently_closed_days: i64,
}

impl Default for InfraConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            max_connections: DEFAULT_MAX_CONNECTIONS,
            recently_closed_days: RECENTLY_CLOSED_DAYS,
        }
    }
}

impl InfraConfig {
    /// Create configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `DATABASE_URL`: Postgres connection string (default: unset, in-memory store)
    /// - `CYCLEKIT_DB_MAX_CONNECTIONS`: pool size (default: 5)
    /// - `CYCLEKIT_RECENTLY_CLOSED_DAYS`: recently-closed window (default: 31)
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Same as [`InfraConfig::from_env`], reading values through `lookup`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Self::default();

        let database_url = lookup("DATABASE_URL").filter(|url| !url.trim().is_empty());

        let max_connections = match lookup("CYCLEKIT_DB_MAX_CONNECTIONS") {
            Some(raw) => raw
                .trim()
                .parse::<u32>()
                .with_context(|| format!("CYCLEKIT_DB_MAX_CONNECTIONS must be a positive integer, got '{raw}'"))?,
            None => defaults.max_connections,
        };
        anyhow::ensure!(max_connections > 0, "CYCLEKIT_DB_MAX_CONNECTIONS must be at least 1");

        let recently_closed_days = match lookup("CYCLEKIT_RECENTLY_CLOSED_DAYS") {
            Some(raw) => raw
                .trim()
                .parse::<i64>()
                .with_context(|| format!("CYCLEKIT_RECENTLY_CLOSED_DAYS must be a whole number of days, got '{raw}'"))?,
            None => defaults.recently_closed_days,
        };
        anyhow::ensure!(recently_closed_days >= 0, "CYCLEKIT_RECENTLY_CLOSED_DAYS cannot be negative");
        anyhow::ensure!(
            recently_closed_days <= MAX_RECENTLY_CLOSED_DAYS,
            "CYCLEKIT_RECENTLY_CLOSED_DAYS cannot exceed {MAX_RECENTLY_CLOSED_DAYS}, got {recently_closed_days}"
        );

        Ok(Self {
            database_url,
            max_connections,
            recently_closed_days,
        })
    }

    /// Saturates at `Duration::MAX` for hand-built configs outside the accepted range.
    pub fn recently_closed_window(&self) -> Duration {
        Duration::try_days(self.recently_closed_days).unwrap_or(Duration::MAX)
    }

    pub fn uses_postgres(&self) -> bool {
        self.database_url.is_some()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn defaults_when_nothing_is_set() {
        let config = InfraConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, InfraConfig::default());
        assert!(!config.uses_postgres());
        assert_eq!(config.recently_closed_window(), Duration::days(31));
    }

    #[test]
    fn reads_all_values() {
        let config = InfraConfig::from_lookup(lookup(&[
            ("DATABASE_URL", "postgres://localhost/cyclekit"),
            ("CYCLEKIT_DB_MAX_CONNECTIONS", "12"),
            ("CYCLEKIT_RECENTLY_CLOSED_DAYS", "7"),
        ]))
        .unwrap();

        assert_eq!(config.database_url.as_deref(), Some("postgres://localhost/cyclekit"));
        assert_eq!(config.max_connections, 12);
        assert_eq!(config.recently_closed_window(), Duration::days(7));
    }

    #[test]
    fn blank_database_url_means_in_memory() {
        let config = InfraConfig::from_lookup(lookup(&[("DATABASE_URL", "  ")])).unwrap();
        assert!(!config.uses_postgres());
    }

    #[test]
    fn invalid_numbers_are_errors() {
        assert!(InfraConfig::from_lookup(lookup(&[("CYCLEKIT_DB_MAX_CONNECTIONS", "many")])).is_err());
        assert!(InfraConfig::from_lookup(lookup(&[("CYCLEKIT_DB_MAX_CONNECTIONS", "0")])).is_err());
        assert!(InfraConfig::from_lookup(lookup(&[("CYCLEKIT_RECENTLY_CLOSED_DAYS", "-3")])).is_err());
    }

    #[test]
    fn oversized_recently_closed_window_is_rejected() {
        let err = InfraConfig::from_lookup(lookup(&[("CYCLEKIT_RECENTLY_CLOSED_DAYS", "100000000")])).unwrap_err();
        assert!(err.to_string().contains("CYCLEKIT_RECENTLY_CLOSED_DAYS"));

        let century = InfraConfig::from_lookup(lookup(&[("CYCLEKIT_RECENTLY_CLOSED_DAYS", "36500")])).unwrap();
        assert_eq!(century.recently_closed_window(), Duration::days(MAX_RECENTLY_CLOSED_DAYS));
    }

    #[test]
    fn hand_built_window_saturates_instead_of_panicking() {
        let config = InfraConfig {
            recently_closed_days: i64::MAX,
            ..Default::default()
        };
        assert_eq!(config.recently_closed_window(), Duration::MAX);
    }
}
