//! Store configuration loading.

use crate::error::StoreError;

const DEFAULT_MAX_CONNECTIONS: u32 = 5;

/// Connection settings for the Postgres store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    pub database_url: String,
    pub max_connections: u32,
    /// Apply `migrations/0001_checkout.sql` on connect.
    pub run_migrations: bool,
}

impl StoreConfig {
    pub fn new(database_url: impl Into<String>) -> Self {
        Self {
            database_url: database_url.into(),
            max_connections: DEFAULT_MAX_CONNECTIONS,
            run_migrations: true,
        }
    }

    /// Read `DATABASE_URL`, `CHECKOUT_DB_MAX_CONNECTIONS` and
    /// `CHECKOUT_DB_RUN_MIGRATIONS` from the process environment.
    pub fn from_env() -> Result<Self, StoreError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as `from_env`, reading values through `lookup`.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, StoreError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let database_url = lookup("DATABASE_URL")
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| StoreError::Config("DATABASE_URL is not set".to_string()))?;

        let max_connections = match lookup("CHECKOUT_DB_MAX_CONNECTIONS") {
            None => DEFAULT_MAX_CONNECTIONS,
            Some(raw) => match raw.trim().parse::<u32>() {
                Ok(n) if n > 0 => n,
                _ => {
                    tracing::warn!(
                        value = %raw,
                        default = DEFAULT_MAX_CONNECTIONS,
                        "CHECKOUT_DB_MAX_CONNECTIONS is not a positive integer; using default"
                    );
                    DEFAULT_MAX_CONNECTIONS
                }
            },
        };

        let run_migrations = match lookup("CHECKOUT_DB_RUN_MIGRATIONS") {
            None => true,
            Some(raw) => match raw.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => true,
                "0" | "false" | "no" | "off" => false,
                _ => {
                    tracing::warn!(
                        value = %raw,
                        "CHECKOUT_DB_RUN_MIGRATIONS is not a boolean; using true"
                    );
                    true
                }
            },
        };

        Ok(Self {
            database_url,
            max_connections,
            run_migrations,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn database_url_is_required() {
        let err = StoreConfig::from_lookup(lookup_from(&[])).unwrap_err();
        assert!(matches!(err, StoreError::Config(_)));
    }

    #[test]
    fn defaults_apply_when_optional_values_are_missing() {
        let config = StoreConfig::from_lookup(lookup_from(&[(
            "DATABASE_URL",
            "postgres://localhost/checkout",
        )]))
        .unwrap();
        assert_eq!(config, StoreConfig::new("postgres://localhost/checkout"));
    }

    #[test]
    fn explicit_values_are_parsed() {
        let config = StoreConfig::from_lookup(lookup_from(&[
            ("DATABASE_URL", "postgres://db/checkout"),
            ("CHECKOUT_DB_MAX_CONNECTIONS", "12"),
            ("CHECKOUT_DB_RUN_MIGRATIONS", "off"),
        ]))
        .unwrap();
        assert_eq!(config.max_connections, 12);
        assert!(!config.run_migrations);
    }

    #[test]
    fn invalid_values_fall_back_to_defaults() {
        let config = StoreConfig::from_lookup(lookup_from(&[
            ("DATABASE_URL", "postgres://db/checkout"),
            ("CHECKOUT_DB_MAX_CONNECTIONS", "zero"),
            ("CHECKOUT_DB_RUN_MIGRATIONS", "maybe"),
        ]))
        .unwrap();
        assert_eq!(config.max_connections, DEFAULT_MAX_CONNECTIONS);
        assert!(config.run_migrations);
    }
}
