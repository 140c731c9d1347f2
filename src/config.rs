use std::{env, fmt::Display, str::FromStr, time::Duration};

use tracing::{info, warn};

use crate::engine::EngineOptions;

pub const DEFAULT_OUTBREAK_SERVICE_URL: &str = "http://localhost:8000";

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: Option<String>,
    pub outbreak_service_url: String,
    pub outbreak_timeout: Duration,
    pub db_max_connections: u32,
    pub feed_max_backoff: Duration,
}

impl Config {
    pub fn load() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        Self {
            database_url: lookup("DATABASE_URL"),
            outbreak_service_url: try_load(&lookup, "OUTBREAK_SERVICE_URL", DEFAULT_OUTBREAK_SERVICE_URL.to_string()),
            outbreak_timeout: Duration::from_secs(try_load(&lookup, "OUTBREAK_TIMEOUT_SECS", 3)),
            db_max_connections: try_load(&lookup, "DB_MAX_CONNECTIONS", 5),
            feed_max_backoff: Duration::from_secs(try_load(&lookup, "FEED_MAX_BACKOFF_SECS", 30)),
        }
    }

    pub fn engine_options(&self) -> EngineOptions {
        EngineOptions {
            outbreak_timeout: self.outbreak_timeout,
        }
    }
}

fn try_load<F, T>(lookup: &F, key: &str, default: T) -> T
where
    F: Fn(&str) -> Option<String>,
    T: FromStr + Display,
    T::Err: Display,
{
    let Some(raw) = lookup(key) else {
        info!("{key} not set, using default: {default}");
        return default;
    };

    raw.trim().parse().unwrap_or_else(|e| {
        warn!("Invalid {key} value {raw:?}: {e}, using default: {default}");
        default
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_apply_when_unset() {
        let config = Config::from_lookup(lookup(&[]));
        assert_eq!(config.outbreak_service_url, DEFAULT_OUTBREAK_SERVICE_URL);
        assert_eq!(config.outbreak_timeout, Duration::from_secs(3));
        assert_eq!(config.db_max_connections, 5);
        assert!(config.database_url.is_none());
    }

    #[test]
    fn invalid_numbers_fall_back() {
        let config = Config::from_lookup(lookup(&[
            ("OUTBREAK_SERVICE_URL", "https://outbreaks.school.example/api"),
            ("OUTBREAK_TIMEOUT_SECS", "soon"),
            ("DB_MAX_CONNECTIONS", "12"),
        ]));
        assert_eq!(config.outbreak_service_url, "https://outbreaks.school.example/api");
        assert_eq!(config.outbreak_timeout, Duration::from_secs(3));
        assert_eq!(config.db_max_connections, 12);
    }
}
