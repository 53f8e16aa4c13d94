use std::path::PathBuf;

use tracing::warn;

use crate::calendar::{parse_time, CalendarError, OperationalHours};
use crate::limits::MAX_RANGE_DAYS_CAP;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{var}: invalid value {value:?}")]
    Invalid { var: &'static str, value: String },
    #[error("{var}: {source}")]
    Hours {
        var: &'static str,
        #[source]
        source: CalendarError,
    },
}

/// Booking rules owned by the deployment rather than the core.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BookingPolicy {
    /// Hours given to rooms created without explicit ones.
    pub default_hours: OperationalHours,
    pub min_capacity: u32,
    pub max_range_days: u32,
}

impl Default for BookingPolicy {
    fn default() -> Self {
        Self {
            default_hours: OperationalHours::default(),
            min_capacity: 1,
            max_range_days: 14,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub bind: String,
    pub data_dir: PathBuf,
    pub password: String,
    pub max_connections: usize,
    pub compact_threshold: u64,
    pub metrics_port: Option<u16>,
    pub policy: BookingPolicy,
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; unset keys fall back to defaults, malformed ones fail.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let port = parsed(&lookup, "ROOMBOOK_PORT")?.unwrap_or(5433);
        let bind = lookup("ROOMBOOK_BIND").unwrap_or_else(|| "0.0.0.0".into());
        let data_dir = PathBuf::from(lookup("ROOMBOOK_DATA_DIR").unwrap_or_else(|| "./data".into()));
        let password = lookup("ROOMBOOK_PASSWORD").unwrap_or_else(|| "roombook".into());
        let max_connections = parsed(&lookup, "ROOMBOOK_MAX_CONNECTIONS")?.unwrap_or(256);
        let compact_threshold = parsed(&lookup, "ROOMBOOK_COMPACT_THRESHOLD")?.unwrap_or(1000);
        let metrics_port = parsed(&lookup, "ROOMBOOK_METRICS_PORT")?;

        let defaults = OperationalHours::default();
        let opens = time(&lookup, "ROOMBOOK_OPENS_AT")?.unwrap_or(defaults.opens);
        let closes = time(&lookup, "ROOMBOOK_CLOSES_AT")?.unwrap_or(defaults.closes);
        let default_hours = OperationalHours::new(opens, closes).map_err(|source| ConfigError::Hours {
            var: "ROOMBOOK_CLOSES_AT",
            source,
        })?;

        let min_capacity = match parsed::<u32>(&lookup, "ROOMBOOK_MIN_CAPACITY")? {
            Some(0) => {
                return Err(ConfigError::Invalid {
                    var: "ROOMBOOK_MIN_CAPACITY",
                    value: "0".into(),
                });
            }
            Some(n) => n,
            None => {
                warn!("ROOMBOOK_MIN_CAPACITY not set, requests need a capacity of at least 1");
                1
            }
        };

        let max_range_days = parsed::<u32>(&lookup, "ROOMBOOK_MAX_RANGE_DAYS")?.unwrap_or(14);
        if max_range_days == 0 || max_range_days > MAX_RANGE_DAYS_CAP {
            return Err(ConfigError::Invalid {
                var: "ROOMBOOK_MAX_RANGE_DAYS",
                value: max_range_days.to_string(),
            });
        }

        Ok(Self {
            port,
            bind,
            data_dir,
            password,
            max_connections,
            compact_threshold,
            metrics_port,
            policy: BookingPolicy {
                default_hours,
                min_capacity,
                max_range_days,
            },
        })
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join("roombook.wal")
    }
}

fn parsed<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &'static str,
) -> Result<Option<T>, ConfigError> {
    match lookup(var) {
        None => Ok(None),
        Some(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::Invalid { var, value }),
    }
}

fn time(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &'static str,
) -> Result<Option<chrono::NaiveTime>, ConfigError> {
    match lookup(var) {
        None => Ok(None),
        Some(value) => parse_time(&value)
            .map(Some)
            .ok_or(ConfigError::Invalid { var, value }),
    }
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
    fn defaults() {
        let cfg = ServerConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(cfg.port, 5433);
        assert_eq!(cfg.listen_addr(), "0.0.0.0:5433");
        assert_eq!(cfg.max_connections, 256);
        assert_eq!(cfg.compact_threshold, 1000);
        assert_eq!(cfg.metrics_port, None);
        assert_eq!(cfg.policy, BookingPolicy::default());
        assert_eq!(cfg.wal_path(), PathBuf::from("./data/roombook.wal"));
    }

    #[test]
    fn overrides() {
        let cfg = ServerConfig::from_lookup(lookup(&[
            ("ROOMBOOK_PORT", "6000"),
            ("ROOMBOOK_OPENS_AT", "08:00"),
            ("ROOMBOOK_CLOSES_AT", "17:30"),
            ("ROOMBOOK_MIN_CAPACITY", "5"),
            ("ROOMBOOK_MAX_RANGE_DAYS", "30"),
            ("ROOMBOOK_METRICS_PORT", "9100"),
        ]))
        .unwrap();
        assert_eq!(cfg.port, 6000);
        assert_eq!(cfg.policy.default_hours.to_string(), "08:00-17:30");
        assert_eq!(cfg.policy.min_capacity, 5);
        assert_eq!(cfg.policy.max_range_days, 30);
        assert_eq!(cfg.metrics_port, Some(9100));
    }

    #[test]
    fn malformed_values_fail() {
        assert!(matches!(
            ServerConfig::from_lookup(lookup(&[("ROOMBOOK_PORT", "http")])),
            Err(ConfigError::Invalid { var: "ROOMBOOK_PORT", .. })
        ));
        assert!(ServerConfig::from_lookup(lookup(&[("ROOMBOOK_MIN_CAPACITY", "0")])).is_err());
        assert!(ServerConfig::from_lookup(lookup(&[("ROOMBOOK_MAX_RANGE_DAYS", "1000")])).is_err());
        assert!(ServerConfig::from_lookup(lookup(&[("ROOMBOOK_OPENS_AT", "7am")])).is_err());
        assert!(matches!(
            ServerConfig::from_lookup(lookup(&[
                ("ROOMBOOK_OPENS_AT", "18:00"),
                ("ROOMBOOK_CLOSES_AT", "09:00"),
            ])),
            Err(ConfigError::Hours { .. })
        ));
    }
}
