use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::memory::estimator::{
    DEFAULT_LAMBDA, DEFAULT_LAMBDA_MAX, DEFAULT_LAMBDA_MIN, DEFAULT_LEARNING_RATE,
    DEFAULT_MAX_UPDATE_ATTEMPTS,
};
use crate::memory::recommender::{DEFAULT_CANDIDATES_SEC, DEFAULT_HISTORY_WINDOW, DEFAULT_TARGET_RETENTION};
use crate::memory::{EstimatorConfig, RecommenderConfig};
use crate::scanner::{ScanConfig, DEFAULT_POLL_INTERVAL_SECS, DEFAULT_SCAN_TIMEOUT_SECS};
use crate::store::sqlite::default_db_path;

#[derive(Debug, Clone, PartialEq)]
pub enum Persistence {
    Memory,
    SqliteFile(PathBuf),
    SqliteUrl(String),
}

#[derive(Debug, Clone)]
pub struct Config {
    pub host: IpAddr,
    pub port: u16,
    pub log_level: String,
    pub persistence: Persistence,
    pub estimator: EstimatorConfig,
    pub recommender: RecommenderConfig,
    pub scan: ScanConfig,
}

fn env_parse<T: FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.trim().parse::<T>().ok())
}

fn env_finite(key: &str, default: f64) -> f64 {
    env_parse::<f64>(key)
        .filter(|v| v.is_finite())
        .unwrap_or(default)
}

fn env_flag(key: &str, default: bool) -> bool {
    std::env::var(key)
        .map(|v| v != "false" && v != "0")
        .unwrap_or(default)
}

/// Comma separated seconds; unparsable entries are ignored.
pub fn parse_candidates(raw: &str) -> Vec<u64> {
    raw.split(',')
        .filter_map(|v| v.trim().parse::<u64>().ok())
        .filter(|v| *v > 0)
        .collect()
}

fn persistence_from(raw: Option<String>) -> Persistence {
    match raw.map(|v| v.trim().to_string()) {
        None => Persistence::SqliteFile(default_db_path()),
        Some(v) if v.is_empty() => Persistence::SqliteFile(default_db_path()),
        Some(v) if v.eq_ignore_ascii_case("memory") => Persistence::Memory,
        Some(v) if v.starts_with("sqlite:") => Persistence::SqliteUrl(v),
        Some(v) => Persistence::SqliteFile(PathBuf::from(v)),
    }
}

impl Config {
    pub fn from_env() -> Self {
        let port = std::env::var("PORT")
            .ok()
            .and_then(|value| value.parse::<u16>().ok())
            .unwrap_or(3000);

        let host = std::env::var("HOST")
            .ok()
            .and_then(|value| value.parse::<IpAddr>().ok())
            .unwrap_or(IpAddr::V4(Ipv4Addr::new(0, 0, 0, 0)));

        let log_level = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());

        let estimator = EstimatorConfig {
            learning_rate: env_finite("DECAY_LEARNING_RATE", DEFAULT_LEARNING_RATE),
            lambda_min: env_finite("DECAY_LAMBDA_MIN", DEFAULT_LAMBDA_MIN),
            lambda_max: env_finite("DECAY_LAMBDA_MAX", DEFAULT_LAMBDA_MAX),
            default_lambda: env_finite("DECAY_DEFAULT_LAMBDA", DEFAULT_LAMBDA),
            max_update_attempts: DEFAULT_MAX_UPDATE_ATTEMPTS,
        }
        .normalized();

        let recommender = RecommenderConfig {
            candidates_sec: std::env::var("RECOMMEND_CANDIDATES_SEC")
                .map(|raw| parse_candidates(&raw))
                .unwrap_or_else(|_| DEFAULT_CANDIDATES_SEC.to_vec()),
            target_retention: env_finite("RECOMMEND_TARGET_RETENTION", DEFAULT_TARGET_RETENTION),
            history_window: env_parse("RECOMMEND_HISTORY_WINDOW").unwrap_or(DEFAULT_HISTORY_WINDOW),
        }
        .normalized();

        let scan = ScanConfig {
            poll_interval: Duration::from_secs(
                env_parse::<u64>("SCAN_POLL_INTERVAL_SECS")
                    .filter(|v| *v > 0)
                    .unwrap_or(DEFAULT_POLL_INTERVAL_SECS),
            ),
            scan_timeout: Duration::from_secs(
                env_parse::<u64>("SCAN_TIMEOUT_SECS")
                    .filter(|v| *v > 0)
                    .unwrap_or(DEFAULT_SCAN_TIMEOUT_SECS),
            ),
            enabled: env_flag("ENABLE_DUE_SCANNER", true),
        };

        Self {
            host,
            port,
            log_level,
            persistence: persistence_from(std::env::var("DATABASE_URL").ok()),
            estimator,
            recommender,
            scan,
        }
    }

    /// In-process stores and default model settings.
    pub fn in_memory() -> Self {
        Self {
            host: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port: 0,
            log_level: "info".to_string(),
            persistence: Persistence::Memory,
            estimator: EstimatorConfig::default(),
            recommender: RecommenderConfig::default(),
            scan: ScanConfig::default(),
        }
    }

    pub fn bind_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }
}
