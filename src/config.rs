use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;

use crate::scoring::DimensionMap;

fn env_bool(name: &str, default: bool) -> bool {
    env::var(name)
        .ok()
        .and_then(|v| match v.as_str() {
            "1" | "true" | "TRUE" | "yes" | "YES" => Some(true),
            "0" | "false" | "FALSE" | "no" | "NO" => Some(false),
            _ => None,
        })
        .unwrap_or(default)
}

fn env_u64(name: &str, default: u64) -> u64 {
    env::var(name)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(default)
}

fn env_usize(name: &str, default: usize) -> usize {
    env::var(name)
        .ok()
        .and_then(|v| v.parse::<usize>().ok())
        .filter(|v| *v > 0)
        .unwrap_or(default)
}

fn env_f64(name: &str, default: f64) -> f64 {
    env::var(name)
        .ok()
        .and_then(|v| v.parse::<f64>().ok())
        .unwrap_or(default)
}

fn env_string(name: &str, default: &str) -> String {
    env::var(name)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| default.to_string())
}

pub fn log_json() -> bool {
    env_bool("WELLBEING_LOG_JSON", false)
}

#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub url: String,
    pub model: String,
    pub timeout: Duration,
    pub enabled: bool,
}

fn parse_dimension_map(raw: &str) -> anyhow::Result<DimensionMap> {
    raw.parse::<DimensionMap>()
        .map_err(anyhow::Error::msg)
        .context("WELLBEING_DIMENSION_MAP must be 'core' or 'extended'")
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: Option<String>,
    pub bind: SocketAddr,
    pub llm: LlmConfig,
    pub cache_ttl: Duration,
    pub scan_page_size: usize,
    pub dimension_map: DimensionMap,
    pub holidays_path: Option<PathBuf>,
    pub stress_alert_threshold: f64,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let bind = env_string("WELLBEING_BIND", "0.0.0.0:8000")
            .parse::<SocketAddr>()
            .context("WELLBEING_BIND must be a socket address such as 0.0.0.0:8000")?;
        let dimension_map = parse_dimension_map(&env_string("WELLBEING_DIMENSION_MAP", "core"))?;

        Ok(Self {
            database_url: env::var("DATABASE_URL").ok().filter(|v| !v.is_empty()),
            bind,
            llm: LlmConfig {
                url: env_string("WELLBEING_LLM_URL", "http://localhost:11434/api/generate"),
                model: env_string("WELLBEING_LLM_MODEL", "llama3.2"),
                timeout: Duration::from_millis(env_u64("WELLBEING_LLM_TIMEOUT_MS", 30_000)),
                enabled: env_bool("WELLBEING_LLM_ENABLED", true),
            },
            cache_ttl: Duration::from_secs(env_u64("WELLBEING_CACHE_TTL_SECS", 3600)),
            scan_page_size: env_usize("WELLBEING_SCAN_PAGE_SIZE", 500),
            dimension_map,
            holidays_path: env::var("WELLBEING_HOLIDAYS").ok().map(PathBuf::from),
            stress_alert_threshold: env_f64("WELLBEING_STRESS_ALERT_THRESHOLD", 40.0),
        })
    }

    pub fn require_database_url(&self) -> anyhow::Result<&str> {
        self.database_url
            .as_deref()
            .context("DATABASE_URL must be set to a production Postgres instance")
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            bind: SocketAddr::from(([0, 0, 0, 0], 8000)),
            llm: LlmConfig {
                url: "http://localhost:11434/api/generate".to_string(),
                model: "llama3.2".to_string(),
                timeout: Duration::from_millis(30_000),
                enabled: true,
            },
            cache_ttl: Duration::from_secs(3600),
            scan_page_size: 500,
            dimension_map: DimensionMap::Core,
            holidays_path: None,
            stress_alert_threshold: 40.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bool_parsing_falls_back_on_garbage() {
        env::set_var("WELLBEING_TEST_FLAG", "maybe");
        assert!(env_bool("WELLBEING_TEST_FLAG", true));
        env::set_var("WELLBEING_TEST_FLAG", "no");
        assert!(!env_bool("WELLBEING_TEST_FLAG", true));
        env::remove_var("WELLBEING_TEST_FLAG");
    }

    #[test]
    fn zero_page_size_uses_default() {
        env::set_var("WELLBEING_TEST_PAGE", "0");
        assert_eq!(env_usize("WELLBEING_TEST_PAGE", 500), 500);
        env::remove_var("WELLBEING_TEST_PAGE");
    }

    #[test]
    fn dimension_map_names_are_validated() {
        assert_eq!(parse_dimension_map(" Extended ").unwrap(), DimensionMap::Extended);
        let err = parse_dimension_map("full").unwrap_err();
        assert!(format!("{err:#}").contains("unknown dimension map 'full'"));
    }

    #[test]
    fn defaults_match_documented_values() {
        let config = AppConfig::default();
        assert_eq!(config.bind.port(), 8000);
        assert_eq!(config.scan_page_size, 500);
        assert_eq!(config.stress_alert_threshold, 40.0);
        assert!(config.require_database_url().is_err());
    }
}
