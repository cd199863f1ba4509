//! Ambient process configuration: brokerage/market-data/optimizer
//! credentials and endpoints, storage location, log level. Loaded from
//! the environment (via `.env` if present) at process start.
//!
//! This is distinct from `domain::settings::Settings`, which holds the
//! ~80 business tunables (cooldowns, thresholds, drift limits) that can
//! change at runtime through the settings API; `EngineConfig` only holds
//! what is fixed for the lifetime of a process.

use anyhow::{Context, Result};
use std::env;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TradingMode {
    Research,
    Live,
}

impl std::str::FromStr for TradingMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "research" => Ok(TradingMode::Research),
            "live" => Ok(TradingMode::Live),
            other => anyhow::bail!("invalid TRADING_MODE: {other}, must be 'research' or 'live'"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct BrokerageEndpoint {
    pub base_url: String,
    pub api_key: String,
    pub api_secret: String,
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub trading_mode: TradingMode,
    pub database_url: String,
    pub brokerage: BrokerageEndpoint,
    pub market_data_base_url: String,
    pub optimizer_base_url: String,
    pub evaluator_base_url: Option<String>,
    pub fx_base_url: String,
    pub http_timeout_secs: u64,
    pub http_max_retries: u32,
    pub metrics_interval_secs: u64,
    pub log_level: String,
}

fn env_var(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw
            .parse()
            .map_err(|e| anyhow::anyhow!("failed to parse {key}: {e}")),
        Err(_) => Ok(default),
    }
}

impl EngineConfig {
    /// Loads configuration from the process environment, reading a
    /// `.env` file first if one is present in the working directory.
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let trading_mode = env_var("TRADING_MODE", "research")
            .parse()
            .context("failed to parse TRADING_MODE")?;

        let database_url = env_var("DATABASE_URL", "sqlite://rebalancer.db");

        let brokerage = BrokerageEndpoint {
            base_url: env_var("BROKERAGE_BASE_URL", "https://api.brokerage.example/v1"),
            api_key: env_var("BROKERAGE_API_KEY", ""),
            api_secret: env_var("BROKERAGE_API_SECRET", ""),
        };

        let market_data_base_url = env_var("MARKET_DATA_BASE_URL", "https://api.marketdata.example/v1");
        let optimizer_base_url = env_var("OPTIMIZER_BASE_URL", "http://localhost:8090");
        let evaluator_base_url = env::var("EVALUATOR_BASE_URL").ok();
        let fx_base_url = env_var("FX_BASE_URL", &market_data_base_url);

        let http_timeout_secs = env_parse("HTTP_TIMEOUT_SECS", 30).context("failed to parse HTTP_TIMEOUT_SECS")?;
        let http_max_retries = env_parse("HTTP_MAX_RETRIES", 3).context("failed to parse HTTP_MAX_RETRIES")?;
        let metrics_interval_secs =
            env_parse("METRICS_INTERVAL_SECS", 60).context("failed to parse METRICS_INTERVAL_SECS")?;

        let log_level = env_var("LOG_LEVEL", "info");

        Ok(Self {
            trading_mode,
            database_url,
            brokerage,
            market_data_base_url,
            optimizer_base_url,
            evaluator_base_url,
            fx_base_url,
            http_timeout_secs,
            http_max_retries,
            metrics_interval_secs,
            log_level,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Mutex, OnceLock};

    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();

    fn lock() -> &'static Mutex<()> {
        ENV_LOCK.get_or_init(|| Mutex::new(()))
    }

    #[test]
    fn defaults_to_research_mode() {
        let _guard = lock().lock().unwrap();
        env::remove_var("TRADING_MODE");
        let config = EngineConfig::from_env().unwrap();
        assert_eq!(config.trading_mode, TradingMode::Research);
    }

    #[test]
    fn reads_trading_mode_from_env() {
        let _guard = lock().lock().unwrap();
        env::set_var("TRADING_MODE", "live");
        let config = EngineConfig::from_env().unwrap();
        assert_eq!(config.trading_mode, TradingMode::Live);
        env::remove_var("TRADING_MODE");
    }

    #[test]
    fn rejects_unknown_trading_mode() {
        let _guard = lock().lock().unwrap();
        env::set_var("TRADING_MODE", "paper");
        assert!(EngineConfig::from_env().is_err());
        env::remove_var("TRADING_MODE");
    }
}
