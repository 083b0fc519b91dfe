use serde::Deserialize;
use std::path::Path;

use crate::error::BotError;
use crate::indicators::BandAnchor;
use crate::Result;

const DEFAULT_CONFIG_FILE: &str = "bandbot.toml";
const ENV_PREFIX: &str = "BANDBOT";

/// Runtime settings, layered: defaults < config file < `BANDBOT__*` environment
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Settings {
    pub exchange: ExchangeSettings,
    pub database: DatabaseSettings,
    pub strategy: StrategySettings,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExchangeSettings {
    pub base_url: String,
    pub recv_window_ms: u64,
    pub timeout_secs: u64,
    pub max_retries: u32,
    /// Delay before the first retry, doubled on each further attempt
    pub retry_base_delay_ms: u64,
    pub requests_per_minute: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseSettings {
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StrategySettings {
    /// Candles in the band look-back
    pub band_period: usize,
    /// Candles fetched per decision cycle
    pub fetch_limit: u32,
    pub band_anchor: BandAnchor,
    pub poll_interval_secs: u64,
    /// Gain over entry (in percent) at which an open position is sold
    pub take_profit_pct: f64,
}

impl Default for ExchangeSettings {
    fn default() -> Self {
        Self {
            base_url: "https://api.binance.com".to_string(),
            recv_window_ms: 5000,
            timeout_secs: 30,
            max_retries: 3,
            retry_base_delay_ms: 2000,
            requests_per_minute: 1200,
        }
    }
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            url: "sqlite://trade_bot.db".to_string(),
            max_connections: 1,
        }
    }
}

impl Default for StrategySettings {
    fn default() -> Self {
        Self {
            band_period: 20,
            fetch_limit: 25,
            band_anchor: BandAnchor::Oldest,
            poll_interval_secs: 60,
            take_profit_pct: 2.0,
        }
    }
}

impl Settings {
    /// Load settings from `path` (or `bandbot.toml` if present) and the environment
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let defaults = Settings::default();
        let mut builder = config::Config::builder()
            .set_default("exchange.base_url", defaults.exchange.base_url)?
            .set_default("exchange.recv_window_ms", defaults.exchange.recv_window_ms as i64)?
            .set_default("exchange.timeout_secs", defaults.exchange.timeout_secs as i64)?
            .set_default("exchange.max_retries", i64::from(defaults.exchange.max_retries))?
            .set_default(
                "exchange.retry_base_delay_ms",
                defaults.exchange.retry_base_delay_ms as i64,
            )?
            .set_default(
                "exchange.requests_per_minute",
                i64::from(defaults.exchange.requests_per_minute),
            )?
            .set_default("database.url", defaults.database.url)?
            .set_default(
                "database.max_connections",
                i64::from(defaults.database.max_connections),
            )?
            .set_default("strategy.band_period", defaults.strategy.band_period as i64)?
            .set_default("strategy.fetch_limit", i64::from(defaults.strategy.fetch_limit))?
            .set_default("strategy.band_anchor", "oldest")?
            .set_default(
                "strategy.poll_interval_secs",
                defaults.strategy.poll_interval_secs as i64,
            )?
            .set_default("strategy.take_profit_pct", defaults.strategy.take_profit_pct)?;

        builder = match path {
            Some(path) => builder.add_source(config::File::from(path)),
            None => builder.add_source(config::File::with_name(DEFAULT_CONFIG_FILE).required(false)),
        };

        let settings: Settings = builder
            .add_source(config::Environment::with_prefix(ENV_PREFIX).separator("__"))
            .build()?
            .try_deserialize()?;

        settings.validate()?;
        Ok(settings)
    }

    /// Reject combinations that could never produce a band
    pub fn validate(&self) -> Result<()> {
        let strategy = &self.strategy;

        if strategy.band_period == 0 {
            return Err(BotError::InvalidParameter(
                "strategy.band_period must be at least 1".to_string(),
            ));
        }
        if (strategy.fetch_limit as usize) < strategy.band_period {
            return Err(BotError::InvalidParameter(format!(
                "strategy.fetch_limit ({}) is smaller than strategy.band_period ({})",
                strategy.fetch_limit, strategy.band_period
            )));
        }
        if strategy.poll_interval_secs == 0 {
            return Err(BotError::InvalidParameter(
                "strategy.poll_interval_secs must be positive".to_string(),
            ));
        }
        if self.exchange.requests_per_minute == 0 {
            return Err(BotError::InvalidParameter(
                "exchange.requests_per_minute must be positive".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let settings = Settings::default();
        assert!(settings.validate().is_ok());
        assert_eq!(settings.strategy.band_period, 20);
        assert_eq!(settings.strategy.fetch_limit, 25);
        assert_eq!(settings.strategy.band_anchor, BandAnchor::Oldest);
    }

    #[test]
    fn test_fetch_limit_below_period_rejected() {
        let mut settings = Settings::default();
        settings.strategy.fetch_limit = 10;

        let err = settings.validate().unwrap_err();
        assert!(matches!(err, BotError::InvalidParameter(_)));
        assert!(err.to_string().contains("fetch_limit"));
    }

    #[test]
    fn test_zero_poll_interval_rejected() {
        let mut settings = Settings::default();
        settings.strategy.poll_interval_secs = 0;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_load_from_file() {
        let path = std::env::temp_dir().join(format!("bandbot-{}.toml", uuid::Uuid::new_v4()));
        std::fs::write(
            &path,
            r#"
            [strategy]
            band_anchor = "latest"
            fetch_limit = 40

            [database]
            url = "sqlite::memory:"
            "#,
        )
        .unwrap();

        let settings = Settings::load(Some(&path)).unwrap();
        std::fs::remove_file(&path).unwrap();

        assert_eq!(settings.strategy.band_anchor, BandAnchor::Latest);
        assert_eq!(settings.strategy.fetch_limit, 40);
        assert_eq!(settings.strategy.band_period, 20);
        assert_eq!(settings.database.url, "sqlite::memory:");
        assert_eq!(settings.exchange.base_url, "https://api.binance.com");
    }
}
