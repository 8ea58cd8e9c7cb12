use std::path::PathBuf;
use std::time::Duration;

pub mod loader;
pub mod validator;

pub use loader::{load_config, parse_config};
pub use validator::validate_config;

pub const DEFAULT_QUOTE_URL: &str = "https://finnhub.io/api/v1/quote?symbol={symbol}&token={key}";
pub const DEFAULT_HISTORICAL_URL: &str =
    "https://www.alphavantage.co/query?function=TIME_SERIES_DAILY&symbol={symbol}&apikey={key}";
pub const DEFAULT_SERIES_KEY: &str = "Time Series (Daily)";

/// Fixed-interval gate settings for the quote endpoint.
#[derive(Debug, Clone)]
pub struct QuoteEndpointConfig {
    pub url_template: String,
    pub interval: Duration,
    /// Multiplier applied to `interval` after the provider answers 429.
    pub cooldown_factor: u32,
}

/// Sliding-window gate settings for the daily series endpoint.
#[derive(Debug, Clone)]
pub struct HistoricalEndpointConfig {
    pub url_template: String,
    pub series_key: String,
    pub max_requests: usize,
    pub window: Duration,
}

#[derive(Debug, Clone)]
pub struct HttpConfig {
    pub timeout: Duration,
    pub user_agent: String,
}

/// Where an API key is read from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeySource {
    Env(String),
    /// First readable, non-empty file wins.
    Files(Vec<PathBuf>),
    Literal(String),
}

#[derive(Debug, Clone)]
pub struct CredentialsConfig {
    pub quote: KeySource,
    pub historical: KeySource,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub quote: QuoteEndpointConfig,
    pub historical: HistoricalEndpointConfig,
    pub http: HttpConfig,
    pub credentials: CredentialsConfig,
    pub settings_path: PathBuf,
}

impl Config {
    pub fn builtin() -> Self {
        Config {
            quote: QuoteEndpointConfig {
                url_template: DEFAULT_QUOTE_URL.to_string(),
                interval: Duration::from_millis(1_100),
                cooldown_factor: 10,
            },
            historical: HistoricalEndpointConfig {
                url_template: DEFAULT_HISTORICAL_URL.to_string(),
                series_key: DEFAULT_SERIES_KEY.to_string(),
                max_requests: 1,
                window: Duration::from_secs(24 * 3_600),
            },
            http: HttpConfig {
                timeout: Duration::from_secs(10),
                user_agent: concat!("quote-dispatch/", env!("CARGO_PKG_VERSION")).to_string(),
            },
            credentials: CredentialsConfig {
                quote: KeySource::Env("QUOTE_API_KEY".to_string()),
                historical: KeySource::Env("HISTORICAL_API_KEY".to_string()),
            },
            settings_path: PathBuf::from("settings.json"),
        }
    }

    /// Delay imposed on the quote gate after a provider-side 429.
    pub fn quote_cooldown(&self) -> Duration {
        self.quote.interval * self.quote.cooldown_factor
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::builtin()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_matches_provider_limits() {
        let config = Config::builtin();
        assert_eq!(config.quote.interval, Duration::from_millis(1_100));
        assert_eq!(config.historical.max_requests, 1);
        assert_eq!(config.historical.window, Duration::from_secs(86_400));
        assert_eq!(config.quote_cooldown(), Duration::from_millis(11_000));
        validate_config(&config).expect("builtin config is valid");
    }
}
