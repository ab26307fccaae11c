//! Bot configuration: API credentials, risk limits, and market selection.
//!
//! Every component takes its slice of [`BotConfig`] at construction; there is
//! no global configuration state.

use std::str::FromStr;

use anyhow::{Context, Result};

/// Exchange API settings.
#[derive(Clone)]
pub struct ApiConfig {
    pub api_key: String,
    pub api_secret: String,
    pub api_passphrase: String,

    /// Use the sandbox environment instead of production
    pub sandbox: bool,

    /// Settlement currency for account queries
    pub default_currency: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            api_secret: String::new(),
            api_passphrase: String::new(),
            sandbox: true,
            default_currency: "USDT".to_string(),
        }
    }
}

impl ApiConfig {
    /// Whether all three credentials are present.
    pub fn has_credentials(&self) -> bool {
        !self.api_key.is_empty() && !self.api_secret.is_empty() && !self.api_passphrase.is_empty()
    }
}

// Credentials stay out of logs and `config` output.
impl std::fmt::Debug for ApiConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiConfig")
            .field("api_key", &mask(&self.api_key))
            .field("sandbox", &self.sandbox)
            .field("default_currency", &self.default_currency)
            .finish_non_exhaustive()
    }
}

/// Risk limits. In adaptive mode the leverage, size, stop, and target fields
/// are rewritten by the risk controller on every adaptive update.
#[derive(Debug, Clone)]
pub struct RiskConfig {
    /// Maximum leverage for any order
    pub max_leverage: u32,

    /// Margin budget per position, percent of total balance
    pub max_position_size_percent: f64,

    /// Minimum stop distance, percent of entry price
    pub stop_loss_percent: f64,

    /// Default target distance, percent of entry price
    pub take_profit_percent: f64,

    pub max_open_positions: usize,

    /// Daily loss limit, percent of total balance
    pub max_daily_loss_percent: f64,

    /// Recalculate the bounds above from market and performance statistics
    pub adaptive_mode: bool,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            max_leverage: 10,
            max_position_size_percent: 5.0,
            stop_loss_percent: 2.0,
            take_profit_percent: 4.0,
            max_open_positions: 5,
            max_daily_loss_percent: 10.0,
            adaptive_mode: true,
        }
    }
}

/// Pair selection and loop timing.
#[derive(Debug, Clone)]
pub struct TradingConfig {
    /// Minimum 24h turnover in quote currency
    pub min_volume_usd: f64,

    /// Lower bound of the preferred volatility band
    pub min_volatility: f64,

    /// Upper bound of the preferred volatility band
    pub max_volatility: f64,

    /// Seconds between trading cycles
    pub update_interval_seconds: u64,

    /// Seconds between pair refreshes and adaptive updates
    pub strategy_switch_interval: u64,
}

impl Default for TradingConfig {
    fn default() -> Self {
        Self {
            min_volume_usd: 1_000_000.0, // $1M daily turnover
            min_volatility: 0.02,        // 2% daily range
            max_volatility: 0.15,        // 15% daily range
            update_interval_seconds: 60,
            strategy_switch_interval: 300,
        }
    }
}

/// Complete bot configuration.
#[derive(Debug, Clone)]
pub struct BotConfig {
    pub api: ApiConfig,
    pub risk: RiskConfig,
    pub trading: TradingConfig,
    pub log_level: String,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            api: ApiConfig::default(),
            risk: RiskConfig::default(),
            trading: TradingConfig::default(),
            log_level: "INFO".to_string(),
        }
    }
}

impl BotConfig {
    /// Load configuration from the environment (and a `.env` file if present).
    ///
    /// Unset variables fall back to defaults; set but unparseable values are errors.
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let defaults = Self::default();

        let api = ApiConfig {
            api_key: env_string("KUCOIN_API_KEY").unwrap_or_default(),
            api_secret: env_string("KUCOIN_API_SECRET").unwrap_or_default(),
            api_passphrase: env_string("KUCOIN_API_PASSPHRASE").unwrap_or_default(),
            sandbox: env_bool("KUCOIN_SANDBOX", defaults.api.sandbox)?,
            default_currency: env_string("KUCOIN_DEFAULT_CURRENCY")
                .unwrap_or(defaults.api.default_currency),
        };

        let risk = RiskConfig {
            max_leverage: env_parse("MAX_LEVERAGE", defaults.risk.max_leverage)?,
            max_position_size_percent: env_parse(
                "MAX_POSITION_SIZE_PERCENT",
                defaults.risk.max_position_size_percent,
            )?,
            stop_loss_percent: env_parse("STOP_LOSS_PERCENT", defaults.risk.stop_loss_percent)?,
            take_profit_percent: env_parse("TAKE_PROFIT_PERCENT", defaults.risk.take_profit_percent)?,
            max_open_positions: env_parse("MAX_OPEN_POSITIONS", defaults.risk.max_open_positions)?,
            max_daily_loss_percent: env_parse(
                "MAX_DAILY_LOSS_PERCENT",
                defaults.risk.max_daily_loss_percent,
            )?,
            adaptive_mode: env_bool("ADAPTIVE_RISK_MODE", defaults.risk.adaptive_mode)?,
        };

        let trading = TradingConfig {
            min_volume_usd: env_parse("MIN_VOLUME_USD", defaults.trading.min_volume_usd)?,
            min_volatility: env_parse("MIN_VOLATILITY", defaults.trading.min_volatility)?,
            max_volatility: env_parse("MAX_VOLATILITY", defaults.trading.max_volatility)?,
            update_interval_seconds: env_parse(
                "UPDATE_INTERVAL",
                defaults.trading.update_interval_seconds,
            )?,
            strategy_switch_interval: env_parse(
                "STRATEGY_SWITCH_INTERVAL",
                defaults.trading.strategy_switch_interval,
            )?,
        };

        let config = Self {
            api,
            risk,
            trading,
            log_level: env_string("LOG_LEVEL")
                .map(|l| l.to_uppercase())
                .unwrap_or(defaults.log_level),
        };

        config.validate()?;
        Ok(config)
    }

    /// Reject configurations the bot cannot run with.
    pub fn validate(&self) -> Result<()> {
        validate_currency(&self.api.default_currency)?;

        let risk = &self.risk;
        if risk.max_leverage < 1 {
            anyhow::bail!("max_leverage must be at least 1");
        }
        for (name, value) in [
            ("max_position_size_percent", risk.max_position_size_percent),
            ("stop_loss_percent", risk.stop_loss_percent),
            ("take_profit_percent", risk.take_profit_percent),
            ("max_daily_loss_percent", risk.max_daily_loss_percent),
        ] {
            if !(value > 0.0 && value <= 100.0) {
                anyhow::bail!("{} must be in (0, 100], got {}", name, value);
            }
        }
        if risk.max_open_positions == 0 {
            anyhow::bail!("max_open_positions must be at least 1");
        }

        let trading = &self.trading;
        if trading.min_volatility < 0.0 || trading.min_volatility >= trading.max_volatility {
            anyhow::bail!(
                "Invalid volatility band: [{}, {}]",
                trading.min_volatility,
                trading.max_volatility
            );
        }
        if trading.update_interval_seconds == 0 {
            anyhow::bail!("update_interval_seconds must be positive");
        }

        Ok(())
    }
}

/// Validate a settlement currency code, returning it normalized to uppercase.
pub fn validate_currency(code: &str) -> Result<String> {
    let code = code.trim().to_uppercase();
    let valid = (2..=10).contains(&code.len()) && code.chars().all(|c| c.is_ascii_alphanumeric());
    if !valid {
        anyhow::bail!("Invalid currency code: {:?}", code);
    }
    Ok(code)
}

fn env_string(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn env_parse<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env_string(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("Invalid {}: {:?}", key, raw)),
        None => Ok(default),
    }
}

fn env_bool(key: &str, default: bool) -> Result<bool> {
    match env_string(key) {
        Some(raw) => parse_bool(&raw).with_context(|| format!("Invalid {}: {:?}", key, raw)),
        None => Ok(default),
    }
}

fn parse_bool(raw: &str) -> Result<bool> {
    match raw.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        other => anyhow::bail!("expected a boolean, got {:?}", other),
    }
}

fn mask(secret: &str) -> String {
    if secret.chars().count() <= 4 {
        "****".to_string()
    } else {
        format!("{}****", secret.chars().take(4).collect::<String>())
    }
}
