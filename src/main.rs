//! KuCoin Futures Trading Bot
//!
//! Scores perpetual-futures pairs, arbitrates between several signal
//! strategies, and gates every trade through an adaptive risk controller.

mod api;
mod bot;
mod config;
mod market;
mod metrics;
mod models;
mod risk;
mod strategies;

use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use crate::api::{FuturesExchange, KucoinClient};
use crate::bot::Bot;
use crate::config::BotConfig;
use crate::market::MarketAnalyzer;
use crate::metrics::{indicators, MarketConditions, StrategyPerformance};
use crate::models::{OrderRequest, OrderSide};
use crate::risk::{AdaptiveRiskEngine, PositionManager, RiskController};
use crate::strategies::StrategyManager;

/// KuCoin futures trading bot CLI.
#[derive(Parser)]
#[command(name = "kucoin-bot")]
#[command(about = "Adaptive multi-strategy trading bot for KuCoin Futures", long_about = None)]
struct Cli {
    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, global = true, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the trading bot
    Run {
        /// Seconds between trading cycles (overrides UPDATE_INTERVAL)
        #[arg(short, long)]
        interval: Option<u64>,

        /// Trade on production instead of the sandbox
        #[arg(long)]
        production: bool,
    },

    /// Rank tradeable pairs
    Pairs {
        /// Maximum number of pairs to show
        #[arg(short, long, default_value = "10")]
        max: usize,
    },

    /// Run every strategy on a symbol and assess the best signal
    Signal {
        /// Contract symbol (e.g., XBTUSDTM)
        symbol: String,

        /// Run only this strategy
        #[arg(long)]
        only: Option<String>,
    },

    /// Show adaptive risk parameters for given market and performance inputs
    Params {
        /// Standard deviation of returns
        #[arg(long, default_value = "0.05")]
        volatility: f64,

        /// Trend strength in [-1, 1]
        #[arg(long, default_value = "0.0", allow_hyphen_values = true)]
        trend: f64,

        /// Current volume over average volume
        #[arg(long, default_value = "1.0")]
        volume_ratio: f64,

        /// Win rate in [0, 1]
        #[arg(long, default_value = "0.5")]
        win_rate: f64,

        /// Number of closed trades
        #[arg(long, default_value = "0")]
        trades: usize,

        /// Sharpe ratio of trade P&L
        #[arg(long, default_value = "0.0", allow_hyphen_values = true)]
        sharpe: f64,

        /// Average winning trade P&L
        #[arg(long, default_value = "0.0")]
        avg_profit: f64,
    },

    /// Place a single order by hand
    Order {
        /// Contract symbol (e.g., XBTUSDTM)
        symbol: String,

        /// buy or sell
        side: String,

        /// Number of contracts
        size: u64,

        /// Leverage for the order
        #[arg(short, long, default_value = "1")]
        leverage: u32,

        /// Limit price (market order when omitted)
        #[arg(long)]
        price: Option<f64>,

        /// Stop trigger price, rising for buys and falling for sells
        #[arg(long)]
        stop_price: Option<f64>,
    },

    /// Cancel an open order
    Cancel {
        /// Exchange order ID
        order_id: String,
    },

    /// Show current configuration
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let log_level = match cli.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" | "warning" => Level::WARN,
        "error" | "critical" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let mut config = BotConfig::from_env()?;

    match cli.command {
        Commands::Run {
            interval,
            production,
        } => {
            if let Some(interval) = interval {
                config.trading.update_interval_seconds = interval;
            }
            if production {
                config.api.sandbox = false;
            }
            config.validate()?;

            if !config.api.has_credentials() {
                anyhow::bail!(
                    "KUCOIN_API_KEY, KUCOIN_API_SECRET and KUCOIN_API_PASSPHRASE must be set to trade"
                );
            }

            let exchange: Arc<dyn FuturesExchange> = Arc::new(KucoinClient::new(&config.api)?);
            let mut bot = Bot::new(config.clone(), exchange)?;

            println!("\n=== KuCoin Futures Trading Bot ===");
            println!(
                "Environment:      {}",
                if config.api.sandbox { "SANDBOX" } else { "PRODUCTION" }
            );
            println!("Cycle interval:   {}s", config.trading.update_interval_seconds);
            println!("Max positions:    {}", config.risk.max_open_positions);
            println!(
                "Risk mode:        {}",
                if config.risk.adaptive_mode { "adaptive" } else { "fixed" }
            );
            println!("\nPress Ctrl+C to stop.\n");

            if let Err(e) = bot.start().await {
                tracing::error!(error = %e, "Bot error");
            }

            let status = bot.status().await;
            println!("\n{}", status);
        }

        Commands::Pairs { max } => {
            let exchange: Arc<dyn FuturesExchange> = Arc::new(KucoinClient::new(&config.api)?);
            let mut analyzer = MarketAnalyzer::new(exchange, config.trading.clone());

            info!(max = max, "Selecting trading pairs");
            let pairs = analyzer.select_best_pairs(max).await;
            if pairs.is_empty() {
                println!("No tradeable pairs found.");
                return Ok(());
            }

            println!(
                "\n{:<16} {:>8} {:>10} {:>8} {:>8} {:>14} {:>8}",
                "SYMBOL", "TOTAL", "VOLUME", "VOLAT", "TREND", "24H TURNOVER", "RANGE"
            );
            println!("{}", "-".repeat(80));

            for pair in pairs {
                let (turnover, range) = analyzer
                    .cached(&pair.symbol)
                    .map(|s| (s.volume_24h, s.volatility * 100.0))
                    .unwrap_or((0.0, 0.0));
                println!(
                    "{:<16} {:>8.2} {:>10.2} {:>8.2} {:>8.2} {:>14.0} {:>7.2}%",
                    pair.symbol,
                    pair.total_score,
                    pair.volume_score,
                    pair.volatility_score,
                    pair.trend_score,
                    turnover,
                    range
                );
            }
        }

        Commands::Signal { symbol, only } => {
            let symbol = symbol.to_uppercase();
            let exchange: Arc<dyn FuturesExchange> = Arc::new(KucoinClient::new(&config.api)?);
            let analyzer = MarketAnalyzer::new(exchange.clone(), config.trading.clone());

            let Some(history) = analyzer.get_price_history(&symbol).await else {
                println!("No market data for {}.", symbol);
                return Ok(());
            };
            println!(
                "\n{}: {} candles, trend {:?}",
                symbol,
                history.len(),
                indicators::trend(&history.prices, 10, 50)
            );

            let mut manager = StrategyManager::default();
            if let Some(only) = &only {
                if manager.get_strategy(only).is_none() {
                    anyhow::bail!("Unknown strategy: {}", only);
                }
                for stats in manager.get_strategy_stats() {
                    if &stats.name != only {
                        manager.enable_strategy(&stats.name, false);
                    }
                }
            }

            let signals = manager.get_signals(&symbol, &history.prices, &history.volumes);
            if signals.is_empty() {
                println!("No strategy produced a signal.");
                return Ok(());
            }

            println!("\n{:<16} {:<6} {:>6} {:>12}  REASON", "STRATEGY", "TYPE", "CONF", "PRICE");
            println!("{}", "-".repeat(80));
            for signal in &signals {
                println!(
                    "{:<16} {:<6} {:>6.2} {:>12.4}  {}",
                    signal.strategy_name, signal.signal_type, signal.confidence, signal.price, signal.reason
                );
            }

            let Some(best) = manager.get_best_signal(&symbol, &history.prices, &history.volumes) else {
                return Ok(());
            };
            println!("\nBest: {} {} from {}", best.signal_type, best.symbol, best.strategy_name);

            if !config.api.has_credentials() {
                println!("Set API credentials to assess the signal against the account.");
                return Ok(());
            }

            let positions =
                PositionManager::new(exchange, config.risk.clone(), &config.api.default_currency)?;
            let portfolio = positions.get_portfolio_state().await;
            let mut controller = RiskController::new(config.risk.clone());
            let assessment = controller.assess_signal(&best, &portfolio);

            println!("\n=== Risk Assessment ===");
            println!("Approved:    {}", assessment.approved);
            println!("Reason:      {}", assessment.reason);
            println!("Risk Score:  {:.2}", assessment.risk_score);
            println!("Max Value:   ${:.2}", controller.calculate_max_position_value(&portfolio));
            for warning in &assessment.warnings {
                println!("Warning:     {}", warning);
            }
            if let Some(adjusted) = &assessment.adjusted_signal {
                println!("Leverage:    {}x", adjusted.leverage);
                if let Some(stop) = adjusted.stop_loss {
                    println!("Stop Loss:   {:.4}", stop);
                }
                if let Some(target) = adjusted.take_profit {
                    println!("Take Profit: {:.4}", target);
                }
                println!(
                    "Size:        {} contracts",
                    positions.calculate_position_size(adjusted, &portfolio)
                );
            }
        }

        Commands::Params {
            volatility,
            trend,
            volume_ratio,
            win_rate,
            trades,
            sharpe,
            avg_profit,
        } => {
            let conditions = MarketConditions {
                volatility,
                trend_strength: trend.clamp(-1.0, 1.0),
                volume_ratio,
            };
            let performance = StrategyPerformance {
                win_rate: win_rate.clamp(0.0, 1.0),
                avg_profit,
                avg_loss: 0.0,
                sharpe_ratio: sharpe,
                total_trades: trades,
            };

            let params = AdaptiveRiskEngine::new()
                .calculate_adaptive_parameters(Some(&conditions), Some(&performance));

            println!("\n=== Adaptive Risk Parameters ===\n");
            println!("Inputs:");
            println!("  Volatility:     {:.4}", conditions.volatility);
            println!("  Trend Strength: {:.2}", conditions.trend_strength);
            println!("  Win Rate:       {:.1}%", performance.win_rate * 100.0);
            println!("  Trades:         {}", performance.total_trades);
            println!("  Sharpe:         {:.2}", performance.sharpe_ratio);
            println!();
            print!("{}", params);
        }

        Commands::Order {
            symbol,
            side,
            size,
            leverage,
            price,
            stop_price,
        } => {
            if !config.api.has_credentials() {
                anyhow::bail!("API credentials are required to place orders");
            }
            let side = match side.to_lowercase().as_str() {
                "buy" | "long" => OrderSide::Buy,
                "sell" | "short" => OrderSide::Sell,
                other => anyhow::bail!("Unknown order side: {}", other),
            };
            if size == 0 {
                anyhow::bail!("Order size must be at least 1 contract");
            }

            let symbol = symbol.to_uppercase();
            let mut request = match price {
                Some(price) => OrderRequest::limit(&symbol, side, size, leverage, price),
                None => OrderRequest::market(&symbol, side, size, leverage),
            };
            if let Some(stop_price) = stop_price {
                request = request.with_stop(side.stop_direction(), stop_price);
            }

            let exchange = KucoinClient::new(&config.api)?;
            let order = exchange.place_order(&request).await?;
            info!(order_id = %order.order_id, symbol = %symbol, "Order placed");

            println!("\n=== Order Placed ===");
            println!("Order ID:  {}", order.order_id);
            println!("Symbol:    {}", order.symbol);
            println!("Side:      {}", order.side.as_str());
            println!("Type:      {}", order.order_type.as_str());
            println!("Size:      {} contracts", order.size);
            println!("Leverage:  {}x", order.leverage);
            if let Some(price) = order.price {
                println!("Price:     {:.4}", price);
            }
        }

        Commands::Cancel { order_id } => {
            if !config.api.has_credentials() {
                anyhow::bail!("API credentials are required to cancel orders");
            }
            let exchange: Arc<dyn FuturesExchange> = Arc::new(KucoinClient::new(&config.api)?);
            let positions = PositionManager::new(exchange, config.risk.clone(), &config.api.default_currency)?;

            if positions.cancel_order(&order_id).await {
                println!("Cancelled order {}", order_id);
            } else {
                anyhow::bail!("Order {} was not cancelled", order_id);
            }
        }

        Commands::Config => {
            println!("\n=== API ===\n");
            println!("  Environment:          {}", if config.api.sandbox { "sandbox" } else { "production" });
            println!("  Credentials:          {}", if config.api.has_credentials() { "set" } else { "missing" });
            println!("  Currency:             {}", config.api.default_currency);

            let risk = &config.risk;
            println!("\n=== Risk ===\n");
            println!("  Max Leverage:         {}x", risk.max_leverage);
            println!("  Max Position Size:    {}%", risk.max_position_size_percent);
            println!("  Stop Loss:            {}%", risk.stop_loss_percent);
            println!("  Take Profit:          {}%", risk.take_profit_percent);
            println!("  Max Open Positions:   {}", risk.max_open_positions);
            println!("  Max Daily Loss:       {}%", risk.max_daily_loss_percent);
            println!("  Adaptive Mode:        {}", risk.adaptive_mode);

            let trading = &config.trading;
            println!("\n=== Trading ===\n");
            println!("  Min Volume:           ${}", trading.min_volume_usd);
            println!("  Volatility Band:      {} - {}", trading.min_volatility, trading.max_volatility);
            println!("  Cycle Interval:       {}s", trading.update_interval_seconds);
            println!("  Pair Refresh:         {}s", trading.strategy_switch_interval);
            println!("  Log Level:            {}", config.log_level);
        }
    }

    Ok(())
}
