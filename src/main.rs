use anyhow::{bail, Context, Result};
use bandbot::config::Settings;
use bandbot::db::{hash_password, SqliteStore};
use bandbot::exchange::{get_free_balance, ApiCredentials, BinanceClient};
use bandbot::execution::{BandWindow, CycleOutcome, Driver, Executor, ParameterStore};
use bandbot::models::UserRecord;
use clap::{Parser, Subcommand};
use rust_decimal::Decimal;
use std::path::PathBuf;
use tokio::time::{interval, Duration, MissedTickBehavior};

#[derive(Parser)]
#[command(name = "bandbot", about = "Lower-band mean reversion trading agent")]
struct Cli {
    /// Settings file (defaults to ./bandbot.toml when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Store exchange credentials for a new user
    Signup {
        #[arg(long)]
        username: String,
        #[arg(long)]
        password: String,
        #[arg(long)]
        api_key: String,
        #[arg(long)]
        secret_key: String,
    },
    /// Print the free balance of an asset
    Balance {
        #[arg(long)]
        username: String,
        #[arg(long)]
        password: String,
        #[arg(long)]
        asset: String,
    },
    /// Trade one asset until Ctrl+C
    Run {
        #[arg(long)]
        username: String,
        #[arg(long)]
        password: String,
        /// Exchange symbol, e.g. BTCUSDT
        #[arg(long)]
        asset: String,
        /// Quote amount spent per entry
        #[arg(long)]
        amount: Decimal,
        /// One of 15m, 30m, 1H, 2H, 4H, 6H, 12H, 1D
        #[arg(long, default_value = "1H")]
        interval: String,
    },
    /// Show recently completed trades
    Trades {
        #[arg(long, default_value_t = 20)]
        limit: u32,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    setup_logging();

    let cli = Cli::parse();
    let settings = Settings::load(cli.config.as_deref()).context("Failed to load settings")?;

    let store = SqliteStore::new(&settings.database.url, settings.database.max_connections)
        .await
        .context("Failed to open trade database")?;

    match cli.command {
        Command::Run {
            username,
            password,
            asset,
            amount,
            interval,
        } => {
            let mut params = ParameterStore::new();
            params.setup(&asset, amount, &interval)?;
            run(&settings, store, &username, &password, params).await
        }
        command => {
            let result = run_once(command, &settings, &store).await;
            store.close().await;
            result
        }
    }
}

/// Commands that do one thing and exit
async fn run_once(command: Command, settings: &Settings, store: &SqliteStore) -> Result<()> {
    match command {
        Command::Signup {
            username,
            password,
            api_key,
            secret_key,
        } => {
            let user = UserRecord {
                username,
                password_hash: hash_password(&password),
                api_key,
                secret_key,
            };
            store.create_user(&user).await?;
            println!("Created user {}", user.username);
            Ok(())
        }
        Command::Balance {
            username,
            password,
            asset,
        } => print_balance(settings, store, &username, &password, &asset).await,
        Command::Trades { limit } => print_trades(store, limit).await,
        Command::Run { .. } => bail!("run is a long-lived command"),
    }
}

fn setup_logging() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("bandbot=info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// Look up the user and check the password before any exchange access
async fn login(store: &SqliteStore, username: &str, password: &str) -> Result<ApiCredentials> {
    let Some(user) = store.get_user_data(username).await? else {
        bail!("Unknown user {}", username);
    };
    if user.password_hash != hash_password(password) {
        bail!("Wrong password for {}", username);
    }

    Ok(ApiCredentials {
        api_key: user.api_key,
        secret_key: user.secret_key,
    })
}

async fn print_balance(
    settings: &Settings,
    store: &SqliteStore,
    username: &str,
    password: &str,
    asset: &str,
) -> Result<()> {
    let credentials = login(store, username, password).await?;
    let client = BinanceClient::new(&settings.exchange, credentials)?;

    let free = get_free_balance(&client, asset).await?;
    println!("{} free: {}", asset, free);
    Ok(())
}

async fn print_trades(store: &SqliteStore, limit: u32) -> Result<()> {
    let trades = store.list_trades(limit).await?;
    if trades.is_empty() {
        println!("No completed trades");
        return Ok(());
    }

    println!(
        "{:<26} {:<10} {:>10} {:>14} {:>14} {:>8}",
        "Closed", "Asset", "Size", "Entry", "Exit", "Gain %"
    );
    for trade in trades {
        println!(
            "{:<26} {:<10} {:>10} {:>14} {:>14} {:>8}",
            trade.timestamp.format("%Y-%m-%d %H:%M:%S"),
            trade.asset,
            trade.trade_size,
            trade.entry_price,
            trade.exit_price,
            trade.gain_percent
        );
    }
    Ok(())
}

async fn run(
    settings: &Settings,
    store: SqliteStore,
    username: &str,
    password: &str,
    params: ParameterStore,
) -> Result<()> {
    let credentials = login(&store, username, password).await?;
    let client = BinanceClient::new(&settings.exchange, credentials)?;

    let mut executor = Executor::new(client, &params, BandWindow::from(&settings.strategy))?;
    executor.verify_asset().await?;

    let parameters = executor.parameters().clone();
    tracing::info!("🚀 bandbot starting");
    tracing::info!("  Asset: {}", parameters.asset);
    tracing::info!("  Trade amount: {}", parameters.trade_amount);
    tracing::info!("  Interval: {}", parameters.interval);
    tracing::info!(
        "  Band: {} of {} candles ({:?})",
        settings.strategy.band_period,
        settings.strategy.fetch_limit,
        settings.strategy.band_anchor
    );
    tracing::info!("  Take profit: {}%", settings.strategy.take_profit_pct);

    let mut driver = Driver::new(executor, store, settings.strategy.take_profit_pct)?;

    let mut ticker = interval(Duration::from_secs(settings.strategy.poll_interval_secs));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("⚠️  Received Ctrl+C, shutting down...");
                break;
            }
            _ = ticker.tick() => {
                match driver.run_cycle().await {
                    Ok(CycleOutcome::Entered(position)) => tracing::info!(
                        "Bought {} {} @ {}",
                        position.quantity,
                        position.symbol,
                        position.entry_price
                    ),
                    Ok(CycleOutcome::Exited(trade)) => tracing::info!(
                        "Sold {} {} @ {} ({}%)",
                        trade.trade_size,
                        trade.asset,
                        trade.exit_price,
                        trade.gain_percent
                    ),
                    Ok(CycleOutcome::Held { .. }) => {}
                    // Halt this cycle only; the next tick starts fresh
                    Err(e) => tracing::error!("Cycle failed: {}", e),
                }
            }
        }
    }

    driver.shutdown().await;
    tracing::info!("👋 bandbot stopped");
    Ok(())
}
