//! ARMA-BOT: intraday ARMA forecast poster.
//!
//! Entry point. Loads configuration and credentials, initialises
//! structured logging, starts the data source and publisher, then runs
//! the minute scheduler until Ctrl+C.

use anyhow::{Context, Result};
use tokio::sync::watch;
use tracing::{error, info, warn};

use arma_bot::config::{AppConfig, Credentials};
use arma_bot::data::alphavantage::AlphaVantageSource;
use arma_bot::engine::{Bot, Scheduler};
use arma_bot::model::arma::ArmaModel;
use arma_bot::publish::dry_run::DryRunPublisher;
use arma_bot::publish::twitter::TwitterPublisher;
use arma_bot::publish::Publisher;

const BANNER: &str = r#"
    _    ____  __  __    _        ____   ___ _____
   / \  |  _ \|  \/  |  / \      | __ ) / _ \_   _|
  / _ \ | |_) | |\/| | / _ \_____|  _ \| | | || |
 / ___ \|  _ <| |  | |/ ___ \____| |_) | |_| || |
/_/   \_\_| \_\_|  |_/_/   \_\   |____/ \___/ |_|

  Intraday ARMA forecasts, posted every minute
  v0.1.0
"#;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (non-fatal if missing)
    let _ = dotenv::dotenv();

    init_logging();

    let config_path = AppConfig::default_path();
    let cfg = AppConfig::load(&config_path)?;
    let Credentials {
        alphavantage_api_key,
        twitter,
    } = Credentials::from_env()?;

    println!("{BANNER}");
    info!(
        bot_name = %cfg.bot.name,
        symbol = %cfg.bot.symbol,
        interval = %cfg.source.interval,
        selection = ?cfg.model.selection,
        order = %cfg.model.order,
        dry_run = cfg.publisher.dry_run,
        "ARMA-BOT starting up"
    );

    // -- Initialise components -------------------------------------------

    let source = AlphaVantageSource::new(
        alphavantage_api_key,
        &cfg.bot.symbol,
        &cfg.source,
    );
    let model = ArmaModel::new(&cfg.model);

    let publisher: Box<dyn Publisher> = if cfg.publisher.dry_run {
        warn!("Dry-run mode: forecasts will be logged, not posted");
        Box::new(DryRunPublisher::new())
    } else {
        Box::new(
            TwitterPublisher::new(twitter, cfg.publisher.timeout_secs)
                .context("Failed to build Twitter publisher")?,
        )
    };

    let mut bot = Bot::new(Box::new(source), Box::new(model), publisher, cfg.bot.symbol.clone());

    bot.start_source()
        .await
        .context("Failed to start data source")?;
    bot.start_publisher()
        .await
        .context("Failed to authenticate publisher")?;

    let (source_name, model_name, publisher_name) = bot.components();
    info!(
        source = source_name,
        model = model_name,
        publisher = publisher_name,
        "Components ready"
    );

    // -- Main loop -------------------------------------------------------

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let scheduler = Scheduler::new(bot, &cfg.schedule);
    let handle = tokio::spawn(scheduler.run(shutdown_rx));

    info!("Entering main loop. Press Ctrl+C to stop.");

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for Ctrl+C, shutting down");
    }
    let _ = shutdown_tx.send(true);

    let bot = handle.await.context("Scheduler task panicked")?;
    let state = bot.state();
    info!(
        cycles = state.cycles_run,
        published = state.forecasts_published,
        last_refresh = ?state.last_refresh.as_ref().map(|m| m.as_str()),
        "ARMA-BOT shut down cleanly."
    );

    Ok(())
}

/// Initialise the `tracing` subscriber.
fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("arma_bot=info"));

    let json_logging = std::env::var("ARMA_BOT_LOG_JSON").is_ok();

    if json_logging {
        fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_thread_ids(true)
            .init();
    } else {
        fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
    }
}
