use anyhow::Context;
use clap::{Parser, Subcommand};
use dotenv::dotenv;
use news_relay::{
    logging, pipeline, Config, Deliverer, Fetcher, HttpPageSource, IngestPipeline, ItemFilter,
    NewsStore, Renderer, TelegramSink,
};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Scrapes a paginated news listing and relays new items to a Telegram chat.
#[derive(Parser)]
#[command(name = "news-relay", version, about)]
struct Cli {
    /// Path to a TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the scheduler loop until Ctrl-C.
    Run,

    /// Run a single ingest cycle and exit.
    Once,

    /// Send today's digest now.
    Digest,

    /// Print store statistics.
    Stats {
        /// Also send them to the chat.
        #[arg(long)]
        send: bool,
    },

    /// Delete items older than the retention window.
    Cleanup {
        /// Override the configured retention in days.
        #[arg(long)]
        days: Option<u32>,
    },

    /// Validate configuration and check the Telegram token.
    CheckConfig,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    let cli = Cli::parse();

    let config = Config::load(cli.config.as_deref()).context("failed to load configuration")?;
    let _log_guard = logging::init_logging(&config.logging);

    if let Err(e) = config.validate() {
        error!("{}", e);
        return Err(e).context("invalid configuration");
    }

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => run(config).await,
        Command::Once => once(config).await,
        Command::Digest => digest(config).await,
        Command::Stats { send } => stats(config, send).await,
        Command::Cleanup { days } => cleanup(config, days).await,
        Command::CheckConfig => check_config(config).await,
    }
}

async fn run(config: Config) -> anyhow::Result<()> {
    info!("Starting news relay for {}", config.fetch.base_url);

    let source = Arc::new(HttpPageSource::new(&config.fetch)?);
    let sink = Arc::new(TelegramSink::new(&config.telegram)?);

    let token = CancellationToken::new();
    let stop = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            stop.cancel();
        }
    });

    news_relay::launch(&config, source, sink, token).await?;
    Ok(())
}

async fn once(config: Config) -> anyhow::Result<()> {
    let store = NewsStore::open(&config.store.database_file).await?;
    let source = Arc::new(HttpPageSource::new(&config.fetch)?);
    let fetcher = Fetcher::new(source, config.fetch.clone())?;
    let ingest = IngestPipeline::new(fetcher, ItemFilter::new(&config.filter), &config);
    let deliverer = deliverer(&config)?;

    let result = pipeline::run_once(&ingest, &store, &deliverer, &config.telegram.chat_id).await;
    store.close().await;

    let report = result?;
    println!("{}", report);
    Ok(())
}

async fn digest(config: Config) -> anyhow::Result<()> {
    let store = NewsStore::open(&config.store.database_file).await?;
    let groups = store.daily_digest(config.schedule.timezone_offset_minutes).await;
    store.close().await;

    let delivered = deliverer(&config)?.deliver_digest(&config.telegram.chat_id, &groups?).await;
    anyhow::ensure!(delivered, "digest was not delivered");
    Ok(())
}

async fn stats(config: Config, send: bool) -> anyhow::Result<()> {
    let store = NewsStore::open(&config.store.database_file).await?;
    let stats = store.statistics().await;
    store.close().await;
    let stats = stats?;

    println!("{}", serde_json::to_string_pretty(&stats)?);
    if send {
        let delivered = deliverer(&config)?
            .deliver_statistics(&config.telegram.chat_id, &stats)
            .await;
        anyhow::ensure!(delivered, "statistics were not delivered");
    }
    Ok(())
}

async fn cleanup(config: Config, days: Option<u32>) -> anyhow::Result<()> {
    let days = days.unwrap_or(config.schedule.retention_days);
    let store = NewsStore::open(&config.store.database_file).await?;
    let removed = store.cleanup(days).await;
    store.close().await;

    println!("Removed {} items older than {} days", removed?, days);
    Ok(())
}

async fn check_config(config: Config) -> anyhow::Result<()> {
    let sink = TelegramSink::new(&config.telegram)?;
    let bot = sink.test_connection().await.context("Telegram token check failed")?;

    println!("Source:      {} ({} pages)", config.fetch.base_url, config.fetch.max_pages);
    println!("Interval:    {} minutes", config.schedule.polling_interval_minutes);
    println!("Database:    {}", config.store.database_file);
    println!("Chat:        {}", config.telegram.chat_id);
    println!("Bot:         {} (@{})", bot.first_name, bot.username.unwrap_or_default());
    println!("Configuration OK");
    Ok(())
}

fn deliverer(config: &Config) -> anyhow::Result<Deliverer> {
    let sink = Arc::new(TelegramSink::new(&config.telegram)?);
    Ok(Deliverer::new(sink, Renderer::new(&config.delivery)))
}
