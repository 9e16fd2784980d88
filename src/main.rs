//! Entry point for the `tagvault` CLI.
//!
//! # Examples
//!
//! ```sh
//! tagvault init
//! tagvault classify "встреча с коллегами"
//! tagvault chat --user-id 42
//! API_TOKEN=123:abc tagvault bot
//! ```

use clap::Parser;
use crossterm::{
    ExecutableCommand,
    style::{Attribute, Color, ResetColor, SetAttribute, SetForegroundColor},
};
use indicatif::ProgressBar;
use once_cell::sync::OnceCell;
use std::{error::Error, fs, io::stdout, sync::Arc, time::Duration};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use tagvault::{
    classifier::TopicClassifier,
    commands::{Cli, Commands},
    config::AppConfig,
    config_dir,
    conversation::{ConversationHandler, Inbound, render_matches},
    embedding::{Embedder, embed_blocking},
    load_dependencies, load_embedder,
    telegram::{TelegramClient, run_bot},
    vector_store::{MessageStore, MilvusStore},
};

static TRACING: OnceCell<()> = OnceCell::new();

fn main() -> Result<(), Box<dyn Error>> {
    TRACING.get_or_init(|| {
        tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
            .with_writer(std::io::stderr)
            .init();
    });
    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(run())
}

async fn run() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();

    if !cli.command.needs_config() {
        return run_standalone(cli.command);
    }

    let config = AppConfig::resolve(cli.config.as_deref())?;
    debug!("Config loaded: {:?}", config);

    match cli.command {
        Commands::Init | Commands::Classify { .. } => unreachable!("runs without config"),
        Commands::Search { text, limit } => {
            let embedder: Arc<dyn Embedder> = Arc::new(load_embedder(&config).await?);
            let store = MilvusStore::connect(&config.milvus()).await?;
            let vector = embed_blocking(embedder, text).await;
            let matches = store
                .search_similar(&vector, limit.unwrap_or(config.search_limit))
                .await;
            println!("{}", render_matches(&matches));
        }
        Commands::Stats => {
            let store = MilvusStore::connect(&config.milvus()).await?;
            println!("{}", store.count_messages().await);
        }
        Commands::Chat { user_id } => {
            let handler = ConversationHandler::new(load_dependencies(&config).await, config.search_limit);
            chat(&handler, user_id).await?;
        }
        Commands::Bot => {
            let token = config.require_api_token()?;
            let telegram = Arc::new(TelegramClient::new(&config.telegram_api_base, token));
            let deps = load_dependencies(&config).await;
            let handler = Arc::new(ConversationHandler::new(deps, config.search_limit));
            run_bot(telegram, handler, config.poll_timeout_secs).await;
        }
    }

    Ok(())
}

/// Commands that never read the config.
fn run_standalone(command: Commands) -> Result<(), Box<dyn Error>> {
    match command {
        Commands::Init => init(),
        Commands::Classify { text, top_k } => {
            let classifier = TopicClassifier::new()?;
            println!("{}", classifier.classify(&text));
            for (topic, p) in classifier.ranked_labels(&text, top_k) {
                println!("  {:<10} {:>5.1}%", topic.label(), p * 100.0);
            }
            Ok(())
        }
        other => Err(format!("{other:?} needs a config").into()),
    }
}

/// Local conversation loop: one inbound message per stdin line.
async fn chat(handler: &ConversationHandler, user_id: i64) -> Result<(), Box<dyn Error>> {
    println!("{}", handler.handle(Inbound::text(user_id, "/start")).await);
    println!("(type `exit` or press Ctrl-D to leave)");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut out = stdout();

    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if matches!(line, "exit" | "quit") {
            break;
        }

        let spinner = ProgressBar::new_spinner();
        spinner.set_message("Processing message...");
        spinner.enable_steady_tick(Duration::from_millis(100));
        let reply = handler.handle(Inbound::text(user_id, line)).await;
        spinner.finish_and_clear();

        out.execute(SetForegroundColor(Color::Blue))?;
        out.execute(SetAttribute(Attribute::Bold))?;
        println!("{reply}");
        out.execute(SetAttribute(Attribute::Reset))?;
        out.execute(ResetColor)?;
    }

    Ok(())
}

/// Write the default configuration to `<config_dir>/config.yaml`.
///
/// An existing file is left untouched.
fn init() -> Result<(), Box<dyn Error>> {
    let dir = config_dir()?;
    info!("Creating config directory: {}", dir.display());
    fs::create_dir_all(&dir)?;

    let config_path = dir.join("config.yaml");
    if config_path.exists() {
        println!("Config already exists at {}", config_path.display());
        return Ok(());
    }

    let config_yaml = serde_yaml::to_string(&AppConfig::default())?;
    fs::write(&config_path, config_yaml)?;
    println!("Wrote {}", config_path.display());
    Ok(())
}
