use std::path::PathBuf;
use std::sync::Arc;

use chat_counters::journal::FileJournal;
use chat_counters::{Config, CountersModule, Delivery};
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::info;
use tracing_subscriber::filter::EnvFilter;

#[derive(Parser)]
#[command(name = "counters")]
#[command(about = "Count things from chat and announce them", long_about = None)]
struct Cli {
    /// JSON configuration file
    #[arg(short, long, default_value = "counters.json")]
    config: PathBuf,
}

/// Prints deliveries as IRC `PRIVMSG` lines on stdout.
struct StdoutDelivery {
    channels: Vec<String>,
}

impl Delivery for StdoutDelivery {
    fn destinations(&self) -> Vec<String> {
        self.channels.clone()
    }

    fn deliver(&self, destination: &str, message: &str) {
        println!("PRIVMSG {destination} :{message}");
    }
}

/// Initialize logging, writing to COUNTERS_LOG_PATH if set, otherwise stderr.
fn init_logging() {
    let filter = EnvFilter::builder()
        .with_default_directive(tracing::Level::INFO.into())
        .from_env_lossy();

    if let Ok(path) = std::env::var("COUNTERS_LOG_PATH") {
        if let Ok(file) = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
        {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_target(true)
                .with_ansi(false)
                .with_writer(file)
                .init();
            return;
        }
    }

    // stdout carries status lines and deliveries
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logging();
    let cli = Cli::parse();
    let config = Config::load(&cli.config)?;
    info!(config = %cli.config.display(), channels = ?config.channels, "starting counters");

    let delivery = Arc::new(StdoutDelivery {
        channels: config.channels.clone(),
    });
    let owner = config.owner.clone();
    let journal_path = config.journal.clone();
    let mut module = CountersModule::new(config, delivery);

    if let Some(path) = journal_path {
        let mut journal = FileJournal::open(&path)?;
        module.replay(journal.load()?);
        journal.compact(&module.registry().snapshot())?;
        info!(journal = %journal.path().display(), "journal ready");
        module = module.with_journal(Box::new(journal));
    }

    // `:<nick> <text>` is chat from <nick>; anything else is a command from the owner.
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            line = lines.next_line() => line?,
        };
        let Some(line) = line else { break };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        if let Some(chat) = line.strip_prefix(':') {
            let (nick, text) = chat.split_once(char::is_whitespace).unwrap_or((chat, ""));
            if let Some(status) = module.handle_chat(nick, text) {
                println!("{status}");
            }
        } else {
            println!("{}", module.execute(&owner, line));
        }
    }

    module.shutdown().await;
    info!("counters stopped");
    Ok(())
}
