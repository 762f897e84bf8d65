//! iotaudit-live CLI - watch the dashboard's live events from a terminal.
//!
//! This is the main binary entry point. See the `iotaudit_live` library
//! for the core functionality.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use iotaudit_live::credentials::KeyringCredentials;
use iotaudit_live::events::{
    AUDIT_COMPLETED_TOPIC, AUDIT_PROGRESS_TOPIC, AUDIT_STARTED_TOPIC, CONNECTION_TOPIC,
    DEVICE_STATUS_TOPIC, NOTIFICATION_TOPIC, REPORT_GENERATED_TOPIC, VULNERABILITY_DETECTED_TOPIC,
};
use iotaudit_live::{
    ChainedCredentials, Config, ConnectionStatus, Multiplexer, NotificationQueue,
    NotificationRouter, StreamTailer,
};
use mimalloc::MiMalloc;

/// Global allocator configured per M-MIMALLOC-APPS guideline.
#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

/// Topics `watch` follows when none are given.
const DEFAULT_TOPICS: [&str; 8] = [
    CONNECTION_TOPIC,
    AUDIT_STARTED_TOPIC,
    AUDIT_PROGRESS_TOPIC,
    AUDIT_COMPLETED_TOPIC,
    VULNERABILITY_DETECTED_TOPIC,
    DEVICE_STATUS_TOPIC,
    NOTIFICATION_TOPIC,
    REPORT_GENERATED_TOPIC,
];

// CLI
#[derive(Parser)]
#[command(name = "iotaudit-live")]
#[command(version)]
#[command(about = "Live event client for the IoT security-audit dashboard")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print live events as JSON lines until Ctrl-C
    Watch {
        /// Topic to follow (repeatable); all known topics by default
        #[arg(long = "topic", short = 't')]
        topics: Vec<String>,
        /// Also print toasts raised by the notification router
        #[arg(long)]
        toasts: bool,
    },
    /// Tail the log stream of one device until Ctrl-C or the server ends it
    Tail {
        /// Device or resource id
        resource: String,
    },
    /// Send one event to the server
    Send {
        /// Event topic
        topic: String,
        /// Event payload (JSON)
        data: String,
    },
    /// Print the effective configuration
    Config,
    /// Store an API token in the OS keychain
    Login {
        /// Token to store
        token: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr unless IOTAUDIT_LOG_FILE is set; stdout carries events.
    let mut logger =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
    if let Ok(path) = std::env::var("IOTAUDIT_LOG_FILE") {
        let log_file = std::fs::File::create(&path)
            .with_context(|| format!("Failed to create log file at {path}"))?;
        logger.target(env_logger::Target::Pipe(Box::new(log_file)));
    }
    logger.format_timestamp_secs().init();

    let cli = Cli::parse();
    let config = Config::load()?;

    match cli.command {
        Commands::Watch { topics, toasts } => watch(&config, topics, toasts).await,
        Commands::Tail { resource } => tail(&config, &resource).await,
        Commands::Send { topic, data } => send(&config, &topic, &data).await,
        Commands::Config => {
            println!("{}", serde_json::to_string_pretty(&config)?);
            Ok(())
        }
        Commands::Login { token } => {
            KeyringCredentials::default().store(&token)?;
            println!("Token saved to the OS keychain.");
            Ok(())
        }
    }
}

/// Print every frame of `topics` to stdout until Ctrl-C.
async fn watch(config: &Config, topics: Vec<String>, toasts: bool) -> Result<()> {
    let mut mux = Multiplexer::new(config, Arc::new(ChainedCredentials::standard()));

    let topics = if topics.is_empty() {
        DEFAULT_TOPICS.iter().map(ToString::to_string).collect()
    } else {
        topics
    };
    let _subscriptions: Vec<_> = topics
        .iter()
        .map(|topic| {
            let name = topic.clone();
            mux.subscribe(topic, move |data| {
                println!("{}", serde_json::json!({ "event": name, "data": data }));
            })
        })
        .collect();

    let queue = NotificationQueue::new(config.notification_duration());
    let _router = toasts.then(|| NotificationRouter::attach(&mux, &queue));
    let printer = toasts.then(|| tokio::spawn(print_toasts(queue.clone())));

    mux.connect().await?;
    log::info!("Watching {} topic(s) on {}", topics.len(), mux.transport().url());

    let result = mux.run_until(tokio::signal::ctrl_c()).await;
    mux.disconnect().await;
    if let Some(printer) = printer {
        printer.abort();
    }
    result.context("Failed to listen for Ctrl-C")
}

/// Print each toast once, as it appears.
async fn print_toasts(queue: NotificationQueue) {
    let mut rx = queue.watch();
    let mut last_seen = 0;
    while rx.changed().await.is_ok() {
        let fresh: Vec<_> = rx
            .borrow_and_update()
            .iter()
            .filter(|n| n.id > last_seen)
            .cloned()
            .collect();
        for toast in fresh {
            last_seen = toast.id;
            eprintln!("[{}] {}", toast.kind, toast.message);
        }
    }
}

/// Print the stream of `resource` until Ctrl-C or the server ends it.
async fn tail(config: &Config, resource: &str) -> Result<()> {
    let tailer = StreamTailer::new(config, Arc::new(ChainedCredentials::standard()));
    let handle = tailer
        .open(resource, |event| println!("{event}"))
        .await
        .with_context(|| format!("Failed to open stream for {resource}"))?;

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            handle.cancel();
            result.context("Failed to listen for Ctrl-C")?;
        }
        () = handle.closed() => {}
    }
    Ok(())
}

/// Connect, send one event, disconnect.
async fn send(config: &Config, topic: &str, data: &str) -> Result<()> {
    let data: serde_json::Value =
        serde_json::from_str(data).context("Event payload is not valid JSON")?;

    let mut mux = Multiplexer::new(config, Arc::new(ChainedCredentials::standard()));
    mux.connect().await?;
    if mux.status() != ConnectionStatus::Connected {
        mux.disconnect().await;
        anyhow::bail!("Could not connect to {}", mux.transport().url());
    }

    let sent = mux.send(topic, data);
    mux.disconnect().await;
    sent?;
    println!("Sent '{topic}'");
    Ok(())
}
