//! deskchat - terminal client for customer-support conversations
//!
//! Renders conversation history with optimistic sends and live updates.

mod api;
mod config;
mod dispatcher;
mod models;
mod realtime;
mod store;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::api::ApiClient;
use crate::config::Config;
use crate::dispatcher::Dispatcher;
use crate::models::{MessageView, SenderType};
use crate::store::MessageStore;

#[derive(Parser)]
#[command(name = "deskchat")]
#[command(about = "Terminal client for customer-support conversations", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the messages of a conversation
    Read {
        /// Conversation ID
        conversation_id: String,

        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },

    /// Send a message
    Send {
        /// Conversation ID
        #[arg(short, long)]
        to: String,

        /// Sender type: customer, operator, agent, system
        #[arg(long = "as", default_value = "operator")]
        sender: SenderType,

        /// Message content
        message: String,
    },

    /// Load conversations and follow live updates
    Watch {
        /// Conversation IDs to follow
        #[arg(required = true)]
        conversation_ids: Vec<String>,
    },

    /// Show or update the stored configuration
    Config {
        /// Backend REST API base URL
        #[arg(long)]
        api_url: Option<String>,

        /// Real-time WebSocket URL
        #[arg(long)]
        realtime_url: Option<String>,

        /// API bearer token
        #[arg(long)]
        token: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let config = Config::load()?;

    match cli.command {
        Commands::Read {
            conversation_id,
            json,
        } => {
            let dispatcher = build_dispatcher(&config);
            dispatcher.load(&conversation_id).await?;

            let (snapshot, view) = {
                let mut store = store::lock(dispatcher.store());
                let snapshot = store.snapshot(&conversation_id);
                let view = store.combined_view(&conversation_id);
                store.mark_read(&conversation_id);
                (snapshot, view)
            };

            if json {
                println!("{}", serde_json::to_string_pretty(&view)?);
            } else {
                println!(
                    "{} ({} messages, {} pending, {} unread)",
                    snapshot.conversation_id,
                    snapshot.confirmed.len(),
                    snapshot.speculative.len(),
                    snapshot.unread
                );
                print_view(&view);
            }
        }
        Commands::Send {
            to,
            sender,
            message,
        } => {
            let dispatcher = build_dispatcher(&config);
            if let Err(e) = dispatcher.load(&to).await {
                tracing::warn!("{:#}", anyhow::Error::from(e));
            }
            tracing::info!("Sending message...");
            match dispatcher.send(&to, &message, sender).await {
                Ok(confirmed) => println!("Message sent ({}).", confirmed.id),
                Err(e) => {
                    tracing::debug!("Removed pending entry {}", e.temp_id);
                    let retry = format!("deskchat send --to {} {:?}", e.conversation_id, e.content);
                    return Err(anyhow::Error::from(e)
                        .context(format!("Message not sent. Retry with: {}", retry)));
                }
            }
        }
        Commands::Watch { conversation_ids } => {
            let realtime_url = config
                .realtime_url
                .clone()
                .context("No realtime_url configured. Run 'deskchat config --realtime-url <url>'.")?;

            let dispatcher = build_dispatcher(&config);
            for id in &conversation_ids {
                dispatcher.load(id).await?;
                print_view(&store::lock(dispatcher.store()).combined_view(id));
            }

            store::lock(dispatcher.store()).subscribe(Box::new(|conversation_id, m| {
                println!(
                    "[{}] {} {}: {}",
                    conversation_id,
                    m.created_at.format("%H:%M:%S"),
                    m.sender_type,
                    m.content
                );
            }));

            realtime::connect_and_run(
                &realtime_url,
                config.api_token.as_deref(),
                &conversation_ids,
                &dispatcher,
            )
            .await?;
        }
        Commands::Config {
            api_url,
            realtime_url,
            token,
        } => {
            if api_url.is_none() && realtime_url.is_none() && token.is_none() {
                print_config(&config)?;
                return Ok(());
            }

            let mut config = config;
            if let Some(url) = api_url {
                if !url.starts_with("http://") && !url.starts_with("https://") {
                    bail!("api_url must start with http:// or https://");
                }
                config.api_url = url;
            }
            if let Some(url) = realtime_url {
                config.realtime_url = Some(url);
            }
            if let Some(token) = token {
                config.api_token = Some(token);
            }
            config.save()?;
            println!("Config saved.");
        }
    }

    Ok(())
}

fn build_dispatcher(config: &Config) -> Dispatcher<ApiClient> {
    let store = MessageStore::shared(config.reconcile_settings());
    Dispatcher::new(ApiClient::from_config(config), store)
}

fn print_view(view: &[MessageView]) {
    if view.is_empty() {
        println!("(no messages)");
        return;
    }

    for msg in view {
        let marker = if msg.is_optimistic { " (sending)" } else { "" };
        println!(
            "[{}] {}: {}{}",
            msg.created_at.format("%Y-%m-%d %H:%M:%S"),
            msg.sender_type,
            msg.content,
            marker
        );
    }
}

fn print_config(config: &Config) -> Result<()> {
    println!("Config file: {}", Config::config_path()?.display());
    println!("  api_url:             {}", config.api_url);
    println!(
        "  realtime_url:        {}",
        config.realtime_url.as_deref().unwrap_or("(not set)")
    );
    println!(
        "  api_token:           {}",
        if config.api_token.is_some() { "(set)" } else { "(not set)" }
    );
    println!("  dedup_window_ms:     {}", config.dedup_window_ms);
    println!("  reconcile_window_ms: {}", config.reconcile_window_ms);
    Ok(())
}
