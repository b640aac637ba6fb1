use std::io::Write;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;

use devobot_cli::cli::session::{chat_api, ephemeral_controller, token_store};
use devobot_cli::cli::{format_entry, open_controller, CliConfig, Controller, ReplyPrinter};
use devobot_cli::tracing_setup::init_tracing;
use devobot_core::credentials::TokenStore;
use devobot_core::models::{MessageState, OrderBy, Role};
use devobot_core::ControllerEvent;

#[derive(Parser)]
#[command(name = "devobot")]
#[command(about = "Terminal client for the Devobot chat service")]
struct Cli {
    /// Path to JSON config file (apiBaseUrl, apiVersion, pageUrl, token, ...)
    #[arg(long, short = 'c')]
    config: Option<PathBuf>,

    /// API base URL, without the version prefix
    #[arg(long)]
    api_base_url: Option<String>,

    #[arg(long)]
    api_version: Option<String>,

    /// Page URL carrying the client token in its `token` query parameter
    #[arg(long)]
    page_url: Option<String>,

    /// Client token for the initial credential exchange
    #[arg(long)]
    token: Option<String>,

    /// Named channel shared with other running instances
    #[arg(long)]
    sync_channel: Option<String>,

    /// Keep the credential in memory and do not sync with other instances
    #[arg(long)]
    no_session: bool,

    /// Pretty-print JSON output
    #[arg(long, short)]
    pretty: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Interactive chat on the most recent conversation (default)
    Chat,

    /// List conversations as JSON
    List {
        #[arg(long, value_enum, default_value_t = Order::Desc)]
        order: Order,
    },

    /// Print the active conversation's messages
    History,

    /// Send one message and print the reply
    Send {
        text: String,
    },

    /// Replace a message and everything after it with new text
    Edit {
        message_id: String,
        text: String,
    },

    /// Delete the active conversation and start a new one
    Reset,

    /// Forget the cached session credential
    Logout,
}

#[derive(Clone, Copy, ValueEnum)]
enum Order {
    Asc,
    Desc,
}

impl From<Order> for OrderBy {
    fn from(order: Order) -> Self {
        match order {
            Order::Asc => OrderBy::Asc,
            Order::Desc => OrderBy::Desc,
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(e) = init_tracing() {
        eprintln!("Warning: {:#}", e);
    }

    if let Err(e) = run(cli).await {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

/// Priority: flags > config file > environment
fn load_config(cli: &Cli) -> Result<CliConfig> {
    let file = match cli.config.clone().or_else(CliConfig::default_path) {
        Some(path) => CliConfig::load(&path)?,
        None => CliConfig::default(),
    };

    let flags = CliConfig {
        api_base_url: cli.api_base_url.clone(),
        api_version: cli.api_version.clone(),
        page_url: cli.page_url.clone(),
        token: cli.token.clone(),
        sync_channel: cli.sync_channel.clone(),
        ..Default::default()
    };

    Ok(file.merge(flags).with_env())
}

async fn run(cli: Cli) -> Result<()> {
    let config = load_config(&cli)?;
    let command = cli.command.unwrap_or(Commands::Chat);

    match command {
        Commands::Logout => {
            token_store(&config).clear()?;
            println!("Session credential cleared");
            Ok(())
        }
        Commands::List { order } => {
            let client_config = config.client_config()?;
            let api = chat_api(&client_config, token_store(&config));
            let conversations = api.list_conversations(order.into()).await?;
            let json = if cli.pretty {
                serde_json::to_string_pretty(&conversations)?
            } else {
                serde_json::to_string(&conversations)?
            };
            println!("{}", json);
            Ok(())
        }
        command => {
            let controller = if cli.no_session {
                ephemeral_controller(&config.client_config()?)
            } else {
                open_controller(&config).await?
            };
            controller
                .initialize()
                .await
                .context("Could not open a conversation")?;

            match command {
                Commands::History => {
                    print_history(&controller);
                    Ok(())
                }
                Commands::Send { text } => send_once(&controller, &text).await,
                Commands::Edit { message_id, text } => {
                    let reply = controller.edit(&message_id, &text).await?;
                    if let Some(reply) = reply {
                        println!("{}", format_entry(&reply));
                    }
                    Ok(())
                }
                Commands::Reset => {
                    controller.reset().await?.wait().await?;
                    println!(
                        "Started conversation {}",
                        controller.conversation_id().unwrap_or_default()
                    );
                    Ok(())
                }
                _ => chat(controller).await,
            }
        }
    }
}

fn print_history(controller: &Controller) {
    for entry in controller.history() {
        println!("{}", format_entry(&entry));
    }
}

async fn send_once(controller: &Controller, text: &str) -> Result<()> {
    match controller.submit(text).await? {
        Some(reply) => println!("{}", reply.text),
        None => bail!("Nothing to send"),
    }
    Ok(())
}

/// Render controller events: our own reply as it streams, and whatever
/// other instances add to the conversation
async fn render_events(controller: Controller) {
    let mut events = controller.subscribe_events();
    let mut printer = ReplyPrinter::default();
    let mut stdout = std::io::stdout();

    loop {
        let event = match events.recv().await {
            Ok(event) => event,
            Err(RecvError::Lagged(skipped)) => {
                tracing::warn!("Renderer lagged, skipped {} events", skipped);
                let history = controller.history();
                let latest = history.iter().rev().find(|entry| entry.role == Role::Ai);
                let _ = write!(stdout, "{}", printer.catch_up(latest));
                let _ = stdout.flush();
                continue;
            }
            Err(RecvError::Closed) => break,
        };

        match event {
            // Remote entries arrive complete; local ones start out pending
            ControllerEvent::EntryAppended { entry, .. } if entry.state == MessageState::Complete => {
                println!("\n(other window) {}", format_entry(&entry));
            }
            ControllerEvent::EntryUpdated { entry, .. } if entry.role == Role::Ai => {
                let _ = write!(stdout, "{}", printer.render(&entry));
                let _ = stdout.flush();
            }
            ControllerEvent::HistoryReplaced { conversation_id, history } => {
                if history.is_empty() {
                    println!("\n-- conversation {} cleared --", conversation_id);
                } else {
                    println!("\n-- conversation {} --", conversation_id);
                    for entry in &history {
                        println!("{}", format_entry(entry));
                    }
                }
            }
            _ => {}
        }
    }
}

async fn chat(controller: Controller) -> Result<()> {
    print_history(&controller);
    println!("Type a message, /edit <id> <text>, /reset, /history or /quit");

    let renderer = tokio::spawn(render_events(controller.clone()));
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        let result = match line {
            "" => continue,
            "/quit" | "/exit" => break,
            "/history" => {
                print_history(&controller);
                Ok(())
            }
            "/reset" => controller.reset().await.map(|_| ()),
            _ => {
                if let Some(rest) = line.strip_prefix("/edit ") {
                    match rest.trim().split_once(' ') {
                        Some((message_id, text)) => controller.edit(message_id, text).await.map(|_| ()),
                        None => {
                            eprintln!("Usage: /edit <message id> <text>");
                            Ok(())
                        }
                    }
                } else {
                    controller.submit(line).await.map(|_| ())
                }
            }
        };

        if let Err(e) = result {
            eprintln!("Error: {}", e);
        }
    }

    renderer.abort();
    Ok(())
}
