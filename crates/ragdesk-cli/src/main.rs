//! ragdesk - log in to a ragdesk server from the terminal.
//!
//! Each invocation composes the application once (config, HTTP client,
//! token store, session) and performs a single account action.

mod app;
mod output;
mod prompt;

use std::io;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use ragdesk_core::config::TokenStoreKind;
use ragdesk_core::Config;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use app::App;
use output::TerminalNotifier;

#[derive(Debug, Parser)]
#[command(name = "ragdesk", version, about = "Manage your ragdesk session and ask questions")]
struct Cli {
    /// API base URL (overrides config and RAGDESK_API_URL)
    #[arg(long, global = true)]
    api_url: Option<String>,

    /// Where to keep the session token
    #[arg(long, global = true, value_parser = parse_store)]
    token_store: Option<TokenStoreKind>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Log in and save the access token
    Login {
        #[arg(short, long)]
        username: Option<String>,
    },
    /// Create a new account (does not log in)
    Register {
        #[arg(short, long)]
        username: Option<String>,
    },
    /// Forget the saved access token
    Logout,
    /// Show whether a session is saved
    Status,
    /// Ask the server who the saved token belongs to
    Whoami,
    /// Ask a question of the server's documents
    Ask {
        /// The question; several words are joined with spaces
        #[arg(required = true)]
        question: Vec<String>,
    },
}

fn parse_store(s: &str) -> Result<TokenStoreKind, String> {
    s.parse().map_err(|e: anyhow::Error| e.to_string())
}

/// Initialize the tracing subscriber for logging
fn init_tracing() {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(filter)
        .init();
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<ExitCode> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    init_tracing();
    let cli = Cli::parse();

    let mut config = Config::load().context("Failed to load configuration")?;
    if let Some(url) = cli.api_url {
        config.api_base_url = url;
    }
    if let Some(kind) = cli.token_store {
        config.token_store = kind;
    }
    info!(server = %config.api_base(), "ragdesk starting");

    let mut app = App::new(config, TerminalNotifier)?;

    let ok = match cli.command {
        Command::Login { username } => {
            let username = prompt::username(username, app.config().last_username.as_deref())?;
            let password = prompt::password()?;
            app.login(&username, &password).await
        }
        Command::Register { username } => {
            let username = prompt::username(username, None)?;
            let password = prompt::new_password()?;
            app.register(&username, &password).await
        }
        Command::Logout => {
            app.logout()?;
            println!("Logged out.");
            true
        }
        Command::Status => {
            let report = app.status();
            println!("{}", report);
            report.logged_in
        }
        Command::Whoami => match app.whoami().await {
            Some(user) => {
                let state = if user.is_active { "active" } else { "inactive" };
                println!("{} (id {}, {})", user.username, user.id, state);
                true
            }
            None => false,
        },
        Command::Ask { question } => match app.ask(&question.join(" ")).await {
            Some(reply) => {
                println!("{}", reply.answer);
                if !reply.source_documents.is_empty() {
                    println!("\nSources:");
                    for (i, doc) in reply.source_documents.iter().enumerate() {
                        let origin = doc.origin().unwrap_or_else(|| "unknown source".to_string());
                        println!("  [{}] {}: {}", i + 1, origin, excerpt(&doc.page_content));
                    }
                }
                true
            }
            None => false,
        },
    };

    Ok(if ok { ExitCode::SUCCESS } else { ExitCode::FAILURE })
}

/// Maximum characters of a source passage shown after an answer
const EXCERPT_CHARS: usize = 80;

/// First line of a passage, shortened for display
fn excerpt(text: &str) -> String {
    let line = text.lines().find(|l| !l.trim().is_empty()).unwrap_or("").trim();
    if line.chars().count() <= EXCERPT_CHARS {
        line.to_string()
    } else {
        let cut: String = line.chars().take(EXCERPT_CHARS).collect();
        format!("{}…", cut.trim_end())
    }
}
