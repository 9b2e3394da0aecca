//! Campus Market CLI - a terminal client for the campus marketplace.
//!
//! Browse and manage sell, roommate and carpool listings. Credentials are
//! kept between runs and access tokens are refreshed silently when they are
//! about to expire.

mod commands;

use std::io;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use campus_market_core::{ApiClient, Config, SessionManager};

use commands::{Cli, Command};

/// Directory for an additional daily log file, if set
const LOG_DIR_ENV: &str = "CAMPUS_MARKET_LOG_DIR";

const LOG_FILE_NAME: &str = "campus-market.log";

/// Initialize the tracing subscriber for logging.
///
/// The returned guard flushes the file writer and must live until exit.
fn init_tracing() -> Option<WorkerGuard> {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("warn"));

    let (file_layer, guard) = match std::env::var(LOG_DIR_ENV) {
        Ok(dir) if !dir.trim().is_empty() => {
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_NAME);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (Some(fmt::layer().with_writer(writer).with_ansi(false)), Some(guard))
        }
        _ => (None, None),
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(file_layer)
        .with(filter)
        .init();

    guard
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    let _log_guard = init_tracing();

    let mut config = Config::load()?;
    let api_base = cli.api_url.clone().unwrap_or_else(|| config.api_base());
    info!(api_base = %api_base, "Campus Market starting");

    let api = ApiClient::new(&api_base)?;
    let storage = config.open_storage()?;
    let session = SessionManager::new(storage, Arc::new(api.clone()));
    session.initialize().await;

    let ctx = commands::Context {
        api,
        session,
        config: &mut config,
    };

    match cli.command {
        Command::Login { email } => commands::login(ctx, email).await,
        Command::Register { email } => commands::register(ctx, email).await,
        Command::Verify { email, code } => commands::verify(ctx, email, code).await,
        Command::Logout => commands::logout(ctx).await,
        Command::Status => commands::status(ctx),
        Command::Token => commands::print_token(ctx).await,
        Command::Open { path } => commands::open(ctx, &path),
        Command::Posts { page, limit } => commands::list_posts(ctx, page, limit).await,
        Command::Mine(filter) => commands::my_posts(ctx, filter).await,
        Command::Show { id } => commands::show_post(ctx, &id).await,
        Command::Create(post) => commands::create_post(ctx, post).await,
        Command::Publish { id } => commands::set_status(ctx, &id, true).await,
        Command::Close { id } => commands::set_status(ctx, &id, false).await,
        Command::Delete { id } => commands::delete_post(ctx, &id).await,
        Command::Moderation { id } => commands::moderation(ctx, &id).await,
        Command::Profile { action } => commands::profile(ctx, action).await,
    }
}
