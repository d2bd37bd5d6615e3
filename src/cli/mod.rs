//! Command-line entry points
//!
//! - `serve`: run the HTTP API
//! - `ask`: answer one question from the terminal

pub mod ask;
pub mod serve;

use clap::{Parser, Subcommand};

use crate::config::AppConfig;
use crate::infrastructure::logging;

/// NLQ Orchestrator - answers natural-language questions about financial data
#[derive(Parser)]
#[command(name = "nlq-orchestrator")]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run the HTTP API server
    Serve,

    /// Run one request and print its outcome as JSON
    Ask(ask::AskArgs),
}

/// Load `.env`, the layered configuration and the log subscriber
pub(crate) fn bootstrap() -> AppConfig {
    dotenvy::dotenv().ok();

    let config = AppConfig::load().unwrap_or_default();
    logging::init_logging(&config.logging);
    config
}
