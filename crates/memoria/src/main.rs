// SPDX-FileCopyrightText: 2026 Memoria Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Memoria - per-user long-term memory for conversational agents.
//!
//! This is the binary entry point: a CLI over the memory manager plus a
//! long-running worker that drains the batch queue.

mod app;
mod commands;
mod shutdown;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use memoria_config::model::MemoriaConfig;
use memoria_config::{ConfigError, load_and_validate, load_and_validate_path, render_errors};
use memoria_core::MemoriaError;
use tracing::error;

use crate::app::App;

/// Memoria - per-user long-term memory for conversational agents.
#[derive(Parser, Debug)]
#[command(name = "memoria", version, about, long_about = None)]
struct Cli {
    /// Path to a TOML config file (default: XDG lookup).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// User the command acts on.
    #[arg(long, short, global = true, default_value = "default")]
    user: String,

    /// Print machine-readable JSON instead of text.
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Available subcommands.
#[derive(Subcommand, Debug)]
enum Commands {
    /// Store a fact explicitly.
    Remember {
        /// The fact, e.g. "remember that I'm vegetarian".
        #[arg(required = true, num_args = 1..)]
        text: Vec<String>,
    },
    /// Search the user's memories.
    Search {
        query: String,
        #[arg(long, short, default_value_t = 10)]
        limit: usize,
        /// Print the prompt context block instead of the ranked list.
        #[arg(long)]
        context: bool,
    },
    /// Extract memories from a conversation read on stdin (`role: text` per line).
    Extract {
        /// Bypass the gate and run immediately.
        #[arg(long)]
        force: bool,
    },
    /// List stored memories, newest first.
    List {
        #[arg(long)]
        category: Option<String>,
        /// conversation, manual or upload.
        #[arg(long)]
        source: Option<String>,
        #[arg(long)]
        min_importance: Option<u8>,
        #[arg(long, default_value_t = 50)]
        limit: usize,
        #[arg(long, default_value_t = 0)]
        offset: usize,
    },
    /// Delete a memory by id.
    Forget { id: String },
    /// Rebuild the in-memory index from storage.
    Reindex,
    /// Show known categories with usage counts.
    Categories,
    /// Show counters for the user.
    Stats,
    /// Run the batch and cleanup loop until interrupted.
    Worker,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = match load_config(cli.config.as_deref()) {
        Ok(config) => config,
        Err(errors) => {
            render_errors(&errors);
            std::process::exit(1);
        }
    };

    init_tracing(&config.logging.level);

    if let Err(e) = run(cli, config).await {
        error!(error = %e, "command failed");
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

fn load_config(path: Option<&std::path::Path>) -> Result<MemoriaConfig, Vec<ConfigError>> {
    match path {
        Some(path) => load_and_validate_path(path),
        None => load_and_validate(),
    }
}

async fn run(cli: Cli, config: MemoriaConfig) -> Result<(), MemoriaError> {
    let app = App::build(&config).await?;
    let manager = app.manager.clone();
    let user = cli.user.as_str();
    let json = cli.json;

    let result = match cli.command {
        Commands::Remember { text } => commands::remember(&manager, user, &text.join(" "), json).await,
        Commands::Search {
            query,
            limit,
            context,
        } => commands::search(&manager, user, &query, limit, context, json).await,
        Commands::Extract { force } => commands::extract(&manager, user, force, json).await,
        Commands::List {
            category,
            source,
            min_importance,
            limit,
            offset,
        } => match commands::list_filter(category.as_deref(), source.as_deref(), min_importance) {
            Ok(filter) => commands::list(&manager, user, &filter, limit, offset, json).await,
            Err(e) => Err(e),
        },
        Commands::Forget { id } => commands::forget(&manager, user, &id).await,
        Commands::Reindex => commands::reindex(&manager, json).await,
        Commands::Categories => commands::categories(&manager, json).await,
        Commands::Stats => commands::stats(&manager, user, json).await,
        Commands::Worker => {
            let cancel = shutdown::install_signal_handler();
            let handle = manager.clone().spawn_worker(cancel);
            handle
                .await
                .map_err(|e| MemoriaError::Internal(format!("worker task failed: {e}")))
        }
    };

    // Close even when the command failed, then report the first error.
    let closed = app.shutdown().await;
    result.and(closed)
}

/// Initialize the tracing subscriber with an env filter.
///
/// `RUST_LOG` takes precedence over the configured level.
fn init_tracing(log_level: &str) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("memoria={log_level},warn")));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_names(false)
        .with_writer(std::io::stderr)
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn global_flags_parse_after_subcommand() {
        let cli = Cli::try_parse_from(["memoria", "search", "where do I live", "--user", "u7", "--json"])
            .unwrap();
        assert_eq!(cli.user, "u7");
        assert!(cli.json);
        match cli.command {
            Commands::Search { query, limit, context } => {
                assert_eq!(query, "where do I live");
                assert_eq!(limit, 10);
                assert!(!context);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn remember_joins_words() {
        let cli = Cli::try_parse_from(["memoria", "remember", "I", "am", "vegetarian"]).unwrap();
        match cli.command {
            Commands::Remember { text } => assert_eq!(text.join(" "), "I am vegetarian"),
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn remember_requires_text() {
        assert!(Cli::try_parse_from(["memoria", "remember"]).is_err());
    }
}
