// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use clap::Parser;
use tracing::error;

use chat_sync::config::SyncConfig;
use chat_sync::{Credentials, RunOptions};

/// Terminal chat client built on the sync core.
#[derive(Debug, Parser)]
#[command(name = "chatsync", version)]
struct Cli {
    #[command(flatten)]
    sync: SyncConfig,

    /// Conversation to open on start (default: most recent).
    #[arg(long)]
    conversation: Option<u64>,

    /// Login name, used when no token is set.
    #[arg(long, env = "CHAT_USERNAME")]
    username: Option<String>,

    #[arg(long, env = "CHAT_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    /// Log format (json or text).
    #[arg(long, env = "CHAT_SYNC_LOG_FORMAT", default_value = "text")]
    log_format: String,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, env = "CHAT_SYNC_LOG_LEVEL", default_value = "warn")]
    log_level: String,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(&cli);

    let _ = rustls::crypto::ring::default_provider().install_default();

    let credentials = match (cli.username, cli.password) {
        (Some(username), Some(password)) => Some(Credentials { username, password }),
        _ => None,
    };
    let options = RunOptions { credentials, conversation: cli.conversation };

    if let Err(e) = chat_sync::run(cli.sync, options).await {
        error!("fatal: {e:#}");
        std::process::exit(1);
    }
}

// Logs go to stderr; stdout carries the conversation.
fn init_tracing(cli: &Cli) {
    use tracing_subscriber::fmt;
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_new(&cli.log_level).unwrap_or_else(|_| EnvFilter::new("warn"));

    match cli.log_format.as_str() {
        "json" => {
            fmt::fmt().with_env_filter(filter).with_writer(std::io::stderr).json().init();
        }
        _ => {
            fmt::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();
        }
    }
}
