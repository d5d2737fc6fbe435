//! Standalone relay binary.
//!
//! Usage:
//!   cargo run -p relay_server -- [--config relay.json] [--addr 0.0.0.0:3000]
//!
//! Flags apply in order, so `--addr` after `--config` overrides the file.
//!
//! Console commands:
//!   status  - List joined players
//!   quit    - Shutdown relay

use std::env;
use std::io::{BufRead, Write};
use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use relay_server::{
    registry::Registry,
    server::{status_lines, RelayServer},
};
use relay_shared::config::RelayConfig;
use tokio::sync::mpsc;
use tracing::info;

fn parse_args() -> anyhow::Result<RelayConfig> {
    let mut cfg = RelayConfig::default();
    let args: Vec<String> = env::args().collect();
    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--config" if i + 1 < args.len() => {
                cfg = RelayConfig::from_file(Path::new(&args[i + 1]))?;
                i += 2;
            }
            "--addr" if i + 1 < args.len() => {
                cfg.server_addr = args[i + 1].clone();
                i += 2;
            }
            _ => i += 1,
        }
    }
    Ok(cfg)
}

/// Handles console lines until `quit`. Never returns if stdin just closes.
async fn run_console(registry: Arc<Registry>, mut rx: mpsc::Receiver<String>) {
    while let Some(line) = rx.recv().await {
        match line.as_str() {
            "status" => {
                for l in status_lines(&registry) {
                    println!("{}", l);
                }
            }
            "quit" | "exit" => return,
            other => println!("Unknown command: {}", other),
        }
    }
    std::future::pending::<()>().await;
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cfg = parse_args()?;
    info!(addr = %cfg.server_addr, "Starting relay");

    let server = RelayServer::bind(cfg).await.context("create server")?;
    let local = server.local_addr()?;
    info!(%local, "Relay listening");

    // Set up console input channel.
    let (console_tx, console_rx) = mpsc::channel::<String>(32);

    // Spawn stdin reader thread.
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        let mut stdout = std::io::stdout();
        loop {
            print!("] ");
            let _ = stdout.flush();
            let mut line = String::new();
            match stdin.lock().read_line(&mut line) {
                Ok(0) | Err(_) => break,
                Ok(_) => {}
            }
            let line = line.trim().to_string();
            if !line.is_empty() && console_tx.blocking_send(line).is_err() {
                break;
            }
        }
    });

    let console = run_console(server.registry(), console_rx);
    let shutdown = async move {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => info!("Received Ctrl+C"),
            _ = console => info!("Quit requested"),
        }
    };

    server.run_until(shutdown).await
}
