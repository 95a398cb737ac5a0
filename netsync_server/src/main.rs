//! Standalone server binary.
//!
//! Usage:
//!   cargo run -p netsync_server -- [--config netsync.json] [--addr 127.0.0.1:40000] [--tick-hz 30]
//!
//! The server accepts UDP clients, replicates the scoreboard and the beacon,
//! and counts pings.
//!
//! Console commands:
//!   status                      - Show server status
//!   spawn <entity> [authority]  - Spawn a bare entity
//!   cease <entity>              - Remove an entity
//!   quit                        - Shutdown server

use std::env;
use std::io::{BufRead, Write};

use anyhow::Context;
use netsync_server::ReplicationServer;
use netsync_shared::config::NetConfig;
use tokio::sync::mpsc;
use tracing::info;

fn parse_args() -> anyhow::Result<NetConfig> {
    let args: Vec<String> = env::args().collect();
    let mut cfg = NetConfig::default();
    // The config file is the base; flags override it wherever they appear.
    if let Some(i) = args.iter().position(|a| a == "--config") {
        if let Some(path) = args.get(i + 1) {
            let text = std::fs::read_to_string(path).with_context(|| format!("read {path}"))?;
            cfg = NetConfig::from_json_str(&text).with_context(|| format!("parse {path}"))?;
        }
    }
    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--addr" if i + 1 < args.len() => {
                cfg.server_addr = args[i + 1].clone();
                i += 2;
            }
            "--tick-hz" if i + 1 < args.len() => {
                cfg.tick_hz = args[i + 1].parse().unwrap_or(cfg.tick_hz);
                i += 2;
            }
            _ => i += 1,
        }
    }
    Ok(cfg)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cfg = parse_args()?;
    info!(addr = %cfg.server_addr, tick_hz = cfg.tick_hz, "Starting server");

    let mut server = ReplicationServer::new(cfg.clone())
        .await
        .context("create server")?;
    let local = server.local_addr()?;
    info!(%local, "Server listening");

    // Set up console input channel.
    let (console_tx, console_rx) = mpsc::channel::<String>(32);
    server.set_console_input(console_rx);

    // Spawn stdin reader thread.
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        let mut stdout = std::io::stdout();
        loop {
            print!("] ");
            let _ = stdout.flush();
            let mut line = String::new();
            if stdin.lock().read_line(&mut line).is_err() {
                break;
            }
            let line = line.trim().to_string();
            if !line.is_empty() && console_tx.blocking_send(line).is_err() {
                break;
            }
        }
    });

    println!("Server ready. Type 'status' for info, 'quit' to exit.");
    println!();

    // Main server loop.
    let tick_interval = std::time::Duration::from_millis(cfg.tick_ms());
    let mut next_tick = tokio::time::Instant::now();

    while !server.should_quit() {
        server.step()?;

        // Wait for next tick.
        next_tick += tick_interval;
        tokio::time::sleep_until(next_tick).await;
    }
    Ok(())
}
