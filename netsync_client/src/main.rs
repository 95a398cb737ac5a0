//! Standalone client binary.
//!
//! Usage:
//!   cargo run -p netsync_client -- [--config netsync.json] [--addr 127.0.0.1:40000] [--ping-every 30]
//!
//! The client joins the server, mirrors the arena and pings the beacon at a
//! fixed interval.
//!
//! Console commands:
//!   status  - Show client status
//!   ping    - Ping the beacon now
//!   scores  - Show the replicated scoreboard
//!   quit    - Exit client

use std::env;
use std::io::{BufRead, Write};
use std::time::Duration;

use anyhow::Context;
use netsync_client::client::{ClientState, ReplicationClient};
use netsync_shared::config::NetConfig;
use tokio::sync::mpsc;
use tracing::{info, warn};

struct Args {
    cfg: NetConfig,
    /// Ticks between automatic pings; 0 disables them.
    ping_every: u32,
}

fn parse_args() -> anyhow::Result<Args> {
    let args: Vec<String> = env::args().collect();
    let mut cfg = NetConfig::default();
    if let Some(i) = args.iter().position(|a| a == "--config") {
        if let Some(path) = args.get(i + 1) {
            let text = std::fs::read_to_string(path).with_context(|| format!("read {path}"))?;
            cfg = NetConfig::from_json_str(&text).with_context(|| format!("parse {path}"))?;
        }
    }
    let mut ping_every = 30;
    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--addr" if i + 1 < args.len() => {
                cfg.server_addr = args[i + 1].clone();
                i += 2;
            }
            "--ping-every" if i + 1 < args.len() => {
                ping_every = args[i + 1].parse().unwrap_or(ping_every);
                i += 2;
            }
            _ => i += 1,
        }
    }
    Ok(Args { cfg, ping_every })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let Args { cfg, ping_every } = parse_args()?;
    info!(server = %cfg.server_addr, tick_hz = cfg.tick_hz, "Starting client");

    let mut client = ReplicationClient::connect(&cfg).await.context("connect")?;

    // Set up console input channel.
    let (console_tx, mut console_rx) = mpsc::channel::<String>(32);

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

    println!("Client started. Type 'status' for info, 'quit' to exit.");
    println!();

    let tick_interval = Duration::from_millis(cfg.tick_ms());
    let mut next_tick = tokio::time::Instant::now();
    let mut ticks: u32 = 0;

    while !client.should_quit() {
        // Process console commands.
        while let Ok(line) = console_rx.try_recv() {
            for line in client.exec_console(&line) {
                println!("{line}");
            }
        }

        client.step();
        ticks += 1;

        if client.state() == ClientState::Connected && ping_every > 0 && ticks % ping_every == 0 {
            if let Err(e) = client.ping() {
                warn!(error = %e, "Ping failed");
            }
        }

        next_tick += tick_interval;
        tokio::time::sleep_until(next_tick).await;
    }

    Ok(())
}
