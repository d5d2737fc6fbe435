//! Headless bot binary.
//!
//! Usage:
//!   cargo run -p relay_client -- [--addr 127.0.0.1:3000] [--name Bot] [--tick-hz 30]
//!
//! The bot connects to the relay, joins, then drives around with randomly
//! changing steering, sending one pose update per tick.

use std::env;
use std::time::Duration;

use anyhow::Context;
use rand::Rng;
use relay_client::{
    drive::{Car, DriveInput},
    RelayClient,
};
use relay_shared::config::RelayConfig;
use tracing::info;

fn parse_args() -> anyhow::Result<RelayConfig> {
    let mut cfg = RelayConfig {
        server_addr: "127.0.0.1:3000".to_string(),
        player_name: "Bot".to_string(),
        ..Default::default()
    };
    let args: Vec<String> = env::args().collect();
    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--config" if i + 1 < args.len() => {
                cfg = RelayConfig::from_file(std::path::Path::new(&args[i + 1]))?;
                i += 2;
            }
            "--addr" if i + 1 < args.len() => {
                cfg.server_addr = args[i + 1].clone();
                i += 2;
            }
            "--name" if i + 1 < args.len() => {
                cfg.player_name = args[i + 1].clone();
                i += 2;
            }
            "--tick-hz" if i + 1 < args.len() => {
                cfg.tick_hz = args[i + 1].parse().unwrap_or(30);
                i += 2;
            }
            _ => i += 1,
        }
    }
    cfg.tick_hz = cfg.tick_hz.max(1);
    Ok(cfg)
}

/// Picks a new steering direction now and then.
fn next_input(rng: &mut impl Rng, prev: DriveInput) -> DriveInput {
    if !rng.gen_bool(0.02) {
        return prev;
    }
    let steer = rng.gen_range(0..3);
    DriveInput {
        throttle: true,
        left: steer == 1,
        right: steer == 2,
        ..Default::default()
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cfg = parse_args()?;
    info!(server = %cfg.server_addr, name = %cfg.player_name, "Starting bot");

    let mut client = RelayClient::connect(&cfg).await.context("connect")?;
    let mut car = Car::default();
    client.join(car.join_request(&cfg.player_name)).await?;

    let mut rng = rand::thread_rng();
    let mut input = DriveInput {
        throttle: true,
        ..Default::default()
    };
    let mut ticker = tokio::time::interval(Duration::from_secs_f32(1.0 / cfg.tick_hz as f32));
    let mut last_online = 0;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl+C, leaving");
                break;
            }
            _ = ticker.tick() => {}
        }

        while client.try_poll()?.is_some() {}

        let online = client.remote.online_count();
        if online != last_online {
            info!(online, "Players online");
            last_online = online;
        }

        input = next_input(&mut rng, input);
        car.step(input);
        client.send_update(car.pose()).await?;
    }

    client.close().await
}
