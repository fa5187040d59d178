//! Push-to-Talk Demo
//!
//! Wires two sessions over the in-memory loopback hub: "alice" transmits
//! microphone bursts, "bob" plays whatever he receives on the default
//! output device. Stands in for two browsers pointed at a shared broker.

use anyhow::Result;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use ptt_streamer::audio::device::{input_device_names, output_device_names};
use ptt_streamer::transport::LoopbackHub;
use ptt_streamer::{PeerId, Session, SessionConfig};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting PTT loopback demo");

    println!("\n=== Input devices ===");
    for name in input_device_names() {
        println!("  {name}");
    }
    println!("\n=== Output devices ===");
    for name in output_device_names() {
        println!("  {name}");
    }
    println!();

    let hub = LoopbackHub::new();

    let alice = Session::new(
        SessionConfig {
            local_id: PeerId::new("alice"),
            ..SessionConfig::default()
        },
        hub.endpoint(PeerId::new("alice")),
    );
    let bob = Session::new(
        SessionConfig {
            local_id: PeerId::new("bob"),
            ..SessionConfig::default()
        },
        hub.endpoint(PeerId::new("bob")),
    );

    alice.start().await?;
    bob.start().await?;

    tracing::info!("Sessions connected; alice transmits in 3s bursts - press Ctrl+C to stop");

    let run = async {
        loop {
            if let Err(e) = alice.start_transmit() {
                tracing::error!("cannot open microphone: {e}");
                break;
            }
            tokio::time::sleep(Duration::from_secs(3)).await;
            alice.stop_transmit();
            tokio::time::sleep(Duration::from_secs(1)).await;
        }
    };

    tokio::select! {
        _ = run => {}
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutting down");
        }
    }

    alice.stop().await;
    bob.stop().await;
    Ok(())
}
