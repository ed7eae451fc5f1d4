//! Console receiver
//!
//! Connects to a relay host, joins a wire window and prints the decoded
//! text stream to stdout. The waterfall and S-meter notifications are
//! consumed by a real front panel; here they are simply dropped.
//!
//! Usage: `rx-console <host> [wire] [callsign]`

use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use cw_wire_client::{PanelSink, Station, StationConfig};

/// Prints decoded text as it arrives; titles go to the log.
struct ConsolePanel;

impl PanelSink for ConsolePanel {
    fn append_text(&self, text: &str) {
        print!("{text}");
        let _ = std::io::stdout().flush();
    }

    fn set_title(&self, title: &str) {
        tracing::info!("{title}");
    }

    fn set_channel_display(&self, center: u32) {
        tracing::info!("tuned to wire {center}");
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let mut args = std::env::args().skip(1);
    let host = args.next().unwrap_or_else(|| "127.0.0.1".to_string());
    let wire: u32 = args
        .next()
        .map(|w| w.parse().expect("wire must be a positive integer"))
        .unwrap_or(133);
    let callsign = args.next().unwrap_or_else(|| "TWI Client".to_string());

    tracing::info!("connecting to {host}, wire {wire}, callsign {callsign}");

    let mut config = StationConfig::new(host, wire);
    config.client.callsign = callsign;
    let mut station = Station::new(config, Arc::new(ConsolePanel))?;

    tracing::info!("receiving — press Ctrl+C to stop");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = tokio::time::sleep(Duration::from_millis(33)) => station.ui_tick(),
        }
    }

    println!();
    tracing::info!("shutting down");
    station.stop();
    Ok(())
}
