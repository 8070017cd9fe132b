//! Demo binary: start the monitor and print snapshots until interrupted.
//!
//! Usage: `portwatch [interface]`. Capture needs the usual pcap privileges
//! (root or CAP_NET_RAW).

use std::time::Duration;

use portwatch::{CaptureConfig, Monitor};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        tracing::error!("PANIC in portwatch: {info}");
        default_hook(info);
    }));

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "portwatch=info".into()),
        )
        .init();

    let config = CaptureConfig {
        interface: std::env::args().nth(1),
        ..CaptureConfig::default()
    };

    let monitor = Monitor::new(config);
    monitor.start_background();
    monitor.start_capture()?;

    let mut ticker = tokio::time::interval(Duration::from_secs(
        portwatch::config::SNAPSHOT_PRINT_INTERVAL_SECS,
    ));
    ticker.tick().await;
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let snapshot = monitor.snapshot();
                println!("{}", serde_json::to_string_pretty(&snapshot)?);
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("interrupt received, shutting down");
                break;
            }
        }
    }

    monitor.shutdown();
    Ok(())
}
