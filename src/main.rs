use anyhow::Result;
use elektra::Config;
use elektra::Reading;
use elektra::engine::runtime::EngineRuntime;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::load().map_err(|e| anyhow::anyhow!("Failed to load configuration: {}", e))?;
    elektra::logging::init_logging(&config.logging)
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))?;

    info!("Elektra charging session engine starting up");

    let stats = elektra::stats::shared(&config.stats);
    let (mut runtime, handle) = EngineRuntime::new(config, stats);

    // Readings arrive as JSON lines on stdin from the collaborator that
    // normalizes vendor-specific charger data into the canonical shape.
    let readings_tx = handle.readings();
    let reader_task = tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            match serde_json::from_str::<Reading>(line) {
                Ok(reading) => {
                    if readings_tx.send(reading).is_err() {
                        break;
                    }
                }
                Err(e) => warn!("Ignoring malformed reading: {}", e),
            }
        }
    });

    let shutdown_handle = handle.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            shutdown_handle.shutdown();
        }
    });

    let result = runtime.run().await;
    reader_task.abort();

    match result {
        Ok(()) => {
            info!("Engine shutdown complete");
            Ok(())
        }
        Err(e) => Err(anyhow::anyhow!("Engine error: {}", e)),
    }
}
