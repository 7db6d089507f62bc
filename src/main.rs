use anyhow::Result;
use log::error;
use std::time::Duration;
use tokio::sync::broadcast;

use ecu_bridge::prelude::Options;

#[tokio::main]
async fn main() -> Result<()> {
    let options = Options::new();
    ecu_bridge::init_logging();

    if options.once {
        match ecu_bridge::once(&options).await {
            Ok(snapshot) => {
                println!("{}", serde_json::to_string_pretty(&snapshot)?);
                return Ok(());
            }
            Err(e) => {
                error!("{:#}", e);
                std::process::exit(1);
            }
        }
    }

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

    let shutdown_tx_clone = shutdown_tx.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
        }
        let _ = shutdown_tx_clone.send(());
    });

    if let Some(secs) = options.runtime {
        let shutdown_tx = shutdown_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(secs)).await;
            log::info!("runtime limit of {}s reached", secs);
            let _ = shutdown_tx.send(());
        });
    }

    if let Err(e) = ecu_bridge::app(shutdown_rx, options).await {
        error!("Application error: {:#}", e);
        std::process::exit(255);
    }

    Ok(())
}
