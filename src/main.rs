use std::sync::Arc;
use std::time::Duration;

use anyhow::{Result, bail};
use idasen_desk_bridge::config::{ConfigStore, DEFAULT_CONFIG_FILE_NAME};
use idasen_desk_bridge::core::bluetooth::constants::DEFAULT_SCAN_DURATION_SECS;
use idasen_desk_bridge::core::bluetooth::{BluestDesk, discover_desks};
use idasen_desk_bridge::commands::spawn_command_worker;
use idasen_desk_bridge::{AppState, logging};
use log::{error, info, warn};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::broadcast::error::RecvError;

/// Finds a desk nearby and stores the strongest one in the config
async fn discover_and_store(desk: &BluestDesk, config: &ConfigStore) -> Result<()> {
    info!("No desk address configured, scanning for desks...");
    let found = discover_desks(desk.adapter(), Duration::from_secs(DEFAULT_SCAN_DURATION_SECS)).await?;
    for candidate in &found {
        info!(
            "Found {} (address: {}, rssi: {:?})",
            candidate.name,
            candidate.address.as_deref().unwrap_or("unknown"),
            candidate.rssi
        );
    }

    let Some(address) = found.iter().find_map(|d| d.address.clone()) else {
        bail!("No desk found. Put the desk in pairing mode or set its address in the config file");
    };
    config.set_mac(&address).await?;
    info!("Using desk {}", address);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    logging::init();

    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_CONFIG_FILE_NAME.to_string());
    let config = Arc::new(ConfigStore::load(&config_path).await?);

    let desk = Arc::new(BluestDesk::new().await?);
    if config.get().await.mac.is_empty() {
        discover_and_store(&desk, &config).await?;
    }

    let state = Arc::new(AppState::new(desk, config));
    state.start().await?;

    let mut outbound = state.subscribe_outbound();
    let writer = tokio::spawn(async move {
        let mut stdout = tokio::io::stdout();
        loop {
            match outbound.recv().await {
                Ok(message) => {
                    let line = match message.to_json() {
                        Ok(line) => line,
                        Err(e) => {
                            error!("{:#}", e);
                            continue;
                        }
                    };
                    if let Err(e) = stdout.write_all(format!("{}\n", line).as_bytes()).await {
                        error!("Failed to write to stdout: {}", e);
                        break;
                    }
                    let _ = stdout.flush().await;
                }
                Err(RecvError::Lagged(skipped)) => warn!("Dropped {} outbound messages", skipped),
                Err(RecvError::Closed) => break,
            }
        }
    });

    let (commands, worker) = spawn_command_worker(state.clone());
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("Ctrl-C received");
                break;
            }
            line = lines.next_line() => match line {
                Ok(Some(line)) => {
                    if line.trim().is_empty() {
                        continue;
                    }
                    if commands.send(line).is_err() {
                        error!("Command worker stopped, exiting");
                        break;
                    }
                }
                Ok(None) => {
                    info!("Input closed, running until Ctrl-C");
                    (&mut shutdown).await?;
                    break;
                }
                Err(e) => {
                    error!("Failed to read input: {}", e);
                    break;
                }
            },
        }
    }

    drop(commands);
    worker.abort();
    state.shutdown().await;
    writer.abort();
    Ok(())
}
