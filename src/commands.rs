//! Client commands
//! This module parses the JSON commands sent by clients and the messages
//! broadcast back to them.

use std::sync::Arc;

use anyhow::{Context, Result};
use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::config::DeskConfig;
use crate::core::bluetooth::protocol::{HeightSample, MotionCommand};
use crate::state::AppState;

/// A command received from a client, e.g. `{"command": "set_sit", "value": 250}`
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum ClientCommand {
    MoveUp,
    MoveDown,
    Stand,
    Sit,
    CurrentHeight,
    SetSit { value: f64 },
    SetStand { value: f64 },
    SetSitDuration { value: u64 },
    SetStandDuration { value: u64 },
    GetConfig,
}

/// A message broadcast to every client
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum OutboundMessage {
    Telemetry { current_height: f64, speed: f64 },
    Config { config: DeskConfig },
}

impl From<HeightSample> for OutboundMessage {
    fn from(sample: HeightSample) -> Self {
        OutboundMessage::Telemetry {
            current_height: sample.height_mm,
            speed: sample.speed_mm_s,
        }
    }
}

impl OutboundMessage {
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).context("Failed to serialize outbound message")
    }
}

pub fn parse_command(raw: &str) -> Result<ClientCommand> {
    serde_json::from_str(raw).with_context(|| format!("Invalid command: {}", raw.trim()))
}

/// Parses and executes one client message
pub async fn handle_message(state: &AppState, raw: &str) -> Result<()> {
    let command = match parse_command(raw) {
        Ok(command) => command,
        Err(e) => {
            warn!("{:#}", e);
            return Err(e);
        }
    };
    info!("Handling command {:?}", command);
    execute(state, command).await
}

/// Executes queued client messages one at a time, in arrival order, so the
/// reader feeding the queue never waits on a slow command
pub fn spawn_command_worker(state: Arc<AppState>) -> (mpsc::UnboundedSender<String>, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    let worker = tokio::spawn(async move {
        while let Some(raw) = rx.recv().await {
            if let Err(e) = handle_message(&state, &raw).await {
                error!("Command failed: {:#}", e);
            }
        }
        debug!("Command queue closed");
    });
    (tx, worker)
}

pub async fn execute(state: &AppState, command: ClientCommand) -> Result<()> {
    match command {
        ClientCommand::MoveUp => state.connection.send_command(MotionCommand::Up).await,
        ClientCommand::MoveDown => state.connection.send_command(MotionCommand::Down).await,
        ClientCommand::Stand => {
            let target_mm = state.config.get().await.stand;
            state.spawn_move(target_mm);
        }
        ClientCommand::Sit => {
            let target_mm = state.config.get().await.sit;
            state.spawn_move(target_mm);
        }
        ClientCommand::CurrentHeight => {
            let sample = state.connection.read_height().await;
            state.broadcast(sample.into());
        }
        ClientCommand::SetSit { value } => {
            state.config.set_sit(value).await?;
        }
        ClientCommand::SetStand { value } => {
            state.config.set_stand(value).await?;
        }
        ClientCommand::SetSitDuration { value } => {
            state.config.set_sit_duration(value).await?;
            state.cycle.reschedule().await;
        }
        ClientCommand::SetStandDuration { value } => {
            state.config.set_stand_duration(value).await?;
            state.cycle.reschedule().await;
        }
        ClientCommand::GetConfig => {
            let config = state.config.get().await;
            state.broadcast(OutboundMessage::Config { config });
        }
    }
    Ok(())
}
