//! Application state management
//! This module wires the desk link, the move controller and the sit/stand
//! cycle together and owns the outbound broadcast channel.

use std::sync::{Arc, Mutex, PoisonError};

use anyhow::{Result, bail};
use log::{debug, info};
use tokio::sync::broadcast;

use crate::commands::OutboundMessage;
use crate::config::ConfigStore;
use crate::core::bluetooth::adapter::DeskAdapter;
use crate::core::bluetooth::connection::{ConnectionManager, RetryPolicy};
use crate::core::cycle::SitStandCycle;
use crate::core::events::{DeskEvent, SubscriptionHandle};
use crate::core::motion::MoveController;
use crate::core::scheduler::Scheduler;

const OUTBOUND_CHANNEL_CAPACITY: usize = 64;

/// Global application state
pub struct AppState {
    pub config: Arc<ConfigStore>,
    pub connection: ConnectionManager,
    pub mover: Arc<MoveController>,
    pub scheduler: Arc<Scheduler>,
    pub cycle: SitStandCycle,
    outbound: broadcast::Sender<OutboundMessage>,
    telemetry: Mutex<Option<SubscriptionHandle>>,
}

impl AppState {
    /// Creates a new AppState instance
    pub fn new(adapter: Arc<dyn DeskAdapter>, config: Arc<ConfigStore>) -> Self {
        Self::with_policy(adapter, config, RetryPolicy::default())
    }

    pub fn with_policy(adapter: Arc<dyn DeskAdapter>, config: Arc<ConfigStore>, policy: RetryPolicy) -> Self {
        let connection = ConnectionManager::new(adapter, policy);
        let mover = Arc::new(MoveController::new(connection.clone()));
        let scheduler = Arc::new(Scheduler::new());
        let cycle = SitStandCycle::new(scheduler.clone(), mover.clone(), config.clone());
        let (outbound, _) = broadcast::channel(OUTBOUND_CHANNEL_CAPACITY);

        let tx = outbound.clone();
        let telemetry = connection.bus().subscribe(DeskEvent::HeightChanged, move |sample| {
            // No receivers is fine, nobody is listening yet
            let _ = tx.send(OutboundMessage::from(sample));
        });

        Self {
            config,
            connection,
            mover,
            scheduler,
            cycle,
            outbound,
            telemetry: Mutex::new(Some(telemetry)),
        }
    }

    pub fn subscribe_outbound(&self) -> broadcast::Receiver<OutboundMessage> {
        self.outbound.subscribe()
    }

    pub fn broadcast(&self, message: OutboundMessage) {
        if self.outbound.send(message).is_err() {
            debug!("No clients listening for outbound messages");
        }
    }

    /// Runs `move_to` in the background
    pub fn spawn_move(&self, target_mm: f64) {
        let mover = self.mover.clone();
        tokio::spawn(async move {
            mover.move_to(target_mm).await;
        });
    }

    /// Connects to the configured desk, then starts the sit/stand cycle
    pub async fn start(&self) -> Result<()> {
        let address = self.config.get().await.mac;
        if address.is_empty() {
            bail!("No desk address configured");
        }

        self.connection.connect(&address).await?;
        info!("Connected to desk {}, starting sit/stand cycle", address);
        self.cycle.start().await;
        Ok(())
    }

    pub async fn shutdown(&self) {
        info!("Shutting down");
        self.cycle.stop().await;
        self.scheduler.cancel_all().await;

        let telemetry = self.telemetry.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(handle) = telemetry {
            self.connection.bus().unsubscribe(&handle);
        }
        self.connection.shutdown().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DeskConfig;
    use crate::core::bluetooth::protocol::HeightSample;
    use crate::core::bluetooth::types::LinkState;
    use crate::core::cycle::STAND_TASK;
    use crate::core::error::DeskError;
    use crate::core::testing::MockDesk;
    use std::time::Duration;
    use tokio::time::sleep;

    fn config_with_mac(mac: &str) -> Arc<ConfigStore> {
        Arc::new(ConfigStore::in_memory(DeskConfig {
            mac: mac.to_string(),
            ..DeskConfig::default()
        }))
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_connects_and_arms_cycle() {
        let mock = Arc::new(MockDesk::new());
        let state = AppState::new(mock.clone(), config_with_mac("E7:D2:6F:3E:C6:84"));

        state.start().await.unwrap();
        assert_eq!(state.connection.state(), LinkState::Connected);
        assert_eq!(state.scheduler.pending_tags().await, vec![STAND_TASK]);

        state.shutdown().await;
        assert!(state.scheduler.pending_tags().await.is_empty());
        assert_eq!(state.connection.state(), LinkState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_fails_after_initial_attempts() {
        let mock = Arc::new(MockDesk::new());
        mock.script_connects(&[false, false]);
        let state = AppState::new(mock.clone(), config_with_mac("E7:D2:6F:3E:C6:84"));

        let err = state.start().await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<DeskError>(),
            Some(DeskError::Connect { attempts: 2, .. })
        ));
        assert!(state.scheduler.pending_tags().await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_requires_address() {
        let mock = Arc::new(MockDesk::new());
        let state = AppState::new(mock.clone(), config_with_mac(""));
        assert!(state.start().await.is_err());
        assert_eq!(mock.connect_calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_telemetry_is_forwarded_to_clients() {
        let mock = Arc::new(MockDesk::new());
        let state = AppState::new(mock, config_with_mac(""));
        let mut outbound = state.subscribe_outbound();

        state
            .connection
            .bus()
            .publish(DeskEvent::HeightChanged, HeightSample::new(700.0, 25.0));
        sleep(Duration::from_millis(1)).await;

        assert_eq!(
            outbound.try_recv().unwrap(),
            OutboundMessage::Telemetry { current_height: 700.0, speed: 25.0 }
        );
    }
}
