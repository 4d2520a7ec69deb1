//! Notification handling for the desk
//! Decodes height notifications and publishes them on the event bus.

use std::sync::Arc;

use log::{debug, info, warn};
use tokio::sync::mpsc;

use crate::core::bluetooth::adapter::DeskAdapter;
use crate::core::bluetooth::protocol;
use crate::core::events::{DeskEvent, EventBus};

/// Why a notification session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// The notification channel closed
    StreamClosed,
    /// The adapter signalled a disconnect
    Disconnected,
}

/// Moves raw notifications from the adapter onto the bus
#[derive(Clone)]
pub struct NotificationHandler {
    bus: Arc<EventBus>,
}

impl NotificationHandler {
    pub fn new(bus: Arc<EventBus>) -> Self {
        Self { bus }
    }

    /// Decodes one payload and publishes it. Malformed payloads are dropped.
    pub fn handle_payload(&self, raw: &[u8]) {
        match protocol::decode(raw) {
            Ok(sample) => {
                debug!(
                    "Desk at {:.1}mm ({:.1}mm above floor) @ {:.2}mm/s",
                    sample.height_mm,
                    sample.human_height_mm(),
                    sample.speed_mm_s
                );
                self.bus.publish(DeskEvent::HeightChanged, sample);
            }
            Err(e) => warn!("Dropping notification {:?}: {}", raw, e),
        }
    }

    /// Runs until the notification channel closes or the adapter reports a
    /// disconnect. Each sample is fully dispatched before the next is read.
    pub async fn process_notifications(
        &self,
        adapter: Arc<dyn DeskAdapter>,
        mut notifications: mpsc::Receiver<Vec<u8>>,
    ) -> SessionEnd {
        info!("Listening for height notifications...");
        let disconnected = adapter.wait_for_disconnect();
        tokio::pin!(disconnected);

        let end = loop {
            tokio::select! {
                frame = notifications.recv() => match frame {
                    Some(raw) => self.handle_payload(&raw),
                    None => break SessionEnd::StreamClosed,
                },
                _ = &mut disconnected => break SessionEnd::Disconnected,
            }
        };

        info!("Notification stream ended: {:?}", end);
        end
    }
}
