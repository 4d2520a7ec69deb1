//! Desk connection lifecycle
//! Connects with a bounded retry, then keeps the link alive for the lifetime
//! of the process: a liveness monitor polls the desk and every lost link is
//! retried without limit.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use log::{debug, error, info, warn};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

use crate::core::bluetooth::adapter::DeskAdapter;
use crate::core::bluetooth::constants::{
    CONNECT_RETRY_DELAY_SECS, MAX_CONNECT_RETRIES, MONITOR_INTERVAL_SECS, RECONNECT_DELAY_SECS,
};
use crate::core::bluetooth::notification::NotificationHandler;
use crate::core::bluetooth::protocol::{self, HeightSample, MotionCommand};
use crate::core::bluetooth::types::LinkState;
use crate::core::error::{DeskError, DeskResult};
use crate::core::events::{DeskEvent, EventBus};

/// Timing of connects, reconnects and the liveness monitor
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Attempts made by `connect` before it fails
    pub initial_attempts: u32,
    pub initial_backoff: Duration,
    /// Fixed delay between reconnect attempts; reconnects never give up
    pub reconnect_backoff: Duration,
    pub monitor_interval: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_attempts: MAX_CONNECT_RETRIES,
            initial_backoff: Duration::from_secs(CONNECT_RETRY_DELAY_SECS),
            reconnect_backoff: Duration::from_secs(RECONNECT_DELAY_SECS),
            monitor_interval: Duration::from_secs(MONITOR_INTERVAL_SECS),
        }
    }
}

struct Inner {
    adapter: Arc<dyn DeskAdapter>,
    bus: Arc<EventBus>,
    policy: RetryPolicy,
    state: watch::Sender<LinkState>,
    address: Mutex<Option<String>>,
    /// Bumped for every notification session; stale lost-link signals are ignored
    generation: AtomicU64,
    reconnect_attempts: AtomicU32,
    pump: Mutex<Option<JoinHandle<()>>>,
    supervisor: Mutex<Option<JoinHandle<()>>>,
    shutdown: CancellationToken,
}

/// Owns the desk link
///
/// Other components read and write through this type and never see the
/// adapter. Cloning is cheap and shares the same link.
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<Inner>,
}

fn locked<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl ConnectionManager {
    pub fn new(adapter: Arc<dyn DeskAdapter>, policy: RetryPolicy) -> Self {
        let (state, _) = watch::channel(LinkState::Disconnected);
        Self {
            inner: Arc::new(Inner {
                adapter,
                bus: Arc::new(EventBus::new()),
                policy,
                state,
                address: Mutex::new(None),
                generation: AtomicU64::new(0),
                reconnect_attempts: AtomicU32::new(0),
                pump: Mutex::new(None),
                supervisor: Mutex::new(None),
                shutdown: CancellationToken::new(),
            }),
        }
    }

    /// The bus telemetry is published on
    pub fn bus(&self) -> Arc<EventBus> {
        self.inner.bus.clone()
    }

    pub fn state(&self) -> LinkState {
        *self.inner.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<LinkState> {
        self.inner.state.subscribe()
    }

    pub fn address(&self) -> Option<String> {
        locked(&self.inner.address).clone()
    }

    /// Reconnect attempts made since the manager was created
    pub fn reconnect_attempts(&self) -> u32 {
        self.inner.reconnect_attempts.load(Ordering::Relaxed)
    }

    fn transition(&self, to: LinkState) {
        let from = self.inner.state.send_replace(to);
        if from != to {
            info!("Desk link: {:?} -> {:?}", from, to);
        }
    }

    /// Connects to the desk at `address`
    ///
    /// Makes at most `initial_attempts` attempts. On success the height
    /// notifications and the liveness monitor are started and the link is
    /// kept up from then on.
    pub async fn connect(&self, address: &str) -> DeskResult<()> {
        if locked(&self.inner.supervisor).is_some() {
            info!("Desk link already managed, ignoring connect to {}", address);
            return Ok(());
        }

        *locked(&self.inner.address) = Some(address.to_string());
        self.transition(LinkState::Connecting);

        let attempts = self.inner.policy.initial_attempts.max(1);
        let mut last_error = None;

        for attempt in 1..=attempts {
            match self.establish(address).await {
                Ok(notifications) => {
                    info!("Successfully connected to desk {}", address);
                    let (lost_tx, lost_rx) = mpsc::unbounded_channel();
                    self.install_pump(notifications, lost_tx.clone());
                    self.start_supervisor(lost_tx, lost_rx);
                    return Ok(());
                }
                Err(e) => {
                    warn!("Connection attempt {} of {} failed: {}", attempt, attempts, e);
                    last_error = Some(e);

                    if attempt < attempts {
                        info!("Retrying connection in {:?}...", self.inner.policy.initial_backoff);
                        sleep(self.inner.policy.initial_backoff).await;
                    }
                }
            }
        }

        self.transition(LinkState::Disconnected);
        error!("Could not connect to desk after {} attempts", attempts);
        Err(DeskError::Connect {
            attempts,
            reason: last_error.map(|e| e.to_string()).unwrap_or_default(),
        })
    }

    /// One connect attempt, including the notification subscription
    async fn establish(&self, address: &str) -> DeskResult<mpsc::Receiver<Vec<u8>>> {
        debug!("Attempting to connect to desk {}", address);
        self.inner.adapter.connect(address).await?;
        self.inner.adapter.subscribe_height().await
    }

    /// Replaces the notification pump and marks the link connected.
    /// The pump reports its session number on `lost_tx` when it ends.
    fn install_pump(&self, notifications: mpsc::Receiver<Vec<u8>>, lost_tx: mpsc::UnboundedSender<u64>) {
        let generation = self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let handler = NotificationHandler::new(self.inner.bus.clone());
        let adapter = self.inner.adapter.clone();

        let pump = tokio::spawn(async move {
            let end = handler.process_notifications(adapter, notifications).await;
            debug!("Session {} ended: {:?}", generation, end);
            let _ = lost_tx.send(generation);
        });

        if let Some(old) = locked(&self.inner.pump).replace(pump) {
            old.abort();
        }
        self.transition(LinkState::Connected);
    }

    fn start_supervisor(&self, lost_tx: mpsc::UnboundedSender<u64>, lost_rx: mpsc::UnboundedReceiver<u64>) {
        let manager = self.clone();
        let handle = tokio::spawn(async move { manager.supervise(lost_tx, lost_rx).await });
        *locked(&self.inner.supervisor) = Some(handle);
    }

    /// Liveness monitor and reconnect loop, one persistent task
    async fn supervise(
        self,
        lost_tx: mpsc::UnboundedSender<u64>,
        mut lost_rx: mpsc::UnboundedReceiver<u64>,
    ) {
        info!("Liveness monitor started ({:?} interval)", self.inner.policy.monitor_interval);

        loop {
            let link_lost = tokio::select! {
                _ = self.inner.shutdown.cancelled() => break,
                Some(generation) = lost_rx.recv() => {
                    if generation != self.inner.generation.load(Ordering::SeqCst) {
                        debug!("Ignoring stale link loss from session {}", generation);
                        continue;
                    }
                    warn!("Desk disconnected");
                    true
                }
                _ = sleep(self.inner.policy.monitor_interval) => {
                    if self.inner.adapter.is_connected().await {
                        self.poll_height().await;
                        false
                    } else {
                        warn!("Liveness monitor found the desk disconnected");
                        true
                    }
                }
            };

            if link_lost && !self.reconnect(&lost_tx).await {
                break;
            }
        }
        info!("Liveness monitor stopped");
    }

    /// Retries until the desk is back. Returns false if shut down first.
    async fn reconnect(&self, lost_tx: &mpsc::UnboundedSender<u64>) -> bool {
        self.transition(LinkState::Reconnecting);
        if let Some(pump) = locked(&self.inner.pump).take() {
            pump.abort();
        }

        let Some(address) = self.address() else {
            error!("No desk address to reconnect to");
            return false;
        };

        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            self.inner.reconnect_attempts.fetch_add(1, Ordering::Relaxed);

            match self.establish(&address).await {
                Ok(notifications) => {
                    info!("Reconnected to desk after {} attempt(s)", attempt);
                    self.install_pump(notifications, lost_tx.clone());
                    return true;
                }
                Err(e) => {
                    warn!(
                        "Reconnect attempt {} failed: {}. Trying again in {:?}.",
                        attempt, e, self.inner.policy.reconnect_backoff
                    );
                    tokio::select! {
                        _ = self.inner.shutdown.cancelled() => return false,
                        _ = sleep(self.inner.policy.reconnect_backoff) => {}
                    }
                }
            }
        }
    }

    /// Reads the height and publishes it, keeping the link exercised
    async fn poll_height(&self) {
        match self.try_read_height().await {
            Ok(sample) => self.inner.bus.publish(DeskEvent::HeightChanged, sample),
            Err(e) => debug!("Liveness read failed: {}", e),
        }
    }

    async fn try_read_height(&self) -> DeskResult<HeightSample> {
        let raw = self.inner.adapter.read_height().await?;
        protocol::decode(&raw)
    }

    /// Current height, or a zero sample if the desk could not be read
    pub async fn read_height(&self) -> HeightSample {
        match self.try_read_height().await {
            Ok(sample) => sample,
            Err(e) => {
                error!("Failed to read desk height: {}", e);
                HeightSample::default()
            }
        }
    }

    /// Writes a motion command. Failures are logged and dropped.
    pub async fn send_command(&self, command: MotionCommand) {
        debug!("Sending command to desk: {:?}", command);
        if let Err(e) = self
            .inner
            .adapter
            .write_command(&protocol::encode_command(command))
            .await
        {
            error!("Failed to send {:?} to desk: {}", command, e);
        }
    }

    /// Stops the monitor and the notification pump, then disconnects
    pub async fn shutdown(&self) {
        info!("Shutting down desk link");
        self.inner.shutdown.cancel();

        let supervisor = locked(&self.inner.supervisor).take();
        if let Some(handle) = supervisor {
            if let Err(e) = handle.await {
                error!("Liveness monitor ended abnormally: {:?}", e);
            }
        }
        if let Some(pump) = locked(&self.inner.pump).take() {
            pump.abort();
        }
        if let Err(e) = self.inner.adapter.disconnect().await {
            error!("Failed to disconnect from desk: {}", e);
        }
        self.transition(LinkState::Disconnected);
    }
}
