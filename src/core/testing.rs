//! In-memory desk for unit tests

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use tokio::sync::{Notify, mpsc};
use tokio::time::Instant;

use crate::core::bluetooth::adapter::DeskAdapter;
use crate::core::bluetooth::protocol::{MotionCommand, encode_sample};
use crate::core::error::{DeskError, DeskResult};

struct MockState {
    /// Outcomes for the next connect calls; succeeds once empty
    connect_script: VecDeque<bool>,
    connect_calls: u32,
    connect_times: Vec<Instant>,
    connected: bool,
    subscriptions: u32,
    height: Vec<u8>,
    read_fails: bool,
    write_fails: bool,
    writes: Vec<(Instant, Vec<u8>)>,
    notify_tx: Option<mpsc::Sender<Vec<u8>>>,
}

pub(crate) struct MockDesk {
    state: Mutex<MockState>,
    link_dropped: Notify,
}

impl MockDesk {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(MockState {
                connect_script: VecDeque::new(),
                connect_calls: 0,
                connect_times: Vec::new(),
                connected: false,
                subscriptions: 0,
                height: encode_sample(0.0, 0.0),
                read_fails: false,
                write_fails: false,
                writes: Vec::new(),
                notify_tx: None,
            }),
            link_dropped: Notify::new(),
        }
    }

    pub(crate) fn script_connects(&self, outcomes: &[bool]) {
        self.state.lock().unwrap().connect_script.extend(outcomes.iter().copied());
    }

    pub(crate) fn connect_calls(&self) -> u32 {
        self.state.lock().unwrap().connect_calls
    }

    pub(crate) fn connect_times(&self) -> Vec<Instant> {
        self.state.lock().unwrap().connect_times.clone()
    }

    pub(crate) fn subscriptions(&self) -> u32 {
        self.state.lock().unwrap().subscriptions
    }

    pub(crate) fn set_height(&self, height_mm: f64, speed_mm_s: f64) {
        self.state.lock().unwrap().height = encode_sample(height_mm, speed_mm_s);
    }

    pub(crate) fn set_raw_height(&self, raw: &[u8]) {
        self.state.lock().unwrap().height = raw.to_vec();
    }

    pub(crate) fn set_read_fails(&self, fails: bool) {
        self.state.lock().unwrap().read_fails = fails;
    }

    pub(crate) fn set_write_fails(&self, fails: bool) {
        self.state.lock().unwrap().write_fails = fails;
    }

    /// Decoded commands written so far
    pub(crate) fn commands(&self) -> Vec<MotionCommand> {
        self.state
            .lock()
            .unwrap()
            .writes
            .iter()
            .filter_map(|(_, raw)| match u16::from_le_bytes([raw[0], raw[1]]) {
                71 => Some(MotionCommand::Up),
                70 => Some(MotionCommand::Down),
                255 => Some(MotionCommand::Stop),
                _ => None,
            })
            .collect()
    }

    pub(crate) fn write_times(&self) -> Vec<Instant> {
        self.state.lock().unwrap().writes.iter().map(|(at, _)| *at).collect()
    }

    /// Pushes a notification through the current subscription
    pub(crate) async fn notify(&self, height_mm: f64, speed_mm_s: f64) {
        self.notify_raw(encode_sample(height_mm, speed_mm_s)).await;
    }

    pub(crate) async fn notify_raw(&self, raw: Vec<u8>) {
        let tx = self.state.lock().unwrap().notify_tx.clone();
        if let Some(tx) = tx {
            let _ = tx.send(raw).await;
        }
    }

    /// Reports the link as down without signalling a disconnect event
    pub(crate) fn go_silent(&self) {
        self.state.lock().unwrap().connected = false;
    }

    /// Fires the disconnect event only
    pub(crate) fn signal_disconnect(&self) {
        self.link_dropped.notify_waiters();
    }

    /// Drops the link the way a desk walking out of range would
    pub(crate) fn drop_link(&self) {
        {
            let mut state = self.state.lock().unwrap();
            state.connected = false;
            state.notify_tx = None;
        }
        self.link_dropped.notify_waiters();
    }
}

#[async_trait::async_trait]
impl DeskAdapter for MockDesk {
    async fn connect(&self, address: &str) -> DeskResult<()> {
        tokio::time::sleep(Duration::from_millis(1)).await;
        let mut state = self.state.lock().unwrap();
        state.connect_calls += 1;
        state.connect_times.push(Instant::now());
        let ok = state.connect_script.pop_front().unwrap_or(true);
        if ok {
            state.connected = true;
            Ok(())
        } else {
            Err(DeskError::DeviceNotFound(address.to_string()))
        }
    }

    async fn is_connected(&self) -> bool {
        self.state.lock().unwrap().connected
    }

    async fn read_height(&self) -> DeskResult<Vec<u8>> {
        let state = self.state.lock().unwrap();
        if state.read_fails {
            return Err(DeskError::NotConnected);
        }
        Ok(state.height.clone())
    }

    async fn write_command(&self, data: &[u8]) -> DeskResult<()> {
        let mut state = self.state.lock().unwrap();
        if state.write_fails {
            return Err(DeskError::NotConnected);
        }
        state.writes.push((Instant::now(), data.to_vec()));
        Ok(())
    }

    async fn subscribe_height(&self) -> DeskResult<mpsc::Receiver<Vec<u8>>> {
        let (tx, rx) = mpsc::channel(16);
        let mut state = self.state.lock().unwrap();
        state.subscriptions += 1;
        state.notify_tx = Some(tx);
        Ok(rx)
    }

    async fn wait_for_disconnect(&self) {
        self.link_dropped.notified().await;
    }

    async fn disconnect(&self) -> DeskResult<()> {
        let mut state = self.state.lock().unwrap();
        state.connected = false;
        state.notify_tx = None;
        Ok(())
    }
}
