//! Closed-loop move to a target height
//!
//! A single directional command only nudges the desk, so a move keeps
//! re-driving it while watching height telemetry until the desk is within
//! tolerance, stalls twice, or the safety timeout expires.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use log::{debug, info, warn};
use tokio::sync::mpsc;
use tokio::time::{Instant, sleep, sleep_until};
use tokio_util::sync::CancellationToken;

use crate::core::bluetooth::connection::ConnectionManager;
use crate::core::bluetooth::constants::{
    MOVE_TIMEOUT_SECS, MOVE_TOLERANCE_MM, REDRIVE_EVERY_SAMPLES, STALL_RETRY_DELAY_SECS,
};
use crate::core::bluetooth::protocol::{HeightSample, MotionCommand};
use crate::core::events::{DeskEvent, SubscriptionHandle};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Up,
    Down,
}

impl Direction {
    pub fn toward(target_mm: f64, current_mm: f64) -> Self {
        if target_mm < current_mm { Self::Down } else { Self::Up }
    }

    pub fn command(self) -> MotionCommand {
        match self {
            Self::Up => MotionCommand::Up,
            Self::Down => MotionCommand::Down,
        }
    }
}

pub fn within_tolerance(height_mm: f64, target_mm: f64) -> bool {
    (height_mm - target_mm).abs() <= MOVE_TOLERANCE_MM
}

/// What to do after a sample
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveStep {
    Continue,
    /// Re-send the directional command
    Redrive,
    /// Desk stopped short; wait, then re-send once
    RetryAfterStall,
    Arrived,
    /// Stopped short again after the retry
    GiveUp,
}

/// State of one move, owned by the task driving it
#[derive(Debug, Clone, PartialEq)]
pub struct MoveRequest {
    pub target_mm: f64,
    pub direction: Direction,
    /// Moving samples seen, neither arrived nor stalled
    pub samples_seen: u32,
    pub stall_retry_used: bool,
}

impl MoveRequest {
    pub fn new(target_mm: f64, current_mm: f64) -> Self {
        Self {
            target_mm,
            direction: Direction::toward(target_mm, current_mm),
            samples_seen: 0,
            stall_retry_used: false,
        }
    }

    pub fn observe(&mut self, sample: &HeightSample) -> MoveStep {
        if within_tolerance(sample.height_mm, self.target_mm) {
            return MoveStep::Arrived;
        }

        if sample.is_stationary() {
            if self.stall_retry_used {
                return MoveStep::GiveUp;
            }
            self.stall_retry_used = true;
            return MoveStep::RetryAfterStall;
        }

        self.samples_seen += 1;
        if self.samples_seen % REDRIVE_EVERY_SAMPLES == 0 {
            MoveStep::Redrive
        } else {
            MoveStep::Continue
        }
    }
}

/// How a call to `move_to` ended
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MoveOutcome {
    /// Already within tolerance, nothing was sent
    AlreadyAtTarget,
    Arrived { height_mm: f64 },
    /// Best effort: the desk stopped short of the target
    Stalled { height_mm: f64 },
    TimedOut,
    /// A newer move replaced this one
    Superseded,
}

#[derive(Debug, Clone, Copy)]
pub struct MoveSettings {
    pub stall_retry_delay: Duration,
    pub timeout: Duration,
}

impl Default for MoveSettings {
    fn default() -> Self {
        Self {
            stall_retry_delay: Duration::from_secs(STALL_RETRY_DELAY_SECS),
            timeout: Duration::from_secs(MOVE_TIMEOUT_SECS),
        }
    }
}

struct ActiveMove {
    id: u64,
    subscription: SubscriptionHandle,
    cancel: CancellationToken,
}

/// Drives the desk to target heights; at most one move is active
pub struct MoveController {
    connection: ConnectionManager,
    settings: MoveSettings,
    active: Mutex<Option<ActiveMove>>,
    next_id: AtomicU64,
}

impl MoveController {
    pub fn new(connection: ConnectionManager) -> Self {
        Self::with_settings(connection, MoveSettings::default())
    }

    pub fn with_settings(connection: ConnectionManager, settings: MoveSettings) -> Self {
        Self {
            connection,
            settings,
            active: Mutex::new(None),
            next_id: AtomicU64::new(1),
        }
    }

    fn active(&self) -> MutexGuard<'_, Option<ActiveMove>> {
        self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_moving(&self) -> bool {
        self.active().is_some()
    }

    /// Cancels the running move, if any, and removes its observer
    fn supersede_active(&self) {
        if let Some(previous) = self.active().take() {
            info!("Superseding move {}", previous.id);
            self.connection.bus().unsubscribe(&previous.subscription);
            previous.cancel.cancel();
        }
    }

    /// Removes the observer of move `id` unless a newer move already did
    fn finish(&self, id: u64) {
        let mut active = self.active();
        if active.as_ref().is_some_and(|m| m.id == id) {
            if let Some(done) = active.take() {
                self.connection.bus().unsubscribe(&done.subscription);
            }
        }
    }

    /// Moves the desk to `target_mm` (machine height)
    pub async fn move_to(&self, target_mm: f64) -> MoveOutcome {
        self.supersede_active();

        let start = self.connection.read_height().await;
        if within_tolerance(start.height_mm, target_mm) {
            debug!("Desk at {:.1}mm is already within tolerance of {:.1}mm", start.height_mm, target_mm);
            return MoveOutcome::AlreadyAtTarget;
        }

        let mut request = MoveRequest::new(target_mm, start.height_mm);
        let command = request.direction.command();
        info!(
            "Moving desk {:?} to {:.1}mm. Currently at {:.1}mm.",
            request.direction, target_mm, start.height_mm
        );

        // A move started while we read the height loses to this one
        self.supersede_active();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let cancel = CancellationToken::new();
        let (tx, mut samples) = mpsc::unbounded_channel();
        let subscription = self
            .connection
            .bus()
            .subscribe(DeskEvent::HeightChanged, move |sample| {
                let _ = tx.send(sample);
            });
        *self.active() = Some(ActiveMove {
            id,
            subscription,
            cancel: cancel.clone(),
        });

        let deadline = Instant::now() + self.settings.timeout;
        self.connection.send_command(command).await;

        let outcome = loop {
            let sample = tokio::select! {
                _ = cancel.cancelled() => break MoveOutcome::Superseded,
                _ = sleep_until(deadline) => break MoveOutcome::TimedOut,
                sample = samples.recv() => match sample {
                    Some(sample) => sample,
                    None => break MoveOutcome::Superseded,
                },
            };

            match request.observe(&sample) {
                MoveStep::Continue => {}
                MoveStep::Redrive => {
                    debug!("Redriving {:?} after {} samples", request.direction, request.samples_seen);
                    self.connection.send_command(command).await;
                }
                MoveStep::RetryAfterStall => {
                    info!("Desk stalled at {:.1}mm, retrying once", sample.height_mm);
                    tokio::select! {
                        _ = cancel.cancelled() => break MoveOutcome::Superseded,
                        _ = sleep(self.settings.stall_retry_delay) => {}
                    }
                    while samples.try_recv().is_ok() {}
                    self.connection.send_command(command).await;
                }
                MoveStep::Arrived => break MoveOutcome::Arrived { height_mm: sample.height_mm },
                MoveStep::GiveUp => break MoveOutcome::Stalled { height_mm: sample.height_mm },
            }
        };

        self.finish(id);
        match outcome {
            MoveOutcome::TimedOut => {
                warn!("Desk move did not complete within {:?}", self.settings.timeout);
                self.connection.send_command(MotionCommand::Stop).await;
            }
            MoveOutcome::Stalled { height_mm } => {
                warn!("Desk stopped at {:.1}mm, short of {:.1}mm", height_mm, target_mm)
            }
            _ => info!("Move {} finished: {:?}", id, outcome),
        }
        outcome
    }
}
