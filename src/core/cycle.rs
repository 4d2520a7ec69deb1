//! Perpetual sit/stand rotation
//! Each firing moves the desk and then arms the opposite tag, so exactly one
//! of the two timers is pending between moves.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use log::{info, warn};
use serde::Serialize;

use crate::config::{ConfigStore, MAX_DURATION_MINUTES};
use crate::core::motion::{MoveController, MoveOutcome};
use crate::core::scheduler::Scheduler;

pub const SIT_TASK: &str = "sit_task";
pub const STAND_TASK: &str = "stand_task";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Posture {
    Sitting,
    Standing,
}

impl Posture {
    pub fn next(self) -> Self {
        match self {
            Self::Sitting => Self::Standing,
            Self::Standing => Self::Sitting,
        }
    }

    /// Scheduler tag of the timer that moves the desk into this posture
    pub fn task_tag(self) -> &'static str {
        match self {
            Self::Sitting => SIT_TASK,
            Self::Standing => STAND_TASK,
        }
    }
}

fn phase_length(minutes: u64) -> Duration {
    Duration::from_secs(minutes.min(MAX_DURATION_MINUTES).saturating_mul(60))
}

struct CycleInner {
    scheduler: Arc<Scheduler>,
    mover: Arc<MoveController>,
    config: Arc<ConfigStore>,
    posture: Mutex<Posture>,
}

#[derive(Clone)]
pub struct SitStandCycle {
    inner: Arc<CycleInner>,
}

impl SitStandCycle {
    pub fn new(scheduler: Arc<Scheduler>, mover: Arc<MoveController>, config: Arc<ConfigStore>) -> Self {
        Self {
            inner: Arc::new(CycleInner {
                scheduler,
                mover,
                config,
                posture: Mutex::new(Posture::Sitting),
            }),
        }
    }

    pub fn posture(&self) -> Posture {
        *self.inner.posture.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_posture(&self, posture: Posture) {
        *self.inner.posture.lock().unwrap_or_else(PoisonError::into_inner) = posture;
    }

    /// Begins in the sitting phase; the first stand is due after `sit_duration`
    pub async fn start(&self) {
        self.set_posture(Posture::Sitting);
        self.arm(Posture::Standing).await;
    }

    /// Re-arms whichever timer is pending so it uses the current durations.
    /// Does nothing while a cycle move is in flight; that move arms its
    /// successor from the updated config anyway.
    pub async fn reschedule(&self) {
        for posture in [Posture::Standing, Posture::Sitting] {
            if self.inner.scheduler.is_pending(posture.task_tag()).await {
                info!("Rescheduling {} with updated durations", posture.task_tag());
                self.arm(posture).await;
            }
        }
    }

    pub async fn stop(&self) {
        for tag in [SIT_TASK, STAND_TASK] {
            self.inner.scheduler.cancel(tag).await;
        }
    }

    /// Schedules the move into `posture` after the opposite phase has run its course
    fn arm(&self, posture: Posture) -> BoxFuture<'static, ()> {
        let cycle = self.clone();
        async move {
            let config = cycle.inner.config.get().await;
            let minutes = match posture {
                Posture::Standing => config.sit_duration,
                Posture::Sitting => config.stand_duration,
            };
            let fired = cycle.clone();
            cycle
                .inner
                .scheduler
                .schedule(posture.task_tag(), phase_length(minutes), move || {
                    fired.fire(posture)
                })
                .await;
        }
        .boxed()
    }

    fn fire(&self, posture: Posture) -> BoxFuture<'static, ()> {
        let cycle = self.clone();
        async move {
            let config = cycle.inner.config.get().await;
            let target_mm = match posture {
                Posture::Sitting => config.sit,
                Posture::Standing => config.stand,
            };
            info!("Moving desk to {:?} position", posture);
            cycle.set_posture(posture);

            match cycle.inner.mover.move_to(target_mm).await {
                MoveOutcome::Superseded => info!("Cycle move to {:?} was superseded", posture),
                MoveOutcome::TimedOut => warn!("Cycle move to {:?} timed out", posture),
                _ => {}
            }

            cycle.arm(posture.next()).await;
        }
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DeskConfig;
    use crate::core::bluetooth::connection::{ConnectionManager, RetryPolicy};
    use crate::core::bluetooth::protocol::{HeightSample, MotionCommand};
    use crate::core::events::DeskEvent;
    use crate::core::testing::MockDesk;
    use tokio::time::{Instant, sleep};

    struct Fixture {
        mock: Arc<MockDesk>,
        connection: ConnectionManager,
        scheduler: Arc<Scheduler>,
        config: Arc<ConfigStore>,
        cycle: SitStandCycle,
    }

    fn fixture() -> Fixture {
        let mock = Arc::new(MockDesk::new());
        mock.set_height(270.0, 0.0);
        let connection = ConnectionManager::new(mock.clone(), RetryPolicy::default());
        let mover = Arc::new(MoveController::new(connection.clone()));
        let scheduler = Arc::new(Scheduler::new());
        let config = Arc::new(ConfigStore::in_memory(DeskConfig {
            sit: 270.0,
            stand: 660.0,
            sit_duration: 1,
            stand_duration: 2,
            mac: String::new(),
        }));
        let cycle = SitStandCycle::new(scheduler.clone(), mover, config.clone());
        Fixture { mock, connection, scheduler, config, cycle }
    }

    /// Plays the desk reaching `height_mm`
    async fn arrive(fixture: &Fixture, height_mm: f64) {
        fixture.mock.set_height(height_mm, 0.0);
        fixture
            .connection
            .bus()
            .publish(DeskEvent::HeightChanged, HeightSample::new(height_mm, 0.0));
        sleep(Duration::from_millis(10)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_arms_stand_after_sit_duration() {
        let fixture = fixture();
        let start = Instant::now();
        fixture.cycle.start().await;

        assert_eq!(fixture.cycle.posture(), Posture::Sitting);
        assert_eq!(fixture.scheduler.pending_tags().await, vec![STAND_TASK]);
        assert_eq!(
            fixture.scheduler.fire_at(STAND_TASK).await,
            Some(start + Duration::from_secs(60))
        );
        assert!(fixture.mock.commands().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cycle_alternates_strictly() {
        let fixture = fixture();
        fixture.cycle.start().await;

        sleep(Duration::from_secs(61)).await;
        assert_eq!(fixture.mock.commands(), vec![MotionCommand::Up]);
        assert_eq!(fixture.cycle.posture(), Posture::Standing);
        assert!(fixture.scheduler.pending_tags().await.is_empty());

        arrive(&fixture, 660.0).await;
        assert_eq!(fixture.scheduler.pending_tags().await, vec![SIT_TASK]);

        sleep(Duration::from_secs(121)).await;
        assert_eq!(fixture.mock.commands(), vec![MotionCommand::Up, MotionCommand::Down]);
        assert_eq!(fixture.cycle.posture(), Posture::Sitting);

        arrive(&fixture, 270.0).await;
        assert_eq!(fixture.scheduler.pending_tags().await, vec![STAND_TASK]);

        sleep(Duration::from_secs(61)).await;
        assert_eq!(fixture.mock.commands().last(), Some(&MotionCommand::Up));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cycle_continues_when_desk_already_there() {
        let fixture = fixture();
        fixture.mock.set_height(660.0, 0.0);
        fixture.cycle.start().await;

        sleep(Duration::from_secs(61)).await;
        assert!(fixture.mock.commands().is_empty());
        assert_eq!(fixture.scheduler.pending_tags().await, vec![SIT_TASK]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reschedule_uses_new_duration() {
        let fixture = fixture();
        fixture.cycle.start().await;
        sleep(Duration::from_secs(30)).await;

        fixture.config.set_sit_duration(5).await.unwrap();
        let now = Instant::now();
        fixture.cycle.reschedule().await;

        assert_eq!(fixture.scheduler.pending_tags().await, vec![STAND_TASK]);
        assert_eq!(
            fixture.scheduler.fire_at(STAND_TASK).await,
            Some(now + Duration::from_secs(300))
        );

        sleep(Duration::from_secs(60)).await;
        assert!(fixture.mock.commands().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_oversized_duration_is_capped() {
        let fixture = fixture();
        fixture
            .config
            .update(|c| c.sit_duration = u64::MAX)
            .await
            .unwrap();
        let start = Instant::now();
        fixture.cycle.start().await;

        assert_eq!(
            fixture.scheduler.fire_at(STAND_TASK).await,
            Some(start + Duration::from_secs(MAX_DURATION_MINUTES * 60))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_cancels_pending_timer() {
        let fixture = fixture();
        fixture.cycle.start().await;
        fixture.cycle.stop().await;

        sleep(Duration::from_secs(600)).await;
        assert!(fixture.mock.commands().is_empty());
        assert!(fixture.scheduler.pending_tags().await.is_empty());
    }
}
