//! Named, cancelable delayed callbacks
//! At most one timer is live per tag: scheduling a tag again cancels the old
//! timer and waits for it to stop before the new one is installed.

use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

use log::{debug, error, info};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep_until};
use tokio_util::sync::CancellationToken;

struct ScheduledTask {
    fire_at: Instant,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl ScheduledTask {
    fn is_pending(&self) -> bool {
        !self.handle.is_finished()
    }

    /// Cancels the timer and waits until its task has stopped
    async fn stop(self, tag: &str) {
        self.cancel.cancel();
        match self.handle.await {
            Ok(()) => debug!("Task {} stopped", tag),
            Err(e) if e.is_cancelled() => debug!("Task {} was aborted", tag),
            Err(e) => error!("Task {} ended abnormally: {:?}", tag, e),
        }
    }
}

#[derive(Default)]
pub struct Scheduler {
    tasks: Mutex<HashMap<String, ScheduledTask>>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `callback` once after `delay` unless the tag is cancelled or
    /// rescheduled first. The callback is spawned as its own task when the
    /// timer fires, so it may schedule further work, including on this tag.
    pub async fn schedule<F, Fut>(&self, tag: &str, delay: Duration, callback: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut tasks = self.tasks.lock().await;
        if let Some(previous) = tasks.remove(tag) {
            if previous.is_pending() {
                info!("Replacing pending task {}", tag);
            }
            previous.stop(tag).await;
        }

        let fire_at = Instant::now() + delay;
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let task_tag = tag.to_string();
        let handle = tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => info!("Task {} cancelled", task_tag),
                _ = sleep_until(fire_at) => {
                    info!("Task {} firing", task_tag);
                    tokio::spawn(callback());
                }
            }
        });

        info!("Task {} scheduled in {:?}", tag, delay);
        tasks.insert(tag.to_string(), ScheduledTask { fire_at, cancel, handle });
    }

    /// Cancels the timer for `tag`. Returns true if one was still pending.
    pub async fn cancel(&self, tag: &str) -> bool {
        let Some(task) = self.tasks.lock().await.remove(tag) else {
            return false;
        };
        let was_pending = task.is_pending();
        task.stop(tag).await;
        was_pending
    }

    pub async fn cancel_all(&self) {
        let drained: Vec<(String, ScheduledTask)> = self.tasks.lock().await.drain().collect();
        for (tag, task) in drained {
            task.stop(&tag).await;
        }
    }

    pub async fn is_pending(&self, tag: &str) -> bool {
        self.tasks
            .lock()
            .await
            .get(tag)
            .is_some_and(ScheduledTask::is_pending)
    }

    /// When the pending timer for `tag` fires
    pub async fn fire_at(&self, tag: &str) -> Option<Instant> {
        self.tasks
            .lock()
            .await
            .get(tag)
            .filter(|task| task.is_pending())
            .map(|task| task.fire_at)
    }

    /// Tags with a timer that has not fired or been cancelled
    pub async fn pending_tags(&self) -> Vec<String> {
        let mut tags: Vec<String> = self
            .tasks
            .lock()
            .await
            .iter()
            .filter(|(_, task)| task.is_pending())
            .map(|(tag, _)| tag.clone())
            .collect();
        tags.sort();
        tags
    }
}
