//! Cancellable delayed tasks with debounce windows
//!
//! Refresh-after-event work (re-reading the authoritative score or the entity
//! snapshot after a confirmed transaction) goes through here instead of ad-hoc
//! sleeps, so a burst of triggers collapses into one run and everything
//! pending is cancelled when the owning session is torn down.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;
use tokio::task::AbortHandle;

/// Handle to one scheduled run
#[derive(Debug, Clone)]
pub struct ScheduledTask {
    handle: AbortHandle,
}

impl ScheduledTask {
    pub fn cancel(&self) {
        self.handle.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

#[derive(Default)]
pub struct Scheduler {
    debounced: Mutex<HashMap<String, AbortHandle>>,
    delayed: Mutex<Vec<AbortHandle>>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `task` once after `delay`
    pub fn schedule<F>(&self, delay: Duration, task: F) -> ScheduledTask
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            task.await;
        })
        .abort_handle();

        if let Ok(mut delayed) = self.delayed.lock() {
            delayed.retain(|h| !h.is_finished());
            delayed.push(handle.clone());
        }
        ScheduledTask { handle }
    }

    /// Run `task` once `window` has passed without another call for `key`.
    /// A new call replaces the pending run and restarts the window.
    pub fn debounce<F>(&self, key: &str, window: Duration, task: F) -> ScheduledTask
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(async move {
            tokio::time::sleep(window).await;
            task.await;
        })
        .abort_handle();

        if let Ok(mut debounced) = self.debounced.lock() {
            debounced.retain(|_, h| !h.is_finished());
            if let Some(previous) = debounced.insert(key.to_string(), handle.clone()) {
                previous.abort();
                log::debug!("Debounced pending '{}' run", key);
            }
        }
        ScheduledTask { handle }
    }

    /// Cancel the pending debounced run for `key`. Returns false when none
    /// was pending.
    pub fn cancel(&self, key: &str) -> bool {
        let Ok(mut debounced) = self.debounced.lock() else {
            return false;
        };
        match debounced.remove(key) {
            Some(handle) => {
                let pending = !handle.is_finished();
                handle.abort();
                pending
            }
            None => false,
        }
    }

    pub fn cancel_all(&self) {
        if let Ok(mut debounced) = self.debounced.lock() {
            for (_, handle) in debounced.drain() {
                handle.abort();
            }
        }
        if let Ok(mut delayed) = self.delayed.lock() {
            for handle in delayed.drain(..) {
                handle.abort();
            }
        }
    }

    pub fn pending_count(&self) -> usize {
        let debounced = self
            .debounced
            .lock()
            .map(|d| d.values().filter(|h| !h.is_finished()).count())
            .unwrap_or(0);
        let delayed = self
            .delayed
            .lock()
            .map(|d| d.iter().filter(|h| !h.is_finished()).count())
            .unwrap_or(0);
        debounced + delayed
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.cancel_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tokio::time::sleep;

    fn counter_task(counter: &Arc<AtomicUsize>) -> impl Future<Output = ()> + Send + 'static {
        let counter = counter.clone();
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn test_schedule_runs_after_delay() {
        let scheduler = Scheduler::new();
        let counter = Arc::new(AtomicUsize::new(0));

        let task = scheduler.schedule(Duration::from_millis(10), counter_task(&counter));
        sleep(Duration::from_millis(100)).await;

        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert!(task.is_finished());
    }

    #[tokio::test]
    async fn test_debounce_collapses_burst() {
        let scheduler = Scheduler::new();
        let counter = Arc::new(AtomicUsize::new(0));

        for _ in 0..5 {
            scheduler.debounce("score", Duration::from_millis(50), counter_task(&counter));
        }
        assert_eq!(scheduler.pending_count(), 1);

        sleep(Duration::from_millis(200)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert_eq!(scheduler.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_distinct_keys_run_independently() {
        let scheduler = Scheduler::new();
        let counter = Arc::new(AtomicUsize::new(0));

        scheduler.debounce("score", Duration::from_millis(10), counter_task(&counter));
        scheduler.debounce("snapshot", Duration::from_millis(10), counter_task(&counter));
        sleep(Duration::from_millis(100)).await;

        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_cancel_prevents_run() {
        let scheduler = Scheduler::new();
        let counter = Arc::new(AtomicUsize::new(0));

        scheduler.debounce("score", Duration::from_millis(30), counter_task(&counter));
        let delayed = scheduler.schedule(Duration::from_millis(30), counter_task(&counter));
        assert!(scheduler.cancel("score"));
        assert!(!scheduler.cancel("score"));
        delayed.cancel();

        sleep(Duration::from_millis(100)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_drop_cancels_pending() {
        let counter = Arc::new(AtomicUsize::new(0));
        {
            let scheduler = Scheduler::new();
            scheduler.debounce("score", Duration::from_millis(30), counter_task(&counter));
            scheduler.schedule(Duration::from_millis(30), counter_task(&counter));
        }
        sleep(Duration::from_millis(100)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }
}
