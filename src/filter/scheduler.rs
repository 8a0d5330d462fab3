//! Coalescing rescan scheduler.
//!
//! Mutations arrive in bursts while content streams in. Every schedule
//! call adds its root to a pending set; the first call after a flush arms
//! a single timer, and the flush hands the whole batch to the action at
//! once. Scheduling during a flush arms the next one.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use super::dom::NodeId;

type FlushAction = dyn Fn(Vec<NodeId>) + Send + Sync;

pub struct BatchScheduler {
    pending: Mutex<HashSet<NodeId>>,
    armed: AtomicBool,
    delay: Duration,
    action: Arc<FlushAction>,
}

impl BatchScheduler {
    pub fn new(delay: Duration, action: Arc<FlushAction>) -> Arc<Self> {
        Arc::new(Self {
            pending: Mutex::new(HashSet::new()),
            armed: AtomicBool::new(false),
            delay,
            action,
        })
    }

    pub fn schedule(self: &Arc<Self>, root: NodeId) {
        self.pending.lock().insert(root);
        if self.armed.swap(true, Ordering::AcqRel) {
            return;
        }
        let scheduler = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(scheduler.delay).await;
            // Disarm before draining so the action's own schedules (and
            // anything racing in) arm a fresh flush instead of vanishing.
            scheduler.armed.store(false, Ordering::Release);
            let roots: Vec<NodeId> = scheduler.pending.lock().drain().collect();
            if roots.is_empty() {
                return;
            }
            (scheduler.action)(roots);
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn recording() -> (Arc<Mutex<Vec<Vec<NodeId>>>>, Arc<FlushAction>) {
        let batches: Arc<Mutex<Vec<Vec<NodeId>>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&batches);
        let action: Arc<FlushAction> = Arc::new(move |mut roots: Vec<NodeId>| {
            roots.sort_unstable();
            sink.lock().push(roots);
        });
        (batches, action)
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_coalesces_into_one_flush() {
        let (batches, action) = recording();
        let scheduler = BatchScheduler::new(Duration::from_millis(16), action);

        scheduler.schedule(1);
        scheduler.schedule(2);
        scheduler.schedule(3);
        scheduler.schedule(2);
        tokio::time::sleep(Duration::from_millis(50)).await;

        let batches = batches.lock();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0], vec![1, 2, 3]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rearms_after_flush() {
        let (batches, action) = recording();
        let scheduler = BatchScheduler::new(Duration::from_millis(16), action);

        scheduler.schedule(1);
        tokio::time::sleep(Duration::from_millis(50)).await;
        scheduler.schedule(2);
        tokio::time::sleep(Duration::from_millis(50)).await;

        let batches = batches.lock();
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[0], vec![1]);
        assert_eq!(batches[1], vec![2]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_action_schedules_arm_next_flush() {
        let calls = Arc::new(AtomicUsize::new(0));
        let slot: Arc<Mutex<Option<Arc<BatchScheduler>>>> = Arc::new(Mutex::new(None));

        let counted = Arc::clone(&calls);
        let reentrant = Arc::clone(&slot);
        let action: Arc<FlushAction> = Arc::new(move |_roots| {
            // First flush queues more work from inside the action.
            if counted.fetch_add(1, Ordering::SeqCst) == 0 {
                if let Some(scheduler) = reentrant.lock().as_ref() {
                    scheduler.schedule(9);
                }
            }
        });
        let scheduler = BatchScheduler::new(Duration::from_millis(16), action);
        *slot.lock() = Some(Arc::clone(&scheduler));

        scheduler.schedule(1);
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        *slot.lock() = None;
    }
}
