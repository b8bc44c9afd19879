//! Cancellable background tasks for the train actors.
//!
//! Two primitives live here:
//!
//! - [`TaskSlot`] owns at most one spawned task. Replacing or cancelling it
//!   aborts the old task and awaits its termination, so the old task can no
//!   longer touch shared state once `cancel` returns.
//! - [`TimerSlot`] owns at most one task that reports back by message. Each
//!   arm bumps a generation counter that travels with the message; a message
//!   carrying an old generation is stale and is ignored by the receiver.
//!
//! Both are idempotent: cancelling an empty, finished or already-cancelled
//! slot is a no-op.

use std::future::Future;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Slot holding at most one spawned task.
#[derive(Debug, Default)]
pub struct TaskSlot {
    handle: Option<JoinHandle<()>>,
}

impl TaskSlot {
    /// Empty slot.
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancel the current task, then run `task` in the slot.
    pub async fn replace<F>(&mut self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.cancel().await;
        self.handle = Some(tokio::spawn(task));
    }

    /// Abort the task and wait until it has stopped.
    pub async fn cancel(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
            // Cancelled or already finished; either way it is gone.
            let _ = handle.await;
        }
    }

    /// True while a task is running in the slot.
    pub fn is_active(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }
}

/// Generation-checked slot for a task that reports by message.
#[derive(Debug, Default)]
pub struct TimerSlot {
    generation: u64,
    handle: Option<JoinHandle<()>>,
    deadline: Option<Instant>,
}

impl TimerSlot {
    /// Empty slot.
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancel whatever runs in the slot and spawn the future built by
    /// `task` for the new generation. Returns that generation.
    pub fn start<F, Fut>(&mut self, task: F) -> u64
    where
        F: FnOnce(u64) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.cancel();
        let generation = self.generation;
        self.handle = Some(tokio::spawn(task(generation)));
        generation
    }

    /// Send `message(generation)` on `tx` after `delay`.
    pub fn arm<M, F>(&mut self, delay: Duration, tx: mpsc::UnboundedSender<M>, message: F) -> u64
    where
        M: Send + 'static,
        F: FnOnce(u64) -> M + Send + 'static,
    {
        let generation = self.start(move |generation| async move {
            tokio::time::sleep(delay).await;
            // Receiver gone means the train has shut down.
            let _ = tx.send(message(generation));
        });
        self.deadline = Some(Instant::now() + delay);
        generation
    }

    /// Abort the task and invalidate any message it may already have sent.
    pub fn cancel(&mut self) {
        self.generation = self.generation.wrapping_add(1);
        self.deadline = None;
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }

    /// Accept a message for `generation`. Returns `false` for stale
    /// messages; on `true` the slot is emptied.
    pub fn accept(&mut self, generation: u64) -> bool {
        if self.handle.is_none() || generation != self.generation {
            return false;
        }
        self.handle = None;
        self.deadline = None;
        true
    }

    /// Time left until an armed timer fires.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }
}

impl Drop for TimerSlot {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    struct Fired(u64);

    #[tokio::test(start_paused = true)]
    async fn armed_timer_fires_once() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut slot = TimerSlot::new();
        let generation = slot.arm(Duration::from_millis(700), tx, Fired);
        assert_eq!(slot.remaining(), Some(Duration::from_millis(700)));

        let Fired(got) = rx.recv().await.unwrap();
        assert_eq!(got, generation);
        assert!(slot.accept(got));
        assert_eq!(slot.remaining(), None);
        assert!(!slot.accept(got));
    }

    #[tokio::test(start_paused = true)]
    async fn rearm_makes_old_message_stale() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut slot = TimerSlot::new();
        let first = slot.arm(Duration::from_millis(10), tx.clone(), Fired);
        tokio::time::sleep(Duration::from_millis(20)).await;

        // First message is already queued when the slot is re-armed.
        let second = slot.arm(Duration::from_millis(10), tx, Fired);
        assert_ne!(first, second);

        let Fired(got) = rx.recv().await.unwrap();
        assert_eq!(got, first);
        assert!(!slot.accept(got));
        let Fired(got) = rx.recv().await.unwrap();
        assert!(slot.accept(got));
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_is_idempotent() {
        let (tx, mut rx) = mpsc::unbounded_channel::<Fired>();
        let mut slot = TimerSlot::new();
        slot.arm(Duration::from_millis(10), tx, Fired);
        slot.cancel();
        slot.cancel();
        assert_eq!(slot.remaining(), None);
        tokio::time::sleep(Duration::from_millis(50)).await;
        // The aborted task dropped its sender without sending.
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn task_slot_cancel_waits_for_abort() {
        let counter = std::sync::Arc::new(std::sync::atomic::AtomicU32::new(0));
        let mut slot = TaskSlot::new();
        let c = counter.clone();
        slot.replace(async move {
            loop {
                c.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
        })
        .await;
        tokio::time::sleep(Duration::from_millis(250)).await;
        assert!(slot.is_active());

        slot.cancel().await;
        assert!(!slot.is_active());
        let seen = counter.load(std::sync::atomic::Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(counter.load(std::sync::atomic::Ordering::SeqCst), seen);
        slot.cancel().await;
    }
}
