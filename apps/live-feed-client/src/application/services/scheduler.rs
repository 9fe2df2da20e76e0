//! Reconnect/Timeout Scheduler
//!
//! One timer slot per [`TimerKind`]. Scheduling a kind replaces its pending
//! timer; a fired timer delivers its event on the manager's event channel.
//! Events from timers that were replaced after they fired are filtered by the
//! state machine's timer ids.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::domain::connection::FeedEvent;

/// Kinds of timer the feed manager runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerKind {
    /// Delay before reconnecting after an abnormal close.
    Reconnect,
    /// Deadline for the first payload of a subscription.
    DataTimeout,
}

/// Single-slot-per-kind timer scheduler.
#[derive(Debug)]
pub struct Scheduler {
    events: mpsc::UnboundedSender<FeedEvent>,
    reconnect: Option<JoinHandle<()>>,
    data_timeout: Option<JoinHandle<()>>,
}

impl Scheduler {
    /// Create a scheduler delivering to `events`.
    #[must_use]
    pub const fn new(events: mpsc::UnboundedSender<FeedEvent>) -> Self {
        Self {
            events,
            reconnect: None,
            data_timeout: None,
        }
    }

    /// Deliver `event` after `delay`, replacing any pending timer of `kind`.
    pub fn schedule(&mut self, kind: TimerKind, delay: Duration, event: FeedEvent) {
        self.cancel(kind);

        let events = self.events.clone();
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = events.send(event);
        });
        *self.slot(kind) = Some(task);
    }

    /// Cancel the pending timer of `kind`, if any.
    pub fn cancel(&mut self, kind: TimerKind) {
        if let Some(task) = self.slot(kind).take() {
            task.abort();
        }
    }

    /// Cancel every pending timer.
    pub fn cancel_all(&mut self) {
        self.cancel(TimerKind::Reconnect);
        self.cancel(TimerKind::DataTimeout);
    }

    #[cfg(test)]
    fn is_pending(&self, kind: TimerKind) -> bool {
        let slot = match kind {
            TimerKind::Reconnect => &self.reconnect,
            TimerKind::DataTimeout => &self.data_timeout,
        };
        slot.as_ref().is_some_and(|task| !task.is_finished())
    }

    const fn slot(&mut self, kind: TimerKind) -> &mut Option<JoinHandle<()>> {
        match kind {
            TimerKind::Reconnect => &mut self.reconnect,
            TimerKind::DataTimeout => &mut self.data_timeout,
        }
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

    const WAIT: Duration = Duration::from_secs(60);

    #[tokio::test(start_paused = true)]
    async fn fires_after_delay() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut scheduler = Scheduler::new(tx);

        let start = tokio::time::Instant::now();
        scheduler.schedule(
            TimerKind::Reconnect,
            Duration::from_millis(1000),
            FeedEvent::ReconnectDue { timer: 1 },
        );
        assert!(scheduler.is_pending(TimerKind::Reconnect));

        assert_eq!(rx.recv().await, Some(FeedEvent::ReconnectDue { timer: 1 }));
        assert!(start.elapsed() >= Duration::from_millis(1000));
    }

    #[tokio::test(start_paused = true)]
    async fn rescheduling_replaces_pending_timer() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut scheduler = Scheduler::new(tx);

        scheduler.schedule(
            TimerKind::Reconnect,
            Duration::from_millis(1000),
            FeedEvent::ReconnectDue { timer: 1 },
        );
        scheduler.schedule(
            TimerKind::Reconnect,
            Duration::from_millis(1000),
            FeedEvent::ReconnectDue { timer: 2 },
        );

        assert_eq!(rx.recv().await, Some(FeedEvent::ReconnectDue { timer: 2 }));
        assert!(tokio::time::timeout(WAIT, rx.recv()).await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn kinds_are_independent() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut scheduler = Scheduler::new(tx);

        scheduler.schedule(
            TimerKind::DataTimeout,
            Duration::from_millis(5000),
            FeedEvent::DataTimeout { timer: 1 },
        );
        scheduler.schedule(
            TimerKind::Reconnect,
            Duration::from_millis(1000),
            FeedEvent::ReconnectDue { timer: 2 },
        );

        assert_eq!(rx.recv().await, Some(FeedEvent::ReconnectDue { timer: 2 }));
        assert_eq!(rx.recv().await, Some(FeedEvent::DataTimeout { timer: 1 }));
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_timer_never_fires() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut scheduler = Scheduler::new(tx);

        scheduler.schedule(
            TimerKind::DataTimeout,
            Duration::from_millis(5000),
            FeedEvent::DataTimeout { timer: 1 },
        );
        scheduler.cancel(TimerKind::DataTimeout);
        assert!(!scheduler.is_pending(TimerKind::DataTimeout));

        assert!(tokio::time::timeout(WAIT, rx.recv()).await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn drop_cancels_everything() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut scheduler = Scheduler::new(tx);
        scheduler.schedule(
            TimerKind::Reconnect,
            Duration::from_millis(1000),
            FeedEvent::ReconnectDue { timer: 1 },
        );

        drop(scheduler);
        assert_eq!(rx.recv().await, None);
    }
}
