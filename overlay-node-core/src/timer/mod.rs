//! Periodic timeouts delivered as events into a channel.
//!
//! Every scheduled timeout is represented by a [`TimerHandle`]. Cancelling or
//! dropping the handle stops the timeout, so a node that goes away can never
//! be woken up by its own timers.

use std::time::Duration;
use tokio::sync::mpsc::Sender;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

#[derive(Debug)]
pub struct TimerHandle {
    handle: JoinHandle<()>,
}

impl TimerHandle {
    pub fn cancel(self) {
        // dropping aborts
    }
}

impl Drop for TimerHandle {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

#[derive(Clone)]
pub struct TimerService<E> {
    sender: Sender<E>,
}

impl<E: Send + 'static> TimerService<E> {
    pub fn new(sender: Sender<E>) -> Self {
        Self { sender }
    }

    /// Deliver `event()` after `delay` and then every `period`.
    pub fn schedule_periodic<F>(&self, delay: Duration, period: Duration, event: F) -> TimerHandle
    where
        F: Fn() -> E + Send + 'static,
    {
        let sender = self.sender.clone();
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval_at(Instant::now() + delay, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                if sender.send(event()).await.is_err() {
                    log::debug!("periodic timeout stopped, receiver closed");
                    break;
                }
            }
        });
        TimerHandle { handle }
    }
}

#[cfg(test)]
mod tests {
    use super::TimerService;
    use std::time::Duration;

    #[tokio::test]
    async fn periodic_fires_until_cancelled() {
        let (sender, mut receiver) = tokio::sync::mpsc::channel(16);
        let timer = TimerService::new(sender);
        let handle = timer.schedule_periodic(
            Duration::from_millis(10),
            Duration::from_millis(10),
            || 7u32,
        );
        for _ in 0..3 {
            let v = tokio::time::timeout(Duration::from_secs(1), receiver.recv())
                .await
                .unwrap();
            assert_eq!(v, Some(7));
        }
        handle.cancel();
        tokio::time::sleep(Duration::from_millis(20)).await;
        while receiver.try_recv().is_ok() {}
        let rs = tokio::time::timeout(Duration::from_millis(50), receiver.recv()).await;
        assert!(rs.is_err());
    }

    #[tokio::test]
    async fn dropped_before_first_tick_never_fires() {
        let (sender, mut receiver) = tokio::sync::mpsc::channel(16);
        let timer = TimerService::new(sender);
        let late = timer.schedule_periodic(
            Duration::from_millis(20),
            Duration::from_millis(20),
            || "late",
        );
        drop(late);
        let _on_time = timer.schedule_periodic(
            Duration::from_millis(5),
            Duration::from_secs(60),
            || "on time",
        );
        let v = tokio::time::timeout(Duration::from_secs(1), receiver.recv())
            .await
            .unwrap();
        assert_eq!(v, Some("on time"));
        assert!(tokio::time::timeout(Duration::from_millis(50), receiver.recv())
            .await
            .is_err());
    }
}
