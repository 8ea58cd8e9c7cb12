use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::sleep;

/// Scheduled callbacks expressed as messages posted back to the worker after a delay.
#[derive(Debug, Clone)]
pub struct Scheduler<T> {
    tx: mpsc::UnboundedSender<T>,
}

impl<T: Send + 'static> Scheduler<T> {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<T>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Deliver `tick` once `delay` has elapsed. Never blocks the caller.
    pub fn start(&self, delay: Duration, tick: T) -> JoinHandle<()> {
        let tx = self.tx.clone();
        tokio::spawn(async move {
            sleep(delay).await;
            let _ = tx.send(tick);
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::Instant;

    #[tokio::test(start_paused = true)]
    async fn delivers_after_delay() {
        let (scheduler, mut rx) = Scheduler::channel();
        let started = Instant::now();
        scheduler.start(Duration::from_secs(5), "late");
        scheduler.start(Duration::from_secs(1), "early");

        assert_eq!(rx.recv().await, Some("early"));
        assert!(started.elapsed() >= Duration::from_secs(1));
        assert_eq!(rx.recv().await, Some("late"));
        assert!(started.elapsed() >= Duration::from_secs(5));
    }
}
