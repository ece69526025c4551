//! End-of-episode auto-advance countdown

use crate::party::Episode;
use std::future::Future;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant};
use tracing::{debug, info};

/// Observable countdown state
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CountdownState {
    Idle,
    Running { next: Episode, remaining_secs: u32 },
    Cancelled,
    /// The advance callback fired for `next`
    Advanced { next: Episode },
}

enum Control {
    Cancel,
    SkipNow,
}

/// A cancelable countdown that advances to `next` on expiry
///
/// The advance callback runs at most once: on expiry or on
/// [`AutoAdvanceCountdown::skip_now`], never after a cancel. Dropping the
/// handle cancels.
#[derive(Debug)]
pub struct AutoAdvanceCountdown {
    control: mpsc::UnboundedSender<Control>,
    state: watch::Receiver<CountdownState>,
    task: JoinHandle<()>,
}

impl AutoAdvanceCountdown {
    pub fn start<F, Fut>(next: Episode, secs: u32, on_advance: F) -> Self
    where
        F: FnOnce(Episode) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (control_tx, mut control_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(CountdownState::Running {
            next: next.clone(),
            remaining_secs: secs,
        });

        info!(next = %next.id, secs, "Auto-advance countdown started");

        let task = tokio::spawn(async move {
            let tick = Duration::from_secs(1);
            let mut ticker = interval_at(Instant::now() + tick, tick);
            let mut remaining = secs;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        remaining = remaining.saturating_sub(1);
                        if remaining == 0 {
                            break;
                        }
                        state_tx.send_replace(CountdownState::Running {
                            next: next.clone(),
                            remaining_secs: remaining,
                        });
                    }
                    control = control_rx.recv() => match control {
                        Some(Control::SkipNow) => break,
                        Some(Control::Cancel) | None => {
                            debug!(next = %next.id, "Auto-advance cancelled");
                            state_tx.send_replace(CountdownState::Cancelled);
                            return;
                        }
                    },
                }
            }

            state_tx.send_replace(CountdownState::Advanced { next: next.clone() });
            info!(next = %next.id, "Auto-advancing");
            on_advance(next).await;
        });

        Self {
            control: control_tx,
            state: state_rx,
            task,
        }
    }

    pub fn state(&self) -> CountdownState {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<CountdownState> {
        self.state.clone()
    }

    pub fn cancel(&self) {
        let _ = self.control.send(Control::Cancel);
    }

    /// Advance now without waiting for expiry
    pub fn skip_now(&self) {
        let _ = self.control.send(Control::SkipNow);
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Stop the countdown task immediately, whatever its state
    pub fn abort(&self) {
        self.task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::party::EpisodeId;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn next() -> Episode {
        Episode {
            id: EpisodeId::new("s1e2"),
            series_id: "show".to_string(),
            season_number: 1,
            episode_number: 2,
            title: "Second".to_string(),
        }
    }

    fn counting() -> (Arc<AtomicUsize>, impl FnOnce(Episode) -> std::future::Ready<()>) {
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = fired.clone();
        (fired, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            std::future::ready(())
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_expiry_fires_once() {
        let (fired, on_advance) = counting();
        let countdown = AutoAdvanceCountdown::start(next(), 5, on_advance);

        tokio::time::sleep(Duration::from_millis(2500)).await;
        assert_eq!(
            countdown.state(),
            CountdownState::Running {
                next: next(),
                remaining_secs: 3
            }
        );

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert_eq!(countdown.state(), CountdownState::Advanced { next: next() });
        assert!(countdown.is_finished());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_prevents_advance() {
        let (fired, on_advance) = counting();
        let countdown = AutoAdvanceCountdown::start(next(), 5, on_advance);

        tokio::time::sleep(Duration::from_secs(2)).await;
        countdown.cancel();
        tokio::time::sleep(Duration::from_secs(10)).await;

        assert_eq!(fired.load(Ordering::SeqCst), 0);
        assert_eq!(countdown.state(), CountdownState::Cancelled);
    }

    #[tokio::test(start_paused = true)]
    async fn test_skip_now_advances_immediately() {
        let (fired, on_advance) = counting();
        let countdown = AutoAdvanceCountdown::start(next(), 5, on_advance);

        countdown.skip_now();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);

        countdown.cancel();
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropping_handle_cancels() {
        let (fired, on_advance) = counting();
        drop(AutoAdvanceCountdown::start(next(), 2, on_advance));
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }
}
