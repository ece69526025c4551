//! Simulated video player on the tokio clock

use super::player::{PlayerEvent, VideoPlayer};
use crate::party::EpisodeId;
use crate::Result;
use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

/// Time-update cadence of a browser video element
const TIME_UPDATE_PERIOD: Duration = Duration::from_millis(250);

#[derive(Debug)]
struct Clock {
    base_time: f64,
    base_instant: Instant,
    paused: bool,
    ended: bool,
    episode: Option<EpisodeId>,
}

/// A [`VideoPlayer`] whose position advances with the tokio clock
///
/// `rate` above or below 1.0 makes the player drift, and `seek_latency`
/// delays the `Seeked` event the way buffering does.
#[derive(Debug)]
pub struct SimulatedPlayer {
    clock: Mutex<Clock>,
    rate: Mutex<f64>,
    seek_latency: Duration,
    duration_secs: Option<f64>,
    events: mpsc::UnboundedSender<PlayerEvent>,
}

impl SimulatedPlayer {
    pub fn new(
        rate: f64,
        seek_latency: Duration,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<PlayerEvent>) {
        Self::build(rate, seek_latency, None)
    }

    /// Player whose media ends after `duration_secs`
    pub fn with_duration(
        rate: f64,
        seek_latency: Duration,
        duration_secs: f64,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<PlayerEvent>) {
        Self::build(rate, seek_latency, Some(duration_secs))
    }

    fn build(
        rate: f64,
        seek_latency: Duration,
        duration_secs: Option<f64>,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<PlayerEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let player = Arc::new(Self {
            clock: Mutex::new(Clock {
                base_time: 0.0,
                base_instant: Instant::now(),
                paused: true,
                ended: false,
                episode: None,
            }),
            rate: Mutex::new(rate),
            seek_latency,
            duration_secs,
            events: tx,
        });
        (player, rx)
    }

    /// Spawn the time-update driver; it ends when the player is dropped
    pub fn start_clock(self: &Arc<Self>) -> JoinHandle<()> {
        let weak: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(TIME_UPDATE_PERIOD);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                let Some(player) = weak.upgrade() else { break };
                player.tick();
            }
        })
    }

    /// Report the initial media as ready to seek
    pub fn mark_ready(&self) {
        self.emit(PlayerEvent::CanSeek);
    }

    /// Change the playback rate, keeping the current position
    pub fn set_rate(&self, rate: f64) {
        let mut clock = self.clock.lock();
        let mut current = self.rate.lock();
        clock.base_time = position(&clock, *current, self.duration_secs);
        clock.base_instant = Instant::now();
        *current = rate;
    }

    pub fn episode(&self) -> Option<EpisodeId> {
        self.clock.lock().episode.clone()
    }

    fn tick(&self) {
        let rate = *self.rate.lock();
        let mut clock = self.clock.lock();
        if clock.paused {
            return;
        }
        let now = position(&clock, rate, self.duration_secs);
        if let Some(end) = self.duration_secs {
            if now >= end && !clock.ended {
                clock.base_time = end;
                clock.base_instant = Instant::now();
                clock.paused = true;
                clock.ended = true;
                drop(clock);
                self.emit(PlayerEvent::Pause);
                self.emit(PlayerEvent::Ended);
                return;
            }
        }
        drop(clock);
        self.emit(PlayerEvent::TimeUpdate(now));
    }

    fn emit(&self, event: PlayerEvent) {
        let _ = self.events.send(event);
    }
}

fn position(clock: &Clock, rate: f64, duration: Option<f64>) -> f64 {
    let t = if clock.paused {
        clock.base_time
    } else {
        clock.base_time + clock.base_instant.elapsed().as_secs_f64() * rate
    };
    match duration {
        Some(end) => t.min(end),
        None => t,
    }
}

impl VideoPlayer for SimulatedPlayer {
    fn current_time(&self) -> f64 {
        let rate = *self.rate.lock();
        position(&self.clock.lock(), rate, self.duration_secs)
    }

    fn is_paused(&self) -> bool {
        self.clock.lock().paused
    }

    fn play(&self) -> Result<()> {
        {
            let mut clock = self.clock.lock();
            if !clock.paused {
                return Ok(());
            }
            clock.base_instant = Instant::now();
            clock.paused = false;
            clock.ended = false;
        }
        self.emit(PlayerEvent::Play);
        Ok(())
    }

    fn pause(&self) {
        let rate = *self.rate.lock();
        {
            let mut clock = self.clock.lock();
            if clock.paused {
                return;
            }
            clock.base_time = position(&clock, rate, self.duration_secs);
            clock.paused = true;
        }
        self.emit(PlayerEvent::Pause);
    }

    fn seek(&self, secs: f64) {
        {
            let mut clock = self.clock.lock();
            clock.base_time = match self.duration_secs {
                Some(end) => secs.clamp(0.0, end),
                None => secs.max(0.0),
            };
            clock.base_instant = Instant::now();
            clock.ended = false;
        }

        if self.seek_latency.is_zero() {
            self.emit(PlayerEvent::Seeked);
        } else {
            let events = self.events.clone();
            let latency = self.seek_latency;
            tokio::spawn(async move {
                tokio::time::sleep(latency).await;
                let _ = events.send(PlayerEvent::Seeked);
            });
        }
    }

    fn load(&self, episode_id: &EpisodeId) {
        {
            let mut clock = self.clock.lock();
            clock.base_time = 0.0;
            clock.base_instant = Instant::now();
            clock.paused = true;
            clock.ended = false;
            clock.episode = Some(episode_id.clone());
        }
        self.emit(PlayerEvent::CanSeek);
    }
}
