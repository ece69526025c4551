//! Sampling loop publishing the speaking flag

use super::analyser::{FrequencyAnalyser, FFT_SIZE};
use super::tap::AudioTap;
use crate::config::VadConfig;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::debug;

/// Voice activity detector over a live audio tap
///
/// Samples the tap every `sample_interval_ms` while listening and publishes
/// `average > 30` as the speaking flag. Stopping ends the loop at once and
/// forces the flag to `false`.
pub struct VoiceActivityMonitor {
    listening: Arc<AtomicBool>,
    speaking_tx: Arc<watch::Sender<bool>>,
    speaking_rx: watch::Receiver<bool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for VoiceActivityMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VoiceActivityMonitor")
            .field("listening", &self.is_listening())
            .field("speaking", &self.is_speaking())
            .finish()
    }
}

impl VoiceActivityMonitor {
    /// Start sampling `tap`; must be called inside a tokio runtime
    pub fn start(tap: Arc<dyn AudioTap>, config: &VadConfig) -> Self {
        let listening = Arc::new(AtomicBool::new(true));
        let (tx, rx) = watch::channel(false);
        let speaking_tx = Arc::new(tx);

        let task = tokio::spawn(sample_loop(
            tap,
            config.sample_interval(),
            listening.clone(),
            speaking_tx.clone(),
        ));

        Self {
            listening,
            speaking_tx,
            speaking_rx: rx,
            task: Mutex::new(Some(task)),
        }
    }

    pub fn is_speaking(&self) -> bool {
        *self.speaking_rx.borrow()
    }

    pub fn is_listening(&self) -> bool {
        self.listening.load(Ordering::Acquire)
    }

    /// Receiver notified whenever the speaking flag flips
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.speaking_tx.subscribe()
    }

    /// Stop sampling immediately
    pub fn stop(&self) {
        if !self.listening.swap(false, Ordering::AcqRel) {
            return;
        }
        if let Some(task) = self.task.lock().take() {
            task.abort();
        }
        self.speaking_tx.send_replace(false);
        debug!("Voice activity monitor stopped");
    }
}

impl Drop for VoiceActivityMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn sample_loop(
    tap: Arc<dyn AudioTap>,
    period: std::time::Duration,
    listening: Arc<AtomicBool>,
    speaking: Arc<watch::Sender<bool>>,
) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let mut analyser = FrequencyAnalyser::new();
    let mut window = vec![0.0f32; FFT_SIZE];

    loop {
        ticker.tick().await;
        if !listening.load(Ordering::Acquire) {
            break;
        }

        window.fill(0.0);
        tap.read_latest(&mut window);
        analyser.byte_frequency_data(&window);
        let now_speaking = FrequencyAnalyser::is_speaking_level(analyser.average_level());

        speaking.send_if_modified(|current| {
            if *current != now_speaking {
                *current = now_speaking;
                true
            } else {
                false
            }
        });
    }
}
