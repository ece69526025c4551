//! Scriptable capture devices

use async_trait::async_trait;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use watchparty_core::vad::FFT_SIZE;
use watchparty_core::{AudioTap, SampleRing};
use watchparty_webrtc::{CaptureError, CaptureStream, MediaCapture, TrackKind};

/// Capture that can refuse permission per device class
///
/// Every audio stream shares one [`SampleRing`] so tests can make the
/// participant "speak". A held device class leaves `open` waiting, like an
/// unanswered permission prompt, until it is released.
pub struct FakeCapture {
    denied: Mutex<HashSet<TrackKind>>,
    held: Mutex<HashSet<TrackKind>>,
    prompts: AtomicUsize,
    opened: Mutex<HashMap<TrackKind, usize>>,
    live: Arc<AtomicUsize>,
    ring: Arc<SampleRing>,
}

impl FakeCapture {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            denied: Mutex::new(HashSet::new()),
            held: Mutex::new(HashSet::new()),
            prompts: AtomicUsize::new(0),
            opened: Mutex::new(HashMap::new()),
            live: Arc::new(AtomicUsize::new(0)),
            ring: Arc::new(SampleRing::new(FFT_SIZE * 4)),
        })
    }

    pub fn deny(&self, kind: TrackKind) {
        self.denied.lock().insert(kind);
    }

    pub fn allow(&self, kind: TrackKind) {
        self.denied.lock().remove(&kind);
    }

    /// Leave opens of `kind` pending until `release`
    pub fn hold(&self, kind: TrackKind) {
        self.held.lock().insert(kind);
    }

    pub fn release(&self, kind: TrackKind) {
        self.held.lock().remove(&kind);
    }

    fn is_held(&self, kind: TrackKind) -> bool {
        self.held.lock().contains(&kind)
    }

    /// Opens currently waiting on a held device
    pub fn prompts(&self) -> usize {
        self.prompts.load(Ordering::SeqCst)
    }

    /// Streams opened and not yet stopped
    pub fn live_streams(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    pub fn opened(&self, kind: TrackKind) -> usize {
        self.opened.lock().get(&kind).copied().unwrap_or(0)
    }

    /// Feed loud broadband noise into the microphone
    pub fn speak(&self) {
        let mut rng = StdRng::seed_from_u64(3);
        let samples: Vec<f32> = (0..FFT_SIZE * 4).map(|_| rng.gen_range(-0.5..0.5)).collect();
        self.ring.push(&samples);
    }

    pub fn fall_silent(&self) {
        self.ring.push(&[0.0; FFT_SIZE * 4]);
    }
}

#[async_trait]
impl MediaCapture for FakeCapture {
    async fn open(&self, kind: TrackKind) -> Result<Box<dyn CaptureStream>, CaptureError> {
        if self.is_held(kind) {
            self.prompts.fetch_add(1, Ordering::SeqCst);
            while self.is_held(kind) {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
            self.prompts.fetch_sub(1, Ordering::SeqCst);
        }
        if self.denied.lock().contains(&kind) {
            return Err(CaptureError::PermissionDenied);
        }
        *self.opened.lock().entry(kind).or_default() += 1;
        self.live.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeStream {
            live: self.live.clone(),
            stopped: AtomicBool::new(false),
            tap: (kind == TrackKind::Audio).then(|| self.ring.clone()),
        }))
    }
}

struct FakeStream {
    live: Arc<AtomicUsize>,
    stopped: AtomicBool,
    tap: Option<Arc<SampleRing>>,
}

impl CaptureStream for FakeStream {
    fn stop(&self) {
        if !self.stopped.swap(true, Ordering::SeqCst) {
            self.live.fetch_sub(1, Ordering::SeqCst);
        }
    }

    fn audio_tap(&self) -> Option<Arc<dyn AudioTap>> {
        self.tap.clone().map(|ring| ring as Arc<dyn AudioTap>)
    }
}
