//! Audio taps feeding the detector

use parking_lot::Mutex;
use std::collections::VecDeque;

/// Source of the most recent captured PCM samples
pub trait AudioTap: Send + Sync {
    /// Copy up to `out.len()` of the newest samples into the tail of `out`
    ///
    /// Returns how many samples were written.
    fn read_latest(&self, out: &mut [f32]) -> usize;
}

/// Bounded ring of recent mono samples
#[derive(Debug)]
pub struct SampleRing {
    samples: Mutex<VecDeque<f32>>,
    capacity: usize,
}

impl SampleRing {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            samples: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
        }
    }

    /// Append captured samples, evicting the oldest beyond capacity
    pub fn push(&self, chunk: &[f32]) {
        let mut samples = self.samples.lock();
        let skip = chunk.len().saturating_sub(self.capacity);
        for &s in &chunk[skip..] {
            if samples.len() == self.capacity {
                samples.pop_front();
            }
            samples.push_back(s);
        }
    }

    pub fn clear(&self) {
        self.samples.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.samples.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl AudioTap for SampleRing {
    fn read_latest(&self, out: &mut [f32]) -> usize {
        let samples = self.samples.lock();
        let n = samples.len().min(out.len());
        let start = out.len() - n;
        for (slot, &s) in out[start..].iter_mut().zip(samples.iter().skip(samples.len() - n)) {
            *slot = s;
        }
        n
    }
}
