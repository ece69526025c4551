//! Byte-scaled frequency analysis
//!
//! Mirrors a browser analyser node: Blackman-windowed FFT of the most recent
//! `FFT_SIZE` samples, magnitudes smoothed over time, converted to decibels
//! and mapped linearly onto `0..=255` between `MIN_DECIBELS` and
//! `MAX_DECIBELS`.

use rustfft::num_complex::Complex;
use rustfft::{Fft, FftPlanner};
use std::f32::consts::PI;
use std::sync::Arc;

/// Samples per analysis window
pub const FFT_SIZE: usize = 256;

/// Number of frequency bins produced per window
pub const BIN_COUNT: usize = FFT_SIZE / 2;

/// Bin-average level above which the user counts as speaking (0-255 scale)
pub const SPEAKING_THRESHOLD: f32 = 30.0;

const MIN_DECIBELS: f32 = -100.0;
const MAX_DECIBELS: f32 = -30.0;
const SMOOTHING: f32 = 0.8;

/// Frequency analyser over a fixed 256-sample window
pub struct FrequencyAnalyser {
    fft: Arc<dyn Fft<f32>>,
    window: Vec<f32>,
    buffer: Vec<Complex<f32>>,
    scratch: Vec<Complex<f32>>,
    smoothed: Vec<f32>,
    bytes: Vec<u8>,
}

impl std::fmt::Debug for FrequencyAnalyser {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrequencyAnalyser")
            .field("fft_size", &FFT_SIZE)
            .field("average_level", &self.average_level())
            .finish()
    }
}

impl Default for FrequencyAnalyser {
    fn default() -> Self {
        Self::new()
    }
}

impl FrequencyAnalyser {
    pub fn new() -> Self {
        let mut planner = FftPlanner::<f32>::new();
        let fft = planner.plan_fft_forward(FFT_SIZE);
        let scratch_len = fft.get_inplace_scratch_len();

        Self {
            fft,
            window: blackman_window(FFT_SIZE),
            buffer: vec![Complex::new(0.0, 0.0); FFT_SIZE],
            scratch: vec![Complex::new(0.0, 0.0); scratch_len],
            smoothed: vec![0.0; BIN_COUNT],
            bytes: vec![0; BIN_COUNT],
        }
    }

    /// Analyse the latest window and return its byte frequency data
    ///
    /// Uses the last `FFT_SIZE` samples of `samples`; a shorter input is
    /// zero-padded at the front.
    pub fn byte_frequency_data(&mut self, samples: &[f32]) -> &[u8] {
        let take = samples.len().min(FFT_SIZE);
        let offset = FFT_SIZE - take;
        let recent = &samples[samples.len() - take..];

        for (i, slot) in self.buffer.iter_mut().enumerate() {
            let sample = if i < offset { 0.0 } else { recent[i - offset] };
            *slot = Complex::new(sample * self.window[i], 0.0);
        }

        self.fft.process_with_scratch(&mut self.buffer, &mut self.scratch);

        let scale = 255.0 / (MAX_DECIBELS - MIN_DECIBELS);
        for k in 0..BIN_COUNT {
            let magnitude = self.buffer[k].norm() / FFT_SIZE as f32;
            let value = SMOOTHING * self.smoothed[k] + (1.0 - SMOOTHING) * magnitude;
            self.smoothed[k] = if value.is_finite() { value } else { 0.0 };

            let level = if self.smoothed[k] > 0.0 {
                let db = 20.0 * self.smoothed[k].log10();
                (scale * (db - MIN_DECIBELS)).clamp(0.0, 255.0)
            } else {
                0.0
            };
            self.bytes[k] = level as u8;
        }

        &self.bytes
    }

    /// Mean of the last byte frequency data
    pub fn average_level(&self) -> f32 {
        self.bytes.iter().map(|&b| b as f32).sum::<f32>() / BIN_COUNT as f32
    }

    /// Whether `level` counts as speech
    pub fn is_speaking_level(level: f32) -> bool {
        level > SPEAKING_THRESHOLD
    }

    /// Forget smoothing history
    pub fn reset(&mut self) {
        self.smoothed.iter_mut().for_each(|v| *v = 0.0);
        self.bytes.iter_mut().for_each(|b| *b = 0);
    }
}

fn blackman_window(len: usize) -> Vec<f32> {
    const A0: f32 = 0.42;
    const A1: f32 = 0.5;
    const A2: f32 = 0.08;
    (0..len)
        .map(|n| {
            let x = n as f32 / len as f32;
            A0 - A1 * (2.0 * PI * x).cos() + A2 * (4.0 * PI * x).cos()
        })
        .collect()
}
