//! Voice activity detection
//!
//! The detector reads the latest captured samples on an animation-frame
//! cadence, averages byte-scaled FFT bin levels and reports speech when the
//! average exceeds [`SPEAKING_THRESHOLD`]. No hysteresis is applied beyond
//! the analyser's own temporal smoothing.

mod analyser;
mod monitor;
mod tap;

pub use analyser::{FrequencyAnalyser, BIN_COUNT, FFT_SIZE, SPEAKING_THRESHOLD};
pub use monitor::VoiceActivityMonitor;
pub use tap::{AudioTap, SampleRing};
