//! Peak level metering shared by the capture and playback paths.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Samples accumulated before a VU report is emitted (100 ms at 48 kHz).
pub const SAMPLE_COUNT_PER_EVENT: usize = 4800;

const MIN_DB: f64 = -40.0;
const MAX_DB: f64 = 0.0;
const VU_NOISE_FLOOR: f64 = 0.30;

/// One VU report.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct VolumeStreamArgs {
    /// Raw peak amplitude, 0..1
    pub peak_raw: f64,
    /// `20 * log10(peak_raw)`, negative infinity for silence
    pub peak_db: f64,
    /// Normalized meter value, 0..1
    pub peak_vu: f64,
}

pub type InputVolumeStreamArgs = VolumeStreamArgs;
pub type OutputVolumeStreamArgs = VolumeStreamArgs;

impl VolumeStreamArgs {
    pub fn from_peak(peak_raw: f64) -> Self {
        let peak_db = 20.0 * peak_raw.log10();
        Self {
            peak_raw,
            peak_db,
            peak_vu: vu_ratio(peak_db),
        }
    }
}

/// Map a peak dB value onto the meter. Values below the noise floor read as
/// exactly zero.
pub fn vu_ratio(peak_db: f64) -> f64 {
    if peak_db.is_nan() {
        return 0.0;
    }
    let db = peak_db.clamp(MIN_DB, MAX_DB);
    let ratio = (db - MIN_DB) / (MAX_DB - MIN_DB);
    if ratio < VU_NOISE_FLOOR { 0.0 } else { ratio }
}

/// Running peak tracker, reports once every `SAMPLE_COUNT_PER_EVENT` samples.
#[derive(Debug, Default)]
pub struct PeakMeter {
    max_sample: f32,
    sample_count: usize,
}

impl PeakMeter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed the absolute peak of a block of `samples` samples.
    pub fn push(&mut self, block_peak: f32, samples: usize) -> Option<VolumeStreamArgs> {
        if block_peak > self.max_sample {
            self.max_sample = block_peak;
        }
        self.sample_count += samples;

        if self.sample_count >= SAMPLE_COUNT_PER_EVENT {
            let args = VolumeStreamArgs::from_peak(self.max_sample as f64);
            self.max_sample = 0.0;
            self.sample_count = 0;
            Some(args)
        } else {
            None
        }
    }
}

/// Linear gain shared between the worker and an audio thread.
#[derive(Debug, Clone)]
pub struct GainControl(Arc<AtomicU64>);

impl GainControl {
    pub fn new(ratio: f64) -> Self {
        Self(Arc::new(AtomicU64::new(ratio.to_bits())))
    }

    pub fn get(&self) -> f64 {
        f64::from_bits(self.0.load(Ordering::Relaxed))
    }

    pub fn set(&self, ratio: f64) {
        self.0.store(ratio.to_bits(), Ordering::Relaxed);
    }
}

impl Default for GainControl {
    fn default() -> Self {
        Self::new(1.0)
    }
}

/// dB to linear amplitude ratio.
pub fn db_to_ratio(db: f64) -> f64 {
    10f64.powf(db / 20.0)
}
