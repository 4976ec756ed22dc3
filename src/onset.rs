//! Spectral Onset Detector — produces an onset-strength stream that peaks
//! at percussive events via half-wave-rectified spectral flux.
//!
//! Uses a Hamming window, an EWMA running-mean threshold, and a hop equal
//! to `FFT_SIZE` (no overlap) for predictability (see design notes).

use rustfft::{num_complex::Complex, FftPlanner};

use crate::config::OnsetConfig;

/// Slow EWMA coefficient for the running mean-flux threshold baseline.
const MEAN_FLUX_TAU_S: f32 = 2.0;

/// Fraction of the configured bin range (`min_bin..max_bin`) treated as the
/// "bass" band for the adaptive-threshold boost.
const BASS_BAND_FRACTION: f32 = 0.25;

/// How strongly bass energy above a uniform-spectrum baseline raises the
/// adaptive factor above `onset_factor`.
const BASS_BOOST_GAIN: f32 = 1.5;

/// How strongly ambient level (0..1) raises the adaptive factor above
/// `onset_factor`.
const LEVEL_BOOST_GAIN: f32 = 1.0;

/// Onset detector over a fixed-size sliding window of raw samples.
pub struct OnsetDetector {
    fft: std::sync::Arc<dyn rustfft::Fft<f32>>,
    window: Vec<f32>,
    ring: Vec<f32>,
    ring_len: usize,
    fft_size: usize,
    min_bin: usize,
    max_bin: usize,
    bass_end: usize,
    cooldown_ms: u32,
    onset_factor: f32,

    prev_magnitudes: Vec<f32>,
    scratch: Vec<Complex<f32>>,

    mean_flux: f32,
    last_flux: f32,
    ms_per_sample: f32,
    elapsed_ms: f64,
    last_onset_ms: Option<f64>,
}

impl OnsetDetector {
    pub fn new(sample_rate: u32, config: OnsetConfig) -> Self {
        let fft_size = config.fft_size.max(8);
        let mut planner = FftPlanner::<f32>::new();
        let fft = planner.plan_fft_forward(fft_size);

        // Hamming window, precomputed once.
        let window: Vec<f32> = (0..fft_size)
            .map(|i| {
                0.54 - 0.46 * (2.0 * std::f32::consts::PI * i as f32 / (fft_size as f32 - 1.0)).cos()
            })
            .collect();

        let bin_count = fft_size / 2 + 1;
        let min_bin = config.min_bin.min(bin_count.saturating_sub(1));
        let max_bin = config.max_bin.min(bin_count);
        // Low-bin sub-range treated as "bass" for the adaptive threshold;
        // at least one bin wide so a narrow configured range still works.
        let bass_end = (min_bin + (((max_bin - min_bin) as f32 * BASS_BAND_FRACTION).round() as usize).max(1)).min(max_bin);

        Self {
            fft,
            window,
            ring: vec![0.0; fft_size],
            ring_len: 0,
            fft_size,
            min_bin,
            max_bin,
            bass_end,
            cooldown_ms: config.cooldown_ms,
            onset_factor: config.onset_factor,
            prev_magnitudes: vec![0.0; bin_count],
            scratch: vec![Complex::new(0.0, 0.0); fft_size],
            mean_flux: 0.0,
            last_flux: 0.0,
            ms_per_sample: 1000.0 / sample_rate as f32,
            elapsed_ms: 0.0,
            last_onset_ms: None,
        }
    }

    /// Current (most recent) spectral flux, for telemetry/diagnostics.
    pub fn last_flux(&self) -> f32 {
        self.last_flux
    }

    /// Current running mean-flux baseline.
    pub fn mean_flux(&self) -> f32 {
        self.mean_flux
    }

    /// Append samples to the ring. Returns `true` once at least
    /// `fft_size` new samples have accumulated since the last `process`
    /// call and a frame is ready.
    ///
    /// hop = `fft_size` (no overlap) by default. A 50%-overlap variant
    /// would call `process` every `fft_size / 2` samples instead; rejected
    /// here for predictability.
    // TODO: revisit if onset latency at hop=256/16kHz (~16ms) proves too
    // coarse for fast transients.
    pub fn add_samples(&mut self, samples: &[i16]) -> bool {
        for &s in samples {
            self.elapsed_ms += self.ms_per_sample as f64;
            if self.ring_len < self.fft_size {
                self.ring[self.ring_len] = s as f32 / 32768.0;
                self.ring_len += 1;
            } else {
                self.ring.copy_within(1.., 0);
                self.ring[self.fft_size - 1] = s as f32 / 32768.0;
            }
        }
        self.ring_len >= self.fft_size
    }

    /// Consume the latest full frame and return the onset event, if any,
    /// together with the current flux value. `ambient_level` is the
    /// envelope's current level (0..1) for this frame. Must not be called
    /// unless the prior `add_samples` call returned `true`.
    ///
    /// The threshold factor is not the static `onset_factor`: it rises when
    /// bass energy is high or ambient level is high, so both a bass-energy
    /// ratio (derived from the low bins of this same frame) and
    /// `ambient_level` boost it above the configured baseline.
    pub fn process(&mut self, now_ms: f64, ambient_level: f32) -> (f32, bool) {
        for (i, &s) in self.ring.iter().enumerate() {
            self.scratch[i] = Complex::new(s * self.window[i], 0.0);
        }
        self.fft.process(&mut self.scratch);

        let mut flux = 0.0f32;
        let mut bass_energy = 0.0f32;
        let mut total_energy = 0.0f32;
        for k in self.min_bin..self.max_bin {
            let mag = self.scratch[k].norm();
            let diff = mag - self.prev_magnitudes[k];
            if diff > 0.0 {
                flux += diff;
            }
            total_energy += mag;
            if k < self.bass_end {
                bass_energy += mag;
            }
            self.prev_magnitudes[k] = mag;
        }
        self.last_flux = flux;

        // Reset ring occupancy so the next call waits for a fresh window
        // (hop = fft_size: no overlap retained between frames).
        self.ring_len = 0;

        let alpha = 1.0 - (-((self.fft_size as f32) * self.ms_per_sample) / 1000.0 / MEAN_FLUX_TAU_S).exp();
        self.mean_flux += alpha * (flux - self.mean_flux);

        // How much more energy sits in the bass band than a flat spectrum
        // would put there; zero when energy is evenly spread or silent.
        let bass_ratio = if total_energy > 0.0 { bass_energy / total_energy } else { 0.0 };
        let bass_band_bins = (self.bass_end - self.min_bin).max(1) as f32;
        let total_bins = (self.max_bin - self.min_bin).max(1) as f32;
        let uniform_bass_ratio = bass_band_bins / total_bins;
        let bass_excess = (bass_ratio - uniform_bass_ratio).max(0.0);

        let adaptive_factor =
            self.onset_factor + BASS_BOOST_GAIN * bass_excess + LEVEL_BOOST_GAIN * ambient_level.clamp(0.0, 1.0);

        let threshold = adaptive_factor * self.mean_flux;
        let cooldown_elapsed = match self.last_onset_ms {
            None => true,
            Some(last) => now_ms - last >= self.cooldown_ms as f64,
        };

        let onset = flux > threshold && cooldown_elapsed && self.mean_flux > 0.0;
        if onset {
            self.last_onset_ms = Some(now_ms);
        }
        (flux, onset)
    }

    /// Clear the prior-magnitude buffer so the next processed frame
    /// produces zero flux, as required when the sample ring is reset
    /// (e.g. a mode change).
    pub fn reset(&mut self) {
        self.prev_magnitudes.iter_mut().for_each(|m| *m = 0.0);
        self.ring_len = 0;
        self.last_flux = 0.0;
    }
}
