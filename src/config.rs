//! Configuration for the beat-tracking core.
//!
//! Parameters are loaded from a JSON file with a graceful fallback to
//! defaults, enabling fast iteration without recompilation. Every field
//! has a documented range; out-of-range values are clamped on ingress
//! rather than rejected (see `clamped`).

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Complete core configuration, one sub-config per component.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoreConfig {
    pub envelope: EnvelopeConfig,
    pub onset: OnsetConfig,
    pub tempo: TempoConfig,
}

/// Envelope follower, adaptive range, auto-gain, and compressor parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvelopeConfig {
    /// Level below which post-AGC output clamps to 0.
    pub noise_gate: f32,
    /// Envelope follower attack time constant, seconds.
    pub attack_tau: f32,
    /// Envelope follower release time constant, seconds.
    pub release_tau: f32,
    /// Software-auto-gain target level.
    pub ag_target: f32,
    /// Software-gain clamp, lower bound.
    pub ag_min: f32,
    /// Software-gain clamp, upper bound.
    pub ag_max: f32,
    /// Compressor knee threshold.
    pub comp_threshold: f32,
    /// Compressor ratio (>= 1).
    pub comp_ratio: f32,
    /// Hardware-gain calibration step size.
    pub hw_gain_step: u8,
    /// Hardware-gain calibration period, milliseconds.
    pub hw_cal_period_ms: u32,
}

impl Default for EnvelopeConfig {
    fn default() -> Self {
        Self {
            noise_gate: 0.06,
            attack_tau: 0.08,
            release_tau: 0.30,
            ag_target: 0.35,
            ag_min: 0.5,
            ag_max: 3.0,
            comp_threshold: 0.7,
            comp_ratio: 3.0,
            hw_gain_step: 2,
            hw_cal_period_ms: 2000,
        }
    }
}

impl EnvelopeConfig {
    /// Clamp every field to its documented range, logging once per violation.
    pub fn clamped(mut self) -> Self {
        clamp_field("noise_gate", &mut self.noise_gate, 0.0, 0.5);
        clamp_field("attack_tau", &mut self.attack_tau, 0.001, 10.0);
        clamp_field("release_tau", &mut self.release_tau, 0.001, 10.0);
        clamp_field("ag_target", &mut self.ag_target, 0.1, 0.95);
        clamp_field("ag_min", &mut self.ag_min, 0.01, 100.0);
        clamp_field("ag_max", &mut self.ag_max, self.ag_min, 100.0);
        clamp_field("comp_threshold", &mut self.comp_threshold, 0.0, 1.0);
        clamp_field("comp_ratio", &mut self.comp_ratio, 1.0, 100.0);
        let mut step = self.hw_gain_step as f32;
        clamp_field("hw_gain_step", &mut step, 1.0, 80.0);
        self.hw_gain_step = step as u8;
        let mut period = self.hw_cal_period_ms as f32;
        clamp_field("hw_cal_period_ms", &mut period, 100.0, 60_000.0);
        self.hw_cal_period_ms = period as u32;
        self
    }
}

/// Spectral onset detection parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OnsetConfig {
    /// Minimum interval between detected onsets, milliseconds.
    pub cooldown_ms: u32,
    /// Multiplier of running mean-flux required to raise an onset.
    pub onset_factor: f32,
    /// FFT window size in samples.
    pub fft_size: usize,
    /// Lowest FFT bin index included in the flux sum.
    pub min_bin: usize,
    /// Highest FFT bin index included in the flux sum (exclusive).
    pub max_bin: usize,
}

impl Default for OnsetConfig {
    fn default() -> Self {
        Self {
            cooldown_ms: 80,
            onset_factor: 2.0,
            fft_size: 256,
            min_bin: 1,
            max_bin: 64,
        }
    }
}

impl OnsetConfig {
    pub fn clamped(mut self) -> Self {
        let mut cooldown = self.cooldown_ms as f32;
        clamp_field("cooldown_ms", &mut cooldown, 20.0, 5000.0);
        self.cooldown_ms = cooldown as u32;
        clamp_field("onset_factor", &mut self.onset_factor, 1.01, 20.0);
        if self.fft_size < 8 {
            log::warn!(
                "[Config] fft_size {} below minimum, clamped to 8",
                self.fft_size
            );
            self.fft_size = 8;
        }
        let nyquist_bin = self.fft_size / 2 + 1;
        if self.max_bin > nyquist_bin {
            log::warn!(
                "[Config] max_bin {} exceeds nyquist bin {}, clamped",
                self.max_bin,
                nyquist_bin
            );
            self.max_bin = nyquist_bin;
        }
        if self.min_bin >= self.max_bin {
            log::warn!(
                "[Config] min_bin {} >= max_bin {}, reset to 1",
                self.min_bin,
                self.max_bin
            );
            self.min_bin = 1;
        }
        self
    }
}

/// Tempo and phase tracking parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TempoConfig {
    pub bpm_min: f32,
    pub bpm_max: f32,
    pub activation_threshold: f32,
    pub min_beats_to_activate: u32,
    pub max_missed_beats: u32,
    pub pll_kp: f32,
    pub pll_ki: f32,
    pub phase_snap_threshold: f32,
    pub phase_snap_confidence: f32,
    pub comb_feedback: f32,
    pub comb_decay: f32,
    pub bpm_lock_max_change: f32,
    /// Hysteresis thresholds for `bpm_locked` (lock_threshold > unlock_threshold).
    pub lock_threshold: f32,
    pub unlock_threshold: f32,
    /// Authority handoff: comb bank only updates BPM below this confidence.
    pub comb_conf_threshold: f32,
    /// Number of comb resonator hypotheses spanning [bpm_min, bpm_max].
    pub num_filters: usize,
    /// Blend factor for histogram-derived BPM candidates.
    pub histogram_beta: f32,
}

impl Default for TempoConfig {
    fn default() -> Self {
        Self {
            bpm_min: 60.0,
            bpm_max: 200.0,
            activation_threshold: 0.6,
            min_beats_to_activate: 4,
            max_missed_beats: 8,
            pll_kp: 0.08,
            pll_ki: 0.002,
            phase_snap_threshold: 0.25,
            phase_snap_confidence: 0.4,
            comb_feedback: 0.5,
            comb_decay: 0.95,
            bpm_lock_max_change: 20.0,
            lock_threshold: 0.75,
            unlock_threshold: 0.5,
            comb_conf_threshold: 0.5,
            num_filters: 64,
            histogram_beta: 0.15,
        }
    }
}

impl TempoConfig {
    pub fn clamped(mut self) -> Self {
        clamp_field("bpm_min", &mut self.bpm_min, 20.0, 300.0);
        clamp_field("bpm_max", &mut self.bpm_max, self.bpm_min, 400.0);
        clamp_field(
            "activation_threshold",
            &mut self.activation_threshold,
            0.0,
            1.0,
        );
        if self.min_beats_to_activate < 1 {
            log::warn!("[Config] min_beats_to_activate clamped to 1");
            self.min_beats_to_activate = 1;
        }
        if self.max_missed_beats < 1 {
            log::warn!("[Config] max_missed_beats clamped to 1");
            self.max_missed_beats = 1;
        }
        clamp_field("pll_kp", &mut self.pll_kp, 0.0, 10.0);
        clamp_field("pll_ki", &mut self.pll_ki, 0.0, 10.0);
        clamp_field(
            "phase_snap_threshold",
            &mut self.phase_snap_threshold,
            0.0,
            0.5,
        );
        clamp_field(
            "phase_snap_confidence",
            &mut self.phase_snap_confidence,
            0.0,
            1.0,
        );
        clamp_field("comb_feedback", &mut self.comb_feedback, 0.0, 1.0);
        clamp_field("comb_decay", &mut self.comb_decay, 0.0, 0.999);
        clamp_field("bpm_lock_max_change", &mut self.bpm_lock_max_change, 0.0, 1000.0);
        clamp_field("unlock_threshold", &mut self.unlock_threshold, 0.0, 1.0);
        clamp_field(
            "lock_threshold",
            &mut self.lock_threshold,
            self.unlock_threshold,
            1.0,
        );
        clamp_field(
            "comb_conf_threshold",
            &mut self.comb_conf_threshold,
            0.0,
            1.0,
        );
        if self.num_filters < 2 {
            log::warn!("[Config] num_filters clamped to 2");
            self.num_filters = 2;
        }
        clamp_field("histogram_beta", &mut self.histogram_beta, 0.0, 1.0);
        self
    }
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            envelope: EnvelopeConfig::default(),
            onset: OnsetConfig::default(),
            tempo: TempoConfig::default(),
        }
    }
}

impl CoreConfig {
    /// Clamp every sub-config's fields to their documented ranges.
    pub fn clamped(self) -> Self {
        Self {
            envelope: self.envelope.clamped(),
            onset: self.onset.clamped(),
            tempo: self.tempo.clamped(),
        }
    }

    /// Load configuration from a JSON file.
    ///
    /// Returns the parsed, clamped configuration, or clamped defaults if the
    /// file is missing or malformed. Never panics, never returns an error: a
    /// parameter load failure is handled by falling back to a known-good
    /// value.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Self {
        match fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str::<CoreConfig>(&contents) {
                Ok(config) => {
                    log::info!("[Config] Loaded configuration from {:?}", path.as_ref());
                    config.clamped()
                }
                Err(err) => {
                    log::warn!(
                        "[Config] Failed to parse JSON from {:?}: {}. Using defaults.",
                        path.as_ref(),
                        err
                    );
                    Self::default()
                }
            },
            Err(err) => {
                log::warn!(
                    "[Config] Failed to read config file {:?}: {}. Using defaults.",
                    path.as_ref(),
                    err
                );
                Self::default()
            }
        }
    }
}

/// Clamp `value` into `[min, max]`, logging once if it was out of range.
fn clamp_field(name: &str, value: &mut f32, min: f32, max: f32) {
    let clamped = value.clamp(min, max);
    if clamped != *value {
        log::warn!(
            "[Config] {} = {} out of range [{}, {}], clamped to {}",
            name,
            value,
            min,
            max,
            clamped
        );
    }
    *value = clamped;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = CoreConfig::default();
        assert_eq!(config.envelope.noise_gate, 0.06);
        assert_eq!(config.onset.fft_size, 256);
        assert_eq!(config.tempo.bpm_min, 60.0);
        assert_eq!(config.tempo.bpm_max, 200.0);
    }

    #[test]
    fn test_json_roundtrip() {
        let config = CoreConfig::default();
        let json = serde_json::to_string_pretty(&config).unwrap();
        let parsed: CoreConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.envelope.attack_tau, config.envelope.attack_tau);
        assert_eq!(parsed.tempo.pll_kp, config.tempo.pll_kp);
    }

    #[test]
    fn test_clamp_out_of_range_values() {
        let mut config = CoreConfig::default();
        config.envelope.noise_gate = 5.0;
        config.tempo.bpm_min = 500.0;
        config.tempo.comb_decay = 1.5;
        let clamped = config.clamped();
        assert!(clamped.envelope.noise_gate <= 0.5);
        assert!(clamped.tempo.bpm_min <= 300.0);
        assert!(clamped.tempo.comb_decay <= 0.999);
    }

    #[test]
    fn test_load_missing_file_falls_back_to_default() {
        let config = CoreConfig::load_from_file("/nonexistent/path/to/config.json");
        assert_eq!(config.envelope.noise_gate, CoreConfig::default().envelope.noise_gate);
    }

    #[test]
    fn test_lock_threshold_above_unlock_threshold() {
        let mut config = TempoConfig::default();
        config.unlock_threshold = 0.9;
        config.lock_threshold = 0.2;
        let clamped = config.clamped();
        assert!(clamped.lock_threshold >= clamped.unlock_threshold);
    }

    #[test]
    fn test_ag_max_clamped_above_ag_min() {
        let mut config = EnvelopeConfig::default();
        config.ag_min = 5.0;
        config.ag_max = 1.0;
        let clamped = config.clamped();
        assert!(clamped.ag_max >= clamped.ag_min);
    }
}
