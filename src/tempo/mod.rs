//! Tempo & Phase Tracker — a multi-hypothesis periodicity estimator over
//! recent onsets. Composed of a primary hypothesis driven by a
//! phase-locked loop, a comb-filter resonator bank that proposes BPM when
//! confidence is low, and an inter-onset-interval histogram that supplies
//! a backup estimate with octave-error detection.

pub mod comb;
pub mod histogram;

use crate::config::TempoConfig;
use crate::error::CoreError;
use crate::telemetry::RateLimiter;
use comb::CombBank;
use histogram::IntervalRing;

const STABLE_ERROR_THRESHOLD: f32 = 0.08;
const CONFIDENCE_INCREMENT: f32 = 0.05;
const CONFIDENCE_DECREMENT: f32 = 0.10;
const MISSED_BEAT_PENALTY: f32 = 0.15;

/// Minimum gap between repeated sanity-violation log lines from the tempo
/// tracker, matching the same debounce applied in `envelope.rs`.
const SANITY_LOG_INTERVAL_MS: u64 = 2_000;

/// Activation state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TempoState {
    Inactive,
    Locked,
}

/// Primary tempo hypothesis, owned by the tracker.
pub struct TempoHypothesis {
    bpm: f32,
    phase: f32,
    confidence: f32,
    stable_beat_count: u32,
    missed_beat_count: u32,
    phase_error_integral: f32,
    beat_number: u64,
    state: TempoState,
    bpm_locked: bool,

    beat: bool,
    quarter: bool,
    half: bool,
    whole: bool,
}

impl TempoHypothesis {
    fn new(initial_bpm: f32) -> Self {
        Self {
            bpm: initial_bpm,
            phase: 0.0,
            confidence: 0.0,
            stable_beat_count: 0,
            missed_beat_count: 0,
            phase_error_integral: 0.0,
            beat_number: 0,
            state: TempoState::Inactive,
            bpm_locked: false,
            beat: false,
            quarter: false,
            half: false,
            whole: false,
        }
    }

    pub fn bpm(&self) -> f32 {
        self.bpm
    }
    pub fn phase(&self) -> f32 {
        self.phase
    }
    pub fn confidence(&self) -> f32 {
        self.confidence
    }
    pub fn active(&self) -> bool {
        self.state == TempoState::Locked
    }
    pub fn beat(&self) -> bool {
        self.beat
    }
    pub fn quarter(&self) -> bool {
        self.quarter
    }
    pub fn half(&self) -> bool {
        self.half
    }
    pub fn whole(&self) -> bool {
        self.whole
    }
    pub fn beat_number(&self) -> u64 {
        self.beat_number
    }

    fn beat_period_ms(&self) -> f32 {
        60_000.0 / self.bpm
    }
}

/// Owns the primary hypothesis, the comb bank, and the interval histogram;
/// drives all three from `on_onset`/`tick`.
pub struct TempoTracker {
    config: TempoConfig,
    hyp: TempoHypothesis,
    comb: CombBank,
    histogram: IntervalRing,

    now_ms: f64,
    last_onset_ms: Option<f64>,
    missed_check_due_ms: f64,
    sanity_limiter: RateLimiter,
}

impl TempoTracker {
    pub fn new(config: TempoConfig) -> Self {
        let initial_bpm = (config.bpm_min + config.bpm_max) / 2.0;
        let comb = CombBank::new(
            config.num_filters,
            config.bpm_min,
            config.bpm_max,
            config.comb_feedback,
            config.comb_decay,
        );
        Self {
            hyp: TempoHypothesis::new(initial_bpm),
            comb,
            histogram: IntervalRing::new(),
            now_ms: 0.0,
            last_onset_ms: None,
            missed_check_due_ms: 0.0,
            sanity_limiter: RateLimiter::new(SANITY_LOG_INTERVAL_MS),
            config,
        }
    }

    pub fn hypothesis(&self) -> &TempoHypothesis {
        &self.hyp
    }

    /// Advance phase/time by `dt` seconds, run the comb bank for this
    /// frame, and emit one-shot beat flags on phase wrap. `onset_strength`
    /// is the current spectral-flux value (0 if no onset this frame).
    pub fn tick(&mut self, dt: f32, onset_strength: f32) {
        self.hyp.beat = false;
        self.hyp.quarter = false;
        self.hyp.half = false;
        self.hyp.whole = false;

        self.now_ms += dt as f64 * 1000.0;

        let frame_hz = if dt > 0.0 { 1.0 / dt } else { 60.0 };
        self.comb.tick(onset_strength, frame_hz);
        self.run_comb_authority(dt);

        self.advance_phase(dt);
        self.update_state_machine();
    }

    /// Record an onset event at an absolute monotonic timestamp. Runs the
    /// PLL correction and updates the interval histogram.
    ///
    /// `strength` is accepted but intentionally unused here: the PLL
    /// corrects phase from *timing* error only, and the interval histogram
    /// classifies by interval duration, not amplitude. The flux magnitude
    /// itself already reaches tempo tracking through [`TempoTracker::tick`]'s
    /// `onset_strength`, which drives the comb bank's resonator energies —
    /// amplitude-weighting an onset event twice would double-count it.
    pub fn on_onset(&mut self, timestamp_ms: f64, strength: f32) {
        let _ = strength;
        self.now_ms = self.now_ms.max(timestamp_ms);

        if let Some(last) = self.last_onset_ms {
            let interval_ms = (timestamp_ms - last) as f32;
            if interval_ms > 0.0 {
                if let Some(candidate) = self.histogram.push_interval(interval_ms) {
                    self.blend_histogram_candidate(candidate.bpm);
                }
            }
        }
        self.last_onset_ms = Some(timestamp_ms);

        self.run_pll(self.hyp.phase);
    }

    fn wrap_error(phase: f32) -> f32 {
        if phase > 0.5 {
            phase - 1.0
        } else {
            phase
        }
    }

    fn run_pll(&mut self, phase: f32) {
        let error = Self::wrap_error(phase);
        let adaptive_factor = (2.0 - self.hyp.confidence).clamp(1.0, 2.0);

        if error.abs() > self.config.phase_snap_threshold
            && self.hyp.confidence < self.config.phase_snap_confidence
        {
            self.hyp.phase = 0.0;
            self.hyp.phase_error_integral = 0.0;
        } else {
            self.hyp.phase_error_integral =
                (self.hyp.phase_error_integral + error).clamp(-10.0, 10.0);
            let correction = self.config.pll_kp * adaptive_factor * error
                + self.config.pll_ki * adaptive_factor * self.hyp.phase_error_integral;

            // A positive error means the onset arrived after the local
            // oscillator had already wrapped (phase in (0, 0.5]) — the local
            // beat is running fast and `T_beat` needs to grow, not shrink.
            let mut t_beat = self.hyp.beat_period_ms();
            t_beat *= 1.0 + correction;
            let mut bpm = 60_000.0 / t_beat;
            bpm = bpm.clamp(self.config.bpm_min, self.config.bpm_max);
            self.hyp.bpm = bpm;

            // The onset is the new phase-zero reference. Without this, the
            // residual phase measured against the *old* bpm carries into
            // the next cycle and compounds with the freshly corrected bpm,
            // which turns this into a sustained, undamped oscillation
            // instead of a settling correction.
            self.hyp.phase = 0.0;
        }

        if error.abs() < STABLE_ERROR_THRESHOLD {
            self.hyp.stable_beat_count += 1;
            self.hyp.missed_beat_count = 0;
            self.hyp.confidence = (self.hyp.confidence + CONFIDENCE_INCREMENT).clamp(0.0, 1.0);
        } else {
            self.hyp.missed_beat_count += 1;
            self.hyp.confidence = (self.hyp.confidence - CONFIDENCE_DECREMENT).clamp(0.0, 1.0);
        }
    }

    fn blend_histogram_candidate(&mut self, candidate_bpm: f32) {
        let beta = self.config.histogram_beta;
        let blended = self.hyp.bpm * (1.0 - beta) + candidate_bpm * beta;
        self.hyp.bpm = blended.clamp(self.config.bpm_min, self.config.bpm_max);
        self.hyp.confidence = (self.hyp.confidence + 2.0 * CONFIDENCE_INCREMENT).clamp(0.0, 1.0);
    }

    /// `dt` is this frame's elapsed seconds, used to scale `bpm_lock_max_change`
    /// (a per-second rate) to a per-frame delta without assuming any fixed
    /// frame rate.
    fn run_comb_authority(&mut self, dt: f32) {
        let peak = self.comb.peak();
        if self.hyp.confidence >= self.config.comb_conf_threshold {
            return;
        }
        if !(peak.peak_energy > peak.avg_energy * 1.5 && peak.peak_energy > 0.02) {
            return;
        }

        if self.hyp.bpm_locked {
            let max_change = self.config.bpm_lock_max_change * dt;
            let delta = (peak.bpm - self.hyp.bpm).clamp(-max_change, max_change);
            self.hyp.bpm = (self.hyp.bpm + delta).clamp(self.config.bpm_min, self.config.bpm_max);
        } else {
            let blend = (1.0 - self.hyp.confidence).clamp(0.0, 1.0);
            self.hyp.bpm = (self.hyp.bpm * (1.0 - blend) + peak.bpm * blend)
                .clamp(self.config.bpm_min, self.config.bpm_max);
        }
    }

    fn advance_phase(&mut self, dt: f32) {
        let t_beat = self.hyp.beat_period_ms();
        self.hyp.phase += (dt * 1000.0) / t_beat;

        if self.hyp.phase >= 1.0 {
            if self.hyp.phase > 100.0 {
                if self.sanity_limiter.allow(self.now_ms as u64) {
                    crate::error::log_core_error(
                        &CoreError::PhaseOverflow {
                            phase: self.hyp.phase,
                        },
                        "tempo::advance_phase",
                    );
                }
                self.hyp.phase = 1.0;
            }

            let raw_beats = self.hyp.phase.floor() as u32;
            let beats_added = if raw_beats > 10 {
                if self.sanity_limiter.allow(self.now_ms as u64) {
                    crate::error::log_core_error(
                        &CoreError::BeatsAddedOverflow {
                            beats_added: raw_beats,
                        },
                        "tempo::advance_phase",
                    );
                }
                1
            } else {
                if raw_beats >= 2 {
                    log::warn!(
                        "tempo::advance_phase: beats_added={} in a single tick (large dt?)",
                        raw_beats
                    );
                }
                raw_beats
            };

            self.hyp.phase %= 1.0;
            self.hyp.beat_number += beats_added as u64;

            self.hyp.beat = true;
            self.hyp.quarter = true;
            self.hyp.half = self.hyp.beat_number % 2 == 0;
            self.hyp.whole = self.hyp.beat_number % 4 == 0;

            self.run_missed_beat_check();
        }
    }

    fn run_missed_beat_check(&mut self) {
        let t_beat = self.hyp.beat_period_ms() as f64;
        let since_last_onset = match self.last_onset_ms {
            Some(last) => self.now_ms - last,
            None => f64::INFINITY,
        };
        if since_last_onset > 1.5 * t_beat {
            self.hyp.missed_beat_count += 1;
            self.hyp.confidence = (self.hyp.confidence - MISSED_BEAT_PENALTY).max(0.0);
        }
    }

    fn update_state_machine(&mut self) {
        match self.hyp.state {
            TempoState::Inactive => {
                if self.hyp.confidence >= self.config.activation_threshold
                    && self.hyp.stable_beat_count >= self.config.min_beats_to_activate
                {
                    self.hyp.state = TempoState::Locked;
                }
            }
            TempoState::Locked => {
                if self.hyp.confidence < 0.5 * self.config.activation_threshold
                    || self.hyp.missed_beat_count >= self.config.max_missed_beats
                {
                    self.hyp.state = TempoState::Inactive;
                }
            }
        }

        if self.hyp.confidence >= self.config.lock_threshold {
            self.hyp.bpm_locked = true;
        } else if self.hyp.confidence < self.config.unlock_threshold {
            self.hyp.bpm_locked = false;
        }
    }
}
