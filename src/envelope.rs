//! Envelope & Dynamic Range Tracker.
//!
//! Converts raw block-average magnitude into a perceptually useful level in
//! [0,1] that tolerates loudness swings from whisper to concert. The
//! attack/release envelope follower and soft-knee compressor gain curve
//! follow the same exponential-time-constant and knee-region-interpolation
//! shape used by wideband AGC designs; see `compute_gain` below.

use crate::config::EnvelopeConfig;
use crate::error::CoreError;
use crate::telemetry::RateLimiter;

/// Minimum gap between repeated sanity-violation log lines from this
/// tracker, so a persistent condition (e.g. a stuck degenerate range)
/// warns once per window rather than every frame.
const SANITY_LOG_INTERVAL_MS: u64 = 2_000;

/// Enforced minimum distance between `adaptive_max` and `adaptive_min`.
pub const MIN_SPAN: f32 = 1.0;

/// Slow coefficient target for `env_mean`, used for hardware-gain targeting.
const ENV_MEAN_TAU_S: f32 = 90.0;

/// How long `min_env`/`max_env` take to adapt toward short-term extremes.
const ADAPT_FAST_TAU_S: f32 = 0.5;
const ADAPT_SLOW_TAU_S: f32 = 8.0;

/// Symmetric inset applied to the normalized [0,1] range so silence
/// produces exact 0 after gating and clipping never produces exact 1
/// prematurely.
const NORMALIZE_INSET: f32 = 0.02;

/// Software auto-gain integral controller step size.
const AG_STEP_GAIN: f32 = 0.8;

/// Dwell time at a gain limit before hardware-gain calibration is allowed.
const DWELL_THRESHOLD_S: f32 = 1.0;

/// Compressor attack/release time constants (fixed; independent of config).
const COMP_ATTACK_TAU_S: f32 = 0.01;
const COMP_RELEASE_TAU_S: f32 = 0.20;

/// A sink the Envelope component may write an integer hardware gain
/// (0..80) to. Hardware access itself is out of scope for this crate;
/// callers supply a concrete implementation.
pub trait HardwareGainSink {
    fn set_gain(&mut self, gain: u8);
    fn get_gain(&self) -> u8;
}

/// A sink that drops every write; the default for hosts with no
/// addressable gain register and for tests.
pub struct NullGainSink {
    gain: u8,
}

impl NullGainSink {
    pub fn new() -> Self {
        Self { gain: 40 }
    }
}

impl Default for NullGainSink {
    fn default() -> Self {
        Self::new()
    }
}

impl HardwareGainSink for NullGainSink {
    fn set_gain(&mut self, gain: u8) {
        self.gain = gain;
    }
    fn get_gain(&self) -> u8 {
        self.gain
    }
}

/// Owned envelope/dynamic-range/AGC/compressor state.
pub struct EnvelopeTracker {
    config: EnvelopeConfig,
    initialized: bool,

    env: f32,
    env_mean: f32,
    min_env: f32,
    max_env: f32,

    software_gain: f32,
    dwell_at_limit_s: f32,
    since_last_hw_cal_ms: f32,

    comp_env: f32,

    pre_gate_level: f32,
    post_agc_level: f32,
    last_level: f32,

    elapsed_ms: f64,
    sanity_limiter: RateLimiter,
}

impl EnvelopeTracker {
    pub fn new(config: EnvelopeConfig) -> Self {
        Self {
            config,
            initialized: false,
            env: 0.0,
            env_mean: 0.0,
            min_env: 0.0,
            max_env: MIN_SPAN,
            software_gain: 1.0,
            dwell_at_limit_s: 0.0,
            since_last_hw_cal_ms: 0.0,
            comp_env: 0.0,
            pre_gate_level: 0.0,
            post_agc_level: 0.0,
            last_level: 0.0,
            elapsed_ms: 0.0,
            sanity_limiter: RateLimiter::new(SANITY_LOG_INTERVAL_MS),
        }
    }

    pub fn env(&self) -> f32 {
        self.env
    }
    pub fn env_mean(&self) -> f32 {
        self.env_mean
    }
    pub fn pre_gate_level(&self) -> f32 {
        self.pre_gate_level
    }
    pub fn post_agc_level(&self) -> f32 {
        self.post_agc_level
    }
    pub fn software_gain(&self) -> f32 {
        self.software_gain
    }

    /// Single entry point per frame. `dt` is clamped to [0.1 ms, 100 ms].
    /// If `count == 0` (no samples arrived this frame), the prior state is
    /// preserved and the last computed level is returned unchanged — a
    /// transient condition, not an error.
    pub fn update(
        &mut self,
        avg_abs: f32,
        count: u32,
        dt: f32,
        hw_sink: &mut dyn HardwareGainSink,
    ) -> f32 {
        if count == 0 {
            return self.last_level;
        }
        let dt = dt.clamp(0.0001, 0.1);
        self.elapsed_ms += dt as f64 * 1000.0;

        if !self.initialized {
            self.env = avg_abs;
            self.env_mean = avg_abs;
            self.min_env = (avg_abs - MIN_SPAN).max(0.0);
            self.max_env = self.min_env + MIN_SPAN;
            self.initialized = true;
        }

        self.run_envelope_follower(avg_abs, dt);
        self.run_adaptive_window(dt);
        self.enforce_min_span();

        let norm = self.normalize();
        self.pre_gate_level = norm;

        // Freeze the integral controller while the pre-gate signal already
        // sits below the noise gate: chasing `ag_target` off the noise floor
        // only drives `software_gain` toward its ceiling, which would then
        // ride the gate's edge indefinitely instead of settling at 0 during
        // sustained silence.
        if norm >= self.config.noise_gate {
            self.run_software_auto_gain(dt);
        }
        let post_gain = (norm * self.software_gain).clamp(0.0, 4.0);
        self.post_agc_level = post_gain;

        let level = self.gate_and_compress(post_gain, dt);
        self.run_hardware_gain_calibration(dt, hw_sink);

        self.last_level = level;
        level
    }

    fn run_envelope_follower(&mut self, avg_abs: f32, dt: f32) {
        let alpha_atk = 1.0 - (-dt / self.config.attack_tau).exp();
        let alpha_rel = 1.0 - (-dt / self.config.release_tau).exp();
        let alpha = if avg_abs >= self.env {
            alpha_atk
        } else {
            alpha_rel
        };
        self.env += alpha * (avg_abs - self.env);

        let alpha_mean = 1.0 - (-dt / ENV_MEAN_TAU_S).exp();
        self.env_mean += alpha_mean * (avg_abs - self.env_mean);

        if !self.env.is_finite() {
            if self.sanity_limiter.allow(self.elapsed_ms as u64) {
                crate::error::log_core_error(
                    &CoreError::NonFiniteEnvelope { field: "env" },
                    "envelope::run_envelope_follower",
                );
            }
            self.env = avg_abs.max(0.0);
        }
        if !self.env_mean.is_finite() {
            if self.sanity_limiter.allow(self.elapsed_ms as u64) {
                crate::error::log_core_error(
                    &CoreError::NonFiniteEnvelope { field: "env_mean" },
                    "envelope::run_envelope_follower",
                );
            }
            self.env_mean = avg_abs.max(0.0);
        }
    }

    fn run_adaptive_window(&mut self, dt: f32) {
        // min_env rises slowly, falls quickly to track dips in loudness.
        let alpha_min_rise = 1.0 - (-dt / ADAPT_SLOW_TAU_S).exp();
        let alpha_min_fall = 1.0 - (-dt / ADAPT_FAST_TAU_S).exp();
        let alpha_min = if self.env > self.min_env {
            alpha_min_rise
        } else {
            alpha_min_fall
        };
        self.min_env += alpha_min * (self.env - self.min_env);

        // max_env falls slowly, rises quickly to track peaks.
        let alpha_max_fall = 1.0 - (-dt / ADAPT_SLOW_TAU_S).exp();
        let alpha_max_rise = 1.0 - (-dt / ADAPT_FAST_TAU_S).exp();
        let alpha_max = if self.env < self.max_env {
            alpha_max_fall
        } else {
            alpha_max_rise
        };
        self.max_env += alpha_max * (self.env - self.max_env);
    }

    fn enforce_min_span(&mut self) {
        if !(self.max_env >= self.min_env + MIN_SPAN) {
            if self.sanity_limiter.allow(self.elapsed_ms as u64) {
                crate::error::log_core_error(
                    &CoreError::DegenerateRange {
                        min_env: self.min_env,
                        max_env: self.max_env,
                    },
                    "envelope::enforce_min_span",
                );
            }
            self.max_env = self.min_env + MIN_SPAN;
        }
    }

    fn normalize(&self) -> f32 {
        let raw = (self.env - self.min_env) / (self.max_env - self.min_env);
        let raw = raw.clamp(0.0, 1.0);
        NORMALIZE_INSET + raw * (1.0 - 2.0 * NORMALIZE_INSET)
    }

    fn run_software_auto_gain(&mut self, dt: f32) {
        let error = self.config.ag_target - self.pre_gate_level;
        self.software_gain += AG_STEP_GAIN * error * dt;
        let clamped = self.software_gain.clamp(self.config.ag_min, self.config.ag_max);

        if (clamped - self.config.ag_min).abs() < f32::EPSILON
            || (clamped - self.config.ag_max).abs() < f32::EPSILON
        {
            self.dwell_at_limit_s += dt;
        } else {
            self.dwell_at_limit_s = 0.0;
        }
        self.software_gain = clamped;
    }

    /// Returns true when the software gain has dwelled at a clamp limit
    /// long enough to warrant a hardware-gain step.
    fn at_dwell_limit(&self) -> bool {
        self.dwell_at_limit_s >= DWELL_THRESHOLD_S
    }

    fn gate_and_compress(&mut self, post_gain: f32, dt: f32) -> f32 {
        if post_gain < self.config.noise_gate {
            self.comp_env = 0.0;
            return 0.0;
        }

        let alpha_atk = 1.0 - (-dt / COMP_ATTACK_TAU_S).exp();
        let alpha_rel = 1.0 - (-dt / COMP_RELEASE_TAU_S).exp();
        let alpha = if post_gain >= self.comp_env {
            alpha_atk
        } else {
            alpha_rel
        };
        self.comp_env += alpha * (post_gain - self.comp_env);

        let gain = self.compute_compressor_gain(self.comp_env);
        (post_gain * gain).clamp(0.0, 1.0)
    }

    /// Soft-knee compressor gain for a given envelope level, in the linear
    /// domain. Below the knee, gain is unity; above it, the overshoot is
    /// attenuated by the configured ratio; makeup gain restores loudness.
    fn compute_compressor_gain(&self, level: f32) -> f32 {
        let threshold = self.config.comp_threshold;
        if level <= threshold {
            return 1.0;
        }
        let over = level - threshold;
        let span = (1.0 - threshold).max(1e-6);
        let gain = 1.0 / (1.0 + (self.config.comp_ratio - 1.0) * (over / span));
        let makeup = 1.0 + (self.config.comp_ratio - 1.0) * 0.25;
        gain * makeup
    }

    fn run_hardware_gain_calibration(&mut self, dt: f32, hw_sink: &mut dyn HardwareGainSink) {
        self.since_last_hw_cal_ms += dt * 1000.0;
        if self.since_last_hw_cal_ms < self.config.hw_cal_period_ms as f32 {
            return;
        }
        self.since_last_hw_cal_ms = 0.0;

        let target_raw = 0.2;
        let current_gain = hw_sink.get_gain();
        let step = self.config.hw_gain_step;

        if self.env_mean < target_raw * 0.5 || (self.at_dwell_limit() && self.software_gain >= self.config.ag_max) {
            let new_gain = current_gain.saturating_add(step).min(80);
            if new_gain != current_gain {
                hw_sink.set_gain(new_gain);
                self.software_gain = (self.software_gain / 1.05).clamp(self.config.ag_min, self.config.ag_max);
            }
        } else if self.env_mean > target_raw * 2.0 || (self.at_dwell_limit() && self.software_gain <= self.config.ag_min) {
            let new_gain = current_gain.saturating_sub(step);
            if new_gain != current_gain {
                hw_sink.set_gain(new_gain);
                self.software_gain = (self.software_gain * 1.05).clamp(self.config.ag_min, self.config.ag_max);
            }
        }
        self.dwell_at_limit_s = 0.0;
    }
}
