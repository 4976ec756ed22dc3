//! Control Signal Assembler — gathers each frame's level, transient
//! strength, pulse, and tempo state into a single immutable snapshot.

use serde::{Deserialize, Serialize};

/// Read-only per-frame snapshot published to consumers (LED generators).
/// Consumers may only copy it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AudioControl {
    pub level: f32,
    pub raw: f32,
    pub transient: f32,
    pub pulse: f32,
    pub bpm: f32,
    pub phase: f32,
    pub confidence: f32,
    pub active: bool,
    pub beat: bool,
    pub half: bool,
    pub whole: bool,
    pub hw_gain: u8,
    pub alive: bool,
}

impl Default for AudioControl {
    fn default() -> Self {
        Self {
            level: 0.0,
            raw: 0.0,
            transient: 0.0,
            pulse: 0.0,
            bpm: 0.0,
            phase: 0.0,
            confidence: 0.0,
            active: false,
            beat: false,
            half: false,
            whole: false,
            hw_gain: 0,
            alive: false,
        }
    }
}

/// Decays `transient` toward zero between onsets and derives `pulse` from
/// tempo phase. Owns only the small amount of state the spec assigns it.
pub struct Assembler {
    transient: f32,
    transient_decay: f32,
}

impl Assembler {
    pub fn new(transient_decay: f32) -> Self {
        Self {
            transient: 0.0,
            transient_decay,
        }
    }

    /// Assemble this frame's `AudioControl` snapshot.
    #[allow(clippy::too_many_arguments)]
    pub fn assemble(
        &mut self,
        level: f32,
        raw: f32,
        onset_strength: Option<f32>,
        dt: f32,
        bpm: f32,
        phase: f32,
        confidence: f32,
        active: bool,
        beat: bool,
        half: bool,
        whole: bool,
        hw_gain: u8,
        alive: bool,
    ) -> AudioControl {
        if let Some(strength) = onset_strength {
            self.transient = self.transient.max(strength.clamp(0.0, 1.0));
        } else {
            let decay = (1.0 - self.transient_decay * dt).clamp(0.0, 1.0);
            self.transient *= decay;
        }

        let pulse = if active { 1.0 - phase.clamp(0.0, 1.0) } else { 0.0 };

        if !alive {
            return AudioControl {
                level: 0.0,
                raw: 0.0,
                transient: 0.0,
                pulse: 0.0,
                bpm,
                phase,
                confidence,
                active,
                beat: false,
                half: false,
                whole: false,
                hw_gain,
                alive: false,
            };
        }

        AudioControl {
            level: level.clamp(0.0, 1.0),
            raw: raw.clamp(0.0, 1.0),
            transient: self.transient.clamp(0.0, 1.0),
            pulse: pulse.clamp(0.0, 1.0),
            bpm,
            phase: phase.clamp(0.0, 1.0),
            confidence: confidence.clamp(0.0, 1.0),
            active,
            beat,
            half,
            whole,
            hw_gain,
            alive: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_control_is_zeroed() {
        let control = AudioControl::default();
        assert_eq!(control.level, 0.0);
        assert!(!control.alive);
    }

    #[test]
    fn test_transient_decays_without_onset() {
        let mut assembler = Assembler::new(5.0);
        let first = assembler.assemble(
            0.5, 0.5, Some(1.0), 1.0 / 60.0, 120.0, 0.0, 0.8, true, false, false, false, 40, true,
        );
        assert_eq!(first.transient, 1.0);

        let second = assembler.assemble(
            0.5, 0.5, None, 1.0 / 60.0, 120.0, 0.1, 0.8, true, false, false, false, 40, true,
        );
        assert!(second.transient < first.transient);
    }

    #[test]
    fn test_dead_intake_zeros_outputs_but_preserves_bpm() {
        let mut assembler = Assembler::new(5.0);
        let control = assembler.assemble(
            0.9, 0.9, Some(1.0), 1.0 / 60.0, 124.0, 0.3, 0.9, true, true, false, false, 40, false,
        );
        assert_eq!(control.level, 0.0);
        assert_eq!(control.transient, 0.0);
        assert_eq!(control.pulse, 0.0);
        assert!(!control.beat);
        assert_eq!(control.bpm, 124.0, "tempo state must be retained, not zeroed");
        assert!(!control.alive);
    }

    #[test]
    fn test_pulse_is_one_at_phase_zero_when_active() {
        let mut assembler = Assembler::new(5.0);
        let control = assembler.assemble(
            0.5, 0.5, None, 1.0 / 60.0, 120.0, 0.0, 0.8, true, false, false, false, 40, true,
        );
        assert!((control.pulse - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_pulse_is_zero_when_inactive() {
        let mut assembler = Assembler::new(5.0);
        let control = assembler.assemble(
            0.5, 0.5, None, 1.0 / 60.0, 120.0, 0.0, 0.1, false, false, false, false, 40, true,
        );
        assert_eq!(control.pulse, 0.0);
    }

    #[test]
    fn test_all_fractional_fields_bounded() {
        let mut assembler = Assembler::new(5.0);
        let control = assembler.assemble(
            5.0, -2.0, Some(3.0), 1.0 / 60.0, 120.0, 1.5, 2.0, true, false, false, false, 40, true,
        );
        assert!((0.0..=1.0).contains(&control.level));
        assert!((0.0..=1.0).contains(&control.raw));
        assert!((0.0..=1.0).contains(&control.transient));
        assert!((0.0..=1.0).contains(&control.phase));
        assert!((0.0..=1.0).contains(&control.confidence));
    }
}
