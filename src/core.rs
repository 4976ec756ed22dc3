//! `AudioCore` — the single-threaded frame-loop orchestrator composing
//! Intake → Envelope → Onset → Tempo → Assembler in that order. This is
//! the crate's only public entry point besides the individual components
//! it wires together.

use crate::assembler::{Assembler, AudioControl};
use crate::clock::MonotonicClock;
use crate::config::CoreConfig;
use crate::envelope::{EnvelopeTracker, HardwareGainSink, NullGainSink};
use crate::intake::{SampleIntake, RAW_QUEUE_CAPACITY};
use crate::onset::OnsetDetector;
use crate::telemetry::{AudioRecord, NullTelemetry, TelemetrySink, Telemetry, TempoRecord};
use crate::tempo::TempoTracker;

/// How quickly `transient` decays toward 0 between onsets, per second.
const TRANSIENT_DECAY_PER_SEC: f32 = 4.0;

/// Owns one instance of each of the five components and the shared sample
/// intake. `tick` is the only method meant to be called once per video
/// frame (~60 Hz); `on_block` is the only method meant to be called from a
/// different execution context (a hardware sample-ready interrupt).
pub struct AudioCore {
    intake: SampleIntake,
    envelope: EnvelopeTracker,
    onset: OnsetDetector,
    tempo: TempoTracker,
    assembler: Assembler,
    hw_gain: Box<dyn HardwareGainSink + Send>,

    clock: Box<dyn MonotonicClock + Send>,
    telemetry: Telemetry,
    telemetry_sink: Box<dyn TelemetrySink + Send>,

    last_control: AudioControl,
}

impl AudioCore {
    pub fn new(sample_rate: u32, config: CoreConfig, clock: Box<dyn MonotonicClock + Send>) -> Self {
        Self {
            intake: SampleIntake::new(),
            envelope: EnvelopeTracker::new(config.envelope.clone()),
            onset: OnsetDetector::new(sample_rate, config.onset.clone()),
            tempo: TempoTracker::new(config.tempo.clone()),
            assembler: Assembler::new(TRANSIENT_DECAY_PER_SEC),
            hw_gain: Box::new(NullGainSink::new()),
            clock,
            telemetry: Telemetry::new(),
            telemetry_sink: Box::new(NullTelemetry),
            last_control: AudioControl::default(),
        }
    }

    /// Replace the hardware-gain sink (defaults to a no-op sink).
    pub fn set_hardware_gain_sink(&mut self, sink: Box<dyn HardwareGainSink + Send>) {
        self.hw_gain = sink;
    }

    /// Replace the telemetry sink (defaults to dropping every line).
    pub fn set_telemetry_sink(&mut self, sink: Box<dyn TelemetrySink + Send>) {
        self.telemetry_sink = sink;
    }

    /// Called from the producer context (e.g. a hardware sample-ready
    /// interrupt) with a block of up to 512 samples.
    pub fn on_block(&self, samples: &[i16]) {
        self.intake.on_block(samples, self.clock.now_ms());
    }

    /// The last assembled control snapshot, without advancing the frame
    /// loop. Useful for consumers that poll between ticks.
    pub fn last_control(&self) -> AudioControl {
        self.last_control
    }

    /// Advance the frame loop by `dt` seconds and return the freshly
    /// assembled control snapshot.
    pub fn tick(&mut self, dt: f32) -> AudioControl {
        let now_ms = self.clock.now_ms();
        let alive = self.intake.is_alive(self.clock.as_ref());
        let (avg_abs, _peak_abs, count) = self.intake.drain();

        let level = self.envelope.update(avg_abs, count, dt, self.hw_gain.as_mut());
        let raw = self.envelope.pre_gate_level();

        // Pull whatever raw block the producer staged this frame (via
        // `on_block`) and hand it to the onset detector's sliding window.
        // A frame's worth of new samples is rarely exactly `fft_size`, so
        // `add_samples` only reports readiness once the window fills.
        let mut raw_buf = [0i16; RAW_QUEUE_CAPACITY];
        let raw_len = self.intake.drain_raw(&mut raw_buf);
        let frame_ready = if raw_len > 0 {
            self.feed_onset_samples(&raw_buf[..raw_len])
        } else {
            false
        };

        let mut onset_strength = None;
        // Continuous flux for the comb bank; stays 0.0 on frames where no
        // new spectral frame completed, same as a silent frame would report.
        let mut flux = 0.0f32;
        let mut raised_onset = false;
        if frame_ready {
            let (f, onset) = self.process_onset_frame(now_ms as f64, level);
            flux = f;
            raised_onset = onset;
        }

        self.tempo.tick(dt, flux);
        if raised_onset {
            onset_strength = Some(self.onset.last_flux());
            self.tempo.on_onset(now_ms as f64, self.onset.last_flux());
        }

        let beat_number = self.tempo.hypothesis().beat_number();
        let hyp = self.tempo.hypothesis();
        let control = self.assembler.assemble(
            level,
            raw,
            onset_strength,
            dt,
            hyp.bpm(),
            hyp.phase(),
            hyp.confidence(),
            hyp.active(),
            hyp.beat(),
            hyp.half(),
            hyp.whole(),
            self.hw_gain.get_gain(),
            alive,
        );

        self.last_control = control;
        self.emit_telemetry(&control, beat_number);
        if raised_onset {
            let strength = self.onset.last_flux();
            self.telemetry
                .emit_transient(self.telemetry_sink.as_mut(), now_ms, strength);
        }
        control
    }

    /// Feed raw PCM samples into the onset detector's sliding window.
    /// Call this once per frame with the same block handed to `on_block`,
    /// before `tick`, so the detector's ring stays synchronized with the
    /// intake accumulator.
    pub fn feed_onset_samples(&mut self, samples: &[i16]) -> bool {
        self.onset.add_samples(samples)
    }

    /// Process a ready onset frame (call only after `feed_onset_samples`
    /// returned `true`). `ambient_level` is the envelope's current level for
    /// this frame, feeding the adaptive threshold. Returns
    /// `(flux, onset_raised)`.
    pub fn process_onset_frame(&mut self, now_ms: f64, ambient_level: f32) -> (f32, bool) {
        self.onset.process(now_ms, ambient_level)
    }

    fn emit_telemetry(&mut self, control: &AudioControl, beat_number: u64) {
        self.telemetry.emit_audio(
            self.telemetry_sink.as_mut(),
            AudioRecord {
                l: control.level,
                t: control.transient,
                pk: control.pulse,
                vl: self.envelope.software_gain(),
                raw: control.raw,
                h: control.hw_gain,
                alive: control.alive as u8,
                z: None,
            },
        );
        self.telemetry.emit_tempo(
            self.telemetry_sink.as_mut(),
            TempoRecord {
                a: control.active as u8,
                bpm: control.bpm,
                ph: control.phase,
                conf: control.confidence,
                str_: control.transient,
                bc: beat_number,
                q: control.beat as u8,
            },
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FakeClock;

    fn core_with_fake_clock() -> (AudioCore, std::sync::Arc<FakeClock>) {
        let clock = std::sync::Arc::new(FakeClock::new());
        let core = AudioCore::new(16000, CoreConfig::default(), Box::new(ArcClock(clock.clone())));
        (core, clock)
    }

    struct ArcClock(std::sync::Arc<FakeClock>);
    impl MonotonicClock for ArcClock {
        fn now_ms(&self) -> u64 {
            self.0.now_ms()
        }
    }

    #[test]
    fn test_tick_returns_bounded_control() {
        let (mut core, _clock) = core_with_fake_clock();
        let control = core.tick(1.0 / 60.0);
        assert!((0.0..=1.0).contains(&control.level));
        assert!((0.0..=1.0).contains(&control.confidence));
    }

    #[test]
    fn test_alive_false_with_no_blocks_delivered() {
        let (mut core, clock) = core_with_fake_clock();
        clock.advance(300);
        let control = core.tick(1.0 / 60.0);
        assert!(!control.alive);
        assert_eq!(control.level, 0.0);
    }

    #[test]
    fn test_alive_true_after_recent_block() {
        let (mut core, clock) = core_with_fake_clock();
        core.on_block(&[1000, -1000, 2000]);
        clock.advance(10);
        let control = core.tick(1.0 / 60.0);
        assert!(control.alive);
    }

    #[test]
    fn test_repeated_ticks_stay_bounded() {
        let (mut core, clock) = core_with_fake_clock();
        for _ in 0..300 {
            core.on_block(&[500, -500, 1000, -1000]);
            clock.advance(16);
            let control = core.tick(1.0 / 60.0);
            assert!((0.0..=1.0).contains(&control.level));
            assert!((0.0..=1.0).contains(&control.phase));
        }
    }
}
