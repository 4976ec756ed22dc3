//! Comb-filter resonator bank — scores a fixed set of tempo hypotheses
//! continuously by accumulating energy at each hypothesis' period.

/// Size of the circular onset-strength delay line. Sized generously so it
/// can hold the longest hypothesis period even at a slow ~20 Hz frame
/// rate; fixed at construction, never reallocated.
const COMB_DELAY_SIZE: usize = 1024;

pub struct CombBank {
    bpms: Vec<f32>,
    energies: Vec<f32>,
    feedback: f32,
    decay: f32,
    delay_line: [f32; COMB_DELAY_SIZE],
    write_idx: usize,
}

pub struct CombPeak {
    pub bpm: f32,
    pub peak_energy: f32,
    pub avg_energy: f32,
}

impl CombBank {
    pub fn new(num_filters: usize, bpm_min: f32, bpm_max: f32, feedback: f32, decay: f32) -> Self {
        let num_filters = num_filters.max(2);
        let bpms: Vec<f32> = (0..num_filters)
            .map(|i| bpm_min + (bpm_max - bpm_min) * i as f32 / (num_filters - 1) as f32)
            .collect();
        Self {
            bpms,
            energies: vec![0.0; num_filters],
            feedback,
            decay,
            delay_line: [0.0; COMB_DELAY_SIZE],
            write_idx: 0,
        }
    }

    /// Advance the bank by one frame: push the current onset strength (0
    /// if no onset occurred this frame) into the delay line and update
    /// every hypothesis' leaky-integrator energy. `frame_hz` is the
    /// current frame rate, `1.0 / dt`, recomputed every call rather than
    /// assumed, since the caller's tick rate is not fixed.
    pub fn tick(&mut self, onset_strength: f32, frame_hz: f32) {
        self.delay_line[self.write_idx] = onset_strength;
        self.write_idx = (self.write_idx + 1) % COMB_DELAY_SIZE;

        for i in 0..self.bpms.len() {
            let period_frames = (frame_hz * 60.0 / self.bpms[i]).round() as usize;
            let period_frames = period_frames.clamp(1, COMB_DELAY_SIZE - 1);
            let delayed_idx =
                (self.write_idx + COMB_DELAY_SIZE - period_frames) % COMB_DELAY_SIZE;
            let delayed = self.delay_line[delayed_idx];
            let resonance = onset_strength + self.feedback * delayed;
            self.energies[i] = self.decay * self.energies[i] + (1.0 - self.decay) * resonance;
        }
    }

    /// Identify the current peak-energy hypothesis.
    pub fn peak(&self) -> CombPeak {
        let (peak_idx, &peak_energy) = self
            .energies
            .iter()
            .enumerate()
            .max_by(|(_, a), (_, b)| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal))
            .unwrap();
        let avg_energy = self.energies.iter().sum::<f32>() / self.energies.len() as f32;
        CombPeak {
            bpm: self.bpms[peak_idx],
            peak_energy,
            avg_energy,
        }
    }
}
