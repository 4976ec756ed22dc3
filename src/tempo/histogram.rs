//! Inter-onset-interval histogram — a backup tempo estimate with
//! octave-error detection.

/// Bounded ring of recent inter-onset intervals, in milliseconds.
const MAX_INTERVALS: usize = 64;

/// Guard range: intervals outside [300ms, 1000ms] (200..60 BPM) are
/// discarded as implausible beat periods.
const MIN_INTERVAL_MS: f32 = 300.0;
const MAX_INTERVAL_MS: f32 = 1000.0;

const NUM_BINS: usize = 40;

/// Fixed at 20ms per bin regardless of the guard range above; the top few
/// bins past `MAX_INTERVAL_MS` stay empty since no interval survives
/// `push_interval`'s range check to land in them.
const BIN_WIDTH_MS: f32 = 20.0;

#[inline]
fn bin_width_ms() -> f32 {
    BIN_WIDTH_MS
}

/// How many onsets accumulate between histogram evaluations.
const EVAL_EVERY_N_ONSETS: u32 = 8;

/// Minimum peak-bin count to trust a histogram candidate.
const MIN_PEAK_COUNT: u32 = 3;

pub struct IntervalRing {
    intervals_ms: [f32; MAX_INTERVALS],
    len: usize,
    write_idx: usize,
    onsets_since_eval: u32,
}

/// Result of a histogram evaluation, when enough evidence has accumulated.
pub struct HistogramCandidate {
    pub bpm: f32,
    pub peak_count: u32,
}

impl IntervalRing {
    pub fn new() -> Self {
        Self {
            intervals_ms: [0.0; MAX_INTERVALS],
            len: 0,
            write_idx: 0,
            onsets_since_eval: 0,
        }
    }

    /// Record a new inter-onset interval and, every `EVAL_EVERY_N_ONSETS`
    /// onsets, return a candidate BPM estimate if the histogram has a
    /// sufficiently strong peak.
    pub fn push_interval(&mut self, interval_ms: f32) -> Option<HistogramCandidate> {
        if interval_ms >= MIN_INTERVAL_MS && interval_ms <= MAX_INTERVAL_MS {
            self.intervals_ms[self.write_idx] = interval_ms;
            self.write_idx = (self.write_idx + 1) % MAX_INTERVALS;
            self.len = (self.len + 1).min(MAX_INTERVALS);
        }

        self.onsets_since_eval += 1;
        if self.onsets_since_eval < EVAL_EVERY_N_ONSETS {
            return None;
        }
        self.onsets_since_eval = 0;
        self.evaluate()
    }

    fn bin_of(interval_ms: f32) -> usize {
        (((interval_ms - MIN_INTERVAL_MS) / bin_width_ms()) as usize).min(NUM_BINS - 1)
    }

    fn bin_center_ms(bin: usize) -> f32 {
        MIN_INTERVAL_MS + (bin as f32 + 0.5) * bin_width_ms()
    }

    fn evaluate(&self) -> Option<HistogramCandidate> {
        if self.len == 0 {
            return None;
        }
        let mut bins = [0u32; NUM_BINS];
        for &interval in self.intervals_ms.iter().take(self.len) {
            bins[Self::bin_of(interval)] += 1;
        }

        let (peak_bin, &peak_count) = bins
            .iter()
            .enumerate()
            .max_by_key(|(_, &count)| count)
            .unwrap();

        if peak_count < MIN_PEAK_COUNT {
            return None;
        }

        let mut candidate_interval_ms = Self::bin_center_ms(peak_bin);
        let mut candidate_bpm = 60_000.0 / candidate_interval_ms;

        // Octave check: a 50-100 BPM candidate with a well-populated
        // half-interval neighbor is more likely a subdivision of a
        // double-tempo beat; promote it.
        if (50.0..100.0).contains(&candidate_bpm) {
            let half_interval_ms = candidate_interval_ms / 2.0;
            let half_bin = Self::bin_of(half_interval_ms.max(MIN_INTERVAL_MS));
            let neighbor_count = [half_bin.saturating_sub(1), half_bin, (half_bin + 1).min(NUM_BINS - 1)]
                .iter()
                .map(|&b| bins[b])
                .max()
                .unwrap_or(0);

            if neighbor_count >= 2 || (neighbor_count as f32) >= 0.5 * peak_count as f32 {
                candidate_interval_ms /= 2.0;
                candidate_bpm = 60_000.0 / candidate_interval_ms;
            }
        }

        Some(HistogramCandidate {
            bpm: candidate_bpm,
            peak_count,
        })
    }
}

impl Default for IntervalRing {
    fn default() -> Self {
        Self::new()
    }
}
