//! Sample Intake — bridges the asynchronous sample producer (a hardware
//! interrupt delivering blocks of up to 512 samples) to the synchronous
//! frame loop without blocking either side.
//!
//! # Thread Safety
//!
//! `on_block` is the only method meant to be called from a different
//! execution context than the frame loop. The shared accumulator is
//! guarded by a `Mutex` standing in for "interrupt masking or equivalent
//! mutual exclusion" on a hosted target; a bare-metal port would replace
//! the lock with a critical-section primitive without changing the
//! public API. `drain` and `is_alive` are called only from the frame loop.

use crate::clock::MonotonicClock;
use std::sync::Mutex;

/// Largest PCM block the producer may deliver in one call.
pub const MAX_BLOCK_SAMPLES: usize = 512;

/// Capacity of the raw-sample staging queue, in samples. Sized to hold
/// several `on_block` deliveries between frame-loop drains: the producer
/// and the ~60 Hz consumer are not lock-stepped, so more than one block
/// can legitimately land before the next `drain_raw` call. Fixed at
/// compile time; never reallocated.
pub const RAW_QUEUE_CAPACITY: usize = MAX_BLOCK_SAMPLES * 4;

struct Accumulator {
    sum_abs: u64,
    count: u32,
    peak_abs: u16,
    isr_count: u32,
    last_isr_ms: u64,
    // Raw-sample staging for the Spectral Onset Detector's sliding
    // window: a fixed-capacity FIFO queue, not a single overwritable
    // slot, so samples from every `on_block` call since the last drain
    // reach the onset detector rather than only the most recent one.
    raw: [i16; RAW_QUEUE_CAPACITY],
    raw_len: usize,
    // Count of samples dropped from the head of `raw` because a burst of
    // `on_block` calls outran `RAW_QUEUE_CAPACITY` before being drained.
    raw_overflow_count: u64,
}

impl Default for Accumulator {
    fn default() -> Self {
        Self {
            sum_abs: 0,
            count: 0,
            peak_abs: 0,
            isr_count: 0,
            last_isr_ms: 0,
            raw: [0; RAW_QUEUE_CAPACITY],
            raw_len: 0,
            raw_overflow_count: 0,
        }
    }
}

/// Liveness window: if no blocks have arrived within this many milliseconds,
/// the intake reports `alive=false`.
pub const LIVENESS_WINDOW_MS: u64 = 250;

/// Single-producer/single-consumer sample accumulator.
pub struct SampleIntake {
    acc: Mutex<Accumulator>,
}

impl SampleIntake {
    pub fn new() -> Self {
        Self {
            acc: Mutex::new(Accumulator::default()),
        }
    }

    /// Called from the producer context with a block of up to 512 samples
    /// and the monotonic timestamp (ms) at which the block arrived.
    ///
    /// The block-local sum and peak are computed before the critical
    /// section is entered, so the lock is held only for a handful of
    /// integer additions regardless of block size.
    pub fn on_block(&self, samples: &[i16], now_ms: u64) {
        let mut local_sum: u64 = 0;
        let mut local_peak: u16 = 0;
        for &s in samples {
            let abs = s.unsigned_abs();
            local_sum += abs as u64;
            if abs > local_peak {
                local_peak = abs;
            }
        }
        let count = samples.len() as u32;

        let mut acc = match self.acc.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        acc.sum_abs += local_sum;
        acc.count += count;
        if local_peak > acc.peak_abs {
            acc.peak_abs = local_peak;
        }
        acc.isr_count += 1;
        acc.last_isr_ms = now_ms;

        // Append to the raw staging queue, keeping only the most recent
        // `RAW_QUEUE_CAPACITY` samples if a burst of blocks arrives
        // between drains. Dropping from the head (oldest samples) rather
        // than rejecting the new block preserves the sliding-window
        // property: the onset detector always sees the freshest audio.
        let n = samples.len().min(RAW_QUEUE_CAPACITY);
        let incoming = &samples[samples.len() - n..];
        if acc.raw_len + n > RAW_QUEUE_CAPACITY {
            let overflow = acc.raw_len + n - RAW_QUEUE_CAPACITY;
            acc.raw.copy_within(overflow..acc.raw_len, 0);
            acc.raw_len -= overflow;
            acc.raw_overflow_count += overflow as u64;
        }
        acc.raw[acc.raw_len..acc.raw_len + n].copy_from_slice(incoming);
        acc.raw_len += n;
    }

    /// Called once per frame from the consumer. Copies and zeros the
    /// accumulator, returning `(avg_abs, peak_abs, count)`. Calling this
    /// twice without an intervening `on_block` returns `(0.0, 0, 0)` the
    /// second time.
    pub fn drain(&self) -> (f32, u16, u32) {
        let mut acc = match self.acc.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let count = acc.count;
        let avg_abs = if count > 0 {
            acc.sum_abs as f32 / count as f32
        } else {
            0.0
        };
        let peak_abs = acc.peak_abs;

        acc.sum_abs = 0;
        acc.count = 0;
        acc.peak_abs = 0;

        (avg_abs, peak_abs, count)
    }

    /// Copy every sample staged since the last drain (across however many
    /// `on_block` calls arrived) into `out`, oldest first, and clear the
    /// staging queue, returning the number of valid samples written. Call
    /// once per frame, alongside [`SampleIntake::drain`], to hand the raw
    /// samples to the Spectral Onset Detector's sliding window.
    pub fn drain_raw(&self, out: &mut [i16; RAW_QUEUE_CAPACITY]) -> usize {
        let mut acc = match self.acc.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let n = acc.raw_len;
        out[..n].copy_from_slice(&acc.raw[..n]);
        acc.raw_len = 0;
        n
    }

    /// Total samples dropped from the head of the raw staging queue
    /// because a burst of `on_block` calls outran `RAW_QUEUE_CAPACITY`
    /// before the frame loop could drain them. Diagnostic only.
    pub fn raw_overflow_count(&self) -> u64 {
        let acc = match self.acc.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        acc.raw_overflow_count
    }

    /// True unless no blocks have arrived within [`LIVENESS_WINDOW_MS`].
    pub fn is_alive(&self, clock: &dyn MonotonicClock) -> bool {
        let acc = match self.acc.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if acc.isr_count == 0 {
            return false;
        }
        clock.now_ms().saturating_sub(acc.last_isr_ms) <= LIVENESS_WINDOW_MS
    }
}

impl Default for SampleIntake {
    fn default() -> Self {
        Self::new()
    }
}
