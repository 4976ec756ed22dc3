//! Diagnostic telemetry — newline-delimited JSON event emission.
//!
//! Telemetry here is an owned value held by `AudioCore`, written
//! synchronously through a caller-supplied [`TelemetrySink`] rather than a
//! `tokio::sync::broadcast` channel behind a global static: this core
//! avoids both global mutable state and channel/async architectures.

use serde::Serialize;
use std::collections::VecDeque;

/// Bounded history of recent records, for diagnostic CLI reporting.
const HISTORY_CAPACITY: usize = 256;

/// Destination for emitted telemetry lines.
pub trait TelemetrySink {
    fn emit(&mut self, line: &str);
}

/// Drops every line; the default when telemetry is disabled.
pub struct NullTelemetry;

impl TelemetrySink for NullTelemetry {
    fn emit(&mut self, _line: &str) {}
}

/// Per-frame audio snapshot record (`{"a": {...}}`).
#[derive(Debug, Clone, Serialize)]
pub struct AudioRecord {
    pub l: f32,
    pub t: f32,
    pub pk: f32,
    pub vl: f32,
    pub raw: f32,
    pub h: u8,
    pub alive: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub z: Option<f32>,
}

/// Tempo/phase snapshot record (`{"m": {...}}`).
#[derive(Debug, Clone, Serialize)]
pub struct TempoRecord {
    pub a: u8,
    pub bpm: f32,
    pub ph: f32,
    pub conf: f32,
    #[serde(rename = "str")]
    pub str_: f32,
    pub bc: u64,
    pub q: u8,
}

/// One-shot onset event record.
#[derive(Debug, Clone, Serialize)]
pub struct TransientRecord {
    #[serde(rename = "type")]
    pub kind: &'static str,
    #[serde(rename = "timestampMs")]
    pub timestamp_ms: u64,
    pub strength: f32,
}

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
enum Record {
    Audio { a: AudioRecord },
    Tempo { m: TempoRecord },
    Transient(TransientRecord),
}

/// Rate limiter for repeated diagnostic warnings (e.g. sanity violations
/// recurring every frame), so a stuck condition warns once per window
/// instead of flooding the sink.
pub struct RateLimiter {
    min_interval_ms: u64,
    last_emit_ms: Option<u64>,
}

impl RateLimiter {
    pub fn new(min_interval_ms: u64) -> Self {
        Self {
            min_interval_ms,
            last_emit_ms: None,
        }
    }

    /// Returns `true` if the caller should emit now, recording the time.
    pub fn allow(&mut self, now_ms: u64) -> bool {
        match self.last_emit_ms {
            Some(last) if now_ms.saturating_sub(last) < self.min_interval_ms => false,
            _ => {
                self.last_emit_ms = Some(now_ms);
                true
            }
        }
    }
}

/// Owned telemetry collector: serializes records to a [`TelemetrySink`]
/// and retains a bounded in-memory history for diagnostic reporting.
pub struct Telemetry {
    history: VecDeque<String>,
    total_emitted: u64,
}

impl Telemetry {
    pub fn new() -> Self {
        Self {
            history: VecDeque::with_capacity(HISTORY_CAPACITY),
            total_emitted: 0,
        }
    }

    pub fn total_emitted(&self) -> u64 {
        self.total_emitted
    }

    pub fn history(&self) -> impl Iterator<Item = &String> {
        self.history.iter()
    }

    fn emit(&mut self, sink: &mut dyn TelemetrySink, record: &Record) {
        let line = match serde_json::to_string(record) {
            Ok(line) => line,
            Err(err) => {
                log::warn!("[Telemetry] failed to serialize record: {}", err);
                return;
            }
        };
        sink.emit(&line);
        if self.history.len() == HISTORY_CAPACITY {
            self.history.pop_front();
        }
        self.history.push_back(line);
        self.total_emitted += 1;
    }

    pub fn emit_audio(&mut self, sink: &mut dyn TelemetrySink, record: AudioRecord) {
        self.emit(sink, &Record::Audio { a: record });
    }

    pub fn emit_tempo(&mut self, sink: &mut dyn TelemetrySink, record: TempoRecord) {
        self.emit(sink, &Record::Tempo { m: record });
    }

    pub fn emit_transient(&mut self, sink: &mut dyn TelemetrySink, timestamp_ms: u64, strength: f32) {
        self.emit(
            sink,
            &Record::Transient(TransientRecord {
                kind: "TRANSIENT",
                timestamp_ms,
                strength,
            }),
        );
    }
}

impl Default for Telemetry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct VecSink {
        lines: Vec<String>,
    }

    impl TelemetrySink for VecSink {
        fn emit(&mut self, line: &str) {
            self.lines.push(line.to_string());
        }
    }

    #[test]
    fn test_audio_record_serializes_required_fields() {
        let mut telemetry = Telemetry::new();
        let mut sink = VecSink { lines: Vec::new() };
        telemetry.emit_audio(
            &mut sink,
            AudioRecord {
                l: 0.5,
                t: 0.1,
                pk: 0.2,
                vl: 0.3,
                raw: 0.4,
                h: 40,
                alive: 1,
                z: None,
            },
        );
        let line = &sink.lines[0];
        assert!(line.contains("\"l\":0.5"));
        assert!(!line.contains("\"z\""), "optional field should be omitted when None");
    }

    #[test]
    fn test_history_is_bounded() {
        let mut telemetry = Telemetry::new();
        let mut sink = NullTelemetry;
        for i in 0..(HISTORY_CAPACITY * 2) {
            telemetry.emit_transient(&mut sink, i as u64, 0.5);
        }
        assert_eq!(telemetry.history().count(), HISTORY_CAPACITY);
        assert_eq!(telemetry.total_emitted(), (HISTORY_CAPACITY * 2) as u64);
    }

    #[test]
    fn test_rate_limiter_suppresses_rapid_repeats() {
        let mut limiter = RateLimiter::new(1000);
        assert!(limiter.allow(0));
        assert!(!limiter.allow(100));
        assert!(limiter.allow(1500));
    }

    #[test]
    fn test_null_telemetry_does_not_panic() {
        let mut telemetry = Telemetry::new();
        let mut sink = NullTelemetry;
        telemetry.emit_audio(
            &mut sink,
            AudioRecord {
                l: 0.0,
                t: 0.0,
                pk: 0.0,
                vl: 0.0,
                raw: 0.0,
                h: 0,
                alive: 0,
                z: Some(0.1),
            },
        );
    }
}
