// Error types for the beat-tracking core
//
// This module defines the error taxonomy described by the three failure
// kinds the core distinguishes: transient conditions are not modeled as
// errors at all (they are handled inline as skips), parameter errors are
// clamped on ingress, and sanity violations are represented here so they
// can be logged with a stable code and repaired by the caller.

use log::error;
use std::fmt;

/// Standard way to get a numeric code and a human-readable message from a
/// domain error type.
pub trait ErrorCode {
    /// Get the numeric error code.
    fn code(&self) -> i32;

    /// Get the human-readable error message.
    fn message(&self) -> String;
}

/// Error code constants for sanity violations detected inside the core.
///
/// Error code range: 3001-3006
pub struct CoreErrorCodes;

impl CoreErrorCodes {
    /// Phase advanced past the sanity limit.
    pub const PHASE_OVERFLOW: i32 = 3001;
    /// `beats_added` in a single phase wrap exceeded the pathological-dt guard.
    pub const BEATS_ADDED_OVERFLOW: i32 = 3002;
    /// Envelope state became non-finite (NaN or infinite).
    pub const NON_FINITE_ENVELOPE: i32 = 3003;
    /// Adaptive max dropped below adaptive min (or their minimum span).
    pub const DEGENERATE_RANGE: i32 = 3004;
    /// Config file could not be read or parsed.
    pub const CONFIG_LOAD_FAILED: i32 = 3005;
    /// WAV fixture could not be read (diagnostic tooling only).
    pub const FIXTURE_READ_FAILED: i32 = 3006;
}

/// Sanity violations the core can detect and repair at runtime.
///
/// These never halt the audio core: each variant has a defined repair
/// action applied by the caller before the error is logged.
#[derive(Debug, Clone, PartialEq)]
pub enum CoreError {
    /// Phase exceeded the sanity limit (>100); repaired by resetting to 1.
    PhaseOverflow { phase: f32 },
    /// `beats_added` exceeded 10 in one wrap; repaired by treating it as one beat.
    BeatsAddedOverflow { beats_added: u32 },
    /// Envelope tracker produced a non-finite value; repaired by resetting state.
    NonFiniteEnvelope { field: &'static str },
    /// `max_env < min_env + MIN_SPAN`; repaired by widening the window.
    DegenerateRange { min_env: f32, max_env: f32 },
    /// Configuration file failed to load; repaired by falling back to defaults.
    ConfigLoadFailed { reason: String },
    /// WAV fixture failed to load (diagnostic tooling only).
    FixtureReadFailed { reason: String },
}

impl ErrorCode for CoreError {
    fn code(&self) -> i32 {
        match self {
            CoreError::PhaseOverflow { .. } => CoreErrorCodes::PHASE_OVERFLOW,
            CoreError::BeatsAddedOverflow { .. } => CoreErrorCodes::BEATS_ADDED_OVERFLOW,
            CoreError::NonFiniteEnvelope { .. } => CoreErrorCodes::NON_FINITE_ENVELOPE,
            CoreError::DegenerateRange { .. } => CoreErrorCodes::DEGENERATE_RANGE,
            CoreError::ConfigLoadFailed { .. } => CoreErrorCodes::CONFIG_LOAD_FAILED,
            CoreError::FixtureReadFailed { .. } => CoreErrorCodes::FIXTURE_READ_FAILED,
        }
    }

    fn message(&self) -> String {
        match self {
            CoreError::PhaseOverflow { phase } => {
                format!("phase {} exceeded sanity limit, reset to 1.0", phase)
            }
            CoreError::BeatsAddedOverflow { beats_added } => {
                format!(
                    "beats_added {} exceeded pathological-dt guard, clamped to 1",
                    beats_added
                )
            }
            CoreError::NonFiniteEnvelope { field } => {
                format!("envelope field '{}' became non-finite, state reset", field)
            }
            CoreError::DegenerateRange { min_env, max_env } => {
                format!(
                    "adaptive range degenerate (min={}, max={}), widened to MIN_SPAN",
                    min_env, max_env
                )
            }
            CoreError::ConfigLoadFailed { reason } => {
                format!("failed to load configuration: {}", reason)
            }
            CoreError::FixtureReadFailed { reason } => {
                format!("failed to read fixture: {}", reason)
            }
        }
    }
}

impl fmt::Display for CoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CoreError (code {}): {}", self.code(), self.message())
    }
}

impl std::error::Error for CoreError {}

impl From<std::io::Error> for CoreError {
    fn from(err: std::io::Error) -> Self {
        CoreError::ConfigLoadFailed {
            reason: err.to_string(),
        }
    }
}

/// Log a sanity violation with structured context. Non-blocking, never panics.
///
/// Callers should rate-limit this via [`crate::telemetry::RateLimiter`] since
/// sanity violations can otherwise repeat every frame.
pub fn log_core_error(err: &CoreError, context: &str) {
    error!(
        "Sanity violation in {}: code={}, message={}",
        context,
        err.code(),
        err.message()
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_core_error_codes() {
        assert_eq!(
            CoreError::PhaseOverflow { phase: 150.0 }.code(),
            CoreErrorCodes::PHASE_OVERFLOW
        );
        assert_eq!(
            CoreError::BeatsAddedOverflow { beats_added: 11 }.code(),
            CoreErrorCodes::BEATS_ADDED_OVERFLOW
        );
        assert_eq!(
            CoreError::NonFiniteEnvelope { field: "env" }.code(),
            CoreErrorCodes::NON_FINITE_ENVELOPE
        );
        assert_eq!(
            CoreError::DegenerateRange {
                min_env: 1.0,
                max_env: 1.0
            }
            .code(),
            CoreErrorCodes::DEGENERATE_RANGE
        );
    }

    #[test]
    fn test_error_messages() {
        let err = CoreError::PhaseOverflow { phase: 150.0 };
        assert!(err.message().contains("150"));

        let err = CoreError::DegenerateRange {
            min_env: 2.0,
            max_env: 2.0,
        };
        assert!(err.message().contains("degenerate"));
    }

    #[test]
    fn test_display_with_code() {
        let d = format!("{}", CoreError::BeatsAddedOverflow { beats_added: 20 });
        assert!(d.contains("3002"));
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "missing file");
        let core_err: CoreError = io_err.into();
        match core_err {
            CoreError::ConfigLoadFailed { reason } => assert!(reason.contains("missing file")),
            _ => panic!("expected ConfigLoadFailed variant"),
        }
    }

    #[test]
    fn test_error_propagation() {
        fn may_fail() -> Result<(), CoreError> {
            Err(CoreError::PhaseOverflow { phase: 200.0 })
        }
        fn caller() -> Result<(), CoreError> {
            may_fail()?;
            Ok(())
        }
        assert!(caller().is_err());
    }

    #[test]
    fn test_log_core_error_does_not_panic() {
        log_core_error(&CoreError::PhaseOverflow { phase: 101.0 }, "tempo::tick");
    }
}
