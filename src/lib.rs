//! Real-time audio analysis and beat-tracking core for an embedded
//! audio-reactive LED controller.
//!
//! The frame-loop orchestrator [`core::AudioCore`] wires five stages —
//! sample intake, envelope tracking, spectral onset detection, tempo/phase
//! tracking, and control-signal assembly — into a single-threaded, no-alloc
//! hot path. Hosts call [`core::AudioCore::on_block`] from the sample
//! producer (a hardware interrupt) and [`core::AudioCore::tick`] once per
//! video frame; everything else is an implementation detail behind those
//! two calls.

pub mod assembler;
pub mod clock;
pub mod config;
pub mod core;
pub mod envelope;
pub mod error;
pub mod intake;
pub mod onset;
pub mod tempo;
pub mod telemetry;

pub use assembler::AudioControl;
pub use config::CoreConfig;
pub use core::AudioCore;
pub use error::CoreError;

/// Initialize `env_logger` from the `RUST_LOG` environment variable. Hosts
/// embedding this core into a larger application (e.g. one already running
/// `env_logger::init()`) should skip this and configure logging themselves.
pub fn init_logging() {
    let _ = env_logger::try_init();
}
