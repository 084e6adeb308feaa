//! Radio Device Interfaces Library
//!
//! This crate provides the boundary between the receiver core and the radio
//! hardware: the timestamped sample buffer, the device abstraction with its
//! SDR and file-replay implementations, and the diagnostic UDP sink.

pub mod device;
pub mod diag;
pub mod file_device;
pub mod sdr;
pub mod timestamp_buffer;

use num_complex::Complex;
use thiserror::Error;

/// Device-domain IQ sample, 16 bits per component
pub type Sample16 = Complex<i16>;

/// Interface errors
#[derive(Error, Debug)]
pub enum InterfaceError {
    #[error("Device open failed: {0}")]
    DeviceOpen(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid resource block count: {0}")]
    InvalidRbs(u32),

    #[error("Non-monotonic device timestamp: {ts} after {prev}")]
    NonMonotonicTimestamp { ts: i64, prev: i64 },

    #[error("Insufficient samples in buffer at timestamp {0}")]
    InsufficientSamples(i64),

    #[error("Channel count mismatch: got {got}, expected {expected}")]
    ChannelMismatch { got: usize, expected: usize },

    #[error("End of sample stream")]
    EndOfStream,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
