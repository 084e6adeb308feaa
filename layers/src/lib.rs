//! LTE Receive-Side Signal Processing
//!
//! This crate implements the receiver core: PHY primitives, the polyphase
//! resampler, the subframe converter, the synchronizer state machine and the
//! pipeline stages that hand decoded subframes downstream.

pub mod phy;
pub mod pipeline;
pub mod sync;

use interfaces::InterfaceError;
use thiserror::Error;

/// Errors raised by the signal-processing layers
#[derive(Error, Debug)]
pub enum LayerError {
    #[error("resampler length mismatch: {out_len} out x {q} != {in_len} in x {p}")]
    ResampleLength {
        in_len: usize,
        out_len: usize,
        p: usize,
        q: usize,
    },

    #[error("subframe length mismatch: got {got}, expected {expected}")]
    SubframeLength { got: usize, expected: usize },

    #[error("layer not initialized")]
    NotInitialized,

    #[error("interface error: {0}")]
    Interface(#[from] InterfaceError),
}
