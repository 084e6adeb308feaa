//! Inter-Stage Frame Buffer
//!
//! One subframe of per-channel samples plus the metadata the synchronizer
//! attaches before hand-off. Buffers are plain data moved through the
//! queues; a fixed pool circulates between the synchronizer and the
//! decoder stages.

use common::{CellId, PhichNg, Rbs};
use num_complex::Complex32;

/// Subframe samples and frame-level metadata
#[derive(Debug, Clone)]
pub struct FrameBuffer {
    pub cell_id: CellId,
    pub rbs: Rbs,
    pub phich_ng: PhichNg,
    pub tx_antennas: u8,
    /// System frame number (0-1023)
    pub frame: u32,
    /// Subframe number (0-9)
    pub subframe: u32,
    /// Residual carrier offset measured downstream, fed back to the tuner
    pub freq_offset: f64,
    /// Set downstream when a transport block passed its CRC
    pub crc_valid: bool,
    /// Per-channel complex samples
    pub channels: Vec<Vec<Complex32>>,
}

impl FrameBuffer {
    pub fn new(chans: usize) -> Self {
        Self {
            cell_id: CellId(0),
            rbs: Rbs::Rb6,
            phich_ng: PhichNg::One,
            tx_antennas: 1,
            frame: 0,
            subframe: 0,
            freq_offset: 0.0,
            crc_valid: false,
            channels: vec![Vec::new(); chans],
        }
    }
}

/// Fixed-capacity sliding window average, used to smooth the
/// frequency-offset feedback
pub struct RingAverage {
    window: Vec<f64>,
    pos: usize,
    filled: usize,
}

impl RingAverage {
    pub fn new(capacity: usize) -> Self {
        Self {
            window: vec![0.0; capacity],
            pos: 0,
            filled: 0,
        }
    }

    pub fn push(&mut self, value: f64) {
        self.window[self.pos] = value;
        self.pos = (self.pos + 1) % self.window.len();
        self.filled = (self.filled + 1).min(self.window.len());
    }

    pub fn full(&self) -> bool {
        self.filled == self.window.len()
    }

    pub fn average(&self) -> f64 {
        if self.filled == 0 {
            return 0.0;
        }
        self.window[..self.filled].iter().sum::<f64>() / self.filled as f64
    }

    /// Empty the window, restarting the fill
    pub fn reset(&mut self) {
        self.pos = 0;
        self.filled = 0;
    }
}
