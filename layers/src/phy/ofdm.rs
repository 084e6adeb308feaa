//! OFDM Subframe Demodulation
//!
//! Strips cyclic prefixes and transforms subframe samples into per-symbol
//! subcarrier bins. Also provides the cyclic-prefix correlation estimate of
//! the residual carrier offset.

use std::sync::Arc;

use common::Rbs;
use num_complex::Complex32;
use rustfft::{Fft, FftPlanner};

use crate::LayerError;

/// Symbols per subframe with normal cyclic prefix
pub const SYMBOLS_PER_SUBFRAME: usize = 14;

/// Per-bandwidth OFDM demodulator
pub struct OfdmDemod {
    fft: Arc<dyn Fft<f32>>,
    fft_len: usize,
    cp0: usize,
    cp: usize,
    slot_len: usize,
    subcarriers: usize,
}

impl OfdmDemod {
    pub fn new(rbs: Rbs) -> Self {
        let fft_len = rbs.fft_len();
        Self {
            fft: FftPlanner::new().plan_fft_forward(fft_len),
            fft_len,
            cp0: rbs.cp0_len(),
            cp: rbs.cp_len(),
            slot_len: rbs.slot_len(),
            subcarriers: rbs.subcarriers(),
        }
    }

    /// Samples per subframe this demodulator expects
    pub fn subframe_len(&self) -> usize {
        2 * self.slot_len
    }

    fn cp_of(&self, sym_in_slot: usize) -> usize {
        if sym_in_slot == 0 {
            self.cp0
        } else {
            self.cp
        }
    }

    /// Start of the data portion of symbol `sym` (0-13) within a subframe
    pub fn symbol_start(&self, sym: usize) -> usize {
        let slot = sym / 7;
        let within = sym % 7;
        let mut pos = slot * self.slot_len;
        for s in 0..within {
            pos += self.cp_of(s) + self.fft_len;
        }
        pos + self.cp_of(within)
    }

    /// Demodulate symbol `sym` into `count` subcarriers centred on (and
    /// excluding) DC, negative frequencies first
    pub fn symbol_bins(
        &self,
        subframe: &[Complex32],
        sym: usize,
        count: usize,
    ) -> Result<Vec<Complex32>, LayerError> {
        let start = self.symbol_start(sym);
        if start + self.fft_len > subframe.len() {
            return Err(LayerError::SubframeLength {
                got: subframe.len(),
                expected: self.subframe_len(),
            });
        }

        let mut buf = subframe[start..start + self.fft_len].to_vec();
        self.fft.process(&mut buf);

        let half = count / 2;
        let mut bins = Vec::with_capacity(count);
        for k in 0..count {
            let idx = if k < half {
                self.fft_len - half + k
            } else {
                k - half + 1
            };
            bins.push(buf[idx]);
        }
        Ok(bins)
    }

    /// Demodulate symbol `sym` over the full occupied bandwidth
    pub fn symbol(&self, subframe: &[Complex32], sym: usize) -> Result<Vec<Complex32>, LayerError> {
        self.symbol_bins(subframe, sym, self.subcarriers)
    }

    /// Demodulate all fourteen symbols into a resource grid
    pub fn grid(&self, subframe: &[Complex32]) -> Result<Vec<Vec<Complex32>>, LayerError> {
        (0..SYMBOLS_PER_SUBFRAME)
            .map(|sym| self.symbol(subframe, sym))
            .collect()
    }

    /// Residual carrier offset in Hz from cyclic-prefix correlation
    pub fn cp_freq_offset(&self, subframe: &[Complex32], rate: f64) -> f64 {
        let mut corr = Complex32::new(0.0, 0.0);

        for sym in 0..SYMBOLS_PER_SUBFRAME {
            let data = self.symbol_start(sym);
            let cp_len = self.cp_of(sym % 7);
            let cp_start = data - cp_len;
            for i in 0..cp_len {
                corr += subframe[cp_start + i] * subframe[cp_start + i + self.fft_len].conj();
            }
        }

        -(corr.arg() as f64) * rate / (2.0 * std::f64::consts::PI * self.fft_len as f64)
    }
}
