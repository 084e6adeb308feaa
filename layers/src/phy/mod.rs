//! Physical Layer Primitives
//!
//! Synchronization-signal correlators, OFDM demodulation, cell-specific
//! reference signals, the MIB decoder and the polyphase resampler. The
//! synchronizer consumes these through the `SyncPhy` trait so the state
//! machine can be driven against scripted results in tests.

pub mod ofdm;
pub mod pbch;
pub mod pss;
pub mod ref_signal;
pub mod resampler;
pub mod sss;

pub use ofdm::OfdmDemod;
pub use pbch::{Mib, MibDecoder, PbchDecoder};
pub use pss::PssCorrelator;
pub use resampler::Resampler;
pub use sss::SssCorrelator;

use num_complex::Complex32;

/// Sample rate of the PSS search buffer (64-point FFT domain)
pub const SEARCH_RATE: f64 = 0.96e6;

/// Samples per subframe in the PSS search buffer
pub const SEARCH_SUBFRAME_LEN: usize = 960;

/// Samples per slot in the PSS search buffer
pub const SEARCH_SLOT_LEN: usize = 480;

/// PSS reference length in the search buffer (one OFDM symbol, no prefix)
pub const SEARCH_SYM_LEN: usize = 64;

/// Expected start of the PSS symbol within a time-aligned search buffer:
/// last symbol of slot 0
pub const PSS_TARGET: usize = SEARCH_SLOT_LEN - SEARCH_SYM_LEN;

/// Samples per subframe in the PBCH analysis buffer (1.92 MHz domain)
pub const PBCH_SUBFRAME_LEN: usize = 1920;

/// Synchronization measurement produced by the PSS correlators
#[derive(Debug, Clone, Copy, Default)]
pub struct SyncInfo {
    /// Normalized correlation magnitude (0-1)
    pub mag: f32,
    /// PSS symbol position in search-buffer samples
    pub coarse: i32,
    /// Sub-sample timing in 64ths of a search-buffer sample (0-64)
    pub fine: i32,
    /// Detected PSS sequence identity
    pub nid2: u8,
    /// Carrier offset estimate in Hz
    pub freq_offset: f64,
}

/// Outcome of an SSS detection attempt
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SssDetect {
    /// Group identity and half-frame subframe index recovered
    Found { nid1: u16, subframe: u32 },
    /// Measurement inconclusive, worth retrying at the current timing
    Searching,
    /// No candidate matched
    NotFound,
}

/// Synchronization primitives consumed by the state machine.
///
/// `pss_search`, `pss_sync` and `pss_fine_sync` operate on the 0.96 MHz
/// search buffer; `pss_detect` and `sss_detect` operate on the 1.92 MHz
/// PBCH buffer.
pub trait SyncPhy: Send {
    /// Full-subframe PSS search across all three sequence identities
    fn pss_search(&mut self, bufs: &[Vec<Complex32>]) -> Option<SyncInfo>;

    /// Windowed PSS timing refresh around the expected symbol position
    fn pss_sync(&mut self, bufs: &[Vec<Complex32>], nid2: u8) -> SyncInfo;

    /// Windowed PSS timing with sub-sample interpolation
    fn pss_fine_sync(&mut self, bufs: &[Vec<Complex32>], nid2: u8) -> SyncInfo;

    /// Frequency-domain PSS identity check
    fn pss_detect(&mut self, bufs: &[Vec<Complex32>]) -> Option<u8>;

    /// SSS group detection at the current timing
    fn sss_detect(&mut self, bufs: &[Vec<Complex32>], nid2: u8) -> SssDetect;
}

/// Concrete DSP implementation of the synchronization primitives
pub struct DspPhy {
    pss: PssCorrelator,
    sss: SssCorrelator,
}

impl DspPhy {
    pub fn new() -> Self {
        Self {
            pss: PssCorrelator::new(),
            sss: SssCorrelator::new(),
        }
    }
}

impl Default for DspPhy {
    fn default() -> Self {
        Self::new()
    }
}

impl SyncPhy for DspPhy {
    fn pss_search(&mut self, bufs: &[Vec<Complex32>]) -> Option<SyncInfo> {
        self.pss.search(bufs)
    }

    fn pss_sync(&mut self, bufs: &[Vec<Complex32>], nid2: u8) -> SyncInfo {
        self.pss.sync(bufs, nid2)
    }

    fn pss_fine_sync(&mut self, bufs: &[Vec<Complex32>], nid2: u8) -> SyncInfo {
        self.pss.fine_sync(bufs, nid2)
    }

    fn pss_detect(&mut self, bufs: &[Vec<Complex32>]) -> Option<u8> {
        self.pss.detect(bufs)
    }

    fn sss_detect(&mut self, bufs: &[Vec<Complex32>], nid2: u8) -> SssDetect {
        self.sss.detect(bufs, nid2)
    }
}
