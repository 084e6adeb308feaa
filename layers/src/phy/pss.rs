//! Primary Synchronization Signal Detection
//!
//! Zadoff-Chu root sequences and the time/frequency-domain correlators used
//! by the four PSS acquisition phases. Time-domain correlation runs in the
//! 0.96 MHz search buffer; the frequency-domain identity check runs on the
//! PSS symbol of the 1.92 MHz PBCH buffer.

use std::sync::Arc;

use num_complex::Complex32;
use rustfft::{Fft, FftPlanner};

use super::{SyncInfo, PSS_TARGET, SEARCH_RATE, SEARCH_SYM_LEN};
use crate::phy::ofdm::OfdmDemod;

/// Zadoff-Chu root per sequence identity
const ZC_ROOTS: [u32; 3] = [25, 29, 34];

/// Sequence length across the occupied subcarriers
const ZC_LEN: usize = 62;

/// Minimum normalized correlation for a full-search hit
const SEARCH_THRESHOLD: f32 = 0.5;

/// Minimum normalized correlation for the frequency-domain check
const DETECT_THRESHOLD: f32 = 0.4;

/// Timing refresh window half-width around the expected symbol position
const SYNC_WINDOW: usize = 32;

/// Frequency-domain Zadoff-Chu sequence for one identity
pub fn zc_sequence(nid2: u8) -> Vec<Complex32> {
    let u = ZC_ROOTS[nid2 as usize] as f64;
    let mut d = Vec::with_capacity(ZC_LEN);
    for n in 0..31u64 {
        let phi = -std::f64::consts::PI * u * (n * (n + 1)) as f64 / 63.0;
        d.push(Complex32::new(phi.cos() as f32, phi.sin() as f32));
    }
    for n in 31..62u64 {
        let phi = -std::f64::consts::PI * u * ((n + 1) * (n + 2)) as f64 / 63.0;
        d.push(Complex32::new(phi.cos() as f32, phi.sin() as f32));
    }
    d
}

/// Map the 62 occupied subcarriers onto an FFT vector around DC
fn map_subcarriers(d: &[Complex32], fft_len: usize) -> Vec<Complex32> {
    let mut bins = vec![Complex32::new(0.0, 0.0); fft_len];
    for k in 0..31 {
        bins[fft_len - 31 + k] = d[k];
    }
    for k in 0..31 {
        bins[k + 1] = d[31 + k];
    }
    bins
}

/// Unit-energy time-domain PSS reference at the given FFT size
pub fn time_sequence(nid2: u8, fft_len: usize) -> Vec<Complex32> {
    let mut bins = map_subcarriers(&zc_sequence(nid2), fft_len);
    FftPlanner::new().plan_fft_inverse(fft_len).process(&mut bins);

    let energy: f32 = bins.iter().map(|s| s.norm_sqr()).sum();
    let scale = 1.0 / energy.sqrt();
    bins.iter_mut().for_each(|s| *s *= scale);
    bins
}

/// PSS correlator bank over all three sequence identities
pub struct PssCorrelator {
    /// Unit-energy 64-sample time references
    refs: [Vec<Complex32>; 3],
    /// 62-bin frequency references
    freq_refs: [Vec<Complex32>; 3],
    demod: OfdmDemod,
    fft128: Arc<dyn Fft<f32>>,
}

impl PssCorrelator {
    pub fn new() -> Self {
        Self {
            refs: [
                time_sequence(0, SEARCH_SYM_LEN),
                time_sequence(1, SEARCH_SYM_LEN),
                time_sequence(2, SEARCH_SYM_LEN),
            ],
            freq_refs: [zc_sequence(0), zc_sequence(1), zc_sequence(2)],
            demod: OfdmDemod::new(common::Rbs::Rb6),
            fft128: FftPlanner::new().plan_fft_forward(128),
        }
    }

    /// Correlation power and first-channel dot products at one position
    fn correlate_at(
        &self,
        bufs: &[Vec<Complex32>],
        pos: usize,
        nid2: u8,
    ) -> (f32, Complex32, Complex32) {
        let reference = &self.refs[nid2 as usize];
        let mut power = 0.0f32;
        let mut energy = 0.0f32;
        let mut half0 = Complex32::new(0.0, 0.0);
        let mut half1 = Complex32::new(0.0, 0.0);

        for (ch, buf) in bufs.iter().enumerate() {
            let mut dot = Complex32::new(0.0, 0.0);
            for (i, &r) in reference.iter().enumerate() {
                let s = buf[pos + i];
                let term = s * r.conj();
                dot += term;
                energy += s.norm_sqr();
                if ch == 0 {
                    if i < SEARCH_SYM_LEN / 2 {
                        half0 += term;
                    } else {
                        half1 += term;
                    }
                }
            }
            power += dot.norm_sqr();
        }

        let mag = if energy > 0.0 { power / energy } else { 0.0 };
        (mag, half0, half1)
    }

    /// Carrier offset from the phase drift between the two symbol halves
    fn freq_offset(half0: Complex32, half1: Complex32) -> f64 {
        let phase = (half1 * half0.conj()).arg() as f64;
        phase * SEARCH_RATE / (std::f64::consts::PI * SEARCH_SYM_LEN as f64)
    }

    /// Full-subframe search across all identities
    pub fn search(&self, bufs: &[Vec<Complex32>]) -> Option<SyncInfo> {
        let len = bufs[0].len();
        let mut best = SyncInfo::default();

        for nid2 in 0..3u8 {
            for pos in 0..=(len - SEARCH_SYM_LEN) {
                let (mag, h0, h1) = self.correlate_at(bufs, pos, nid2);
                if mag > best.mag {
                    best = SyncInfo {
                        mag,
                        coarse: pos as i32,
                        fine: 0,
                        nid2,
                        freq_offset: Self::freq_offset(h0, h1),
                    };
                }
            }
        }

        if best.mag > SEARCH_THRESHOLD {
            Some(best)
        } else {
            None
        }
    }

    /// Windowed scan around the expected symbol position
    fn window_scan(&self, bufs: &[Vec<Complex32>], nid2: u8) -> (SyncInfo, [f32; 3]) {
        let len = bufs[0].len();
        let lo = PSS_TARGET.saturating_sub(SYNC_WINDOW);
        let hi = (PSS_TARGET + SYNC_WINDOW).min(len - SEARCH_SYM_LEN);

        let mut best = SyncInfo { nid2, ..Default::default() };
        for pos in lo..=hi {
            let (mag, h0, h1) = self.correlate_at(bufs, pos, nid2);
            if mag > best.mag {
                best = SyncInfo {
                    mag,
                    coarse: pos as i32,
                    fine: 0,
                    nid2,
                    freq_offset: Self::freq_offset(h0, h1),
                };
            }
        }

        // Neighbour magnitudes for sub-sample interpolation
        let pos = best.coarse as usize;
        let before = if pos > 0 {
            self.correlate_at(bufs, pos - 1, nid2).0
        } else {
            0.0
        };
        let after = if pos + 1 + SEARCH_SYM_LEN <= len {
            self.correlate_at(bufs, pos + 1, nid2).0
        } else {
            0.0
        };
        (best, [before, best.mag, after])
    }

    /// Timing refresh at integer resolution
    pub fn sync(&self, bufs: &[Vec<Complex32>], nid2: u8) -> SyncInfo {
        self.window_scan(bufs, nid2).0
    }

    /// Timing refresh with fractional-sample estimate in 64ths
    pub fn fine_sync(&self, bufs: &[Vec<Complex32>], nid2: u8) -> SyncInfo {
        let (mut info, mags) = self.window_scan(bufs, nid2);

        let denom = mags[0] - 2.0 * mags[1] + mags[2];
        let delta = if denom.abs() > 1e-12 {
            (0.5 * (mags[0] - mags[2]) / denom).clamp(-0.5, 0.5)
        } else {
            0.0
        };
        info.fine = ((delta * 64.0).round() as i32 + 32).clamp(0, 64);
        info
    }

    /// Frequency-domain identity check on the PBCH-rate buffer
    pub fn detect(&self, bufs: &[Vec<Complex32>]) -> Option<u8> {
        let mut best = (0u8, 0.0f32);

        for buf in bufs {
            let start = self.demod.symbol_start(6);
            if start + 128 > buf.len() {
                return None;
            }
            let mut sym = buf[start..start + 128].to_vec();
            self.fft128.process(&mut sym);

            let mut rx = Vec::with_capacity(ZC_LEN);
            for k in 0..31 {
                rx.push(sym[128 - 31 + k]);
            }
            for k in 0..31 {
                rx.push(sym[k + 1]);
            }

            let energy: f32 = rx.iter().map(|s| s.norm_sqr()).sum();
            for (nid2, reference) in self.freq_refs.iter().enumerate() {
                let dot: Complex32 = rx
                    .iter()
                    .zip(reference)
                    .map(|(s, r)| *s * r.conj())
                    .sum();
                let mag = if energy > 0.0 {
                    dot.norm_sqr() / (energy * ZC_LEN as f32)
                } else {
                    0.0
                };
                if mag > best.1 {
                    best = (nid2 as u8, mag);
                }
            }
        }

        if best.1 > DETECT_THRESHOLD {
            Some(best.0)
        } else {
            None
        }
    }
}

impl Default for PssCorrelator {
    fn default() -> Self {
        Self::new()
    }
}
