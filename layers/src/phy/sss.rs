//! Secondary Synchronization Signal Detection
//!
//! The SSS interleaves two cyclically shifted m-sequences whose shifts carry
//! the cell identity group N_ID_1; the shift order distinguishes subframe 0
//! from subframe 5. Detection correlates the demodulated SSS symbol against
//! all candidate sequences for the known N_ID_2.

use std::sync::Arc;

use num_complex::Complex32;
use rustfft::{Fft, FftPlanner};

use super::SssDetect;
use crate::phy::ofdm::OfdmDemod;

/// Occupied subcarriers
const SSS_LEN: usize = 62;

/// Candidate group identities
const NUM_NID1: u16 = 168;

/// Correlation above this is a detection
const FOUND_THRESHOLD: f32 = 0.45;

/// Correlation above this keeps the search alive at the current timing
const SEARCH_THRESHOLD: f32 = 0.25;

/// Length-31 m-sequence from a 5-tap recurrence
fn m_sequence(taps: fn(&[u8], usize) -> u8) -> [f32; 31] {
    let mut x = [0u8; 36];
    x[4] = 1;
    for i in 0..31 {
        x[i + 5] = taps(&x, i);
    }
    let mut d = [0.0f32; 31];
    for (i, v) in d.iter_mut().enumerate() {
        *v = 1.0 - 2.0 * x[i] as f32;
    }
    d
}

fn s_tilde() -> [f32; 31] {
    m_sequence(|x, i| x[i + 2] ^ x[i])
}

fn c_tilde() -> [f32; 31] {
    m_sequence(|x, i| x[i + 3] ^ x[i])
}

fn z_tilde() -> [f32; 31] {
    m_sequence(|x, i| x[i + 4] ^ x[i + 2] ^ x[i + 1] ^ x[i])
}

/// Shift indices m0, m1 for a group identity
fn shift_pair(nid1: u16) -> (usize, usize) {
    let n = nid1 as usize;
    let q_prime = n / 30;
    let q = (n + q_prime * (q_prime + 1) / 2) / 30;
    let m_prime = n + q * (q + 1) / 2;
    let m0 = m_prime % 31;
    let m1 = (m0 + m_prime / 31 + 1) % 31;
    (m0, m1)
}

/// SSS sequence for one group, PSS identity and half-frame
pub fn sequence(nid1: u16, nid2: u8, subframe5: bool) -> [f32; SSS_LEN] {
    let s = s_tilde();
    let c = c_tilde();
    let z = z_tilde();
    let (m0, m1) = shift_pair(nid1);

    let (even_shift, odd_shift) = if subframe5 { (m1, m0) } else { (m0, m1) };
    let c0 = nid2 as usize;
    let c1 = nid2 as usize + 3;
    let z_shift = even_shift % 8;

    let mut d = [0.0f32; SSS_LEN];
    for n in 0..31 {
        d[2 * n] = s[(n + even_shift) % 31] * c[(n + c0) % 31];
        d[2 * n + 1] = s[(n + odd_shift) % 31] * c[(n + c1) % 31] * z[(n + z_shift) % 31];
    }
    d
}

/// SSS detector over the PBCH-rate buffer
pub struct SssCorrelator {
    demod: OfdmDemod,
    fft128: Arc<dyn Fft<f32>>,
    /// Candidate sequences for the active N_ID_2, both half-frames
    cache: Option<(u8, Vec<(u16, bool, [f32; SSS_LEN])>)>,
}

impl SssCorrelator {
    pub fn new() -> Self {
        Self {
            demod: OfdmDemod::new(common::Rbs::Rb6),
            fft128: FftPlanner::new().plan_fft_forward(128),
            cache: None,
        }
    }

    fn candidates(&mut self, nid2: u8) -> &[(u16, bool, [f32; SSS_LEN])] {
        let stale = self.cache.as_ref().map(|(n, _)| *n != nid2).unwrap_or(true);
        if stale {
            let mut set = Vec::with_capacity(2 * NUM_NID1 as usize);
            for nid1 in 0..NUM_NID1 {
                set.push((nid1, false, sequence(nid1, nid2, false)));
                set.push((nid1, true, sequence(nid1, nid2, true)));
            }
            self.cache = Some((nid2, set));
        }
        &self.cache.as_ref().unwrap().1
    }

    /// Detect N_ID_1 and the half-frame index from the SSS symbol
    /// (slot 0, symbol 5) of each channel's PBCH-rate subframe
    pub fn detect(&mut self, bufs: &[Vec<Complex32>], nid2: u8) -> SssDetect {
        let start = self.demod.symbol_start(5);
        let mut best = (0u16, false, 0.0f32);

        for buf in bufs {
            if start + 128 > buf.len() {
                return SssDetect::NotFound;
            }
            let mut sym = buf[start..start + 128].to_vec();
            self.fft128.process(&mut sym);

            let mut rx = Vec::with_capacity(SSS_LEN);
            for k in 0..31 {
                rx.push(sym[128 - 31 + k]);
            }
            for k in 0..31 {
                rx.push(sym[k + 1]);
            }

            let energy: f32 = rx.iter().map(|s| s.norm_sqr()).sum();
            if energy <= 0.0 {
                continue;
            }

            for (nid1, sf5, d) in self.candidates(nid2).iter() {
                let dot: Complex32 = rx.iter().zip(d.iter()).map(|(s, &v)| *s * v).sum();
                let mag = dot.norm_sqr() / (energy * SSS_LEN as f32);
                if mag > best.2 {
                    best = (*nid1, *sf5, mag);
                }
            }
        }

        if best.2 > FOUND_THRESHOLD {
            SssDetect::Found {
                nid1: best.0,
                subframe: if best.1 { 5 } else { 0 },
            }
        } else if best.2 > SEARCH_THRESHOLD {
            SssDetect::Searching
        } else {
            SssDetect::NotFound
        }
    }
}

impl Default for SssCorrelator {
    fn default() -> Self {
        Self::new()
    }
}
