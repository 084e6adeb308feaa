//! Cell-Specific Reference Signals
//!
//! Gold-sequence generation and per-port CRS maps, used for PBCH channel
//! estimation and the residual carrier-offset measurement in the PDSCH
//! stage. Maps are regenerated whenever the cell identity changes.

use common::{CellId, Rbs};
use num_complex::Complex32;

/// Maximum downlink bandwidth in resource blocks
const MAX_RBS: usize = 110;

/// Gold-sequence warm-up discard
const NC: usize = 1600;

/// Length-31 Gold sequence c(n) for the given initialiser
pub fn gold_sequence(c_init: u32, len: usize) -> Vec<u8> {
    let total = NC + len;
    let mut x1 = vec![0u8; total + 31];
    let mut x2 = vec![0u8; total + 31];

    x1[0] = 1;
    for i in 0..31 {
        x2[i] = ((c_init >> i) & 1) as u8;
    }

    for i in 0..total {
        x1[i + 31] = x1[i + 3] ^ x1[i];
        x2[i + 31] = x2[i + 3] ^ x2[i + 2] ^ x2[i + 1] ^ x2[i];
    }

    (0..len).map(|i| x1[i + NC] ^ x2[i + NC]).collect()
}

/// CRS values and subcarrier positions for one (port, slot, symbol)
#[derive(Debug, Clone)]
pub struct RefMap {
    pub port: u8,
    /// Symbol index within the slot
    pub l: usize,
    /// Subcarrier indices into the occupied grid
    pub positions: Vec<usize>,
    /// QPSK reference values at those positions
    pub values: Vec<Complex32>,
}

/// Frequency-shift index v for a port and symbol
fn v_shift(port: u8, l: usize, ns: usize) -> usize {
    match (port, l) {
        (0, 0) => 0,
        (0, _) => 3,
        (1, 0) => 3,
        (1, _) => 0,
        (2, _) => 3 * (ns % 2),
        _ => 3 + 3 * (ns % 2),
    }
}

/// Generate the CRS map for one cell, antenna port, slot and symbol
pub fn gen_ref_map(cell_id: CellId, port: u8, ns: usize, l: usize, rbs: Rbs) -> RefMap {
    let n_cp = 1; // normal cyclic prefix
    let c_init = (1 << 10) * (7 * (ns as u32 + 1) + l as u32 + 1) * (2 * cell_id.0 as u32 + 1)
        + 2 * cell_id.0 as u32
        + n_cp;

    let rb_count = rbs.count() as usize;
    let c = gold_sequence(c_init, 4 * MAX_RBS);

    let scale = std::f32::consts::FRAC_1_SQRT_2;
    let shift = (v_shift(port, l, ns) + cell_id.0 as usize % 6) % 6;

    let mut positions = Vec::with_capacity(2 * rb_count);
    let mut values = Vec::with_capacity(2 * rb_count);
    for m in 0..2 * rb_count {
        positions.push(6 * m + shift);

        // Index into the full-bandwidth sequence, centre-aligned
        let mp = m + MAX_RBS - rb_count;
        let re = scale * (1.0 - 2.0 * c[2 * mp] as f32);
        let im = scale * (1.0 - 2.0 * c[2 * mp + 1] as f32);
        values.push(Complex32::new(re, im));
    }

    RefMap { port, l, positions, values }
}

/// Least-squares channel estimates at the CRS positions of one symbol
pub fn channel_at_refs(symbol: &[Complex32], map: &RefMap) -> Vec<Complex32> {
    map.positions
        .iter()
        .zip(&map.values)
        .map(|(&k, &v)| symbol[k] * v.conj())
        .collect()
}

/// Channel estimate interpolated across all occupied subcarriers
pub fn interpolate_channel(symbol: &[Complex32], map: &RefMap) -> Vec<Complex32> {
    let pilots = channel_at_refs(symbol, map);
    let mut h = vec![Complex32::new(0.0, 0.0); symbol.len()];

    for k in 0..symbol.len() {
        // Nearest pilots straddling k
        let idx = map.positions.partition_point(|&p| p < k);
        let est = if idx == 0 {
            pilots[0]
        } else if idx >= pilots.len() {
            pilots[pilots.len() - 1]
        } else {
            let (k0, k1) = (map.positions[idx - 1], map.positions[idx]);
            let t = (k - k0) as f32 / (k1 - k0) as f32;
            pilots[idx - 1] * (1.0 - t) + pilots[idx] * t
        };
        h[k] = est;
    }
    h
}

/// Residual carrier offset from the port-0 CRS phase drift between
/// symbols 0 and 4 of each slot
pub fn crs_freq_offset(
    grid: &[Vec<Complex32>],
    cell_id: CellId,
    rbs: Rbs,
    rate: f64,
) -> f64 {
    let mut corr = Complex32::new(0.0, 0.0);

    for slot in 0..2 {
        let m0 = gen_ref_map(cell_id, 0, slot, 0, rbs);
        let m4 = gen_ref_map(cell_id, 0, slot, 4, rbs);
        let h0 = channel_at_refs(&grid[slot * 7], &m0);
        let h4 = channel_at_refs(&grid[slot * 7 + 4], &m4);
        for (a, b) in h4.iter().zip(&h0) {
            corr += a * b.conj();
        }
    }

    // Four symbol periods between the two CRS-bearing symbols
    let sym_period = (rbs.fft_len() + rbs.cp_len()) as f64 / rate;
    (corr.arg() as f64) / (2.0 * std::f64::consts::PI * 4.0 * sym_period)
}

/// Build the PBCH-band reference maps for both slots of subframe 0,
/// ports 0 and 1, symbols 0 and 4
pub fn pbch_ref_maps(cell_id: CellId) -> [[RefMap; 4]; 2] {
    [0, 1].map(|ns| {
        [
            gen_ref_map(cell_id, 0, ns, 0, Rbs::Rb6),
            gen_ref_map(cell_id, 1, ns, 0, Rbs::Rb6),
            gen_ref_map(cell_id, 0, ns, 4, Rbs::Rb6),
            gen_ref_map(cell_id, 1, ns, 4, Rbs::Rb6),
        ]
    })
}

/// Synthesize a subframe carrying only port-0 CRS, for tests and priming
#[cfg(test)]
pub fn crs_only_subframe(cell_id: CellId, rbs: Rbs, freq_shift_hz: f64) -> Vec<Complex32> {
    use crate::phy::ofdm::OfdmDemod;
    use rustfft::FftPlanner;

    let demod = OfdmDemod::new(rbs);
    let fft_len = rbs.fft_len();
    let planner = FftPlanner::new().plan_fft_inverse(fft_len);
    let mut out = vec![Complex32::new(0.0, 0.0); rbs.subframe_len()];
    let half = rbs.subcarriers() / 2;

    for slot in 0..2 {
        for l in [0usize, 4] {
            let map = gen_ref_map(cell_id, 0, slot, l, rbs);
            let mut bins = vec![Complex32::new(0.0, 0.0); fft_len];
            for (&k, &v) in map.positions.iter().zip(&map.values) {
                let idx = if k < half { fft_len - half + k } else { k - half + 1 };
                bins[idx] = v;
            }
            planner.process(&mut bins);

            let sym = slot * 7 + l;
            let start = demod.symbol_start(sym);
            out[start..start + fft_len].copy_from_slice(&bins);
            // Cyclic prefix
            let cp = start - if l == 0 { rbs.cp0_len() } else { rbs.cp_len() };
            for i in 0..(start - cp) {
                out[cp + i] = bins[fft_len - (start - cp) + i];
            }
        }
    }

    if freq_shift_hz != 0.0 {
        let rate = rbs.lte_rate();
        for (n, s) in out.iter_mut().enumerate() {
            let phi = 2.0 * std::f64::consts::PI * freq_shift_hz * n as f64 / rate;
            *s *= Complex32::new(phi.cos() as f32, phi.sin() as f32);
        }
    }
    out
}
