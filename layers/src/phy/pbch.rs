//! PBCH Decoding
//!
//! Recovers the Master Information Block from the central six resource
//! blocks of subframe 0: OFDM demodulation of slot-1 symbols, CRS channel
//! estimation, QPSK soft demodulation, descrambling, rate-matching recovery,
//! tail-biting Viterbi decoding and the CRC-16 antenna-count mask. The 40 ms
//! scrambling period is searched blind across its four frame phases.

use common::{bit_field, crc16, CellId, PhichNg, Rbs};
use num_complex::Complex32;
use tracing::debug;

use crate::phy::ofdm::OfdmDemod;
use crate::phy::ref_signal::{gen_ref_map, gold_sequence, interpolate_channel, RefMap};

/// MIB payload bits
const MIB_BITS: usize = 24;

/// Payload plus CRC
const K: usize = MIB_BITS + 16;

/// Rate-matched bits of the full 40 ms PBCH period
const E_TOTAL: usize = 1920;

/// Rate-matched bits carried in one radio frame
const E_FRAME: usize = 480;

/// Tail-biting convolutional polynomials, constraint length 7
const POLYS: [u32; 3] = [0o133, 0o171, 0o165];

/// Inter-column permutation of the convolutional sub-block interleaver
const COL_PERM: [usize; 32] = [
    1, 17, 9, 25, 5, 21, 13, 29, 3, 19, 11, 27, 7, 23, 15, 31, 0, 16, 8, 24, 4, 20, 12, 28, 2,
    18, 10, 26, 6, 22, 14, 30,
];

/// CRC masks indexed by transmit antenna configuration
const CRC_MASKS: [(u16, u8); 3] = [(0x0000, 1), (0xFFFF, 2), (0x5555, 4)];

/// Master Information Block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Mib {
    pub rbs: Rbs,
    pub phich_ng: PhichNg,
    /// Extended PHICH duration flag
    pub phich_extended: bool,
    /// Full system frame number, phase included
    pub frame: u32,
    pub tx_antennas: u8,
}

/// MIB decoding entry point consumed by the PBCH stage
pub trait MibDecoder: Send {
    /// Attempt a decode from per-channel PBCH-rate subframes
    fn decode_mib(&mut self, bufs: &[Vec<Complex32>], cell_id: CellId) -> Option<Mib>;
}

fn parity(v: u32) -> u8 {
    (v.count_ones() & 1) as u8
}

/// Tail-biting convolutional encoder, used by the decoder tests and the
/// transmit mirror
pub fn conv_encode(bits: &[u8]) -> [Vec<u8>; 3] {
    let k = bits.len();
    // Tail biting: the register starts loaded with the last six bits
    let mut state = 0u32;
    for j in 0..6 {
        state |= (bits[k - 1 - j] as u32) << (5 - j);
    }

    let mut out = [
        Vec::with_capacity(k),
        Vec::with_capacity(k),
        Vec::with_capacity(k),
    ];
    for &b in bits {
        let reg = ((b as u32) << 6) | state;
        for (i, poly) in POLYS.iter().enumerate() {
            out[i].push(parity(reg & poly));
        }
        state = ((b as u32) << 5) | (state >> 1);
    }
    out
}

/// Soft tail-biting Viterbi decode of `k` bits from three LLR streams.
///
/// Runs the trellis over the sequence twice and takes the second pass of the
/// traceback, which converges to the tail-biting path for any realistic
/// signal quality.
fn viterbi_decode(llrs: &[Vec<f32>; 3], k: usize) -> Vec<u8> {
    const STATES: usize = 64;
    let steps = 2 * k;

    let mut metrics = vec![0.0f32; STATES];
    let mut decisions = vec![[0u8; STATES]; steps];

    for t in 0..steps {
        let pos = t % k;
        let mut next = vec![f32::NEG_INFINITY; STATES];
        let mut dec = [0u8; STATES];

        for ns in 0..STATES {
            let b = (ns >> 5) as u32;
            let tail = (ns & 0x1F) << 1;
            for lsb in 0..2usize {
                let ps = tail | lsb;
                let reg = (b << 6) | ps as u32;
                let mut metric = metrics[ps];
                for (i, poly) in POLYS.iter().enumerate() {
                    let out = parity(reg & poly);
                    metric += llrs[i][pos] * (1.0 - 2.0 * out as f32);
                }
                if metric > next[ns] {
                    next[ns] = metric;
                    dec[ns] = ps as u8;
                }
            }
        }

        metrics = next;
        decisions[t] = dec;
    }

    let mut state = metrics
        .iter()
        .enumerate()
        .max_by(|a, b| a.1.partial_cmp(b.1).unwrap())
        .map(|(s, _)| s)
        .unwrap_or(0);

    let mut bits = vec![0u8; steps];
    for t in (0..steps).rev() {
        bits[t] = (state >> 5) as u8;
        state = decisions[t][state] as usize;
    }

    bits[k..].to_vec()
}

/// Bit-collection order of the convolutional rate matcher: for each of the
/// 120 non-dummy circular-buffer positions, the (stream, payload index)
/// it carries
fn collect_order() -> Vec<(usize, usize)> {
    const COLS: usize = 32;
    let rows = K.div_ceil(COLS);
    let dummies = rows * COLS - K;

    let mut order = Vec::with_capacity(3 * K);
    for stream in 0..3 {
        for p in 0..rows * COLS {
            let col = p / rows;
            let row = p % rows;
            let src = row * COLS + COL_PERM[col];
            if src >= dummies {
                order.push((stream, src - dummies));
            }
        }
    }
    order
}

/// Rate-match one frame's 480 bits from the three encoded streams,
/// starting at `phase` frames into the 40 ms period (transmit mirror)
pub fn rate_match_frame(streams: &[Vec<u8>; 3], phase: usize) -> Vec<u8> {
    let order = collect_order();
    (0..E_FRAME)
        .map(|u| {
            let (s, p) = order[(phase * E_FRAME + u) % order.len()];
            streams[s][p]
        })
        .collect()
}

/// Unpack the 24 MIB payload bits
fn unpack_mib(bits: &[u8], phase: u32, tx_antennas: u8) -> Option<Mib> {
    let rbs = match bit_field(bits, 0, 3) {
        0 => Rbs::Rb6,
        1 => Rbs::Rb15,
        2 => Rbs::Rb25,
        3 => Rbs::Rb50,
        4 => Rbs::Rb75,
        5 => Rbs::Rb100,
        _ => return None,
    };
    let phich_extended = bits[3] != 0;
    let phich_ng = PhichNg::from_bits(bit_field(bits, 4, 2) as u8)?;
    let sfn_high = bit_field(bits, 6, 8);

    Some(Mib {
        rbs,
        phich_ng,
        phich_extended,
        frame: (sfn_high << 2) | phase,
        tx_antennas,
    })
}

/// Pack a MIB into its 24 payload bits (transmit mirror)
pub fn pack_mib(mib: &Mib) -> Vec<u8> {
    let bw = match mib.rbs {
        Rbs::Rb6 => 0u32,
        Rbs::Rb15 => 1,
        Rbs::Rb25 => 2,
        Rbs::Rb50 => 3,
        Rbs::Rb75 => 4,
        Rbs::Rb100 => 5,
    };
    let ng = mib.phich_ng as u32;
    let sfn_high = mib.frame >> 2;

    let mut bits = Vec::with_capacity(MIB_BITS);
    for j in (0..3).rev() {
        bits.push(((bw >> j) & 1) as u8);
    }
    bits.push(mib.phich_extended as u8);
    for j in (0..2).rev() {
        bits.push(((ng >> j) & 1) as u8);
    }
    for j in (0..8).rev() {
        bits.push(((sfn_high >> j) & 1) as u8);
    }
    bits.resize(MIB_BITS, 0);
    bits
}

/// CRC-masked codeword for one antenna configuration (transmit mirror)
pub fn append_masked_crc(payload: &[u8], tx_antennas: u8) -> Vec<u8> {
    let mask = CRC_MASKS
        .iter()
        .find(|(_, ant)| *ant == tx_antennas)
        .map(|(m, _)| *m)
        .unwrap_or(0);
    let crc = crc16(payload) ^ mask;

    let mut out = payload.to_vec();
    for j in (0..16).rev() {
        out.push(((crc >> j) & 1) as u8);
    }
    out
}

/// PBCH processor with per-cell cached state
pub struct PbchDecoder {
    demod: OfdmDemod,
    order: Vec<(usize, usize)>,
    cell: Option<CellId>,
    scrambler: Vec<u8>,
    ref_map: Option<RefMap>,
}

impl PbchDecoder {
    pub fn new() -> Self {
        Self {
            demod: OfdmDemod::new(Rbs::Rb6),
            order: collect_order(),
            cell: None,
            scrambler: Vec::new(),
            ref_map: None,
        }
    }

    fn prepare_cell(&mut self, cell_id: CellId) {
        if self.cell == Some(cell_id) {
            return;
        }
        debug!("Generating PBCH references for cell {}", cell_id.0);
        self.scrambler = gold_sequence(cell_id.0 as u32, E_TOTAL);
        // Port-0 CRS of slot 1, symbol 0 anchors the channel estimate
        self.ref_map = Some(gen_ref_map(cell_id, 0, 1, 0, Rbs::Rb6));
        self.cell = Some(cell_id);
    }

    /// PBCH resource elements of one subframe, symbol-major: symbols 7 and 8
    /// skip the subcarriers reserved for CRS of ports 0-3
    fn re_positions(cell_id: CellId) -> Vec<(usize, usize)> {
        let crs_shift = cell_id.0 as usize % 3;
        let mut res = Vec::with_capacity(E_FRAME / 2);
        for sym in [7usize, 8] {
            for k in 0..72 {
                if k % 3 != crs_shift {
                    res.push((sym, k));
                }
            }
        }
        for sym in [9usize, 10] {
            for k in 0..72 {
                res.push((sym, k));
            }
        }
        res
    }

    /// Equalized QPSK soft bits from one subframe, summed across channels
    fn soft_bits(&self, bufs: &[Vec<Complex32>], cell_id: CellId) -> Option<Vec<f32>> {
        let map = self.ref_map.as_ref()?;
        let positions = Self::re_positions(cell_id);
        let mut llrs = vec![0.0f32; E_FRAME];

        for buf in bufs {
            let pilot_sym = self.demod.symbol(buf, 7).ok()?;
            let h = interpolate_channel(&pilot_sym, map);

            let mut grid = Vec::with_capacity(4);
            for sym in 7..=10 {
                grid.push(self.demod.symbol(buf, sym).ok()?);
            }

            for (i, &(sym, k)) in positions.iter().enumerate() {
                let x = grid[sym - 7][k] * h[k].conj();
                llrs[2 * i] += x.re;
                llrs[2 * i + 1] += x.im;
            }
        }
        Some(llrs)
    }

    /// Blind decode across the four scrambling phases of raw frame LLRs
    pub fn decode_soft(&self, llrs: &[f32], cell_id: CellId) -> Option<Mib> {
        debug_assert_eq!(llrs.len(), E_FRAME);
        debug_assert_eq!(self.cell, Some(cell_id));

        for phase in 0..4usize {
            let mut acc: [Vec<f32>; 3] = [vec![0.0; K], vec![0.0; K], vec![0.0; K]];
            for (u, &llr) in llrs.iter().enumerate() {
                let t = phase * E_FRAME + u;
                let sign = 1.0 - 2.0 * self.scrambler[t] as f32;
                let (s, p) = self.order[t % self.order.len()];
                acc[s][p] += llr * sign;
            }

            let decoded = viterbi_decode(&acc, K);
            let crc_rx = bit_field(&decoded, MIB_BITS, 16) as u16;
            let crc_calc = crc16(&decoded[..MIB_BITS]);

            for (mask, ant) in CRC_MASKS {
                if crc_calc ^ mask == crc_rx {
                    if let Some(mib) = unpack_mib(&decoded, phase as u32, ant) {
                        return Some(mib);
                    }
                }
            }
        }
        None
    }
}

impl Default for PbchDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl MibDecoder for PbchDecoder {
    fn decode_mib(&mut self, bufs: &[Vec<Complex32>], cell_id: CellId) -> Option<Mib> {
        self.prepare_cell(cell_id);
        let llrs = self.soft_bits(bufs, cell_id)?;
        let mib = self.decode_soft(&llrs, cell_id);
        if let Some(m) = &mib {
            debug!(
                "MIB decoded: {} RB, frame {}, {} tx antennas",
                m.rbs.count(),
                m.frame,
                m.tx_antennas
            );
        }
        mib
    }
}
