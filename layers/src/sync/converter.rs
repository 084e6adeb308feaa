//! Subframe Converter
//!
//! Per-channel conversion front-end between the device sample domain and
//! the analysis buffers: explicit i16 to f32 conversion, optional rational
//! resampling from the device rate to the canonical LTE rate, and the
//! decimators feeding the PBCH (1.92 MHz) and PSS (0.96 MHz) buffers.
//! Conversion per tier is lazy and latched until `reset`.

use common::Rbs;
use interfaces::Sample16;
use num_complex::Complex32;

use crate::phy::{Resampler, PBCH_SUBFRAME_LEN, SEARCH_SUBFRAME_LEN};
use crate::LayerError;

/// i16 to float scale applied when samples enter the DSP domain
const SAMPLE_SCALE: f32 = 1.0 / 128.0;

/// Per-channel rate conversion pipeline
pub struct Converter {
    /// Device-domain input buffers, filled by the I/O interface
    raw: Vec<Vec<Sample16>>,
    /// Previous subframe at canonical rate, kept for the residual delay
    prev: Vec<Vec<Complex32>>,
    /// Current subframe at canonical rate
    pdsch: Vec<Vec<Complex32>>,
    pbch: Vec<Vec<Complex32>>,
    pss: Vec<Vec<Complex32>>,
    /// Device-rate float scratch when a front resampler is required
    front_in: Vec<Vec<Complex32>>,
    front: Vec<Resampler>,
    pss_res: Vec<Resampler>,
    pbch_res: Vec<Resampler>,
    taps: usize,
    rbs: Option<Rbs>,
    did_pdsch: bool,
    did_pbch: bool,
    did_pss: bool,
}

impl Converter {
    pub fn new(chans: usize, taps: usize) -> Self {
        Self {
            raw: vec![Vec::new(); chans],
            prev: vec![Vec::new(); chans],
            pdsch: vec![Vec::new(); chans],
            pbch: vec![Vec::new(); chans],
            pss: vec![Vec::new(); chans],
            front_in: vec![Vec::new(); chans],
            front: Vec::new(),
            pss_res: Vec::new(),
            pbch_res: Vec::new(),
            taps,
            rbs: None,
            did_pdsch: false,
            did_pbch: false,
            did_pss: false,
        }
    }

    /// Size buffers and rebuild resamplers for a bandwidth and device ratio
    pub fn init(&mut self, rbs: Rbs, ratio: (usize, usize)) {
        let (p, q) = ratio;
        let chans = self.raw.len();
        let pdsch_len = rbs.subframe_len();
        let raw_len = pdsch_len * q / p;

        for b in &mut self.raw {
            b.resize(raw_len, Sample16::default());
        }
        for b in &mut self.prev {
            *b = vec![Complex32::new(0.0, 0.0); pdsch_len];
        }
        for b in &mut self.pdsch {
            *b = vec![Complex32::new(0.0, 0.0); pdsch_len];
        }
        for b in &mut self.pbch {
            *b = vec![Complex32::new(0.0, 0.0); PBCH_SUBFRAME_LEN];
        }
        for b in &mut self.pss {
            *b = vec![Complex32::new(0.0, 0.0); SEARCH_SUBFRAME_LEN];
        }

        self.front = if (p, q) != (1, 1) {
            for b in &mut self.front_in {
                *b = vec![Complex32::new(0.0, 0.0); raw_len];
            }
            (0..chans).map(|_| Resampler::new(p, q, self.taps)).collect()
        } else {
            Vec::new()
        };

        let pss_q = pdsch_len / SEARCH_SUBFRAME_LEN;
        let pbch_q = pdsch_len / PBCH_SUBFRAME_LEN;
        self.pss_res = (0..chans).map(|_| Resampler::new(1, pss_q, self.taps)).collect();
        self.pbch_res = (0..chans).map(|_| Resampler::new(1, pbch_q, self.taps)).collect();

        self.rbs = Some(rbs);
        self.did_pdsch = false;
        self.did_pbch = false;
        self.did_pss = false;
    }

    /// Device-domain buffers for the I/O interface to fill
    pub fn raw_mut(&mut self) -> &mut [Vec<Sample16>] {
        &mut self.raw
    }

    pub fn channels(&self) -> usize {
        self.raw.len()
    }

    pub fn pdsch_len(&self) -> usize {
        self.pdsch.first().map(|b| b.len()).unwrap_or(0)
    }

    /// Canonical-rate subframe into the DSP domain
    pub fn convert_pdsch(&mut self) -> Result<(), LayerError> {
        if self.did_pdsch {
            return Ok(());
        }
        if self.rbs.is_none() {
            return Err(LayerError::NotInitialized);
        }

        if self.front.is_empty() {
            for (raw, out) in self.raw.iter().zip(self.pdsch.iter_mut()) {
                for (s, o) in raw.iter().zip(out.iter_mut()) {
                    *o = Complex32::new(s.re as f32 * SAMPLE_SCALE, s.im as f32 * SAMPLE_SCALE);
                }
            }
        } else {
            for ch in 0..self.raw.len() {
                for (s, o) in self.raw[ch].iter().zip(self.front_in[ch].iter_mut()) {
                    *o = Complex32::new(s.re as f32 * SAMPLE_SCALE, s.im as f32 * SAMPLE_SCALE);
                }
                self.front[ch].rotate(&self.front_in[ch], &mut self.pdsch[ch])?;
            }
        }

        self.did_pdsch = true;
        Ok(())
    }

    /// PBCH-rate view of the current subframe
    pub fn convert_pbch(&mut self) -> Result<&[Vec<Complex32>], LayerError> {
        if !self.did_pbch {
            self.convert_pdsch()?;
            for ch in 0..self.pdsch.len() {
                self.pbch_res[ch].rotate(&self.pdsch[ch], &mut self.pbch[ch])?;
            }
            self.did_pbch = true;
        }
        Ok(&self.pbch)
    }

    /// PSS-search-rate view of the current subframe
    pub fn convert_pss(&mut self) -> Result<&[Vec<Complex32>], LayerError> {
        if !self.did_pss {
            self.convert_pdsch()?;
            for ch in 0..self.pdsch.len() {
                self.pss_res[ch].rotate(&self.pdsch[ch], &mut self.pss[ch])?;
            }
            self.did_pss = true;
        }
        Ok(&self.pss)
    }

    /// Current canonical-rate subframe
    pub fn pdsch(&mut self) -> Result<&[Vec<Complex32>], LayerError> {
        self.convert_pdsch()?;
        Ok(&self.pdsch)
    }

    /// Copy the current subframe into `out`, delayed against the previous
    /// subframe to absorb the residual timing shift
    pub fn delay_pdsch(
        &mut self,
        out: &mut [Vec<Complex32>],
        offset: i32,
    ) -> Result<(), LayerError> {
        self.convert_pdsch()?;

        let len = self.pdsch_len() as i32;
        let half = (self.taps / 2) as i32;
        let offset = offset.clamp(-half, len - half);
        let from_prev = (half + offset) as usize;

        for ((dst, prev), cur) in out.iter_mut().zip(&self.prev).zip(&self.pdsch) {
            dst.resize(len as usize, Complex32::new(0.0, 0.0));
            let split = from_prev.min(dst.len());
            let dst_len = dst.len();
            dst[..split].copy_from_slice(&prev[prev.len() - split..]);
            dst[split..].copy_from_slice(&cur[..dst_len - split]);
        }
        Ok(())
    }

    /// Advance the decimator histories when a tier was not converted
    pub fn update(&mut self) {
        if !self.did_pdsch {
            return;
        }
        for ch in 0..self.pdsch.len() {
            self.pss_res[ch].update(&self.pdsch[ch]);
            self.pbch_res[ch].update(&self.pdsch[ch]);
        }
    }

    /// Close out the subframe: clear conversion latches and keep the
    /// current subframe as the delay reference
    pub fn reset(&mut self) {
        self.did_pdsch = false;
        self.did_pbch = false;
        self.did_pss = false;
        std::mem::swap(&mut self.prev, &mut self.pdsch);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fill_ramp(conv: &mut Converter, base: i16) {
        for buf in conv.raw_mut() {
            for (i, s) in buf.iter_mut().enumerate() {
                let v = base + (i % 100) as i16;
                *s = Sample16::new(v, -v);
            }
        }
    }

    #[test]
    fn test_explicit_scaling() {
        let mut conv = Converter::new(1, 32);
        conv.init(Rbs::Rb6, (1, 1));
        fill_ramp(&mut conv, 64);

        let pdsch = conv.pdsch().unwrap();
        assert_eq!(pdsch[0].len(), 1920);
        assert_eq!(pdsch[0][0], Complex32::new(0.5, -0.5));
    }

    #[test]
    fn test_lazy_latch() {
        let mut conv = Converter::new(1, 32);
        conv.init(Rbs::Rb6, (1, 1));
        fill_ramp(&mut conv, 10);
        conv.convert_pdsch().unwrap();

        // Refilling raw without reset must not change the converted view
        fill_ramp(&mut conv, 99);
        let v = conv.pdsch().unwrap()[0][0];
        assert_eq!(v, Complex32::new(10.0 / 128.0, -10.0 / 128.0));

        conv.reset();
        let v = conv.pdsch().unwrap()[0][0];
        assert_eq!(v, Complex32::new(99.0 / 128.0, -99.0 / 128.0));
    }

    #[test]
    fn test_analysis_buffer_lengths() {
        let mut conv = Converter::new(2, 32);
        conv.init(Rbs::Rb25, (1, 1));
        fill_ramp(&mut conv, 1);

        assert_eq!(conv.raw_mut()[0].len(), 5760);
        assert_eq!(conv.convert_pss().unwrap()[0].len(), 960);
        assert_eq!(conv.convert_pbch().unwrap()[1].len(), 1920);
    }

    #[test]
    fn test_front_resampler_ratio() {
        // Radix-2 device at RB25: 7.68 MHz in, 5.76 MHz out
        let mut conv = Converter::new(1, 32);
        conv.init(Rbs::Rb25, (3, 4));
        assert_eq!(conv.raw_mut()[0].len(), 7680);

        fill_ramp(&mut conv, 5);
        let pdsch = conv.pdsch().unwrap();
        assert_eq!(pdsch[0].len(), 5760);
    }

    #[test]
    fn test_delay_pdsch_alignment() {
        let mut conv = Converter::new(1, 32);
        conv.init(Rbs::Rb6, (1, 1));

        // First subframe becomes the delay reference after reset
        fill_ramp(&mut conv, 1);
        conv.convert_pdsch().unwrap();
        conv.reset();

        fill_ramp(&mut conv, 2);
        let mut out = vec![Vec::new()];
        conv.delay_pdsch(&mut out, 0).unwrap();

        // taps/2 = 16 samples come from the previous subframe
        assert_eq!(out[0].len(), 1920);
        let prev_tail = Complex32::new((1 + (1920 - 16) as i16 % 100) as f32 / 128.0, 0.0).re;
        assert_eq!(out[0][0].re, prev_tail);
        assert_eq!(out[0][16], conv.pdsch().unwrap()[0][0]);
    }

    #[test]
    fn test_delay_pdsch_clamps() {
        let mut conv = Converter::new(1, 16);
        conv.init(Rbs::Rb6, (1, 1));
        fill_ramp(&mut conv, 3);

        let mut out = vec![Vec::new()];
        // Far out-of-range offsets are clamped instead of panicking
        conv.delay_pdsch(&mut out, -10_000).unwrap();
        assert_eq!(out[0][0], conv.pdsch().unwrap()[0][0]);
        conv.delay_pdsch(&mut out, 10_000).unwrap();
        assert_eq!(out[0].len(), 1920);
    }
}
