//! Polyphase Rational Resampler
//!
//! Converts a sample stream at rate `fs` to `fs * P / Q` with `P`, `Q`
//! coprime. The prototype low-pass is a Blackman-Harris-windowed sinc split
//! into `P` partitions; each output sample is one inner product against the
//! partition selected by its phase. A history of `filter_len - 1` input
//! samples makes the filter restartable across calls, so processing a stream
//! in chunks is bit-identical to processing it whole.

use num_complex::Complex32;
use tracing::debug;

use crate::LayerError;

/// Rational rate converter with restartable state
pub struct Resampler {
    /// `P` filter partitions of `filter_len` taps each
    partitions: Vec<Vec<f32>>,
    /// One period of (input offset, partition) pairs, iterated cyclically
    paths: Vec<(usize, usize)>,
    /// Trailing `filter_len - 1` samples of the previous input
    history: Vec<Complex32>,
    filter_len: usize,
    p: usize,
    q: usize,
}

impl Resampler {
    /// Build a `P/Q` resampler with `filter_len` taps per partition
    pub fn new(p: usize, q: usize, filter_len: usize) -> Self {
        let cutoff = p.max(q);
        let proto_len = p * filter_len;
        let midpt = proto_len as f32 / 2.0;

        // Blackman-Harris window over the sinc prototype
        let a = [0.35875f32, 0.48829, 0.14128, 0.01168];
        let mut proto = vec![0.0f32; proto_len];
        let mut sum = 0.0f32;
        for (i, tap) in proto.iter_mut().enumerate() {
            let x = (i as f32 - midpt) / cutoff as f32;
            let sinc = if x.abs() < 1e-9 {
                1.0
            } else {
                (std::f32::consts::PI * x).sin() / (std::f32::consts::PI * x)
            };
            let n = i as f32 / (proto_len - 1) as f32;
            let window = a[0] - a[1] * (2.0 * std::f32::consts::PI * n).cos()
                + a[2] * (4.0 * std::f32::consts::PI * n).cos()
                - a[3] * (6.0 * std::f32::consts::PI * n).cos();
            *tap = sinc * window;
            sum += *tap;
        }

        // Unity DC gain through each partition
        let scale = p as f32 / sum;
        let mut partitions = vec![vec![0.0f32; filter_len]; p];
        for j in 0..filter_len {
            for n in 0..p {
                partitions[n][j] = proto[j * p + n] * scale;
            }
        }

        let paths = (0..p).map(|k| ((k * q) / p, (k * q) % p)).collect();

        debug!("Resampler initialized: P={}, Q={}, {} taps per partition", p, q, filter_len);

        Self {
            partitions,
            paths,
            history: vec![Complex32::new(0.0, 0.0); filter_len - 1],
            filter_len,
            p,
            q,
        }
    }

    /// Interpolation factor `P`
    pub fn p(&self) -> usize {
        self.p
    }

    /// Decimation factor `Q`
    pub fn q(&self) -> usize {
        self.q
    }

    /// Convert `input` into `output`, requiring `|out| * Q == |in| * P`
    pub fn rotate(
        &mut self,
        input: &[Complex32],
        output: &mut [Complex32],
    ) -> Result<(), LayerError> {
        if output.len() * self.q != input.len() * self.p {
            return Err(LayerError::ResampleLength {
                in_len: input.len(),
                out_len: output.len(),
                p: self.p,
                q: self.q,
            });
        }

        let hist = self.history.len();
        for (k, out) in output.iter_mut().enumerate() {
            let (base, part) = self.paths[k % self.p];
            let offset = base + (k / self.p) * self.q;
            let taps = &self.partitions[part];

            let mut acc = Complex32::new(0.0, 0.0);
            for (j, &tap) in taps.iter().enumerate() {
                let idx = offset + j;
                let sample = if idx < hist {
                    self.history[idx]
                } else {
                    input[idx - hist]
                };
                acc += sample * tap;
            }
            *out = acc;
        }

        self.update(input);
        Ok(())
    }

    /// Slide `input`'s tail into history without producing output; used to
    /// prime the filter after a coarse timing jump
    pub fn update(&mut self, input: &[Complex32]) {
        let hist = self.history.len();
        if input.len() >= hist {
            self.history.copy_from_slice(&input[input.len() - hist..]);
        } else {
            self.history.rotate_left(input.len());
            let start = hist - input.len();
            self.history[start..].copy_from_slice(input);
        }
    }
}
