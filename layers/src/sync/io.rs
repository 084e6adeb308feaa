//! I/O Interface
//!
//! Pulls one subframe worth of device samples per call, maintaining the
//! frame base timestamp and applying coarse and fine timing corrections.
//! Coarse corrections arrive in PSS-search-domain samples and are scaled to
//! the device domain through the rational rate ratio, with the fractional
//! remainder carried across calls so no skew accumulates.

use common::{RateRadix, Rbs};
use interfaces::device::Device;
use interfaces::{InterfaceError, Sample16};
use tracing::{debug, info};

use crate::phy::{PSS_TARGET, SEARCH_SUBFRAME_LEN};

/// Device-time lead applied at stream start, in subframes
const DEV_START_OFFSET: i64 = 20;

/// Subframes per timestamp period
const FRAME_MOD: u32 = 10;

/// Sentinel for "no fine timing estimate"
pub const FINE_UNSET: i32 = 9999;

/// Sub-sample decision limits per bandwidth: below `lim0` the read point
/// steps back one sample, above `lim1` it steps forward
fn fine_limits(rbs: Rbs) -> (i32, i32) {
    match rbs {
        Rbs::Rb6 => (22, 16),
        Rbs::Rb15 => (22, 14),
        Rbs::Rb25 => (26, 13),
        Rbs::Rb50 => (29, 9),
        Rbs::Rb75 => (30, 9),
        Rbs::Rb100 => (32, 6),
    }
}

/// Subframe-granular reader over a device
pub struct IoInterface {
    device: Box<dyn Device>,
    rbs: Option<Rbs>,
    /// Canonical samples per subframe
    frame_size: usize,
    /// Device samples per subframe
    dev_frame: usize,
    /// Canonical-to-device rate ratio (P, Q)
    ratio: (usize, usize),
    /// Canonical samples per search-domain sample
    pss_timing_adjust: i32,
    lims: (i32, i32),
    prev_frame_num: u32,
    ts0: i64,
    /// Fractional device-sample carry, numerator over `ratio.0`
    skew: i64,
    freq: f64,
    gain: f64,
}

impl IoInterface {
    pub fn new(device: Box<dyn Device>) -> Self {
        Self {
            device,
            rbs: None,
            frame_size: 0,
            dev_frame: 0,
            ratio: (1, 1),
            pss_timing_adjust: 0,
            lims: (0, 0),
            prev_frame_num: 0,
            ts0: 0,
            skew: 0,
            freq: 0.0,
            gain: 0.0,
        }
    }

    /// Configure the device and timing state for a bandwidth
    pub fn open(&mut self, rbs: Rbs) -> Result<(), InterfaceError> {
        let ts = self.device.init(rbs)?;

        self.ratio = rbs.rate_ratio(self.device.radix());
        let (p, q) = self.ratio;
        self.frame_size = rbs.subframe_len();
        self.dev_frame = self.frame_size * q / p;
        self.pss_timing_adjust = (self.frame_size / SEARCH_SUBFRAME_LEN) as i32;
        self.lims = fine_limits(rbs);
        self.rbs = Some(rbs);

        self.ts0 = ts + self.dev_frame as i64 * DEV_START_OFFSET;
        self.prev_frame_num = 0;
        self.skew = 0;
        info!("Initial timestamp {}", self.ts0);
        Ok(())
    }

    /// Reopen the device at a new bandwidth, keeping RF settings
    pub fn reopen(&mut self, rbs: Rbs) -> Result<(), InterfaceError> {
        self.device.stop();
        self.open(rbs)?;
        let freq = self.freq;
        let gain = self.gain;
        if freq != 0.0 {
            self.set_freq(freq);
        }
        self.set_gain(gain);
        Ok(())
    }

    pub fn start(&mut self) {
        self.device.start();
    }

    pub fn stop(&mut self) {
        self.device.stop();
    }

    pub fn rbs(&self) -> Option<Rbs> {
        self.rbs
    }

    pub fn radix(&self) -> RateRadix {
        self.device.radix()
    }

    pub fn set_freq(&mut self, freq: f64) {
        self.freq = freq;
        self.device.set_freq(freq);
    }

    pub fn set_gain(&mut self, gain: f64) -> f64 {
        self.gain = self.device.set_gain(gain);
        self.gain
    }

    pub fn freq(&self) -> f64 {
        self.freq
    }

    pub fn gain(&self) -> f64 {
        self.gain
    }

    pub fn shift_freq(&mut self, offset: f64) {
        self.device.shift_freq(offset);
    }

    pub fn reset_freq(&mut self) {
        self.device.reset_freq();
    }

    /// Timing adjustment in canonical samples for the given corrections
    fn comp_timing_offset(&self, coarse: i32, fine: i32, tracking: bool) -> i32 {
        if fine == FINE_UNSET {
            return -1;
        }

        if fine != 0 && (coarse == 0 || coarse == 1) {
            let f = fine + 32;
            let (lim0, lim1) = self.lims;
            if coarse == 0 {
                if f < lim0 {
                    -1
                } else {
                    0
                }
            } else if f > lim1 {
                1
            } else {
                0
            }
        } else if (-5..=5).contains(&coarse) {
            if tracking {
                coarse * self.pss_timing_adjust
            } else {
                coarse / 2
            }
        } else {
            (coarse - PSS_TARGET as i32) * self.pss_timing_adjust
        }
    }

    /// Scale a canonical-sample shift to device samples, carrying the
    /// fractional remainder
    fn to_device_shift(&mut self, shift: i32) -> i64 {
        let (p, q) = self.ratio;
        let num = shift as i64 * q as i64 + self.skew;
        let dev = num.div_euclid(p as i64);
        self.skew = num.rem_euclid(p as i64);
        dev
    }

    /// Pull the subframe at `frame_num`, applying pending corrections.
    /// Returns the canonical-sample shift that was absorbed.
    pub fn get_buffer(
        &mut self,
        bufs: &mut [Vec<Sample16>],
        frame_num: u32,
        coarse: i32,
        fine: i32,
        tracking: bool,
    ) -> Result<i32, InterfaceError> {
        let shift = self.comp_timing_offset(coarse, fine, tracking);
        if shift != 0 {
            debug!("Timing shift {} samples (coarse {}, fine {})", shift, coarse, fine);
        }
        self.ts0 += self.to_device_shift(shift);

        let frame_num = frame_num % FRAME_MOD;
        if frame_num <= self.prev_frame_num {
            self.ts0 += FRAME_MOD as i64 * self.dev_frame as i64;
        }

        let ts = self.ts0 + frame_num as i64 * self.dev_frame as i64;
        while ts + self.dev_frame as i64 > self.device.ts_high() {
            self.device.reload()?;
        }

        self.device.pull(bufs, self.dev_frame, ts)?;
        self.prev_frame_num = frame_num;
        Ok(shift)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicI64, Ordering};
    use std::sync::{Arc, Mutex};

    /// Device stub with a boundless contiguous stream
    struct StreamDevice {
        radix: RateRadix,
        ts_high: i64,
        pulls: Arc<Mutex<Vec<(i64, usize)>>>,
        shifts: Arc<Mutex<Vec<f64>>>,
        reloads: Arc<AtomicI64>,
    }

    impl StreamDevice {
        fn new(radix: RateRadix) -> Self {
            Self {
                radix,
                ts_high: 0,
                pulls: Arc::new(Mutex::new(Vec::new())),
                shifts: Arc::new(Mutex::new(Vec::new())),
                reloads: Arc::new(AtomicI64::new(0)),
            }
        }
    }

    impl Device for StreamDevice {
        fn init(&mut self, _rbs: Rbs) -> Result<i64, InterfaceError> {
            self.ts_high = 1000;
            Ok(1000)
        }
        fn start(&mut self) {}
        fn stop(&mut self) {}
        fn reset(&mut self) {}
        fn set_freq(&mut self, _freq: f64) {}
        fn set_gain(&mut self, gain: f64) -> f64 {
            gain
        }
        fn shift_freq(&mut self, offset: f64) {
            self.shifts.lock().unwrap().push(offset);
        }
        fn reset_freq(&mut self) {}
        fn ts_high(&self) -> i64 {
            self.ts_high
        }
        fn ts_low(&self) -> i64 {
            0
        }
        fn reload(&mut self) -> Result<(), InterfaceError> {
            self.ts_high += 4096;
            self.reloads.fetch_add(1, Ordering::Relaxed);
            Ok(())
        }
        fn pull(
            &mut self,
            bufs: &mut [Vec<Sample16>],
            len: usize,
            ts: i64,
        ) -> Result<usize, InterfaceError> {
            self.pulls.lock().unwrap().push((ts, len));
            for b in bufs.iter_mut() {
                b.resize(len, Sample16::default());
            }
            Ok(len)
        }
        fn rate(&self) -> f64 {
            0.0
        }
        fn radix(&self) -> RateRadix {
            self.radix
        }
    }

    fn io_with_device(radix: RateRadix, rbs: Rbs) -> (IoInterface, Arc<Mutex<Vec<(i64, usize)>>>) {
        let dev = StreamDevice::new(radix);
        let pulls = dev.pulls.clone();
        let mut io = IoInterface::new(Box::new(dev));
        io.open(rbs).unwrap();
        (io, pulls)
    }

    #[test]
    fn test_subframe_advance() {
        let (mut io, pulls) = io_with_device(RateRadix::Radix3, Rbs::Rb6);
        let mut bufs = vec![Vec::new()];

        for counter in 0..12u32 {
            io.get_buffer(&mut bufs, counter, 0, 0, false).unwrap();
        }

        let pulls = pulls.lock().unwrap();
        // First call wraps the 10-subframe period immediately, then every
        // read advances by exactly one subframe
        assert_eq!(pulls.len(), 12);
        for w in pulls.windows(2) {
            assert_eq!(w[1].0 - w[0].0, 1920);
        }
        assert!(pulls.iter().all(|&(_, len)| len == 1920));
    }

    #[test]
    fn test_coarse_shift_moves_read_pointer() {
        let (mut io, pulls) = io_with_device(RateRadix::Radix3, Rbs::Rb6);
        let mut bufs = vec![Vec::new()];

        io.get_buffer(&mut bufs, 0, 0, 0, false).unwrap();
        // Large coarse offset: scaled from search domain to canonical
        let shift = io.get_buffer(&mut bufs, 1, PSS_TARGET as i32 + 100, 0, false).unwrap();
        assert_eq!(shift, 100 * 2);

        let pulls = pulls.lock().unwrap();
        assert_eq!(pulls[1].0 - pulls[0].0, 1920 + 200);
    }

    #[test]
    fn test_fine_unset_sentinel() {
        let (mut io, _) = io_with_device(RateRadix::Radix3, Rbs::Rb6);
        let mut bufs = vec![Vec::new()];
        io.get_buffer(&mut bufs, 0, 0, 0, false).unwrap();
        let shift = io.get_buffer(&mut bufs, 1, 0, FINE_UNSET, false).unwrap();
        assert_eq!(shift, -1);
    }

    #[test]
    fn test_fine_limit_decisions() {
        let (io, _) = io_with_device(RateRadix::Radix3, Rbs::Rb100);
        // RB100 limits: lim0 = 32, lim1 = 6
        assert_eq!(io.comp_timing_offset(0, -5, false), -1); // f = 27 < 32
        assert_eq!(io.comp_timing_offset(0, 5, false), 0); // f = 37
        assert_eq!(io.comp_timing_offset(1, -20, false), 1); // f = 12 > 6
        assert_eq!(io.comp_timing_offset(1, -30, false), 0); // f = 2
    }

    #[test]
    fn test_tracking_adjust_scale() {
        let (io, _) = io_with_device(RateRadix::Radix3, Rbs::Rb25);
        // Search-domain sample is six canonical samples at RB25
        assert_eq!(io.comp_timing_offset(3, 0, true), 18);
        assert_eq!(io.comp_timing_offset(3, 0, false), 1);
    }

    #[test]
    fn test_rational_skew_carry() {
        // Radix-2 RB25 device: canonical shift x4/3 in device samples
        let (mut io, pulls) = io_with_device(RateRadix::Radix2, Rbs::Rb25);
        let mut bufs = vec![Vec::new()];

        io.get_buffer(&mut bufs, 0, 0, 0, false).unwrap();
        // Three tracking shifts of one search sample = 6 canonical = 8 device
        for counter in 1..=3u32 {
            let s = io.get_buffer(&mut bufs, counter, 1, 0, true).unwrap();
            assert_eq!(s, 6);
        }

        let pulls = pulls.lock().unwrap();
        // 7680 device samples per subframe plus 8 per shift
        assert_eq!(pulls[3].0 - pulls[0].0, 3 * 7680 + 3 * 8);
        let total_shift: i64 = pulls
            .windows(2)
            .map(|w| w[1].0 - w[0].0 - 7680)
            .sum();
        assert_eq!(total_shift, 24);
    }

    #[test]
    fn test_demand_driven_reload() {
        let dev = StreamDevice::new(RateRadix::Radix3);
        let reloads = dev.reloads.clone();
        let mut io = IoInterface::new(Box::new(dev));
        io.open(Rbs::Rb6).unwrap();

        let mut bufs = vec![Vec::new()];
        io.get_buffer(&mut bufs, 0, 0, 0, false).unwrap();
        // Stream head started at 1000; covering the start offset plus one
        // subframe takes several packet batches
        assert!(reloads.load(Ordering::Relaxed) > 10);
    }
}
