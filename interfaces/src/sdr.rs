//! SDR Device Driver
//!
//! Wraps a vendor stream (`RadioBackend`) into the `Device` contract: rate
//! and master-clock bring-up, manual-DDC tuning, and the packet receive loop
//! that enforces the timestamp discipline of the ring buffers.
//!
//! Timestamp policy per packet:
//! - receive timeout or short packet: log, clear `prev_ts`, continue; the
//!   next good packet re-seeds the ring window,
//! - `ts - prev_ts == spp - 1`: the off-by-one slip at the vendor packet
//!   boundary; increment `ts` and continue,
//! - `ts < prev_ts`: fatal, the stream state is corrupt,
//! - any other discontinuity: log and re-seed the window at the new
//!   timestamp.

use std::time::Duration;

use common::{ClockRef, RateRadix, Rbs};
use tracing::{debug, error, info, warn};

use crate::device::{Device, DeviceType, RadioBackend, TuneRequest};
use crate::timestamp_buffer::{TimestampBuffer, WriteError};
use crate::{InterfaceError, Sample16};

/// Per-channel ring capacity in samples
const RX_BUFLEN: usize = 1 << 22;

/// Vendor receive timeout
const RECV_TIMEOUT: Duration = Duration::from_secs(1);

/// SDR receive device
pub struct SdrDevice<B: RadioBackend> {
    backend: B,
    dev_type: DeviceType,
    chans: usize,
    spp: usize,
    rate: f64,
    base_freq: f64,
    offset_freq: f64,
    prev_ts: i64,
    rx_bufs: Vec<TimestampBuffer<Sample16>>,
    pkt_bufs: Vec<Vec<Sample16>>,
}

impl<B: RadioBackend> SdrDevice<B> {
    /// Take ownership of an opened vendor stream
    pub fn new(backend: B, chans: usize, clock: ClockRef) -> Self {
        let id = backend.id_string();
        info!("Opening device {}", id);

        let dev_type = DeviceType::from_id_string(&id);
        if dev_type == DeviceType::Unknown {
            warn!("Unsupported or unknown device");
        }

        let mut dev = Self {
            backend,
            dev_type,
            chans,
            spp: 0,
            rate: 0.0,
            base_freq: 0.0,
            offset_freq: 0.0,
            prev_ts: 0,
            rx_bufs: Vec::new(),
            pkt_bufs: Vec::new(),
        };

        if !matches!(clock, ClockRef::Internal) {
            dev.backend.set_clock_source(clock);
        }
        dev
    }

    fn init_rates(&mut self, rbs: Rbs) -> Result<(), InterfaceError> {
        let rate = rbs.sample_rate(self.radix());

        info!("Setting rates to {} Hz", rate);
        if let Some(mcr) = self.dev_type.master_clock(rate, self.chans) {
            self.backend.set_master_clock_rate(mcr);
        }
        self.rate = self.backend.set_sample_rate(rate);
        if self.rate != rate {
            warn!("Device rate {} Hz differs from requested {} Hz", self.rate, rate);
        }
        Ok(())
    }

    fn init_rx(&mut self) -> i64 {
        self.rx_bufs = (0..self.chans).map(|_| TimestampBuffer::new(RX_BUFLEN)).collect();
        self.spp = self.backend.max_spp();
        info!("Samples per packet {}", self.spp);

        self.pkt_bufs = vec![vec![Sample16::default(); self.spp]; self.chans];
        self.backend.start_stream();

        // Throw away one packet so the stream settles, then anchor the ring
        // windows at the device clock
        let _ = self.backend.recv(&mut self.pkt_bufs, self.spp, RECV_TIMEOUT);

        let ts = self.backend.time_now_ticks();
        for buf in &mut self.rx_bufs {
            buf.set_start(ts);
        }
        self.prev_ts = 0;
        ts
    }

    fn reseed(&mut self, ts: i64) {
        for buf in &mut self.rx_bufs {
            buf.set_start(ts);
        }
    }
}

impl<B: RadioBackend> Device for SdrDevice<B> {
    fn init(&mut self, rbs: Rbs) -> Result<i64, InterfaceError> {
        self.init_rates(rbs)?;
        Ok(self.init_rx())
    }

    fn start(&mut self) {
        self.backend.start_stream();
        self.prev_ts = 0;
    }

    fn stop(&mut self) {
        self.backend.stop_stream();
        // Drain whatever the stream still holds
        while self.backend.recv(&mut self.pkt_bufs, self.spp, Duration::from_millis(100)).0 > 0 {}
    }

    fn reset(&mut self) {
        self.stop();
        self.prev_ts = 0;
    }

    fn set_freq(&mut self, freq: f64) {
        info!("Setting frequency to {} Hz", freq);
        let mut actual = 0.0;
        for i in 0..self.chans {
            actual = self.backend.tune(TuneRequest::auto(freq), i);
        }
        self.base_freq = actual;

        // Pin the RF front-end so later shifts only move the DDC
        for i in 0..self.chans {
            self.backend.tune(TuneRequest::manual(self.base_freq, self.base_freq), i);
        }
        self.offset_freq = self.base_freq;
    }

    fn set_gain(&mut self, gain: f64) -> f64 {
        info!("Setting gain to {} dB", gain);
        let mut actual = 0.0;
        for i in 0..self.chans {
            actual = self.backend.set_gain(gain, i);
        }
        actual
    }

    fn shift_freq(&mut self, offset: f64) {
        let target = self.offset_freq + offset;
        for i in 0..self.chans {
            self.offset_freq = self.backend.tune(TuneRequest::manual(target, self.base_freq), i);
        }
        debug!(
            "Adjusting DDC {} Hz, DDC offset {} Hz",
            offset,
            self.base_freq - self.offset_freq
        );
    }

    fn reset_freq(&mut self) {
        info!("Resetting RF frequency to {} MHz", self.base_freq / 1e6);
        for i in 0..self.chans {
            self.offset_freq =
                self.backend.tune(TuneRequest::manual(self.base_freq, self.base_freq), i);
        }
    }

    fn ts_high(&self) -> i64 {
        self.rx_bufs[0].last_time()
    }

    fn ts_low(&self) -> i64 {
        self.rx_bufs[0].first_time()
    }

    fn reload(&mut self) -> Result<(), InterfaceError> {
        let mut total = 0;

        loop {
            let (num, mut ts) = self.backend.recv(&mut self.pkt_bufs, self.spp, RECV_TIMEOUT);
            if num == 0 {
                warn!("Receive timed out");
                self.prev_ts = 0;
                continue;
            }
            if num < self.spp {
                warn!("Short packet: {} of {}", num, self.spp);
                self.prev_ts = 0;
                continue;
            }
            total += num;

            if self.prev_ts != 0 {
                if ts < self.prev_ts {
                    error!("Non-monotonic timestamp {} after {}", ts, self.prev_ts);
                    return Err(InterfaceError::NonMonotonicTimestamp {
                        ts,
                        prev: self.prev_ts,
                    });
                }

                let delta = ts - self.prev_ts;
                if delta == self.spp as i64 - 1 {
                    debug!("Correcting single-sample timestamp slip at {}", ts);
                    ts += 1;
                } else if delta != self.spp as i64 {
                    warn!(
                        "Timestamp jump at {}: expected {}, got {}",
                        ts, self.spp, delta
                    );
                    self.reseed(ts);
                }
            } else {
                // Re-sync point after start or a reported fault
                self.reseed(ts);
            }

            for (buf, pkt) in self.rx_bufs.iter_mut().zip(&self.pkt_bufs) {
                match buf.write(&pkt[..num], ts) {
                    Ok(()) => {}
                    Err(WriteError::Overflow) => {
                        warn!("Internal buffer overflow at {}", ts);
                    }
                    Err(e) => {
                        warn!("Buffer reload error: {}", e);
                    }
                }
            }

            self.prev_ts = ts;

            if total >= self.spp {
                return Ok(());
            }
        }
    }

    fn pull(
        &mut self,
        bufs: &mut [Vec<Sample16>],
        len: usize,
        ts: i64,
    ) -> Result<usize, InterfaceError> {
        if bufs.len() != self.chans {
            return Err(InterfaceError::ChannelMismatch {
                got: bufs.len(),
                expected: self.chans,
            });
        }
        if self.rx_bufs[0].avail_samples(ts) < len as i64 {
            return Err(InterfaceError::InsufficientSamples(ts));
        }

        for (ring, dst) in self.rx_bufs.iter_mut().zip(bufs.iter_mut()) {
            dst.resize(len, Sample16::default());
            ring.read(dst, ts)
                .map_err(|_| InterfaceError::InsufficientSamples(ts))?;
        }
        Ok(len)
    }

    fn rate(&self) -> f64 {
        self.rate
    }

    fn radix(&self) -> RateRadix {
        self.dev_type.radix()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    /// Scripted vendor stream for driver tests
    struct ScriptedBackend {
        id: String,
        spp: usize,
        /// (sample count, tick timestamp) per recv call
        packets: VecDeque<(usize, i64)>,
        tunes: Vec<TuneRequest>,
        rate: f64,
    }

    impl ScriptedBackend {
        fn new(id: &str, spp: usize, packets: Vec<(usize, i64)>) -> Self {
            Self {
                id: id.to_string(),
                spp,
                packets: packets.into(),
                tunes: Vec::new(),
                rate: 0.0,
            }
        }
    }

    impl RadioBackend for ScriptedBackend {
        fn id_string(&self) -> String {
            self.id.clone()
        }

        fn set_clock_source(&mut self, _clock: ClockRef) {}

        fn set_master_clock_rate(&mut self, _rate: f64) {}

        fn set_sample_rate(&mut self, rate: f64) -> f64 {
            self.rate = rate;
            rate
        }

        fn tune(&mut self, req: TuneRequest, _chan: usize) -> f64 {
            self.tunes.push(req);
            req.target
        }

        fn set_gain(&mut self, gain: f64, _chan: usize) -> f64 {
            gain
        }

        fn start_stream(&mut self) {}

        fn stop_stream(&mut self) {}

        fn max_spp(&self) -> usize {
            self.spp
        }

        fn recv(
            &mut self,
            bufs: &mut [Vec<Sample16>],
            _spp: usize,
            _timeout: Duration,
        ) -> (usize, i64) {
            match self.packets.pop_front() {
                Some((num, ts)) => {
                    for buf in bufs.iter_mut() {
                        for s in buf.iter_mut().take(num) {
                            *s = Sample16::new(1, -1);
                        }
                    }
                    (num, ts)
                }
                None => (0, 0),
            }
        }

        fn time_now_ticks(&self) -> i64 {
            10_000
        }
    }

    #[test]
    fn test_slip_correction() {
        // First packet seeds at 10000; second arrives one tick early
        let backend = ScriptedBackend::new(
            "B200",
            1000,
            vec![(1000, 0), (1000, 10_000), (1000, 10_999)],
        );
        let mut dev = SdrDevice::new(backend, 1, ClockRef::Internal);
        dev.init(Rbs::Rb6).unwrap();

        dev.reload().unwrap(); // packet at 10000
        assert_eq!(dev.prev_ts, 10_000);

        dev.reload().unwrap(); // slip-corrected packet
        assert_eq!(dev.prev_ts, 11_000);
        assert_eq!(dev.ts_high(), 12_000);
    }

    #[test]
    fn test_non_monotonic_is_fatal() {
        let backend = ScriptedBackend::new(
            "B200",
            1000,
            vec![(1000, 0), (1000, 10_000), (1000, 9_000)],
        );
        let mut dev = SdrDevice::new(backend, 1, ClockRef::Internal);
        dev.init(Rbs::Rb6).unwrap();

        dev.reload().unwrap();
        assert!(matches!(
            dev.reload(),
            Err(InterfaceError::NonMonotonicTimestamp { ts: 9_000, prev: 10_000 })
        ));
    }

    #[test]
    fn test_jump_reseeds_window() {
        let backend = ScriptedBackend::new(
            "B200",
            1000,
            vec![(1000, 0), (1000, 10_000), (1000, 20_000)],
        );
        let mut dev = SdrDevice::new(backend, 1, ClockRef::Internal);
        dev.init(Rbs::Rb6).unwrap();

        dev.reload().unwrap();
        dev.reload().unwrap();
        assert_eq!(dev.ts_low(), 20_000);
        assert_eq!(dev.ts_high(), 21_000);
    }

    #[test]
    fn test_pull_after_reload() {
        let backend = ScriptedBackend::new(
            "B200",
            1000,
            vec![(1000, 0), (1000, 10_000), (1000, 11_000)],
        );
        let mut dev = SdrDevice::new(backend, 1, ClockRef::Internal);
        dev.init(Rbs::Rb6).unwrap();

        dev.reload().unwrap();
        dev.reload().unwrap();

        let mut bufs = vec![Vec::new()];
        assert_eq!(dev.pull(&mut bufs, 1500, 10_200).unwrap(), 1500);
        assert_eq!(bufs[0].len(), 1500);
        assert!(matches!(
            dev.pull(&mut bufs, 1500, 11_000),
            Err(InterfaceError::InsufficientSamples(_))
        ));
    }

    #[test]
    fn test_manual_ddc_shift() {
        let backend = ScriptedBackend::new("X310", 1000, vec![(1000, 0)]);
        let mut dev = SdrDevice::new(backend, 1, ClockRef::Internal);
        dev.set_freq(1.0e9);
        dev.shift_freq(150.0);

        let tunes = &dev.backend.tunes;
        // Auto tune, pinning re-tune, then a manual DDC shift
        assert!(tunes[0].rf.is_none());
        assert_eq!(tunes[1].rf, Some(1.0e9));
        assert_eq!(tunes[2].target, 1.0e9 + 150.0);
        assert_eq!(tunes[2].rf, Some(1.0e9));
    }
}
