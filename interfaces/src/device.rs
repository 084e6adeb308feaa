//! Radio Device Abstraction
//!
//! The receive chain pulls samples through the `Device` trait; concrete
//! implementations are the SDR driver (`sdr::SdrDevice`) and the file-replay
//! device (`file_device::FileDevice`). The vendor SDK itself sits behind the
//! `RadioBackend` trait and is never touched directly by the core.

use std::time::Duration;

use common::{ClockRef, RateRadix, Rbs};

use crate::{InterfaceError, Sample16};

/// Hardware families with distinct master-clock constraints
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceType {
    B200,
    B210,
    X300,
    N300,
    Unknown,
}

impl DeviceType {
    /// Classify a device from its identification string
    pub fn from_id_string(id: &str) -> Self {
        if id.contains("B200") {
            DeviceType::B200
        } else if id.contains("B210") {
            DeviceType::B210
        } else if id.contains("X300") || id.contains("X310") {
            DeviceType::X300
        } else if id.contains("N300") || id.contains("N310") {
            DeviceType::N300
        } else {
            DeviceType::Unknown
        }
    }

    /// Sample-rate family the device clock supports
    pub fn radix(&self) -> RateRadix {
        match self {
            DeviceType::N300 => RateRadix::Radix2,
            _ => RateRadix::Radix3,
        }
    }

    /// Master clock rate for a target sample rate, or `None` when the
    /// hardware clock is fixed by the driver
    pub fn master_clock(&self, rate: f64, chans: usize) -> Option<f64> {
        match self {
            // B2xx clocks adapt: largest power-of-two multiple of the
            // sample rate within the per-channel budget
            DeviceType::B200 | DeviceType::B210 => {
                let limit = 30.72e6 / chans as f64;
                let mut mcr = rate;
                while mcr * 2.0 <= limit {
                    mcr *= 2.0;
                }
                Some(mcr)
            }
            DeviceType::X300 => Some(184.32e6),
            DeviceType::N300 => Some(122.88e6),
            DeviceType::Unknown => None,
        }
    }
}

/// Tune request with an optional pinned RF (LO) frequency; when `rf` is set
/// the device must move only its digital down-converter
#[derive(Debug, Clone, Copy)]
pub struct TuneRequest {
    pub target: f64,
    pub rf: Option<f64>,
}

impl TuneRequest {
    pub fn auto(target: f64) -> Self {
        Self { target, rf: None }
    }

    pub fn manual(target: f64, rf: f64) -> Self {
        Self { target, rf: Some(rf) }
    }
}

/// Vendor-SDK boundary: stream and tune primitives consumed by `SdrDevice`
pub trait RadioBackend: Send {
    /// Identification string of the opened hardware
    fn id_string(&self) -> String;

    fn set_clock_source(&mut self, clock: ClockRef);

    fn set_master_clock_rate(&mut self, rate: f64);

    /// Request a sample rate, returning the rate actually set
    fn set_sample_rate(&mut self, rate: f64) -> f64;

    /// Tune one channel, returning the actual RF frequency
    fn tune(&mut self, req: TuneRequest, chan: usize) -> f64;

    /// Set receive gain, returning the gain actually set
    fn set_gain(&mut self, gain: f64, chan: usize) -> f64;

    fn start_stream(&mut self);

    fn stop_stream(&mut self);

    /// Largest packet the stream will deliver
    fn max_spp(&self) -> usize;

    /// Receive up to `spp` samples per channel; returns the sample count and
    /// the tick timestamp of the first sample. A count of zero is a timeout.
    fn recv(
        &mut self,
        bufs: &mut [Vec<Sample16>],
        spp: usize,
        timeout: Duration,
    ) -> (usize, i64);

    /// Device time in sample ticks at the current rate
    fn time_now_ticks(&self) -> i64;
}

/// Receive-side device consumed by the I/O interface
pub trait Device: Send {
    /// Configure rates and streaming for the given bandwidth; returns the
    /// device timestamp from which reads may start
    fn init(&mut self, rbs: Rbs) -> Result<i64, InterfaceError>;

    fn start(&mut self);

    fn stop(&mut self);

    fn reset(&mut self);

    fn set_freq(&mut self, freq: f64);

    fn set_gain(&mut self, gain: f64) -> f64;

    /// Move the DDC by `offset` Hz, keeping the RF frequency pinned
    fn shift_freq(&mut self, offset: f64);

    /// Return the DDC to the base RF frequency
    fn reset_freq(&mut self);

    /// One past the newest buffered timestamp
    fn ts_high(&self) -> i64;

    /// Oldest buffered timestamp
    fn ts_low(&self) -> i64;

    /// Receive one packet batch into the ring buffers
    fn reload(&mut self) -> Result<(), InterfaceError>;

    /// Copy `len` samples starting at `ts` into each channel buffer
    fn pull(
        &mut self,
        bufs: &mut [Vec<Sample16>],
        len: usize,
        ts: i64,
    ) -> Result<usize, InterfaceError>;

    /// Configured sample rate in Hz
    fn rate(&self) -> f64;

    /// Rate family of the underlying clock
    fn radix(&self) -> RateRadix;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_type_from_id() {
        assert_eq!(DeviceType::from_id_string("type=b200,name=B210 mini"), DeviceType::B210);
        assert_eq!(DeviceType::from_id_string("X310 over 10GbE"), DeviceType::X300);
        assert_eq!(DeviceType::from_id_string("addr=192.168.10.2,N310"), DeviceType::N300);
        assert_eq!(DeviceType::from_id_string("rtlsdr"), DeviceType::Unknown);
    }

    #[test]
    fn test_master_clock_policy() {
        // B210 single channel: 1.92 MHz scales up to the 30.72 MHz budget
        let mcr = DeviceType::B210.master_clock(1.92e6, 1).unwrap();
        assert_eq!(mcr, 30.72e6);

        // Two channels halve the per-channel budget
        let mcr = DeviceType::B210.master_clock(1.92e6, 2).unwrap();
        assert_eq!(mcr, 15.36e6);

        // 23.04 MHz cannot be doubled within budget
        let mcr = DeviceType::B210.master_clock(23.04e6, 1).unwrap();
        assert_eq!(mcr, 23.04e6);

        assert_eq!(DeviceType::X300.master_clock(5.76e6, 1), Some(184.32e6));
        assert_eq!(DeviceType::N300.master_clock(7.68e6, 1), Some(122.88e6));
    }

    #[test]
    fn test_n_series_radix() {
        assert_eq!(DeviceType::N300.radix(), RateRadix::Radix2);
        assert_eq!(DeviceType::B200.radix(), RateRadix::Radix3);
    }
}
