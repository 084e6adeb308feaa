//! File Replay Device
//!
//! Replays interleaved 16-bit little-endian IQ samples from disk through the
//! `Device` contract. Single channel only; end of file terminates the
//! pipeline. Frequency control is logged but has no effect on the samples.

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use byteorder::{LittleEndian, ReadBytesExt};
use common::{RateRadix, Rbs};
use tracing::{debug, info, warn};

use crate::device::Device;
use crate::timestamp_buffer::{TimestampBuffer, WriteError};
use crate::{InterfaceError, Sample16};

/// Per-channel ring capacity in samples
const RX_BUFLEN: usize = 1 << 22;

/// Fixed packet size for file reads
const DEV_SPP: usize = 1024;

/// Sample source backed by a raw IQ capture file
pub struct FileDevice {
    stream: BufReader<File>,
    rate: f64,
    offset_freq: f64,
    prev_ts: i64,
    rx_buf: TimestampBuffer<Sample16>,
    raw: Vec<i16>,
}

impl FileDevice {
    /// Open a capture file; only single-channel captures are supported
    pub fn open<P: AsRef<Path>>(path: P, chans: usize) -> Result<Self, InterfaceError> {
        if chans != 1 {
            return Err(InterfaceError::InvalidConfig(
                "only single channel supported in file mode".into(),
            ));
        }

        let file = File::open(&path).map_err(|e| {
            InterfaceError::DeviceOpen(format!(
                "file \"{}\" failed to open: {}",
                path.as_ref().display(),
                e
            ))
        })?;

        Ok(Self {
            stream: BufReader::new(file),
            rate: 0.0,
            offset_freq: 0.0,
            prev_ts: 0,
            rx_buf: TimestampBuffer::new(RX_BUFLEN),
            raw: vec![0i16; 2 * DEV_SPP],
        })
    }
}

impl Device for FileDevice {
    fn init(&mut self, rbs: Rbs) -> Result<i64, InterfaceError> {
        self.rate = rbs.sample_rate(RateRadix::Radix3);
        info!("Setting rate to {} MHz", self.rate / 1e6);
        info!("Setting samples per packet to {}", DEV_SPP);

        self.rx_buf = TimestampBuffer::new(RX_BUFLEN);
        self.rx_buf.set_start(0);
        self.prev_ts = 0;
        Ok(0)
    }

    fn start(&mut self) {}

    fn stop(&mut self) {}

    fn reset(&mut self) {
        self.prev_ts = 0;
    }

    fn set_freq(&mut self, _freq: f64) {
        info!("No RF frequency setting in file mode");
        self.offset_freq = 0.0;
    }

    fn set_gain(&mut self, _gain: f64) -> f64 {
        0.0
    }

    fn shift_freq(&mut self, offset: f64) {
        debug!(
            "Adjusting frequency offset from {} Hz to {} Hz",
            self.offset_freq,
            self.offset_freq + offset
        );
        self.offset_freq += offset;
    }

    fn reset_freq(&mut self) {
        debug!("Resetting offset frequency");
        self.offset_freq = 0.0;
    }

    fn ts_high(&self) -> i64 {
        self.rx_buf.last_time()
    }

    fn ts_low(&self) -> i64 {
        self.rx_buf.first_time()
    }

    fn reload(&mut self) -> Result<(), InterfaceError> {
        match self.stream.read_i16_into::<LittleEndian>(&mut self.raw) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                return Err(InterfaceError::EndOfStream);
            }
            Err(e) => return Err(e.into()),
        }

        let pkt: Vec<Sample16> = self
            .raw
            .chunks_exact(2)
            .map(|iq| Sample16::new(iq[0], iq[1]))
            .collect();

        match self.rx_buf.write(&pkt, self.prev_ts) {
            Ok(()) => {}
            Err(WriteError::Overflow) => warn!("Internal buffer overflow"),
            Err(e) => warn!("Buffer reload error: {}", e),
        }
        self.prev_ts += DEV_SPP as i64;
        Ok(())
    }

    fn pull(
        &mut self,
        bufs: &mut [Vec<Sample16>],
        len: usize,
        ts: i64,
    ) -> Result<usize, InterfaceError> {
        if bufs.len() != 1 {
            return Err(InterfaceError::ChannelMismatch { got: bufs.len(), expected: 1 });
        }
        if self.rx_buf.avail_samples(ts) < len as i64 {
            return Err(InterfaceError::InsufficientSamples(ts));
        }

        bufs[0].resize(len, Sample16::default());
        self.rx_buf
            .read(&mut bufs[0], ts)
            .map_err(|_| InterfaceError::InsufficientSamples(ts))?;
        Ok(len)
    }

    fn rate(&self) -> f64 {
        self.rate
    }

    fn radix(&self) -> RateRadix {
        RateRadix::Radix3
    }
}
