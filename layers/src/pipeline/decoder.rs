//! PDSCH Decoder Stage
//!
//! Consumes subframes from the synchronizer, demodulates them into resource
//! grids, measures the residual carrier offset against the cell-specific
//! reference signals, and dispatches the grids to the decoding sink. Every
//! buffer returns to the synchronizer carrying the measurement and the
//! sink's CRC verdict.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use common::{CellId, Rbs};
use interfaces::diag::DiagnosticSink;
use num_complex::Complex32;
use tracing::{debug, info};

use super::buffer::FrameBuffer;
use super::queue::BufferQueue;
use crate::phy::ref_signal::crs_freq_offset;
use crate::phy::OfdmDemod;

/// Idle poll interval when the inbound queue is empty
const POLL_INTERVAL: Duration = Duration::from_micros(500);

/// Downstream decoding boundary: consumes demodulated grids and reports
/// whether a transport block passed its CRC
pub trait SubframeSink: Send {
    fn process(&mut self, buf: &FrameBuffer, grids: &[Vec<Vec<Complex32>>]) -> bool;
}

/// Monitoring-only sink publishing spectrogram taps; never claims a CRC pass
pub struct SpectroSink {
    diag: Arc<DiagnosticSink>,
}

impl SpectroSink {
    pub fn new(diag: Arc<DiagnosticSink>) -> Self {
        Self { diag }
    }
}

impl SubframeSink for SpectroSink {
    fn process(&mut self, buf: &FrameBuffer, _grids: &[Vec<Vec<Complex32>>]) -> bool {
        for (ch, samples) in buf.channels.iter().enumerate() {
            self.diag.spectro(ch, samples);
        }
        false
    }
}

/// Sink for deployments without the visualiser
pub struct NullSink;

impl SubframeSink for NullSink {
    fn process(&mut self, _buf: &FrameBuffer, _grids: &[Vec<Vec<Complex32>>]) -> bool {
        false
    }
}

impl SubframeSink for Box<dyn SubframeSink> {
    fn process(&mut self, buf: &FrameBuffer, grids: &[Vec<Vec<Complex32>>]) -> bool {
        (**self).process(buf, grids)
    }
}

/// Per-thread PDSCH decoding stage
pub struct PdschStage<S: SubframeSink> {
    inbound: Arc<BufferQueue>,
    outbound: Arc<BufferQueue>,
    sink: S,
    diag: Option<Arc<DiagnosticSink>>,
    /// Cached demodulator keyed on the frame identity
    identity: Option<(CellId, Rbs)>,
    demod: Option<OfdmDemod>,
    stop: Arc<AtomicBool>,
}

impl<S: SubframeSink> PdschStage<S> {
    pub fn new(
        inbound: Arc<BufferQueue>,
        outbound: Arc<BufferQueue>,
        sink: S,
        diag: Option<Arc<DiagnosticSink>>,
    ) -> Self {
        Self {
            inbound,
            outbound,
            sink,
            diag,
            identity: None,
            demod: None,
            stop: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        self.stop.clone()
    }

    /// Rebuild cached state when the cell identity changes
    fn read_buffer_state(&mut self, buf: &mut FrameBuffer) {
        buf.freq_offset = 0.0;
        buf.crc_valid = false;

        let identity = (buf.cell_id, buf.rbs);
        if self.identity != Some(identity) {
            info!(
                "Decoder reconfigured for cell {}, {} RB",
                buf.cell_id.0,
                buf.rbs.count()
            );
            self.demod = Some(OfdmDemod::new(buf.rbs));
            self.identity = Some(identity);
        }
    }

    /// Process a single frame; returns false when none was queued
    pub fn process_one(&mut self) -> bool {
        let mut buf = match self.inbound.read() {
            Some(buf) => buf,
            None => return false,
        };

        self.read_buffer_state(&mut buf);

        let expected = buf.rbs.subframe_len();
        let rate = buf.rbs.lte_rate();
        if buf.channels.iter().all(|c| c.len() == expected) {
            let demod = self.demod.as_ref().expect("demod built by read_buffer_state");

            let mut grids = Vec::with_capacity(buf.channels.len());
            let mut offset = 0.0f64;
            let mut ok = true;
            for samples in &buf.channels {
                match demod.grid(samples) {
                    Ok(grid) => {
                        offset += crs_freq_offset(&grid, buf.cell_id, buf.rbs, rate);
                        grids.push(grid);
                    }
                    Err(e) => {
                        debug!("Subframe demodulation failed: {}", e);
                        ok = false;
                        break;
                    }
                }
            }

            if ok {
                buf.freq_offset = offset / buf.channels.len().max(1) as f64;
                buf.crc_valid = self.sink.process(&buf, &grids);
            }

            if let Some(diag) = &self.diag {
                for (ch, samples) in buf.channels.iter().enumerate() {
                    diag.publish(ch, samples);
                }
            }
        } else {
            // Acquisition-era frames arrive at the PBCH analysis rate
            debug!(
                "Skipping subframe with {} samples, expected {}",
                buf.channels.first().map(|c| c.len()).unwrap_or(0),
                expected
            );
        }

        self.outbound.write(buf);
        true
    }

    /// Stage drive loop
    pub fn run(&mut self) {
        loop {
            if self.stop.load(Ordering::Relaxed) {
                break;
            }
            if !self.process_one() {
                std::thread::sleep(POLL_INTERVAL);
            }
        }
    }
}
