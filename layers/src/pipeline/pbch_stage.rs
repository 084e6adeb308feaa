//! PBCH Stage
//!
//! Consumes PBCH-rate subframes from the synchronizer, attempts a MIB
//! decode on subframe-0 frames, and reports each attempt on the control
//! channel so the state machine can transition (or reopen the device at
//! the announced bandwidth). Forwarded frames carry the decoded resource
//! block count for the stages downstream.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;
use std::sync::Arc;
use std::time::Duration;

use common::Rbs;
use tracing::info;

use super::queue::BufferQueue;
use super::MibReport;
use crate::phy::MibDecoder;

/// Idle poll interval when the inbound queue is empty
const POLL_INTERVAL: Duration = Duration::from_micros(500);

/// MIB decode stage between the synchronizer and the PDSCH decoders
pub struct PbchStage<M: MibDecoder> {
    inbound: Arc<BufferQueue>,
    outbound: Arc<BufferQueue>,
    reports: Sender<MibReport>,
    decoder: M,
    current_rbs: Option<Rbs>,
    stop: Arc<AtomicBool>,
}

impl<M: MibDecoder> PbchStage<M> {
    pub fn new(
        inbound: Arc<BufferQueue>,
        outbound: Arc<BufferQueue>,
        reports: Sender<MibReport>,
        decoder: M,
    ) -> Self {
        Self {
            inbound,
            outbound,
            reports,
            decoder,
            current_rbs: None,
            stop: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        self.stop.clone()
    }

    /// Process a single frame; returns false when none was queued
    pub fn process_one(&mut self) -> bool {
        let mut buf = match self.inbound.read() {
            Some(buf) => buf,
            None => return false,
        };

        if buf.subframe == 0 {
            let mib = self.decoder.decode_mib(&buf.channels, buf.cell_id);
            if let Some(m) = &mib {
                info!(
                    "MIB decoded: {} RB, frame {}, {} tx antennas",
                    m.rbs.count(),
                    m.frame,
                    m.tx_antennas
                );
                self.current_rbs = Some(m.rbs);
            }
            let _ = self.reports.send(MibReport { mib });
        }

        if let Some(rbs) = self.current_rbs {
            buf.rbs = rbs;
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::phy::Mib;
    use crate::pipeline::FrameBuffer;
    use common::{CellId, PhichNg};
    use num_complex::Complex32;
    use std::sync::mpsc;

    struct FixedDecoder {
        mib: Option<Mib>,
    }

    impl MibDecoder for FixedDecoder {
        fn decode_mib(&mut self, _bufs: &[Vec<Complex32>], _cell: CellId) -> Option<Mib> {
            self.mib
        }
    }

    fn stage(
        mib: Option<Mib>,
    ) -> (
        PbchStage<FixedDecoder>,
        Arc<BufferQueue>,
        Arc<BufferQueue>,
        mpsc::Receiver<MibReport>,
    ) {
        let inbound = Arc::new(BufferQueue::default());
        let outbound = Arc::new(BufferQueue::default());
        let (tx, rx) = mpsc::channel();
        let stage = PbchStage::new(inbound.clone(), outbound.clone(), tx, FixedDecoder { mib });
        (stage, inbound, outbound, rx)
    }

    fn mib(rbs: Rbs) -> Mib {
        Mib {
            rbs,
            phich_ng: PhichNg::One,
            phich_extended: false,
            frame: 100,
            tx_antennas: 1,
        }
    }

    #[test]
    fn test_reports_decode_and_annotates() {
        let (mut stage, inbound, outbound, reports) = stage(Some(mib(Rbs::Rb50)));

        let mut frame = FrameBuffer::new(1);
        frame.subframe = 0;
        inbound.write(frame);
        assert!(stage.process_one());

        let report = reports.try_recv().unwrap();
        assert_eq!(report.mib.unwrap().rbs, Rbs::Rb50);
        assert_eq!(outbound.read().unwrap().rbs, Rbs::Rb50);
    }

    #[test]
    fn test_reports_miss_on_subframe_zero_only() {
        let (mut stage, inbound, _outbound, reports) = stage(None);

        let mut frame = FrameBuffer::new(1);
        frame.subframe = 3;
        inbound.write(frame);
        stage.process_one();
        assert!(reports.try_recv().is_err());

        let mut frame = FrameBuffer::new(1);
        frame.subframe = 0;
        inbound.write(frame);
        stage.process_one();
        assert!(reports.try_recv().unwrap().mib.is_none());
    }

    #[test]
    fn test_empty_queue_reports_idle() {
        let (mut stage, _inbound, _outbound, _reports) = stage(None);
        assert!(!stage.process_one());
    }
}
