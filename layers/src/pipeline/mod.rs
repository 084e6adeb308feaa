//! Receive Pipeline Assembly
//!
//! Owns the queues, the control channel and the diagnostic sink, and wires
//! the synchronizer, the PBCH stage and the PDSCH decoder threads together.
//! Stages receive reader and writer handles by construction; none of them
//! holds a reference back to the pipeline.

pub mod buffer;
pub mod decoder;
pub mod pbch_stage;
pub mod queue;

pub use buffer::{FrameBuffer, RingAverage};
pub use decoder::{NullSink, PdschStage, SpectroSink, SubframeSink};
pub use pbch_stage::PbchStage;
pub use queue::BufferQueue;

use std::sync::atomic::Ordering;
use std::sync::{mpsc, Arc};
use std::thread;

use common::Rbs;
use interfaces::device::Device;
use interfaces::diag::DiagnosticSink;
use interfaces::InterfaceError;
use tracing::{error, info, warn};

use crate::phy::{DspPhy, Mib, PbchDecoder};
use crate::sync::{SyncQueues, Synchronizer};
use crate::LayerError;

/// Subframe buffers circulating between the synchronizer and the decoders
const NUM_RECV_SUBFRAMES: usize = 128;

/// One MIB decode attempt, reported from the PBCH stage to the synchronizer
#[derive(Debug, Clone, Copy)]
pub struct MibReport {
    pub mib: Option<Mib>,
}

/// Pipeline construction parameters
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub chans: usize,
    pub rbs: Rbs,
    pub freq: f64,
    pub gain: f64,
    pub decoder_threads: usize,
}

/// Assembled receive pipeline
pub struct Pipeline {
    sync: Synchronizer<DspPhy>,
    pbch: PbchStage<PbchDecoder>,
    decoders: Vec<PdschStage<Box<dyn SubframeSink>>>,
}

impl Pipeline {
    /// Build queues, stages and the synchronizer around a device
    pub fn new(device: Box<dyn Device>, config: &PipelineConfig) -> Result<Self, LayerError> {
        let pdsch_queue = Arc::new(BufferQueue::default());
        let return_queue = Arc::new(BufferQueue::default());
        let pbch_queue = Arc::new(BufferQueue::default());
        let (mib_tx, mib_rx) = mpsc::channel();

        // Prime the recycling pool
        for _ in 0..NUM_RECV_SUBFRAMES {
            return_queue.write(FrameBuffer::new(config.chans));
        }

        let diag = match DiagnosticSink::new() {
            Ok(sink) => Some(Arc::new(sink)),
            Err(e) => {
                warn!("Diagnostic sink unavailable: {}", e);
                None
            }
        };

        let mut sync = Synchronizer::new(
            device,
            DspPhy::new(),
            config.chans,
            SyncQueues {
                pdsch_out: pdsch_queue.clone(),
                pdsch_ret: return_queue.clone(),
                pbch_out: pbch_queue.clone(),
                mib_rx,
            },
        );
        sync.open(config.rbs, config.freq, config.gain)?;

        let pbch = PbchStage::new(
            pbch_queue,
            pdsch_queue.clone(),
            mib_tx,
            PbchDecoder::new(),
        );

        let decoders = (0..config.decoder_threads.max(1))
            .map(|_| {
                let sink: Box<dyn SubframeSink> = match diag.clone() {
                    Some(d) => Box::new(SpectroSink::new(d)),
                    None => Box::new(NullSink),
                };
                PdschStage::new(
                    pdsch_queue.clone(),
                    return_queue.clone(),
                    sink,
                    diag.clone(),
                )
            })
            .collect();

        Ok(Self { sync, pbch, decoders })
    }

    /// Spawn the stage threads and drive the synchronizer on this thread
    /// until the device stream ends or a fatal fault occurs
    pub fn run(mut self) -> Result<(), LayerError> {
        let mut handles = Vec::new();
        let mut stop_handles = vec![self.pbch.stop_handle()];

        let mut pbch = self.pbch;
        handles.push(
            thread::Builder::new()
                .name("pbch".into())
                .spawn(move || pbch.run())
                .expect("spawn pbch stage"),
        );

        for (n, mut dec) in self.decoders.into_iter().enumerate() {
            stop_handles.push(dec.stop_handle());
            handles.push(
                thread::Builder::new()
                    .name(format!("pdsch-{}", n))
                    .spawn(move || dec.run())
                    .expect("spawn pdsch stage"),
            );
        }

        let result = match self.sync.run() {
            Ok(()) => Ok(()),
            Err(LayerError::Interface(InterfaceError::EndOfStream)) => {
                info!("Sample stream ended");
                Ok(())
            }
            Err(e) => {
                error!("Synchronizer terminated: {}", e);
                Err(e)
            }
        };

        for stop in &stop_handles {
            stop.store(true, Ordering::Relaxed);
        }
        for handle in handles {
            let _ = handle.join();
        }
        result
    }

    /// Handle that stops the synchronizer after its current iteration
    pub fn stop_handle(&self) -> Arc<std::sync::atomic::AtomicBool> {
        self.sync.stop_handle()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::RateRadix;
    use interfaces::{InterfaceError, Sample16};

    /// Endless silent device
    struct SilentDevice;

    impl Device for SilentDevice {
        fn init(&mut self, _rbs: Rbs) -> Result<i64, InterfaceError> {
            Ok(0)
        }
        fn start(&mut self) {}
        fn stop(&mut self) {}
        fn reset(&mut self) {}
        fn set_freq(&mut self, _freq: f64) {}
        fn set_gain(&mut self, gain: f64) -> f64 {
            gain
        }
        fn shift_freq(&mut self, _offset: f64) {}
        fn reset_freq(&mut self) {}
        fn ts_high(&self) -> i64 {
            i64::MAX / 2
        }
        fn ts_low(&self) -> i64 {
            0
        }
        fn reload(&mut self) -> Result<(), InterfaceError> {
            Ok(())
        }
        fn pull(
            &mut self,
            bufs: &mut [Vec<Sample16>],
            len: usize,
            _ts: i64,
        ) -> Result<usize, InterfaceError> {
            for b in bufs.iter_mut() {
                b.resize(len, Sample16::default());
            }
            Ok(len)
        }
        fn rate(&self) -> f64 {
            1.92e6
        }
        fn radix(&self) -> RateRadix {
            RateRadix::Radix3
        }
    }

    #[test]
    fn test_pipeline_assembles_and_stops() {
        let config = PipelineConfig {
            chans: 1,
            rbs: Rbs::Rb6,
            freq: 0.0,
            gain: 30.0,
            decoder_threads: 2,
        };

        let pipeline = Pipeline::new(Box::new(SilentDevice), &config).unwrap();
        let stop = pipeline.stop_handle();
        stop.store(true, Ordering::Relaxed);

        // One synchronizer step on silence, then a clean join of all stages
        pipeline.run().unwrap();
    }
}
