// Copyright 2025 Chris Custine
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Framing and frame handoff for FMCW radar I/Q acquisition.
//!
//! The radar front end streams interleaved I/Q samples over USB in packets
//! of arbitrary size. This library turns that stream into fixed-size frames
//! (one row per chirp, one column per sample), conditions them and hands
//! them to a compute stage that produces range–Doppler power maps.
//!
//! - **Aligner**: reassembles 8-byte sample words across chunk boundaries
//! - **Assembler**: tracks sweeps, accepts or rejects rows and completes frames
//! - **Conditioner**: per-row DC removal, 2D raised-sine window, overload count
//! - **Handoff**: double-buffered producer/consumer boundary with backpressure
//! - **Spectrum**: 2D FFT to a power map in dB
//! - **Calibration**: bin to metres and metres per second
//!
//! # Quick Start
//!
//! The [`Framer`] wires the acquisition side together. Feed it every chunk
//! the transport delivers; completed frames appear on the consumer.
//!
//! ```no_run
//! use radar_framer::{handoff, BackpressurePolicy, ControlSignal, FrameConfig, Framer, SpectralCompute};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn run(mut read_usb: impl FnMut() -> Vec<u8> + Send + 'static) {
//! let config = FrameConfig::default();
//! let cancel = CancellationToken::new();
//! let (producer, mut consumer) =
//!     handoff(2, BackpressurePolicy::Block, config.rows, config.cols);
//! let mut framer = Framer::new(config, producer, cancel.clone()).unwrap();
//!
//! std::thread::spawn(move || {
//!     while framer.deliver(&read_usb()) == ControlSignal::Continue {}
//! });
//!
//! let mut compute = SpectralCompute::default();
//! while let Some(frame) = consumer.recv(&cancel).await {
//!     let map = compute.process(&frame);
//!     println!("frame {}: peak {:.1} dB", map.sequence, map.max_db);
//! }
//! # }
//! ```
//!
//! # Using Individual Layers
//!
//! ```
//! use radar_framer::{FrameAssembler, FrameConfig, Sample};
//!
//! let config = FrameConfig {
//!     rows: 2,
//!     cols: 4,
//!     min_samples: 4,
//!     max_samples: 4,
//!     warmup_samples: 0,
//!     sentinel_len: 16,
//! };
//! let mut assembler = FrameAssembler::new(config);
//! let sweep: Vec<u8> = (0..4).flat_map(|i| Sample::new(i, -i).to_word()).collect();
//!
//! let mut frames = 0;
//! for _ in 0..2 {
//!     for packet in sweep.chunks(16) {
//!         assembler.push_chunk(packet, |_| frames += 1);
//!     }
//!     // A short read ends the sweep
//!     assembler.push_chunk(&[], |_| frames += 1);
//! }
//! assert_eq!(frames, 1);
//! ```

pub mod aligner;
pub mod assembler;
pub mod calibration;
pub mod conditioner;
pub mod config;
pub mod error;
pub mod handoff;
pub mod spectrum;
pub mod window;

use std::error::Error;

use log::{debug, info, warn};
use tokio_util::sync::CancellationToken;

pub use aligner::{ByteAligner, Sample, WORD_LEN};
pub use assembler::{AssemblerStats, ChunkReport, Cursor, Frame, FrameAssembler, RowEvent};
pub use calibration::{AxisMapping, Calibration, SPEED_OF_LIGHT};
pub use conditioner::{Conditioner, WindowedFrame};
pub use config::{FrameConfig, DEFAULT_SENTINEL_LEN};
pub use error::{ConfigError, FramingError, HandoffClosed, StreamEnd};
pub use handoff::{
    handoff, BackpressurePolicy, FrameConsumer, FrameProducer, HandoffStats, Published, ReadyFrame,
    MIN_SLOTS,
};
pub use spectrum::{RangeDopplerMap, RustFftTransform, SpectralCompute, SpectralTransform, POWER_FLOOR_DB};
pub use window::{raised_sine, Window2d};

/// Error type returned by presentation sinks.
pub type SinkError = Box<dyn Error + Send + Sync>;

/// Consumer of finished range–Doppler maps (display, file, log).
pub trait PresentationSink: Send {
    /// Present one map. `axes` converts bins to physical units.
    fn render(&mut self, map: &RangeDopplerMap, axes: &AxisMapping) -> Result<(), SinkError>;
}

/// Whether the transport should keep delivering chunks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlSignal {
    Continue,
    Stop,
}

/// Counters reported when acquisition ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FramerStats {
    pub end: StreamEnd,
    pub assembler: AssemblerStats,
    pub handoff: HandoffStats,
    /// Completed frames, delivered or dropped, with a sample on an ADC rail.
    pub overloaded_frames: u64,
    /// Complete rows of the partial frame discarded at shutdown.
    pub discarded_rows: usize,
}

/// Acquisition-side pipeline: assembler, conditioner and frame producer.
///
/// Every chunk from the transport goes through [`deliver`](Self::deliver).
/// Completed frames are conditioned straight into a handoff buffer, so the
/// only copy of the raw frame is the one the assembler fills.
#[derive(Debug)]
pub struct Framer {
    assembler: FrameAssembler,
    conditioner: Conditioner,
    producer: FrameProducer,
    cancel: CancellationToken,
    overloaded_frames: u64,
    closed: bool,
}

impl Framer {
    /// Validate `config` and build a framer publishing into `producer`.
    pub fn new(
        config: FrameConfig,
        producer: FrameProducer,
        cancel: CancellationToken,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let conditioner = Conditioner::raised_sine(config.rows, config.cols);
        info!(
            "Framer ready: {}x{} frames, rows accepted with {}..={} samples, sentinel {} bytes",
            config.rows, config.cols, config.min_samples, config.max_samples, config.sentinel_len
        );
        Ok(Self {
            assembler: FrameAssembler::new(config),
            conditioner,
            producer,
            cancel,
            overloaded_frames: 0,
            closed: false,
        })
    }

    #[must_use]
    pub fn assembler(&self) -> &FrameAssembler {
        &self.assembler
    }

    #[must_use]
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Handle one transport chunk, classified by length against the sentinel.
    pub fn deliver(&mut self, bytes: &[u8]) -> ControlSignal {
        let end_of_block = bytes.len() != self.assembler.config().sentinel_len;
        self.deliver_block(bytes, end_of_block)
    }

    /// Handle one chunk with an explicit end-of-block marker.
    ///
    /// May block under [`BackpressurePolicy::Block`] until the consumer
    /// releases a buffer or the cancellation token fires.
    pub fn deliver_block(&mut self, bytes: &[u8], end_of_block: bool) -> ControlSignal {
        if self.closed || self.cancel.is_cancelled() {
            return ControlSignal::Stop;
        }

        let Self {
            assembler,
            conditioner,
            producer,
            cancel,
            ..
        } = self;
        let mut published = None;
        let mut overload = 0;

        assembler.push_block(bytes, end_of_block, |frame| {
            // Counted on the raw frame so dropped frames are reported too
            overload = Conditioner::overload(frame);
            published = Some(producer.publish(cancel, |out| {
                conditioner.condition(frame, out);
            }));
        });

        match published {
            None => ControlSignal::Continue,
            Some(Ok(Published::Delivered { sequence })) => {
                self.report_overload(sequence, overload);
                debug!("Frame {sequence} published");
                ControlSignal::Continue
            }
            Some(Ok(Published::Dropped { sequence })) => {
                self.report_overload(sequence, overload);
                ControlSignal::Continue
            }
            Some(Ok(Published::Cancelled { sequence })) => {
                self.report_overload(sequence, overload);
                ControlSignal::Stop
            }
            Some(Err(HandoffClosed)) => {
                info!("Compute stage closed the handoff, stopping acquisition");
                self.closed = true;
                ControlSignal::Stop
            }
        }
    }

    fn report_overload(&mut self, sequence: u64, overload: u32) {
        if overload > 0 {
            self.overloaded_frames += 1;
            warn!("Frame {sequence}: {overload} samples at the ADC rails, receiver overloaded");
        }
    }

    /// End acquisition, discarding any partial frame, and report counters.
    #[must_use]
    pub fn finish(self, reason: StreamEnd) -> FramerStats {
        let end = if self.closed {
            StreamEnd::ConsumerGone
        } else {
            reason
        };
        let cursor = self.assembler.cursor();
        if cursor.row > 0 || cursor.col > 0 {
            info!(
                "Discarding partial frame: {} complete rows, {} samples in the current row",
                cursor.row, cursor.col
            );
        }

        let stats = FramerStats {
            end,
            assembler: self.assembler.stats(),
            handoff: self.producer.stats(),
            overloaded_frames: self.overloaded_frames,
            discarded_rows: cursor.row,
        };
        info!(
            "Acquisition ended ({end}): {} frames completed, {} delivered, {} dropped, {} incomplete rows, {} samples out of bounds, {} overloaded frames",
            stats.assembler.frames_completed,
            stats.handoff.delivered,
            stats.handoff.dropped,
            stats.assembler.rows_incomplete,
            stats.assembler.samples_dropped,
            stats.overloaded_frames
        );
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SENTINEL: usize = 16;

    fn config(rows: usize, cols: usize) -> FrameConfig {
        FrameConfig {
            rows,
            cols,
            min_samples: 2,
            max_samples: cols,
            warmup_samples: 0,
            sentinel_len: SENTINEL,
        }
    }

    fn encode(samples: &[Sample]) -> Vec<u8> {
        samples.iter().flat_map(|s| s.to_word()).collect()
    }

    /// Deliver a sweep as full packets followed by the short terminator.
    fn deliver_sweep(framer: &mut Framer, bytes: &[u8]) -> ControlSignal {
        let mut signal = ControlSignal::Continue;
        for packet in bytes.chunks(SENTINEL) {
            signal = framer.deliver(packet);
        }
        if bytes.len() % SENTINEL == 0 {
            signal = framer.deliver(&[]);
        }
        signal
    }

    #[test]
    fn test_saturated_sweeps_report_overload_on_completion() {
        let (rows, cols) = (4, 8);
        let (producer, mut consumer) = handoff(2, BackpressurePolicy::Block, rows, cols);
        let mut framer = Framer::new(config(rows, cols), producer, CancellationToken::new()).unwrap();

        // Two sweeps of two samples each, one component on the positive rail
        let sweep = encode(&[Sample::new(i16::MAX, 5), Sample::new(-3, 4)]);
        deliver_sweep(&mut framer, &sweep);
        assert_eq!(framer.assembler().cursor().row, 1);
        let quiet = encode(&[Sample::new(1, 1), Sample::new(2, 2)]);
        deliver_sweep(&mut framer, &quiet);
        assert_eq!(framer.assembler().cursor().row, 2);
        assert!(consumer.try_recv().is_none());

        // The frame only exists once every row has arrived
        for _ in 2..rows {
            deliver_sweep(&mut framer, &quiet);
        }
        let frame = consumer.try_recv().unwrap();
        assert_eq!(frame.overload, 1);
        assert_eq!(frame.sequence, 0);
        drop(frame);

        let stats = framer.finish(StreamEnd::TransportEnded);
        assert_eq!(stats.overloaded_frames, 1);
        assert_eq!(stats.handoff.delivered, 1);
    }

    #[test]
    fn test_dropped_frame_still_reports_overload() {
        let (rows, cols) = (2, 8);
        let (producer, _consumer) = handoff(2, BackpressurePolicy::DropNewest, rows, cols);
        let mut framer = Framer::new(config(rows, cols), producer, CancellationToken::new()).unwrap();

        // Two quiet frames fill both buffers; nobody reads them
        let quiet = encode(&[Sample::new(1, 1), Sample::new(2, 2)]);
        for _ in 0..2 * rows {
            deliver_sweep(&mut framer, &quiet);
        }
        let loud = encode(&[Sample::new(i16::MAX, i16::MIN), Sample::new(2, 2)]);
        for _ in 0..rows {
            assert_eq!(deliver_sweep(&mut framer, &loud), ControlSignal::Continue);
        }

        let stats = framer.finish(StreamEnd::TransportEnded);
        assert_eq!(stats.handoff.delivered, 2);
        assert_eq!(stats.handoff.dropped, 1);
        assert_eq!(stats.overloaded_frames, 1);
    }

    #[test]
    fn test_cancel_releases_framer_blocked_on_busy_consumer() {
        let (rows, cols) = (2, 8);
        let (producer, consumer) = handoff(2, BackpressurePolicy::Block, rows, cols);
        let cancel = CancellationToken::new();
        let mut framer = Framer::new(config(rows, cols), producer, cancel.clone()).unwrap();

        // Three frames' worth of sweeps; the third frame has no free buffer
        let (done_tx, done_rx) = std::sync::mpsc::channel();
        let handle = std::thread::spawn(move || {
            let sweep = encode(&[Sample::new(3, 3); 4]);
            let mut signal = ControlSignal::Continue;
            for _ in 0..3 * rows {
                signal = deliver_sweep(&mut framer, &sweep);
                if signal == ControlSignal::Stop {
                    break;
                }
            }
            let _ = done_tx.send(signal);
            framer.finish(StreamEnd::ShutdownRequested)
        });

        std::thread::sleep(std::time::Duration::from_millis(20));
        assert!(done_rx.try_recv().is_err(), "framer should wait for the consumer");
        cancel.cancel();

        let signal = done_rx.recv_timeout(std::time::Duration::from_secs(5)).unwrap();
        assert_eq!(signal, ControlSignal::Stop);
        let stats = handle.join().unwrap();
        assert_eq!(stats.handoff.delivered, 2);
        assert_eq!(stats.end, StreamEnd::ShutdownRequested);
        // The consumer was alive the whole time
        drop(consumer);
    }

    #[test]
    fn test_rows_well_formed_sweeps_give_one_frame() {
        let (rows, cols) = (3, 8);
        let (producer, mut consumer) = handoff(2, BackpressurePolicy::Block, rows, cols);
        let mut framer = Framer::new(config(rows, cols), producer, CancellationToken::new()).unwrap();

        let samples: Vec<Sample> = (0..8).map(|c| Sample::new(c * 10, -c)).collect();
        let sweep = encode(&samples);
        for row in 0..rows {
            // Odd split sizes inside each sweep; the marker closes the row
            let (a, b) = sweep.split_at(5 + row);
            assert_eq!(framer.deliver_block(a, false), ControlSignal::Continue);
            assert_eq!(framer.deliver_block(b, true), ControlSignal::Continue);
        }

        let frame = consumer.try_recv().unwrap();
        assert!(consumer.try_recv().is_none());
        assert_eq!((frame.rows(), frame.cols()), (rows, cols));
        assert_eq!(frame.overload, 0);
        // Every row is a ramp minus its mean, so each conditioned row sums to ~0
        for r in 0..rows {
            let sum: f64 = frame.row(r).iter().map(|c| c.re).sum();
            assert!(sum.abs() < 1e-9, "row {r} sums to {sum}");
        }
        assert_eq!(framer.assembler().cursor(), Cursor::default());
    }

    #[test]
    fn test_cancel_stops_delivery() {
        let (producer, _consumer) = handoff(2, BackpressurePolicy::Block, 2, 8);
        let cancel = CancellationToken::new();
        let mut framer = Framer::new(config(2, 8), producer, cancel.clone()).unwrap();

        assert_eq!(framer.deliver(&[0; SENTINEL]), ControlSignal::Continue);
        cancel.cancel();
        assert_eq!(framer.deliver(&[0; SENTINEL]), ControlSignal::Stop);
        let stats = framer.finish(StreamEnd::ShutdownRequested);
        assert_eq!(stats.end, StreamEnd::ShutdownRequested);
    }

    #[test]
    fn test_closed_consumer_stops_delivery() {
        let (rows, cols) = (2, 8);
        let (producer, consumer) = handoff(2, BackpressurePolicy::Block, rows, cols);
        let mut framer = Framer::new(config(rows, cols), producer, CancellationToken::new()).unwrap();
        drop(consumer);

        let sweep = encode(&[Sample::new(1, 1); 4]);
        assert_eq!(deliver_sweep(&mut framer, &sweep), ControlSignal::Continue);
        assert_eq!(deliver_sweep(&mut framer, &sweep), ControlSignal::Stop);
        assert_eq!(framer.deliver(&sweep), ControlSignal::Stop);

        let stats = framer.finish(StreamEnd::TransportEnded);
        assert_eq!(stats.end, StreamEnd::ConsumerGone);
    }

    #[test]
    fn test_finish_discards_partial_frame() {
        let (producer, mut consumer) = handoff(2, BackpressurePolicy::Block, 4, 8);
        let mut framer = Framer::new(config(4, 8), producer, CancellationToken::new()).unwrap();
        let sweep = encode(&[Sample::new(7, 7); 3]);
        deliver_sweep(&mut framer, &sweep);
        deliver_sweep(&mut framer, &sweep);

        let stats = framer.finish(StreamEnd::TransportEnded);
        assert_eq!(stats.discarded_rows, 2);
        assert_eq!(stats.assembler.frames_completed, 0);
        assert!(consumer.try_recv().is_none());
    }

    #[test]
    fn test_invalid_config_rejected() {
        let (producer, _consumer) = handoff(2, BackpressurePolicy::Block, 2, 8);
        let bad = FrameConfig {
            min_samples: 9,
            ..config(2, 8)
        };
        assert!(matches!(
            Framer::new(bad, producer, CancellationToken::new()),
            Err(ConfigError::RowBoundsInverted { .. })
        ));
    }

    #[test]
    fn test_pipeline_tone_reaches_expected_bin() {
        let (rows, cols) = (8, 16);
        let (producer, mut consumer) = handoff(2, BackpressurePolicy::Block, rows, cols);
        let mut cfg = config(rows, cols);
        cfg.min_samples = cols;
        let mut framer = Framer::new(cfg, producer, CancellationToken::new()).unwrap();

        // Beat tone in range bin 3, identical on every chirp (zero Doppler)
        let samples: Vec<Sample> = (0..cols)
            .map(|c| {
                #[allow(clippy::cast_precision_loss, reason = "small test sizes")]
                let phase = 2.0 * std::f64::consts::PI * 3.0 * c as f64 / cols as f64;
                #[allow(clippy::cast_possible_truncation, reason = "bounded by amplitude")]
                let (i, q) = ((8000.0 * phase.cos()) as i16, (8000.0 * phase.sin()) as i16);
                Sample::new(i, q)
            })
            .collect();
        let sweep = encode(&samples);
        for _ in 0..rows {
            deliver_sweep(&mut framer, &sweep);
        }

        let frame = consumer.try_recv().unwrap();
        let map = SpectralCompute::default().process(&frame);
        let (row, col, _) = map.peak(cols / 2).unwrap();
        assert_eq!((row, col), (0, 3));
    }
}
