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

//! Frame assembly state machine.
//!
//! Rows are delimited by packet sizes: the FIFO delivers full packets of
//! `sentinel_len` bytes while a sweep is running and a short (possibly empty)
//! packet when the sweep ends. Each sweep becomes one row of the frame.

use log::{debug, warn};

use crate::aligner::{ByteAligner, Sample};
use crate::config::FrameConfig;
use crate::error::FramingError;

/// A `rows × cols` matrix of raw samples, row-major.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    rows: usize,
    cols: usize,
    samples: Vec<Sample>,
}

impl Frame {
    #[must_use]
    pub fn new(rows: usize, cols: usize) -> Self {
        Self {
            rows,
            cols,
            samples: vec![Sample::default(); rows * cols],
        }
    }

    #[must_use]
    pub fn rows(&self) -> usize {
        self.rows
    }

    #[must_use]
    pub fn cols(&self) -> usize {
        self.cols
    }

    #[must_use]
    pub fn get(&self, row: usize, col: usize) -> Sample {
        self.samples[row * self.cols + col]
    }

    #[must_use]
    pub fn row(&self, row: usize) -> &[Sample] {
        &self.samples[row * self.cols..(row + 1) * self.cols]
    }

    pub fn set(&mut self, row: usize, col: usize, sample: Sample) {
        self.samples[row * self.cols + col] = sample;
    }

    pub fn clear(&mut self) {
        self.samples.fill(Sample::default());
    }
}

/// Assembler position in the stream.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Cursor {
    pub row: usize,
    pub col: usize,
    pub byte_offset: usize,
    /// A full packet of the current sweep has been seen.
    pub sweep_started: bool,
}

/// Outcome of closing a row at the end of a data block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RowEvent {
    Accepted { row: usize, samples: usize },
    Incomplete(FramingError),
}

/// What a single chunk did to the assembler.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChunkReport {
    /// Groups decoded from the chunk, including dropped ones.
    pub groups: usize,
    /// Groups dropped because the row was already full.
    pub dropped: usize,
    /// First drop in this chunk, if any.
    pub out_of_bounds: Option<FramingError>,
    pub row_event: Option<RowEvent>,
    pub frame_completed: bool,
}

/// Lifetime counters, mostly for shutdown reporting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AssemblerStats {
    pub chunks: u64,
    pub rows_accepted: u64,
    pub rows_incomplete: u64,
    pub samples_dropped: u64,
    pub frames_completed: u64,
}

/// Turns a chunked byte stream into complete frames.
#[derive(Debug)]
pub struct FrameAssembler {
    config: FrameConfig,
    aligner: ByteAligner,
    frame: Frame,
    row: usize,
    col: usize,
    sweep_started: bool,
    stats: AssemblerStats,
}

impl FrameAssembler {
    /// Create an assembler. The configuration must already be validated.
    #[must_use]
    pub fn new(config: FrameConfig) -> Self {
        let mut aligner = ByteAligner::new();
        aligner.begin_sweep(config.warmup_samples);
        Self {
            frame: Frame::new(config.rows, config.cols),
            config,
            aligner,
            row: 0,
            col: 0,
            sweep_started: false,
            stats: AssemblerStats::default(),
        }
    }

    #[must_use]
    pub fn config(&self) -> &FrameConfig {
        &self.config
    }

    #[must_use]
    pub fn cursor(&self) -> Cursor {
        Cursor {
            row: self.row,
            col: self.col,
            byte_offset: self.aligner.byte_offset(),
            sweep_started: self.sweep_started,
        }
    }

    #[must_use]
    pub fn stats(&self) -> AssemblerStats {
        self.stats
    }

    /// The frame being filled.
    #[must_use]
    pub fn frame(&self) -> &Frame {
        &self.frame
    }

    /// Feed one chunk, classifying it by length against the sentinel.
    ///
    /// A chunk of exactly `sentinel_len` bytes is a full packet and the sweep
    /// continues; anything else ends the data block.
    pub fn push_chunk<F>(&mut self, bytes: &[u8], on_frame: F) -> ChunkReport
    where
        F: FnOnce(&Frame),
    {
        let end_of_block = bytes.len() != self.config.sentinel_len;
        self.push_block(bytes, end_of_block, on_frame)
    }

    /// Feed one chunk with an explicit end-of-block marker.
    ///
    /// When the chunk closes the last row of the frame, `on_frame` sees the
    /// finished frame before it is cleared for reuse.
    pub fn push_block<F>(&mut self, bytes: &[u8], end_of_block: bool, on_frame: F) -> ChunkReport
    where
        F: FnOnce(&Frame),
    {
        self.stats.chunks += 1;
        let mut report = self.write_groups(bytes);

        if !end_of_block {
            self.sweep_started = true;
        } else if self.sweep_started || !bytes.is_empty() {
            // Zero-length reads between sweeps carry no data and close nothing
            report.row_event = Some(self.close_row());
        }

        if self.row == self.config.rows {
            on_frame(&self.frame);
            self.frame.clear();
            self.row = 0;
            self.stats.frames_completed += 1;
            report.frame_completed = true;
            debug!("Frame {} complete", self.stats.frames_completed);
        }

        assert!(self.row < self.config.rows, "cursor row escaped the frame");
        report
    }

    fn write_groups(&mut self, bytes: &[u8]) -> ChunkReport {
        let Self {
            aligner,
            frame,
            row,
            col,
            config,
            ..
        } = self;
        let capacity = config.max_samples;
        let mut report = ChunkReport::default();

        let groups = aligner.feed(bytes, |sample| {
            if *col < capacity {
                frame.set(*row, *col, sample);
                *col += 1;
            } else {
                report.dropped += 1;
                report.out_of_bounds.get_or_insert(FramingError::OutOfBounds {
                    row: *row,
                    col: *col,
                    capacity,
                });
            }
        });
        report.groups = groups;

        if let Some(err) = &report.out_of_bounds {
            self.stats.samples_dropped += report.dropped as u64;
            warn!("{err} ({} samples dropped in this chunk)", report.dropped);
        }
        report
    }

    fn close_row(&mut self) -> RowEvent {
        if self.col < self.config.min_samples {
            self.stats.rows_incomplete += 1;
            let err = FramingError::IncompleteRow {
                row: self.row,
                samples: self.col,
                min: self.config.min_samples,
            };
            warn!("{err}; waiting for more data");
            return RowEvent::Incomplete(err);
        }

        let event = RowEvent::Accepted {
            row: self.row,
            samples: self.col,
        };
        self.row += 1;
        self.col = 0;
        self.sweep_started = false;
        self.aligner.begin_sweep(self.config.warmup_samples);
        self.stats.rows_accepted += 1;
        event
    }
}
