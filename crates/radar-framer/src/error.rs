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

//! Error types shared by the framing pipeline.

use thiserror::Error;

/// Recoverable data conditions detected while assembling a frame.
///
/// None of these abort the stream. They are reported through
/// [`ChunkReport`](crate::assembler::ChunkReport) and logged.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FramingError {
    #[error("sample dropped: row {row} is full at column {col} (capacity {capacity})")]
    OutOfBounds {
        row: usize,
        col: usize,
        capacity: usize,
    },

    #[error("incomplete row {row}: {samples} samples received, at least {min} required")]
    IncompleteRow { row: usize, samples: usize, min: usize },
}

/// Invalid frame geometry or calibration.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("{name} must be at least {min}, got {value}")]
    TooSmall {
        name: &'static str,
        value: usize,
        min: usize,
    },

    #[error("min_samples ({min}) exceeds max_samples ({max})")]
    RowBoundsInverted { min: usize, max: usize },

    #[error("max_samples ({max}) exceeds the number of columns ({cols})")]
    RowCapacityExceedsColumns { max: usize, cols: usize },

    #[error("calibration value '{name}' must be positive and finite, got {value}")]
    InvalidCalibration { name: &'static str, value: f64 },
}

/// The other side of the frame handoff has gone away.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("frame handoff closed")]
pub struct HandoffClosed;

/// Why an acquisition stream stopped. None of these are failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamEnd {
    /// The chunk source has no more data.
    TransportEnded,
    /// A shutdown was requested through the cancellation token.
    ShutdownRequested,
    /// The compute stage stopped accepting frames.
    ConsumerGone,
}

impl std::fmt::Display for StreamEnd {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::TransportEnded => f.write_str("transport ended"),
            Self::ShutdownRequested => f.write_str("shutdown requested"),
            Self::ConsumerGone => f.write_str("consumer gone"),
        }
    }
}
