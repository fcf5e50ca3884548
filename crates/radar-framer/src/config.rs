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

//! Frame geometry and row acceptance limits.

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Payload length of a full USB packet from the acquisition FIFO.
pub const DEFAULT_SENTINEL_LEN: usize = 510;

/// Geometry of a frame and the rules used to cut the byte stream into rows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FrameConfig {
    /// Sweeps per frame (Doppler dimension).
    pub rows: usize,
    /// Range bins per sweep (transform length along a row).
    pub cols: usize,
    /// Fewest samples a row may hold and still be accepted.
    pub min_samples: usize,
    /// Most samples a row may hold; further samples are dropped.
    pub max_samples: usize,
    /// Samples discarded at the start of every sweep.
    pub warmup_samples: usize,
    /// Chunk length that marks a full packet (the sweep continues).
    pub sentinel_len: usize,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            rows: 512,
            cols: 2100,
            min_samples: 1800,
            max_samples: 1850,
            warmup_samples: 0,
            sentinel_len: DEFAULT_SENTINEL_LEN,
        }
    }
}

impl FrameConfig {
    /// Check the geometry before any buffers are allocated.
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_min("rows", self.rows, 2)?;
        check_min("cols", self.cols, 2)?;
        check_min("min_samples", self.min_samples, 1)?;
        check_min("sentinel_len", self.sentinel_len, 1)?;

        if self.min_samples > self.max_samples {
            return Err(ConfigError::RowBoundsInverted {
                min: self.min_samples,
                max: self.max_samples,
            });
        }
        if self.max_samples > self.cols {
            return Err(ConfigError::RowCapacityExceedsColumns {
                max: self.max_samples,
                cols: self.cols,
            });
        }
        Ok(())
    }

    /// Number of samples in a full frame.
    #[must_use]
    pub fn cells(&self) -> usize {
        self.rows * self.cols
    }
}

fn check_min(name: &'static str, value: usize, min: usize) -> Result<(), ConfigError> {
    if value < min {
        return Err(ConfigError::TooSmall { name, value, min });
    }
    Ok(())
}
