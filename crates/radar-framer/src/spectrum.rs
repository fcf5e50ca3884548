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

//! Range–Doppler power map computation.
//!
//! The 2D transform is pluggable through [`SpectralTransform`]; the default
//! runs separable `rustfft` passes, rows first, then columns.

use std::sync::Arc;

use num_complex::Complex;
use rustfft::{Fft, FftPlanner, Length};

use crate::conditioner::WindowedFrame;

/// Power assigned to cells with zero energy, in dB.
pub const POWER_FLOOR_DB: f64 = -200.0;

/// In-place forward 2D DFT over a row-major `rows × cols` buffer.
pub trait SpectralTransform: Send {
    fn forward_2d(&mut self, data: &mut [Complex<f64>], rows: usize, cols: usize);
}

/// Separable 2D FFT built on `rustfft`.
pub struct RustFftTransform {
    row_fft: Option<Arc<dyn Fft<f64>>>,
    col_fft: Option<Arc<dyn Fft<f64>>>,
    column: Vec<Complex<f64>>,
    scratch: Vec<Complex<f64>>,
}

impl std::fmt::Debug for RustFftTransform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RustFftTransform")
            .field("row_len", &self.row_fft.as_ref().map(|p| p.len()))
            .field("col_len", &self.col_fft.as_ref().map(|p| p.len()))
            .finish_non_exhaustive()
    }
}

impl Default for RustFftTransform {
    fn default() -> Self {
        Self::new()
    }
}

impl RustFftTransform {
    #[must_use]
    pub fn new() -> Self {
        Self {
            row_fft: None,
            col_fft: None,
            column: Vec::new(),
            scratch: Vec::new(),
        }
    }

    /// Plan for `len`, replanning only when the geometry changes.
    fn plan(slot: &mut Option<Arc<dyn Fft<f64>>>, len: usize) -> Arc<dyn Fft<f64>> {
        match slot {
            Some(fft) if fft.len() == len => Arc::clone(fft),
            _ => {
                let fft = FftPlanner::new().plan_fft_forward(len);
                *slot = Some(Arc::clone(&fft));
                fft
            }
        }
    }
}

impl SpectralTransform for RustFftTransform {
    fn forward_2d(&mut self, data: &mut [Complex<f64>], rows: usize, cols: usize) {
        assert_eq!(data.len(), rows * cols, "buffer does not match geometry");

        let row_fft = Self::plan(&mut self.row_fft, cols);
        let col_fft = Self::plan(&mut self.col_fft, rows);

        let scratch_len = row_fft
            .get_inplace_scratch_len()
            .max(col_fft.get_inplace_scratch_len());
        self.scratch.resize(scratch_len, Complex::new(0.0, 0.0));

        // Every row in one call: rustfft runs consecutive transforms
        row_fft.process_with_scratch(data, &mut self.scratch);

        self.column.resize(rows, Complex::new(0.0, 0.0));
        for c in 0..cols {
            for (r, cell) in self.column.iter_mut().enumerate() {
                *cell = data[r * cols + c];
            }
            col_fft.process_with_scratch(&mut self.column, &mut self.scratch);
            for (r, cell) in self.column.iter().enumerate() {
                data[r * cols + c] = *cell;
            }
        }
    }
}

/// Power per cell in dB with the reductions the display needs.
#[derive(Debug, Clone, PartialEq)]
pub struct RangeDopplerMap {
    rows: usize,
    cols: usize,
    power_db: Vec<f64>,
    pub mean_db: f64,
    pub max_db: f64,
    /// Sequence number of the source frame.
    pub sequence: u64,
    /// Overload count of the source frame.
    pub overload: u32,
}

impl RangeDopplerMap {
    /// Build a map from precomputed power values.
    #[must_use]
    pub fn from_power(rows: usize, cols: usize, power_db: Vec<f64>) -> Self {
        assert_eq!(power_db.len(), rows * cols, "power grid does not match geometry");
        let (mean_db, max_db) = mean_and_max(&power_db);
        Self {
            rows,
            cols,
            power_db,
            mean_db,
            max_db,
            sequence: 0,
            overload: 0,
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

    /// Power at a Doppler row and range column, in dB.
    #[must_use]
    pub fn get(&self, row: usize, col: usize) -> f64 {
        self.power_db[row * self.cols + col]
    }

    #[must_use]
    pub fn row(&self, row: usize) -> &[f64] {
        &self.power_db[row * self.cols..(row + 1) * self.cols]
    }

    /// Row shown at `display_row` once zero Doppler is moved to the middle.
    ///
    /// Display row 0 is the most negative velocity.
    #[must_use]
    pub fn doppler_shifted_row(&self, display_row: usize) -> &[f64] {
        self.row((display_row + self.rows - self.rows / 2) % self.rows)
    }

    #[must_use]
    pub fn as_slice(&self) -> &[f64] {
        &self.power_db
    }

    /// Strongest cell as `(row, col, dB)`, searching range columns below `max_col`.
    #[must_use]
    pub fn peak(&self, max_col: usize) -> Option<(usize, usize, f64)> {
        let max_col = max_col.min(self.cols);
        (0..self.rows)
            .flat_map(|r| (0..max_col).map(move |c| (r, c)))
            .map(|(r, c)| (r, c, self.get(r, c)))
            .max_by(|a, b| a.2.total_cmp(&b.2))
    }
}

/// Mean and maximum of a power grid. An empty grid gives the floor for both.
#[must_use]
#[allow(clippy::cast_precision_loss, reason = "grid sizes are far below 2^52")]
pub fn mean_and_max(power_db: &[f64]) -> (f64, f64) {
    if power_db.is_empty() {
        return (POWER_FLOOR_DB, POWER_FLOOR_DB);
    }
    let sum: f64 = power_db.iter().sum();
    let max = power_db.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    (sum / power_db.len() as f64, max)
}

/// `10·log10(re² + im²)`, floored at [`POWER_FLOOR_DB`].
#[must_use]
pub fn power_db(value: Complex<f64>) -> f64 {
    let power = value.norm_sqr();
    if power > 0.0 {
        (10.0 * power.log10()).max(POWER_FLOOR_DB)
    } else {
        POWER_FLOOR_DB
    }
}

/// Turns windowed frames into range–Doppler maps.
#[derive(Debug)]
pub struct SpectralCompute<T = RustFftTransform> {
    transform: T,
    work: Vec<Complex<f64>>,
}

impl Default for SpectralCompute<RustFftTransform> {
    fn default() -> Self {
        Self::new(RustFftTransform::new())
    }
}

impl<T: SpectralTransform> SpectralCompute<T> {
    #[must_use]
    pub fn new(transform: T) -> Self {
        Self {
            transform,
            work: Vec::new(),
        }
    }

    /// Transform a frame. The frame itself is only read.
    pub fn process(&mut self, frame: &WindowedFrame) -> RangeDopplerMap {
        let (rows, cols) = (frame.rows(), frame.cols());
        self.work.clear();
        self.work.extend_from_slice(frame.as_slice());
        self.transform.forward_2d(&mut self.work, rows, cols);

        let power = self.work.iter().copied().map(power_db).collect();
        let mut map = RangeDopplerMap::from_power(rows, cols, power);
        map.sequence = frame.sequence;
        map.overload = frame.overload;
        map
    }
}
