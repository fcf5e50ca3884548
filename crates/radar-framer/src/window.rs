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

//! Separable 2D taper applied before the range–Doppler transform.

use std::f64::consts::PI;

/// Raised-sine taper `w[i] = sin(π·i / (n−1))²`.
///
/// A single-point window is `[1.0]`.
#[must_use]
#[allow(clippy::cast_precision_loss, reason = "window lengths are far below 2^52")]
pub fn raised_sine(n: usize) -> Vec<f64> {
    if n < 2 {
        return vec![1.0; n];
    }
    let denom = (n - 1) as f64;
    (0..n)
        .map(|i| {
            let u = (PI * i as f64 / denom).sin();
            u * u
        })
        .collect()
}

/// Precomputed `row_window[r] * col_window[c]`.
#[derive(Debug, Clone, PartialEq)]
pub struct Window2d {
    row_window: Vec<f64>,
    col_window: Vec<f64>,
    weights: Vec<f64>,
}

impl Window2d {
    #[must_use]
    pub fn raised_sine(rows: usize, cols: usize) -> Self {
        Self::from_parts(raised_sine(rows), raised_sine(cols))
    }

    #[must_use]
    pub fn from_parts(row_window: Vec<f64>, col_window: Vec<f64>) -> Self {
        let weights = row_window
            .iter()
            .flat_map(|r| col_window.iter().map(move |c| r * c))
            .collect();
        Self {
            row_window,
            col_window,
            weights,
        }
    }

    #[must_use]
    pub fn rows(&self) -> usize {
        self.row_window.len()
    }

    #[must_use]
    pub fn cols(&self) -> usize {
        self.col_window.len()
    }

    #[must_use]
    pub fn row_window(&self) -> &[f64] {
        &self.row_window
    }

    #[must_use]
    pub fn col_window(&self) -> &[f64] {
        &self.col_window
    }

    #[must_use]
    pub fn at(&self, row: usize, col: usize) -> f64 {
        self.weights[row * self.cols() + col]
    }

    /// Weights of one row, `cols` long.
    #[must_use]
    pub fn row(&self, row: usize) -> &[f64] {
        let cols = self.cols();
        &self.weights[row * cols..(row + 1) * cols]
    }
}
