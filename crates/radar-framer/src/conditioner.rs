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

//! Frame conditioning: per-row DC removal, 2D windowing and overload count.

use num_complex::Complex;

use crate::assembler::Frame;
use crate::window::Window2d;

/// A conditioned frame ready for the 2D transform.
#[derive(Debug, Clone, PartialEq)]
pub struct WindowedFrame {
    rows: usize,
    cols: usize,
    data: Vec<Complex<f64>>,
    /// Position of this frame in the acquisition stream.
    pub sequence: u64,
    /// Raw components that sat on an ADC rail.
    pub overload: u32,
}

impl WindowedFrame {
    #[must_use]
    pub fn new(rows: usize, cols: usize) -> Self {
        Self {
            rows,
            cols,
            data: vec![Complex::new(0.0, 0.0); rows * cols],
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

    #[must_use]
    pub fn get(&self, row: usize, col: usize) -> Complex<f64> {
        self.data[row * self.cols + col]
    }

    #[must_use]
    pub fn row(&self, row: usize) -> &[Complex<f64>] {
        &self.data[row * self.cols..(row + 1) * self.cols]
    }

    /// All cells, row-major.
    #[must_use]
    pub fn as_slice(&self) -> &[Complex<f64>] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [Complex<f64>] {
        &mut self.data
    }
}

/// Applies DC removal and the window to completed frames.
#[derive(Debug, Clone)]
pub struct Conditioner {
    window: Window2d,
}

impl Conditioner {
    #[must_use]
    pub fn new(window: Window2d) -> Self {
        Self { window }
    }

    /// Conditioner with the raised-sine window for a geometry.
    #[must_use]
    pub fn raised_sine(rows: usize, cols: usize) -> Self {
        Self::new(Window2d::raised_sine(rows, cols))
    }

    #[must_use]
    pub fn window(&self) -> &Window2d {
        &self.window
    }

    /// Raw I and Q components of `frame` sitting on an ADC rail.
    #[must_use]
    pub fn overload(frame: &Frame) -> u32 {
        (0..frame.rows())
            .flat_map(|r| frame.row(r))
            .map(|sample| sample.saturated_components())
            .sum()
    }

    /// Condition `frame` into `out`, returning the overload count.
    ///
    /// The row mean is an integer mean truncated toward zero, taken over all
    /// columns including the zero padding after a short sweep.
    pub fn condition(&self, frame: &Frame, out: &mut WindowedFrame) -> u32 {
        assert_eq!(
            (frame.rows(), frame.cols()),
            (out.rows, out.cols),
            "windowed frame geometry mismatch"
        );
        assert_eq!(
            (frame.rows(), frame.cols()),
            (self.window.rows(), self.window.cols()),
            "window geometry mismatch"
        );

        let cols = i64::try_from(frame.cols()).unwrap_or(i64::MAX);

        for r in 0..frame.rows() {
            let samples = frame.row(r);
            let (sum_i, sum_q) = samples.iter().fold((0i64, 0i64), |(si, sq), s| {
                (si + i64::from(s.i), sq + i64::from(s.q))
            });
            let mean_i = sum_i / cols;
            let mean_q = sum_q / cols;

            let weights = self.window.row(r);
            let dst = &mut out.data[r * out.cols..(r + 1) * out.cols];
            for ((cell, sample), weight) in dst.iter_mut().zip(samples).zip(weights) {
                #[allow(
                    clippy::cast_precision_loss,
                    reason = "DC-removed 16-bit samples fit exactly in f64"
                )]
                let (i, q) = (
                    (i64::from(sample.i) - mean_i) as f64,
                    (i64::from(sample.q) - mean_q) as f64,
                );
                *cell = Complex::new(i * weight, q * weight);
            }
        }

        out.overload = Self::overload(frame);
        out.overload
    }
}
