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

//! Radar calibration constants and the bin-to-physical-unit mappings.
//!
//! Range follows from the beat frequency of a linear chirp:
//! `R = f_beat · c / (2 · slope)` with `slope = bandwidth / sweep_time`.
//! Velocity follows from the phase advance between sweeps:
//! `Δv = λ / (2 · sweep_time · rows)` per Doppler bin.

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Speed of light in vacuum (m/s).
pub const SPEED_OF_LIGHT: f64 = 299_792_458.0;

/// Physical constants of the radar front-end. Immutable once acquisition starts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Calibration {
    /// Duration of one frequency sweep in seconds.
    pub sweep_time: f64,
    /// Swept bandwidth in Hz.
    pub bandwidth: f64,
    /// ADC sample rate in Hz.
    pub sample_rate: f64,
    /// Carrier wavelength in metres.
    pub wavelength: f64,
    /// Distance reported for range bin zero (cable and antenna delay), metres.
    pub distance_offset: f64,
}

impl Default for Calibration {
    fn default() -> Self {
        Self {
            sweep_time: 0.001_039,
            bandwidth: 100_000_000.0,
            sample_rate: 1_800_000.0,
            wavelength: 0.1224,
            distance_offset: 0.0,
        }
    }
}

impl Calibration {
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, value) in [
            ("sweep_time", self.sweep_time),
            ("bandwidth", self.bandwidth),
            ("sample_rate", self.sample_rate),
            ("wavelength", self.wavelength),
        ] {
            if !(value.is_finite() && value > 0.0) {
                return Err(ConfigError::InvalidCalibration { name, value });
            }
        }
        if !self.distance_offset.is_finite() {
            return Err(ConfigError::InvalidCalibration {
                name: "distance_offset",
                value: self.distance_offset,
            });
        }
        Ok(())
    }

    /// Chirp slope in Hz/s.
    #[must_use]
    pub fn slope(&self) -> f64 {
        self.bandwidth / self.sweep_time
    }

    /// Bind the constants to a frame geometry.
    #[must_use]
    pub fn axes(&self, rows: usize, cols: usize) -> AxisMapping {
        AxisMapping {
            calibration: self.clone(),
            rows,
            cols,
        }
    }
}

/// Pure mappings between map bins and physical units for one frame geometry.
#[derive(Debug, Clone, PartialEq)]
pub struct AxisMapping {
    calibration: Calibration,
    rows: usize,
    cols: usize,
}

#[allow(
    clippy::cast_precision_loss,
    reason = "bin counts are far below 2^52"
)]
impl AxisMapping {
    #[must_use]
    pub fn calibration(&self) -> &Calibration {
        &self.calibration
    }

    #[must_use]
    pub fn rows(&self) -> usize {
        self.rows
    }

    #[must_use]
    pub fn cols(&self) -> usize {
        self.cols
    }

    /// Width of one range bin in Hz.
    #[must_use]
    pub fn range_bin_hz(&self) -> f64 {
        self.calibration.sample_rate / self.cols as f64
    }

    /// Metres per range bin.
    #[must_use]
    pub fn range_resolution(&self) -> f64 {
        self.range_bin_hz() * SPEED_OF_LIGHT / (2.0 * self.calibration.slope())
    }

    /// Metres per second per Doppler bin.
    #[must_use]
    pub fn velocity_resolution(&self) -> f64 {
        self.calibration.wavelength / (2.0 * self.calibration.sweep_time * self.rows as f64)
    }

    /// Distance of a (possibly fractional) range bin.
    #[must_use]
    pub fn range_bin_to_distance(&self, bin: f64) -> f64 {
        bin * self.range_resolution() + self.calibration.distance_offset
    }

    /// Fractional range bin at which a distance appears.
    #[must_use]
    pub fn distance_to_range_bin(&self, distance: f64) -> f64 {
        (distance - self.calibration.distance_offset) / self.range_resolution()
    }

    /// Farthest unambiguous distance (the Nyquist bin).
    #[must_use]
    pub fn max_range(&self) -> f64 {
        self.range_bin_to_distance((self.cols / 2) as f64)
    }

    /// Velocity of a signed Doppler bin (0 = stationary).
    #[must_use]
    pub fn doppler_bin_to_velocity(&self, bin: f64) -> f64 {
        bin * self.velocity_resolution()
    }

    /// Signed, fractional Doppler bin at which a velocity appears.
    #[must_use]
    pub fn velocity_to_doppler_bin(&self, velocity: f64) -> f64 {
        velocity / self.velocity_resolution()
    }

    /// Signed Doppler bin held by a row of the transform output.
    ///
    /// Rows past the midpoint wrap to negative frequencies.
    #[must_use]
    #[allow(
        clippy::cast_possible_wrap,
        reason = "row counts are far below isize::MAX"
    )]
    pub fn signed_doppler_bin(&self, row: usize) -> isize {
        if row < self.rows - self.rows / 2 {
            row as isize
        } else {
            row as isize - self.rows as isize
        }
    }

    /// Velocity held by a row of the transform output.
    #[must_use]
    pub fn doppler_row_to_velocity(&self, row: usize) -> f64 {
        self.doppler_bin_to_velocity(self.signed_doppler_bin(row) as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn default_axes() -> AxisMapping {
        Calibration::default().axes(512, 2100)
    }

    #[test]
    fn test_range_resolution() {
        // 857 Hz bins on a 96 GHz/s chirp is roughly 1.33 m
        let axes = default_axes();
        assert!((axes.range_resolution() - 1.3349).abs() < 1e-3);
    }

    #[test]
    fn test_velocity_resolution() {
        let axes = default_axes();
        assert!((axes.velocity_resolution() - 0.11505).abs() < 1e-4);
    }

    #[test]
    fn test_distance_round_trip_with_offset() {
        let calibration = Calibration {
            distance_offset: 2.5,
            ..Calibration::default()
        };
        let axes = calibration.axes(512, 2100);
        let bin = axes.distance_to_range_bin(100.0);
        assert!((axes.range_bin_to_distance(bin) - 100.0).abs() < 1e-9);
        assert!((axes.range_bin_to_distance(0.0) - 2.5).abs() < 1e-12);
    }

    #[test]
    fn test_signed_doppler_bin_wraps() {
        let axes = Calibration::default().axes(8, 16);
        let bins: Vec<isize> = (0..8).map(|r| axes.signed_doppler_bin(r)).collect();
        assert_eq!(bins, vec![0, 1, 2, 3, -4, -3, -2, -1]);
    }

    #[test]
    fn test_signed_doppler_bin_odd_rows() {
        let axes = Calibration::default().axes(5, 16);
        let bins: Vec<isize> = (0..5).map(|r| axes.signed_doppler_bin(r)).collect();
        assert_eq!(bins, vec![0, 1, 2, -2, -1]);
    }

    #[test]
    fn test_validate_rejects_zero_bandwidth() {
        let calibration = Calibration {
            bandwidth: 0.0,
            ..Calibration::default()
        };
        assert!(matches!(
            calibration.validate(),
            Err(ConfigError::InvalidCalibration { name: "bandwidth", .. })
        ));
    }
}
