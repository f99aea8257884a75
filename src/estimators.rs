/*
 * Copyright 2019 The Regents of the University of California
 *
 * Licensed under the Apache License, Version 2.0 (the "License");
 * you may not use this file except in compliance with the License.
 * You may obtain a copy of the License at
 *
 *     http://www.apache.org/licenses/LICENSE-2.0
 *
 * Unless required by applicable law or agreed to in writing, software
 * distributed under the License is distributed on an "AS IS" BASIS,
 * WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 * See the License for the specific language governing permissions and
 * limitations under the License.
 *
 */

//! Signal-quality estimators shared across demodulators (§4, §5): baseband
//! and IF power, a noise-floor tracker, and the SNR derived from them.

use num_complex::Complex32;

/// Mean squared magnitude of a block of complex samples.
pub fn block_power(samples: &[Complex32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum: f32 = samples.iter().map(|s| s.norm_sqr()).sum();
    sum / samples.len() as f32
}

/// A minimum-follower noise floor tracker: drops immediately to a new
/// lower power reading, rises slowly otherwise. This is the same
/// attack-fast/release-slow shape as the AGC (§4.5), applied to noise
/// density instead of signal amplitude.
#[derive(Debug, Clone, Copy)]
pub struct NoiseFloorEstimator {
    floor: f32,
    rise_alpha: f32,
}

impl NoiseFloorEstimator {
    /// Creates an estimator with no prior history; `rise_alpha` in
    /// `(0, 1]` controls how quickly the floor is allowed to rise when
    /// the input power increases (smaller is slower).
    pub fn new(rise_alpha: f32) -> Self {
        NoiseFloorEstimator {
            floor: f32::INFINITY,
            rise_alpha,
        }
    }

    /// Feeds one block's power reading, returning the updated floor
    /// estimate.
    pub fn advance(&mut self, power: f32) -> f32 {
        if !self.floor.is_finite() || power < self.floor {
            self.floor = power;
        } else {
            self.floor += (power - self.floor) * self.rise_alpha;
        }
        self.floor
    }

    /// Current floor estimate.
    pub fn floor(&self) -> f32 {
        if self.floor.is_finite() {
            self.floor
        } else {
            0.0
        }
    }
}

/// Converts a signal-to-noise power ratio to decibels.
pub fn ratio_to_db(ratio: f32) -> f32 {
    if ratio <= 0.0 {
        f32::NEG_INFINITY
    } else {
        10.0 * ratio.log10()
    }
}

/// Converts a decibel value back to a linear power ratio; the sentinel
/// used throughout the control plane for "unconditionally open" squelch
/// is any value at or below `-999.0` dB, which collapses to the `0.0`
/// linear sentinel (§8 "Boundary behaviors").
pub fn db_to_ratio(db: f32) -> f32 {
    if db <= -999.0 {
        0.0
    } else {
        10f32.powf(db / 10.0)
    }
}

/// Estimates SNR, in decibels, from a signal power reading and a noise
/// floor estimate.
pub fn snr_db(signal_power: f32, noise_floor: f32) -> f32 {
    if noise_floor <= 0.0 {
        f32::INFINITY
    } else {
        ratio_to_db(signal_power / noise_floor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_power_of_unit_tone_is_one() {
        let samples = vec![Complex32::new(1.0, 0.0); 8];
        assert!((block_power(&samples) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn empty_block_power_is_zero() {
        assert_eq!(block_power(&[]), 0.0);
    }

    #[test]
    fn noise_floor_drops_immediately_but_rises_slowly() {
        let mut est = NoiseFloorEstimator::new(0.01);
        est.advance(1.0);
        assert_eq!(est.floor(), 1.0);
        est.advance(0.1); // quieter block: floor drops immediately
        assert_eq!(est.floor(), 0.1);
        est.advance(10.0); // louder block: floor rises slowly, not instantly
        assert!(est.floor() > 0.1 && est.floor() < 1.0);
    }

    #[test]
    fn db_sentinel_round_trips_to_zero_ratio() {
        assert_eq!(db_to_ratio(-999.0), 0.0);
        assert_eq!(db_to_ratio(-1500.0), 0.0);
    }

    #[test]
    fn snr_db_of_equal_power_is_zero() {
        assert!((snr_db(1.0, 1.0)).abs() < 1e-6);
    }
}
