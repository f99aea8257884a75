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

//! Kaiser window design, shared by the channelizer passband and the
//! optional per-channel second filter.

/// Zeroth-order modified Bessel function of the first kind, evaluated by
/// its power series. Good to single-precision accuracy for the `beta`
/// values (0..20) used to shape passbands here.
pub fn bessel_i0(x: f64) -> f64 {
    let mut sum = 1.0;
    let mut term = 1.0;
    let half_x = x / 2.0;
    for k in 1..=32 {
        term *= (half_x / k as f64).powi(2);
        sum += term;
        if term < sum * 1e-16 {
            break;
        }
    }
    sum
}

/// Returns a Kaiser window of length `n` with shape parameter `beta`.
///
/// `beta == 0` is a rectangular window; larger `beta` trades a wider
/// transition for deeper stopband attenuation.
pub fn window(n: usize, beta: f64) -> Vec<f64> {
    if n == 0 {
        return Vec::new();
    }
    if n == 1 {
        return vec![1.0];
    }
    let denom = bessel_i0(beta);
    let m = (n - 1) as f64;
    (0..n)
        .map(|i| {
            let x = 2.0 * i as f64 / m - 1.0;
            let arg = beta * (1.0 - x * x).max(0.0).sqrt();
            bessel_i0(arg) / denom
        })
        .collect()
}

/// Builds a length-`n` real-valued lowpass passband shape (as `f32` gains
/// in `[0, 1]`, one per logical-order bin) with cutoff `cutoff_norm`
/// (a fraction of the full `[-0.5, 0.5)` normalized band) and Kaiser
/// shape `beta`.
///
/// The passband is flat out to `cutoff_norm` and rolls off to zero over a
/// transition region shaped by the Kaiser window; bins entirely outside
/// the passband (including its transition) are exactly zero.
pub fn passband_gains(n: usize, cutoff_norm: f64, beta: f64) -> Vec<f32> {
    if n == 0 {
        return Vec::new();
    }
    let cutoff_norm = cutoff_norm.clamp(0.0, 0.5);
    let taper = window(n, beta);
    let center = (n as f64 - 1.0) / 2.0;
    (0..n)
        .map(|i| {
            let freq = (i as f64 - center) / n as f64; // in [-0.5, 0.5)
            if freq.abs() <= cutoff_norm {
                taper[i] as f32
            } else {
                0.0
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rectangular_window_is_all_ones() {
        let w = window(8, 0.0);
        for v in w {
            assert!((v - 1.0).abs() < 1e-9);
        }
    }

    #[test]
    fn window_peaks_at_center() {
        let w = window(9, 6.0);
        let center = w[4];
        for (i, v) in w.iter().enumerate() {
            if i != 4 {
                assert!(*v <= center + 1e-12);
            }
        }
    }

    #[test]
    fn passband_gains_zero_outside_cutoff() {
        let gains = passband_gains(16, 0.1, 5.0);
        for (i, g) in gains.iter().enumerate() {
            let freq = (i as f64 - 7.5) / 16.0;
            if freq.abs() > 0.1 {
                assert_eq!(*g, 0.0);
            }
        }
        assert!(gains.iter().any(|g| *g > 0.0));
    }
}
