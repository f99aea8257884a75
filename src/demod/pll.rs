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

//! A second-order phase-locked loop used for carrier recovery (§4.5) and
//! the WFM stereo pilot (§4.4).

use num_complex::Complex32;

/// PLL configuration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PllParams {
    /// Loop bandwidth, in hertz.
    pub loop_bw: f32,
    /// Sample rate the PLL runs at.
    pub samprate: f32,
    /// Square (frequency-doubling) mode for suppressed-carrier signals.
    pub square: bool,
    /// Phase-error variance threshold below which the loop reports
    /// `locked`.
    pub lock_variance_threshold: f32,
}

/// Running second-order PLL state.
pub struct Pll {
    params: PllParams,
    /// Proportional and integral loop filter gains, derived from
    /// `loop_bw` using the standard critically-damped (zeta = 1/sqrt(2))
    /// design.
    kp: f32,
    ki: f32,
    phase: f32,
    freq: f32,
    rotations: i64,
    prev_phase_unwrapped: f32,
    error_variance: f32,
}

impl Pll {
    /// Creates a PLL from `params`, with its free-running frequency
    /// initialized to zero (suitable for loops that track a carrier near
    /// baseband, e.g. suppressed-carrier recovery).
    pub fn new(params: PllParams) -> Self {
        Self::with_center_hz(params, 0.0)
    }

    /// Creates a PLL whose free-running frequency starts at `center_hz`
    /// (converted to radians/sample), so the loop begins tracking near a
    /// known carrier instead of from rest. Used for the WFM stereo pilot,
    /// which must seed near 19 kHz rather than DC.
    pub fn with_center_hz(params: PllParams, center_hz: f32) -> Self {
        let (kp, ki) = loop_gains(params.loop_bw, params.samprate);
        let initial_freq = if params.samprate > 0.0 {
            2.0 * std::f32::consts::PI * center_hz / params.samprate
        } else {
            0.0
        };
        Pll {
            params,
            kp,
            ki,
            phase: 0.0,
            freq: initial_freq,
            rotations: 0,
            prev_phase_unwrapped: 0.0,
            error_variance: f32::MAX,
        }
    }

    /// Replaces parameters, recomputing loop gains.
    pub fn set_params(&mut self, params: PllParams) {
        let (kp, ki) = loop_gains(params.loop_bw, params.samprate);
        self.params = params;
        self.kp = kp;
        self.ki = ki;
    }

    /// Advances the loop by one sample, returning the phase error for
    /// that sample (used by callers wanting the raw discriminator
    /// output, e.g. for SNR estimation).
    pub fn advance(&mut self, input: Complex32) -> f32 {
        let reference_phase = if self.params.square {
            2.0 * self.phase
        } else {
            self.phase
        };
        let reference = Complex32::new(reference_phase.cos(), reference_phase.sin());
        let error = (input * reference.conj()).arg();

        self.freq += self.ki * error;
        self.phase += self.kp * error + self.freq;
        if self.phase > std::f32::consts::PI {
            self.phase -= 2.0 * std::f32::consts::PI;
            self.rotations += 1;
        } else if self.phase < -std::f32::consts::PI {
            self.phase += 2.0 * std::f32::consts::PI;
            self.rotations -= 1;
        }

        // Exponential running estimate of error variance for lock detection.
        let alpha = 0.01;
        self.error_variance = (1.0 - alpha) * self.error_variance.min(1.0) + alpha * error * error;
        self.prev_phase_unwrapped = self.phase;
        error
    }

    /// Carrier phase offset, in radians, in `[-pi, pi)`.
    pub fn phase(&self) -> f32 {
        self.phase
    }

    /// Unwrapped rotation count (how many full `2*pi` cycles the loop
    /// has advanced through).
    pub fn rotations(&self) -> i64 {
        self.rotations
    }

    /// True if the loop's phase-error variance is below the configured
    /// threshold.
    pub fn locked(&self) -> bool {
        self.error_variance < self.params.lock_variance_threshold
    }

    /// Current loop frequency estimate, in radians/sample.
    pub fn frequency(&self) -> f32 {
        self.freq
    }
}

fn loop_gains(loop_bw: f32, samprate: f32) -> (f32, f32) {
    if samprate <= 0.0 {
        return (0.0, 0.0);
    }
    let wn = loop_bw / samprate * 2.0 * std::f32::consts::PI;
    let zeta = std::f32::consts::FRAC_1_SQRT_2;
    let kp = 2.0 * zeta * wn;
    let ki = wn * wn;
    (kp, ki)
}
