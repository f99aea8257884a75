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

//! Single-pole IIR de-emphasis, used by the FM demodulators (§4.3, §4.4).

/// A single-pole IIR de-emphasis filter: `y[n] = a*y[n-1] + (1-a)*x[n]`.
#[derive(Debug, Clone, Copy)]
pub struct Deemphasis {
    alpha: f32,
    state: f32,
}

impl Deemphasis {
    /// Builds a de-emphasis filter from a time constant `tau_sec`
    /// (750 µs US, 50 µs broadcast EU are the conventional presets) at
    /// the given sample rate.
    pub fn new(tau_sec: f32, samprate: f32) -> Self {
        let alpha = if tau_sec <= 0.0 {
            0.0
        } else {
            (-1.0 / (tau_sec * samprate)).exp()
        };
        Deemphasis { alpha, state: 0.0 }
    }

    /// A no-op de-emphasis (alpha = 0, output equals input); used when
    /// de-emphasis is disabled.
    pub fn disabled() -> Self {
        Deemphasis {
            alpha: 0.0,
            state: 0.0,
        }
    }

    /// Filters one sample.
    pub fn process(&mut self, input: f32) -> f32 {
        self.state = self.alpha * self.state + (1.0 - self.alpha) * input;
        self.state
    }

    /// Filters a block in place.
    pub fn process_block(&mut self, samples: &mut [f32]) {
        for s in samples.iter_mut() {
            *s = self.process(*s);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_deemphasis_is_identity() {
        let mut d = Deemphasis::disabled();
        assert_eq!(d.process(0.7), 0.7);
        assert_eq!(d.process(-0.3), -0.3);
    }

    #[test]
    fn step_response_approaches_input_asymptotically() {
        let mut d = Deemphasis::new(750e-6, 48_000.0);
        let mut last = 0.0;
        for _ in 0..2000 {
            last = d.process(1.0);
        }
        assert!((last - 1.0).abs() < 1e-3);
    }

    #[test]
    fn longer_time_constant_responds_more_slowly() {
        let mut fast = Deemphasis::new(50e-6, 48_000.0);
        let mut slow = Deemphasis::new(750e-6, 48_000.0);
        let fast_step = fast.process(1.0);
        let slow_step = slow.process(1.0);
        assert!(fast_step > slow_step);
    }
}
