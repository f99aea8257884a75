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

//! Narrowband FM demodulation (§4.3).

use num_complex::Complex32;

use crate::demod::deemphasis::Deemphasis;
use crate::demod::squelch::{Squelch, SquelchParams, SquelchState};
use crate::demod::tone::ToneDetector;

/// NBFM configuration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NbfmParams {
    /// Peak frequency deviation, in hertz, that maps to full-scale audio.
    pub peak_deviation_hz: f32,
    /// Channel (baseband) sample rate.
    pub samprate: f32,
    /// De-emphasis time constant; `0.0` disables de-emphasis.
    pub deemphasis_tau_sec: f32,
    /// Squelch thresholds/tail.
    pub squelch: SquelchParams,
    /// CTCSS/PL tone frequency; `0.0` disables tone detection.
    pub tone_hz: f32,
    /// Tone deviation threshold used to gate tone squelch.
    pub tone_threshold: f32,
}

/// Result of demodulating one block.
pub struct NbfmOutput {
    /// Mono PCM samples (silence when squelch is not open).
    pub pcm: Vec<f32>,
    /// Squelch state after this block.
    pub squelch_state: SquelchState,
    /// True if the configured tone is present (always true when tone
    /// detection is disabled).
    pub tone_present: bool,
}

/// Running NBFM demodulator state for one channel.
pub struct Nbfm {
    params: NbfmParams,
    prev_sample: Complex32,
    discriminator_scale: f32,
    deemphasis: Deemphasis,
    tone: ToneDetector,
    squelch: Squelch,
}

impl Nbfm {
    /// Creates an NBFM demodulator from `params`.
    pub fn new(params: NbfmParams) -> Self {
        let discriminator_scale =
            params.samprate / (2.0 * std::f32::consts::PI * params.peak_deviation_hz.max(1.0));
        let deemphasis = if params.deemphasis_tau_sec > 0.0 {
            Deemphasis::new(params.deemphasis_tau_sec, params.samprate)
        } else {
            Deemphasis::disabled()
        };
        let tone = ToneDetector::new(params.tone_hz, params.samprate, params.tone_threshold);
        let squelch = Squelch::new(params.squelch);
        Nbfm {
            params,
            prev_sample: Complex32::new(0.0, 0.0),
            discriminator_scale,
            deemphasis,
            tone,
            squelch,
        }
    }

    /// Replaces parameters in place (a filter-only reconfigure, not a
    /// restart trigger per §4.7).
    pub fn set_params(&mut self, params: NbfmParams) {
        self.discriminator_scale =
            params.samprate / (2.0 * std::f32::consts::PI * params.peak_deviation_hz.max(1.0));
        self.squelch.set_params(params.squelch);
        self.params = params;
    }

    /// Current squelch state, for the status emitter (§4.8).
    pub fn squelch_state(&self) -> SquelchState {
        self.squelch.state()
    }

    /// True if a CTCSS/PL tone is configured (§4.3's tone detector).
    pub fn tone_enabled(&self) -> bool {
        self.tone.enabled()
    }

    /// Demodulates one block of complex baseband samples.
    pub fn process(&mut self, input: &[Complex32]) -> NbfmOutput {
        let mut pcm = Vec::with_capacity(input.len());
        let mut block_power = 0f32;
        let mut tone_present = true;
        for &sample in input {
            let discriminated = (sample * self.prev_sample.conj()).arg() * self.discriminator_scale;
            self.prev_sample = sample;
            block_power += sample.norm_sqr();
            tone_present = self.tone.advance(discriminated);
            pcm.push(discriminated);
        }
        self.deemphasis.process_block(&mut pcm);

        let metric = if input.is_empty() {
            0.0
        } else {
            block_power / input.len() as f32
        };
        let state = self.squelch.advance(metric);
        if state != SquelchState::Open {
            for s in pcm.iter_mut() {
                *s = 0.0;
            }
        }
        NbfmOutput {
            pcm,
            squelch_state: state,
            tone_present,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> NbfmParams {
        NbfmParams {
            peak_deviation_hz: 5000.0,
            samprate: 8000.0,
            deemphasis_tau_sec: 0.0,
            squelch: SquelchParams {
                open: 0.0,
                close: 0.0,
                tail_blocks: 0,
            },
            tone_hz: 0.0,
            tone_threshold: 0.0,
        }
    }

    #[test]
    fn constant_carrier_demodulates_to_near_zero() {
        let mut nbfm = Nbfm::new(params());
        let input = vec![Complex32::new(1.0, 0.0); 16];
        let out = nbfm.process(&input);
        for s in out.pcm {
            assert!(s.abs() < 1e-3);
        }
    }

    #[test]
    fn rotating_phase_produces_nonzero_discriminator_output() {
        let mut nbfm = Nbfm::new(params());
        let step = 0.1f32;
        let input: Vec<Complex32> = (0..16)
            .map(|i| Complex32::new((i as f32 * step).cos(), (i as f32 * step).sin()))
            .collect();
        let out = nbfm.process(&input);
        assert!(out.pcm.iter().skip(1).any(|s| s.abs() > 0.0));
    }

    #[test]
    fn squelch_mutes_output_when_closed() {
        let mut p = params();
        p.squelch = SquelchParams {
            open: 10.0,
            close: 5.0,
            tail_blocks: 0,
        };
        let mut nbfm = Nbfm::new(p);
        let input = vec![Complex32::new(0.01, 0.0); 16]; // low power, stays closed
        let out = nbfm.process(&input);
        assert_eq!(out.squelch_state, SquelchState::Closed);
        assert!(out.pcm.iter().all(|&s| s == 0.0));
    }
}
