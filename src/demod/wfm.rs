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

//! Wideband (broadcast) FM demodulation with stereo pilot decoding (§4.4).

use num_complex::Complex32;

use crate::demod::deemphasis::Deemphasis;
use crate::demod::pll::{Pll, PllParams};
use crate::demod::squelch::{Squelch, SquelchParams, SquelchState};

const PILOT_HZ: f32 = 19_000.0;
const INTERNAL_SAMPRATE: f32 = 48_000.0;

/// WFM configuration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WfmParams {
    /// Peak frequency deviation, in hertz.
    pub peak_deviation_hz: f32,
    /// De-emphasis time constant (75 µs or 50 µs broadcast conventions).
    pub deemphasis_tau_sec: f32,
    /// Squelch thresholds/tail.
    pub squelch: SquelchParams,
    /// Requests stereo decoding; actual stereo output additionally
    /// requires the pilot PLL to lock (see §4.4).
    pub stereo_requested: bool,
}

/// Result of demodulating one block.
pub struct WfmOutput {
    /// Left channel PCM (mono PCM when not stereo).
    pub left: Vec<f32>,
    /// Right channel PCM; empty when not in stereo.
    pub right: Vec<f32>,
    /// True if stereo decoding is active this block.
    pub stereo_active: bool,
    /// Squelch state after this block.
    pub squelch_state: SquelchState,
}

/// Running WFM demodulator state. Operates at a fixed internal rate
/// (48 kHz) as specified in §4.4; the channelizer/second filter are
/// expected to deliver baseband already resampled to that rate.
pub struct Wfm {
    params: WfmParams,
    prev_sample: Complex32,
    discriminator_scale: f32,
    pilot: Pll,
    l_plus_r_lpf: Deemphasis,
    l_minus_r_lpf: Deemphasis,
    left_deemph: Deemphasis,
    right_deemph: Deemphasis,
    squelch: Squelch,
}

impl Wfm {
    /// Creates a WFM demodulator from `params`.
    pub fn new(params: WfmParams) -> Self {
        let discriminator_scale =
            INTERNAL_SAMPRATE / (2.0 * std::f32::consts::PI * params.peak_deviation_hz.max(1.0));
        let pilot = Pll::with_center_hz(
            PllParams {
                loop_bw: 5.0,
                samprate: INTERNAL_SAMPRATE,
                square: false,
                lock_variance_threshold: 0.02,
            },
            PILOT_HZ,
        );
        // Single-pole lowpass time constants standing in for proper FIR
        // crossovers at 15 kHz (L+R) and the L-R synchronous-detector
        // output; `Deemphasis` is reused here purely as a one-pole IIR.
        let l_plus_r_lpf = Deemphasis::new(1.0 / (2.0 * std::f32::consts::PI * 15_000.0), INTERNAL_SAMPRATE);
        let l_minus_r_lpf = Deemphasis::new(1.0 / (2.0 * std::f32::consts::PI * 15_000.0), INTERNAL_SAMPRATE);
        let (left_deemph, right_deemph) = if params.deemphasis_tau_sec > 0.0 {
            (
                Deemphasis::new(params.deemphasis_tau_sec, INTERNAL_SAMPRATE),
                Deemphasis::new(params.deemphasis_tau_sec, INTERNAL_SAMPRATE),
            )
        } else {
            (Deemphasis::disabled(), Deemphasis::disabled())
        };
        let squelch = Squelch::new(params.squelch);
        Wfm {
            params,
            prev_sample: Complex32::new(0.0, 0.0),
            discriminator_scale,
            pilot,
            l_plus_r_lpf,
            l_minus_r_lpf,
            left_deemph,
            right_deemph,
            squelch,
        }
    }

    /// Current squelch state, for the status emitter (§4.8).
    pub fn squelch_state(&self) -> SquelchState {
        self.squelch.state()
    }

    /// True if the 19 kHz pilot PLL is locked (§4.4's stereo-enable gate).
    pub fn pilot_locked(&self) -> bool {
        self.pilot.locked()
    }

    /// Demodulates one block of complex baseband samples at 48 kHz.
    pub fn process(&mut self, input: &[Complex32]) -> WfmOutput {
        let mut block_power = 0f32;
        let mut l_plus_r = Vec::with_capacity(input.len());
        let mut l_minus_r = Vec::with_capacity(input.len());

        for &sample in input {
            let discriminated = (sample * self.prev_sample.conj()).arg() * self.discriminator_scale;
            self.prev_sample = sample;
            block_power += sample.norm_sqr();

            self.pilot.advance(Complex32::new(discriminated, 0.0));
            let doubled_phase = 2.0 * self.pilot.phase();
            let synchronous = discriminated * doubled_phase.cos();

            l_plus_r.push(self.l_plus_r_lpf.process(discriminated));
            l_minus_r.push(self.l_minus_r_lpf.process(synchronous));
        }

        let stereo_active = self.params.stereo_requested && self.pilot.locked();

        let (mut left, mut right) = if stereo_active {
            let left: Vec<f32> = l_plus_r
                .iter()
                .zip(l_minus_r.iter())
                .map(|(&s, &d)| 0.5 * (s + d))
                .collect();
            let right: Vec<f32> = l_plus_r
                .iter()
                .zip(l_minus_r.iter())
                .map(|(&s, &d)| 0.5 * (s - d))
                .collect();
            (left, right)
        } else {
            (l_plus_r, Vec::new())
        };

        self.left_deemph.process_block(&mut left);
        if stereo_active {
            self.right_deemph.process_block(&mut right);
        }

        let metric = if input.is_empty() {
            0.0
        } else {
            block_power / input.len() as f32
        };
        let state = self.squelch.advance(metric);
        if state != SquelchState::Open {
            left.iter_mut().for_each(|s| *s = 0.0);
            right.iter_mut().for_each(|s| *s = 0.0);
        }

        WfmOutput {
            left,
            right,
            stereo_active,
            squelch_state: state,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> WfmParams {
        WfmParams {
            peak_deviation_hz: 75_000.0,
            deemphasis_tau_sec: 0.0,
            squelch: SquelchParams {
                open: 0.0,
                close: 0.0,
                tail_blocks: 0,
            },
            stereo_requested: true,
        }
    }

    #[test]
    fn mono_by_default_until_pilot_locks() {
        let mut wfm = Wfm::new(params());
        let input = vec![Complex32::new(1.0, 0.0); 32];
        let out = wfm.process(&input);
        assert!(!out.stereo_active);
        assert!(out.right.is_empty());
    }

    #[test]
    fn unrequested_stereo_stays_mono() {
        let mut p = params();
        p.stereo_requested = false;
        let mut wfm = Wfm::new(p);
        let input = vec![Complex32::new(1.0, 0.0); 32];
        let out = wfm.process(&input);
        assert!(!out.stereo_active);
    }

    #[test]
    fn output_length_matches_input_length() {
        let mut wfm = Wfm::new(params());
        let input = vec![Complex32::new(1.0, 0.0); 10];
        let out = wfm.process(&input);
        assert_eq!(out.left.len(), 10);
    }
}
