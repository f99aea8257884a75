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

//! Demodulator engines (§4.3–§4.6) and their shared building blocks.
//!
//! Each demod type is a variant of a tagged sum ([`DemodConfig`] /
//! [`DemodState`]) rather than a trait object: per §9's pattern
//! translation for "dynamic polymorphism over demod type", the channel
//! worker dispatches on the active variant with a plain `match`, and
//! state specific to one variant lives only in that variant's payload.

pub mod agc;
pub mod deemphasis;
pub mod linear;
pub mod nbfm;
pub mod pll;
pub mod spectrum;
pub mod squelch;
pub mod tone;
pub mod wfm;

use num_complex::Complex32;

use crate::bins::InputKind;
use crate::demod::linear::{Linear, LinearParams, LinearOutput};
use crate::demod::nbfm::{Nbfm, NbfmParams, NbfmOutput};
use crate::demod::spectrum::{Spectrum, SpectrumParams};
use crate::demod::squelch::SquelchState;
use crate::demod::wfm::{Wfm, WfmParams, WfmOutput};

/// Which demodulator a channel is running, and that variant's
/// parameters. Corresponds to the `demod_type` field of §3's Channel
/// entity.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DemodConfig {
    /// Narrowband FM (§4.3).
    Nbfm(NbfmParams),
    /// Wideband broadcast FM with stereo (§4.4).
    Wfm(WfmParams),
    /// Linear: envelope (AM) or coherent (SSB/CW) (§4.5).
    Linear(LinearParams),
    /// Non-coherent spectrum analyzer (§4.6).
    Spectrum(SpectrumParams),
}

impl DemodConfig {
    /// A small integer discriminant, used by [`crate::channelizer::RestartParams`]
    /// to detect a demod-type change without depending on this module.
    pub fn discriminant(&self) -> u8 {
        match self {
            DemodConfig::Nbfm(_) => 0,
            DemodConfig::Wfm(_) => 1,
            DemodConfig::Linear(_) => 2,
            DemodConfig::Spectrum(_) => 3,
        }
    }

    /// True for the spectrum analyzer, for which §3's invariant says
    /// output sample rate and audio channel count are ignored.
    pub fn is_spectrum(&self) -> bool {
        matches!(self, DemodConfig::Spectrum(_))
    }
}

/// Running demodulator state, one variant active at a time.
pub enum DemodState {
    /// See [`DemodConfig::Nbfm`].
    Nbfm(Nbfm),
    /// See [`DemodConfig::Wfm`].
    Wfm(Wfm),
    /// See [`DemodConfig::Linear`].
    Linear(Linear),
    /// See [`DemodConfig::Spectrum`].
    Spectrum(Spectrum),
}

impl DemodState {
    /// Builds fresh demodulator state from `config`, running at
    /// `block_rate_hz` blocks/sec (used by AGC/hangtime scaling).
    pub fn new(config: DemodConfig, block_rate_hz: f32) -> Self {
        match config {
            DemodConfig::Nbfm(params) => DemodState::Nbfm(Nbfm::new(params)),
            DemodConfig::Wfm(params) => DemodState::Wfm(Wfm::new(params)),
            DemodConfig::Linear(params) => DemodState::Linear(Linear::new(params, block_rate_hz)),
            DemodConfig::Spectrum(params) => DemodState::Spectrum(Spectrum::new(params)),
        }
    }

    /// Demodulates one block of complex baseband samples produced by the
    /// channelizer/mixer. Not valid to call on [`DemodState::Spectrum`],
    /// which instead reads master FFT bins directly via
    /// [`DemodState::process_spectrum`].
    pub fn process_audio(&mut self, input: &[Complex32]) -> AudioOutput {
        match self {
            DemodState::Nbfm(nbfm) => AudioOutput::from(nbfm.process(input)),
            DemodState::Wfm(wfm) => AudioOutput::from(wfm.process(input)),
            DemodState::Linear(linear) => AudioOutput::from(linear.process(input)),
            DemodState::Spectrum(_) => {
                debug_assert!(false, "process_audio called on a spectrum demod");
                AudioOutput {
                    left: Vec::new(),
                    right: Vec::new(),
                    stereo: false,
                    squelch_open: true,
                }
            }
        }
    }

    /// Accumulates one master FFT block into a [`DemodState::Spectrum`]'s
    /// bin data; a no-op (debug-asserting) on any other variant.
    pub fn process_spectrum(
        &mut self,
        master_bins: &[Complex32],
        kind: InputKind,
        fft_size: usize,
        frontend_sample_rate: f64,
        bin_shift: i64,
    ) {
        match self {
            DemodState::Spectrum(spectrum) => {
                spectrum.process(master_bins, kind, fft_size, frontend_sample_rate, bin_shift)
            }
            _ => debug_assert!(false, "process_spectrum called on a non-spectrum demod"),
        }
    }
}

/// A common audio-output shape for the three PCM-producing demod types,
/// so the channel worker does not need to match on variant twice.
pub struct AudioOutput {
    /// Left (or mono) channel PCM.
    pub left: Vec<f32>,
    /// Right channel PCM; empty unless `stereo` is true.
    pub right: Vec<f32>,
    /// True if `right` carries an independent second channel.
    pub stereo: bool,
    /// True if audio should be considered "live" (squelch open, or a
    /// demod type with no squelch concept).
    pub squelch_open: bool,
}

impl From<NbfmOutput> for AudioOutput {
    fn from(out: NbfmOutput) -> Self {
        AudioOutput {
            left: out.pcm,
            right: Vec::new(),
            stereo: false,
            squelch_open: out.squelch_state == SquelchState::Open,
        }
    }
}

impl From<WfmOutput> for AudioOutput {
    fn from(out: WfmOutput) -> Self {
        AudioOutput {
            stereo: out.stereo_active,
            left: out.left,
            right: out.right,
            squelch_open: out.squelch_state == SquelchState::Open,
        }
    }
}

impl From<LinearOutput> for AudioOutput {
    fn from(out: LinearOutput) -> Self {
        AudioOutput {
            left: out.pcm,
            right: Vec::new(),
            stereo: false,
            squelch_open: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::demod::agc::AgcParams;
    use crate::demod::pll::PllParams;
    use crate::demod::squelch::SquelchParams;

    fn nbfm_config() -> DemodConfig {
        DemodConfig::Nbfm(NbfmParams {
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
        })
    }

    #[test]
    fn discriminant_distinguishes_variants() {
        assert_eq!(nbfm_config().discriminant(), 0);
        assert!(!nbfm_config().is_spectrum());
        let spect = DemodConfig::Spectrum(SpectrumParams {
            bin_count: 64,
            bin_bw: 100.0,
            average_alpha: 1.0,
        });
        assert!(spect.is_spectrum());
        assert_ne!(spect.discriminant(), nbfm_config().discriminant());
    }

    #[test]
    fn state_dispatches_to_the_configured_variant() {
        let mut state = DemodState::new(nbfm_config(), 100.0);
        let input = vec![Complex32::new(1.0, 0.0); 8];
        let out = state.process_audio(&input);
        assert!(!out.stereo);
        assert_eq!(out.left.len(), 8);
    }

    #[test]
    fn linear_config_round_trips_through_state() {
        let config = DemodConfig::Linear(LinearParams {
            coherent: false,
            pll_enable: false,
            pll: PllParams {
                loop_bw: 10.0,
                samprate: 8000.0,
                square: false,
                lock_variance_threshold: 0.01,
            },
            agc: AgcParams {
                enabled: false,
                threshold: 0.5,
                recovery_rate_db_per_sec: 20.0,
                hangtime_sec: 0.1,
                headroom: 1.0,
            },
        });
        let mut state = DemodState::new(config, 100.0);
        let input = vec![Complex32::new(0.2, 0.0); 4];
        let out = state.process_audio(&input);
        assert!(out.squelch_open);
    }
}
