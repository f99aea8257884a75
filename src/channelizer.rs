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

//! The per-channel channelizer (L2): extracts a channel's passband from a
//! master FFT block, shapes it with a Kaiser window, and inverse-FFTs it
//! down to the channel's own sample rate.

use num_complex::Complex32;
use rustfft::{num_complex::Complex as RustfftComplex, FftPlanner};

use crate::bins::{self, InputKind};
use crate::kaiser;

/// Parameters that determine the channelizer's passband shape and output
/// rate; anything here changing forces a rebuild (see [`needs_restart`]).
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelizerParams {
    /// Channel's tuned center frequency, relative to the frontend's LO, in
    /// hertz.
    pub center_hz: f64,
    /// Lower edge of the passband, relative to `center_hz`, in hertz.
    pub min_if_hz: f64,
    /// Upper edge of the passband, relative to `center_hz`, in hertz.
    pub max_if_hz: f64,
    /// Output (baseband) sample rate, in samples per second.
    pub output_samprate: f64,
    /// Kaiser window shape parameter for the passband filter.
    pub kaiser_beta: f64,
}

/// The full set of parameters that, per §4.2's restart conditions, force a
/// channel worker to tear down and re-enter rather than just rebuild the
/// channelizer in place. `demod_type` and `audio_channels` are carried as
/// opaque tags so this module does not need to depend on the demod module.
#[derive(Debug, Clone, PartialEq)]
pub struct RestartParams {
    /// See [`ChannelizerParams::output_samprate`].
    pub output_samprate: u32,
    /// Discriminant of the active demod variant.
    pub demod_type: u8,
    /// See [`ChannelizerParams::min_if_hz`], rounded to the nearest hertz.
    pub min_if_hz: i64,
    /// See [`ChannelizerParams::max_if_hz`], rounded to the nearest hertz.
    pub max_if_hz: i64,
    /// See [`ChannelizerParams::kaiser_beta`], in millionths.
    pub kaiser_beta_micro: i64,
    /// Blocking factor of the optional second filter; `0` disables it.
    pub filter2_blocking: u32,
    /// Number of audio output channels (1 or 2).
    pub audio_channels: u8,
}

/// Returns true if `new` differs from `old` in any field that forces a
/// channel restart (channelizer rebuild *and* channel worker re-entry),
/// per §4.2 "Restart conditions" / §4.7 "Restart detection".
pub fn needs_restart(old: &RestartParams, new: &RestartParams) -> bool {
    old != new
}

/// A single channel's channelizer: extraction window, passband shape, and
/// inverse FFT plan, rebuilt whenever [`ChannelizerParams`] changes.
pub struct Channelizer {
    params: ChannelizerParams,
    frontend_sample_rate: f64,
    fft_size: usize,
    kind: InputKind,
    /// Passband-center bin, in native FFT bin numbering.
    bin_shift: i64,
    /// Number of bins extracted (also the inverse FFT length).
    window_len: usize,
    /// Precomputed Kaiser-shaped passband gains, in logical bin order.
    passband: Vec<f32>,
    inverse: std::sync::Arc<dyn rustfft::Fft<f32>>,
}

impl Channelizer {
    /// Builds a channelizer for the given parameters against a master FFT
    /// of size `fft_size` running at `frontend_sample_rate`.
    pub fn new(params: ChannelizerParams, frontend_sample_rate: f64, fft_size: usize, kind: InputKind) -> Self {
        let window_len = extraction_window_len(&params, frontend_sample_rate, fft_size);
        let bin_shift = bins::freq_to_bin(params.center_hz, fft_size, frontend_sample_rate);
        let bandwidth = params.max_if_hz - params.min_if_hz;
        let cutoff_norm = if params.output_samprate > 0.0 {
            (bandwidth / 2.0) / params.output_samprate
        } else {
            0.0
        };
        let passband = kaiser::passband_gains(window_len, cutoff_norm, params.kaiser_beta);
        let mut planner = FftPlanner::<f32>::new();
        let inverse = planner.plan_fft_inverse(window_len.max(1));
        Channelizer {
            params,
            frontend_sample_rate,
            fft_size,
            kind,
            bin_shift,
            window_len,
            passband,
            inverse,
        }
    }

    /// Current parameters, for comparison against a newly-requested set.
    pub fn params(&self) -> &ChannelizerParams {
        &self.params
    }

    /// Number of output samples produced per call to [`process`].
    pub fn output_block_len(&self) -> usize {
        self.window_len
    }

    /// Extracts this channel's passband from `master_bins` (as published
    /// by the master FFT, in native order), shapes it, and inverse-FFTs it
    /// to produce `output_block_len()` complex baseband samples.
    ///
    /// The residual sub-bin frequency offset (the fine mixer's job, see
    /// [`crate::mixer`]) is *not* removed here; `process` only implements
    /// the bin-granularity extraction and passband shaping.
    pub fn process(&self, master_bins: &[Complex32]) -> Vec<Complex32> {
        let mut logical = bins::extract_logical(
            master_bins,
            self.kind,
            self.fft_size,
            self.bin_shift,
            self.window_len,
        );
        for (sample, gain) in logical.iter_mut().zip(self.passband.iter()) {
            *sample *= *gain;
        }
        bins::logical_to_native(&mut logical);

        let mut buffer: Vec<RustfftComplex<f32>> =
            logical.iter().map(|c| RustfftComplex::new(c.re, c.im)).collect();
        self.inverse.process(&mut buffer);

        let scale = 1.0 / self.window_len.max(1) as f32;
        buffer
            .into_iter()
            .map(|c| Complex32::new(c.re * scale, c.im * scale))
            .collect()
    }

    /// The sub-bin residual frequency offset between the channel's true
    /// center and `bin_shift`'s quantized bin center, in hertz; the fine
    /// mixer removes this after [`process`].
    pub fn residual_offset_hz(&self) -> f64 {
        let bin_bw = self.frontend_sample_rate / self.fft_size as f64;
        self.params.center_hz - (self.bin_shift as f64) * bin_bw
    }
}

fn extraction_window_len(params: &ChannelizerParams, frontend_sample_rate: f64, fft_size: usize) -> usize {
    let w = (params.output_samprate * fft_size as f64 / frontend_sample_rate).round();
    (w.max(2.0) as usize) & !1 // round down to even so ifftshift is exact
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_params() -> ChannelizerParams {
        ChannelizerParams {
            center_hz: 0.0,
            min_if_hz: -4000.0,
            max_if_hz: 4000.0,
            output_samprate: 8000.0,
            kaiser_beta: 5.0,
        }
    }

    #[test]
    fn output_block_len_scales_with_rate_ratio() {
        let c = Channelizer::new(sample_params(), 48_000.0, 1024, InputKind::Complex);
        // 8000/48000 * 1024 ~= 170 (rounded down to even).
        assert!(c.output_block_len() > 0);
        assert_eq!(c.output_block_len() % 2, 0);
    }

    #[test]
    fn process_produces_requested_length() {
        let c = Channelizer::new(sample_params(), 48_000.0, 1024, InputKind::Complex);
        let master = vec![Complex32::new(1.0, 0.0); 1024];
        let out = c.process(&master);
        assert_eq!(out.len(), c.output_block_len());
    }

    #[test]
    fn dc_tone_survives_centered_passband() {
        let c = Channelizer::new(sample_params(), 48_000.0, 1024, InputKind::Complex);
        let mut master = vec![Complex32::new(0.0, 0.0); 1024];
        master[0] = Complex32::new(1024.0, 0.0); // a DC impulse in the frequency domain
        let out = c.process(&master);
        let total_energy: f32 = out.iter().map(|c| c.norm_sqr()).sum();
        assert!(total_energy > 0.0);
    }

    #[test]
    fn restart_params_detect_filter_only_change_as_restart() {
        // The channelizer itself treats any ChannelizerParams field change
        // as worth a rebuild; RestartParams additionally folds in
        // demod/audio-channel changes that force full worker re-entry.
        let a = RestartParams {
            output_samprate: 8000,
            demod_type: 0,
            min_if_hz: -4000,
            max_if_hz: 4000,
            kaiser_beta_micro: 5_000_000,
            filter2_blocking: 0,
            audio_channels: 1,
        };
        let mut b = a.clone();
        b.min_if_hz = -1500;
        assert!(needs_restart(&a, &b));
        assert!(!needs_restart(&a, &a.clone()));
    }
}
