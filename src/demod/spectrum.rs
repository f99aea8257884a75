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

//! The non-coherent spectrum analyzer demodulator (§4.6).
//!
//! Unlike the other demod types, SPECT channels skip the channelizer's
//! time-domain output entirely: they work directly on master FFT bins,
//! averaging power into a fixed-size output vector the channel owns.

use num_complex::Complex32;

use crate::bins::{self, InputKind};

/// Spectrum analyzer configuration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpectrumParams {
    /// Number of output power bins.
    pub bin_count: usize,
    /// Width of each output bin, in hertz.
    pub bin_bw: f64,
    /// Exponential averaging factor applied to successive blocks
    /// (`0.0` would freeze the average, `1.0` uses each block alone).
    pub average_alpha: f32,
}

/// Running spectrum analyzer state for one channel.
///
/// `bin_data` is reallocated only by [`set_params`](Spectrum::set_params);
/// a reader (the status emitter) must snapshot [`bin_data`](Spectrum::bin_data)
/// under the channel mutex and must skip polling while
/// [`reallocating`](Spectrum::reallocating) is true, per §4.6.
pub struct Spectrum {
    params: SpectrumParams,
    bin_data: Vec<f32>,
    reallocating: bool,
}

impl Spectrum {
    /// Creates a spectrum analyzer with all bins initialized to zero.
    pub fn new(params: SpectrumParams) -> Self {
        Spectrum {
            bin_data: vec![0.0; params.bin_count],
            params,
            reallocating: false,
        }
    }

    /// Requests a parameter change. If `bin_count` changes, the output
    /// buffer is not freed immediately; [`reallocating`] becomes true
    /// until the next [`process`] call performs the resize at a safe
    /// point, per §4.6.
    pub fn set_params(&mut self, params: SpectrumParams) {
        if params.bin_count != self.params.bin_count {
            self.reallocating = true;
        }
        self.params = params;
    }

    /// True while a bin-count change is pending reallocation; the status
    /// emitter must not read [`bin_data`] while this is set.
    pub fn reallocating(&self) -> bool {
        self.reallocating
    }

    /// Current power-bin snapshot, in logical (ascending-frequency)
    /// order with DC at the center for complex/partial-real coverage, or
    /// a straight `[0, samprate/2]` sweep for full real coverage.
    pub fn bin_data(&self) -> &[f32] {
        &self.bin_data
    }

    /// Configured bin count (the length `bin_data` should have once any
    /// pending reallocation completes).
    pub fn bin_count(&self) -> usize {
        self.params.bin_count
    }

    /// Accumulates one master FFT block's power into `bin_data`.
    ///
    /// `master_bins` is the raw frequency-domain block; `bin_shift` is
    /// the channel's passband-center bin (same convention as the
    /// channelizer); `frontend_sample_rate` and `fft_size` describe the
    /// master FFT.
    pub fn process(
        &mut self,
        master_bins: &[Complex32],
        kind: InputKind,
        fft_size: usize,
        frontend_sample_rate: f64,
        bin_shift: i64,
    ) {
        if self.reallocating {
            self.bin_data = vec![0.0; self.params.bin_count];
            self.reallocating = false;
        }
        if self.params.bin_count == 0 {
            return;
        }

        let native_bin_bw = frontend_sample_rate / fft_size as f64;
        let input_bins = ((self.params.bin_count as f64 * self.params.bin_bw) / native_bin_bw)
            .round()
            .max(1.0) as usize;

        let native_len = master_bins.len() as i64;
        let half_input = (input_bins / 2) as i64;
        let full_real_coverage = kind == InputKind::Real
            && (bin_shift.abs() - half_input) <= 0
            && (bin_shift.abs() + half_input) >= native_len - 1;

        let new_powers: Vec<f32> = if full_real_coverage {
            average_pool_linear(master_bins, self.params.bin_count)
        } else {
            let extracted = bins::extract_logical(master_bins, kind, fft_size, bin_shift, input_bins);
            average_pool_logical(&extracted, self.params.bin_count)
        };

        let alpha = self.params.average_alpha.clamp(0.0, 1.0);
        for (slot, &power) in self.bin_data.iter_mut().zip(new_powers.iter()) {
            *slot = *slot * (1.0 - alpha) + power * alpha;
        }
    }
}

/// Averages `input` (in logical, ascending-frequency order) down to
/// `out_len` contiguous-group power values, preserving the "DC at
/// center" convention for the complex / partial-real-coverage case.
fn average_pool_logical(input: &[Complex32], out_len: usize) -> Vec<f32> {
    if out_len == 0 {
        return Vec::new();
    }
    pool_powers(input, out_len)
}

/// Linearly maps the full `[0, N_bins)` native real-frontend span onto
/// `[0, out_len)`, averaging contiguous input bins per output bin with
/// no zero-padding, per §4.6's real-frontend DC-Nyquist branch.
fn average_pool_linear(input: &[Complex32], out_len: usize) -> Vec<f32> {
    if out_len == 0 {
        return Vec::new();
    }
    pool_powers(input, out_len)
}

fn pool_powers(input: &[Complex32], out_len: usize) -> Vec<f32> {
    if input.is_empty() {
        return vec![0.0; out_len];
    }
    (0..out_len)
        .map(|k| {
            let start = (k * input.len()) / out_len;
            let end = (((k + 1) * input.len()) / out_len).max(start + 1).min(input.len());
            let sum: f32 = input[start..end].iter().map(|c| c.norm_sqr()).sum();
            sum / (end - start) as f32
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use num_traits::Zero;

    fn params(bin_count: usize) -> SpectrumParams {
        SpectrumParams {
            bin_count,
            bin_bw: 100.0,
            average_alpha: 1.0,
        }
    }

    #[test]
    fn new_spectrum_starts_at_requested_bin_count() {
        let s = Spectrum::new(params(128));
        assert_eq!(s.bin_data().len(), 128);
        assert_eq!(s.bin_count(), 128);
    }

    #[test]
    fn set_params_marks_reallocating_until_next_process() {
        let mut s = Spectrum::new(params(128));
        s.set_params(params(256));
        assert!(s.reallocating());
        let master = vec![Complex32::new(1.0, 0.0); 1024];
        s.process(&master, InputKind::Complex, 1024, 48_000.0, 0);
        assert!(!s.reallocating());
        assert_eq!(s.bin_data().len(), 256);
    }

    #[test]
    fn complex_frontend_dc_tone_lands_near_center_bin() {
        let mut s = Spectrum::new(SpectrumParams {
            bin_count: 16,
            bin_bw: 48_000.0 / 1024.0,
            average_alpha: 1.0,
        });
        let mut master = vec![Complex32::zero(); 1024];
        master[0] = Complex32::new(1024.0, 0.0); // DC
        s.process(&master, InputKind::Complex, 1024, 48_000.0, 0);
        let data = s.bin_data();
        let center = data.len() / 2;
        let peak_idx = data
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.partial_cmp(b.1).unwrap())
            .map(|(i, _)| i)
            .unwrap();
        assert!((peak_idx as i64 - center as i64).abs() <= 1);
    }

    #[test]
    fn real_frontend_full_coverage_has_no_zero_bins() {
        let native_len = 513usize; // fft_size/2+1 for fft_size=1024
        let master: Vec<Complex32> = (0..native_len)
            .map(|i| Complex32::new((i + 1) as f32, 0.0))
            .collect();
        let mut s = Spectrum::new(SpectrumParams {
            bin_count: 32,
            bin_bw: 48_000.0 / 1024.0 * (native_len as f64 / 32.0),
            average_alpha: 1.0,
        });
        s.process(&master, InputKind::Real, 1024, 48_000.0, 0);
        assert!(s.bin_data().iter().all(|&p| p > 0.0));
    }
}
