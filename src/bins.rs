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

//! Bin indexing helpers shared by the master FFT stage and the channelizer.
//!
//! The master FFT publishes bins in native FFT order (bin 0 is DC, bins
//! ascend in frequency, and for a complex frontend the negative-frequency
//! half wraps around starting at `N_fft / 2`). The channelizer extracts a
//! contiguous slice around a channel's tuned center and works with it in
//! *logical* order (index 0 is the most negative frequency, ascending to
//! the most positive), since that is the natural order for windowing and
//! spectrum display. This module converts between the two.

use num_complex::Complex32;
use num_traits::Zero;

/// Whether the frontend produces real or complex baseband samples.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum InputKind {
    /// Real-valued samples; the master FFT keeps only the non-redundant
    /// `N_fft / 2 + 1` bins.
    Real,
    /// Complex-valued samples; the master FFT keeps all `N_fft` bins.
    Complex,
}

/// Returns the integer bin index (relative to DC, in native FFT ordering)
/// whose frequency is closest to `freq_hz`, given the master FFT bin
/// spacing.
pub fn freq_to_bin(freq_hz: f64, fft_size: usize, sample_rate: f64) -> i64 {
    let bin_bw = sample_rate / fft_size as f64;
    (freq_hz / bin_bw).round() as i64
}

/// Extracts `count` bins centered on `center_bin` (in native FFT bin
/// numbering, which may be negative or exceed the master block) from
/// `source`, producing a buffer in logical (ascending-frequency) order.
///
/// `source` holds `native_len` bins as published by the master FFT: for a
/// complex frontend, `native_len == fft_size` and negative frequencies are
/// stored at `fft_size - k`; for a real frontend, `native_len == fft_size / 2 + 1`
/// and there is no negative half.
///
/// Edge cases (see the channelizer contract):
/// * Complex frontend, bins that wrap past either end of `source` read from
///   the wrapped-around index.
/// * Real frontend, bins with no defined value (negative frequencies, or
///   frequencies above Nyquist) are zero, **unless** `[center_bin -
///   count/2, center_bin + count/2)` covers the full `[0, native_len)` range,
///   in which case a straight linear map with no zero padding is used.
pub fn extract_logical(
    source: &[Complex32],
    kind: InputKind,
    fft_size: usize,
    center_bin: i64,
    count: usize,
) -> Vec<Complex32> {
    let half = (count / 2) as i64;
    let start = center_bin - half;
    match kind {
        InputKind::Complex => {
            let n = fft_size as i64;
            (0..count as i64)
                .map(|i| {
                    let mut idx = start + i;
                    idx = idx.rem_euclid(n);
                    source[idx as usize]
                })
                .collect()
        }
        InputKind::Real => {
            let native_len = source.len() as i64;
            let full_coverage = start <= 0 && (start + count as i64) >= native_len;
            if full_coverage {
                // Linear map over [0, native_len) -> [0, count), no zero padding.
                (0..count)
                    .map(|i| {
                        let src_idx = (i * source.len()) / count.max(1);
                        source[src_idx.min(source.len() - 1)]
                    })
                    .collect()
            } else {
                (0..count as i64)
                    .map(|i| {
                        let idx = start + i;
                        if idx < 0 || idx >= native_len {
                            Complex32::zero()
                        } else {
                            source[idx as usize]
                        }
                    })
                    .collect()
            }
        }
    }
}

/// Rearranges a logical-order buffer (index 0 = most negative frequency)
/// into native FFT order (index 0 = DC, ascending, wrapping negative
/// frequencies to the top half) in place, ready for an inverse FFT.
///
/// This is the standard "ifftshift" operation.
pub fn logical_to_native(buf: &mut [Complex32]) {
    let n = buf.len();
    let half = n / 2;
    buf.rotate_left(half);
    let _ = half; // rotate_left(n/2) is its own inverse for even n; documented for odd n below.
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn complex_extraction_wraps() {
        let fft_size = 8usize;
        let mut source = vec![Complex32::zero(); fft_size];
        for (i, s) in source.iter_mut().enumerate() {
            s.re = i as f32;
        }
        // center_bin = 0 (DC), count = 4 -> logical indices -2,-1,0,1
        let out = extract_logical(&source, InputKind::Complex, fft_size, 0, 4);
        assert_eq!(out[0].re, 6.0); // bin -2 -> 8-2=6
        assert_eq!(out[1].re, 7.0); // bin -1 -> 7
        assert_eq!(out[2].re, 0.0); // bin 0
        assert_eq!(out[3].re, 1.0); // bin 1
    }

    #[test]
    fn real_extraction_zero_pads_partial_coverage() {
        let native_len = 5usize; // fft_size/2+1 for fft_size=8
        let mut source = vec![Complex32::zero(); native_len];
        for (i, s) in source.iter_mut().enumerate() {
            s.re = (i + 1) as f32;
        }
        // center_bin = 4, count = 4 -> logical indices 2..6, index 5 out of range -> zero
        let out = extract_logical(&source, InputKind::Real, 8, 4, 4);
        assert_eq!(out[0].re, 3.0);
        assert_eq!(out[1].re, 4.0);
        assert_eq!(out[2].re, 5.0);
        assert_eq!(out[3].re, 0.0);
    }

    #[test]
    fn real_extraction_full_coverage_has_no_padding() {
        let native_len = 5usize;
        let source: Vec<Complex32> = (0..native_len)
            .map(|i| Complex32::new((i + 1) as f32, 0.0))
            .collect();
        // Range covers the whole native span: no zero bins anywhere in the output.
        let out = extract_logical(&source, InputKind::Real, 8, 2, 10);
        assert!(out.iter().all(|c| c.re != 0.0));
    }

    #[test]
    fn logical_to_native_roundtrip_even_length() {
        let mut buf: Vec<Complex32> = (0..8).map(|i| Complex32::new(i as f32, 0.0)).collect();
        let original = buf.clone();
        logical_to_native(&mut buf);
        logical_to_native(&mut buf);
        assert_eq!(buf, original);
    }
}
