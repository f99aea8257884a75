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

//! The frontend interface consumed by the core (see external interfaces).
//!
//! Hardware drivers are an external collaborator; this module defines the
//! stable contract they must satisfy and a synthetic implementation used
//! by tests and the demonstration binary.

pub mod synthetic;

use std::sync::atomic::{AtomicU64, Ordering};

use crate::bins::InputKind;

/// Immutable-after-startup description of a frontend, shared with every
/// channel.
#[derive(Debug, Clone)]
pub struct FrontendDescriptor {
    /// Sample rate in samples per second.
    pub sample_rate: f64,
    /// Real or complex baseband.
    pub kind: InputKind,
    /// Bits of ADC resolution per sample component.
    pub bits_per_sample: u32,
    /// Calibration offset, in parts per million, applied multiplicatively
    /// to every tuned frequency.
    pub calibration_ppm: f64,
    /// Minimum IF (relative to the tuned center) the frontend can supply.
    pub min_if_hz: f64,
    /// Maximum IF (relative to the tuned center) the frontend can supply.
    pub max_if_hz: f64,
}

impl FrontendDescriptor {
    /// Applies the frontend's calibration to a requested frequency,
    /// returning the actual frequency the hardware will be tuned to.
    ///
    /// Calibration is applied multiplicatively here, and nowhere else
    /// downstream (see the open question on calibration convention).
    pub fn calibrate(&self, requested_hz: f64) -> f64 {
        requested_hz * (1.0 + self.calibration_ppm * 1e-6)
    }

    /// Returns true if `[min_if, max_if]` fits within what this frontend
    /// can supply, given its sample rate and real/complex nature.
    pub fn covers(&self, min_if_hz: f64, max_if_hz: f64) -> bool {
        let (lo, hi) = self.coverage_bounds();
        min_if_hz >= lo && max_if_hz <= hi
    }

    /// The `[lo, hi]` IF bounds this frontend can supply.
    pub fn coverage_bounds(&self) -> (f64, f64) {
        match self.kind {
            InputKind::Complex => (-self.sample_rate / 2.0, self.sample_rate / 2.0),
            InputKind::Real => (0.0, self.sample_rate / 2.0),
        }
    }
}

/// Counters updated by the frontend and reported in STATUS packets.
#[derive(Debug, Default)]
pub struct FrontendCounters {
    /// Number of ADC overrange events observed.
    pub overranges: AtomicU64,
    /// Number of samples delivered.
    pub samples: AtomicU64,
}

/// Result of a tune request.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TuneResult {
    /// The frequency the hardware actually settled on, after calibration.
    pub actual_hz: f64,
}

/// The contract a frontend hardware driver (or a synthetic test double)
/// must satisfy. Frontend drivers themselves are out of scope for this
/// crate; only the interface is specified here.
pub trait Frontend: Send + Sync {
    /// Returns the frontend's immutable descriptor.
    fn descriptor(&self) -> &FrontendDescriptor;

    /// Returns the shared counters for this frontend.
    fn counters(&self) -> &FrontendCounters;

    /// Requests the frontend retune its local oscillator to `freq_hz`.
    ///
    /// Returns the actual frequency after calibration. Frontends whose LO
    /// is fixed (e.g. a fixed-IF down-converter) may ignore the request
    /// and always report the same frequency.
    fn tune(&self, freq_hz: f64) -> TuneResult;

    /// Requests a gain change, in decibels. Optional: frontends without
    /// adjustable gain return `Ok(())` without effect.
    fn set_gain(&self, _db: f64) -> std::io::Result<()> {
        Ok(())
    }

    /// Requests an attenuation change, in decibels.
    fn set_atten(&self, _db: f64) -> std::io::Result<()> {
        Ok(())
    }

    /// Normalizes a raw ADC power reading to a fraction of full scale.
    ///
    /// This is frontend-specific (see the open question on
    /// `scale_ADpower2FS`); the default implementation is an identity
    /// function, suitable for frontends that already report normalized
    /// power.
    fn adc_power_to_fullscale(&self, power: f32) -> f32 {
        power
    }

    /// The current frontend local-oscillator frequency, in hertz.
    fn current_lo_hz(&self) -> f64;
}

/// Increments `counters.overranges` the given number of times and records
/// `sample_count` delivered samples. Shared helper for frontend
/// implementations.
pub fn record_delivery(counters: &FrontendCounters, sample_count: u64, overranges: u64) {
    counters.samples.fetch_add(sample_count, Ordering::Relaxed);
    if overranges > 0 {
        counters
            .overranges
            .fetch_add(overranges, Ordering::Relaxed);
    }
}
