/*
 * Copyright 2020 The Regents of the University of California
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

//!
//! A synthetic frontend used by tests and the demonstration binary.
//!
//! Real hardware drivers are an external collaborator (see the frontend
//! interface); this produces a complex tone plus noise on a background
//! thread so the rest of the pipeline can be exercised without hardware.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use num_complex::Complex32;

use super::{Frontend, FrontendCounters, FrontendDescriptor, TuneResult};
use crate::bins::InputKind;
use crate::ring::{RingWriter, SampleBlock};

/// A synthetic frontend generating a complex sinusoid plus white noise.
pub struct SyntheticFrontend {
    descriptor: FrontendDescriptor,
    counters: FrontendCounters,
    lo_hz: AtomicU64, // bit-pattern of an f64, see current_lo_hz
    tone_hz: f64,
    noise_amplitude: f32,
}

impl SyntheticFrontend {
    /// Creates a synthetic frontend with the given sample rate and a tone
    /// at `tone_hz` relative to the tuned center.
    pub fn new(sample_rate: f64, tone_hz: f64, noise_amplitude: f32) -> Self {
        SyntheticFrontend {
            descriptor: FrontendDescriptor {
                sample_rate,
                kind: InputKind::Complex,
                bits_per_sample: 16,
                calibration_ppm: 0.0,
                min_if_hz: -sample_rate / 2.0,
                max_if_hz: sample_rate / 2.0,
            },
            counters: FrontendCounters::default(),
            lo_hz: AtomicU64::new(0f64.to_bits()),
            tone_hz,
            noise_amplitude,
        }
    }

    /// Spawns a background thread that produces `block_size`-sample
    /// blocks into `writer` every block period, until `stop` is set.
    pub fn run(
        self: Arc<Self>,
        writer: RingWriter,
        block_size: usize,
        stop: Arc<std::sync::atomic::AtomicBool>,
    ) -> thread::JoinHandle<()> {
        thread::Builder::new()
            .name("frontend-producer".into())
            .spawn(move || {
                let mut phase = 0f64;
                let phase_inc = 2.0 * std::f64::consts::PI * self.tone_hz / self.descriptor.sample_rate;
                let mut rng_state: u64 = 0x2545_F491_4F6C_DD1D;
                let period = Duration::from_secs_f64(block_size as f64 / self.descriptor.sample_rate);
                while !stop.load(Ordering::Relaxed) {
                    let mut block = Vec::with_capacity(block_size);
                    for _ in 0..block_size {
                        let noise_re = next_uniform(&mut rng_state) * self.noise_amplitude;
                        let noise_im = next_uniform(&mut rng_state) * self.noise_amplitude;
                        let sample = Complex32::new(
                            phase.cos() as f32 + noise_re,
                            phase.sin() as f32 + noise_im,
                        );
                        block.push(sample);
                        phase += phase_inc;
                        if phase > std::f64::consts::PI {
                            phase -= 2.0 * std::f64::consts::PI;
                        }
                    }
                    super::record_delivery(&self.counters, block_size as u64, 0);
                    writer.push(SampleBlock::Complex(block));
                    thread::sleep(period);
                }
            })
            .expect("failed to spawn synthetic frontend thread")
    }
}

/// Tiny xorshift generator so the synthetic frontend has no RNG crate
/// dependency; quality is irrelevant here, only determinism of shape.
fn next_uniform(state: &mut u64) -> f32 {
    *state ^= *state << 13;
    *state ^= *state >> 7;
    *state ^= *state << 17;
    ((*state >> 11) as f64 / (1u64 << 53) as f64 * 2.0 - 1.0) as f32
}

impl Frontend for SyntheticFrontend {
    fn descriptor(&self) -> &FrontendDescriptor {
        &self.descriptor
    }

    fn counters(&self) -> &FrontendCounters {
        &self.counters
    }

    fn tune(&self, freq_hz: f64) -> TuneResult {
        let actual = self.descriptor.calibrate(freq_hz);
        self.lo_hz.store(actual.to_bits(), Ordering::Relaxed);
        TuneResult { actual_hz: actual }
    }

    fn current_lo_hz(&self) -> f64 {
        f64::from_bits(self.lo_hz.load(Ordering::Relaxed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tune_applies_calibration() {
        let mut fe = SyntheticFrontend::new(48_000.0, 1000.0, 0.0);
        fe.descriptor.calibration_ppm = 10.0; // 10 ppm
        let result = fe.tune(1_000_000.0);
        assert!((result.actual_hz - 1_000_010.0).abs() < 1e-6);
        assert!((fe.current_lo_hz() - 1_000_010.0).abs() < 1e-6);
    }
}
