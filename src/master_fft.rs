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

//! The master FFT stage (L1): an overlap-save FFT shared by every channel.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use num_complex::Complex32;
use num_traits::Zero;
use rustfft::{FftPlanner, num_complex::Complex as RustfftComplex};

use crate::bins::InputKind;
use crate::ring::{RingReader, SampleBlock};

/// Sequence value used to wake every channel for a clean shutdown; never
/// produced by a real block.
pub const SHUTDOWN_SEQUENCE: u64 = u64::MAX;

/// One published frequency-domain block.
pub struct MasterBlock {
    /// Frequency-domain bins in native FFT order.
    pub bins: Vec<Complex32>,
    /// Monotonically increasing sequence number. `SHUTDOWN_SEQUENCE`
    /// indicates the stage has shut down.
    pub sequence: u64,
    /// Wall-clock start time of this block, in nanoseconds since the
    /// epoch.
    pub start_time_ns: u128,
    /// Real or complex input.
    pub kind: InputKind,
    /// The size of the FFT used to produce `bins` (not the same as
    /// `bins.len()` for real input, which keeps only the non-redundant
    /// half).
    pub fft_size: usize,
    /// The frontend sample rate this block was computed from.
    pub frontend_sample_rate: f64,
}

struct Published {
    block: Mutex<Option<Arc<MasterBlock>>>,
    condvar: Condvar,
    drops: AtomicU64,
}

/// A handle channels use to wait for and read master FFT blocks.
#[derive(Clone)]
pub struct MasterFftHandle {
    published: Arc<Published>,
}

impl MasterFftHandle {
    /// Blocks until a block newer than `last_seen` is published, or the
    /// stage shuts down.
    ///
    /// Returns `None` on shutdown. If the channel fell behind (the
    /// published sequence jumped by more than one since `last_seen`),
    /// `drops` tracks that for status reporting; resynchronization is
    /// implicit since the caller always receives the *latest* block.
    pub fn wait_next(&self, last_seen: u64) -> Option<Arc<MasterBlock>> {
        let mut guard = self.published.block.lock().expect("master FFT lock poisoned");
        loop {
            if let Some(block) = guard.as_ref() {
                if block.sequence == SHUTDOWN_SEQUENCE {
                    return None;
                }
                if block.sequence > last_seen {
                    if block.sequence > last_seen + 1 {
                        self.published.drops.fetch_add(
                            block.sequence - last_seen - 1,
                            Ordering::Relaxed,
                        );
                    }
                    return Some(Arc::clone(block));
                }
            }
            guard = self
                .published
                .condvar
                .wait(guard)
                .expect("master FFT condvar poisoned");
        }
    }

    /// Total number of blocks this handle's readers have fallen behind by,
    /// across all channels sharing this stage (a coarse aggregate; each
    /// channel should track its own drops from the sequence numbers it
    /// actually observes for precise per-channel accounting).
    pub fn drops(&self) -> u64 {
        self.published.drops.load(Ordering::Relaxed)
    }
}

/// Runs the master FFT stage: an overlap-save FFT over fixed-size blocks
/// read from the input ring.
pub struct MasterFftStage {
    block_size: usize,
    impulse_length: usize,
    fft_size: usize,
    kind: InputKind,
    frontend_sample_rate: f64,
    forward: Arc<dyn rustfft::Fft<f32>>,
    history: Vec<Complex32>,
    sequence: u64,
    published: Arc<Published>,
}

impl MasterFftStage {
    /// Creates a new master FFT stage.
    ///
    /// `block_size` is the number of new samples consumed per block;
    /// `impulse_length` is the longest channel filter's impulse response
    /// length, which determines the overlap-save history carried between
    /// blocks (`N_fft = block_size + impulse_length - 1`).
    pub fn new(
        block_size: usize,
        impulse_length: usize,
        kind: InputKind,
        frontend_sample_rate: f64,
    ) -> (Self, MasterFftHandle) {
        let fft_size = block_size + impulse_length - 1;
        let mut planner = FftPlanner::<f32>::new();
        let forward = planner.plan_fft_forward(fft_size);
        let published = Arc::new(Published {
            block: Mutex::new(None),
            condvar: Condvar::new(),
            drops: AtomicU64::new(0),
        });
        let stage = MasterFftStage {
            block_size,
            impulse_length,
            fft_size,
            kind,
            frontend_sample_rate,
            forward,
            history: vec![Complex32::zero(); impulse_length.saturating_sub(1)],
            sequence: 0,
            published: Arc::clone(&published),
        };
        (stage, MasterFftHandle { published })
    }

    /// Runs the stage until the ring reader is disconnected (frontend
    /// shut down), publishing one block per `block_size` input samples.
    pub fn run(mut self, reader: RingReader) {
        while let Some(sample_block) = reader.recv() {
            self.ingest(sample_block);
        }
        self.shutdown();
    }

    /// Processes one input block, publishing a new master block.
    fn ingest(&mut self, sample_block: SampleBlock) {
        let new_samples: Vec<Complex32> = match sample_block {
            SampleBlock::Real(v) => v.into_iter().map(|s| Complex32::new(s, 0.0)).collect(),
            SampleBlock::Complex(v) => v,
        };

        let mut time_domain = Vec::with_capacity(self.fft_size);
        time_domain.extend_from_slice(&self.history);
        time_domain.extend_from_slice(&new_samples);
        time_domain.resize(self.fft_size, Complex32::zero());

        // Save overlap history for next block.
        if self.impulse_length > 1 {
            let history_len = self.impulse_length - 1;
            let start = time_domain.len().saturating_sub(history_len);
            self.history = time_domain[start..].to_vec();
        }

        let mut buffer: Vec<RustfftComplex<f32>> = time_domain
            .iter()
            .map(|c| RustfftComplex::new(c.re, c.im))
            .collect();
        self.forward.process(&mut buffer);

        let bins: Vec<Complex32> = match self.kind {
            InputKind::Complex => buffer.iter().map(|c| Complex32::new(c.re, c.im)).collect(),
            InputKind::Real => buffer[..self.fft_size / 2 + 1]
                .iter()
                .map(|c| Complex32::new(c.re, c.im))
                .collect(),
        };

        self.sequence += 1;
        let block = Arc::new(MasterBlock {
            bins,
            sequence: self.sequence,
            start_time_ns: now_ns(),
            kind: self.kind,
            fft_size: self.fft_size,
            frontend_sample_rate: self.frontend_sample_rate,
        });
        self.publish(block);
    }

    fn publish(&self, block: Arc<MasterBlock>) {
        let mut guard = self.published.block.lock().expect("master FFT lock poisoned");
        *guard = Some(block);
        self.published.condvar.notify_all();
    }

    fn shutdown(&self) {
        let poison = Arc::new(MasterBlock {
            bins: Vec::new(),
            sequence: SHUTDOWN_SEQUENCE,
            start_time_ns: now_ns(),
            kind: self.kind,
            fft_size: self.fft_size,
            frontend_sample_rate: self.frontend_sample_rate,
        });
        self.publish(poison);
    }

    /// The overlap-save FFT size (`N_fft`).
    pub fn fft_size(&self) -> usize {
        self.fft_size
    }

    /// The configured block size (new samples consumed per block).
    pub fn block_size(&self) -> usize {
        self.block_size
    }
}

fn now_ns() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ring;

    #[test]
    fn sequence_is_monotonic_and_blocks_arrive() {
        let (writer, reader) = ring::channel(4);
        let (stage, handle) = MasterFftStage::new(16, 8, InputKind::Complex, 48_000.0);
        let worker = std::thread::spawn(move || stage.run(reader));

        for _ in 0..3 {
            writer.push(SampleBlock::Complex(vec![Complex32::zero(); 16]));
        }
        let b1 = handle.wait_next(0).unwrap();
        assert_eq!(b1.sequence, 1);
        let b2 = handle.wait_next(1).unwrap();
        assert_eq!(b2.sequence, 2);
        assert!(b2.sequence > b1.sequence);

        drop(writer);
        worker.join().unwrap();
        assert!(handle.wait_next(2).is_none());
    }

    #[test]
    fn real_input_keeps_half_spectrum_plus_one() {
        let (writer, reader) = ring::channel(4);
        let (stage, handle) = MasterFftStage::new(8, 1, InputKind::Real, 8_000.0);
        let worker = std::thread::spawn(move || stage.run(reader));
        writer.push(SampleBlock::Real(vec![0.0; 8]));
        let block = handle.wait_next(0).unwrap();
        assert_eq!(block.bins.len(), 8 / 2 + 1);
        drop(writer);
        worker.join().unwrap();
    }
}
