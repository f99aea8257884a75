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

//! The input ring: the hand-off between the frontend producer thread and
//! the master FFT consumer thread.
//!
//! The C original models this as a raw circular buffer with a shared write
//! pointer and a per-reader read pointer. Here the same contract (producer
//! writes fixed-size blocks, consumer waits for a full block, overruns are
//! counted rather than fatal) is built on a bounded `crossbeam_channel`,
//! the idiom used for every inter-stage hand-off in this crate.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crossbeam_channel::{Receiver, Sender, TrySendError};

/// One block of samples as produced by the frontend: either real or
/// complex, depending on the frontend's `InputKind`.
#[derive(Debug, Clone)]
pub enum SampleBlock {
    /// A block of real-valued samples.
    Real(Vec<f32>),
    /// A block of complex-valued samples.
    Complex(Vec<num_complex::Complex32>),
}

impl SampleBlock {
    /// Number of samples in this block.
    pub fn len(&self) -> usize {
        match self {
            SampleBlock::Real(v) => v.len(),
            SampleBlock::Complex(v) => v.len(),
        }
    }

    /// True if this block has no samples.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Shared overrun/underrun counters for one ring.
#[derive(Debug, Default)]
pub struct RingCounters {
    /// Number of blocks dropped because the consumer fell behind.
    pub overruns: AtomicU64,
    /// Total blocks produced.
    pub produced: AtomicU64,
}

/// The producing half of the input ring, held by the frontend driver.
pub struct RingWriter {
    tx: Sender<SampleBlock>,
    counters: Arc<RingCounters>,
}

impl RingWriter {
    /// Pushes a block of samples into the ring.
    ///
    /// If the consumer has fallen behind and the ring is full, the block
    /// is dropped and the overrun counter is incremented. This never
    /// blocks: a real-time frontend producer must not be made to wait on
    /// a slow consumer.
    pub fn push(&self, block: SampleBlock) {
        self.counters.produced.fetch_add(1, Ordering::Relaxed);
        match self.tx.try_send(block) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                self.counters.overruns.fetch_add(1, Ordering::Relaxed);
                warn!("input ring overrun: consumer is falling behind");
            }
            Err(TrySendError::Disconnected(_)) => {
                // Consumer has shut down; nothing more to do.
            }
        }
    }
}

/// The consuming half of the input ring, held by the master FFT stage.
pub struct RingReader {
    rx: Receiver<SampleBlock>,
    counters: Arc<RingCounters>,
}

impl RingReader {
    /// Blocks until the next sample block is available, or returns `None`
    /// if the writer has been dropped (frontend shut down).
    pub fn recv(&self) -> Option<SampleBlock> {
        self.rx.recv().ok()
    }

    /// Returns a handle to the shared ring counters, for status reporting.
    pub fn counters(&self) -> Arc<RingCounters> {
        Arc::clone(&self.counters)
    }
}

/// Creates a new input ring with room for `capacity` blocks of history
/// before the producer starts overwriting (dropping) unread blocks.
pub fn channel(capacity: usize) -> (RingWriter, RingReader) {
    let (tx, rx) = crossbeam_channel::bounded(capacity.max(1));
    let counters = Arc::new(RingCounters::default());
    (
        RingWriter {
            tx,
            counters: Arc::clone(&counters),
        },
        RingReader { rx, counters },
    )
}
