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

//!
//! Real-time multi-channel demodulation core for a software-defined radio daemon.
//!
//! A single wideband complex (or real) sample stream is channelized into an
//! arbitrary number of independently tuned logical channels, each running one
//! of a small set of demodulators. Channels are created, reconfigured, and
//! torn down on the fly through a binary TLV control protocol.
//!

#![deny(
    bad_style,
    dead_code,
    improper_ctypes,
    non_shorthand_field_patterns,
    no_mangle_generic_items,
    overflowing_literals,
    path_statements,
    patterns_in_fns_without_body,
    unconditional_recursion,
    unused,
    unused_allocation,
    unused_comparisons,
    unused_parens,
    while_true,
    trivial_casts,
    trivial_numeric_casts,
    unused_extern_crates,
    unused_import_braces,
    unused_qualifications,
    future_incompatible,
    nonstandard_style,
    rust_2018_compatibility,
    rust_2018_idioms
)]
#![warn(clippy::all)]
#![warn(missing_docs)]

extern crate byteorder;
extern crate crossbeam_channel;
#[macro_use]
extern crate log;
extern crate libc;
extern crate num_complex;
extern crate num_traits;
extern crate rustfft;

pub mod bins;
pub mod channel;
pub mod channelizer;
pub mod config;
pub mod control;
pub mod demod;
pub mod estimators;
pub mod frontend;
pub mod kaiser;
pub mod master_fft;
pub mod mixer;
pub mod registry;
pub mod ring;
pub mod rt_priority;
pub mod status;

pub use crate::channel::{Channel, ChannelConfig};
pub use crate::config::ControlPlaneConfig;
pub use crate::control::preset::PresetTable;
pub use crate::registry::Registry;
