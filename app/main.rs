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
//! Demonstration daemon binary wiring the radiod core together: a
//! synthetic frontend feeding the master FFT stage, one channel created
//! at startup, a control-socket reader dispatching TLV commands for any
//! more, and a UDP output transport.
//!
//! A real deployment swaps the synthetic frontend for a hardware driver,
//! parses its own config file/command line into a [`ControlPlaneConfig`],
//! and replaces the UDP sinks with whatever packetization/multicast
//! transport it uses; none of that is this crate's concern (§1 "Out of
//! scope").
//!

#![warn(
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
    missing_docs,
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
// Keep extern crates, like in 2015
#![allow(unused_extern_crates)]

#[macro_use]
extern crate log;
extern crate radiod;
extern crate signal_hook;
extern crate simplelog;

mod sinks;

use std::net::{SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use signal_hook::{flag::register, SIGHUP, SIGINT};
use simplelog::{Config as LogConfig, LevelFilter, SimpleLogger, TermLogger, TerminalMode};

use radiod::bins::InputKind;
use radiod::channel::{self, Channel, ChannelSink};
use radiod::config::ControlPlaneConfig;
use radiod::control::dispatch::{self, Outcome};
use radiod::control::preset::PresetTable;
use radiod::demod::nbfm::NbfmParams;
use radiod::demod::squelch::SquelchParams;
use radiod::demod::DemodConfig;
use radiod::frontend::synthetic::SyntheticFrontend;
use radiod::frontend::Frontend;
use radiod::master_fft::MasterFftStage;
use radiod::registry::Registry;
use radiod::ring;
use radiod::status::StatusSink;

use self::sinks::UdpSinks;

/// New samples consumed per master FFT block (§4.1).
const BLOCK_SIZE: usize = 4096;
/// Longest channel filter impulse response the overlap-save history must
/// carry (`N_fft = block + impulse_length - 1`).
const IMPULSE_LENGTH: usize = 129;
/// Frontend sample rate, hertz. A real deployment reads this back from
/// the frontend descriptor after `tune()`; the synthetic frontend used
/// here is simply constructed with the same value.
const FRONTEND_SAMPRATE: f64 = 2_048_000.0;
/// Center frequency of the channel created at startup, hertz.
const STARTUP_FREQ_HZ: f64 = 162_475_000.0;

fn main() {
    let log_status = TermLogger::init(LevelFilter::Info, LogConfig::default(), TerminalMode::Stderr)
        .or_else(|_| SimpleLogger::init(LevelFilter::Info, LogConfig::default()));
    if let Err(err) = log_status {
        eprintln!("failed to set up logger: {}", err);
    }

    // Notes about signals on Linux: SIGINT/SIGHUP set the stop flag but
    // do not interrupt any read calls already in progress, so every
    // blocking point here (the control socket's recv_from, the
    // frontend's sleep loop) polls the flag on its own schedule.
    let stop_flag = Arc::new(AtomicBool::new(false));
    register(SIGINT, Arc::clone(&stop_flag)).expect("failed to register SIGINT handler");
    register(SIGHUP, Arc::clone(&stop_flag)).expect("failed to register SIGHUP handler");

    // §6 "Environment": a real deployment is handed its sockets (and a
    // parsed `ControlPlaneConfig`) by the process that starts it. This
    // demonstration binds fixed loopback ports instead, since argv/config
    // parsing is out of scope for the core (§1).
    let control_addr: SocketAddr = "127.0.0.1:5006".parse().expect("valid control address");
    let data_dest: SocketAddr = "127.0.0.1:5004".parse().expect("valid data destination address");
    let status_dest: SocketAddr = "127.0.0.1:5007".parse().expect("valid status destination address");

    let control_socket = UdpSocket::bind(control_addr).expect("failed to bind control/status socket");
    control_socket
        .set_read_timeout(Some(Duration::from_millis(200)))
        .expect("failed to set control socket read timeout");
    let send_socket = control_socket
        .try_clone()
        .expect("failed to clone control socket for the output transport");

    let sinks = Arc::new(UdpSinks::new(send_socket, data_dest, status_dest));
    let channel_sink: Arc<dyn ChannelSink> = sinks.clone();
    let status_sink: Arc<dyn StatusSink> = sinks.clone();

    let registry = Arc::new(Registry::new());
    let presets = Arc::new(PresetTable::with_common_defaults());
    let control_config = ControlPlaneConfig::default();

    // §1 "Out of scope": hardware frontend drivers are an external
    // collaborator. The synthetic frontend stands in for one here.
    let synthetic = Arc::new(SyntheticFrontend::new(
        FRONTEND_SAMPRATE,
        STARTUP_FREQ_HZ % FRONTEND_SAMPRATE,
        0.02,
    ));
    synthetic.tune(STARTUP_FREQ_HZ);
    let frontend: Arc<dyn Frontend> = synthetic.clone();

    let (ring_writer, ring_reader) = ring::channel(4);
    let frontend_thread = Arc::clone(&synthetic).run(ring_writer, BLOCK_SIZE, Arc::clone(&stop_flag));

    let (master_stage, master_handle) =
        MasterFftStage::new(BLOCK_SIZE, IMPULSE_LENGTH, InputKind::Complex, FRONTEND_SAMPRATE);
    let fft_size = master_stage.fft_size();
    let master_thread = thread::Builder::new()
        .name("master-fft".into())
        .spawn(move || master_stage.run(ring_reader))
        .expect("failed to spawn master FFT thread");

    let mut worker_handles = Vec::new();

    // §3 "Lifecycle": (a) channels created from config at startup. A
    // real deployment loads these from its config file; this
    // demonstration hardcodes one narrowband FM channel so the pipeline
    // has something to do before any CMD datagram arrives.
    let startup_config = control_config
        .template(1)
        .freq_hz(STARTUP_FREQ_HZ)
        .filter_edges(-8_000.0, 8_000.0)
        .output_samprate(8_000)
        .demod(DemodConfig::Nbfm(NbfmParams {
            peak_deviation_hz: 5_000.0,
            samprate: 8_000.0,
            deemphasis_tau_sec: 0.0,
            squelch: SquelchParams {
                open: 0.0,
                close: 0.0,
                tail_blocks: 0,
            },
            tone_hz: 0.0,
            tone_threshold: 0.0,
        }));
    let startup_channel = Channel::new(startup_config);
    registry.insert(1, Arc::clone(&startup_channel));
    worker_handles.push(channel::spawn_worker(
        startup_channel,
        Arc::clone(&frontend),
        master_handle.clone(),
        fft_size,
        Arc::clone(&channel_sink),
        Arc::clone(&status_sink),
        Arc::clone(&registry),
        Arc::clone(&presets),
    ));

    info!(
        "radiod core running: control socket {}, {} master FFT bins",
        control_addr, fft_size
    );

    let mut buf = [0u8; 65_536];
    while !stop_flag.load(Ordering::Relaxed) {
        match control_socket.recv_from(&mut buf) {
            Ok((len, _peer)) => {
                let outcome =
                    dispatch::dispatch_command(&buf[..len], &registry, &presets, |ssrc| control_config.template(ssrc));
                if let Outcome::Created(created) = outcome {
                    worker_handles.push(channel::spawn_worker(
                        created,
                        Arc::clone(&frontend),
                        master_handle.clone(),
                        fft_size,
                        Arc::clone(&channel_sink),
                        Arc::clone(&status_sink),
                        Arc::clone(&registry),
                        Arc::clone(&presets),
                    ));
                }
            }
            Err(ref err)
                if err.kind() == std::io::ErrorKind::WouldBlock || err.kind() == std::io::ErrorKind::TimedOut => {}
            Err(err) => warn!("control socket recv error: {}", err),
        }
    }

    info!("shutdown requested, draining channels");
    // §5 "Cancellation/shutdown": the stop flag drains the frontend
    // producer, whose exit drops the ring writer, which the master FFT
    // stage observes as `RingReader::recv` returning `None` and answers
    // by publishing the poison sequence that wakes every channel worker.
    if let Err(err) = frontend_thread.join() {
        error!("frontend thread panicked: {:?}", err);
    }
    if let Err(err) = master_thread.join() {
        error!("master FFT thread panicked: {:?}", err);
    }
    for handle in worker_handles {
        if let Err(err) = handle.join() {
            error!("channel worker thread panicked: {:?}", err);
        }
    }
    info!("shutdown complete");
}
