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

//! The output transport: carries a channel's audio frames and STATUS
//! packets out over UDP.
//!
//! This is explicitly out of scope for the `radiod` library itself
//! (packetization/multicast belongs to "the output transport", see §1
//! "Out of scope"); this module is the demonstration binary's minimal,
//! concrete implementation of the `ChannelSink`/`StatusSink` contracts,
//! grounded in the same `std::net::UdpSocket` bind/send idiom
//! `output::udp::UdpOutput` uses, simplified down to one fixed
//! destination per socket rather than a configurable MTU/header pipeline
//! (header framing and packetization are exactly the transport-layer
//! concerns the core does not own).

use std::net::{SocketAddr, UdpSocket};

use byteorder::{BigEndian, WriteBytesExt};

use radiod::channel::{AudioFrame, ChannelSink};
use radiod::status::StatusSink;

/// Sends audio frames to a fixed data destination and STATUS packets to
/// a fixed status destination, both over one UDP socket.
pub struct UdpSinks {
    socket: UdpSocket,
    data_dest: SocketAddr,
    status_dest: SocketAddr,
}

impl UdpSinks {
    /// Creates a sink pair from an already-bound socket.
    pub fn new(socket: UdpSocket, data_dest: SocketAddr, status_dest: SocketAddr) -> Self {
        UdpSinks {
            socket,
            data_dest,
            status_dest,
        }
    }

    fn send_to(&self, dest: SocketAddr, bytes: &[u8]) {
        if let Err(err) = self.socket.send_to(bytes, dest) {
            log::warn!("output transport: send to {} failed: {}", dest, err);
        }
    }
}

/// Encodes an audio frame as ssrc, sequence, sample rate, channel count,
/// then interleaved big-endian f32 samples. Not a protocol this crate's
/// control plane interprets; just this binary's wire format for the
/// PCM it pushes downstream.
fn encode_audio_frame(ssrc: u32, frame: &AudioFrame) -> Vec<u8> {
    let mut buf = Vec::with_capacity(14 + frame.samples.len() * 4);
    buf.write_u32::<BigEndian>(ssrc).expect("write to Vec never fails");
    buf.write_u32::<BigEndian>(frame.sequence).expect("write to Vec never fails");
    buf.write_u32::<BigEndian>(frame.sample_rate).expect("write to Vec never fails");
    buf.write_u8(frame.channels).expect("write to Vec never fails");
    for sample in &frame.samples {
        buf.write_f32::<BigEndian>(*sample).expect("write to Vec never fails");
    }
    buf
}

impl ChannelSink for UdpSinks {
    fn send_audio(&self, ssrc: u32, frame: AudioFrame) {
        let bytes = encode_audio_frame(ssrc, &frame);
        self.send_to(self.data_dest, &bytes);
    }

    fn send_spectrum(&self, ssrc: u32, bins: &[f32]) {
        let mut buf = Vec::with_capacity(8 + bins.len() * 4);
        buf.write_u32::<BigEndian>(ssrc).expect("write to Vec never fails");
        buf.write_u32::<BigEndian>(bins.len() as u32).expect("write to Vec never fails");
        for bin in bins {
            buf.write_f32::<BigEndian>(*bin).expect("write to Vec never fails");
        }
        self.send_to(self.data_dest, &buf);
    }
}

impl StatusSink for UdpSinks {
    fn send_status(&self, _ssrc: u32, bytes: &[u8]) {
        self.send_to(self.status_dest, bytes);
    }
}
