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

//! The status emitter (§4.8): building a STATUS TLV packet from a
//! channel's current state, and the sink interface that carries it out
//! to the control/status socket.
//!
//! Per §4.8, a STATUS packet carries a frontend snapshot, tuning, filter
//! state, demod-specific fields, spectrum bin data (when applicable),
//! and aggregate counters. This module is the single place that knows
//! how to read all of those off [`Channel`] and [`DemodState`] and
//! assemble them into the wire format defined in [`crate::control::tlv`].

use std::sync::atomic::Ordering;

use crate::channel::{Channel, ChannelConfig};
use crate::control::tlv::{encode_packet, encode_value, PacketKind, RawRecord, Tag, Value};
use crate::demod::squelch::SquelchState;
use crate::demod::DemodState;
use crate::frontend::Frontend;

/// The contract an output transport must satisfy to carry a channel's
/// STATUS packets out to the control/status socket (§6 "Control protocol
/// on the wire": "Status is sent on the control/status socket, not the
/// data socket").
pub trait StatusSink: Send + Sync {
    /// Delivers one encoded STATUS packet for `ssrc`.
    fn send_status(&self, ssrc: u32, bytes: &[u8]);
}

/// A sink that discards every status packet; used in tests and before a
/// real control socket is wired up.
#[derive(Debug, Default)]
pub struct NullStatusSink;

impl StatusSink for NullStatusSink {
    fn send_status(&self, _ssrc: u32, _bytes: &[u8]) {}
}

/// Builds one STATUS packet for `channel`, reflecting state as of the
/// block just processed (§5 "Ordering"): frontend snapshot, tuning,
/// filter/counter state, and whatever fields the active demod variant
/// exposes.
pub fn encode_status(
    channel: &Channel,
    config: &ChannelConfig,
    frontend: &dyn Frontend,
    demod: &DemodState,
) -> Vec<u8> {
    let mut records = Vec::new();
    let push = |records: &mut Vec<RawRecord>, tag: Tag, value: Value| {
        records.push(encode_value(tag, &value));
    };

    push(&mut records, Tag::OutputSsrc, Value::Int32(channel.ssrc as i32));
    push(&mut records, Tag::RadioFrequency, Value::Float64(config.freq_hz));
    push(&mut records, Tag::ShiftFrequency, Value::Float64(config.shift_hz));
    push(
        &mut records,
        Tag::FirstLoFrequency,
        Value::Float64(frontend.current_lo_hz()),
    );
    push(&mut records, Tag::DopplerFrequency, Value::Float64(config.doppler_hz));
    push(
        &mut records,
        Tag::DopplerFrequencyRate,
        Value::Float64(config.doppler_rate_hz_per_sec),
    );
    push(&mut records, Tag::LowEdge, Value::Float64(config.min_if_hz));
    push(&mut records, Tag::HighEdge, Value::Float64(config.max_if_hz));
    push(&mut records, Tag::KaiserBeta, Value::Float64(config.kaiser_beta));
    push(
        &mut records,
        Tag::DemodType,
        Value::Byte(config.demod.discriminant()),
    );
    push(
        &mut records,
        Tag::OutputSamprate,
        Value::Int32(config.output_samprate as i32),
    );
    push(
        &mut records,
        Tag::OutputChannels,
        Value::Byte(config.audio_channels),
    );
    push(&mut records, Tag::Gain, Value::Float32(config.gain));
    push(
        &mut records,
        Tag::BlockSequence,
        Value::Int64(channel.block_sequence.load(Ordering::Relaxed) as i64),
    );

    if let Some(name) = &config.preset_name {
        push(&mut records, Tag::Preset, Value::Str(name.clone()));
    }

    push(
        &mut records,
        Tag::ErrorCount,
        Value::Int32(channel.counters.errors.load(Ordering::Relaxed) as i32),
    );

    encode_demod_fields(&mut records, demod);

    encode_packet(PacketKind::Status, &records)
}

/// Appends fields specific to the active demod variant: squelch/tone
/// state for NBFM, pilot lock for WFM, PLL/AGC for linear, and the bin
/// vector for spectrum channels — skipped while the spectrum buffer is
/// mid-reallocation, per §4.6 "the status emitter must skip spectrum
/// polling".
fn encode_demod_fields(records: &mut Vec<RawRecord>, demod: &DemodState) {
    match demod {
        DemodState::Nbfm(nbfm) => {
            records.push(encode_value(
                Tag::SquelchState,
                &Value::Bool(nbfm.squelch_state() == SquelchState::Open),
            ));
            records.push(encode_value(Tag::ThreshExtend, &Value::Bool(nbfm.tone_enabled())));
        }
        DemodState::Wfm(wfm) => {
            records.push(encode_value(
                Tag::SquelchState,
                &Value::Bool(wfm.squelch_state() == SquelchState::Open),
            ));
            records.push(encode_value(
                Tag::IndependentSideband,
                &Value::Bool(wfm.pilot_locked()),
            ));
        }
        DemodState::Linear(linear) => {
            records.push(encode_value(Tag::Gain, &Value::Float32(linear.agc_gain())));
            records.push(encode_value(Tag::PllLocked, &Value::Bool(linear.pll_locked())));
        }
        DemodState::Spectrum(spectrum) => {
            records.push(encode_value(
                Tag::BinCount,
                &Value::Int32(spectrum.bin_count() as i32),
            ));
            // §4.6: never emit a length-mismatched vector. While a
            // bin-count change is reallocating, the bin data field is
            // simply omitted; `BinCount` above already reflects the new
            // target so a poller can tell a reconfigure is in flight.
            if !spectrum.reallocating() {
                records.push(encode_value(
                    Tag::BinData,
                    &Value::FloatVector(spectrum.bin_data().to_vec()),
                ));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::test_support::test_channel;
    use crate::control::tlv::decode_packet;
    use crate::demod::nbfm::{Nbfm, NbfmParams};
    use crate::demod::squelch::SquelchParams;
    use crate::demod::spectrum::{Spectrum, SpectrumParams};
    use crate::frontend::synthetic::SyntheticFrontend;

    fn nbfm_demod() -> DemodState {
        DemodState::Nbfm(Nbfm::new(NbfmParams {
            peak_deviation_hz: 5000.0,
            samprate: 8000.0,
            deemphasis_tau_sec: 0.0,
            squelch: SquelchParams {
                open: 0.0,
                close: 0.0,
                tail_blocks: 0,
            },
            tone_hz: 0.0,
            tone_threshold: 0.0,
        }))
    }

    #[test]
    fn status_packet_round_trips_and_carries_ssrc_and_sequence() {
        let channel = test_channel(42);
        channel.block_sequence.store(7, Ordering::Relaxed);
        let config = ChannelConfig::template(42).freq_hz(146_520_000.0);
        let frontend = SyntheticFrontend::new(48_000.0, 0.0, 0.0);
        let demod = nbfm_demod();

        let bytes = encode_status(&channel, &config, &frontend, &demod);
        let (kind, records) = decode_packet(&bytes).unwrap();
        assert_eq!(kind, PacketKind::Status);
        assert!(!records.is_empty());

        let ssrc_record = records
            .iter()
            .find(|r| r.tag == Tag::OutputSsrc as u8)
            .expect("ssrc tag present");
        let (_, value) = crate::control::tlv::decode_value(ssrc_record).unwrap();
        assert_eq!(value, Value::Int32(42));

        let seq_record = records
            .iter()
            .find(|r| r.tag == Tag::BlockSequence as u8)
            .expect("sequence tag present");
        let (_, value) = crate::control::tlv::decode_value(seq_record).unwrap();
        assert_eq!(value, Value::Int64(7));
    }

    #[test]
    fn spectrum_status_never_emits_length_mismatched_vector() {
        let channel = test_channel(5);
        let config = ChannelConfig::template(5)
            .freq_hz(1.0)
            .demod(crate::demod::DemodConfig::Spectrum(SpectrumParams {
                bin_count: 256,
                bin_bw: 100.0,
                average_alpha: 1.0,
            }));
        let frontend = SyntheticFrontend::new(48_000.0, 0.0, 0.0);
        let mut spectrum = Spectrum::new(SpectrumParams {
            bin_count: 128,
            bin_bw: 100.0,
            average_alpha: 1.0,
        });
        spectrum.set_params(SpectrumParams {
            bin_count: 256,
            bin_bw: 100.0,
            average_alpha: 1.0,
        });
        assert!(spectrum.reallocating());
        let demod = DemodState::Spectrum(spectrum);

        let bytes = encode_status(&channel, &config, &frontend, &demod);
        let (_, records) = decode_packet(&bytes).unwrap();
        // No bin-vector record while reallocating.
        assert!(!records.iter().any(|r| r.tag == Tag::BinData as u8));
        let bin_count_record = records.iter().find(|r| r.tag == Tag::BinCount as u8).unwrap();
        let (_, value) = crate::control::tlv::decode_value(bin_count_record).unwrap();
        assert_eq!(value, Value::Int32(256));
    }
}
