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

//! Routing an incoming CMD datagram to a channel, and applying its tags
//! to a [`ChannelConfig`] (§4.7).
//!
//! This module is split across two jobs that run at different points in
//! the pipeline:
//!
//! - [`dispatch_command`] runs once, in the thread that reads the
//!   control socket: it resolves the packet's ssrc (dropping the
//!   reserved template ssrc, staggering the broadcast ssrc, looking up
//!   or creating a real channel) and hands the command bytes off to the
//!   target channel's single-slot queue.
//! - [`apply_command_bytes`] runs on the target channel's own worker
//!   thread, once per dequeued command, folding its tags into that
//!   channel's [`ChannelConfig`].
//!
//! Keeping tag *application* off the control-reader thread means a slow
//! or malformed command can never stall dispatch to other channels
//! (§5 "Ordering").

use std::fmt;
use std::sync::Arc;

use crate::channel::{Channel, ChannelConfig};
use crate::control::preset::PresetTable;
use crate::control::tlv::{self, Tag, TlvError, Value};
use crate::demod::agc::AgcParams;
use crate::demod::linear::LinearParams;
use crate::demod::nbfm::NbfmParams;
use crate::demod::pll::PllParams;
use crate::demod::squelch::SquelchParams;
use crate::demod::wfm::WfmParams;
use crate::demod::DemodConfig;
use crate::estimators;
use crate::registry::{self, Registry};

/// Tags whose effect is deferred until after every other tag (including
/// a `PRESET`'s own bundle) has been applied, so an explicit value in
/// the command packet always wins over whatever a preset set (§4.7
/// "Command application order").
fn is_deferred(tag: Tag) -> bool {
    matches!(
        tag,
        Tag::LowEdge | Tag::HighEdge | Tag::NoncoherentBinBw | Tag::BinCount
    )
}

/// Errors applying a decoded command to a channel's configuration.
#[derive(Debug, Clone, PartialEq)]
pub enum DispatchError {
    /// The packet itself failed to parse as TLV.
    Tlv(TlvError),
    /// A `PRESET` tag named a preset not present in the table.
    UnknownPreset(String),
}

impl fmt::Display for DispatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DispatchError::Tlv(err) => write!(f, "{}", err),
            DispatchError::UnknownPreset(name) => write!(f, "unknown preset \"{}\"", name),
        }
    }
}

impl std::error::Error for DispatchError {}

impl From<TlvError> for DispatchError {
    fn from(err: TlvError) -> Self {
        DispatchError::Tlv(err)
    }
}

/// Applies a command's tags (raw TLV record bytes, no leading packet
/// kind byte) to `current`, returning the updated configuration.
///
/// Tags are applied in packet order, except `LOW_EDGE`, `HIGH_EDGE`,
/// `NONCOHERENT_BIN_BW` and `BIN_COUNT`, which are deferred past a
/// `PRESET` tag so an explicit override in the same packet is never
/// clobbered by the preset it follows or precedes (§4.7). A tag with no
/// entry in [`Tag`], or a value whose length doesn't match its kind, is
/// skipped rather than failing the whole command (§7 "Malformed
/// command").
pub fn apply_command_bytes(
    current: &ChannelConfig,
    bytes: &[u8],
    presets: &PresetTable,
) -> Result<ChannelConfig, DispatchError> {
    let records = tlv::decode_records(bytes)?;
    let mut config = current.clone();
    let mut deferred = Vec::new();

    for raw in &records {
        let (tag, value) = match tlv::decode_value(raw) {
            Ok(tag_value) => tag_value,
            Err(_) => continue,
        };
        if is_deferred(tag) {
            deferred.push((tag, value));
            continue;
        }
        if tag == Tag::Preset {
            if let Value::Str(name) = &value {
                apply_preset(&mut config, name, presets)?;
            }
            continue;
        }
        apply_single_tag(&mut config, tag, &value);
    }

    for (tag, value) in deferred {
        apply_single_tag(&mut config, tag, &value);
    }

    Ok(config)
}

/// Applies every tag of a named preset's bundle to `config`, in the
/// bundle's own order.
fn apply_preset(config: &mut ChannelConfig, name: &str, presets: &PresetTable) -> Result<(), DispatchError> {
    let bundle = presets
        .get(name)
        .ok_or_else(|| DispatchError::UnknownPreset(name.to_string()))?;
    for (tag, value) in bundle {
        apply_single_tag(config, *tag, value);
    }
    config.preset_name = Some(name.to_string());
    Ok(())
}

/// Applies one decoded tag/value pair to `config`. Tags that name a
/// field belonging to a demod variant other than the one currently
/// active are silently ignored, per §4.7's "tags that do not apply to
/// the active demod type are ignored". A handful of tags are either
/// routing-only (`OUTPUT_SSRC`), reply-only (`COMMAND_TAG`), STATUS-only
/// (`FIRST_LO_FREQUENCY`, `BLOCK_SEQUENCE`), or outside this crate's
/// scope (`SETOPTS`/`CLEAROPTS`'s generic bitmask, `RF_ATTEN`/`RF_GAIN`
/// which belong to the frontend rather than a channel,
/// `OUTPUT_DATA_DEST_SOCKET` which belongs to the output transport,
/// §1); all of those are no-ops here.
fn apply_single_tag(config: &mut ChannelConfig, tag: Tag, value: &Value) {
    match tag {
        Tag::CommandTag
        | Tag::OutputSsrc
        | Tag::FirstLoFrequency
        | Tag::BlockSequence
        | Tag::Setopts
        | Tag::Clearopts
        | Tag::RfAtten
        | Tag::RfGain
        | Tag::OutputDataDestSocket => {}

        Tag::RadioFrequency => {
            if let Value::Float64(v) = value {
                config.freq_hz = *v;
            }
        }
        Tag::ShiftFrequency => {
            if let Value::Float64(v) = value {
                config.shift_hz = *v;
            }
        }
        Tag::DopplerFrequency => {
            if let Value::Float64(v) = value {
                config.doppler_hz = *v;
            }
        }
        Tag::DopplerFrequencyRate => {
            if let Value::Float64(v) = value {
                config.doppler_rate_hz_per_sec = *v;
            }
        }
        Tag::LowEdge => {
            if let Value::Float64(v) = value {
                config.min_if_hz = *v;
            }
        }
        Tag::HighEdge => {
            if let Value::Float64(v) = value {
                config.max_if_hz = *v;
            }
        }
        Tag::KaiserBeta => {
            if let Value::Float64(v) = value {
                config.kaiser_beta = *v;
            }
        }
        Tag::Filter2 => {
            if let Value::Int32(v) = value {
                config.second_filter.blocking = (*v).max(0) as usize;
            }
        }
        Tag::Filter2KaiserBeta => {
            if let Value::Float64(v) = value {
                config.second_filter.kaiser_beta = *v;
            }
        }
        Tag::Preset => {} // handled by apply_command_bytes, which has the preset table

        Tag::DemodType => {
            if let Value::Byte(b) = value {
                if *b != config.demod.discriminant() {
                    config.demod = default_demod_for(*b, config.output_samprate);
                }
            }
        }
        Tag::IndependentSideband => {
            if let Value::Bool(v) = value {
                config.independent_sideband = *v;
            }
        }
        Tag::ThreshExtend | Tag::SnrSquelch => {
            // Acknowledged but not separately modeled: this crate's
            // squelch (demod::squelch) is a plain two-threshold state
            // machine, not the noise-extended/SNR-estimator variants
            // these tags select in the original hardware.
        }
        Tag::Headroom => {
            if let Value::Float32(v) = value {
                config.headroom = *v;
            }
        }
        Tag::Gain => {
            if let Value::Float32(v) = value {
                config.gain = *v;
            }
        }
        Tag::AgcEnable => {
            if let Value::Bool(v) = value {
                with_linear_agc(config, |agc| agc.enabled = *v);
            }
        }
        Tag::AgcHangtime => {
            if let Value::Float32(v) = value {
                with_linear_agc(config, |agc| agc.hangtime_sec = *v);
            }
        }
        Tag::AgcRecoveryRate => {
            if let Value::Float32(v) = value {
                with_linear_agc(config, |agc| agc.recovery_rate_db_per_sec = *v);
            }
        }
        Tag::AgcThreshold => {
            if let Value::Float32(v) = value {
                with_linear_agc(config, |agc| agc.threshold = *v);
            }
        }
        Tag::PllEnable => {
            if let Value::Bool(v) = value {
                if let DemodConfig::Linear(params) = &mut config.demod {
                    params.pll_enable = *v;
                }
            }
        }
        Tag::PllBw => {
            if let Value::Float32(v) = value {
                if let DemodConfig::Linear(params) = &mut config.demod {
                    params.pll.loop_bw = *v;
                }
            }
        }
        Tag::PllSquare => {
            if let Value::Bool(v) = value {
                if let DemodConfig::Linear(params) = &mut config.demod {
                    params.pll.square = *v;
                }
            }
        }
        Tag::Envelope => {
            if let Value::Bool(envelope) = value {
                if let DemodConfig::Linear(params) = &mut config.demod {
                    params.coherent = !*envelope;
                }
            }
        }
        Tag::OutputChannels => {
            if let Value::Byte(v) = value {
                config.audio_channels = *v;
                if let DemodConfig::Wfm(params) = &mut config.demod {
                    params.stereo_requested = *v >= 2;
                }
            }
        }
        Tag::SquelchOpen => {
            if let Value::Float32(db) = value {
                let ratio = estimators::db_to_ratio(*db);
                with_fm_squelch(config, |squelch| squelch.open = ratio);
            }
        }
        Tag::SquelchClose => {
            if let Value::Float32(db) = value {
                let ratio = estimators::db_to_ratio(*db);
                with_fm_squelch(config, |squelch| squelch.close = ratio);
            }
        }
        Tag::NoncoherentBinBw => {
            if let Value::Float64(v) = value {
                if let DemodConfig::Spectrum(params) = &mut config.demod {
                    params.bin_bw = *v;
                }
            }
        }
        Tag::BinCount => {
            if let Value::Int32(v) = value {
                if let DemodConfig::Spectrum(params) = &mut config.demod {
                    params.bin_count = (*v).max(0) as usize;
                }
            }
        }
        Tag::StatusInterval => {
            if let Value::Int32(v) = value {
                config.output_interval_blocks = (*v).max(0) as u64;
            }
        }
        Tag::OutputEncoding => {
            if let Value::Byte(v) = value {
                config.encoding = match v {
                    1 => crate::channel::EncodingTag::Opus {
                        bitrate: opus_bitrate_or_default(config),
                    },
                    _ => crate::channel::EncodingTag::Pcm,
                };
            }
        }
        Tag::OpusBitRate => {
            if let Value::Int32(v) = value {
                config.encoding = crate::channel::EncodingTag::Opus {
                    bitrate: (*v).max(0) as u32,
                };
            }
        }
        Tag::Minpacket => {
            if let Value::Int32(v) = value {
                config.minpacket = (*v).max(0) as u32;
            }
        }
        Tag::OutputSamprate => {
            if let Value::Int32(v) = value {
                config.output_samprate = (*v).max(0) as u32;
            }
        }
    }
}

fn opus_bitrate_or_default(config: &ChannelConfig) -> u32 {
    match config.encoding {
        crate::channel::EncodingTag::Opus { bitrate } => bitrate,
        crate::channel::EncodingTag::Pcm => 32_000,
    }
}

fn with_linear_agc(config: &mut ChannelConfig, f: impl FnOnce(&mut AgcParams)) {
    if let DemodConfig::Linear(params) = &mut config.demod {
        f(&mut params.agc);
    }
}

fn with_fm_squelch(config: &mut ChannelConfig, f: impl FnOnce(&mut SquelchParams)) {
    match &mut config.demod {
        DemodConfig::Nbfm(params) => f(&mut params.squelch),
        DemodConfig::Wfm(params) => f(&mut params.squelch),
        _ => {}
    }
}

/// Builds fresh, default parameters for demod discriminant `b` (§4.3's
/// `DEMOD_TYPE` values), seeding sample-rate-derived fields from
/// `output_samprate`. Used when `DEMOD_TYPE` switches a channel to a
/// variant it wasn't already running, since a single byte carries no
/// information about the variant's other parameters.
fn default_demod_for(b: u8, output_samprate: u32) -> DemodConfig {
    match b {
        1 => DemodConfig::Wfm(WfmParams {
            peak_deviation_hz: 75_000.0,
            deemphasis_tau_sec: 75e-6,
            squelch: SquelchParams {
                open: 0.0,
                close: 0.0,
                tail_blocks: 0,
            },
            stereo_requested: true,
        }),
        2 => DemodConfig::Linear(LinearParams {
            coherent: true,
            pll_enable: false,
            pll: PllParams {
                loop_bw: 10.0,
                samprate: output_samprate as f32,
                square: false,
                lock_variance_threshold: 0.01,
            },
            agc: AgcParams {
                enabled: true,
                threshold: 0.5,
                recovery_rate_db_per_sec: 20.0,
                hangtime_sec: 0.5,
                headroom: 1.0,
            },
        }),
        3 => DemodConfig::Spectrum(crate::demod::spectrum::SpectrumParams {
            bin_count: 256,
            bin_bw: 100.0,
            average_alpha: 0.2,
        }),
        _ => DemodConfig::Nbfm(NbfmParams {
            peak_deviation_hz: 5000.0,
            samprate: output_samprate as f32,
            deemphasis_tau_sec: 0.0,
            squelch: SquelchParams {
                open: 0.0,
                close: 0.0,
                tail_blocks: 0,
            },
            tone_hz: 0.0,
            tone_threshold: 0.0,
        }),
    }
}

/// Outcome of routing one CMD datagram, for the caller (the control
/// socket reader, which owns the sockets and worker-spawning
/// dependencies this module does not) to act on.
pub enum Outcome {
    /// The packet was dropped before reaching any channel.
    Dropped(DroppedReason),
    /// A broadcast poll (ssrc `0xFFFFFFFF`) staggered every live
    /// channel's unprompted STATUS timer; no channel's configuration
    /// was touched.
    Broadcast,
    /// The command was queued on an existing channel's pending-command
    /// slot.
    Queued(Arc<Channel>),
    /// The command named a new ssrc; a channel was created for it (with
    /// the command already applied) and the caller must start its
    /// worker.
    Created(Arc<Channel>),
}

/// Why a packet never reached a channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DroppedReason {
    /// The packet did not parse as a CMD packet.
    Malformed,
    /// The packet had no `OUTPUT_SSRC` tag.
    NoSsrcTag,
    /// The packet named the reserved template ssrc (`0`).
    ReservedSsrc,
    /// The target channel's single-slot command queue already held an
    /// unapplied command.
    QueueFull,
}

/// Extracts the `OUTPUT_SSRC` tag's value from a decoded record list, if
/// present and well-formed.
fn find_ssrc(records: &[tlv::RawRecord]) -> Option<u32> {
    records.iter().find_map(|raw| {
        if raw.tag != Tag::OutputSsrc as u8 {
            return None;
        }
        match tlv::decode_value(raw) {
            Ok((_, Value::Int32(v))) => Some(v as u32),
            _ => None,
        }
    })
}

/// Routes one incoming CMD datagram: drops it, stages a broadcast poll,
/// or delivers it to an existing or newly-created channel (§4.7
/// "ssrc resolution", §3 "Lifecycle").
///
/// `make_template` builds the starting [`ChannelConfig`] for a brand
/// new ssrc (a fresh [`ChannelConfig::template`] plus whatever
/// process-wide defaults, such as a default output destination, the
/// caller's configuration layer supplies — out of this crate's scope,
/// §1).
pub fn dispatch_command(
    bytes: &[u8],
    registry: &Registry,
    presets: &PresetTable,
    make_template: impl FnOnce(u32) -> ChannelConfig,
) -> Outcome {
    let (_, records) = match tlv::decode_packet(bytes) {
        Ok(parsed) if parsed.0 == tlv::PacketKind::Cmd => parsed,
        _ => return Outcome::Dropped(DroppedReason::Malformed),
    };

    let ssrc = match find_ssrc(&records) {
        Some(ssrc) => ssrc,
        None => return Outcome::Dropped(DroppedReason::NoSsrcTag),
    };

    if ssrc == registry::SSRC_RESERVED_TEMPLATE {
        return Outcome::Dropped(DroppedReason::ReservedSsrc);
    }

    if ssrc == registry::SSRC_BROADCAST {
        for (index, channel) in registry.snapshot().into_iter().enumerate() {
            channel.set_global_timer((index as u64) / 2 + 1);
        }
        return Outcome::Broadcast;
    }

    let body = &bytes[1..];
    if let Some(channel) = registry.get(ssrc) {
        return queue_or_drop(channel, body);
    }

    let (channel, created) = registry.get_or_create(ssrc, || {
        let template = make_template(ssrc);
        let initial = apply_command_bytes(&template, body, presets).unwrap_or(template);
        Channel::new(initial)
    });
    if created {
        Outcome::Created(channel)
    } else {
        // Lost the creation race to a concurrent dispatch for the same
        // ssrc; fall back to queuing like any existing channel.
        queue_or_drop(channel, body)
    }
}

fn queue_or_drop(channel: Arc<Channel>, body: &[u8]) -> Outcome {
    if channel.submit_command(body.to_vec()) {
        if !channel.config().is_idle() {
            let timeout = channel.config().idle_timeout_blocks;
            channel.refresh_lifetime(timeout);
        }
        Outcome::Queued(channel)
    } else {
        Outcome::Dropped(DroppedReason::QueueFull)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::tlv::{encode_packet, encode_value, PacketKind, RawRecord};

    fn cmd_bytes(records: Vec<RawRecord>) -> Vec<u8> {
        encode_packet(PacketKind::Cmd, &records)
    }

    #[test]
    fn radio_frequency_tag_updates_freq() {
        let presets = PresetTable::new();
        let current = ChannelConfig::template(1);
        let body = cmd_bytes(vec![encode_value(Tag::RadioFrequency, &Value::Float64(146_520_000.0))]);
        let updated = apply_command_bytes(&current, &body[1..], &presets).unwrap();
        assert_eq!(updated.freq_hz, 146_520_000.0);
    }

    #[test]
    fn preset_sets_fields_but_explicit_override_wins() {
        let presets = PresetTable::with_common_defaults();
        let current = ChannelConfig::template(1);
        let body = cmd_bytes(vec![
            encode_value(Tag::LowEdge, &Value::Float64(-1500.0)),
            encode_value(Tag::Preset, &Value::Str("fm".to_string())),
        ]);
        let updated = apply_command_bytes(&current, &body[1..], &presets).unwrap();
        // fm preset sets low_edge to -8000, but the explicit tag is deferred
        // and applied last, so it wins regardless of packet order.
        assert_eq!(updated.min_if_hz, -1500.0);
        assert_eq!(updated.preset_name, Some("fm".to_string()));
    }

    #[test]
    fn unknown_preset_name_is_reported() {
        let presets = PresetTable::new();
        let current = ChannelConfig::template(1);
        let body = cmd_bytes(vec![encode_value(Tag::Preset, &Value::Str("nope".to_string()))]);
        let result = apply_command_bytes(&current, &body[1..], &presets);
        assert_eq!(result, Err(DispatchError::UnknownPreset("nope".to_string())));
    }

    #[test]
    fn squelch_open_db_sentinel_becomes_zero_ratio() {
        let presets = PresetTable::new();
        let current = ChannelConfig::template(1);
        let body = cmd_bytes(vec![encode_value(Tag::SquelchOpen, &Value::Float32(-999.0))]);
        let updated = apply_command_bytes(&current, &body[1..], &presets).unwrap();
        match updated.demod {
            DemodConfig::Nbfm(params) => assert_eq!(params.squelch.open, 0.0),
            _ => panic!("expected NBFM"),
        }
    }

    #[test]
    fn demod_type_switch_resets_to_variant_defaults() {
        let presets = PresetTable::new();
        let current = ChannelConfig::template(1);
        let body = cmd_bytes(vec![encode_value(Tag::DemodType, &Value::Byte(2))]);
        let updated = apply_command_bytes(&current, &body[1..], &presets).unwrap();
        assert_eq!(updated.demod.discriminant(), 2);
    }

    #[test]
    fn malformed_packet_is_dropped() {
        let registry = Registry::new();
        let presets = PresetTable::new();
        let outcome = dispatch_command(&[], &registry, &presets, ChannelConfig::template);
        assert!(matches!(outcome, Outcome::Dropped(DroppedReason::Malformed)));
    }

    #[test]
    fn missing_ssrc_tag_is_dropped() {
        let registry = Registry::new();
        let presets = PresetTable::new();
        let body = cmd_bytes(vec![encode_value(Tag::Gain, &Value::Float32(1.0))]);
        let outcome = dispatch_command(&body, &registry, &presets, ChannelConfig::template);
        assert!(matches!(outcome, Outcome::Dropped(DroppedReason::NoSsrcTag)));
    }

    #[test]
    fn reserved_template_ssrc_is_dropped() {
        let registry = Registry::new();
        let presets = PresetTable::new();
        let body = cmd_bytes(vec![encode_value(Tag::OutputSsrc, &Value::Int32(0))]);
        let outcome = dispatch_command(&body, &registry, &presets, ChannelConfig::template);
        assert!(matches!(outcome, Outcome::Dropped(DroppedReason::ReservedSsrc)));
    }

    #[test]
    fn unknown_ssrc_creates_a_channel_with_the_command_applied() {
        let registry = Registry::new();
        let presets = PresetTable::new();
        let body = cmd_bytes(vec![
            encode_value(Tag::OutputSsrc, &Value::Int32(99)),
            encode_value(Tag::RadioFrequency, &Value::Float64(100_000.0)),
        ]);
        let outcome = dispatch_command(&body, &registry, &presets, ChannelConfig::template);
        match outcome {
            Outcome::Created(channel) => {
                assert_eq!(channel.config().freq_hz, 100_000.0);
                assert_eq!(registry.len(), 1);
            }
            _ => panic!("expected Created"),
        }
    }

    #[test]
    fn known_ssrc_queues_onto_the_existing_channel() {
        let registry = Registry::new();
        let presets = PresetTable::new();
        registry.insert(99, Channel::new(ChannelConfig::template(99).freq_hz(50_000.0)));
        let body = cmd_bytes(vec![
            encode_value(Tag::OutputSsrc, &Value::Int32(99)),
            encode_value(Tag::Gain, &Value::Float32(2.0)),
        ]);
        let outcome = dispatch_command(&body, &registry, &presets, ChannelConfig::template);
        assert!(matches!(outcome, Outcome::Queued(_)));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn broadcast_ssrc_staggers_every_channel_without_applying_tags() {
        let registry = Registry::new();
        let presets = PresetTable::new();
        registry.insert(1, Channel::new(ChannelConfig::template(1).freq_hz(1.0)));
        registry.insert(2, Channel::new(ChannelConfig::template(2).freq_hz(2.0)));
        let body = cmd_bytes(vec![encode_value(Tag::OutputSsrc, &Value::Int32(-1))]);
        let outcome = dispatch_command(&body, &registry, &presets, ChannelConfig::template);
        assert!(matches!(outcome, Outcome::Broadcast));
    }
}
