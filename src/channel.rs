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

//! The channel: the central entity of §3's data model, its worker thread,
//! and the output interface it pushes PCM/spectrum frames to.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::channelizer::{Channelizer, ChannelizerParams, RestartParams};
use crate::demod::squelch::SquelchParams;
use crate::demod::{DemodConfig, DemodState};
use crate::frontend::Frontend;
use crate::master_fft::MasterFftHandle;
use crate::control::preset::PresetTable;
use crate::mixer::{FineMixer, SecondFilter, SecondFilterParams};
use crate::registry::Registry;
use crate::rt_priority;
use crate::status::StatusSink;

/// Output sample/PCM encoding, per the `OUTPUT_ENCODING`/`OPUS_BIT_RATE`
/// control tags (§4.7).
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum EncodingTag {
    /// Uncompressed float PCM.
    Pcm,
    /// Opus-compressed PCM at the given bitrate, in bits/sec. Actual
    /// encoding is the output transport's job (§1 "Out of scope"); the
    /// core only carries the tag and target bitrate through to the
    /// sink.
    Opus {
        /// Target bitrate, bits/sec.
        bitrate: u32,
    },
}

/// One frame of demodulated audio handed to the output sink (§6
/// "Output interface").
pub struct AudioFrame {
    /// PCM samples: interleaved if `channels == 2`.
    pub samples: Vec<f32>,
    /// Number of audio channels (1 or 2).
    pub channels: u8,
    /// Output sample rate, samples/sec.
    pub sample_rate: u32,
    /// Wall-clock time of this frame, nanoseconds since the epoch.
    pub timestamp_ns: u128,
    /// RTP-like monotonic sequence number.
    pub sequence: u32,
    /// Requested encoding.
    pub encoding: EncodingTag,
}

/// The contract an output transport (packetization, multicast,
/// compression — all out of scope for this crate, §1) must satisfy to
/// receive a channel's demodulated output.
pub trait ChannelSink: Send + Sync {
    /// Delivers one audio frame for `ssrc`.
    fn send_audio(&self, ssrc: u32, frame: AudioFrame);

    /// Delivers a spectrum analyzer bin-power snapshot for `ssrc`; per
    /// §4.6, spectrum "frames" are carried as a status message rather
    /// than the audio path, so implementations typically forward this
    /// into the same status emission as the rest of a SPECT channel's
    /// fields.
    fn send_spectrum(&self, ssrc: u32, bins: &[f32]);
}

/// A sink that discards everything; used in tests and as a safe default
/// before a real transport is wired up.
#[derive(Debug, Default)]
pub struct NullSink;

impl ChannelSink for NullSink {
    fn send_audio(&self, _ssrc: u32, _frame: AudioFrame) {}
    fn send_spectrum(&self, _ssrc: u32, _bins: &[f32]) {}
}

/// Full parameter set for one channel (§3's Channel entity), and the
/// unit the control plane reads/writes when applying commands.
///
/// Builder-style: setters consume and return `Self`, matching
/// `BandSetupBuilder`'s pattern.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelConfig {
    /// This channel's ssrc.
    pub ssrc: u32,
    /// Target frequency relative to the frontend's LO, in hertz. `0.0`
    /// marks this channel idle/template (§3 "Lifecycle").
    pub freq_hz: f64,
    /// Display-only shift added to `freq_hz` when reporting frequency.
    pub shift_hz: f64,
    /// Doppler shift, hertz.
    pub doppler_hz: f64,
    /// Doppler rate, hertz/sec.
    pub doppler_rate_hz_per_sec: f64,
    /// Lower passband edge relative to `freq_hz`, hertz.
    pub min_if_hz: f64,
    /// Upper passband edge relative to `freq_hz`, hertz.
    pub max_if_hz: f64,
    /// Kaiser window shape parameter for the passband filter.
    pub kaiser_beta: f64,
    /// Optional second (narrower) filter.
    pub second_filter: SecondFilterParams,
    /// Independent-sideband mode (§4.2).
    pub independent_sideband: bool,
    /// Output sample rate, samples/sec. Ignored when `demod.is_spectrum()`.
    pub output_samprate: u32,
    /// Output audio channel count (1 or 2). Ignored when
    /// `demod.is_spectrum()`.
    pub audio_channels: u8,
    /// Active demodulator and its parameters.
    pub demod: DemodConfig,
    /// Output gain (linear).
    pub gain: f32,
    /// Output headroom/clip ceiling.
    pub headroom: f32,
    /// Minimum packet size, in samples, before the output transport
    /// flushes (an output-transport hint carried through, not enforced
    /// here).
    pub minpacket: u32,
    /// Requested encoding.
    pub encoding: EncodingTag,
    /// Name of the last preset applied, if any.
    pub preset_name: Option<String>,
    /// Idle-expiration countdown, in blocks.
    pub idle_timeout_blocks: u64,
    /// Blocks between periodic STATUS emissions.
    pub output_interval_blocks: u64,
}

impl ChannelConfig {
    /// A default, idle (`freq_hz == 0.0`) NBFM channel for `ssrc`, the
    /// starting point every dynamically-created channel and every
    /// builder chain begins from.
    pub fn template(ssrc: u32) -> Self {
        ChannelConfig {
            ssrc,
            freq_hz: 0.0,
            shift_hz: 0.0,
            doppler_hz: 0.0,
            doppler_rate_hz_per_sec: 0.0,
            min_if_hz: -5000.0,
            max_if_hz: 5000.0,
            kaiser_beta: 5.0,
            second_filter: SecondFilterParams::disabled(),
            independent_sideband: false,
            output_samprate: 8000,
            audio_channels: 1,
            demod: DemodConfig::Nbfm(crate::demod::nbfm::NbfmParams {
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
            }),
            gain: 1.0,
            headroom: 1.0,
            minpacket: 0,
            encoding: EncodingTag::Pcm,
            preset_name: None,
            idle_timeout_blocks: 0,
            output_interval_blocks: 0,
        }
    }

    /// True when this channel is idle/template, per §3: "A channel with
    /// `freq == 0` is considered idle/template".
    pub fn is_idle(&self) -> bool {
        self.freq_hz == 0.0
    }

    /// Sets the target frequency.
    pub fn freq_hz(self, freq_hz: f64) -> Self {
        ChannelConfig { freq_hz, ..self }
    }

    /// Sets the passband edges.
    pub fn filter_edges(self, min_if_hz: f64, max_if_hz: f64) -> Self {
        ChannelConfig {
            min_if_hz,
            max_if_hz,
            ..self
        }
    }

    /// Sets the Kaiser shape parameter.
    pub fn kaiser_beta(self, kaiser_beta: f64) -> Self {
        ChannelConfig { kaiser_beta, ..self }
    }

    /// Sets the output sample rate.
    pub fn output_samprate(self, output_samprate: u32) -> Self {
        ChannelConfig {
            output_samprate,
            ..self
        }
    }

    /// Sets the active demodulator.
    pub fn demod(self, demod: DemodConfig) -> Self {
        ChannelConfig { demod, ..self }
    }

    /// Sets the idle-expiration timeout, in blocks.
    pub fn idle_timeout_blocks(self, idle_timeout_blocks: u64) -> Self {
        ChannelConfig {
            idle_timeout_blocks,
            ..self
        }
    }

    /// Sets the periodic STATUS cadence, in blocks.
    pub fn output_interval_blocks(self, output_interval_blocks: u64) -> Self {
        ChannelConfig {
            output_interval_blocks,
            ..self
        }
    }

    /// Returns the restart-detection fingerprint for this config (§4.2,
    /// §4.7).
    pub fn restart_params(&self) -> RestartParams {
        RestartParams {
            output_samprate: self.output_samprate,
            demod_type: self.demod.discriminant(),
            min_if_hz: self.min_if_hz.round() as i64,
            max_if_hz: self.max_if_hz.round() as i64,
            kaiser_beta_micro: (self.kaiser_beta * 1_000_000.0).round() as i64,
            filter2_blocking: self.second_filter.blocking as u32,
            audio_channels: self.audio_channels,
        }
    }

    /// Clamps `max_if_hz` (and, symmetrically for complex frontends,
    /// `min_if_hz`) to the frontend's coverage, per §8 "Boundary
    /// behaviors": a channel whose requested IF exceeds what the
    /// frontend can supply is clamped rather than rejected.
    pub fn clamp_to_frontend(mut self, frontend: &crate::frontend::FrontendDescriptor) -> Self {
        let (lo, hi) = frontend.coverage_bounds();
        self.min_if_hz = self.min_if_hz.max(lo);
        self.max_if_hz = self.max_if_hz.min(hi);
        self
    }
}

/// Counters updated by a channel's worker and read by the status
/// emitter, per §3 "Counters".
#[derive(Debug, Default)]
pub struct ChannelCounters {
    /// Control datagrams successfully applied to this channel.
    pub packets_in: AtomicU64,
    /// STATUS datagrams sent for this channel.
    pub packets_out: AtomicU64,
    /// Total output samples produced.
    pub output_samples: AtomicU64,
    /// Per-block processing errors (never fatal, §7).
    pub errors: AtomicU64,
    /// Master FFT blocks this channel fell behind by and had to
    /// resynchronize past (§4.1).
    pub block_drops: AtomicU64,
}

/// Mutable control-plane state guarded by the channel mutex (§3
/// "Control", §5 "Shared mutable state"): the pending single-slot
/// command buffer, lifetime countdown, staggered broadcast timer, and
/// liveness flag.
struct ControlState {
    pending_command: Option<Vec<u8>>,
    lifetime_blocks: u64,
    global_timer: u64,
    blocks_until_status: u64,
    inuse: bool,
    needs_immediate_status: bool,
}

/// The central entity of §3's data model: identity, tuned/filter/output/
/// demod parameters, signal estimators, squelch, and the control-plane
/// bookkeeping a worker thread and the status emitter both touch.
pub struct Channel {
    /// This channel's ssrc; bijective with the channel while `inuse`.
    pub ssrc: u32,
    config: Mutex<ChannelConfig>,
    control: Mutex<ControlState>,
    /// Counters; individually atomic so the status emitter never blocks
    /// on the channel mutex just to read them.
    pub counters: ChannelCounters,
    /// Last master FFT sequence number this channel's worker processed;
    /// the monotonicity invariant of §8 is checked against this.
    pub block_sequence: AtomicU64,
}

impl Channel {
    /// Creates a new, not-yet-running channel from `config`.
    pub fn new(config: ChannelConfig) -> Arc<Channel> {
        let idle_timeout = config.idle_timeout_blocks;
        let output_interval = config.output_interval_blocks;
        Arc::new(Channel {
            ssrc: config.ssrc,
            config: Mutex::new(config),
            control: Mutex::new(ControlState {
                pending_command: None,
                lifetime_blocks: idle_timeout,
                global_timer: 0,
                blocks_until_status: output_interval,
                inuse: true,
                needs_immediate_status: false,
            }),
            counters: ChannelCounters::default(),
            block_sequence: AtomicU64::new(0),
        })
    }

    /// A snapshot of the current configuration.
    pub fn config(&self) -> ChannelConfig {
        self.config.lock().expect("channel config lock poisoned").clone()
    }

    /// Replaces the configuration in place (the control plane has
    /// already decided, via §4.7's restart detection, whether the
    /// worker needs to rebuild anything).
    pub fn set_config(&self, new: ChannelConfig) {
        *self.config.lock().expect("channel config lock poisoned") = new;
    }

    /// True while this channel's worker is running and its ssrc is
    /// live in the registry.
    pub fn inuse(&self) -> bool {
        self.control.lock().expect("channel control lock poisoned").inuse
    }

    /// Submits a command for this channel's worker to apply on its next
    /// block boundary. Per §4.7, the pending-command slot has depth one
    /// and overwrites are refused: returns `false` (the command is
    /// dropped) if a command is already pending.
    pub fn submit_command(&self, bytes: Vec<u8>) -> bool {
        let mut control = self.control.lock().expect("channel control lock poisoned");
        if control.pending_command.is_some() {
            return false;
        }
        control.pending_command = Some(bytes);
        control.needs_immediate_status = true;
        // Any command for a non-idle channel refreshes its lifetime;
        // idle (freq == 0) channels are left to expire (§4.7 "Lifetime
        // rule"). The caller (control::dispatch) knows freq at dispatch
        // time and calls `refresh_lifetime` separately when applicable,
        // since this method does not lock `self.config`.
        true
    }

    /// Takes the pending command, if any, for the worker to apply.
    fn take_pending_command(&self) -> Option<Vec<u8>> {
        self.control
            .lock()
            .expect("channel control lock poisoned")
            .pending_command
            .take()
    }

    /// Refreshes the idle-expiration countdown to `timeout_blocks`, per
    /// §4.7: only called for channels with `freq != 0`.
    pub fn refresh_lifetime(&self, timeout_blocks: u64) {
        self.control.lock().expect("channel control lock poisoned").lifetime_blocks = timeout_blocks;
    }

    /// Sets the staggered-broadcast countdown (§4.7 "ssrc ==
    /// 0xFFFFFFFF"): `ticks` block boundaries from now, this channel
    /// emits a STATUS packet unprompted.
    pub fn set_global_timer(&self, ticks: u64) {
        self.control.lock().expect("channel control lock poisoned").global_timer = ticks;
    }

    /// Decrements the lifetime countdown by one block, returning `true`
    /// if it has just reached zero (teardown should run).
    fn tick_lifetime(&self) -> bool {
        let mut control = self.control.lock().expect("channel control lock poisoned");
        if control.lifetime_blocks == 0 {
            return true;
        }
        control.lifetime_blocks -= 1;
        control.lifetime_blocks == 0
    }

    /// Advances the staggered broadcast and periodic status timers by
    /// one block, returning `(broadcast_due, periodic_due)`.
    fn tick_status_timers(&self, output_interval_blocks: u64) -> (bool, bool) {
        let mut control = self.control.lock().expect("channel control lock poisoned");
        let broadcast_due = if control.global_timer > 0 {
            control.global_timer -= 1;
            control.global_timer == 0
        } else {
            false
        };
        let periodic_due = if output_interval_blocks > 0 {
            if control.blocks_until_status == 0 {
                control.blocks_until_status = output_interval_blocks;
                true
            } else {
                control.blocks_until_status -= 1;
                control.blocks_until_status == 0
            }
        } else {
            false
        };
        (broadcast_due, periodic_due)
    }

    /// Takes (and clears) the "a command was just applied" flag that
    /// forces an immediate STATUS reply.
    fn take_immediate_status_flag(&self) -> bool {
        let mut control = self.control.lock().expect("channel control lock poisoned");
        std::mem::replace(&mut control.needs_immediate_status, false)
    }

    /// Marks the channel torn down: its worker has exited and its ssrc
    /// should be released by the caller (the registry).
    fn mark_torn_down(&self) {
        self.control.lock().expect("channel control lock poisoned").inuse = false;
    }
}

/// Owns the mutable, worker-exclusive processing state (channelizer,
/// mixer, demod, second filter) and runs the per-block pipeline. Split
/// from [`Channel`] because none of this needs to be behind the channel
/// mutex: only the worker thread ever touches it (§5 "Memory").
struct WorkerState {
    channelizer: Channelizer,
    mixer: FineMixer,
    second_filter: Option<SecondFilter>,
    demod: DemodState,
    restart_fingerprint: RestartParams,
}

impl WorkerState {
    fn build(config: &ChannelConfig, frontend_sample_rate: f64, fft_size: usize, kind: crate::bins::InputKind) -> Self {
        let channelizer_params = ChannelizerParams {
            center_hz: config.freq_hz,
            min_if_hz: config.min_if_hz,
            max_if_hz: config.max_if_hz,
            output_samprate: config.output_samprate as f64,
            kaiser_beta: config.kaiser_beta,
        };
        let channelizer = Channelizer::new(channelizer_params, frontend_sample_rate, fft_size, kind);
        let block_len = channelizer.output_block_len();
        let mixer = FineMixer::new(config.output_samprate as f64);
        let second_filter = if config.second_filter.enabled() {
            Some(SecondFilter::new(&config.second_filter, block_len))
        } else {
            None
        };
        let block_rate_hz = if block_len > 0 {
            config.output_samprate as f32 / block_len as f32
        } else {
            1.0
        };
        let demod = DemodState::new(config.demod, block_rate_hz);
        WorkerState {
            channelizer,
            mixer,
            second_filter,
            demod,
            restart_fingerprint: config.restart_params(),
        }
    }
}

/// Runs one channel's worker thread body: waits for each new master FFT
/// block, applies any pending command, channelizes/demodulates, and
/// emits output and status, until the channel's lifetime expires or the
/// master FFT shuts down (§2, §5).
pub fn run_worker(
    channel: Arc<Channel>,
    frontend: Arc<dyn Frontend>,
    master: MasterFftHandle,
    fft_size: usize,
    sink: Arc<dyn ChannelSink>,
    status_sink: Arc<dyn StatusSink>,
    registry: Arc<Registry>,
    presets: Arc<PresetTable>,
) {
    rt_priority::raise_to_realtime(50);

    let mut sequence = 0u64;
    let mut config = channel.config();
    let kind = frontend.descriptor().kind;
    let frontend_sample_rate = frontend.descriptor().sample_rate;
    let mut state = WorkerState::build(&config, frontend_sample_rate, fft_size, kind);
    let mut output_sequence = 0u32;

    loop {
        let block = match master.wait_next(sequence) {
            Some(block) => block,
            None => break, // poison sequence: process-wide shutdown
        };
        if block.sequence > sequence + 1 {
            channel
                .counters
                .block_drops
                .fetch_add(block.sequence - sequence - 1, Ordering::Relaxed);
        }
        sequence = block.sequence;
        channel.block_sequence.store(sequence, Ordering::Relaxed);

        // 1. Ingest any pending command, applying it before this
        //    block is processed (§5 "Ordering").
        if let Some(command_bytes) = channel.take_pending_command() {
            channel.counters.packets_in.fetch_add(1, Ordering::Relaxed);
            match crate::control::dispatch::apply_command_bytes(&config, &command_bytes, &presets) {
                Ok(new_config) => {
                    let restarted = new_config.restart_params() != state.restart_fingerprint;
                    config = new_config;
                    channel.set_config(config.clone());
                    if restarted {
                        state = WorkerState::build(&config, frontend_sample_rate, fft_size, kind);
                    }
                }
                Err(err) => {
                    channel.counters.errors.fetch_add(1, Ordering::Relaxed);
                    warn!("channel {:08x}: command rejected: {}", channel.ssrc, err);
                }
            }
        }

        // 2. Lifetime: decrement unconditionally; idle channels are
        //    simply never refreshed elsewhere (§3 "Lifecycle", §4.7
        //    "Lifetime rule").
        if config.idle_timeout_blocks > 0 && channel.tick_lifetime() {
            break;
        }

        // 3. Process this block.
        if config.demod.is_spectrum() {
            let bin_shift = crate::bins::freq_to_bin(config.freq_hz, fft_size, frontend_sample_rate);
            state
                .demod
                .process_spectrum(&block.bins, kind, fft_size, frontend_sample_rate, bin_shift);
            if let DemodState::Spectrum(spectrum) = &state.demod {
                sink.send_spectrum(channel.ssrc, spectrum.bin_data());
            }
        } else {
            let mut baseband = state.channelizer.process(&block.bins);
            state.mixer.set_residual_hz(state.channelizer.residual_offset_hz());
            state.mixer.set_doppler(config.doppler_hz, config.doppler_rate_hz_per_sec);
            state.mixer.process(&mut baseband);
            if let Some(filter) = state.second_filter.as_mut() {
                baseband = filter.process(&baseband);
            }
            let audio = state.demod.process_audio(&baseband);
            let sample_count = audio.left.len() + audio.right.len();
            channel
                .counters
                .output_samples
                .fetch_add(sample_count as u64, Ordering::Relaxed);
            let samples = if audio.stereo {
                interleave(&audio.left, &audio.right)
            } else {
                audio.left
            };
            output_sequence = output_sequence.wrapping_add(1);
            sink.send_audio(
                channel.ssrc,
                AudioFrame {
                    samples,
                    channels: if audio.stereo { 2 } else { 1 },
                    sample_rate: config.output_samprate,
                    timestamp_ns: now_ns(),
                    sequence: output_sequence,
                    encoding: config.encoding,
                },
            );
        }

        // 4. Status: a command reply takes priority, then the
        //    staggered broadcast tick, then the periodic cadence.
        let (broadcast_due, periodic_due) = channel.tick_status_timers(config.output_interval_blocks);
        let reply_due = channel.take_immediate_status_flag();
        if reply_due || broadcast_due || periodic_due {
            let bytes = crate::status::encode_status(&channel, &config, frontend.as_ref(), &state.demod);
            status_sink.send_status(channel.ssrc, &bytes);
            channel.counters.packets_out.fetch_add(1, Ordering::Relaxed);
        }
    }

    channel.mark_torn_down();
    registry.remove(channel.ssrc);
}

fn interleave(left: &[f32], right: &[f32]) -> Vec<f32> {
    let mut out = Vec::with_capacity(left.len() + right.len());
    for (l, r) in left.iter().zip(right.iter()) {
        out.push(*l);
        out.push(*r);
    }
    out
}

fn now_ns() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos()
}

/// Spawns [`run_worker`] on a dedicated OS thread, named for its ssrc
/// (§5 "Scheduling model": one worker thread per channel).
pub fn spawn_worker(
    channel: Arc<Channel>,
    frontend: Arc<dyn Frontend>,
    master: MasterFftHandle,
    fft_size: usize,
    sink: Arc<dyn ChannelSink>,
    status_sink: Arc<dyn StatusSink>,
    registry: Arc<Registry>,
    presets: Arc<PresetTable>,
) -> thread::JoinHandle<()> {
    let ssrc = channel.ssrc;
    thread::Builder::new()
        .name(format!("channel-{:08x}", ssrc))
        .spawn(move || run_worker(channel, frontend, master, fft_size, sink, status_sink, registry, presets))
        .expect("failed to spawn channel worker thread")
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn template_channel_is_idle() {
        let config = ChannelConfig::template(5);
        assert!(config.is_idle());
    }

    #[test]
    fn single_slot_command_queue_refuses_overwrite() {
        let channel = test_support::test_channel(5);
        assert!(channel.submit_command(vec![1, 2, 3]));
        assert!(!channel.submit_command(vec![4, 5]));
        let taken = channel.take_pending_command().unwrap();
        assert_eq!(taken, vec![1, 2, 3]);
        // Slot is free again after being taken.
        assert!(channel.submit_command(vec![9]));
    }

    #[test]
    fn lifetime_reaches_zero_and_signals_expiry() {
        let channel = test_support::test_channel(5);
        channel.refresh_lifetime(2);
        assert!(!channel.tick_lifetime());
        assert!(channel.tick_lifetime());
    }

    #[test]
    fn broadcast_timer_fires_exactly_once() {
        let channel = test_support::test_channel(5);
        channel.set_global_timer(2);
        assert_eq!(channel.tick_status_timers(0), (false, false));
        assert_eq!(channel.tick_status_timers(0), (true, false));
        assert_eq!(channel.tick_status_timers(0), (false, false));
    }

    #[test]
    fn interleave_produces_lr_pairs() {
        let left = vec![1.0, 2.0];
        let right = vec![10.0, 20.0];
        assert_eq!(interleave(&left, &right), vec![1.0, 10.0, 2.0, 20.0]);
    }
}
