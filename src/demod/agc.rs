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

//! Attack-fast, release-slow automatic gain control, used by the linear
//! demodulator (§4.5).

/// AGC parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AgcParams {
    /// Whether AGC is active; when false, `gain` is set manually by
    /// [`Agc::set_manual_gain`] and never adjusted automatically.
    pub enabled: bool,
    /// Target output amplitude.
    pub threshold: f32,
    /// Gain recovery rate, in dB/sec, applied while `hangtime` has
    /// elapsed and the signal is below `threshold`.
    pub recovery_rate_db_per_sec: f32,
    /// Seconds after an attack during which gain is not raised.
    pub hangtime_sec: f32,
    /// Output clipping ceiling (the AGC never lets `peak * gain` exceed
    /// this).
    pub headroom: f32,
}

/// Running AGC state for one channel.
#[derive(Debug, Clone, Copy)]
pub struct Agc {
    params: AgcParams,
    gain: f32,
    hang_remaining_blocks: u32,
    block_rate_hz: f32,
}

impl Agc {
    /// Creates an AGC running at `block_rate_hz` blocks/sec (used to
    /// convert `hangtime_sec` and `recovery_rate_db_per_sec` into
    /// per-block steps), starting at unity gain.
    pub fn new(params: AgcParams, block_rate_hz: f32) -> Self {
        Agc {
            params,
            gain: 1.0,
            hang_remaining_blocks: 0,
            block_rate_hz,
        }
    }

    /// Replaces AGC parameters in place.
    pub fn set_params(&mut self, params: AgcParams) {
        self.params = params;
    }

    /// Forces `gain` directly; used when `enabled == false`.
    pub fn set_manual_gain(&mut self, gain: f32) {
        self.gain = gain;
    }

    /// Current gain.
    pub fn gain(&self) -> f32 {
        self.gain
    }

    /// Advances the AGC by one block given this block's peak amplitude
    /// `peak`, returning the gain to apply to that block (the gain in
    /// effect *before* this block's attack: a single-pass "compute then
    /// apply" per-block update, per §4.5).
    pub fn advance(&mut self, peak: f32) -> f32 {
        if !self.params.enabled {
            return self.gain;
        }
        let applied = self.gain;
        if peak * self.gain > self.params.headroom {
            self.gain = if peak > 0.0 {
                self.params.headroom / peak
            } else {
                self.gain
            };
            self.hang_remaining_blocks = (self.params.hangtime_sec * self.block_rate_hz) as u32;
        } else if self.hang_remaining_blocks > 0 {
            self.hang_remaining_blocks -= 1;
        } else {
            let db_per_block = self.params.recovery_rate_db_per_sec / self.block_rate_hz.max(1.0);
            let linear_step = 10f32.powf(db_per_block / 20.0);
            let target_gain = if peak > 0.0 {
                self.params.threshold / peak
            } else {
                f32::MAX
            };
            self.gain = (self.gain * linear_step).min(target_gain);
        }
        applied
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> AgcParams {
        AgcParams {
            enabled: true,
            threshold: 0.5,
            recovery_rate_db_per_sec: 20.0,
            hangtime_sec: 0.1,
            headroom: 1.0,
        }
    }

    #[test]
    fn loud_peak_triggers_immediate_attack() {
        let mut agc = Agc::new(params(), 10.0);
        agc.advance(2.0); // peak*gain(1.0) = 2.0 > headroom(1.0)
        assert!((agc.gain() - 0.5).abs() < 1e-6);
    }

    #[test]
    fn gain_recovers_slowly_after_hangtime_expires() {
        let mut agc = Agc::new(params(), 10.0);
        agc.advance(2.0); // attack, sets hang counter to 1 block (0.1s * 10Hz)
        let gain_after_attack = agc.gain();
        agc.advance(0.01); // still hanging
        assert_eq!(agc.gain(), gain_after_attack);
        agc.advance(0.01); // hang expired, gain should start rising
        assert!(agc.gain() > gain_after_attack);
    }

    #[test]
    fn disabled_agc_leaves_manual_gain_untouched() {
        let mut params = params();
        params.enabled = false;
        let mut agc = Agc::new(params, 10.0);
        agc.set_manual_gain(3.0);
        assert_eq!(agc.advance(100.0), 3.0);
        assert_eq!(agc.gain(), 3.0);
    }
}
