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

//! The squelch state machine shared by the FM and linear demodulators.

/// Squelch state, per §4.3.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SquelchState {
    /// Audio is passed through.
    Open,
    /// Metric has dropped below `close`, but the tail hasn't elapsed.
    Closing,
    /// Audio is muted.
    Closed,
}

/// Squelch thresholds and tail length. `0.0` on both is the "unconditionally
/// open" sentinel described in §4.3 and §8.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SquelchParams {
    /// Linear power ratio above which the squelch opens.
    pub open: f32,
    /// Linear power ratio below which the squelch begins closing.
    pub close: f32,
    /// Number of blocks `Closing` is held before transitioning to `Closed`.
    pub tail_blocks: u32,
}

impl SquelchParams {
    /// True when both thresholds are the `0.0` sentinel: squelch never
    /// closes, per §4.3 "unconditionally open".
    pub fn always_open(&self) -> bool {
        self.open == 0.0 && self.close == 0.0
    }
}

/// Running squelch state machine for one channel.
#[derive(Debug, Clone, Copy)]
pub struct Squelch {
    params: SquelchParams,
    state: SquelchState,
    tail_remaining: u32,
}

impl Squelch {
    /// Creates a squelch starting in the `Closed` state (or `Open` if
    /// `params` is the always-open sentinel).
    pub fn new(params: SquelchParams) -> Self {
        let state = if params.always_open() {
            SquelchState::Open
        } else {
            SquelchState::Closed
        };
        Squelch {
            params,
            state,
            tail_remaining: 0,
        }
    }

    /// Replaces the thresholds/tail in place, without resetting state
    /// (an in-place parameter change does not force a channel restart).
    pub fn set_params(&mut self, params: SquelchParams) {
        self.params = params;
        if params.always_open() {
            self.state = SquelchState::Open;
        }
    }

    /// Current state.
    pub fn state(&self) -> SquelchState {
        self.state
    }

    /// True if audio should currently pass through.
    pub fn is_open(&self) -> bool {
        self.state == SquelchState::Open
    }

    /// Advances the state machine by one block given this block's
    /// squelch metric (a linear power ratio, or tone-detector deviation
    /// when tone squelch is in use), per §4.3's transition table.
    pub fn advance(&mut self, metric: f32) -> SquelchState {
        if self.params.always_open() {
            self.state = SquelchState::Open;
            return self.state;
        }
        self.state = match self.state {
            SquelchState::Closed => {
                if metric >= self.params.open {
                    SquelchState::Open
                } else {
                    SquelchState::Closed
                }
            }
            SquelchState::Open => {
                if metric < self.params.close {
                    self.tail_remaining = self.params.tail_blocks;
                    SquelchState::Closing
                } else {
                    SquelchState::Open
                }
            }
            SquelchState::Closing => {
                if metric >= self.params.open {
                    SquelchState::Open
                } else if self.tail_remaining == 0 {
                    SquelchState::Closed
                } else {
                    self.tail_remaining -= 1;
                    SquelchState::Closing
                }
            }
        };
        self.state
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> SquelchParams {
        SquelchParams {
            open: 4.0,
            close: 2.0,
            tail_blocks: 2,
        }
    }

    #[test]
    fn closed_opens_only_above_open_threshold() {
        let mut sq = Squelch::new(params());
        assert_eq!(sq.advance(3.0), SquelchState::Closed);
        assert_eq!(sq.advance(4.0), SquelchState::Open);
    }

    #[test]
    fn open_holds_through_tail_then_closes() {
        let mut sq = Squelch::new(params());
        sq.advance(4.0); // Closed -> Open
        assert_eq!(sq.advance(1.0), SquelchState::Closing);
        assert_eq!(sq.advance(1.0), SquelchState::Closing);
        assert_eq!(sq.advance(1.0), SquelchState::Closing);
        assert_eq!(sq.advance(1.0), SquelchState::Closed);
    }

    #[test]
    fn closing_reopens_if_metric_recovers_during_tail() {
        let mut sq = Squelch::new(params());
        sq.advance(4.0);
        sq.advance(1.0); // -> Closing
        assert_eq!(sq.advance(5.0), SquelchState::Open);
    }

    #[test]
    fn always_open_sentinel_never_closes() {
        let always = SquelchParams {
            open: 0.0,
            close: 0.0,
            tail_blocks: 0,
        };
        let mut sq = Squelch::new(always);
        assert_eq!(sq.advance(0.0), SquelchState::Open);
        assert_eq!(sq.advance(1_000_000.0), SquelchState::Open);
    }
}
