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

//! The process-wide context the control plane is driven by (§6
//! "Environment", §9 "Global preset table and default sockets").
//!
//! Parsing a configuration file or command line is explicitly out of
//! scope for this crate (§1 "Out of scope"); the embedding process does
//! that and hands this crate the already-built result, the same relationship
//! `sparsdr_reconstruct_config` has to the decompress binary's own
//! `DecompressSetup`. [`ControlPlaneConfig`] is that result: the
//! idle-expiration timeout and STATUS cadence every dynamically-created
//! channel starts with, plus whatever template a brand-new ssrc should be
//! seeded from before its creating command is applied.

use crate::channel::ChannelConfig;

/// Immutable, process-wide defaults the control plane (§4.7) uses when a
/// command names an ssrc with no existing channel.
///
/// Everything here is "the default per-channel output bundle used to
/// seed dynamically created channels" from the ambient configuration
/// section: it never changes after startup, mirroring how
/// `DecompressSetup`/`BandSetupBuilder` hand the decompress library a
/// fully-populated, typed setup rather than raw config text.
#[derive(Debug, Clone)]
pub struct ControlPlaneConfig {
    /// Idle-expiration countdown, in blocks, applied to every
    /// dynamically-created channel (§3 "Lifecycle", §4.7 "Lifetime
    /// rule").
    pub idle_timeout_blocks: u64,
    /// Blocks between periodic STATUS emissions for every
    /// dynamically-created channel (§4.8).
    pub output_interval_blocks: u64,
}

impl ControlPlaneConfig {
    /// Builds the starting [`ChannelConfig`] for a brand new `ssrc`,
    /// before the creating command's tags (and any preset it names) are
    /// folded in by [`crate::control::dispatch::apply_command_bytes`].
    pub fn template(&self, ssrc: u32) -> ChannelConfig {
        ChannelConfig::template(ssrc)
            .idle_timeout_blocks(self.idle_timeout_blocks)
            .output_interval_blocks(self.output_interval_blocks)
    }
}

impl Default for ControlPlaneConfig {
    /// A conservative default: ten minutes of 20ms blocks before an idle
    /// channel expires, and a one-second STATUS cadence.
    fn default() -> Self {
        ControlPlaneConfig {
            idle_timeout_blocks: 30_000,
            output_interval_blocks: 50,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn template_carries_the_configured_defaults() {
        let config = ControlPlaneConfig {
            idle_timeout_blocks: 7,
            output_interval_blocks: 3,
        };
        let template = config.template(42);
        assert_eq!(template.ssrc, 42);
        assert!(template.is_idle());
        assert_eq!(template.idle_timeout_blocks, 7);
        assert_eq!(template.output_interval_blocks, 3);
    }
}
