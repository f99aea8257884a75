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

//! The channel registry: the sole authority mapping ssrc to channel
//! (§3, §9 "Cyclic references").
//!
//! The registry is read-mostly: lookups (every command dispatch, every
//! status tick) take a read lock, while creation and teardown take a
//! write lock. Per §9's Open Question on simultaneous commands to a
//! creating channel, the conservative choice is implemented here:
//! creation runs entirely under the write lock, so a second command for
//! the same new ssrc either sees the channel already present or blocks
//! behind the writer — it can never race the creation itself.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::channel::Channel;

/// ssrc `0` is reserved (template, never a real channel), per §3.
pub const SSRC_RESERVED_TEMPLATE: u32 = 0;
/// ssrc `0xFFFFFFFF` is reserved as the "all channels" broadcast address.
pub const SSRC_BROADCAST: u32 = 0xFFFF_FFFF;

/// Returns true if `ssrc` is one of the two reserved values that never
/// name a real channel.
pub fn is_reserved(ssrc: u32) -> bool {
    ssrc == SSRC_RESERVED_TEMPLATE || ssrc == SSRC_BROADCAST
}

/// The shared ssrc -> channel map.
#[derive(Default)]
pub struct Registry {
    channels: RwLock<HashMap<u32, Arc<Channel>>>,
}

impl Registry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Registry {
            channels: RwLock::new(HashMap::new()),
        }
    }

    /// Looks up a channel by ssrc.
    pub fn get(&self, ssrc: u32) -> Option<Arc<Channel>> {
        self.channels
            .read()
            .expect("registry read lock poisoned")
            .get(&ssrc)
            .cloned()
    }

    /// Returns a snapshot of every registered channel, for broadcast
    /// dispatch (§4.7 "ssrc == 0xFFFFFFFF") and the periodic status
    /// cadencer.
    pub fn snapshot(&self) -> Vec<Arc<Channel>> {
        self.channels
            .read()
            .expect("registry read lock poisoned")
            .values()
            .cloned()
            .collect()
    }

    /// Inserts a newly created channel under `ssrc`, failing if one
    /// already exists (the caller must have already resolved the
    /// existing-vs-create decision via [`Registry::get`] before calling
    /// this, all under the same write-lock critical section via
    /// [`Registry::get_or_create`]).
    pub fn insert(&self, ssrc: u32, channel: Arc<Channel>) {
        self.channels
            .write()
            .expect("registry write lock poisoned")
            .insert(ssrc, channel);
    }

    /// Removes `ssrc` from the registry, releasing it for reuse, per
    /// §3's teardown sequence ("ssrc is released").
    pub fn remove(&self, ssrc: u32) -> Option<Arc<Channel>> {
        self.channels
            .write()
            .expect("registry write lock poisoned")
            .remove(&ssrc)
    }

    /// Looks up `ssrc`, or atomically creates it via `make` if absent.
    /// The entire lookup-or-create runs under the write lock, which is
    /// what makes channel creation serialize against a simultaneous
    /// second command for the same ssrc (§9's Open Question).
    pub fn get_or_create<F>(&self, ssrc: u32, make: F) -> (Arc<Channel>, bool)
    where
        F: FnOnce() -> Arc<Channel>,
    {
        let mut guard = self.channels.write().expect("registry write lock poisoned");
        if let Some(existing) = guard.get(&ssrc) {
            return (Arc::clone(existing), false);
        }
        let created = make();
        guard.insert(ssrc, Arc::clone(&created));
        (created, true)
    }

    /// Number of channels currently registered.
    pub fn len(&self) -> usize {
        self.channels.read().expect("registry read lock poisoned").len()
    }

    /// True if no channels are registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::test_support::test_channel;

    #[test]
    fn reserved_ssrcs_are_identified() {
        assert!(is_reserved(SSRC_RESERVED_TEMPLATE));
        assert!(is_reserved(SSRC_BROADCAST));
        assert!(!is_reserved(42));
    }

    #[test]
    fn get_returns_none_for_unknown_ssrc() {
        let registry = Registry::new();
        assert!(registry.get(42).is_none());
    }

    #[test]
    fn get_or_create_only_creates_once() {
        let registry = Registry::new();
        let mut creations = 0;
        let (_a, created_a) = registry.get_or_create(7, || {
            creations += 1;
            Arc::new(test_channel(7))
        });
        assert!(created_a);
        let (_b, created_b) = registry.get_or_create(7, || {
            creations += 1;
            Arc::new(test_channel(7))
        });
        assert!(!created_b);
        assert_eq!(creations, 1);
    }

    #[test]
    fn remove_releases_the_ssrc_for_reuse() {
        let registry = Registry::new();
        registry.insert(7, Arc::new(test_channel(7)));
        assert_eq!(registry.len(), 1);
        assert!(registry.remove(7).is_some());
        assert!(registry.is_empty());
        registry.insert(7, Arc::new(test_channel(7)));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn snapshot_reflects_current_membership() {
        let registry = Registry::new();
        registry.insert(1, Arc::new(test_channel(1)));
        registry.insert(2, Arc::new(test_channel(2)));
        assert_eq!(registry.snapshot().len(), 2);
    }
}
