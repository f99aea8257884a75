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

//! Named parameter bundles (§3 "Presets", §4.7 "PRESET" tag).
//!
//! Presets are loaded once, externally, and passed in as an immutable
//! context (§9 "Global preset table and default sockets"); this module
//! only defines the table and lookup, not where the entries came from.

use std::collections::BTreeMap;

use crate::control::tlv::{Tag, Value};

/// A read-only table of named tag bundles. Applying a preset overwrites
/// the tags it lists; a later explicit tag in the same command packet
/// may override them back (§3, §8 scenario 3).
#[derive(Debug, Clone, Default)]
pub struct PresetTable {
    presets: BTreeMap<String, Vec<(Tag, Value)>>,
}

impl PresetTable {
    /// An empty preset table.
    pub fn new() -> Self {
        PresetTable {
            presets: BTreeMap::new(),
        }
    }

    /// Registers (or replaces) a preset's tag bundle.
    pub fn insert(&mut self, name: impl Into<String>, tags: Vec<(Tag, Value)>) {
        self.presets.insert(name.into(), tags);
    }

    /// Looks up a preset's tag bundle by name.
    pub fn get(&self, name: &str) -> Option<&[(Tag, Value)]> {
        self.presets.get(name).map(Vec::as_slice)
    }

    /// Number of registered presets.
    pub fn len(&self) -> usize {
        self.presets.len()
    }

    /// True if no presets are registered.
    pub fn is_empty(&self) -> bool {
        self.presets.is_empty()
    }

    /// A small table of conventional presets (narrowband FM, SSB voice,
    /// FT8), useful as a starting configuration and in tests; real
    /// deployments load their own table from the process's
    /// configuration (out of scope for this crate, §1).
    pub fn with_common_defaults() -> Self {
        let mut table = PresetTable::new();
        table.insert(
            "fm",
            vec![
                (Tag::DemodType, Value::Byte(0)), // NBFM discriminant
                (Tag::LowEdge, Value::Float64(-8000.0)),
                (Tag::HighEdge, Value::Float64(8000.0)),
                (Tag::SquelchOpen, Value::Float32(8.0)),
                (Tag::SquelchClose, Value::Float32(6.0)),
            ],
        );
        table.insert(
            "usb",
            vec![
                (Tag::DemodType, Value::Byte(2)), // Linear discriminant
                (Tag::LowEdge, Value::Float64(300.0)),
                (Tag::HighEdge, Value::Float64(2800.0)),
                (Tag::Envelope, Value::Bool(false)),
            ],
        );
        table.insert(
            "ft8",
            vec![
                (Tag::DemodType, Value::Byte(2)),
                (Tag::LowEdge, Value::Float64(-3000.0)),
                (Tag::HighEdge, Value::Float64(3000.0)),
                (Tag::Envelope, Value::Bool(false)),
            ],
        );
        table
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_misses_return_none() {
        let table = PresetTable::new();
        assert!(table.get("fm").is_none());
    }

    #[test]
    fn common_defaults_include_fm_and_ft8() {
        let table = PresetTable::with_common_defaults();
        assert!(table.get("fm").is_some());
        assert!(table.get("ft8").is_some());
        assert_eq!(table.len(), 3);
    }

    #[test]
    fn insert_replaces_existing_preset() {
        let mut table = PresetTable::new();
        table.insert("x", vec![(Tag::Gain, Value::Float32(1.0))]);
        table.insert("x", vec![(Tag::Gain, Value::Float32(2.0))]);
        assert_eq!(table.get("x").unwrap(), &[(Tag::Gain, Value::Float32(2.0))]);
    }
}
