//! Host-side caches of config values and payload masks.
//!
//! Entries are filled on the first successful read and overwritten only by a
//! successful write. Nothing expires them: they reflect what the host last
//! saw, not necessarily what the board holds now.

use sensorbus_registry::FieldValue;
use std::collections::HashMap;

/// Config values per (board, address, sensor) and masks per (board, address).
#[derive(Debug, Default)]
pub struct FieldCache {
    config: HashMap<(u8, u8, String), HashMap<String, FieldValue>>,
    masks: HashMap<(u8, u8), u8>,
}

impl FieldCache {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached value of a config field.
    pub fn config(&self, board: u8, addr: u8, sensor: &str, field: &str) -> Option<&FieldValue> {
        self.config
            .get(&(board, addr, sensor.to_string()))
            .and_then(|fields| fields.get(field))
    }

    /// Record a config value.
    pub fn store_config(
        &mut self,
        board: u8,
        addr: u8,
        sensor: &str,
        field: &str,
        value: FieldValue,
    ) {
        self.config
            .entry((board, addr, sensor.to_string()))
            .or_default()
            .insert(field.to_string(), value);
    }

    /// Cached payload mask.
    pub fn mask(&self, board: u8, addr: u8) -> Option<u8> {
        self.masks.get(&(board, addr)).copied()
    }

    /// Record a payload mask.
    pub fn store_mask(&mut self, board: u8, addr: u8, mask: u8) {
        self.masks.insert((board, addr), mask);
    }
}
