//! Sample payload decoding.
//!
//! A `READ_SAMPLES` payload is a run of back-to-back records:
//!
//! ```text
//! +----------------+-----------------+-----------------+-----
//! | tick (BE, N B) | field a (if on) | field c (if on) | ...   next record
//! +----------------+-----------------+-----------------+-----
//! ```
//!
//! Which fields a record carries is decided by the payload mask, not by
//! anything in the bytes themselves.

use crate::descriptor::{FieldDescriptor, SensorDescriptor};
use serde::ser::{SerializeMap, Serializer};
use serde::Serialize;

/// A decoded field value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum FieldValue {
    /// A single integer.
    Scalar(i64),
    /// An ordered list of integers, for fields with `count > 1`.
    Array(Vec<i64>),
}

impl FieldValue {
    /// Get the value if it is a scalar.
    pub fn as_scalar(&self) -> Option<i64> {
        match self {
            FieldValue::Scalar(v) => Some(*v),
            FieldValue::Array(_) => None,
        }
    }

    /// Get the elements if it is an array.
    pub fn as_array(&self) -> Option<&[i64]> {
        match self {
            FieldValue::Scalar(_) => None,
            FieldValue::Array(values) => Some(values),
        }
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        FieldValue::Scalar(value)
    }
}

impl std::fmt::Display for FieldValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FieldValue::Scalar(v) => write!(f, "{}", v),
            FieldValue::Array(values) => {
                write!(f, "[")?;
                for (i, v) in values.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", v)?;
                }
                write!(f, "]")
            }
        }
    }
}

/// One timestamped sample.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    /// Board tick at which the sample was taken.
    pub tick: u32,
    /// Selected fields in declaration order.
    pub fields: Vec<(String, FieldValue)>,
}

impl Record {
    /// Look up a field by name.
    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.fields
            .iter()
            .find(|(field, _)| field == name)
            .map(|(_, value)| value)
    }

    /// Number of fields, not counting the tick.
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Whether the record carries only a tick.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

// Serializes as a flat map: {"tick": .., "field": .., ...}
impl Serialize for Record {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.fields.len() + 1))?;
        map.serialize_entry("tick", &self.tick)?;
        for (name, value) in &self.fields {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}

impl FieldDescriptor {
    /// Decode a whole field. `chunk` must be exactly [`byte_len`] long.
    ///
    /// [`byte_len`]: FieldDescriptor::byte_len
    pub fn decode_value(&self, chunk: &[u8]) -> FieldValue {
        if self.count == 1 {
            FieldValue::Scalar(self.decode_element(chunk))
        } else {
            FieldValue::Array(
                chunk
                    .chunks_exact(self.width)
                    .map(|element| self.decode_element(element))
                    .collect(),
            )
        }
    }
}

/// Decode every complete record in a sample payload.
///
/// Parsing stops when fewer than `tick_bytes` bytes remain. If a selected
/// field runs past the end of the buffer the record it belongs to is
/// dropped and parsing stops; records already completed are returned.
pub fn decode_samples(
    descriptor: &SensorDescriptor,
    raw: &[u8],
    mask: u8,
    tick_bytes: usize,
) -> Vec<Record> {
    let mut records = Vec::new();
    if tick_bytes == 0 {
        return records;
    }

    let selected: Vec<&FieldDescriptor> = descriptor
        .payload_fields
        .iter()
        .enumerate()
        .filter(|(i, _)| *i < 8 && mask & (1u8 << *i) != 0)
        .map(|(_, field)| field)
        .collect();

    let mut offset = 0;
    'records: while raw.len() - offset >= tick_bytes {
        let tick = raw[offset..offset + tick_bytes]
            .iter()
            .fold(0u32, |acc, &b| acc.wrapping_shl(8) | u32::from(b));
        offset += tick_bytes;

        let mut fields = Vec::with_capacity(selected.len());
        for field in &selected {
            let len = field.byte_len();
            if raw.len() - offset < len {
                log::debug!(
                    "{}: field {} truncated ({} of {} bytes), dropping partial record",
                    descriptor.name,
                    field.name,
                    raw.len() - offset,
                    len
                );
                break 'records;
            }
            fields.push((
                field.name.clone(),
                field.decode_value(&raw[offset..offset + len]),
            ));
            offset += len;
        }

        records.push(Record { tick, fields });
    }

    records
}
