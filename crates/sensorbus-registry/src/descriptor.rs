//! Sensor and field descriptors.
//!
//! Descriptors mirror the per-sensor metadata files the firmware is
//! generated from. They are plain data; [`crate::SensorRegistry`] validates
//! them and resolves command names once at build time.

use crate::error::{RegistryError, Result};
use sensorbus_protocol::ProtocolConfig;
use serde::{Deserialize, Deserializer, Serialize};

/// Byte order of a multi-byte field.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Endian {
    /// Most significant byte first. The wire default.
    #[default]
    Big,
    /// Least significant byte first.
    Little,
}

/// Layout of one config or payload field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "FieldDocument")]
pub struct FieldDescriptor {
    /// Field name, unique within its list.
    pub name: String,
    /// Command that reads this field, by name.
    pub getter_cmd: Option<String>,
    /// Command that writes this field, by name.
    pub setter_cmd: Option<String>,
    /// Bytes per element (1..=4).
    pub width: usize,
    /// Number of elements. More than one makes the value an array.
    pub count: usize,
    /// Two's complement when set.
    pub signed: bool,
    /// Bit mask applied to unsigned elements after shifting.
    pub mask: Option<u32>,
    /// Right shift applied to unsigned elements before masking.
    pub shift: Option<u32>,
    /// Element byte order.
    pub endian: Endian,
}

/// On-disk shape of a field. Older files spell `width` as `size` and leave
/// signedness to the `type` string.
#[derive(Deserialize)]
struct FieldDocument {
    name: String,
    #[serde(default)]
    getter_cmd: Option<String>,
    #[serde(default)]
    setter_cmd: Option<String>,
    #[serde(alias = "size")]
    width: usize,
    #[serde(default = "default_count")]
    count: usize,
    #[serde(default)]
    signed: Option<bool>,
    #[serde(default, rename = "type")]
    kind: Option<String>,
    #[serde(default, deserialize_with = "deserialize_mask")]
    mask: Option<u32>,
    #[serde(default)]
    shift: Option<u32>,
    #[serde(default)]
    endian: Endian,
}

fn default_count() -> usize {
    1
}

impl From<FieldDocument> for FieldDescriptor {
    fn from(doc: FieldDocument) -> Self {
        let signed = doc.signed.unwrap_or_else(|| {
            doc.kind
                .as_deref()
                .is_some_and(|kind| kind.starts_with("int"))
        });
        FieldDescriptor {
            name: doc.name,
            getter_cmd: doc.getter_cmd,
            setter_cmd: doc.setter_cmd,
            width: doc.width,
            count: doc.count,
            signed,
            mask: doc.mask,
            shift: doc.shift,
            endian: doc.endian,
        }
    }
}

/// Masks are written either as numbers or as hex strings (`"0x1FFF"`).
fn deserialize_mask<'de, D>(deserializer: D) -> std::result::Result<Option<u32>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum MaskRepr {
        Number(u32),
        Text(String),
    }

    match Option::<MaskRepr>::deserialize(deserializer)? {
        None => Ok(None),
        Some(MaskRepr::Number(n)) => Ok(Some(n)),
        Some(MaskRepr::Text(text)) => {
            let text = text.trim();
            if text.is_empty() {
                return Ok(None);
            }
            let digits = text
                .strip_prefix("0x")
                .or_else(|| text.strip_prefix("0X"))
                .unwrap_or(text);
            u32::from_str_radix(digits, 16)
                .map(Some)
                .map_err(|e| serde::de::Error::custom(format!("bad mask {:?}: {}", text, e)))
        }
    }
}

impl FieldDescriptor {
    /// A single unsigned big-endian element of the given width.
    pub fn unsigned(name: impl Into<String>, width: usize) -> Self {
        FieldDescriptor {
            name: name.into(),
            getter_cmd: None,
            setter_cmd: None,
            width,
            count: 1,
            signed: false,
            mask: None,
            shift: None,
            endian: Endian::Big,
        }
    }

    /// A single signed big-endian element of the given width.
    pub fn signed(name: impl Into<String>, width: usize) -> Self {
        FieldDescriptor {
            signed: true,
            ..FieldDescriptor::unsigned(name, width)
        }
    }

    /// Set the element count.
    pub fn with_count(mut self, count: usize) -> Self {
        self.count = count;
        self
    }

    /// Set the getter and setter command names.
    pub fn with_commands(mut self, getter: Option<&str>, setter: Option<&str>) -> Self {
        self.getter_cmd = getter.map(str::to_string);
        self.setter_cmd = setter.map(str::to_string);
        self
    }

    /// Set the post-shift mask.
    pub fn with_mask(mut self, mask: u32) -> Self {
        self.mask = Some(mask);
        self
    }

    /// Set the pre-mask shift.
    pub fn with_shift(mut self, shift: u32) -> Self {
        self.shift = Some(shift);
        self
    }

    /// Set the byte order.
    pub fn with_endian(mut self, endian: Endian) -> Self {
        self.endian = endian;
        self
    }

    /// Bytes the field occupies in a record.
    pub fn byte_len(&self) -> usize {
        self.width * self.count
    }

    /// Decode one element. `bytes` must be exactly `width` long.
    pub fn decode_element(&self, bytes: &[u8]) -> i64 {
        if bytes.is_empty() || bytes.len() > 8 {
            return 0;
        }

        let mut raw: u64 = 0;
        match self.endian {
            Endian::Big => {
                for &b in bytes {
                    raw = (raw << 8) | u64::from(b);
                }
            }
            Endian::Little => {
                for &b in bytes.iter().rev() {
                    raw = (raw << 8) | u64::from(b);
                }
            }
        }

        let bits = (bytes.len() * 8) as u32;
        if self.signed {
            // Sign-extend from the element width.
            let unused = 64 - bits;
            ((raw << unused) as i64) >> unused
        } else {
            let mut value = raw;
            if let Some(shift) = self.shift {
                value = value.checked_shr(shift).unwrap_or(0);
            }
            if let Some(mask) = self.mask {
                value &= u64::from(mask);
            }
            value as i64
        }
    }

    pub(crate) fn validate(&self, sensor: &str) -> Result<()> {
        let invalid = |reason: String| RegistryError::InvalidField {
            sensor: sensor.to_string(),
            field: self.name.clone(),
            reason,
        };

        if !(1..=4).contains(&self.width) {
            return Err(invalid(format!("width must be 1..=4, got {}", self.width)));
        }
        if self.count == 0 {
            return Err(invalid("count must be at least 1".to_string()));
        }
        Ok(())
    }
}

/// Everything the host knows about one sensor type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SensorDescriptor {
    /// Sensor name. Lookups are case-insensitive.
    pub name: String,
    /// Type code used by `ADD_SENSOR` and `LIST_SENSORS`.
    pub type_code: u16,
    /// Configurable fields.
    #[serde(default)]
    pub config_fields: Vec<FieldDescriptor>,
    /// Sample fields. Bit *i* of a payload mask selects entry *i*.
    #[serde(default)]
    pub payload_fields: Vec<FieldDescriptor>,
    /// Payload field indexes enabled by default.
    #[serde(default)]
    pub default_payload_bits: Vec<usize>,
}

/// On-disk shape of a sensor file, where the type code lives in the
/// protocol tables instead.
#[derive(Deserialize)]
struct SensorDocument {
    name: String,
    #[serde(default)]
    type_code: Option<u16>,
    #[serde(default)]
    config_fields: Vec<FieldDescriptor>,
    #[serde(default)]
    payload_fields: Vec<FieldDescriptor>,
    #[serde(default)]
    default_payload_bits: Vec<usize>,
}

impl SensorDescriptor {
    /// Create a descriptor with no fields.
    pub fn new(name: impl Into<String>, type_code: u16) -> Self {
        SensorDescriptor {
            name: name.into(),
            type_code,
            config_fields: Vec::new(),
            payload_fields: Vec::new(),
            default_payload_bits: Vec::new(),
        }
    }

    /// Add a config field.
    pub fn with_config_field(mut self, field: FieldDescriptor) -> Self {
        self.config_fields.push(field);
        self
    }

    /// Add a payload field. Its bit index is its position.
    pub fn with_payload_field(mut self, field: FieldDescriptor) -> Self {
        self.payload_fields.push(field);
        self
    }

    /// Set the default payload field indexes.
    pub fn with_default_bits(mut self, bits: Vec<usize>) -> Self {
        self.default_payload_bits = bits;
        self
    }

    /// Parse a sensor metadata file.
    ///
    /// The type code is taken from the protocol's sensor table, falling back
    /// to a `type_code` key in the document itself.
    pub fn from_json_str(json: &str, protocol: &ProtocolConfig) -> Result<Self> {
        let doc: SensorDocument =
            serde_json::from_str(json).map_err(|e| RegistryError::Json(e.to_string()))?;

        let type_code = protocol
            .sensor_type(&doc.name)
            .or(doc.type_code)
            .ok_or_else(|| RegistryError::MissingTypeCode(doc.name.clone()))?;

        Ok(SensorDescriptor {
            name: doc.name,
            type_code,
            config_fields: doc.config_fields,
            payload_fields: doc.payload_fields,
            default_payload_bits: doc.default_payload_bits,
        })
    }
}
