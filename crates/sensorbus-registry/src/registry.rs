//! Validated sensor lookup tables.

use crate::decode::{decode_samples, Record};
use crate::descriptor::{FieldDescriptor, SensorDescriptor};
use crate::error::{RegistryError, Result};
use sensorbus_protocol::ProtocolConfig;
use std::collections::HashMap;

/// A payload mask is one byte wide.
pub const MAX_PAYLOAD_FIELDS: usize = 8;

/// A config field with its command names resolved to codes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigField {
    descriptor: FieldDescriptor,
    getter: Option<u8>,
    setter: Option<u8>,
}

impl ConfigField {
    /// Field name.
    pub fn name(&self) -> &str {
        &self.descriptor.name
    }

    /// The underlying descriptor.
    pub fn descriptor(&self) -> &FieldDescriptor {
        &self.descriptor
    }

    /// Command code that reads the field.
    pub fn getter(&self) -> Option<u8> {
        self.getter
    }

    /// Command code that writes the field.
    pub fn setter(&self) -> Option<u8> {
        self.setter
    }
}

/// One registered sensor type.
#[derive(Debug, Clone)]
pub struct SensorEntry {
    key: String,
    descriptor: SensorDescriptor,
    config: Vec<ConfigField>,
    config_index: HashMap<String, usize>,
    default_mask: u8,
}

impl SensorEntry {
    fn build(descriptor: SensorDescriptor, protocol: &ProtocolConfig) -> Result<Self> {
        let key = descriptor.name.to_lowercase();

        if descriptor.payload_fields.len() > MAX_PAYLOAD_FIELDS {
            return Err(RegistryError::InvalidField {
                sensor: key,
                field: "payload_fields".to_string(),
                reason: format!(
                    "at most {} payload fields fit a mask, got {}",
                    MAX_PAYLOAD_FIELDS,
                    descriptor.payload_fields.len()
                ),
            });
        }
        for field in &descriptor.payload_fields {
            field.validate(&key)?;
        }

        let resolve = |field: &FieldDescriptor, command: &Option<String>| -> Result<Option<u8>> {
            match command {
                None => Ok(None),
                Some(name) => protocol.commands.lookup(name).map(Some).ok_or_else(|| {
                    RegistryError::UnknownCommand {
                        sensor: key.clone(),
                        field: field.name.clone(),
                        command: name.clone(),
                    }
                }),
            }
        };

        let mut config = Vec::with_capacity(descriptor.config_fields.len());
        let mut config_index = HashMap::new();
        for field in &descriptor.config_fields {
            field.validate(&key)?;
            if config_index.insert(field.name.clone(), config.len()).is_some() {
                return Err(RegistryError::InvalidField {
                    sensor: key.clone(),
                    field: field.name.clone(),
                    reason: "duplicate config field".to_string(),
                });
            }
            config.push(ConfigField {
                descriptor: field.clone(),
                getter: resolve(field, &field.getter_cmd)?,
                setter: resolve(field, &field.setter_cmd)?,
            });
        }

        let default_mask = if descriptor.default_payload_bits.is_empty() {
            all_fields_mask(descriptor.payload_fields.len())
        } else {
            let mut mask = 0u8;
            for &bit in &descriptor.default_payload_bits {
                if bit >= descriptor.payload_fields.len() {
                    return Err(RegistryError::InvalidField {
                        sensor: key.clone(),
                        field: "default_payload_bits".to_string(),
                        reason: format!("bit {} has no payload field", bit),
                    });
                }
                mask |= 1 << bit;
            }
            mask
        };

        Ok(SensorEntry {
            key,
            descriptor,
            config,
            config_index,
            default_mask,
        })
    }

    /// Canonical (lowercase) sensor name.
    pub fn name(&self) -> &str {
        &self.key
    }

    /// Type code used on the wire.
    pub fn type_code(&self) -> u16 {
        self.descriptor.type_code
    }

    /// The descriptor this entry was built from.
    pub fn descriptor(&self) -> &SensorDescriptor {
        &self.descriptor
    }

    /// Config fields in declaration order.
    pub fn config_fields(&self) -> &[ConfigField] {
        &self.config
    }

    /// Look up a config field, if declared.
    pub fn find_config_field(&self, name: &str) -> Option<&ConfigField> {
        self.config_index.get(name).map(|&i| &self.config[i])
    }

    /// Look up a config field.
    pub fn config_field(&self, name: &str) -> Result<&ConfigField> {
        self.find_config_field(name)
            .ok_or_else(|| RegistryError::UnknownField {
                sensor: self.key.clone(),
                field: name.to_string(),
            })
    }

    /// Payload fields in bit order.
    pub fn payload_fields(&self) -> &[FieldDescriptor] {
        &self.descriptor.payload_fields
    }

    /// Mask selecting the default payload fields.
    pub fn default_payload_mask(&self) -> u8 {
        self.default_mask
    }

    /// Decode a sample payload for this sensor.
    pub fn decode(&self, raw: &[u8], mask: u8, tick_bytes: usize) -> Vec<Record> {
        decode_samples(&self.descriptor, raw, mask, tick_bytes)
    }
}

fn all_fields_mask(count: usize) -> u8 {
    (0..count.min(MAX_PAYLOAD_FIELDS)).fold(0u8, |mask, bit| mask | (1 << bit))
}

/// Every sensor type the host can talk to.
///
/// Built once from descriptors and then only read. Name lookups ignore case.
#[derive(Debug, Clone, Default)]
pub struct SensorRegistry {
    sensors: Vec<SensorEntry>,
    by_name: HashMap<String, usize>,
    by_type: HashMap<u16, usize>,
}

impl SensorRegistry {
    /// Validate descriptors and build the lookup tables.
    ///
    /// Fails on duplicate names or type codes, field widths outside 1..=4,
    /// and getter or setter names missing from the protocol's command table.
    pub fn new(
        descriptors: impl IntoIterator<Item = SensorDescriptor>,
        protocol: &ProtocolConfig,
    ) -> Result<Self> {
        let mut registry = SensorRegistry::default();

        for descriptor in descriptors {
            let entry = SensorEntry::build(descriptor, protocol)?;
            let index = registry.sensors.len();

            if registry.by_name.contains_key(entry.name()) {
                return Err(RegistryError::DuplicateSensor(entry.key));
            }
            if registry.by_type.contains_key(&entry.type_code()) {
                return Err(RegistryError::DuplicateTypeCode(entry.type_code()));
            }

            log::debug!(
                "registered sensor {} (type {}, {} config, {} payload fields)",
                entry.name(),
                entry.type_code(),
                entry.config.len(),
                entry.payload_fields().len()
            );
            registry.by_name.insert(entry.key.clone(), index);
            registry.by_type.insert(entry.type_code(), index);
            registry.sensors.push(entry);
        }

        Ok(registry)
    }

    /// Look up a sensor by name, if registered.
    pub fn get(&self, name: &str) -> Option<&SensorEntry> {
        self.by_name
            .get(&name.to_lowercase())
            .map(|&i| &self.sensors[i])
    }

    /// Look up a sensor by name.
    pub fn sensor(&self, name: &str) -> Result<&SensorEntry> {
        self.get(name)
            .ok_or_else(|| RegistryError::UnknownSensor(name.to_string()))
    }

    /// Look up a sensor by type code.
    pub fn by_type(&self, type_code: u16) -> Option<&SensorEntry> {
        self.by_type.get(&type_code).map(|&i| &self.sensors[i])
    }

    /// Name for a type code, or `unknown(<code>)`.
    pub fn name_from_type(&self, type_code: u16) -> String {
        self.by_type(type_code)
            .map(|entry| entry.name().to_string())
            .unwrap_or_else(|| format!("unknown({})", type_code))
    }

    /// Type code for a sensor name.
    pub fn type_code(&self, name: &str) -> Result<u16> {
        self.sensor(name).map(SensorEntry::type_code)
    }

    /// Default payload mask for a sensor name.
    pub fn default_payload_mask(&self, name: &str) -> Result<u8> {
        self.sensor(name).map(SensorEntry::default_payload_mask)
    }

    /// Registered sensor names in registration order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.sensors.iter().map(SensorEntry::name)
    }

    /// Number of registered sensors.
    pub fn len(&self) -> usize {
        self.sensors.len()
    }

    /// Whether no sensors are registered.
    pub fn is_empty(&self) -> bool {
        self.sensors.is_empty()
    }
}
