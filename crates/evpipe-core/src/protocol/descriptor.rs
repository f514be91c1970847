// Evpipe Capability Descriptors
// Device capability model and its JSON wire form
//
// Wire shape of one descriptor:
//   {"name": "...", "capabilities": {"1": [30, 31], "3": [[0, {axis info}]]},
//    "vendor": 1, "product": 2}

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use super::error::{ProtocolError, ProtocolResult};
use crate::input::codes::{code_limit, EV_SYN};

/// Range description of one absolute axis (kernel `input_absinfo`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "AbsAxisInfoRepr")]
pub struct AbsAxisInfo {
    pub value: i32,
    pub min: i32,
    pub max: i32,
    pub fuzz: i32,
    pub flat: i32,
    pub resolution: i32,
}

impl AbsAxisInfo {
    /// Axis spanning `min..=max` with the given resolution and no fuzz/flat.
    pub fn range(min: i32, max: i32, resolution: i32) -> Self {
        Self {
            value: 0,
            min,
            max,
            fuzz: 0,
            flat: 0,
            resolution,
        }
    }
}

/// Accepted spellings of axis info: named fields, or the positional
/// `[value, min, max, fuzz, flat, resolution]` array.
#[derive(Deserialize)]
#[serde(untagged)]
enum AbsAxisInfoRepr {
    Fields(AbsAxisFields),
    Positional([i32; 6]),
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct AbsAxisFields {
    value: i32,
    min: i32,
    max: i32,
    fuzz: i32,
    flat: i32,
    resolution: i32,
}

impl From<AbsAxisInfoRepr> for AbsAxisInfo {
    fn from(repr: AbsAxisInfoRepr) -> Self {
        match repr {
            AbsAxisInfoRepr::Fields(f) => Self {
                value: f.value,
                min: f.min,
                max: f.max,
                fuzz: f.fuzz,
                flat: f.flat,
                resolution: f.resolution,
            },
            AbsAxisInfoRepr::Positional([value, min, max, fuzz, flat, resolution]) => Self {
                value,
                min,
                max,
                fuzz,
                flat,
                resolution,
            },
        }
    }
}

/// One supported code of an event type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Capability {
    /// Key, button, relative axis or misc code
    Simple(u16),
    /// Absolute axis code with its range
    AbsAxis(u16, AbsAxisInfo),
}

impl Capability {
    pub fn code(&self) -> u16 {
        match self {
            Capability::Simple(code) | Capability::AbsAxis(code, _) => *code,
        }
    }
}

/// Declared capability set of one device, as carried in the handshake.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceDescriptor {
    pub name: String,
    /// Event type -> supported codes, in declaration order
    pub capabilities: IndexMap<u16, Vec<Capability>>,
    pub vendor: u16,
    pub product: u16,
}

impl DeviceDescriptor {
    pub fn new(name: impl Into<String>, vendor: u16, product: u16) -> Self {
        Self {
            name: name.into(),
            capabilities: IndexMap::new(),
            vendor,
            product,
        }
    }

    /// Append simple codes under an event type. EV_SYN is ignored.
    pub fn with_codes(mut self, event_type: u16, codes: impl IntoIterator<Item = u16>) -> Self {
        if event_type != EV_SYN {
            self.capabilities
                .entry(event_type)
                .or_default()
                .extend(codes.into_iter().map(Capability::Simple));
        }
        self
    }

    /// Append one absolute axis under `event_type`.
    pub fn with_abs_axis(mut self, event_type: u16, code: u16, info: AbsAxisInfo) -> Self {
        if event_type != EV_SYN {
            self.capabilities
                .entry(event_type)
                .or_default()
                .push(Capability::AbsAxis(code, info));
        }
        self
    }

    /// Whether the synchronization type is declared as a capability.
    pub fn has_sync_capability(&self) -> bool {
        self.capabilities.contains_key(&EV_SYN)
    }

    /// First `(type, code)` beyond the kernel's code range for its type.
    pub fn out_of_range_code(&self) -> Option<(u16, u16)> {
        self.capabilities.iter().find_map(|(&event_type, caps)| {
            let limit = code_limit(event_type)?;
            caps.iter()
                .map(Capability::code)
                .find(|&code| code >= limit)
                .map(|code| (event_type, code))
        })
    }

    /// Codes declared under an event type.
    pub fn codes(&self, event_type: u16) -> impl Iterator<Item = u16> + '_ {
        self.capabilities
            .get(&event_type)
            .into_iter()
            .flatten()
            .map(Capability::code)
    }

    pub fn supports(&self, event_type: u16, code: u16) -> bool {
        self.codes(event_type).any(|c| c == code)
    }
}

/// Encode one descriptor as a JSON object.
pub fn encode_descriptor(descriptor: &DeviceDescriptor) -> ProtocolResult<String> {
    serde_json::to_string(descriptor).map_err(|e| ProtocolError::MalformedDescriptor(e.to_string()))
}

/// Decode one descriptor from a JSON object.
pub fn decode_descriptor(json: &str) -> ProtocolResult<DeviceDescriptor> {
    serde_json::from_str(json).map_err(|e| ProtocolError::MalformedDescriptor(e.to_string()))
}

/// Encode the handshake's device list as a single JSON array.
pub fn encode_descriptor_list(descriptors: &[DeviceDescriptor]) -> ProtocolResult<String> {
    serde_json::to_string(descriptors).map_err(|e| ProtocolError::MalformedDescriptor(e.to_string()))
}

/// Decode the handshake's device list.
pub fn decode_descriptor_list(json: &str) -> ProtocolResult<Vec<DeviceDescriptor>> {
    serde_json::from_str(json).map_err(|e| ProtocolError::MalformedDescriptor(e.to_string()))
}
