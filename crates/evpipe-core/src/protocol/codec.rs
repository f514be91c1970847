// Evpipe Protocol Codec
// Line framing for the handshake and event stream
//
// Stream layout, one message per line:
//   2
//   [{descriptor}, {descriptor}, ...]
//   [device_index, type, code, value]
//   ...

use std::io::BufRead;

use super::descriptor::{decode_descriptor_list, encode_descriptor_list, DeviceDescriptor};
use super::error::{ProtocolError, ProtocolResult};

/// Protocol version compiled into this build. Peers must match exactly.
pub const PROTOCOL_VERSION: &str = "2";

/// One event addressed to a device announced in the handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventMessage {
    pub device_index: u32,
    pub event_type: u16,
    pub code: u16,
    pub value: i32,
}

impl EventMessage {
    pub fn new(device_index: u32, event_type: u16, code: u16, value: i32) -> Self {
        Self {
            device_index,
            event_type,
            code,
            value,
        }
    }

    /// Encode as `[device_index, type, code, value]`.
    pub fn encode(&self) -> String {
        format!(
            "[{}, {}, {}, {}]",
            self.device_index, self.event_type, self.code, self.value
        )
    }

    /// Strictly decode an event line: exactly four integers in range.
    pub fn decode(line: &str) -> ProtocolResult<Self> {
        let (device_index, event_type, code, value): (u32, u16, u16, i32) =
            serde_json::from_str(line)
                .map_err(|e| ProtocolError::MalformedEvent(format!("{}: {:?}", e, line)))?;
        Ok(Self::new(device_index, event_type, code, value))
    }
}

/// A single protocol message.
#[derive(Debug, Clone, PartialEq)]
pub enum ProtocolMessage {
    VersionHandshake(String),
    DeviceList(Vec<DeviceDescriptor>),
    Event(EventMessage),
}

impl ProtocolMessage {
    /// Encode as one line of text, without the trailing newline.
    pub fn encode(&self) -> ProtocolResult<String> {
        match self {
            ProtocolMessage::VersionHandshake(version) => Ok(version.clone()),
            ProtocolMessage::DeviceList(descriptors) => encode_descriptor_list(descriptors),
            ProtocolMessage::Event(event) => Ok(event.encode()),
        }
    }
}

/// Pre-encoded handshake lines, kept for replay to a fresh consumer.
#[derive(Debug, Clone, PartialEq)]
pub struct Handshake {
    descriptors: Vec<DeviceDescriptor>,
    version_line: String,
    devices_line: String,
}

impl Handshake {
    pub fn new(descriptors: Vec<DeviceDescriptor>) -> ProtocolResult<Self> {
        let devices_line = encode_descriptor_list(&descriptors)?;
        Ok(Self {
            descriptors,
            version_line: PROTOCOL_VERSION.to_string(),
            devices_line,
        })
    }

    pub fn descriptors(&self) -> &[DeviceDescriptor] {
        &self.descriptors
    }

    pub fn device_count(&self) -> usize {
        self.descriptors.len()
    }

    /// The two handshake lines, version first.
    pub fn lines(&self) -> [&str; 2] {
        [&self.version_line, &self.devices_line]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReadState {
    AwaitVersion,
    AwaitDevices,
    Streaming,
}

/// Decoder for the receiving end of the stream.
///
/// Enforces message order: one version line, one device list, then events.
pub struct ProtocolReader<R> {
    inner: R,
    state: ReadState,
    line: String,
}

impl<R: BufRead> ProtocolReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            state: ReadState::AwaitVersion,
            line: String::new(),
        }
    }

    /// Read the handshake and return the announced devices.
    ///
    /// A version mismatch fails before the device list line is read.
    pub fn read_handshake(&mut self) -> ProtocolResult<Vec<DeviceDescriptor>> {
        loop {
            match self.next_message()? {
                Some(ProtocolMessage::VersionHandshake(_)) => continue,
                Some(ProtocolMessage::DeviceList(descriptors)) => return Ok(descriptors),
                Some(ProtocolMessage::Event(_)) | None => {
                    return Err(ProtocolError::UnexpectedEof("device list"))
                }
            }
        }
    }

    /// Read the next event. `None` at end-of-stream.
    pub fn next_event(&mut self) -> ProtocolResult<Option<EventMessage>> {
        loop {
            match self.next_message()? {
                Some(ProtocolMessage::Event(event)) => return Ok(Some(event)),
                Some(_) => continue,
                None => return Ok(None),
            }
        }
    }

    /// Decode the next message according to the stream position.
    pub fn next_message(&mut self) -> ProtocolResult<Option<ProtocolMessage>> {
        let state = self.state;
        self.line.clear();
        if self.inner.read_line(&mut self.line)? == 0 {
            return match state {
                ReadState::AwaitVersion => Err(ProtocolError::UnexpectedEof("version line")),
                ReadState::AwaitDevices => Err(ProtocolError::UnexpectedEof("device list")),
                ReadState::Streaming => Ok(None),
            };
        }
        let line = self.line.trim_end_matches(['\n', '\r']);

        match state {
            ReadState::AwaitVersion => {
                if line != PROTOCOL_VERSION {
                    return Err(ProtocolError::VersionMismatch {
                        expected: PROTOCOL_VERSION.to_string(),
                        got: line.to_string(),
                    });
                }
                self.state = ReadState::AwaitDevices;
                Ok(Some(ProtocolMessage::VersionHandshake(line.to_string())))
            }
            ReadState::AwaitDevices => {
                let descriptors = decode_descriptor_list(line)?;
                self.state = ReadState::Streaming;
                Ok(Some(ProtocolMessage::DeviceList(descriptors)))
            }
            ReadState::Streaming => Ok(Some(ProtocolMessage::Event(EventMessage::decode(line)?))),
        }
    }

    pub fn into_inner(self) -> R {
        self.inner
    }
}
