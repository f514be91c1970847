// Evpipe Protocol Layer
// Handshake, capability descriptors and event line framing

pub mod codec;
pub mod descriptor;
mod error;

pub use codec::{EventMessage, Handshake, ProtocolMessage, ProtocolReader, PROTOCOL_VERSION};
pub use descriptor::{
    decode_descriptor, decode_descriptor_list, encode_descriptor, encode_descriptor_list,
    AbsAxisInfo, Capability, DeviceDescriptor,
};
pub use error::{ProtocolError, ProtocolResult};
