// Evpipe Core Library
// Relays input device events between hosts over a line-based byte stream

pub mod delivery;
pub mod event;
pub mod input;
pub mod output;
pub mod protocol;
pub mod settings;
pub mod translate;

pub use delivery::{CommandLauncher, DeliveryChannel, DeliveryError};
pub use event::{EventLoopError, LoopExit, SourceLoop};
pub use input::{DeviceError, EventRecord, GrabPolicy, RawEventReader, RecordError, SourceDevice};
pub use output::{receive_session, OutputError, VirtualDeviceFactory, VirtualDeviceManager};
pub use protocol::{
    DeviceDescriptor, EventMessage, Handshake, ProtocolError, ProtocolReader, PROTOCOL_VERSION,
};
pub use settings::{Settings, SettingsError};
pub use translate::{GrabRequest, Passthrough, RecordHandler, RemoteProfile, Translator};
