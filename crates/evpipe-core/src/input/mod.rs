// Evpipe Input Layer
// Raw record decoding and physical device handles

pub mod codes;
mod device;
mod record;

#[cfg(feature = "evdev-backend")]
pub use device::{find_device_by_name, list_devices, read_capabilities};
pub use device::{DeviceError, DeviceInfo, DeviceResult, GrabPolicy, SourceDevice};
pub use record::{EventRecord, RawEventReader, RecordError, RECORD_SIZE};
