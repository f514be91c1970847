// Evpipe Output Layer
// Receiver side virtual devices

mod manager;
#[cfg(feature = "evdev-backend")]
mod uinput;

pub use manager::{
    receive_session, OutputError, OutputResult, VirtualDeviceFactory, VirtualDeviceManager,
    VirtualInput,
};
#[cfg(feature = "evdev-backend")]
pub use uinput::{UinputDevice, UinputFactory, VIRTUAL_NAME_SUFFIX};
