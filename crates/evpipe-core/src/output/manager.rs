// Evpipe Virtual Device Manager
// Receiver side: one virtual device per announced descriptor, events
// dispatched by handshake index

use std::io::BufRead;

use crate::protocol::{DeviceDescriptor, EventMessage, ProtocolError, ProtocolReader};

/// Result type for output operations
pub type OutputResult<T> = Result<T, OutputError>;

/// Errors that can occur on the receiving side
#[derive(Debug, thiserror::Error)]
pub enum OutputError {
    #[error("Event for device {index}, but only {count} device(s) were announced")]
    OutOfRangeIndex { index: u32, count: usize },

    #[error("Descriptor {0:?} declares the synchronization event type")]
    SyncCapability(String),

    #[error("Failed to create virtual device: {0}")]
    DeviceCreation(String),

    #[error("Failed to write event: {0}")]
    WriteError(String),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

/// An injectable virtual input device.
pub trait VirtualInput {
    /// Write one `(type, code, value)` triple and commit it.
    fn inject(&mut self, event_type: u16, code: u16, value: i32) -> OutputResult<()>;
}

/// Creates virtual devices from handshake descriptors.
pub trait VirtualDeviceFactory {
    fn create(&mut self, descriptor: &DeviceDescriptor) -> OutputResult<Box<dyn VirtualInput>>;
}

/// Owns the virtual devices of one session.
pub struct VirtualDeviceManager {
    devices: Vec<Box<dyn VirtualInput>>,
    names: Vec<String>,
}

impl VirtualDeviceManager {
    /// Create one device per descriptor, in order.
    ///
    /// Every descriptor is validated before any device is created.
    pub fn from_descriptors(
        descriptors: &[DeviceDescriptor],
        factory: &mut dyn VirtualDeviceFactory,
    ) -> OutputResult<Self> {
        if let Some(bad) = descriptors.iter().find(|d| d.has_sync_capability()) {
            return Err(OutputError::SyncCapability(bad.name.clone()));
        }
        for descriptor in descriptors {
            if let Some((event_type, code)) = descriptor.out_of_range_code() {
                return Err(OutputError::Protocol(ProtocolError::MalformedDescriptor(format!(
                    "{:?} declares code {} beyond the range of event type {}",
                    descriptor.name, code, event_type
                ))));
            }
        }

        let mut devices = Vec::with_capacity(descriptors.len());
        for descriptor in descriptors {
            devices.push(factory.create(descriptor)?);
            log::info!("Created virtual device {:?}", descriptor.name);
        }

        Ok(Self {
            devices,
            names: descriptors.iter().map(|d| d.name.clone()).collect(),
        })
    }

    /// Read the handshake from `reader` and create its devices.
    pub fn from_handshake<R: BufRead>(
        reader: &mut ProtocolReader<R>,
        factory: &mut dyn VirtualDeviceFactory,
    ) -> OutputResult<Self> {
        let descriptors = reader.read_handshake()?;
        Self::from_descriptors(&descriptors, factory)
    }

    pub fn device_count(&self) -> usize {
        self.devices.len()
    }

    pub fn device_names(&self) -> &[String] {
        &self.names
    }

    /// Route one event to its device.
    pub fn dispatch(&mut self, event: &EventMessage) -> OutputResult<()> {
        let count = self.devices.len();
        let device = self
            .devices
            .get_mut(event.device_index as usize)
            .ok_or(OutputError::OutOfRangeIndex {
                index: event.device_index,
                count,
            })?;
        device.inject(event.event_type, event.code, event.value)
    }
}

/// Run a whole receiving session: handshake, device creation, then event
/// dispatch until end-of-stream. Returns the number of events injected.
pub fn receive_session<R: BufRead>(
    input: R,
    factory: &mut dyn VirtualDeviceFactory,
) -> OutputResult<u64> {
    let mut reader = ProtocolReader::new(input);
    let mut manager = VirtualDeviceManager::from_handshake(&mut reader, factory)?;
    log::info!("Device created");

    let mut injected = 0;
    while let Some(event) = reader.next_event()? {
        manager.dispatch(&event)?;
        injected += 1;
    }

    log::info!("Input stream closed after {} event(s)", injected);
    Ok(injected)
}
