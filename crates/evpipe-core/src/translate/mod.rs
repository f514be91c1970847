// Evpipe Translation Layer
// Converts raw device records into protocol events

pub mod engine;
pub mod tables;

use smallvec::SmallVec;

use crate::input::EventRecord;
use crate::protocol::EventMessage;

pub use engine::{RemoteProfile, Translator, TranslatorState, KEYBOARD_INDEX, MOUSE_INDEX};
pub use tables::{RemapEntry, RemapTable};

/// Change of exclusive access requested by a handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GrabRequest {
    Acquire,
    Release,
}

/// Output of handling one record.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Translation {
    /// Wire events, in emission order
    pub events: SmallVec<[EventMessage; 4]>,
    /// Grab change to apply to the source device
    pub grab: Option<GrabRequest>,
}

impl Translation {
    pub fn is_empty(&self) -> bool {
        self.events.is_empty() && self.grab.is_none()
    }
}

/// Turns the records of one source device into wire events.
pub trait RecordHandler {
    fn handle(&mut self, record: &EventRecord) -> Translation;
}

/// Forwards every record unchanged under a fixed device index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Passthrough {
    device_index: u32,
}

impl Passthrough {
    pub fn new(device_index: u32) -> Self {
        Self { device_index }
    }
}

impl RecordHandler for Passthrough {
    fn handle(&mut self, record: &EventRecord) -> Translation {
        let mut out = Translation::default();
        out.events.push(EventMessage::new(
            self.device_index,
            record.event_type,
            record.code,
            record.value,
        ));
        out
    }
}
