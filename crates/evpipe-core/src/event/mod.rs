// Evpipe Event Handling
// Source-side loop driving devices, handlers and delivery

pub mod r#loop;

pub use r#loop::{EventLoopError, EventLoopResult, LoopExit, SourceLoop};
