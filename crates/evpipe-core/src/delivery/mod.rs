// Evpipe Delivery Layer
// Output of encoded lines to stdout or a restartable consumer process

mod channel;
mod process;

pub use channel::{DeliveryChannel, DeliveryError, DeliveryResult};
pub use process::{ChildConsumer, CommandLauncher, Consumer, Launcher};
