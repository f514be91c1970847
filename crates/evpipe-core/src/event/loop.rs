// Evpipe Source Event Loop
// Single-threaded poll over the source devices feeding the delivery channel

use std::fs::File;
use std::io::{self, Read};
use std::os::unix::io::AsRawFd;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::delivery::{DeliveryChannel, DeliveryError};
use crate::input::{DeviceError, GrabPolicy, SourceDevice};
use crate::translate::{GrabRequest, RecordHandler};

/// Result type for event loop operations
pub type EventLoopResult<T> = Result<T, EventLoopError>;

/// Errors that end the source loop
#[derive(Debug, thiserror::Error)]
pub enum EventLoopError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error(transparent)]
    Device(#[from] DeviceError),

    #[error(transparent)]
    Delivery(#[from] DeliveryError),
}

/// Why the loop returned without error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoopExit {
    /// A source device reached end-of-stream
    EndOfStream(String),
    /// The running flag was cleared
    Stopped,
}

struct Source<H: Read + AsRawFd> {
    device: SourceDevice<H>,
    handler: Box<dyn RecordHandler>,
    /// Whether handler grab requests are honored
    exclusive: bool,
}

/// Drives every source device from one thread.
///
/// Each wake-up reads exactly one record from each ready device, so a slow
/// consumer (or a respawn in progress) stalls reading instead of queueing.
/// Devices are ungrabbed when the loop is dropped.
pub struct SourceLoop<H: Read + AsRawFd = File> {
    sources: Vec<Source<H>>,
    poll_fds: Vec<libc::pollfd>,
    grab_policy: GrabPolicy,
}

impl<H: Read + AsRawFd> SourceLoop<H> {
    pub fn new(grab_policy: GrabPolicy) -> Self {
        Self {
            sources: Vec::new(),
            poll_fds: Vec::new(),
            grab_policy,
        }
    }

    /// Register a device with its handler. With `exclusive` set the device is
    /// grabbed now and the handler may toggle the grab later.
    pub fn add_device(
        &mut self,
        mut device: SourceDevice<H>,
        handler: Box<dyn RecordHandler>,
        exclusive: bool,
    ) -> EventLoopResult<()> {
        if exclusive {
            device.grab_with_retry(self.grab_policy)?;
        }
        self.poll_fds.push(libc::pollfd {
            fd: device.as_raw_fd(),
            events: libc::POLLIN,
            revents: 0,
        });
        self.sources.push(Source {
            device,
            handler,
            exclusive,
        });
        Ok(())
    }

    pub fn device_count(&self) -> usize {
        self.sources.len()
    }

    /// Run until a device ends, the flag clears, or a fatal error occurs.
    ///
    /// # Arguments
    /// * `channel` - Where translated events are delivered
    /// * `running` - Checked after every wake-up
    /// * `timeout_ms` - Poll timeout bounding how long a stop request can wait
    pub fn run(
        &mut self,
        channel: &mut DeliveryChannel,
        running: &AtomicBool,
        timeout_ms: i32,
    ) -> EventLoopResult<LoopExit> {
        while running.load(Ordering::SeqCst) {
            if !self.poll(timeout_ms)? {
                continue;
            }

            for index in 0..self.sources.len() {
                let revents = self.poll_fds[index].revents;
                if revents & (libc::POLLIN | libc::POLLHUP | libc::POLLERR) == 0 {
                    continue;
                }
                if let Some(exit) = self.step(index, channel)? {
                    return Ok(exit);
                }
            }
        }
        Ok(LoopExit::Stopped)
    }

    /// Read and deliver one record from the device at `index`.
    fn step(
        &mut self,
        index: usize,
        channel: &mut DeliveryChannel,
    ) -> EventLoopResult<Option<LoopExit>> {
        let source = &mut self.sources[index];
        let Some(record) = source.device.read_record()? else {
            log::info!("{} reached end of stream", source.device.label());
            return Ok(Some(LoopExit::EndOfStream(source.device.label().to_string())));
        };

        let translation = source.handler.handle(&record);
        for event in &translation.events {
            channel.send(event)?;
        }

        if let (Some(request), true) = (translation.grab, source.exclusive) {
            match request {
                GrabRequest::Acquire => source.device.grab_with_retry(self.grab_policy)?,
                GrabRequest::Release => {
                    if let Err(e) = source.device.ungrab() {
                        log::warn!("Failed to release {}: {}", source.device.label(), e);
                    }
                }
            }
        }
        Ok(None)
    }

    /// Wait for readiness. `false` on timeout or signal interruption.
    fn poll(&mut self, timeout_ms: i32) -> EventLoopResult<bool> {
        for fd in &mut self.poll_fds {
            fd.revents = 0;
        }

        let poll_result = unsafe {
            libc::poll(
                self.poll_fds.as_mut_ptr(),
                self.poll_fds.len() as libc::nfds_t,
                timeout_ms,
            )
        };

        if poll_result < 0 {
            let err = io::Error::last_os_error();
            // A signal (e.g. SIGTERM) interrupted the wait; the caller
            // re-checks the running flag.
            if err.kind() == io::ErrorKind::Interrupted {
                return Ok(false);
            }
            return Err(EventLoopError::Io(err));
        }

        Ok(poll_result > 0)
    }

    /// Ungrab every device (called on shutdown)
    pub fn release_all(&mut self) {
        for source in &mut self.sources {
            if let Err(e) = source.device.ungrab() {
                log::warn!("Failed to release {}: {}", source.device.label(), e);
            }
        }
    }
}

impl<H: Read + AsRawFd> Drop for SourceLoop<H> {
    fn drop(&mut self) {
        self.release_all();
    }
}
