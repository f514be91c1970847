// Evpipe Input Layer - Source Devices
// Opening, exclusive grab and capability discovery for physical devices

use std::fs::File;
use std::io::{self, Read};
use std::os::unix::io::{AsRawFd, RawFd};
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::record::{EventRecord, RawEventReader, RecordError};

/// `_IOW('E', 0x90, int)` from linux/input.h
const EVIOCGRAB: libc::c_ulong = 0x4004_4590;

/// Result type for device operations
pub type DeviceResult<T> = Result<T, DeviceError>;

/// Errors that can occur while handling a source device
#[derive(Debug, thiserror::Error)]
pub enum DeviceError {
    #[error("Device not found: {0}")]
    NotFound(String),

    #[error("Failed to open {path}: {source}")]
    Open { path: String, source: io::Error },

    #[error("Could not grab {path} after {attempts} attempt(s): {source}")]
    GrabFailed {
        path: String,
        attempts: u32,
        source: io::Error,
    },

    #[error("Failed to read capabilities of {path}: {source}")]
    Capabilities { path: String, source: io::Error },

    #[error(transparent)]
    Record(#[from] RecordError),
}

/// Retry policy for acquiring exclusive access.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GrabPolicy {
    pub attempts: u32,
    pub delay: Duration,
}

impl Default for GrabPolicy {
    fn default() -> Self {
        Self {
            attempts: 5,
            delay: Duration::from_millis(500),
        }
    }
}

/// A physical device handle producing raw records.
///
/// Generic over the handle so tests can drive it with a socket pair.
/// The device is ungrabbed on drop.
pub struct SourceDevice<H: Read + AsRawFd = File> {
    label: String,
    reader: RawEventReader<H>,
    grabbed: bool,
}

impl SourceDevice<File> {
    /// Open an event device node for reading.
    pub fn open(path: impl AsRef<Path>) -> DeviceResult<Self> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|source| DeviceError::Open {
            path: path.display().to_string(),
            source,
        })?;
        Ok(Self::from_handle(path.display().to_string(), file))
    }
}

impl<H: Read + AsRawFd> SourceDevice<H> {
    pub fn from_handle(label: impl Into<String>, handle: H) -> Self {
        Self {
            label: label.into(),
            reader: RawEventReader::new(handle),
            grabbed: false,
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn is_grabbed(&self) -> bool {
        self.grabbed
    }

    /// Read one record, blocking. `None` when the device goes away.
    pub fn read_record(&mut self) -> DeviceResult<Option<EventRecord>> {
        Ok(self.reader.read_record()?)
    }

    /// Acquire exclusive access. No-op when already held.
    pub fn grab(&mut self) -> io::Result<()> {
        if !self.grabbed {
            self.set_grab(true)?;
            self.grabbed = true;
        }
        Ok(())
    }

    /// Release exclusive access. No-op when not held.
    pub fn ungrab(&mut self) -> io::Result<()> {
        if self.grabbed {
            self.set_grab(false)?;
            self.grabbed = false;
        }
        Ok(())
    }

    /// Grab with a bounded number of attempts and a fixed backoff.
    pub fn grab_with_retry(&mut self, policy: GrabPolicy) -> DeviceResult<()> {
        let attempts = policy.attempts.max(1);
        let mut attempt = 1;
        loop {
            match self.grab() {
                Ok(()) => {
                    log::debug!("Grabbed {} on attempt {}", self.label, attempt);
                    return Ok(());
                }
                Err(source) if attempt >= attempts => {
                    return Err(DeviceError::GrabFailed {
                        path: self.label.clone(),
                        attempts,
                        source,
                    });
                }
                Err(e) => {
                    log::warn!(
                        "Grab of {} failed ({}), retrying in {:?} ({}/{})",
                        self.label,
                        e,
                        policy.delay,
                        attempt,
                        attempts
                    );
                    std::thread::sleep(policy.delay);
                    attempt += 1;
                }
            }
        }
    }

    fn set_grab(&self, grab: bool) -> io::Result<()> {
        let fd = self.reader.get_ref().as_raw_fd();
        let arg: libc::c_int = i32::from(grab);
        // SAFETY: fd is owned by self and stays open for the duration of the call.
        let rc = unsafe { libc::ioctl(fd, EVIOCGRAB as _, arg) };
        if rc < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }
}

impl<H: Read + AsRawFd> AsRawFd for SourceDevice<H> {
    fn as_raw_fd(&self) -> RawFd {
        self.reader.get_ref().as_raw_fd()
    }
}

impl<H: Read + AsRawFd> Drop for SourceDevice<H> {
    fn drop(&mut self) {
        if let Err(e) = self.ungrab() {
            log::warn!("Failed to release {}: {}", self.label, e);
        }
    }
}

/// Entry of the input device enumeration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub path: PathBuf,
    pub name: String,
}

/// Enumerate input devices visible to this process.
#[cfg(feature = "evdev-backend")]
pub fn list_devices() -> Vec<DeviceInfo> {
    evdev::enumerate()
        .map(|(path, device)| DeviceInfo {
            path,
            name: device.name().unwrap_or("Unknown").to_string(),
        })
        .collect()
}

/// Resolve a device name to its event node path.
#[cfg(feature = "evdev-backend")]
pub fn find_device_by_name(name: &str) -> DeviceResult<PathBuf> {
    list_devices()
        .into_iter()
        .find(|info| info.name == name)
        .map(|info| info.path)
        .ok_or_else(|| DeviceError::NotFound(name.to_string()))
}

/// Build a handshake descriptor from a device's declared capabilities.
///
/// The synchronization type is never included.
#[cfg(feature = "evdev-backend")]
pub fn read_capabilities(
    path: impl AsRef<Path>,
) -> DeviceResult<crate::protocol::DeviceDescriptor> {
    use super::codes::{EV_ABS, EV_KEY, EV_MSC, EV_REL};
    use crate::protocol::{AbsAxisInfo, DeviceDescriptor};

    let path = path.as_ref();
    let caps_err = |source: io::Error| DeviceError::Capabilities {
        path: path.display().to_string(),
        source,
    };
    let device = evdev::Device::open(path).map_err(caps_err)?;
    let input_id = device.input_id();

    let mut descriptor = DeviceDescriptor::new(
        device.name().unwrap_or("Unknown"),
        input_id.vendor(),
        input_id.product(),
    );

    if let Some(keys) = device.supported_keys() {
        descriptor = descriptor.with_codes(EV_KEY, keys.iter().map(|k| k.code()));
    }
    if let Some(axes) = device.supported_relative_axes() {
        descriptor = descriptor.with_codes(EV_REL, axes.iter().map(|a| a.0));
    }
    if let Some(axes) = device.supported_absolute_axes() {
        let state = device.get_abs_state().map_err(caps_err)?;
        for axis in axes.iter() {
            let raw = state[axis.0 as usize];
            let info = AbsAxisInfo {
                value: raw.value,
                min: raw.minimum,
                max: raw.maximum,
                fuzz: raw.fuzz,
                flat: raw.flat,
                resolution: raw.resolution,
            };
            descriptor = descriptor.with_abs_axis(EV_ABS, axis.0, info);
        }
    }
    if let Some(misc) = device.misc_properties() {
        descriptor = descriptor.with_codes(EV_MSC, misc.iter().map(|m| m.0));
    }

    Ok(descriptor)
}
