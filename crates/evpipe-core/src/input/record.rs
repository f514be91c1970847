// Evpipe Input Layer - Raw Event Records
// Decoding of the kernel's fixed-width input_event structure

use std::io::{self, Read};

use super::codes::EV_SYN;

/// Width of one `long` field in the kernel's `struct timeval` on this target.
const LONG_SIZE: usize = std::mem::size_of::<libc::c_long>();

/// Size in bytes of one binary input record: two `long` timestamps,
/// two `u16` (type, code) and one `i32` (value), native-endian.
pub const RECORD_SIZE: usize = 2 * LONG_SIZE + 2 + 2 + 4;

/// Errors produced while decoding raw records
#[derive(Debug, thiserror::Error)]
pub enum RecordError {
    #[error("Truncated input record: got {got} of {expected} bytes")]
    Truncated { got: usize, expected: usize },

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// One timestamped sample read from a physical input device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventRecord {
    pub timestamp_sec: i64,
    pub timestamp_usec: i64,
    pub event_type: u16,
    pub code: u16,
    pub value: i32,
}

impl EventRecord {
    pub fn new(event_type: u16, code: u16, value: i32) -> Self {
        Self {
            timestamp_sec: 0,
            timestamp_usec: 0,
            event_type,
            code,
            value,
        }
    }

    /// Same record stamped with the given time.
    pub fn at(mut self, sec: i64, usec: i64) -> Self {
        self.timestamp_sec = sec;
        self.timestamp_usec = usec;
        self
    }

    /// A record with zero type, code and value delimits a batch of changes.
    pub fn is_sync_marker(&self) -> bool {
        self.event_type == EV_SYN && self.code == 0 && self.value == 0
    }

    /// Record timestamp in microseconds.
    pub fn timestamp_micros(&self) -> i64 {
        self.timestamp_sec
            .saturating_mul(1_000_000)
            .saturating_add(self.timestamp_usec)
    }

    /// Decode one record from exactly `RECORD_SIZE` bytes.
    pub fn from_ne_bytes(buf: &[u8; RECORD_SIZE]) -> Self {
        let mut offset = 0;
        let timestamp_sec = read_long(&buf[offset..offset + LONG_SIZE]);
        offset += LONG_SIZE;
        let timestamp_usec = read_long(&buf[offset..offset + LONG_SIZE]);
        offset += LONG_SIZE;
        let event_type = u16::from_ne_bytes([buf[offset], buf[offset + 1]]);
        offset += 2;
        let code = u16::from_ne_bytes([buf[offset], buf[offset + 1]]);
        offset += 2;
        let value = i32::from_ne_bytes([
            buf[offset],
            buf[offset + 1],
            buf[offset + 2],
            buf[offset + 3],
        ]);

        Self {
            timestamp_sec,
            timestamp_usec,
            event_type,
            code,
            value,
        }
    }

    /// Encode into the kernel layout. Used to build device fixtures.
    pub fn to_ne_bytes(&self) -> [u8; RECORD_SIZE] {
        let mut buf = [0u8; RECORD_SIZE];
        let sec = (self.timestamp_sec as libc::c_long).to_ne_bytes();
        let usec = (self.timestamp_usec as libc::c_long).to_ne_bytes();
        buf[..LONG_SIZE].copy_from_slice(&sec);
        buf[LONG_SIZE..2 * LONG_SIZE].copy_from_slice(&usec);
        let mut offset = 2 * LONG_SIZE;
        buf[offset..offset + 2].copy_from_slice(&self.event_type.to_ne_bytes());
        offset += 2;
        buf[offset..offset + 2].copy_from_slice(&self.code.to_ne_bytes());
        offset += 2;
        buf[offset..offset + 4].copy_from_slice(&self.value.to_ne_bytes());
        buf
    }
}

fn read_long(bytes: &[u8]) -> i64 {
    let mut raw = [0u8; LONG_SIZE];
    raw.copy_from_slice(bytes);
    libc::c_long::from_ne_bytes(raw) as i64
}

/// Lazy reader of `EventRecord`s from a device handle.
///
/// Each call consumes exactly one record. A clean end-of-stream ends the
/// sequence; a partial record is a framing error.
pub struct RawEventReader<R> {
    inner: R,
    finished: bool,
}

impl<R: Read> RawEventReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            finished: false,
        }
    }

    /// Read the next record, or `None` at end-of-stream.
    pub fn read_record(&mut self) -> Result<Option<EventRecord>, RecordError> {
        if self.finished {
            return Ok(None);
        }

        let mut buf = [0u8; RECORD_SIZE];
        let mut filled = 0;
        while filled < RECORD_SIZE {
            match self.inner.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(RecordError::Io(e)),
            }
        }

        match filled {
            0 => {
                self.finished = true;
                Ok(None)
            }
            RECORD_SIZE => Ok(Some(EventRecord::from_ne_bytes(&buf))),
            got => {
                self.finished = true;
                Err(RecordError::Truncated {
                    got,
                    expected: RECORD_SIZE,
                })
            }
        }
    }

    pub fn get_ref(&self) -> &R {
        &self.inner
    }

    pub fn get_mut(&mut self) -> &mut R {
        &mut self.inner
    }
}

impl<R: Read> Iterator for RawEventReader<R> {
    type Item = Result<EventRecord, RecordError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.read_record().transpose()
    }
}
