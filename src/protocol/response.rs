//! Response definitions
//!
//! Represents responses to clients.

use bytes::BufMut;

/// Response status codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Status {
    Ok = 0x00,
    NotFound = 0x01,
    Error = 0x02,
}

/// A response to send to client
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub status: Status,

    /// GET hits carry `flags (4, BE) + value`; errors carry a message
    pub payload: Option<Vec<u8>>,
}

impl Response {
    /// OK with optional payload
    pub fn ok(payload: Option<Vec<u8>>) -> Self {
        Self {
            status: Status::Ok,
            payload,
        }
    }

    /// OK carrying a stored value and its flags
    pub fn value(flags: u32, value: &[u8]) -> Self {
        let mut payload = Vec::with_capacity(4 + value.len());
        payload.put_u32(flags);
        payload.put_slice(value);
        Self::ok(Some(payload))
    }

    pub fn not_found() -> Self {
        Self {
            status: Status::NotFound,
            payload: None,
        }
    }

    pub fn error(message: &str) -> Self {
        Self {
            status: Status::Error,
            payload: Some(message.as_bytes().to_vec()),
        }
    }

    /// Split a GET payload into `(flags, value)`
    pub fn as_value(&self) -> Option<(u32, &[u8])> {
        let payload = self.payload.as_deref()?;
        if self.status != Status::Ok || payload.len() < 4 {
            return None;
        }
        let (flags, value) = payload.split_at(4);
        Some((u32::from_be_bytes([flags[0], flags[1], flags[2], flags[3]]), value))
    }
}
