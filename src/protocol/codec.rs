//! Protocol codec
//!
//! Encoding and decoding functions for the wire protocol.
//!
//! ### Request Format
//! ```text
//! ┌──────────┬──────────┬─────────────────────────────┐
//! │ Cmd (1)  │ Len (4)  │         Payload             │
//! └──────────┴──────────┴─────────────────────────────┘
//! ```
//!
//! ### Payload by Command Type
//! - GET / DELETE / EXISTS: key
//! - SET:  flags (4) + key_len (4) + key + value
//! - PING: empty
//!
//! ### Response Format
//! ```text
//! ┌──────────┬──────────┬─────────────────────────────┐
//! │Status(1) │ Len (4)  │         Payload             │
//! └──────────┴──────────┴─────────────────────────────┘
//! ```
//! Integers are big endian.

use std::io::{Read, Write};

use bytes::{Buf, BufMut, BytesMut};

use super::{Command, CommandType, Response, Status};
use crate::error::{Result, StashError};

/// Header size: 1 byte command/status + 4 bytes length
pub const HEADER_SIZE: usize = 5;

/// Maximum payload size (16 MB)
pub const MAX_PAYLOAD_SIZE: u32 = 16 * 1024 * 1024;

fn frame(tag: u8, payload: &[u8]) -> Result<Vec<u8>> {
    let payload_len = match u32::try_from(payload.len()) {
        Ok(len) if len <= MAX_PAYLOAD_SIZE => len,
        _ => {
            return Err(StashError::Protocol(format!(
                "Payload too large: {} bytes (max {})",
                payload.len(),
                MAX_PAYLOAD_SIZE
            )))
        }
    };

    let mut message = BytesMut::with_capacity(HEADER_SIZE + payload.len());
    message.put_u8(tag);
    message.put_u32(payload_len);
    message.put_slice(payload);
    Ok(message.to_vec())
}

/// Split a complete frame into `(tag, payload)`
fn unframe(bytes: &[u8]) -> Result<(u8, &[u8])> {
    if bytes.len() < HEADER_SIZE {
        return Err(StashError::Protocol(format!(
            "Incomplete header: expected {} bytes, got {}",
            HEADER_SIZE,
            bytes.len()
        )));
    }

    let mut header = &bytes[..HEADER_SIZE];
    let tag = header.get_u8();
    let payload_len = header.get_u32();
    if payload_len > MAX_PAYLOAD_SIZE {
        return Err(StashError::Protocol(format!(
            "Payload too large: {} bytes (max {})",
            payload_len, MAX_PAYLOAD_SIZE
        )));
    }

    let total_len = HEADER_SIZE + payload_len as usize;
    if bytes.len() < total_len {
        return Err(StashError::Protocol(format!(
            "Incomplete payload: expected {} bytes, got {}",
            total_len,
            bytes.len()
        )));
    }

    Ok((tag, &bytes[HEADER_SIZE..total_len]))
}

// =============================================================================
// Command Encoding/Decoding
// =============================================================================

pub fn encode_command(command: &Command) -> Result<Vec<u8>> {
    let tag = command.command_type() as u8;
    match command {
        Command::Get { key } | Command::Delete { key } | Command::Exists { key } => frame(tag, key),
        Command::Set { key, flags, value } => {
            let key_len = u32::try_from(key.len()).map_err(|_| {
                StashError::Protocol(format!("SET command: key of {} bytes", key.len()))
            })?;
            let mut payload = Vec::with_capacity(8 + key.len() + value.len());
            payload.put_u32(*flags);
            payload.put_u32(key_len);
            payload.put_slice(key);
            payload.put_slice(value);
            frame(tag, &payload)
        }
        Command::Ping => frame(tag, &[]),
    }
}

pub fn decode_command(bytes: &[u8]) -> Result<Command> {
    let (tag, payload) = unframe(bytes)?;
    let command_type = CommandType::try_from(tag)
        .map_err(|t| StashError::Protocol(format!("Unknown command type: 0x{:02x}", t)))?;

    match command_type {
        CommandType::Get => Ok(Command::Get {
            key: decode_key(payload, "GET")?,
        }),
        CommandType::Delete => Ok(Command::Delete {
            key: decode_key(payload, "DELETE")?,
        }),
        CommandType::Exists => Ok(Command::Exists {
            key: decode_key(payload, "EXISTS")?,
        }),
        CommandType::Set => decode_set(payload),
        CommandType::Ping => {
            if !payload.is_empty() {
                return Err(StashError::Protocol(format!(
                    "PING command: unexpected payload of {} bytes",
                    payload.len()
                )));
            }
            Ok(Command::Ping)
        }
    }
}

fn decode_key(payload: &[u8], name: &str) -> Result<Vec<u8>> {
    if payload.is_empty() {
        return Err(StashError::Protocol(format!("{} command: empty key", name)));
    }
    Ok(payload.to_vec())
}

fn decode_set(mut payload: &[u8]) -> Result<Command> {
    if payload.remaining() < 8 {
        return Err(StashError::Protocol(
            "SET command: missing flags or key length".to_string(),
        ));
    }
    let flags = payload.get_u32();
    let key_len = payload.get_u32() as usize;

    if key_len == 0 || payload.remaining() < key_len {
        return Err(StashError::Protocol(format!(
            "SET command: bad key length {} ({} bytes remain)",
            key_len,
            payload.remaining()
        )));
    }

    let key = payload[..key_len].to_vec();
    let value = payload[key_len..].to_vec();
    Ok(Command::Set { key, flags, value })
}

// =============================================================================
// Response Encoding/Decoding
// =============================================================================

pub fn encode_response(response: &Response) -> Result<Vec<u8>> {
    frame(response.status as u8, response.payload.as_deref().unwrap_or(&[]))
}

pub fn decode_response(bytes: &[u8]) -> Result<Response> {
    let (tag, payload) = unframe(bytes)?;

    let status = match tag {
        0x00 => Status::Ok,
        0x01 => Status::NotFound,
        0x02 => Status::Error,
        other => {
            return Err(StashError::Protocol(format!(
                "Unknown response status: 0x{:02x}",
                other
            )))
        }
    };

    let payload = if payload.is_empty() {
        None
    } else {
        Some(payload.to_vec())
    };

    Ok(Response { status, payload })
}

// =============================================================================
// Stream-based I/O helpers
// =============================================================================

/// Read one whole frame; blocks until it arrives or the stream fails
fn read_frame<R: Read>(reader: &mut R) -> Result<Vec<u8>> {
    let mut header = [0u8; HEADER_SIZE];
    reader.read_exact(&mut header)?;

    let payload_len = u32::from_be_bytes([header[1], header[2], header[3], header[4]]);
    if payload_len > MAX_PAYLOAD_SIZE {
        return Err(StashError::Protocol(format!(
            "Payload too large: {} bytes (max {})",
            payload_len, MAX_PAYLOAD_SIZE
        )));
    }

    let mut message = vec![0u8; HEADER_SIZE + payload_len as usize];
    message[..HEADER_SIZE].copy_from_slice(&header);
    reader.read_exact(&mut message[HEADER_SIZE..])?;
    Ok(message)
}

pub fn read_command<R: Read>(reader: &mut R) -> Result<Command> {
    decode_command(&read_frame(reader)?)
}

pub fn write_command<W: Write>(writer: &mut W, command: &Command) -> Result<()> {
    writer.write_all(&encode_command(command)?)?;
    writer.flush()?;
    Ok(())
}

pub fn read_response<R: Read>(reader: &mut R) -> Result<Response> {
    decode_response(&read_frame(reader)?)
}

pub fn write_response<W: Write>(writer: &mut W, response: &Response) -> Result<()> {
    writer.write_all(&encode_response(response)?)?;
    writer.flush()?;
    Ok(())
}
