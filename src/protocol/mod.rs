//! Protocol Module
//!
//! Defines the binary wire protocol between clients and the server.
//!
//! ### Commands
//! - 0x01: GET    - Payload: key
//! - 0x02: SET    - Payload: flags (4) + key_len (4) + key + value
//! - 0x03: DELETE - Payload: key
//! - 0x04: EXISTS - Payload: key
//! - 0x05: PING   - Payload: empty
//!
//! ### Status Codes
//! - 0x00: OK        (GET hit payload: flags (4) + value)
//! - 0x01: NOT_FOUND
//! - 0x02: ERROR     (payload: message)
//!
//! Values travel without the `\r\n` terminator the item layout stores.

mod codec;
mod command;
mod response;

pub use codec::{
    decode_command, decode_response, encode_command, encode_response, read_command,
    read_response, write_command, write_response, HEADER_SIZE, MAX_PAYLOAD_SIZE,
};
pub use command::{Command, CommandType};
pub use response::{Response, Status};
