//! Command definitions
//!
//! Represents commands from clients.

/// Command types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CommandType {
    Get = 0x01,
    Set = 0x02,
    Delete = 0x03,
    Exists = 0x04,
    Ping = 0x05,
}

impl TryFrom<u8> for CommandType {
    type Error = u8;

    fn try_from(byte: u8) -> Result<Self, u8> {
        match byte {
            0x01 => Ok(CommandType::Get),
            0x02 => Ok(CommandType::Set),
            0x03 => Ok(CommandType::Delete),
            0x04 => Ok(CommandType::Exists),
            0x05 => Ok(CommandType::Ping),
            other => Err(other),
        }
    }
}

/// A parsed command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Fetch the value and flags stored under a key
    Get { key: Vec<u8> },

    /// Store a value with opaque client flags
    Set {
        key: Vec<u8>,
        flags: u32,
        value: Vec<u8>,
    },

    /// Delete a key
    Delete { key: Vec<u8> },

    /// Presence check
    Exists { key: Vec<u8> },

    /// Ping (health check)
    Ping,
}

impl Command {
    pub fn command_type(&self) -> CommandType {
        match self {
            Command::Get { .. } => CommandType::Get,
            Command::Set { .. } => CommandType::Set,
            Command::Delete { .. } => CommandType::Delete,
            Command::Exists { .. } => CommandType::Exists,
            Command::Ping => CommandType::Ping,
        }
    }

    /// The key this command addresses, if any
    pub fn key(&self) -> Option<&[u8]> {
        match self {
            Command::Get { key }
            | Command::Set { key, .. }
            | Command::Delete { key }
            | Command::Exists { key } => Some(key),
            Command::Ping => None,
        }
    }
}
