//! Connection Handler
//!
//! Handles individual client connections.

use std::io::{BufRead, BufReader, BufWriter, ErrorKind};
use std::net::TcpStream;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::backend::Backend;
use crate::error::{Result, StashError};
use crate::item::VALUE_TERMINATOR;
use crate::protocol::{read_command, write_response, Command, Response};
use crate::store::{DeleteOutcome, ItemStore};

/// How long a worker waits for the next request before checking on others
const IDLE_POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Why [`Connection::serve`] handed control back to its worker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pause {
    /// The client went away, timed out, or the stream failed; drop it
    Closed,
    /// No request arrived within the poll interval
    Idle,
    /// The command budget ran out while the client was still busy
    Yield,
}

/// Handles a single client connection
pub struct Connection<B> {
    /// TCP stream reader (buffered for efficiency)
    reader: BufReader<TcpStream>,

    /// TCP stream writer (buffered for efficiency)
    writer: BufWriter<TcpStream>,

    store: Arc<ItemStore<B>>,

    /// Peer address for logging
    peer_addr: String,

    /// Configured read timeout: the longest a client may sit idle or stall
    /// mid-frame (None = forever)
    read_timeout: Option<Duration>,

    /// Read timeout currently applied to the socket
    socket_timeout: Option<Duration>,

    last_activity: Instant,
}

fn is_disconnect_kind(kind: ErrorKind) -> bool {
    matches!(
        kind,
        ErrorKind::UnexpectedEof
            | ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::BrokenPipe
    )
}

/// Read timeouts surface as `WouldBlock` on Unix and `TimedOut` on Windows
fn is_timeout_kind(kind: ErrorKind) -> bool {
    matches!(kind, ErrorKind::WouldBlock | ErrorKind::TimedOut)
}

/// Errors that mean the client went away rather than something broke
fn is_disconnect(e: &StashError) -> bool {
    matches!(e, StashError::Io(io) if is_disconnect_kind(io.kind()))
}

fn is_timeout(e: &StashError) -> bool {
    matches!(e, StashError::Io(io) if is_timeout_kind(io.kind()))
}

impl<B: Backend> Connection<B> {
    /// Create a new connection handler
    pub fn new(stream: TcpStream, store: Arc<ItemStore<B>>) -> Result<Self> {
        let peer_addr = stream
            .peer_addr()
            .map(|a| a.to_string())
            .unwrap_or_else(|_| "unknown".to_string());

        // Disable Nagle's algorithm for low latency
        stream.set_nodelay(true)?;

        let read_stream = stream.try_clone()?;

        Ok(Self {
            reader: BufReader::new(read_stream),
            writer: BufWriter::new(stream),
            store,
            peer_addr,
            read_timeout: None,
            socket_timeout: None,
            last_activity: Instant::now(),
        })
    }

    /// Configure connection timeouts (0 = none)
    pub fn set_timeouts(&mut self, read_ms: u64, write_ms: u64) -> Result<()> {
        self.read_timeout = (read_ms > 0).then(|| Duration::from_millis(read_ms));
        if write_ms > 0 {
            self.writer
                .get_ref()
                .set_write_timeout(Some(Duration::from_millis(write_ms)))?;
        }
        Ok(())
    }

    /// Serve up to `budget` commands, returning early once the client is idle.
    ///
    /// An idle or yielded connection can be resumed later, by this worker or
    /// another one, without losing buffered input.
    pub fn serve(&mut self, budget: usize) -> Result<Pause> {
        for _ in 0..budget {
            if let Some(pause) = self.wait_for_request()? {
                return Ok(pause);
            }

            // The rest of the frame gets the full read timeout
            self.apply_read_timeout(self.read_timeout)?;
            let command = match read_command(&mut self.reader) {
                Ok(cmd) => cmd,
                Err(ref e) if is_disconnect(e) => {
                    tracing::debug!("Client {} disconnected", self.peer_addr);
                    return Ok(Pause::Closed);
                }
                Err(ref e) if is_timeout(e) => {
                    tracing::debug!("Read timeout mid-request for client {}", self.peer_addr);
                    return Ok(Pause::Closed);
                }
                Err(e) => {
                    tracing::warn!("Error reading from {}: {}", self.peer_addr, e);
                    let _ = write_response(&mut self.writer, &Response::error(&e.to_string()));
                    return Err(e);
                }
            };

            tracing::trace!("Received {:?} from {}", command.command_type(), self.peer_addr);

            let response = self.execute(command);

            if let Err(e) = write_response(&mut self.writer, &response) {
                if is_disconnect(&e) {
                    tracing::debug!(
                        "Client {} disconnected before response could be sent: {}",
                        self.peer_addr,
                        e
                    );
                    return Ok(Pause::Closed);
                }
                tracing::warn!("Error writing to {}: {}", self.peer_addr, e);
                return Err(e);
            }
            self.last_activity = Instant::now();
        }

        Ok(Pause::Yield)
    }

    /// Wait briefly for the first byte of a request; `None` once one is ready
    fn wait_for_request(&mut self) -> Result<Option<Pause>> {
        if !self.reader.buffer().is_empty() {
            return Ok(None);
        }

        self.apply_read_timeout(Some(IDLE_POLL_INTERVAL))?;
        match self.reader.fill_buf() {
            Ok([]) => {
                tracing::debug!("Client {} disconnected", self.peer_addr);
                Ok(Some(Pause::Closed))
            }
            Ok(_) => Ok(None),
            Err(e) if is_timeout_kind(e.kind()) || e.kind() == ErrorKind::Interrupted => {
                match self.read_timeout {
                    Some(limit) if self.last_activity.elapsed() >= limit => {
                        tracing::debug!("Closing idle client {}", self.peer_addr);
                        Ok(Some(Pause::Closed))
                    }
                    _ => Ok(Some(Pause::Idle)),
                }
            }
            Err(e) if is_disconnect_kind(e.kind()) => {
                tracing::debug!("Client {} disconnected", self.peer_addr);
                Ok(Some(Pause::Closed))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn apply_read_timeout(&mut self, timeout: Option<Duration>) -> Result<()> {
        if self.socket_timeout != timeout {
            self.reader.get_ref().set_read_timeout(timeout)?;
            self.socket_timeout = timeout;
        }
        Ok(())
    }

    /// Run one command against the store. Failures become ERROR responses.
    fn execute(&self, command: Command) -> Response {
        let result = match command {
            Command::Get { key } => self.get(&key),
            Command::Set { key, flags, value } => self.set(&key, flags, &value),
            Command::Delete { key } => match self.store.delete(&key) {
                Ok(DeleteOutcome::Deleted) => Ok(Response::ok(None)),
                Ok(DeleteOutcome::NotFound) => Ok(Response::not_found()),
                Err(e) => Err(e),
            },
            Command::Exists { key } => Ok(if self.store.exists(&key) {
                Response::ok(None)
            } else {
                Response::not_found()
            }),
            Command::Ping => Ok(Response::ok(Some(b"PONG".to_vec()))),
        };

        result.unwrap_or_else(|e| Response::error(&e.to_string()))
    }

    fn get(&self, key: &[u8]) -> Result<Response> {
        let item = match self.store.get(key)? {
            Some(item) => item,
            None => return Ok(Response::not_found()),
        };

        let response = match (item.flags(), item.value()) {
            (Ok(flags), Ok(value)) => Ok(Response::value(flags, value)),
            (Err(e), _) | (_, Err(e)) => Err(e),
        };
        self.store.allocator().release(item);
        response
    }

    fn set(&self, key: &[u8], flags: u32, value: &[u8]) -> Result<Response> {
        let allocator = self.store.allocator();
        let mut item = allocator.alloc_fresh(key, flags, value.len() + VALUE_TERMINATOR.len())?;

        let stored = item
            .set_value(value)
            .and_then(|()| self.store.put(key, &item));
        allocator.release(item);

        stored.map(|()| Response::ok(None))
    }

    /// Get the peer address string
    pub fn peer_addr(&self) -> &str {
        &self.peer_addr
    }
}
