//! TCP Server
//!
//! Accepts connections and dispatches to worker threads.
//!
//! Workers serve a connection until it goes idle or uses up its command
//! budget. If other connections are queued at that point, the connection goes
//! to the back of the queue, so a few idle clients cannot hold every worker.

use std::collections::HashMap;
use std::io::ErrorKind;
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;

use super::{Connection, Pause};
use crate::backend::Backend;
use crate::config::Config;
use crate::error::{Result, StashError};
use crate::protocol::{write_response, Response};
use crate::store::ItemStore;

/// How long the acceptor sleeps when no connection is pending
const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Commands a worker serves on one connection before checking the queue
const COMMAND_BUDGET: usize = 64;

/// Open client streams, so shutdown can unblock their workers
type Registry = Arc<Mutex<HashMap<u64, TcpStream>>>;

/// A registered connection waiting for (or held by) a worker
type Job<B> = (u64, Connection<B>);

/// TCP server for StashKV
pub struct Server<B> {
    config: Config,
    store: Arc<ItemStore<B>>,
    listener: TcpListener,
    shutdown: Arc<AtomicBool>,
    connections: Registry,
    next_id: AtomicU64,
}

impl<B: Backend + 'static> Server<B> {
    /// Bind the listen address. Serving starts with [`Server::run`].
    pub fn bind(config: Config, store: Arc<ItemStore<B>>) -> Result<Self> {
        let listener = TcpListener::bind(&config.listen_addr).map_err(|e| {
            StashError::Network(format!("failed to bind {}: {}", config.listen_addr, e))
        })?;
        listener.set_nonblocking(true)?;

        Ok(Self {
            config,
            store,
            listener,
            shutdown: Arc::new(AtomicBool::new(false)),
            connections: Arc::new(Mutex::new(HashMap::new())),
            next_id: AtomicU64::new(0),
        })
    }

    /// The address actually bound (useful with port 0)
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Flag that stops [`Server::run`] once set, from any thread
    pub fn shutdown_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shutdown)
    }

    /// Signal the server to shutdown gracefully
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }

    /// Number of clients currently connected
    pub fn active_connections(&self) -> usize {
        self.connections.lock().len()
    }

    /// Accept and serve connections until shutdown is signalled (blocking).
    ///
    /// Open client connections are closed on the way out, and all workers
    /// are joined before returning.
    pub fn run(&self) -> Result<()> {
        let addr = self.local_addr()?;
        let workers = self.config.worker_threads.max(1);
        tracing::info!("Listening on {} with {} workers", addr, workers);

        // Every admitted connection fits, so requeueing never blocks
        let (tx, rx) = channel::bounded::<Job<B>>(self.config.max_connections.max(1));
        let handles: Vec<JoinHandle<()>> = (0..workers)
            .map(|i| self.spawn_worker(i, tx.clone(), rx.clone()))
            .collect::<Result<_>>()?;
        drop(rx);

        while !self.shutdown.load(Ordering::SeqCst) {
            match self.listener.accept() {
                Ok((stream, peer)) => {
                    if let Some(job) = self.admit(stream, peer) {
                        let id = job.0;
                        if tx.send(job).is_err() {
                            self.connections.lock().remove(&id);
                            tracing::warn!("All workers exited; stopping acceptor");
                            break;
                        }
                    }
                }
                Err(ref e) if e.kind() == ErrorKind::WouldBlock => {
                    thread::sleep(ACCEPT_POLL_INTERVAL);
                }
                Err(ref e) if e.kind() == ErrorKind::Interrupted => {}
                Err(e) => {
                    tracing::warn!("Accept failed: {}", e);
                    thread::sleep(ACCEPT_POLL_INTERVAL);
                }
            }
        }

        tracing::info!("Shutting down server on {}", addr);
        drop(tx);
        for (_, stream) in self.connections.lock().drain() {
            let _ = stream.shutdown(Shutdown::Both);
        }
        for handle in handles {
            let _ = handle.join();
        }

        Ok(())
    }

    /// Register an accepted stream, or turn it away when at capacity
    fn admit(&self, stream: TcpStream, peer: SocketAddr) -> Option<Job<B>> {
        let mut connections = self.connections.lock();

        if connections.len() >= self.config.max_connections {
            drop(connections);
            tracing::warn!("Rejecting {}: connection limit {} reached", peer, self.config.max_connections);
            let mut refused = stream;
            let _ = refused.set_nonblocking(false);
            let _ = write_response(&mut refused, &Response::error("too many connections"));
            return None;
        }

        let registered = stream
            .set_nonblocking(false)
            .and_then(|()| stream.try_clone())
            .map_err(StashError::from)
            .and_then(|clone| {
                let mut conn = Connection::new(stream, Arc::clone(&self.store))?;
                conn.set_timeouts(self.config.read_timeout_ms, self.config.write_timeout_ms)?;
                Ok((clone, conn))
            });
        match registered {
            Ok((clone, conn)) => {
                let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                connections.insert(id, clone);
                tracing::debug!("Connection established from {}", conn.peer_addr());
                Some((id, conn))
            }
            Err(e) => {
                tracing::warn!("Failed to set up connection from {}: {}", peer, e);
                None
            }
        }
    }

    fn spawn_worker(
        &self,
        index: usize,
        tx: Sender<Job<B>>,
        rx: Receiver<Job<B>>,
    ) -> Result<JoinHandle<()>> {
        let connections = Arc::clone(&self.connections);
        let shutdown = Arc::clone(&self.shutdown);

        thread::Builder::new()
            .name(format!("stashkv-worker-{}", index))
            .spawn(move || loop {
                let (id, conn) = match rx.recv_timeout(ACCEPT_POLL_INTERVAL) {
                    Ok(job) => job,
                    Err(RecvTimeoutError::Timeout) if shutdown.load(Ordering::SeqCst) => break,
                    Err(RecvTimeoutError::Timeout) => continue,
                    Err(RecvTimeoutError::Disconnected) => break,
                };

                if let Some(conn) = work(conn, &rx, &shutdown) {
                    // Still open: back to the queue for the next free worker
                    if let Err(e) = tx.try_send((id, conn)) {
                        tracing::warn!("Could not requeue connection {}: {}", id, e);
                        connections.lock().remove(&id);
                    }
                } else {
                    connections.lock().remove(&id);
                }
            })
            .map_err(StashError::from)
    }
}

/// Serve one connection until it closes, or until it pauses while other
/// connections are waiting. Returns the connection if it should be requeued.
fn work<B: Backend>(
    mut conn: Connection<B>,
    rx: &Receiver<Job<B>>,
    shutdown: &AtomicBool,
) -> Option<Connection<B>> {
    loop {
        if shutdown.load(Ordering::SeqCst) {
            return None;
        }

        match conn.serve(COMMAND_BUDGET) {
            Ok(Pause::Closed) => return None,
            Ok(Pause::Idle) | Ok(Pause::Yield) => {
                if !rx.is_empty() {
                    return Some(conn);
                }
            }
            Err(e) => {
                tracing::debug!("Connection {} closed with error: {}", conn.peer_addr(), e);
                return None;
            }
        }
    }
}
