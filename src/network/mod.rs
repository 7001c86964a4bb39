//! Network Module
//!
//! TCP server and client handling.
//!
//! ## Architecture
//! - Single non-blocking acceptor thread
//! - Worker thread pool fed through a crossbeam channel; idle connections
//!   go back on the channel when other clients are waiting
//! - Commands executed through an `ItemStore`

mod connection;
mod server;

pub use connection::{Connection, Pause};
pub use server::Server;
