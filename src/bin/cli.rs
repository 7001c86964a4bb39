//! StashKV CLI Client
//!
//! Command-line interface for interacting with a StashKV server.

use std::net::TcpStream;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use stashkv::protocol::{read_response, write_command, Command, Response, Status};

/// StashKV CLI
#[derive(Parser, Debug)]
#[command(name = "stashkv-cli")]
#[command(about = "CLI for the StashKV item store")]
struct Args {
    /// Server address
    #[arg(short, long, default_value = "127.0.0.1:21201")]
    server: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Get a value by key
    Get {
        /// The key to get
        key: String,
    },

    /// Set a key-value pair
    Set {
        /// The key to set
        key: String,

        /// The value to set
        value: String,

        /// Opaque client flags stored with the value
        #[arg(short, long, default_value = "0")]
        flags: u32,
    },

    /// Delete a key
    Del {
        /// The key to delete
        key: String,
    },

    /// Check whether a key exists
    Exists {
        /// The key to check
        key: String,
    },

    /// Ping the server
    Ping,
}

fn main() -> ExitCode {
    let args = Args::parse();

    let command = match args.command {
        Commands::Get { key } => Command::Get { key: key.into_bytes() },
        Commands::Set { key, value, flags } => Command::Set {
            key: key.into_bytes(),
            flags,
            value: value.into_bytes(),
        },
        Commands::Del { key } => Command::Delete { key: key.into_bytes() },
        Commands::Exists { key } => Command::Exists { key: key.into_bytes() },
        Commands::Ping => Command::Ping,
    };

    match roundtrip(&args.server, &command) {
        Ok(response) => print_response(&command, &response),
        Err(e) => {
            eprintln!("(error) {}", e);
            ExitCode::FAILURE
        }
    }
}

fn roundtrip(server: &str, command: &Command) -> stashkv::Result<Response> {
    let mut stream = TcpStream::connect(server)?;
    write_command(&mut stream, command)?;
    read_response(&mut stream)
}

fn print_response(command: &Command, response: &Response) -> ExitCode {
    match response.status {
        Status::Ok => {
            match command {
                Command::Get { .. } => {
                    if let Some((flags, value)) = response.as_value() {
                        println!("{}", String::from_utf8_lossy(value));
                        if flags != 0 {
                            println!("(flags {})", flags);
                        }
                    }
                }
                Command::Exists { .. } => println!("(true)"),
                Command::Ping => println!("PONG"),
                Command::Set { .. } | Command::Delete { .. } => println!("OK"),
            }
            ExitCode::SUCCESS
        }
        Status::NotFound => {
            match command {
                Command::Exists { .. } => println!("(false)"),
                _ => println!("(nil)"),
            }
            ExitCode::SUCCESS
        }
        Status::Error => {
            let message = response.payload.as_deref().unwrap_or_default();
            eprintln!("(error) {}", String::from_utf8_lossy(message));
            ExitCode::FAILURE
        }
    }
}
