//! Echo Example - server and client in one event loop
//!
//! A server echoes every message back to its sender while a client sends a
//! handful of numbered messages and prints the replies. Both share a single
//! thread: their descriptors are polled together by `run_once`.
//!
//! # Usage
//!
//! ```bash
//! cargo run --example echo -- -vv --count 5
//! cargo run --example echo -- --config echo.toml
//! ```

use clap::Parser;
use config::Config;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use tracing_subscriber::EnvFilter;
use udscomm::prelude::*;

const MSG_GREETING: u32 = 0;
const MSG_TEXT: u32 = 1;

// ============================================================================
// Tracing Initialization
// ============================================================================

/// Initialize tracing for udscomm crate based on verbosity level
fn init_tracing(verbosity: u8) {
    let level = match verbosity {
        0 => return, // No tracing
        1 => "info",
        2 => "debug",
        _ => "trace", // 3 or more
    };

    let filter = format!("udscomm={}", level);
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();
}

// ============================================================================
// CLI Argument Parsing
// ============================================================================

#[derive(Parser)]
#[command(author, version, about = "Echo over a Unix domain socket", long_about = None)]
struct Args {
    /// Socket path (defaults to a fresh temporary directory)
    #[arg(short, long)]
    socket: Option<String>,

    /// Number of messages the client sends
    #[arg(short, long, default_value_t = 3)]
    count: u32,

    /// Increase logging verbosity (-v: info, -vv: debug, -vvv: trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Configuration file path (TOML format)
    #[arg(long)]
    config: Option<String>,
}

// ============================================================================
// Handlers
// ============================================================================

/// Greets each new connection and echoes everything it receives.
struct EchoServer;

impl Handler for EchoServer {
    fn on_connect(&mut self, conn: &mut Connection) {
        if let Err(err) = conn.enqueue(MSG_GREETING, 0, b"welcome") {
            eprintln!("Failed to greet connection {}: {err}", conn.id());
        }
    }

    fn on_message(&mut self, conn: &mut Connection, msg: Message) -> Disposition {
        match conn.enqueue(msg.msg_type, msg.opaque, &msg.payload) {
            Ok(()) => Disposition::Continue,
            Err(err) => {
                eprintln!("Failed to echo to connection {}: {err}", conn.id());
                Disposition::Close
            }
        }
    }

    fn on_disconnect(&mut self, conn: &Connection) {
        println!("[server] connection {} gone", conn.id());
    }
}

/// Prints replies and counts the echoes.
#[derive(Default)]
struct EchoClient {
    echoes: u32,
}

impl Handler for EchoClient {
    fn on_message(&mut self, _conn: &mut Connection, msg: Message) -> Disposition {
        let text = String::from_utf8_lossy(&msg.payload);
        match msg.msg_type {
            MSG_GREETING => println!("[client] greeted: {text}"),
            _ => {
                println!("[client] echo #{}: {text}", msg.opaque);
                self.echoes += 1;
            }
        }
        Disposition::Continue
    }
}

// ============================================================================
// Main Entry Point
// ============================================================================

fn main() -> ExitCode {
    let args = Args::parse();
    init_tracing(args.verbose);

    let mut config = Config::builder();
    if let Some(config_path) = &args.config {
        config = config.add_source(config::File::with_name(config_path));
    }
    let config = match config.build() {
        Ok(c) => c,
        Err(err) => {
            eprintln!("Failed to load config: {err}");
            return ExitCode::FAILURE;
        }
    };

    // Keep the temporary directory alive for the whole run.
    let (_tmp, path) = match &args.socket {
        Some(path) => (None, PathBuf::from(path)),
        None => match tempfile::tempdir() {
            Ok(dir) => {
                let path = dir.path().join("echo.sock");
                (Some(dir), path)
            }
            Err(err) => {
                eprintln!("Failed to create temporary directory: {err}");
                return ExitCode::FAILURE;
            }
        },
    };

    let names = MessageNames::new(["greeting", "text"]);
    let options = Options::new_named(&config, "echo").with_names(names);

    let mut server = match Server::create(&path, EchoServer, options.clone()) {
        Ok(server) => server,
        Err(err) => {
            eprintln!("Failed to start server: {err}");
            return ExitCode::FAILURE;
        }
    };
    let mut client = match Client::connect(&path, EchoClient::default(), options) {
        Ok(client) => client,
        Err(err) => {
            eprintln!("Failed to connect: {err}");
            return ExitCode::FAILURE;
        }
    };
    println!("Listening on {}", server.path().display());

    for i in 0..args.count {
        let text = format!("message {i}");
        if let Err(err) = client.enqueue(MSG_TEXT, i, text.as_bytes()) {
            eprintln!("Failed to queue message: {err}");
            return ExitCode::FAILURE;
        }
    }

    // The single-threaded event dispatch loop.
    while client.handler().echoes < args.count {
        if !client.is_connected() {
            eprintln!("Client lost its connection");
            return ExitCode::FAILURE;
        }
        if let Err(err) = run_once(&mut [&mut server, &mut client], Some(Duration::from_secs(1))) {
            eprintln!("Fatal error waiting for readiness: {err}");
            return ExitCode::FAILURE;
        }
    }

    client.destroy();
    let _ = run_once(&mut [&mut server], Some(Duration::from_millis(100)));
    server.destroy();
    ExitCode::SUCCESS
}
