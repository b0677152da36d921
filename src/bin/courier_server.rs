//! Courier Server Binary
//!
//! Asynchronous line server: setiap koneksi membaca satu baris request
//! dan membalas "Hello Client".
//!
//! Usage:
//!   cargo run --release --bin courier_server -- [OPTIONS]

use std::thread;
use std::time::Duration;

use clap::Parser;
use courier::Server;

/// Server configuration
#[derive(Parser, Debug)]
#[command(version, about = "Courier asynchronous line server")]
struct ServerArgs {
    /// Port to listen on (all IPv4 interfaces).
    #[arg(long, short = 'p', default_value_t = 8080)]
    port: u16,
    /// Worker threads. Defaults to available parallelism.
    #[arg(long, short = 'w')]
    workers: Option<usize>,
    /// Seconds to serve before stopping.
    #[arg(long, short = 'd', default_value_t = 10)]
    duration: u64,
}

fn main() {
    env_logger::init();
    let args = ServerArgs::parse();

    let workers = args.workers.unwrap_or_else(|| {
        thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(2)
    });

    let server = match Server::start(args.port, workers) {
        Ok(server) => server,
        Err(e) => {
            eprintln!("❌ Server error: {}", e);
            std::process::exit(1);
        }
    };

    println!(
        "🔌 Listening on {} ({} workers) for {}s",
        server.local_addr(),
        server.workers(),
        args.duration
    );

    thread::sleep(Duration::from_secs(args.duration));
    server.stop();

    println!("✅ Server stopped");
}
