//! Courier Client Binary
//!
//! Demo client: kirim request #1, #2 (lalu cancel), dan #3 ke server,
//! dengan jeda antar langkah, lalu shutdown.
//!
//! Usage:
//!   cargo run --release --bin courier_client -- --host 127.0.0.1 --port 8080

use std::thread;
use std::time::Duration;

use clap::Parser;
use courier::{Client, RequestError, RequestId};

/// Client configuration
#[derive(Parser, Debug)]
#[command(version, about = "Courier asynchronous demo client")]
struct ClientArgs {
    /// Server IP address.
    #[arg(long, default_value = "127.0.0.1")]
    host: String,
    /// Server port.
    #[arg(long, short = 'p', default_value_t = 8080)]
    port: u16,
    /// Worker threads.
    #[arg(long, short = 'w', default_value_t = 2)]
    workers: usize,
    /// Seconds to pause between steps.
    #[arg(long, default_value_t = 5)]
    pause: u64,
}

fn report(request_id: RequestId, result: Result<String, RequestError>) {
    match result {
        Ok(response) => println!("✅ Request #{} has completed. Response: {}", request_id, response),
        Err(RequestError::Aborted) => {
            println!("⚠️ Request #{} has been cancelled by user", request_id)
        }
        Err(e) => println!("❌ Request #{} failed: {}", request_id, e),
    }
}

fn run(args: ClientArgs) -> Result<(), Box<dyn std::error::Error>> {
    let client = Client::with_workers(args.workers)?;
    let pause = Duration::from_secs(args.pause);

    client.submit(&args.host, args.port, report, 1)?;
    thread::sleep(pause);

    client.submit(&args.host, args.port, report, 2)?;
    thread::sleep(pause);
    client.cancel(2);

    client.submit(&args.host, args.port, report, 3)?;
    thread::sleep(pause);

    client.shutdown();
    Ok(())
}

fn main() {
    env_logger::init();
    let args = ClientArgs::parse();

    if let Err(e) = run(args) {
        eprintln!("❌ Client error: {}", e);
        std::process::exit(1);
    }
}
