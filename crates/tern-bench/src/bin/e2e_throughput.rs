//! End-to-end throughput benchmark for tern.
//!
//! Measures `Arith.Add` calls per second against a running `tern` server
//! over real TCP connections.
//!
//! ```bash
//! e2e_throughput [clients] [compress] [serializer]
//! e2e_throughput 16 snappy msgpack
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tern_codec::SerializerKind;
use tern_protocol::CompressType;
use tern_rpc::{Options, TcpClient};

const SERVER_ADDR: &str = "127.0.0.1:8082";
const WARMUP_SECS: u64 = 2;
const BENCH_SECS: u64 = 10;
/// Calls each client keeps in flight.
const PIPELINE_DEPTH: usize = 8;

#[derive(Serialize, Deserialize)]
struct Args {
    #[serde(rename = "A")]
    a: i64,
    #[serde(rename = "B")]
    b: i64,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().collect();
    let num_clients = args.get(1).and_then(|s| s.parse().ok()).unwrap_or(16);
    let compress_type: CompressType = args
        .get(2)
        .map_or("raw", String::as_str)
        .parse()
        .context("Invalid compressor")?;
    let serializer: SerializerKind = args
        .get(3)
        .map_or("msgpack", String::as_str)
        .parse()
        .context("Invalid serializer")?;
    let options = Options::default()
        .with_compress_type(compress_type)
        .with_serializer(serializer);

    println!("tern e2e throughput (start the server first: cargo run --release --bin tern)");
    println!();

    run_call_benchmark(num_clients, options).await
}

async fn run_call_benchmark(num_clients: usize, options: Options) -> Result<()> {
    println!(
        "Arith.Add: {} clients, {} x {}, {} in flight each",
        num_clients, options.compress_type, options.serializer, PIPELINE_DEPTH
    );

    let call_count = Arc::new(AtomicU64::new(0));
    let error_count = Arc::new(AtomicU64::new(0));

    let mut handles = Vec::new();

    for client_id in 0..num_clients {
        let client = TcpClient::connect(SERVER_ADDR, options)
            .await
            .with_context(|| format!("Client {} failed to connect to {}", client_id, SERVER_ADDR))?;
        let client = Arc::new(client);

        for _ in 0..PIPELINE_DEPTH {
            let client = Arc::clone(&client);
            let calls = Arc::clone(&call_count);
            let errors = Arc::clone(&error_count);
            handles.push(tokio::spawn(async move {
                let mut i = 0i64;
                loop {
                    match client.call::<_, i64>("Arith.Add", &Args { a: i, b: 1 }).await {
                        Ok(_) => calls.fetch_add(1, Ordering::Relaxed),
                        Err(e) => {
                            errors.fetch_add(1, Ordering::Relaxed);
                            eprintln!("Client {} error: {}", client_id, e);
                            return;
                        }
                    };
                    i = i.wrapping_add(1);
                }
            }));
        }
    }

    println!("{} clients connected", num_clients);

    println!("Warming up for {}s", WARMUP_SECS);
    tokio::time::sleep(Duration::from_secs(WARMUP_SECS)).await;

    call_count.store(0, Ordering::SeqCst);
    let start = Instant::now();

    println!("Measuring for {}s", BENCH_SECS);
    tokio::time::sleep(Duration::from_secs(BENCH_SECS)).await;

    let elapsed = start.elapsed();
    let total_calls = call_count.load(Ordering::SeqCst);

    for handle in &handles {
        handle.abort();
    }

    Report {
        clients: num_clients,
        elapsed,
        calls: total_calls,
        errors: error_count.load(Ordering::SeqCst),
    }
    .print();
    Ok(())
}

struct Report {
    clients: usize,
    elapsed: Duration,
    calls: u64,
    errors: u64,
}

impl Report {
    fn print(&self) {
        let secs = self.elapsed.as_secs_f64();
        let rate = self.calls as f64 / secs;
        let rows = [
            ("clients", self.clients.to_string()),
            ("duration", format!("{:.2}s", secs)),
            ("calls", self.calls.to_string()),
            ("throughput", format!("{:.0} calls/s", rate)),
            ("per client", format!("{:.0} calls/s", rate / self.clients.max(1) as f64)),
            ("errors", self.errors.to_string()),
        ];

        println!();
        println!("{:-<40}", "");
        for (label, value) in rows {
            println!("{:<14}{:>26}", label, value);
        }
        println!("{:-<40}", "");
    }
}
