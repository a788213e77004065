//! # Echo Benchmark Driver
//!
//! Purpose: Exercise the connection framework end to end by dialing a set of
//! line connections, pushing a fixed number of values through an echo peer
//! and reporting throughput together with the event counters.
//!
//! ## Design Principles
//! 1. **Positional Arguments**: `sock-bench [addr|local] [connections]
//!    [requests] [value_len]`, each falling back to a default.
//! 2. **Self-Contained**: `local` starts an in-process echo listener so the
//!    driver runs without an external server.
//! 3. **Callback Driven**: Completion is detected from the read callback, not
//!    by polling the connections.

use std::env;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{bail, Context};
use tokio::net::TcpListener;
use tokio::sync::Notify;
use tracing_subscriber::EnvFilter;

use sock::{Client, ConnectionOptions, CountingSink, EventsSnapshot, LineCodec, TracingSink};

const DEFAULT_ADDR: &str = "local";
const DEFAULT_CONNECTIONS: usize = 16;
const DEFAULT_REQUESTS: usize = 10_000;
const DEFAULT_VALUE_LEN: usize = 64;
const COMPLETION_TIMEOUT: Duration = Duration::from_secs(60);

struct BenchConfig {
    addr: String,
    connections: usize,
    requests: usize,
    value_len: usize,
}

impl BenchConfig {
    fn from_args() -> Self {
        let mut args = env::args().skip(1);
        let addr = args.next().unwrap_or_else(|| DEFAULT_ADDR.to_string());
        let connections = parse_usize(args.next(), DEFAULT_CONNECTIONS).max(1);
        let requests = parse_usize(args.next(), DEFAULT_REQUESTS);
        let value_len = parse_usize(args.next(), DEFAULT_VALUE_LEN);

        BenchConfig {
            addr,
            connections,
            requests,
            value_len,
        }
    }

    fn total(&self) -> usize {
        self.connections * self.requests
    }
}

fn parse_usize(value: Option<String>, fallback: usize) -> usize {
    value.and_then(|raw| raw.parse().ok()).unwrap_or(fallback)
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// Binds a loopback listener that writes every received byte back.
async fn spawn_echo_server() -> anyhow::Result<String> {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .context("bind echo listener")?;
    let addr = listener.local_addr()?.to_string();

    tokio::spawn(async move {
        while let Ok((stream, peer)) = listener.accept().await {
            tokio::spawn(async move {
                let (mut reader, mut writer) = stream.into_split();
                if let Err(err) = tokio::io::copy(&mut reader, &mut writer).await {
                    tracing::debug!(%peer, error = %err, "echo peer finished with error");
                }
            });
        }
    });

    Ok(addr)
}

fn report(label: &str, ops: usize, elapsed: Duration) {
    let secs = elapsed.as_secs_f64().max(f64::EPSILON);
    let ops_per_sec = (ops as f64) / secs;
    println!("{label}: {ops} round trips in {secs:.3}s ({ops_per_sec:.0} ops/s)");
}

fn report_events(snapshot: &EventsSnapshot) {
    println!(
        "events: established={} closed={} read={} written={} idle={} dropped={} read_errors={} write_errors={} dial_failures={}",
        snapshot.established,
        snapshot.closed,
        snapshot.read,
        snapshot.written,
        snapshot.idle_timeouts,
        snapshot.dropped_sends,
        snapshot.read_errors,
        snapshot.write_errors,
        snapshot.dial_failures,
    );
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let config = BenchConfig::from_args();

    let addr = if config.addr == "local" {
        spawn_echo_server().await?
    } else {
        config.addr.clone()
    };
    tracing::info!(
        %addr,
        connections = config.connections,
        requests = config.requests,
        value_len = config.value_len,
        "starting echo benchmark"
    );

    let events = Arc::new(CountingSink::new());
    let received = Arc::new(AtomicUsize::new(0));
    let done = Arc::new(Notify::new());
    let total = config.total();

    let options = ConnectionOptions::default().idle_timeout(Duration::from_secs(5));
    let mut client = Client::with_options(addr, LineCodec::new, options);
    client.set_sink((TracingSink, Arc::clone(&events)));
    client.on_idle_timeout(|conn| {
        tracing::debug!(conn = conn.name(), "connection idle");
    });
    {
        let received = Arc::clone(&received);
        let done = Arc::clone(&done);
        client.on_read(move |_conn, _msg| {
            if received.fetch_add(1, Ordering::Relaxed) + 1 == total {
                done.notify_one();
            }
        });
    }

    let mut conns = Vec::with_capacity(config.connections);
    for _ in 0..config.connections {
        conns.push(client.connect().await.context("dial benchmark connection")?);
    }

    let value = "x".repeat(config.value_len);
    let started = Instant::now();
    let mut senders = Vec::with_capacity(conns.len());
    for conn in &conns {
        let conn = Arc::clone(conn);
        let value = value.clone();
        let requests = config.requests;
        senders.push(tokio::spawn(async move {
            for _ in 0..requests {
                conn.send(value.clone()).await;
            }
        }));
    }
    for sender in senders {
        sender.await.context("sender task")?;
    }

    if total > 0 && tokio::time::timeout(COMPLETION_TIMEOUT, done.notified()).await.is_err() {
        bail!(
            "timed out with {} of {} echoes received",
            received.load(Ordering::Relaxed),
            total
        );
    }
    report("echo", total, started.elapsed());

    for conn in &conns {
        conn.close();
    }
    for conn in &conns {
        conn.join().await;
    }
    report_events(&events.snapshot());

    Ok(())
}
