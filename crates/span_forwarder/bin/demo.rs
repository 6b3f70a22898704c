//! # Span Forwarder Demo
//!
//! End-to-end run against a local ingest stub that speaks the TCP sender's
//! framing.
//!
//! ## What it shows
//!
//! - Concurrent producers enqueueing pre-encoded batches without blocking
//! - Queue-full flushes under a deliberately small queue
//!   (`AgentQueueDumped`)
//! - With `--flaky`: the stub answers the first connection with
//!   `FAILED_PRECONDITION`, so the forwarder reconnects with a fresh sender
//! - Destructive metric dumps, then a bounded graceful shutdown
//!
//! ## Running
//!
//! ```bash
//! # Quick mode (4 producers, 50 batches each)
//! cargo run -p span_forwarder --bin demo -- --quick
//!
//! # Force a reconnect partway through
//! cargo run -p span_forwarder --bin demo -- --flaky
//!
//! # Worker state transitions
//! RUST_LOG=span_forwarder=debug cargo run -p span_forwarder --bin demo
//! ```

use anyhow::Context;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use span_forwarder::{Forwarder, ForwarderConfig, MetricsSnapshot, StatusCode};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

/// Frames the stub reads on the first connection before asking for a
/// reconnect in `--flaky` mode.
const FLAKY_AFTER_FRAMES: u64 = 25;

#[derive(Debug, Default)]
struct IngestStats {
    connections: AtomicU64,
    frames: AtomicU64,
    bytes: AtomicU64,
}

fn initialize_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    initialize_tracing();

    let args: Vec<String> = std::env::args().collect();
    let quick = args.iter().any(|a| a == "--quick");
    let flaky = args.iter().any(|a| a == "--flaky");

    let num_producers = if quick { 4 } else { 8 };
    let batches_per_producer = if quick { 50 } else { 200 };

    println!("Demo Configuration:");
    println!("   Mode: {}", if quick { "quick" } else { "full" });
    println!("   Flaky ingest: {flaky}");
    println!("   Producers: {num_producers}");
    println!("   Batches per producer: {batches_per_producer}");
    println!();

    // =========================================================================
    // Phase 1: local ingest stub
    // =========================================================================
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .context("binding ingest stub")?;
    let port = listener.local_addr()?.port();
    let stats = Arc::new(IngestStats::default());
    tokio::spawn(run_ingest(listener, Arc::clone(&stats), flaky));
    println!("Phase 1: ingest stub listening on 127.0.0.1:{port}\n");

    // =========================================================================
    // Phase 2: forwarder
    // =========================================================================
    let config = ForwarderConfig::new("127.0.0.1", port, "demo-license", "demo-run")
        .with_queue_size(500)
        .with_backoff(Duration::from_millis(200))
        .with_request_header("entity.name", "span-forwarder-demo");
    let forwarder = Arc::new(Forwarder::start(config).context("starting forwarder")?);
    println!("Phase 2: forwarder started (queue_size = 500 spans)\n");

    // =========================================================================
    // Phase 3: producers
    // =========================================================================
    println!("Phase 3: starting {num_producers} producers\n");
    let start = Instant::now();
    let mut producers = Vec::with_capacity(num_producers);
    for id in 0..num_producers {
        let forwarder = Arc::clone(&forwarder);
        producers.push(tokio::spawn(async move {
            let mut rng = StdRng::from_entropy();
            let mut spans = 0u64;
            for _ in 0..batches_per_producer {
                let count: u64 = rng.gen_range(1..=40);
                let payload: Vec<u8> = (0..count * 16).map(|_| rng.r#gen()).collect();
                forwarder.enqueue(count, payload);
                spans += count;
                if rng.gen_bool(0.2) {
                    tokio::time::sleep(Duration::from_millis(1)).await;
                }
            }
            tracing::debug!(producer = id, spans, "producer finished");
            spans
        }));
    }

    let mut produced = 0u64;
    for producer in producers {
        produced += producer.await.context("producer task panicked")?;
    }
    println!("   All producers finished in {:?}", start.elapsed());

    // Let the worker drain what is still buffered.
    tokio::time::sleep(Duration::from_millis(300)).await;

    // =========================================================================
    // Phase 4: metrics
    // =========================================================================
    println!("\nPhase 4: supportability metrics\n");
    let metrics = forwarder
        .dump_metrics()
        .await
        .context("metrics unavailable")?;
    print_metrics(&metrics);

    // =========================================================================
    // Phase 5: shutdown
    // =========================================================================
    println!("\nPhase 5: graceful shutdown\n");
    match forwarder.shutdown(Duration::from_secs(5)).await {
        Ok(()) => println!("   Stream shut down cleanly"),
        Err(e) => println!("   {e}"),
    }
    forwarder.request_application_shutdown();

    println!();
    println!("   Spans produced:      {produced:>10}");
    println!("   Ingest connections:  {:>10}", stats.connections.load(Ordering::Relaxed));
    println!("   Frames received:     {:>10}", stats.frames.load(Ordering::Relaxed));
    println!("   Bytes received:      {:>10}", stats.bytes.load(Ordering::Relaxed));
    Ok(())
}

fn print_metrics(metrics: &MetricsSnapshot) {
    let mut names: Vec<&String> = metrics.keys().collect();
    names.sort();
    for name in names {
        println!("   {name:<60} {:>10}", metrics[name]);
    }
}

async fn run_ingest(listener: TcpListener, stats: Arc<IngestStats>, flaky: bool) {
    loop {
        let (socket, peer) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                tracing::error!(error = %e, "ingest stub accept failed");
                return;
            }
        };
        let connection = stats.connections.fetch_add(1, Ordering::Relaxed);
        let stats = Arc::clone(&stats);
        tokio::spawn(async move {
            let refuse_after = (flaky && connection == 0).then_some(FLAKY_AFTER_FRAMES);
            if let Err(e) = serve_connection(socket, &stats, refuse_after).await {
                tracing::debug!(%peer, error = %e, "ingest connection ended");
            }
        });
    }
}

async fn serve_connection(
    mut socket: tokio::net::TcpStream,
    stats: &IngestStats,
    refuse_after: Option<u64>,
) -> std::io::Result<()> {
    let handshake = read_frame(&mut socket).await?;
    tracing::info!(handshake = %String::from_utf8_lossy(&handshake), "ingest stream opened");

    let mut frames = 0u64;
    loop {
        let frame = read_frame(&mut socket).await?;
        frames += 1;
        stats.frames.fetch_add(1, Ordering::Relaxed);
        stats.bytes.fetch_add(frame.len() as u64, Ordering::Relaxed);

        if refuse_after.is_some_and(|limit| frames >= limit) {
            let message = b"stream moved";
            socket.write_u8(StatusCode::FailedPrecondition as u8).await?;
            socket.write_u32(message.len() as u32).await?;
            socket.write_all(message).await?;
            tracing::info!(frames, "ingest stub requested a reconnect");
            return Ok(());
        }
    }
}

async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> std::io::Result<Vec<u8>> {
    let len = reader.read_u32().await? as usize;
    let mut buf = vec![0; len];
    reader.read_exact(&mut buf).await?;
    Ok(buf)
}
