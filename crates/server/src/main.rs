// crates/server/src/main.rs
//! Document run server binary.
//!
//! Starts the worker pool and the Axum HTTP server in one process. Both share
//! the in-memory queue and buses; Ctrl-C stops the server first and then the
//! workers.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use docrun_core::{EchoRunner, QueueConfig};
use docrun_server::metrics::init_metrics;
use docrun_server::{create_app, DocumentEntry, InMemoryDocuments, InProcess, SdkVersion, ServerConfig};

#[derive(Debug, Parser)]
#[command(name = "docrun", version, about = "Job-backed document run server")]
struct Cli {
    /// Port to listen on [env: DOCRUN_PORT, PORT]
    #[arg(long)]
    port: Option<u16>,

    /// Jobs run at the same time [env: DOCRUN_CONCURRENCY]
    #[arg(long)]
    concurrency: Option<usize>,

    /// Attempts per job, including the first [env: DOCRUN_ATTEMPTS]
    #[arg(long)]
    attempts: Option<u32>,

    /// Events buffered per bus subscriber [env: DOCRUN_BUS_CAPACITY]
    #[arg(long)]
    bus_capacity: Option<usize>,

    /// Finished job records kept for late readers [env: DOCRUN_KEEP_FINISHED]
    #[arg(long)]
    keep_finished: Option<usize>,

    /// SDK versions below this get the legacy body [env: DOCRUN_LEGACY_SDK_THRESHOLD]
    #[arg(long)]
    legacy_sdk_threshold: Option<SdkVersion>,

    /// Register a document: PROJECT_ID:PATH=DOCUMENT_UUID (repeatable)
    #[arg(long = "document", value_name = "ENTRY")]
    documents: Vec<DocumentEntry>,
}

impl Cli {
    fn queue_config(&self) -> QueueConfig {
        let mut config = QueueConfig::from_env();
        if let Some(concurrency) = self.concurrency.filter(|c| *c > 0) {
            config.concurrency = concurrency;
        }
        if let Some(attempts) = self.attempts.filter(|a| *a > 0) {
            config.attempts = attempts;
        }
        if let Some(capacity) = self.bus_capacity.filter(|c| *c > 0) {
            config.bus_capacity = capacity;
        }
        if let Some(keep) = self.keep_finished.filter(|k| *k > 0) {
            config.keep_finished = keep;
        }
        config
    }

    fn server_config(&self) -> ServerConfig {
        let mut config = ServerConfig::from_env();
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(threshold) = self.legacy_sdk_threshold {
            config.legacy_sdk_threshold = threshold;
        }
        config
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let guard = docrun_observability::init(docrun_observability::DEFAULT_FILTER)?;
    let faults = docrun_observability::reporter(&guard);

    init_metrics();

    let queue_config = cli.queue_config();
    let server_config = cli.server_config();
    let documents: InMemoryDocuments = cli.documents.iter().cloned().collect();
    tracing::info!(
        queue = %queue_config.name,
        concurrency = queue_config.concurrency,
        attempts = queue_config.attempts,
        documents = documents.len(),
        sentry = guard.sentry_enabled(),
        "Starting document run server"
    );

    let runtime = InProcess::start(
        &queue_config,
        Arc::new(EchoRunner::new()),
        Arc::new(documents),
        faults,
        server_config.legacy_sdk_threshold,
    );
    let app = create_app(runtime.state.clone());

    let addr = SocketAddr::from(([127, 0, 0, 1], server_config.port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    eprintln!("\n  docrun v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("  \u{2192} http://localhost:{}\n", server_config.port);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("HTTP server stopped, draining workers");
    runtime.shutdown().await;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for Ctrl-C");
    }
}
