//! Relay gateway binary.
//!
//! This binary runs the whole relay in one process on top of the `relay`
//! crate:
//!
//! - `POST /` and `POST /records` append producer records to a
//!   RocksDB-backed upstream log through a bounded intake queue,
//! - `GET /health` and `GET /status` report liveness and cursor progress,
//! - a background coordinator drains the log into bulk ledger transactions,
//! - a Prometheus exporter serves `/metrics`.
//!
//! Usage: `relay-gateway [ENV_FILE]` (defaults to `.env` when present).

mod config;
mod routes;
mod state;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    Router,
    routing::{get, post},
};
use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::{mpsc, watch};

use relay::{
    Coordinator, DedupStore, DefaultCoordinator, EthersLedgerClient, MetricsRegistry, RocksDbLog,
    SubmissionEngine, TokioClock, UpstreamLog, run_prometheus_http_server,
};
use config::EnvFile;
use routes::{health, records, status};
use state::{AppState, SharedState};

#[tokio::main]
async fn main() {
    // Load the env file first so RUST_LOG from it applies.
    let env_file = config::load_env_file(std::env::args().nth(1).as_deref());

    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "relay=info,relay_gateway=info".to_string()),
        )
        .init();

    let result = match env_file {
        Ok(env_file) => run(env_file).await,
        Err(e) => Err(e),
    };

    if let Err(e) = result {
        tracing::error!("fatal error: {e}");
        eprintln!("fatal error: {e}");
        std::process::exit(1);
    }
}

async fn run(env_file: EnvFile) -> Result<(), String> {
    match &env_file {
        EnvFile::Loaded(path) => tracing::info!(path = %path.display(), "loaded env file"),
        EnvFile::Absent => tracing::info!("no env file, using process environment"),
    }

    let cfg = config::relay_config()?;

    // ---------------------------
    // Metrics
    // ---------------------------

    let metrics = Arc::new(
        MetricsRegistry::new()
            .map_err(|e| format!("failed to initialise metrics registry: {e}"))?,
    );

    if cfg.metrics.enabled {
        let metrics_clone = metrics.clone();
        let addr = cfg.metrics.listen_addr;
        tokio::spawn(async move {
            if let Err(e) = run_prometheus_http_server(metrics_clone, addr).await {
                tracing::error!("metrics HTTP server error: {e}");
            }
        });
    }

    // ---------------------------
    // Upstream log + dedup cache
    // ---------------------------

    let log = Arc::new(
        RocksDbLog::open(&cfg.log)
            .map_err(|e| format!("failed to open upstream log at {}: {e}", cfg.log.path))?,
    );
    let committed = log
        .committed_cursor()
        .map_err(|e| format!("failed to read committed cursor: {e}"))?;
    let head = log
        .head()
        .map_err(|e| format!("failed to read log head: {e}"))?;
    tracing::info!(
        path = %cfg.log.path,
        committed = ?committed.map(|c| c.offset()),
        head = %head,
        "upstream log opened"
    );

    let dedup_store = DedupStore::new(&cfg.dedup.state_path);
    let dedup = dedup_store.load_or_fresh(&cfg.dedup);

    // ---------------------------
    // Ledger client + coordinator
    // ---------------------------

    let client = EthersLedgerClient::connect(&cfg.ledger)
        .map_err(|e| format!("failed to create ledger client: {e}"))?;

    // The intake port must be held before the coordinator is spawned.
    let listener = bind_intake(cfg.intake.listen_addr).await?;
    tracing::info!("relay gateway listening on http://{}", cfg.intake.listen_addr);

    let engine = SubmissionEngine::new(client, cfg.submission.clone());
    let coordinator: DefaultCoordinator = Coordinator::new(
        log.clone(),
        engine,
        dedup,
        TokioClock,
        cfg.pipeline.clone(),
    )
    .with_dedup_store(dedup_store)
    .with_metrics(metrics.pipeline.clone());

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let pipeline = tokio::spawn(coordinator.run(shutdown_rx));

    // ---------------------------
    // Intake queue + appender
    // ---------------------------

    let (intake_tx, intake_rx) = mpsc::channel(cfg.intake.queue_depth);
    let appender = tokio::spawn(state::run_appender(log.clone(), intake_rx));

    let app_state: SharedState = Arc::new(AppState {
        intake: intake_tx,
        log: log.clone(),
        metrics: metrics.clone(),
        key_source: cfg.pipeline.key_source,
    });

    // ---------------------------
    // HTTP router
    // ---------------------------

    let app = Router::new()
        .route("/", post(records::submit_record))
        .route("/records", post(records::submit_record))
        .route("/health", get(health::health))
        .route("/status", get(status::status))
        .with_state(app_state);

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| format!("HTTP server error: {e}"));

    // The router (and with it every intake sender) is gone; stop the
    // pipeline and let the appender drain.
    let _ = shutdown_tx.send(true);

    match pipeline.await {
        Ok(dedup) => tracing::info!(keys = dedup.inserted(), "pipeline stopped"),
        Err(e) => tracing::error!("pipeline task failed: {e}"),
    }
    if let Err(e) = appender.await {
        tracing::error!("intake appender task failed: {e}");
    }

    served
}

async fn bind_intake(addr: SocketAddr) -> Result<TcpListener, String> {
    TcpListener::bind(addr)
        .await
        .map_err(|e| format!("failed to bind {addr}: {e}"))
}

/// Waits for Ctrl-C or SIGTERM, used for graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::warn!("failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("shutdown signal received");
}
