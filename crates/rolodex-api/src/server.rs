//! Rolodex server with graceful shutdown
//!
//! One process can serve the HTTP API, run the note worker, or both. Every
//! role shares the same SQLite database, which holds the notes and the
//! durable job queue.

use axum::{middleware, Router};
use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tower_http::compression::CompressionLayer;
use tower_http::trace::TraceLayer;

use rolodex_persist::SqliteBackend;
use rolodex_queue::{
    NoteHandlers, QueueBackend, QueueConfig, RequeuePolicy, WorkerConfig, WorkerPool,
};

use crate::auth::JwtAuth;
use crate::error::ApiError;
use crate::jobs::note::{NoteSideEffectJob, DEFAULT_NOTE_JOB_LATENCY};
use crate::middleware::{
    auth_middleware, body_limit_layer, cors_layer, request_id_middleware,
    security_headers_middleware, timeout_layer, tracing_middleware,
};
use crate::routes::api_router;
use crate::state::AppState;

const DEFAULT_DATABASE_URL: &str = "sqlite:rolodex.db?mode=rwc";

/// Which halves of the system this process runs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerRole {
    Api,
    Worker,
    All,
}

impl ServerRole {
    pub fn serves_api(self) -> bool {
        matches!(self, Self::Api | Self::All)
    }

    pub fn runs_worker(self) -> bool {
        matches!(self, Self::Worker | Self::All)
    }
}

impl FromStr for ServerRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "api" => Ok(Self::Api),
            "worker" => Ok(Self::Worker),
            "all" => Ok(Self::All),
            other => Err(format!("unknown role '{}'", other)),
        }
    }
}

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Server address
    pub addr: SocketAddr,
    /// Request timeout
    pub timeout: Duration,
    /// Max request body size (bytes)
    pub max_body_size: usize,
    /// Enable compression
    pub compression: bool,
    pub role: ServerRole,
    /// SQLite database shared by notes and the job queue
    pub database_url: String,
    /// Simulated latency of the note side effect
    pub note_job_latency: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            timeout: Duration::from_secs(30),
            max_body_size: 1024 * 1024, // 1MB
            compression: true,
            role: ServerRole::All,
            database_url: DEFAULT_DATABASE_URL.to_string(),
            note_job_latency: DEFAULT_NOTE_JOB_LATENCY,
        }
    }
}

impl ServerConfig {
    /// Create from environment variables
    pub fn from_env() -> Self {
        let port: u16 = std::env::var("ROLODEX_PORT")
            .or_else(|_| std::env::var("PORT"))
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(8080);

        let timeout_secs: u64 = std::env::var("ROLODEX_TIMEOUT_SECS")
            .ok()
            .and_then(|t| t.parse().ok())
            .unwrap_or(30);

        let role = match std::env::var("ROLODEX_ROLE") {
            Ok(raw) => raw.parse().unwrap_or_else(|e| {
                tracing::warn!(error = %e, "Invalid ROLODEX_ROLE, running all roles");
                ServerRole::All
            }),
            Err(_) => ServerRole::All,
        };

        let note_job_latency = std::env::var("ROLODEX_NOTE_JOB_LATENCY_MS")
            .ok()
            .and_then(|ms| ms.parse().ok())
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_NOTE_JOB_LATENCY);

        Self {
            addr: SocketAddr::from(([0, 0, 0, 0], port)),
            timeout: Duration::from_secs(timeout_secs),
            role,
            database_url: std::env::var("DATABASE_URL")
                .unwrap_or_else(|_| DEFAULT_DATABASE_URL.to_string()),
            note_job_latency,
            ..Default::default()
        }
    }
}

/// Wrap the note routes in the full middleware stack
pub fn build_router(state: AppState, config: &ServerConfig) -> Router {
    let mut app = api_router(state.clone());

    if config.compression {
        app = app.layer(CompressionLayer::new());
    }

    // Layers run bottom to top: auth first, compression last
    app.layer(body_limit_layer(config.max_body_size))
        .layer(timeout_layer(config.timeout))
        .layer(cors_layer())
        .layer(middleware::from_fn(security_headers_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(middleware::from_fn(tracing_middleware))
        .layer(middleware::from_fn(request_id_middleware))
        .layer(middleware::from_fn_with_state(state, auth_middleware))
}

/// Rolodex server
pub struct RolodexServer {
    config: ServerConfig,
    db: SqliteBackend,
    app_state: Option<AppState>,
    worker: Option<Arc<WorkerPool<dyn QueueBackend>>>,
}

impl RolodexServer {
    /// Open the database and wire up the roles named in `config`
    pub async fn new(config: ServerConfig, queue_config: QueueConfig) -> Result<Self, ApiError> {
        let db = SqliteBackend::new(&config.database_url)
            .await
            .map_err(|e| ApiError::Internal(format!("DB Init failed: {}", e)))?;

        let queue: Arc<dyn QueueBackend> = Arc::new(db.queue(&queue_config.queue_name));
        let job_options = queue_config.job_options();

        let worker = config.role.runs_worker().then(|| {
            let handler = Arc::new(NoteSideEffectJob::new(config.note_job_latency));
            Arc::new(WorkerPool::new_with_arc(
                queue.clone(),
                WorkerConfig::from(&queue_config),
                NoteHandlers::shared(handler),
                RequeuePolicy::new(queue_config.global_max_retries, job_options),
            ))
        });

        let app_state = if config.role.serves_api() {
            let auth = JwtAuth::from_env()?;
            Some(AppState::new(
                Arc::new(auth),
                Arc::new(db.notes()),
                queue,
                job_options,
            ))
        } else {
            None
        };

        tracing::info!(
            role = ?config.role,
            queue = %queue_config.queue_name,
            max_attempts = queue_config.max_attempts,
            global_max_retries = queue_config.global_max_retries,
            "Rolodex server initialised"
        );

        Ok(Self {
            config,
            db,
            app_state,
            worker,
        })
    }

    /// The configured router, when this process serves the API
    pub fn router(&self) -> Option<Router> {
        self.app_state
            .as_ref()
            .map(|state| build_router(state.clone(), &self.config))
    }

    /// Run until a shutdown signal arrives, then drain the worker
    pub async fn run(self) -> Result<(), ApiError> {
        let worker_task = self.worker.clone().map(|worker| {
            tracing::info!(
                concurrency = worker.config().max_concurrency,
                "Starting note worker"
            );
            tokio::spawn(async move { worker.start().await })
        });

        match self.router() {
            Some(app) => {
                let addr = self.config.addr;
                let listener = tokio::net::TcpListener::bind(addr).await?;
                tracing::info!("Rolodex API listening on http://{}", addr);

                axum::serve(listener, app)
                    .with_graceful_shutdown(shutdown_signal())
                    .await
                    .map_err(|e| ApiError::Internal(format!("Server error: {}", e)))?;
            }
            None => shutdown_signal().await,
        }

        if let Some(worker) = &self.worker {
            worker.shutdown().await;
        }
        if let Some(task) = worker_task {
            if let Err(e) = task.await {
                tracing::error!(error = %e, "Worker task ended abnormally");
            }
        }

        self.db.close().await;
        tracing::info!("Server shutdown complete");
        Ok(())
    }
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, starting graceful shutdown");
        }
        _ = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}

/// Initialize tracing subscriber
pub fn init_tracing() {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new("info,rolodex_api=debug,rolodex_queue=debug,tower_http=debug")
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .init();
}
