//! # Darkroom
//!
//! Backend for an AI image-editing service: users upload a photo plus a
//! prompt, the job is dispatched to a generation provider, and the finished
//! images land in a time-limited gallery. Credits pay for jobs; a
//! payment provider tops them up through hosted checkout.
//!
//! ## Architecture
//!
//! - **HTTP API** ([`api`]): axum handlers for job submission and polling,
//!   credit balances, gallery listings, checkout, and inbound webhooks
//! - **Repositories** ([`db`]): all SQL lives behind repository structs that
//!   borrow a `PgConnection`; the handlers never write queries
//! - **Providers** ([`generation`], [`payment_providers`]): trait objects
//!   created from configuration, so tests and dev environments swap in mocks
//! - **Reaper** ([`reaper`]): background loop that settles stuck jobs and
//!   purges expired gallery rows
//!
//! The money invariants are enforced in the database, not in handler logic:
//! balances move through a single conditional UPDATE, every movement is an
//! append-only ledger row with a unique idempotency key, and terminal job
//! transitions are guarded UPDATEs that fire at most once.
//!
//! ## Quickstart
//!
//! ```ignore
//! use darkroom::{Application, config::Config};
//!
//! let config = Config::default();
//! let app = Application::new(config).await?;
//! app.serve(shutdown_signal()).await?;
//! ```

pub mod api;
pub mod auth;
pub mod config;
pub mod db;
pub mod errors;
pub mod generation;
pub mod payment_providers;
pub mod reaper;
pub mod telemetry;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
pub mod types;

use axum::{
    Router,
    extract::DefaultBodyLimit,
    http::{HeaderValue, Method, header},
    routing::{get, post},
};
use bon::Builder;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer},
};
use tracing::{Level, debug, info};

pub use config::Config;
pub use types::{ApiKeyId, JobId, UserId};

use crate::api::handlers::{credits, gallery, jobs, payments, webhooks};
use crate::generation::GenerationProvider;
use crate::payment_providers::PaymentProvider;

/// Application state shared across all request handlers.
///
/// Cheap to clone: the pool is already shared and the providers are behind
/// `Arc`s.
#[derive(Clone, Builder)]
pub struct AppState {
    pub db: PgPool,
    pub config: Config,
    /// Absent when no payment provider is configured; checkout and payment
    /// webhooks respond 400 in that case
    pub payment: Option<Arc<dyn PaymentProvider>>,
    pub generation: Arc<dyn GenerationProvider>,
}

/// Get the database migrator
pub fn migrator() -> sqlx::migrate::Migrator {
    sqlx::migrate!("./migrations")
}

/// Connect to PostgreSQL and bring the schema up to date
pub async fn setup_database(config: &Config) -> anyhow::Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(config.database.pool.max_connections)
        .min_connections(config.database.pool.min_connections)
        .acquire_timeout(Duration::from_secs(config.database.pool.acquire_timeout_secs))
        .connect(&config.database.url)
        .await?;

    migrator().run(&pool).await?;

    Ok(pool)
}

fn cors_layer(config: &Config) -> anyhow::Result<CorsLayer> {
    let origins = &config.cors.allowed_origins;
    if origins.iter().any(|o| o == "*") {
        return Ok(CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any));
    }

    let origins = origins
        .iter()
        .map(|origin| origin.parse::<HeaderValue>())
        .collect::<Result<Vec<_>, _>>()?;

    Ok(CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE]))
}

/// Build the full application router
pub fn build_router(state: AppState) -> anyhow::Result<Router> {
    let max_body = state.config.jobs.max_image_bytes + 64 * 1024;

    let api_routes = Router::new()
        .route("/jobs", post(jobs::submit_job).get(jobs::list_jobs))
        .route("/jobs/{id}", get(jobs::get_job))
        .route("/credits", get(credits::get_balance))
        .route("/credits/transactions", get(credits::list_transactions))
        .route("/gallery", get(gallery::list_gallery))
        .route("/checkout", post(payments::create_checkout))
        .layer(cors_layer(&state.config)?);

    // The generation provider POSTs from its own origin and preflights, so
    // this route gets a permissive CORS policy independent of the browser
    // config
    let generation_webhook = Router::new()
        .route("/webhook/{job_id}", post(webhooks::generation_webhook))
        .layer(CorsLayer::permissive());

    let router = Router::new()
        .route("/healthz", get(|| async { "ok" }))
        .nest("/api", api_routes)
        .merge(generation_webhook)
        .route("/webhooks/payments", post(webhooks::payment_webhook))
        .layer(DefaultBodyLimit::max(max_body))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_request(DefaultOnRequest::new().level(Level::DEBUG))
                .on_response(DefaultOnResponse::new().level(Level::DEBUG)),
        )
        .with_state(state);

    Ok(router)
}

/// Handles to the background tasks running alongside the HTTP server.
///
/// Dropping the `drop_guard` cancels the shutdown token, so tests that let
/// this fall out of scope stop the reaper automatically.
pub struct BackgroundServices {
    background_tasks: Vec<tokio::task::JoinHandle<()>>,
    shutdown_token: tokio_util::sync::CancellationToken,
    // Pub so that callers can disarm it if they want the tasks to outlive it
    pub drop_guard: Option<tokio_util::sync::DropGuard>,
}

impl BackgroundServices {
    /// Gracefully shut down all background tasks
    pub async fn shutdown(self) {
        self.shutdown_token.cancel();
        for handle in self.background_tasks {
            let _ = handle.await;
        }
    }
}

fn setup_background_services(
    pool: PgPool,
    config: Config,
    shutdown_token: tokio_util::sync::CancellationToken,
) -> BackgroundServices {
    let drop_guard = shutdown_token.clone().drop_guard();
    let mut background_tasks = Vec::new();

    let reaper_token = shutdown_token.clone();
    background_tasks.push(tokio::spawn(async move {
        reaper::run(pool, config, reaper_token).await;
    }));

    BackgroundServices {
        background_tasks,
        shutdown_token,
        drop_guard: Some(drop_guard),
    }
}

/// The assembled application: router, state, and background services.
///
/// # Lifecycle
///
/// 1. [`Application::new`] connects to the database, runs migrations, builds
///    providers from config, and starts the reaper
/// 2. [`Application::serve`] binds a TCP listener and handles requests until
///    the shutdown future resolves
pub struct Application {
    router: Router,
    config: Config,
    pool: PgPool,
    bg_services: BackgroundServices,
}

impl Application {
    /// Create a new application instance with all resources initialized
    pub async fn new(config: Config) -> anyhow::Result<Self> {
        Self::new_with_pool(config, None).await
    }

    /// Create an application over an existing pool (used by tests, where the
    /// harness owns the database)
    pub async fn new_with_pool(config: Config, pool: Option<PgPool>) -> anyhow::Result<Self> {
        debug!("Starting darkroom with configuration: {:#?}", config);

        let pool = match pool {
            Some(pool) => {
                migrator().run(&pool).await?;
                pool
            }
            None => setup_database(&config).await?,
        };

        let shutdown_token = tokio_util::sync::CancellationToken::new();
        let bg_services = setup_background_services(pool.clone(), config.clone(), shutdown_token);

        let payment = config
            .payment
            .as_ref()
            .map(|payment_config| Arc::from(payment_providers::create_provider(payment_config)));
        let generation = generation::create_provider(&config.generation);

        let state = AppState::builder()
            .db(pool.clone())
            .config(config.clone())
            .maybe_payment(payment)
            .generation(generation)
            .build();

        let router = build_router(state)?;

        Ok(Self {
            router,
            config,
            pool,
            bg_services,
        })
    }

    /// Convert the application into a test server
    #[cfg(any(test, feature = "test-utils"))]
    pub fn into_test_server(self) -> anyhow::Result<(axum_test::TestServer, BackgroundServices)> {
        let server = axum_test::TestServer::new(self.router)
            .map_err(|e| anyhow::anyhow!("Failed to create test server: {e}"))?;
        Ok((server, self.bg_services))
    }

    /// Start serving the application
    pub async fn serve<F>(self, shutdown: F) -> anyhow::Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let bind_addr = self.config.bind_address();
        let listener = TcpListener::bind(&bind_addr).await?;
        info!("Darkroom listening on http://{bind_addr}");

        axum::serve(listener, self.router)
            .with_graceful_shutdown(shutdown)
            .await?;

        self.bg_services.shutdown().await;

        info!("Closing database connections...");
        self.pool.close().await;

        Ok(())
    }
}
