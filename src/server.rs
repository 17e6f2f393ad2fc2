use crate::cache::{CacheClient, InMemoryStore};
use crate::config::{Config, StoreBackend};
use crate::error::{RateLimitError, StartupError};
use crate::fakestore::{FakeStoreRepo, FakeStoreService};
use crate::financial::FinancialService;
use crate::handlers::{self, AppState};
use crate::health::HealthChecker;
use crate::key_generator::KeyGenerator;
use crate::middleware::{enforce_rate_limit, logging_middleware};
use crate::rate_limit_config::{RateLimitConfig, RoutePolicies};
use crate::rate_limiter::RateLimiter;
use crate::redis::RedisClient;
use axum::routing::{get, post, MethodRouter};
use axum::{middleware, Router};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub struct Server {
    app: Router,
    bind_address: SocketAddr,
}

impl Server {
    pub async fn new(config: Config) -> Result<Self, StartupError> {
        let app = create_app(&config).await?;
        Ok(Self {
            app,
            bind_address: config.bind_address,
        })
    }

    pub async fn run(self) -> Result<(), StartupError> {
        let listener = tokio::net::TcpListener::bind(self.bind_address).await?;

        tracing::info!("Server listening on {}", listener.local_addr()?);
        tracing::info!("Health check available at /health");
        tracing::info!("Readiness check available at /ready");

        // Run server with graceful shutdown
        axum::serve(
            listener,
            self.app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown_signal())
        .await?;

        Ok(())
    }
}

/// Connects the store and wires every route. Fails on any invalid rate
/// limit policy so a misconfigured route never serves traffic.
pub async fn create_app(config: &Config) -> Result<Router, StartupError> {
    let store = create_store(config).await?;
    let limiter = RateLimiter::new(store.clone(), KeyGenerator::new(config.trust_forwarded_headers));
    let repo = Arc::new(FakeStoreRepo::new(&config.fakestore_base_url)?);

    let state = AppState {
        financial: FinancialService::new(),
        catalog: Arc::new(FakeStoreService::new(store.clone(), repo)),
        health: HealthChecker::new(store),
        fanout_concurrency: config.fanout_concurrency,
    };

    Ok(build_router(state, &limiter, &config.route_policies()?)?)
}

pub async fn create_store(config: &Config) -> Result<Arc<dyn CacheClient>, StartupError> {
    match config.store_backend() {
        StoreBackend::Memory => {
            tracing::warn!("Using in-memory store; rate limits are not shared between instances");
            Ok(Arc::new(InMemoryStore::new()))
        }
        StoreBackend::Redis(url) => {
            let client = RedisClient::connect(url, config.redis_timeout()).await?;
            tracing::info!("Connected to Redis");
            Ok(Arc::new(client))
        }
    }
}

pub fn build_router(
    state: AppState,
    limiter: &RateLimiter,
    policies: &RoutePolicies,
) -> Result<Router, RateLimitError> {
    let app = Router::new()
        .route(
            "/calculate",
            throttled(limiter, &policies.calculate, post(handlers::calculate))?,
        )
        .route(
            "/fake-store/all/category",
            throttled(limiter, &policies.categories, get(handlers::all_categories))?,
        )
        .route(
            "/fake-store/all/category/products",
            throttled(
                limiter,
                &policies.category_products,
                get(handlers::all_category_products),
            )?,
        )
        .route(
            "/fake-store/products/:id",
            throttled(limiter, &policies.product, get(handlers::product))?,
        )
        .route("/ping", throttled(limiter, &policies.ping, get(handlers::ping))?)
        // Health and readiness endpoints
        .route("/health", get(handlers::health_check))
        .route("/ready", get(handlers::readiness_check))
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive())
                .layer(middleware::from_fn(logging_middleware)),
        );

    Ok(app)
}

fn throttled(
    limiter: &RateLimiter,
    config: &RateLimitConfig,
    route: MethodRouter<AppState>,
) -> Result<MethodRouter<AppState>, RateLimitError> {
    let guard = limiter.limit_route(config)?;
    Ok(route.route_layer(middleware::from_fn_with_state(guard, enforce_rate_limit)))
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install signal handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown");
        },
        _ = terminate => {
            tracing::info!("Received terminate signal, initiating graceful shutdown");
        },
    }
}
