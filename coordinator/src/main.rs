//! Coordinator service: HTTP API gateway for the performance dashboards.
//!
//! Receives JSON requests from the dashboard, runs the matching query cycle
//! of the `perf-pipeline` crate against the search engine and returns chart
//! or table data as JSON.
//!
//! # Configuration
//! Settings are read from `DASHBOARD_*` environment variables (a `.env` file
//! is honoured). The engine password is resolved via Bitwarden Secrets
//! Manager (when `BWS_ACCESS_TOKEN` is set) or plain environment variables.
//!
//! | Env var                              | Default                   |
//! |--------------------------------------|---------------------------|
//! | `DASHBOARD_LISTEN_ADDR`              | `0.0.0.0:8080`            |
//! | `DASHBOARD_ENGINE_URL`               | `http://localhost:9200`   |
//! | `DASHBOARD_ENGINE_USER`              | unset (no auth)           |
//! | `DASHBOARD_ENGINE_PASSWORD`          | unset                     |
//! | `DASHBOARD_REQUEST_TIMEOUT_SECS`     | `30`                      |
//! | `DASHBOARD_QPS_INDEX_PREFIX`         | `u2performance-`          |
//! | `DASHBOARD_HOST_PERF_INDEX_PREFIX`   | `nt_zabbix_performance-`  |
//! | `DASHBOARD_INDEX_GRANULARITY`        | `day`                     |
//! | `DASHBOARD_INDEX_UTC_OFFSET_SECS`    | unset (host local time)   |
//! | `DASHBOARD_METRIC_NAME`              | `每秒DNS查询数`            |
//! | `DASHBOARD_QPS_HOSTS`                | empty (all hosts)         |
//! | `DASHBOARD_ROLE_PAGE_SIZE`           | `100`                     |
//! | `DASHBOARD_ROLE_SPAN_MAX_DAYS`       | `30`                      |
//! | `DASHBOARD_TEMPLATES_DIR`            | unset (built-in templates)|
//! | `BWS_ENGINE_PASSWORD_ID`             | `search-engine-password`  |

mod handlers;
mod models;
mod secrets;

use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{
    routing::{get, post},
    Router,
};
use perf_pipeline::{DashboardService, HttpSearchExecutor, Settings};
use tower_http::trace::TraceLayer;
use tracing::info;

// ------------------------------------------------------------------ //
//  Shared application state                                           //
// ------------------------------------------------------------------ //

/// Shared state injected into every Axum handler via `State`.
pub struct AppState {
    pub service: DashboardService,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        // QPS overview and role drill-down
        .route("/qps/overview", post(handlers::qps_overview))
        .route("/qps/roles", post(handlers::role_detail))
        .route("/qps/roles/hosts/page", post(handlers::host_page))
        // Host performance around an alert
        .route("/perf/host", post(handlers::host_perf))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ------------------------------------------------------------------ //
//  Entry point                                                        //
// ------------------------------------------------------------------ //

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("coordinator=info".parse()?)
                .add_directive("perf_pipeline=info".parse()?),
        )
        .json()
        .init();

    let settings = Settings::load().context("Failed to load settings")?;

    let mut executor = HttpSearchExecutor::new(&settings.engine_url, settings.request_timeout())
        .context("Failed to build search client")?;
    if let Some(user) = settings.engine_user.as_deref() {
        let password = secrets::get_secret(&secrets::ENGINE_PASSWORD).await?;
        executor = executor.with_basic_auth(user, &password);
    }

    info!(
        engine = settings.engine_url,
        granularity = %settings.index_granularity,
        "search engine configured"
    );

    let service = DashboardService::new(&settings, Arc::new(executor))
        .context("Failed to initialise dashboard service")?;
    let app = router(Arc::new(AppState { service }));

    let listener = tokio::net::TcpListener::bind(&settings.listen_addr).await?;
    info!(addr = settings.listen_addr, "coordinator listening");

    axum::serve(listener, app).await?;

    Ok(())
}
