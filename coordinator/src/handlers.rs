//! Axum HTTP handlers for the coordinator service.

use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use perf_pipeline::PipelineError;
use serde::Serialize;
use tracing::{error, info, warn};

use crate::{
    models::{HostPageBody, HostPerfBody, OverviewBody, RoleDetailBody},
    AppState,
};

// ------------------------------------------------------------------ //
//  Error mapping                                                      //
// ------------------------------------------------------------------ //

pub fn status_for(err: &PipelineError) -> StatusCode {
    match err {
        PipelineError::Validation(_) => StatusCode::BAD_REQUEST,
        PipelineError::DataShape(_) => StatusCode::NOT_FOUND,
        PipelineError::UnsupportedResultType(_) => StatusCode::UNPROCESSABLE_ENTITY,
        PipelineError::Transport(_) => StatusCode::BAD_GATEWAY,
        PipelineError::Configuration(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn respond<T: Serialize>(op: &'static str, result: perf_pipeline::Result<T>) -> Response {
    match result {
        Ok(body) => match serde_json::to_value(body) {
            Ok(json) => {
                info!(op, "request served");
                (StatusCode::OK, Json(json)).into_response()
            }
            Err(e) => {
                error!(op, error = %e, "response serialisation failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(serde_json::json!({"error": e.to_string()})),
                )
                    .into_response()
            }
        },
        Err(e) => {
            if e.is_system_fault() {
                error!(op, error = %e, "query cycle failed");
            } else {
                warn!(op, error = %e, "query cycle rejected");
            }
            (status_for(&e), Json(serde_json::json!({"error": e.to_string()}))).into_response()
        }
    }
}

// ------------------------------------------------------------------ //
//  QPS                                                                //
// ------------------------------------------------------------------ //

/// POST /qps/overview
pub async fn qps_overview(
    State(state): State<Arc<AppState>>,
    Json(body): Json<OverviewBody>,
) -> Response {
    respond("qps_overview", state.service.qps_overview(&body.into()).await)
}

/// POST /qps/roles
pub async fn role_detail(
    State(state): State<Arc<AppState>>,
    Json(body): Json<RoleDetailBody>,
) -> Response {
    respond("role_detail", state.service.role_detail(&body.into()).await)
}

/// POST /qps/roles/hosts/page
pub async fn host_page(
    State(state): State<Arc<AppState>>,
    Json(body): Json<HostPageBody>,
) -> Response {
    respond("host_page", state.service.load_host_page(&body.into()).await)
}

// ------------------------------------------------------------------ //
//  Host performance                                                   //
// ------------------------------------------------------------------ //

/// POST /perf/host
pub async fn host_perf(
    State(state): State<Arc<AppState>>,
    Json(body): Json<HostPerfBody>,
) -> Response {
    respond("host_perf", state.service.host_perf(&body.into()).await)
}

// ------------------------------------------------------------------ //
//  Health                                                             //
// ------------------------------------------------------------------ //

pub async fn health() -> impl IntoResponse {
    (StatusCode::OK, Json(serde_json::json!({"status": "ok"})))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use perf_pipeline::{DashboardService, FakeSearchExecutor, Settings, TransportError};
    use serde_json::{json, Value};
    use tower::ServiceExt;

    fn app(fake: &FakeSearchExecutor) -> axum::Router {
        let mut settings = Settings::defaults().unwrap();
        settings.index_utc_offset_secs = Some(0);
        let service = DashboardService::new(&settings, Arc::new(fake.clone())).unwrap();
        crate::router(Arc::new(AppState { service }))
    }

    async fn call(app: axum::Router, method: &str, uri: &str, body: Value) -> (StatusCode, Value) {
        let req = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        let status = resp.status();
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, json)
    }

    #[tokio::test]
    async fn health_is_ok() {
        let fake = FakeSearchExecutor::new();
        let req = Request::builder().uri("/health").body(Body::empty()).unwrap();
        let resp = app(&fake).oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn overview_returns_records() {
        let fake = FakeSearchExecutor::new();
        let latest = json!({"_source": {"appcode": "dns-core", "vendor": "acme"}});
        fake.push_response(json!({"aggregations": {"group_by_device": {"buckets": [{
            "latest_info": {"hits": {"hits": [latest]}},
            "hostip_values": {"buckets": [{"key": "10.0.0.1", "all_values": {"hits": {"hits": [
                {"_source": {"clock": 20, "value": 2}},
                {"_source": {"clock": 10, "value": "1"}}
            ]}}}]}
        }]}}}));

        let (status, body) = call(app(&fake), "POST", "/qps/overview", json!({})).await;
        assert_eq!(status, StatusCode::OK);
        let record = &body["records"][0];
        assert_eq!(record["hostip"], json!("10.0.0.1"));
        assert_eq!(record["chart"]["categories"], json!([10, 20]));
        assert_eq!(record["chart"]["values"], json!([1.0, 2.0]));
    }

    #[tokio::test]
    async fn missing_role_is_bad_request() {
        let fake = FakeSearchExecutor::new();
        let (status, body) = call(app(&fake), "POST", "/qps/roles", json!({"role": ""})).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], json!("role code is required"));
        assert!(fake.snapshot().is_empty());
    }

    #[tokio::test]
    async fn engine_failure_is_bad_gateway() {
        let fake = FakeSearchExecutor::new();
        fake.push_error(TransportError::Network("connection refused".into()));
        let (status, _) = call(app(&fake), "POST", "/qps/overview", json!({})).await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
    }

    #[tokio::test]
    async fn empty_aggregation_is_not_found() {
        let fake = FakeSearchExecutor::new();
        fake.push_response(json!({"aggregations": {"group_by_device": {"buckets": []}}}));
        let (status, body) = call(app(&fake), "POST", "/qps/overview", json!({})).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(body["error"].as_str().unwrap().starts_with("no data"));
    }

    #[tokio::test]
    async fn unknown_result_type_is_unprocessable() {
        let fake = FakeSearchExecutor::new();
        fake.push_response(json!({"hits": {"total": 1, "hits": [{"_source": {"type": 7}}]}}));
        let (status, _) = call(
            app(&fake),
            "POST",
            "/perf/host",
            json!({"first_occurrence": 1_600_000_000, "itemid": "4711"}),
        )
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test]
    async fn host_page_totals_request_reports_total() {
        let fake = FakeSearchExecutor::new();
        fake.push_response(json!({"hits": {"total": {"value": 321}, "hits": []}}));
        let end = perf_pipeline::time_params::now_secs() - 60;

        let (status, body) = call(
            app(&fake),
            "POST",
            "/qps/roles/hosts/page",
            json!({
                "hostip": "10.0.0.1",
                "role": "dns-core",
                "start_time": end - 3600,
                "end_time": end.to_string(),
                "current": 0,
                "page_size": 100
            }),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["state"]["pagination"]["total"], json!(321));
        assert_eq!(body["applied"], json!(true));
    }

    #[test]
    fn every_error_kind_has_a_status() {
        assert_eq!(
            status_for(&PipelineError::configuration("x")),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            status_for(&PipelineError::UnsupportedResultType(None)),
            StatusCode::UNPROCESSABLE_ENTITY
        );
    }
}
