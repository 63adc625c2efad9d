use crate::db::{Database, ANALYTICS_WINDOW};
use crate::errors::{AppError, AppResult};
use crate::identity::UserService;
use crate::models::{
    AnalyticsRecord, CreateSessionPayload, HealthResponse, PerformanceMetric, RealtimeSnapshot,
    RedirectUrlResponse, SalesRecord, SuccessResponse, UserRecord,
};
use crate::realtime::RealtimeGenerator;
use axum::extract::{Path, State};
use axum::http::{header, HeaderMap, Method};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

#[derive(Clone)]
pub struct ApiState {
    pub db: Arc<Database>,
    pub users: Arc<dyn UserService>,
    pub realtime: Arc<dyn RealtimeGenerator>,
    pub cookie_name: String,
    pub cookie_max_age_secs: u64,
}

pub fn router(state: ApiState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION]);

    Router::new()
        .route("/health", get(health))
        .route("/api/sales", get(list_sales))
        .route("/api/analytics", get(list_analytics))
        .route("/api/metrics", get(list_metrics))
        .route("/api/realtime", get(realtime_snapshot))
        .route("/api/sessions", post(create_session))
        .route("/api/users/me", get(current_user))
        .route("/api/logout", get(logout))
        .route("/api/oauth/{provider}/redirect_url", get(oauth_redirect_url))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

pub async fn serve(listener: TcpListener, state: ApiState) -> AppResult<()> {
    let addr = listener.local_addr()?;
    tracing::info!(%addr, "dashboard api listening");
    axum::serve(listener, router(state)).await?;
    Ok(())
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        service: "dataflow-dashboard".to_string(),
        timestamp: Utc::now(),
    })
}

async fn list_sales(State(state): State<ApiState>) -> AppResult<Json<Vec<SalesRecord>>> {
    Ok(Json(state.db.list_sales()?))
}

async fn list_analytics(State(state): State<ApiState>) -> AppResult<Json<Vec<AnalyticsRecord>>> {
    Ok(Json(state.db.list_recent_analytics(ANALYTICS_WINDOW)?))
}

async fn list_metrics(State(state): State<ApiState>) -> AppResult<Json<Vec<PerformanceMetric>>> {
    Ok(Json(state.db.list_performance_metrics()?))
}

async fn realtime_snapshot(State(state): State<ApiState>) -> Json<RealtimeSnapshot> {
    Json(state.realtime.snapshot())
}

async fn create_session(
    State(state): State<ApiState>,
    Json(payload): Json<CreateSessionPayload>,
) -> AppResult<impl IntoResponse> {
    let code = payload
        .code
        .filter(|code| !code.trim().is_empty())
        .ok_or_else(|| AppError::BadRequest("No authorization code provided".to_string()))?;

    let token = state.users.exchange_code(&code)?;
    let cookie = session_cookie(&state.cookie_name, &token, state.cookie_max_age_secs);
    Ok(([(header::SET_COOKIE, cookie)], Json(SuccessResponse::ok())))
}

async fn current_user(State(state): State<ApiState>, headers: HeaderMap) -> AppResult<Json<UserRecord>> {
    let token = read_cookie(&headers, &state.cookie_name)
        .ok_or_else(|| AppError::Unauthorized("Session token missing".to_string()))?;
    let user = state
        .users
        .current_user(&token)?
        .ok_or_else(|| AppError::Unauthorized("Session expired or invalid".to_string()))?;
    Ok(Json(user))
}

async fn logout(State(state): State<ApiState>, headers: HeaderMap) -> AppResult<impl IntoResponse> {
    if let Some(token) = read_cookie(&headers, &state.cookie_name) {
        state.users.delete_session(&token)?;
    }
    let cookie = session_cookie(&state.cookie_name, "", 0);
    Ok(([(header::SET_COOKIE, cookie)], Json(SuccessResponse::ok())))
}

async fn oauth_redirect_url(
    State(state): State<ApiState>,
    Path(provider): Path<String>,
) -> AppResult<Json<RedirectUrlResponse>> {
    let redirect_url = state.users.oauth_redirect_url(&provider)?;
    Ok(Json(RedirectUrlResponse { redirect_url }))
}

fn session_cookie(name: &str, value: &str, max_age_secs: u64) -> String {
    format!(
        "{}={}; HttpOnly; Path=/; SameSite=None; Secure; Max-Age={}",
        name, value, max_age_secs
    )
}

fn read_cookie(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|raw| raw.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, _)| *key == name)
        .map(|(_, value)| value.trim().to_string())
        .filter(|value| !value.is_empty())
}
