use std::{net::SocketAddr, sync::Arc};

use axum::{
    extract::State,
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Redirect},
    routing::{get, post},
    Json, Router,
};
use design_api::config::load_settings;
use design_api::{build_services, PipelineError};
use shared::{
    domain::{GeneratedDesign, SessionUser},
    error::{ApiError, ErrorCode},
    protocol::{DesignHistoryResponse, GenerateDesignRequest, StyleSummary},
    style::StyleKey,
};
use supabase_integration::AuthError;
use tower_http::limit::RequestBodyLimitLayer;
use tracing::{error, info, warn};

mod app_state;

use app_state::AppState;

const MAX_REQUEST_BYTES: usize = 16 * 1024;
const ACCESS_TOKEN_COOKIE: &str = "sb-access-token";

type HttpError = (StatusCode, Json<ApiError>);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_env_filter("info").init();

    let settings = load_settings()?;
    let services = build_services(&settings).await.map_err(|error| {
        error!(
            error = %format!("{error:#}"),
            "failed to wire services; check SUPABASE_URL, SUPABASE_KEY and DATABASE_URL"
        );
        error
    })?;
    if settings.replicate_api_token.is_none() {
        warn!("REPLICATE_API_TOKEN is not set; every generation will fail");
    }

    let app = build_router(Arc::new(AppState::from(services)));

    let addr: SocketAddr = settings.server_bind.parse()?;
    info!(%addr, "server listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/styles", get(list_styles))
        .route("/session", get(current_session))
        .route("/designs", get(list_designs).post(create_design))
        .route("/auth/signout", post(sign_out))
        .layer(RequestBodyLimitLayer::new(MAX_REQUEST_BYTES))
        .with_state(state)
}

async fn healthz(State(state): State<Arc<AppState>>) -> Result<&'static str, HttpError> {
    if let Some(store) = &state.local_store {
        store.health_check().await.map_err(|e| {
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(ApiError::new(ErrorCode::Internal, format!("{e:#}"))),
            )
        })?;
    }
    Ok("ok")
}

async fn list_styles() -> Json<Vec<StyleSummary>> {
    Json(StyleKey::ALL.into_iter().map(StyleSummary::from).collect())
}

async fn current_session(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<SessionUser>, HttpError> {
    Ok(Json(session_user(&state, &headers).await?))
}

async fn create_design(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<GenerateDesignRequest>,
) -> Result<Json<GeneratedDesign>, HttpError> {
    let style = match req.style.as_deref() {
        None => StyleKey::default(),
        Some(raw) => raw.parse::<StyleKey>().map_err(|e| {
            (
                StatusCode::BAD_REQUEST,
                Json(ApiError::new(ErrorCode::Validation, e.to_string())),
            )
        })?,
    };
    // An empty prompt is rejected before the session is looked at.
    if req.prompt.trim().is_empty() {
        return Err(pipeline_error(PipelineError::EmptyPrompt));
    }

    let user = session_user(&state, &headers).await?;
    let design = state
        .pipeline
        .submit(&req.prompt, style, Some(&user.id))
        .await
        .map_err(pipeline_error)?;
    Ok(Json(design))
}

async fn list_designs(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Json<DesignHistoryResponse> {
    let designs = match session_user(&state, &headers).await {
        Ok(user) => state.pipeline.load_history(&user.id).await,
        Err(_) => Vec::new(),
    };
    Json(DesignHistoryResponse { designs })
}

async fn sign_out(State(state): State<Arc<AppState>>, headers: HeaderMap) -> impl IntoResponse {
    if let Some(token) = access_token(&headers) {
        state.auth.sign_out(&token).await;
    }
    (
        [(
            header::SET_COOKIE,
            format!("{ACCESS_TOKEN_COOKIE}=; Path=/; Max-Age=0; HttpOnly; SameSite=Lax"),
        )],
        Redirect::to("/"),
    )
}

async fn session_user(state: &AppState, headers: &HeaderMap) -> Result<SessionUser, HttpError> {
    let token = access_token(headers).ok_or_else(|| auth_error(AuthError::MissingToken))?;
    state.auth.resolve(&token).await.map_err(auth_error)
}

/// Bearer header first, then the session cookie set by the browser client.
fn access_token(headers: &HeaderMap) -> Option<String> {
    let bearer = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty());
    if let Some(token) = bearer {
        return Some(token.to_string());
    }

    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, value)| *name == ACCESS_TOKEN_COOKIE && !value.is_empty())
        .map(|(_, value)| value.to_string())
}

fn auth_error(err: AuthError) -> HttpError {
    let status = match err {
        AuthError::MissingToken | AuthError::InvalidSession(_) => StatusCode::UNAUTHORIZED,
        AuthError::Unavailable(_) => StatusCode::BAD_GATEWAY,
    };
    let message = match err {
        AuthError::MissingToken => PipelineError::AuthRequired.to_string(),
        other => other.to_string(),
    };
    let code = if status == StatusCode::UNAUTHORIZED {
        ErrorCode::Unauthorized
    } else {
        ErrorCode::Upstream
    };
    (status, Json(ApiError::new(code, message)))
}

fn pipeline_error(err: PipelineError) -> HttpError {
    let status = match err.code() {
        ErrorCode::Validation => StatusCode::BAD_REQUEST,
        ErrorCode::Unauthorized => StatusCode::UNAUTHORIZED,
        ErrorCode::Conflict => StatusCode::CONFLICT,
        ErrorCode::Upstream => StatusCode::BAD_GATEWAY,
        ErrorCode::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(ApiError::from(err)))
}

#[cfg(test)]
#[path = "tests/main_tests.rs"]
mod tests;
