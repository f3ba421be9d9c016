use axum::{
    async_trait,
    extract::{rejection::JsonRejection, FromRequestParts, Path, State},
    http::{request::Parts, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, patch, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::{error, warn};

use crate::db::models::{ExternalMatch, Match, Outcome, Role, ScoreResult, User};
use crate::engine::PredictionEngine;
use crate::error::Error;

const USER_ID_HEADER: &str = "x-user-id";
const USER_NAME_HEADER: &str = "x-user-name";
const USER_ROLE_HEADER: &str = "x-user-role";

#[derive(Clone)]
pub struct AppState {
    pub engine: PredictionEngine,
}

/// Build the Axum router for the prediction API.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(health_handler))
        .route("/api/matches", get(matches_handler))
        .route("/api/matches/fetch", post(fetch_matches_handler))
        .route("/api/matches/import", post(import_matches_handler))
        .route("/api/matches/:match_id", patch(set_result_handler))
        .route("/api/matches/:match_id/score", post(score_handler))
        .route("/api/predictions", get(predictions_handler))
        .route("/api/predictions/:match_id", post(submit_prediction_handler))
        .route("/api/leaderboard", get(leaderboard_handler))
        .route("/api/admin/audit", get(audit_handler))
        .route("/api/admin/reconcile-totals", post(rebuild_totals_handler))
        .layer(CorsLayer::permissive())
        .with_state(Arc::new(state))
}

// ── Errors ────────────────────────────────────────────────────────────────────

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = match &self {
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::InvalidState(_) | Error::Conflict(_) => StatusCode::CONFLICT,
            Error::UpstreamFailure(_) => StatusCode::BAD_GATEWAY,
            Error::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Error::Forbidden(_) => StatusCode::FORBIDDEN,
            Error::Storage(_) | Error::Poisoned => {
                error!("Request failed: {}", self);
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        let body = json!({ "error": self.kind(), "message": self.public_message() });
        (status, Json(body)).into_response()
    }
}

// ── Identity ──────────────────────────────────────────────────────────────────

/// Identity resolved by the upstream auth gateway, registered on first sight.
pub struct CurrentUser(pub User);

/// A `CurrentUser` holding the admin role.
pub struct AdminUser(pub User);

fn header_value<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

#[async_trait]
impl FromRequestParts<Arc<AppState>> for CurrentUser {
    type Rejection = Error;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let id = header_value(&parts.headers, USER_ID_HEADER)
            .ok_or_else(|| Error::Unauthorized("missing user identity".into()))?;
        let username = header_value(&parts.headers, USER_NAME_HEADER)
            .ok_or_else(|| Error::Unauthorized("missing user name".into()))?;
        let role = header_value(&parts.headers, USER_ROLE_HEADER)
            .map(Role::from_header)
            .unwrap_or(Role::User);
        let user = state.engine.register_user(id, username, role)?;
        Ok(CurrentUser(user))
    }
}

#[async_trait]
impl FromRequestParts<Arc<AppState>> for AdminUser {
    type Rejection = Error;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let CurrentUser(user) = CurrentUser::from_request_parts(parts, state).await?;
        if user.role != Role::Admin {
            warn!("Non-admin user attempted admin access: {}", user.username);
            return Err(Error::Forbidden("admin role required".into()));
        }
        Ok(AdminUser(user))
    }
}

// ── Payloads ──────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct SubmitPrediction {
    pub prediction: Outcome,
}

#[derive(Debug, Deserialize)]
pub struct SetResult {
    pub result: Outcome,
}

#[derive(Debug, Serialize)]
pub struct ResultApplied {
    #[serde(rename = "match")]
    pub match_: Match,
    pub scoring: ScoreResult,
}

// ── Handlers ──────────────────────────────────────────────────────────────────

/// GET /api/health
async fn health_handler() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

/// GET /api/matches
async fn matches_handler(
    State(state): State<Arc<AppState>>,
    _user: CurrentUser,
) -> Result<impl IntoResponse, Error> {
    state.engine.list_matches().map(Json)
}

/// POST /api/matches/fetch
async fn fetch_matches_handler(
    State(state): State<Arc<AppState>>,
    _admin: AdminUser,
) -> Result<impl IntoResponse, Error> {
    state.engine.sync_fixtures().await.map(Json)
}

/// POST /api/matches/import
async fn import_matches_handler(
    State(state): State<Arc<AppState>>,
    AdminUser(admin): AdminUser,
    payload: Result<Json<Vec<ExternalMatch>>, JsonRejection>,
) -> Result<impl IntoResponse, Error> {
    // An unreadable batch is bad upstream data, same as a failed sync.
    let Json(batch) = payload.map_err(|rejection| {
        warn!("Rejected import from {}: {}", admin.username, rejection.body_text());
        Error::UpstreamFailure(rejection.body_text())
    })?;
    let source = format!("import:{}", admin.username);
    state.engine.reconcile(&source, &batch).map(Json)
}

/// PATCH /api/matches/:match_id
async fn set_result_handler(
    State(state): State<Arc<AppState>>,
    _admin: AdminUser,
    Path(match_id): Path<String>,
    Json(body): Json<SetResult>,
) -> Result<impl IntoResponse, Error> {
    let (match_, scoring) = state.engine.set_result(&match_id, body.result)?;
    Ok(Json(ResultApplied { match_, scoring }))
}

/// POST /api/matches/:match_id/score
async fn score_handler(
    State(state): State<Arc<AppState>>,
    _admin: AdminUser,
    Path(match_id): Path<String>,
) -> Result<impl IntoResponse, Error> {
    state.engine.score(&match_id).map(Json)
}

/// GET /api/predictions
async fn predictions_handler(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
) -> Result<impl IntoResponse, Error> {
    state.engine.predictions_for(&user.id).map(Json)
}

/// POST /api/predictions/:match_id
async fn submit_prediction_handler(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    Path(match_id): Path<String>,
    Json(body): Json<SubmitPrediction>,
) -> Result<impl IntoResponse, Error> {
    state
        .engine
        .submit_prediction(&user.id, &match_id, body.prediction)
        .map(Json)
}

/// GET /api/leaderboard
async fn leaderboard_handler(
    State(state): State<Arc<AppState>>,
    _user: CurrentUser,
) -> Result<impl IntoResponse, Error> {
    state.engine.leaderboard().map(Json)
}

/// GET /api/admin/audit
async fn audit_handler(
    State(state): State<Arc<AppState>>,
    _admin: AdminUser,
) -> Result<impl IntoResponse, Error> {
    state.engine.audit_totals().map(Json)
}

/// POST /api/admin/reconcile-totals
async fn rebuild_totals_handler(
    State(state): State<Arc<AppState>>,
    _admin: AdminUser,
) -> Result<impl IntoResponse, Error> {
    let corrected = state.engine.rebuild_totals()?;
    Ok(Json(json!({ "corrected": corrected })))
}
