//! REST surface of the Pinning Service API.

use axum::{
    Router,
    extract::{
        FromRequestParts, Path, Query, State,
        rejection::{JsonRejection, QueryRejection},
    },
    http::{StatusCode, header::AUTHORIZATION, request::Parts},
    response::{IntoResponse, Json, Response},
    routing::get,
};
use chrono::{DateTime, Utc};
use pickup_core::{
    ErrorBody, ErrorReason, Pin, PinError, PinQuery, PinResults, PinStatus, Status, TextMatch,
};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::auth::Authenticator;
use crate::service::PinService;

const UNAUTHORIZED_DETAILS: &str = "Access token is missing or invalid";

/// State shared by all handlers.
#[derive(Debug, Clone)]
pub struct ApiState {
    pub service: PinService,
    pub auth: Arc<Authenticator>,
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/pins", get(list_pins).post(add_pin))
        .route(
            "/pins/:requestid",
            get(get_pin).post(replace_pin).delete(delete_pin),
        )
        .route("/health", get(health))
        .fallback(not_found)
        .with_state(state)
}

/// Serves the API on `listener` until `cancel` fires.
pub async fn serve(
    listener: TcpListener,
    state: ApiState,
    cancel: CancellationToken,
) -> anyhow::Result<()> {
    info!(addr = %listener.local_addr()?, "pinning API listening");
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await?;
    Ok(())
}

/// The authenticated caller.
struct AuthUser(String);

#[axum::async_trait]
impl FromRequestParts<ApiState> for AuthUser {
    type Rejection = Response;

    async fn from_request_parts(parts: &mut Parts, state: &ApiState) -> Result<Self, Self::Rejection> {
        state
            .auth
            .authenticate(parts.headers.get(AUTHORIZATION))
            .map(AuthUser)
            .ok_or_else(unauthorized)
    }
}

fn unauthorized() -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(ErrorBody::new(
            ErrorReason::Unauthorized,
            Some(UNAUTHORIZED_DETAILS.to_owned()),
        )),
    )
        .into_response()
}

/// A `PinError` rendered as an HTTP response.
struct ApiError(PinError);

impl From<PinError> for ApiError {
    fn from(err: PinError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if let PinError::NotImplemented(operation) = &self.0 {
            return (
                StatusCode::NOT_IMPLEMENTED,
                Json(json!({ "operationId": operation })),
            )
                .into_response();
        }
        let status = match self.0.reason() {
            ErrorReason::BadRequest => StatusCode::BAD_REQUEST,
            ErrorReason::Unauthorized => StatusCode::UNAUTHORIZED,
            ErrorReason::NotFound => StatusCode::NOT_FOUND,
            ErrorReason::InternalServerError => {
                error!(error = %self.0, "request failed");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        (status, Json(self.0.body())).into_response()
    }
}

/// Raw `GET /pins` query string; parsed by hand so that bad values get a
/// field-level message.
#[derive(Debug, Default, Deserialize)]
struct ListParams {
    cid: Option<String>,
    name: Option<String>,
    #[serde(rename = "match")]
    text_match: Option<String>,
    status: Option<String>,
    before: Option<String>,
    after: Option<String>,
    limit: Option<String>,
}

fn split_list(value: &str) -> impl Iterator<Item = &str> {
    value.split(',').map(str::trim).filter(|s| !s.is_empty())
}

fn parse_time(field: &str, value: &str) -> Result<DateTime<Utc>, PinError> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| PinError::validation(format!("{field}: invalid timestamp '{value}': {e}")))
}

impl ListParams {
    fn into_query(self) -> Result<PinQuery, PinError> {
        let mut query = PinQuery::default();
        if let Some(cids) = &self.cid {
            query.cids = split_list(cids).map(str::to_owned).collect();
        }
        query.name = self.name;
        if let Some(m) = &self.text_match {
            query.text_match = TextMatch::parse(m)?;
        }
        if let Some(statuses) = &self.status {
            query.statuses = split_list(statuses)
                .map(str::parse::<Status>)
                .collect::<Result<_, _>>()?;
        }
        if let Some(before) = &self.before {
            query.before = Some(parse_time("before", before)?);
        }
        if let Some(after) = &self.after {
            query.after = Some(parse_time("after", after)?);
        }
        if let Some(limit) = &self.limit {
            query.limit = limit
                .parse()
                .map_err(|_| PinError::validation(format!("limit: not a number: '{limit}'")))?;
        }
        query.validate()?;
        Ok(query)
    }
}

async fn list_pins(
    State(state): State<ApiState>,
    AuthUser(user): AuthUser,
    params: Result<Query<ListParams>, QueryRejection>,
) -> Result<Json<PinResults>, ApiError> {
    let Query(params) = params.map_err(|e| PinError::validation(e.body_text()))?;
    let query = params.into_query()?;
    Ok(Json(state.service.list(&user, &query).await?))
}

async fn add_pin(
    State(state): State<ApiState>,
    AuthUser(user): AuthUser,
    body: Result<Json<Pin>, JsonRejection>,
) -> Result<(StatusCode, Json<PinStatus>), ApiError> {
    let Json(pin) = body.map_err(|e| PinError::validation(e.body_text()))?;
    let record = state.service.add(&user, pin).await?;
    Ok((StatusCode::ACCEPTED, Json(record)))
}

async fn get_pin(
    State(state): State<ApiState>,
    AuthUser(user): AuthUser,
    Path(request_id): Path<String>,
) -> Result<Json<PinStatus>, ApiError> {
    Ok(Json(state.service.get(&user, &request_id).await?))
}

async fn replace_pin(
    State(state): State<ApiState>,
    AuthUser(user): AuthUser,
    Path(request_id): Path<String>,
    body: Result<Json<Pin>, JsonRejection>,
) -> Result<(StatusCode, Json<PinStatus>), ApiError> {
    let Json(pin) = body.map_err(|e| PinError::validation(e.body_text()))?;
    let record = state.service.replace(&user, &request_id, pin).await?;
    Ok((StatusCode::ACCEPTED, Json(record)))
}

async fn delete_pin(
    State(state): State<ApiState>,
    AuthUser(user): AuthUser,
    Path(request_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.service.delete(&user, &request_id).await?;
    Ok(StatusCode::ACCEPTED)
}

async fn health() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

async fn not_found() -> impl IntoResponse {
    (
        StatusCode::NOT_FOUND,
        Json(ErrorBody::new(ErrorReason::NotFound, None)),
    )
}
