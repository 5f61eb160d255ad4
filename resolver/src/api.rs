use crate::config::Listener as ListenerConfig;
use crate::pipeline::{PipelineError, ResolutionPipeline};
use crate::types::{AggregatedResult, IdentityInput};
use axum::{
    Json, Router,
    extract::{Query, State, rejection::QueryRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;

pub async fn serve(
    listener: &ListenerConfig,
    pipeline: ResolutionPipeline,
) -> Result<(), std::io::Error> {
    let addr = format!("{}:{}", listener.host, listener.port);
    let tcp_listener = TcpListener::bind(&addr).await?;
    tracing::info!(%addr, "serving pass lookups");

    axum::serve(tcp_listener, router(pipeline)).await
}

pub fn router(pipeline: ResolutionPipeline) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/api/passes", get(passes))
        .with_state(pipeline)
}

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum ApiError {
    #[error("Missing handle or id")]
    MissingIdentity,
    #[error("id must be a non-negative integer")]
    InvalidId,
    #[error("Invalid query string")]
    InvalidQuery,
    #[error(transparent)]
    Pipeline(#[from] PipelineError),
}

#[derive(Serialize)]
struct ApiErrorResponse {
    error: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ApiError::MissingIdentity | ApiError::InvalidId | ApiError::InvalidQuery => {
                (StatusCode::BAD_REQUEST, self.to_string())
            }
            ApiError::Pipeline(PipelineError::IdentityNotFound) => {
                (StatusCode::NOT_FOUND, "User not found".to_string())
            }
            // Details stay in the logs.
            ApiError::Pipeline(PipelineError::InternalFailure(reason)) => {
                tracing::error!(reason = %reason, "request failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Server error, please try again".to_string(),
                )
            }
        };

        (status, Json(ApiErrorResponse { error: message })).into_response()
    }
}

/// Query parameters of the lookup endpoint. `username` and `userid` are the
/// names older clients send.
#[derive(Deserialize, Debug, Default)]
struct Params {
    handle: Option<String>,
    username: Option<String>,
    id: Option<String>,
    userid: Option<String>,
}

impl Params {
    /// Blank values count as absent. Precedence is `id`, `userid`, `handle`,
    /// then `username`.
    fn into_input(self) -> Result<IdentityInput, ApiError> {
        let present = |value: Option<String>| {
            value
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let id = present(self.id).or_else(|| present(self.userid));
        let handle = present(self.handle).or_else(|| present(self.username));

        match (id, handle) {
            (Some(id), _) => id
                .parse()
                .map(IdentityInput::Id)
                .map_err(|_| ApiError::InvalidId),
            (None, Some(handle)) => Ok(IdentityInput::Handle(handle)),
            (None, None) => Err(ApiError::MissingIdentity),
        }
    }
}

async fn index() -> &'static str {
    "passfinder is running\n"
}

async fn passes(
    State(pipeline): State<ResolutionPipeline>,
    params: Result<Query<Params>, QueryRejection>,
) -> Result<Json<AggregatedResult>, ApiError> {
    let Query(params) = params.map_err(|e| {
        tracing::debug!(error = %e.body_text(), "rejected query string");
        ApiError::InvalidQuery
    })?;
    let input = params.into_input()?;

    let result = pipeline.resolve(input).await?;
    Ok(Json(result))
}
