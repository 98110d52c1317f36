pub mod cards;
pub mod charge;
pub mod users;

use axum::{
    extract::rejection::{JsonRejection, QueryRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use serde::Serialize;

use crate::{app_state::AppState, error::ServiceError};

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/about", get(about))
        .route("/users", post(users::find_or_create_user))
        .route("/create_ghost_cards", post(cards::create_ghost_card))
        .route(
            "/create_ghost_cards/{card_id}/deactivate",
            post(cards::deactivate_ghost_card),
        )
        .route("/ghost_cards", get(cards::list_ghost_cards))
        .route("/charge", post(charge::charge))
        .route(
            "/{card_id}",
            put(cards::update_ghost_card).delete(cards::delete_ghost_card),
        )
        .route("/{card_id}/history", get(cards::card_history))
        .with_state(state)
}

/// Error body shared by every endpoint
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }
}

impl From<ServiceError> for ApiError {
    fn from(err: ServiceError) -> Self {
        let status = match &err {
            ServiceError::Invalid(_) => StatusCode::BAD_REQUEST,
            ServiceError::NotFound(_) => StatusCode::NOT_FOUND,
            ServiceError::Conflict(_) => StatusCode::CONFLICT,
            ServiceError::Issuer(e) | ServiceError::Store(e) => {
                tracing::error!("Request failed: {:#}", e);
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        Self {
            status,
            message: err.to_string(),
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::bad_request(rejection.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        Self::bad_request(rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(serde_json::json!({ "success": false, "error": self.message })),
        )
            .into_response()
    }
}

#[derive(Debug, Serialize)]
struct AboutResponse {
    name: &'static str,
    version: &'static str,
    description: &'static str,
}

/// GET /about
async fn about() -> Json<AboutResponse> {
    Json(AboutResponse {
        name: "ghostcard-server",
        version: env!("CARGO_PKG_VERSION"),
        description: "Issues short-lived, spend-limited virtual cards \
                      and authorizes simulated charges against their rules",
    })
}
