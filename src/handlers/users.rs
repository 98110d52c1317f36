use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    Json,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::ApiError;
use crate::{app_state::AppState, users};

#[derive(Debug, Deserialize)]
pub struct UserRequest {
    name: Option<String>,
    total_balance: Option<Decimal>,
}

#[derive(Debug, Serialize)]
pub struct UserResponse {
    pub success: bool,
    pub user_id: String,
    pub stripe_cardholder_id: String,
    pub card_ids: Vec<String>,
    pub open_card_count: usize,
    pub is_existing_user: bool,
}

/// POST /users
/// Returns the user with this name, registering them first if unknown
pub async fn find_or_create_user(
    State(state): State<AppState>,
    payload: Result<Json<UserRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<UserResponse>), ApiError> {
    let Json(req) = payload?;
    let name = req
        .name
        .ok_or_else(|| ApiError::bad_request("name is required"))?;

    let summary = users::find_or_create(
        state.store.as_ref(),
        state.issuer.as_ref(),
        &name,
        req.total_balance,
    )
    .await?;

    let status = if summary.is_existing_user {
        StatusCode::OK
    } else {
        StatusCode::CREATED
    };

    Ok((
        status,
        Json(UserResponse {
            success: true,
            user_id: summary.user.id,
            stripe_cardholder_id: summary.user.cardholder_ref,
            card_ids: summary.card_ids,
            open_card_count: summary.open_card_count,
            is_existing_user: summary.is_existing_user,
        }),
    ))
}

#[cfg(test)]
mod tests {
    use crate::handlers::test_support::*;
    use axum::http::StatusCode;
    use serde_json::json;

    #[tokio::test]
    async fn test_lookup_or_create_by_name() {
        let app = test_app().await;

        let (status, created) =
            send(&app, "POST", "/users", Some(json!({ "name": "Grace" }))).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(created["is_existing_user"], false);
        assert_eq!(created["open_card_count"], 0);

        let (status, existing) =
            send(&app, "POST", "/users", Some(json!({ "name": "Grace" }))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(existing["is_existing_user"], true);
        assert_eq!(existing["user_id"], created["user_id"]);
        assert_eq!(existing["stripe_cardholder_id"], created["stripe_cardholder_id"]);
    }

    #[tokio::test]
    async fn test_name_is_required() {
        let app = test_app().await;
        let (status, body) = send(&app, "POST", "/users", Some(json!({}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "name is required");
    }
}
