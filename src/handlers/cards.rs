use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Path, Query, State,
    },
    http::StatusCode,
    Json,
};
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::ApiError;
use crate::{
    app_state::AppState,
    card::{merchant_set, GhostCard, LedgerEntry, RulePatch},
    issuer::IssuerCardStatus,
    lifecycle::{CardManager, NewCard},
};

#[derive(Debug, Deserialize)]
pub struct CreateGhostCardRequest {
    user_id: Option<String>,
    amount: Option<Decimal>,
    allowed_merchants: Option<Vec<String>>,
    expires_at: Option<String>,
    alias: Option<String>,
    color_theme: Option<String>,
    single_use: Option<bool>,
    usage_limit: Option<u32>,
    currency: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct StripeCard {
    pub number: String,
    pub last4: String,
    pub exp_month: u32,
    pub exp_year: i32,
    pub cvc: String,
}

#[derive(Debug, Serialize)]
pub struct CreateGhostCardResponse {
    pub success: bool,
    pub ghost_card_id: String,
    pub stripe_card: StripeCard,
}

/// Accepts RFC 3339 timestamps, or a bare date meaning the end of that day (UTC)
fn parse_expiry(value: &str) -> Result<DateTime<Utc>, ApiError> {
    if let Ok(timestamp) = DateTime::parse_from_rfc3339(value) {
        return Ok(timestamp.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(23, 59, 59))
        .map(|end_of_day| end_of_day.and_utc())
        .ok_or_else(|| ApiError::bad_request(format!("Invalid expires_at: {}", value)))
}

/// POST /create_ghost_cards
pub async fn create_ghost_card(
    State(state): State<AppState>,
    payload: Result<Json<CreateGhostCardRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<CreateGhostCardResponse>), ApiError> {
    let Json(req) = payload?;

    let mut missing = Vec::new();
    if req.user_id.as_deref().is_none_or(|id| id.trim().is_empty()) {
        missing.push("user_id");
    }
    if req.amount.is_none() {
        missing.push("amount");
    }
    if req.expires_at.is_none() {
        missing.push("expires_at");
    }
    if !missing.is_empty() {
        return Err(ApiError::bad_request(format!(
            "Missing required fields: {}",
            missing.join(", ")
        )));
    }

    let (Some(user_id), Some(amount), Some(expires_at)) = (req.user_id, req.amount, req.expires_at)
    else {
        return Err(ApiError::bad_request("Missing required fields"));
    };

    let new_card = NewCard {
        user_id,
        amount,
        currency: req
            .currency
            .unwrap_or_else(|| state.config.default_currency.clone()),
        allowed_merchants: merchant_set(req.allowed_merchants.unwrap_or_default()),
        expires_at: parse_expiry(&expires_at)?,
        alias: req.alias,
        color_theme: req.color_theme,
        single_use: req.single_use.unwrap_or(false),
        usage_limit: req.usage_limit,
    };

    let manager = CardManager::new(state.store.as_ref(), state.issuer.as_ref());
    let created = manager.create(new_card, Utc::now()).await?;

    Ok((
        StatusCode::CREATED,
        Json(CreateGhostCardResponse {
            success: true,
            ghost_card_id: created.card.id,
            stripe_card: StripeCard {
                number: created.details.number,
                last4: created.details.last4,
                exp_month: created.details.exp_month,
                exp_year: created.details.exp_year,
                cvc: created.details.cvc,
            },
        }),
    ))
}

#[derive(Debug, Serialize)]
pub struct DeactivateResponse {
    pub success: bool,
    pub message: String,
    pub stripe_status: Option<IssuerCardStatus>,
}

/// POST /create_ghost_cards/{card_id}/deactivate
pub async fn deactivate_ghost_card(
    State(state): State<AppState>,
    Path(card_id): Path<String>,
) -> Result<Json<DeactivateResponse>, ApiError> {
    let manager = CardManager::new(state.store.as_ref(), state.issuer.as_ref());
    let deactivation = manager.deactivate(&card_id).await?;

    let message = if deactivation.already_canceled {
        "Ghost card was already deactivated"
    } else {
        "Ghost card deactivated"
    };

    Ok(Json(DeactivateResponse {
        success: true,
        message: message.to_string(),
        stripe_status: deactivation.provider_status,
    }))
}

#[derive(Debug, Deserialize)]
pub struct UpdateGhostCardRequest {
    alias: Option<String>,
    allowed_merchants: Option<Vec<String>>,
    expires_at: Option<String>,
    color_theme: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct UpdateGhostCardResponse {
    pub success: bool,
    pub updated_fields: Vec<&'static str>,
}

/// PUT /{card_id}
pub async fn update_ghost_card(
    State(state): State<AppState>,
    Path(card_id): Path<String>,
    payload: Result<Json<UpdateGhostCardRequest>, JsonRejection>,
) -> Result<Json<UpdateGhostCardResponse>, ApiError> {
    let Json(req) = payload?;

    let patch = RulePatch {
        alias: req.alias,
        allowed_merchants: req.allowed_merchants.map(merchant_set),
        expires_at: req.expires_at.as_deref().map(parse_expiry).transpose()?,
        color_theme: req.color_theme,
    };

    let manager = CardManager::new(state.store.as_ref(), state.issuer.as_ref());
    let (_, updated_fields) = manager.update(&card_id, patch, Utc::now()).await?;

    Ok(Json(UpdateGhostCardResponse {
        success: true,
        updated_fields,
    }))
}

#[derive(Debug, Serialize)]
pub struct DeleteGhostCardResponse {
    pub success: bool,
    pub message: String,
    pub deleted_card_id: String,
}

/// DELETE /{card_id}
pub async fn delete_ghost_card(
    State(state): State<AppState>,
    Path(card_id): Path<String>,
) -> Result<Json<DeleteGhostCardResponse>, ApiError> {
    let manager = CardManager::new(state.store.as_ref(), state.issuer.as_ref());
    let card = manager.delete(&card_id).await?;

    Ok(Json(DeleteGhostCardResponse {
        success: true,
        message: "Ghost card deleted".to_string(),
        deleted_card_id: card.id,
    }))
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    user_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ListGhostCardsResponse {
    pub success: bool,
    pub cards: Vec<GhostCard>,
}

/// GET /ghost_cards?user_id={user_id}
pub async fn list_ghost_cards(
    State(state): State<AppState>,
    query: Result<Query<ListQuery>, QueryRejection>,
) -> Result<Json<ListGhostCardsResponse>, ApiError> {
    let Query(params) = query?;
    let user_id = params
        .user_id
        .filter(|id| !id.trim().is_empty())
        .ok_or_else(|| ApiError::bad_request("user_id is required"))?;

    let manager = CardManager::new(state.store.as_ref(), state.issuer.as_ref());
    let cards = manager.list(&user_id).await?;

    Ok(Json(ListGhostCardsResponse {
        success: true,
        cards,
    }))
}

#[derive(Debug, Serialize)]
pub struct HistoryResponse {
    pub success: bool,
    pub transactions: Vec<LedgerEntry>,
}

/// GET /{card_id}/history
pub async fn card_history(
    State(state): State<AppState>,
    Path(card_id): Path<String>,
) -> Result<Json<HistoryResponse>, ApiError> {
    let manager = CardManager::new(state.store.as_ref(), state.issuer.as_ref());
    let transactions = manager.history(&card_id).await?;

    Ok(Json(HistoryResponse {
        success: true,
        transactions,
    }))
}
