use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    Json,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::ApiError;
use crate::{
    app_state::AppState,
    authorization::{service::ChargeProcessor, Reason},
    card::Transaction,
};

#[derive(Debug, Deserialize)]
pub struct ChargeRequest {
    card_id: Option<String>,
    amount: Option<Decimal>,
    merchant: Option<String>,
    currency: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ChargeResponse {
    pub approved: bool,
    pub reason: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction_id: Option<String>,
    #[serde(with = "rust_decimal::serde::float_option")]
    pub remaining_balance: Option<Decimal>,
}

/// POST /charge
/// Authorizes a simulated purchase against a ghost card
pub async fn charge(
    State(state): State<AppState>,
    payload: Result<Json<ChargeRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<ChargeResponse>), ApiError> {
    let Json(req) = payload?;

    let card_id = req
        .card_id
        .filter(|id| !id.trim().is_empty())
        .ok_or_else(|| ApiError::bad_request("card_id is required"))?;
    let merchant = req
        .merchant
        .map(|m| m.trim().to_string())
        .filter(|m| !m.is_empty())
        .ok_or_else(|| ApiError::bad_request("merchant is required"))?;
    let amount = req
        .amount
        .ok_or_else(|| ApiError::bad_request("amount is required"))?;
    if amount < Decimal::ZERO {
        return Err(ApiError::bad_request("amount must not be negative"));
    }

    let tx = Transaction {
        card_id,
        merchant,
        amount,
        currency: req
            .currency
            .unwrap_or_else(|| state.config.default_currency.clone()),
    };

    let processor = ChargeProcessor::new(
        state.store.as_ref(),
        state.issuer.as_ref(),
        state.config.charge_max_retries,
    );
    let outcome = processor.charge(&tx).await?;

    let status = if outcome.verdict.reason == Reason::CardNotFound {
        StatusCode::NOT_FOUND
    } else {
        StatusCode::OK
    };

    Ok((
        status,
        Json(ChargeResponse {
            approved: outcome.verdict.approved,
            reason: outcome.verdict.reason.to_string(),
            transaction_id: outcome.transaction_id,
            remaining_balance: outcome.remaining_balance,
        }),
    ))
}
