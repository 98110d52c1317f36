use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use crate::{
    card::{CardStatus, GhostCard, Transaction},
    issuer::{CardIssuer, IssuerCardStatus},
};

/// Card state after an approved transaction
#[derive(Debug, Clone, PartialEq)]
pub struct Applied {
    pub card: GhostCard,
    /// The card moved from active to canceled
    pub retired: bool,
}

/// Compute the side effects of an approved transaction.
///
/// Single-use cards settle against `original_amount` so repeated application
/// cannot drift the final balance. Balances never go below zero. Probes only
/// count usage, except that they still consume single-use cards.
pub fn apply(card: &GhostCard, tx: &Transaction, now: DateTime<Utc>) -> Applied {
    let mut next = card.clone();
    next.usage_count = card.usage_count.saturating_add(1);
    next.last_transaction_at = Some(now);

    if card.single_use {
        if !tx.is_probe() {
            next.balance = (card.original_amount - tx.amount).max(Decimal::ZERO);
        }
        next.used = true;
        next.status = CardStatus::Canceled;
    } else if !tx.is_probe() {
        next.balance = (card.balance - tx.amount).max(Decimal::ZERO);
        if next.balance <= Decimal::ZERO || card.is_expired_at(now) {
            next.status = CardStatus::Canceled;
        }
    }

    let retired = card.is_active() && !next.is_active();
    Applied { card: next, retired }
}

/// Best-effort cancellation at the provider. Failures are logged, never raised.
pub async fn cancel_at_provider(
    issuer: &dyn CardIssuer,
    card: &GhostCard,
) -> Option<IssuerCardStatus> {
    let external_ref = card.external_ref.as_deref()?;

    match issuer
        .update_status(external_ref, IssuerCardStatus::Canceled)
        .await
    {
        Ok(issued) => {
            tracing::info!(card_id = %card.id, external_ref, "Canceled card at {}", issuer.name());
            Some(issued.status)
        }
        Err(e) => {
            tracing::warn!(
                card_id = %card.id,
                external_ref,
                "Failed to cancel card at {}: {}",
                issuer.name(),
                e
            );
            None
        }
    }
}
