use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use crate::{
    authorization::{Reason, Verdict, evaluate, mutator},
    card::{CardStatus, GhostCard, LedgerEntry, LedgerStatus, Transaction},
    error::{ServiceError, ServiceResult},
    issuer::CardIssuer,
    store::CardStore,
};

/// What the caller of a charge gets back
#[derive(Debug, Clone, PartialEq)]
pub struct ChargeOutcome {
    pub verdict: Verdict,
    /// Ledger entry id; absent only when the card does not exist
    pub transaction_id: Option<String>,
    pub remaining_balance: Option<Decimal>,
}

/// Runs simulated charges through the rule chain and commits their effects.
pub struct ChargeProcessor<'a> {
    store: &'a dyn CardStore,
    issuer: &'a dyn CardIssuer,
    max_retries: u32,
    clock: Box<dyn Fn() -> DateTime<Utc> + Send + Sync + 'a>,
}

impl<'a> ChargeProcessor<'a> {
    pub fn new(store: &'a dyn CardStore, issuer: &'a dyn CardIssuer, max_retries: u32) -> Self {
        Self {
            store,
            issuer,
            max_retries,
            clock: Box::new(Utc::now),
        }
    }

    /// Replace the wall clock read at evaluation and at mutation time
    #[cfg(test)]
    pub fn with_clock(mut self, clock: impl Fn() -> DateTime<Utc> + Send + Sync + 'a) -> Self {
        self.clock = Box::new(clock);
        self
    }

    /// Resolve a card by store id, falling back to the provider's card handle
    async fn load_card(&self, card_id: &str) -> ServiceResult<Option<GhostCard>> {
        if let Some(card) = self.store.get_card(card_id).await.map_err(ServiceError::Store)? {
            return Ok(Some(card));
        }
        self.store
            .find_card_by_external_ref(card_id)
            .await
            .map_err(ServiceError::Store)
    }

    /// Evaluate and settle one transaction.
    ///
    /// An approval only commits if the card is unchanged since it was read;
    /// otherwise the evaluation is repeated against the fresh state.
    pub async fn charge(&self, tx: &Transaction) -> ServiceResult<ChargeOutcome> {
        for attempt in 0..=self.max_retries {
            let card = self.load_card(&tx.card_id).await?;
            let evaluated_at = (self.clock)();
            let verdict = evaluate(tx, card.as_ref(), evaluated_at);

            let Some(card) = card else {
                tracing::info!(card_id = %tx.card_id, "Charge against unknown card");
                return Ok(ChargeOutcome {
                    verdict,
                    transaction_id: None,
                    remaining_balance: None,
                });
            };

            if !verdict.approved {
                return self.reject(&card, tx, verdict, evaluated_at).await;
            }

            // Expiry is checked again against the mutation time
            let applied_at = (self.clock)();
            let applied = mutator::apply(&card, tx, applied_at);
            let entry = LedgerEntry::record(
                &applied.card,
                tx,
                LedgerStatus::Approved,
                verdict.reason.as_str(),
                applied.card.balance,
                applied_at,
            );

            let committed = self
                .store
                .settle(&applied.card, card.version, &entry)
                .await
                .map_err(ServiceError::Store)?;
            if !committed {
                tracing::debug!(
                    card_id = %card.id,
                    attempt,
                    "Card changed during charge, retrying"
                );
                continue;
            }

            tracing::info!(
                card_id = %card.id,
                merchant = %tx.merchant,
                amount = %tx.amount,
                remaining = %applied.card.balance,
                "{}",
                verdict.reason
            );

            if applied.retired {
                tracing::info!(card_id = %card.id, "Card retired after transaction");
                mutator::cancel_at_provider(self.issuer, &applied.card).await;
            }

            return Ok(ChargeOutcome {
                verdict,
                transaction_id: Some(entry.id),
                remaining_balance: Some(applied.card.balance),
            });
        }

        Err(ServiceError::Conflict(format!(
            "Card {} is being modified concurrently, try again",
            tx.card_id
        )))
    }

    async fn reject(
        &self,
        card: &GhostCard,
        tx: &Transaction,
        verdict: Verdict,
        now: DateTime<Utc>,
    ) -> ServiceResult<ChargeOutcome> {
        let entry = LedgerEntry::record(
            card,
            tx,
            LedgerStatus::Rejected,
            verdict.reason.as_str(),
            card.balance,
            now,
        );
        self.store
            .append_ledger_entry(&entry)
            .await
            .map_err(ServiceError::Store)?;

        tracing::info!(
            card_id = %card.id,
            merchant = %tx.merchant,
            amount = %tx.amount,
            "Rejected: {}",
            verdict.reason
        );

        // Expired cards that are still active get swept opportunistically
        if verdict.reason == Reason::CardExpired {
            if let Err(e) = retire_card(self.store, self.issuer, card).await {
                tracing::warn!(card_id = %card.id, "Failed to retire expired card: {}", e);
            }
        }

        Ok(ChargeOutcome {
            verdict,
            transaction_id: Some(entry.id),
            remaining_balance: Some(card.balance),
        })
    }
}

/// Cancel an active card locally, then best-effort at the provider.
/// Returns false if the card was no longer active.
///
/// The status write is version-checked; a stale snapshot is re-read before retrying.
pub async fn retire_card(
    store: &dyn CardStore,
    issuer: &dyn CardIssuer,
    card: &GhostCard,
) -> ServiceResult<bool> {
    let mut current = card.clone();
    loop {
        if !current.is_active() {
            return Ok(false);
        }

        let mut retired = current.clone();
        retired.status = CardStatus::Canceled;
        if store
            .put_card(&retired, current.version)
            .await
            .map_err(ServiceError::Store)?
        {
            break;
        }

        match store.get_card(&current.id).await.map_err(ServiceError::Store)? {
            Some(fresh) => current = fresh,
            None => return Ok(false),
        }
    }
    tracing::info!(card_id = %current.id, "Card canceled");

    mutator::cancel_at_provider(issuer, &current).await;
    Ok(true)
}
