use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::BTreeSet;

use crate::{
    authorization::mutator,
    card::{CardStatus, GhostCard, LedgerEntry, RulePatch},
    error::{ServiceError, ServiceResult},
    issuer::{CardDetails, CardIssuer, IssuerCardStatus},
    store::CardStore,
};

/// Parameters for minting a ghost card
#[derive(Debug, Clone)]
pub struct NewCard {
    pub user_id: String,
    pub amount: Decimal,
    pub currency: String,
    pub allowed_merchants: BTreeSet<String>,
    pub expires_at: DateTime<Utc>,
    pub alias: Option<String>,
    pub color_theme: Option<String>,
    pub single_use: bool,
    pub usage_limit: Option<u32>,
}

#[derive(Debug, Clone)]
pub struct CreatedCard {
    pub card: GhostCard,
    pub details: CardDetails,
}

#[derive(Debug, Clone)]
pub struct Deactivation {
    pub already_canceled: bool,
    pub provider_status: Option<IssuerCardStatus>,
}

/// Creation, rule edits, deactivation and deletion of ghost cards.
/// No authorization decisions are made here.
pub struct CardManager<'a> {
    store: &'a dyn CardStore,
    issuer: &'a dyn CardIssuer,
}

impl<'a> CardManager<'a> {
    pub fn new(store: &'a dyn CardStore, issuer: &'a dyn CardIssuer) -> Self {
        Self { store, issuer }
    }

    async fn existing_card(&self, card_id: &str) -> ServiceResult<GhostCard> {
        self.store
            .get_card(card_id)
            .await
            .map_err(ServiceError::Store)?
            .ok_or_else(|| ServiceError::not_found("Card", card_id))
    }

    pub async fn create(&self, new: NewCard, now: DateTime<Utc>) -> ServiceResult<CreatedCard> {
        if new.amount <= Decimal::ZERO {
            return Err(ServiceError::invalid("amount must be greater than zero"));
        }
        if new.expires_at <= now {
            return Err(ServiceError::invalid("expires_at must be in the future"));
        }
        if new.usage_limit == Some(0) {
            return Err(ServiceError::invalid("usage_limit must be greater than zero"));
        }

        let user = self
            .store
            .find_user(&new.user_id)
            .await
            .map_err(ServiceError::Store)?
            .ok_or_else(|| ServiceError::not_found("User", &new.user_id))?;

        let issued = self
            .issuer
            .create_card(&user.cardholder_ref, &new.currency, Some(new.amount))
            .await
            .map_err(ServiceError::Issuer)?;

        let card = GhostCard {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: user.id,
            external_ref: Some(issued.id.clone()),
            last4: Some(issued.last4.clone()),
            balance: new.amount,
            original_amount: new.amount,
            currency: new.currency,
            allowed_merchants: new.allowed_merchants,
            expires_at: new.expires_at,
            status: CardStatus::Active,
            single_use: new.single_use,
            used: false,
            usage_count: 0,
            usage_limit: new.usage_limit,
            alias: new.alias,
            color_theme: new.color_theme,
            created_at: now,
            last_transaction_at: None,
            version: 0,
        };

        let persisted = match self.issuer.retrieve_card(&issued.id).await {
            Ok(details) => self
                .store
                .insert_card(&card)
                .await
                .map(|_| details)
                .map_err(ServiceError::Store),
            Err(e) => Err(ServiceError::Issuer(e)),
        };

        match persisted {
            Ok(details) => {
                tracing::info!(
                    card_id = %card.id,
                    user_id = %card.user_id,
                    external_ref = %issued.id,
                    single_use = card.single_use,
                    "Created ghost card"
                );
                Ok(CreatedCard { card, details })
            }
            Err(e) => {
                tracing::warn!(
                    external_ref = %issued.id,
                    "Card creation failed, rolling back: {}",
                    e
                );
                mutator::cancel_at_provider(self.issuer, &card).await;
                Err(e)
            }
        }
    }

    /// Apply a rule edit. Balance, usage and status are never touched here.
    pub async fn update(
        &self,
        card_id: &str,
        patch: RulePatch,
        now: DateTime<Utc>,
    ) -> ServiceResult<(GhostCard, Vec<&'static str>)> {
        if patch.is_empty() {
            return Err(ServiceError::invalid("No updatable fields provided"));
        }
        if patch.expires_at.is_some_and(|expires_at| expires_at <= now) {
            return Err(ServiceError::invalid("expires_at must be in the future"));
        }

        let card = self
            .store
            .update_rules(card_id, &patch)
            .await
            .map_err(ServiceError::Store)?
            .ok_or_else(|| ServiceError::not_found("Card", card_id))?;

        let fields = patch.field_names();
        tracing::info!(card_id, ?fields, "Updated card rules");
        Ok((card, fields))
    }

    /// Cancel locally, then at the provider. Repeating it retries the provider call.
    pub async fn deactivate(&self, card_id: &str) -> ServiceResult<Deactivation> {
        let card = self.existing_card(card_id).await?;

        let canceled_now = self
            .store
            .cancel_card(card_id)
            .await
            .map_err(ServiceError::Store)?;
        let provider_status = mutator::cancel_at_provider(self.issuer, &card).await;

        tracing::info!(card_id, already_canceled = !canceled_now, "Deactivated card");

        Ok(Deactivation {
            already_canceled: !canceled_now,
            provider_status,
        })
    }

    /// Remove a card. Its ledger history is retained.
    pub async fn delete(&self, card_id: &str) -> ServiceResult<GhostCard> {
        let card = self.existing_card(card_id).await?;

        if card.is_active() {
            mutator::cancel_at_provider(self.issuer, &card).await;
        }

        if !self
            .store
            .delete_card(card_id)
            .await
            .map_err(ServiceError::Store)?
        {
            return Err(ServiceError::not_found("Card", card_id));
        }

        tracing::info!(card_id, "Deleted card");
        Ok(card)
    }

    pub async fn list(&self, user_id: &str) -> ServiceResult<Vec<GhostCard>> {
        if self
            .store
            .find_user(user_id)
            .await
            .map_err(ServiceError::Store)?
            .is_none()
        {
            return Err(ServiceError::not_found("User", user_id));
        }

        self.store
            .list_cards(user_id)
            .await
            .map_err(ServiceError::Store)
    }

    pub async fn history(&self, card_id: &str) -> ServiceResult<Vec<LedgerEntry>> {
        self.store
            .history(card_id)
            .await
            .map_err(ServiceError::Store)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::card::User;
    use crate::db::memory_pool;
    use crate::issuer::{Cardholder, IssuedCard, MockIssuer};
    use crate::store::SqliteCardStore;
    use anyhow::{Result, anyhow};
    use async_trait::async_trait;
    use chrono::Duration;
    use rust_decimal_macros::dec;
    use std::sync::Mutex;

    async fn store_with_user() -> SqliteCardStore {
        let store = SqliteCardStore::new(memory_pool().await);
        store
            .insert_user(&User {
                id: "user-1".to_string(),
                name: "Ada".to_string(),
                total_balance: dec!(1000),
                cardholder_ref: "ich_1".to_string(),
                created_at: Utc::now(),
            })
            .await
            .unwrap();
        store
    }

    fn new_card() -> NewCard {
        NewCard {
            user_id: "user-1".to_string(),
            amount: dec!(25),
            currency: "usd".to_string(),
            allowed_merchants: ["netflix".to_string()].into_iter().collect(),
            expires_at: Utc::now() + Duration::days(7),
            alias: Some("Streaming".to_string()),
            color_theme: None,
            single_use: false,
            usage_limit: None,
        }
    }

    /// Mints cards but cannot reveal their details
    struct BlindIssuer {
        canceled: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl CardIssuer for BlindIssuer {
        fn name(&self) -> &'static str {
            "blind"
        }

        async fn create_cardholder(&self, name: &str) -> Result<Cardholder> {
            Ok(Cardholder {
                id: "ich_blind".to_string(),
                name: name.to_string(),
            })
        }

        async fn create_card(&self, _: &str, _: &str, _: Option<Decimal>) -> Result<IssuedCard> {
            Ok(IssuedCard {
                id: "ic_blind".to_string(),
                last4: "0000".to_string(),
                exp_month: 1,
                exp_year: 2030,
                status: IssuerCardStatus::Active,
            })
        }

        async fn retrieve_card(&self, _: &str) -> Result<CardDetails> {
            Err(anyhow!("provider timeout"))
        }

        async fn update_status(
            &self,
            card_id: &str,
            status: IssuerCardStatus,
        ) -> Result<IssuedCard> {
            self.canceled.lock().unwrap().push(card_id.to_string());
            Ok(IssuedCard {
                id: card_id.to_string(),
                last4: "0000".to_string(),
                exp_month: 1,
                exp_year: 2030,
                status,
            })
        }
    }

    #[tokio::test]
    async fn test_create_persists_card_with_details() {
        let store = store_with_user().await;
        let issuer = MockIssuer::new();
        let manager = CardManager::new(&store, &issuer);

        let created = manager.create(new_card(), Utc::now()).await.unwrap();
        assert_eq!(created.card.balance, dec!(25));
        assert_eq!(created.card.original_amount, dec!(25));
        assert_eq!(created.card.external_ref.as_deref(), Some(created.details.id.as_str()));
        assert_eq!(created.details.number.len(), 16);

        let stored = store.get_card(&created.card.id).await.unwrap().unwrap();
        assert_eq!(stored.alias.as_deref(), Some("Streaming"));
        assert_eq!(manager.list("user-1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_create_validates_inputs() {
        let store = store_with_user().await;
        let issuer = MockIssuer::new();
        let manager = CardManager::new(&store, &issuer);

        let mut bad = new_card();
        bad.amount = Decimal::ZERO;
        assert!(matches!(manager.create(bad, Utc::now()).await, Err(ServiceError::Invalid(_))));

        let mut bad = new_card();
        bad.expires_at = Utc::now() - Duration::days(1);
        assert!(matches!(manager.create(bad, Utc::now()).await, Err(ServiceError::Invalid(_))));

        let mut bad = new_card();
        bad.usage_limit = Some(0);
        assert!(matches!(manager.create(bad, Utc::now()).await, Err(ServiceError::Invalid(_))));

        let mut bad = new_card();
        bad.user_id = "ghost".to_string();
        assert!(matches!(manager.create(bad, Utc::now()).await, Err(ServiceError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_failed_creation_rolls_back_provider_card() {
        let store = store_with_user().await;
        let issuer = BlindIssuer {
            canceled: Mutex::new(Vec::new()),
        };
        let manager = CardManager::new(&store, &issuer);

        let err = manager.create(new_card(), Utc::now()).await.unwrap_err();
        assert!(matches!(err, ServiceError::Issuer(_)));
        assert_eq!(*issuer.canceled.lock().unwrap(), vec!["ic_blind".to_string()]);
        assert!(store.list_cards("user-1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_update_touches_only_rule_fields() {
        let store = store_with_user().await;
        let issuer = MockIssuer::new();
        let manager = CardManager::new(&store, &issuer);
        let created = manager.create(new_card(), Utc::now()).await.unwrap();

        let patch = RulePatch {
            allowed_merchants: Some(BTreeSet::new()),
            color_theme: Some("ocean".to_string()),
            ..Default::default()
        };
        let (card, fields) = manager.update(&created.card.id, patch, Utc::now()).await.unwrap();
        assert_eq!(fields, vec!["allowed_merchants", "color_theme"]);
        assert!(card.allowed_merchants.is_empty());
        assert_eq!(card.alias.as_deref(), Some("Streaming"));
        assert_eq!(card.balance, dec!(25));

        let empty = manager.update(&created.card.id, RulePatch::default(), Utc::now()).await;
        assert!(matches!(empty, Err(ServiceError::Invalid(_))));

        let past = RulePatch {
            expires_at: Some(Utc::now() - Duration::hours(1)),
            ..Default::default()
        };
        let past = manager.update(&created.card.id, past, Utc::now()).await;
        assert!(matches!(past, Err(ServiceError::Invalid(_))));

        let missing = RulePatch {
            alias: Some("x".to_string()),
            ..Default::default()
        };
        let missing = manager.update("missing", missing, Utc::now()).await;
        assert!(matches!(missing, Err(ServiceError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_deactivate_then_delete() {
        let store = store_with_user().await;
        let issuer = MockIssuer::new();
        let manager = CardManager::new(&store, &issuer);
        let created = manager.create(new_card(), Utc::now()).await.unwrap();

        let first = manager.deactivate(&created.card.id).await.unwrap();
        assert!(!first.already_canceled);
        assert_eq!(first.provider_status, Some(IssuerCardStatus::Canceled));

        let second = manager.deactivate(&created.card.id).await.unwrap();
        assert!(second.already_canceled);

        let stored = store.get_card(&created.card.id).await.unwrap().unwrap();
        assert_eq!(stored.status, CardStatus::Canceled);

        let deleted = manager.delete(&created.card.id).await.unwrap();
        assert_eq!(deleted.id, created.card.id);
        assert!(store.get_card(&created.card.id).await.unwrap().is_none());
        assert!(matches!(
            manager.delete(&created.card.id).await,
            Err(ServiceError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_list_requires_known_user() {
        let store = store_with_user().await;
        let issuer = MockIssuer::new();
        let manager = CardManager::new(&store, &issuer);

        assert!(manager.list("user-1").await.unwrap().is_empty());
        assert!(matches!(manager.list("nobody").await, Err(ServiceError::NotFound(_))));
    }
}
