use anyhow::Result;
use chrono::{DateTime, Utc};
use sqlx::{Pool, Sqlite};

use crate::{
    card::{GhostCard, LedgerEntry, RulePatch, User},
    db::queries,
    store::CardStore,
};

/// Database implementation of CardStore
#[derive(Clone)]
pub struct SqliteCardStore {
    pool: Pool<Sqlite>,
}

impl SqliteCardStore {
    pub fn new(pool: Pool<Sqlite>) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl CardStore for SqliteCardStore {
    async fn get_card(&self, id: &str) -> Result<Option<GhostCard>> {
        queries::get_card(&self.pool, id).await
    }

    async fn find_card_by_external_ref(&self, external_ref: &str) -> Result<Option<GhostCard>> {
        queries::get_card_by_external_ref(&self.pool, external_ref).await
    }

    async fn insert_card(&self, card: &GhostCard) -> Result<()> {
        queries::insert_card(&self.pool, card).await
    }

    async fn put_card(&self, card: &GhostCard, expected_version: i64) -> Result<bool> {
        queries::update_card_state(&self.pool, card, expected_version).await
    }

    async fn update_rules(&self, id: &str, patch: &RulePatch) -> Result<Option<GhostCard>> {
        if !queries::update_card_rules(&self.pool, id, patch).await? {
            return Ok(None);
        }
        queries::get_card(&self.pool, id).await
    }

    async fn cancel_card(&self, id: &str) -> Result<bool> {
        queries::cancel_card(&self.pool, id).await
    }

    async fn delete_card(&self, id: &str) -> Result<bool> {
        queries::delete_card(&self.pool, id).await
    }

    async fn list_cards(&self, user_id: &str) -> Result<Vec<GhostCard>> {
        queries::list_cards_for_user(&self.pool, user_id).await
    }

    async fn list_expired_active(&self, now: DateTime<Utc>) -> Result<Vec<GhostCard>> {
        let cards = queries::list_active_cards(&self.pool).await?;
        Ok(cards
            .into_iter()
            .filter(|card| card.is_expired_at(now))
            .collect())
    }

    async fn append_ledger_entry(&self, entry: &LedgerEntry) -> Result<()> {
        queries::insert_ledger_entry(&self.pool, entry).await?;
        Ok(())
    }

    async fn settle(
        &self,
        card: &GhostCard,
        expected_version: i64,
        entry: &LedgerEntry,
    ) -> Result<bool> {
        queries::settle(&self.pool, card, expected_version, entry).await
    }

    async fn history(&self, ghost_card_id: &str) -> Result<Vec<LedgerEntry>> {
        queries::ledger_for_card(&self.pool, ghost_card_id).await
    }

    async fn find_user(&self, id: &str) -> Result<Option<User>> {
        queries::get_user(&self.pool, id).await
    }

    async fn find_user_by_name(&self, name: &str) -> Result<Option<User>> {
        queries::get_user_by_name(&self.pool, name).await
    }

    async fn insert_user(&self, user: &User) -> Result<bool> {
        queries::insert_user(&self.pool, user).await
    }
}
