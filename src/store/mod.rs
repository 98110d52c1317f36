use anyhow::Result;
use chrono::{DateTime, Utc};

use crate::card::{GhostCard, LedgerEntry, RulePatch, User};

pub mod sqlite;

pub use sqlite::SqliteCardStore;

/// Persistence port for cards, the transaction ledger and users.
///
/// Every write to a card bumps its `version`; `put_card` and `settle` only
/// succeed when the caller's `expected_version` still matches.
#[async_trait::async_trait]
pub trait CardStore: Send + Sync {
    async fn get_card(&self, id: &str) -> Result<Option<GhostCard>>;
    async fn find_card_by_external_ref(&self, external_ref: &str) -> Result<Option<GhostCard>>;
    async fn insert_card(&self, card: &GhostCard) -> Result<()>;
    /// Version-checked write of a card's spend state and status
    async fn put_card(&self, card: &GhostCard, expected_version: i64) -> Result<bool>;
    async fn update_rules(&self, id: &str, patch: &RulePatch) -> Result<Option<GhostCard>>;
    async fn cancel_card(&self, id: &str) -> Result<bool>;
    async fn delete_card(&self, id: &str) -> Result<bool>;
    async fn list_cards(&self, user_id: &str) -> Result<Vec<GhostCard>>;
    async fn list_expired_active(&self, now: DateTime<Utc>) -> Result<Vec<GhostCard>>;

    async fn append_ledger_entry(&self, entry: &LedgerEntry) -> Result<()>;
    /// Card write and ledger append as one atomic unit
    async fn settle(
        &self,
        card: &GhostCard,
        expected_version: i64,
        entry: &LedgerEntry,
    ) -> Result<bool>;
    async fn history(&self, ghost_card_id: &str) -> Result<Vec<LedgerEntry>>;

    async fn find_user(&self, id: &str) -> Result<Option<User>>;
    async fn find_user_by_name(&self, name: &str) -> Result<Option<User>>;
    async fn insert_user(&self, user: &User) -> Result<bool>;
}
