use anyhow::Result;
use sqlx::{Executor, Pool, Sqlite};

use crate::{
    card::{CardStatus, GhostCard, LedgerEntry, RulePatch, User},
    db::models::{GhostCardRow, LedgerRow, UserRow, merchants_json},
};

pub async fn get_card(pool: &Pool<Sqlite>, id: &str) -> Result<Option<GhostCard>> {
    let row = sqlx::query_as::<_, GhostCardRow>("SELECT * FROM ghost_cards WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?;

    row.map(GhostCard::try_from).transpose()
}

pub async fn get_card_by_external_ref(
    pool: &Pool<Sqlite>,
    external_ref: &str,
) -> Result<Option<GhostCard>> {
    let row = sqlx::query_as::<_, GhostCardRow>(
        "SELECT * FROM ghost_cards WHERE external_ref = ? LIMIT 1",
    )
    .bind(external_ref)
    .fetch_optional(pool)
    .await?;

    row.map(GhostCard::try_from).transpose()
}

pub async fn insert_card(pool: &Pool<Sqlite>, card: &GhostCard) -> Result<()> {
    sqlx::query(
        "INSERT INTO ghost_cards (id, user_id, external_ref, last4, balance, original_amount,
         currency, allowed_merchants, expires_at, status, single_use, used, usage_count,
         usage_limit, alias, color_theme, created_at, last_transaction_at, version)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&card.id)
    .bind(&card.user_id)
    .bind(&card.external_ref)
    .bind(&card.last4)
    .bind(card.balance.to_string())
    .bind(card.original_amount.to_string())
    .bind(&card.currency)
    .bind(merchants_json(&card.allowed_merchants)?)
    .bind(card.expires_at)
    .bind(card.status.as_str())
    .bind(card.single_use)
    .bind(card.used)
    .bind(i64::from(card.usage_count))
    .bind(card.usage_limit.map(i64::from))
    .bind(&card.alias)
    .bind(&card.color_theme)
    .bind(card.created_at)
    .bind(card.last_transaction_at)
    .bind(card.version)
    .execute(pool)
    .await?;

    Ok(())
}

/// Writes the spend state of a card if its stored version still matches.
pub async fn update_card_state<'e, E>(
    executor: E,
    card: &GhostCard,
    expected_version: i64,
) -> Result<bool>
where
    E: Executor<'e, Database = Sqlite>,
{
    let result = sqlx::query(
        "UPDATE ghost_cards SET balance = ?, used = ?, status = ?, usage_count = ?,
         last_transaction_at = ?, version = version + 1
         WHERE id = ? AND version = ?",
    )
    .bind(card.balance.to_string())
    .bind(card.used)
    .bind(card.status.as_str())
    .bind(i64::from(card.usage_count))
    .bind(card.last_transaction_at)
    .bind(&card.id)
    .bind(expected_version)
    .execute(executor)
    .await?;

    Ok(result.rows_affected() > 0)
}

pub async fn update_card_rules(pool: &Pool<Sqlite>, id: &str, patch: &RulePatch) -> Result<bool> {
    let merchants = patch
        .allowed_merchants
        .as_ref()
        .map(merchants_json)
        .transpose()?;

    let result = sqlx::query(
        "UPDATE ghost_cards SET alias = COALESCE(?, alias),
         allowed_merchants = COALESCE(?, allowed_merchants),
         expires_at = COALESCE(?, expires_at),
         color_theme = COALESCE(?, color_theme),
         version = version + 1
         WHERE id = ?",
    )
    .bind(&patch.alias)
    .bind(merchants)
    .bind(patch.expires_at)
    .bind(&patch.color_theme)
    .bind(id)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Moves an active card to canceled. Returns false if it was not active.
pub async fn cancel_card(pool: &Pool<Sqlite>, id: &str) -> Result<bool> {
    let result = sqlx::query(
        "UPDATE ghost_cards SET status = ?, version = version + 1 WHERE id = ? AND status = ?",
    )
    .bind(CardStatus::Canceled.as_str())
    .bind(id)
    .bind(CardStatus::Active.as_str())
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

pub async fn delete_card(pool: &Pool<Sqlite>, id: &str) -> Result<bool> {
    let result = sqlx::query("DELETE FROM ghost_cards WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await?;

    Ok(result.rows_affected() > 0)
}

pub async fn list_cards_for_user(pool: &Pool<Sqlite>, user_id: &str) -> Result<Vec<GhostCard>> {
    let rows = sqlx::query_as::<_, GhostCardRow>(
        "SELECT * FROM ghost_cards WHERE user_id = ? ORDER BY rowid DESC",
    )
    .bind(user_id)
    .fetch_all(pool)
    .await?;

    rows.into_iter().map(GhostCard::try_from).collect()
}

pub async fn list_active_cards(pool: &Pool<Sqlite>) -> Result<Vec<GhostCard>> {
    let rows = sqlx::query_as::<_, GhostCardRow>("SELECT * FROM ghost_cards WHERE status = ?")
        .bind(CardStatus::Active.as_str())
        .fetch_all(pool)
        .await?;

    rows.into_iter().map(GhostCard::try_from).collect()
}

/// Appends a ledger entry. Re-appending an entry id that already exists is a no-op.
pub async fn insert_ledger_entry<'e, E>(executor: E, entry: &LedgerEntry) -> Result<bool>
where
    E: Executor<'e, Database = Sqlite>,
{
    let result = sqlx::query(
        "INSERT INTO transactions (id, card_id, ghost_card_id, amount, merchant, currency,
         status, reason, timestamp, remaining_balance)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT(id) DO NOTHING",
    )
    .bind(&entry.id)
    .bind(&entry.card_id)
    .bind(&entry.ghost_card_id)
    .bind(entry.amount.to_string())
    .bind(&entry.merchant)
    .bind(&entry.currency)
    .bind(entry.status.as_str())
    .bind(&entry.reason)
    .bind(entry.timestamp)
    .bind(entry.remaining_balance.to_string())
    .execute(executor)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Card state update and ledger append in one database transaction.
pub async fn settle(
    pool: &Pool<Sqlite>,
    card: &GhostCard,
    expected_version: i64,
    entry: &LedgerEntry,
) -> Result<bool> {
    let mut tx = pool.begin().await?;

    if !update_card_state(&mut *tx, card, expected_version).await? {
        tx.rollback().await?;
        return Ok(false);
    }
    insert_ledger_entry(&mut *tx, entry).await?;

    tx.commit().await?;
    Ok(true)
}

pub async fn ledger_for_card(pool: &Pool<Sqlite>, ghost_card_id: &str) -> Result<Vec<LedgerEntry>> {
    let rows = sqlx::query_as::<_, LedgerRow>(
        "SELECT id, card_id, ghost_card_id, amount, merchant, currency, status, reason,
         timestamp, remaining_balance
         FROM transactions WHERE ghost_card_id = ? ORDER BY seq DESC",
    )
    .bind(ghost_card_id)
    .fetch_all(pool)
    .await?;

    rows.into_iter().map(LedgerEntry::try_from).collect()
}

pub async fn get_user(pool: &Pool<Sqlite>, id: &str) -> Result<Option<User>> {
    let row = sqlx::query_as::<_, UserRow>("SELECT * FROM users WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?;

    row.map(User::try_from).transpose()
}

pub async fn get_user_by_name(pool: &Pool<Sqlite>, name: &str) -> Result<Option<User>> {
    let row = sqlx::query_as::<_, UserRow>("SELECT * FROM users WHERE name = ?")
        .bind(name)
        .fetch_optional(pool)
        .await?;

    row.map(User::try_from).transpose()
}

/// Returns false if a user with the same name already exists.
pub async fn insert_user(pool: &Pool<Sqlite>, user: &User) -> Result<bool> {
    let result = sqlx::query(
        "INSERT INTO users (id, name, total_balance, cardholder_ref, created_at)
         VALUES (?, ?, ?, ?, ?)
         ON CONFLICT(name) DO NOTHING",
    )
    .bind(&user.id)
    .bind(&user.name)
    .bind(user.total_balance.to_string())
    .bind(&user.cardholder_ref)
    .bind(user.created_at)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}
