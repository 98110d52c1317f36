use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::BTreeSet;
use std::str::FromStr;

use crate::card::{GhostCard, LedgerEntry, LedgerStatus, User};

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct GhostCardRow {
    pub id: String,
    pub user_id: String,
    pub external_ref: Option<String>,
    pub last4: Option<String>,
    pub balance: String,         // Decimal stored as TEXT
    pub original_amount: String, // Decimal stored as TEXT
    pub currency: String,
    pub allowed_merchants: String, // JSON array
    pub expires_at: DateTime<Utc>,
    pub status: String,
    pub single_use: bool,
    pub used: bool,
    pub usage_count: i64,
    pub usage_limit: Option<i64>,
    pub alias: Option<String>,
    pub color_theme: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_transaction_at: Option<DateTime<Utc>>,
    pub version: i64,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct LedgerRow {
    pub id: String,
    pub card_id: Option<String>,
    pub ghost_card_id: String,
    pub amount: String,
    pub merchant: String,
    pub currency: String,
    pub status: String,
    pub reason: String,
    pub timestamp: DateTime<Utc>,
    pub remaining_balance: String,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct UserRow {
    pub id: String,
    pub name: String,
    pub total_balance: String,
    pub cardholder_ref: String,
    pub created_at: DateTime<Utc>,
}

fn parse_money(field: &str, raw: &str) -> Result<Decimal> {
    let value =
        Decimal::from_str(raw).with_context(|| format!("Invalid decimal in {}: {}", field, raw))?;
    if value.is_sign_negative() && !value.is_zero() {
        return Err(anyhow!("Negative amount in {}: {}", field, raw));
    }
    Ok(value)
}

fn parse_count(field: &str, raw: i64) -> Result<u32> {
    u32::try_from(raw).map_err(|_| anyhow!("Out of range {}: {}", field, raw))
}

impl TryFrom<GhostCardRow> for GhostCard {
    type Error = anyhow::Error;

    fn try_from(row: GhostCardRow) -> Result<Self> {
        let allowed_merchants: BTreeSet<String> = serde_json::from_str(&row.allowed_merchants)
            .with_context(|| format!("Invalid allowed_merchants for card {}", row.id))?;
        let usage_limit = row
            .usage_limit
            .map(|limit| parse_count("usage_limit", limit))
            .transpose()?;

        Ok(GhostCard {
            balance: parse_money("balance", &row.balance)?,
            original_amount: parse_money("original_amount", &row.original_amount)?,
            status: row.status.parse()?,
            usage_count: parse_count("usage_count", row.usage_count)?,
            usage_limit,
            allowed_merchants,
            id: row.id,
            user_id: row.user_id,
            external_ref: row.external_ref,
            last4: row.last4,
            currency: row.currency,
            expires_at: row.expires_at,
            single_use: row.single_use,
            used: row.used,
            alias: row.alias,
            color_theme: row.color_theme,
            created_at: row.created_at,
            last_transaction_at: row.last_transaction_at,
            version: row.version,
        })
    }
}

impl TryFrom<LedgerRow> for LedgerEntry {
    type Error = anyhow::Error;

    fn try_from(row: LedgerRow) -> Result<Self> {
        Ok(LedgerEntry {
            amount: parse_money("amount", &row.amount)?,
            remaining_balance: parse_money("remaining_balance", &row.remaining_balance)?,
            status: LedgerStatus::from_str(&row.status)?,
            card_id: row.card_id.unwrap_or_default(),
            id: row.id,
            ghost_card_id: row.ghost_card_id,
            merchant: row.merchant,
            currency: row.currency,
            reason: row.reason,
            timestamp: row.timestamp,
        })
    }
}

impl TryFrom<UserRow> for User {
    type Error = anyhow::Error;

    fn try_from(row: UserRow) -> Result<Self> {
        Ok(User {
            total_balance: parse_money("total_balance", &row.total_balance)?,
            id: row.id,
            name: row.name,
            cardholder_ref: row.cardholder_ref,
            created_at: row.created_at,
        })
    }
}

/// Serialized allowlist column value
pub fn merchants_json(merchants: &BTreeSet<String>) -> Result<String> {
    Ok(serde_json::to_string(merchants)?)
}
