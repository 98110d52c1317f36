use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

/// Lifecycle state of a ghost card. `Canceled` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CardStatus {
    Active,
    Canceled,
}

impl CardStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CardStatus::Active => "active",
            CardStatus::Canceled => "canceled",
        }
    }
}

impl fmt::Display for CardStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CardStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(CardStatus::Active),
            "canceled" => Ok(CardStatus::Canceled),
            other => Err(anyhow::anyhow!("Unknown card status: {}", other)),
        }
    }
}

/// A rule-constrained virtual card and its mutable spend state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GhostCard {
    pub id: String,
    pub user_id: String,
    /// Handle of the underlying card at the issuing provider
    pub external_ref: Option<String>,
    pub last4: Option<String>,
    #[serde(with = "rust_decimal::serde::float")]
    pub balance: Decimal,
    /// Funding amount at creation; single-use settlement is computed from it
    #[serde(with = "rust_decimal::serde::float")]
    pub original_amount: Decimal,
    pub currency: String,
    /// Empty means any merchant is accepted
    pub allowed_merchants: BTreeSet<String>,
    pub expires_at: DateTime<Utc>,
    pub status: CardStatus,
    pub single_use: bool,
    pub used: bool,
    pub usage_count: u32,
    pub usage_limit: Option<u32>,
    pub alias: Option<String>,
    pub color_theme: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_transaction_at: Option<DateTime<Utc>>,
    /// Optimistic-concurrency token, bumped by every store write
    pub version: i64,
}

impl GhostCard {
    pub fn is_active(&self) -> bool {
        self.status == CardStatus::Active
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }

    pub fn allows_merchant(&self, merchant: &str) -> bool {
        self.allowed_merchants.is_empty() || self.allowed_merchants.contains(merchant)
    }
}

/// A simulated purchase presented to the authorization engine.
#[derive(Debug, Clone, PartialEq)]
pub struct Transaction {
    /// Identifier the caller used for the card (store id or provider handle)
    pub card_id: String,
    pub merchant: String,
    pub amount: Decimal,
    pub currency: String,
}

impl Transaction {
    pub fn is_probe(&self) -> bool {
        self.amount.is_zero()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LedgerStatus {
    Approved,
    Rejected,
}

impl LedgerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LedgerStatus::Approved => "approved",
            LedgerStatus::Rejected => "rejected",
        }
    }
}

impl FromStr for LedgerStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "approved" => Ok(LedgerStatus::Approved),
            "rejected" => Ok(LedgerStatus::Rejected),
            other => Err(anyhow::anyhow!("Unknown ledger status: {}", other)),
        }
    }
}

/// One evaluated transaction, approved or rejected. Never mutated once appended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub id: String,
    /// External card reference, falling back to the identifier the caller charged
    pub card_id: String,
    pub ghost_card_id: String,
    #[serde(with = "rust_decimal::serde::float")]
    pub amount: Decimal,
    pub merchant: String,
    pub currency: String,
    pub status: LedgerStatus,
    pub reason: String,
    pub timestamp: DateTime<Utc>,
    #[serde(with = "rust_decimal::serde::float")]
    pub remaining_balance: Decimal,
}

impl LedgerEntry {
    pub fn record(
        card: &GhostCard,
        tx: &Transaction,
        status: LedgerStatus,
        reason: impl Into<String>,
        remaining_balance: Decimal,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            card_id: card
                .external_ref
                .clone()
                .unwrap_or_else(|| tx.card_id.clone()),
            ghost_card_id: card.id.clone(),
            amount: tx.amount,
            merchant: tx.merchant.clone(),
            currency: tx.currency.clone(),
            status,
            reason: reason.into(),
            timestamp,
            remaining_balance,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub name: String,
    #[serde(with = "rust_decimal::serde::float")]
    pub total_balance: Decimal,
    pub cardholder_ref: String,
    pub created_at: DateTime<Utc>,
}

/// Policy and cosmetic fields a user may edit after creation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RulePatch {
    pub alias: Option<String>,
    pub allowed_merchants: Option<BTreeSet<String>>,
    pub expires_at: Option<DateTime<Utc>>,
    pub color_theme: Option<String>,
}

impl RulePatch {
    pub fn is_empty(&self) -> bool {
        self.field_names().is_empty()
    }

    pub fn field_names(&self) -> Vec<&'static str> {
        let mut fields = Vec::new();
        if self.alias.is_some() {
            fields.push("alias");
        }
        if self.allowed_merchants.is_some() {
            fields.push("allowed_merchants");
        }
        if self.expires_at.is_some() {
            fields.push("expires_at");
        }
        if self.color_theme.is_some() {
            fields.push("color_theme");
        }
        fields
    }
}

/// Drops blank merchant identifiers; duplicates collapse in the set.
pub fn merchant_set<I, S>(merchants: I) -> BTreeSet<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    merchants
        .into_iter()
        .map(|m| m.as_ref().trim().to_string())
        .filter(|m| !m.is_empty())
        .collect()
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trips_through_str() {
        assert_eq!("active".parse::<CardStatus>().unwrap(), CardStatus::Active);
        assert_eq!("canceled".parse::<CardStatus>().unwrap(), CardStatus::Canceled);
        assert!("inactive".parse::<CardStatus>().is_err());
    }

    #[test]
    fn test_merchant_set_drops_blanks_and_duplicates() {
        let set = merchant_set(["netflix", " ", "netflix", " spotify "]);
        assert_eq!(set.len(), 2);
        assert!(set.contains("netflix"));
        assert!(set.contains("spotify"));
    }

    #[test]
    fn test_rule_patch_reports_touched_fields() {
        let patch = RulePatch {
            alias: Some("Streaming".to_string()),
            color_theme: Some("midnight".to_string()),
            ..Default::default()
        };
        assert_eq!(patch.field_names(), vec!["alias", "color_theme"]);
        assert!(!patch.is_empty());
        assert!(RulePatch::default().is_empty());
    }
}
