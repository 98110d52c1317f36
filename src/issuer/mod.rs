use anyhow::{Result, anyhow};
use async_trait::async_trait;
use chrono::{Datelike, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use tokio::sync::Mutex;

pub mod stripe;

pub use stripe::StripeIssuer;

/// Status of a card resource at the issuing provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IssuerCardStatus {
    Active,
    Inactive,
    Canceled,
}

impl IssuerCardStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            IssuerCardStatus::Active => "active",
            IssuerCardStatus::Inactive => "inactive",
            IssuerCardStatus::Canceled => "canceled",
        }
    }
}

impl fmt::Display for IssuerCardStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cardholder {
    pub id: String,
    pub name: String,
}

/// Handle to a card minted by the provider
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IssuedCard {
    pub id: String,
    pub last4: String,
    pub exp_month: u32,
    pub exp_year: i32,
    pub status: IssuerCardStatus,
}

/// Card handle expanded with the sensitive number and CVC
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CardDetails {
    pub id: String,
    pub number: String,
    pub cvc: String,
    pub last4: String,
    pub exp_month: u32,
    pub exp_year: i32,
}

#[async_trait]
pub trait CardIssuer: Send + Sync {
    fn name(&self) -> &'static str;

    async fn create_cardholder(&self, name: &str) -> Result<Cardholder>;

    /// Mint a virtual card, optionally capped at `spend_limit` for its lifetime
    async fn create_card(
        &self,
        cardholder: &str,
        currency: &str,
        spend_limit: Option<Decimal>,
    ) -> Result<IssuedCard>;

    /// Fetch a card with its number and CVC expanded
    async fn retrieve_card(&self, card_id: &str) -> Result<CardDetails>;

    async fn update_status(&self, card_id: &str, status: IssuerCardStatus) -> Result<IssuedCard>;
}

/// In-process simulated provider
#[derive(Default)]
pub struct MockIssuer {
    cards: Mutex<HashMap<String, CardDetails>>,
    statuses: Mutex<HashMap<String, IssuerCardStatus>>,
}

impl MockIssuer {
    pub fn new() -> Self {
        Self::default()
    }

    fn handle(prefix: &str) -> String {
        format!("{}_{}", prefix, hex::encode(rand::random::<[u8; 12]>()))
    }

    fn digits(count: usize) -> String {
        (0..count)
            .map(|_| char::from(b'0' + rand::random_range(0..10u8)))
            .collect()
    }
}

#[async_trait]
impl CardIssuer for MockIssuer {
    fn name(&self) -> &'static str {
        "mock"
    }

    async fn create_cardholder(&self, name: &str) -> Result<Cardholder> {
        Ok(Cardholder {
            id: Self::handle("ich"),
            name: name.to_string(),
        })
    }

    async fn create_card(
        &self,
        cardholder: &str,
        _currency: &str,
        _spend_limit: Option<Decimal>,
    ) -> Result<IssuedCard> {
        if cardholder.is_empty() {
            return Err(anyhow!("Cardholder is required"));
        }

        let now = Utc::now();
        let number = format!("400000{}", Self::digits(10));
        let details = CardDetails {
            id: Self::handle("ic"),
            last4: number[number.len() - 4..].to_string(),
            number,
            cvc: Self::digits(3),
            exp_month: now.month(),
            exp_year: now.year() + 3,
        };

        let issued = IssuedCard {
            id: details.id.clone(),
            last4: details.last4.clone(),
            exp_month: details.exp_month,
            exp_year: details.exp_year,
            status: IssuerCardStatus::Active,
        };

        self.statuses
            .lock()
            .await
            .insert(details.id.clone(), IssuerCardStatus::Active);
        self.cards.lock().await.insert(details.id.clone(), details);

        Ok(issued)
    }

    async fn retrieve_card(&self, card_id: &str) -> Result<CardDetails> {
        self.cards
            .lock()
            .await
            .get(card_id)
            .cloned()
            .ok_or_else(|| anyhow!("No such card: {}", card_id))
    }

    async fn update_status(&self, card_id: &str, status: IssuerCardStatus) -> Result<IssuedCard> {
        let details = self.retrieve_card(card_id).await?;

        let mut statuses = self.statuses.lock().await;
        if statuses.get(card_id) == Some(&IssuerCardStatus::Canceled)
            && status != IssuerCardStatus::Canceled
        {
            return Err(anyhow!("Card {} is canceled", card_id));
        }
        statuses.insert(card_id.to_string(), status);

        Ok(IssuedCard {
            id: details.id,
            last4: details.last4,
            exp_month: details.exp_month,
            exp_year: details.exp_year,
            status,
        })
    }
}
