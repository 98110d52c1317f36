use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::time::Duration;

use super::{CardDetails, CardIssuer, Cardholder, IssuedCard, IssuerCardStatus};

/// Stripe Issuing REST client
pub struct StripeIssuer {
    client: Client,
    api_base: String,
    secret_key: String,
}

#[derive(Debug, Deserialize)]
struct StripeCard {
    id: String,
    last4: String,
    exp_month: u32,
    exp_year: i32,
    status: IssuerCardStatus,
    number: Option<String>,
    cvc: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StripeCardholder {
    id: String,
    name: String,
}

#[derive(Debug, Deserialize)]
struct StripeErrorBody {
    error: StripeErrorDetail,
}

#[derive(Debug, Deserialize)]
struct StripeErrorDetail {
    message: Option<String>,
}

impl From<StripeCard> for IssuedCard {
    fn from(card: StripeCard) -> Self {
        IssuedCard {
            id: card.id,
            last4: card.last4,
            exp_month: card.exp_month,
            exp_year: card.exp_year,
            status: card.status,
        }
    }
}

/// Amount in the currency's minor unit
fn minor_units(amount: Decimal) -> Result<i64> {
    (amount * Decimal::ONE_HUNDRED)
        .round()
        .to_i64()
        .ok_or_else(|| anyhow!("Spend limit out of range: {}", amount))
}

impl StripeIssuer {
    pub fn new(secret_key: &str, api_base: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            api_base: api_base.trim_end_matches('/').to_string(),
            secret_key: secret_key.to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/v1/{}", self.api_base, path)
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T> {
        let response = request.bearer_auth(&self.secret_key).send().await?;
        let status = response.status();

        if !status.is_success() {
            let message = response
                .json::<StripeErrorBody>()
                .await
                .ok()
                .and_then(|body| body.error.message)
                .unwrap_or_else(|| "unknown error".to_string());
            return Err(anyhow!("Stripe API error ({}): {}", status, message));
        }

        Ok(response.json::<T>().await?)
    }
}

#[async_trait]
impl CardIssuer for StripeIssuer {
    fn name(&self) -> &'static str {
        "stripe"
    }

    async fn create_cardholder(&self, name: &str) -> Result<Cardholder> {
        let params = [
            ("name", name),
            ("type", "individual"),
            ("billing[address][line1]", "1 Market Street"),
            ("billing[address][city]", "San Francisco"),
            ("billing[address][state]", "CA"),
            ("billing[address][postal_code]", "94105"),
            ("billing[address][country]", "US"),
        ];

        let holder: StripeCardholder = self
            .send(self.client.post(self.url("issuing/cardholders")).form(&params))
            .await?;

        Ok(Cardholder {
            id: holder.id,
            name: holder.name,
        })
    }

    async fn create_card(
        &self,
        cardholder: &str,
        currency: &str,
        spend_limit: Option<Decimal>,
    ) -> Result<IssuedCard> {
        let mut params = vec![
            ("cardholder".to_string(), cardholder.to_string()),
            ("currency".to_string(), currency.to_string()),
            ("type".to_string(), "virtual".to_string()),
            ("status".to_string(), "active".to_string()),
        ];
        if let Some(limit) = spend_limit {
            params.push((
                "spending_controls[spending_limits][0][amount]".to_string(),
                minor_units(limit)?.to_string(),
            ));
            params.push((
                "spending_controls[spending_limits][0][interval]".to_string(),
                "all_time".to_string(),
            ));
        }

        let card: StripeCard = self
            .send(self.client.post(self.url("issuing/cards")).form(&params))
            .await?;

        Ok(card.into())
    }

    async fn retrieve_card(&self, card_id: &str) -> Result<CardDetails> {
        let request = self
            .client
            .get(self.url(&format!("issuing/cards/{}", card_id)))
            .query(&[("expand[]", "number"), ("expand[]", "cvc")]);
        let card: StripeCard = self.send(request).await?;

        Ok(CardDetails {
            number: card
                .number
                .ok_or_else(|| anyhow!("Card number not returned for {}", card.id))?,
            cvc: card
                .cvc
                .ok_or_else(|| anyhow!("CVC not returned for {}", card.id))?,
            id: card.id,
            last4: card.last4,
            exp_month: card.exp_month,
            exp_year: card.exp_year,
        })
    }

    async fn update_status(&self, card_id: &str, status: IssuerCardStatus) -> Result<IssuedCard> {
        let request = self
            .client
            .post(self.url(&format!("issuing/cards/{}", card_id)))
            .form(&[("status", status.as_str())]);
        let card: StripeCard = self.send(request).await?;

        Ok(card.into())
    }
}
