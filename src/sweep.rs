use anyhow::Result;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;

use crate::{authorization::service::retire_card, issuer::CardIssuer, store::CardStore};

/// Cancel every active card whose expiry has passed. Returns how many were retired.
pub async fn sweep_once(
    store: &dyn CardStore,
    issuer: &dyn CardIssuer,
    now: DateTime<Utc>,
) -> Result<usize> {
    let expired = store.list_expired_active(now).await?;
    let mut retired = 0;

    for card in &expired {
        match retire_card(store, issuer, card).await {
            Ok(true) => retired += 1,
            Ok(false) => {}
            Err(e) => tracing::warn!(card_id = %card.id, "Failed to retire expired card: {}", e),
        }
    }

    Ok(retired)
}

/// Run `sweep_once` on a fixed interval until the process exits
pub fn spawn(
    store: Arc<dyn CardStore>,
    issuer: Arc<dyn CardIssuer>,
    every: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        loop {
            ticker.tick().await;
            match sweep_once(store.as_ref(), issuer.as_ref(), Utc::now()).await {
                Ok(0) => {}
                Ok(retired) => tracing::info!(retired, "Expiry sweep retired cards"),
                Err(e) => tracing::error!("Expiry sweep failed: {:#}", e),
            }
        }
    })
}
