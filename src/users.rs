use chrono::Utc;
use rust_decimal::Decimal;

use crate::{
    card::User,
    error::{ServiceError, ServiceResult},
    issuer::CardIssuer,
    store::CardStore,
};

#[derive(Debug, Clone)]
pub struct UserSummary {
    pub user: User,
    pub card_ids: Vec<String>,
    pub open_card_count: usize,
    pub is_existing_user: bool,
}

/// Look up a user by name, registering them (and a provider cardholder) if absent.
pub async fn find_or_create(
    store: &dyn CardStore,
    issuer: &dyn CardIssuer,
    name: &str,
    total_balance: Option<Decimal>,
) -> ServiceResult<UserSummary> {
    let name = name.trim();
    if name.is_empty() {
        return Err(ServiceError::invalid("name is required"));
    }
    let total_balance = total_balance.unwrap_or(Decimal::ZERO);
    if total_balance < Decimal::ZERO {
        return Err(ServiceError::invalid("total_balance must not be negative"));
    }

    if let Some(user) = store
        .find_user_by_name(name)
        .await
        .map_err(ServiceError::Store)?
    {
        return summarize(store, user, true).await;
    }

    let cardholder = issuer
        .create_cardholder(name)
        .await
        .map_err(ServiceError::Issuer)?;
    let user = User {
        id: uuid::Uuid::new_v4().to_string(),
        name: name.to_string(),
        total_balance,
        cardholder_ref: cardholder.id,
        created_at: Utc::now(),
    };

    if !store.insert_user(&user).await.map_err(ServiceError::Store)? {
        // Lost a race with a concurrent registration of the same name
        tracing::warn!(
            name,
            orphaned_cardholder = %user.cardholder_ref,
            "User registered concurrently, provider cardholder left unused"
        );
        let existing = store
            .find_user_by_name(name)
            .await
            .map_err(ServiceError::Store)?
            .ok_or_else(|| ServiceError::not_found("User", name))?;
        return summarize(store, existing, true).await;
    }

    tracing::info!(user_id = %user.id, cardholder = %user.cardholder_ref, "Registered user");
    summarize(store, user, false).await
}

async fn summarize(
    store: &dyn CardStore,
    user: User,
    is_existing_user: bool,
) -> ServiceResult<UserSummary> {
    let cards = store
        .list_cards(&user.id)
        .await
        .map_err(ServiceError::Store)?;

    Ok(UserSummary {
        open_card_count: cards.iter().filter(|card| card.is_active()).count(),
        card_ids: cards.into_iter().map(|card| card.id).collect(),
        user,
        is_existing_user,
    })
}
