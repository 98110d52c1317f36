use chrono::{DateTime, Utc};
use std::fmt;

use crate::card::{GhostCard, Transaction};

pub mod mutator;
pub mod service;

/// Fixed vocabulary of authorization outcomes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reason {
    CardNotFound,
    SingleUseDeactivated,
    CardInactive,
    MerchantNotAllowed,
    CardExpired,
    SingleUseAlreadyUsed,
    InsufficientBalance,
    UsageLimitReached,
    SingleUseApproved,
    ProbeApproved,
    Approved,
}

impl Reason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Reason::CardNotFound => "Card not found",
            Reason::SingleUseDeactivated => "Single-use card already used and deactivated",
            Reason::CardInactive => "Card inactive",
            Reason::MerchantNotAllowed => "Merchant not allowed",
            Reason::CardExpired => "Card expired",
            Reason::SingleUseAlreadyUsed => "Single-use card already used",
            Reason::InsufficientBalance => "Insufficient balance",
            Reason::UsageLimitReached => "Usage limit reached",
            Reason::SingleUseApproved => "Single-use card transaction approved",
            Reason::ProbeApproved => "$0 test transaction approved",
            Reason::Approved => "Transaction approved",
        }
    }
}

impl fmt::Display for Reason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of running a transaction through the rule chain
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Verdict {
    pub approved: bool,
    pub reason: Reason,
}

impl Verdict {
    fn approve(reason: Reason) -> Self {
        Self { approved: true, reason }
    }

    fn reject(reason: Reason) -> Self {
        Self { approved: false, reason }
    }
}

/// Evaluate a transaction against a card snapshot.
///
/// Checks run in a fixed order and the first failure decides the reason:
/// existence, status, merchant allowlist, expiry, the single-use branch,
/// then balance and usage limit for regular cards. Zero-amount probes stop
/// after the single-use branch.
///
/// Performs no I/O and never mutates its inputs.
pub fn evaluate(tx: &Transaction, card: Option<&GhostCard>, now: DateTime<Utc>) -> Verdict {
    let Some(card) = card else {
        return Verdict::reject(Reason::CardNotFound);
    };

    if !card.is_active() {
        // Non-active single-use cards are always consumed ones
        if card.single_use {
            return Verdict::reject(Reason::SingleUseDeactivated);
        }
        return Verdict::reject(Reason::CardInactive);
    }

    if !card.allows_merchant(&tx.merchant) {
        return Verdict::reject(Reason::MerchantNotAllowed);
    }

    if card.is_expired_at(now) {
        return Verdict::reject(Reason::CardExpired);
    }

    if card.single_use && card.used {
        return Verdict::reject(Reason::SingleUseAlreadyUsed);
    }

    if tx.is_probe() {
        return Verdict::approve(Reason::ProbeApproved);
    }

    // Single-use cards are spend-once; their balance is not consulted
    if card.single_use {
        return Verdict::approve(Reason::SingleUseApproved);
    }

    if tx.amount > card.balance {
        return Verdict::reject(Reason::InsufficientBalance);
    }

    if let Some(limit) = card.usage_limit {
        if card.usage_count >= limit {
            return Verdict::reject(Reason::UsageLimitReached);
        }
    }

    Verdict::approve(Reason::Approved)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::card::{CardStatus, fixtures};
    use chrono::Duration;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    fn netflix_card() -> GhostCard {
        let mut card = fixtures::card(dec!(100));
        card.allowed_merchants = ["netflix".to_string()].into_iter().collect();
        card
    }

    #[test]
    fn test_missing_card_is_rejected() {
        let verdict = evaluate(&fixtures::tx(dec!(1), "netflix"), None, Utc::now());
        assert_eq!(verdict, Verdict::reject(Reason::CardNotFound));
    }

    #[test]
    fn test_inactive_cards_never_approve() {
        let mut card = fixtures::card(dec!(100));
        card.status = CardStatus::Canceled;

        for amount in [dec!(0), dec!(1), dec!(100), dec!(1000)] {
            for merchant in ["netflix", "spotify", ""] {
                let verdict = evaluate(&fixtures::tx(amount, merchant), Some(&card), Utc::now());
                assert!(!verdict.approved);
                assert_eq!(verdict.reason, Reason::CardInactive);
            }
        }
    }

    #[test]
    fn test_canceled_single_use_card_reports_consumption() {
        let mut card = fixtures::card(dec!(20));
        card.single_use = true;
        card.used = true;
        card.status = CardStatus::Canceled;

        let verdict = evaluate(&fixtures::tx(dec!(5), "any"), Some(&card), Utc::now());
        assert_eq!(verdict, Verdict::reject(Reason::SingleUseDeactivated));
    }

    #[test]
    fn test_merchant_outside_allowlist_is_rejected() {
        let card = netflix_card();
        let verdict = evaluate(&fixtures::tx(dec!(5), "hulu"), Some(&card), Utc::now());
        assert_eq!(verdict, Verdict::reject(Reason::MerchantNotAllowed));

        // Matching is exact
        let verdict = evaluate(&fixtures::tx(dec!(5), "Netflix"), Some(&card), Utc::now());
        assert_eq!(verdict, Verdict::reject(Reason::MerchantNotAllowed));
    }

    #[test]
    fn test_empty_allowlist_accepts_any_merchant() {
        let card = fixtures::card(dec!(100));
        let verdict = evaluate(&fixtures::tx(dec!(5), "anything"), Some(&card), Utc::now());
        assert_eq!(verdict, Verdict::approve(Reason::Approved));
    }

    #[test]
    fn test_expired_card_is_rejected() {
        let mut card = fixtures::card(dec!(100));
        card.expires_at = Utc::now() - Duration::minutes(1);

        let verdict = evaluate(&fixtures::tx(dec!(5), "netflix"), Some(&card), Utc::now());
        assert_eq!(verdict, Verdict::reject(Reason::CardExpired));
    }

    #[test]
    fn test_merchant_check_precedes_expiry() {
        let mut card = netflix_card();
        card.expires_at = Utc::now() - Duration::minutes(1);

        let verdict = evaluate(&fixtures::tx(dec!(5), "hulu"), Some(&card), Utc::now());
        assert_eq!(verdict.reason, Reason::MerchantNotAllowed);
    }

    #[test]
    fn test_used_single_use_card_rejects_even_probes() {
        let mut card = fixtures::card(dec!(20));
        card.single_use = true;
        card.used = true;

        for amount in [dec!(0), dec!(1)] {
            let verdict = evaluate(&fixtures::tx(amount, "any"), Some(&card), Utc::now());
            assert_eq!(verdict, Verdict::reject(Reason::SingleUseAlreadyUsed));
        }
    }

    #[test]
    fn test_single_use_card_ignores_balance() {
        let mut card = fixtures::card(dec!(20));
        card.single_use = true;

        let verdict = evaluate(&fixtures::tx(dec!(999), "any"), Some(&card), Utc::now());
        assert_eq!(verdict, Verdict::approve(Reason::SingleUseApproved));
    }

    #[test]
    fn test_regular_card_approves_iff_amount_within_balance() {
        let card = netflix_card();
        let cases = [
            (dec!(0.01), true),
            (dec!(50), true),
            (dec!(100), true),
            (dec!(100.01), false),
            (dec!(150), false),
        ];

        for (amount, expected) in cases {
            let verdict = evaluate(&fixtures::tx(amount, "netflix"), Some(&card), Utc::now());
            assert_eq!(verdict.approved, expected, "amount {}", amount);
            if !expected {
                assert_eq!(verdict.reason, Reason::InsufficientBalance);
            }
        }
    }

    #[test]
    fn test_usage_limit_blocks_once_reached() {
        let mut card = fixtures::card(dec!(100));
        card.usage_limit = Some(2);
        card.usage_count = 1;
        let verdict = evaluate(&fixtures::tx(dec!(5), "any"), Some(&card), Utc::now());
        assert!(verdict.approved);

        card.usage_count = 2;
        let verdict = evaluate(&fixtures::tx(dec!(5), "any"), Some(&card), Utc::now());
        assert_eq!(verdict, Verdict::reject(Reason::UsageLimitReached));
    }

    #[test]
    fn test_balance_check_precedes_usage_limit() {
        let mut card = fixtures::card(dec!(10));
        card.usage_limit = Some(1);
        card.usage_count = 1;

        let verdict = evaluate(&fixtures::tx(dec!(50), "any"), Some(&card), Utc::now());
        assert_eq!(verdict.reason, Reason::InsufficientBalance);
    }

    #[test]
    fn test_probe_skips_balance_and_usage_limit() {
        let mut card = fixtures::card(Decimal::ZERO);
        card.usage_limit = Some(1);
        card.usage_count = 1;

        let verdict = evaluate(&fixtures::tx(Decimal::ZERO, "any"), Some(&card), Utc::now());
        assert_eq!(verdict, Verdict::approve(Reason::ProbeApproved));
    }

    #[test]
    fn test_probe_still_runs_gating_checks() {
        let mut card = netflix_card();
        let verdict = evaluate(&fixtures::tx(Decimal::ZERO, "hulu"), Some(&card), Utc::now());
        assert_eq!(verdict.reason, Reason::MerchantNotAllowed);

        card.expires_at = Utc::now() - Duration::seconds(1);
        let verdict = evaluate(&fixtures::tx(Decimal::ZERO, "netflix"), Some(&card), Utc::now());
        assert_eq!(verdict.reason, Reason::CardExpired);
    }

    #[test]
    fn test_evaluate_is_repeatable() {
        let card = netflix_card();
        let snapshot = card.clone();
        let tx = fixtures::tx(dec!(50), "netflix");
        let now = Utc::now();

        let first = evaluate(&tx, Some(&card), now);
        let second = evaluate(&tx, Some(&card), now);
        assert_eq!(first, second);
        assert_eq!(card, snapshot);
    }
}
