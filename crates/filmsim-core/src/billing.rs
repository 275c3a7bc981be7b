//! Premium plans and payment handling

use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::{info, warn};

use crate::quota::{QuotaError, QuotaStore};
use crate::UserId;

/// Invoice currency (Telegram Stars)
pub const STARS_CURRENCY: &str = "XTR";

/// A purchasable premium plan
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PremiumPlan {
    /// Invoice payload identifying the plan
    pub payload: &'static str,
    /// Invoice title
    pub title: &'static str,
    /// Invoice description
    pub description: &'static str,
    /// Premium days granted
    pub days: u32,
    /// Price in Stars
    pub stars: u32,
}

/// Default 30 day plan
pub const PREMIUM_30D: PremiumPlan = PremiumPlan {
    payload: "premium_30d",
    title: "FilmSim Premium (30 days)",
    description: "Unlimited exports for 30 days.",
    days: 30,
    stars: 199,
};

/// All plans on sale
pub const PREMIUM_PLANS: &[PremiumPlan] = &[PREMIUM_30D];

/// Payment errors
#[derive(Error, Debug)]
pub enum BillingError {
    /// The payload names no known plan
    #[error("Unknown plan: {0}")]
    UnknownPlan(String),
    /// Granting the entitlement failed
    #[error("Quota error: {0}")]
    Quota(#[from] QuotaError),
}

/// Look up a plan by invoice payload
#[must_use]
pub fn find_plan(payload: &str) -> Option<&'static PremiumPlan> {
    PREMIUM_PLANS.iter().find(|plan| plan.payload == payload)
}

/// Decide a pre-checkout query: approve only known plans.
///
/// # Errors
///
/// Returns `UnknownPlan` for any other payload.
pub fn pre_checkout(payload: &str) -> Result<&'static PremiumPlan, BillingError> {
    find_plan(payload).ok_or_else(|| {
        warn!(payload, "Pre-checkout for unknown plan refused");
        BillingError::UnknownPlan(payload.to_string())
    })
}

/// Grant the purchased plan and return the new premium expiry.
///
/// Every call grants again; Telegram delivers each successful payment once.
///
/// # Errors
///
/// Returns `UnknownPlan` without granting anything, or the store's error.
pub async fn apply_successful_payment(
    quota: &dyn QuotaStore,
    user_id: UserId,
    payload: &str,
) -> Result<DateTime<Utc>, BillingError> {
    let plan = find_plan(payload).ok_or_else(|| BillingError::UnknownPlan(payload.to_string()))?;
    let until = quota.grant_premium_days(user_id, plan.days).await?;
    info!(user_id, plan = plan.payload, until = %until, "Premium granted");
    Ok(until)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quota::MockQuotaStore;
    use chrono::TimeZone;
    use mockall::predicate::eq;

    #[test]
    fn pre_checkout_accepts_only_known_plans() {
        assert!(matches!(pre_checkout("premium_30d"), Ok(plan) if plan.days == 30));
        assert!(matches!(
            pre_checkout("premium_1y"),
            Err(BillingError::UnknownPlan(p)) if p == "premium_1y"
        ));
    }

    #[tokio::test]
    async fn successful_payment_grants_plan_days() {
        let until = Utc
            .with_ymd_and_hms(2030, 1, 31, 0, 0, 0)
            .single()
            .expect("valid timestamp");
        let mut quota = MockQuotaStore::new();
        quota
            .expect_grant_premium_days()
            .with(eq(42), eq(30))
            .times(1)
            .returning(move |_, _| Ok(until));

        let granted = apply_successful_payment(&quota, 42, "premium_30d")
            .await
            .expect("grant succeeds");
        assert_eq!(granted, until);
    }

    #[tokio::test]
    async fn unknown_payload_grants_nothing() {
        let mut quota = MockQuotaStore::new();
        quota.expect_grant_premium_days().never();

        let result = apply_successful_payment(&quota, 42, "bogus").await;
        assert!(matches!(result, Err(BillingError::UnknownPlan(_))));
    }
}
