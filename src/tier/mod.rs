/// Trust tier restrictions
///
/// Reports which requirements of a user's current tier are unmet. Tier 1
/// needs a complete profile; tier 2 needs verified identity records.

use crate::{
    account::AccountManager,
    db::models::User,
    error::{ApiError, ApiResult},
    verification::VerificationSource,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub const TIER_COMPLETE: &str = "complete";
pub const TIER_INCOMPLETE: &str = "incomplete";

/// Verification types required for tier 2
pub const TIER_TWO_VERIFICATIONS: [&str; 2] = ["national_id", "bvn"];

/// Completeness of a user against their tier
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierRestrictions {
    pub tier: i64,
    pub empty_fields: Vec<String>,
    pub tier_status: String,
}

pub struct TierEvaluator {
    accounts: Arc<AccountManager>,
    verifications: Arc<dyn VerificationSource>,
}

fn empty_profile_fields(user: &User) -> Vec<String> {
    [
        ("firstname", &user.firstname),
        ("lastname", &user.lastname),
        ("email_address", &user.email_address),
        ("username", &user.username),
        ("phone_number", &user.phone_number),
    ]
    .into_iter()
    .filter(|(_, value)| value.is_empty())
    .map(|(name, _)| name.to_string())
    .collect()
}

impl TierEvaluator {
    pub fn new(accounts: Arc<AccountManager>, verifications: Arc<dyn VerificationSource>) -> Self {
        Self {
            accounts,
            verifications,
        }
    }

    pub async fn evaluate(&self, account_id: i64) -> ApiResult<TierRestrictions> {
        let user = self.accounts.get_user(account_id).await?;

        let empty_fields = match user.tier_type {
            1 => empty_profile_fields(&user),
            2 => {
                // An unreachable verification service counts as no records
                let records = match self.verifications.verifications(account_id).await {
                    Ok(records) => records,
                    Err(e) => {
                        tracing::warn!(
                            "Verification lookup failed for account {}: {}",
                            account_id,
                            e
                        );
                        Vec::new()
                    }
                };

                TIER_TWO_VERIFICATIONS
                    .iter()
                    .filter(|kind| !records.iter().any(|r| r.is_verified_as(kind)))
                    .map(|kind| kind.to_string())
                    .collect()
            }
            _ => Vec::new(),
        };

        let tier_status = if empty_fields.is_empty() {
            TIER_COMPLETE
        } else {
            TIER_INCOMPLETE
        };

        Ok(TierRestrictions {
            tier: user.tier_type,
            empty_fields,
            tier_status: tier_status.to_string(),
        })
    }

    /// Move an account to a tier without checking its requirements
    pub async fn upgrade(&self, account_id: i64, tier: i64) -> ApiResult<()> {
        if !(0..=2).contains(&tier) {
            return Err(ApiError::bad_request("tier must be 0, 1 or 2"));
        }

        self.accounts.get_user(account_id).await?;
        self.accounts.set_tier(account_id, tier).await?;

        tracing::info!("Account {} moved to tier {}", account_id, tier);
        Ok(())
    }
}
