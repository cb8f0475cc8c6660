// Copyright 2025 RISC Zero, Inc.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::sync::Arc;

use alloy::primitives::Address;
use chrono::{DateTime, Utc};
use shard_rewards::{Category, Referral, ReferralPolicy, ShardBalance, Shards, ShardsError};
use uuid::Uuid;

use crate::{
    db::{DbError, ShardsDbObj},
    ledger::ShardLedger,
};

/// Claim key of the referrer credit derived from a referee award.
pub fn referral_claim_key(claim_key: &str) -> String {
    format!("referral:{claim_key}")
}

/// Result of crediting one contribution.
#[derive(Debug, Clone, Default)]
pub struct ContributionOutcome {
    /// The contributor's balance, or `None` if the claim was already recorded.
    pub balance: Option<ShardBalance>,
    /// The referrer's balance, when a referral credit was applied.
    pub referrer_balance: Option<ShardBalance>,
}

impl ContributionOutcome {
    pub fn is_new(&self) -> bool {
        self.balance.is_some()
    }
}

pub struct ReferralLedger {
    db: ShardsDbObj,
    ledger: Arc<ShardLedger>,
    policy: ReferralPolicy,
}

impl ReferralLedger {
    pub fn new(db: ShardsDbObj, ledger: Arc<ShardLedger>, policy: ReferralPolicy) -> Self {
        Self { db, ledger, policy }
    }

    pub fn policy(&self) -> &ReferralPolicy {
        &self.policy
    }

    pub fn ledger(&self) -> &Arc<ShardLedger> {
        &self.ledger
    }

    pub async fn create(
        &self,
        referrer: Address,
        referee: Address,
        season_id: Uuid,
    ) -> Result<Referral, DbError> {
        let referral = Referral::create(referrer, referee, season_id)?;
        if self.db.get_season(season_id).await?.is_none() {
            return Err(ShardsError::NotFound(format!("season {season_id}")).into());
        }
        self.db.insert_referral(&referral).await?;
        tracing::info!(
            "Recorded referral of {:#x} by {:#x} in season {}",
            referee,
            referrer,
            season_id
        );
        Ok(referral)
    }

    pub async fn get(
        &self,
        referee: Address,
        season_id: Uuid,
    ) -> Result<Option<Referral>, DbError> {
        self.db.get_referral(referee, season_id).await
    }

    pub async fn list_by_referrer(
        &self,
        referrer: Address,
        season_id: Uuid,
    ) -> Result<Vec<Referral>, DbError> {
        self.db.list_referrals_by_referrer(referrer, season_id).await
    }

    /// Start the referee's crediting window at `at`.
    pub async fn activate(
        &self,
        referee: Address,
        season_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<Referral, DbError> {
        let current = self.get(referee, season_id).await?.ok_or_else(|| {
            ShardsError::NotFound(format!("referral of {referee:#x} in season {season_id}"))
        })?;
        let next = current.activate(at, &self.policy)?;
        if !self.db.activate_referral(&next).await? {
            let stored = self.get(referee, season_id).await?.unwrap_or(current);
            return Err(ShardsError::InvalidTransition {
                entity: "referral",
                from: stored.status.to_string(),
                action: "activate",
            }
            .into());
        }
        tracing::info!(
            "Activated referral of {:#x} until {:?}",
            referee,
            next.referee_multiplier_expires
        );
        Ok(next)
    }

    /// Pass the referrer's share of a referee delta through to its referral bucket.
    ///
    /// Returns `None` when nothing was credited: no referral, window closed, non-positive
    /// delta, zero share after flooring, or the credit was already applied.
    pub async fn credit_referee_activity(
        &self,
        claim_key: &str,
        referee: Address,
        season_id: Uuid,
        delta: Shards,
        at: DateTime<Utc>,
    ) -> Result<Option<ShardBalance>, DbError> {
        if delta <= 0 {
            return Ok(None);
        }
        let Some(referral) = self.get(referee, season_id).await? else {
            return Ok(None);
        };
        if !referral.window_open_at(at) {
            return Ok(None);
        }
        let credit = self.policy.referrer_credit(delta);
        if credit == 0 {
            return Ok(None);
        }

        let balance =
            self.ledger.credit_referral(&referral_claim_key(claim_key), &referral, credit).await?;
        if balance.is_some() {
            tracing::debug!(
                "Credited {} referral shards to {:#x} for {}",
                credit,
                referral.referrer_address,
                claim_key
            );
        }
        Ok(balance)
    }

    /// Award a contribution once per claim key, then credit the contributor's referrer.
    ///
    /// The referrer credit is attempted on redelivery too, under its own claim key.
    pub async fn credit_contribution(
        &self,
        claim_key: &str,
        wallet: Address,
        season_id: Uuid,
        category: Category,
        amount: Shards,
        at: DateTime<Utc>,
    ) -> Result<ContributionOutcome, DbError> {
        let balance = self.ledger.award(claim_key, wallet, season_id, category, amount).await?;
        let referrer_balance = match category {
            Category::Referral => None,
            _ => self.credit_referee_activity(claim_key, wallet, season_id, amount, at).await?,
        };
        Ok(ContributionOutcome { balance, referrer_balance })
    }
}
