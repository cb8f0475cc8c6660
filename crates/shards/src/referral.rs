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

//! Referrer/referee relationships and the referee's time-boxed multiplier window.

use std::{fmt, str::FromStr};

use alloy_primitives::Address;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{Constraint, Shards, ShardsError};

const BPS_DENOMINATOR: i64 = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReferralStatus {
    Pending,
    Active,
}

impl ReferralStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReferralStatus::Pending => "pending",
            ReferralStatus::Active => "active",
        }
    }
}

impl fmt::Display for ReferralStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReferralStatus {
    type Err = ShardsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ReferralStatus::Pending),
            "active" => Ok(ReferralStatus::Active),
            other => Err(ShardsError::InvalidInput(format!("unknown referral status: {other}"))),
        }
    }
}

/// How much of a referee's activity flows to its referrer, and for how long.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReferralPolicy {
    /// Share of each referee delta credited to the referrer, in basis points.
    pub referrer_share_bps: u32,
    pub window_days: u32,
}

impl Default for ReferralPolicy {
    fn default() -> Self {
        Self { referrer_share_bps: 1_000, window_days: 30 }
    }
}

impl ReferralPolicy {
    /// Floored share of a positive referee delta. Zero for corrections.
    pub fn referrer_credit(&self, referee_delta: Shards) -> Shards {
        if referee_delta <= 0 {
            return 0;
        }
        referee_delta * self.referrer_share_bps as i64 / BPS_DENOMINATOR
    }

    pub fn window(&self) -> Duration {
        Duration::days(self.window_days as i64)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Referral {
    pub id: Uuid,
    pub referrer_address: Address,
    pub referee_address: Address,
    pub season_id: Uuid,
    pub status: ReferralStatus,
    pub activation_date: Option<DateTime<Utc>>,
    pub referee_multiplier_expires: Option<DateTime<Utc>>,
    pub total_shards_earned: Shards,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Referral {
    /// Uniqueness on `(referee, season)` is checked by the store.
    pub fn create(
        referrer_address: Address,
        referee_address: Address,
        season_id: Uuid,
    ) -> Result<Self, ShardsError> {
        if referrer_address == referee_address {
            return Err(ShardsError::ConstraintViolation(Constraint::SelfReferral));
        }
        let now = Utc::now();
        Ok(Self {
            id: Uuid::new_v4(),
            referrer_address,
            referee_address,
            season_id,
            status: ReferralStatus::Pending,
            activation_date: None,
            referee_multiplier_expires: None,
            total_shards_earned: 0,
            created_at: now,
            updated_at: now,
        })
    }

    pub fn activate(
        &self,
        activated_at: DateTime<Utc>,
        policy: &ReferralPolicy,
    ) -> Result<Self, ShardsError> {
        if self.status != ReferralStatus::Pending {
            return Err(ShardsError::InvalidTransition {
                entity: "referral",
                from: self.status.to_string(),
                action: "activate",
            });
        }
        Ok(Self {
            status: ReferralStatus::Active,
            activation_date: Some(activated_at),
            referee_multiplier_expires: Some(activated_at + policy.window()),
            updated_at: Utc::now(),
            ..self.clone()
        })
    }

    pub fn window_open_at(&self, at: DateTime<Utc>) -> bool {
        match (self.status, self.activation_date, self.referee_multiplier_expires) {
            (ReferralStatus::Active, Some(start), Some(expires)) => start <= at && at < expires,
            _ => false,
        }
    }
}
