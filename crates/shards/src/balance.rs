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

//! Per-wallet, per-season shard balance.

use alloy_primitives::Address;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{Category, Shards, ShardsError};

/// One amount per [Category].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryAmounts {
    pub staking: Shards,
    pub social: Shards,
    pub developer: Shards,
    pub referral: Shards,
}

impl CategoryAmounts {
    pub fn new(staking: Shards, social: Shards, developer: Shards, referral: Shards) -> Self {
        Self { staking, social, developer, referral }
    }

    /// A single-category amount, as submitted by one contribution event.
    pub fn single(category: Category, amount: Shards) -> Self {
        let mut amounts = Self::default();
        *amounts.get_mut(category) = amount;
        amounts
    }

    pub fn get(&self, category: Category) -> Shards {
        match category {
            Category::Staking => self.staking,
            Category::Social => self.social,
            Category::Developer => self.developer,
            Category::Referral => self.referral,
        }
    }

    pub fn get_mut(&mut self, category: Category) -> &mut Shards {
        match category {
            Category::Staking => &mut self.staking,
            Category::Social => &mut self.social,
            Category::Developer => &mut self.developer,
            Category::Referral => &mut self.referral,
        }
    }

    /// Sum of all four categories.
    pub fn total(&self) -> Result<Shards, ShardsError> {
        [self.social, self.developer, self.referral]
            .into_iter()
            .try_fold(self.staking, Shards::checked_add)
            .ok_or_else(|| overflow("total"))
    }

    pub fn checked_add(&self, rhs: &Self) -> Result<Self, ShardsError> {
        self.zip_with(rhs, Shards::checked_add)
    }

    pub fn checked_sub(&self, rhs: &Self) -> Result<Self, ShardsError> {
        self.zip_with(rhs, Shards::checked_sub)
    }

    fn zip_with(
        &self,
        rhs: &Self,
        op: fn(Shards, Shards) -> Option<Shards>,
    ) -> Result<Self, ShardsError> {
        let mut out = Self::default();
        for category in Category::ALL {
            *out.get_mut(category) = op(self.get(category), rhs.get(category))
                .ok_or_else(|| overflow(category.as_str()))?;
        }
        Ok(out)
    }
}

fn overflow(what: &str) -> ShardsError {
    ShardsError::InvalidInput(format!("{what} shards out of range"))
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShardBalance {
    pub id: Uuid,
    pub wallet_address: Address,
    pub season_id: Uuid,
    #[serde(flatten)]
    pub shards: CategoryAmounts,
    pub total_shards: Shards,
    pub last_calculated_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ShardBalance {
    pub fn create(
        wallet_address: Address,
        season_id: Uuid,
        shards: CategoryAmounts,
    ) -> Result<Self, ShardsError> {
        let now = Utc::now();
        Ok(Self {
            id: Uuid::new_v4(),
            wallet_address,
            season_id,
            total_shards: shards.total()?,
            shards,
            last_calculated_at: now,
            created_at: now,
            updated_at: now,
        })
    }

    /// An all-zero balance, as created on a wallet's first contribution.
    pub fn empty(wallet_address: Address, season_id: Uuid) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            wallet_address,
            season_id,
            shards: CategoryAmounts::default(),
            total_shards: 0,
            last_calculated_at: now,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn category(&self, category: Category) -> Shards {
        self.shards.get(category)
    }

    /// Apply a signed delta to one category and recompute the total.
    pub fn add_shards(&self, category: Category, amount: Shards) -> Result<Self, ShardsError> {
        let shards = self.shards.checked_add(&CategoryAmounts::single(category, amount))?;
        let now = Utc::now();
        Ok(Self {
            total_shards: shards.total()?,
            shards,
            last_calculated_at: now,
            updated_at: now,
            ..self.clone()
        })
    }

    /// Discard the stored total and rebuild it from the categories.
    pub fn recalculate_total(&self) -> Result<Self, ShardsError> {
        let now = Utc::now();
        Ok(Self {
            total_shards: self.shards.total()?,
            last_calculated_at: now,
            updated_at: now,
            ..self.clone()
        })
    }

    pub fn is_consistent(&self) -> bool {
        self.shards.total().is_ok_and(|total| total == self.total_shards)
    }
}
