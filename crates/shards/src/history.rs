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

//! Append-only daily earning rows.

use std::collections::BTreeMap;

use alloy_primitives::Address;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{CategoryAmounts, ShardBalance, Shards, ShardsError, VaultPosition};

/// Per-vault detail kept alongside a day's staking amount.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VaultBreakdownEntry {
    pub asset_symbol: String,
    pub usd_value: f64,
    pub lock_weeks: u32,
    pub shards: Shards,
}

impl VaultBreakdownEntry {
    pub fn from_position(position: &VaultPosition, rate_per_thousand_usd: i64) -> Self {
        Self {
            asset_symbol: position.asset_symbol.clone(),
            usd_value: position.usd_value,
            lock_weeks: position.lock_weeks,
            shards: position.shards_for_day(rate_per_thousand_usd),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShardEarningHistory {
    pub id: Uuid,
    pub wallet_address: Address,
    pub season_id: Uuid,
    pub date: NaiveDate,
    /// The day's deltas, not cumulative values.
    #[serde(flatten)]
    pub earned: CategoryAmounts,
    pub daily_total: Shards,
    /// Keyed by lowercase vault address.
    pub vault_breakdown: BTreeMap<String, VaultBreakdownEntry>,
    pub created_at: DateTime<Utc>,
}

/// Inputs for one day's row, before an id is assigned.
#[derive(Debug, Clone)]
pub struct DailyEarning {
    pub wallet_address: Address,
    pub season_id: Uuid,
    pub date: NaiveDate,
    /// Categories of the live balance at the time of recording.
    pub current: CategoryAmounts,
    /// Sum of every earlier row for this wallet and season.
    pub previously_recorded: CategoryAmounts,
    pub vault_breakdown: BTreeMap<String, VaultBreakdownEntry>,
}

impl DailyEarning {
    /// On the first day `previously_recorded` is zero, so the row carries the full balance.
    pub fn into_row(self) -> Result<ShardEarningHistory, ShardsError> {
        let earned = self.current.checked_sub(&self.previously_recorded)?;
        Ok(ShardEarningHistory {
            id: Uuid::new_v4(),
            wallet_address: self.wallet_address,
            season_id: self.season_id,
            date: self.date,
            earned,
            daily_total: earned.total()?,
            vault_breakdown: self.vault_breakdown,
            created_at: Utc::now(),
        })
    }

    pub fn from_balance(
        balance: &ShardBalance,
        date: NaiveDate,
        previously_recorded: CategoryAmounts,
    ) -> Self {
        Self {
            wallet_address: balance.wallet_address,
            season_id: balance.season_id,
            date,
            current: balance.shards,
            previously_recorded,
            vault_breakdown: BTreeMap::new(),
        }
    }
}

/// Average daily total across `rows`.
pub fn velocity(rows: &[ShardEarningHistory]) -> f64 {
    if rows.is_empty() {
        return 0.0;
    }
    rows.iter().map(|row| row.daily_total as f64).sum::<f64>() / rows.len() as f64
}
