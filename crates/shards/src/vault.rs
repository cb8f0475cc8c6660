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

//! Daily vault position snapshots and the lock multiplier.

use alloy_primitives::{Address, U256};
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{PriceQuote, Shards, ShardsError};

pub const MIN_LOCK_WEEKS: u32 = 4;
pub const MAX_LOCK_WEEKS: u32 = 48;

/// 1.0 at or below [MIN_LOCK_WEEKS], 2.0 at or above [MAX_LOCK_WEEKS], linear in between.
pub fn lock_multiplier(lock_weeks: u32) -> f64 {
    if lock_weeks <= MIN_LOCK_WEEKS {
        1.0
    } else if lock_weeks >= MAX_LOCK_WEEKS {
        2.0
    } else {
        1.0 + (lock_weeks - MIN_LOCK_WEEKS) as f64 / (MAX_LOCK_WEEKS - MIN_LOCK_WEEKS) as f64
    }
}

/// The UTC day a snapshot timestamp belongs to.
pub fn snapshot_day(at: DateTime<Utc>) -> NaiveDate {
    at.date_naive()
}

/// Raw snapshot data as read from chain plus the price it was valued at.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VaultSnapshot {
    pub wallet_address: Address,
    pub vault_address: Address,
    pub asset_symbol: String,
    pub chain: String,
    pub balance: U256,
    pub shares: U256,
    pub usd_value: f64,
    pub lock_weeks: u32,
    pub snapshot_at: DateTime<Utc>,
    pub block_number: u64,
    pub price: PriceQuote,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VaultPosition {
    pub id: Uuid,
    pub wallet_address: Address,
    pub vault_address: Address,
    pub asset_symbol: String,
    pub chain: String,
    pub balance: U256,
    pub shares: U256,
    pub usd_value: f64,
    pub lock_weeks: u32,
    pub snapshot_date: NaiveDate,
    pub block_number: u64,
    /// When the latest snapshot of the day was taken.
    pub observed_at: DateTime<Utc>,
    pub price_updated_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl VaultPosition {
    pub fn from_snapshot(snapshot: VaultSnapshot) -> Result<Self, ShardsError> {
        if !(MIN_LOCK_WEEKS..=MAX_LOCK_WEEKS).contains(&snapshot.lock_weeks) {
            return Err(ShardsError::InvalidInput(format!(
                "lock weeks {} outside [{MIN_LOCK_WEEKS}, {MAX_LOCK_WEEKS}]",
                snapshot.lock_weeks
            )));
        }
        if !snapshot.usd_value.is_finite() || snapshot.usd_value < 0.0 {
            return Err(ShardsError::InvalidInput(format!(
                "invalid usd value {}",
                snapshot.usd_value
            )));
        }

        Ok(Self {
            id: Uuid::new_v4(),
            wallet_address: snapshot.wallet_address,
            vault_address: snapshot.vault_address,
            asset_symbol: snapshot.asset_symbol.to_ascii_uppercase(),
            chain: snapshot.chain.to_ascii_lowercase(),
            balance: snapshot.balance,
            shares: snapshot.shares,
            usd_value: snapshot.usd_value,
            lock_weeks: snapshot.lock_weeks,
            snapshot_date: snapshot_day(snapshot.snapshot_at),
            block_number: snapshot.block_number,
            observed_at: snapshot.snapshot_at,
            price_updated_at: snapshot.price.updated_at,
            created_at: Utc::now(),
        })
    }

    pub fn has_balance(&self) -> bool {
        !self.balance.is_zero() && !self.shares.is_zero()
    }

    pub fn lock_multiplier(&self) -> f64 {
        lock_multiplier(self.lock_weeks)
    }

    /// `(usd / 1000) * rate * multiplier`.
    pub fn calculate_shards(&self, rate_per_thousand_usd: i64) -> f64 {
        (self.usd_value / 1000.0) * rate_per_thousand_usd as f64 * self.lock_multiplier()
    }

    /// [Self::calculate_shards] floored to whole shards for the ledger.
    pub fn shards_for_day(&self, rate_per_thousand_usd: i64) -> Shards {
        self.calculate_shards(rate_per_thousand_usd).floor() as Shards
    }

    pub fn snapshot_midnight(&self) -> DateTime<Utc> {
        self.snapshot_date.and_time(NaiveTime::MIN).and_utc()
    }

    /// Age of the price quote when the snapshot was taken.
    pub fn price_age_minutes(&self) -> i64 {
        (self.observed_at - self.price_updated_at).num_minutes()
    }
}
