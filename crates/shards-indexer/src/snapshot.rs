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

//! Vault position snapshots and the daily staking award derived from them.

use std::sync::Arc;

use alloy::primitives::Address;
use chrono::NaiveDate;
use shard_rewards::{
    Category, Season, SeasonStatus, Shards, ShardsError, VaultPosition, VaultSnapshot,
};

use crate::{
    db::{DbError, ShardsDbObj},
    referrals::ReferralLedger,
};

pub const DEFAULT_MAX_PRICE_AGE_MINUTES: i64 = 60;

const PAGE_SIZE: u64 = 500;

/// Claim key of one position's staking award for one day.
pub fn staking_claim_key(wallet: Address, vault: Address, date: NaiveDate) -> String {
    format!("staking:{wallet:#x}:{vault:#x}:{date}")
}

/// Counters from one [VaultSnapshotter::award_day] run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DayAward {
    pub awarded: u64,
    pub shards_awarded: Shards,
    pub already_recorded: u64,
    pub skipped_stale: u64,
    pub skipped_empty: u64,
}

pub struct VaultSnapshotter {
    db: ShardsDbObj,
    referrals: Arc<ReferralLedger>,
    max_price_age_minutes: i64,
}

impl VaultSnapshotter {
    pub fn new(
        db: ShardsDbObj,
        referrals: Arc<ReferralLedger>,
        max_price_age_minutes: i64,
    ) -> Self {
        Self { db, referrals, max_price_age_minutes }
    }

    /// Normalize a snapshot to its UTC day and store it. A later snapshot on the same day
    /// replaces the earlier one.
    pub async fn record(&self, snapshot: VaultSnapshot) -> Result<VaultPosition, DbError> {
        let position = VaultPosition::from_snapshot(snapshot)?;
        if position.price_age_minutes() > self.max_price_age_minutes {
            tracing::warn!(
                "Snapshot of {:#x} in vault {:#x} uses a {} minute old {} price",
                position.wallet_address,
                position.vault_address,
                position.price_age_minutes(),
                position.asset_symbol
            );
        }
        let stored = self.db.upsert_vault_position(&position).await?;
        tracing::debug!(
            "Stored {} position of {:#x} for {} (${:.2}, {} weeks)",
            stored.asset_symbol,
            stored.wallet_address,
            stored.snapshot_date,
            stored.usd_value,
            stored.lock_weeks
        );
        Ok(stored)
    }

    pub async fn history(
        &self,
        wallet: Address,
        vault: Option<Address>,
        from: Option<NaiveDate>,
        to: Option<NaiveDate>,
    ) -> Result<Vec<VaultPosition>, DbError> {
        self.db.get_vault_position_history(wallet, vault, from, to).await
    }

    /// Credit staking shards for every position on `season`'s chain snapshotted on `date`,
    /// which must fall inside the season.
    pub async fn award_day(&self, season: &Season, date: NaiveDate) -> Result<DayAward, DbError> {
        if season.status != SeasonStatus::Active {
            return Err(ShardsError::InvalidTransition {
                entity: "season",
                from: season.status.to_string(),
                action: "award",
            }
            .into());
        }
        if !season.covers_day(date) {
            return Err(ShardsError::InvalidInput(format!(
                "season {} does not cover {date}",
                season.id
            ))
            .into());
        }

        let mut award = DayAward::default();
        let mut offset = 0;
        loop {
            let page = self.db.get_vault_positions_by_date(date, offset, PAGE_SIZE).await?;
            let fetched = page.len() as u64;

            for position in page.iter().filter(|p| p.chain == season.chain) {
                self.award_position(season, date, position, &mut award).await?;
            }

            if fetched < PAGE_SIZE {
                break;
            }
            offset += fetched;
        }

        tracing::info!(
            "Staking award for {} in season {}: {} awarded ({} shards), {} already recorded, {} stale, {} empty",
            date,
            season.id,
            award.awarded,
            award.shards_awarded,
            award.already_recorded,
            award.skipped_stale,
            award.skipped_empty
        );
        Ok(award)
    }

    async fn award_position(
        &self,
        season: &Season,
        date: NaiveDate,
        position: &VaultPosition,
        award: &mut DayAward,
    ) -> Result<(), DbError> {
        if !position.has_balance() {
            award.skipped_empty += 1;
            return Ok(());
        }
        if position.price_age_minutes() > self.max_price_age_minutes {
            tracing::warn!(
                "Skipping staking award for {:#x} in vault {:#x} on {}: price is {} minutes old",
                position.wallet_address,
                position.vault_address,
                date,
                position.price_age_minutes()
            );
            award.skipped_stale += 1;
            return Ok(());
        }

        let shards = position.shards_for_day(season.vault_rate(&position.asset_symbol));
        if shards <= 0 {
            award.skipped_empty += 1;
            return Ok(());
        }

        let claim_key = staking_claim_key(position.wallet_address, position.vault_address, date);
        let outcome = self
            .referrals
            .credit_contribution(
                &claim_key,
                position.wallet_address,
                season.id,
                Category::Staking,
                shards,
                position.observed_at,
            )
            .await?;
        if outcome.is_new() {
            award.awarded += 1;
            award.shards_awarded += shards;
        } else {
            award.already_recorded += 1;
        }
        Ok(())
    }
}
