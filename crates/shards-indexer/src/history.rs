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

use std::collections::{BTreeMap, HashMap};

use alloy::primitives::Address;
use chrono::NaiveDate;
use shard_rewards::{
    history, DailyEarning, Season, ShardEarningHistory, ShardsError, VaultBreakdownEntry,
};
use uuid::Uuid;

use crate::db::{DbError, ShardsDbObj};

const PAGE_SIZE: u64 = 500;

/// Counters from one [EarningHistoryRecorder::record_season_day] run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordedDay {
    pub recorded: u64,
    pub already_recorded: u64,
    /// Wallets whose history already runs past the requested day.
    pub out_of_order: u64,
}

enum DayOutcome {
    Recorded(ShardEarningHistory),
    AlreadyRecorded,
    OutOfOrder { latest: NaiveDate },
}

pub struct EarningHistoryRecorder {
    db: ShardsDbObj,
}

impl EarningHistoryRecorder {
    pub fn new(db: ShardsDbObj) -> Self {
        Self { db }
    }

    /// Record one wallet's earnings for `date` as the difference between its live balance and
    /// every earlier row. Returns `None` if the day was already recorded.
    ///
    /// Days are recorded in order: a missing day before the latest recorded one fails with
    /// [ShardsError::InvalidInput].
    pub async fn record_day(
        &self,
        wallet: Address,
        season_id: Uuid,
        date: NaiveDate,
        vault_breakdown: BTreeMap<String, VaultBreakdownEntry>,
    ) -> Result<Option<ShardEarningHistory>, DbError> {
        match self.try_record_day(wallet, season_id, date, vault_breakdown).await? {
            DayOutcome::Recorded(row) => Ok(Some(row)),
            DayOutcome::AlreadyRecorded => Ok(None),
            DayOutcome::OutOfOrder { latest } => Err(ShardsError::InvalidInput(format!(
                "history of {wallet:#x} in season {season_id} runs to {latest}, \
                 cannot backfill {date}"
            ))
            .into()),
        }
    }

    async fn try_record_day(
        &self,
        wallet: Address,
        season_id: Uuid,
        date: NaiveDate,
        vault_breakdown: BTreeMap<String, VaultBreakdownEntry>,
    ) -> Result<DayOutcome, DbError> {
        let balance = self.db.get_balance(wallet, season_id).await?.ok_or_else(|| {
            ShardsError::NotFound(format!("balance of {wallet:#x} in season {season_id}"))
        })?;

        if let Some(latest) = self.db.get_latest_history_date(wallet, season_id).await? {
            if latest > date {
                let existing =
                    self.db.get_earning_history(wallet, season_id, Some(date), Some(date)).await?;
                if existing.is_empty() {
                    return Ok(DayOutcome::OutOfOrder { latest });
                }
                return Ok(DayOutcome::AlreadyRecorded);
            }
        }
        let previously_recorded = self.db.get_recorded_totals(wallet, season_id, date).await?;

        let mut earning = DailyEarning::from_balance(&balance, date, previously_recorded);
        earning.vault_breakdown = vault_breakdown;
        let row = earning.into_row()?;

        if !self.db.insert_earning_history(&row).await? {
            tracing::debug!("History for {:#x} on {} already recorded", wallet, date);
            return Ok(DayOutcome::AlreadyRecorded);
        }
        Ok(DayOutcome::Recorded(row))
    }

    /// Record `date` for every balance in the season.
    pub async fn record_season_day(
        &self,
        season: &Season,
        date: NaiveDate,
    ) -> Result<RecordedDay, DbError> {
        let mut breakdowns = self.breakdowns(season, date).await?;

        // Collect wallets first, leaderboard order shifts as balances change
        let mut wallets = Vec::new();
        let mut offset = 0;
        loop {
            let (page, _) = self.db.find_top_by_season(season.id, PAGE_SIZE, offset, None).await?;
            let fetched = page.len() as u64;
            wallets.extend(page.into_iter().map(|balance| balance.wallet_address));
            if fetched < PAGE_SIZE {
                break;
            }
            offset += fetched;
        }

        let mut result = RecordedDay::default();
        for wallet in wallets {
            let breakdown = breakdowns.remove(&wallet).unwrap_or_default();
            match self.try_record_day(wallet, season.id, date, breakdown).await? {
                DayOutcome::Recorded(_) => result.recorded += 1,
                DayOutcome::AlreadyRecorded => result.already_recorded += 1,
                DayOutcome::OutOfOrder { latest } => {
                    tracing::warn!(
                        "Not backfilling {} for {:#x}: history already runs to {}",
                        date,
                        wallet,
                        latest
                    );
                    result.out_of_order += 1;
                }
            }
        }

        tracing::info!(
            "Recorded history for {} in season {}: {} new, {} already recorded, {} out of order",
            date,
            season.id,
            result.recorded,
            result.already_recorded,
            result.out_of_order
        );
        Ok(result)
    }

    pub async fn history(
        &self,
        wallet: Address,
        season_id: Uuid,
        from: Option<NaiveDate>,
        to: Option<NaiveDate>,
    ) -> Result<Vec<ShardEarningHistory>, DbError> {
        self.db.get_earning_history(wallet, season_id, from, to).await
    }

    /// Average daily total over the last `days` recorded rows.
    pub async fn velocity(
        &self,
        wallet: Address,
        season_id: Uuid,
        days: usize,
    ) -> Result<f64, DbError> {
        let rows = self.db.get_earning_history(wallet, season_id, None, None).await?;
        let start = rows.len().saturating_sub(days);
        Ok(history::velocity(&rows[start..]))
    }

    /// Per-wallet staking breakdown for the day, keyed by vault address.
    async fn breakdowns(
        &self,
        season: &Season,
        date: NaiveDate,
    ) -> Result<HashMap<Address, BTreeMap<String, VaultBreakdownEntry>>, DbError> {
        let mut breakdowns: HashMap<Address, BTreeMap<String, VaultBreakdownEntry>> =
            HashMap::new();
        let mut offset = 0;
        loop {
            let page = self.db.get_vault_positions_by_date(date, offset, PAGE_SIZE).await?;
            let fetched = page.len() as u64;
            for position in page.iter().filter(|p| p.chain == season.chain && p.has_balance()) {
                let entry = VaultBreakdownEntry::from_position(
                    position,
                    season.vault_rate(&position.asset_symbol),
                );
                breakdowns
                    .entry(position.wallet_address)
                    .or_default()
                    .insert(format!("{:#x}", position.vault_address), entry);
            }
            if fetched < PAGE_SIZE {
                break;
            }
            offset += fetched;
        }
        Ok(breakdowns)
    }
}
