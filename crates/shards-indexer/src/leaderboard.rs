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

use alloy::primitives::Address;
use serde::Serialize;
use shard_rewards::{Category, ShardBalance};
use uuid::Uuid;

use crate::db::{DbError, SeasonTotals, ShardsDbObj};

pub const MAX_PAGE_SIZE: u64 = 100;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaderboardEntry {
    /// 1-based position in the ordering the page was requested in
    pub rank: u64,
    #[serde(flatten)]
    pub balance: ShardBalance,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaderboardPage {
    pub entries: Vec<LeaderboardEntry>,
    pub total: u64,
    pub limit: u64,
    pub offset: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<Category>,
}

impl LeaderboardPage {
    pub fn has_more(&self) -> bool {
        self.offset + (self.entries.len() as u64) < self.total
    }
}

/// Read-only views over season balances. Not synchronized with ledger writes.
#[derive(Clone)]
pub struct LeaderboardService {
    db: ShardsDbObj,
}

impl LeaderboardService {
    pub fn new(db: ShardsDbObj) -> Self {
        Self { db }
    }

    pub async fn page(
        &self,
        season_id: Uuid,
        limit: u64,
        offset: u64,
        category: Option<Category>,
    ) -> Result<LeaderboardPage, DbError> {
        let limit = limit.min(MAX_PAGE_SIZE);
        let (balances, total) =
            self.db.find_top_by_season(season_id, limit, offset, category).await?;

        let entries = balances
            .into_iter()
            .enumerate()
            .map(|(idx, balance)| LeaderboardEntry { rank: offset + idx as u64 + 1, balance })
            .collect();

        Ok(LeaderboardPage { entries, total, limit, offset, category })
    }

    pub async fn rank(
        &self,
        wallet: Address,
        season_id: Uuid,
        category: Option<Category>,
    ) -> Result<Option<u64>, DbError> {
        self.db.get_wallet_rank(wallet, season_id, category).await
    }

    pub async fn balance(
        &self,
        wallet: Address,
        season_id: Uuid,
    ) -> Result<Option<ShardBalance>, DbError> {
        self.db.get_balance(wallet, season_id).await
    }

    pub async fn season_totals(&self, season_id: Uuid) -> Result<SeasonTotals, DbError> {
        self.db.get_season_totals(season_id).await
    }
}
