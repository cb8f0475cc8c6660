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

pub mod db;
pub mod history;
pub mod jobs;
pub mod leaderboard;
pub mod ledger;
pub mod referrals;
pub mod rollover;
pub mod seasons;
pub mod snapshot;
pub mod verify;

use std::sync::Arc;

use shard_rewards::ReferralPolicy;

use crate::{
    db::{DbError, ShardsDb, ShardsDbObj},
    history::EarningHistoryRecorder,
    jobs::JobProcessor,
    leaderboard::LeaderboardService,
    ledger::ShardLedger,
    referrals::ReferralLedger,
    rollover::RolloverService,
    seasons::SeasonStore,
    snapshot::VaultSnapshotter,
    verify::VerifierObj,
};

#[derive(Debug, Clone)]
pub struct ShardsServiceConfig {
    pub max_price_age_minutes: i64,
    pub referral_policy: ReferralPolicy,
}

impl Default for ShardsServiceConfig {
    fn default() -> Self {
        Self {
            max_price_age_minutes: snapshot::DEFAULT_MAX_PRICE_AGE_MINUTES,
            referral_policy: ReferralPolicy::default(),
        }
    }
}

/// Every service wired over one store.
#[derive(Clone)]
pub struct ShardsServices {
    pub db: ShardsDbObj,
    pub seasons: SeasonStore,
    pub ledger: Arc<ShardLedger>,
    pub referrals: Arc<ReferralLedger>,
    pub snapshotter: Arc<VaultSnapshotter>,
    pub history: Arc<EarningHistoryRecorder>,
    pub leaderboard: LeaderboardService,
}

impl ShardsServices {
    pub async fn connect(database_url: &str, config: ShardsServiceConfig) -> Result<Self, DbError> {
        let db: ShardsDbObj = Arc::new(ShardsDb::new(database_url).await?);
        Ok(Self::new(db, config))
    }

    pub fn new(db: ShardsDbObj, config: ShardsServiceConfig) -> Self {
        let ledger = Arc::new(ShardLedger::new(db.clone()));
        let referrals =
            Arc::new(ReferralLedger::new(db.clone(), ledger.clone(), config.referral_policy));
        let snapshotter = Arc::new(VaultSnapshotter::new(
            db.clone(),
            referrals.clone(),
            config.max_price_age_minutes,
        ));
        Self {
            seasons: SeasonStore::new(db.clone()),
            history: Arc::new(EarningHistoryRecorder::new(db.clone())),
            leaderboard: LeaderboardService::new(db.clone()),
            ledger,
            referrals,
            snapshotter,
            db,
        }
    }

    pub fn job_processor(&self, verifier: VerifierObj) -> JobProcessor {
        JobProcessor::new(
            self.seasons.clone(),
            self.snapshotter.clone(),
            self.referrals.clone(),
            verifier,
        )
    }

    pub fn rollover(&self) -> RolloverService {
        RolloverService::new(
            self.db.clone(),
            self.seasons.clone(),
            self.snapshotter.clone(),
            self.history.clone(),
        )
    }
}
