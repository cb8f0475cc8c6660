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

//! Daily rollover: staking awards, history rows and season stats for a closed UTC day.

use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use shard_rewards::{Season, SeasonStatus};
use uuid::Uuid;

use crate::{
    db::{DbError, ShardsDbObj},
    history::{EarningHistoryRecorder, RecordedDay},
    seasons::SeasonStore,
    snapshot::{DayAward, VaultSnapshotter},
};

/// The most recent UTC day that has fully elapsed at `now`.
pub fn previous_day(now: DateTime<Utc>) -> NaiveDate {
    let today = now.date_naive();
    today.pred_opt().unwrap_or(today)
}

#[derive(Debug, Clone)]
pub struct RolloverReport {
    pub season_id: Uuid,
    pub date: NaiveDate,
    pub award: DayAward,
    pub history: RecordedDay,
    pub total_participants: u64,
    pub total_shards_issued: i64,
}

pub struct RolloverService {
    db: ShardsDbObj,
    seasons: SeasonStore,
    snapshotter: Arc<VaultSnapshotter>,
    recorder: Arc<EarningHistoryRecorder>,
}

impl RolloverService {
    pub fn new(
        db: ShardsDbObj,
        seasons: SeasonStore,
        snapshotter: Arc<VaultSnapshotter>,
        recorder: Arc<EarningHistoryRecorder>,
    ) -> Self {
        Self { db, seasons, snapshotter, recorder }
    }

    /// Roll over every day each active season has not completed yet, oldest first, through
    /// `until`. A season with no completed day starts from its start date.
    pub async fn catch_up(&self, until: NaiveDate) -> Result<Vec<RolloverReport>, DbError> {
        let mut reports = Vec::new();

        for season in self.seasons.list(None).await? {
            if season.status != SeasonStatus::Active {
                continue;
            }
            let mut next = match self.db.get_rollover_cursor(season.id).await? {
                Some(last) => last.succ_opt(),
                None => Some(season.start_date.date_naive()),
            };
            while let Some(date) = next.filter(|date| *date <= until) {
                if !season.covers_day(date) {
                    break;
                }
                reports.push(self.run_season(&season, date).await?);
                self.db.advance_rollover_cursor(season.id, date).await?;
                next = date.succ_opt();
            }
        }

        if reports.len() > 1 {
            tracing::info!("Caught up {} season day(s) through {}", reports.len(), until);
        }
        Ok(reports)
    }

    /// Roll `date` over for every active season. Safe to repeat for the same day.
    pub async fn run(&self, date: NaiveDate) -> Result<Vec<RolloverReport>, DbError> {
        let start_time = std::time::Instant::now();
        let mut reports = Vec::new();

        for season in self.seasons.list(None).await? {
            if season.status != SeasonStatus::Active {
                continue;
            }
            if !season.covers_day(date) {
                tracing::debug!("Season {} does not cover {}, skipping", season.id, date);
                continue;
            }
            reports.push(self.run_season(&season, date).await?);
        }

        tracing::info!(
            "Rollover for {} covered {} season(s) in {:?}",
            date,
            reports.len(),
            start_time.elapsed()
        );
        Ok(reports)
    }

    pub async fn run_season(
        &self,
        season: &Season,
        date: NaiveDate,
    ) -> Result<RolloverReport, DbError> {
        // Awards land before the history row so the day's delta includes them
        let award = self.snapshotter.award_day(season, date).await?;
        let history = self.recorder.record_season_day(season, date).await?;
        let refreshed = self.seasons.refresh_stats(season.id).await?;

        Ok(RolloverReport {
            season_id: season.id,
            date,
            award,
            history,
            total_participants: refreshed.total_participants,
            total_shards_issued: refreshed.total_shards_issued,
        })
    }
}
