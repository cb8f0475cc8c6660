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

use chrono::{DateTime, Utc};
use shard_rewards::{Season, SeasonParams, SeasonStatus, ShardsError};
use uuid::Uuid;

use crate::db::{DbError, ShardsDbObj};

/// Stat refreshes race only with transitions, so a couple of reloads is enough.
const REFRESH_ATTEMPTS: usize = 3;

/// Persists season lifecycle transitions.
///
/// Transitions are computed by [Season] and written with a status-guarded update, so two
/// racing transitions cannot both succeed.
#[derive(Clone)]
pub struct SeasonStore {
    db: ShardsDbObj,
}

impl SeasonStore {
    pub fn new(db: ShardsDbObj) -> Self {
        Self { db }
    }

    pub async fn create(&self, params: SeasonParams) -> Result<Season, DbError> {
        if let Some(end) = params.end_date {
            if end <= params.start_date {
                return Err(ShardsError::InvalidInput(format!(
                    "season {} ends before it starts",
                    params.name
                ))
                .into());
            }
        }
        let season = Season::create(params);
        self.db.insert_season(&season).await?;
        tracing::info!("Created season {} ({}) on {}", season.name, season.id, season.chain);
        Ok(season)
    }

    pub async fn get(&self, id: Uuid) -> Result<Season, DbError> {
        self.db
            .get_season(id)
            .await?
            .ok_or_else(|| ShardsError::NotFound(format!("season {id}")).into())
    }

    pub async fn list(&self, chain: Option<&str>) -> Result<Vec<Season>, DbError> {
        let chain = chain.map(str::to_ascii_lowercase);
        self.db.list_seasons(chain.as_deref()).await
    }

    pub async fn active_for_chain(&self, chain: &str) -> Result<Option<Season>, DbError> {
        self.db.get_active_season(&chain.to_ascii_lowercase()).await
    }

    pub async fn activate(&self, id: Uuid) -> Result<Season, DbError> {
        let current = self.get(id).await?;
        let next = current.activate()?;
        self.persist(current, next).await
    }

    pub async fn complete(&self, id: Uuid, end_date: DateTime<Utc>) -> Result<Season, DbError> {
        let current = self.get(id).await?;
        if end_date < current.start_date {
            return Err(ShardsError::InvalidInput(format!(
                "season {id} cannot end before its start date"
            ))
            .into());
        }
        let next = current.complete(end_date)?;
        self.persist(current, next).await
    }

    /// Recompute participant and issued-shard totals from the season's balances.
    pub async fn refresh_stats(&self, id: Uuid) -> Result<Season, DbError> {
        for _ in 0..REFRESH_ATTEMPTS {
            let current = self.get(id).await?;
            let totals = self.db.get_season_totals(id).await?;
            let next = current.update_stats(totals.participants, totals.total_shards);
            if self.db.update_season(&next, current.status).await? {
                tracing::debug!(
                    "Season {} stats: {} participants, {} shards issued",
                    id,
                    next.total_participants,
                    next.total_shards_issued
                );
                return Ok(next);
            }
            tracing::debug!("Season {} changed status during stats refresh, reloading", id);
        }
        Err(ShardsError::InvalidInput(format!("season {id} kept changing during stats refresh"))
            .into())
    }

    async fn persist(&self, current: Season, next: Season) -> Result<Season, DbError> {
        if self.db.update_season(&next, current.status).await? {
            tracing::info!(
                "Season {} ({}) moved from {} to {}",
                next.name,
                next.id,
                current.status,
                next.status
            );
            return Ok(next);
        }

        // Lost a race with another transition: report against the stored status
        let stored = self.get(current.id).await?;
        Err(ShardsError::InvalidTransition {
            entity: "season",
            from: stored.status.to_string(),
            action: if next.status == SeasonStatus::Active {
                "activate"
            } else {
                "complete"
            },
        }
        .into())
    }
}
