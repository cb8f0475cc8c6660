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

use chrono::{Duration, Utc};
use shard_rewards::{Category, Constraint, SeasonStatus, ShardsError};

use super::common;

#[tokio::test]
async fn test_season_lifecycle() {
    let ctx = common::setup().await;
    let seasons = &ctx.services.seasons;

    let season = seasons.create(common::season_params("Genesis", "Base")).await.unwrap();
    assert_eq!(season.status, SeasonStatus::Upcoming);
    assert_eq!(season.chain, "base");
    assert_eq!(season.total_participants, 0);

    let stored = seasons.get(season.id).await.unwrap();
    assert_eq!(stored.config.vault_rate("usdc"), 100);
    assert_eq!(stored.config.vault_rate("DAI"), shard_rewards::DEFAULT_VAULT_RATE);

    let active = seasons.activate(season.id).await.unwrap();
    assert_eq!(active.status, SeasonStatus::Active);
    assert_eq!(seasons.active_for_chain("BASE").await.unwrap().map(|s| s.id), Some(season.id));

    let end = Utc::now();
    let completed = seasons.complete(season.id, end).await.unwrap();
    assert_eq!(completed.status, SeasonStatus::Completed);
    assert!(completed.end_date.is_some());
    assert!(seasons.active_for_chain("base").await.unwrap().is_none());

    let err = seasons.activate(season.id).await.unwrap_err();
    assert!(matches!(common::shards_error(&err), ShardsError::InvalidTransition { .. }));
}

#[tokio::test]
async fn test_invalid_transitions_are_rejected() {
    let ctx = common::setup().await;
    let seasons = &ctx.services.seasons;

    let season = seasons.create(common::season_params("Early", common::CHAIN)).await.unwrap();
    let err = seasons.complete(season.id, Utc::now()).await.unwrap_err();
    assert!(matches!(
        common::shards_error(&err),
        ShardsError::InvalidTransition { entity: "season", action: "complete", .. }
    ));

    seasons.activate(season.id).await.unwrap();
    let err = seasons.activate(season.id).await.unwrap_err();
    assert!(matches!(common::shards_error(&err), ShardsError::InvalidTransition { .. }));
    assert_eq!(seasons.get(season.id).await.unwrap().status, SeasonStatus::Active);
}

#[tokio::test]
async fn test_one_active_season_per_chain() {
    let ctx = common::setup().await;
    let seasons = &ctx.services.seasons;

    let first = seasons.create(common::season_params("One", common::CHAIN)).await.unwrap();
    let second = seasons.create(common::season_params("Two", common::CHAIN)).await.unwrap();
    let other_chain = seasons.create(common::season_params("Other", "arbitrum")).await.unwrap();

    seasons.activate(first.id).await.unwrap();
    let err = seasons.activate(second.id).await.unwrap_err();
    assert_eq!(
        common::shards_error(&err),
        ShardsError::ConstraintViolation(Constraint::ActiveSeasonExists)
    );
    assert_eq!(seasons.get(second.id).await.unwrap().status, SeasonStatus::Upcoming);

    // Other chains are independent
    seasons.activate(other_chain.id).await.unwrap();

    seasons.complete(first.id, Utc::now()).await.unwrap();
    seasons.activate(second.id).await.unwrap();
    assert_eq!(
        seasons.active_for_chain(common::CHAIN).await.unwrap().map(|s| s.id),
        Some(second.id)
    );

    assert_eq!(seasons.list(Some(common::CHAIN)).await.unwrap().len(), 2);
    assert_eq!(seasons.list(None).await.unwrap().len(), 3);
}

#[tokio::test]
async fn test_missing_season_and_bad_dates() {
    let ctx = common::setup().await;
    let seasons = &ctx.services.seasons;

    let err = seasons.get(uuid::Uuid::new_v4()).await.unwrap_err();
    assert!(matches!(common::shards_error(&err), ShardsError::NotFound(_)));

    let mut params = common::season_params("Backwards", common::CHAIN);
    params.end_date = Some(params.start_date - Duration::days(1));
    let err = seasons.create(params).await.unwrap_err();
    assert!(matches!(common::shards_error(&err), ShardsError::InvalidInput(_)));
}

#[tokio::test]
async fn test_refresh_stats_counts_balances() {
    let ctx = common::setup().await;
    let season = common::active_season(&ctx, common::CHAIN).await;
    let ledger = &ctx.services.ledger;

    ledger.add_shards(common::wallet(1), season.id, Category::Staking, 300).await.unwrap();
    ledger.add_shards(common::wallet(2), season.id, Category::Social, 200).await.unwrap();

    let refreshed = ctx.services.seasons.refresh_stats(season.id).await.unwrap();
    assert_eq!(refreshed.total_participants, 2);
    assert_eq!(refreshed.total_shards_issued, 500);
    assert_eq!(refreshed.status, SeasonStatus::Active);

    // Completed seasons still accept stat refreshes
    ctx.services.seasons.complete(season.id, Utc::now()).await.unwrap();
    ledger.add_shards(common::wallet(3), season.id, Category::Developer, 50).await.unwrap();
    let refreshed = ctx.services.seasons.refresh_stats(season.id).await.unwrap();
    assert_eq!(refreshed.total_participants, 3);
    assert_eq!(refreshed.status, SeasonStatus::Completed);
}
