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

use std::collections::BTreeMap;

use chrono::{NaiveDate, TimeZone, Utc};
use shard_rewards::{Category, ShardsError};

use super::common;

fn date(d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 3, d).unwrap()
}

#[tokio::test]
async fn test_rows_record_daily_deltas() {
    let ctx = common::setup().await;
    let season = common::active_season(&ctx, common::CHAIN).await;
    let (ledger, recorder) = (&ctx.services.ledger, &ctx.services.history);
    let alice = common::wallet(1);

    ledger.add_shards(alice, season.id, Category::Staking, 100).await.unwrap();
    let first =
        recorder.record_day(alice, season.id, date(1), BTreeMap::new()).await.unwrap().unwrap();
    assert_eq!(first.earned.staking, 100);
    assert_eq!(first.daily_total, 100);

    // A correction shows up as a negative delta on the next day
    ledger.add_shards(alice, season.id, Category::Staking, -20).await.unwrap();
    ledger.add_shards(alice, season.id, Category::Social, 50).await.unwrap();
    let second =
        recorder.record_day(alice, season.id, date(2), BTreeMap::new()).await.unwrap().unwrap();
    assert_eq!(second.earned.staking, -20);
    assert_eq!(second.earned.social, 50);
    assert_eq!(second.daily_total, 30);

    // Existing rows are never overwritten
    ledger.add_shards(alice, season.id, Category::Developer, 999).await.unwrap();
    let repeated = recorder.record_day(alice, season.id, date(2), BTreeMap::new()).await.unwrap();
    assert!(repeated.is_none());

    let rows = recorder.history(alice, season.id, None, None).await.unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[1].daily_total, 30);
    assert_eq!(rows.iter().map(|r| r.daily_total).sum::<i64>(), 130);

    assert_eq!(recorder.velocity(alice, season.id, 2).await.unwrap(), 65.0);
    assert_eq!(recorder.velocity(alice, season.id, 1).await.unwrap(), 30.0);
    assert_eq!(recorder.velocity(alice, season.id, 30).await.unwrap(), 65.0);
    assert_eq!(recorder.velocity(common::wallet(2), season.id, 7).await.unwrap(), 0.0);

    let ranged = recorder.history(alice, season.id, Some(date(2)), None).await.unwrap();
    assert_eq!(ranged.len(), 1);
}

#[tokio::test]
async fn test_record_without_balance_is_not_found() {
    let ctx = common::setup().await;
    let season = common::active_season(&ctx, common::CHAIN).await;

    let err = ctx
        .services
        .history
        .record_day(common::wallet(7), season.id, date(1), BTreeMap::new())
        .await
        .unwrap_err();
    assert!(matches!(common::shards_error(&err), ShardsError::NotFound(_)));
}

#[tokio::test]
async fn test_season_day_includes_vault_breakdown() {
    let ctx = common::setup().await;
    let start = Utc.with_ymd_and_hms(2025, 3, 1, 0, 0, 0).unwrap();
    let season = common::active_season_starting(&ctx, common::CHAIN, start).await;
    let snapshot_at = Utc.with_ymd_and_hms(2025, 3, 14, 12, 0, 0).unwrap();
    let day = date(14);

    let (alice, bob) = (common::wallet(1), common::wallet(2));
    ctx.services
        .snapshotter
        .record(common::snapshot(alice, common::vault(1), 5_000.0, 4, snapshot_at, 0))
        .await
        .unwrap();
    ctx.services.ledger.add_shards(bob, season.id, Category::Social, 40).await.unwrap();
    ctx.services.snapshotter.award_day(&season, day).await.unwrap();

    let recorded = ctx.services.history.record_season_day(&season, day).await.unwrap();
    assert_eq!(recorded.recorded, 2);
    assert_eq!(recorded.already_recorded, 0);

    let rows = ctx.services.history.history(alice, season.id, None, None).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].earned.staking, 500);
    let entry = &rows[0].vault_breakdown[&format!("{:#x}", common::vault(1))];
    assert_eq!(entry.asset_symbol, "USDC");
    assert_eq!(entry.shards, 500);

    let bob_rows = ctx.services.history.history(bob, season.id, None, None).await.unwrap();
    assert!(bob_rows[0].vault_breakdown.is_empty());

    let again = ctx.services.history.record_season_day(&season, day).await.unwrap();
    assert_eq!(again.recorded, 0);
    assert_eq!(again.already_recorded, 2);
}

#[tokio::test]
async fn test_backfilling_an_earlier_day_is_rejected() {
    let ctx = common::setup().await;
    let season = common::active_season(&ctx, common::CHAIN).await;
    let (ledger, recorder) = (&ctx.services.ledger, &ctx.services.history);
    let alice = common::wallet(1);

    ledger.add_shards(alice, season.id, Category::Staking, 100).await.unwrap();
    recorder.record_day(alice, season.id, date(1), BTreeMap::new()).await.unwrap().unwrap();
    ledger.add_shards(alice, season.id, Category::Staking, 50).await.unwrap();
    let third =
        recorder.record_day(alice, season.id, date(3), BTreeMap::new()).await.unwrap().unwrap();
    assert_eq!(third.daily_total, 50);

    let err = recorder.record_day(alice, season.id, date(2), BTreeMap::new()).await.unwrap_err();
    assert!(matches!(common::shards_error(&err), ShardsError::InvalidInput(_)));

    // Recorded days before the latest one still read as already recorded
    let repeated = recorder.record_day(alice, season.id, date(1), BTreeMap::new()).await.unwrap();
    assert!(repeated.is_none());

    let rows = recorder.history(alice, season.id, None, None).await.unwrap();
    assert_eq!(rows.len(), 2);
    let balance = ledger.balance(alice, season.id).await.unwrap().unwrap();
    assert_eq!(rows.iter().map(|r| r.daily_total).sum::<i64>(), balance.total_shards);
    assert_eq!(balance.total_shards, 150);

    // A season-wide run over the gap skips the wallet instead of failing
    let day = recorder.record_season_day(&season, date(2)).await.unwrap();
    assert_eq!(day.recorded, 0);
    assert_eq!(day.out_of_order, 1);
    assert_eq!(recorder.history(alice, season.id, None, None).await.unwrap().len(), 2);
}
