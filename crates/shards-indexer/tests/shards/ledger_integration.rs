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

use std::sync::Arc;

use shard_rewards::{Category, CategoryAmounts, ShardsError};

use super::common;

#[tokio::test]
async fn test_category_deltas_keep_total_in_sync() {
    let ctx = common::setup().await;
    let season = common::active_season(&ctx, common::CHAIN).await;
    let ledger = &ctx.services.ledger;
    let alice = common::wallet(1);

    ledger.add_shards(alice, season.id, Category::Staking, 100).await.unwrap();
    ledger.add_shards(alice, season.id, Category::Social, 50).await.unwrap();
    ledger.add_shards(alice, season.id, Category::Developer, 75).await.unwrap();
    let balance = ledger.add_shards(alice, season.id, Category::Referral, 25).await.unwrap();
    assert_eq!(balance.total_shards, 250);
    assert_eq!(balance.shards, CategoryAmounts::new(100, 50, 75, 25));

    let balance = ledger.add_shards(alice, season.id, Category::Staking, -50).await.unwrap();
    assert_eq!(balance.shards.staking, 50);
    assert_eq!(balance.total_shards, 200);
    assert!(balance.is_consistent());

    let stored = ledger.balance(alice, season.id).await.unwrap().unwrap();
    assert_eq!(stored.total_shards, 200);
}

#[tokio::test]
async fn test_concurrent_adds_lose_no_update() {
    let ctx = common::setup().await;
    let season = common::active_season(&ctx, common::CHAIN).await;
    let ledger = ctx.services.ledger.clone();
    let alice = common::wallet(1);

    let mut handles = Vec::new();
    for i in 0..40 {
        let ledger = Arc::clone(&ledger);
        let category = if i % 2 == 0 { Category::Staking } else { Category::Social };
        handles.push(tokio::spawn(async move {
            ledger.add_shards(alice, season.id, category, 10).await.unwrap();
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    let balance = ledger.balance(alice, season.id).await.unwrap().unwrap();
    assert_eq!(balance.shards.staking, 200);
    assert_eq!(balance.shards.social, 200);
    assert_eq!(balance.total_shards, 400);
}

#[tokio::test]
async fn test_concurrent_wallets_do_not_interfere() {
    let ctx = common::setup().await;
    let season = common::active_season(&ctx, common::CHAIN).await;
    let ledger = ctx.services.ledger.clone();

    let mut handles = Vec::new();
    for n in 1..=5u8 {
        for _ in 0..5 {
            let ledger = Arc::clone(&ledger);
            handles.push(tokio::spawn(async move {
                ledger
                    .add_shards(common::wallet(n), season.id, Category::Developer, n as i64)
                    .await
                    .unwrap();
            }));
        }
    }
    for handle in handles {
        handle.await.unwrap();
    }

    for n in 1..=5u8 {
        let balance = ledger.balance(common::wallet(n), season.id).await.unwrap().unwrap();
        assert_eq!(balance.total_shards, 5 * n as i64);
    }
}

#[tokio::test]
async fn test_award_is_idempotent_per_claim_key() {
    let ctx = common::setup().await;
    let season = common::active_season(&ctx, common::CHAIN).await;
    let ledger = &ctx.services.ledger;
    let alice = common::wallet(1);

    let first =
        ledger.award("social:tweet-1", alice, season.id, Category::Social, 120).await.unwrap();
    assert_eq!(first.unwrap().total_shards, 120);

    let second =
        ledger.award("social:tweet-1", alice, season.id, Category::Social, 120).await.unwrap();
    assert!(second.is_none());
    assert!(ledger.is_rewarded("social:tweet-1").await.unwrap());

    let balance = ledger.balance(alice, season.id).await.unwrap().unwrap();
    assert_eq!(balance.shards.social, 120);
}

#[tokio::test]
async fn test_concurrent_duplicate_awards_credit_once() {
    let ctx = common::setup().await;
    let season = common::active_season(&ctx, common::CHAIN).await;
    let ledger = ctx.services.ledger.clone();
    let alice = common::wallet(1);

    let mut handles = Vec::new();
    for _ in 0..10 {
        let ledger = Arc::clone(&ledger);
        handles.push(tokio::spawn(async move {
            ledger.award("pr:acme/vaults#1", alice, season.id, Category::Developer, 500).await
        }));
    }
    let mut applied = 0;
    for handle in handles {
        if handle.await.unwrap().unwrap().is_some() {
            applied += 1;
        }
    }

    assert_eq!(applied, 1);
    let balance = ledger.balance(alice, season.id).await.unwrap().unwrap();
    assert_eq!(balance.shards.developer, 500);
}

#[tokio::test]
async fn test_recalculate_missing_balance_is_not_found() {
    let ctx = common::setup().await;
    let season = common::active_season(&ctx, common::CHAIN).await;

    let ledger = &ctx.services.ledger;
    let err = ledger.recalculate_total(common::wallet(9), season.id).await.unwrap_err();
    assert!(matches!(common::shards_error(&err), ShardsError::NotFound(_)));

    ledger.add_shards(common::wallet(9), season.id, Category::Staking, 5).await.unwrap();
    let balance = ledger.recalculate_total(common::wallet(9), season.id).await.unwrap();
    assert_eq!(balance.total_shards, 5);
    assert_eq!(ctx.services.db.recalculate_season_totals(season.id).await.unwrap(), 0);
}
