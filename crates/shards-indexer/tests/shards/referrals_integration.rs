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
use shard_rewards::{Category, Constraint, ReferralPolicy, ReferralStatus, ShardsError};

use super::common;

#[tokio::test]
async fn test_self_and_duplicate_referrals_are_rejected() {
    let ctx = common::setup().await;
    let season = common::active_season(&ctx, common::CHAIN).await;
    let referrals = &ctx.services.referrals;
    let (alice, bob, carol) = (common::wallet(1), common::wallet(2), common::wallet(3));

    let err = referrals.create(alice, alice, season.id).await.unwrap_err();
    assert_eq!(
        common::shards_error(&err),
        ShardsError::ConstraintViolation(Constraint::SelfReferral)
    );

    let referral = referrals.create(alice, bob, season.id).await.unwrap();
    assert_eq!(referral.status, ReferralStatus::Pending);

    // A referee has at most one referrer per season
    let err = referrals.create(carol, bob, season.id).await.unwrap_err();
    assert_eq!(
        common::shards_error(&err),
        ShardsError::ConstraintViolation(Constraint::AlreadyReferred)
    );

    let err = referrals.create(alice, carol, uuid::Uuid::new_v4()).await.unwrap_err();
    assert!(matches!(common::shards_error(&err), ShardsError::NotFound(_)));

    // The same referee may be referred again in another season
    let next = ctx
        .services
        .seasons
        .create(common::season_params("Season 2", common::CHAIN))
        .await
        .unwrap();
    referrals.create(carol, bob, next.id).await.unwrap();
}

#[tokio::test]
async fn test_activation_sets_window_once() {
    let ctx = common::setup().await;
    let season = common::active_season(&ctx, common::CHAIN).await;
    let referrals = &ctx.services.referrals;
    let (alice, bob) = (common::wallet(1), common::wallet(2));

    referrals.create(alice, bob, season.id).await.unwrap();
    let activated_at = Utc::now();
    let active = referrals.activate(bob, season.id, activated_at).await.unwrap();
    assert_eq!(active.status, ReferralStatus::Active);
    assert_eq!(active.referee_multiplier_expires, Some(activated_at + Duration::days(30)));

    let stored = referrals.get(bob, season.id).await.unwrap().unwrap();
    assert_eq!(stored.status, ReferralStatus::Active);

    let err = referrals.activate(bob, season.id, Utc::now()).await.unwrap_err();
    assert!(matches!(
        common::shards_error(&err),
        ShardsError::InvalidTransition { entity: "referral", .. }
    ));

    let err = referrals.activate(common::wallet(9), season.id, Utc::now()).await.unwrap_err();
    assert!(matches!(common::shards_error(&err), ShardsError::NotFound(_)));
}

#[tokio::test]
async fn test_referee_earnings_credit_referrer_within_window() {
    let ctx = common::setup().await;
    let season = common::active_season(&ctx, common::CHAIN).await;
    let referrals = &ctx.services.referrals;
    let (alice, bob) = (common::wallet(1), common::wallet(2));
    let activated_at = Utc::now() - Duration::days(1);

    referrals.create(alice, bob, season.id).await.unwrap();

    // Pending referrals earn nothing
    let outcome = referrals
        .credit_contribution("social:a", bob, season.id, Category::Social, 1_000, Utc::now())
        .await
        .unwrap();
    assert!(outcome.is_new());
    assert!(outcome.referrer_balance.is_none());

    referrals.activate(bob, season.id, activated_at).await.unwrap();
    let outcome = referrals
        .credit_contribution("social:b", bob, season.id, Category::Social, 1_005, Utc::now())
        .await
        .unwrap();
    let referrer = outcome.referrer_balance.unwrap();
    assert_eq!(referrer.shards.referral, 100);
    assert_eq!(referrer.total_shards, 100);

    // Redelivery credits neither side again
    let outcome = referrals
        .credit_contribution("social:b", bob, season.id, Category::Social, 1_005, Utc::now())
        .await
        .unwrap();
    assert!(!outcome.is_new());
    assert!(outcome.referrer_balance.is_none());

    // Closed window
    let late = activated_at + Duration::days(30);
    let outcome = referrals
        .credit_contribution("social:c", bob, season.id, Category::Social, 1_000, late)
        .await
        .unwrap();
    assert!(outcome.referrer_balance.is_none());

    // Corrections are not propagated
    let credited = referrals
        .credit_referee_activity("fix:1", bob, season.id, -500, Utc::now())
        .await
        .unwrap();
    assert!(credited.is_none());

    let stored = referrals.get(bob, season.id).await.unwrap().unwrap();
    assert_eq!(stored.total_shards_earned, 100);
    let by_referrer = referrals.list_by_referrer(alice, season.id).await.unwrap();
    assert_eq!(by_referrer.len(), 1);
    assert_eq!(by_referrer[0].referee_address, bob);

    let bob_balance = ctx.services.ledger.balance(bob, season.id).await.unwrap().unwrap();
    assert_eq!(bob_balance.shards.social, 3_005);
    let alice_balance = ctx.services.ledger.balance(alice, season.id).await.unwrap().unwrap();
    assert_eq!(alice_balance.total_shards, 100);
}

#[tokio::test]
async fn test_referral_credits_do_not_cascade() {
    let ctx = common::setup().await;
    let season = common::active_season(&ctx, common::CHAIN).await;
    let referrals = &ctx.services.referrals;
    let (carol, bob, alice) = (common::wallet(3), common::wallet(2), common::wallet(1));
    let activated_at = Utc::now() - Duration::hours(1);

    // carol referred bob, bob referred alice
    referrals.create(carol, bob, season.id).await.unwrap();
    referrals.create(bob, alice, season.id).await.unwrap();
    referrals.activate(bob, season.id, activated_at).await.unwrap();
    referrals.activate(alice, season.id, activated_at).await.unwrap();

    referrals
        .credit_contribution("dev:1", alice, season.id, Category::Developer, 2_000, Utc::now())
        .await
        .unwrap();

    let bob_balance = ctx.services.ledger.balance(bob, season.id).await.unwrap().unwrap();
    assert_eq!(bob_balance.shards.referral, 200);
    assert!(ctx.services.ledger.balance(carol, season.id).await.unwrap().is_none());
}

#[tokio::test]
async fn test_custom_policy_share() {
    let policy = ReferralPolicy { referrer_share_bps: 2_500, window_days: 7 };
    let ctx = common::setup_with_policy(policy).await;
    let season = common::active_season(&ctx, common::CHAIN).await;
    let referrals = &ctx.services.referrals;
    let (alice, bob) = (common::wallet(1), common::wallet(2));

    referrals.create(alice, bob, season.id).await.unwrap();
    let active = referrals.activate(bob, season.id, Utc::now() - Duration::days(1)).await.unwrap();
    assert_eq!(
        active.referee_multiplier_expires,
        active.activation_date.map(|start| start + Duration::days(7))
    );

    let credited = referrals
        .credit_referee_activity("social:x", bob, season.id, 99, Utc::now())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(credited.shards.referral, 24);
}
