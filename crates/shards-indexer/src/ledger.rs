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

//! The shard ledger: the only writer of [ShardBalance] rows.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, PoisonError},
};

use alloy::primitives::Address;
use shard_rewards::{Category, Referral, ShardBalance, Shards};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use uuid::Uuid;

use crate::db::{DbError, ShardsDbObj};

type LedgerKey = (Address, Uuid);

/// One async mutex per `(wallet, season)`, created on demand and dropped when idle.
#[derive(Default)]
struct KeyedLocks {
    inner: Mutex<HashMap<LedgerKey, Arc<AsyncMutex<()>>>>,
}

struct KeyGuard<'a> {
    locks: &'a KeyedLocks,
    key: LedgerKey,
    guard: Option<OwnedMutexGuard<()>>,
}

impl KeyedLocks {
    async fn lock(&self, key: LedgerKey) -> KeyGuard<'_> {
        let mutex = {
            let mut map = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
            map.entry(key).or_default().clone()
        };
        let guard = mutex.lock_owned().await;
        KeyGuard { locks: self, key, guard: Some(guard) }
    }

    fn len(&self) -> usize {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

impl Drop for KeyGuard<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());
        let mut map = self.locks.inner.lock().unwrap_or_else(PoisonError::into_inner);
        if map.get(&self.key).is_some_and(|mutex| Arc::strong_count(mutex) == 1) {
            map.remove(&self.key);
        }
    }
}

pub struct ShardLedger {
    db: ShardsDbObj,
    locks: KeyedLocks,
}

impl ShardLedger {
    pub fn new(db: ShardsDbObj) -> Self {
        Self { db, locks: KeyedLocks::default() }
    }

    /// Apply a signed delta to one category, creating the balance on first contribution.
    pub async fn add_shards(
        &self,
        wallet: Address,
        season_id: Uuid,
        category: Category,
        amount: Shards,
    ) -> Result<ShardBalance, DbError> {
        let _guard = self.locks.lock((wallet, season_id)).await;
        self.ensure_in_range(wallet, season_id, category, amount).await?;
        let balance = self.db.add_shards(wallet, season_id, category, amount).await?;
        Self::check(&balance);
        tracing::debug!(
            "Applied {} {} shards to {:#x} in season {} (total {})",
            amount,
            category,
            wallet,
            season_id,
            balance.total_shards
        );
        Ok(balance)
    }

    /// Idempotent [Self::add_shards]: the delta is applied at most once per `claim_key`.
    pub async fn award(
        &self,
        claim_key: &str,
        wallet: Address,
        season_id: Uuid,
        category: Category,
        amount: Shards,
    ) -> Result<Option<ShardBalance>, DbError> {
        let _guard = self.locks.lock((wallet, season_id)).await;
        self.ensure_in_range(wallet, season_id, category, amount).await?;
        let balance = self.db.award(claim_key, wallet, season_id, category, amount).await?;
        match &balance {
            Some(balance) => {
                Self::check(balance);
                tracing::debug!(
                    "Awarded {} {} shards to {:#x} for {}",
                    amount,
                    category,
                    wallet,
                    claim_key
                );
            }
            None => tracing::debug!("Claim {} already recorded, skipping", claim_key),
        }
        Ok(balance)
    }

    /// Credit a referrer for referee activity, at most once per `claim_key`.
    pub async fn credit_referral(
        &self,
        claim_key: &str,
        referral: &Referral,
        amount: Shards,
    ) -> Result<Option<ShardBalance>, DbError> {
        let (referrer, season_id) = (referral.referrer_address, referral.season_id);
        let _guard = self.locks.lock((referrer, season_id)).await;
        self.ensure_in_range(referrer, season_id, Category::Referral, amount).await?;
        let balance = self.db.credit_referral(claim_key, referral, amount).await?;
        if let Some(balance) = &balance {
            Self::check(balance);
        }
        Ok(balance)
    }

    pub async fn recalculate_total(
        &self,
        wallet: Address,
        season_id: Uuid,
    ) -> Result<ShardBalance, DbError> {
        let _guard = self.locks.lock((wallet, season_id)).await;
        self.db.recalculate_total(wallet, season_id).await
    }

    pub async fn balance(
        &self,
        wallet: Address,
        season_id: Uuid,
    ) -> Result<Option<ShardBalance>, DbError> {
        self.db.get_balance(wallet, season_id).await
    }

    pub async fn is_rewarded(&self, claim_key: &str) -> Result<bool, DbError> {
        self.db.is_rewarded(claim_key).await
    }

    /// Fails with [shard_rewards::ShardsError::InvalidInput] when the delta would overflow
    /// the balance. Must be called with the key's lock held.
    async fn ensure_in_range(
        &self,
        wallet: Address,
        season_id: Uuid,
        category: Category,
        amount: Shards,
    ) -> Result<(), DbError> {
        let current = self
            .db
            .get_balance(wallet, season_id)
            .await?
            .unwrap_or_else(|| ShardBalance::empty(wallet, season_id));
        current.add_shards(category, amount)?;
        Ok(())
    }

    /// The write has committed by now; drift is reported for [Self::recalculate_total].
    fn check(balance: &ShardBalance) {
        if !balance.is_consistent() {
            tracing::error!(
                "Balance for {:#x} in season {} is inconsistent: total {} vs categories {:?}",
                balance.wallet_address,
                balance.season_id,
                balance.total_shards,
                balance.shards
            );
        }
    }
}
