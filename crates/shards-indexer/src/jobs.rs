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

//! Contribution jobs and the concurrent runner that processes them.

use std::sync::Arc;

use alloy::primitives::Address;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use shard_rewards::{
    Category, ContributionClaim, Season, Shards, ShardsError, VaultPosition, VaultSnapshot,
};
use tokio::{
    sync::{mpsc, Semaphore},
    task::JoinSet,
    time::Duration,
};
use uuid::Uuid;

use crate::{
    db::DbError,
    referrals::{ContributionOutcome, ReferralLedger},
    seasons::SeasonStore,
    snapshot::VaultSnapshotter,
    verify::VerifierObj,
};

/// One rewardable event, as delivered by the queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ContributionJob {
    Snapshot(VaultSnapshot),
    #[serde(rename_all = "camelCase")]
    SocialEngagement {
        wallet: Address,
        season_id: Uuid,
        points: i64,
        claim_key: String,
        occurred_at: DateTime<Utc>,
    },
    #[serde(rename_all = "camelCase")]
    DeveloperContribution {
        wallet: Address,
        season_id: Uuid,
        claim: ContributionClaim,
        shards: Shards,
        occurred_at: DateTime<Utc>,
    },
}

impl ContributionJob {
    /// Key the job's award is deduplicated on. Snapshots are keyed by their day instead.
    pub fn claim_key(&self) -> Option<String> {
        match self {
            ContributionJob::Snapshot(_) => None,
            ContributionJob::SocialEngagement { claim_key, .. } => {
                Some(format!("social:{claim_key}"))
            }
            ContributionJob::DeveloperContribution { claim, .. } => Some(claim.claim_key()),
        }
    }

    fn describe(&self) -> String {
        match self {
            ContributionJob::Snapshot(snapshot) => format!(
                "snapshot {:#x}/{:#x}@{}",
                snapshot.wallet_address, snapshot.vault_address, snapshot.block_number
            ),
            _ => self.claim_key().unwrap_or_default(),
        }
    }
}

#[derive(Debug, Clone)]
pub enum JobOutcome {
    Recorded(Box<VaultPosition>),
    Awarded { shards: Shards, referrer_credited: bool },
    AlreadyRecorded,
}

/// Executes a single job once.
pub struct JobProcessor {
    seasons: SeasonStore,
    snapshotter: Arc<VaultSnapshotter>,
    referrals: Arc<ReferralLedger>,
    verifier: VerifierObj,
}

impl JobProcessor {
    pub fn new(
        seasons: SeasonStore,
        snapshotter: Arc<VaultSnapshotter>,
        referrals: Arc<ReferralLedger>,
        verifier: VerifierObj,
    ) -> Self {
        Self { seasons, snapshotter, referrals, verifier }
    }

    pub async fn process(&self, job: &ContributionJob) -> Result<JobOutcome, DbError> {
        match job {
            ContributionJob::Snapshot(snapshot) => {
                let position = self.snapshotter.record(snapshot.clone()).await?;
                Ok(JobOutcome::Recorded(Box::new(position)))
            }
            ContributionJob::SocialEngagement { wallet, season_id, points, occurred_at, .. } => {
                if *points < 0 {
                    return Err(ShardsError::InvalidInput(format!(
                        "negative engagement points {points}"
                    ))
                    .into());
                }
                let season = self.live_season(*season_id, *occurred_at).await?;
                let shards = points.checked_mul(season.social_conversion_rate()).ok_or_else(|| {
                    ShardsError::InvalidInput(format!("engagement points {points} overflow"))
                })?;
                let claim_key = job.claim_key().unwrap_or_default();
                let outcome = self
                    .referrals
                    .credit_contribution(
                        &claim_key,
                        *wallet,
                        season.id,
                        Category::Social,
                        shards,
                        *occurred_at,
                    )
                    .await?;
                Ok(Self::awarded(outcome, shards))
            }
            ContributionJob::DeveloperContribution {
                wallet,
                season_id,
                claim,
                shards,
                occurred_at,
            } => {
                if *shards <= 0 {
                    return Err(ShardsError::InvalidInput(format!(
                        "developer award must be positive, got {shards}"
                    ))
                    .into());
                }
                let season = self.live_season(*season_id, *occurred_at).await?;
                let claim_key = claim.claim_key();

                // Redelivered claims skip the provider round trip
                if !self.referrals.ledger().is_rewarded(&claim_key).await? {
                    self.verifier.verify(claim).await.into_result()?;
                }
                let outcome = self
                    .referrals
                    .credit_contribution(
                        &claim_key,
                        *wallet,
                        season.id,
                        Category::Developer,
                        *shards,
                        *occurred_at,
                    )
                    .await?;
                Ok(Self::awarded(outcome, *shards))
            }
        }
    }

    async fn live_season(&self, season_id: Uuid, at: DateTime<Utc>) -> Result<Season, DbError> {
        let season = self.seasons.get(season_id).await?;
        if !season.is_live_at(at) {
            return Err(ShardsError::InvalidInput(format!(
                "season {season_id} ({}) does not accept contributions at {at}",
                season.status
            ))
            .into());
        }
        Ok(season)
    }

    fn awarded(outcome: ContributionOutcome, shards: Shards) -> JobOutcome {
        match outcome.balance {
            Some(_) => JobOutcome::Awarded {
                shards,
                referrer_credited: outcome.referrer_balance.is_some(),
            },
            None => JobOutcome::AlreadyRecorded,
        }
    }
}

#[derive(Debug, Clone)]
pub struct JobRunnerConfig {
    pub concurrency: usize,
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for JobRunnerConfig {
    fn default() -> Self {
        Self {
            concurrency: 8,
            max_attempts: 5,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobStats {
    pub succeeded: u64,
    pub already_recorded: u64,
    pub failed: u64,
    pub retries: u64,
}

enum JobResult {
    Done { outcome: JobOutcome, retries: u64 },
    Failed { retries: u64 },
}

pub struct JobRunner {
    processor: Arc<JobProcessor>,
    config: JobRunnerConfig,
}

impl JobRunner {
    pub fn new(processor: Arc<JobProcessor>, config: JobRunnerConfig) -> Self {
        Self { processor, config }
    }

    /// Process jobs until the channel closes and every in-flight job has finished.
    pub async fn run(&self, mut jobs: mpsc::Receiver<ContributionJob>) -> JobStats {
        let permits = Arc::new(Semaphore::new(self.config.concurrency.max(1)));
        let mut tasks = JoinSet::new();
        let mut stats = JobStats::default();

        loop {
            tokio::select! {
                job = jobs.recv() => {
                    let Some(job) = job else { break };
                    let Ok(permit) = permits.clone().acquire_owned().await else { break };
                    let processor = self.processor.clone();
                    let config = self.config.clone();
                    tasks.spawn(async move {
                        let result = run_with_retry(&processor, job, &config).await;
                        drop(permit);
                        result
                    });
                }
                Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                    Self::tally(&mut stats, joined);
                }
            }
        }

        while let Some(joined) = tasks.join_next().await {
            Self::tally(&mut stats, joined);
        }

        tracing::info!(
            "Job runner finished: {} succeeded, {} already recorded, {} failed, {} retries",
            stats.succeeded,
            stats.already_recorded,
            stats.failed,
            stats.retries
        );
        stats
    }

    fn tally(stats: &mut JobStats, joined: Result<JobResult, tokio::task::JoinError>) {
        match joined {
            Ok(JobResult::Done { outcome: JobOutcome::AlreadyRecorded, retries }) => {
                stats.already_recorded += 1;
                stats.retries += retries;
            }
            Ok(JobResult::Done { retries, .. }) => {
                stats.succeeded += 1;
                stats.retries += retries;
            }
            Ok(JobResult::Failed { retries }) => {
                stats.failed += 1;
                stats.retries += retries;
            }
            Err(err) => {
                tracing::error!("Job task panicked: {}", err);
                stats.failed += 1;
            }
        }
    }
}

async fn run_with_retry(
    processor: &JobProcessor,
    job: ContributionJob,
    config: &JobRunnerConfig,
) -> JobResult {
    let mut attempt = 1;
    let mut backoff = config.initial_backoff;
    loop {
        match processor.process(&job).await {
            Ok(outcome) => {
                tracing::debug!("Processed {}: {:?}", job.describe(), outcome);
                return JobResult::Done { outcome, retries: (attempt - 1) as u64 };
            }
            Err(err) if err.is_transient() && attempt < config.max_attempts => {
                tracing::warn!(
                    "Attempt {}/{} for {} failed: {}. Retrying in {:?}",
                    attempt,
                    config.max_attempts,
                    job.describe(),
                    err,
                    backoff
                );
                tokio::time::sleep(backoff).await;
                backoff = (backoff * 2).min(config.max_backoff);
                attempt += 1;
            }
            Err(err) => {
                tracing::error!(
                    "Dropping {} after {} attempt(s): {}",
                    job.describe(),
                    attempt,
                    err
                );
                return JobResult::Failed { retries: (attempt - 1) as u64 };
            }
        }
    }
}
