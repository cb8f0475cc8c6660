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

use std::{path::PathBuf, sync::Arc, time::Duration};

use anyhow::{bail, Context, Result};
use chrono::Utc;
use clap::Parser;
use shard_rewards::ReferralPolicy;
use shards_indexer::{
    jobs::{ContributionJob, JobRunner, JobRunnerConfig},
    rollover::previous_day,
    verify::{github::GITHUB_API_URL, DeploymentVerifier, GithubVerifier, Verifiers},
    ShardsServiceConfig, ShardsServices,
};
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    sync::mpsc,
};
use url::Url;

/// Arguments for the shards worker.
#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct ShardsWorkerArgs {
    /// DB connection string.
    #[clap(long, env = "DATABASE_URL")]
    db: String,

    /// Interval in seconds between rollover runs.
    #[clap(long, default_value = "600")]
    interval: u64,

    /// Number of consecutive rollover failures before quitting.
    #[clap(long, default_value = "3")]
    retries: u32,

    /// Whether to log in JSON format.
    #[clap(long, env, default_value_t = false)]
    log_json: bool,

    /// Snapshots priced with a quote older than this are not awarded.
    #[clap(long, env, default_value = "60")]
    max_price_age_minutes: i64,

    /// Share of referee earnings credited to the referrer, in basis points.
    #[clap(long, env, default_value = "1000")]
    referral_share_bps: u32,

    /// Days after activation during which a referee's earnings are shared.
    #[clap(long, env, default_value = "30")]
    referral_window_days: u32,

    /// Maximum number of jobs processed at once.
    #[clap(long, env, default_value = "8")]
    concurrency: usize,

    /// Attempts per job before a transient failure is dropped.
    #[clap(long, env, default_value = "5")]
    job_attempts: u32,

    /// Newline-delimited JSON file of contribution jobs to process.
    #[clap(long, env)]
    jobs_file: Option<PathBuf>,

    /// GitHub API token for source-control verification.
    #[clap(long, env)]
    github_token: Option<String>,

    /// Base URL of the GitHub REST API.
    #[clap(long, env, default_value = GITHUB_API_URL)]
    github_api_url: Url,

    /// RPC endpoint used to verify deployments, as CHAIN_ID=URL. May be repeated.
    #[clap(
        long = "deployment-rpc",
        env = "DEPLOYMENT_RPCS",
        value_delimiter = ',',
        value_parser = parse_deployment_rpc
    )]
    deployment_rpcs: Vec<(u64, Url)>,

    /// Timeout in seconds for each verification provider call.
    #[clap(long, default_value = "15")]
    verify_timeout: u64,
}

fn parse_deployment_rpc(value: &str) -> Result<(u64, Url)> {
    let (chain_id, url) =
        value.split_once('=').context("expected CHAIN_ID=URL for --deployment-rpc")?;
    let chain_id = chain_id.trim().parse().context("invalid chain id")?;
    let url = Url::parse(url.trim()).context("invalid RPC URL")?;
    Ok((chain_id, url))
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = ShardsWorkerArgs::parse();

    let filter = tracing_subscriber::EnvFilter::builder()
        .with_default_directive(tracing_subscriber::filter::LevelFilter::INFO.into())
        .from_env_lossy();

    if args.log_json {
        tracing_subscriber::fmt().with_ansi(false).json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_ansi(false).with_env_filter(filter).init();
    }

    let config = ShardsServiceConfig {
        max_price_age_minutes: args.max_price_age_minutes,
        referral_policy: ReferralPolicy {
            referrer_share_bps: args.referral_share_bps,
            window_days: args.referral_window_days,
        },
    };
    let services = ShardsServices::connect(&args.db, config)
        .await
        .context("Failed to connect to the shards database")?;

    let timeout = Duration::from_secs(args.verify_timeout);
    let mut verifiers = Verifiers::new().with_source_control(Arc::new(
        GithubVerifier::new(args.github_api_url.clone(), args.github_token.clone(), timeout)
            .context("Failed to build GitHub client")?,
    ));
    for (chain_id, rpc_url) in &args.deployment_rpcs {
        tracing::info!("Verifying deployments on chain {} via {}", chain_id, rpc_url);
        verifiers = verifiers.with_deployments(
            *chain_id,
            Arc::new(DeploymentVerifier::new(rpc_url.clone(), *chain_id, timeout)),
        );
    }

    let runner = JobRunner::new(
        Arc::new(services.job_processor(Arc::new(verifiers))),
        JobRunnerConfig {
            concurrency: args.concurrency,
            max_attempts: args.job_attempts,
            ..Default::default()
        },
    );
    let (job_tx, job_rx) = mpsc::channel(args.concurrency.max(1) * 4);
    tokio::spawn(async move { runner.run(job_rx).await });

    if let Some(path) = args.jobs_file.clone() {
        tokio::spawn(async move {
            if let Err(e) = feed_jobs(path, job_tx).await {
                tracing::error!("Failed to read jobs file: {:?}", e);
            }
        });
    } else {
        drop(job_tx);
    }

    let rollover = services.rollover();
    let mut failures = 0u32;
    loop {
        match rollover.catch_up(previous_day(Utc::now())).await {
            Ok(reports) => {
                failures = 0;
                for report in &reports {
                    tracing::info!(
                        "Season {} on {}: {} staking awards, {} history rows, {} participants, {} shards issued",
                        report.season_id,
                        report.date,
                        report.award.awarded,
                        report.history.recorded,
                        report.total_participants,
                        report.total_shards_issued
                    );
                }
                tracing::info!("Sleeping for {} seconds", args.interval);
                tokio::time::sleep(Duration::from_secs(args.interval)).await;
            }
            Err(e) => {
                failures += 1;
                tracing::error!("Error running shards rollover: {:?}", e);
                if failures >= args.retries {
                    bail!("Maximum retries reached");
                }
                tracing::info!("Retrying in {} seconds", args.interval);
                tokio::time::sleep(Duration::from_secs(args.interval)).await;
            }
        }
    }
}

async fn feed_jobs(path: PathBuf, jobs: mpsc::Sender<ContributionJob>) -> Result<()> {
    let file = tokio::fs::File::open(&path)
        .await
        .with_context(|| format!("Failed to open {}", path.display()))?;
    let mut lines = BufReader::new(file).lines();

    let mut line_no = 0usize;
    let mut queued = 0usize;
    while let Some(line) = lines.next_line().await? {
        line_no += 1;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<ContributionJob>(&line) {
            Ok(job) => {
                if jobs.send(job).await.is_err() {
                    bail!("Job runner stopped before the jobs file was consumed");
                }
                queued += 1;
            }
            Err(e) => tracing::warn!("Skipping malformed job on line {}: {}", line_no, e),
        }
    }

    tracing::info!("Queued {} jobs from {}", queued, path.display());
    Ok(())
}
