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

//! Verifiers for developer contribution claims.

pub mod deployment;
pub mod github;

use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use shard_rewards::{ContributionClaim, Verification};

pub use deployment::DeploymentVerifier;
pub use github::GithubVerifier;

/// Checks a claim against an external provider.
///
/// A false claim is a [Verification::Rejected] verdict, never an error.
#[async_trait]
pub trait ContributionVerifier: Send + Sync {
    async fn verify(&self, claim: &ContributionClaim) -> Verification;
}

pub type VerifierObj = Arc<dyn ContributionVerifier>;

/// Routes each claim to the verifier for its kind and chain.
#[derive(Clone, Default)]
pub struct Verifiers {
    source_control: Option<VerifierObj>,
    deployments: HashMap<u64, VerifierObj>,
}

impl Verifiers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_source_control(mut self, verifier: VerifierObj) -> Self {
        self.source_control = Some(verifier);
        self
    }

    pub fn with_deployments(mut self, chain_id: u64, verifier: VerifierObj) -> Self {
        self.deployments.insert(chain_id, verifier);
        self
    }
}

#[async_trait]
impl ContributionVerifier for Verifiers {
    async fn verify(&self, claim: &ContributionClaim) -> Verification {
        let verifier = match claim {
            ContributionClaim::Commit { .. } | ContributionClaim::PullRequest { .. } => {
                self.source_control.as_ref()
            }
            ContributionClaim::ContractDeployment { chain_id, .. } => {
                self.deployments.get(chain_id)
            }
        };
        match verifier {
            Some(verifier) => verifier.verify(claim).await,
            None => {
                tracing::warn!("No verifier configured for {}", claim.claim_key());
                Verification::unavailable("no verifier configured for this claim")
            }
        }
    }
}
