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

//! Contribution claims and the three-way verdict verifiers return.

use alloy_primitives::{Address, Bytes, B256};
use serde::{Deserialize, Serialize};

use crate::ShardsError;

/// A developer contribution a wallet claims to have made.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum ContributionClaim {
    #[serde(rename_all = "camelCase")]
    Commit {
        org: String,
        repo: String,
        sha: String,
        /// Branch the commit must be merged into.
        branch: String,
        #[serde(default)]
        author: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    PullRequest {
        org: String,
        repo: String,
        number: u64,
        #[serde(default)]
        author: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    ContractDeployment { chain_id: u64, tx_hash: B256, deployer: Address, contract: Address },
}

impl ContributionClaim {
    /// Stable identity of the claimed event, independent of who claims it.
    pub fn claim_key(&self) -> String {
        match self {
            ContributionClaim::Commit { org, repo, sha, .. } => format!(
                "commit:{}/{}:{}",
                org.to_ascii_lowercase(),
                repo.to_ascii_lowercase(),
                sha.to_ascii_lowercase()
            ),
            ContributionClaim::PullRequest { org, repo, number, .. } => format!(
                "pr:{}/{}#{number}",
                org.to_ascii_lowercase(),
                repo.to_ascii_lowercase()
            ),
            ContributionClaim::ContractDeployment { chain_id, tx_hash, .. } => {
                format!("deploy:{chain_id}:{tx_hash:#x}")
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verification {
    Verified,
    /// The claim is false. Terminal.
    Rejected(String),
    /// The provider could not answer. Retry later.
    Unavailable(String),
}

impl Verification {
    pub fn rejected(reason: impl Into<String>) -> Self {
        Verification::Rejected(reason.into())
    }

    pub fn unavailable(reason: impl Into<String>) -> Self {
        Verification::Unavailable(reason.into())
    }

    pub fn is_verified(&self) -> bool {
        matches!(self, Verification::Verified)
    }

    pub fn into_result(self) -> Result<(), ShardsError> {
        match self {
            Verification::Verified => Ok(()),
            Verification::Rejected(reason) => Err(ShardsError::VerificationFailed(reason)),
            Verification::Unavailable(reason) => Err(ShardsError::VerificationUnavailable(reason)),
        }
    }
}

/// Chain data gathered for a deployment claim. `None` means the node had no record.
#[derive(Debug, Clone, Default)]
pub struct DeploymentObservation {
    pub receipt_from: Option<Address>,
    pub receipt_contract: Option<Address>,
    pub receipt_block: Option<u64>,
    pub code: Option<Bytes>,
    pub block_found: bool,
}

pub fn check_deployment(
    deployer: Address,
    contract: Address,
    observed: &DeploymentObservation,
) -> Verification {
    let Some(from) = observed.receipt_from else {
        return Verification::rejected("transaction receipt not found");
    };
    if from != deployer {
        return Verification::rejected(format!("receipt sender {from:#x} is not {deployer:#x}"));
    }
    match observed.receipt_contract {
        Some(created) if created == contract => {}
        Some(created) => {
            return Verification::rejected(format!(
                "transaction created {created:#x}, not {contract:#x}"
            ))
        }
        None => return Verification::rejected("transaction did not create a contract"),
    }
    if observed.code.as_ref().map_or(true, |code| code.is_empty()) {
        return Verification::rejected(format!("no code at {contract:#x}"));
    }
    if observed.receipt_block.is_none() || !observed.block_found {
        return Verification::rejected("deployment block not retrievable");
    }
    Verification::Verified
}

/// GitHub compare status of `branch...sha`: the sha is in the branch when the branch is
/// ahead of it or equal to it.
pub fn commit_in_branch(compare_status: &str) -> bool {
    matches!(compare_status, "behind" | "identical")
}
