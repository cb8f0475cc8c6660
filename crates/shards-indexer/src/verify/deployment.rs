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

use alloy::{
    primitives::{Address, B256},
    providers::{DynProvider, Provider, ProviderBuilder},
    rpc::{client::RpcClient, types::BlockNumberOrTag},
    transports::{layers::RetryBackoffLayer, TransportResult},
};
use async_trait::async_trait;
use shard_rewards::{
    verify::{check_deployment, DeploymentObservation},
    ContributionClaim, Verification,
};
use tokio::time::Duration;
use url::Url;

use super::ContributionVerifier;

/// Verifies contract deployment claims against one chain's RPC node.
pub struct DeploymentVerifier {
    provider: DynProvider,
    chain_id: u64,
    timeout: Duration,
}

impl DeploymentVerifier {
    pub fn new(rpc_url: Url, chain_id: u64, timeout: Duration) -> Self {
        let provider = ProviderBuilder::new()
            .disable_recommended_fillers()
            .connect_client(
                RpcClient::builder().layer(RetryBackoffLayer::new(3, 1000, 200)).http(rpc_url),
            )
            .erased();
        Self { provider, chain_id, timeout }
    }

    pub fn chain_id(&self) -> u64 {
        self.chain_id
    }

    async fn observe(
        &self,
        tx_hash: B256,
        contract: Address,
    ) -> TransportResult<DeploymentObservation> {
        let Some(receipt) = self.provider.get_transaction_receipt(tx_hash).await? else {
            return Ok(DeploymentObservation::default());
        };

        let code = self.provider.get_code_at(contract).await?;
        let block_found = match receipt.block_number {
            Some(number) => self
                .provider
                .get_block_by_number(BlockNumberOrTag::Number(number))
                .await?
                .is_some(),
            None => false,
        };

        Ok(DeploymentObservation {
            receipt_from: Some(receipt.from),
            receipt_contract: receipt.contract_address,
            receipt_block: receipt.block_number,
            code: Some(code),
            block_found,
        })
    }
}

#[async_trait]
impl ContributionVerifier for DeploymentVerifier {
    async fn verify(&self, claim: &ContributionClaim) -> Verification {
        let ContributionClaim::ContractDeployment { chain_id, tx_hash, deployer, contract } = claim
        else {
            return Verification::rejected("not a deployment claim");
        };
        if *chain_id != self.chain_id {
            return Verification::rejected(format!(
                "claim is for chain {chain_id}, verifier serves {}",
                self.chain_id
            ));
        }

        match tokio::time::timeout(self.timeout, self.observe(*tx_hash, *contract)).await {
            Ok(Ok(observed)) => check_deployment(*deployer, *contract, &observed),
            Ok(Err(err)) => {
                tracing::warn!("RPC error verifying deployment {:#x}: {}", tx_hash, err);
                Verification::unavailable(format!("rpc error: {err}"))
            }
            Err(_) => {
                tracing::warn!("Timed out verifying deployment {:#x}", tx_hash);
                Verification::unavailable(format!("rpc timed out after {:?}", self.timeout))
            }
        }
    }
}
