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

use std::time::Duration;

use alloy::{
    network::{EthereumWallet, TransactionBuilder},
    node_bindings::Anvil,
    primitives::{Address, Bytes, B256, U256},
    providers::{Provider, ProviderBuilder},
    rpc::types::TransactionRequest,
    signers::local::PrivateKeySigner,
};
use serde_json::json;
use shard_rewards::{ContributionClaim, Verification};
use shards_indexer::verify::{ContributionVerifier, DeploymentVerifier, GithubVerifier};
use url::Url;
use wiremock::{
    matchers::{header, method, path},
    Mock, MockServer, ResponseTemplate,
};

const SHA: &str = "4f1c0d9e8b7a6f5e4d3c2b1a0f9e8d7c6b5a4f3e";

// Init code returning the single byte runtime `0x00`
const DEPLOY_CODE: &str = "0x6001600c60003960016000f300";

fn github(server: &MockServer) -> GithubVerifier {
    GithubVerifier::new(
        Url::parse(&server.uri()).unwrap(),
        Some("test-token".to_string()),
        Duration::from_secs(5),
    )
    .unwrap()
}

fn pull_request(number: u64, author: Option<&str>) -> ContributionClaim {
    ContributionClaim::PullRequest {
        org: "acme".into(),
        repo: "vaults".into(),
        number,
        author: author.map(str::to_string),
    }
}

fn commit(author: Option<&str>) -> ContributionClaim {
    ContributionClaim::Commit {
        org: "acme".into(),
        repo: "vaults".into(),
        sha: SHA.into(),
        branch: "main".into(),
        author: author.map(str::to_string),
    }
}

async fn mock_json(server: &MockServer, route: &str, status: u16, body: serde_json::Value) {
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(ResponseTemplate::new(status).set_body_json(body))
        .mount(server)
        .await;
}

/// Commit, branch and compare endpoints for [commit] claims.
async fn mock_commit(server: &MockServer, protected: bool, compare_status: &str) {
    let base = "/repos/acme/vaults";
    mock_json(server, &format!("{base}/commits/{SHA}"), 200, json!({"author": {"login": "alice"}}))
        .await;
    mock_json(server, &format!("{base}/branches/main"), 200, json!({"protected": protected}))
        .await;
    mock_json(
        server,
        &format!("{base}/compare/main...{SHA}"),
        200,
        json!({"status": compare_status}),
    )
    .await;
}

#[tokio::test]
async fn test_github_pull_requests() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/repos/acme/vaults/pulls/1"))
        .and(header("authorization", "Bearer test-token"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"merged": true, "user": {"login": "Alice"}})),
        )
        .mount(&server)
        .await;
    mock_json(&server, "/repos/acme/vaults/pulls/2", 200, json!({"merged": false})).await;
    mock_json(&server, "/repos/acme/vaults/pulls/3", 404, json!({"message": "Not Found"})).await;
    mock_json(&server, "/repos/acme/vaults/pulls/4", 429, json!({"message": "rate limited"}))
        .await;

    let verifier = github(&server);
    assert_eq!(verifier.verify(&pull_request(1, Some("alice"))).await, Verification::Verified);
    assert_eq!(verifier.verify(&pull_request(1, None)).await, Verification::Verified);
    assert!(matches!(
        verifier.verify(&pull_request(1, Some("mallory"))).await,
        Verification::Rejected(_)
    ));
    assert!(matches!(verifier.verify(&pull_request(2, None)).await, Verification::Rejected(_)));
    assert!(matches!(verifier.verify(&pull_request(3, None)).await, Verification::Rejected(_)));
    assert!(matches!(
        verifier.verify(&pull_request(4, None)).await,
        Verification::Unavailable(_)
    ));
}

#[tokio::test]
async fn test_github_commit_in_protected_branch() {
    let server = MockServer::start().await;
    mock_commit(&server, true, "behind").await;

    let verifier = github(&server);
    assert_eq!(verifier.verify(&commit(Some("alice"))).await, Verification::Verified);
    assert!(matches!(verifier.verify(&commit(Some("bob"))).await, Verification::Rejected(_)));
}

#[tokio::test]
async fn test_github_commit_identical_to_branch_head() {
    let server = MockServer::start().await;
    mock_commit(&server, true, "identical").await;

    assert_eq!(github(&server).verify(&commit(None)).await, Verification::Verified);
}

#[tokio::test]
async fn test_github_commit_in_unprotected_branch() {
    let server = MockServer::start().await;
    mock_commit(&server, false, "behind").await;

    let verdict = github(&server).verify(&commit(None)).await;
    assert_eq!(verdict, Verification::rejected("branch main is not protected"));
}

#[tokio::test]
async fn test_github_commit_ahead_of_branch() {
    let server = MockServer::start().await;
    mock_commit(&server, true, "ahead").await;

    let verdict = github(&server).verify(&commit(None)).await;
    assert!(matches!(verdict, Verification::Rejected(reason) if reason.contains("ahead")));
}

#[tokio::test]
async fn test_github_missing_commit_is_rejected() {
    let server = MockServer::start().await;
    let route = format!("/repos/acme/vaults/commits/{SHA}");
    mock_json(&server, &route, 422, json!({"message": "No commit found"})).await;

    assert!(matches!(github(&server).verify(&commit(None)).await, Verification::Rejected(_)));
}

#[tokio::test]
async fn test_deployment_receipts() {
    let anvil = Anvil::new().spawn();
    let signer: PrivateKeySigner = anvil.keys()[0].clone().into();
    let deployer = signer.address();
    let provider = ProviderBuilder::new()
        .wallet(EthereumWallet::from(signer))
        .connect_http(anvil.endpoint_url());

    let code: Bytes = DEPLOY_CODE.parse().unwrap();
    let deploy = TransactionRequest::default().with_deploy_code(code);
    let receipt = provider.send_transaction(deploy).await.unwrap().get_receipt().await.unwrap();
    let contract = receipt.contract_address.unwrap();
    let tx_hash = receipt.transaction_hash;

    let transfer = TransactionRequest::default()
        .with_to(Address::with_last_byte(0x42))
        .with_value(U256::from(1));
    let transfer = provider.send_transaction(transfer).await.unwrap().get_receipt().await.unwrap();

    let chain_id = anvil.chain_id();
    let verifier = DeploymentVerifier::new(anvil.endpoint_url(), chain_id, Duration::from_secs(10));
    let claim = |tx_hash: B256, deployer: Address, contract: Address| {
        ContributionClaim::ContractDeployment { chain_id, tx_hash, deployer, contract }
    };

    assert_eq!(verifier.verify(&claim(tx_hash, deployer, contract)).await, Verification::Verified);

    let someone_else = Address::with_last_byte(9);
    let verdicts = [
        verifier.verify(&claim(tx_hash, someone_else, contract)).await,
        verifier.verify(&claim(tx_hash, deployer, someone_else)).await,
        verifier.verify(&claim(B256::repeat_byte(0xab), deployer, contract)).await,
        verifier.verify(&claim(transfer.transaction_hash, deployer, contract)).await,
    ];
    for verdict in verdicts {
        assert!(matches!(verdict, Verification::Rejected(_)), "{verdict:?}");
    }

    let other_chain = ContributionClaim::ContractDeployment {
        chain_id: chain_id + 1,
        tx_hash,
        deployer,
        contract,
    };
    assert!(matches!(verifier.verify(&other_chain).await, Verification::Rejected(_)));
}
