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

//! Shard rewards accounting primitives: seasons, per-wallet category balances, vault position
//! snapshots, daily earning history and referrals.
//!
//! Everything in this crate is pure. Persistence and concurrency live in `shards-indexer`.

pub mod balance;
pub mod error;
pub mod history;
pub mod price;
pub mod referral;
pub mod season;
pub mod vault;
pub mod verify;

pub use balance::{CategoryAmounts, ShardBalance};
pub use error::{Constraint, ShardsError};
pub use history::{DailyEarning, ShardEarningHistory, VaultBreakdownEntry};
pub use price::PriceQuote;
pub use referral::{Referral, ReferralPolicy, ReferralStatus};
pub use season::{
    Season, SeasonConfig, SeasonParams, SeasonStatus, DEFAULT_SOCIAL_CONVERSION_RATE,
    DEFAULT_VAULT_RATE,
};
pub use vault::{
    lock_multiplier, snapshot_day, VaultPosition, VaultSnapshot, MAX_LOCK_WEEKS, MIN_LOCK_WEEKS,
};
pub use verify::{ContributionClaim, Verification};

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

/// Shard amounts are whole units. Fractional calculation results are floored on conversion.
pub type Shards = i64;

/// The four sources a wallet can earn shards from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Staking,
    Social,
    Developer,
    Referral,
}

impl Category {
    pub const ALL: [Category; 4] =
        [Category::Staking, Category::Social, Category::Developer, Category::Referral];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Staking => "staking",
            Category::Social => "social",
            Category::Developer => "developer",
            Category::Referral => "referral",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = ShardsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "staking" => Ok(Category::Staking),
            "social" => Ok(Category::Social),
            "developer" => Ok(Category::Developer),
            "referral" => Ok(Category::Referral),
            other => Err(ShardsError::InvalidInput(format!("unknown shard category: {other}"))),
        }
    }
}
