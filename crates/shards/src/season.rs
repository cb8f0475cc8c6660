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

//! Season lifecycle: `upcoming -> active -> completed`.

use std::{collections::BTreeMap, fmt, str::FromStr};

use chrono::{DateTime, Duration, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{ShardsError, Shards};

/// Shards per $1000 of vault value when the season has no rate for the asset.
pub const DEFAULT_VAULT_RATE: i64 = 100;
/// Shards per social engagement point when the season leaves the rate at zero.
pub const DEFAULT_SOCIAL_CONVERSION_RATE: i64 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SeasonStatus {
    Upcoming,
    Active,
    Completed,
}

impl SeasonStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SeasonStatus::Upcoming => "upcoming",
            SeasonStatus::Active => "active",
            SeasonStatus::Completed => "completed",
        }
    }
}

impl fmt::Display for SeasonStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SeasonStatus {
    type Err = ShardsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "upcoming" => Ok(SeasonStatus::Upcoming),
            "active" => Ok(SeasonStatus::Active),
            "completed" => Ok(SeasonStatus::Completed),
            other => Err(ShardsError::InvalidInput(format!("unknown season status: {other}"))),
        }
    }
}

/// Reward configuration captured per season.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeasonConfig {
    /// Shards per $1000 of vault value, keyed by asset symbol.
    #[serde(default)]
    pub vault_rates: BTreeMap<String, i64>,
    #[serde(default)]
    pub social_conversion_rate: i64,
    #[serde(default)]
    pub vault_locked: bool,
    #[serde(default)]
    pub withdrawal_enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub redeem_period_days: Option<u32>,
}

impl SeasonConfig {
    pub fn vault_rate(&self, asset: &str) -> i64 {
        self.vault_rates
            .iter()
            .find(|(symbol, _)| symbol.eq_ignore_ascii_case(asset))
            .map(|(_, rate)| *rate)
            .unwrap_or(DEFAULT_VAULT_RATE)
    }

    pub fn social_conversion_rate(&self) -> i64 {
        if self.social_conversion_rate == 0 {
            DEFAULT_SOCIAL_CONVERSION_RATE
        } else {
            self.social_conversion_rate
        }
    }
}

/// Parameters for [Season::create].
#[derive(Debug, Clone)]
pub struct SeasonParams {
    pub name: String,
    pub chain: String,
    pub start_date: DateTime<Utc>,
    pub end_date: Option<DateTime<Utc>>,
    pub config: SeasonConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Season {
    pub id: Uuid,
    pub name: String,
    pub chain: String,
    pub start_date: DateTime<Utc>,
    pub end_date: Option<DateTime<Utc>>,
    pub status: SeasonStatus,
    pub config: SeasonConfig,
    pub total_participants: u64,
    pub total_shards_issued: Shards,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Season {
    pub fn create(params: SeasonParams) -> Self {
        Self::create_at(params, Utc::now())
    }

    pub fn create_at(params: SeasonParams, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: params.name,
            chain: params.chain.to_ascii_lowercase(),
            start_date: params.start_date,
            end_date: params.end_date,
            status: SeasonStatus::Upcoming,
            config: params.config,
            total_participants: 0,
            total_shards_issued: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn activate(&self) -> Result<Self, ShardsError> {
        self.activate_at(Utc::now())
    }

    pub fn activate_at(&self, now: DateTime<Utc>) -> Result<Self, ShardsError> {
        if self.status != SeasonStatus::Upcoming {
            return Err(self.invalid("activate"));
        }
        Ok(Self { status: SeasonStatus::Active, updated_at: now, ..self.clone() })
    }

    pub fn complete(&self, end_date: DateTime<Utc>) -> Result<Self, ShardsError> {
        self.complete_at(end_date, Utc::now())
    }

    pub fn complete_at(
        &self,
        end_date: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Self, ShardsError> {
        if self.status != SeasonStatus::Active {
            return Err(self.invalid("complete"));
        }
        Ok(Self {
            status: SeasonStatus::Completed,
            end_date: Some(end_date),
            updated_at: now,
            ..self.clone()
        })
    }

    /// Statistic refreshes are allowed in every state, including `completed`.
    pub fn update_stats(&self, participants: u64, shards_issued: Shards) -> Self {
        Self {
            total_participants: participants,
            total_shards_issued: shards_issued,
            updated_at: Utc::now(),
            ..self.clone()
        }
    }

    pub fn vault_rate(&self, asset: &str) -> i64 {
        self.config.vault_rate(asset)
    }

    pub fn social_conversion_rate(&self) -> i64 {
        self.config.social_conversion_rate()
    }

    /// Whether contributions made at `at` count toward this season.
    pub fn is_live_at(&self, at: DateTime<Utc>) -> bool {
        self.status == SeasonStatus::Active
            && self.start_date <= at
            && self.end_date.map_or(true, |end| at < end)
    }

    /// Whether the UTC day `date` falls inside `[start_date, end_date)`. Days are counted
    /// from the start date's own day.
    pub fn covers_day(&self, date: NaiveDate) -> bool {
        let day_start = date.and_time(NaiveTime::MIN).and_utc();
        self.start_date.date_naive() <= date && self.end_date.map_or(true, |end| day_start < end)
    }

    pub fn redeem_deadline(&self) -> Option<DateTime<Utc>> {
        let days = self.config.redeem_period_days?;
        Some(self.end_date? + Duration::days(days as i64))
    }

    fn invalid(&self, action: &'static str) -> ShardsError {
        ShardsError::InvalidTransition { entity: "season", from: self.status.to_string(), action }
    }
}
