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

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A USD price as reported by the price feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceQuote {
    pub symbol: String,
    pub usd_price: f64,
    pub updated_at: DateTime<Utc>,
}

impl PriceQuote {
    pub fn age_minutes(&self, now: DateTime<Utc>) -> i64 {
        (now - self.updated_at).num_minutes()
    }

    pub fn is_stale(&self, now: DateTime<Utc>, max_age_minutes: i64) -> bool {
        self.age_minutes(now) > max_age_minutes
    }
}
