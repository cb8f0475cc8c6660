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

pub mod shards;

use shard_rewards::ShardsError;
use thiserror::Error;

pub use shards::{SeasonTotals, ShardsDb, ShardsDbObj, ShardsIndexerDb};

/// Lock contention codes: SQLite busy/locked (with extended variants) and Postgres
/// serialization failure and deadlock.
const CONTENTION_CODES: &[&str] = &["5", "6", "261", "262", "517", "40001", "40P01"];

#[derive(Error, Debug)]
pub enum DbError {
    #[error("SQL error {0:?}")]
    SqlErr(#[from] sqlx::Error),

    #[error("SQL Migration error {0:?}")]
    MigrateErr(#[from] sqlx::migrate::MigrateError),

    #[error("Invalid row: {0}")]
    BadRow(String),

    #[error(transparent)]
    Shards(#[from] ShardsError),
}

impl DbError {
    /// Connection-level failures and lock contention that a retry may get past.
    pub fn is_transient(&self) -> bool {
        match self {
            DbError::SqlErr(err) => matches!(
                err,
                sqlx::Error::Io(_)
                    | sqlx::Error::PoolTimedOut
                    | sqlx::Error::PoolClosed
                    | sqlx::Error::WorkerCrashed
            ) || Self::is_contention(err),
            DbError::Shards(err) => err.is_retryable(),
            _ => false,
        }
    }

    fn is_contention(err: &sqlx::Error) -> bool {
        let sqlx::Error::Database(db_err) = err else {
            return false;
        };
        db_err.code().is_some_and(|code| CONTENTION_CODES.iter().any(|known| *known == code))
    }

    /// The domain error behind this failure, if any.
    pub fn as_shards(&self) -> Option<&ShardsError> {
        match self {
            DbError::Shards(err) => Some(err),
            _ => None,
        }
    }
}
