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

use thiserror::Error;

/// The specific uniqueness or relationship invariant a write would have broken.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Constraint {
    /// A wallet tried to refer itself.
    SelfReferral,
    /// The referee already has a referral in this season.
    AlreadyReferred,
    /// Another season on the same chain is already active.
    ActiveSeasonExists,
    /// The event behind this write was already credited.
    AlreadyRecorded,
}

impl std::fmt::Display for Constraint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let msg = match self {
            Constraint::SelfReferral => "referrer and referee must differ",
            Constraint::AlreadyReferred => "referee already referred in this season",
            Constraint::ActiveSeasonExists => "another season is already active on this chain",
            Constraint::AlreadyRecorded => "already recorded",
        };
        f.write_str(msg)
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ShardsError {
    #[error("Invalid {entity} transition: cannot {action} from {from}")]
    InvalidTransition { entity: &'static str, from: String, action: &'static str },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Constraint violation: {0}")]
    ConstraintViolation(Constraint),

    #[error("Verification unavailable: {0}")]
    VerificationUnavailable(String),

    #[error("Verification failed: {0}")]
    VerificationFailed(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl ShardsError {
    /// Only transient provider failures are worth retrying.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ShardsError::VerificationUnavailable(_))
    }
}
