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

use std::{collections::BTreeMap, str::FromStr, sync::Arc};

use alloy::primitives::{Address, U256};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use shard_rewards::{
    Category, CategoryAmounts, Constraint, Referral, ReferralStatus, Season, SeasonConfig,
    SeasonStatus, ShardBalance, ShardEarningHistory, Shards, ShardsError, VaultBreakdownEntry,
    VaultPosition,
};
use sqlx::{
    any::{AnyPoolOptions, AnyRow},
    AnyConnection, AnyPool, Row,
};
use uuid::Uuid;

use super::DbError;

pub type ShardsDbObj = Arc<dyn ShardsIndexerDb + Send + Sync>;

/// Convert a U256 to a zero-padded string for proper database sorting
/// U256 max value has 78 decimal digits
fn pad_u256(value: U256) -> String {
    format!("{:0>78}", value)
}

/// Convert a zero-padded string back to U256
fn unpad_u256(s: &str) -> Result<U256, DbError> {
    let trimmed = s.trim_start_matches('0');
    if trimmed.is_empty() {
        return Ok(U256::ZERO);
    }
    U256::from_str(trimmed).map_err(|_| DbError::BadRow(format!("Invalid U256 string: {}", s)))
}

fn fmt_address(address: Address) -> String {
    format!("{:#x}", address)
}

fn parse_address(s: &str) -> Result<Address, DbError> {
    Address::from_str(s).map_err(|e| DbError::BadRow(format!("Invalid address {s}: {e}")))
}

fn fmt_ts(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_ts(s: &str) -> Result<DateTime<Utc>, DbError> {
    DateTime::parse_from_rfc3339(s)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| DbError::BadRow(format!("Invalid timestamp {s}: {e}")))
}

fn parse_opt_ts(s: Option<String>) -> Result<Option<DateTime<Utc>>, DbError> {
    s.as_deref().map(parse_ts).transpose()
}

fn parse_date(s: &str) -> Result<NaiveDate, DbError> {
    NaiveDate::from_str(s).map_err(|e| DbError::BadRow(format!("Invalid date {s}: {e}")))
}

fn parse_uuid(s: &str) -> Result<Uuid, DbError> {
    Uuid::parse_str(s).map_err(|e| DbError::BadRow(format!("Invalid id {s}: {e}")))
}

/// Column holding the amount a ranking orders by. `None` ranks by total.
fn rank_column(category: Option<Category>) -> &'static str {
    match category {
        None => "total_shards",
        Some(Category::Staking) => "staking_shards",
        Some(Category::Social) => "social_shards",
        Some(Category::Developer) => "developer_shards",
        Some(Category::Referral) => "referral_shards",
    }
}

const BALANCE_COLUMNS: &str = "id, wallet_address, season_id, staking_shards, social_shards, \
    developer_shards, referral_shards, total_shards, last_calculated_at, created_at, updated_at";

const SEASON_COLUMNS: &str = "id, name, chain, start_date, end_date, status, config, \
    total_participants, total_shards_issued, created_at, updated_at";

const POSITION_COLUMNS: &str = "id, wallet_address, vault_address, asset_symbol, chain, balance, \
    shares, usd_value, lock_weeks, snapshot_date, block_number, observed_at, price_updated_at, \
    created_at";

const HISTORY_COLUMNS: &str = "id, wallet_address, season_id, date, staking_shards, \
    social_shards, developer_shards, referral_shards, daily_total, vault_breakdown, created_at";

const REFERRAL_COLUMNS: &str = "id, referrer_address, referee_address, season_id, status, \
    activation_date, referee_multiplier_expires, total_shards_earned, created_at, updated_at";

fn amounts_from_row(row: &AnyRow) -> Result<CategoryAmounts, DbError> {
    Ok(CategoryAmounts {
        staking: row.try_get::<i64, _>("staking_shards")?,
        social: row.try_get::<i64, _>("social_shards")?,
        developer: row.try_get::<i64, _>("developer_shards")?,
        referral: row.try_get::<i64, _>("referral_shards")?,
    })
}

fn balance_from_row(row: &AnyRow) -> Result<ShardBalance, DbError> {
    Ok(ShardBalance {
        id: parse_uuid(&row.try_get::<String, _>("id")?)?,
        wallet_address: parse_address(&row.try_get::<String, _>("wallet_address")?)?,
        season_id: parse_uuid(&row.try_get::<String, _>("season_id")?)?,
        shards: amounts_from_row(row)?,
        total_shards: row.try_get::<i64, _>("total_shards")?,
        last_calculated_at: parse_ts(&row.try_get::<String, _>("last_calculated_at")?)?,
        created_at: parse_ts(&row.try_get::<String, _>("created_at")?)?,
        updated_at: parse_ts(&row.try_get::<String, _>("updated_at")?)?,
    })
}

fn season_from_row(row: &AnyRow) -> Result<Season, DbError> {
    let config: SeasonConfig = serde_json::from_str(&row.try_get::<String, _>("config")?)
        .map_err(|e| DbError::BadRow(format!("Invalid season config: {e}")))?;
    Ok(Season {
        id: parse_uuid(&row.try_get::<String, _>("id")?)?,
        name: row.try_get("name")?,
        chain: row.try_get("chain")?,
        start_date: parse_ts(&row.try_get::<String, _>("start_date")?)?,
        end_date: parse_opt_ts(row.try_get::<Option<String>, _>("end_date")?)?,
        status: SeasonStatus::from_str(&row.try_get::<String, _>("status")?)?,
        config,
        total_participants: row.try_get::<i64, _>("total_participants")? as u64,
        total_shards_issued: row.try_get::<i64, _>("total_shards_issued")?,
        created_at: parse_ts(&row.try_get::<String, _>("created_at")?)?,
        updated_at: parse_ts(&row.try_get::<String, _>("updated_at")?)?,
    })
}

fn position_from_row(row: &AnyRow) -> Result<VaultPosition, DbError> {
    Ok(VaultPosition {
        id: parse_uuid(&row.try_get::<String, _>("id")?)?,
        wallet_address: parse_address(&row.try_get::<String, _>("wallet_address")?)?,
        vault_address: parse_address(&row.try_get::<String, _>("vault_address")?)?,
        asset_symbol: row.try_get("asset_symbol")?,
        chain: row.try_get("chain")?,
        balance: unpad_u256(&row.try_get::<String, _>("balance")?)?,
        shares: unpad_u256(&row.try_get::<String, _>("shares")?)?,
        usd_value: row.try_get::<f64, _>("usd_value")?,
        lock_weeks: row.try_get::<i64, _>("lock_weeks")? as u32,
        snapshot_date: parse_date(&row.try_get::<String, _>("snapshot_date")?)?,
        block_number: row.try_get::<i64, _>("block_number")? as u64,
        observed_at: parse_ts(&row.try_get::<String, _>("observed_at")?)?,
        price_updated_at: parse_ts(&row.try_get::<String, _>("price_updated_at")?)?,
        created_at: parse_ts(&row.try_get::<String, _>("created_at")?)?,
    })
}

fn history_from_row(row: &AnyRow) -> Result<ShardEarningHistory, DbError> {
    let vault_breakdown: BTreeMap<String, VaultBreakdownEntry> =
        serde_json::from_str(&row.try_get::<String, _>("vault_breakdown")?)
            .map_err(|e| DbError::BadRow(format!("Invalid vault breakdown: {e}")))?;
    Ok(ShardEarningHistory {
        id: parse_uuid(&row.try_get::<String, _>("id")?)?,
        wallet_address: parse_address(&row.try_get::<String, _>("wallet_address")?)?,
        season_id: parse_uuid(&row.try_get::<String, _>("season_id")?)?,
        date: parse_date(&row.try_get::<String, _>("date")?)?,
        earned: amounts_from_row(row)?,
        daily_total: row.try_get::<i64, _>("daily_total")?,
        vault_breakdown,
        created_at: parse_ts(&row.try_get::<String, _>("created_at")?)?,
    })
}

fn referral_from_row(row: &AnyRow) -> Result<Referral, DbError> {
    Ok(Referral {
        id: parse_uuid(&row.try_get::<String, _>("id")?)?,
        referrer_address: parse_address(&row.try_get::<String, _>("referrer_address")?)?,
        referee_address: parse_address(&row.try_get::<String, _>("referee_address")?)?,
        season_id: parse_uuid(&row.try_get::<String, _>("season_id")?)?,
        status: ReferralStatus::from_str(&row.try_get::<String, _>("status")?)?,
        activation_date: parse_opt_ts(row.try_get::<Option<String>, _>("activation_date")?)?,
        referee_multiplier_expires: parse_opt_ts(
            row.try_get::<Option<String>, _>("referee_multiplier_expires")?,
        )?,
        total_shards_earned: row.try_get::<i64, _>("total_shards_earned")?,
        created_at: parse_ts(&row.try_get::<String, _>("created_at")?)?,
        updated_at: parse_ts(&row.try_get::<String, _>("updated_at")?)?,
    })
}

/// Participants and issued shards across one season's balances.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SeasonTotals {
    pub participants: u64,
    pub total_shards: Shards,
    pub by_category: CategoryAmounts,
}

#[async_trait]
pub trait ShardsIndexerDb {
    /// Insert a newly created season
    async fn insert_season(&self, season: &Season) -> Result<(), DbError>;

    async fn get_season(&self, id: Uuid) -> Result<Option<Season>, DbError>;

    /// List seasons, newest start date first, optionally restricted to one chain
    async fn list_seasons(&self, chain: Option<&str>) -> Result<Vec<Season>, DbError>;

    /// The active season on a chain, if any
    async fn get_active_season(&self, chain: &str) -> Result<Option<Season>, DbError>;

    /// Persist a season value produced by a transition, only if the stored status still equals
    /// `expected_status`. Returns false when the stored status had moved on.
    ///
    /// Fails with [Constraint::ActiveSeasonExists] when the write would leave two active
    /// seasons on one chain.
    async fn update_season(
        &self,
        season: &Season,
        expected_status: SeasonStatus,
    ) -> Result<bool, DbError>;

    /// Atomically apply a signed delta to one category, creating the balance on first write
    async fn add_shards(
        &self,
        wallet: Address,
        season_id: Uuid,
        category: Category,
        amount: Shards,
    ) -> Result<ShardBalance, DbError>;

    /// Record `claim_key` and apply the delta in one transaction. Returns `None` without
    /// touching the balance when the claim was already recorded.
    async fn award(
        &self,
        claim_key: &str,
        wallet: Address,
        season_id: Uuid,
        category: Category,
        amount: Shards,
    ) -> Result<Option<ShardBalance>, DbError>;

    async fn is_rewarded(&self, claim_key: &str) -> Result<bool, DbError>;

    async fn get_balance(
        &self,
        wallet: Address,
        season_id: Uuid,
    ) -> Result<Option<ShardBalance>, DbError>;

    /// Rebuild the stored total of one balance from its categories
    async fn recalculate_total(
        &self,
        wallet: Address,
        season_id: Uuid,
    ) -> Result<ShardBalance, DbError>;

    /// Rebuild every drifted total in a season. Returns the number of rows repaired.
    async fn recalculate_season_totals(&self, season_id: Uuid) -> Result<u64, DbError>;

    /// 1-based rank; `None` when the wallet has no balance in the season
    async fn get_wallet_rank(
        &self,
        wallet: Address,
        season_id: Uuid,
        category: Option<Category>,
    ) -> Result<Option<u64>, DbError>;

    /// A leaderboard page plus the season's total number of balances
    async fn find_top_by_season(
        &self,
        season_id: Uuid,
        limit: u64,
        offset: u64,
        category: Option<Category>,
    ) -> Result<(Vec<ShardBalance>, u64), DbError>;

    async fn get_season_totals(&self, season_id: Uuid) -> Result<SeasonTotals, DbError>;

    /// Upsert a snapshot keyed by (wallet, vault, day).
    /// Later writes for a day replace earlier ones.
    async fn upsert_vault_position(&self, position: &VaultPosition)
        -> Result<VaultPosition, DbError>;

    /// Positions snapshotted on a given day with pagination
    async fn get_vault_positions_by_date(
        &self,
        date: NaiveDate,
        offset: u64,
        limit: u64,
    ) -> Result<Vec<VaultPosition>, DbError>;

    /// Snapshot history for a wallet, oldest first
    async fn get_vault_position_history(
        &self,
        wallet: Address,
        vault: Option<Address>,
        from: Option<NaiveDate>,
        to: Option<NaiveDate>,
    ) -> Result<Vec<VaultPosition>, DbError>;

    /// Insert one daily row. Returns false when the day was already recorded.
    async fn insert_earning_history(&self, row: &ShardEarningHistory) -> Result<bool, DbError>;

    /// Sum of every row recorded strictly before `before`
    async fn get_recorded_totals(
        &self,
        wallet: Address,
        season_id: Uuid,
        before: NaiveDate,
    ) -> Result<CategoryAmounts, DbError>;

    /// History rows for a wallet and season, oldest first
    async fn get_earning_history(
        &self,
        wallet: Address,
        season_id: Uuid,
        from: Option<NaiveDate>,
        to: Option<NaiveDate>,
    ) -> Result<Vec<ShardEarningHistory>, DbError>;

    /// Most recent recorded day for a wallet and season
    async fn get_latest_history_date(
        &self,
        wallet: Address,
        season_id: Uuid,
    ) -> Result<Option<NaiveDate>, DbError>;

    /// Last day the rollover completed for a season
    async fn get_rollover_cursor(&self, season_id: Uuid) -> Result<Option<NaiveDate>, DbError>;

    /// Moves the rollover cursor forward to `date`. Never moves it back.
    async fn advance_rollover_cursor(
        &self,
        season_id: Uuid,
        date: NaiveDate,
    ) -> Result<(), DbError>;

    /// Fails with [Constraint::AlreadyReferred] when the referee already has a referral
    /// in the season
    async fn insert_referral(&self, referral: &Referral) -> Result<(), DbError>;

    async fn get_referral(
        &self,
        referee: Address,
        season_id: Uuid,
    ) -> Result<Option<Referral>, DbError>;

    /// Persist an activated referral if it is still pending. Returns false otherwise.
    async fn activate_referral(&self, referral: &Referral) -> Result<bool, DbError>;

    /// Credit the referrer's referral bucket and the referral's running total together,
    /// once per `claim_key`.
    async fn credit_referral(
        &self,
        claim_key: &str,
        referral: &Referral,
        amount: Shards,
    ) -> Result<Option<ShardBalance>, DbError>;

    async fn list_referrals_by_referrer(
        &self,
        referrer: Address,
        season_id: Uuid,
    ) -> Result<Vec<Referral>, DbError>;
}

pub struct ShardsDb {
    pool: AnyPool,
}

impl ShardsDb {
    pub async fn new(database_url: &str) -> Result<Self, DbError> {
        sqlx::any::install_default_drivers();
        let pool = AnyPoolOptions::new().max_connections(20).connect(database_url).await?;

        // Run migrations
        sqlx::migrate!("./migrations").run(&pool).await?;

        Ok(Self { pool })
    }

    /// Upsert `amounts` into a balance on an open connection. The total is rebuilt from the
    /// stored categories plus the deltas, never carried forward.
    async fn apply_delta(
        conn: &mut AnyConnection,
        wallet: Address,
        season_id: Uuid,
        amounts: CategoryAmounts,
    ) -> Result<ShardBalance, DbError> {
        let now = fmt_ts(&Utc::now());
        let wallet = fmt_address(wallet);
        let season = season_id.to_string();

        sqlx::query(
            r#"INSERT INTO shard_balances
            (id, wallet_address, season_id, staking_shards, social_shards, developer_shards,
             referral_shards, total_shards, last_calculated_at, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            ON CONFLICT (wallet_address, season_id)
            DO UPDATE SET
                staking_shards = shard_balances.staking_shards + EXCLUDED.staking_shards,
                social_shards = shard_balances.social_shards + EXCLUDED.social_shards,
                developer_shards = shard_balances.developer_shards + EXCLUDED.developer_shards,
                referral_shards = shard_balances.referral_shards + EXCLUDED.referral_shards,
                total_shards = shard_balances.staking_shards + shard_balances.social_shards
                    + shard_balances.developer_shards + shard_balances.referral_shards
                    + EXCLUDED.total_shards,
                last_calculated_at = EXCLUDED.last_calculated_at,
                updated_at = EXCLUDED.updated_at"#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(&wallet)
        .bind(&season)
        .bind(amounts.staking)
        .bind(amounts.social)
        .bind(amounts.developer)
        .bind(amounts.referral)
        .bind(amounts.total()?)
        .bind(&now)
        .bind(&now)
        .bind(&now)
        .execute(&mut *conn)
        .await?;

        let row = sqlx::query(&format!(
            "SELECT {BALANCE_COLUMNS} FROM shard_balances WHERE wallet_address = $1 AND season_id = $2"
        ))
        .bind(&wallet)
        .bind(&season)
        .fetch_one(&mut *conn)
        .await?;

        balance_from_row(&row)
    }

    /// Record a claim key on an open connection. Returns false if it already existed.
    async fn record_claim(
        conn: &mut AnyConnection,
        claim_key: &str,
        wallet: Address,
        season_id: Uuid,
        category: Category,
        amount: Shards,
    ) -> Result<bool, DbError> {
        let result = sqlx::query(
            r#"INSERT INTO rewarded_contributions
            (claim_key, wallet_address, season_id, category, amount, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (claim_key) DO NOTHING"#,
        )
        .bind(claim_key)
        .bind(fmt_address(wallet))
        .bind(season_id.to_string())
        .bind(category.as_str())
        .bind(amount)
        .bind(fmt_ts(&Utc::now()))
        .execute(&mut *conn)
        .await?;

        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl ShardsIndexerDb for ShardsDb {
    async fn insert_season(&self, season: &Season) -> Result<(), DbError> {
        let config = serde_json::to_string(&season.config)
            .map_err(|e| DbError::BadRow(format!("Unserializable season config: {e}")))?;

        sqlx::query(&format!(
            "INSERT INTO seasons ({SEASON_COLUMNS})
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)"
        ))
        .bind(season.id.to_string())
        .bind(&season.name)
        .bind(&season.chain)
        .bind(fmt_ts(&season.start_date))
        .bind(season.end_date.as_ref().map(fmt_ts))
        .bind(season.status.as_str())
        .bind(config)
        .bind(season.total_participants as i64)
        .bind(season.total_shards_issued)
        .bind(fmt_ts(&season.created_at))
        .bind(fmt_ts(&season.updated_at))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_season(&self, id: Uuid) -> Result<Option<Season>, DbError> {
        let row = sqlx::query(&format!("SELECT {SEASON_COLUMNS} FROM seasons WHERE id = $1"))
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(season_from_row).transpose()
    }

    async fn list_seasons(&self, chain: Option<&str>) -> Result<Vec<Season>, DbError> {
        let rows = match chain {
            Some(chain) => {
                sqlx::query(&format!(
                    "SELECT {SEASON_COLUMNS} FROM seasons WHERE chain = $1 ORDER BY start_date DESC"
                ))
                .bind(chain.to_ascii_lowercase())
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query(&format!(
                    "SELECT {SEASON_COLUMNS} FROM seasons ORDER BY start_date DESC"
                ))
                .fetch_all(&self.pool)
                .await?
            }
        };

        rows.iter().map(season_from_row).collect()
    }

    async fn get_active_season(&self, chain: &str) -> Result<Option<Season>, DbError> {
        let row = sqlx::query(&format!(
            "SELECT {SEASON_COLUMNS} FROM seasons WHERE chain = $1 AND status = 'active'"
        ))
        .bind(chain.to_ascii_lowercase())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(season_from_row).transpose()
    }

    async fn update_season(
        &self,
        season: &Season,
        expected_status: SeasonStatus,
    ) -> Result<bool, DbError> {
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            r#"UPDATE seasons SET
                end_date = $1,
                status = $2,
                total_participants = $3,
                total_shards_issued = $4,
                updated_at = $5
            WHERE id = $6 AND status = $7"#,
        )
        .bind(season.end_date.as_ref().map(fmt_ts))
        .bind(season.status.as_str())
        .bind(season.total_participants as i64)
        .bind(season.total_shards_issued)
        .bind(fmt_ts(&season.updated_at))
        .bind(season.id.to_string())
        .bind(expected_status.as_str())
        .execute(&mut *tx)
        .await;

        let result = match result {
            Ok(result) => result,
            Err(sqlx::Error::Database(err)) if err.is_unique_violation() => {
                return Err(ShardsError::ConstraintViolation(Constraint::ActiveSeasonExists).into())
            }
            Err(err) => return Err(err.into()),
        };

        if result.rows_affected() == 0 {
            return Ok(false);
        }

        if season.status == SeasonStatus::Active {
            let active: i64 = sqlx::query(
                "SELECT COUNT(*) AS active FROM seasons WHERE chain = $1 AND status = 'active'",
            )
            .bind(&season.chain)
            .fetch_one(&mut *tx)
            .await?
            .try_get("active")?;

            if active > 1 {
                tx.rollback().await?;
                return Err(ShardsError::ConstraintViolation(Constraint::ActiveSeasonExists).into());
            }
        }

        tx.commit().await?;
        Ok(true)
    }

    async fn add_shards(
        &self,
        wallet: Address,
        season_id: Uuid,
        category: Category,
        amount: Shards,
    ) -> Result<ShardBalance, DbError> {
        let mut tx = self.pool.begin().await?;
        let balance =
            Self::apply_delta(&mut tx, wallet, season_id, CategoryAmounts::single(category, amount))
                .await?;
        tx.commit().await?;
        Ok(balance)
    }

    async fn award(
        &self,
        claim_key: &str,
        wallet: Address,
        season_id: Uuid,
        category: Category,
        amount: Shards,
    ) -> Result<Option<ShardBalance>, DbError> {
        let mut tx = self.pool.begin().await?;

        if !Self::record_claim(&mut tx, claim_key, wallet, season_id, category, amount).await? {
            tx.rollback().await?;
            return Ok(None);
        }

        let balance =
            Self::apply_delta(&mut tx, wallet, season_id, CategoryAmounts::single(category, amount))
                .await?;
        tx.commit().await?;
        Ok(Some(balance))
    }

    async fn is_rewarded(&self, claim_key: &str) -> Result<bool, DbError> {
        let row = sqlx::query("SELECT claim_key FROM rewarded_contributions WHERE claim_key = $1")
            .bind(claim_key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }

    async fn get_balance(
        &self,
        wallet: Address,
        season_id: Uuid,
    ) -> Result<Option<ShardBalance>, DbError> {
        let row = sqlx::query(&format!(
            "SELECT {BALANCE_COLUMNS} FROM shard_balances WHERE wallet_address = $1 AND season_id = $2"
        ))
        .bind(fmt_address(wallet))
        .bind(season_id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(balance_from_row).transpose()
    }

    async fn recalculate_total(
        &self,
        wallet: Address,
        season_id: Uuid,
    ) -> Result<ShardBalance, DbError> {
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            r#"UPDATE shard_balances SET
                total_shards = staking_shards + social_shards + developer_shards + referral_shards,
                last_calculated_at = $1,
                updated_at = $2
            WHERE wallet_address = $3 AND season_id = $4"#,
        )
        .bind(fmt_ts(&Utc::now()))
        .bind(fmt_ts(&Utc::now()))
        .bind(fmt_address(wallet))
        .bind(season_id.to_string())
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(ShardsError::NotFound(format!(
                "balance for {wallet:#x} in season {season_id}"
            ))
            .into());
        }

        let row = sqlx::query(&format!(
            "SELECT {BALANCE_COLUMNS} FROM shard_balances WHERE wallet_address = $1 AND season_id = $2"
        ))
        .bind(fmt_address(wallet))
        .bind(season_id.to_string())
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        balance_from_row(&row)
    }

    async fn recalculate_season_totals(&self, season_id: Uuid) -> Result<u64, DbError> {
        let now = fmt_ts(&Utc::now());
        let result = sqlx::query(
            r#"UPDATE shard_balances SET
                total_shards = staking_shards + social_shards + developer_shards + referral_shards,
                last_calculated_at = $1,
                updated_at = $2
            WHERE season_id = $3
              AND total_shards <> staking_shards + social_shards + developer_shards + referral_shards"#,
        )
        .bind(&now)
        .bind(&now)
        .bind(season_id.to_string())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn get_wallet_rank(
        &self,
        wallet: Address,
        season_id: Uuid,
        category: Option<Category>,
    ) -> Result<Option<u64>, DbError> {
        let Some(balance) = self.get_balance(wallet, season_id).await? else {
            return Ok(None);
        };
        let amount = match category {
            Some(category) => balance.category(category),
            None => balance.total_shards,
        };

        // Equal amounts are ordered by wallet address, matching the leaderboard order
        let column = rank_column(category);
        let ahead: i64 = sqlx::query(&format!(
            "SELECT COUNT(*) AS ahead FROM shard_balances
             WHERE season_id = $1 AND ({column} > $2 OR ({column} = $3 AND wallet_address < $4))"
        ))
        .bind(season_id.to_string())
        .bind(amount)
        .bind(amount)
        .bind(fmt_address(wallet))
        .fetch_one(&self.pool)
        .await?
        .try_get("ahead")?;

        Ok(Some(ahead as u64 + 1))
    }

    async fn find_top_by_season(
        &self,
        season_id: Uuid,
        limit: u64,
        offset: u64,
        category: Option<Category>,
    ) -> Result<(Vec<ShardBalance>, u64), DbError> {
        let column = rank_column(category);
        let rows = sqlx::query(&format!(
            "SELECT {BALANCE_COLUMNS} FROM shard_balances
             WHERE season_id = $1
             ORDER BY {column} DESC, wallet_address ASC
             LIMIT $2 OFFSET $3"
        ))
        .bind(season_id.to_string())
        .bind(limit as i64)
        .bind(offset as i64)
        .fetch_all(&self.pool)
        .await?;

        let total: i64 =
            sqlx::query("SELECT COUNT(*) AS total FROM shard_balances WHERE season_id = $1")
                .bind(season_id.to_string())
                .fetch_one(&self.pool)
                .await?
                .try_get("total")?;

        let balances = rows.iter().map(balance_from_row).collect::<Result<Vec<_>, _>>()?;
        Ok((balances, total as u64))
    }

    async fn get_season_totals(&self, season_id: Uuid) -> Result<SeasonTotals, DbError> {
        let row = sqlx::query(
            r#"SELECT
                COUNT(*) AS participants,
                CAST(COALESCE(SUM(total_shards), 0) AS BIGINT) AS total_shards,
                CAST(COALESCE(SUM(staking_shards), 0) AS BIGINT) AS staking_shards,
                CAST(COALESCE(SUM(social_shards), 0) AS BIGINT) AS social_shards,
                CAST(COALESCE(SUM(developer_shards), 0) AS BIGINT) AS developer_shards,
                CAST(COALESCE(SUM(referral_shards), 0) AS BIGINT) AS referral_shards
            FROM shard_balances WHERE season_id = $1"#,
        )
        .bind(season_id.to_string())
        .fetch_one(&self.pool)
        .await?;

        Ok(SeasonTotals {
            participants: row.try_get::<i64, _>("participants")? as u64,
            total_shards: row.try_get::<i64, _>("total_shards")?,
            by_category: amounts_from_row(&row)?,
        })
    }

    async fn upsert_vault_position(
        &self,
        position: &VaultPosition,
    ) -> Result<VaultPosition, DbError> {
        let mut tx = self.pool.begin().await?;

        // The id and created_at of the first write of the day are kept
        sqlx::query(&format!(
            r#"INSERT INTO vault_positions ({POSITION_COLUMNS})
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            ON CONFLICT (wallet_address, vault_address, snapshot_date)
            DO UPDATE SET
                asset_symbol = EXCLUDED.asset_symbol,
                chain = EXCLUDED.chain,
                balance = EXCLUDED.balance,
                shares = EXCLUDED.shares,
                usd_value = EXCLUDED.usd_value,
                lock_weeks = EXCLUDED.lock_weeks,
                block_number = EXCLUDED.block_number,
                observed_at = EXCLUDED.observed_at,
                price_updated_at = EXCLUDED.price_updated_at"#
        ))
        .bind(position.id.to_string())
        .bind(fmt_address(position.wallet_address))
        .bind(fmt_address(position.vault_address))
        .bind(&position.asset_symbol)
        .bind(&position.chain)
        .bind(pad_u256(position.balance))
        .bind(pad_u256(position.shares))
        .bind(position.usd_value)
        .bind(position.lock_weeks as i64)
        .bind(position.snapshot_date.to_string())
        .bind(position.block_number as i64)
        .bind(fmt_ts(&position.observed_at))
        .bind(fmt_ts(&position.price_updated_at))
        .bind(fmt_ts(&position.created_at))
        .execute(&mut *tx)
        .await?;

        let row = sqlx::query(&format!(
            "SELECT {POSITION_COLUMNS} FROM vault_positions
             WHERE wallet_address = $1 AND vault_address = $2 AND snapshot_date = $3"
        ))
        .bind(fmt_address(position.wallet_address))
        .bind(fmt_address(position.vault_address))
        .bind(position.snapshot_date.to_string())
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        position_from_row(&row)
    }

    async fn get_vault_positions_by_date(
        &self,
        date: NaiveDate,
        offset: u64,
        limit: u64,
    ) -> Result<Vec<VaultPosition>, DbError> {
        let rows = sqlx::query(&format!(
            "SELECT {POSITION_COLUMNS} FROM vault_positions
             WHERE snapshot_date = $1
             ORDER BY wallet_address ASC, vault_address ASC
             LIMIT $2 OFFSET $3"
        ))
        .bind(date.to_string())
        .bind(limit as i64)
        .bind(offset as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(position_from_row).collect()
    }

    async fn get_vault_position_history(
        &self,
        wallet: Address,
        vault: Option<Address>,
        from: Option<NaiveDate>,
        to: Option<NaiveDate>,
    ) -> Result<Vec<VaultPosition>, DbError> {
        let mut query = format!(
            "SELECT {POSITION_COLUMNS} FROM vault_positions WHERE wallet_address = $1"
        );
        let mut param_idx = 2;
        if vault.is_some() {
            query.push_str(&format!(" AND vault_address = ${param_idx}"));
            param_idx += 1;
        }
        if from.is_some() {
            query.push_str(&format!(" AND snapshot_date >= ${param_idx}"));
            param_idx += 1;
        }
        if to.is_some() {
            query.push_str(&format!(" AND snapshot_date <= ${param_idx}"));
        }
        query.push_str(" ORDER BY snapshot_date ASC, vault_address ASC");

        let mut q = sqlx::query(&query).bind(fmt_address(wallet));
        if let Some(vault) = vault {
            q = q.bind(fmt_address(vault));
        }
        if let Some(from) = from {
            q = q.bind(from.to_string());
        }
        if let Some(to) = to {
            q = q.bind(to.to_string());
        }

        let rows = q.fetch_all(&self.pool).await?;
        rows.iter().map(position_from_row).collect()
    }

    async fn insert_earning_history(&self, row: &ShardEarningHistory) -> Result<bool, DbError> {
        let breakdown = serde_json::to_string(&row.vault_breakdown)
            .map_err(|e| DbError::BadRow(format!("Unserializable vault breakdown: {e}")))?;

        let result = sqlx::query(&format!(
            r#"INSERT INTO shard_earning_history ({HISTORY_COLUMNS})
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            ON CONFLICT (wallet_address, date, season_id) DO NOTHING"#
        ))
        .bind(row.id.to_string())
        .bind(fmt_address(row.wallet_address))
        .bind(row.season_id.to_string())
        .bind(row.date.to_string())
        .bind(row.earned.staking)
        .bind(row.earned.social)
        .bind(row.earned.developer)
        .bind(row.earned.referral)
        .bind(row.daily_total)
        .bind(breakdown)
        .bind(fmt_ts(&row.created_at))
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn get_recorded_totals(
        &self,
        wallet: Address,
        season_id: Uuid,
        before: NaiveDate,
    ) -> Result<CategoryAmounts, DbError> {
        let row = sqlx::query(
            r#"SELECT
                CAST(COALESCE(SUM(staking_shards), 0) AS BIGINT) AS staking_shards,
                CAST(COALESCE(SUM(social_shards), 0) AS BIGINT) AS social_shards,
                CAST(COALESCE(SUM(developer_shards), 0) AS BIGINT) AS developer_shards,
                CAST(COALESCE(SUM(referral_shards), 0) AS BIGINT) AS referral_shards
            FROM shard_earning_history
            WHERE wallet_address = $1 AND season_id = $2 AND date < $3"#,
        )
        .bind(fmt_address(wallet))
        .bind(season_id.to_string())
        .bind(before.to_string())
        .fetch_one(&self.pool)
        .await?;

        amounts_from_row(&row)
    }

    async fn get_earning_history(
        &self,
        wallet: Address,
        season_id: Uuid,
        from: Option<NaiveDate>,
        to: Option<NaiveDate>,
    ) -> Result<Vec<ShardEarningHistory>, DbError> {
        let mut query = format!(
            "SELECT {HISTORY_COLUMNS} FROM shard_earning_history
             WHERE wallet_address = $1 AND season_id = $2"
        );
        let mut param_idx = 3;
        if from.is_some() {
            query.push_str(&format!(" AND date >= ${param_idx}"));
            param_idx += 1;
        }
        if to.is_some() {
            query.push_str(&format!(" AND date <= ${param_idx}"));
        }
        query.push_str(" ORDER BY date ASC");

        let mut q = sqlx::query(&query).bind(fmt_address(wallet)).bind(season_id.to_string());
        if let Some(from) = from {
            q = q.bind(from.to_string());
        }
        if let Some(to) = to {
            q = q.bind(to.to_string());
        }

        let rows = q.fetch_all(&self.pool).await?;
        rows.iter().map(history_from_row).collect()
    }

    async fn get_latest_history_date(
        &self,
        wallet: Address,
        season_id: Uuid,
    ) -> Result<Option<NaiveDate>, DbError> {
        let row = sqlx::query(
            "SELECT MAX(date) AS latest FROM shard_earning_history
             WHERE wallet_address = $1 AND season_id = $2",
        )
        .bind(fmt_address(wallet))
        .bind(season_id.to_string())
        .fetch_one(&self.pool)
        .await?;

        row.try_get::<Option<String>, _>("latest")?.as_deref().map(parse_date).transpose()
    }

    async fn get_rollover_cursor(&self, season_id: Uuid) -> Result<Option<NaiveDate>, DbError> {
        let row = sqlx::query("SELECT last_date FROM season_rollovers WHERE season_id = $1")
            .bind(season_id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        row.map(|row| parse_date(&row.try_get::<String, _>("last_date")?)).transpose()
    }

    async fn advance_rollover_cursor(
        &self,
        season_id: Uuid,
        date: NaiveDate,
    ) -> Result<(), DbError> {
        sqlx::query(
            r#"INSERT INTO season_rollovers (season_id, last_date, updated_at)
            VALUES ($1, $2, $3)
            ON CONFLICT (season_id) DO UPDATE SET
                last_date = excluded.last_date,
                updated_at = excluded.updated_at
            WHERE season_rollovers.last_date < excluded.last_date"#,
        )
        .bind(season_id.to_string())
        .bind(date.to_string())
        .bind(fmt_ts(&Utc::now()))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn insert_referral(&self, referral: &Referral) -> Result<(), DbError> {
        if referral.referrer_address == referral.referee_address {
            return Err(ShardsError::ConstraintViolation(Constraint::SelfReferral).into());
        }

        let result = sqlx::query(&format!(
            r#"INSERT INTO referrals ({REFERRAL_COLUMNS})
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT (referee_address, season_id) DO NOTHING"#
        ))
        .bind(referral.id.to_string())
        .bind(fmt_address(referral.referrer_address))
        .bind(fmt_address(referral.referee_address))
        .bind(referral.season_id.to_string())
        .bind(referral.status.as_str())
        .bind(referral.activation_date.as_ref().map(fmt_ts))
        .bind(referral.referee_multiplier_expires.as_ref().map(fmt_ts))
        .bind(referral.total_shards_earned)
        .bind(fmt_ts(&referral.created_at))
        .bind(fmt_ts(&referral.updated_at))
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(ShardsError::ConstraintViolation(Constraint::AlreadyReferred).into());
        }
        Ok(())
    }

    async fn get_referral(
        &self,
        referee: Address,
        season_id: Uuid,
    ) -> Result<Option<Referral>, DbError> {
        let row = sqlx::query(&format!(
            "SELECT {REFERRAL_COLUMNS} FROM referrals WHERE referee_address = $1 AND season_id = $2"
        ))
        .bind(fmt_address(referee))
        .bind(season_id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(referral_from_row).transpose()
    }

    async fn activate_referral(&self, referral: &Referral) -> Result<bool, DbError> {
        let result = sqlx::query(
            r#"UPDATE referrals SET
                status = $1,
                activation_date = $2,
                referee_multiplier_expires = $3,
                updated_at = $4
            WHERE id = $5 AND status = 'pending'"#,
        )
        .bind(referral.status.as_str())
        .bind(referral.activation_date.as_ref().map(fmt_ts))
        .bind(referral.referee_multiplier_expires.as_ref().map(fmt_ts))
        .bind(fmt_ts(&referral.updated_at))
        .bind(referral.id.to_string())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn credit_referral(
        &self,
        claim_key: &str,
        referral: &Referral,
        amount: Shards,
    ) -> Result<Option<ShardBalance>, DbError> {
        let mut tx = self.pool.begin().await?;

        if !Self::record_claim(
            &mut tx,
            claim_key,
            referral.referrer_address,
            referral.season_id,
            Category::Referral,
            amount,
        )
        .await?
        {
            tx.rollback().await?;
            return Ok(None);
        }

        let balance = Self::apply_delta(
            &mut tx,
            referral.referrer_address,
            referral.season_id,
            CategoryAmounts::single(Category::Referral, amount),
        )
        .await?;

        sqlx::query(
            r#"UPDATE referrals SET
                total_shards_earned = total_shards_earned + $1,
                updated_at = $2
            WHERE id = $3"#,
        )
        .bind(amount)
        .bind(fmt_ts(&Utc::now()))
        .bind(referral.id.to_string())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(Some(balance))
    }

    async fn list_referrals_by_referrer(
        &self,
        referrer: Address,
        season_id: Uuid,
    ) -> Result<Vec<Referral>, DbError> {
        let rows = sqlx::query(&format!(
            "SELECT {REFERRAL_COLUMNS} FROM referrals
             WHERE referrer_address = $1 AND season_id = $2
             ORDER BY created_at ASC"
        ))
        .bind(fmt_address(referrer))
        .bind(season_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(referral_from_row).collect()
    }
}
