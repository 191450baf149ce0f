use crate::error::DbError;
use chrono::{DateTime, Utc};
use core_types::{
    AssetSnapshot, NewTransaction, Plan, PlanFrequency, PlanStatus, TradeDirection,
    TransactionRecord, TxStatus,
};
use rust_decimal::Decimal;
use serde_json::Value as JsonValue;
use sqlx::{FromRow, QueryBuilder, Sqlite, SqlitePool};
use std::str::FromStr;

/// The `DbRepository` provides a high-level, application-specific interface
/// to the database. It encapsulates all SQL queries and data access logic.
#[derive(Debug, Clone)]
pub struct DbRepository {
    pool: SqlitePool,
}

/// The writable fields of a plan, used on creation.
#[derive(Debug, Clone)]
pub struct NewPlan {
    pub title: Option<String>,
    pub symbol: String,
    pub amount: Decimal,
    pub frequency: PlanFrequency,
    pub day_of_week: Option<u8>,
    pub month_days: Option<String>,
    pub fire_time: String,
    pub direction: TradeDirection,
}

/// Filters for the transaction history query. All fields are optional except
/// the row cap.
#[derive(Debug, Clone)]
pub struct TransactionFilter {
    pub symbol: Option<String>,
    pub direction: Option<TradeDirection>,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    pub limit: i64,
}

impl Default for TransactionFilter {
    fn default() -> Self {
        Self {
            symbol: None,
            direction: None,
            start: None,
            end: None,
            limit: 100,
        }
    }
}

/// The singleton credential row as stored: secrets encrypted, watchlist raw JSON.
#[derive(Debug, Clone, FromRow)]
pub struct StoredCredentials {
    pub api_key: String,
    pub secret_key: String,
    pub passphrase: String,
    pub watchlist: Option<String>,
    pub updated_at: DateTime<Utc>,
}

// SQLite has no decimal affinity, so monetary columns round-trip as TEXT and
// are parsed here at the repository boundary.
#[derive(Debug, FromRow)]
struct PlanRow {
    id: i64,
    title: Option<String>,
    symbol: String,
    amount: String,
    frequency: String,
    day_of_week: Option<i64>,
    month_days: Option<String>,
    fire_time: String,
    direction: String,
    status: String,
    last_schedule_edit: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
}

#[derive(Debug, FromRow)]
struct TransactionRow {
    id: i64,
    plan_id: i64,
    symbol: String,
    amount: String,
    direction: String,
    status: String,
    detail: String,
    executed_at: DateTime<Utc>,
}

#[derive(Debug, FromRow)]
struct SnapshotRow {
    id: i64,
    total_assets: String,
    total_investment: String,
    total_profit: String,
    distribution: String,
    recorded_at: DateTime<Utc>,
}

fn parse_decimal(raw: &str, column: &str) -> Result<Decimal, DbError> {
    Decimal::from_str(raw).map_err(|e| DbError::Decode(format!("{column}: {e}")))
}

impl TryFrom<PlanRow> for Plan {
    type Error = DbError;

    fn try_from(row: PlanRow) -> Result<Self, Self::Error> {
        Ok(Plan {
            id: row.id,
            title: row.title,
            symbol: row.symbol,
            amount: parse_decimal(&row.amount, "plans.amount")?,
            frequency: PlanFrequency::from_str(&row.frequency)
                .map_err(|e| DbError::Decode(e.to_string()))?,
            day_of_week: row.day_of_week.map(|d| d as u8),
            month_days: row.month_days,
            fire_time: row.fire_time,
            direction: TradeDirection::from_str(&row.direction)
                .map_err(|e| DbError::Decode(e.to_string()))?,
            status: PlanStatus::from_str(&row.status).map_err(|e| DbError::Decode(e.to_string()))?,
            last_schedule_edit: row.last_schedule_edit,
            created_at: row.created_at,
        })
    }
}

impl TryFrom<TransactionRow> for TransactionRecord {
    type Error = DbError;

    fn try_from(row: TransactionRow) -> Result<Self, Self::Error> {
        Ok(TransactionRecord {
            id: row.id,
            plan_id: row.plan_id,
            symbol: row.symbol,
            amount: parse_decimal(&row.amount, "transactions.amount")?,
            direction: TradeDirection::from_str(&row.direction)
                .map_err(|e| DbError::Decode(e.to_string()))?,
            status: TxStatus::from_str(&row.status).map_err(|e| DbError::Decode(e.to_string()))?,
            detail: serde_json::from_str(&row.detail)?,
            executed_at: row.executed_at,
        })
    }
}

impl TryFrom<SnapshotRow> for AssetSnapshot {
    type Error = DbError;

    fn try_from(row: SnapshotRow) -> Result<Self, Self::Error> {
        Ok(AssetSnapshot {
            id: row.id,
            total_assets: parse_decimal(&row.total_assets, "asset_snapshots.total_assets")?,
            total_investment: parse_decimal(
                &row.total_investment,
                "asset_snapshots.total_investment",
            )?,
            total_profit: parse_decimal(&row.total_profit, "asset_snapshots.total_profit")?,
            distribution: serde_json::from_str(&row.distribution)?,
            recorded_at: row.recorded_at,
        })
    }
}

impl DbRepository {
    /// Creates a new `DbRepository` with a shared database connection pool.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    // ----- Plans -----------------------------------------------------------

    pub async fn create_plan(&self, new: &NewPlan, now: DateTime<Utc>) -> Result<Plan, DbError> {
        let result = sqlx::query(
            r#"
            INSERT INTO plans (title, symbol, amount, frequency, day_of_week, month_days,
                               fire_time, direction, status, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, 'enabled', ?)
            "#,
        )
        .bind(&new.title)
        .bind(&new.symbol)
        .bind(new.amount.to_string())
        .bind(new.frequency.as_str())
        .bind(new.day_of_week.map(|d| d as i64))
        .bind(&new.month_days)
        .bind(&new.fire_time)
        .bind(new.direction.as_str())
        .bind(now)
        .execute(&self.pool)
        .await?;

        let id = result.last_insert_rowid();
        self.get_plan(id).await?.ok_or(DbError::NotFound)
    }

    pub async fn get_plan(&self, id: i64) -> Result<Option<Plan>, DbError> {
        let row = sqlx::query_as::<_, PlanRow>("SELECT * FROM plans WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(Plan::try_from).transpose()
    }

    pub async fn list_plans(&self) -> Result<Vec<Plan>, DbError> {
        let rows = sqlx::query_as::<_, PlanRow>("SELECT * FROM plans ORDER BY id ASC")
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(Plan::try_from).collect()
    }

    /// Writes back every mutable field of an existing plan, including
    /// `last_schedule_edit` (set by the caller when a time-affecting field
    /// changed) and `status`.
    pub async fn update_plan(&self, plan: &Plan) -> Result<(), DbError> {
        let result = sqlx::query(
            r#"
            UPDATE plans
            SET title = ?, symbol = ?, amount = ?, frequency = ?, day_of_week = ?,
                month_days = ?, fire_time = ?, direction = ?, status = ?,
                last_schedule_edit = ?
            WHERE id = ?
            "#,
        )
        .bind(&plan.title)
        .bind(&plan.symbol)
        .bind(plan.amount.to_string())
        .bind(plan.frequency.as_str())
        .bind(plan.day_of_week.map(|d| d as i64))
        .bind(&plan.month_days)
        .bind(&plan.fire_time)
        .bind(plan.direction.as_str())
        .bind(plan.status.as_str())
        .bind(plan.last_schedule_edit)
        .bind(plan.id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::NotFound);
        }
        Ok(())
    }

    pub async fn set_plan_status(&self, id: i64, status: PlanStatus) -> Result<(), DbError> {
        let result = sqlx::query("UPDATE plans SET status = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(DbError::NotFound);
        }
        Ok(())
    }

    /// Deletes a plan. Its transactions are kept on purpose: history outlives
    /// the plan that produced it.
    pub async fn delete_plan(&self, id: i64) -> Result<bool, DbError> {
        let result = sqlx::query("DELETE FROM plans WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    // ----- Transactions ----------------------------------------------------

    pub async fn insert_transaction(&self, tx: &NewTransaction) -> Result<i64, DbError> {
        let result = sqlx::query(
            r#"
            INSERT INTO transactions (plan_id, symbol, amount, direction, status, detail, executed_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(tx.plan_id)
        .bind(&tx.symbol)
        .bind(tx.amount.to_string())
        .bind(tx.direction.as_str())
        .bind(tx.status.as_str())
        .bind(tx.detail.to_string())
        .bind(tx.executed_at)
        .execute(&self.pool)
        .await?;
        Ok(result.last_insert_rowid())
    }

    /// Whether a successful transaction exists for the plan in
    /// `[from, until)`. The caller folds the `last_schedule_edit` cutoff into
    /// `from`, so this stays a plain range query.
    pub async fn success_exists_in_window(
        &self,
        plan_id: i64,
        from: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<bool, DbError> {
        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM transactions
            WHERE plan_id = ? AND status = 'success'
              AND executed_at >= ? AND executed_at < ?
            "#,
        )
        .bind(plan_id)
        .bind(from)
        .bind(until)
        .fetch_one(&self.pool)
        .await?;
        Ok(count > 0)
    }

    /// All successful transactions in `executed_at` order, the replay input
    /// for portfolio valuation.
    pub async fn success_transactions(&self) -> Result<Vec<TransactionRecord>, DbError> {
        let rows = sqlx::query_as::<_, TransactionRow>(
            "SELECT * FROM transactions WHERE status = 'success' ORDER BY executed_at ASC",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(TransactionRecord::try_from).collect()
    }

    /// History view with optional symbol/direction/date filters, newest first.
    pub async fn list_transactions(
        &self,
        filter: &TransactionFilter,
    ) -> Result<Vec<TransactionRecord>, DbError> {
        let mut builder: QueryBuilder<Sqlite> =
            QueryBuilder::new("SELECT * FROM transactions WHERE 1 = 1");

        if let Some(symbol) = &filter.symbol {
            builder.push(" AND symbol = ").push_bind(symbol);
        }
        if let Some(direction) = filter.direction {
            builder.push(" AND direction = ").push_bind(direction.as_str());
        }
        if let Some(start) = filter.start {
            builder.push(" AND executed_at >= ").push_bind(start);
        }
        if let Some(end) = filter.end {
            builder.push(" AND executed_at < ").push_bind(end);
        }
        builder
            .push(" ORDER BY executed_at DESC LIMIT ")
            .push_bind(filter.limit.clamp(1, 1000));

        let rows = builder
            .build_query_as::<TransactionRow>()
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(TransactionRecord::try_from).collect()
    }

    // ----- Asset snapshots -------------------------------------------------

    pub async fn insert_snapshot(
        &self,
        total_assets: Decimal,
        total_investment: Decimal,
        total_profit: Decimal,
        distribution: &JsonValue,
        recorded_at: DateTime<Utc>,
    ) -> Result<i64, DbError> {
        let result = sqlx::query(
            r#"
            INSERT INTO asset_snapshots (total_assets, total_investment, total_profit,
                                         distribution, recorded_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(total_assets.to_string())
        .bind(total_investment.to_string())
        .bind(total_profit.to_string())
        .bind(distribution.to_string())
        .bind(recorded_at)
        .execute(&self.pool)
        .await?;
        Ok(result.last_insert_rowid())
    }

    /// The snapshot series from `cutoff` to now, oldest first.
    pub async fn snapshots_since(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<AssetSnapshot>, DbError> {
        let rows = sqlx::query_as::<_, SnapshotRow>(
            "SELECT * FROM asset_snapshots WHERE recorded_at >= ? ORDER BY recorded_at ASC",
        )
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(AssetSnapshot::try_from).collect()
    }

    // ----- Credentials & watchlist -----------------------------------------

    /// Replaces the credential set wholesale. The watchlist is left untouched.
    pub async fn upsert_credentials(
        &self,
        api_key: &str,
        secret_key: &str,
        passphrase: &str,
        now: DateTime<Utc>,
    ) -> Result<(), DbError> {
        sqlx::query(
            r#"
            INSERT INTO credentials (id, api_key, secret_key, passphrase, updated_at)
            VALUES (1, ?, ?, ?, ?)
            ON CONFLICT (id) DO UPDATE SET
                api_key = excluded.api_key,
                secret_key = excluded.secret_key,
                passphrase = excluded.passphrase,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(api_key)
        .bind(secret_key)
        .bind(passphrase)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_credentials(&self) -> Result<Option<StoredCredentials>, DbError> {
        let row = sqlx::query_as::<_, StoredCredentials>(
            "SELECT api_key, secret_key, passphrase, watchlist, updated_at FROM credentials WHERE id = 1",
        )
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    pub async fn set_watchlist(
        &self,
        symbols: &[String],
        now: DateTime<Utc>,
    ) -> Result<(), DbError> {
        let json = serde_json::to_string(symbols)?;
        sqlx::query(
            r#"
            INSERT INTO credentials (id, watchlist, updated_at)
            VALUES (1, ?, ?)
            ON CONFLICT (id) DO UPDATE SET
                watchlist = excluded.watchlist,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(json)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// The configured watchlist; missing or malformed payloads read as empty.
    pub async fn get_watchlist(&self) -> Result<Vec<String>, DbError> {
        let stored = self.get_credentials().await?;
        Ok(stored
            .and_then(|c| c.watchlist)
            .and_then(|raw| serde_json::from_str(&raw).ok())
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::connect_in_memory;
    use chrono::TimeZone;
    use rust_decimal::Decimal;

    async fn repo() -> DbRepository {
        DbRepository::new(connect_in_memory().await.expect("in-memory db"))
    }

    fn sample_plan() -> NewPlan {
        NewPlan {
            title: Some("weekly btc".to_string()),
            symbol: "BTC-USDT".to_string(),
            amount: Decimal::new(50, 0),
            frequency: PlanFrequency::Weekly,
            day_of_week: Some(2),
            month_days: None,
            fire_time: "10:00".to_string(),
            direction: TradeDirection::Buy,
        }
    }

    #[tokio::test]
    async fn plan_roundtrip_preserves_fields() {
        let repo = repo().await;
        let now = Utc.with_ymd_and_hms(2024, 3, 1, 8, 0, 0).unwrap();

        let plan = repo.create_plan(&sample_plan(), now).await.unwrap();
        assert_eq!(plan.status, PlanStatus::Enabled);
        assert_eq!(plan.amount, Decimal::new(50, 0));
        assert_eq!(plan.day_of_week, Some(2));
        assert_eq!(plan.last_schedule_edit, None);

        let mut edited = plan.clone();
        edited.fire_time = "11:30".to_string();
        edited.last_schedule_edit = Some(now);
        repo.update_plan(&edited).await.unwrap();

        let reloaded = repo.get_plan(plan.id).await.unwrap().unwrap();
        assert_eq!(reloaded.fire_time, "11:30");
        assert_eq!(reloaded.last_schedule_edit, Some(now));
    }

    #[tokio::test]
    async fn success_window_query_excludes_failures_and_out_of_range() {
        let repo = repo().await;
        let day = Utc.with_ymd_and_hms(2024, 3, 5, 0, 0, 0).unwrap();

        for (status, at_hour) in [
            (TxStatus::Failed, 9),
            (TxStatus::Success, 10),
        ] {
            repo.insert_transaction(&NewTransaction {
                plan_id: 7,
                symbol: "BTC-USDT".to_string(),
                amount: Decimal::new(50, 0),
                direction: TradeDirection::Buy,
                status,
                detail: serde_json::json!({}),
                executed_at: Utc.with_ymd_and_hms(2024, 3, 5, at_hour, 0, 0).unwrap(),
            })
            .await
            .unwrap();
        }

        let next_day = day + chrono::Duration::days(1);
        assert!(repo.success_exists_in_window(7, day, next_day).await.unwrap());
        // An edit cutoff after the fill hides it.
        let cutoff = Utc.with_ymd_and_hms(2024, 3, 5, 11, 0, 0).unwrap();
        assert!(!repo.success_exists_in_window(7, cutoff, next_day).await.unwrap());
        // Other plans are unaffected.
        assert!(!repo.success_exists_in_window(8, day, next_day).await.unwrap());
    }

    #[tokio::test]
    async fn transaction_filters_apply() {
        let repo = repo().await;
        let base = Utc.with_ymd_and_hms(2024, 3, 5, 10, 0, 0).unwrap();

        for (symbol, direction, offset) in [
            ("BTC-USDT", TradeDirection::Buy, 0),
            ("ETH-USDT", TradeDirection::Sell, 1),
            ("BTC-USDT", TradeDirection::Buy, 2),
        ] {
            repo.insert_transaction(&NewTransaction {
                plan_id: 1,
                symbol: symbol.to_string(),
                amount: Decimal::new(25, 0),
                direction,
                status: TxStatus::Success,
                detail: serde_json::json!({"ordId": "x"}),
                executed_at: base + chrono::Duration::days(offset),
            })
            .await
            .unwrap();
        }

        let btc_only = repo
            .list_transactions(&TransactionFilter {
                symbol: Some("BTC-USDT".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(btc_only.len(), 2);
        // Newest first.
        assert!(btc_only[0].executed_at > btc_only[1].executed_at);

        let sells = repo
            .list_transactions(&TransactionFilter {
                direction: Some(TradeDirection::Sell),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(sells.len(), 1);
        assert_eq!(sells[0].symbol, "ETH-USDT");
    }

    #[tokio::test]
    async fn watchlist_upsert_keeps_credentials() {
        let repo = repo().await;
        let now = Utc::now();

        repo.upsert_credentials("enc-key", "enc-secret", "enc-pass", now)
            .await
            .unwrap();
        repo.set_watchlist(&["BTC-USDT".to_string(), "ETH-USDT".to_string()], now)
            .await
            .unwrap();

        let stored = repo.get_credentials().await.unwrap().unwrap();
        assert_eq!(stored.api_key, "enc-key");
        assert_eq!(repo.get_watchlist().await.unwrap().len(), 2);
    }
}
