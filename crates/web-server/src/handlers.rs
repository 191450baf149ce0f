use crate::{AppState, error::AppError};
use axum::{
    Json,
    extract::{Path, Query, State},
};
use chrono::{NaiveDate, NaiveTime, Utc};
use core_types::{
    ExecutionOrigin, ExecutionRequest, Plan, PlanFrequency, PlanStatus, TradeDirection,
};
use database::{NewPlan, TransactionFilter};
use executor::ExecutionOutcome;
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::{Value, json};
use std::sync::Arc;

// ----- Plans ---------------------------------------------------------------

/// Request body shared by plan creation and full-replace updates.
#[derive(Debug, Deserialize)]
pub struct PlanBody {
    pub title: Option<String>,
    pub symbol: String,
    pub amount: Decimal,
    pub frequency: PlanFrequency,
    pub day_of_week: Option<u8>,
    pub month_days: Option<Vec<u32>>,
    pub fire_time: String,
    pub direction: TradeDirection,
}

impl PlanBody {
    fn validate(&self) -> Result<(), AppError> {
        scheduler::parse_fire_time(&self.fire_time)?;
        if self.amount <= Decimal::ZERO {
            return Err(AppError::BadRequest("amount must be positive".to_string()));
        }
        if !self.symbol.contains('-') {
            return Err(AppError::BadRequest(format!(
                "symbol '{}' is not an instrument id like BTC-USDT",
                self.symbol
            )));
        }
        // Monthly plans with no usable month_days schedule day 1, so only
        // weekly plans carry a required companion field.
        match self.frequency {
            PlanFrequency::Weekly if self.day_of_week.map_or(true, |d| d > 6) => Err(
                AppError::BadRequest("weekly plans need day_of_week 0-6".to_string()),
            ),
            _ => Ok(()),
        }
    }

    fn normalized_month_days(&self) -> Vec<u32> {
        let mut days: Vec<u32> = self
            .month_days
            .iter()
            .flatten()
            .copied()
            .filter(|d| (1..=31).contains(d))
            .collect();
        days.sort_unstable();
        days.dedup();
        days
    }

    fn month_days_json(&self) -> Option<String> {
        self.month_days
            .as_ref()
            .map(|_| serde_json::to_string(&self.normalized_month_days()).unwrap_or_else(|_| "[]".to_string()))
    }

    /// Whether applying this body to `plan` moves any scheduled fire instant.
    fn changes_schedule(&self, plan: &Plan) -> bool {
        self.frequency != plan.frequency
            || self.fire_time != plan.fire_time
            || self.day_of_week != plan.day_of_week
            || self.normalized_month_days() != plan.parsed_month_days()
    }
}

/// # POST /api/plans
pub async fn create_plan(
    State(state): State<Arc<AppState>>,
    Json(body): Json<PlanBody>,
) -> Result<Json<Plan>, AppError> {
    body.validate()?;
    let new = NewPlan {
        title: body.title.clone(),
        symbol: body.symbol.clone(),
        amount: body.amount,
        frequency: body.frequency,
        day_of_week: body.day_of_week,
        month_days: body.month_days_json(),
        fire_time: body.fire_time.clone(),
        direction: body.direction,
    };
    let plan = state.repo.create_plan(&new, Utc::now()).await?;
    state.scheduler.sync(&plan).await?;
    Ok(Json(plan))
}

/// # GET /api/plans
pub async fn list_plans(State(state): State<Arc<AppState>>) -> Result<Json<Vec<Plan>>, AppError> {
    Ok(Json(state.repo.list_plans().await?))
}

/// # PUT /api/plans/:id
///
/// Full-replace update. When a time-affecting field changes, the plan's
/// `last_schedule_edit` is stamped so the narrowed idempotency window lets
/// the new time fire once more today.
pub async fn update_plan(
    Path(id): Path<i64>,
    State(state): State<Arc<AppState>>,
    Json(body): Json<PlanBody>,
) -> Result<Json<Plan>, AppError> {
    body.validate()?;
    let existing = state
        .repo
        .get_plan(id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("plan {id} not found")))?;

    let mut updated = Plan {
        id: existing.id,
        title: body.title.clone(),
        symbol: body.symbol.clone(),
        amount: body.amount,
        frequency: body.frequency,
        day_of_week: body.day_of_week,
        month_days: body.month_days_json(),
        fire_time: body.fire_time.clone(),
        direction: body.direction,
        status: existing.status,
        last_schedule_edit: existing.last_schedule_edit,
        created_at: existing.created_at,
    };
    if body.changes_schedule(&existing) {
        updated.last_schedule_edit = Some(Utc::now());
    }

    state.repo.update_plan(&updated).await?;
    state.scheduler.sync(&updated).await?;
    Ok(Json(updated))
}

#[derive(Debug, Deserialize)]
pub struct StatusBody {
    pub status: PlanStatus,
}

/// # PUT /api/plans/:id/status
pub async fn set_plan_status(
    Path(id): Path<i64>,
    State(state): State<Arc<AppState>>,
    Json(body): Json<StatusBody>,
) -> Result<Json<Plan>, AppError> {
    state.repo.set_plan_status(id, body.status).await?;
    let plan = state
        .repo
        .get_plan(id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("plan {id} not found")))?;
    state.scheduler.sync(&plan).await?;
    Ok(Json(plan))
}

/// # DELETE /api/plans/:id
///
/// The plan's transactions are kept; only the plan and its timers go.
pub async fn delete_plan(
    Path(id): Path<i64>,
    State(state): State<Arc<AppState>>,
) -> Result<Json<Value>, AppError> {
    if !state.repo.delete_plan(id).await? {
        return Err(AppError::NotFound(format!("plan {id} not found")));
    }
    state.scheduler.cancel(id).await;
    Ok(Json(json!({ "deleted": id })))
}

/// # POST /api/plans/:id/execute
///
/// Manual trigger, executed inline under the global execution lock.
pub async fn execute_plan(
    Path(id): Path<i64>,
    State(state): State<Arc<AppState>>,
) -> Result<Json<Value>, AppError> {
    let outcome = state
        .executor
        .execute(&ExecutionRequest {
            plan_id: id,
            scheduled_for: Utc::now(),
            origin: ExecutionOrigin::Manual,
        })
        .await?;

    let body = match &outcome {
        ExecutionOutcome::Executed {
            transaction_id,
            fill,
        } => json!({
            "outcome": outcome.label(),
            "transaction_id": transaction_id,
            "fill_size": fill.size.to_string(),
            "fill_price": fill.price.to_string(),
            "estimated": fill.is_estimated(),
        }),
        ExecutionOutcome::Failed { reason } => json!({
            "outcome": outcome.label(),
            "error": reason,
        }),
        _ => json!({ "outcome": outcome.label() }),
    };
    Ok(Json(body))
}

// ----- Transactions --------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct TransactionsQuery {
    pub symbol: Option<String>,
    pub direction: Option<TradeDirection>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    #[serde(default = "default_tx_limit")]
    pub limit: i64,
}

fn default_tx_limit() -> i64 {
    100
}

/// # GET /api/transactions
pub async fn list_transactions(
    State(state): State<Arc<AppState>>,
    Query(query): Query<TransactionsQuery>,
) -> Result<Json<Vec<core_types::TransactionRecord>>, AppError> {
    let filter = TransactionFilter {
        symbol: query.symbol,
        direction: query.direction,
        start: query
            .start_date
            .map(|d| d.and_time(NaiveTime::MIN).and_utc()),
        // end_date is inclusive; the repository filter is exclusive.
        end: query.end_date.map(|d| {
            d.succ_opt()
                .unwrap_or(d)
                .and_time(NaiveTime::MIN)
                .and_utc()
        }),
        limit: query.limit,
    };
    Ok(Json(state.repo.list_transactions(&filter).await?))
}

// ----- Assets --------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct OverviewQuery {
    #[serde(default)]
    pub force_refresh: bool,
}

/// # GET /api/assets/overview
pub async fn asset_overview(
    State(state): State<Arc<AppState>>,
    Query(query): Query<OverviewQuery>,
) -> Result<Json<valuation::Overview>, AppError> {
    Ok(Json(
        state.valuator.compute_overview(query.force_refresh).await?,
    ))
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    #[serde(default = "default_history_days")]
    pub days: u32,
    #[serde(default)]
    pub include_metrics: bool,
}

fn default_history_days() -> u32 {
    30
}

/// # GET /api/assets/history
pub async fn asset_history(
    State(state): State<Arc<AppState>>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<valuation::History>, AppError> {
    Ok(Json(
        state
            .valuator
            .history_with_metrics(query.days, query.include_metrics)
            .await?,
    ))
}

// ----- Credentials ---------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct CredentialsBody {
    pub api_key: String,
    pub secret_key: String,
    pub passphrase: String,
}

/// # PUT /api/credentials
///
/// Replaces the credential set wholesale; secrets are encrypted before they
/// touch the database.
pub async fn put_credentials(
    State(state): State<Arc<AppState>>,
    Json(body): Json<CredentialsBody>,
) -> Result<Json<Value>, AppError> {
    let api_key = state.vault.encrypt(&body.api_key)?;
    let secret_key = state.vault.encrypt(&body.secret_key)?;
    let passphrase = state.vault.encrypt(&body.passphrase)?;
    state
        .repo
        .upsert_credentials(&api_key, &secret_key, &passphrase, Utc::now())
        .await?;
    Ok(Json(json!({ "status": "saved" })))
}

/// # GET /api/credentials
///
/// Never returns secrets; the API key comes back masked.
pub async fn get_credentials(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Value>, AppError> {
    let stored = state.repo.get_credentials().await?;
    let Some(stored) = stored.filter(|s| !s.api_key.is_empty()) else {
        return Ok(Json(json!({ "configured": false })));
    };
    let api_key = state.vault.decrypt(&stored.api_key)?;
    Ok(Json(json!({
        "configured": true,
        "api_key": mask(&api_key),
        "updated_at": stored.updated_at,
    })))
}

fn mask(secret: &str) -> String {
    let chars: Vec<char> = secret.chars().collect();
    if chars.len() > 4 {
        let tail: String = chars[chars.len() - 4..].iter().collect();
        format!("****{tail}")
    } else {
        "****".to_string()
    }
}

/// # POST /api/credentials/test
///
/// Probes the account balance endpoint with the stored credentials.
pub async fn test_credentials(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Value>, AppError> {
    let client = state.factory.client().await?;
    let quote = &state.settings.trading.quote_currency;
    let balance = client.get_balance(quote).await?;
    Ok(Json(json!({
        "ok": true,
        "currency": quote,
        "balance": balance.to_string(),
    })))
}

// ----- Watchlist & market data ---------------------------------------------

/// # GET /api/watchlist
pub async fn get_watchlist(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<String>>, AppError> {
    Ok(Json(state.repo.get_watchlist().await?))
}

#[derive(Debug, Deserialize)]
pub struct WatchlistBody {
    pub symbols: Vec<String>,
}

/// # PUT /api/watchlist
pub async fn put_watchlist(
    State(state): State<Arc<AppState>>,
    Json(body): Json<WatchlistBody>,
) -> Result<Json<Vec<String>>, AppError> {
    state.repo.set_watchlist(&body.symbols, Utc::now()).await?;
    Ok(Json(body.symbols))
}

#[derive(Debug, Deserialize)]
pub struct PopularQuery {
    #[serde(default = "default_popular_limit")]
    pub limit: usize,
}

fn default_popular_limit() -> usize {
    20
}

/// # GET /api/symbols/popular
///
/// Quote-currency spot pairs ranked by 24h volume, from public market data.
pub async fn popular_symbols(
    State(state): State<Arc<AppState>>,
    Query(query): Query<PopularQuery>,
) -> Result<Json<Vec<Value>>, AppError> {
    let suffix = format!("-{}", state.settings.trading.quote_currency);
    let mut tickers: Vec<_> = state
        .public_client
        .get_spot_tickers()
        .await?
        .into_iter()
        .filter(|t| t.inst_id.ends_with(&suffix))
        .collect();
    tickers.sort_by(|a, b| b.vol_ccy_24h.cmp(&a.vol_ccy_24h));
    tickers.truncate(query.limit);

    Ok(Json(
        tickers
            .into_iter()
            .map(|t| {
                json!({
                    "symbol": t.inst_id,
                    "last": t.last.to_string(),
                    "vol_ccy_24h": t.vol_ccy_24h.to_string(),
                })
            })
            .collect(),
    ))
}

#[cfg(test)]
mod tests {
    use super::mask;

    #[test]
    fn mask_keeps_only_the_last_four_characters() {
        assert_eq!(mask("abcdef123456"), "****3456");
        assert_eq!(mask("key"), "****");
        // Multi-byte characters must not split.
        assert_eq!(mask("clé-secrète-日本語キー"), "****本語キー");
    }
}
