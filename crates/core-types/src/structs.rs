use crate::enums::{ExecutionOrigin, PlanFrequency, PlanStatus, TradeDirection, TxStatus};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// A recurring purchase/sale plan.
///
/// `amount` is always denominated in the quote currency: the exact notional
/// for buys, and a notional cap for sells (the executable size is derived at
/// fire time from price and available balance).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    pub id: i64,
    pub title: Option<String>,
    /// Base-quote instrument id, e.g. "BTC-USDT".
    pub symbol: String,
    pub amount: Decimal,
    pub frequency: PlanFrequency,
    /// 0 = Monday .. 6 = Sunday. Required iff `frequency` is weekly.
    pub day_of_week: Option<u8>,
    /// Raw JSON array of days-of-month (1-31). Only meaningful for monthly
    /// plans; kept opaque here so a malformed payload degrades to an empty
    /// set at read time instead of poisoning every plan query.
    pub month_days: Option<String>,
    /// Local time of day, "HH:MM", in the configured timezone.
    pub fire_time: String,
    pub direction: TradeDirection,
    pub status: PlanStatus,
    /// Set whenever a time-affecting field changes. Transactions recorded
    /// before this instant no longer count against the edited schedule's
    /// same-day occurrence.
    pub last_schedule_edit: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Plan {
    /// The base currency of the plan's instrument ("BTC" for "BTC-USDT").
    pub fn base_currency(&self) -> &str {
        self.symbol.split('-').next().unwrap_or(&self.symbol)
    }

    /// Lenient view of `month_days`: parsed, clamped to 1-31, sorted and
    /// deduplicated. Malformed or missing payloads yield an empty set.
    pub fn parsed_month_days(&self) -> Vec<u32> {
        let mut days: Vec<u32> = self
            .month_days
            .as_deref()
            .and_then(|raw| serde_json::from_str::<Vec<u32>>(raw).ok())
            .unwrap_or_default()
            .into_iter()
            .filter(|d| (1..=31).contains(d))
            .collect();
        days.sort_unstable();
        days.dedup();
        days
    }
}

/// One recorded trade attempt. Append-only; `plan_id` is a weak reference
/// that survives plan deletion for audit purposes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionRecord {
    pub id: i64,
    pub plan_id: i64,
    pub symbol: String,
    pub amount: Decimal,
    pub direction: TradeDirection,
    pub status: TxStatus,
    /// Raw outcome payload: order id and reconciled fill for successes,
    /// structured failure reason otherwise.
    pub detail: JsonValue,
    pub executed_at: DateTime<Utc>,
}

/// The fields of a transaction the executor produces; the store assigns the id.
#[derive(Debug, Clone)]
pub struct NewTransaction {
    pub plan_id: i64,
    pub symbol: String,
    pub amount: Decimal,
    pub direction: TradeDirection,
    pub status: TxStatus,
    pub detail: JsonValue,
    pub executed_at: DateTime<Utc>,
}

/// A once-daily point of the portfolio valuation time series.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssetSnapshot {
    pub id: i64,
    pub total_assets: Decimal,
    pub total_investment: Decimal,
    pub total_profit: Decimal,
    /// JSON array of per-currency shares, as produced by the valuation engine.
    pub distribution: JsonValue,
    pub recorded_at: DateTime<Utc>,
}

/// The decrypted exchange credential set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Credentials {
    pub api_key: String,
    pub secret_key: String,
    pub passphrase: String,
}

impl Credentials {
    /// A credential set is usable only when all three secrets are present.
    pub fn is_complete(&self) -> bool {
        !self.api_key.is_empty() && !self.secret_key.is_empty() && !self.passphrase.is_empty()
    }
}

/// A unit of work for the trade executor. The scheduled instant, not the time
/// the request happens to be processed, defines the occurrence identity used
/// by the idempotency check.
#[derive(Debug, Clone)]
pub struct ExecutionRequest {
    pub plan_id: i64,
    pub scheduled_for: DateTime<Utc>,
    pub origin: ExecutionOrigin,
}
