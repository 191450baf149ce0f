//! # Valuation Crate
//!
//! Values the DCA portfolio by replaying the successful transaction ledger:
//! per-currency holdings and net invested quote are rebuilt from stored fill
//! data, positive holdings are priced at the current ticker, and the result
//! is cached behind a short TTL. A background recorder persists a snapshot
//! of the overview once a day, and the history endpoint annotates the
//! snapshot series with risk metrics.

use chrono::{DateTime, Duration, Utc};
use configuration::Settings;
use core_types::{TradeDirection, TransactionRecord};
use database::DbRepository;
use exchange::ExchangeApi;
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde::Serialize;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;
use tracing::{info, warn};

pub mod error;
pub mod metrics;

pub use error::ValuationError;

#[derive(Debug, Clone, Serialize)]
pub struct Overview {
    pub total_assets: Decimal,
    pub total_investment: Decimal,
    pub total_profit: Decimal,
    /// `total_profit / total_investment`, 0 with no investment.
    pub profit_rate: f64,
    pub annualized_return: f64,
    pub distribution: Vec<AssetSlice>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AssetSlice {
    pub currency: String,
    pub amount: Decimal,
    pub value: Decimal,
    pub percent: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct HistoryPoint {
    pub recorded_at: DateTime<Utc>,
    pub total_assets: Decimal,
    pub total_investment: Decimal,
    pub total_profit: Decimal,
}

#[derive(Debug, Clone, Serialize)]
pub struct RiskMetrics {
    pub max_drawdown: f64,
    pub volatility: f64,
    pub sharpe: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct History {
    pub points: Vec<HistoryPoint>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metrics: Option<RiskMetrics>,
}

struct CachedOverview {
    at: Instant,
    overview: Overview,
}

pub struct PortfolioValuator {
    settings: Arc<Settings>,
    repo: DbRepository,
    prices: Arc<dyn ExchangeApi>,
    cache: Mutex<Option<CachedOverview>>,
}

impl PortfolioValuator {
    /// `prices` only needs public market data; an unauthenticated client is
    /// enough.
    pub fn new(settings: Arc<Settings>, repo: DbRepository, prices: Arc<dyn ExchangeApi>) -> Self {
        Self {
            settings,
            repo,
            prices,
            cache: Mutex::new(None),
        }
    }

    /// The portfolio overview, served from cache inside the TTL unless
    /// `force_refresh` is set.
    pub async fn compute_overview(&self, force_refresh: bool) -> Result<Overview, ValuationError> {
        let ttl = std::time::Duration::from_secs(self.settings.valuation.cache_ttl_secs);
        {
            let cache = self.cache.lock().await;
            if !force_refresh {
                if let Some(cached) = cache.as_ref() {
                    if cached.at.elapsed() < ttl {
                        return Ok(cached.overview.clone());
                    }
                }
            }
        }

        let overview = self.compute_fresh().await?;
        *self.cache.lock().await = Some(CachedOverview {
            at: Instant::now(),
            overview: overview.clone(),
        });
        Ok(overview)
    }

    async fn compute_fresh(&self) -> Result<Overview, ValuationError> {
        let transactions = self.repo.success_transactions().await?;
        let positions = replay(&transactions);
        let quote = &self.settings.trading.quote_currency;

        let mut total_assets = Decimal::ZERO;
        let mut total_investment = Decimal::ZERO;
        let mut slices = Vec::new();

        for (currency, position) in &positions {
            total_investment += position.invested;
            if position.held <= Decimal::ZERO {
                continue;
            }
            let ticker = self
                .prices
                .get_ticker(&format!("{currency}-{quote}"))
                .await?;
            let value = position.held * ticker.last;
            total_assets += value;
            slices.push(AssetSlice {
                currency: currency.clone(),
                amount: position.held,
                value,
                percent: 0.0,
            });
        }

        if total_assets > Decimal::ZERO {
            for slice in &mut slices {
                slice.percent = (slice.value / total_assets)
                    .to_f64()
                    .unwrap_or_default()
                    * 100.0;
            }
        }
        slices.sort_by(|a, b| b.value.cmp(&a.value));

        let total_profit = total_assets - total_investment;
        let profit_rate = if total_investment > Decimal::ZERO {
            (total_profit / total_investment).to_f64().unwrap_or_default()
        } else {
            0.0
        };

        let days = transactions
            .first()
            .map(|t| (Utc::now() - t.executed_at).num_days().max(1))
            .unwrap_or(1) as f64;
        let annualized_return = if profit_rate > -1.0 {
            (1.0 + profit_rate).powf(365.0 / days) - 1.0
        } else {
            -1.0
        };

        Ok(Overview {
            total_assets,
            total_investment,
            total_profit,
            profit_rate,
            annualized_return,
            distribution: slices,
        })
    }

    /// Force-refreshes the overview and persists it as a snapshot.
    pub async fn record_snapshot(&self) -> Result<(), ValuationError> {
        let overview = self.compute_overview(true).await?;
        self.repo
            .insert_snapshot(
                overview.total_assets,
                overview.total_investment,
                overview.total_profit,
                &serde_json::to_value(&overview.distribution)?,
                Utc::now(),
            )
            .await?;
        info!(total_assets = %overview.total_assets, "asset snapshot recorded");
        Ok(())
    }

    /// Snapshot series over the trailing `days`, with risk metrics on the
    /// total-assets curve when requested.
    pub async fn history_with_metrics(
        &self,
        days: u32,
        include_metrics: bool,
    ) -> Result<History, ValuationError> {
        let cutoff = Utc::now() - Duration::days(days as i64);
        let snapshots = self.repo.snapshots_since(cutoff).await?;

        let points: Vec<HistoryPoint> = snapshots
            .into_iter()
            .map(|s| HistoryPoint {
                recorded_at: s.recorded_at,
                total_assets: s.total_assets,
                total_investment: s.total_investment,
                total_profit: s.total_profit,
            })
            .collect();

        let metrics = include_metrics.then(|| {
            let series: Vec<f64> = points
                .iter()
                .map(|p| p.total_assets.to_f64().unwrap_or_default())
                .collect();
            RiskMetrics {
                max_drawdown: metrics::max_drawdown(&series),
                volatility: metrics::volatility(&series),
                sharpe: metrics::sharpe(&series, self.settings.valuation.risk_free_rate),
            }
        });

        Ok(History { points, metrics })
    }
}

/// Records a snapshot at start and then once every 24 hours.
pub async fn run_snapshot_recorder(valuator: Arc<PortfolioValuator>) {
    loop {
        if let Err(e) = valuator.record_snapshot().await {
            warn!(error = %e, "snapshot recording failed");
        }
        tokio::time::sleep(std::time::Duration::from_secs(24 * 60 * 60)).await;
    }
}

#[derive(Debug, Default)]
struct Position {
    held: Decimal,
    invested: Decimal,
}

fn base_currency(symbol: &str) -> &str {
    symbol.split('-').next().unwrap_or(symbol)
}

fn detail_decimal(tx: &TransactionRecord, field: &str) -> Option<Decimal> {
    tx.detail
        .get(field)
        .and_then(|v| v.as_str())
        .and_then(|s| Decimal::from_str(s).ok())
        .filter(|d| *d > Decimal::ZERO)
}

/// Fill size recorded at execution time, with the recorded notional and
/// average price as the fallback for legacy rows.
fn recorded_size(tx: &TransactionRecord) -> Option<Decimal> {
    detail_decimal(tx, "fillSz")
        .or_else(|| detail_decimal(tx, "avgPx").map(|px| tx.amount / px))
}

/// Quote-currency value actually moved by the transaction. A balance-capped
/// sell fills less than the nominal amount, so the reconciled size and price
/// win when both were recorded.
fn recorded_notional(tx: &TransactionRecord) -> Decimal {
    match (detail_decimal(tx, "fillSz"), detail_decimal(tx, "avgPx")) {
        (Some(size), Some(price)) => size * price,
        _ => tx.amount,
    }
}

fn replay(transactions: &[TransactionRecord]) -> HashMap<String, Position> {
    let mut positions: HashMap<String, Position> = HashMap::new();
    for tx in transactions {
        let position = positions
            .entry(base_currency(&tx.symbol).to_string())
            .or_default();
        let size = recorded_size(tx);
        let notional = recorded_notional(tx);
        match tx.direction {
            TradeDirection::Buy => {
                position.invested += notional;
                if let Some(size) = size {
                    position.held += size;
                }
            }
            TradeDirection::Sell => {
                position.invested -= notional;
                if let Some(size) = size {
                    position.held -= size;
                }
            }
        }
    }
    positions
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::TimeZone;
    use core_types::{NewTransaction, TxStatus};
    use database::connect_in_memory;
    use exchange::{
        ExchangeError, Fill, MarketOrderRequest, OrderAck, OrderDetail, Ticker,
    };
    use serde_json::json;
    use std::sync::Mutex as StdMutex;

    struct FixedPrices {
        prices: StdMutex<HashMap<String, Decimal>>,
    }

    impl FixedPrices {
        fn new(pairs: &[(&str, i64)]) -> Arc<Self> {
            Arc::new(Self {
                prices: StdMutex::new(
                    pairs
                        .iter()
                        .map(|(s, p)| (s.to_string(), Decimal::from(*p)))
                        .collect(),
                ),
            })
        }

        fn set(&self, inst_id: &str, price: i64) {
            self.prices
                .lock()
                .unwrap()
                .insert(inst_id.to_string(), Decimal::from(price));
        }
    }

    #[async_trait]
    impl ExchangeApi for FixedPrices {
        async fn get_ticker(&self, inst_id: &str) -> Result<Ticker, ExchangeError> {
            let last = self
                .prices
                .lock()
                .unwrap()
                .get(inst_id)
                .copied()
                .ok_or_else(|| ExchangeError::InvalidData(format!("no ticker for {inst_id}")))?;
            Ok(Ticker {
                inst_id: inst_id.to_string(),
                last,
                vol_ccy_24h: Decimal::ZERO,
            })
        }

        async fn get_spot_tickers(&self) -> Result<Vec<Ticker>, ExchangeError> {
            Ok(Vec::new())
        }

        async fn get_balance(&self, _ccy: &str) -> Result<Decimal, ExchangeError> {
            Ok(Decimal::ZERO)
        }

        async fn place_market_order(
            &self,
            _order: &MarketOrderRequest,
        ) -> Result<OrderAck, ExchangeError> {
            Err(ExchangeError::MissingCredentials)
        }

        async fn get_order_detail(
            &self,
            _inst_id: &str,
            _ord_id: &str,
        ) -> Result<OrderDetail, ExchangeError> {
            Err(ExchangeError::MissingCredentials)
        }

        async fn get_order_fills(
            &self,
            _inst_id: &str,
            _ord_id: &str,
        ) -> Result<Vec<Fill>, ExchangeError> {
            Ok(Vec::new())
        }
    }

    async fn record(
        repo: &DbRepository,
        symbol: &str,
        amount: i64,
        direction: TradeDirection,
        fill_sz: &str,
        day: u32,
    ) {
        repo.insert_transaction(&NewTransaction {
            plan_id: 1,
            symbol: symbol.to_string(),
            amount: Decimal::from(amount),
            direction,
            status: TxStatus::Success,
            detail: json!({"ordId": "o", "fillSz": fill_sz, "avgPx": ""}),
            executed_at: Utc.with_ymd_and_hms(2024, 3, day, 10, 0, 0).unwrap(),
        })
        .await
        .unwrap();
    }

    async fn setup(prices: Arc<FixedPrices>) -> (PortfolioValuator, DbRepository) {
        let repo = DbRepository::new(connect_in_memory().await.unwrap());
        let valuator = PortfolioValuator::new(
            Arc::new(Settings::default()),
            repo.clone(),
            prices as Arc<dyn ExchangeApi>,
        );
        (valuator, repo)
    }

    #[tokio::test]
    async fn overview_replays_buys_and_sells() {
        let prices = FixedPrices::new(&[("BTC-USDT", 60000), ("ETH-USDT", 3000)]);
        let (valuator, repo) = setup(prices).await;

        record(&repo, "BTC-USDT", 100, TradeDirection::Buy, "0.002", 1).await;
        record(&repo, "BTC-USDT", 100, TradeDirection::Buy, "0.002", 2).await;
        record(&repo, "ETH-USDT", 90, TradeDirection::Buy, "0.03", 3).await;
        record(&repo, "ETH-USDT", 30, TradeDirection::Sell, "0.01", 4).await;

        let overview = valuator.compute_overview(false).await.unwrap();
        // BTC: 0.004 @ 60000 = 240; ETH: 0.02 @ 3000 = 60.
        assert_eq!(overview.total_assets, Decimal::from(300));
        // 200 + 90 - 30 invested.
        assert_eq!(overview.total_investment, Decimal::from(260));
        assert_eq!(overview.total_profit, Decimal::from(40));
        assert_eq!(overview.distribution.len(), 2);
        assert_eq!(overview.distribution[0].currency, "BTC");
        assert!((overview.distribution[0].percent - 80.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn overview_is_cached_until_forced() {
        let prices = FixedPrices::new(&[("BTC-USDT", 60000)]);
        let (valuator, repo) = setup(prices.clone()).await;
        record(&repo, "BTC-USDT", 100, TradeDirection::Buy, "0.002", 1).await;

        let first = valuator.compute_overview(false).await.unwrap();
        prices.set("BTC-USDT", 70000);

        // Inside the TTL the stale value is served.
        let cached = valuator.compute_overview(false).await.unwrap();
        assert_eq!(cached.total_assets, first.total_assets);

        let fresh = valuator.compute_overview(true).await.unwrap();
        assert_eq!(fresh.total_assets, Decimal::from(140));
    }

    #[tokio::test]
    async fn snapshot_and_history_round_trip() {
        let prices = FixedPrices::new(&[("BTC-USDT", 60000)]);
        let (valuator, repo) = setup(prices).await;
        record(&repo, "BTC-USDT", 100, TradeDirection::Buy, "0.002", 1).await;

        valuator.record_snapshot().await.unwrap();

        let history = valuator.history_with_metrics(30, true).await.unwrap();
        assert_eq!(history.points.len(), 1);
        assert_eq!(history.points[0].total_assets, Decimal::from(120));
        // One point: all metrics collapse to zero.
        let metrics = history.metrics.unwrap();
        assert_eq!(metrics.max_drawdown, 0.0);
        assert_eq!(metrics.volatility, 0.0);

        let without = valuator.history_with_metrics(30, false).await.unwrap();
        assert!(without.metrics.is_none());
    }

    #[tokio::test]
    async fn legacy_rows_fall_back_to_average_price() {
        let repo = DbRepository::new(connect_in_memory().await.unwrap());
        repo.insert_transaction(&NewTransaction {
            plan_id: 1,
            symbol: "BTC-USDT".to_string(),
            amount: Decimal::from(100),
            direction: TradeDirection::Buy,
            status: TxStatus::Success,
            detail: json!({"avgPx": "50000"}),
            executed_at: Utc::now(),
        })
        .await
        .unwrap();

        let transactions = repo.success_transactions().await.unwrap();
        let positions = replay(&transactions);
        assert_eq!(positions["BTC"].held, Decimal::new(2, 3)); // 100 / 50000
    }

    #[tokio::test]
    async fn capped_sell_reduces_investment_by_the_fill_notional() {
        let repo = DbRepository::new(connect_in_memory().await.unwrap());
        for (amount, direction, fill_sz) in [
            (200, TradeDirection::Buy, "4"),
            // Nominal 100, but the balance capped the fill at 1.5 @ 50 = 75.
            (100, TradeDirection::Sell, "1.5"),
        ] {
            repo.insert_transaction(&NewTransaction {
                plan_id: 1,
                symbol: "SOL-USDT".to_string(),
                amount: Decimal::from(amount),
                direction,
                status: TxStatus::Success,
                detail: json!({"ordId": "o", "fillSz": fill_sz, "avgPx": "50"}),
                executed_at: Utc::now(),
            })
            .await
            .unwrap();
        }

        let transactions = repo.success_transactions().await.unwrap();
        let positions = replay(&transactions);
        assert_eq!(positions["SOL"].invested, Decimal::from(125));
        assert_eq!(positions["SOL"].held, Decimal::new(25, 1));
    }
}
