//! # Executor Crate
//!
//! Carries out a single DCA occurrence end to end: load the plan, enforce
//! the at-most-once window, size and place the market order, reconcile the
//! fill, and record the outcome as a transaction row.
//!
//! All executions in the process are serialized through one async lock, so
//! a manual trigger can never interleave with a scheduled one. The
//! idempotency window is the calendar day of the occurrence's scheduled
//! instant in the configured timezone; a schedule edit later that day narrows
//! the window to start at the edit, letting the new time fire once more.
//! Only *successful* transactions suppress re-execution.

use async_trait::async_trait;
use chrono::offset::LocalResult;
use chrono::{DateTime, Duration, NaiveDate, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use configuration::Settings;
use core_types::{
    ExecutionRequest, NewTransaction, Plan, PlanStatus, TradeDirection, TxStatus,
};
use database::DbRepository;
use exchange::{ClientFactory, ExchangeApi, ExchangeError, MarketOrderRequest, OkxClient};
use rust_decimal::Decimal;
use std::sync::Arc;
use tokio::sync::{Mutex, mpsc};
use tracing::{error, info, warn};
use vault::CredentialVault;

pub mod error;
pub mod fill;

pub use error::ExecutorError;
pub use fill::{FillOutcome, FillSource};

/// The production [`ClientFactory`]: reads the encrypted credential row and
/// decrypts it through the vault for each execution.
pub struct LiveClientFactory {
    settings: Arc<Settings>,
    repo: DbRepository,
    vault: Arc<CredentialVault>,
}

impl LiveClientFactory {
    pub fn new(settings: Arc<Settings>, repo: DbRepository, vault: Arc<CredentialVault>) -> Self {
        Self {
            settings,
            repo,
            vault,
        }
    }
}

#[async_trait]
impl ClientFactory for LiveClientFactory {
    async fn client(&self) -> Result<Arc<dyn ExchangeApi>, ExchangeError> {
        let stored = self
            .repo
            .get_credentials()
            .await
            .map_err(|e| ExchangeError::InvalidData(format!("credential lookup failed: {e}")))?
            .ok_or(ExchangeError::MissingCredentials)?;
        let creds = self
            .vault
            .decrypt_credentials(&stored.api_key, &stored.secret_key, &stored.passphrase)
            .map_err(|e| ExchangeError::InvalidData(format!("credential decryption failed: {e}")))?;
        if !creds.is_complete() {
            return Err(ExchangeError::MissingCredentials);
        }
        Ok(Arc::new(OkxClient::new(&self.settings.exchange, creds)))
    }
}

/// What became of one execution request.
#[derive(Debug)]
pub enum ExecutionOutcome {
    Executed {
        transaction_id: i64,
        fill: FillOutcome,
    },
    /// A success already exists in the occurrence's window.
    SkippedDuplicate,
    /// The plan is disabled.
    SkippedDisabled,
    /// No complete credential set is configured. Logged only; configuration
    /// problems are not trade outcomes and leave no transaction row.
    SkippedNoCredentials,
    /// The trade failed; a failed transaction row was recorded.
    Failed { reason: String },
}

impl ExecutionOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            ExecutionOutcome::Executed { .. } => "executed",
            ExecutionOutcome::SkippedDuplicate => "skipped_duplicate",
            ExecutionOutcome::SkippedDisabled => "skipped_disabled",
            ExecutionOutcome::SkippedNoCredentials => "skipped_no_credentials",
            ExecutionOutcome::Failed { .. } => "failed",
        }
    }
}

pub struct TradeExecutor {
    settings: Arc<Settings>,
    tz: Tz,
    repo: DbRepository,
    factory: Arc<dyn ClientFactory>,
    lock: Mutex<()>,
}

impl TradeExecutor {
    pub fn new(
        settings: Arc<Settings>,
        repo: DbRepository,
        factory: Arc<dyn ClientFactory>,
    ) -> Result<Self, ExecutorError> {
        let tz: Tz = settings
            .schedule
            .timezone
            .parse()
            .map_err(|_| ExecutorError::InvalidTimezone(settings.schedule.timezone.clone()))?;
        Ok(Self {
            settings,
            tz,
            repo,
            factory,
            lock: Mutex::new(()),
        })
    }

    /// Runs one occurrence under the global execution lock.
    ///
    /// Errors reaching the exchange or sizing the order do not bubble out of
    /// this method: they are recorded as a failed transaction and reported
    /// as [`ExecutionOutcome::Failed`]. Only infrastructure errors (database,
    /// missing plan) become `Err`.
    pub async fn execute(
        &self,
        request: &ExecutionRequest,
    ) -> Result<ExecutionOutcome, ExecutorError> {
        let _guard = self.lock.lock().await;

        let plan = self
            .repo
            .get_plan(request.plan_id)
            .await?
            .ok_or(ExecutorError::PlanNotFound(request.plan_id))?;

        if plan.status != PlanStatus::Enabled {
            info!(plan_id = plan.id, origin = ?request.origin, "plan disabled, skipping occurrence");
            return Ok(ExecutionOutcome::SkippedDisabled);
        }

        // Every origin passes the window check; a manual run inside an
        // already-satisfied occurrence reports the duplicate instead of
        // trading twice.
        let (start, end) = self.day_bounds(request.scheduled_for);
        let from = match plan.last_schedule_edit {
            Some(edit) if edit > start && edit < end => edit,
            _ => start,
        };
        if self.repo.success_exists_in_window(plan.id, from, end).await? {
            info!(plan_id = plan.id, scheduled_for = %request.scheduled_for, "occurrence already executed");
            return Ok(ExecutionOutcome::SkippedDuplicate);
        }

        match self.run_trade(&plan, request).await {
            Ok((transaction_id, fill)) => {
                info!(
                    plan_id = plan.id,
                    transaction_id,
                    size = %fill.size,
                    price = %fill.price,
                    source = fill.source.as_str(),
                    "occurrence executed"
                );
                Ok(ExecutionOutcome::Executed {
                    transaction_id,
                    fill,
                })
            }
            // Incomplete credentials are an operational problem, not a trade
            // outcome: no order was attempted, so nothing is recorded.
            Err(ExecutorError::Exchange(ExchangeError::MissingCredentials)) => {
                warn!(plan_id = plan.id, "no complete credential set, skipping occurrence");
                Ok(ExecutionOutcome::SkippedNoCredentials)
            }
            Err(e) => {
                warn!(plan_id = plan.id, error = %e, "trade failed, recording failure");
                let reason = e.to_string();
                self.repo
                    .insert_transaction(&NewTransaction {
                        plan_id: plan.id,
                        symbol: plan.symbol.clone(),
                        amount: plan.amount,
                        direction: plan.direction,
                        status: TxStatus::Failed,
                        detail: serde_json::json!({
                            "error": reason,
                            "origin": request.origin,
                            "scheduledFor": request.scheduled_for,
                        }),
                        executed_at: Utc::now(),
                    })
                    .await?;
                Ok(ExecutionOutcome::Failed { reason })
            }
        }
    }

    async fn run_trade(
        &self,
        plan: &Plan,
        request: &ExecutionRequest,
    ) -> Result<(i64, FillOutcome), ExecutorError> {
        let client = self.factory.client().await?;
        let ticker = client.get_ticker(&plan.symbol).await?;

        let size = match plan.direction {
            // Market buys are sized in the quote currency directly.
            TradeDirection::Buy => plan.amount,
            TradeDirection::Sell => {
                if ticker.last <= Decimal::ZERO {
                    return Err(ExecutorError::InsufficientBalance(plan.symbol.clone()));
                }
                let balance = client.get_balance(plan.base_currency()).await?;
                let wanted = plan.amount / ticker.last;
                let size = wanted
                    .min(balance)
                    .trunc_with_scale(self.settings.size_precision(&plan.symbol));
                if size <= Decimal::ZERO {
                    return Err(ExecutorError::InsufficientBalance(plan.symbol.clone()));
                }
                size
            }
        };

        let ack = client
            .place_market_order(&MarketOrderRequest {
                inst_id: plan.symbol.clone(),
                side: plan.direction,
                size,
            })
            .await?;

        let fill = self
            .reconcile(client.as_ref(), &plan.symbol, &ack.ord_id)
            .await
            .or_else(|| match plan.direction {
                TradeDirection::Buy => fill::estimate(plan.amount, ticker.last),
                TradeDirection::Sell => Some(FillOutcome {
                    size,
                    price: ticker.last,
                    source: FillSource::Estimated,
                }),
            })
            .unwrap_or(FillOutcome {
                size: Decimal::ZERO,
                price: ticker.last,
                source: FillSource::Estimated,
            });

        let mut detail = fill.detail_json(&ack.ord_id);
        detail["origin"] = serde_json::to_value(request.origin).unwrap_or_default();
        detail["scheduledFor"] = serde_json::to_value(request.scheduled_for).unwrap_or_default();

        let transaction_id = self
            .repo
            .insert_transaction(&NewTransaction {
                plan_id: plan.id,
                symbol: plan.symbol.clone(),
                amount: plan.amount,
                direction: plan.direction,
                status: TxStatus::Success,
                detail,
                executed_at: Utc::now(),
            })
            .await?;
        Ok((transaction_id, fill))
    }

    /// Polls for the real fill a bounded number of times, then gives up and
    /// lets the caller estimate.
    async fn reconcile(
        &self,
        client: &dyn ExchangeApi,
        inst_id: &str,
        ord_id: &str,
    ) -> Option<FillOutcome> {
        let attempts = self.settings.trading.reconcile_attempts;
        let delay = std::time::Duration::from_secs(self.settings.trading.reconcile_delay_secs);

        for attempt in 0..attempts {
            if attempt > 0 {
                tokio::time::sleep(delay).await;
            }
            let fills = match client.get_order_fills(inst_id, ord_id).await {
                Ok(fills) => fills,
                Err(e) => {
                    warn!(ord_id, error = %e, "fill query failed");
                    Vec::new()
                }
            };
            let detail = match client.get_order_detail(inst_id, ord_id).await {
                Ok(detail) => Some(detail),
                Err(e) => {
                    warn!(ord_id, error = %e, "order detail query failed");
                    None
                }
            };
            if let Some(outcome) = fill::resolve(&fills, detail.as_ref()) {
                return Some(outcome);
            }
        }
        warn!(ord_id, "reconciliation exhausted, falling back to estimate");
        None
    }

    /// UTC bounds of the occurrence's calendar day in the configured
    /// timezone.
    fn day_bounds(&self, instant: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
        let date = instant.with_timezone(&self.tz).date_naive();
        let next = date.succ_opt().unwrap_or(date);
        (
            local_midnight(self.tz, date),
            local_midnight(self.tz, next),
        )
    }
}

/// Midnight of `date` in `tz` as a UTC instant. A few timezones skip
/// midnight on DST transitions; those days start at the first valid time.
fn local_midnight(tz: Tz, date: NaiveDate) -> DateTime<Utc> {
    let naive = date.and_time(NaiveTime::MIN);
    let resolved = match tz.from_local_datetime(&naive) {
        LocalResult::Single(dt) => Some(dt),
        LocalResult::Ambiguous(earlier, _) => Some(earlier),
        LocalResult::None => tz
            .from_local_datetime(&(naive + Duration::hours(1)))
            .earliest(),
    };
    resolved
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|| Utc.from_utc_datetime(&naive))
}

/// Drains the execution queue forever. Failures are logged and never tear
/// the worker down.
pub async fn run_worker(executor: Arc<TradeExecutor>, mut rx: mpsc::Receiver<ExecutionRequest>) {
    while let Some(request) = rx.recv().await {
        match executor.execute(&request).await {
            Ok(outcome) => {
                info!(
                    plan_id = request.plan_id,
                    origin = ?request.origin,
                    outcome = outcome.label(),
                    "execution request processed"
                );
            }
            Err(e) => {
                error!(plan_id = request.plan_id, error = %e, "execution request failed");
            }
        }
    }
    info!("execution queue closed, worker exiting");
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use core_types::{ExecutionOrigin, PlanFrequency, TradeDirection};
    use database::{DbRepository, NewPlan, TransactionFilter, connect_in_memory};
    use exchange::{ExchangeError, Fill, OrderAck, OrderDetail, Ticker};
    use std::sync::Mutex as StdMutex;

    struct MockExchange {
        ticker_price: Decimal,
        balance: Decimal,
        fills: Vec<Fill>,
        detail: Option<OrderDetail>,
        reject_orders: bool,
        orders: StdMutex<Vec<MarketOrderRequest>>,
    }

    impl MockExchange {
        fn filled(price: i64) -> Self {
            Self {
                ticker_price: Decimal::from(price),
                balance: Decimal::from(1000),
                fills: vec![Fill {
                    trade_id: "t1".to_string(),
                    fill_sz: Decimal::new(1, 3),
                    fill_px: Decimal::from(price),
                }],
                detail: None,
                reject_orders: false,
                orders: StdMutex::new(Vec::new()),
            }
        }

        fn order_count(&self) -> usize {
            self.orders.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl ExchangeApi for MockExchange {
        async fn get_ticker(&self, inst_id: &str) -> Result<Ticker, ExchangeError> {
            Ok(Ticker {
                inst_id: inst_id.to_string(),
                last: self.ticker_price,
                vol_ccy_24h: Decimal::ZERO,
            })
        }

        async fn get_spot_tickers(&self) -> Result<Vec<Ticker>, ExchangeError> {
            Ok(Vec::new())
        }

        async fn get_balance(&self, _ccy: &str) -> Result<Decimal, ExchangeError> {
            Ok(self.balance)
        }

        async fn place_market_order(
            &self,
            order: &MarketOrderRequest,
        ) -> Result<OrderAck, ExchangeError> {
            if self.reject_orders {
                return Err(ExchangeError::OrderRejected {
                    code: "51008".to_string(),
                    message: "insufficient funds".to_string(),
                });
            }
            self.orders.lock().unwrap().push(order.clone());
            Ok(OrderAck {
                ord_id: "ord-1".to_string(),
                s_code: "0".to_string(),
                s_msg: String::new(),
            })
        }

        async fn get_order_detail(
            &self,
            _inst_id: &str,
            ord_id: &str,
        ) -> Result<OrderDetail, ExchangeError> {
            self.detail.clone().ok_or_else(|| {
                ExchangeError::InvalidData(format!("no detail for order {ord_id}"))
            })
        }

        async fn get_order_fills(
            &self,
            _inst_id: &str,
            _ord_id: &str,
        ) -> Result<Vec<Fill>, ExchangeError> {
            Ok(self.fills.clone())
        }
    }

    struct MockFactory(Arc<MockExchange>);

    #[async_trait]
    impl ClientFactory for MockFactory {
        async fn client(&self) -> Result<Arc<dyn ExchangeApi>, ExchangeError> {
            Ok(self.0.clone() as Arc<dyn ExchangeApi>)
        }
    }

    fn test_settings() -> Arc<Settings> {
        let mut settings = Settings::default();
        settings.trading.reconcile_delay_secs = 0;
        Arc::new(settings)
    }

    async fn setup(exchange: MockExchange) -> (TradeExecutor, DbRepository, Arc<MockExchange>) {
        let repo = DbRepository::new(connect_in_memory().await.unwrap());
        let exchange = Arc::new(exchange);
        let executor = TradeExecutor::new(
            test_settings(),
            repo.clone(),
            Arc::new(MockFactory(exchange.clone())),
        )
        .unwrap();
        (executor, repo, exchange)
    }

    async fn make_plan(repo: &DbRepository, direction: TradeDirection) -> Plan {
        repo.create_plan(
            &NewPlan {
                title: None,
                symbol: "BTC-USDT".to_string(),
                amount: Decimal::from(100),
                frequency: PlanFrequency::Daily,
                day_of_week: None,
                month_days: None,
                fire_time: "10:00".to_string(),
                direction,
            },
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        )
        .await
        .unwrap()
    }

    fn request(plan_id: i64, origin: ExecutionOrigin) -> ExecutionRequest {
        ExecutionRequest {
            plan_id,
            scheduled_for: Utc::now(),
            origin,
        }
    }

    #[tokio::test]
    async fn buy_executes_once_per_window() {
        let (executor, repo, exchange) = setup(MockExchange::filled(50000)).await;
        let plan = make_plan(&repo, TradeDirection::Buy).await;
        let req = request(plan.id, ExecutionOrigin::Schedule);

        let outcome = executor.execute(&req).await.unwrap();
        assert!(matches!(outcome, ExecutionOutcome::Executed { .. }));

        let outcome = executor.execute(&req).await.unwrap();
        assert!(matches!(outcome, ExecutionOutcome::SkippedDuplicate));
        assert_eq!(exchange.order_count(), 1);
    }

    #[tokio::test]
    async fn schedule_edit_reopens_the_window() {
        let (executor, repo, exchange) = setup(MockExchange::filled(50000)).await;
        let plan = make_plan(&repo, TradeDirection::Buy).await;
        let req = request(plan.id, ExecutionOrigin::Schedule);

        executor.execute(&req).await.unwrap();

        let mut edited = repo.get_plan(plan.id).await.unwrap().unwrap();
        edited.last_schedule_edit = Some(Utc::now());
        repo.update_plan(&edited).await.unwrap();

        // The edit cut the window; a fresh occurrence runs again.
        let later = ExecutionRequest {
            scheduled_for: Utc::now(),
            ..req
        };
        let outcome = executor.execute(&later).await.unwrap();
        assert!(matches!(outcome, ExecutionOutcome::Executed { .. }));
        assert_eq!(exchange.order_count(), 2);
    }

    #[tokio::test]
    async fn sell_size_is_bounded_by_balance_and_truncated() {
        let mut exchange = MockExchange::filled(50);
        exchange.balance = Decimal::new(15, 1); // 1.5 base units
        let (executor, repo, exchange) = setup(exchange).await;
        let plan = make_plan(&repo, TradeDirection::Sell).await;

        executor
            .execute(&request(plan.id, ExecutionOrigin::Manual))
            .await
            .unwrap();

        let orders = exchange.orders.lock().unwrap();
        // amount/price = 100/50 = 2, capped at the 1.5 available.
        assert_eq!(orders[0].size, Decimal::new(15, 1));
        assert_eq!(orders[0].side, TradeDirection::Sell);
    }

    #[tokio::test]
    async fn reconciliation_falls_back_to_an_estimate() {
        let mut exchange = MockExchange::filled(50);
        exchange.fills = Vec::new();
        exchange.detail = None;
        let (executor, repo, _exchange) = setup(exchange).await;
        let plan = make_plan(&repo, TradeDirection::Buy).await;

        let outcome = executor
            .execute(&request(plan.id, ExecutionOrigin::Schedule))
            .await
            .unwrap();
        match outcome {
            ExecutionOutcome::Executed { fill, .. } => {
                assert_eq!(fill.source, FillSource::Estimated);
                // 100 notional at price 50.
                assert_eq!(fill.size, Decimal::from(2));
            }
            other => panic!("expected execution, got {other:?}"),
        }

        let recorded = repo.list_transactions(&TransactionFilter::default()).await.unwrap();
        assert_eq!(recorded[0].detail["estimated"], serde_json::json!(true));
    }

    #[tokio::test]
    async fn rejected_order_records_failure_without_suppressing() {
        let mut exchange = MockExchange::filled(50000);
        exchange.reject_orders = true;
        let (executor, repo, _exchange) = setup(exchange).await;
        let plan = make_plan(&repo, TradeDirection::Buy).await;
        let req = request(plan.id, ExecutionOrigin::Schedule);

        let outcome = executor.execute(&req).await.unwrap();
        assert!(matches!(outcome, ExecutionOutcome::Failed { .. }));

        // A failure never satisfies the window; the retry is attempted.
        let outcome = executor.execute(&req).await.unwrap();
        assert!(matches!(outcome, ExecutionOutcome::Failed { .. }));

        let recorded = repo.list_transactions(&TransactionFilter::default()).await.unwrap();
        assert_eq!(recorded.len(), 2);
        assert!(recorded.iter().all(|t| t.status == TxStatus::Failed));
    }

    #[tokio::test]
    async fn disabled_plan_is_a_no_op_for_every_origin() {
        let (executor, repo, exchange) = setup(MockExchange::filled(50000)).await;
        let plan = make_plan(&repo, TradeDirection::Buy).await;
        repo.set_plan_status(plan.id, PlanStatus::Disabled).await.unwrap();

        for origin in [
            ExecutionOrigin::Schedule,
            ExecutionOrigin::CatchUp,
            ExecutionOrigin::Manual,
        ] {
            let outcome = executor.execute(&request(plan.id, origin)).await.unwrap();
            assert!(matches!(outcome, ExecutionOutcome::SkippedDisabled));
        }
        assert_eq!(exchange.order_count(), 0);
    }

    #[tokio::test]
    async fn manual_run_reports_the_duplicate_instead_of_trading_twice() {
        let (executor, repo, exchange) = setup(MockExchange::filled(50000)).await;
        let plan = make_plan(&repo, TradeDirection::Buy).await;

        let outcome = executor
            .execute(&request(plan.id, ExecutionOrigin::Schedule))
            .await
            .unwrap();
        assert!(matches!(outcome, ExecutionOutcome::Executed { .. }));

        let outcome = executor
            .execute(&request(plan.id, ExecutionOrigin::Manual))
            .await
            .unwrap();
        assert!(matches!(outcome, ExecutionOutcome::SkippedDuplicate));
        assert_eq!(exchange.order_count(), 1);

        let recorded = repo.list_transactions(&TransactionFilter::default()).await.unwrap();
        assert_eq!(recorded.len(), 1);
    }

    struct NoCredentialsFactory;

    #[async_trait]
    impl ClientFactory for NoCredentialsFactory {
        async fn client(&self) -> Result<Arc<dyn ExchangeApi>, ExchangeError> {
            Err(ExchangeError::MissingCredentials)
        }
    }

    #[tokio::test]
    async fn missing_credentials_leave_no_transaction_row() {
        let repo = DbRepository::new(connect_in_memory().await.unwrap());
        let executor =
            TradeExecutor::new(test_settings(), repo.clone(), Arc::new(NoCredentialsFactory))
                .unwrap();
        let plan = make_plan(&repo, TradeDirection::Buy).await;

        let outcome = executor
            .execute(&request(plan.id, ExecutionOrigin::Schedule))
            .await
            .unwrap();
        assert!(matches!(outcome, ExecutionOutcome::SkippedNoCredentials));

        let recorded = repo.list_transactions(&TransactionFilter::default()).await.unwrap();
        assert!(recorded.is_empty());
    }
}
