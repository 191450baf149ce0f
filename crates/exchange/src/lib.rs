//! # Exchange Crate
//!
//! A typed client for the OKX v5 REST API, behind the `ExchangeApi` trait so
//! the executor and valuation layers can be tested against a mock.
//!
//! The crate handles the exchange's envelope format, request signing, a short
//! TTL cache for public market-data GETs, and bounded retry with exponential
//! backoff for transient transport failures.

use async_trait::async_trait;
use chrono::Utc;
use configuration::settings::Exchange as ExchangeSettings;
use core_types::{Credentials, TradeDirection};
use reqwest::Method;
use reqwest::header::{HeaderMap, HeaderValue};
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, warn};

mod auth;
pub mod error;
pub mod responses;

pub use error::ExchangeError;
pub use responses::{AccountBalance, BalanceDetail, Envelope, Fill, OrderAck, OrderDetail, Ticker};

/// The abstract exchange interface used by the executor and valuation layers.
#[async_trait]
pub trait ExchangeApi: Send + Sync {
    /// Latest ticker for a single instrument. (Public)
    async fn get_ticker(&self, inst_id: &str) -> Result<Ticker, ExchangeError>;

    /// All spot tickers, used for popularity ranking. (Public)
    async fn get_spot_tickers(&self) -> Result<Vec<Ticker>, ExchangeError>;

    /// Available balance of one currency, zero if the account holds none.
    /// (Authenticated)
    async fn get_balance(&self, ccy: &str) -> Result<Decimal, ExchangeError>;

    /// Places a spot market order and returns its acknowledgement.
    /// (Authenticated)
    async fn place_market_order(&self, order: &MarketOrderRequest)
    -> Result<OrderAck, ExchangeError>;

    /// Current state of an order, including aggregate fill size and average
    /// price once available. (Authenticated)
    async fn get_order_detail(
        &self,
        inst_id: &str,
        ord_id: &str,
    ) -> Result<OrderDetail, ExchangeError>;

    /// Individual executions for an order. (Authenticated)
    async fn get_order_fills(
        &self,
        inst_id: &str,
        ord_id: &str,
    ) -> Result<Vec<Fill>, ExchangeError>;
}

/// Builds an authenticated client on demand, so a credential update takes
/// effect on the next use without a restart. Tests substitute a factory that
/// hands out a mock exchange.
#[async_trait]
pub trait ClientFactory: Send + Sync {
    async fn client(&self) -> Result<Arc<dyn ExchangeApi>, ExchangeError>;
}

/// A spot market order. For buys `size` is denominated in the quote currency
/// (`tgtCcy=quote_ccy`); for sells it is the base-currency quantity.
#[derive(Debug, Clone)]
pub struct MarketOrderRequest {
    pub inst_id: String,
    pub side: TradeDirection,
    pub size: Decimal,
}

type ResponseCache = Arc<Mutex<HashMap<String, (Instant, String)>>>;

/// Concrete `ExchangeApi` implementation for OKX.
#[derive(Clone)]
pub struct OkxClient {
    http: reqwest::Client,
    base_url: String,
    credentials: Option<Credentials>,
    cache: ResponseCache,
    cache_ttl: Duration,
    retry_attempts: u32,
    retry_base_delay: Duration,
}

impl OkxClient {
    /// A client with signing credentials for private endpoints.
    pub fn new(config: &ExchangeSettings, credentials: Credentials) -> Self {
        Self::build(config, Some(credentials))
    }

    /// A credential-less client, limited to public market data.
    pub fn public(config: &ExchangeSettings) -> Self {
        Self::build(config, None)
    }

    fn build(config: &ExchangeSettings, credentials: Option<Credentials>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            credentials,
            cache: Arc::new(Mutex::new(HashMap::new())),
            cache_ttl: Duration::from_secs(config.cache_ttl_secs),
            retry_attempts: config.retry_attempts.max(1),
            retry_base_delay: Duration::from_millis(config.retry_base_delay_ms),
        }
    }

    fn auth_headers(
        &self,
        method: &str,
        request_path: &str,
        body: &str,
    ) -> Result<HeaderMap, ExchangeError> {
        let creds = self
            .credentials
            .as_ref()
            .filter(|c| c.is_complete())
            .ok_or(ExchangeError::MissingCredentials)?;

        let timestamp = auth::iso_timestamp(Utc::now());
        let signature = auth::sign_request(&creds.secret_key, &timestamp, method, request_path, body)?;

        let mut headers = HeaderMap::new();
        let header = |v: &str| {
            HeaderValue::from_str(v)
                .map_err(|_| ExchangeError::InvalidData("credential contains invalid bytes".to_string()))
        };
        headers.insert("OK-ACCESS-KEY", header(&creds.api_key)?);
        headers.insert("OK-ACCESS-SIGN", header(&signature)?);
        headers.insert("OK-ACCESS-TIMESTAMP", header(&timestamp)?);
        headers.insert("OK-ACCESS-PASSPHRASE", header(&creds.passphrase)?);
        Ok(headers)
    }

    /// Sends one request with bounded retry. Transport failures and 5xx
    /// responses back off and retry; anything else is returned as-is.
    async fn send_with_retry(
        &self,
        method: Method,
        request_path: &str,
        body: Option<String>,
        private: bool,
    ) -> Result<String, ExchangeError> {
        let url = format!("{}{}", self.base_url, request_path);
        let mut last_error = None;

        for attempt in 0..self.retry_attempts {
            if attempt > 0 {
                let delay = self.retry_base_delay * 2u32.pow(attempt - 1);
                debug!(%request_path, attempt, ?delay, "retrying exchange request");
                tokio::time::sleep(delay).await;
            }

            let mut request = self.http.request(method.clone(), &url);
            if private {
                let headers = self.auth_headers(
                    method.as_str(),
                    request_path,
                    body.as_deref().unwrap_or(""),
                )?;
                request = request.headers(headers);
            }
            if let Some(body) = &body {
                request = request
                    .header("Content-Type", "application/json")
                    .body(body.clone());
            }

            match request.send().await {
                Ok(response) if response.status().is_server_error() => {
                    warn!(%request_path, status = %response.status(), "exchange returned server error");
                    last_error = Some(ExchangeError::Exchange {
                        code: response.status().as_str().to_string(),
                        message: "server error".to_string(),
                    });
                }
                Ok(response) => return Ok(response.text().await?),
                Err(e) => {
                    warn!(%request_path, error = %e, "exchange request failed");
                    last_error = Some(ExchangeError::Transport(e));
                }
            }
        }

        Err(last_error.unwrap_or(ExchangeError::InvalidData("no attempts made".to_string())))
    }

    fn parse_envelope<T: DeserializeOwned>(raw: &str) -> Result<Vec<T>, ExchangeError> {
        let envelope: Envelope<T> = serde_json::from_str(raw)
            .map_err(|e| ExchangeError::Deserialization(e.to_string()))?;
        if envelope.code != "0" {
            return Err(ExchangeError::Exchange {
                code: envelope.code,
                message: envelope.msg,
            });
        }
        Ok(envelope.data)
    }

    /// Authenticated GET, never cached: order state must be fresh.
    async fn get_private<T: DeserializeOwned>(
        &self,
        request_path: &str,
    ) -> Result<Vec<T>, ExchangeError> {
        let raw = self
            .send_with_retry(Method::GET, request_path, None, true)
            .await?;
        Self::parse_envelope(&raw)
    }

    /// Public GET with a short TTL cache keyed by path+query.
    async fn get_public_cached<T: DeserializeOwned>(
        &self,
        request_path: &str,
    ) -> Result<Vec<T>, ExchangeError> {
        {
            let cache = self.cache.lock().await;
            if let Some((at, body)) = cache.get(request_path) {
                if at.elapsed() < self.cache_ttl {
                    return Self::parse_envelope(body);
                }
            }
        }

        let raw = self
            .send_with_retry(Method::GET, request_path, None, false)
            .await?;
        let data = Self::parse_envelope(&raw)?;
        self.cache
            .lock()
            .await
            .insert(request_path.to_string(), (Instant::now(), raw));
        Ok(data)
    }

    async fn post_private<T: DeserializeOwned>(
        &self,
        request_path: &str,
        body: &serde_json::Value,
    ) -> Result<Vec<T>, ExchangeError> {
        let raw = self
            .send_with_retry(Method::POST, request_path, Some(body.to_string()), true)
            .await?;
        Self::parse_envelope(&raw)
    }
}

#[async_trait]
impl ExchangeApi for OkxClient {
    async fn get_ticker(&self, inst_id: &str) -> Result<Ticker, ExchangeError> {
        let path = format!("/api/v5/market/ticker?instId={inst_id}");
        let mut data: Vec<Ticker> = self.get_public_cached(&path).await?;
        data.pop()
            .ok_or_else(|| ExchangeError::InvalidData(format!("no ticker for {inst_id}")))
    }

    async fn get_spot_tickers(&self) -> Result<Vec<Ticker>, ExchangeError> {
        self.get_public_cached("/api/v5/market/tickers?instType=SPOT")
            .await
    }

    async fn get_balance(&self, ccy: &str) -> Result<Decimal, ExchangeError> {
        let accounts: Vec<AccountBalance> = self
            .get_private(&format!("/api/v5/account/balance?ccy={ccy}"))
            .await?;
        Ok(accounts
            .first()
            .and_then(|a| a.details.iter().find(|d| d.ccy == ccy))
            .map(|d| d.avail_bal)
            .unwrap_or_default())
    }

    async fn place_market_order(
        &self,
        order: &MarketOrderRequest,
    ) -> Result<OrderAck, ExchangeError> {
        let mut body = serde_json::json!({
            "instId": order.inst_id,
            "tdMode": "cash",
            "side": order.side.as_str(),
            "ordType": "market",
            "sz": order.size.to_string(),
        });
        // Market buys quote their size in the spend currency.
        if order.side == TradeDirection::Buy {
            body["tgtCcy"] = serde_json::Value::String("quote_ccy".to_string());
        }

        let mut acks: Vec<OrderAck> = self.post_private("/api/v5/trade/order", &body).await?;
        let ack = acks
            .pop()
            .ok_or_else(|| ExchangeError::InvalidData("empty order acknowledgement".to_string()))?;
        if ack.s_code != "0" {
            return Err(ExchangeError::OrderRejected {
                code: ack.s_code,
                message: ack.s_msg,
            });
        }
        Ok(ack)
    }

    async fn get_order_detail(
        &self,
        inst_id: &str,
        ord_id: &str,
    ) -> Result<OrderDetail, ExchangeError> {
        let path = format!("/api/v5/trade/order?instId={inst_id}&ordId={ord_id}");
        let mut data: Vec<OrderDetail> = self.get_private(&path).await?;
        data.pop()
            .ok_or_else(|| ExchangeError::InvalidData(format!("no detail for order {ord_id}")))
    }

    async fn get_order_fills(
        &self,
        inst_id: &str,
        ord_id: &str,
    ) -> Result<Vec<Fill>, ExchangeError> {
        let path = format!("/api/v5/trade/fills?instType=SPOT&instId={inst_id}&ordId={ord_id}");
        self.get_private(&path).await
    }
}
