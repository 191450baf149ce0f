use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer};
use std::str::FromStr;

// OKX encodes every number as a JSON string and uses "" where a value is not
// yet available (e.g. avgPx on an unfilled order). These two helpers keep the
// typed structs honest about that.

fn decimal_opt<'de, D>(de: D) -> Result<Option<Decimal>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(de)?;
    if raw.is_empty() {
        return Ok(None);
    }
    Decimal::from_str(&raw)
        .map(Some)
        .map_err(serde::de::Error::custom)
}

fn decimal_or_zero<'de, D>(de: D) -> Result<Decimal, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(decimal_opt(de)?.unwrap_or_default())
}

/// The uniform OKX v5 response envelope. `code == "0"` means success; any
/// other code carries an error message in `msg`.
#[derive(Debug, Clone, Deserialize)]
pub struct Envelope<T> {
    pub code: String,
    #[serde(default)]
    pub msg: String,
    #[serde(default = "Vec::new")]
    pub data: Vec<T>,
}

/// A single entry from `GET /api/v5/market/ticker` or `/market/tickers`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ticker {
    pub inst_id: String,
    #[serde(deserialize_with = "decimal_or_zero")]
    pub last: Decimal,
    /// 24h quote-currency volume, the popularity ranking key.
    #[serde(default, deserialize_with = "decimal_or_zero", rename = "volCcy24h")]
    pub vol_ccy_24h: Decimal,
}

/// The account container from `GET /api/v5/account/balance`.
#[derive(Debug, Clone, Deserialize)]
pub struct AccountBalance {
    #[serde(default)]
    pub details: Vec<BalanceDetail>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BalanceDetail {
    pub ccy: String,
    #[serde(deserialize_with = "decimal_or_zero")]
    pub avail_bal: Decimal,
}

/// Per-order acknowledgement from `POST /api/v5/trade/order`. The envelope
/// can report success while an individual order fails, so each ack carries
/// its own `sCode`/`sMsg`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderAck {
    #[serde(default)]
    pub ord_id: String,
    pub s_code: String,
    #[serde(default)]
    pub s_msg: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderDetail {
    pub ord_id: String,
    pub state: String,
    #[serde(default, deserialize_with = "decimal_opt")]
    pub acc_fill_sz: Option<Decimal>,
    #[serde(default, deserialize_with = "decimal_opt")]
    pub avg_px: Option<Decimal>,
}

impl OrderDetail {
    /// Whether the cumulative fill columns are meaningful yet.
    pub fn is_filled(&self) -> bool {
        self.state == "filled" || self.state == "partially_filled"
    }
}

/// One execution from `GET /api/v5/trade/fills`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Fill {
    #[serde(default)]
    pub trade_id: String,
    #[serde(deserialize_with = "decimal_or_zero")]
    pub fill_sz: Decimal,
    #[serde(deserialize_with = "decimal_or_zero")]
    pub fill_px: Decimal,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_and_empty_numeric_fields_parse() {
        let raw = r#"{
            "code": "0",
            "msg": "",
            "data": [{"ordId": "123", "state": "live", "accFillSz": "", "avgPx": ""}]
        }"#;
        let env: Envelope<OrderDetail> = serde_json::from_str(raw).unwrap();
        assert_eq!(env.code, "0");
        let detail = &env.data[0];
        assert!(!detail.is_filled());
        assert_eq!(detail.acc_fill_sz, None);
        assert_eq!(detail.avg_px, None);
    }

    #[test]
    fn ticker_volume_defaults_when_absent() {
        let raw = r#"{"instId": "BTC-USDT", "last": "65000.5"}"#;
        let ticker: Ticker = serde_json::from_str(raw).unwrap();
        assert_eq!(ticker.last.to_string(), "65000.5");
        assert_eq!(ticker.vol_ccy_24h, Decimal::ZERO);
    }
}
