use exchange::{Fill, OrderDetail};
use rust_decimal::Decimal;
use serde_json::json;

/// How a recorded fill size and price were obtained, in order of trust.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FillSource {
    /// Volume-weighted aggregate of individual executions.
    Aggregated,
    /// The order detail's cumulative fill and average price.
    OrderDetail,
    /// Reconciliation exhausted its polls; size derived from the order
    /// notional and the last ticker price.
    Estimated,
}

impl FillSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            FillSource::Aggregated => "aggregated",
            FillSource::OrderDetail => "order_detail",
            FillSource::Estimated => "estimated",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FillOutcome {
    pub size: Decimal,
    pub price: Decimal,
    pub source: FillSource,
}

impl FillOutcome {
    pub fn is_estimated(&self) -> bool {
        self.source == FillSource::Estimated
    }

    pub fn detail_json(&self, ord_id: &str) -> serde_json::Value {
        json!({
            "ordId": ord_id,
            "fillSz": self.size.to_string(),
            "avgPx": self.price.to_string(),
            "fillSource": self.source.as_str(),
            "estimated": self.is_estimated(),
        })
    }
}

/// Resolves a fill from whatever reconciliation produced, preferring
/// individual executions over the order detail. The detail only counts once
/// the order reached a filled or partially filled state; its cumulative
/// columns are not meaningful before that. Returns `None` when neither
/// source carries a usable size, in which case the caller falls back to an
/// estimate.
pub fn resolve(fills: &[Fill], detail: Option<&OrderDetail>) -> Option<FillOutcome> {
    let total: Decimal = fills.iter().map(|f| f.fill_sz).sum();
    if total > Decimal::ZERO {
        let notional: Decimal = fills.iter().map(|f| f.fill_sz * f.fill_px).sum();
        return Some(FillOutcome {
            size: total,
            price: notional / total,
            source: FillSource::Aggregated,
        });
    }

    let detail = detail.filter(|d| d.is_filled())?;
    let size = detail.acc_fill_sz.filter(|s| *s > Decimal::ZERO)?;
    let price = detail.avg_px.filter(|p| *p > Decimal::ZERO)?;
    Some(FillOutcome {
        size,
        price,
        source: FillSource::OrderDetail,
    })
}

/// The last-resort fill when the exchange never reported one in time.
pub fn estimate(notional: Decimal, ticker_price: Decimal) -> Option<FillOutcome> {
    if ticker_price <= Decimal::ZERO {
        return None;
    }
    Some(FillOutcome {
        size: notional / ticker_price,
        price: ticker_price,
        source: FillSource::Estimated,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fill(sz: &str, px: &str) -> Fill {
        Fill {
            trade_id: "t".to_string(),
            fill_sz: sz.parse().unwrap(),
            fill_px: px.parse().unwrap(),
        }
    }

    fn detail(acc: Option<&str>, avg: Option<&str>) -> OrderDetail {
        OrderDetail {
            ord_id: "o1".to_string(),
            state: "filled".to_string(),
            acc_fill_sz: acc.map(|s| s.parse().unwrap()),
            avg_px: avg.map(|s| s.parse().unwrap()),
        }
    }

    #[test]
    fn fills_take_precedence_and_vwap_is_weighted() {
        let fills = vec![fill("1", "100"), fill("3", "104")];
        let outcome = resolve(&fills, Some(&detail(Some("4"), Some("999")))).unwrap();
        assert_eq!(outcome.source, FillSource::Aggregated);
        assert_eq!(outcome.size, Decimal::from(4));
        assert_eq!(outcome.price, Decimal::from(103));
    }

    #[test]
    fn detail_used_when_no_fills() {
        let outcome = resolve(&[], Some(&detail(Some("2"), Some("101")))).unwrap();
        assert_eq!(outcome.source, FillSource::OrderDetail);
        assert_eq!(outcome.size, Decimal::from(2));
    }

    #[test]
    fn unusable_detail_yields_none() {
        assert!(resolve(&[], Some(&detail(None, None))).is_none());
        assert!(resolve(&[], Some(&detail(Some("0"), Some("101")))).is_none());
        assert!(resolve(&[], None).is_none());
    }

    #[test]
    fn unfilled_detail_is_ignored() {
        let mut live = detail(Some("2"), Some("101"));
        live.state = "live".to_string();
        assert!(resolve(&[], Some(&live)).is_none());
    }

    #[test]
    fn estimate_divides_notional_by_price() {
        let outcome = estimate(Decimal::from(100), Decimal::from(50)).unwrap();
        assert_eq!(outcome.size, Decimal::from(2));
        assert!(outcome.is_estimated());
        assert!(estimate(Decimal::from(100), Decimal::ZERO).is_none());
    }
}
