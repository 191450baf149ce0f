//! Risk metrics over a daily portfolio-value series. All metrics are
//! computed in `f64`; monetary aggregation elsewhere stays in `Decimal`.

const TRADING_DAYS: f64 = 252.0;

/// Largest peak-to-trough decline as a fraction of the peak. Zero for fewer
/// than two points.
pub fn max_drawdown(series: &[f64]) -> f64 {
    if series.len() < 2 {
        return 0.0;
    }
    let mut peak = f64::MIN;
    let mut worst = 0.0f64;
    for &value in series {
        if value > peak {
            peak = value;
        }
        if peak > 0.0 {
            worst = worst.max((peak - value) / peak);
        }
    }
    worst
}

/// Annualized standard deviation of daily returns. Zero for fewer than two
/// points or a flat series.
pub fn volatility(series: &[f64]) -> f64 {
    let returns = daily_returns(series);
    if returns.len() < 2 {
        return 0.0;
    }
    std_dev(&returns) * TRADING_DAYS.sqrt()
}

/// Annualized Sharpe ratio of daily returns against a yearly risk-free rate.
/// Zero when the return variance is zero.
pub fn sharpe(series: &[f64], risk_free_rate: f64) -> f64 {
    let returns = daily_returns(series);
    if returns.len() < 2 {
        return 0.0;
    }
    let sd = std_dev(&returns);
    if sd == 0.0 {
        return 0.0;
    }
    let excess = mean(&returns) - risk_free_rate / TRADING_DAYS;
    (excess / sd) * TRADING_DAYS.sqrt()
}

fn daily_returns(series: &[f64]) -> Vec<f64> {
    series
        .windows(2)
        .filter(|w| w[0] > 0.0)
        .map(|w| w[1] / w[0] - 1.0)
        .collect()
}

fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

fn std_dev(values: &[f64]) -> f64 {
    let m = mean(values);
    let variance = values.iter().map(|v| (v - m) * (v - m)).sum::<f64>() / values.len() as f64;
    variance.sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rising_series_has_no_drawdown() {
        assert_eq!(max_drawdown(&[100.0, 110.0, 125.0, 140.0]), 0.0);
    }

    #[test]
    fn short_series_yield_zero_everywhere() {
        for series in [&[][..], &[100.0][..]] {
            assert_eq!(max_drawdown(series), 0.0);
            assert_eq!(volatility(series), 0.0);
            assert_eq!(sharpe(series, 0.02), 0.0);
        }
    }

    #[test]
    fn flat_series_has_no_volatility_or_sharpe() {
        let series = [100.0, 100.0, 100.0, 100.0];
        assert_eq!(max_drawdown(&series), 0.0);
        assert_eq!(volatility(&series), 0.0);
        assert_eq!(sharpe(&series, 0.02), 0.0);
    }

    #[test]
    fn drawdown_measures_worst_peak_to_trough() {
        let series = [100.0, 120.0, 60.0, 80.0];
        assert!((max_drawdown(&series) - 0.5).abs() < 1e-12);
    }

    #[test]
    fn volatility_is_positive_for_a_moving_series() {
        let series = [100.0, 110.0, 99.0, 105.0];
        assert!(volatility(&series) > 0.0);
    }
}
