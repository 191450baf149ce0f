use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// The root configuration structure for the entire application.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    pub server: Server,
    pub database: Database,
    pub vault: Vault,
    pub exchange: Exchange,
    pub schedule: Schedule,
    pub trading: Trading,
    pub valuation: Valuation,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Server {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Database {
    /// sqlx connection string, e.g. "sqlite://cadence.db".
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Vault {
    /// Path of the encryption key file; generated on first use.
    pub key_path: String,
}

/// Parameters of the exchange gateway (transport, not trading semantics).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Exchange {
    pub base_url: String,
    /// TTL of the idempotent-GET response cache.
    pub cache_ttl_secs: u64,
    /// Bounded transport retry budget. Callers never retry on top of this.
    pub retry_attempts: u32,
    pub retry_base_delay_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Schedule {
    /// IANA timezone all plan times are interpreted in, e.g. "Asia/Shanghai".
    pub timezone: String,
    /// A missed occurrence detected within this window still runs (once).
    pub misfire_grace_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trading {
    /// The quote currency every plan's notional is denominated in.
    pub quote_currency: String,
    /// Base currencies that get `major_size_precision` decimals on sells.
    pub major_currencies: Vec<String>,
    pub major_size_precision: u32,
    pub default_size_precision: u32,
    /// Per-symbol overrides, keyed by instrument id ("BTC-USDT").
    #[serde(default)]
    pub size_precision_overrides: HashMap<String, u32>,
    /// Fill reconciliation poll budget.
    pub reconcile_attempts: u32,
    pub reconcile_delay_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Valuation {
    /// Overview cache TTL; `force_refresh` bypasses it.
    pub cache_ttl_secs: u64,
    /// Annual risk-free rate used by the Sharpe ratio.
    pub risk_free_rate: f64,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            server: Server {
                host: "0.0.0.0".to_string(),
                port: 8000,
            },
            database: Database {
                url: "sqlite://cadence.db?mode=rwc".to_string(),
            },
            vault: Vault {
                key_path: "cadence.key".to_string(),
            },
            exchange: Exchange {
                base_url: "https://www.okx.com".to_string(),
                cache_ttl_secs: 60,
                retry_attempts: 3,
                retry_base_delay_ms: 500,
            },
            schedule: Schedule {
                timezone: "UTC".to_string(),
                misfire_grace_secs: 24 * 60 * 60,
            },
            trading: Trading {
                quote_currency: "USDT".to_string(),
                major_currencies: vec!["BTC".to_string(), "ETH".to_string()],
                major_size_precision: 8,
                default_size_precision: 4,
                size_precision_overrides: HashMap::new(),
                reconcile_attempts: 3,
                reconcile_delay_secs: 2,
            },
            valuation: Valuation {
                cache_ttl_secs: 300,
                risk_free_rate: 0.0,
            },
        }
    }
}

impl Settings {
    /// The sell-size precision for an instrument: explicit override first,
    /// then the major/default split on the base currency.
    pub fn size_precision(&self, symbol: &str) -> u32 {
        if let Some(p) = self.trading.size_precision_overrides.get(symbol) {
            return *p;
        }
        let base = symbol.split('-').next().unwrap_or(symbol);
        if self.trading.major_currencies.iter().any(|c| c == base) {
            self.trading.major_size_precision
        } else {
            self.trading.default_size_precision
        }
    }
}
