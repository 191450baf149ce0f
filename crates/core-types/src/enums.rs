use crate::error::CoreError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The side of a plan's recurring trade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeDirection {
    Buy,
    Sell,
}

impl TradeDirection {
    /// The lowercase wire form used both in storage and in exchange requests.
    pub fn as_str(&self) -> &'static str {
        match self {
            TradeDirection::Buy => "buy",
            TradeDirection::Sell => "sell",
        }
    }
}

impl FromStr for TradeDirection {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "buy" => Ok(TradeDirection::Buy),
            "sell" => Ok(TradeDirection::Sell),
            other => Err(CoreError::InvalidInput(
                "direction".to_string(),
                other.to_string(),
            )),
        }
    }
}

impl fmt::Display for TradeDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How often a plan fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlanFrequency {
    Daily,
    Weekly,
    Monthly,
}

impl PlanFrequency {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlanFrequency::Daily => "daily",
            PlanFrequency::Weekly => "weekly",
            PlanFrequency::Monthly => "monthly",
        }
    }
}

impl FromStr for PlanFrequency {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "daily" => Ok(PlanFrequency::Daily),
            "weekly" => Ok(PlanFrequency::Weekly),
            "monthly" => Ok(PlanFrequency::Monthly),
            other => Err(CoreError::InvalidInput(
                "frequency".to_string(),
                other.to_string(),
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlanStatus {
    Enabled,
    Disabled,
}

impl PlanStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlanStatus::Enabled => "enabled",
            PlanStatus::Disabled => "disabled",
        }
    }
}

impl FromStr for PlanStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "enabled" => Ok(PlanStatus::Enabled),
            "disabled" => Ok(PlanStatus::Disabled),
            other => Err(CoreError::InvalidInput(
                "status".to_string(),
                other.to_string(),
            )),
        }
    }
}

/// The terminal outcome of a recorded trade attempt.
///
/// Only attempts that reached the exchange (or failed while sizing a live
/// order) are recorded; configuration problems never produce a row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TxStatus {
    Success,
    Failed,
}

impl TxStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TxStatus::Success => "success",
            TxStatus::Failed => "failed",
        }
    }
}

impl FromStr for TxStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "success" => Ok(TxStatus::Success),
            "failed" => Ok(TxStatus::Failed),
            other => Err(CoreError::InvalidInput(
                "tx status".to_string(),
                other.to_string(),
            )),
        }
    }
}

/// Why an execution request was submitted. Every origin passes the same
/// disabled-plan and idempotency gates; the origin is kept for the recorded
/// transaction detail and the logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionOrigin {
    /// A timer fired at its scheduled instant.
    Schedule,
    /// A missed occurrence was replayed after a restart or schedule edit.
    CatchUp,
    /// The manual execute endpoint.
    Manual,
}
