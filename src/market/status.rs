//! Typed view of the market status payload

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Trading state of one market segment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarketStatus {
    /// Segment name, e.g. `Capital Market`
    pub market: String,
    /// `Open`, `Close` and so on
    #[serde(rename(deserialize = "marketStatus"))]
    pub status: String,
}

#[derive(Deserialize)]
struct MarketStatusPayload {
    #[serde(rename = "marketState", default)]
    market_state: Vec<MarketStatus>,
}

/// Extracts every segment's status from a `marketStatus` response
pub fn parse_market_status(payload: &Value) -> Result<Vec<MarketStatus>, serde_json::Error> {
    MarketStatusPayload::deserialize(payload).map(|payload| payload.market_state)
}
