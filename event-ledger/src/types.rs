//! Core types for the event ledger
//!
//! All types are designed for:
//! - Line-oriented JSON serialization (one record per line)
//! - Exact arithmetic (Decimal payload values travel as strings)
//! - A closed category taxonomy with static per-category configuration

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

/// Event category. One ledger file exists per category.
///
/// The taxonomy is closed: filenames and notification pool sizes are
/// resolved from static tables keyed by variant, not from a runtime
/// registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
pub enum Category {
    /// Market price ticks
    PriceUpdate,
    /// OHLC candle updates
    CandleUpdate,
    /// Portfolio state changes
    PortfolioUpdate,
    /// Order placements
    TradePlacement,
    /// Order fills
    TradeFills,
    /// Simulated/virtual orders
    VirtualOrders,
    /// Trade executions
    TradeExecution,
    /// System lifecycle events
    SystemEvent,
    /// Market analysis output
    MarketAnalysis,
    /// Trading decisions
    TradingDecision,
}

impl Category {
    /// All declared categories, in ledger-construction order.
    pub const ALL: [Category; 10] = [
        Category::PriceUpdate,
        Category::CandleUpdate,
        Category::PortfolioUpdate,
        Category::TradePlacement,
        Category::TradeFills,
        Category::VirtualOrders,
        Category::TradeExecution,
        Category::SystemEvent,
        Category::MarketAnalysis,
        Category::TradingDecision,
    ];

    /// Wire name used in the record envelope
    pub fn wire_name(&self) -> &'static str {
        match self {
            Category::PriceUpdate => "price_update",
            Category::CandleUpdate => "candle_update",
            Category::PortfolioUpdate => "portfolio_update",
            Category::TradePlacement => "trade_placement",
            Category::TradeFills => "trade_fills",
            Category::VirtualOrders => "virtual_orders",
            Category::TradeExecution => "trade_execution",
            Category::SystemEvent => "system_event",
            Category::MarketAnalysis => "market_analysis",
            Category::TradingDecision => "trading_decision",
        }
    }

    /// File name of this category's record file inside the storage directory
    pub fn file_name(&self) -> &'static str {
        match self {
            Category::PriceUpdate => "market_data.jsonl",
            Category::CandleUpdate => "market_candles.jsonl",
            Category::PortfolioUpdate => "portfolio_state.jsonl",
            Category::TradePlacement => "trade_placement.jsonl",
            Category::TradeFills => "trade_fills.jsonl",
            Category::VirtualOrders => "virtual_orders.jsonl",
            Category::TradeExecution => "trade_execution.jsonl",
            Category::SystemEvent => "system_events.jsonl",
            Category::MarketAnalysis => "market_analysis.jsonl",
            Category::TradingDecision => "trading_decision.jsonl",
        }
    }

    /// Default notification worker count.
    ///
    /// High-frequency categories get more workers; categories where
    /// ordering matters more than throughput stay small.
    pub fn notify_workers(&self) -> usize {
        match self {
            Category::PriceUpdate => 10,
            Category::CandleUpdate => 4,
            Category::TradePlacement | Category::TradeFills | Category::VirtualOrders => 4,
            _ => 2,
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.wire_name())
    }
}

/// Event payload: an ordered map of field name to JSON value.
///
/// Insertion order is preserved through serialization.
pub type Payload = serde_json::Map<String, Value>;

/// A single ledger record.
///
/// `sequence_id` is assigned by the owning ledger at write time and is
/// unique and strictly increasing within one category. It is `None` only
/// on caller-constructed instances that have not been persisted yet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Owning category
    pub category: Category,

    /// Event timestamp (UTC, ISO-8601 on the wire)
    pub timestamp: DateTime<Utc>,

    /// Payload fields
    pub data: Payload,

    /// Ledger-assigned sequence id
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sequence_id: Option<u64>,
}

impl Event {
    /// Create a not-yet-persisted event
    pub fn new(category: Category, timestamp: DateTime<Utc>, data: Payload) -> Self {
        Self {
            category,
            timestamp,
            data,
            sequence_id: None,
        }
    }
}

/// Encode a decimal as a payload value.
///
/// Decimals travel as strings so their precision survives the JSON
/// round-trip exactly; they are never converted to binary floats.
pub fn decimal_value(value: Decimal) -> Value {
    Value::String(value.to_string())
}

/// Decode a payload value as a decimal.
///
/// Accepts the canonical string form as well as plain JSON numbers
/// (parsed from their textual representation, not through `f64`).
pub fn as_decimal(value: &Value) -> Option<Decimal> {
    match value {
        Value::String(text) => Decimal::from_str(text).ok(),
        Value::Number(number) => Decimal::from_str(&number.to_string()).ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_category_wire_names() {
        assert_eq!(Category::PriceUpdate.wire_name(), "price_update");
        assert_eq!(Category::TradeFills.wire_name(), "trade_fills");
        assert_eq!(
            serde_json::to_string(&Category::VirtualOrders).unwrap(),
            "\"virtual_orders\""
        );
        let parsed: Category = serde_json::from_str("\"portfolio_update\"").unwrap();
        assert_eq!(parsed, Category::PortfolioUpdate);
    }

    #[test]
    fn test_category_tables_cover_all() {
        for category in Category::ALL {
            assert!(category.file_name().ends_with(".jsonl"));
            assert!(category.notify_workers() >= 2);
        }
    }

    #[test]
    fn test_event_envelope_round_trip() {
        let timestamp = Utc.with_ymd_and_hms(2024, 3, 1, 12, 30, 0).unwrap();
        let mut data = Payload::new();
        data.insert("symbol".to_string(), Value::String("BTC-USD".to_string()));
        data.insert(
            "price".to_string(),
            decimal_value(Decimal::from_str("64123.455500").unwrap()),
        );

        let mut event = Event::new(Category::PriceUpdate, timestamp, data);
        event.sequence_id = Some(7);

        let line = serde_json::to_string(&event).unwrap();
        assert!(line.starts_with("{\"category\":\"price_update\""));
        assert!(line.contains("\"sequence_id\":7"));

        let parsed: Event = serde_json::from_str(&line).unwrap();
        assert_eq!(parsed, event);
    }

    #[test]
    fn test_unpersisted_event_omits_sequence_id() {
        let event = Event::new(Category::SystemEvent, Utc::now(), Payload::new());
        let line = serde_json::to_string(&event).unwrap();
        assert!(!line.contains("sequence_id"));
    }

    #[test]
    fn test_decimal_precision_survives_round_trip() {
        let original = Decimal::from_str("123.456789012345678901").unwrap();
        let value = decimal_value(original);
        let recovered = as_decimal(&value).unwrap();
        assert_eq!(recovered, original);
        assert_eq!(recovered.to_string(), "123.456789012345678901");
    }

    #[test]
    fn test_as_decimal_from_json_number() {
        let value: Value = serde_json::from_str("42.5").unwrap();
        assert_eq!(as_decimal(&value), Some(Decimal::from_str("42.5").unwrap()));
        assert_eq!(as_decimal(&Value::Bool(true)), None);
    }

    #[test]
    fn test_payload_preserves_insertion_order() {
        let mut data = Payload::new();
        data.insert("zeta".to_string(), Value::from(1));
        data.insert("alpha".to_string(), Value::from(2));
        let text = serde_json::to_string(&data).unwrap();
        assert!(text.find("zeta").unwrap() < text.find("alpha").unwrap());
    }
}
