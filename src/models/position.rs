//! Open perpetual-futures position as reported by the exchange.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::OrderSide;

/// Direction of an open position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PositionSide {
    Long,
    Short,
    /// Anything the exchange reported that we can't interpret
    Unknown,
}

impl PositionSide {
    /// Parse Bybit's position side ("Buy" / "Sell").
    pub fn from_exchange(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "buy" | "long" => Self::Long,
            "sell" | "short" => Self::Short,
            _ => Self::Unknown,
        }
    }

    /// Order side that flattens a position of this direction.
    pub fn closing_side(&self) -> Option<OrderSide> {
        match self {
            Self::Long => Some(OrderSide::Sell),
            Self::Short => Some(OrderSide::Buy),
            Self::Unknown => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Long => "long",
            Self::Short => "short",
            Self::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for PositionSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Open position. Read-only to the trading core.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    /// Exchange symbol, e.g. "BTCUSDT"
    pub symbol: String,

    pub side: PositionSide,

    /// Average entry price
    pub entry_price: Decimal,

    /// Current mark price
    pub mark_price: Decimal,

    /// Contract quantity; zero means there is no position
    pub size: Decimal,
}

impl Position {
    /// A position is live while its size is non-zero.
    pub fn is_live(&self) -> bool {
        !self.size.is_zero()
    }

    /// Signed profit percentage from entry to mark, in percent.
    ///
    /// Returns `None` for an unknown side or a zero entry price.
    pub fn profit_pct(&self) -> Option<f64> {
        if self.entry_price.is_zero() {
            return None;
        }

        let move_pct = match self.side {
            PositionSide::Long => (self.mark_price - self.entry_price) / self.entry_price,
            PositionSide::Short => (self.entry_price - self.mark_price) / self.entry_price,
            PositionSide::Unknown => return None,
        };

        (move_pct * Decimal::ONE_HUNDRED).to_f64()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn make_position(side: PositionSide, entry: Decimal, mark: Decimal) -> Position {
        Position {
            symbol: "BTCUSDT".to_string(),
            side,
            entry_price: entry,
            mark_price: mark,
            size: dec!(0.01),
        }
    }

    #[test]
    fn test_profit_pct_long_and_short() {
        let long = make_position(PositionSide::Long, dec!(100), dec!(105));
        assert_eq!(long.profit_pct(), Some(5.0));

        let short = make_position(PositionSide::Short, dec!(100), dec!(105));
        assert_eq!(short.profit_pct(), Some(-5.0));
    }

    #[test]
    fn test_profit_pct_unknown_side() {
        let pos = make_position(PositionSide::Unknown, dec!(100), dec!(105));
        assert_eq!(pos.profit_pct(), None);
    }

    #[test]
    fn test_side_parsing_and_closing_side() {
        assert_eq!(PositionSide::from_exchange("Buy"), PositionSide::Long);
        assert_eq!(PositionSide::from_exchange("Sell"), PositionSide::Short);
        assert_eq!(PositionSide::from_exchange(""), PositionSide::Unknown);

        assert_eq!(PositionSide::Long.closing_side(), Some(OrderSide::Sell));
        assert_eq!(PositionSide::Short.closing_side(), Some(OrderSide::Buy));
        assert_eq!(PositionSide::Unknown.closing_side(), None);
    }

    #[test]
    fn test_zero_size_is_not_live() {
        let mut pos = make_position(PositionSide::Long, dec!(100), dec!(100));
        assert!(pos.is_live());
        pos.size = Decimal::ZERO;
        assert!(!pos.is_live());
    }
}
