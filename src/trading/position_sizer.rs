//! Position sizing: converts a USDT notional into a contract quantity.
//!
//! The cost of one minimum tradable unit includes initial margin plus the
//! fees for opening and for closing it again. Closing fees differ by side
//! because the liquidation-adjusted notional does, so the worse of the two
//! is used.

use rust_decimal::Decimal;

/// Contract sizing for limit entries.
#[derive(Debug, Clone)]
pub struct PositionSizer {
    commission_rate: Decimal,
    leverage: u32,
}

impl PositionSizer {
    /// Create a sizer for the account's commission rate and leverage.
    pub fn new(commission_rate: Decimal, leverage: u32) -> Self {
        Self {
            commission_rate,
            leverage,
        }
    }

    /// Quantity to order for `amount_usdt` at `price`.
    ///
    /// Zero means the notional can't afford a single tradable unit and the
    /// order should be skipped.
    pub fn size(&self, price: Decimal, amount_usdt: Decimal, min_unit: Decimal) -> Decimal {
        size_order(price, amount_usdt, min_unit, self.commission_rate, self.leverage)
    }
}

/// Total cost (margin + open fee + close fee) of holding one `min_unit` at `price`.
pub fn unit_cost(price: Decimal, min_unit: Decimal, commission_rate: Decimal, leverage: u32) -> Decimal {
    let leverage = Decimal::from(leverage.max(1));
    let notional = min_unit * price;

    let init_margin = notional / leverage;
    let open_fee = notional * commission_rate;
    let close_fee_buy = notional * (Decimal::ONE - Decimal::ONE / leverage) * commission_rate;
    let close_fee_sell = notional * (Decimal::ONE + Decimal::ONE / leverage) * commission_rate;

    let buy_side = init_margin + open_fee + close_fee_buy;
    let sell_side = init_margin + open_fee + close_fee_sell;
    buy_side.max(sell_side)
}

/// `floor(amount_usdt / unit_cost) * min_unit`.
pub fn size_order(
    price: Decimal,
    amount_usdt: Decimal,
    min_unit: Decimal,
    commission_rate: Decimal,
    leverage: u32,
) -> Decimal {
    if amount_usdt <= Decimal::ZERO || min_unit <= Decimal::ZERO || price <= Decimal::ZERO {
        return Decimal::ZERO;
    }

    let cost = unit_cost(price, min_unit, commission_rate, leverage);
    if cost <= Decimal::ZERO {
        return Decimal::ZERO;
    }

    let units = (amount_usdt / cost).floor();
    (units * min_unit).normalize()
}
