//! Data models for candles, positions, orders, and instruments.

mod candle;
mod order;
mod position;

pub use candle::{closes, Candle};
pub use order::{InstrumentInfo, OrderSide};
pub use position::{Position, PositionSide};
