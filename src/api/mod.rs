//! Exchange and notification clients behind the [`Gateway`] seam.

mod bybit_client;
mod gateway;
#[cfg(test)]
pub mod mock;
mod telegram;
mod types;

pub use bybit_client::{BybitClient, DEMO_URL, MAINNET_URL, TESTNET_URL};
pub use gateway::{Gateway, GatewayError, LiveGateway};
pub use telegram::TelegramNotifier;
