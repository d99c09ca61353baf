use async_trait::async_trait;
use rust_decimal::Decimal;
use trading_core_types::{Candle, CoreError, PositionInfo, Side};

/// Balance snapshot for the quote asset (USDT), as returned by
/// `fetch_balance`.
#[derive(Debug, Clone, Copy)]
pub struct Balance {
    pub total: Decimal,
    pub free: Decimal,
    pub used: Decimal,
}

/// An order submission, the input to `create_order`.
#[derive(Debug, Clone)]
pub struct OrderRequest {
    pub symbol: String,
    pub side: Side,
    pub amount: Decimal,
    pub price: Option<Decimal>,
    pub reduce_only: bool,
}

/// The external collaborator this crate assumes exists: a derivatives
/// exchange client. Strategies are generic over this trait so the concrete
/// REST/WS implementation (out of scope here) can be swapped for a test
/// double.
#[async_trait]
pub trait ExchangeClient: Send + Sync {
    async fn fetch_balance(&self) -> Result<Balance, CoreError>;
    async fn fetch_ohlcv(&self, symbol: &str, timeframe: &str, limit: usize) -> Result<Vec<Candle>, CoreError>;
    async fn fetch_positions(&self, symbol: &str) -> Result<Vec<PositionInfo>, CoreError>;
    async fn create_order(&self, order: OrderRequest) -> Result<String, CoreError>;
    async fn cancel_order(&self, symbol: &str, order_id: &str) -> Result<(), CoreError>;
    async fn set_leverage(&self, symbol: &str, leverage: u32) -> Result<(), CoreError>;
}
