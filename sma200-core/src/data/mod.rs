//! Market-data access: provider trait, Yahoo implementation, HTTP plumbing.

pub mod circuit_breaker;
pub mod http;
pub mod provider;
pub mod yahoo;

pub use circuit_breaker::CircuitBreaker;
pub use provider::{
    BarsRequest, CloseMatrix, FetchProgress, Interval, LogProgress, MarketDataProvider,
    SilentProgress,
};
pub use yahoo::YahooProvider;
