//! # Enrichment
//!
//! - [`engine`] - derived fields for a chunk of records
//! - [`numeric_average`] - client for the line-oriented averaging service
//! - [`market`] - history, sector and exchange-rate collaborators

pub mod engine;
pub mod market;
pub mod numeric_average;

pub use engine::EnrichmentEngine;
pub use market::{
    DailyBar, ExchangeRateProvider, FloatRatesProvider, MarketDataError, MarketHistoryProvider,
    SectorClassifier, StaticMarketData, YahooMarketData,
};
pub use numeric_average::{NumericAverageClient, NumericAverageError};
