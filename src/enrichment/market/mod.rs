//! # Market Data Collaborators
//!
//! Seams for the external lookups enrichment depends on: daily price history,
//! sector classification and the USD exchange rate. Each has an HTTP
//! implementation and [`StaticMarketData`] serves all three from memory.

pub mod floatrates;
pub mod yahoo;

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use floatrates::FloatRatesProvider;
pub use yahoo::YahooMarketData;

#[derive(Debug, Error)]
pub enum MarketDataError {
    #[error("HTTP request failed: {message}")]
    Http { message: String },

    #[error("Unexpected status {status} from {url}")]
    Status { url: String, status: u16 },

    #[error("Response format changed: {message}")]
    Format { message: String },

    #[error("Symbol not found: {symbol}")]
    SymbolNotFound { symbol: String },
}

impl MarketDataError {
    pub fn format(message: impl Into<String>) -> Self {
        Self::Format {
            message: message.into(),
        }
    }
}

impl From<reqwest::Error> for MarketDataError {
    fn from(err: reqwest::Error) -> Self {
        Self::Http {
            message: err.to_string(),
        }
    }
}

/// One trading day, oldest first within a history.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DailyBar {
    pub close: f64,
    pub volume: f64,
}

impl DailyBar {
    pub fn new(close: f64, volume: f64) -> Self {
        Self { close, volume }
    }
}

#[async_trait]
pub trait MarketHistoryProvider: Send + Sync + 'static {
    /// Daily bars for each ticker. Tickers without data are absent from the map.
    async fn fetch_history(
        &self,
        tickers: &[String],
    ) -> Result<HashMap<String, Vec<DailyBar>>, MarketDataError>;
}

#[async_trait]
pub trait SectorClassifier: Send + Sync + 'static {
    /// `Ok(None)` when the ticker is known but has no sector.
    async fn sector(&self, ticker: &str) -> Result<Option<String>, MarketDataError>;
}

#[async_trait]
pub trait ExchangeRateProvider: Send + Sync + 'static {
    /// Units of the target currency per USD.
    async fn rate(&self) -> Result<f64, MarketDataError>;
}

/// Fixed market data for tests and offline runs.
#[derive(Debug, Default)]
pub struct StaticMarketData {
    history: HashMap<String, Vec<DailyBar>>,
    sectors: HashMap<String, String>,
    rate: Option<f64>,
    fail_history: bool,
    history_calls: AtomicUsize,
    rate_calls: AtomicUsize,
    sector_calls: AtomicUsize,
}

impl StaticMarketData {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_history(mut self, ticker: impl Into<String>, bars: Vec<DailyBar>) -> Self {
        self.history.insert(ticker.into(), bars);
        self
    }

    pub fn with_sector(mut self, ticker: impl Into<String>, sector: impl Into<String>) -> Self {
        self.sectors.insert(ticker.into(), sector.into());
        self
    }

    pub fn with_rate(mut self, rate: f64) -> Self {
        self.rate = Some(rate);
        self
    }

    /// Make every history fetch fail.
    pub fn failing_history(mut self) -> Self {
        self.fail_history = true;
        self
    }

    pub fn history_calls(&self) -> usize {
        self.history_calls.load(Ordering::SeqCst)
    }

    pub fn rate_calls(&self) -> usize {
        self.rate_calls.load(Ordering::SeqCst)
    }

    pub fn sector_calls(&self) -> usize {
        self.sector_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MarketHistoryProvider for StaticMarketData {
    async fn fetch_history(
        &self,
        tickers: &[String],
    ) -> Result<HashMap<String, Vec<DailyBar>>, MarketDataError> {
        self.history_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_history {
            return Err(MarketDataError::Http {
                message: "history source offline".to_string(),
            });
        }
        Ok(tickers
            .iter()
            .filter_map(|ticker| {
                self.history
                    .get(ticker)
                    .map(|bars| (ticker.clone(), bars.clone()))
            })
            .collect())
    }
}

#[async_trait]
impl SectorClassifier for StaticMarketData {
    async fn sector(&self, ticker: &str) -> Result<Option<String>, MarketDataError> {
        self.sector_calls.fetch_add(1, Ordering::SeqCst);
        self.sectors
            .get(ticker)
            .cloned()
            .map(Some)
            .ok_or_else(|| MarketDataError::SymbolNotFound {
                symbol: ticker.to_string(),
            })
    }
}

#[async_trait]
impl ExchangeRateProvider for StaticMarketData {
    async fn rate(&self) -> Result<f64, MarketDataError> {
        self.rate_calls.fetch_add(1, Ordering::SeqCst);
        self.rate
            .ok_or_else(|| MarketDataError::format("no exchange rate configured"))
    }
}
