//! # Enrichment Engine
//!
//! Adds the derived market fields to a chunk of records:
//!
//! - `Sector` from the classifier, `Unknown` when unavailable
//! - `Price_1..Price_10`: most recent closes converted by the chunk's rate
//! - `Volume_1..Volume_10` and their mean in `VolumeAvg`
//! - `PriceSMA_EUR` from the numeric average service
//! - `CurrencyUsed`
//!
//! External failures never fail the chunk. History degrades to empty, the
//! rate to the configured fallback, sectors to `Unknown` and the average to
//! the local mean.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::stream::{self, StreamExt};
use tokio::time::timeout;
use tracing::{debug, instrument, warn};

use super::market::{DailyBar, ExchangeRateProvider, MarketHistoryProvider, SectorClassifier};
use super::numeric_average::{local_mean, NumericAverageClient};
use crate::config::MarketDataConfig;
use crate::constants::{fields, HISTORY_SLOTS};
use crate::models::Record;

/// Derived values for one record before formatting.
#[derive(Debug, Clone, Default, PartialEq)]
struct Derived {
    sector: String,
    prices: Vec<f64>,
    volumes: Vec<f64>,
    volume_avg: f64,
}

pub struct EnrichmentEngine {
    history: Arc<dyn MarketHistoryProvider>,
    sectors: Arc<dyn SectorClassifier>,
    rates: Arc<dyn ExchangeRateProvider>,
    averager: NumericAverageClient,
    history_timeout: Duration,
    request_timeout: Duration,
    fallback_rate: f64,
    currency: String,
    max_concurrency: usize,
}

impl std::fmt::Debug for EnrichmentEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EnrichmentEngine")
            .field("averager", &self.averager)
            .field("currency", &self.currency)
            .field("fallback_rate", &self.fallback_rate)
            .field("max_concurrency", &self.max_concurrency)
            .finish_non_exhaustive()
    }
}

impl EnrichmentEngine {
    pub fn new(
        history: Arc<dyn MarketHistoryProvider>,
        sectors: Arc<dyn SectorClassifier>,
        rates: Arc<dyn ExchangeRateProvider>,
        averager: NumericAverageClient,
        config: &MarketDataConfig,
    ) -> Self {
        Self {
            history,
            sectors,
            rates,
            averager,
            history_timeout: config.history_timeout(),
            request_timeout: config.request_timeout(),
            fallback_rate: config.fallback_rate,
            currency: config.target_currency.clone(),
            max_concurrency: config.max_concurrency.max(1),
        }
    }

    /// Enrich every record, returning them in input order with their
    /// original fields intact.
    #[instrument(skip_all, fields(records = records.len()))]
    pub async fn enrich_chunk(&self, records: &[Record]) -> Vec<Record> {
        if records.is_empty() {
            return Vec::new();
        }
        let started = Instant::now();

        let tickers = distinct_tickers(records);
        let history = self.load_history(&tickers).await;
        let rate = self.exchange_rate().await;
        let sectors = self.classify(&tickers).await;

        let derived: Vec<Derived> = records
            .iter()
            .map(|record| derive(record, &history, &sectors, rate))
            .collect();

        // Fan out the averaging requests, fan back in preserving order. Each
        // future owns its inputs so the chunk future stays `Send`.
        let pending: Vec<_> = derived
            .iter()
            .map(|d| {
                let averager = self.averager.clone();
                let prices = d.prices.clone();
                async move { averager.average(&prices).await }
            })
            .collect();
        let averages: Vec<f64> = stream::iter(pending)
            .buffered(self.max_concurrency)
            .collect()
            .await;

        let enriched: Vec<Record> = records
            .iter()
            .zip(derived)
            .zip(averages)
            .map(|((record, derived), average)| self.apply(record.clone(), derived, average))
            .collect();

        debug!(
            tickers = tickers.len(),
            with_history = history.len(),
            rate,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "✨ Chunk enriched"
        );
        enriched
    }

    async fn load_history(&self, tickers: &[String]) -> HashMap<String, Vec<DailyBar>> {
        if tickers.is_empty() {
            return HashMap::new();
        }
        match timeout(self.history_timeout, self.history.fetch_history(tickers)).await {
            Ok(Ok(history)) => history,
            Ok(Err(err)) => {
                warn!(tickers = tickers.len(), error = %err, "⚠️ History unavailable, continuing without it");
                HashMap::new()
            }
            Err(_) => {
                warn!(
                    tickers = tickers.len(),
                    timeout_ms = self.history_timeout.as_millis() as u64,
                    "⏰ History fetch timed out, continuing without it"
                );
                HashMap::new()
            }
        }
    }

    async fn exchange_rate(&self) -> f64 {
        match timeout(self.request_timeout, self.rates.rate()).await {
            Ok(Ok(rate)) => rate,
            Ok(Err(err)) => {
                warn!(error = %err, fallback = self.fallback_rate, "⚠️ Exchange rate unavailable, using fallback");
                self.fallback_rate
            }
            Err(_) => {
                warn!(fallback = self.fallback_rate, "⏰ Exchange rate timed out, using fallback");
                self.fallback_rate
            }
        }
    }

    /// One lookup per distinct ticker.
    async fn classify(&self, tickers: &[String]) -> HashMap<String, String> {
        let pending: Vec<_> = tickers
            .iter()
            .map(|ticker| lookup_sector(self.sectors.clone(), ticker.clone(), self.request_timeout))
            .collect();
        stream::iter(pending)
            .buffer_unordered(self.max_concurrency)
            .collect()
            .await
    }

    fn apply(&self, mut record: Record, derived: Derived, average: f64) -> Record {
        record.set(fields::SECTOR, derived.sector);
        for slot in 0..HISTORY_SLOTS {
            let price = derived
                .prices
                .get(slot)
                .map(|p| format!("{p:.2}"))
                .unwrap_or_default();
            let volume = derived
                .volumes
                .get(slot)
                .map(|v| format!("{v:.0}"))
                .unwrap_or_default();
            record.set(fields::price(slot + 1), price);
            record.set(fields::volume(slot + 1), volume);
        }
        record.set(fields::VOLUME_AVG, format!("{:.0}", derived.volume_avg));
        record.set(fields::PRICE_SMA, format!("{average:.2}"));
        record.set(fields::CURRENCY_USED, self.currency.as_str());
        record
    }
}

async fn lookup_sector(
    sectors: Arc<dyn SectorClassifier>,
    ticker: String,
    limit: Duration,
) -> (String, String) {
    let sector = match timeout(limit, sectors.sector(&ticker)).await {
        Ok(Ok(Some(sector))) => sector,
        Ok(Ok(None)) => fields::UNKNOWN_SECTOR.to_string(),
        Ok(Err(err)) => {
            debug!(ticker = %ticker, error = %err, "Sector lookup failed");
            fields::UNKNOWN_SECTOR.to_string()
        }
        Err(_) => {
            debug!(ticker = %ticker, "Sector lookup timed out");
            fields::UNKNOWN_SECTOR.to_string()
        }
    };
    (ticker, sector)
}

/// Distinct non-empty tickers in first-seen order.
fn distinct_tickers(records: &[Record]) -> Vec<String> {
    let mut seen = HashSet::new();
    records
        .iter()
        .filter_map(Record::ticker)
        .filter(|ticker| seen.insert(*ticker))
        .map(str::to_string)
        .collect()
}

fn derive(
    record: &Record,
    history: &HashMap<String, Vec<DailyBar>>,
    sectors: &HashMap<String, String>,
    rate: f64,
) -> Derived {
    let Some(ticker) = record.ticker() else {
        return Derived {
            sector: fields::UNKNOWN_SECTOR.to_string(),
            ..Derived::default()
        };
    };

    let sector = sectors
        .get(ticker)
        .cloned()
        .unwrap_or_else(|| fields::UNKNOWN_SECTOR.to_string());

    let bars = history.get(ticker).map(Vec::as_slice).unwrap_or_default();
    let recent = &bars[bars.len().saturating_sub(HISTORY_SLOTS)..];
    let prices: Vec<f64> = recent.iter().map(|bar| bar.close * rate).collect();
    let volumes: Vec<f64> = recent.iter().map(|bar| bar.volume).collect();
    let volume_avg = local_mean(&volumes);

    Derived {
        sector,
        prices,
        volumes,
        volume_avg,
    }
}
