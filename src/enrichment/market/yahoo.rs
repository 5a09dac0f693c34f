//! Yahoo Finance market data.
//!
//! Daily bars come from the v8 chart API, sectors from the quote summary
//! `assetProfile` module. Yahoo has no official API and changes formats
//! without notice, so every parse failure is a [`MarketDataError::Format`].

use std::collections::HashMap;

use async_trait::async_trait;
use futures::future::join_all;
use reqwest::Url;
use serde::Deserialize;
use tracing::{debug, warn};

use super::{DailyBar, MarketDataError, MarketHistoryProvider, SectorClassifier};
use crate::config::MarketDataConfig;

const USER_AGENT: &str = "Mozilla/5.0 (X11; Linux x86_64) enrich-pipeline";

#[derive(Debug, Deserialize)]
struct ChartResponse {
    chart: ChartResult,
}

#[derive(Debug, Deserialize)]
struct ChartResult {
    result: Option<Vec<ChartData>>,
    error: Option<ApiError>,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    code: String,
    description: String,
}

#[derive(Debug, Deserialize)]
struct ChartData {
    indicators: Indicators,
}

#[derive(Debug, Deserialize)]
struct Indicators {
    quote: Vec<QuoteData>,
}

#[derive(Debug, Deserialize)]
struct QuoteData {
    #[serde(default)]
    close: Vec<Option<f64>>,
    #[serde(default)]
    volume: Vec<Option<f64>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SummaryResponse {
    quote_summary: SummaryResult,
}

#[derive(Debug, Deserialize)]
struct SummaryResult {
    result: Option<Vec<SummaryData>>,
    error: Option<ApiError>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SummaryData {
    asset_profile: Option<AssetProfile>,
}

#[derive(Debug, Deserialize)]
struct AssetProfile {
    sector: Option<String>,
}

fn api_error(symbol: &str, error: Option<ApiError>) -> MarketDataError {
    match error {
        Some(err) if err.code == "Not Found" => MarketDataError::SymbolNotFound {
            symbol: symbol.to_string(),
        },
        Some(err) => MarketDataError::format(format!("{}: {}", err.code, err.description)),
        None => MarketDataError::format("empty result with no error"),
    }
}

fn parse_chart(symbol: &str, response: ChartResponse) -> Result<Vec<DailyBar>, MarketDataError> {
    let data = match response.chart.result {
        Some(result) => result.into_iter().next(),
        None => return Err(api_error(symbol, response.chart.error)),
    }
    .ok_or_else(|| MarketDataError::format("result array is empty"))?;

    let quote = data
        .indicators
        .quote
        .into_iter()
        .next()
        .ok_or_else(|| MarketDataError::format("no quote data"))?;

    // Days without a close (holidays, halts) are skipped.
    let bars: Vec<DailyBar> = quote
        .close
        .iter()
        .enumerate()
        .filter_map(|(i, close)| {
            let close = (*close)?;
            let volume = quote.volume.get(i).copied().flatten().unwrap_or(0.0);
            Some(DailyBar::new(close, volume))
        })
        .collect();

    if bars.is_empty() {
        return Err(MarketDataError::SymbolNotFound {
            symbol: symbol.to_string(),
        });
    }
    Ok(bars)
}

fn parse_summary(symbol: &str, response: SummaryResponse) -> Result<Option<String>, MarketDataError> {
    let data = match response.quote_summary.result {
        Some(result) => result.into_iter().next(),
        None => return Err(api_error(symbol, response.quote_summary.error)),
    };
    Ok(data
        .and_then(|data| data.asset_profile)
        .and_then(|profile| profile.sector)
        .filter(|sector| !sector.trim().is_empty()))
}

#[derive(Debug, Clone)]
pub struct YahooMarketData {
    client: reqwest::Client,
    history_url: Url,
    profile_url: Url,
    range: String,
}

fn base_url(name: &str, raw: &str) -> Result<Url, MarketDataError> {
    let url = Url::parse(raw).map_err(|e| MarketDataError::format(format!("{name} '{raw}': {e}")))?;
    if url.cannot_be_a_base() {
        return Err(MarketDataError::format(format!("{name} '{raw}' cannot take a path")));
    }
    Ok(url)
}

/// `base/{symbol}` with the symbol percent-encoded as one path segment.
fn symbol_url(base: &Url, symbol: &str) -> Result<Url, MarketDataError> {
    let mut url = base.clone();
    url.path_segments_mut()
        .map_err(|_| MarketDataError::format(format!("'{base}' cannot take a path")))?
        .pop_if_empty()
        .push(symbol);
    Ok(url)
}

impl YahooMarketData {
    pub fn new(config: &MarketDataConfig) -> Result<Self, MarketDataError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .user_agent(USER_AGENT)
            .build()?;
        Ok(Self {
            client,
            history_url: base_url("history_url", &config.history_url)?,
            profile_url: base_url("profile_url", &config.profile_url)?,
            range: config.history_range.clone(),
        })
    }

    fn chart_url(&self, symbol: &str) -> Result<Url, MarketDataError> {
        let mut url = symbol_url(&self.history_url, symbol)?;
        url.query_pairs_mut()
            .append_pair("range", &self.range)
            .append_pair("interval", "1d");
        Ok(url)
    }

    fn summary_url(&self, symbol: &str) -> Result<Url, MarketDataError> {
        let mut url = symbol_url(&self.profile_url, symbol)?;
        url.query_pairs_mut().append_pair("modules", "assetProfile");
        Ok(url)
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: Url) -> Result<T, MarketDataError> {
        let response = self.client.get(url.clone()).send().await?;
        let status = response.status();
        // Yahoo answers unknown symbols with 404 and a JSON error body.
        if !status.is_success() && status != reqwest::StatusCode::NOT_FOUND {
            return Err(MarketDataError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }
        response
            .json::<T>()
            .await
            .map_err(|e| MarketDataError::format(e.to_string()))
    }

    async fn fetch_symbol(&self, symbol: &str) -> Result<Vec<DailyBar>, MarketDataError> {
        let response: ChartResponse = self.get_json(self.chart_url(symbol)?).await?;
        parse_chart(symbol, response)
    }
}

#[async_trait]
impl MarketHistoryProvider for YahooMarketData {
    async fn fetch_history(
        &self,
        tickers: &[String],
    ) -> Result<HashMap<String, Vec<DailyBar>>, MarketDataError> {
        let results = join_all(tickers.iter().map(|ticker| async move {
            (ticker.clone(), self.fetch_symbol(ticker).await)
        }))
        .await;

        let mut history = HashMap::with_capacity(results.len());
        let mut last_error = None;
        for (ticker, result) in results {
            match result {
                Ok(bars) => {
                    history.insert(ticker, bars);
                }
                Err(err) => {
                    debug!(ticker = %ticker, error = %err, "No history for ticker");
                    last_error = Some(err);
                }
            }
        }

        // Every symbol failing usually means the API itself is down.
        match last_error {
            Some(err) if history.is_empty() => {
                warn!(tickers = tickers.len(), error = %err, "⚠️ History fetch failed for every ticker");
                Err(err)
            }
            _ => Ok(history),
        }
    }
}

#[async_trait]
impl SectorClassifier for YahooMarketData {
    async fn sector(&self, ticker: &str) -> Result<Option<String>, MarketDataError> {
        let response: SummaryResponse = self.get_json(self.summary_url(ticker)?).await?;
        parse_summary(ticker, response)
    }
}
