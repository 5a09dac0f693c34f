//! Exchange rates from the floatrates daily USD table.
//!
//! The table is a JSON object keyed by lowercase currency code, each entry
//! carrying a `rate` in units of that currency per USD.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use super::{ExchangeRateProvider, MarketDataError};
use crate::config::MarketDataConfig;

#[derive(Debug, Deserialize)]
struct RateEntry {
    rate: f64,
}

fn extract_rate(
    table: &HashMap<String, RateEntry>,
    currency: &str,
) -> Result<f64, MarketDataError> {
    let entry = table
        .get(currency)
        .ok_or_else(|| MarketDataError::format(format!("no '{currency}' entry in rate table")))?;
    if !entry.rate.is_finite() || entry.rate <= 0.0 {
        return Err(MarketDataError::format(format!(
            "invalid '{currency}' rate {}",
            entry.rate
        )));
    }
    Ok(entry.rate)
}

#[derive(Debug, Clone)]
pub struct FloatRatesProvider {
    client: reqwest::Client,
    url: String,
    currency: String,
}

impl FloatRatesProvider {
    pub fn new(config: &MarketDataConfig) -> Result<Self, MarketDataError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()?;
        Ok(Self {
            client,
            url: config.rate_url.clone(),
            currency: config.target_currency.to_lowercase(),
        })
    }
}

#[async_trait]
impl ExchangeRateProvider for FloatRatesProvider {
    async fn rate(&self) -> Result<f64, MarketDataError> {
        let response = self.client.get(&self.url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(MarketDataError::Status {
                url: self.url.clone(),
                status: status.as_u16(),
            });
        }
        let table: HashMap<String, RateEntry> = response
            .json()
            .await
            .map_err(|e| MarketDataError::format(e.to_string()))?;
        let rate = extract_rate(&table, &self.currency)?;
        debug!(currency = %self.currency, rate, "💱 Exchange rate fetched");
        Ok(rate)
    }
}
