//! Alpha Vantage intraday quote source.
//!
//! API: `https://www.alphavantage.co/query?function=TIME_SERIES_INTRADAY`
//! Auth: API key via `apikey` query param.
//! Rate limit: tight on the free tier; throttled responses come back as
//! HTTP 200 with a `Note` or `Information` field instead of data.
//!
//! Only the `4. close` column and `3. Last Refreshed` are consumed.

use async_trait::async_trait;
use chrono::NaiveDateTime;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info};

use super::{normalize_quotes, DataSource};
use crate::config::SourceConfig;
use crate::types::{BotError, Quote, RefreshMarker, Snapshot};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

const BASE_URL: &str = "https://www.alphavantage.co/query";
const SOURCE_NAME: &str = "alphavantage";
const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

// ---------------------------------------------------------------------------
// API response types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct IntradayResponse {
    #[serde(rename = "Meta Data")]
    meta: Option<MetaData>,
    #[serde(rename = "Error Message")]
    error_message: Option<String>,
    #[serde(rename = "Note")]
    note: Option<String>,
    #[serde(rename = "Information")]
    information: Option<String>,
    /// The series key depends on the interval, e.g. `Time Series (1min)`.
    #[serde(flatten)]
    rest: HashMap<String, serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct MetaData {
    #[serde(rename = "3. Last Refreshed")]
    last_refreshed: String,
}

#[derive(Debug, Deserialize)]
struct Bar {
    #[serde(rename = "4. close")]
    close: String,
}

// ---------------------------------------------------------------------------
// Source
// ---------------------------------------------------------------------------

pub struct AlphaVantageSource {
    api_key: SecretString,
    symbol: String,
    interval: String,
    output_size: String,
    timeout: Duration,
    /// Built by `start`.
    http: Option<Client>,
}

impl AlphaVantageSource {
    pub fn new(api_key: SecretString, symbol: &str, cfg: &SourceConfig) -> Self {
        Self {
            api_key,
            symbol: symbol.to_string(),
            interval: cfg.interval.clone(),
            output_size: cfg.output_size.clone(),
            timeout: Duration::from_secs(cfg.timeout_secs),
            http: None,
        }
    }

    /// Parse a `TIME_SERIES_INTRADAY` payload into a normalised snapshot.
    pub fn parse_intraday(body: &str, interval: &str) -> Result<Snapshot, BotError> {
        let resp: IntradayResponse = serde_json::from_str(body)
            .map_err(|e| BotError::Source(format!("Failed to parse Alpha Vantage response: {e}")))?;

        if let Some(msg) = resp.error_message {
            return Err(BotError::Source(format!("Alpha Vantage error: {msg}")));
        }

        let series_key = format!("Time Series ({interval})");
        let Some(series) = resp.rest.get(&series_key) else {
            let reason = resp
                .note
                .or(resp.information)
                .unwrap_or_else(|| format!("missing `{series_key}`"));
            return Err(BotError::Source(format!("Alpha Vantage returned no data: {reason}")));
        };

        let meta = resp
            .meta
            .ok_or_else(|| BotError::Source("Alpha Vantage response has no Meta Data".into()))?;

        let bars: HashMap<String, Bar> = serde_json::from_value(series.clone())
            .map_err(|e| BotError::Source(format!("Malformed `{series_key}`: {e}")))?;

        let mut quotes = Vec::with_capacity(bars.len());
        for (stamp, bar) in bars {
            let timestamp = match NaiveDateTime::parse_from_str(&stamp, TIMESTAMP_FORMAT) {
                Ok(t) => t,
                Err(e) => {
                    debug!(stamp = %stamp, error = %e, "Skipping bar with bad timestamp");
                    continue;
                }
            };
            let close = match bar.close.trim().parse::<f64>() {
                Ok(c) if c.is_finite() => c,
                _ => {
                    debug!(stamp = %stamp, close = %bar.close, "Skipping bar with bad close");
                    continue;
                }
            };
            quotes.push(Quote { timestamp, close });
        }

        let quotes = normalize_quotes(quotes);
        if quotes.is_empty() {
            return Err(BotError::Source("No usable quotes after filtering".into()));
        }

        Ok(Snapshot {
            quotes,
            marker: RefreshMarker::new(meta.last_refreshed),
        })
    }
}

#[async_trait]
impl DataSource for AlphaVantageSource {
    async fn start(&mut self) -> Result<(), BotError> {
        let http = Client::builder()
            .timeout(self.timeout)
            .user_agent("arma-bot/0.1.0")
            .build()
            .map_err(|e| BotError::Source(format!("Failed to build Alpha Vantage HTTP client: {e}")))?;
        self.http = Some(http);
        info!(symbol = %self.symbol, interval = %self.interval, "Alpha Vantage stream started");
        Ok(())
    }

    async fn fetch(&self) -> Result<Snapshot, BotError> {
        let http = self.http.as_ref().ok_or(BotError::SourceUnavailable)?;

        debug!(symbol = %self.symbol, "Fetching intraday series");

        let resp = http
            .get(BASE_URL)
            .query(&[
                ("function", "TIME_SERIES_INTRADAY"),
                ("symbol", self.symbol.as_str()),
                ("interval", self.interval.as_str()),
                ("outputsize", self.output_size.as_str()),
                ("apikey", self.api_key.expose_secret().as_str()),
            ])
            .send()
            .await
            .map_err(|e| BotError::Source(format!("Alpha Vantage request failed: {}", e.without_url())))?;

        if !resp.status().is_success() {
            let status = resp.status();
            return Err(BotError::Source(format!("Alpha Vantage API error: {status}")));
        }

        let body = resp
            .text()
            .await
            .map_err(|e| BotError::Source(format!("Failed to read Alpha Vantage body: {e}")))?;

        let snapshot = Self::parse_intraday(&body, &self.interval)?;
        debug!(
            quotes = snapshot.quotes.len(),
            marker = %snapshot.marker,
            "Intraday series fetched"
        );
        Ok(snapshot)
    }

    fn name(&self) -> &'static str {
        SOURCE_NAME
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
