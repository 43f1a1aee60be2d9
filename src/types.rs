//! Shared types for the forecast bot.
//!
//! These types form the data model passed between the data source,
//! the forecasting model, the publisher and the coordinating bot.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

// ---------------------------------------------------------------------------
// Quotes
// ---------------------------------------------------------------------------

/// A single intraday bar, reduced to the closing price.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quote {
    /// Bar timestamp in the provider's local exchange time.
    pub timestamp: NaiveDateTime,
    pub close: f64,
}

/// Opaque freshness token from the data provider.
///
/// Only ever compared for equality.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RefreshMarker(String);

impl RefreshMarker {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RefreshMarker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Result of one fetch: chronologically ascending quotes plus the
/// provider's refresh marker.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub quotes: Vec<Quote>,
    pub marker: RefreshMarker,
}

impl Snapshot {
    /// Closing prices in chronological order.
    pub fn closes(&self) -> Vec<f64> {
        self.quotes.iter().map(|q| q.close).collect()
    }

    /// The most recent close, if any.
    pub fn current_price(&self) -> Option<f64> {
        self.quotes.last().map(|q| q.close)
    }
}

// ---------------------------------------------------------------------------
// Model
// ---------------------------------------------------------------------------

/// ARMA lag orders `(p, q)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ArmaOrder {
    pub p: usize,
    pub q: usize,
}

impl ArmaOrder {
    /// Order used when nothing else is configured, and the fit fallback.
    pub const DEFAULT: ArmaOrder = ArmaOrder { p: 1, q: 1 };

    pub const fn new(p: usize, q: usize) -> Self {
        Self { p, q }
    }
}

impl Default for ArmaOrder {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl fmt::Display for ArmaOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.p, self.q)
    }
}

/// Multi-step forecast with per-step uncertainty.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Forecast {
    pub predictions: Vec<f64>,
    pub std_errors: Vec<f64>,
    /// `(lower, upper)` per step.
    pub intervals: Vec<(f64, f64)>,
    /// Coverage of `intervals`, e.g. 0.95.
    pub confidence: f64,
    pub order: ArmaOrder,
}

impl Forecast {
    pub fn steps(&self) -> usize {
        self.predictions.len()
    }
}

// ---------------------------------------------------------------------------
// Publishing
// ---------------------------------------------------------------------------

/// Acknowledgement returned by a publisher.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostReceipt {
    pub post_id: String,
    pub publisher: String,
    pub text: String,
    pub posted_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Cycle results
// ---------------------------------------------------------------------------

/// What a single scheduler tick did.
#[derive(Debug, Clone, PartialEq)]
pub enum CycleOutcome {
    /// The provider has not refreshed since the last published cycle.
    Unchanged { marker: RefreshMarker },
    /// New data was fitted, forecast and published.
    Published {
        marker: RefreshMarker,
        forecast: Forecast,
        receipt: PostReceipt,
    },
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Per-cycle failures. None of these stop the scheduler.
#[derive(Debug, thiserror::Error)]
pub enum BotError {
    #[error("Data source used before it was started")]
    SourceUnavailable,

    #[error("Data source error: {0}")]
    Source(String),

    #[error("Model has not been fitted yet")]
    ModelNotFitted,

    #[error("Fit failed for ARMA{order}: {reason}")]
    FitFailure { order: ArmaOrder, reason: String },

    #[error("Publish failed: {0}")]
    Publish(String),

    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Cycle timed out after {0:?}")]
    Timeout(Duration),
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
