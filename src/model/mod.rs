//! Forecasting models.
//!
//! Defines the `ForecastModel` trait; `arma` provides the ARMA
//! implementation used by the bot.

pub mod arma;
mod linalg;

use crate::types::{ArmaOrder, BotError, Forecast};

/// Number of steps the bot forecasts each cycle.
pub const FORECAST_STEPS: usize = 5;

/// Abstraction over stateful time-series models.
///
/// `fit` overwrites any previous fit; `predict` uses the latest one.
#[cfg_attr(test, mockall::automock)]
pub trait ForecastModel: Send + Sync {
    /// Fit on a chronologically ordered series.
    fn fit(&mut self, series: &[f64]) -> Result<(), BotError>;

    /// Forecast `steps` values past the end of the fitted series.
    fn predict(&self, steps: usize) -> Result<Forecast, BotError>;

    /// Order of the current fit, if any.
    fn order(&self) -> Option<ArmaOrder>;

    /// Model name for logging.
    fn name(&self) -> &'static str;
}
