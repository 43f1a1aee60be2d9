//! Forecast publishing.
//!
//! Defines the `Publisher` trait, the message template, and the
//! Twitter and dry-run implementations.

pub mod dry_run;
pub mod twitter;

use async_trait::async_trait;
use chrono::NaiveDateTime;

use crate::model::FORECAST_STEPS;
use crate::types::{BotError, Forecast, PostReceipt};

/// Forecast step quoted in the message: the last of the five.
pub const REPORT_STEP: usize = FORECAST_STEPS - 1;

/// Timezone label printed next to the target time.
const TARGET_TIMEZONE_LABEL: &str = "US/Eastern";

/// Abstraction over posting endpoints.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Publisher: Send + Sync {
    /// Verify credentials / open the session. Called once at startup.
    async fn start(&mut self) -> Result<(), BotError>;

    /// Post `text`. No retries.
    async fn publish(&self, text: &str) -> Result<PostReceipt, BotError>;

    /// Publisher name for logging and receipts.
    fn name(&self) -> &'static str;
}

/// Render the forecast message.
///
/// Numbers are rounded to 4 decimals; the target time drops its seconds.
pub fn format_message(
    symbol: &str,
    current: f64,
    forecast: &Forecast,
    target_time: NaiveDateTime,
) -> Result<String, BotError> {
    let (Some(prediction), Some((lower, upper))) = (
        forecast.predictions.get(REPORT_STEP),
        forecast.intervals.get(REPORT_STEP),
    ) else {
        return Err(BotError::Publish(format!(
            "forecast has {} steps, message needs step {}",
            forecast.steps(),
            REPORT_STEP + 1
        )));
    };

    Ok(format!(
        "Current price of {symbol}: {current}. Estimated price of {symbol} at {time} {TARGET_TIMEZONE_LABEL} is: {prediction}  with {confidence}% confidence interval of: [{lower} {upper}] . Calculated using ARMA model with (p,q) parameters: {order}",
        current = format_price(current),
        time = target_time.format("%Y-%m-%d %H:%M"),
        prediction = format_price(*prediction),
        confidence = format_percent(forecast.confidence),
        lower = format_price(*lower),
        upper = format_price(*upper),
        order = forecast.order,
    ))
}

/// Round to 4 decimals, printed in shortest form with at least one
/// fractional digit (`13.0`, `12.3457`).
fn format_price(value: f64) -> String {
    let rounded = (value * 10_000.0).round() / 10_000.0;
    format!("{rounded:?}")
}

/// Confidence level as a percentage, without a trailing `.0` (`95`, `97.5`).
fn format_percent(level: f64) -> String {
    let pct = (level * 100.0 * 10_000.0).round() / 10_000.0;
    if pct.fract() == 0.0 {
        format!("{pct:.0}")
    } else {
        format!("{pct}")
    }
}
