//! Market data sources.
//!
//! Defines the `DataSource` trait and the normalisation every source
//! applies before handing quotes to the bot.

pub mod alphavantage;

use async_trait::async_trait;

use crate::types::{BotError, Quote, Snapshot};

/// Abstraction over intraday quote providers.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DataSource: Send + Sync {
    /// Open the connection / build the client. `fetch` fails with
    /// `SourceUnavailable` until this has succeeded.
    async fn start(&mut self) -> Result<(), BotError>;

    /// Latest price series (ascending, no zero closes) and refresh marker.
    async fn fetch(&self) -> Result<Snapshot, BotError>;

    /// Source name for logging.
    fn name(&self) -> &'static str;
}

/// Drop zero-priced bars and order the rest oldest first.
pub fn normalize_quotes(mut quotes: Vec<Quote>) -> Vec<Quote> {
    quotes.retain(|q| q.close != 0.0);
    quotes.sort_by_key(|q| q.timestamp);
    quotes
}
