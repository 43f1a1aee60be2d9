//! The coordinating bot.
//!
//! Owns the data source, model and publisher behind trait objects and
//! tracks the last refresh marker it has fully processed. The marker only
//! moves after a successful publish, so a failed cycle is retried on the
//! next tick even if the provider has not refreshed.
//!
//! Fitting is CPU-bound and runs on the blocking pool, so the scheduler's
//! cycle timeout also bounds a slow order search.

use chrono::NaiveDateTime;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, info};

use crate::data::DataSource;
use crate::model::{ForecastModel, FORECAST_STEPS};
use crate::publish::{format_message, Publisher};
use crate::types::{
    ArmaOrder, BotError, CycleOutcome, Forecast, PostReceipt, RefreshMarker, Snapshot,
};

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CyclePhase {
    #[default]
    Idle,
    InProgress,
}

/// Mutable bot state. Not persisted: every process starts with no marker.
#[derive(Debug, Clone, Default)]
pub struct BotState {
    pub last_refresh: Option<RefreshMarker>,
    pub phase: CyclePhase,
    pub cycles_run: u64,
    pub forecasts_published: u64,
}

// ---------------------------------------------------------------------------
// Bot
// ---------------------------------------------------------------------------

pub struct Bot {
    source: Box<dyn DataSource>,
    /// Shared with the blocking fit task. A timed-out fit keeps the lock
    /// until it finishes; the next cycle waits for it.
    model: Arc<Mutex<Box<dyn ForecastModel>>>,
    publisher: Box<dyn Publisher>,
    symbol: String,
    state: BotState,
}

impl Bot {
    pub fn new(
        source: Box<dyn DataSource>,
        model: Box<dyn ForecastModel>,
        publisher: Box<dyn Publisher>,
        symbol: impl Into<String>,
    ) -> Self {
        Self {
            source,
            model: Arc::new(Mutex::new(model)),
            publisher,
            symbol: symbol.into(),
            state: BotState::default(),
        }
    }

    // -- Facade ----------------------------------------------------------

    pub async fn start_source(&mut self) -> Result<(), BotError> {
        self.source.start().await
    }

    pub async fn start_publisher(&mut self) -> Result<(), BotError> {
        self.publisher.start().await
    }

    pub async fn fetch(&self) -> Result<Snapshot, BotError> {
        self.source.fetch().await
    }

    pub async fn fit(&self, series: Vec<f64>) -> Result<(), BotError> {
        let model = Arc::clone(&self.model);
        tokio::task::spawn_blocking(move || lock(&model).fit(&series))
            .await
            .map_err(|e| BotError::FitFailure {
                order: ArmaOrder::DEFAULT,
                reason: format!("fit task did not complete: {e}"),
            })?
    }

    pub fn predict(&self, steps: usize) -> Result<Forecast, BotError> {
        lock(&self.model).predict(steps)
    }

    pub async fn publish(&self, text: &str) -> Result<PostReceipt, BotError> {
        self.publisher.publish(text).await
    }

    /// Names of the (source, model, publisher) components.
    pub fn components(&self) -> (&'static str, &'static str, &'static str) {
        (self.source.name(), lock(&self.model).name(), self.publisher.name())
    }

    pub fn state(&self) -> &BotState {
        &self.state
    }

    pub fn last_refresh(&self) -> Option<&RefreshMarker> {
        self.state.last_refresh.as_ref()
    }

    pub fn phase(&self) -> CyclePhase {
        self.state.phase
    }

    /// Return to `Idle` after a cycle future was dropped mid-flight.
    pub fn abort_cycle(&mut self) {
        self.state.phase = CyclePhase::Idle;
    }

    // -- Cycle -----------------------------------------------------------

    /// Run one fetch → fit → predict → publish cycle.
    ///
    /// `target_time` is only used in the published text.
    pub async fn run_cycle(&mut self, target_time: NaiveDateTime) -> Result<CycleOutcome, BotError> {
        self.state.phase = CyclePhase::InProgress;
        self.state.cycles_run += 1;
        let result = self.process(target_time).await;
        self.state.phase = CyclePhase::Idle;
        result
    }

    async fn process(&mut self, target_time: NaiveDateTime) -> Result<CycleOutcome, BotError> {
        let snapshot = self.fetch().await?;

        if self.state.last_refresh.as_ref() == Some(&snapshot.marker) {
            debug!(marker = %snapshot.marker, "No refresh since last forecast");
            return Ok(CycleOutcome::Unchanged {
                marker: snapshot.marker,
            });
        }

        let current = snapshot
            .current_price()
            .ok_or_else(|| BotError::Source("snapshot contains no quotes".into()))?;

        self.fit(snapshot.closes()).await?;
        let forecast = self.predict(FORECAST_STEPS)?;
        let text = format_message(&self.symbol, current, &forecast, target_time)?;
        let receipt = self.publish(&text).await?;

        self.state.last_refresh = Some(snapshot.marker.clone());
        self.state.forecasts_published += 1;

        info!(
            marker = %snapshot.marker,
            quotes = snapshot.quotes.len(),
            order = %forecast.order,
            post_id = %receipt.post_id,
            "Forecast published"
        );

        Ok(CycleOutcome::Published {
            marker: snapshot.marker,
            forecast,
            receipt,
        })
    }
}

/// Lock the model, recovering it if an earlier fit panicked.
fn lock(model: &Mutex<Box<dyn ForecastModel>>) -> MutexGuard<'_, Box<dyn ForecastModel>> {
    model.lock().unwrap_or_else(PoisonError::into_inner)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
