//! Cycle scheduler.
//!
//! The provider refreshes its 1-minute series on the minute, so the first
//! tick lands `tick_offset_secs` past the next minute boundary and later
//! ticks follow every `interval_secs`. A slow cycle pushes the next tick
//! back rather than overlapping it.
//!
//! The loop runs as a tokio task and stops when the shutdown channel
//! flips (or its sender is dropped).

use chrono::{Local, NaiveDateTime, Timelike};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, warn};

use super::bot::Bot;
use crate::config::ScheduleConfig;
use crate::types::{BotError, CycleOutcome};

/// Wall-clock source; injectable for tests.
pub type Clock = Arc<dyn Fn() -> NaiveDateTime + Send + Sync>;

/// Local wall-clock time.
pub fn system_clock() -> Clock {
    Arc::new(|| Local::now().naive_local())
}

// ---------------------------------------------------------------------------
// Timing
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct Schedule {
    tick_offset: chrono::Duration,
    interval: Duration,
    forecast_offset: chrono::Duration,
}

impl Schedule {
    pub fn new(cfg: &ScheduleConfig) -> Self {
        Self {
            tick_offset: chrono::Duration::seconds(i64::from(cfg.tick_offset_secs)),
            interval: Duration::from_secs(cfg.interval_secs),
            forecast_offset: chrono::Duration::minutes(cfg.forecast_offset_mins),
        }
    }

    /// Delay from `now` until the tick offset past the next minute boundary.
    pub fn first_delay(&self, now: NaiveDateTime) -> Duration {
        let minute_start = now
            .with_second(0)
            .and_then(|t| t.with_nanosecond(0))
            .unwrap_or(now);
        let next_tick = minute_start + chrono::Duration::minutes(1) + self.tick_offset;
        (next_tick - now).to_std().unwrap_or(Duration::ZERO)
    }

    /// Delay between every later cycle.
    pub fn next_delay(&self) -> Duration {
        self.interval
    }

    /// Display time the forecast is said to apply to.
    pub fn target_time(&self, now: NaiveDateTime) -> NaiveDateTime {
        now + self.forecast_offset
    }
}

// ---------------------------------------------------------------------------
// Loop
// ---------------------------------------------------------------------------

pub struct Scheduler {
    bot: Bot,
    schedule: Schedule,
    cycle_timeout: Duration,
    clock: Clock,
}

impl Scheduler {
    pub fn new(bot: Bot, cfg: &ScheduleConfig) -> Self {
        Self {
            bot,
            schedule: Schedule::new(cfg),
            cycle_timeout: Duration::from_secs(cfg.cycle_timeout_secs),
            clock: system_clock(),
        }
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    pub fn bot(&self) -> &Bot {
        &self.bot
    }

    /// Run until shutdown. Returns the bot so callers can inspect its state.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> Bot {
        let mut delay = self.schedule.first_delay((self.clock)());
        info!(
            first_tick_in_secs = delay.as_secs_f64(),
            interval_secs = self.schedule.next_delay().as_secs(),
            "Scheduler started"
        );

        loop {
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = shutdown.changed() => {
                    info!("Shutdown signal received, stopping scheduler");
                    break;
                }
            }

            self.tick().await;
            delay = self.schedule.next_delay();
        }

        info!(
            cycles = self.bot.state().cycles_run,
            published = self.bot.state().forecasts_published,
            "Scheduler stopped"
        );
        self.bot
    }

    /// Run one bounded cycle and log its result. Never fails.
    pub async fn tick(&mut self) -> Option<CycleOutcome> {
        let now = (self.clock)();
        let target_time = self.schedule.target_time(now);

        let result = match tokio::time::timeout(self.cycle_timeout, self.bot.run_cycle(target_time)).await {
            Ok(result) => result,
            Err(_) => {
                self.bot.abort_cycle();
                Err(BotError::Timeout(self.cycle_timeout))
            }
        };

        match result {
            Ok(outcome) => {
                if let CycleOutcome::Published { ref receipt, .. } = outcome {
                    info!(
                        post_id = %receipt.post_id,
                        target_time = %target_time.format("%Y-%m-%d %H:%M"),
                        "Cycle complete"
                    );
                }
                Some(outcome)
            }
            Err(BotError::SourceUnavailable) => {
                warn!("Data source not started, skipping cycle");
                None
            }
            Err(BotError::ModelNotFitted) => {
                error!("Predict ran before fit; cycle aborted");
                None
            }
            Err(e) => {
                error!(error = %e, "Cycle failed, continuing to next");
                None
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
