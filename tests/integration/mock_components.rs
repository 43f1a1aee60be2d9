//! Recording mocks for integration testing.
//!
//! Every component appends to a shared call log so tests can assert the
//! order in which the bot drives them. All state is in-memory.

use async_trait::async_trait;
use chrono::{Duration, NaiveDate, NaiveDateTime, Utc};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use arma_bot::data::DataSource;
use arma_bot::model::ForecastModel;
use arma_bot::publish::Publisher;
use arma_bot::types::*;

pub type CallLog = Arc<Mutex<Vec<String>>>;

pub fn call_log() -> CallLog {
    Arc::new(Mutex::new(Vec::new()))
}

pub fn calls(log: &CallLog) -> Vec<String> {
    log.lock().unwrap().clone()
}

pub fn session_start() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 1, 2)
        .unwrap()
        .and_hms_opt(9, 30, 0)
        .unwrap()
}

/// `closes` as one-minute bars from the session open.
pub fn snapshot(marker: &str, closes: &[f64]) -> Snapshot {
    Snapshot {
        quotes: closes
            .iter()
            .enumerate()
            .map(|(i, &close)| Quote {
                timestamp: session_start() + Duration::minutes(i as i64),
                close,
            })
            .collect(),
        marker: RefreshMarker::new(marker),
    }
}

// ---------------------------------------------------------------------------
// Source
// ---------------------------------------------------------------------------

/// Serves queued snapshots; the last one repeats once the queue drains.
pub struct ScriptedSource {
    log: CallLog,
    snapshots: Arc<Mutex<VecDeque<Snapshot>>>,
    last: Arc<Mutex<Option<Snapshot>>>,
    started: bool,
}

impl ScriptedSource {
    pub fn new(log: CallLog, snapshots: Vec<Snapshot>) -> Self {
        Self {
            log,
            snapshots: Arc::new(Mutex::new(snapshots.into())),
            last: Arc::new(Mutex::new(None)),
            started: false,
        }
    }
}

#[async_trait]
impl DataSource for ScriptedSource {
    async fn start(&mut self) -> Result<(), BotError> {
        self.log.lock().unwrap().push("start_source".into());
        self.started = true;
        Ok(())
    }

    async fn fetch(&self) -> Result<Snapshot, BotError> {
        if !self.started {
            return Err(BotError::SourceUnavailable);
        }
        self.log.lock().unwrap().push("fetch".into());
        let next = self.snapshots.lock().unwrap().pop_front();
        let mut last = self.last.lock().unwrap();
        if let Some(snap) = next {
            *last = Some(snap);
        }
        last.clone()
            .ok_or_else(|| BotError::Source("no snapshot scripted".into()))
    }

    fn name(&self) -> &'static str {
        "scripted"
    }
}

// ---------------------------------------------------------------------------
// Model
// ---------------------------------------------------------------------------

/// Records calls and returns a flat forecast at the last fitted value.
pub struct RecordingModel {
    log: CallLog,
    last_value: Option<f64>,
}

impl RecordingModel {
    pub fn new(log: CallLog) -> Self {
        Self {
            log,
            last_value: None,
        }
    }
}

impl ForecastModel for RecordingModel {
    fn fit(&mut self, series: &[f64]) -> Result<(), BotError> {
        self.log.lock().unwrap().push(format!("fit({})", series.len()));
        self.last_value = series.last().copied();
        Ok(())
    }

    fn predict(&self, steps: usize) -> Result<Forecast, BotError> {
        self.log.lock().unwrap().push(format!("predict({steps})"));
        let level = self.last_value.ok_or(BotError::ModelNotFitted)?;
        Ok(Forecast {
            predictions: vec![level; steps],
            std_errors: vec![0.5; steps],
            intervals: vec![(level - 1.0, level + 1.0); steps],
            confidence: 0.95,
            order: ArmaOrder::DEFAULT,
        })
    }

    fn order(&self) -> Option<ArmaOrder> {
        self.last_value.map(|_| ArmaOrder::DEFAULT)
    }

    fn name(&self) -> &'static str {
        "recording"
    }
}

// ---------------------------------------------------------------------------
// Publisher
// ---------------------------------------------------------------------------

/// Collects posted texts. Clones share state.
#[derive(Clone)]
pub struct RecordingPublisher {
    log: CallLog,
    posts: Arc<Mutex<Vec<String>>>,
    /// If set, `publish` fails with this message.
    force_error: Arc<Mutex<Option<String>>>,
}

impl RecordingPublisher {
    pub fn new(log: CallLog) -> Self {
        Self {
            log,
            posts: Arc::new(Mutex::new(Vec::new())),
            force_error: Arc::new(Mutex::new(None)),
        }
    }

    pub fn set_error(&self, msg: &str) {
        *self.force_error.lock().unwrap() = Some(msg.to_string());
    }

    pub fn clear_error(&self) {
        *self.force_error.lock().unwrap() = None;
    }

    pub fn posts(&self) -> Vec<String> {
        self.posts.lock().unwrap().clone()
    }
}

#[async_trait]
impl Publisher for RecordingPublisher {
    async fn start(&mut self) -> Result<(), BotError> {
        self.log.lock().unwrap().push("start_publisher".into());
        Ok(())
    }

    async fn publish(&self, text: &str) -> Result<PostReceipt, BotError> {
        self.log.lock().unwrap().push("publish".into());
        if let Some(msg) = self.force_error.lock().unwrap().clone() {
            return Err(BotError::Publish(msg));
        }
        let mut posts = self.posts.lock().unwrap();
        posts.push(text.to_string());
        Ok(PostReceipt {
            post_id: format!("post-{}", posts.len()),
            publisher: "recording".into(),
            text: text.to_string(),
            posted_at: Utc::now(),
        })
    }

    fn name(&self) -> &'static str {
        "recording"
    }
}
