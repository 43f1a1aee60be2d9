//! End-to-end cycles: fetch, fit, predict, format, publish.

use chrono::{NaiveDate, NaiveDateTime};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio_test::assert_ok;

use arma_bot::config::ScheduleConfig;
use arma_bot::data::alphavantage::AlphaVantageSource;
use arma_bot::engine::{Bot, CyclePhase, Scheduler};
use arma_bot::model::arma::ArmaModel;
use arma_bot::model::FORECAST_STEPS;
use arma_bot::publish::dry_run::DryRunPublisher;
use arma_bot::types::*;

use crate::mock_components::*;

fn target_time() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 1, 2)
        .unwrap()
        .and_hms_opt(13, 5, 0)
        .unwrap()
}

/// AR(1) around 15.0 with phi = 0.6.
fn ar1_series(n: usize, seed: u64) -> Vec<f64> {
    let mut rng = StdRng::seed_from_u64(seed);
    let noise = Normal::new(0.0, 0.05).unwrap();
    let mut x = 0.0;
    (0..n)
        .map(|_| {
            x = 0.6 * x + noise.sample(&mut rng);
            15.0 + x
        })
        .collect()
}

async fn recording_bot(
    snapshots: Vec<Snapshot>,
) -> (Bot, CallLog, RecordingPublisher) {
    let log = call_log();
    let publisher = RecordingPublisher::new(log.clone());
    let mut bot = Bot::new(
        Box::new(ScriptedSource::new(log.clone(), snapshots)),
        Box::new(RecordingModel::new(log.clone())),
        Box::new(publisher.clone()),
        "VXX",
    );
    assert_ok!(bot.start_source().await);
    assert_ok!(bot.start_publisher().await);
    (bot, log, publisher)
}

#[test]
fn test_provider_payload_is_filtered_and_ordered() {
    let body = r#"{
        "Meta Data": {"3. Last Refreshed": "2024-01-02 09:33:00"},
        "Time Series (1min)": {
            "2024-01-02 09:33:00": {"4. close": "15.30"},
            "2024-01-02 09:31:00": {"4. close": "15.10"},
            "2024-01-02 09:32:00": {"4. close": "0.0"},
            "2024-01-02 09:30:00": {"4. close": "15.00"}
        }
    }"#;
    let snap = AlphaVantageSource::parse_intraday(body, "1min").unwrap();
    assert_eq!(snap.closes(), vec![15.0, 15.1, 15.3]);
    assert_eq!(snap.marker.as_str(), "2024-01-02 09:33:00");
}

#[tokio::test]
async fn test_cycle_drives_components_in_order() {
    let (mut bot, log, publisher) =
        recording_bot(vec![snapshot("m1", &[15.0, 15.25, 15.5])]).await;

    let outcome = bot.run_cycle(target_time()).await.unwrap();

    assert_eq!(
        calls(&log),
        vec![
            "start_source",
            "start_publisher",
            "fetch",
            "fit(3)",
            "predict(5)",
            "publish",
        ]
    );
    assert_eq!(
        publisher.posts(),
        vec![
            "Current price of VXX: 15.5. Estimated price of VXX at 2024-01-02 13:05 US/Eastern is: 15.5  with 95% confidence interval of: [14.5 16.5] . Calculated using ARMA model with (p,q) parameters: (1, 1)"
                .to_string()
        ]
    );
    match outcome {
        CycleOutcome::Published { marker, receipt, .. } => {
            assert_eq!(marker, RefreshMarker::new("m1"));
            assert_eq!(receipt.post_id, "post-1");
        }
        other => panic!("expected Published, got {other:?}"),
    }
    assert_eq!(bot.last_refresh(), Some(&RefreshMarker::new("m1")));
    assert_eq!(bot.phase(), CyclePhase::Idle);
}

#[tokio::test]
async fn test_unchanged_marker_skips_fit_and_publish() {
    let (mut bot, log, publisher) =
        recording_bot(vec![snapshot("m1", &[15.0, 15.1, 15.2])]).await;

    assert_ok!(bot.run_cycle(target_time()).await);
    let before = calls(&log).len();

    let outcome = bot.run_cycle(target_time()).await.unwrap();
    assert_eq!(
        outcome,
        CycleOutcome::Unchanged {
            marker: RefreshMarker::new("m1")
        }
    );
    assert_eq!(&calls(&log)[before..], ["fetch"]);
    assert_eq!(publisher.posts().len(), 1);
    assert_eq!(bot.state().forecasts_published, 1);
}

#[tokio::test]
async fn test_failed_publish_is_retried_on_next_cycle() {
    let (mut bot, _log, publisher) =
        recording_bot(vec![snapshot("m1", &[15.0, 15.1, 15.2])]).await;

    publisher.set_error("rate limited");
    let err = bot.run_cycle(target_time()).await.unwrap_err();
    assert!(matches!(err, BotError::Publish(_)));
    assert_eq!(bot.last_refresh(), None);
    assert_eq!(bot.phase(), CyclePhase::Idle);

    publisher.clear_error();
    let outcome = bot.run_cycle(target_time()).await.unwrap();
    assert!(matches!(outcome, CycleOutcome::Published { .. }));
    assert_eq!(publisher.posts().len(), 1);
    assert_eq!(bot.last_refresh(), Some(&RefreshMarker::new("m1")));
}

#[tokio::test]
async fn test_fetch_before_start_fails_without_side_effects() {
    let log = call_log();
    let publisher = RecordingPublisher::new(log.clone());
    let mut bot = Bot::new(
        Box::new(ScriptedSource::new(log.clone(), vec![snapshot("m1", &[15.0])])),
        Box::new(RecordingModel::new(log.clone())),
        Box::new(publisher.clone()),
        "VXX",
    );

    let err = bot.run_cycle(target_time()).await.unwrap_err();
    assert!(matches!(err, BotError::SourceUnavailable));
    assert!(calls(&log).is_empty());
    assert_eq!(bot.state().cycles_run, 1);
}

#[tokio::test]
async fn test_arma_cycle_with_dry_run_publisher() {
    let closes = ar1_series(400, 7);
    let current = *closes.last().unwrap();
    let mut bot = Bot::new(
        Box::new(ScriptedSource::new(call_log(), vec![snapshot("m1", &closes)])),
        Box::new(ArmaModel::fixed(ArmaOrder::DEFAULT)),
        Box::new(DryRunPublisher::new()),
        "VXX",
    );
    assert_ok!(bot.start_source().await);
    assert_ok!(bot.start_publisher().await);

    let outcome = bot.run_cycle(target_time()).await.unwrap();
    let CycleOutcome::Published { forecast, receipt, .. } = outcome else {
        panic!("expected a published forecast");
    };

    assert_eq!(forecast.steps(), FORECAST_STEPS);
    assert_eq!(forecast.order, ArmaOrder::DEFAULT);
    for (pred, (lower, upper)) in forecast.predictions.iter().zip(&forecast.intervals) {
        assert!(lower < pred && pred < upper);
        assert!((pred - 15.0).abs() < 0.5);
    }
    // Uncertainty grows with the horizon.
    assert!(forecast.std_errors.windows(2).all(|w| w[0] <= w[1] + 1e-12));

    assert_eq!(receipt.publisher, "dry-run");
    assert!(receipt.post_id.starts_with("dry-run-"));
    let expected_prefix = format!(
        "Current price of VXX: {:?}.",
        (current * 10_000.0).round() / 10_000.0
    );
    assert!(receipt.text.starts_with(&expected_prefix));
    assert!(receipt.text.contains("at 2024-01-02 13:05 US/Eastern"));
    assert!(receipt.text.ends_with("parameters: (1, 1)"));
}

#[tokio::test]
async fn test_bic_model_reports_selected_order() {
    let closes = ar1_series(400, 11);
    let mut bot = Bot::new(
        Box::new(ScriptedSource::new(call_log(), vec![snapshot("m1", &closes)])),
        Box::new(ArmaModel::bic_search(2, 1)),
        Box::new(DryRunPublisher::new()),
        "VXX",
    );
    assert_ok!(bot.start_source().await);

    let outcome = bot.run_cycle(target_time()).await.unwrap();
    let CycleOutcome::Published { forecast, receipt, .. } = outcome else {
        panic!("expected a published forecast");
    };
    assert!(forecast.order.p <= 2 && forecast.order.q <= 1);
    assert!(receipt.text.ends_with(&format!("parameters: {}", forecast.order)));
}

#[tokio::test(start_paused = true)]
async fn test_scheduler_publishes_each_new_refresh() {
    let (bot, log, publisher) = recording_bot(vec![
        snapshot("m1", &[15.0, 15.1]),
        snapshot("m2", &[15.0, 15.1, 15.2]),
    ])
    .await;

    let now = NaiveDate::from_ymd_opt(2024, 1, 2)
        .unwrap()
        .and_hms_opt(10, 0, 30)
        .unwrap();
    let scheduler =
        Scheduler::new(bot, &ScheduleConfig::default()).with_clock(Arc::new(move || now));

    let (tx, rx) = watch::channel(false);
    let handle = tokio::spawn(scheduler.run(rx));

    // Ticks at +31s, +91s and +151s; the third sees no new refresh.
    tokio::time::sleep(Duration::from_secs(170)).await;
    tx.send(true).unwrap();
    let bot = handle.await.unwrap();

    assert_eq!(bot.state().cycles_run, 3);
    assert_eq!(bot.state().forecasts_published, 2);
    assert_eq!(bot.last_refresh(), Some(&RefreshMarker::new("m2")));

    let posts = publisher.posts();
    assert_eq!(posts.len(), 2);
    assert!(posts[0].contains("at 2024-01-02 13:05 US/Eastern"));
    assert_eq!(
        calls(&log).iter().filter(|c| c.as_str() == "fetch").count(),
        3
    );
}
