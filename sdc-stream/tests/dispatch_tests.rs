//! Integration tests for the dispatch core
//!
//! Tests cover:
//! - End-to-end fixture through decode, predict and fan-out
//! - One slot per record, in order, with per-record error isolation
//! - Test mode parity with live mode
//! - Monitoring failures and panics never touching the response
//! - Batches completing while monitoring is still running
//! - Emission policy (propagate / best_effort)

mod helpers;

use helpers::*;
use sdc_common::events::{FailureKind, StreamBatch};
use sdc_common::StudentId;
use sdc_stream::dispatch::{EmissionPolicy, SideEffects};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

const DRAIN: Duration = Duration::from_secs(5);

#[tokio::test]
async fn test_fixture_end_to_end() {
    let dispatcher = dispatch_core(SideEffects::disabled(), EmissionPolicy::Propagate);
    let batch = StreamBatch::from_encoded([STUDENT_256]);

    let response = dispatcher.handle_batch(&batch).await;

    assert_eq!(
        serde_json::to_value(&response).unwrap(),
        json!({
            "predictions": [{
                "model": "student-dropout-classifier",
                "version": "123",
                "prediction": {"output": "Graduate", "student_id": 256}
            }]
        })
    );
}

#[tokio::test]
async fn test_slots_follow_record_order_with_isolated_errors() {
    let dispatcher = dispatch_core(SideEffects::disabled(), EmissionPolicy::Propagate);

    let mut batch = batch(&[event(1, Some(1.0)), event(2, None), event(3, Some(2.5))]);
    batch.records.insert(
        1,
        StreamBatch::from_encoded(["%%% not base64 %%%"]).records.remove(0),
    );

    let response = dispatcher.handle_batch(&batch).await;
    let slots = &response.predictions;

    assert_eq!(slots.len(), 4);
    assert_eq!(slots[0].result().unwrap().prediction.student_id, StudentId::Number(1));
    assert_eq!(slots[1].failure_kind(), Some(FailureKind::Decode));
    assert_eq!(slots[2].failure_kind(), Some(FailureKind::Prediction));
    assert_eq!(slots[3].result().unwrap().prediction.student_id, StudentId::Number(3));
}

#[tokio::test]
async fn test_empty_batch_yields_empty_response() {
    let dispatcher = dispatch_core(SideEffects::disabled(), EmissionPolicy::Propagate);
    let response = dispatcher.handle_batch(&StreamBatch::default()).await;
    assert!(response.predictions.is_empty());
}

#[tokio::test]
async fn test_test_mode_matches_live_mode() {
    let events = [event(10, Some(1.0)), event(11, Some(2.0)), event(12, None)];

    let emitter = Arc::new(RecordingEmitter::default());
    let reporter = Arc::new(ScriptedReporter::new(ReporterMode::Succeed));
    let live = dispatch_core(
        SideEffects::live(emitter.clone(), reporter.clone()),
        EmissionPolicy::Propagate,
    );
    let test_mode = dispatch_core(SideEffects::disabled(), EmissionPolicy::Propagate);

    let live_response = live.handle_batch(&batch(&events)).await;
    let test_response = test_mode.handle_batch(&batch(&events)).await;
    assert_eq!(live_response, test_response);

    // Only successful predictions fan out
    assert!(live.drain(DRAIN).await);
    assert_eq!(emitter.emitted_ids().len(), 2);
    assert_eq!(reporter.calls(), 2);

    // The test-mode core performed no external work worth counting
    assert!(test_mode.drain(DRAIN).await);
    let stats = test_mode.monitor_pool().stats();
    assert_eq!(stats.failed + stats.panicked + stats.timed_out, 0);
}

#[tokio::test]
async fn test_monitoring_failure_and_panic_leave_response_unchanged() {
    let events = [event(20, Some(1.0)), event(21, Some(2.0))];
    let baseline = dispatch_core(SideEffects::disabled(), EmissionPolicy::Propagate)
        .handle_batch(&batch(&events))
        .await;

    for mode in [ReporterMode::Fail, ReporterMode::Panic] {
        let reporter = Arc::new(ScriptedReporter::new(mode));
        let dispatcher = dispatch_core(
            SideEffects::live(Arc::new(RecordingEmitter::default()), reporter.clone()),
            EmissionPolicy::Propagate,
        );

        let response = dispatcher.handle_batch(&batch(&events)).await;
        assert_eq!(response, baseline, "{:?} reporter changed the response", mode);

        assert!(dispatcher.drain(DRAIN).await);
        let stats = dispatcher.monitor_pool().stats();
        assert_eq!(reporter.calls(), 2);
        match mode {
            ReporterMode::Fail => assert_eq!(stats.failed, 2),
            ReporterMode::Panic => assert_eq!(stats.panicked, 2),
            _ => unreachable!(),
        }
    }
}

#[tokio::test]
async fn test_emission_failure_only_affects_its_slot() {
    let emitter = Arc::new(RecordingEmitter::failing_for(&[31]));
    let reporter = Arc::new(ScriptedReporter::new(ReporterMode::Succeed));
    let dispatcher = dispatch_core(
        SideEffects::live(emitter.clone(), reporter.clone()),
        EmissionPolicy::Propagate,
    );

    let response = dispatcher
        .handle_batch(&batch(&[event(30, Some(1.0)), event(31, Some(1.0)), event(32, Some(1.0))]))
        .await;
    let slots = &response.predictions;

    assert!(slots[0].is_completed());
    assert_eq!(slots[1].failure_kind(), Some(FailureKind::Emission));
    assert!(slots[2].is_completed());
    assert_eq!(
        emitter.emitted_ids(),
        vec![StudentId::Number(30), StudentId::Number(32)]
    );

    // Monitoring still sees the prediction whose emission failed
    assert!(dispatcher.drain(DRAIN).await);
    assert_eq!(reporter.calls(), 3);
}

#[tokio::test]
async fn test_best_effort_emission_keeps_prediction() {
    let emitter = Arc::new(RecordingEmitter::failing_for(&[41]));
    let dispatcher = dispatch_core(
        SideEffects::live(emitter, Arc::new(ScriptedReporter::new(ReporterMode::Succeed))),
        EmissionPolicy::BestEffort,
    );

    let response = dispatcher
        .handle_batch(&batch(&[event(40, Some(1.0)), event(41, Some(1.0))]))
        .await;

    assert!(response.predictions.iter().all(|s| s.is_completed()));
    assert_eq!(
        response.predictions[1].result().unwrap().prediction.output,
        "Graduate"
    );
}

#[tokio::test]
async fn test_emission_follows_stream_order() {
    let emitter = Arc::new(RecordingEmitter::default());
    let dispatcher = dispatch_core(
        SideEffects::live(emitter.clone(), Arc::new(ScriptedReporter::new(ReporterMode::Succeed))),
        EmissionPolicy::Propagate,
    );

    let events: Vec<_> = (0..20).map(|i| event(i % 3, Some(i as f64))).collect();
    dispatcher.handle_batch(&batch(&events)).await;

    let expected: Vec<StudentId> = (0..20).map(|i| StudentId::Number(i % 3)).collect();
    assert_eq!(emitter.emitted_ids(), expected);
}

#[tokio::test]
async fn test_batch_does_not_wait_for_monitoring() {
    let reporter = Arc::new(ScriptedReporter::new(ReporterMode::Block));
    let dispatcher = dispatch_core(
        SideEffects::live(Arc::new(RecordingEmitter::default()), reporter.clone()),
        EmissionPolicy::Propagate,
    );

    let response = tokio::time::timeout(
        Duration::from_secs(1),
        dispatcher.handle_batch(&batch(&[event(50, Some(1.0)), event(51, Some(2.0))])),
    )
    .await
    .expect("batch should complete while monitoring is blocked");

    assert!(response.predictions.iter().all(|s| s.is_completed()));
    assert_eq!(dispatcher.monitor_pool().stats().in_flight, 2);

    reporter.release();
    assert!(dispatcher.drain(DRAIN).await);
    let stats = dispatcher.monitor_pool().stats();
    assert_eq!(stats.completed, 2);
    assert_eq!(stats.in_flight, 0);
}
