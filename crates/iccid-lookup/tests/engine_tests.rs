mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{engine_for, init_tracing, HostCall, ScriptedHost};
use iccid_lookup::{
    BatchEngine, BatchEvent, EngineConfig, EngineState, IdentifierNormalizer, LookupError,
    LookupStatus, NoopReporter, PollerConfig, ResultPoller,
};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

const FIRST: &str = "89252637900006651908";
const SECOND: &str = "89252637900006652336";
const THIRD: &str = "89252637900006653001";

#[tokio::test(start_paused = true)]
async fn resolves_found_and_not_found_in_input_order() {
    init_tracing();
    let host = Arc::new(
        ScriptedHost::new()
            .respond(FIRST, ["", "Summary for: 717711075"])
            .respond(SECOND, ["Loading...", "Subscriber Not Found"]),
    );
    let mut engine = engine_for(host.clone());
    assert_eq!(engine.state(), EngineState::Idle);

    let result = engine
        .run_lines(["6651908", "6652336"], &NoopReporter, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(result.len(), 2);
    let first = &result.outcomes()[0];
    assert_eq!(first.partial_id(), "6651908");
    assert_eq!(first.resolved_value(), Some("717711075"));
    assert_eq!(first.status(), LookupStatus::Found);

    let second = &result.outcomes()[1];
    assert_eq!(second.partial_id(), "6652336");
    assert_eq!(second.resolved_value(), None);
    assert_eq!(second.status(), LookupStatus::NotFound);

    assert_eq!(engine.state(), EngineState::Completed);

    let submitted: Vec<String> = host
        .calls()
        .into_iter()
        .filter_map(|c| match c {
            HostCall::SetValue(v) => Some(v),
            _ => None,
        })
        .collect();
    assert_eq!(submitted, [FIRST, SECOND]);
}

#[tokio::test(start_paused = true)]
async fn item_cycle_runs_reset_configure_submit_await_recover() {
    let host = Arc::new(ScriptedHost::new().respond(FIRST, ["Summary for: 717711075"]));
    let mut engine = engine_for(host.clone());

    engine
        .run_lines(["6651908"], &NoopReporter, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(
        host.calls(),
        vec![
            HostCall::Reset,
            HostCall::SelectMode("ICCID".into()),
            HostCall::SetValue(FIRST.into()),
            HostCall::Submit,
            HostCall::Probe,
            HostCall::Reset,
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn missing_submit_control_marks_only_that_item_unavailable() {
    let host = Arc::new(
        ScriptedHost::new()
            .respond(FIRST, ["Summary for: 711111111"])
            .respond(SECOND, ["Summary for: 722222222"])
            .respond(THIRD, ["Summary for: 733333333"])
            .missing_submit_for(SECOND),
    );
    let mut engine = engine_for(host.clone());

    let result = engine
        .run_lines(
            ["6651908", "6652336", "6653001"],
            &NoopReporter,
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    let statuses: Vec<LookupStatus> = result.iter().map(|o| o.status()).collect();
    assert_eq!(
        statuses,
        [
            LookupStatus::Found,
            LookupStatus::AdapterUnavailable,
            LookupStatus::Found
        ]
    );
    assert_eq!(result.outcomes()[0].resolved_value(), Some("711111111"));
    assert_eq!(result.outcomes()[1].resolved_value(), None);
    assert!(result.outcomes()[1]
        .detail()
        .unwrap()
        .contains("submit_search"));
    assert_eq!(result.outcomes()[2].resolved_value(), Some("733333333"));

    // recovery still ran after the failed submit: 2 resets per item
    let resets = host.calls().iter().filter(|c| **c == HostCall::Reset).count();
    assert_eq!(resets, 6);
}

#[tokio::test(start_paused = true)]
async fn failed_reset_skips_to_recovery() {
    // first reset of item 1 fails; its recovery reset (call 2) succeeds
    let host = Arc::new(
        ScriptedHost::new()
            .respond(SECOND, ["Summary for: 722222222"])
            .fail_reset_call(1),
    );
    let mut engine = engine_for(host.clone());

    let result = engine
        .run_lines(["6651908", "6652336"], &NoopReporter, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(result.outcomes()[0].status(), LookupStatus::AdapterUnavailable);
    assert!(result.outcomes()[0].detail().unwrap().starts_with("reset"));
    assert_eq!(result.outcomes()[1].status(), LookupStatus::Found);

    let calls = host.calls();
    assert_eq!(calls[0], HostCall::Reset);
    assert_eq!(calls[1], HostCall::Reset);
    assert_eq!(calls[2], HostCall::Reset);
    assert_eq!(calls[3], HostCall::SelectMode("ICCID".into()));
}

#[tokio::test(start_paused = true)]
async fn failed_recovery_does_not_change_recorded_outcome() {
    // reset #2 is item 1's recovery
    let host = Arc::new(
        ScriptedHost::new()
            .respond(FIRST, ["Summary for: 717711075"])
            .respond(SECOND, ["no record found"])
            .fail_reset_call(2),
    );
    let mut engine = engine_for(host);

    let result = engine
        .run_lines(["6651908", "6652336"], &NoopReporter, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(result.outcomes()[0].status(), LookupStatus::Found);
    assert_eq!(result.outcomes()[0].resolved_value(), Some("717711075"));
    assert_eq!(result.outcomes()[1].status(), LookupStatus::NotFound);
}

#[tokio::test(start_paused = true)]
async fn missing_search_mode_option_is_adapter_unavailable() {
    let host = Arc::new(
        ScriptedHost::new()
            .respond(FIRST, ["Summary for: 717711075"])
            .mode_options(&["MSISDN", "IMSI"]),
    );
    let mut engine = engine_for(host.clone());

    let result = engine
        .run_lines(["6651908"], &NoopReporter, &CancellationToken::new())
        .await
        .unwrap();

    let outcome = &result.outcomes()[0];
    assert_eq!(outcome.status(), LookupStatus::AdapterUnavailable);
    assert!(outcome.detail().unwrap().contains("Option not found"));
    assert!(!host.calls().contains(&HostCall::Submit));
    assert_eq!(host.calls().last(), Some(&HostCall::Reset));
}

#[tokio::test(start_paused = true)]
async fn silent_portal_times_out_with_empty_value() {
    let host = Arc::new(ScriptedHost::new());
    let mut engine = engine_for(host);

    let result = engine
        .run_lines(["6651908"], &NoopReporter, &CancellationToken::new())
        .await
        .unwrap();

    let outcome = &result.outcomes()[0];
    assert_eq!(outcome.status(), LookupStatus::TimedOut);
    assert_eq!(outcome.resolved_value(), None);
}

#[tokio::test(start_paused = true)]
async fn error_region_reports_not_found() {
    let host = Arc::new(
        ScriptedHost::new()
            .respond(FIRST, [""])
            .error_text(FIRST, "Subscriber not found"),
    );
    let mut engine = engine_for(host);

    let result = engine
        .run_lines(["6651908"], &NoopReporter, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(result.outcomes()[0].status(), LookupStatus::NotFound);
}

#[tokio::test(start_paused = true)]
async fn empty_input_never_starts_a_batch() {
    let host = Arc::new(ScriptedHost::new());
    let mut engine = engine_for(host.clone());
    let (tx, mut rx) = mpsc::unbounded_channel::<BatchEvent>();

    let err = engine
        .run_lines(["", "   ", "\t"], &tx, &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, LookupError::EmptyInput));
    assert!(host.calls().is_empty());
    assert_eq!(engine.state(), EngineState::Idle);
    drop(tx);
    assert!(rx.recv().await.is_none());
}

#[tokio::test(start_paused = true)]
async fn progress_events_follow_each_item() {
    let host = Arc::new(
        ScriptedHost::new()
            .respond(FIRST, ["Summary for: 717711075"])
            .respond(SECOND, ["Subscriber Not Found"]),
    );
    let mut engine = engine_for(host);
    let (tx, mut rx) = mpsc::unbounded_channel::<BatchEvent>();

    engine
        .run_lines(["6651908", "6652336"], &tx, &CancellationToken::new())
        .await
        .unwrap();
    drop(tx);

    let mut events = Vec::new();
    while let Some(event) = rx.recv().await {
        events.push(event);
    }

    assert_eq!(events.len(), 6);
    assert_eq!(events[0], BatchEvent::Started { total: 2 });
    assert!(matches!(
        &events[1],
        BatchEvent::ItemStarted { index: 1, total: 2, partial_id } if partial_id == "6651908"
    ));
    assert!(matches!(
        &events[2],
        BatchEvent::ItemCompleted { index: 1, total: 2, outcome } if outcome.is_found()
    ));
    assert!(matches!(&events[3], BatchEvent::ItemStarted { index: 2, .. }));
    assert!(matches!(
        &events[4],
        BatchEvent::ItemCompleted { index: 2, outcome, .. } if outcome.status() == LookupStatus::NotFound
    ));
    match &events[5] {
        BatchEvent::Completed { summary } => {
            assert_eq!(summary.total, 2);
            assert_eq!(summary.found, 1);
            assert_eq!(summary.not_found, 1);
        }
        other => panic!("expected Completed, got {other:?}"),
    }
    assert_eq!(events[4].percent(), 100);
}

#[tokio::test(start_paused = true)]
async fn cancellation_stops_between_items() {
    let host = Arc::new(
        ScriptedHost::new()
            .respond(FIRST, ["Summary for: 717711075"])
            .respond(SECOND, ["Summary for: 722222222"]),
    );
    let mut engine = engine_for(host.clone());
    let cancel = CancellationToken::new();
    let (tx, mut rx) = mpsc::unbounded_channel::<BatchEvent>();

    let run = {
        let cancel = cancel.clone();
        async move {
            let result = engine.run_lines(["6651908", "6652336"], &tx, &cancel).await;
            (engine, result)
        }
    };
    let watcher = async {
        // cancel while item 1 is still in flight
        while let Some(event) = rx.recv().await {
            if matches!(event, BatchEvent::ItemStarted { index: 1, .. }) {
                cancel.cancel();
            }
            if matches!(event, BatchEvent::Abandoned { .. }) {
                return Some(event);
            }
        }
        None
    };

    let ((engine, result), abandoned) = tokio::join!(run, watcher);

    assert!(matches!(
        result,
        Err(LookupError::Cancelled {
            completed: 1,
            total: 2
        })
    ));
    assert_eq!(
        abandoned,
        Some(BatchEvent::Abandoned {
            completed: 1,
            total: 2
        })
    );
    assert_eq!(engine.state(), EngineState::Idle);

    // item 1 finished its whole cycle including recovery; item 2 never started
    let calls = host.calls();
    assert_eq!(calls.last(), Some(&HostCall::Reset));
    assert!(!calls.contains(&HostCall::SetValue(SECOND.into())));
}

#[tokio::test(start_paused = true)]
async fn rerunning_with_unchanged_portal_gives_same_outcomes() {
    let host = Arc::new(
        ScriptedHost::new()
            .respond(FIRST, ["", "Summary for: 717711075"])
            .respond(SECOND, ["Subscriber Not Found"]),
    );
    let mut engine = engine_for(host);

    let first = engine
        .run_lines(["6651908", "6652336"], &NoopReporter, &CancellationToken::new())
        .await
        .unwrap();
    let second = engine
        .run_lines(["6651908", "6652336"], &NoopReporter, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(first, second);
    assert_eq!(engine.state(), EngineState::Completed);
}

#[tokio::test(start_paused = true)]
async fn settle_pauses_are_applied_per_item() {
    let host = Arc::new(ScriptedHost::new().respond(FIRST, ["Summary for: 717711075"]));
    let config = EngineConfig {
        navigation_settle: Duration::from_millis(700),
        input_settle: Duration::from_millis(100),
        submit_settle: Duration::from_millis(300),
        ..Default::default()
    };
    let mut engine = BatchEngine::new(
        host,
        IdentifierNormalizer::default(),
        ResultPoller::new(&PollerConfig::default()).unwrap(),
        config,
    );

    let started = tokio::time::Instant::now();
    engine
        .run_lines(["6651908"], &NoopReporter, &CancellationToken::new())
        .await
        .unwrap();

    // reset 700 + select 100 + input 100 + submit 300 + recovery 700; first probe hits
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_millis(1900), "{elapsed:?}");
    assert!(elapsed < Duration::from_millis(1950), "{elapsed:?}");
}

#[tokio::test(start_paused = true)]
async fn custom_prefix_applies_to_every_request() {
    let host = Arc::new(ScriptedHost::new().respond("4412", ["Summary for: 700000001"]));
    let mut engine = BatchEngine::new(
        host.clone(),
        IdentifierNormalizer::new("44").unwrap(),
        ResultPoller::default(),
        EngineConfig::default(),
    );

    let result = engine
        .run_lines([" 12 ", "34"], &NoopReporter, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(result.outcomes()[0].resolved_value(), Some("700000001"));
    assert_eq!(result.outcomes()[1].status(), LookupStatus::TimedOut);
    assert!(host.calls().contains(&HostCall::SetValue("4434".into())));
}
