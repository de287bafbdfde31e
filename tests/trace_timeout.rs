//! Path-trace lifecycle under the engine's bounded wait: timeout is a
//! presentational state, a late matching result still supersedes it, a
//! superseded target is ignored, and disconnect cancels the timer.

mod common;

use std::time::Duration;

use common::FakeTransport;
use meshchat::engine::Engine;
use meshchat::ingest::{Event, TraceEvent};
use meshchat::model::{ConnectionKind, TraceState};

const SHORT_TIMEOUT: Duration = Duration::from_millis(50);

fn trace_response(from: &str) -> Event {
    Event::Traceroute(TraceEvent {
        request_id: None,
        from: from.to_string(),
        route: vec![7, 8],
        route_back: vec![8, 7],
        snr_towards: vec![2.5, -1.0],
        snr_back: vec![-3.0, 0.5],
    })
}

#[tokio::test]
async fn no_response_within_bound_shows_timeout() {
    let (engine, handle, _event_tx) = Engine::with_trace_timeout(FakeTransport::new(), SHORT_TIMEOUT);
    tokio::spawn(engine.run());

    handle.trace_route("!aa000001").await.unwrap();
    let snapshot = handle.snapshot().await.unwrap();
    assert!(matches!(
        snapshot.trace_state(),
        TraceState::Pending { target } if target == "!aa000001"
    ));

    tokio::time::sleep(SHORT_TIMEOUT * 4).await;
    let snapshot = handle.snapshot().await.unwrap();
    assert!(matches!(
        snapshot.trace_state(),
        TraceState::TimedOut { target } if target == "!aa000001"
    ));
}

#[tokio::test]
async fn late_result_clears_the_timeout_state() {
    let (engine, handle, event_tx) = Engine::with_trace_timeout(FakeTransport::new(), SHORT_TIMEOUT);
    tokio::spawn(engine.run());

    handle.trace_route("!aa000001").await.unwrap();
    tokio::time::sleep(SHORT_TIMEOUT * 4).await;

    event_tx.send(trace_response("!aa000001")).unwrap();
    let snapshot = handle.snapshot().await.unwrap();
    match snapshot.trace_state() {
        TraceState::Complete(result) => {
            assert_eq!(result.from, "!aa000001");
            assert_eq!(result.route, vec![7, 8]);
        }
        other => panic!("expected completed trace, got {other:?}"),
    }
}

#[tokio::test]
async fn result_for_superseded_target_is_ignored() {
    let (engine, handle, event_tx) =
        Engine::with_trace_timeout(FakeTransport::new(), Duration::from_secs(30));
    tokio::spawn(engine.run());

    handle.trace_route("!bb000002").await.unwrap();
    handle.trace_route("!aa000001").await.unwrap();

    // A straggler response for the abandoned request shows up.
    event_tx.send(trace_response("!bb000002")).unwrap();
    let snapshot = handle.snapshot().await.unwrap();
    assert!(matches!(
        snapshot.trace_state(),
        TraceState::Pending { target } if target == "!aa000001"
    ));

    // The response for the live request resolves it.
    event_tx.send(trace_response("!aa000001")).unwrap();
    let snapshot = handle.snapshot().await.unwrap();
    assert!(matches!(snapshot.trace_state(), TraceState::Complete(_)));
}

#[tokio::test]
async fn new_request_rearms_the_timer() {
    let (engine, handle, _event_tx) = Engine::with_trace_timeout(FakeTransport::new(), SHORT_TIMEOUT);
    tokio::spawn(engine.run());

    handle.trace_route("!bb000002").await.unwrap();
    tokio::time::sleep(SHORT_TIMEOUT / 2).await;
    handle.trace_route("!aa000001").await.unwrap();
    tokio::time::sleep(SHORT_TIMEOUT * 4).await;

    // Only the second request may time out; the first's deadline is gone.
    let snapshot = handle.snapshot().await.unwrap();
    assert!(matches!(
        snapshot.trace_state(),
        TraceState::TimedOut { target } if target == "!aa000001"
    ));
}

#[tokio::test]
async fn disconnect_cancels_the_outstanding_trace() {
    let transport = FakeTransport::new();
    let (engine, handle, _event_tx) = Engine::with_trace_timeout(transport, SHORT_TIMEOUT);
    tokio::spawn(engine.run());

    handle
        .connect(ConnectionKind::Tcp, "meshtastic.local:4403")
        .await
        .unwrap();
    handle.trace_route("!aa000001").await.unwrap();
    handle.disconnect().await.unwrap();

    tokio::time::sleep(SHORT_TIMEOUT * 4).await;
    let snapshot = handle.snapshot().await.unwrap();
    assert_eq!(*snapshot.trace_state(), TraceState::Idle);
}
