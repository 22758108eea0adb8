//! Tests for the connection orchestrator against the mock audio sink

use bt_audio_receiver::audio::traits::mocks::{HandleScript, MockAudioSink, MockBehavior};
use bt_audio_receiver::audio::{
    ConnectionOrchestrator, LinkState, OpenStatus, RetryPolicy, SessionState, StreamState,
};
use bt_audio_receiver::events::{drain, EventBus};
use bt_audio_receiver::SessionEvent;
use std::sync::Arc;
use std::time::Duration;

fn orchestrator(
    sink: &Arc<MockAudioSink>,
    policy: RetryPolicy,
) -> (ConnectionOrchestrator, std::sync::mpsc::Receiver<SessionEvent>) {
    let events = EventBus::new();
    let rx = events.subscribe();
    let orchestrator = ConnectionOrchestrator::with_policy(sink.clone(), events, policy);
    (orchestrator, rx)
}

#[tokio::test(start_paused = true)]
async fn test_configured_attempts_and_delay() {
    let sink = Arc::new(MockAudioSink::always(MockBehavior::Unavailable));
    let policy = RetryPolicy {
        max_attempts: 5,
        retry_delay: Duration::from_secs(2),
        state_wait_timeout: Duration::from_millis(500),
    };
    let (orchestrator, rx) = orchestrator(&sink, policy);
    let started = tokio::time::Instant::now();

    assert!(!orchestrator.open_connection("dev1").await);

    assert_eq!(sink.create_count(), 5);
    assert!(started.elapsed() >= Duration::from_secs(8));
    let errors: Vec<_> = drain(&rx)
        .into_iter()
        .filter(|e| matches!(e, SessionEvent::Error(_)))
        .collect();
    assert_eq!(errors.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_zero_attempts_still_tries_once() {
    let sink = Arc::new(MockAudioSink::always(MockBehavior::Unavailable));
    let policy = RetryPolicy {
        max_attempts: 0,
        ..RetryPolicy::default()
    };
    let (orchestrator, _rx) = orchestrator(&sink, policy);

    assert!(!orchestrator.open_connection("dev1").await);
    assert_eq!(sink.create_count(), 1);
}

#[tokio::test]
async fn test_failure_then_new_open_succeeds() {
    let sink = Arc::new(MockAudioSink::scripted(
        vec![
            MockBehavior::Handle(HandleScript::open_fails(OpenStatus::UnknownFailure)),
            MockBehavior::Handle(HandleScript::open_fails(OpenStatus::UnknownFailure)),
        ],
        MockBehavior::Handle(HandleScript::opens_streaming()),
    ));
    let policy = RetryPolicy {
        max_attempts: 2,
        retry_delay: Duration::from_millis(1),
        ..RetryPolicy::default()
    };
    let (orchestrator, rx) = orchestrator(&sink, policy);

    assert!(!orchestrator.open_connection("dev1").await);
    assert_eq!(orchestrator.state(), SessionState::Failed);

    assert!(orchestrator.open_connection("dev1").await);
    assert_eq!(orchestrator.state(), SessionState::Streaming);
    assert!(orchestrator.session_info().last_error.is_none());

    let events = drain(&rx);
    assert!(matches!(&events[0], SessionEvent::Error(msg) if msg.contains("UnknownFailure")));
    assert_eq!(
        &events[1..],
        &[
            SessionEvent::ConnectionStateChanged(true),
            SessionEvent::StreamingStateChanged(StreamState::Streaming),
        ]
    );
}

#[tokio::test]
async fn test_state_callbacks_from_platform_thread() {
    let sink = Arc::new(MockAudioSink::always(MockBehavior::Handle(
        HandleScript::opens_streaming(),
    )));
    let (orchestrator, rx) = orchestrator(&sink, RetryPolicy::default());
    assert!(orchestrator.open_connection("dev1").await);
    drain(&rx);

    let handle = Arc::clone(&sink.handles()[0]);
    std::thread::spawn(move || {
        handle.set_state(LinkState::Closed);
        handle.set_state(LinkState::Opened);
    })
    .join()
    .unwrap();

    assert_eq!(
        drain(&rx),
        vec![
            SessionEvent::StreamingStateChanged(StreamState::Connected),
            SessionEvent::StreamingStateChanged(StreamState::Streaming),
        ]
    );
    assert!(orchestrator.is_streaming());
}

#[tokio::test]
async fn test_dropping_orchestrator_releases_handle() {
    let sink = Arc::new(MockAudioSink::always(MockBehavior::Handle(
        HandleScript::opens_streaming(),
    )));
    let (orchestrator, _rx) = orchestrator(&sink, RetryPolicy::default());
    assert!(orchestrator.open_connection("dev1").await);

    drop(orchestrator);

    assert_eq!(sink.live_handles(), 0);
}
