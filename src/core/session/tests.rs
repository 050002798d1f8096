//! Tests for SessionRotator

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use bytes::Bytes;
use parking_lot::RwLock as SyncRwLock;
use tokio::time::sleep;

use crate::core::session::test_support::MockFactory;
use crate::core::session::{RotationPolicy, SessionError, SessionRotator};
use crate::core::soniox::{ConnectionState, StreamError, Token};

/// Short intervals so rotation tests run entirely on the paused clock:
/// rotation triggers at 540s, promotion at 550s.
fn quick_policy() -> RotationPolicy {
    RotationPolicy {
        connection_lifetime: Duration::from_secs(600),
        rotation_margin: Duration::from_secs(60),
        overlap_window: Duration::from_secs(10),
        handover_retry_delay: Duration::from_secs(5),
    }
}

/// Rotator over a mock factory with a result accumulator already attached.
fn collecting_rotator(
    policy: RotationPolicy,
) -> (SessionRotator, Arc<MockFactory>, Arc<SyncRwLock<Vec<Token>>>) {
    let factory = MockFactory::new();
    let rotator = SessionRotator::new(factory.as_factory(), policy);

    let received = Arc::new(SyncRwLock::new(Vec::new()));
    let sink = received.clone();
    rotator.on_result(Arc::new(move |tokens| {
        let sink = sink.clone();
        Box::pin(async move {
            sink.write().extend(tokens);
        })
    }));

    (rotator, factory, received)
}

#[tokio::test]
async fn test_start_connects_primary() {
    let (rotator, factory, _) = collecting_rotator(quick_policy());

    rotator.start().await.unwrap();

    assert_eq!(factory.connection_count(), 1);
    assert_eq!(factory.handle(0).connect_calls(), 1);
    assert!(rotator.is_streaming());
    assert_eq!(rotator.state(), ConnectionState::Streaming);
    assert_eq!(rotator.rotation_count(), 0);
}

#[tokio::test]
async fn test_start_twice_rejected() {
    let (rotator, _, _) = collecting_rotator(quick_policy());

    rotator.start().await.unwrap();
    let second = rotator.start().await;

    assert!(matches!(second, Err(SessionError::InvalidState(_))));
}

#[tokio::test]
async fn test_start_surfaces_connect_failure_and_allows_retry() {
    let (rotator, factory, _) = collecting_rotator(quick_policy());
    factory.fail_next_connect(StreamError::ConnectionFailed("dial failed".to_string()));

    let first = rotator.start().await;
    assert!(matches!(first, Err(SessionError::Connection(_))));
    assert_eq!(rotator.state(), ConnectionState::Idle);

    // A failed start leaves no connection behind; a later start succeeds.
    rotator.start().await.unwrap();
    assert_eq!(factory.connection_count(), 2);
    assert!(rotator.is_streaming());
}

#[tokio::test]
async fn test_audio_reaches_primary_in_order() {
    let (rotator, factory, _) = collecting_rotator(quick_policy());
    rotator.start().await.unwrap();

    rotator.send_audio(Bytes::from_static(b"one"));
    rotator.send_audio(Bytes::from_static(b"two"));
    rotator.send_audio(Bytes::from_static(b"three"));

    let frames = factory.handle(0).frames();
    assert_eq!(frames, vec![
        Bytes::from_static(b"one"),
        Bytes::from_static(b"two"),
        Bytes::from_static(b"three"),
    ]);
}

#[tokio::test]
async fn test_results_forwarded_to_consumer() {
    let (rotator, factory, received) = collecting_rotator(quick_policy());
    rotator.start().await.unwrap();

    factory
        .handle(0)
        .emit_results(vec![Token::final_text("hello"), Token::interim_text("wor")])
        .await;

    let received = received.read();
    assert_eq!(received.len(), 2);
    assert_eq!(received[0].text, "hello");
    assert!(received[0].is_final);
    assert_eq!(received[1].text, "wor");
    assert!(!received[1].is_final);
}

#[tokio::test]
async fn test_finalize_routes_to_primary() {
    let (rotator, factory, _) = collecting_rotator(quick_policy());
    rotator.start().await.unwrap();

    rotator.finalize();

    assert_eq!(factory.handle(0).finalize_calls(), 1);
}

#[tokio::test]
async fn test_error_forwarded_from_authoritative() {
    let (rotator, factory, _) = collecting_rotator(quick_policy());
    let errors = Arc::new(SyncRwLock::new(Vec::new()));
    let sink = errors.clone();
    rotator.on_error(Arc::new(move |error| {
        let sink = sink.clone();
        Box::pin(async move {
            sink.write().push(error);
        })
    }));
    rotator.start().await.unwrap();

    factory
        .handle(0)
        .emit_error(StreamError::ProviderError("500: transient".to_string()))
        .await;

    assert_eq!(errors.read().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_rotation_dual_writes_then_promotes() {
    let (rotator, factory, received) = collecting_rotator(quick_policy());
    rotator.start().await.unwrap();
    rotator.send_audio(Bytes::from_static(b"before"));

    // Past the rotation trigger (540s) but inside the overlap window.
    sleep(Duration::from_secs(541)).await;
    assert_eq!(factory.connection_count(), 2);
    assert_eq!(factory.handle(1).connect_calls(), 1);
    assert_eq!(rotator.rotation_count(), 0);
    assert_eq!(factory.handle(0).close_calls(), 0);

    // Dual write: the overlap frame lands on both connections.
    rotator.send_audio(Bytes::from_static(b"during"));
    assert!(factory.handle(0).received_frame(b"during"));
    assert!(factory.handle(1).received_frame(b"during"));

    // The replacement is already authoritative; late results from the
    // outgoing primary are suppressed.
    factory
        .handle(0)
        .emit_results(vec![Token::final_text("stale")])
        .await;
    assert!(received.read().is_empty());

    factory
        .handle(1)
        .emit_results(vec![Token::final_text("fresh")])
        .await;
    assert_eq!(received.read().len(), 1);
    assert_eq!(received.read()[0].text, "fresh");

    // Past the end of the overlap window: promotion and primary close.
    sleep(Duration::from_secs(10)).await;
    assert_eq!(rotator.rotation_count(), 1);
    assert_eq!(factory.handle(0).close_calls(), 1);

    rotator.send_audio(Bytes::from_static(b"after"));
    assert!(!factory.handle(0).received_frame(b"after"));
    assert!(factory.handle(1).received_frame(b"after"));
    assert!(rotator.is_streaming());
}

#[tokio::test(start_paused = true)]
async fn test_rotation_reschedules_from_promotion_time() {
    let (rotator, factory, _) = collecting_rotator(quick_policy());
    rotator.start().await.unwrap();

    // First rotation: trigger at 540s, promotion at 550s.
    sleep(Duration::from_secs(541)).await;
    sleep(Duration::from_secs(10)).await;
    assert_eq!(rotator.rotation_count(), 1);

    // The second trigger is 540s after the promotion (1090s), not 540s
    // after the previous trigger (1080s). At 1089s nothing has happened.
    sleep(Duration::from_secs(538)).await;
    assert_eq!(factory.connection_count(), 2);

    sleep(Duration::from_secs(2)).await;
    assert_eq!(factory.connection_count(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_failed_handover_keeps_primary_and_retries() {
    let (rotator, factory, received) = collecting_rotator(quick_policy());
    rotator.start().await.unwrap();
    // Scripted after start, so the failure hits the rotation secondary.
    factory.fail_next_connect(StreamError::ConnectionFailed("refused".to_string()));

    sleep(Duration::from_secs(541)).await;

    // The replacement failed; the primary is untouched and authoritative.
    assert_eq!(factory.connection_count(), 2);
    assert_eq!(factory.handle(1).close_calls(), 1);
    assert_eq!(factory.handle(0).close_calls(), 0);
    assert_eq!(rotator.rotation_count(), 0);

    rotator.send_audio(Bytes::from_static(b"held"));
    assert!(factory.handle(0).received_frame(b"held"));

    factory
        .handle(0)
        .emit_results(vec![Token::final_text("still here")])
        .await;
    assert_eq!(received.read().len(), 1);

    // Retry fires handover_retry_delay (5s) later and succeeds.
    sleep(Duration::from_secs(5)).await;
    assert_eq!(factory.connection_count(), 3);

    sleep(Duration::from_secs(10)).await;
    assert_eq!(rotator.rotation_count(), 1);
    assert_eq!(factory.handle(0).close_calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_stop_closes_both_and_cancels_rotation() {
    let (rotator, factory, _) = collecting_rotator(quick_policy());
    rotator.start().await.unwrap();

    // Stop in the middle of an overlap window, with two live connections.
    sleep(Duration::from_secs(541)).await;
    assert_eq!(factory.connection_count(), 2);

    rotator.stop();
    assert_eq!(factory.handle(0).close_calls(), 1);
    assert_eq!(factory.handle(1).close_calls(), 1);
    assert_eq!(rotator.state(), ConnectionState::Closed);

    // The aborted rotation never completes and no further connections open.
    sleep(Duration::from_secs(3600)).await;
    assert_eq!(factory.connection_count(), 2);
    assert_eq!(rotator.rotation_count(), 0);

    rotator.stop();
    assert_eq!(factory.handle(0).close_calls(), 1);
    assert_eq!(factory.handle(1).close_calls(), 1);
}

#[tokio::test]
async fn test_start_after_stop_rejected() {
    let (rotator, _, _) = collecting_rotator(quick_policy());
    rotator.start().await.unwrap();
    rotator.stop();

    let restarted = rotator.start().await;
    assert!(matches!(restarted, Err(SessionError::InvalidState(_))));
}

#[tokio::test(start_paused = true)]
async fn test_finished_suppressed_from_superseded_connection() {
    let (rotator, factory, _) = collecting_rotator(quick_policy());
    let finished = Arc::new(AtomicUsize::new(0));
    let counter = finished.clone();
    rotator.on_finished(Arc::new(move || {
        let counter = counter.clone();
        Box::pin(async move {
            counter.fetch_add(1, Ordering::SeqCst);
        })
    }));
    rotator.start().await.unwrap();

    sleep(Duration::from_secs(541)).await;

    factory.handle(0).emit_finished().await;
    assert_eq!(finished.load(Ordering::SeqCst), 0);

    factory.handle(1).emit_finished().await;
    assert_eq!(finished.load(Ordering::SeqCst), 1);
}

/// Three back-to-back rotations at production-shaped intervals: a 60 minute
/// connection ceiling with a 5 minute margin rotates every 55 minutes. Every
/// frame submitted along the way must land on the connection that was
/// authoritative at the time, with overlap frames on both.
#[tokio::test(start_paused = true)]
async fn test_audio_continuity_across_three_rotations() {
    let policy = RotationPolicy {
        connection_lifetime: Duration::from_secs(3600),
        rotation_margin: Duration::from_secs(300),
        overlap_window: Duration::from_secs(10),
        handover_retry_delay: Duration::from_secs(15),
    };
    let interval = policy.rotation_interval();
    assert_eq!(interval, Duration::from_secs(3300));

    let (rotator, factory, _) = collecting_rotator(policy);
    rotator.start().await.unwrap();
    sleep(Duration::from_secs(1)).await;

    for cycle in 0u64..3 {
        let primary = cycle as usize;
        let replacement = primary + 1;

        let pre = format!("pre{cycle}").into_bytes();
        rotator.send_audio(pre.clone().into());
        assert!(factory.handle(primary).received_frame(&pre));

        // Advance to one second past this cycle's rotation trigger.
        sleep(interval).await;
        assert_eq!(factory.connection_count(), replacement + 1);

        let mid = format!("mid{cycle}").into_bytes();
        rotator.send_audio(mid.clone().into());
        assert!(factory.handle(primary).received_frame(&mid));
        assert!(factory.handle(replacement).received_frame(&mid));

        // Advance past the overlap window to one second after promotion.
        sleep(Duration::from_secs(10)).await;
        assert_eq!(rotator.rotation_count(), cycle + 1);
        assert_eq!(factory.handle(primary).close_calls(), 1);

        let post = format!("post{cycle}").into_bytes();
        rotator.send_audio(post.clone().into());
        assert!(!factory.handle(primary).received_frame(&post));
        assert!(factory.handle(replacement).received_frame(&post));
    }

    assert_eq!(factory.connection_count(), 4);
    assert_eq!(rotator.rotation_count(), 3);
    assert!(rotator.is_streaming());

    // A mid-lifetime connection sees, in order: the overlap frame from its
    // birth, then every frame of its own tenure. Nothing is lost or
    // reordered across either handover.
    assert_eq!(factory.handle(1).frames(), vec![
        Bytes::from(b"mid0".to_vec()),
        Bytes::from(b"post0".to_vec()),
        Bytes::from(b"pre1".to_vec()),
        Bytes::from(b"mid1".to_vec()),
    ]);
}
