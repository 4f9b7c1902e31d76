//! Exactly-once release of remote handles on every terminal path.

mod common;

use std::sync::Arc;

use common::*;
use fetch_bridge::config::{parse_config, BridgeConfig};
use fetch_bridge::error::{BridgeError, ErrorKind, FetchError};
use fetch_bridge::wire::ResourceId;
use fetch_bridge::{Dispatcher, FetchInit};
use futures_util::StreamExt;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

const RID: ResourceId = ResourceId(1);

fn setup() -> (Arc<MockBridge>, Arc<Dispatcher<MockBridge, MockNative>>) {
    let bridge = MockBridge::new();
    let dispatcher = Dispatcher::new(bridge.clone(), MockNative::default());
    (bridge, Arc::new(dispatcher))
}

fn full_release() -> Vec<Call> {
    vec![Call::CancelBody(BODY_RID), Call::Cancel(RID)]
}

/// Poll until the spawned driver has issued `n` release calls.
async fn wait_releases(bridge: &MockBridge, n: usize) {
    timeout(TEST_TIMEOUT, async {
        while bridge.releases().len() < n {
            tokio::task::yield_now().await;
        }
    })
    .await
    .expect("release calls never issued");
}

#[tokio::test]
async fn test_release_once_on_success() {
    let (bridge, dispatcher) = setup();
    bridge.script(vec![header_event(0, 200, &[]), data_event(1, "ok"), done_event(2)]);

    let response = timeout(TEST_TIMEOUT, dispatcher.fetch("https://example.com/data", FetchInit::new()))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(response.text().await.unwrap(), "ok");
    assert_eq!(bridge.releases(), full_release());

    // Late traffic after the terminal event changes nothing.
    let _ = bridge.sender().deliver(done_event(3));
    tokio::task::yield_now().await;
    assert_eq!(bridge.releases(), full_release());
}

#[tokio::test]
async fn test_release_once_on_mid_stream_error() {
    let (bridge, dispatcher) = setup();
    bridge.script(vec![
        header_event(0, 200, &[]),
        data_event(1, "par"),
        error_event(2, "reset"),
        done_event(3),
        error_event(4, "again"),
    ]);

    let response = timeout(TEST_TIMEOUT, dispatcher.fetch("https://example.com/data", FetchInit::new()))
        .await
        .unwrap()
        .unwrap();
    let err = response.bytes().await.unwrap_err();
    assert_eq!(err, FetchError::Stream("reset".into()));
    assert_eq!(bridge.releases(), full_release());
}

#[tokio::test]
async fn test_error_before_header_rejects_response() {
    let (bridge, dispatcher) = setup();
    bridge.script(vec![error_event(0, "dns failure")]);

    let err = timeout(TEST_TIMEOUT, dispatcher.fetch("https://example.com/data", FetchInit::new()))
        .await
        .unwrap()
        .unwrap_err();
    assert_eq!(err, FetchError::Network("dns failure".into()));
    // Only the request handle was ever allocated.
    assert_eq!(bridge.releases(), vec![Call::Cancel(RID)]);
}

#[tokio::test]
async fn test_cancel_before_open_allocates_nothing() {
    let (bridge, dispatcher) = setup();
    let signal = CancellationToken::new();
    signal.cancel();

    let err = dispatcher
        .fetch("https://example.com/data", FetchInit::new().signal(signal))
        .await
        .unwrap_err();
    assert!(err.is_cancelled());
    assert!(bridge.calls().is_empty());
}

#[tokio::test]
async fn test_cancel_before_header_rejects_and_ignores_late_header() {
    let (bridge, dispatcher) = setup();
    let signal = CancellationToken::new();

    let task = {
        let dispatcher = dispatcher.clone();
        let signal = signal.clone();
        tokio::spawn(async move {
            dispatcher
                .fetch("https://example.com/data", FetchInit::new().signal(signal))
                .await
        })
    };

    bridge.wait_sent().await;
    signal.cancel();

    let result = timeout(TEST_TIMEOUT, task).await.unwrap().unwrap();
    assert_eq!(result.unwrap_err(), FetchError::Cancelled);
    assert_eq!(bridge.releases(), vec![Call::Cancel(RID)]);

    // A header arriving after cancellation is never surfaced.
    let _ = bridge.sender().deliver(header_event(0, 200, &[]));
    let _ = bridge.sender().deliver(done_event(1));
    tokio::task::yield_now().await;
    assert_eq!(bridge.releases(), vec![Call::Cancel(RID)]);
}

#[tokio::test]
async fn test_cancel_after_header_errors_body() {
    let (bridge, dispatcher) = setup();
    bridge.script(vec![header_event(0, 200, &[]), data_event(1, "first")]);
    let signal = CancellationToken::new();

    let mut response = timeout(
        TEST_TIMEOUT,
        dispatcher.fetch("https://example.com/data", FetchInit::new().signal(signal.clone())),
    )
    .await
    .unwrap()
    .unwrap();
    let mut body = response.take_body().unwrap();
    assert_eq!(&body.next().await.unwrap().unwrap()[..], b"first");

    signal.cancel();
    let next = timeout(TEST_TIMEOUT, body.next()).await.unwrap();
    assert_eq!(next, Some(Err(FetchError::Cancelled)));
    assert_eq!(body.next().await, None);
    assert_eq!(bridge.releases(), full_release());

    // Cancelling again, or finishing late, is a no-op.
    signal.cancel();
    let _ = bridge.sender().deliver(done_event(2));
    tokio::task::yield_now().await;
    assert_eq!(bridge.releases(), full_release());
}

#[tokio::test]
async fn test_cancel_during_send() {
    let (bridge, dispatcher) = setup();
    *bridge.hang_send.lock().unwrap() = true;
    let signal = CancellationToken::new();

    let task = {
        let dispatcher = dispatcher.clone();
        let signal = signal.clone();
        tokio::spawn(async move {
            dispatcher
                .fetch("https://example.com/data", FetchInit::new().signal(signal))
                .await
        })
    };

    bridge.wait_sent().await;
    signal.cancel();
    let result = timeout(TEST_TIMEOUT, task).await.unwrap().unwrap();
    assert!(result.unwrap_err().is_cancelled());
    assert_eq!(bridge.releases(), vec![Call::Cancel(RID)]);
}

#[tokio::test]
async fn test_dropped_body_counts_as_cancel() {
    let (bridge, dispatcher) = setup();
    bridge.script(vec![header_event(0, 200, &[])]);

    let response = timeout(TEST_TIMEOUT, dispatcher.fetch("https://example.com/data", FetchInit::new()))
        .await
        .unwrap()
        .unwrap();
    drop(response);

    wait_releases(&bridge, 2).await;
    assert_eq!(bridge.releases(), full_release());
}

#[tokio::test]
async fn test_dropped_response_future_counts_as_cancel() {
    let (bridge, dispatcher) = setup();

    let task = {
        let dispatcher = dispatcher.clone();
        tokio::spawn(async move { dispatcher.fetch("https://example.com/data", FetchInit::new()).await })
    };
    bridge.wait_sent().await;
    task.abort();

    wait_releases(&bridge, 1).await;
    assert_eq!(bridge.releases(), vec![Call::Cancel(RID)]);
}

#[tokio::test]
async fn test_open_failure_needs_no_cleanup() {
    let (bridge, dispatcher) = setup();
    *bridge.fail_open.lock().unwrap() = Some(BridgeError::Network("refused".into()));

    let err = dispatcher
        .fetch("https://example.com/data", FetchInit::new())
        .await
        .unwrap_err();
    assert_eq!(err, FetchError::RemoteOpen(BridgeError::Network("refused".into())));
    assert!(bridge.releases().is_empty());
    assert_eq!(bridge.calls(), vec![Call::Open(1)]);
}

#[tokio::test]
async fn test_send_failure_releases_request() {
    let (bridge, dispatcher) = setup();
    *bridge.fail_send.lock().unwrap() = Some(BridgeError::Remote("no such route".into()));

    let err = dispatcher
        .fetch("https://example.com/data", FetchInit::new())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::RemoteSend);
    assert_eq!(bridge.releases(), vec![Call::Cancel(RID)]);
}

#[tokio::test]
async fn test_cleanup_failure_does_not_mask_error() {
    let (bridge, dispatcher) = setup();
    *bridge.fail_cancel.lock().unwrap() = true;
    bridge.script(vec![header_event(0, 200, &[]), error_event(1, "upstream closed")]);

    let response = timeout(TEST_TIMEOUT, dispatcher.fetch("https://example.com/data", FetchInit::new()))
        .await
        .unwrap()
        .unwrap();
    let err = response.bytes().await.unwrap_err();
    assert_eq!(err, FetchError::Stream("upstream closed".into()));
    assert_eq!(bridge.releases(), full_release());
}

#[tokio::test]
async fn test_end_before_done_is_stream_error() {
    let (bridge, dispatcher) = setup();
    bridge.script(vec![
        header_event(0, 200, &[]),
        data_event(2, "never released"),
        fetch_bridge::wire::ChannelEvent::End,
    ]);

    let response = timeout(TEST_TIMEOUT, dispatcher.fetch("https://example.com/data", FetchInit::new()))
        .await
        .unwrap()
        .unwrap();
    let err = response.bytes().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Stream);
    assert_eq!(bridge.releases(), full_release());
}

#[tokio::test]
async fn test_end_after_drained_body_closes() {
    let (bridge, dispatcher) = setup();
    bridge.script(vec![
        header_event(0, 200, &[]),
        data_event(1, "abc"),
        fetch_bridge::wire::ChannelEvent::End,
    ]);

    let response = timeout(TEST_TIMEOUT, dispatcher.fetch("https://example.com/data", FetchInit::new()))
        .await
        .unwrap()
        .unwrap();
    let body = timeout(TEST_TIMEOUT, response.bytes()).await.unwrap().unwrap();
    assert_eq!(&body[..], b"abc");
    assert_eq!(bridge.releases(), full_release());
}

#[tokio::test]
async fn test_end_before_header_is_stream_error() {
    let (bridge, dispatcher) = setup();
    bridge.script(vec![fetch_bridge::wire::ChannelEvent::End]);

    let err = timeout(TEST_TIMEOUT, dispatcher.fetch("https://example.com/data", FetchInit::new()))
        .await
        .unwrap()
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Stream);
    assert_eq!(bridge.releases(), vec![Call::Cancel(RID)]);
}

#[tokio::test]
async fn test_hanging_release_does_not_delay_cancellation() {
    let (bridge, dispatcher) = setup();
    *bridge.hang_cancel.lock().unwrap() = true;
    let signal = CancellationToken::new();

    let task = {
        let dispatcher = dispatcher.clone();
        let signal = signal.clone();
        tokio::spawn(async move {
            dispatcher
                .fetch("https://example.com/data", FetchInit::new().signal(signal))
                .await
        })
    };

    bridge.wait_sent().await;
    signal.cancel();
    let result = timeout(TEST_TIMEOUT, task).await.unwrap().unwrap();
    assert_eq!(result.unwrap_err(), FetchError::Cancelled);
    wait_releases(&bridge, 1).await;
    assert_eq!(bridge.releases(), vec![Call::Cancel(RID)]);
}

#[tokio::test]
async fn test_hanging_release_does_not_delay_stream_error() {
    let (bridge, dispatcher) = setup();
    *bridge.hang_cancel.lock().unwrap() = true;
    bridge.script(vec![header_event(0, 200, &[]), error_event(1, "upstream closed")]);

    let response = timeout(TEST_TIMEOUT, dispatcher.fetch("https://example.com/data", FetchInit::new()))
        .await
        .unwrap()
        .unwrap();
    let err = timeout(TEST_TIMEOUT, response.bytes()).await.unwrap().unwrap_err();
    assert_eq!(err, FetchError::Stream("upstream closed".into()));
    // The body release is stuck, so the request release never starts.
    wait_releases(&bridge, 1).await;
    assert_eq!(bridge.releases(), vec![Call::CancelBody(BODY_RID)]);
}

#[tokio::test]
async fn test_reorder_overflow_fails_and_releases() {
    let bridge = MockBridge::new();
    let config: BridgeConfig = parse_config("[reassembly]\nmax_pending_chunks = 2\n").unwrap();
    let dispatcher = Dispatcher::with_config(bridge.clone(), MockNative::default(), &config).unwrap();
    bridge.script(vec![
        header_event(0, 200, &[]),
        data_event(2, "b"),
        data_event(3, "c"),
        data_event(4, "d"),
        data_event(1, "a"),
    ]);

    let response = timeout(TEST_TIMEOUT, dispatcher.fetch("https://example.com/data", FetchInit::new()))
        .await
        .unwrap()
        .unwrap();
    let err = response.bytes().await.unwrap_err();
    assert_eq!(err, FetchError::ReorderOverflow { limit: 2 });
    assert_eq!(bridge.releases(), full_release());
}
