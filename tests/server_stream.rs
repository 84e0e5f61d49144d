// Copyright 2026 SigRPC Project Authors. Licensed under Apache-2.0.

mod common;

use std::sync::mpsc::{channel, TryRecvError};
use std::sync::Arc;

use sigrpc::testing::TestChannel;
use sigrpc::{RpcStatus, StatusCode};

use common::TIMEOUT;

#[test]
fn test_three_messages_then_ok() {
    common::init();
    let peer = TestChannel::new();
    peer.mock_server_stream("/Feed/Watch", |req| {
        assert_eq!(req, b"sub");
        (
            vec![b"one".to_vec(), b"two".to_vec(), b"three".to_vec()],
            RpcStatus::ok(),
        )
    });
    let client = common::client_with(&peer, "Feed");
    let errors = common::watch_errors(&client);

    let (tx, rx) = channel();
    let stream = client
        .stream("Watch", b"sub", move |data| {
            let _ = tx.send(data.to_vec());
        })
        .expect("channel attached");

    assert_eq!(rx.recv_timeout(TIMEOUT).unwrap(), b"one");
    assert_eq!(rx.recv_timeout(TIMEOUT).unwrap(), b"two");
    assert_eq!(rx.recv_timeout(TIMEOUT).unwrap(), b"three");
    assert!(stream.wait_finished(TIMEOUT));
    assert_eq!(stream.data(), b"three");
    assert_eq!(errors.try_recv().unwrap_err(), TryRecvError::Empty);
}

#[test]
fn test_dedup_shares_one_stream() {
    common::init();
    let peer = TestChannel::new();
    let client = common::client_with(&peer, "Feed");

    let (tx1, rx1) = channel();
    let (tx2, rx2) = channel();
    let s1 = client
        .stream("Watch", b"q", move |data| {
            let _ = tx1.send(data.to_vec());
        })
        .unwrap();
    let s2 = client
        .stream("Watch", b"q", move |data| {
            let _ = tx2.send(data.to_vec());
        })
        .unwrap();

    assert!(Arc::ptr_eq(&s1, &s2));
    assert_eq!(peer.calls_started("/Feed/Watch"), 1);

    let call = peer.take_call("/Feed/Watch").unwrap();
    call.send_message(b"tick".to_vec());
    assert_eq!(rx1.recv_timeout(TIMEOUT).unwrap(), b"tick");
    assert_eq!(rx2.recv_timeout(TIMEOUT).unwrap(), b"tick");

    // A different request is a different subscription.
    let s3 = client.stream("Watch", b"other", |_| {}).unwrap();
    assert!(!Arc::ptr_eq(&s1, &s3));
    assert!(peer.wait_calls("/Feed/Watch", 2, TIMEOUT));
}

#[test]
fn test_error_schedules_retry() {
    common::init();
    let peer = TestChannel::new();
    let client = common::client_with(&peer, "Feed");
    let errors = common::watch_errors(&client);

    let stream = client.stream("Watch", b"q", |_| {}).expect("channel attached");
    assert!(peer.wait_calls("/Feed/Watch", 1, TIMEOUT));
    let call = peer.take_call("/Feed/Watch").unwrap();
    call.close(RpcStatus::new(StatusCode::Unavailable, "gone"));

    assert_eq!(errors.recv_timeout(TIMEOUT).unwrap(), StatusCode::Unavailable);
    // The stream handle survives the error and is re-submitted after the
    // retry period.
    assert!(peer.wait_calls("/Feed/Watch", 2, TIMEOUT));
    assert!(!stream.wait_finished(std::time::Duration::from_millis(10)));

    // A clean close ends it for good.
    let retried = peer.take_call("/Feed/Watch").unwrap();
    retried.close(RpcStatus::ok());
    assert!(stream.wait_finished(TIMEOUT));
}

#[test]
fn test_abort_cancels_native_call() {
    common::init();
    let peer = TestChannel::new();
    let client = common::client_with(&peer, "Feed");

    let stream = client.stream("Watch", b"q", |_| {}).expect("channel attached");
    assert!(peer.wait_calls("/Feed/Watch", 1, TIMEOUT));
    let call = peer.take_call("/Feed/Watch").unwrap();

    stream.abort();
    assert!(stream.wait_finished(TIMEOUT));
    assert!(call.wait_cancelled(TIMEOUT));
}

#[test]
fn test_client_destruction_mid_stream() {
    common::init();
    let peer = TestChannel::new();
    let client = common::client_with(&peer, "Feed");

    let (tx, rx) = channel();
    let _stream = client
        .stream("Watch", b"q", move |data| {
            let _ = tx.send(data.to_vec());
        })
        .expect("channel attached");
    assert!(peer.wait_calls("/Feed/Watch", 1, TIMEOUT));
    let call = peer.take_call("/Feed/Watch").unwrap();

    call.send_message(b"first".to_vec());
    assert_eq!(rx.recv_timeout(TIMEOUT).unwrap(), b"first");

    drop(client);
    assert!(call.wait_cancelled(TIMEOUT));
    // Nothing may fire into the destroyed client.
    call.send_message(b"late".to_vec());
    assert!(rx.recv_timeout(std::time::Duration::from_millis(100)).is_err());
}

#[test]
fn test_attach_channel_aborts_active_streams() {
    common::init();
    let first_peer = TestChannel::new();
    let client = common::client_with(&first_peer, "Feed");

    let stream = client.stream("Watch", b"q", |_| {}).expect("channel attached");
    assert!(first_peer.wait_calls("/Feed/Watch", 1, TIMEOUT));
    let call = first_peer.take_call("/Feed/Watch").unwrap();

    let second_peer = TestChannel::new();
    client.attach_channel(common::connect(&second_peer));

    assert!(stream.wait_finished(TIMEOUT));
    assert!(call.wait_cancelled(TIMEOUT));

    // New subscriptions run against the replacement channel.
    let _replacement = client.stream("Watch", b"q", |_| {}).unwrap();
    assert!(second_peer.wait_calls("/Feed/Watch", 1, TIMEOUT));
    assert_eq!(first_peer.calls_started("/Feed/Watch"), 1);
}
