// Copyright 2026 SigRPC Project Authors. Licensed under Apache-2.0.

mod common;

use std::sync::mpsc::channel;
use std::sync::Arc;

use parking_lot::Mutex;
use sigrpc::testing::TestChannel;
use sigrpc::{RpcStatus, StatusCode, WriteStatus};

use common::TIMEOUT;

#[test]
fn test_interleaved_writes_and_reads() {
    common::init();
    let peer = TestChannel::new();
    let client = common::client_with(&peer, "Chat");

    let (tx, rx) = channel();
    let stream = client
        .stream_bidirect("Talk", b"", move |data| {
            let _ = tx.send(data.to_vec());
        })
        .expect("channel attached");
    assert!(peer.wait_calls("/Chat/Talk", 1, TIMEOUT));
    let call = peer.take_call("/Chat/Talk").unwrap();

    let a1 = stream.write(b"m1".to_vec());
    let a2 = stream.write(b"m2".to_vec());
    let a3 = stream.write_done();

    assert_eq!(a1.wait_finished(), WriteStatus::Ok);
    assert_eq!(a2.wait_finished(), WriteStatus::Ok);
    assert_eq!(a3.wait_finished(), WriteStatus::Ok);
    assert!(a1.ok() && a2.ok() && a3.ok());

    assert!(call.wait_written(2, TIMEOUT));
    assert_eq!(call.written(), vec![b"m1".to_vec(), b"m2".to_vec()]);
    assert!(call.wait_half_closed(TIMEOUT));

    call.send_message(b"r1".to_vec());
    call.send_message(b"r2".to_vec());
    call.close(RpcStatus::ok());

    assert_eq!(rx.recv_timeout(TIMEOUT).unwrap(), b"r1");
    assert_eq!(rx.recv_timeout(TIMEOUT).unwrap(), b"r2");
    assert!(stream.wait_finished(TIMEOUT));
}

#[test]
fn test_acks_complete_in_submission_order() {
    common::init();
    let peer = TestChannel::new();
    let client = common::client_with(&peer, "Chat");

    let stream = client
        .stream_bidirect("Talk", b"", |_| {})
        .expect("channel attached");
    assert!(peer.wait_calls("/Chat/Talk", 1, TIMEOUT));
    let call = peer.take_call("/Chat/Talk").unwrap();
    call.hold_writes();

    let order = Arc::new(Mutex::new(Vec::new()));
    let acks: Vec<_> = (0..3u8)
        .map(|i| {
            let ack = stream.write(vec![i]);
            let order = order.clone();
            ack.on_finished(move || order.lock().push(i));
            ack
        })
        .collect();

    // One write tag in flight at a time: releasing an ack lets the next
    // queued entry reach the peer.
    assert!(call.wait_written(1, TIMEOUT));
    assert!(call.release_write(true));
    assert!(call.wait_written(2, TIMEOUT));
    assert!(call.release_write(true));
    assert!(call.wait_written(3, TIMEOUT));
    assert!(call.release_write(true));

    for ack in &acks {
        assert_eq!(ack.wait_finished(), WriteStatus::Ok);
    }
    assert_eq!(*order.lock(), vec![0, 1, 2]);
    assert_eq!(call.written(), vec![vec![0], vec![1], vec![2]]);
}

#[test]
fn test_write_on_torn_down_stream_fails_then_retries() {
    common::init();
    let peer = TestChannel::new();
    let client = common::client_with(&peer, "Chat");
    let errors = common::watch_errors(&client);

    let stream = client
        .stream_bidirect("Talk", b"", |_| {})
        .expect("channel attached");
    assert!(peer.wait_calls("/Chat/Talk", 1, TIMEOUT));
    let call = peer.take_call("/Chat/Talk").unwrap();
    call.hold_writes();

    let ack = stream.write(b"m1".to_vec());
    assert!(call.wait_written(1, TIMEOUT));
    call.close(RpcStatus::new(StatusCode::Unavailable, "peer gone"));

    // The in-flight write fails, error before finished.
    assert_eq!(ack.wait_finished(), WriteStatus::Failed);
    assert!(!ack.ok());

    // The stream reports the peer status and is re-submitted by the client
    // after the retry period.
    assert_eq!(errors.recv_timeout(TIMEOUT).unwrap(), StatusCode::Unavailable);
    assert!(peer.wait_calls("/Chat/Talk", 2, TIMEOUT));
}

#[test]
fn test_queued_writes_fail_on_finish() {
    common::init();
    let peer = TestChannel::new();
    let client = common::client_with(&peer, "Chat");

    let stream = client
        .stream_bidirect("Talk", b"", |_| {})
        .expect("channel attached");
    assert!(peer.wait_calls("/Chat/Talk", 1, TIMEOUT));
    let call = peer.take_call("/Chat/Talk").unwrap();
    call.hold_writes();

    let held = stream.write(b"m1".to_vec());
    assert!(call.wait_written(1, TIMEOUT));
    let queued = stream.write(b"m2".to_vec());
    let done = stream.write_done();

    call.close(RpcStatus::new(StatusCode::Unavailable, "peer gone"));

    assert_eq!(held.wait_finished(), WriteStatus::Failed);
    assert_eq!(queued.wait_finished(), WriteStatus::Failed);
    assert_eq!(done.wait_finished(), WriteStatus::Failed);
}

#[test]
fn test_dedup_by_method() {
    common::init();
    let peer = TestChannel::new();
    let client = common::client_with(&peer, "Chat");

    let s1 = client.stream_bidirect("Talk", b"a", |_| {}).unwrap();
    let s2 = client.stream_bidirect("Talk", b"b", |_| {}).unwrap();
    assert!(Arc::ptr_eq(&s1, &s2));
    assert_eq!(peer.calls_started("/Chat/Talk"), 1);
}
