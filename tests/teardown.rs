// Copyright 2026 SigRPC Project Authors. Licensed under Apache-2.0.

mod common;

use std::sync::Arc;

use parking_lot::Mutex;
use sigrpc::testing::TestChannel;
use sigrpc::{CallReply, Status, StatusCode};

use common::TIMEOUT;

#[test]
fn test_shutdown_aborts_async_call() {
    common::init();
    // No script: the call stays in flight.
    let peer = TestChannel::new();
    let channel = common::connect(&peer);
    let client = sigrpc::Client::new("Greet");
    client.attach_channel(channel.clone());
    let errors = common::watch_errors(&client);

    let reply = client.call("Hello", b"ping").expect("channel attached");
    assert!(peer.wait_calls("/Greet/Hello", 1, TIMEOUT));
    channel.shutdown();

    assert!(reply.wait_finished(TIMEOUT));
    assert!(reply.data().is_empty());
    assert_eq!(errors.recv_timeout(TIMEOUT).unwrap(), StatusCode::Aborted);
}

#[test]
fn test_channel_drop_aborts_direct_call() {
    common::init();
    let peer = TestChannel::new();
    let channel = common::connect(&peer);

    let reply = CallReply::new();
    let seen = Arc::new(Mutex::new(Vec::new()));
    {
        let seen = seen.clone();
        reply.error().connect(move |status: &Status| {
            seen.lock().push((status.code(), status.message()));
        });
    }

    channel.call_async("Hello", "Greet", b"ping", &reply);
    assert!(peer.wait_calls("/Greet/Hello", 1, TIMEOUT));
    drop(channel);

    assert!(reply.wait_finished(TIMEOUT));
    assert!(reply.data().is_empty());
    let seen = seen.lock();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].0, StatusCode::Aborted);
    assert_eq!(seen[0].1, "GRPC channel aborted");
}

#[test]
fn test_all_in_flight_calls_terminate_on_shutdown() {
    common::init();
    let peer = TestChannel::new();
    let channel = common::connect(&peer);
    let client = sigrpc::Client::new("Greet");
    client.attach_channel(channel.clone());

    let r1 = client.call("Hello", b"one").expect("channel attached");
    let r2 = client.call("Hello", b"two").expect("channel attached");
    assert!(peer.wait_calls("/Greet/Hello", 2, TIMEOUT));

    channel.shutdown();
    assert!(r1.wait_finished(TIMEOUT));
    assert!(r2.wait_finished(TIMEOUT));
}
