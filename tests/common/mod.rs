// Copyright 2026 SigRPC Project Authors. Licensed under Apache-2.0.

use std::sync::mpsc::{channel, Receiver};
use std::time::Duration;

use sigrpc::testing::TestChannel;
use sigrpc::{Channel, ChannelBuilder, Client, Status, StatusCode};

pub const TIMEOUT: Duration = Duration::from_secs(5);

pub fn init() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Channel over the in-memory peer, with a short retry period so the
/// reconnect path is observable in test time.
pub fn connect(peer: &TestChannel) -> Channel {
    ChannelBuilder::new()
        .stream_retry_period(Duration::from_millis(50))
        .connect(peer.native())
}

pub fn client_with(peer: &TestChannel, service: &str) -> Client {
    let client = Client::new(service);
    client.attach_channel(connect(peer));
    client
}

/// Collect the client's error codes on a channel the test can drain.
pub fn watch_errors(client: &Client) -> Receiver<StatusCode> {
    let (tx, rx) = channel();
    client.error().connect(move |status: &Status| {
        let _ = tx.send(status.code());
    });
    rx
}
