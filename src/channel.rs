// Copyright 2026 SigRPC Project Authors. Licensed under Apache-2.0.

//! The channel: owner of the completion queue, its worker thread, and the
//! event thread every call it creates lives on.
//!
//! Each submission wires a fixed set of weak subscriptions between the call
//! state machine, the user handle, the owning client, and the channel's own
//! `finished` signal. All of them are torn down together on the first of:
//! operation finished, client destroyed, channel finished. That teardown is
//! what guarantees no continuation ever fires into a released handle.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::Builder;
use std::time::Duration;

use log::debug;
use parking_lot::Mutex;

use crate::call::stream::{BidiStreamCall, ServerStreamCall};
use crate::call::UnaryCall;
use crate::client::Client;
use crate::codec::CodecKind;
use crate::cq::{poll_queue, CompletionQueue};
use crate::dispatch::{EventLoop, Latch};
use crate::native::NativeChannel;
use crate::operation::{BidiStream, CallReply, ServerStream};
use crate::signal::Signal;
use crate::status::{Status, StatusCode};
use crate::write::WriteStatus;

const DEFAULT_STREAM_RETRY: Duration = Duration::from_millis(1000);

fn rpc_name(service: &str, method: &str) -> String {
    format!("/{}/{}", service, method)
}

fn aborted() -> Status {
    Status::new(StatusCode::Aborted, "GRPC channel aborted")
}

/// One-shot bundle of subscription teardowns for a single submission.
pub(crate) struct TeardownSet {
    actions: Mutex<Vec<Box<dyn FnOnce() + Send>>>,
}

impl TeardownSet {
    pub(crate) fn new() -> Arc<TeardownSet> {
        Arc::new(TeardownSet {
            actions: Mutex::new(Vec::new()),
        })
    }

    pub(crate) fn add<F: FnOnce() + Send + 'static>(&self, f: F) {
        self.actions.lock().push(Box::new(f));
    }

    /// Run every registered teardown once. Later calls are no-ops.
    pub(crate) fn teardown(&self) {
        let actions = std::mem::take(&mut *self.actions.lock());
        for action in actions {
            action();
        }
    }
}

/// Channel configuration.
pub struct ChannelBuilder {
    retry: Duration,
    codec: CodecKind,
}

impl ChannelBuilder {
    pub fn new() -> ChannelBuilder {
        ChannelBuilder {
            retry: DEFAULT_STREAM_RETRY,
            codec: CodecKind::Protobuf,
        }
    }

    /// Delay before a broken stream is re-submitted by its client.
    pub fn stream_retry_period(mut self, period: Duration) -> ChannelBuilder {
        self.retry = period;
        self
    }

    pub fn codec(mut self, codec: CodecKind) -> ChannelBuilder {
        self.codec = codec;
        self
    }

    /// Wrap a connected native channel. The native handle is produced from
    /// a target URL and credentials by the external binding.
    pub fn connect(self, native: Arc<dyn NativeChannel>) -> Channel {
        let cq = Arc::new(CompletionQueue::new());
        let events = EventLoop::spawn("sigrpc-events");
        let finished = Arc::new(Signal::new());
        let drained = Arc::new(AtomicBool::new(false));
        let worker = {
            let cq = cq.clone();
            let finished = finished.clone();
            let drained = drained.clone();
            let events_dispatcher = events.dispatcher();
            Builder::new()
                .name("sigrpc-cq-worker".to_owned())
                .spawn(move || {
                    poll_queue(&cq, move || {
                        drained.store(true, Ordering::SeqCst);
                        events_dispatcher.post(move || finished.emit(&()));
                    });
                })
                .expect("failed to spawn completion queue worker")
        };
        Channel {
            inner: Arc::new(ChannelInner {
                native,
                cq,
                events,
                finished,
                drained,
                worker: Some(worker),
                retry: self.retry,
                codec: self.codec,
            }),
        }
    }
}

impl Default for ChannelBuilder {
    fn default() -> ChannelBuilder {
        ChannelBuilder::new()
    }
}

struct ChannelInner {
    native: Arc<dyn NativeChannel>,
    cq: Arc<CompletionQueue>,
    events: EventLoop,
    finished: Arc<Signal<()>>,
    drained: Arc<AtomicBool>,
    worker: Option<std::thread::JoinHandle<()>>,
    retry: Duration,
    codec: CodecKind,
}

impl Drop for ChannelInner {
    fn drop(&mut self) {
        debug!("channel dropping, shutting completion queue");
        self.cq.shutdown();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
        // The worker posted the finished cascade before exiting; the event
        // loop runs it before it sees the stop command.
        self.events.stop();
    }
}

/// A gRPC channel driving calls over one native connection.
#[derive(Clone)]
pub struct Channel {
    inner: Arc<ChannelInner>,
}

impl Channel {
    pub fn codec(&self) -> CodecKind {
        self.inner.codec
    }

    pub(crate) fn retry_period(&self) -> Duration {
        self.inner.retry
    }

    /// Shut the completion queue. The worker drains, the channel `finished`
    /// cascade cancels every in-flight call, and new submissions fail.
    pub fn shutdown(&self) {
        self.inner.cq.shutdown();
    }

    /// Blocking unary call. Parks the calling thread until the call's
    /// terminal signal or channel teardown, whichever comes first.
    pub fn call_blocking(&self, method: &str, service: &str, args: &[u8]) -> (Status, Vec<u8>) {
        let inner = &self.inner;
        let call = UnaryCall::new(
            inner.native.clone(),
            inner.cq.clone(),
            inner.events.dispatcher(),
            rpc_name(service, method),
            args.to_vec(),
        );

        let latch = Arc::new(Latch::new());
        let finished_id = {
            let latch = latch.clone();
            call.finished.connect(move |_| latch.open())
        };
        let channel_id = {
            let latch = latch.clone();
            inner.finished.connect(move |_| latch.open())
        };

        UnaryCall::start(&call);
        if inner.drained.load(Ordering::SeqCst) {
            latch.open();
        }
        latch.wait();

        call.finished.disconnect(finished_id);
        inner.finished.disconnect(channel_id);

        let status = if inner.drained.load(Ordering::SeqCst) {
            Status::new(StatusCode::Aborted, "Connection aborted")
        } else {
            call.status.clone()
        };
        let data = call.response_data.lock().clone();
        (status, data)
    }

    /// Asynchronous unary call delivering into `reply`.
    pub fn call_async(&self, method: &str, service: &str, args: &[u8], reply: &Arc<CallReply>) {
        let inner = &self.inner;
        let call = UnaryCall::new(
            inner.native.clone(),
            inner.cq.clone(),
            inner.events.dispatcher(),
            rpc_name(service, method),
            args.to_vec(),
        );
        let subs = TeardownSet::new();

        let channel_sub = {
            let reply = reply.clone();
            let subs = subs.clone();
            inner.finished.connect(move |_| {
                debug!("channel torn down during unary call");
                reply.set_data(Vec::new());
                reply.emit_error(&aborted());
                reply.emit_finished();
                subs.teardown();
            })
        };
        {
            let finished = inner.finished.clone();
            subs.add(move || finished.disconnect(channel_sub));
        }

        let finished_sub = {
            let reply = reply.clone();
            let subs = subs.clone();
            let c = call.clone();
            call.finished.connect(move |_| {
                let status = c.status.clone();
                if status == StatusCode::Ok {
                    reply.set_data(c.response_data.lock().clone());
                    reply.emit_finished();
                } else {
                    reply.set_data(Vec::new());
                    reply.emit_error(&status);
                    reply.emit_finished();
                }
                debug!("unary call delivered to reply handle");
                subs.teardown();
            })
        };
        {
            let c = call.clone();
            subs.add(move || c.finished.disconnect(finished_sub));
        }

        let error_sub = {
            let subs = subs.clone();
            reply.error().connect(move |status: &Status| {
                if *status == StatusCode::Aborted {
                    subs.teardown();
                }
            })
        };
        {
            let reply = reply.clone();
            subs.add(move || reply.error().disconnect(error_sub));
        }

        UnaryCall::start(&call);
        if inner.drained.load(Ordering::SeqCst) {
            reply.set_data(Vec::new());
            reply.emit_error(&aborted());
            reply.emit_finished();
            subs.teardown();
        }
    }

    /// Submit a server-streaming subscription for `client`.
    pub fn stream(&self, stream: &Arc<ServerStream>, service: &str, client: &Client) {
        self.stream_with(stream, service, &client.destroyed_arc());
    }

    /// Submit a bidirectional stream for `client`.
    pub fn stream_bidi(&self, stream: &Arc<BidiStream>, service: &str, client: &Client) {
        self.stream_bidi_with(stream, service, &client.destroyed_arc());
    }

    pub(crate) fn stream_with(
        &self,
        stream: &Arc<ServerStream>,
        service: &str,
        destroyed: &Arc<Signal<()>>,
    ) {
        let inner = &self.inner;
        let call = ServerStreamCall::new(
            inner.native.clone(),
            inner.cq.clone(),
            inner.events.dispatcher(),
            rpc_name(service, stream.method()),
            stream.arg().to_vec(),
        );
        let subs = TeardownSet::new();

        let read_sub = {
            let s = stream.clone();
            call.data_ready.connect(move |bytes: &Vec<u8>| s.handle_data(bytes))
        };
        {
            let c = call.clone();
            subs.add(move || c.data_ready.disconnect(read_sub));
        }

        let finished_sub = {
            let s = stream.clone();
            let subs = subs.clone();
            let c = call.clone();
            call.finished.connect(move |_| {
                debug!("server stream ended by peer");
                subs.teardown();
                let status = c.status.clone();
                if status != StatusCode::Ok {
                    s.emit_error(&status);
                } else {
                    s.emit_finished();
                }
            })
        };
        {
            let c = call.clone();
            subs.add(move || c.finished.disconnect(finished_sub));
        }

        let abort_sub = {
            let subs = subs.clone();
            let c = call.clone();
            stream.finished().connect(move |_| {
                debug!("server stream aborted by client side");
                subs.teardown();
                c.cancel();
            })
        };
        {
            let s = stream.clone();
            subs.add(move || s.finished().disconnect(abort_sub));
        }

        let client_sub = {
            let subs = subs.clone();
            let c = call.clone();
            destroyed.connect(move |_| {
                debug!("server stream owner destroyed");
                subs.teardown();
                c.cancel();
            })
        };
        {
            let destroyed = destroyed.clone();
            subs.add(move || destroyed.disconnect(client_sub));
        }

        let channel_sub = {
            let subs = subs.clone();
            let c = call.clone();
            inner.finished.connect(move |_| {
                debug!("server stream channel torn down");
                subs.teardown();
                c.status.set(StatusCode::Aborted, "GRPC channel aborted");
                c.cancel();
            })
        };
        {
            let finished = inner.finished.clone();
            subs.add(move || finished.disconnect(channel_sub));
        }

        ServerStreamCall::start(&call);
    }

    pub(crate) fn stream_bidi_with(
        &self,
        stream: &Arc<BidiStream>,
        service: &str,
        destroyed: &Arc<Signal<()>>,
    ) {
        let inner = &self.inner;
        let call = BidiStreamCall::new(
            inner.native.clone(),
            inner.cq.clone(),
            inner.events.dispatcher(),
            rpc_name(service, stream.method()),
        );
        let subs = TeardownSet::new();

        stream.attach_home(inner.events.dispatcher());

        let read_sub = {
            let s = stream.clone();
            call.data_ready.connect(move |bytes: &Vec<u8>| s.handle_data(bytes))
        };
        {
            let c = call.clone();
            subs.add(move || c.data_ready.disconnect(read_sub));
        }

        let write_sub = {
            let s = stream.clone();
            let c = call.clone();
            stream.write_ready().connect(move |_| {
                if let Some((data, ack)) = s.take_pending() {
                    ack.set_status(WriteStatus::InProcess);
                    BidiStreamCall::append(&c, data, ack);
                }
            })
        };
        {
            let s = stream.clone();
            subs.add(move || s.write_ready().disconnect(write_sub));
        }

        let write_done_sub = {
            let s = stream.clone();
            let c = call.clone();
            stream.write_done_ready().connect(move |_| {
                if let Some((_, ack)) = s.take_pending() {
                    ack.set_status(WriteStatus::InProcess);
                    BidiStreamCall::write_done(&c, ack);
                }
            })
        };
        {
            let s = stream.clone();
            subs.add(move || s.write_done_ready().disconnect(write_done_sub));
        }

        let finished_sub = {
            let s = stream.clone();
            let subs = subs.clone();
            let c = call.clone();
            call.finished.connect(move |_| {
                debug!("bidi stream ended by peer");
                subs.teardown();
                let status = c.status.clone();
                if status != StatusCode::Ok {
                    s.emit_error(&status);
                } else {
                    s.emit_finished();
                }
            })
        };
        {
            let c = call.clone();
            subs.add(move || c.finished.disconnect(finished_sub));
        }

        let abort_sub = {
            let subs = subs.clone();
            let c = call.clone();
            stream.finished().connect(move |_| {
                debug!("bidi stream aborted by client side");
                subs.teardown();
                c.cancel();
            })
        };
        {
            let s = stream.clone();
            subs.add(move || s.finished().disconnect(abort_sub));
        }

        let client_sub = {
            let subs = subs.clone();
            let c = call.clone();
            destroyed.connect(move |_| {
                debug!("bidi stream owner destroyed");
                subs.teardown();
                c.cancel();
            })
        };
        {
            let destroyed = destroyed.clone();
            subs.add(move || destroyed.disconnect(client_sub));
        }

        let channel_sub = {
            let subs = subs.clone();
            let c = call.clone();
            inner.finished.connect(move |_| {
                debug!("bidi stream channel torn down");
                subs.teardown();
                c.status.set(StatusCode::Aborted, "GRPC channel aborted");
                c.cancel();
            })
        };
        {
            let finished = inner.finished.clone();
            subs.add(move || finished.disconnect(channel_sub));
        }

        BidiStreamCall::start(&call);
    }
}
