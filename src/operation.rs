// Copyright 2026 SigRPC Project Authors. Licensed under Apache-2.0.

//! User-facing handles for in-flight RPCs.
//!
//! A handle carries the last received payload and two terminal signals,
//! `finished` and `error(Status)`. `finished` fires at most once per
//! handle; `error` may fire repeatedly on a stream, once per broken
//! attempt, without terminating it. State mutations take the handle's
//! private mutex and signals are emitted after it is released.

use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use crate::codec::Message;
use crate::dispatch::Dispatcher;
use crate::signal::Signal;
use crate::status::Status;
use crate::write::{WriteAck, WriteStatus};

/// Shared shape of every asynchronous operation handle.
pub(crate) struct OperationCore {
    data: Mutex<Vec<u8>>,
    finished: Signal<()>,
    error: Signal<Status>,
    terminated: Mutex<bool>,
    cond: Condvar,
}

impl OperationCore {
    fn new() -> OperationCore {
        OperationCore {
            data: Mutex::new(Vec::new()),
            finished: Signal::new(),
            error: Signal::new(),
            terminated: Mutex::new(false),
            cond: Condvar::new(),
        }
    }

    fn data(&self) -> Vec<u8> {
        self.data.lock().clone()
    }

    fn set_data(&self, data: Vec<u8>) {
        *self.data.lock() = data;
    }

    fn emit_finished(&self) {
        {
            let mut terminated = self.terminated.lock();
            if *terminated {
                return;
            }
            *terminated = true;
        }
        self.cond.notify_all();
        self.finished.emit(&());
    }

    fn emit_error(&self, status: &Status) {
        self.error.emit(status);
    }

    /// Park until `finished` has fired. Safe against subscribing late: the
    /// terminal flag is latched.
    fn wait_finished(&self, timeout: Duration) -> bool {
        let deadline = std::time::Instant::now() + timeout;
        let mut terminated = self.terminated.lock();
        while !*terminated {
            let now = std::time::Instant::now();
            if now >= deadline {
                break;
            }
            self.cond.wait_for(&mut terminated, deadline - now);
        }
        *terminated
    }
}

/// Handle for one asynchronous unary call.
pub struct CallReply {
    core: OperationCore,
}

impl CallReply {
    pub fn new() -> Arc<CallReply> {
        Arc::new(CallReply {
            core: OperationCore::new(),
        })
    }

    /// Response payload; empty until `finished` has fired.
    pub fn data(&self) -> Vec<u8> {
        self.core.data()
    }

    pub fn finished(&self) -> &Signal<()> {
        &self.core.finished
    }

    pub fn error(&self) -> &Signal<Status> {
        &self.core.error
    }

    /// Park until the reply is terminal; false on timeout.
    pub fn wait_finished(&self, timeout: Duration) -> bool {
        self.core.wait_finished(timeout)
    }

    pub(crate) fn set_data(&self, data: Vec<u8>) {
        self.core.set_data(data);
    }

    pub(crate) fn emit_finished(&self) {
        self.core.emit_finished();
    }

    pub(crate) fn emit_error(&self, status: &Status) {
        self.core.emit_error(status);
    }
}

pub type StreamHandler = Arc<dyn Fn(&[u8]) + Send + Sync>;

struct Handlers {
    list: Mutex<Vec<StreamHandler>>,
}

impl Handlers {
    fn new(first: Option<StreamHandler>) -> Handlers {
        Handlers {
            list: Mutex::new(first.into_iter().collect()),
        }
    }

    fn add(&self, handler: StreamHandler) {
        self.list.lock().push(handler);
    }

    fn invoke(&self, data: &[u8]) {
        let snapshot: Vec<StreamHandler> = self.list.lock().clone();
        for handler in snapshot {
            handler(data);
        }
    }
}

/// Handle for a server-streaming subscription.
///
/// Identity for deduplication is the `(method, request)` pair: two
/// subscriptions with equal identity share one handle and every attached
/// handler sees every message.
pub struct ServerStream {
    core: OperationCore,
    method: String,
    request: Vec<u8>,
    handlers: Handlers,
    message_received: Signal<Vec<u8>>,
}

impl ServerStream {
    pub(crate) fn new(
        method: String,
        request: Vec<u8>,
        handler: Option<StreamHandler>,
    ) -> Arc<ServerStream> {
        Arc::new(ServerStream {
            core: OperationCore::new(),
            method,
            request,
            handlers: Handlers::new(handler),
            message_received: Signal::new(),
        })
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    /// Serialized request this subscription was made with.
    pub fn arg(&self) -> &[u8] {
        &self.request
    }

    /// Last received message payload.
    pub fn data(&self) -> Vec<u8> {
        self.core.data()
    }

    /// Tear the subscription down from the client side. Fires `finished`.
    pub fn abort(&self) {
        self.core.emit_finished();
    }

    pub fn finished(&self) -> &Signal<()> {
        &self.core.finished
    }

    pub fn error(&self) -> &Signal<Status> {
        &self.core.error
    }

    pub fn message_received(&self) -> &Signal<Vec<u8>> {
        &self.message_received
    }

    /// Park until the stream is terminal; false on timeout.
    pub fn wait_finished(&self, timeout: Duration) -> bool {
        self.core.wait_finished(timeout)
    }

    pub(crate) fn add_handler(&self, handler: StreamHandler) {
        self.handlers.add(handler);
    }

    pub(crate) fn matches(&self, method: &str, request: &[u8]) -> bool {
        self.method == method && self.request == request
    }

    pub(crate) fn handle_data(&self, data: &[u8]) {
        self.core.set_data(data.to_vec());
        self.handlers.invoke(data);
        self.message_received.emit(&data.to_vec());
    }

    pub(crate) fn emit_finished(&self) {
        self.core.emit_finished();
    }

    pub(crate) fn emit_error(&self, status: &Status) {
        self.core.emit_error(status);
    }
}

impl PartialEq for ServerStream {
    fn eq(&self, other: &ServerStream) -> bool {
        self.method == other.method && self.request == other.request
    }
}

/// Pending payload handed from a write call to the channel wiring.
struct PendingWrite {
    data: Vec<u8>,
    ack: Option<Arc<WriteAck>>,
}

/// Handle for a bidirectional stream.
///
/// The read side behaves like [`ServerStream`]; dedup identity is the
/// method alone. Writes are posted from any thread: a foreign caller hops
/// onto the operation's home thread, the payload is serialized under the
/// handle mutex, and the channel wiring picks it up synchronously through
/// the `write_ready` signal. A write made while no wiring is attached
/// terminates `NotConnected`.
pub struct BidiStream {
    core: OperationCore,
    method: String,
    request: Vec<u8>,
    handlers: Handlers,
    message_received: Signal<Vec<u8>>,
    write_ready: Signal<()>,
    write_done_ready: Signal<()>,
    pending: Mutex<PendingWrite>,
    home: Mutex<Option<Dispatcher>>,
    weak_self: Weak<BidiStream>,
}

impl BidiStream {
    pub(crate) fn new(
        method: String,
        request: Vec<u8>,
        handler: Option<StreamHandler>,
    ) -> Arc<BidiStream> {
        Arc::new_cyclic(|weak_self| BidiStream {
            core: OperationCore::new(),
            method,
            request,
            handlers: Handlers::new(handler),
            message_received: Signal::new(),
            write_ready: Signal::new(),
            write_done_ready: Signal::new(),
            pending: Mutex::new(PendingWrite {
                data: Vec::new(),
                ack: None,
            }),
            home: Mutex::new(None),
            weak_self: weak_self.clone(),
        })
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn arg(&self) -> &[u8] {
        &self.request
    }

    pub fn data(&self) -> Vec<u8> {
        self.core.data()
    }

    pub fn abort(&self) {
        self.core.emit_finished();
    }

    pub fn finished(&self) -> &Signal<()> {
        &self.core.finished
    }

    pub fn error(&self) -> &Signal<Status> {
        &self.core.error
    }

    pub fn message_received(&self) -> &Signal<Vec<u8>> {
        &self.message_received
    }

    /// Park until the stream is terminal; false on timeout.
    pub fn wait_finished(&self, timeout: Duration) -> bool {
        self.core.wait_finished(timeout)
    }

    /// Post one message to the stream. Returns the acknowledgement handle;
    /// completion order follows submission order.
    pub fn write<M: Message>(&self, value: M) -> Arc<WriteAck> {
        let home = self.home.lock().clone();
        match home {
            Some(home) if !home.is_home() => {
                let this = match self.weak_self.upgrade() {
                    Some(this) => this,
                    None => return detached_ack(),
                };
                log::debug!("write on {} hopped from foreign thread", self.method);
                home.try_invoke(move || this.write_on_home(value))
                    .unwrap_or_else(detached_ack)
            }
            _ => self.write_on_home(value),
        }
    }

    /// Close the write direction. Must follow the last `write`.
    pub fn write_done(&self) -> Arc<WriteAck> {
        let home = self.home.lock().clone();
        match home {
            Some(home) if !home.is_home() => {
                let this = match self.weak_self.upgrade() {
                    Some(this) => this,
                    None => return detached_ack(),
                };
                home.try_invoke(move || this.write_done_on_home())
                    .unwrap_or_else(detached_ack)
            }
            _ => self.write_done_on_home(),
        }
    }

    /// As `write`, then park until the acknowledgement is terminal.
    pub fn write_blocked<M: Message>(&self, value: M) -> WriteStatus {
        self.write(value).wait_finished()
    }

    /// As `write_done`, then park until the acknowledgement is terminal.
    pub fn write_done_blocked(&self) -> WriteStatus {
        self.write_done().wait_finished()
    }

    fn write_on_home(&self, value: impl Message) -> Arc<WriteAck> {
        let ack = WriteAck::new();
        let serialized = {
            let mut pending = self.pending.lock();
            match value.to_bytes() {
                Ok(bytes) => {
                    pending.data = bytes;
                    pending.ack = Some(ack.clone());
                    Ok(())
                }
                Err(e) => Err(e),
            }
        };
        match serialized {
            Ok(()) => {
                self.write_ready.emit(&());
            }
            Err(e) => {
                ack.set_status(WriteStatus::Failed);
                self.core.emit_error(&e.to_status());
            }
        }
        self.finalize_unattached(&ack);
        ack
    }

    fn write_done_on_home(&self) -> Arc<WriteAck> {
        let ack = WriteAck::new();
        {
            let mut pending = self.pending.lock();
            pending.data = Vec::new();
            pending.ack = Some(ack.clone());
        }
        self.write_done_ready.emit(&());
        self.finalize_unattached(&ack);
        ack
    }

    /// An ack nobody picked up is terminal right away.
    fn finalize_unattached(&self, ack: &Arc<WriteAck>) {
        match ack.status() {
            WriteStatus::Failed | WriteStatus::NotConnected => {
                ack.emit_error();
                ack.emit_finished();
            }
            _ => {}
        }
    }

    pub(crate) fn attach_home(&self, home: Dispatcher) {
        *self.home.lock() = Some(home);
    }

    pub(crate) fn take_pending(&self) -> Option<(Vec<u8>, Arc<WriteAck>)> {
        let mut pending = self.pending.lock();
        let ack = pending.ack.take()?;
        Some((std::mem::take(&mut pending.data), ack))
    }

    pub(crate) fn write_ready(&self) -> &Signal<()> {
        &self.write_ready
    }

    pub(crate) fn write_done_ready(&self) -> &Signal<()> {
        &self.write_done_ready
    }

    pub(crate) fn add_handler(&self, handler: StreamHandler) {
        self.handlers.add(handler);
    }

    pub(crate) fn handle_data(&self, data: &[u8]) {
        self.core.set_data(data.to_vec());
        self.handlers.invoke(data);
        self.message_received.emit(&data.to_vec());
    }

    pub(crate) fn emit_finished(&self) {
        self.core.emit_finished();
    }

    pub(crate) fn emit_error(&self, status: &Status) {
        self.core.emit_error(status);
    }
}

impl PartialEq for BidiStream {
    fn eq(&self, other: &BidiStream) -> bool {
        self.method == other.method
    }
}

fn detached_ack() -> Arc<WriteAck> {
    let ack = WriteAck::new();
    ack.emit_error();
    ack.emit_finished();
    ack
}
