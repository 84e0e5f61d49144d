// Copyright 2026 SigRPC Project Authors. Licensed under Apache-2.0.

//! In-memory implementation of the native channel interface.
//!
//! [`TestChannel`] plays the peer: unary and server-stream methods can be
//! scripted up front, and any started call can be driven by hand through
//! its [`TestCall`] handle. Completions flow through the real completion
//! queue, so the whole runtime path from tag submission to signal delivery
//! is exercised.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::debug;
use parking_lot::{Condvar, Mutex};

use crate::cq::{CompletionQueue, Tag};
use crate::native::{
    AsyncReader, AsyncReaderWriter, ByteSlot, NativeChannel, RpcStatus, StatusSlot,
};
use crate::status::StatusCode;

type UnaryScript = Arc<dyn Fn(&[u8]) -> (Option<Vec<u8>>, RpcStatus) + Send + Sync>;
type StreamScript = Arc<dyn Fn(&[u8]) -> (Vec<Vec<u8>>, RpcStatus) + Send + Sync>;

#[derive(Clone, Copy, PartialEq, Eq)]
enum Kind {
    Unary,
    ServerStream,
    Duplex,
}

/// Scriptable fake peer. Methods are keyed by the full rpc path, e.g.
/// `"/Greet/Hello"`.
#[derive(Clone)]
pub struct TestChannel {
    inner: Arc<Inner>,
}

struct Inner {
    unary: Mutex<HashMap<String, UnaryScript>>,
    streams: Mutex<HashMap<String, StreamScript>>,
    calls: Mutex<Vec<TestCall>>,
    started: Condvar,
}

impl TestChannel {
    pub fn new() -> TestChannel {
        TestChannel {
            inner: Arc::new(Inner {
                unary: Mutex::new(HashMap::new()),
                streams: Mutex::new(HashMap::new()),
                calls: Mutex::new(Vec::new()),
                started: Condvar::new(),
            }),
        }
    }

    /// The handle to pass to `ChannelBuilder::connect`.
    pub fn native(&self) -> Arc<dyn NativeChannel> {
        self.inner.clone()
    }

    /// Script a unary method: request bytes in, optional response payload
    /// and terminal status out.
    pub fn mock_unary<F>(&self, method: &str, f: F)
    where
        F: Fn(&[u8]) -> (Option<Vec<u8>>, RpcStatus) + Send + Sync + 'static,
    {
        self.inner
            .unary
            .lock()
            .insert(method.to_owned(), Arc::new(f));
    }

    /// Script a server-streaming method: every message is delivered in
    /// order, then the call closes with the given status.
    pub fn mock_server_stream<F>(&self, method: &str, f: F)
    where
        F: Fn(&[u8]) -> (Vec<Vec<u8>>, RpcStatus) + Send + Sync + 'static,
    {
        self.inner
            .streams
            .lock()
            .insert(method.to_owned(), Arc::new(f));
    }

    /// Most recently started call on `method`, if any.
    pub fn take_call(&self, method: &str) -> Option<TestCall> {
        self.inner
            .calls
            .lock()
            .iter()
            .rev()
            .find(|call| call.method() == method)
            .cloned()
    }

    pub fn calls_started(&self, method: &str) -> usize {
        self.inner
            .calls
            .lock()
            .iter()
            .filter(|call| call.method() == method)
            .count()
    }

    /// Park until at least `n` calls have been started on `method`.
    pub fn wait_calls(&self, method: &str, n: usize, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut calls = self.inner.calls.lock();
        loop {
            let count = calls.iter().filter(|call| call.method() == method).count();
            if count >= n {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            self.inner.started.wait_for(&mut calls, deadline - now);
        }
    }
}

impl Default for TestChannel {
    fn default() -> TestChannel {
        TestChannel::new()
    }
}

impl Inner {
    fn new_call(&self, kind: Kind, method: &str, cq: &Arc<CompletionQueue>) -> TestCall {
        let call = TestCall {
            state: Arc::new(CallState {
                method: method.to_owned(),
                kind,
                cq: cq.clone(),
                m: Mutex::new(CallInner {
                    request: None,
                    msgs: VecDeque::new(),
                    closed: None,
                    pending_read: None,
                    pending_finish: None,
                    delivered_end: false,
                    got_message: false,
                    written: Vec::new(),
                    half_closed: false,
                    hold_writes: false,
                    held_writes: VecDeque::new(),
                    cancelled: false,
                }),
                changed: Condvar::new(),
            }),
        };
        self.calls.lock().push(call.clone());
        self.started.notify_all();
        call
    }
}

impl NativeChannel for Inner {
    fn unary(
        &self,
        cq: &Arc<CompletionQueue>,
        method: &str,
        request: Vec<u8>,
        start: Tag,
    ) -> Box<dyn AsyncReader> {
        let call = self.new_call(Kind::Unary, method, cq);
        {
            let mut i = call.state.m.lock();
            let script = self.unary.lock().get(method).cloned();
            if let Some(script) = script {
                let (response, status) = script(&request);
                if let Some(response) = response {
                    i.msgs.push_back(response);
                }
                i.closed = Some(status);
            }
            i.request = Some(request);
        }
        call.state.push(start, true);
        Box::new(ReaderHandle {
            state: call.state.clone(),
        })
    }

    fn server_stream(
        &self,
        cq: &Arc<CompletionQueue>,
        method: &str,
        request: Vec<u8>,
        start: Tag,
    ) -> Box<dyn AsyncReader> {
        let call = self.new_call(Kind::ServerStream, method, cq);
        {
            let mut i = call.state.m.lock();
            let script = self.streams.lock().get(method).cloned();
            if let Some(script) = script {
                let (messages, status) = script(&request);
                i.msgs.extend(messages);
                i.closed = Some(status);
            }
            i.request = Some(request);
        }
        call.state.push(start, true);
        Box::new(ReaderHandle {
            state: call.state.clone(),
        })
    }

    fn duplex(
        &self,
        cq: &Arc<CompletionQueue>,
        method: &str,
        start: Tag,
    ) -> Box<dyn AsyncReaderWriter> {
        let call = self.new_call(Kind::Duplex, method, cq);
        call.state.push(start, true);
        Box::new(DuplexHandle {
            state: call.state.clone(),
        })
    }
}

struct CallInner {
    request: Option<Vec<u8>>,
    msgs: VecDeque<Vec<u8>>,
    closed: Option<RpcStatus>,
    pending_read: Option<(ByteSlot, Tag)>,
    pending_finish: Option<(StatusSlot, Tag)>,
    delivered_end: bool,
    got_message: bool,
    written: Vec<Vec<u8>>,
    half_closed: bool,
    hold_writes: bool,
    held_writes: VecDeque<Tag>,
    cancelled: bool,
}

struct CallState {
    method: String,
    kind: Kind,
    cq: Arc<CompletionQueue>,
    m: Mutex<CallInner>,
    changed: Condvar,
}

impl CallState {
    fn push(&self, tag: Tag, ok: bool) {
        if let Err(e) = self.cq.submit(tag, ok) {
            debug!("test call {}: dropping completion, {}", self.method, e);
        }
    }

    /// Move the call forward: satisfy a pending read from the message
    /// queue or the close marker, then deliver the terminal status once
    /// the read direction has ended.
    fn progress(&self, i: &mut CallInner) {
        if i.pending_read.is_some() {
            if let Some(msg) = i.msgs.pop_front() {
                let (slot, tag) = i.pending_read.take().unwrap();
                *slot.lock() = Some(msg);
                i.got_message = true;
                self.push(tag, true);
            } else if i.closed.is_some() {
                let (_slot, tag) = i.pending_read.take().unwrap();
                i.delivered_end = true;
                self.push(tag, false);
            }
        }
        if i.pending_finish.is_some() {
            let ready = match self.kind {
                // A unary exchange never posts a read past its single
                // response, so the end-of-stream marker may be skipped.
                Kind::Unary => {
                    i.closed.is_some()
                        && i.msgs.is_empty()
                        && i.pending_read.is_none()
                        && (i.delivered_end || i.got_message)
                }
                _ => i.closed.is_some() && i.msgs.is_empty() && i.delivered_end,
            };
            if ready {
                let (slot, tag) = i.pending_finish.take().unwrap();
                *slot.lock() = i.closed.clone().unwrap();
                self.push(tag, true);
            }
        }
    }

    fn read(&self, into: ByteSlot, tag: Tag) {
        let mut i = self.m.lock();
        debug_assert!(i.pending_read.is_none());
        i.pending_read = Some((into, tag));
        self.progress(&mut i);
    }

    fn finish(&self, into: StatusSlot, tag: Tag) {
        let mut i = self.m.lock();
        debug_assert!(i.pending_finish.is_none());
        i.pending_finish = Some((into, tag));
        self.progress(&mut i);
    }

    fn cancel(&self) {
        let mut i = self.m.lock();
        i.cancelled = true;
        if i.closed.is_none() {
            i.closed = Some(RpcStatus::new(StatusCode::Cancelled, "Cancelled"));
            i.msgs.clear();
        }
        let held: Vec<Tag> = i.held_writes.drain(..).collect();
        for tag in held {
            self.push(tag, false);
        }
        self.progress(&mut i);
        self.changed.notify_all();
    }

    fn write(&self, data: Vec<u8>, tag: Tag) {
        let mut i = self.m.lock();
        if i.closed.is_some() || i.half_closed {
            self.push(tag, false);
            return;
        }
        i.written.push(data);
        if i.hold_writes {
            i.held_writes.push_back(tag);
        } else {
            self.push(tag, true);
        }
        self.changed.notify_all();
    }

    fn writes_done(&self, tag: Tag) {
        let mut i = self.m.lock();
        if i.closed.is_some() {
            self.push(tag, false);
            return;
        }
        i.half_closed = true;
        self.push(tag, true);
        self.changed.notify_all();
    }
}

struct ReaderHandle {
    state: Arc<CallState>,
}

impl AsyncReader for ReaderHandle {
    fn read(&mut self, into: ByteSlot, tag: Tag) {
        self.state.read(into, tag);
    }

    fn finish(&mut self, into: StatusSlot, tag: Tag) {
        self.state.finish(into, tag);
    }

    fn try_cancel(&mut self) {
        self.state.cancel();
    }
}

struct DuplexHandle {
    state: Arc<CallState>,
}

impl AsyncReader for DuplexHandle {
    fn read(&mut self, into: ByteSlot, tag: Tag) {
        self.state.read(into, tag);
    }

    fn finish(&mut self, into: StatusSlot, tag: Tag) {
        self.state.finish(into, tag);
    }

    fn try_cancel(&mut self) {
        self.state.cancel();
    }
}

impl AsyncReaderWriter for DuplexHandle {
    fn write(&mut self, data: Vec<u8>, tag: Tag) {
        self.state.write(data, tag);
    }

    fn writes_done(&mut self, tag: Tag) {
        self.state.writes_done(tag);
    }
}

/// Test-side handle to one started call.
#[derive(Clone)]
pub struct TestCall {
    state: Arc<CallState>,
}

impl TestCall {
    pub fn method(&self) -> &str {
        &self.state.method
    }

    /// Request bytes the call was started with, if any have been sent.
    pub fn request(&self) -> Option<Vec<u8>> {
        self.state.m.lock().request.clone()
    }

    /// Deliver one message to the client.
    pub fn send_message(&self, data: Vec<u8>) {
        let mut i = self.state.m.lock();
        i.msgs.push_back(data);
        self.state.progress(&mut i);
        self.state.changed.notify_all();
    }

    /// Close the call with a terminal status. Held writes fail.
    pub fn close(&self, status: RpcStatus) {
        let mut i = self.state.m.lock();
        if i.closed.is_none() {
            i.closed = Some(status);
        }
        let held: Vec<Tag> = i.held_writes.drain(..).collect();
        for tag in held {
            self.state.push(tag, false);
        }
        self.state.progress(&mut i);
        self.state.changed.notify_all();
    }

    /// Payloads written by the client so far, in submission order.
    pub fn written(&self) -> Vec<Vec<u8>> {
        self.state.m.lock().written.clone()
    }

    pub fn wait_written(&self, n: usize, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut i = self.state.m.lock();
        while i.written.len() < n {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            self.state.changed.wait_for(&mut i, deadline - now);
        }
        true
    }

    pub fn half_closed(&self) -> bool {
        self.state.m.lock().half_closed
    }

    pub fn wait_half_closed(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut i = self.state.m.lock();
        while !i.half_closed {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            self.state.changed.wait_for(&mut i, deadline - now);
        }
        true
    }

    pub fn is_cancelled(&self) -> bool {
        self.state.m.lock().cancelled
    }

    pub fn wait_cancelled(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut i = self.state.m.lock();
        while !i.cancelled {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            self.state.changed.wait_for(&mut i, deadline - now);
        }
        true
    }

    /// Park incoming writes instead of acknowledging them.
    pub fn hold_writes(&self) {
        self.state.m.lock().hold_writes = true;
    }

    /// Acknowledge the oldest held write. Returns false when none is held.
    pub fn release_write(&self, ok: bool) -> bool {
        let tag = self.state.m.lock().held_writes.pop_front();
        match tag {
            Some(tag) => {
                self.state.push(tag, ok);
                true
            }
            None => false,
        }
    }
}
