// Copyright 2026 SigRPC Project Authors. Licensed under Apache-2.0.

//! Per-call state machines.
//!
//! Each call owns its native reader, the slots the native binding fills,
//! and a small reader state advancing strictly
//! `FirstCall -> Processing -> Ended`. Continuations arrive on the
//! channel's event thread; every submitted tag holds a strong reference to
//! the call, so the native reader cannot be freed while a tag is still in
//! the completion queue.

pub(crate) mod stream;

use std::sync::Arc;

use log::debug;
use parking_lot::Mutex;

use crate::cq::{CompletionQueue, Tag};
use crate::dispatch::Dispatcher;
use crate::native::{AsyncReader, ByteSlot, NativeChannel, RpcStatus, StatusSlot};
use crate::signal::Signal;
use crate::status::{Status, StatusCode};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum ReaderState {
    FirstCall,
    Processing,
    Ended,
}

/// Unary exchange: one request up front, one response message, then the
/// terminal status. Modeled as a reader with a single read, the way the
/// native async API exposes it.
pub(crate) struct UnaryCall {
    method: String,
    request: Vec<u8>,
    pub(crate) status: Status,
    native_status: StatusSlot,
    response: ByteSlot,
    pub(crate) response_data: Mutex<Vec<u8>>,
    state: Mutex<ReaderState>,
    reader: Mutex<Option<Box<dyn AsyncReader>>>,
    native: Arc<dyn NativeChannel>,
    cq: Arc<CompletionQueue>,
    home: Dispatcher,
    pub(crate) finished: Signal<()>,
}

impl UnaryCall {
    pub(crate) fn new(
        native: Arc<dyn NativeChannel>,
        cq: Arc<CompletionQueue>,
        home: Dispatcher,
        method: String,
        request: Vec<u8>,
    ) -> Arc<UnaryCall> {
        Arc::new(UnaryCall {
            method,
            request,
            status: Status::ok(),
            native_status: Arc::new(Mutex::new(RpcStatus::ok())),
            response: Arc::new(Mutex::new(None)),
            response_data: Mutex::new(Vec::new()),
            state: Mutex::new(ReaderState::FirstCall),
            reader: Mutex::new(None),
            native,
            cq,
            home,
            finished: Signal::new(),
        })
    }

    pub(crate) fn start(call: &Arc<UnaryCall>) {
        call.status.set(StatusCode::Ok, "");
        // Hold the reader slot while wiring so no continuation can observe
        // a half-started call.
        let mut reader = call.reader.lock();
        let created = call.native.unary(
            &call.cq,
            &call.method,
            call.request.clone(),
            tag(call, UnaryCall::on_data),
        );
        *reader = Some(created);
        reader
            .as_mut()
            .unwrap()
            .finish(call.native_status.clone(), tag(call, UnaryCall::on_finish));
        debug!("unary call {} started", call.method);
    }

    pub(crate) fn cancel(&self) {
        debug!("unary call {} cancel", self.method);
        if let Some(reader) = self.reader.lock().as_mut() {
            reader.try_cancel();
        }
    }

    fn on_data(call: &Arc<UnaryCall>, ok: bool) {
        let mut state = call.state.lock();
        if !ok {
            debug!("unary call {}: failed tag received", call.method);
            return;
        }
        match *state {
            ReaderState::FirstCall => {
                *state = ReaderState::Processing;
                drop(state);
                if let Some(reader) = call.reader.lock().as_mut() {
                    reader.read(call.response.clone(), tag(call, UnaryCall::on_data));
                }
            }
            ReaderState::Processing => {
                let bytes = call.response.lock().take().unwrap_or_default();
                *call.response_data.lock() = bytes;
                *state = ReaderState::Ended;
            }
            ReaderState::Ended => {}
        }
    }

    fn on_finish(call: &Arc<UnaryCall>, ok: bool) {
        let native = call.native_status.lock().clone();
        debug!(
            "unary call {} finish, ok: {}, code: {:?}",
            call.method, ok, native.code
        );
        if call.status == StatusCode::Ok {
            call.status.set(native.code, native.message);
        }
        call.finished.emit(&());
    }
}

/// Access to a call's home dispatcher, for tag construction.
pub(crate) trait HomeThread {
    fn home_dispatcher(&self) -> Dispatcher;
}

impl HomeThread for UnaryCall {
    fn home_dispatcher(&self) -> Dispatcher {
        self.home.clone()
    }
}

/// Build a tag whose continuation re-enters `call` on its home thread.
/// The captured clone is what keeps the call alive for the tag's lifetime.
pub(crate) fn tag<C>(call: &Arc<C>, f: fn(&Arc<C>, bool)) -> Tag
where
    C: HomeThread + Send + Sync + 'static,
{
    let home = call.home_dispatcher();
    let call = call.clone();
    Tag::new(&home, move |ok| f(&call, ok))
}
