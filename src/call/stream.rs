// Copyright 2026 SigRPC Project Authors. Licensed under Apache-2.0.

use std::collections::VecDeque;
use std::sync::Arc;

use log::debug;
use parking_lot::Mutex;

use crate::call::{tag, HomeThread, ReaderState};
use crate::cq::CompletionQueue;
use crate::dispatch::Dispatcher;
use crate::native::{
    AsyncReader, AsyncReaderWriter, ByteSlot, NativeChannel, RpcStatus, StatusSlot,
};
use crate::signal::Signal;
use crate::status::{Status, StatusCode};
use crate::write::{WriteAck, WriteStatus};

/// Server-streaming call: one request up front, any number of responses,
/// then the terminal status.
pub(crate) struct ServerStreamCall {
    method: String,
    request: Vec<u8>,
    pub(crate) status: Status,
    native_status: StatusSlot,
    response: ByteSlot,
    state: Mutex<ReaderState>,
    reader: Mutex<Option<Box<dyn AsyncReader>>>,
    native: Arc<dyn NativeChannel>,
    cq: Arc<CompletionQueue>,
    home: Dispatcher,
    pub(crate) data_ready: Signal<Vec<u8>>,
    pub(crate) finished: Signal<()>,
}

impl HomeThread for ServerStreamCall {
    fn home_dispatcher(&self) -> Dispatcher {
        self.home.clone()
    }
}

impl ServerStreamCall {
    pub(crate) fn new(
        native: Arc<dyn NativeChannel>,
        cq: Arc<CompletionQueue>,
        home: Dispatcher,
        method: String,
        request: Vec<u8>,
    ) -> Arc<ServerStreamCall> {
        Arc::new(ServerStreamCall {
            method,
            request,
            status: Status::ok(),
            native_status: Arc::new(Mutex::new(RpcStatus::ok())),
            response: Arc::new(Mutex::new(None)),
            state: Mutex::new(ReaderState::FirstCall),
            reader: Mutex::new(None),
            native,
            cq,
            home,
            data_ready: Signal::new(),
            finished: Signal::new(),
        })
    }

    pub(crate) fn start(call: &Arc<ServerStreamCall>) {
        call.status.set(StatusCode::Ok, "");
        *call.state.lock() = ReaderState::FirstCall;
        let mut reader = call.reader.lock();
        let created = call.native.server_stream(
            &call.cq,
            &call.method,
            call.request.clone(),
            tag(call, ServerStreamCall::on_data),
        );
        *reader = Some(created);
        reader.as_mut().unwrap().finish(
            call.native_status.clone(),
            tag(call, ServerStreamCall::on_finish),
        );
        debug!("server stream {} started", call.method);
    }

    pub(crate) fn cancel(&self) {
        debug!("server stream {} cancel", self.method);
        if let Some(reader) = self.reader.lock().as_mut() {
            reader.try_cancel();
        }
    }

    fn submit_read(call: &Arc<ServerStreamCall>) {
        if let Some(reader) = call.reader.lock().as_mut() {
            reader.read(call.response.clone(), tag(call, ServerStreamCall::on_data));
        }
    }

    fn on_data(call: &Arc<ServerStreamCall>, ok: bool) {
        let mut state = call.state.lock();
        if !ok {
            debug!("server stream {}: read direction ended", call.method);
            *state = ReaderState::Ended;
            return;
        }
        match *state {
            ReaderState::FirstCall => {
                *state = ReaderState::Processing;
                drop(state);
                ServerStreamCall::submit_read(call);
            }
            ReaderState::Processing => {
                let bytes = call.response.lock().take().unwrap_or_default();
                drop(state);
                call.data_ready.emit(&bytes);
                ServerStreamCall::submit_read(call);
            }
            ReaderState::Ended => {}
        }
    }

    fn on_finish(call: &Arc<ServerStreamCall>, ok: bool) {
        let native = call.native_status.lock().clone();
        debug!(
            "server stream {} finish, ok: {}, code: {:?}, message: {}",
            call.method, ok, native.code, native.message
        );
        // A locally recorded failure outranks the native status.
        if call.status == StatusCode::Ok {
            call.status.set(native.code, native.message);
        }
        call.finished.emit(&());
    }
}

struct WriteEntry {
    data: Vec<u8>,
    ack: Arc<WriteAck>,
    done: bool,
}

struct WriteQueue {
    queue: VecDeque<WriteEntry>,
    /// True while a write or writes-done tag is outstanding.
    in_process: bool,
    current: Option<Arc<WriteAck>>,
}

/// Bidirectional call. The read half matches [`ServerStreamCall`]; the
/// write half serializes submissions through a FIFO so only one write tag
/// is ever in flight, which is what makes acknowledgements complete in
/// submission order.
pub(crate) struct BidiStreamCall {
    method: String,
    pub(crate) status: Status,
    native_status: StatusSlot,
    response: ByteSlot,
    state: Mutex<ReaderState>,
    rw: Mutex<Option<Box<dyn AsyncReaderWriter>>>,
    writes: Mutex<WriteQueue>,
    native: Arc<dyn NativeChannel>,
    cq: Arc<CompletionQueue>,
    home: Dispatcher,
    pub(crate) data_ready: Signal<Vec<u8>>,
    pub(crate) finished: Signal<()>,
}

impl HomeThread for BidiStreamCall {
    fn home_dispatcher(&self) -> Dispatcher {
        self.home.clone()
    }
}

impl BidiStreamCall {
    pub(crate) fn new(
        native: Arc<dyn NativeChannel>,
        cq: Arc<CompletionQueue>,
        home: Dispatcher,
        method: String,
    ) -> Arc<BidiStreamCall> {
        Arc::new(BidiStreamCall {
            method,
            status: Status::ok(),
            native_status: Arc::new(Mutex::new(RpcStatus::ok())),
            response: Arc::new(Mutex::new(None)),
            state: Mutex::new(ReaderState::FirstCall),
            rw: Mutex::new(None),
            // Writes queue up until the first-call tag confirms the native
            // writer exists.
            writes: Mutex::new(WriteQueue {
                queue: VecDeque::new(),
                in_process: true,
                current: None,
            }),
            native,
            cq,
            home,
            data_ready: Signal::new(),
            finished: Signal::new(),
        })
    }

    pub(crate) fn start(call: &Arc<BidiStreamCall>) {
        call.status.set(StatusCode::Ok, "");
        *call.state.lock() = ReaderState::FirstCall;
        let mut rw = call.rw.lock();
        let created = call.native.duplex(
            &call.cq,
            &call.method,
            tag(call, BidiStreamCall::on_data),
        );
        *rw = Some(created);
        rw.as_mut().unwrap().finish(
            call.native_status.clone(),
            tag(call, BidiStreamCall::on_finish),
        );
        debug!("bidi stream {} started", call.method);
    }

    pub(crate) fn cancel(&self) {
        debug!("bidi stream {} cancel", self.method);
        if let Some(rw) = self.rw.lock().as_mut() {
            rw.try_cancel();
        }
    }

    /// Submit one payload; queued when a write is already in flight.
    pub(crate) fn append(call: &Arc<BidiStreamCall>, data: Vec<u8>, ack: Arc<WriteAck>) {
        {
            let mut writes = call.writes.lock();
            if writes.in_process {
                writes.queue.push_back(WriteEntry {
                    data,
                    ack,
                    done: false,
                });
                return;
            }
            writes.in_process = true;
            writes.current = Some(ack);
        }
        if let Some(rw) = call.rw.lock().as_mut() {
            rw.write(data, tag(call, BidiStreamCall::on_write));
        }
    }

    /// Close the write direction; queued behind outstanding writes.
    pub(crate) fn write_done(call: &Arc<BidiStreamCall>, ack: Arc<WriteAck>) {
        {
            let mut writes = call.writes.lock();
            if writes.in_process {
                writes.queue.push_back(WriteEntry {
                    data: Vec::new(),
                    ack,
                    done: true,
                });
                return;
            }
            writes.in_process = true;
            writes.current = Some(ack);
        }
        if let Some(rw) = call.rw.lock().as_mut() {
            rw.writes_done(tag(call, BidiStreamCall::on_write));
        }
    }

    fn submit_read(call: &Arc<BidiStreamCall>) {
        if let Some(rw) = call.rw.lock().as_mut() {
            rw.read(call.response.clone(), tag(call, BidiStreamCall::on_data));
        }
    }

    fn on_data(call: &Arc<BidiStreamCall>, ok: bool) {
        let mut state = call.state.lock();
        if !ok {
            debug!("bidi stream {}: read direction ended", call.method);
            *state = ReaderState::Ended;
            return;
        }
        match *state {
            ReaderState::FirstCall => {
                *state = ReaderState::Processing;
                drop(state);
                // The call is established: release whatever queued up
                // before the first-call tag, then start reading.
                BidiStreamCall::dequeue_write(call);
                BidiStreamCall::submit_read(call);
            }
            ReaderState::Processing => {
                let bytes = call.response.lock().take().unwrap_or_default();
                drop(state);
                call.data_ready.emit(&bytes);
                BidiStreamCall::submit_read(call);
            }
            ReaderState::Ended => {}
        }
    }

    fn on_write(call: &Arc<BidiStreamCall>, ok: bool) {
        debug!("bidi stream {} write finished, ok: {}", call.method, ok);
        let current = call.writes.lock().current.take();
        if let Some(ack) = current {
            ack.complete(ok);
        }
        BidiStreamCall::dequeue_write(call);
    }

    fn dequeue_write(call: &Arc<BidiStreamCall>) {
        let entry = {
            let mut writes = call.writes.lock();
            writes.in_process = !writes.queue.is_empty();
            if !writes.in_process {
                return;
            }
            let entry = writes.queue.pop_front().unwrap();
            writes.current = Some(entry.ack.clone());
            entry
        };
        if let Some(rw) = call.rw.lock().as_mut() {
            if entry.done {
                rw.writes_done(tag(call, BidiStreamCall::on_write));
            } else {
                rw.write(entry.data, tag(call, BidiStreamCall::on_write));
            }
        }
    }

    fn on_finish(call: &Arc<BidiStreamCall>, ok: bool) {
        let native = call.native_status.lock().clone();
        debug!(
            "bidi stream {} finish, ok: {}, code: {:?}, message: {}",
            call.method, ok, native.code, native.message
        );
        if call.status == StatusCode::Ok {
            call.status.set(native.code, native.message);
        }
        // Every unacknowledged write fails before the call reports its end.
        let mut failed: Vec<Arc<WriteAck>> = Vec::new();
        {
            let mut writes = call.writes.lock();
            if writes.in_process {
                failed.extend(writes.current.take());
            }
            failed.extend(writes.queue.drain(..).map(|entry| entry.ack));
            writes.in_process = false;
        }
        for ack in failed {
            ack.fail(WriteStatus::Failed);
        }
        call.finished.emit(&());
    }
}
