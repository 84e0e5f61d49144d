// Copyright 2026 SigRPC Project Authors. Licensed under Apache-2.0.

//! Interface to the native asynchronous gRPC core.
//!
//! The wire protocol itself lives in an external binding; the runtime only
//! requires the three asynchronous call shapes below. Each operation takes
//! a [`Tag`] and reports completion through the channel's completion queue.
//! Received payloads and the terminal status are written into slots owned
//! by the call before the matching tag is delivered, mirroring the
//! out-parameter contract of the native reader API.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::cq::{CompletionQueue, Tag};
use crate::status::StatusCode;

/// Raw status as delivered by the peer or synthesized by the binding.
#[derive(Clone, Debug)]
pub struct RpcStatus {
    pub code: StatusCode,
    pub message: String,
}

impl RpcStatus {
    pub fn new<S: Into<String>>(code: StatusCode, message: S) -> RpcStatus {
        RpcStatus {
            code,
            message: message.into(),
        }
    }

    pub fn ok() -> RpcStatus {
        RpcStatus::new(StatusCode::Ok, "")
    }
}

/// Out-slot for one received message.
pub type ByteSlot = Arc<Mutex<Option<Vec<u8>>>>;

/// Out-slot for the call's terminal status.
pub type StatusSlot = Arc<Mutex<RpcStatus>>;

/// Read half shared by all call shapes.
///
/// At most one read and one finish may be outstanding at a time; the
/// per-call state machines uphold this.
pub trait AsyncReader: Send {
    /// Request the next message. The tag completes with `ok == false` once
    /// the peer has closed the read direction.
    fn read(&mut self, into: ByteSlot, tag: Tag);

    /// Request the terminal status. The tag completes after the read
    /// direction has ended.
    fn finish(&mut self, into: StatusSlot, tag: Tag);

    /// Best-effort local cancellation; subsequent tags complete with
    /// `ok == false`.
    fn try_cancel(&mut self);
}

/// Write half of a bidirectional call. One write or writes-done may be in
/// flight at a time.
pub trait AsyncReaderWriter: AsyncReader {
    fn write(&mut self, data: Vec<u8>, tag: Tag);

    fn writes_done(&mut self, tag: Tag);
}

/// A connected native channel, produced from a target URL and credentials
/// by the external binding.
pub trait NativeChannel: Send + Sync {
    /// Start a unary exchange; the request is sent and the client half
    /// closed up front. `start` completes once the call is established.
    fn unary(
        &self,
        cq: &Arc<CompletionQueue>,
        method: &str,
        request: Vec<u8>,
        start: Tag,
    ) -> Box<dyn AsyncReader>;

    /// Start a server-streaming exchange.
    fn server_stream(
        &self,
        cq: &Arc<CompletionQueue>,
        method: &str,
        request: Vec<u8>,
        start: Tag,
    ) -> Box<dyn AsyncReader>;

    /// Start a bidirectional exchange.
    fn duplex(&self, cq: &Arc<CompletionQueue>, method: &str, start: Tag)
        -> Box<dyn AsyncReaderWriter>;
}
