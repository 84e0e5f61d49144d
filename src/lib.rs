// Copyright 2026 SigRPC Project Authors. Licensed under Apache-2.0.

//! Signal-driven gRPC client channel runtime.
//!
//! The crate multiplexes unary calls, server streams, and bidirectional
//! streams over one native completion queue. A dedicated worker thread
//! drains the queue and re-posts each completion onto the channel's event
//! thread, where per-call state machines advance and fire the signals user
//! handles expose: `finished`, `error(Status)`, per-message delivery, and
//! per-write acknowledgements.
//!
//! The native gRPC core is consumed through the traits in [`native`]; an
//! in-memory peer for tests lives in [`testing`].

mod call;
mod channel;
mod client;
mod codec;
mod cq;
mod dispatch;
mod error;
mod native;
mod operation;
mod signal;
mod status;
pub mod testing;
mod write;

pub use crate::channel::{Channel, ChannelBuilder};
pub use crate::client::Client;
pub use crate::codec::{CodecKind, Message};
#[cfg(feature = "protobuf-codec")]
pub use crate::codec::pb;
pub use crate::cq::{CompletionQueue, Tag};
pub use crate::dispatch::Dispatcher;
pub use crate::error::{CodecError, Error, Result};
pub use crate::native::{
    AsyncReader, AsyncReaderWriter, ByteSlot, NativeChannel, RpcStatus, StatusSlot,
};
pub use crate::operation::{BidiStream, CallReply, ServerStream, StreamHandler};
pub use crate::signal::{Signal, SubscriptionId};
pub use crate::status::{Status, StatusCode};
pub use crate::write::{WriteAck, WriteStatus};
