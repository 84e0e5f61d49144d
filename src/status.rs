// Copyright 2026 SigRPC Project Authors. Licensed under Apache-2.0.

use std::fmt;

use parking_lot::RwLock;

/// The canonical gRPC status code set.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum StatusCode {
    Ok = 0,
    Cancelled = 1,
    Unknown = 2,
    InvalidArgument = 3,
    DeadlineExceeded = 4,
    NotFound = 5,
    AlreadyExists = 6,
    PermissionDenied = 7,
    ResourceExhausted = 8,
    FailedPrecondition = 9,
    Aborted = 10,
    OutOfRange = 11,
    Unimplemented = 12,
    Internal = 13,
    Unavailable = 14,
    DataLoss = 15,
    Unauthenticated = 16,
}

impl StatusCode {
    /// Maps a raw wire code to the enum. Unrecognized codes collapse to
    /// `Unknown`, as the underlying library does for out-of-band values.
    pub fn from_code(code: i32) -> StatusCode {
        match code {
            0 => StatusCode::Ok,
            1 => StatusCode::Cancelled,
            2 => StatusCode::Unknown,
            3 => StatusCode::InvalidArgument,
            4 => StatusCode::DeadlineExceeded,
            5 => StatusCode::NotFound,
            6 => StatusCode::AlreadyExists,
            7 => StatusCode::PermissionDenied,
            8 => StatusCode::ResourceExhausted,
            9 => StatusCode::FailedPrecondition,
            10 => StatusCode::Aborted,
            11 => StatusCode::OutOfRange,
            12 => StatusCode::Unimplemented,
            13 => StatusCode::Internal,
            14 => StatusCode::Unavailable,
            15 => StatusCode::DataLoss,
            16 => StatusCode::Unauthenticated,
            _ => StatusCode::Unknown,
        }
    }
}

struct Inner {
    code: StatusCode,
    message: String,
}

/// Status of a finished or failed RPC.
///
/// Readers and writers may live on different threads: continuations replace
/// the value from the channel's event thread while user code inspects it, so
/// the fields sit behind a reader-writer lock. Equality compares codes only.
pub struct Status {
    inner: RwLock<Inner>,
}

impl Status {
    pub fn new<S: Into<String>>(code: StatusCode, message: S) -> Status {
        Status {
            inner: RwLock::new(Inner {
                code,
                message: message.into(),
            }),
        }
    }

    /// A success status with an empty message.
    pub fn ok() -> Status {
        Status::new(StatusCode::Ok, "")
    }

    pub fn code(&self) -> StatusCode {
        self.inner.read().code
    }

    pub fn message(&self) -> String {
        self.inner.read().message.clone()
    }

    pub(crate) fn set<S: Into<String>>(&self, code: StatusCode, message: S) {
        let mut inner = self.inner.write();
        inner.code = code;
        inner.message = message.into();
    }
}

impl Default for Status {
    fn default() -> Status {
        Status::ok()
    }
}

impl Clone for Status {
    fn clone(&self) -> Status {
        let inner = self.inner.read();
        Status::new(inner.code, inner.message.clone())
    }
}

impl PartialEq for Status {
    fn eq(&self, other: &Status) -> bool {
        self.code() == other.code()
    }
}

impl PartialEq<StatusCode> for Status {
    fn eq(&self, code: &StatusCode) -> bool {
        self.code() == *code
    }
}

impl fmt::Debug for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.read();
        f.debug_struct("Status")
            .field("code", &inner.code)
            .field("message", &inner.message)
            .finish()
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.read();
        write!(f, "{:?}: {}", inner.code, inner.message)
    }
}
