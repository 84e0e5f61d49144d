// Copyright 2026 SigRPC Project Authors. Licensed under Apache-2.0.

use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

use crate::signal::{Signal, SubscriptionId};

/// Terminal and transient states of one stream write.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WriteStatus {
    /// The write reached the transport.
    Ok,
    /// The write was rejected or the stream tore down first.
    Failed,
    /// The write sits in the send queue or on the wire.
    InProcess,
    /// No live stream was attached when the write was made.
    NotConnected,
}

/// Acknowledgement handle for one write or writes-done submission.
///
/// Created `NotConnected`; the channel wiring promotes it to `InProcess`
/// when it picks the payload up. Exactly one terminal transition follows:
/// `InProcess -> Ok` or `InProcess -> Failed`. A `NotConnected` ack is
/// terminal from the start and fires `error` then `finished` synchronously
/// at the write site.
pub struct WriteAck {
    status: Mutex<WriteStatus>,
    cond: Condvar,
    finished: Signal<()>,
    error: Signal<()>,
}

impl WriteAck {
    pub(crate) fn new() -> Arc<WriteAck> {
        Arc::new(WriteAck {
            status: Mutex::new(WriteStatus::NotConnected),
            cond: Condvar::new(),
            finished: Signal::new(),
            error: Signal::new(),
        })
    }

    pub fn status(&self) -> WriteStatus {
        *self.status.lock()
    }

    pub fn ok(&self) -> bool {
        self.status() == WriteStatus::Ok
    }

    pub fn on_finished<F>(&self, f: F) -> SubscriptionId
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.finished.connect(move |_| f())
    }

    pub fn on_error<F>(&self, f: F) -> SubscriptionId
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.error.connect(move |_| f())
    }

    /// Park until the ack leaves `InProcess`, then report the terminal
    /// status. Returns immediately for already-terminal acks.
    pub fn wait_finished(&self) -> WriteStatus {
        let mut status = self.status.lock();
        while *status == WriteStatus::InProcess {
            self.cond.wait(&mut status);
        }
        *status
    }

    pub(crate) fn set_status(&self, status: WriteStatus) {
        *self.status.lock() = status;
    }

    pub(crate) fn emit_finished(&self) {
        self.cond.notify_all();
        self.finished.emit(&());
    }

    pub(crate) fn emit_error(&self) {
        self.error.emit(&());
    }

    /// Terminal transition driven by the write tag's completion flag.
    pub(crate) fn complete(&self, ok: bool) {
        if ok {
            self.set_status(WriteStatus::Ok);
            self.emit_finished();
        } else {
            self.fail(WriteStatus::Failed);
        }
    }

    /// Terminal failure: `error` fires before `finished`.
    pub(crate) fn fail(&self, status: WriteStatus) {
        self.set_status(status);
        self.emit_error();
        self.emit_finished();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;
    use std::time::Duration;

    use super::*;

    #[test]
    fn test_success_transition() {
        let ack = WriteAck::new();
        assert_eq!(ack.status(), WriteStatus::NotConnected);
        ack.set_status(WriteStatus::InProcess);

        let errors = Arc::new(AtomicUsize::new(0));
        let finishes = Arc::new(AtomicUsize::new(0));
        let e = errors.clone();
        ack.on_error(move || {
            e.fetch_add(1, Ordering::SeqCst);
        });
        let f = finishes.clone();
        ack.on_finished(move || {
            f.fetch_add(1, Ordering::SeqCst);
        });

        ack.complete(true);
        assert!(ack.ok());
        assert_eq!(errors.load(Ordering::SeqCst), 0);
        assert_eq!(finishes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_failure_fires_error_then_finished() {
        let ack = WriteAck::new();
        ack.set_status(WriteStatus::InProcess);
        let order = Arc::new(Mutex::new(Vec::new()));
        let o = order.clone();
        ack.on_error(move || o.lock().push("error"));
        let o = order.clone();
        ack.on_finished(move || o.lock().push("finished"));

        ack.complete(false);
        assert_eq!(ack.status(), WriteStatus::Failed);
        assert_eq!(*order.lock(), vec!["error", "finished"]);
    }

    #[test]
    fn test_wait_unblocks_on_completion() {
        let ack = WriteAck::new();
        ack.set_status(WriteStatus::InProcess);
        let waiter = {
            let ack = ack.clone();
            thread::spawn(move || ack.wait_finished())
        };
        thread::sleep(Duration::from_millis(20));
        ack.complete(true);
        assert_eq!(waiter.join().unwrap(), WriteStatus::Ok);

        // Already-terminal acks do not block.
        assert_eq!(ack.wait_finished(), WriteStatus::Ok);
    }
}
