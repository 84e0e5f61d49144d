// Copyright 2026 SigRPC Project Authors. Licensed under Apache-2.0.

//! The completion queue and its worker loop.
//!
//! Every asynchronous native operation is submitted together with a `Tag`:
//! a heap-allocated continuation bound to its originating call. The native
//! binding pushes the tag back with a success flag once the operation
//! completes; a dedicated worker thread drains the queue and re-posts each
//! continuation onto the call's home thread. The tag holds a strong
//! reference to its call through the captured closure, which is what keeps
//! call state alive until the last outstanding tag has been consumed.

use std::collections::VecDeque;

use parking_lot::{Condvar, Mutex};

use crate::dispatch::Dispatcher;
use crate::error::{Error, Result};

/// Continuation for one in-flight native operation.
pub struct Tag {
    home: Dispatcher,
    run: Box<dyn FnOnce(bool) + Send>,
}

impl Tag {
    pub(crate) fn new<F>(home: &Dispatcher, run: F) -> Tag
    where
        F: FnOnce(bool) + Send + 'static,
    {
        Tag {
            home: home.clone(),
            run: Box::new(run),
        }
    }

    /// Hand the continuation back to the call's home thread.
    pub fn complete(self, ok: bool) {
        let Tag { home, run } = self;
        home.post(move || run(ok));
    }
}

struct State {
    events: VecDeque<(Tag, bool)>,
    shut: bool,
}

/// Thread-safe queue of completed native operations.
///
/// After `shutdown()` already-queued events are still handed out until the
/// queue is empty; only then does `next()` report shutdown. New submissions
/// are refused.
pub struct CompletionQueue {
    state: Mutex<State>,
    cond: Condvar,
}

impl CompletionQueue {
    pub fn new() -> CompletionQueue {
        CompletionQueue {
            state: Mutex::new(State {
                events: VecDeque::new(),
                shut: false,
            }),
            cond: Condvar::new(),
        }
    }

    /// Push a completion. Fails once the queue is shut down; the caller is
    /// expected to drop the tag, which releases its reference on the call.
    pub fn submit(&self, tag: Tag, ok: bool) -> Result<()> {
        let mut state = self.state.lock();
        if state.shut {
            return Err(Error::QueueShutdown);
        }
        state.events.push_back((tag, ok));
        self.cond.notify_one();
        Ok(())
    }

    pub fn shutdown(&self) {
        let mut state = self.state.lock();
        state.shut = true;
        self.cond.notify_all();
    }

    /// Block for the next completion. `None` means the queue was shut down
    /// and has been fully drained.
    pub(crate) fn next(&self) -> Option<(Tag, bool)> {
        let mut state = self.state.lock();
        loop {
            if let Some(event) = state.events.pop_front() {
                return Some(event);
            }
            if state.shut {
                return None;
            }
            self.cond.wait(&mut state);
        }
    }
}

impl Default for CompletionQueue {
    fn default() -> CompletionQueue {
        CompletionQueue::new()
    }
}

/// Worker body: drain the queue, dispatch each continuation, then run the
/// shutdown notification.
pub(crate) fn poll_queue<F: FnOnce()>(cq: &CompletionQueue, on_drained: F) {
    while let Some((tag, ok)) = cq.next() {
        tag.complete(ok);
    }
    log::debug!("completion queue drained, worker exiting");
    on_drained();
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    use super::*;
    use crate::dispatch::{EventLoop, Latch};

    #[test]
    fn test_fifo_and_shutdown_drain() {
        let ev = EventLoop::spawn("cq-test");
        let cq = Arc::new(CompletionQueue::new());
        let order = Arc::new(Mutex::new(Vec::new()));
        let latch = Arc::new(Latch::new());

        for i in 0..3 {
            let order = order.clone();
            cq.submit(
                Tag::new(&ev.dispatcher(), move |ok| {
                    assert!(ok);
                    order.lock().push(i);
                }),
                true,
            )
            .unwrap();
        }
        cq.shutdown();
        assert!(cq.submit(Tag::new(&ev.dispatcher(), |_| {}), true).is_err());

        // Queued events must still drain after shutdown.
        let worker = {
            let cq = cq.clone();
            let latch = latch.clone();
            thread::spawn(move || poll_queue(&cq, move || latch.open()))
        };
        assert!(latch.wait_timeout(Duration::from_secs(5)));
        worker.join().unwrap();

        // Continuations run on the event loop in submission order.
        let done = Arc::new(Latch::new());
        let d = done.clone();
        ev.dispatcher().post(move || d.open());
        assert!(done.wait_timeout(Duration::from_secs(5)));
        assert_eq!(*order.lock(), vec![0, 1, 2]);
    }

    #[test]
    fn test_dropped_tag_releases_closure() {
        let ev = EventLoop::spawn("cq-test");
        let cq = CompletionQueue::new();
        cq.shutdown();
        let refs = Arc::new(AtomicUsize::new(0));
        let held = Arc::new(());
        let captured = held.clone();
        let refs2 = refs.clone();
        let tag = Tag::new(&ev.dispatcher(), move |_| {
            refs2.store(Arc::strong_count(&captured), Ordering::SeqCst);
        });
        assert!(cq.submit(tag, true).is_err());
        // The refused tag was dropped together with its capture.
        assert_eq!(Arc::strong_count(&held), 1);
        assert_eq!(refs.load(Ordering::SeqCst), 0);
    }
}
