// Copyright 2026 SigRPC Project Authors. Licensed under Apache-2.0.

//! Home-thread event loops and cross-thread dispatch.
//!
//! Every client and channel owns one event loop; objects bound to it must
//! run their mutating operations on that thread. A foreign thread posts a
//! closure and, for the blocking variant, parks until the closure returns.

use std::sync::mpsc::{channel, Sender};
use std::thread::{self, Builder, JoinHandle, ThreadId};
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

type Task = Box<dyn FnOnce() + Send>;

enum Command {
    Run(Task),
    Stop,
}

/// Handle to an event loop's task queue.
#[derive(Clone)]
pub struct Dispatcher {
    tx: Sender<Command>,
    home: ThreadId,
}

impl Dispatcher {
    pub fn is_home(&self) -> bool {
        thread::current().id() == self.home
    }

    /// Queue a task. Tasks posted to a stopped loop are dropped.
    pub fn post<F>(&self, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let _ = self.tx.send(Command::Run(Box::new(f)));
    }

    /// Queue a task after `delay`. One-shot, used for stream retry.
    pub fn post_delayed<F>(&self, delay: Duration, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let this = self.clone();
        let spawned = Builder::new()
            .name("sigrpc-timer".to_owned())
            .spawn(move || {
                thread::sleep(delay);
                this.post(f);
            });
        if let Err(e) = spawned {
            log::warn!("failed to spawn one-shot timer: {}", e);
        }
    }

    /// Blocking cross-thread dispatch. Runs `f` inline when already on the
    /// home thread, otherwise posts it and waits for the result. Returns
    /// `None` when the loop has already stopped.
    pub fn try_invoke<F, R>(&self, f: F) -> Option<R>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        if self.is_home() {
            return Some(f());
        }
        let (tx, rx) = channel();
        self.post(move || {
            let _ = tx.send(f());
        });
        rx.recv().ok()
    }

    /// As `try_invoke`, for loops whose owner is statically alive.
    pub fn invoke<F, R>(&self, f: F) -> R
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        self.try_invoke(f)
            .expect("event loop terminated during blocking dispatch")
    }
}

/// An owned event loop thread. Stops and joins on `stop()` or drop.
pub(crate) struct EventLoop {
    dispatcher: Dispatcher,
    join: Option<JoinHandle<()>>,
}

impl EventLoop {
    pub fn spawn(name: &str) -> EventLoop {
        let (tx, rx) = channel::<Command>();
        let join = Builder::new()
            .name(name.to_owned())
            .spawn(move || {
                while let Ok(cmd) = rx.recv() {
                    match cmd {
                        Command::Run(task) => task(),
                        Command::Stop => break,
                    }
                }
            })
            .expect("failed to spawn event loop thread");
        let home = join.thread().id();
        EventLoop {
            dispatcher: Dispatcher { tx, home },
            join: Some(join),
        }
    }

    pub fn dispatcher(&self) -> Dispatcher {
        self.dispatcher.clone()
    }

    pub fn stop(&mut self) {
        let _ = self.dispatcher.tx.send(Command::Stop);
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}

impl Drop for EventLoop {
    fn drop(&mut self) {
        self.stop();
    }
}

/// One-shot gate for blocking waits. Opened by a terminal signal.
pub(crate) struct Latch {
    open: Mutex<bool>,
    cond: Condvar,
}

impl Latch {
    pub fn new() -> Latch {
        Latch {
            open: Mutex::new(false),
            cond: Condvar::new(),
        }
    }

    pub fn open(&self) {
        let mut open = self.open.lock();
        *open = true;
        self.cond.notify_all();
    }

    pub fn wait(&self) {
        let mut open = self.open.lock();
        while !*open {
            self.cond.wait(&mut open);
        }
    }

    #[cfg(test)]
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let mut open = self.open.lock();
        if !*open {
            self.cond.wait_for(&mut open, timeout);
        }
        *open
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    use super::*;

    #[test]
    fn test_invoke_runs_on_home_thread() {
        let mut ev = EventLoop::spawn("test-loop");
        let d = ev.dispatcher();
        let home = d.invoke(|| thread::current().id());
        assert_ne!(home, thread::current().id());
        let d2 = d.clone();
        // Inline execution when invoked from the home thread itself.
        let nested = d.invoke(move || d2.invoke(|| thread::current().id()));
        assert_eq!(home, nested);
        ev.stop();
    }

    #[test]
    fn test_try_invoke_after_stop() {
        let mut ev = EventLoop::spawn("test-loop");
        let d = ev.dispatcher();
        ev.stop();
        assert!(d.try_invoke(|| 1).is_none());
    }

    #[test]
    fn test_post_delayed_fires_once() {
        let ev = EventLoop::spawn("test-loop");
        let fired = Arc::new(AtomicBool::new(false));
        let latch = Arc::new(Latch::new());
        let (f, l) = (fired.clone(), latch.clone());
        ev.dispatcher().post_delayed(Duration::from_millis(10), move || {
            f.store(true, Ordering::SeqCst);
            l.open();
        });
        assert!(latch.wait_timeout(Duration::from_secs(5)));
        assert!(fired.load(Ordering::SeqCst));
    }
}
