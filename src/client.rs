// Copyright 2026 SigRPC Project Authors. Licensed under Apache-2.0.

//! The abstract client generated service stubs wrap.
//!
//! A client owns a home event-loop thread; every public method called from
//! a foreign thread hops onto it through a blocking dispatch, so the active
//! stream set is only ever touched from one thread. The client also owns
//! stream retry: a broken stream stays alive, is re-submitted through the
//! current channel after the retry period, and only leaves the active set
//! when its `finished` fires.

use std::sync::Arc;
use std::time::Duration;

use log::{debug, warn};
use parking_lot::Mutex;

use crate::channel::{Channel, TeardownSet};
use crate::codec::CodecKind;
use crate::dispatch::{Dispatcher, EventLoop};
use crate::operation::{BidiStream, CallReply, ServerStream, StreamHandler};
use crate::signal::Signal;
use crate::status::{Status, StatusCode};

const FALLBACK_RETRY: Duration = Duration::from_millis(1000);

fn no_channel() -> Status {
    Status::new(StatusCode::Unknown, "No channel(s) attached.")
}

struct State {
    channel: Option<Channel>,
    streams: Vec<Arc<ServerStream>>,
    bidi: Vec<Arc<BidiStream>>,
}

pub(crate) struct Shared {
    service: String,
    home: Dispatcher,
    state: Mutex<State>,
    error: Signal<Status>,
    destroyed: Arc<Signal<()>>,
}

/// Client for one gRPC service.
pub struct Client {
    shared: Arc<Shared>,
    home: EventLoop,
}

impl Client {
    pub fn new(service: &str) -> Client {
        let home = EventLoop::spawn("sigrpc-client");
        let shared = Arc::new(Shared {
            service: service.to_owned(),
            home: home.dispatcher(),
            state: Mutex::new(State {
                channel: None,
                streams: Vec::new(),
                bidi: Vec::new(),
            }),
            error: Signal::new(),
            destroyed: Arc::new(Signal::new()),
        });
        Client { shared, home }
    }

    pub fn service(&self) -> &str {
        &self.shared.service
    }

    /// Errors from every call and stream of this client, re-emitted here.
    pub fn error(&self) -> &Signal<Status> {
        &self.shared.error
    }

    /// Codec of the currently attached channel.
    pub fn codec(&self) -> Option<CodecKind> {
        self.shared
            .state
            .lock()
            .channel
            .as_ref()
            .map(|channel| channel.codec())
    }

    /// Replace the channel. Active streams are aborted before the swap;
    /// anything submitted afterwards, including retries already scheduled,
    /// runs against the new channel.
    pub fn attach_channel(&self, channel: Channel) {
        let sh = self.shared.clone();
        self.shared.home.invoke(move || {
            let (streams, bidi) = {
                let state = sh.state.lock();
                (state.streams.clone(), state.bidi.clone())
            };
            for stream in &streams {
                stream.abort();
            }
            for stream in &bidi {
                stream.abort();
            }
            sh.state.lock().channel = Some(channel);
        });
    }

    /// Blocking unary call.
    pub fn call_blocking(&self, method: &str, args: &[u8]) -> (Status, Vec<u8>) {
        let sh = self.shared.clone();
        let method = method.to_owned();
        let args = args.to_vec();
        self.shared
            .home
            .invoke(move || Shared::call_blocking_on_home(&sh, &method, &args))
    }

    /// Asynchronous unary call. `None` when no channel is attached.
    pub fn call(&self, method: &str, args: &[u8]) -> Option<Arc<CallReply>> {
        let sh = self.shared.clone();
        let method = method.to_owned();
        let args = args.to_vec();
        self.shared
            .home
            .invoke(move || Shared::call_on_home(&sh, &method, &args))
    }

    /// Subscribe to a server stream. Subscriptions with equal
    /// `(method, args)` identity share one handle.
    pub fn stream<F>(&self, method: &str, args: &[u8], handler: F) -> Option<Arc<ServerStream>>
    where
        F: Fn(&[u8]) + Send + Sync + 'static,
    {
        let sh = self.shared.clone();
        let method = method.to_owned();
        let args = args.to_vec();
        let handler: StreamHandler = Arc::new(handler);
        self.shared
            .home
            .invoke(move || Shared::stream_on_home(&sh, method, args, handler))
    }

    /// Open a bidirectional stream. Streams on the same method share one
    /// handle.
    pub fn stream_bidirect<F>(
        &self,
        method: &str,
        args: &[u8],
        handler: F,
    ) -> Option<Arc<BidiStream>>
    where
        F: Fn(&[u8]) + Send + Sync + 'static,
    {
        let sh = self.shared.clone();
        let method = method.to_owned();
        let args = args.to_vec();
        let handler: StreamHandler = Arc::new(handler);
        self.shared
            .home
            .invoke(move || Shared::stream_bidirect_on_home(&sh, method, args, handler))
    }

    pub(crate) fn destroyed_arc(&self) -> Arc<Signal<()>> {
        self.shared.destroyed.clone()
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        debug!("client for {} destroyed", self.shared.service);
        // Cancels every wired call and tears its subscriptions down.
        self.shared.destroyed.emit(&());
        // Finish the handles so their own subscriptions unwind too; the
        // removal tasks they post still run before the loop stops.
        let (streams, bidi) = {
            let state = self.shared.state.lock();
            (state.streams.clone(), state.bidi.clone())
        };
        for stream in &streams {
            stream.abort();
        }
        for stream in &bidi {
            stream.abort();
        }
        let sh = self.shared.clone();
        self.shared.home.try_invoke(move || {
            let mut state = sh.state.lock();
            state.streams.clear();
            state.bidi.clear();
            state.channel = None;
        });
        self.home.stop();
    }
}

impl Shared {
    fn current_channel(&self) -> Option<Channel> {
        self.state.lock().channel.clone()
    }

    fn retry_period(&self) -> Duration {
        self.current_channel()
            .map(|channel| channel.retry_period())
            .unwrap_or(FALLBACK_RETRY)
    }

    fn call_blocking_on_home(sh: &Arc<Shared>, method: &str, args: &[u8]) -> (Status, Vec<u8>) {
        let (status, data) = match sh.current_channel() {
            Some(channel) => channel.call_blocking(method, &sh.service, args),
            None => (no_channel(), Vec::new()),
        };
        if status != StatusCode::Ok {
            sh.error.emit(&status);
        }
        (status, data)
    }

    fn call_on_home(sh: &Arc<Shared>, method: &str, args: &[u8]) -> Option<Arc<CallReply>> {
        let channel = match sh.current_channel() {
            Some(channel) => channel,
            None => {
                sh.error.emit(&no_channel());
                return None;
            }
        };
        let reply = CallReply::new();
        let subs = TeardownSet::new();

        let error_sub = {
            let sh = sh.clone();
            let subs = subs.clone();
            reply.error().connect(move |status: &Status| {
                sh.error.emit(status);
                subs.teardown();
            })
        };
        {
            let reply = reply.clone();
            subs.add(move || reply.error().disconnect(error_sub));
        }

        let finished_sub = {
            let subs = subs.clone();
            reply.finished().connect(move |_| subs.teardown())
        };
        {
            let reply = reply.clone();
            subs.add(move || reply.finished().disconnect(finished_sub));
        }

        channel.call_async(method, &sh.service, args, &reply);
        Some(reply)
    }

    fn stream_on_home(
        sh: &Arc<Shared>,
        method: String,
        args: Vec<u8>,
        handler: StreamHandler,
    ) -> Option<Arc<ServerStream>> {
        let channel = match sh.current_channel() {
            Some(channel) => channel,
            None => {
                sh.error.emit(&no_channel());
                return None;
            }
        };
        {
            let state = sh.state.lock();
            if let Some(existing) = state.streams.iter().find(|s| s.matches(&method, &args)) {
                debug!("stream {} already active, attaching handler", method);
                existing.add_handler(handler);
                return Some(existing.clone());
            }
        }

        let stream = ServerStream::new(method, args, Some(handler));
        let subs = TeardownSet::new();

        let error_sub = {
            let sh2 = sh.clone();
            let weak = Arc::downgrade(&stream);
            stream.error().connect(move |status: &Status| {
                let stream = match weak.upgrade() {
                    Some(stream) => stream,
                    None => return,
                };
                warn!(
                    "{} call {} stream error: {}",
                    stream.method(),
                    sh2.service,
                    status.message()
                );
                sh2.error.emit(status);
                let sh3 = sh2.clone();
                let weak = Arc::downgrade(&stream);
                sh2.home.post_delayed(sh2.retry_period(), move || {
                    if let Some(stream) = weak.upgrade() {
                        if let Some(channel) = sh3.current_channel() {
                            debug!("re-submitting stream {}", stream.method());
                            channel.stream_with(&stream, &sh3.service, &sh3.destroyed);
                        }
                    } else {
                        debug!("stream released, not restored by timeout");
                    }
                });
            })
        };
        {
            let stream = stream.clone();
            subs.add(move || stream.error().disconnect(error_sub));
        }

        let finished_sub = {
            let sh2 = sh.clone();
            let s = stream.clone();
            let subs2 = subs.clone();
            stream.finished().connect(move |_| {
                warn!("{} call {} stream finished", s.method(), sh2.service);
                let sh3 = sh2.clone();
                let s = s.clone();
                let subs3 = subs2.clone();
                sh2.home.post(move || {
                    sh3.state.lock().streams.retain(|x| !Arc::ptr_eq(x, &s));
                    subs3.teardown();
                });
            })
        };
        {
            let stream = stream.clone();
            subs.add(move || stream.finished().disconnect(finished_sub));
        }

        channel.stream_with(&stream, &sh.service, &sh.destroyed);
        sh.state.lock().streams.push(stream.clone());
        Some(stream)
    }

    fn stream_bidirect_on_home(
        sh: &Arc<Shared>,
        method: String,
        args: Vec<u8>,
        handler: StreamHandler,
    ) -> Option<Arc<BidiStream>> {
        let channel = match sh.current_channel() {
            Some(channel) => channel,
            None => {
                sh.error.emit(&no_channel());
                return None;
            }
        };
        {
            let state = sh.state.lock();
            if let Some(existing) = state.bidi.iter().find(|s| s.method() == method) {
                debug!("bidi stream {} already active, attaching handler", method);
                existing.add_handler(handler);
                return Some(existing.clone());
            }
        }

        let stream = BidiStream::new(method, args, Some(handler));
        let subs = TeardownSet::new();

        let error_sub = {
            let sh2 = sh.clone();
            let weak = Arc::downgrade(&stream);
            stream.error().connect(move |status: &Status| {
                let stream = match weak.upgrade() {
                    Some(stream) => stream,
                    None => return,
                };
                warn!(
                    "{} call {} stream error: {}",
                    stream.method(),
                    sh2.service,
                    status.message()
                );
                sh2.error.emit(status);
                let sh3 = sh2.clone();
                let weak = Arc::downgrade(&stream);
                sh2.home.post_delayed(sh2.retry_period(), move || {
                    if let Some(stream) = weak.upgrade() {
                        if let Some(channel) = sh3.current_channel() {
                            debug!("re-submitting bidi stream {}", stream.method());
                            channel.stream_bidi_with(&stream, &sh3.service, &sh3.destroyed);
                        }
                    } else {
                        debug!("bidi stream released, not restored by timeout");
                    }
                });
            })
        };
        {
            let stream = stream.clone();
            subs.add(move || stream.error().disconnect(error_sub));
        }

        let finished_sub = {
            let sh2 = sh.clone();
            let s = stream.clone();
            let subs2 = subs.clone();
            stream.finished().connect(move |_| {
                warn!("{} call {} stream finished", s.method(), sh2.service);
                let sh3 = sh2.clone();
                let s = s.clone();
                let subs3 = subs2.clone();
                sh2.home.post(move || {
                    sh3.state.lock().bidi.retain(|x| !Arc::ptr_eq(x, &s));
                    subs3.teardown();
                });
            })
        };
        {
            let stream = stream.clone();
            subs.add(move || stream.finished().disconnect(finished_sub));
        }

        channel.stream_bidi_with(&stream, &sh.service, &sh.destroyed);
        sh.state.lock().bidi.push(stream.clone());
        Some(stream)
    }
}
