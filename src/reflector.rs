//! Keeps a [`Store`] in sync with a remote collection by list-then-watch.
//!
//! The reflector lists the collection once, then watches it from the version
//! the list returned. When the watch stream ends it is reopened from the last
//! version seen, after a delay that grows while reconnects keep failing. If the
//! API server no longer remembers that version, the collection is listed again
//! and the differences are reported as ordinary add/update/delete callbacks.

use std::panic;

use futures::StreamExt;
use log::{debug, info, warn};
use tokio::{select, sync::watch, task::JoinHandle};
use tokio_util::sync::CancellationToken;

use crate::{
    error::{DecodeError, Error},
    handler::Handler,
    object::{QualifiedName, ResourceVersion, Watched},
    store::{Delta, Put, Store, Writer},
    transport::{Event, ListPage, Transport},
};

mod backoff;
pub use backoff::Backoff;

/// Where the reflector is in its list/watch cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Listing,
    Watching,
    /// Waiting to reopen a watch that ended.
    Resuming,
    /// Cancelled. Terminal.
    Stopped,
}

/// How a watch stream came to an end.
enum Closed {
    Cancelled,
    Expired,
    /// The server closed the stream without an error, typically at its timeout.
    Ended,
    Disconnected,
}

pub struct Reflector<T: Transport, H> {
    transport: T,
    handler: H,
    writer: Writer<T::Object>,
    backoff: Backoff,
    /// The last version observed on the collection; `None` until the first list succeeds.
    token: Option<ResourceVersion>,
    phase: watch::Sender<Phase>,
}

impl<T, H> Reflector<T, H>
where
    T: Transport,
    H: Handler<T::Object>,
{
    pub fn new(transport: T, handler: H, backoff: Backoff) -> Self {
        let (phase, _) = watch::channel(Phase::Listing);
        Self {
            transport,
            handler,
            writer: Writer::new(),
            backoff,
            token: None,
            phase,
        }
    }

    /// A read-only view of the cache this reflector maintains.
    pub fn store(&self) -> Store<T::Object> {
        self.writer.as_reader()
    }

    /// Subscribes to phase changes.
    pub fn phase(&self) -> watch::Receiver<Phase> {
        self.phase.subscribe()
    }

    /// Runs until `cancel` is triggered.
    ///
    /// Failures are retried indefinitely. Once `cancel` fires, no further
    /// callbacks are made and any open watch connection is dropped.
    pub async fn run(mut self, cancel: CancellationToken) {
        let mut relist = true;
        let mut list_expired = false;
        loop {
            if relist {
                self.set_phase(Phase::Listing);
                let listed = select! {
                    biased;
                    () = cancel.cancelled() => break,
                    listed = self.transport.list() => listed,
                };
                match listed {
                    Ok(page) => {
                        self.backoff.reset();
                        self.resync(page, &cancel);
                        relist = false;
                        list_expired = false;
                    }
                    // a repeated expiry falls through to the backoff
                    Err(Error::StaleVersion(msg)) if !list_expired => {
                        info!("list expired ({msg}), relisting");
                        list_expired = true;
                        continue;
                    }
                    Err(err) => {
                        warn!("list failed: {err}");
                        if !self.pause(&cancel).await {
                            break;
                        }
                        continue;
                    }
                }
            }

            let Some(since) = self.token else {
                relist = true;
                continue;
            };

            self.set_phase(Phase::Watching);
            let opened = select! {
                biased;
                () = cancel.cancelled() => break,
                opened = self.transport.watch(since) => opened,
            };
            let closed = match opened {
                Ok(stream) => self.consume(stream, &cancel).await,
                Err(Error::StaleVersion(msg)) => {
                    info!("resource version {since} expired ({msg}), relisting");
                    Closed::Expired
                }
                Err(err) => {
                    warn!("failed to open watch from {since}: {err}");
                    Closed::Disconnected
                }
            };

            match closed {
                Closed::Cancelled => break,
                Closed::Expired => relist = true,
                Closed::Ended => {
                    self.backoff.reset();
                    if !self.resume(&cancel).await {
                        break;
                    }
                }
                Closed::Disconnected => {
                    if !self.resume(&cancel).await {
                        break;
                    }
                }
            }
        }
        self.set_phase(Phase::Stopped);
    }

    /// Reads `stream` until it ends, applying each event in order.
    async fn consume(&mut self, mut stream: T::Watch, cancel: &CancellationToken) -> Closed {
        loop {
            let item = select! {
                biased;
                () = cancel.cancelled() => return Closed::Cancelled,
                item = stream.next() => item,
            };
            match item {
                None => {
                    debug!("watch stream closed");
                    return Closed::Ended;
                }
                Some(Ok(event)) => {
                    if cancel.is_cancelled() {
                        return Closed::Cancelled;
                    }
                    self.backoff.reset();
                    self.apply(event);
                }
                Some(Err(Error::Decode(err))) => warn!("skipping watch event: {err}"),
                Some(Err(Error::StaleVersion(msg))) => {
                    info!("watch expired ({msg}), relisting");
                    return Closed::Expired;
                }
                Some(Err(err)) => {
                    warn!("watch stream failed: {err}");
                    return Closed::Disconnected;
                }
            }
        }
    }

    /// Replaces the cache with a fresh list, firing callbacks for what changed.
    fn resync(&mut self, page: ListPage<T::Object>, cancel: &CancellationToken) {
        let objects = page
            .items
            .into_iter()
            .filter_map(|object| match identify(&object) {
                Ok((key, version)) => Some((key, object, version)),
                Err(err) => {
                    warn!("skipping listed object: {err}");
                    None
                }
            })
            .collect::<Vec<_>>();
        debug!("listed {} objects at version {}", objects.len(), page.version);

        for delta in self.writer.replace(objects) {
            if cancel.is_cancelled() {
                return;
            }
            match delta {
                Delta::Added(object) => self.handler.on_add(&object),
                Delta::Updated { old, new } => self.handler.on_update(&old, &new),
                Delta::Deleted(object) => self.handler.on_delete(&object),
            }
        }
        self.token = Some(page.version);
    }

    fn apply(&mut self, event: Event<T::Object>) {
        let (object, deleted) = match event {
            Event::Bookmark(version) => {
                self.advance(version);
                return;
            }
            Event::Added(object) | Event::Modified(object) => (object, false),
            Event::Deleted(object) => (object, true),
        };

        let (key, version) = match identify(&object) {
            Ok(identity) => identity,
            Err(err) => {
                warn!("skipping watch event: {err}");
                return;
            }
        };
        self.advance(version);

        if deleted {
            match self.writer.version(&key) {
                Some(stored) if stored < version => {
                    self.writer.delete(&key);
                    self.handler.on_delete(&object);
                }
                Some(stored) => {
                    debug!("ignoring stale delete of {key} at {version} (have {stored})")
                }
                None => debug!("ignoring delete of unknown {key}"),
            }
            return;
        }

        match self.writer.put(key.clone(), object, version) {
            Put::Inserted(new) => self.handler.on_add(&new),
            Put::Replaced { old, new } => self.handler.on_update(&old, &new),
            Put::Ignored => debug!("ignoring stale event for {key} at {version}"),
        }
    }

    fn advance(&mut self, version: ResourceVersion) {
        if self.token.map_or(true, |token| token < version) {
            self.token = Some(version);
        }
    }

    async fn resume(&mut self, cancel: &CancellationToken) -> bool {
        self.set_phase(Phase::Resuming);
        self.pause(cancel).await
    }

    /// Sleeps for the next backoff delay. Returns `false` if cancelled meanwhile.
    async fn pause(&mut self, cancel: &CancellationToken) -> bool {
        let delay = self.backoff.next_delay();
        debug!("retrying in {delay:?}");
        select! {
            biased;
            () = cancel.cancelled() => false,
            () = tokio::time::sleep(delay) => true,
        }
    }

    fn set_phase(&self, phase: Phase) {
        debug!("reflector phase: {phase:?}");
        self.phase.send_replace(phase);
    }
}

fn identify<K: Watched>(object: &K) -> Result<(QualifiedName, ResourceVersion), DecodeError> {
    Ok((object.identity()?, object.version()?))
}

/// Starts `reflector` on the tokio runtime.
pub fn spawn<T, H>(reflector: Reflector<T, H>) -> Handle
where
    T: Transport + 'static,
    H: Handler<T::Object> + 'static,
{
    let token = CancellationToken::new();
    let join_handle = tokio::spawn(reflector.run(token.clone()));
    Handle { join_handle, token }
}

/// A running reflector.
pub struct Handle {
    join_handle: JoinHandle<()>,
    token: CancellationToken,
}

impl Handle {
    /// Raises the stop signal and waits for the reflector to stop.
    pub async fn stop(self) {
        self.token.cancel();
        if let Err(err) = self.join_handle.await {
            if let Ok(panic) = err.try_into_panic() {
                panic::resume_unwind(panic)
            }
        }
    }
}
