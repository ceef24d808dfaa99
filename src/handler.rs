//! Callbacks fired by the reflector, one at a time and in event order.

use std::io::{self, Write};

use log::error;

use crate::{object::Watched, registry::ResourceKind};

/// Receives the changes applied to the cache.
///
/// Objects passed in are snapshots; they stay valid after the cache moves on.
pub trait Handler<K>: Send {
    fn on_add(&mut self, object: &K);

    fn on_update(&mut self, old: &K, new: &K);

    fn on_delete(&mut self, object: &K);
}

/// Prints added and deleted objects as one JSON document per line, and a
/// one-line summary for updates.
pub struct Printer<W> {
    resource: ResourceKind,
    out: W,
}

impl Printer<io::Stdout> {
    pub fn stdout(resource: ResourceKind) -> Self {
        Self::new(resource, io::stdout())
    }
}

impl<W: Write> Printer<W> {
    pub fn new(resource: ResourceKind, out: W) -> Self {
        Self { resource, out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn print_json<K: Watched>(&mut self, object: &K) {
        let result = serde_json::to_writer(&mut self.out, object)
            .map_err(io::Error::from)
            .and_then(|()| writeln!(self.out))
            .and_then(|()| self.out.flush());
        if let Err(err) = result {
            error!("unable to print {}: {err}", self.resource);
        }
    }
}

fn describe<K: Watched>(object: &K) -> String {
    object
        .identity()
        .map_or_else(|_| String::from("<unnamed>"), |name| name.to_string())
}

impl<K: Watched, W: Write + Send> Handler<K> for Printer<W> {
    fn on_add(&mut self, object: &K) {
        self.print_json(object);
    }

    fn on_update(&mut self, old: &K, new: &K) {
        let result = writeln!(
            self.out,
            "{} updated: old: {} new: {}",
            self.resource,
            describe(old),
            describe(new)
        )
        .and_then(|()| self.out.flush());
        if let Err(err) = result {
            error!("unable to print {} update: {err}", self.resource);
        }
    }

    fn on_delete(&mut self, object: &K) {
        self.print_json(object);
    }
}

type ObjectFn<K> = Box<dyn FnMut(&K) + Send>;
type UpdateFn<K> = Box<dyn FnMut(&K, &K) + Send>;

/// A [`Handler`] assembled from closures. Unset callbacks do nothing.
pub struct Funcs<K> {
    add: ObjectFn<K>,
    update: UpdateFn<K>,
    delete: ObjectFn<K>,
}

pub fn funcs<K: 'static>() -> Funcs<K> {
    Funcs {
        add: Box::new(|_| {}),
        update: Box::new(|_, _| {}),
        delete: Box::new(|_| {}),
    }
}

impl<K: 'static> Funcs<K> {
    pub fn added(mut self, f: impl FnMut(&K) + Send + 'static) -> Self {
        self.add = Box::new(f);
        self
    }

    pub fn updated(mut self, f: impl FnMut(&K, &K) + Send + 'static) -> Self {
        self.update = Box::new(f);
        self
    }

    pub fn deleted(mut self, f: impl FnMut(&K) + Send + 'static) -> Self {
        self.delete = Box::new(f);
        self
    }
}

impl<K> Handler<K> for Funcs<K> {
    fn on_add(&mut self, object: &K) {
        (self.add)(object);
    }

    fn on_update(&mut self, old: &K, new: &K) {
        (self.update)(old, new);
    }

    fn on_delete(&mut self, object: &K) {
        (self.delete)(object);
    }
}
