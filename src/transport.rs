//! Access to a remote collection: a bounded list and an unbounded watch.

use std::future::Future;

use futures::Stream;

use crate::{
    error::Error,
    object::{ResourceVersion, Watched},
};

pub mod kube;
pub use self::kube::KubeTransport;

/// A change observed on a watch stream.
#[derive(Debug, Clone)]
pub enum Event<K> {
    Added(K),
    Modified(K),
    Deleted(K),
    /// The collection reached `version` without a change to report.
    Bookmark(ResourceVersion),
}

/// The complete contents of a collection at `version`.
#[derive(Debug, Clone)]
pub struct ListPage<K> {
    pub items: Vec<K>,
    pub version: ResourceVersion,
}

/// A source of list and watch results for one kind in one namespace.
pub trait Transport: Send + Sync {
    type Object: Watched;

    /// The stream returned by [`watch`](Self::watch).
    ///
    /// It ends when the connection closes and never restarts itself.
    /// Dropping it releases the connection.
    type Watch: Stream<Item = Result<Event<Self::Object>, Error>> + Send + Unpin;

    fn list(&self) -> impl Future<Output = Result<ListPage<Self::Object>, Error>> + Send;

    fn watch(
        &self,
        since: ResourceVersion,
    ) -> impl Future<Output = Result<Self::Watch, Error>> + Send;
}
