//! kubewatch watches one resource kind in one namespace of a Kubernetes cluster
//! and reports every add, update and delete.
//!
//! A [`Reflector`] lists the collection to seed a local [`Store`],
//! then follows a watch stream from the version the list returned,
//! resuming the stream when it drops and relisting when its version expires.
//! Every change applied to the store is passed to a [`Handler`].

pub mod config;
pub use config::Settings;
pub mod error;
pub use error::{DecodeError, Error};
pub mod handler;
pub use handler::{Handler, Printer};
pub mod object;
pub use object::{QualifiedName, ResourceVersion, Watched};
pub mod reflector;
pub use reflector::{Phase, Reflector};
pub mod registry;
pub use registry::ResourceKind;
pub mod store;
pub use store::Store;
pub mod transport;
pub use transport::{KubeTransport, Transport};
