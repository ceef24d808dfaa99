//! Identity and versioning of watched objects.

use std::{fmt, str::FromStr};

use kube_core::Resource;
use serde::Serialize;

use crate::error::DecodeError;

/// Uniquely identifies an object of a known type by namespace and name.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct QualifiedName {
    /// The object namespace, if any
    pub namespace: Option<String>,
    /// The object name
    pub name: String,
}

impl QualifiedName {
    pub fn new(namespace: Option<&str>, name: &str) -> Self {
        Self {
            namespace: namespace.map(str::to_owned),
            name: name.to_owned(),
        }
    }

    pub fn from_resource<K: Resource>(resource: &K) -> Result<Self, DecodeError> {
        let meta = resource.meta();
        let name = meta.name.clone().ok_or(DecodeError::MissingName)?;
        Ok(Self {
            namespace: meta.namespace.clone(),
            name,
        })
    }
}

impl fmt::Display for QualifiedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(namespace) => write!(f, "{namespace}/{}", self.name),
            None => f.write_str(&self.name),
        }
    }
}

/// A consistency token attached by the API server to objects and collections.
///
/// The API server backs these with a monotonically increasing revision counter,
/// so tokens from the same collection are totally ordered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ResourceVersion(u64);

impl ResourceVersion {
    pub const fn new(revision: u64) -> Self {
        Self(revision)
    }
}

impl FromStr for ResourceVersion {
    type Err = DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse()
            .map(Self)
            .map_err(|_| DecodeError::InvalidResourceVersion(s.to_owned()))
    }
}

impl fmt::Display for ResourceVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// Capabilities the store and reflector need from a watched object.
///
/// Everything beyond identity and version is an opaque payload that is only
/// serialized on its way to the event handlers.
pub trait Watched: Clone + Serialize + Send + Sync + 'static {
    fn identity(&self) -> Result<QualifiedName, DecodeError>;

    fn version(&self) -> Result<ResourceVersion, DecodeError>;
}

impl<K> Watched for K
where
    K: Resource + Clone + Serialize + Send + Sync + 'static,
{
    fn identity(&self) -> Result<QualifiedName, DecodeError> {
        QualifiedName::from_resource(self)
    }

    fn version(&self) -> Result<ResourceVersion, DecodeError> {
        self.meta()
            .resource_version
            .as_deref()
            .ok_or(DecodeError::MissingResourceVersion)?
            .parse()
    }
}

#[cfg(test)]
mod tests {
    use k8s_openapi::api::core::v1::{ConfigMap, Namespace};
    use kube_core::ObjectMeta;

    use super::*;

    #[test]
    fn test_identity_and_version_of_namespaced_object() {
        let cm = ConfigMap {
            metadata: ObjectMeta {
                namespace: Some("ns".into()),
                name: Some("x".into()),
                resource_version: Some("42".into()),
                ..Default::default()
            },
            ..Default::default()
        };

        assert_eq!(cm.identity().unwrap(), QualifiedName::new(Some("ns"), "x"));
        assert_eq!(cm.identity().unwrap().to_string(), "ns/x");
        assert_eq!(cm.version().unwrap(), ResourceVersion::new(42));
    }

    #[test]
    fn test_cluster_scoped_identity_displays_bare_name() {
        let ns = Namespace {
            metadata: ObjectMeta {
                name: Some("kube-system".into()),
                ..Default::default()
            },
            ..Default::default()
        };

        assert_eq!(ns.identity().unwrap().to_string(), "kube-system");
        assert!(matches!(
            ns.version(),
            Err(DecodeError::MissingResourceVersion)
        ));
    }

    #[test]
    fn test_versions_order_numerically() {
        let nine: ResourceVersion = "9".parse().unwrap();
        let ten: ResourceVersion = "10".parse().unwrap();
        assert!(nine < ten);
        assert!(matches!(
            "abc".parse::<ResourceVersion>(),
            Err(DecodeError::InvalidResourceVersion(v)) if v == "abc"
        ));
    }

    #[test]
    fn test_missing_name_is_rejected() {
        let cm = ConfigMap::default();
        assert!(matches!(cm.identity(), Err(DecodeError::MissingName)));
    }
}
