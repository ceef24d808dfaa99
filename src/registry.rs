//! The closed set of resource kinds that can be watched.

use std::{collections::HashSet, fmt, str::FromStr};

use k8s_openapi::api::{
    apps::v1::Deployment,
    autoscaling::v2::HorizontalPodAutoscaler,
    batch::v1::Job,
    core::v1::{
        ConfigMap, Endpoints, Event, LimitRange, Namespace, PersistentVolume,
        PersistentVolumeClaim, Pod, PodTemplate, ReplicationController, ResourceQuota, Secret,
        Service, ServiceAccount,
    },
    networking::v1::Ingress,
};
use kube_core::{ApiResource, DynamicObject, Resource};
use serde::de::DeserializeOwned;
use thiserror::Error;

use crate::error::DecodeError;

macro_rules! kinds {
    ($($variant:ident => $name:literal, $ty:ty, $namespaced:literal;)*) => {
        /// A resource kind, selected by its command line name.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum ResourceKind {
            $($variant,)*
        }

        impl ResourceKind {
            pub const ALL: &'static [Self] = &[$(Self::$variant,)*];

            pub const NAMES: &'static [&'static str] = &[$($name,)*];

            /// Looks up the registration of this kind.
            pub fn descriptor(self) -> Descriptor {
                match self {
                    $(Self::$variant => Descriptor::of::<$ty>(self, $name, $namespaced),)*
                }
            }
        }
    };
}

kinds! {
    ConfigMaps => "configMaps", ConfigMap, true;
    Endpoints => "endpoints", Endpoints, true;
    Events => "events", Event, true;
    LimitRanges => "limitranges", LimitRange, true;
    Namespaces => "namespaces", Namespace, false;
    PersistentVolumeClaims => "persistentvolumeclaims", PersistentVolumeClaim, true;
    PersistentVolumes => "persistentvolumes", PersistentVolume, false;
    Pods => "pods", Pod, true;
    PodTemplates => "podtemplates", PodTemplate, true;
    ReplicationControllers => "replicationcontrollers", ReplicationController, true;
    ResourceQuotas => "resourcequotas", ResourceQuota, true;
    Secrets => "secrets", Secret, true;
    ServiceAccounts => "serviceaccounts", ServiceAccount, true;
    Services => "services", Service, true;
    Deployments => "deployments", Deployment, true;
    HorizontalPodAutoscalers => "horizontalpodautoscalers", HorizontalPodAutoscaler, true;
    Ingresses => "ingresses", Ingress, true;
    Jobs => "jobs", Job, true;
}

impl ResourceKind {
    pub fn name(self) -> &'static str {
        self.descriptor().name
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ResourceKind {
    type Err = UnknownKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|kind| kind.name() == s)
            .ok_or_else(|| UnknownKind(s.to_owned()))
    }
}

/// Registration of a kind: where it is served and which typed shape its payloads must decode into.
#[derive(Clone, Copy)]
pub struct Descriptor {
    pub kind: ResourceKind,
    pub name: &'static str,
    pub namespaced: bool,
    type_name: &'static str,
    api_resource: fn() -> ApiResource,
    plural: fn() -> String,
    decode: fn(&DynamicObject) -> Result<(), DecodeError>,
}

impl Descriptor {
    fn of<K>(kind: ResourceKind, name: &'static str, namespaced: bool) -> Self
    where
        K: Resource<DynamicType = ()> + DeserializeOwned,
    {
        Self {
            kind,
            name,
            namespaced,
            type_name: std::any::type_name::<K>(),
            api_resource: || ApiResource::erase::<K>(&()),
            plural: || K::plural(&()).into_owned(),
            decode: decode_as::<K>,
        }
    }

    /// The group, version and plural to query for this kind.
    pub fn api_resource(&self) -> ApiResource {
        (self.api_resource)()
    }

    /// Checks that `object` has the typed shape registered for this kind.
    pub fn decode(&self, object: &DynamicObject) -> Result<(), DecodeError> {
        (self.decode)(object)
    }
}

impl fmt::Debug for Descriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Descriptor")
            .field("kind", &self.kind)
            .field("name", &self.name)
            .field("namespaced", &self.namespaced)
            .field("type", &self.type_name)
            .finish()
    }
}

fn decode_as<K: Resource + DeserializeOwned>(object: &DynamicObject) -> Result<(), DecodeError> {
    let shape_error = |source| DecodeError::Shape {
        kind: std::any::type_name::<K>(),
        source,
    };
    let value = serde_json::to_value(object).map_err(shape_error)?;
    serde_json::from_value::<K>(value).map_err(shape_error)?;
    Ok(())
}

/// Validates the registry. Run once at startup.
pub fn validate() -> Result<(), RegistryError> {
    let mut seen = HashSet::new();
    for &kind in ResourceKind::ALL {
        let descriptor = kind.descriptor();
        if !seen.insert(descriptor.name) {
            return Err(RegistryError::Duplicate(descriptor.name));
        }
        if descriptor.name.parse::<ResourceKind>().ok() != Some(kind) {
            return Err(RegistryError::Unparseable(descriptor.name));
        }
        let plural = (descriptor.plural)();
        if !plural.eq_ignore_ascii_case(descriptor.name) {
            return Err(RegistryError::PluralMismatch {
                name: descriptor.name,
                plural,
            });
        }
    }
    Ok(())
}

#[derive(Debug, Error)]
#[error("unknown resource kind {0:?}")]
pub struct UnknownKind(pub String);

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("resource kind {0:?} is registered twice")]
    Duplicate(&'static str),
    #[error("resource kind {0:?} does not parse back to itself")]
    Unparseable(&'static str),
    #[error("resource kind {name:?} is served as {plural:?}")]
    PluralMismatch { name: &'static str, plural: String },
}
