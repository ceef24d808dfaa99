//! Startup configuration.

use std::{
    ffi::OsString,
    path::{Path, PathBuf},
    time::Duration,
};

use kube_client::{
    config::{InClusterError, KubeConfigOptions, Kubeconfig, KubeconfigError},
    Client,
};
use log::{info, warn};
use thiserror::Error;

use crate::{reflector::Backoff, registry::ResourceKind};

/// The longest server-side watch timeout the API server accepts.
pub const MAX_WATCH_TIMEOUT: u32 = 290;

/// Parameters for a watch, fixed for the lifetime of the process.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Kubeconfig file to read credentials from. `None` uses the in-cluster service account.
    pub kubeconfig: Option<PathBuf>,
    /// Kubeconfig context, if not the current one.
    pub context: Option<String>,
    pub resource: ResourceKind,
    /// `None` watches all namespaces.
    pub namespace: Option<String>,
    /// Maximum number of objects fetched per list request.
    pub page_size: u32,
    /// Server-side watch timeout in seconds.
    pub watch_timeout: u32,
    pub backoff: BackoffSettings,
}

/// Bounds of the reconnect delay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffSettings {
    pub initial: Duration,
    pub max: Duration,
}

impl Default for BackoffSettings {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(800),
            max: Duration::from_secs(30),
        }
    }
}

impl From<BackoffSettings> for Backoff {
    fn from(settings: BackoffSettings) -> Self {
        Backoff::new(settings.initial, settings.max)
    }
}

impl Settings {
    pub fn new(resource: ResourceKind) -> Self {
        Self {
            kubeconfig: None,
            context: None,
            resource,
            namespace: None,
            page_size: 500,
            watch_timeout: MAX_WATCH_TIMEOUT,
            backoff: BackoffSettings::default(),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(1..=MAX_WATCH_TIMEOUT).contains(&self.watch_timeout) {
            return Err(ConfigError::WatchTimeout(self.watch_timeout));
        }
        if self.page_size == 0 {
            return Err(ConfigError::PageSize);
        }
        let BackoffSettings { initial, max } = self.backoff;
        if initial.is_zero() || initial > max {
            return Err(ConfigError::Backoff { initial, max });
        }
        if self.namespace.is_some() && !self.resource.descriptor().namespaced {
            warn!(
                "{} are cluster-scoped, ignoring the namespace filter",
                self.resource
            );
        }
        Ok(())
    }

    /// The namespace to query, taking the scope of the resource kind into account.
    pub fn namespace(&self) -> Option<&str> {
        self.namespace
            .as_deref()
            .filter(|_| self.resource.descriptor().namespaced)
    }
}

/// Picks the kubeconfig file to use.
///
/// An explicit empty path selects the in-cluster configuration. Without an
/// explicit path, `$HOME/.kube/config` is used if it exists.
pub fn resolve_kubeconfig(flag: Option<PathBuf>, home: Option<OsString>) -> Option<PathBuf> {
    match flag {
        Some(path) if path.as_os_str().is_empty() => None,
        Some(path) => Some(path),
        None => home
            .map(|home| Path::new(&home).join(".kube").join("config"))
            .filter(|path| path.is_file()),
    }
}

/// Builds an API client from the configured credentials.
pub async fn client(settings: &Settings) -> Result<Client, ConfigError> {
    let config = match &settings.kubeconfig {
        Some(path) => {
            info!("loading kubeconfig from {}", path.display());
            let kubeconfig_err = |source| ConfigError::Kubeconfig {
                path: path.clone(),
                source,
            };
            let kubeconfig = Kubeconfig::read_from(path).map_err(kubeconfig_err)?;
            let options = KubeConfigOptions {
                context: settings.context.clone(),
                ..Default::default()
            };
            kube_client::Config::from_custom_kubeconfig(kubeconfig, &options)
                .await
                .map_err(kubeconfig_err)?
        }
        None => {
            info!("no kubeconfig given, assuming in-cluster configuration");
            kube_client::Config::incluster().map_err(ConfigError::InCluster)?
        }
    };
    Client::try_from(config).map_err(ConfigError::Client)
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("unable to load kubeconfig {}: {source}", path.display())]
    Kubeconfig {
        path: PathBuf,
        #[source]
        source: KubeconfigError,
    },

    #[error("unable to load in-cluster configuration: {0}")]
    InCluster(#[source] InClusterError),

    #[error("unable to create Kubernetes client: {0}")]
    Client(#[source] kube_client::Error),

    #[error("watch timeout must be between 1 and {MAX_WATCH_TIMEOUT} seconds, got {0}")]
    WatchTimeout(u32),

    #[error("page size must be positive")]
    PageSize,

    #[error("initial backoff {initial:?} must be positive and not exceed the maximum {max:?}")]
    Backoff { initial: Duration, max: Duration },
}
