use std::future::Future;

use futures::{stream::BoxStream, StreamExt, TryStreamExt};
use kube_client::{Api, Client};
use kube_core::{
    params::{ListParams, WatchParams},
    DynamicObject, ObjectList, WatchEvent,
};
use log::{debug, warn};

use super::{Event, ListPage, Transport};
use crate::{
    config::Settings,
    error::{DecodeError, Error},
    object::ResourceVersion,
    registry::Descriptor,
};

/// [`Transport`] backed by the Kubernetes API server.
///
/// Objects are fetched untyped and checked against the typed shape registered
/// for the kind, so a malformed object only costs its own event.
pub struct KubeTransport {
    api: Api<DynamicObject>,
    descriptor: Descriptor,
    page_size: u32,
    watch_timeout: u32,
}

impl KubeTransport {
    pub fn new(client: Client, settings: &Settings) -> Self {
        let descriptor = settings.resource.descriptor();
        let ar = descriptor.api_resource();
        let api = match settings.namespace() {
            Some(namespace) => Api::namespaced_with(client, namespace, &ar),
            None => Api::all_with(client, &ar),
        };
        Self {
            api,
            descriptor,
            page_size: settings.page_size,
            watch_timeout: settings.watch_timeout,
        }
    }
}

impl Transport for KubeTransport {
    type Object = DynamicObject;
    type Watch = BoxStream<'static, Result<Event<DynamicObject>, Error>>;

    async fn list(&self) -> Result<ListPage<DynamicObject>, Error> {
        list_pages(&self.descriptor, self.page_size, |params| async move {
            self.api.list(&params).await.map_err(Error::from)
        })
        .await
    }

    async fn watch(&self, since: ResourceVersion) -> Result<Self::Watch, Error> {
        // bookmarks are requested by default
        let params = WatchParams::default().timeout(self.watch_timeout);
        let stream = self.api.watch(&params, &since.to_string()).await?;

        let descriptor = self.descriptor;
        Ok(stream
            .map_err(Error::from)
            .and_then(move |event| futures::future::ready(convert(&descriptor, event)))
            .boxed())
    }
}

/// Follows `continue` tokens until the last page, keeping the objects that
/// have the registered shape. The collection version is taken from the last page.
async fn list_pages<F, Fut>(
    descriptor: &Descriptor,
    page_size: u32,
    mut fetch: F,
) -> Result<ListPage<DynamicObject>, Error>
where
    F: FnMut(ListParams) -> Fut,
    Fut: Future<Output = Result<ObjectList<DynamicObject>, Error>>,
{
    let mut items = Vec::new();
    let mut continue_token: Option<String> = None;

    let version = loop {
        let mut params = ListParams::default().limit(page_size);
        if let Some(token) = &continue_token {
            params = params.continue_token(token);
        }

        let page = fetch(params).await?;
        debug!(
            "listed {} {} (continue: {})",
            page.items.len(),
            descriptor.name,
            page.metadata.continue_.is_some()
        );
        for item in page.items {
            match descriptor.decode(&item) {
                Ok(()) => items.push(item),
                Err(err) => warn!("skipping listed {}: {err}", descriptor.name),
            }
        }

        match page.metadata.continue_ {
            Some(token) if !token.is_empty() => continue_token = Some(token),
            _ => break page.metadata.resource_version,
        }
    };

    let version = version
        .as_deref()
        .ok_or(DecodeError::MissingResourceVersion)?
        .parse::<ResourceVersion>()?;
    Ok(ListPage { items, version })
}

fn convert(
    descriptor: &Descriptor,
    event: WatchEvent<DynamicObject>,
) -> Result<Event<DynamicObject>, Error> {
    let checked = |object: DynamicObject| {
        descriptor.decode(&object)?;
        Ok::<_, Error>(object)
    };
    match event {
        WatchEvent::Added(object) => Ok(Event::Added(checked(object)?)),
        WatchEvent::Modified(object) => Ok(Event::Modified(checked(object)?)),
        WatchEvent::Deleted(object) => Ok(Event::Deleted(checked(object)?)),
        WatchEvent::Bookmark(bookmark) => Ok(Event::Bookmark(
            bookmark.metadata.resource_version.parse::<ResourceVersion>()?,
        )),
        WatchEvent::Error(status) => Err(Error::from_status(status)),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;

    use futures::future;
    use kube_core::{ErrorResponse, ObjectMeta};
    use serde_json::json;

    use super::*;
    use crate::registry::ResourceKind;

    fn pod(data: serde_json::Value) -> DynamicObject {
        DynamicObject {
            types: None,
            metadata: ObjectMeta {
                namespace: Some("ns".into()),
                name: Some("x".into()),
                resource_version: Some("5".into()),
                ..Default::default()
            },
            data,
        }
    }

    #[test]
    fn test_convert_checks_payload_shape() {
        let pods = ResourceKind::Pods.descriptor();

        let event = convert(&pods, WatchEvent::Modified(pod(json!({}))));
        assert!(matches!(event, Ok(Event::Modified(_))));

        let event = convert(
            &pods,
            WatchEvent::Added(pod(json!({ "spec": { "containers": "nope" } }))),
        );
        assert!(matches!(event, Err(Error::Decode(DecodeError::Shape { .. }))));
    }

    #[test]
    fn test_convert_maps_expired_status() {
        let pods = ResourceKind::Pods.descriptor();
        let event = convert(
            &pods,
            WatchEvent::Error(ErrorResponse {
                status: "Failure".into(),
                message: "too old resource version: 5 (10)".into(),
                reason: "Expired".into(),
                code: 410,
            }),
        );
        assert!(matches!(event, Err(Error::StaleVersion(_))));
    }

    fn page(continue_: &str, version: &str, items: serde_json::Value) -> ObjectList<DynamicObject> {
        serde_json::from_value(json!({
            "apiVersion": "v1",
            "kind": "PodList",
            "metadata": { "continue": continue_, "resourceVersion": version },
            "items": items,
        }))
        .unwrap()
    }

    fn listed_pod(name: &str) -> serde_json::Value {
        json!({
            "metadata": { "namespace": "ns", "name": name, "resourceVersion": "3" },
            "spec": { "containers": [] },
        })
    }

    fn expired() -> Error {
        Error::from(kube_client::Error::Api(ErrorResponse {
            status: "Failure".into(),
            message: "The provided continue parameter is too old".into(),
            reason: "Expired".into(),
            code: 410,
        }))
    }

    #[tokio::test]
    async fn test_list_follows_continue_tokens() {
        let pods = ResourceKind::Pods.descriptor();
        let mut pages = VecDeque::from([
            page("p2", "7", json!([listed_pod("a")])),
            page(
                "",
                "9",
                json!([
                    listed_pod("b"),
                    { "metadata": { "name": "c" }, "spec": { "containers": 7 } },
                ]),
            ),
        ]);
        let mut requests = Vec::new();

        let listed = list_pages(&pods, 2, |params| {
            requests.push((params.limit, params.continue_token));
            future::ready(Ok::<_, Error>(pages.pop_front().unwrap()))
        })
        .await
        .unwrap();

        assert_eq!(requests, [(Some(2), None), (Some(2), Some("p2".to_owned()))]);
        let names: Vec<_> = listed
            .items
            .iter()
            .map(|pod| pod.metadata.name.as_deref())
            .collect();
        assert_eq!(names, [Some("a"), Some("b")]);
        // the last page carries the collection version
        assert_eq!(listed.version, ResourceVersion::new(9));
    }

    #[tokio::test]
    async fn test_expired_continue_token_is_stale() {
        let pods = ResourceKind::Pods.descriptor();
        let mut pages = VecDeque::from([
            Ok(page("p2", "7", json!([listed_pod("a")]))),
            Err(expired()),
        ]);

        let listed = list_pages(&pods, 1, |_| future::ready(pages.pop_front().unwrap())).await;
        assert!(matches!(listed, Err(Error::StaleVersion(_))));
        assert!(pages.is_empty());
    }

    #[test]
    fn test_convert_bookmark_carries_version() {
        let pods = ResourceKind::Pods.descriptor();
        let bookmark: WatchEvent<DynamicObject> = serde_json::from_value(json!({
            "type": "BOOKMARK",
            "object": {
                "apiVersion": "v1",
                "kind": "Pod",
                "metadata": { "resourceVersion": "42" },
            },
        }))
        .unwrap();

        let event = convert(&pods, bookmark);
        assert!(matches!(event, Ok(Event::Bookmark(v)) if v == ResourceVersion::new(42)));
    }
}
