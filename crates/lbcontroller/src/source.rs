//! Kubernetes side of the controller
//!
//! Watches Services into a reflector store, turns watch events into queue
//! keys and writes assigned ingress back to the Service status.

use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use k8s_openapi::api::core::v1::Service as KubeService;
use kube::api::{Patch, PatchParams};
use kube::runtime::reflector::{self, ObjectRef, Store};
use kube::runtime::{watcher, WatchStreamExt};
use kube::{Api, Client, ResourceExt};
use serde_json::json;
use tracing::{debug, info, warn};

use crate::key::SourceKey;
use crate::queue::WorkQueue;
use crate::reconciler::{ServiceStore, StatusWriter};
use crate::resource::Ingress;

/// Field manager recorded on status patches
pub const FIELD_MANAGER: &str = "lbcontroller";

/// Reflector store of all Services in the cluster
#[derive(Clone)]
pub struct CachedServices {
    store: Store<KubeService>,
}

impl CachedServices {
    pub fn new(store: Store<KubeService>) -> Self {
        Self { store }
    }

    /// Wait until the initial list has been loaded
    pub async fn wait_until_ready(&self) -> Result<(), reflector::store::WriterDropped> {
        self.store.wait_until_ready().await
    }
}

impl ServiceStore for CachedServices {
    fn get(&self, key: &SourceKey) -> Option<Arc<KubeService>> {
        self.store
            .get(&ObjectRef::new(&key.name).within(&key.namespace))
    }
}

/// Patches `status.loadBalancer.ingress` through the status subresource
#[derive(Clone)]
pub struct KubeStatusWriter {
    client: Client,
}

impl KubeStatusWriter {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl StatusWriter for KubeStatusWriter {
    async fn write_ingress(
        &self,
        service: &KubeService,
        ingress: &[Ingress],
    ) -> Result<(), kube::Error> {
        let namespace = service.namespace().unwrap_or_default();
        let api: Api<KubeService> = Api::namespaced(self.client.clone(), &namespace);
        let patch = json!({
            "status": {
                "loadBalancer": {
                    "ingress": ingress,
                }
            }
        });
        api.patch_status(
            &service.name_any(),
            &PatchParams::apply(FIELD_MANAGER),
            &Patch::Merge(&patch),
        )
        .await?;
        Ok(())
    }
}

/// Queue key of a Service
pub fn source_key(service: &KubeService) -> Option<SourceKey> {
    let namespace = service.namespace()?;
    let name = service.metadata.name.clone()?;
    Some(SourceKey::new(namespace, name))
}

/// Key affected by a watch event, if any
pub fn event_key(event: &watcher::Event<KubeService>) -> Option<SourceKey> {
    match event {
        watcher::Event::Apply(service)
        | watcher::Event::InitApply(service)
        | watcher::Event::Delete(service) => source_key(service),
        watcher::Event::Init | watcher::Event::InitDone => None,
    }
}

/// Watch all Services, keep `writer`'s store current and queue every changed
/// key. Runs until the watch stream ends.
pub async fn watch_services(
    client: Client,
    writer: reflector::store::Writer<KubeService>,
    queue: Arc<WorkQueue<SourceKey>>,
) {
    let api: Api<KubeService> = Api::all(client);
    let stream = reflector::reflector(writer, watcher(api, watcher::Config::default()))
        .default_backoff();
    let mut stream = std::pin::pin!(stream);

    info!("Watching Services");

    while let Some(event) = stream.next().await {
        match event {
            Ok(event) => {
                if let Some(key) = event_key(&event) {
                    debug!(%key, "Service changed");
                    queue.add(key).await;
                }
            }
            Err(e) => warn!(error = %e, "Service watch error"),
        }
    }

    warn!("Service watch stream ended");
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
    use kube::runtime::watcher::Event;

    fn service(namespace: Option<&str>, name: &str) -> KubeService {
        KubeService {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: namespace.map(str::to_string),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn test_event_key_for_changes() {
        let svc = service(Some("default"), "web");
        let expected = Some(SourceKey::new("default", "web"));

        assert_eq!(event_key(&Event::Apply(svc.clone())), expected);
        assert_eq!(event_key(&Event::InitApply(svc.clone())), expected);
        assert_eq!(event_key(&Event::Delete(svc)), expected);
    }

    #[test]
    fn test_event_key_ignores_markers() {
        assert_eq!(event_key(&Event::Init), None);
        assert_eq!(event_key(&Event::InitDone), None);
    }

    #[test]
    fn test_source_key_requires_namespace() {
        assert_eq!(source_key(&service(None, "web")), None);
    }

    #[test]
    fn test_cached_services_lookup() {
        let (reader, mut writer) = reflector::store::<KubeService>();
        writer.apply_watcher_event(&Event::Apply(service(Some("default"), "web")));

        let cache = CachedServices::new(reader);
        let found = cache.get(&SourceKey::new("default", "web"));
        assert_eq!(found.and_then(|s| s.metadata.name.clone()).as_deref(), Some("web"));
        assert!(cache.get(&SourceKey::new("other", "web")).is_none());
    }
}
