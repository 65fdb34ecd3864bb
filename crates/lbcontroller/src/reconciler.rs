//! Reconciler for LoadBalancer Services
//!
//! Maps a Kubernetes Service of type `LoadBalancer` to one L4 service on the
//! load balancer API, named by its [`ServiceKey`]. Each Service may expose
//! either TCP or UDP ports, never both. The protocol a removed Service used is
//! not known any more, so deletion removes the resources of both protocols.

use std::net::IpAddr;
use std::sync::Arc;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Service as KubeService;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::client::{ClientError, LoadBalancerApi};
use crate::config::ControllerConfig;
use crate::controller::Reconcile;
use crate::key::{Protocol, ServiceKey, SourceKey};
use crate::resource::{
    Backend, Frontend, Ingress, Service, ServiceConfig, TcpConfig, TcpHealthCheck,
};
use crate::retry::{Classify, ErrorKind};

const LOAD_BALANCER: &str = "LoadBalancer";

/// Read access to the local cache of Kubernetes Services
#[cfg_attr(test, mockall::automock)]
pub trait ServiceStore: Send + Sync {
    fn get(&self, key: &SourceKey) -> Option<Arc<KubeService>>;
}

/// Writes the assigned ingress back to a Kubernetes Service
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait StatusWriter: Send + Sync {
    async fn write_ingress(
        &self,
        service: &KubeService,
        ingress: &[Ingress],
    ) -> Result<(), kube::Error>;
}

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("load balancer API error: {0}")]
    Client(#[from] ClientError),
    #[error("service {0} mixes TCP and UDP ports, split it into one service per protocol")]
    MixedProtocols(SourceKey),
    #[error("service {key} uses unsupported protocol {protocol}")]
    UnsupportedProtocol { key: SourceKey, protocol: String },
    #[error("service {key} has invalid loadBalancerIP {value:?}")]
    InvalidAddress { key: SourceKey, value: String },
    #[error("failed to update status of service {key}: {source}")]
    StatusUpdate {
        key: SourceKey,
        #[source]
        source: kube::Error,
    },
}

impl Classify for ReconcileError {
    fn kind(&self) -> ErrorKind {
        match self {
            ReconcileError::Client(e) => e.kind(),
            // Needs a change of the Service itself
            ReconcileError::MixedProtocols(_) => ErrorKind::Permanent,
            ReconcileError::UnsupportedProtocol { .. } => ErrorKind::Permanent,
            ReconcileError::InvalidAddress { .. } => ErrorKind::Permanent,
            // Conflicts and API server hiccups
            ReconcileError::StatusUpdate { .. } => ErrorKind::Transient,
        }
    }
}

/// Operator settings that shape every desired service
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcilerSettings {
    pub cluster_name: String,
    pub backends: Vec<Backend>,
    pub method: String,
    pub upstream_max_conns: u32,
}

impl ReconcilerSettings {
    pub fn new(cluster_name: impl Into<String>, config: &ControllerConfig) -> Self {
        Self {
            cluster_name: cluster_name.into(),
            backends: config.backends.clone(),
            method: config.method.clone(),
            upstream_max_conns: config.upstream_max_conns,
        }
    }
}

fn is_load_balancer(service: &KubeService) -> bool {
    service
        .spec
        .as_ref()
        .and_then(|s| s.type_.as_deref())
        .is_some_and(|t| t == LOAD_BALANCER)
}

/// The single protocol of all ports; TCP when there are no ports
fn select_protocol(key: &SourceKey, service: &KubeService) -> Result<Protocol, ReconcileError> {
    let ports = service
        .spec
        .as_ref()
        .and_then(|s| s.ports.as_deref())
        .unwrap_or_default();

    let mut selected: Option<Protocol> = None;
    for port in ports {
        let protocol = match port.protocol.as_deref().unwrap_or("TCP") {
            "TCP" => Protocol::Tcp,
            "UDP" => Protocol::Udp,
            other => {
                return Err(ReconcileError::UnsupportedProtocol {
                    key: key.clone(),
                    protocol: other.to_string(),
                })
            }
        };
        match selected {
            Some(p) if p != protocol => return Err(ReconcileError::MixedProtocols(key.clone())),
            _ => selected = Some(protocol),
        }
    }
    Ok(selected.unwrap_or(Protocol::Tcp))
}

fn load_balancer_ip(
    key: &SourceKey,
    service: &KubeService,
) -> Result<Option<IpAddr>, ReconcileError> {
    let Some(value) = service
        .spec
        .as_ref()
        .and_then(|s| s.load_balancer_ip.as_deref())
        .filter(|ip| !ip.is_empty())
    else {
        return Ok(None);
    };
    value
        .parse()
        .map(Some)
        .map_err(|_| ReconcileError::InvalidAddress {
            key: key.clone(),
            value: value.to_string(),
        })
}

/// Ingress currently recorded in the Service status
fn status_ingress(service: &KubeService) -> Vec<Ingress> {
    service
        .status
        .as_ref()
        .and_then(|s| s.load_balancer.as_ref())
        .and_then(|lb| lb.ingress.as_ref())
        .map(|ingress| {
            ingress
                .iter()
                .map(|i| Ingress {
                    ip: i.ip.clone(),
                    hostname: i.hostname.clone(),
                })
                .collect()
        })
        .unwrap_or_default()
}

pub struct ServiceReconciler<C, S, W> {
    api: C,
    store: S,
    status: W,
    settings: ReconcilerSettings,
}

impl<C, S, W> ServiceReconciler<C, S, W>
where
    C: LoadBalancerApi,
    S: ServiceStore,
    W: StatusWriter,
{
    pub fn new(api: C, store: S, status: W, settings: ReconcilerSettings) -> Self {
        Self {
            api,
            store,
            status,
            settings,
        }
    }

    /// L4 config for `protocol` derived from the Service spec
    ///
    /// Ports map the published port to the node port. The health check uses
    /// the explicit health check node port, falling back to the node port of
    /// the first declared port.
    pub fn desired_config(
        &self,
        service: &KubeService,
        protocol: Protocol,
        frontend: Option<String>,
    ) -> ServiceConfig {
        let spec = service.spec.as_ref();
        let ports = spec.and_then(|s| s.ports.as_deref()).unwrap_or_default();

        let port_map = ports
            .iter()
            .filter(|p| {
                let declared = p.protocol.as_deref().unwrap_or("TCP");
                declared.eq_ignore_ascii_case(protocol.as_str())
            })
            .filter_map(|p| p.node_port.map(|node_port| (p.port.to_string(), node_port)))
            .collect();

        let health_port = spec
            .and_then(|s| s.health_check_node_port)
            .filter(|p| *p > 0)
            .or_else(|| ports.first().and_then(|p| p.node_port));

        let config = TcpConfig {
            method: self.settings.method.clone(),
            ports: port_map,
            backends: self.settings.backends.clone(),
            upstream_max_conns: self.settings.upstream_max_conns,
            acl: spec
                .and_then(|s| s.load_balancer_source_ranges.clone())
                .unwrap_or_default(),
            health_check: TcpHealthCheck {
                port: health_port,
                ..Default::default()
            },
            frontend,
        };

        match protocol {
            Protocol::Tcp => ServiceConfig::Tcp(config),
            Protocol::Udp => ServiceConfig::Udp(config),
        }
    }

    /// Make sure a frontend with exactly `address` exists under `name`
    async fn ensure_frontend(&self, name: &str, address: IpAddr) -> Result<(), ClientError> {
        let desired = Frontend::new(name, vec![address]);
        match self.api.get_frontend(name).await? {
            None => {
                self.api.create_frontend(&desired).await?;
                info!(frontend = name, %address, "Created frontend");
            }
            Some(current) if current.config == desired.config => {
                debug!(frontend = name, "Frontend unchanged");
            }
            Some(_) => {
                self.api.replace_frontend(&desired).await?;
                info!(frontend = name, %address, "Replaced frontend");
            }
        }
        Ok(())
    }

    /// Converge the remote service and return its ingress
    ///
    /// A Service that switched between TCP and UDP leaves the resources of
    /// the previous protocol behind until the Service is deleted.
    async fn sync_service(&self, desired: &Service) -> Result<Vec<Ingress>, ClientError> {
        let name = desired.name();
        let ingress = match self.api.get_service(name).await? {
            None => {
                let ingress = self.api.create_service(desired).await?;
                info!(service = name, "Created service");
                ingress
            }
            Some(current)
                if current.service_type() == desired.service_type()
                    && current.config == desired.config =>
            {
                debug!(service = name, "Service unchanged");
                return Ok(current.ingress);
            }
            Some(current) => {
                let ingress = self.api.replace_service(desired).await?;
                info!(
                    service = name,
                    from = %current.service_type(),
                    to = %desired.service_type(),
                    "Replaced drifted service"
                );
                self.remove_unreferenced_frontend(&current, desired).await;
                ingress
            }
        };

        if !ingress.is_empty() {
            return Ok(ingress);
        }
        debug!(service = name, "Write returned no ingress, reading it back");
        Ok(self
            .api
            .get_service(name)
            .await?
            .map(|service| service.ingress)
            .unwrap_or_default())
    }

    /// Delete the frontend `current` pointed at if `desired` dropped it
    ///
    /// Only the frontend named after the service itself is owned here.
    async fn remove_unreferenced_frontend(&self, current: &Service, desired: &Service) {
        let name = desired.name();
        let frontend_of = |service: &Service| {
            service
                .config
                .as_l4()
                .and_then(|config| config.frontend.clone())
        };
        if frontend_of(current).as_deref() != Some(name) || frontend_of(desired).is_some() {
            return;
        }
        match self.api.delete_frontend(name).await {
            Ok(()) => info!(frontend = name, "Deleted unreferenced frontend"),
            // Deleting the Service removes it again
            Err(e) => warn!(
                frontend = name,
                error = %e,
                "Failed to delete unreferenced frontend"
            ),
        }
    }

    /// Delete services and frontends of every protocol, attempting all of
    /// them and returning the first failure
    async fn delete(&self, key: &SourceKey) -> Result<(), ReconcileError> {
        let mut first_error: Option<ClientError> = None;

        for service_key in ServiceKey::all(&self.settings.cluster_name, key) {
            let name = service_key.to_string();
            if let Err(e) = self.api.delete_service(&name).await {
                warn!(service = %name, error = %e, "Failed to delete service");
                first_error = first_error.or(Some(e));
            }
            if let Err(e) = self.api.delete_frontend(&name).await {
                warn!(frontend = %name, error = %e, "Failed to delete frontend");
                first_error = first_error.or(Some(e));
            }
        }

        match first_error {
            Some(e) => Err(e.into()),
            None => {
                info!("Deleted load balancer resources");
                Ok(())
            }
        }
    }

    #[instrument(skip_all, fields(key = %key))]
    pub async fn reconcile_service(&self, key: &SourceKey) -> Result<(), ReconcileError> {
        let Some(service) = self.store.get(key) else {
            debug!("Service gone, deleting remote resources");
            return self.delete(key).await;
        };

        if !is_load_balancer(&service) {
            debug!("Not a LoadBalancer service, skipping");
            return Ok(());
        }

        let protocol = select_protocol(key, &service)?;
        let name = ServiceKey::new(&self.settings.cluster_name, key, protocol).to_string();

        let frontend = match load_balancer_ip(key, &service)? {
            Some(address) => {
                self.ensure_frontend(&name, address).await?;
                Some(name.clone())
            }
            None => None,
        };

        let desired = Service::new(&name, self.desired_config(&service, protocol, frontend));
        let ingress = self.sync_service(&desired).await?;

        let recorded = status_ingress(&service);
        if ingress.is_empty() && !recorded.is_empty() {
            warn!(recorded = ?recorded, "Load balancer reported no ingress, keeping status");
            return Ok(());
        }
        if recorded != ingress {
            self.status
                .write_ingress(&service, &ingress)
                .await
                .map_err(|source| ReconcileError::StatusUpdate {
                    key: key.clone(),
                    source,
                })?;
            info!(ingress = ?ingress, "Updated service status");
        }

        Ok(())
    }
}

#[async_trait]
impl<C, S, W> Reconcile for ServiceReconciler<C, S, W>
where
    C: LoadBalancerApi,
    S: ServiceStore,
    W: StatusWriter,
{
    type Key = SourceKey;
    type Error = ReconcileError;

    async fn reconcile(&self, key: &SourceKey) -> Result<(), ReconcileError> {
        self.reconcile_service(key).await
    }
}
