//! Kubernetes-backed catalogs and executor
//!
//! Workloads are listed with the typed `apps/v1` bindings from `k8s-openapi`.
//! VPAs are a CRD without typed bindings, so they go through `DynamicObject`
//! with an `ApiResource` for `autoscaling.k8s.io/v1`.

use crate::catalog::{VpaCatalog, WorkloadCatalog};
use crate::error::{ApplyError, ConnectError, FetchError};
use crate::executor::ActionExecutor;
use crate::models::{
    ManagedVpaSpec, VpaRecord, WorkloadKind, WorkloadRef, MANAGED_BY_LABEL, VPA_KIND,
};
use async_trait::async_trait;
use k8s_openapi::api::apps::v1::{DaemonSet, Deployment, StatefulSet};
use kube::{
    api::{Api, ApiResource, DeleteParams, DynamicObject, GroupVersionKind, ListParams, PostParams},
    config::{KubeConfigOptions, Kubeconfig, KubeconfigError},
    Client, Config, ResourceExt,
};
use std::path::Path;
use tracing::{debug, info};

const VPA_GROUP: &str = "autoscaling.k8s.io";
const VPA_VERSION: &str = "v1";

/// Build a client: explicit kubeconfig first, then in-cluster, then local kubeconfig
pub async fn connect(kubeconfig: Option<&Path>) -> Result<Client, ConnectError> {
    let config = match kubeconfig {
        Some(path) => {
            info!(path = %path.display(), "Using kubeconfig file");
            let kubeconfig = read_kubeconfig(path)?;
            Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default()).await?
        }
        None => match Config::incluster() {
            Ok(config) => {
                info!("Using in-cluster configuration");
                config
            }
            Err(e) => {
                debug!(error = %e, "Not running in a cluster, inferring configuration");
                Config::infer().await?
            }
        },
    };

    Ok(Client::try_from(config)?)
}

/// Read a kubeconfig path, which may list several files joined by the
/// platform path separator. Later files are merged into earlier ones, so the
/// first file to set a value wins.
pub fn read_kubeconfig(paths: &Path) -> Result<Kubeconfig, KubeconfigError> {
    let mut merged: Option<Kubeconfig> = None;

    for path in std::env::split_paths(paths.as_os_str()) {
        if path.as_os_str().is_empty() {
            continue;
        }
        let next = Kubeconfig::read_from(&path)?;
        merged = Some(match merged {
            Some(current) => current.merge(next)?,
            None => next,
        });
    }

    // Nothing but separators: let the reader report the unusable path
    match merged {
        Some(kubeconfig) => Ok(kubeconfig),
        None => Kubeconfig::read_from(paths),
    }
}

/// `ApiResource` descriptor for the VerticalPodAutoscaler CRD
pub fn vpa_api_resource() -> ApiResource {
    ApiResource::from_gvk(&GroupVersionKind {
        group: VPA_GROUP.to_string(),
        version: VPA_VERSION.to_string(),
        kind: VPA_KIND.to_string(),
    })
}

/// Extract the fields the reconciler needs from a listed VPA
pub fn vpa_record_from(obj: &DynamicObject) -> VpaRecord {
    let target = &obj.data["spec"]["targetRef"];
    let field = |key: &str| target[key].as_str().unwrap_or_default().to_string();

    VpaRecord {
        name: obj.name_any(),
        namespace: obj.namespace().unwrap_or_default(),
        target_kind: field("kind"),
        target_name: field("name"),
        managed_by: obj.labels().get(MANAGED_BY_LABEL).cloned(),
    }
}

/// Identify a listed workload controller
pub fn workload_ref_from<K: ResourceExt>(kind: WorkloadKind, obj: &K) -> WorkloadRef {
    WorkloadRef::new(kind, obj.name_any(), obj.namespace().unwrap_or_default())
}

/// Lists Deployments, StatefulSets and DaemonSets in all namespaces
#[derive(Clone)]
pub struct KubeWorkloadCatalog {
    client: Client,
}

impl KubeWorkloadCatalog {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl WorkloadCatalog for KubeWorkloadCatalog {
    async fn list(&self, kind: WorkloadKind) -> Result<Vec<WorkloadRef>, FetchError> {
        let lp = ListParams::default();
        let fetch_err = |e: kube::Error| FetchError::new(kind.plural(), e);

        let items = match kind {
            WorkloadKind::Deployment => Api::<Deployment>::all(self.client.clone())
                .list(&lp)
                .await
                .map_err(fetch_err)?
                .iter()
                .map(|d| workload_ref_from(kind, d))
                .collect(),
            WorkloadKind::StatefulSet => Api::<StatefulSet>::all(self.client.clone())
                .list(&lp)
                .await
                .map_err(fetch_err)?
                .iter()
                .map(|s| workload_ref_from(kind, s))
                .collect(),
            WorkloadKind::DaemonSet => Api::<DaemonSet>::all(self.client.clone())
                .list(&lp)
                .await
                .map_err(fetch_err)?
                .iter()
                .map(|d| workload_ref_from(kind, d))
                .collect(),
        };

        Ok(items)
    }
}

/// Lists VerticalPodAutoscalers in all namespaces
#[derive(Clone)]
pub struct KubeVpaCatalog {
    client: Client,
    resource: ApiResource,
}

impl KubeVpaCatalog {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            resource: vpa_api_resource(),
        }
    }
}

#[async_trait]
impl VpaCatalog for KubeVpaCatalog {
    async fn list(&self) -> Result<Vec<VpaRecord>, FetchError> {
        let api: Api<DynamicObject> = Api::all_with(self.client.clone(), &self.resource);
        let list = api
            .list(&ListParams::default())
            .await
            .map_err(|e| FetchError::new("verticalpodautoscalers", e))?;

        Ok(list.iter().map(vpa_record_from).collect())
    }
}

/// Creates and deletes VPAs through the API server
#[derive(Clone)]
pub struct KubeActionExecutor {
    client: Client,
    resource: ApiResource,
}

impl KubeActionExecutor {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            resource: vpa_api_resource(),
        }
    }

    fn api(&self, namespace: &str) -> Api<DynamicObject> {
        Api::namespaced_with(self.client.clone(), namespace, &self.resource)
    }
}

#[async_trait]
impl ActionExecutor for KubeActionExecutor {
    async fn create(&self, spec: &ManagedVpaSpec) -> Result<(String, String), ApplyError> {
        let create_err = |source: crate::error::BoxError| ApplyError::Create {
            name: spec.name.clone(),
            namespace: spec.namespace.clone(),
            kind: spec.target_ref.kind.clone(),
            source,
        };

        let obj: DynamicObject =
            serde_json::from_value(spec.manifest()).map_err(|e| create_err(e.into()))?;

        let created = self
            .api(&spec.namespace)
            .create(&PostParams::default(), &obj)
            .await
            .map_err(|e| create_err(e.into()))?;

        let name = created.name_any();
        let namespace = created
            .namespace()
            .unwrap_or_else(|| spec.namespace.clone());
        Ok((name, namespace))
    }

    async fn delete(&self, name: &str, namespace: &str) -> Result<(), ApplyError> {
        self.api(namespace)
            .delete(name, &DeleteParams::default())
            .await
            .map_err(|e| ApplyError::Delete {
                name: name.to_string(),
                namespace: namespace.to_string(),
                source: e.into(),
            })?;
        Ok(())
    }
}
