use crate::{
    error::ClientError,
    resources::KuberhealthyCheck,
};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::Pod;
use kube::{
    api::{
        DeleteParams,
        Patch,
        PatchParams,
        PostParams,
    },
    runtime::wait::{
        await_condition,
        conditions,
    },
    Api,
};
use std::time::Duration;

const POD_DELETE_TIMEOUT: Duration = Duration::from_secs(60);

/// The cluster operations a checker run needs.
///
/// Implemented by [`KubeClusterClient`] for real clusters and by [`crate::memory::InMemoryCluster`] in tests.
#[async_trait]
pub trait ClusterClient: Send + Sync {
    /// Create `pod` in `namespace`.
    async fn create_pod(&self, namespace: &str, pod: Pod) -> Result<Pod, ClientError>;

    /// Delete a pod and wait until it is gone. Succeeds when the pod does not exist.
    async fn delete_pod(&self, namespace: &str, name: &str) -> Result<(), ClientError>;

    /// Read the whitelisted run UUID of a check. `None` when the check does not exist.
    async fn get_check_uuid(&self, namespace: &str, check: &str) -> Result<Option<String>, ClientError>;

    /// Replace the whitelisted run UUID of an existing check.
    async fn set_check_uuid(&self, namespace: &str, check: &str, uuid: &str) -> Result<(), ClientError>;
}

/// [`ClusterClient`] talking to the Kubernetes API server.
#[derive(Clone)]
pub struct KubeClusterClient {
    client: kube::Client,
}

impl KubeClusterClient {
    pub fn new(client: kube::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ClusterClient for KubeClusterClient {
    async fn create_pod(&self, namespace: &str, pod: Pod) -> Result<Pod, ClientError> {
        let api = Api::<Pod>::namespaced(self.client.clone(), namespace);
        Ok(api.create(&PostParams::default(), &pod).await?)
    }

    async fn delete_pod(&self, namespace: &str, name: &str) -> Result<(), ClientError> {
        let api = Api::<Pod>::namespaced(self.client.clone(), namespace);

        let deleting = match api.delete(name, &DeleteParams::default()).await {
            Ok(it) => it.left(),
            Err(kube::Error::Api(err)) if err.code == 404 => {
                trace!(%namespace, pod = %name, "pod already gone");
                return Ok(());
            }
            Err(err) => return Err(err.into()),
        };

        // The api server may only have started a graceful deletion.
        if let Some(pod) = deleting {
            let uid = pod.metadata.uid.unwrap_or_default();
            debug!(%namespace, pod = %name, %uid, "waiting for pod deletion");
            tokio::time::timeout(POD_DELETE_TIMEOUT, await_condition(api, name, conditions::is_deleted(&uid)))
                .await
                .map_err(|_| ClientError::Timeout {
                    what: format!("deletion of pod {namespace}/{name}"),
                    after: POD_DELETE_TIMEOUT,
                })??;
        }

        Ok(())
    }

    async fn get_check_uuid(&self, namespace: &str, check: &str) -> Result<Option<String>, ClientError> {
        let api = Api::<KuberhealthyCheck>::namespaced(self.client.clone(), namespace);
        let check = api.get_opt(check).await?;
        Ok(check.map(|check| check.spec.current_uuid))
    }

    async fn set_check_uuid(&self, namespace: &str, check: &str, uuid: &str) -> Result<(), ClientError> {
        let api = Api::<KuberhealthyCheck>::namespaced(self.client.clone(), namespace);
        let patch = serde_json::json!({ "spec": { "currentUUID": uuid } });

        match api.patch(check, &PatchParams::default(), &Patch::Merge(&patch)).await {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(err)) if err.code == 404 => Err(ClientError::NotFound {
                kind: "KuberhealthyCheck",
                namespace: namespace.to_string(),
                name: check.to_string(),
            }),
            Err(err) => Err(err.into()),
        }
    }
}
