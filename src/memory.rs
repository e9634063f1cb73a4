use crate::{
    client::ClusterClient,
    error::ClientError,
    pod_spec::CHECK_NAME_LABEL,
};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::Pod;
use std::{
    collections::BTreeMap,
    sync::{
        Mutex,
        MutexGuard,
        PoisonError,
    },
};

type Key = (String, String);

fn key(namespace: &str, name: &str) -> Key {
    (namespace.to_string(), name.to_string())
}

/// What the whitelist held for a pod's check at the moment the pod was created.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PodCreation {
    pub namespace: String,
    pub pod: String,
    pub whitelisted_uuid: Option<String>,
}

#[derive(Default)]
struct State {
    pods: BTreeMap<Key, Pod>,
    checks: BTreeMap<Key, String>,
    creations: Vec<PodCreation>,
    fail_pod_create: Option<String>,
    fail_pod_delete: Option<String>,
    fail_uuid_write: Option<String>,
}

/// A [`ClusterClient`] that keeps pods and check whitelists in memory.
///
/// Failures can be injected per operation; pod creations are recorded together with the whitelist value that was
/// visible when they happened.
#[derive(Default)]
pub struct InMemoryCluster {
    state: Mutex<State>,
}

impl InMemoryCluster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a check with an empty whitelist.
    pub fn with_check(self, namespace: &str, check: &str) -> Self {
        self.state().checks.insert(key(namespace, check), String::new());
        self
    }

    pub fn fail_pod_create(&self, reason: Option<&str>) {
        self.state().fail_pod_create = reason.map(str::to_string);
    }

    pub fn fail_pod_delete(&self, reason: Option<&str>) {
        self.state().fail_pod_delete = reason.map(str::to_string);
    }

    pub fn fail_uuid_write(&self, reason: Option<&str>) {
        self.state().fail_uuid_write = reason.map(str::to_string);
    }

    pub fn pod(&self, namespace: &str, name: &str) -> Option<Pod> {
        self.state().pods.get(&key(namespace, name)).cloned()
    }

    pub fn pods(&self) -> Vec<Pod> {
        self.state().pods.values().cloned().collect()
    }

    pub fn creations(&self) -> Vec<PodCreation> {
        self.state().creations.clone()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl ClusterClient for InMemoryCluster {
    async fn create_pod(&self, namespace: &str, pod: Pod) -> Result<Pod, ClientError> {
        let mut state = self.state();
        if let Some(reason) = &state.fail_pod_create {
            return Err(ClientError::Unavailable(reason.clone()));
        }

        let name = pod.metadata.name.clone().unwrap_or_default();
        let key = key(namespace, &name);
        if state.pods.contains_key(&key) {
            return Err(ClientError::Unavailable(format!(
                "pods {name:?} already exists in namespace {namespace:?}"
            )));
        }

        let whitelisted_uuid = pod
            .metadata
            .labels
            .as_ref()
            .and_then(|labels| labels.get(CHECK_NAME_LABEL))
            .and_then(|check| state.checks.get(&(namespace.to_string(), check.clone())))
            .cloned();
        state.creations.push(PodCreation {
            namespace: namespace.to_string(),
            pod: name,
            whitelisted_uuid,
        });

        let mut pod = pod;
        pod.metadata.namespace = Some(namespace.to_string());
        state.pods.insert(key, pod.clone());
        Ok(pod)
    }

    async fn delete_pod(&self, namespace: &str, name: &str) -> Result<(), ClientError> {
        let mut state = self.state();
        if let Some(reason) = &state.fail_pod_delete {
            return Err(ClientError::Unavailable(reason.clone()));
        }
        state.pods.remove(&key(namespace, name));
        Ok(())
    }

    async fn get_check_uuid(&self, namespace: &str, check: &str) -> Result<Option<String>, ClientError> {
        Ok(self.state().checks.get(&key(namespace, check)).cloned())
    }

    async fn set_check_uuid(&self, namespace: &str, check: &str, uuid: &str) -> Result<(), ClientError> {
        let mut state = self.state();
        if let Some(reason) = &state.fail_uuid_write {
            return Err(ClientError::Unavailable(reason.clone()));
        }
        let Some(current) = state.checks.get_mut(&key(namespace, check)) else {
            return Err(ClientError::NotFound {
                kind: "KuberhealthyCheck",
                namespace: namespace.to_string(),
                name: check.to_string(),
            });
        };
        *current = uuid.to_string();
        Ok(())
    }
}
