use crate::{
    client::ClusterClient,
    error::{
        CheckError,
        ClientError,
    },
    pod_spec::{
        self,
        PodParams,
        DEFAULT_REPORTING_URL,
    },
    resources::KuberhealthyCheck,
    whitelist,
};
use k8s_openapi::api::core::v1::PodSpec;
use std::{
    collections::BTreeMap,
    fmt,
    sync::Arc,
    time::Duration,
};
use tracing::instrument;
use uuid::Uuid;

/// A step of a single run.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RunStage {
    Validating,
    TokenRotating,
    PodSubmitting,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum RunState {
    #[default]
    Idle,
    InProgress(RunStage),
    /// The pod of the latest run was created. Its result arrives out of band.
    Submitted,
    /// The latest run stopped during the given stage. `Failed(PodSubmitting)` means a fresh UUID is whitelisted but no
    /// pod carries it.
    Failed(RunStage),
}

/// Launches the pod of one external check and owns the run UUID it may report with.
pub struct Checker {
    pub namespace: String,
    pub check_name: String,
    pub pod_name: String,
    pub pod_spec: PodSpec,
    pub client: Option<Arc<dyn ClusterClient>>,
    pub debug: bool,
    pub reporting_url: String,
    pub run_interval: Duration,
    pub run_timeout: Duration,
    pub extra_labels: Option<BTreeMap<String, String>>,
    pub extra_annotations: Option<BTreeMap<String, String>>,
    uuid: String,
    state: RunState,
}

impl fmt::Debug for Checker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Checker")
            .field("namespace", &self.namespace)
            .field("check_name", &self.check_name)
            .field("pod_name", &self.pod_name)
            .field("has_client", &self.client.is_some())
            .field("uuid", &self.uuid)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl Checker {
    /// Create a checker for `check`. Never fails: problems with the check surface from [`Checker::sanity_check`].
    pub fn new(client: Arc<dyn ClusterClient>, check: &KuberhealthyCheck) -> Self {
        let check_name = check.metadata.name.clone().unwrap_or_default();
        Self {
            namespace: check.metadata.namespace.clone().unwrap_or_default(),
            pod_name: check_name.clone(),
            check_name,
            pod_spec: check.spec.pod_spec.clone(),
            client: Some(client),
            debug: false,
            reporting_url: DEFAULT_REPORTING_URL.to_string(),
            run_interval: check.spec.run_interval(),
            run_timeout: check.spec.timeout(),
            extra_labels: check.spec.extra_labels.clone(),
            extra_annotations: check.spec.extra_annotations.clone(),
            uuid: check.spec.current_uuid.clone(),
            state: RunState::Idle,
        }
    }

    pub fn name(&self) -> &str {
        &self.check_name
    }

    pub fn current_uuid(&self) -> &str {
        &self.uuid
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn interval(&self) -> Duration {
        self.run_interval
    }

    pub fn timeout(&self) -> Duration {
        self.run_timeout
    }

    /// Check the configuration needed before touching the cluster.
    pub fn sanity_check(&self) -> Result<(), CheckError> {
        self.validated_client().map(|_| ())
    }

    fn validated_client(&self) -> Result<Arc<dyn ClusterClient>, CheckError> {
        let client = self.whitelist_client()?;
        if self.pod_name.is_empty() {
            return Err(CheckError::validation(&self.check_name, "pod name is empty"));
        }
        if self.pod_spec.containers.is_empty() {
            return Err(CheckError::validation(&self.check_name, "pod spec has no containers"));
        }
        Ok(client)
    }

    /// The whitelist is keyed by namespace and check name only; the pod template does not matter for it.
    fn whitelist_client(&self) -> Result<Arc<dyn ClusterClient>, CheckError> {
        let check = self.check_name.as_str();
        if self.namespace.is_empty() {
            return Err(CheckError::validation(check, "namespace is empty"));
        }
        if check.is_empty() {
            return Err(CheckError::validation(check, "check name is empty"));
        }
        self.client
            .clone()
            .ok_or_else(|| CheckError::validation(check, "no cluster client configured"))
    }

    /// Whitelist `uuid` for this check. An empty UUID revokes authorization for any run.
    ///
    /// The in-memory UUID only changes after the store accepted the write.
    pub async fn set_uuid(&mut self, uuid: &str) -> Result<(), CheckError> {
        let client = self.whitelist_client()?;
        whitelist::set_whitelisted_uuid(client.as_ref(), &self.namespace, &self.check_name, uuid).await?;
        self.uuid = uuid.to_string();
        trace!(namespace = %self.namespace, check = %self.check_name, %uuid, "whitelisted run uuid");
        Ok(())
    }

    /// Launch a fresh run of this check.
    ///
    /// Rotates the run UUID, then replaces any pod left over from an earlier run with a new one carrying that UUID.
    /// Returns once the pod was created; the pod reports its result separately.
    #[instrument(level = "debug", skip_all, fields(namespace = %self.namespace, check = %self.check_name))]
    pub async fn run_once(&mut self) -> Result<(), CheckError> {
        let result = self.run_steps().await;
        match &result {
            Ok(()) => {
                self.state = RunState::Submitted;
                info!(pod = %self.pod_name, uuid = %self.uuid, "checker pod submitted");
            }
            Err(err) => {
                self.abandon();
                error!(pod = %self.pod_name, state = ?self.state, "check run failed: {err}");
            }
        }
        result
    }

    /// Mark an interrupted run as failed at the stage it reached.
    pub fn abandon(&mut self) {
        if let RunState::InProgress(stage) = self.state {
            self.state = RunState::Failed(stage);
        }
    }

    async fn run_steps(&mut self) -> Result<(), CheckError> {
        self.state = RunState::InProgress(RunStage::Validating);
        let client = self.validated_client()?;

        // The whitelist must know the UUID before any pod can report with it.
        self.state = RunState::InProgress(RunStage::TokenRotating);
        let uuid = Uuid::new_v4().to_string();
        self.set_uuid(&uuid).await?;

        self.state = RunState::InProgress(RunStage::PodSubmitting);
        let cluster_err = |source: ClientError| CheckError::Cluster {
            namespace: self.namespace.clone(),
            pod: self.pod_name.clone(),
            source,
        };

        debug!(pod = %self.pod_name, "removing pod of previous run");
        client
            .delete_pod(&self.namespace, &self.pod_name)
            .await
            .map_err(cluster_err)?;

        let pod = pod_spec::build_pod(
            &self.pod_spec,
            &PodParams {
                namespace: &self.namespace,
                check_name: &self.check_name,
                pod_name: &self.pod_name,
                uuid: &uuid,
                reporting_url: &self.reporting_url,
                timeout: self.run_timeout,
                extra_labels: self.extra_labels.as_ref(),
                extra_annotations: self.extra_annotations.as_ref(),
            },
        );
        if self.debug {
            info!(?pod, "creating checker pod");
        }

        client.create_pod(&self.namespace, pod).await.map_err(cluster_err)?;

        Ok(())
    }
}
