use crate::{
    error::CheckError,
    resources::KuberhealthyCheck,
};
use chrono::prelude::*;
use k8s_openapi::api::core::v1::{
    EnvVar,
    Pod,
    PodSpec,
};
use kube::api::ObjectMeta;
use std::{
    collections::BTreeMap,
    path::Path,
    time::Duration,
};

pub const DEFAULT_REPORTING_URL: &str = "http://kuberhealthy.kuberhealthy.svc.cluster.local/externalCheckStatus";

pub const REPORTING_URL_ENV: &str = "KH_REPORTING_URL";
pub const RUN_UUID_ENV: &str = "KH_RUN_UUID";
pub const RUN_DEADLINE_ENV: &str = "KH_CHECK_RUN_DEADLINE";
pub const POD_NAMESPACE_ENV: &str = "KH_POD_NAMESPACE";
pub const CHECK_NAME_ENV: &str = "KH_CHECK_NAME";

pub const CHECK_NAME_LABEL: &str = "kuberhealthy-check-name";
pub const RUN_ID_LABEL: &str = "kuberhealthy-run-id";

/// Parse a `KuberhealthyCheck` manifest (YAML or JSON) and validate its pod template.
pub fn parse_check(raw: &[u8]) -> Result<KuberhealthyCheck, CheckError> {
    let check: KuberhealthyCheck =
        serde_yaml::from_slice(raw).map_err(|err| CheckError::MalformedSpec(format!("invalid check manifest: {err}")))?;
    validate_pod_spec(&check.spec.pod_spec)?;
    Ok(check)
}

/// Parse a bare pod spec (YAML or JSON) and validate it.
pub fn parse_pod_spec(raw: &[u8]) -> Result<PodSpec, CheckError> {
    let spec: PodSpec =
        serde_yaml::from_slice(raw).map_err(|err| CheckError::MalformedSpec(format!("invalid pod spec: {err}")))?;
    validate_pod_spec(&spec)?;
    Ok(spec)
}

pub fn load_check_file(path: impl AsRef<Path>) -> Result<KuberhealthyCheck, CheckError> {
    let path = path.as_ref();
    debug!(?path, "loading check manifest");
    let raw = std::fs::read(path)
        .map_err(|err| CheckError::MalformedSpec(format!("unable to read {}: {err}", path.display())))?;
    parse_check(&raw)
}

fn validate_pod_spec(spec: &PodSpec) -> Result<(), CheckError> {
    if spec.containers.is_empty() {
        return Err(CheckError::MalformedSpec("pod spec has no containers".to_string()));
    }
    for (i, container) in spec.containers.iter().enumerate() {
        if container.name.is_empty() {
            return Err(CheckError::MalformedSpec(format!("container #{i} has no name")));
        }
        if container.image.as_deref().unwrap_or_default().is_empty() {
            return Err(CheckError::MalformedSpec(format!(
                "container {:?} has no image",
                container.name
            )));
        }
    }
    Ok(())
}

/// Run-time values merged into a pod template.
pub struct PodParams<'a> {
    pub namespace: &'a str,
    pub check_name: &'a str,
    pub pod_name: &'a str,
    pub uuid: &'a str,
    pub reporting_url: &'a str,
    pub timeout: Duration,
    pub extra_labels: Option<&'a BTreeMap<String, String>>,
    pub extra_annotations: Option<&'a BTreeMap<String, String>>,
}

/// Build the pod for one run. The template is cloned and left untouched.
pub fn build_pod(template: &PodSpec, params: &PodParams<'_>) -> Pod {
    // Timeouts past chrono's range clamp to the latest representable deadline.
    let deadline = chrono::Duration::from_std(params.timeout)
        .ok()
        .and_then(|timeout| Utc::now().checked_add_signed(timeout))
        .unwrap_or(DateTime::<Utc>::MAX_UTC);

    let injected = [
        (REPORTING_URL_ENV, params.reporting_url.to_string()),
        (RUN_UUID_ENV, params.uuid.to_string()),
        (RUN_DEADLINE_ENV, deadline.timestamp().to_string()),
        (POD_NAMESPACE_ENV, params.namespace.to_string()),
        (CHECK_NAME_ENV, params.check_name.to_string()),
    ];

    let mut spec = template.clone();
    spec.restart_policy = Some("Never".to_string());
    for container in spec.containers.iter_mut() {
        let env = container.env.get_or_insert_with(Vec::new);
        env.retain(|var| !injected.iter().any(|(name, _)| var.name == *name));
        env.extend(injected.iter().map(|(name, value)| EnvVar {
            name: name.to_string(),
            value: Some(value.clone()),
            value_from: None,
        }));
    }

    let mut labels = params.extra_labels.cloned().unwrap_or_default();
    labels.insert(CHECK_NAME_LABEL.to_string(), params.check_name.to_string());
    labels.insert(RUN_ID_LABEL.to_string(), params.uuid.to_string());

    Pod {
        metadata: ObjectMeta {
            name: Some(params.pod_name.to_string()),
            namespace: Some(params.namespace.to_string()),
            labels: Some(labels),
            annotations: params.extra_annotations.cloned(),
            ..Default::default()
        },
        spec: Some(spec),
        ..Default::default()
    }
}
