use k8s_openapi::api::core::v1::PodSpec;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{
    Deserialize,
    Serialize,
};
use std::{
    collections::BTreeMap,
    time::Duration,
};

/// Namespace checks and their pods live in unless told otherwise.
pub const DEFAULT_NAMESPACE: &str = "kuberhealthy";

/// Name used for checks and pods that were not given one.
pub const DEFAULT_NAME: &str = "kuberhealthy";

pub const DEFAULT_RUN_INTERVAL: Duration = Duration::from_secs(10 * 60);
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5 * 60);

// Define the spec of our custom resource
#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
#[kube(
    group = "comcast.github.io",
    version = "v1",
    kind = "KuberhealthyCheck",
    shortname = "khc",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct CheckConfig {
    /// How often the check should be launched (e.g. 10m). Defaults to 10 minutes.
    pub run_interval: Option<String>,
    /// How long a launched pod has to report back (e.g. 5m). Defaults to 5 minutes.
    pub timeout: Option<String>,
    /// The pod template every run of this check launches.
    #[serde(default)]
    pub pod_spec: PodSpec,
    /// Annotations added to every checker pod
    pub extra_annotations: Option<BTreeMap<String, String>>,
    /// Labels added to every checker pod
    pub extra_labels: Option<BTreeMap<String, String>>,
    /// The run UUID currently allowed to report a result for this check. Empty when no run is authorized.
    #[serde(default, rename = "currentUUID")]
    pub current_uuid: String,
}

impl CheckConfig {
    pub fn run_interval(&self) -> Duration {
        parse_duration_or("runInterval", self.run_interval.as_deref(), DEFAULT_RUN_INTERVAL)
    }

    pub fn timeout(&self) -> Duration {
        parse_duration_or("timeout", self.timeout.as_deref(), DEFAULT_TIMEOUT)
    }
}

fn parse_duration_or(field: &str, value: Option<&str>, default: Duration) -> Duration {
    let Some(value) = value.filter(|value| !value.is_empty()) else {
        return default;
    };
    match humantime::parse_duration(value) {
        Ok(duration) => duration,
        Err(err) => {
            warn!(%field, %value, "unable to parse duration ({err}), using {}", humantime::format_duration(default));
            default
        }
    }
}
