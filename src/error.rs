use std::time::Duration;

/// Failures reported by a [`crate::client::ClusterClient`].
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("{kind} {namespace}/{name} not found")]
    NotFound {
        kind: &'static str,
        namespace: String,
        name: String,
    },

    #[error("timed out after {after:?}: {what}")]
    Timeout { what: String, after: Duration },

    #[error("cluster api unavailable: {0}")]
    Unavailable(String),

    #[error(transparent)]
    Kube(#[from] kube::Error),

    #[error(transparent)]
    Wait(#[from] kube::runtime::wait::Error),
}

/// Errors surfaced by checker runs and the whitelist boundary.
#[derive(Debug, thiserror::Error)]
pub enum CheckError {
    #[error("invalid configuration for check {check:?}: {reason}")]
    Validation { check: String, reason: String },

    #[error("unable to persist whitelist uuid for check {namespace}/{check}: {source}")]
    Persistence {
        namespace: String,
        check: String,
        #[source]
        source: ClientError,
    },

    #[error("cluster operation on pod {namespace}/{pod} failed: {source}")]
    Cluster {
        namespace: String,
        pod: String,
        #[source]
        source: ClientError,
    },

    #[error("malformed check spec: {0}")]
    MalformedSpec(String),

    #[error("check {namespace}/{check} not found")]
    NotFound { namespace: String, check: String },

    #[error("run of check {namespace}/{check} did not finish within {deadline:?}")]
    DeadlineExceeded {
        namespace: String,
        check: String,
        deadline: Duration,
    },
}

impl CheckError {
    /// True when an operator has to fix the check definition before a retry can succeed.
    pub fn is_config_error(&self) -> bool {
        matches!(self, CheckError::Validation { .. } | CheckError::MalformedSpec(_))
    }

    pub(crate) fn validation(check: impl ToString, reason: impl ToString) -> Self {
        CheckError::Validation {
            check: check.to_string(),
            reason: reason.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_config_errors() {
        assert!(CheckError::validation("test-check", "namespace is empty").is_config_error());
        assert!(CheckError::MalformedSpec("no containers".to_string()).is_config_error());

        let transient = CheckError::Cluster {
            namespace: "kuberhealthy".to_string(),
            pod: "test-check".to_string(),
            source: ClientError::Unavailable("connection refused".to_string()),
        };
        assert!(!transient.is_config_error());
        assert_eq!(
            transient.to_string(),
            "cluster operation on pod kuberhealthy/test-check failed: cluster api unavailable: connection refused"
        );
    }
}
