//! Whitelist of run UUIDs, one per check.
//!
//! Pods launched for a check carry the run UUID that was whitelisted right before they were created. A report is
//! only authoritative when the UUID it carries matches the one stored here, so stale, duplicated or forged reports
//! are dropped without ever consulting the checker that launched the pod.

use crate::{
    client::ClusterClient,
    error::CheckError,
};

/// Fetch the run UUID currently whitelisted for a check.
///
/// Returns an empty string when the check exists but no run is authorized, and [`CheckError::NotFound`] when the
/// check does not exist at all.
pub async fn get_whitelisted_uuid_for_external_check(
    client: &dyn ClusterClient,
    namespace: &str,
    name: &str,
) -> Result<String, CheckError> {
    let uuid = client
        .get_check_uuid(namespace, name)
        .await
        .map_err(|source| CheckError::Persistence {
            namespace: namespace.to_string(),
            check: name.to_string(),
            source,
        })?;

    uuid.ok_or_else(|| CheckError::NotFound {
        namespace: namespace.to_string(),
        check: name.to_string(),
    })
}

/// Store `uuid` as the only run UUID allowed to report for a check. An empty UUID revokes authorization.
pub async fn set_whitelisted_uuid(
    client: &dyn ClusterClient,
    namespace: &str,
    name: &str,
    uuid: &str,
) -> Result<(), CheckError> {
    client
        .set_check_uuid(namespace, name, uuid)
        .await
        .map_err(|source| CheckError::Persistence {
            namespace: namespace.to_string(),
            check: name.to_string(),
            source,
        })
}

/// Decide whether a report carrying `reported_uuid` may update the state of a check.
pub async fn is_report_authorized(
    client: &dyn ClusterClient,
    namespace: &str,
    name: &str,
    reported_uuid: &str,
) -> Result<bool, CheckError> {
    if reported_uuid.is_empty() {
        return Ok(false);
    }
    let whitelisted = get_whitelisted_uuid_for_external_check(client, namespace, name).await?;
    let authorized = whitelisted == reported_uuid;
    if !authorized {
        // The reported uuid comes from an untrusted pod and is not logged.
        warn!(
            %namespace,
            check = %name,
            reported_len = reported_uuid.len(),
            "rejecting report with a run uuid that is not whitelisted"
        );
    }
    Ok(authorized)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryCluster;

    #[tokio::test]
    async fn distinguishes_missing_check_from_empty_uuid() {
        let cluster = InMemoryCluster::new().with_check("kuberhealthy", "test-check");

        let uuid = get_whitelisted_uuid_for_external_check(&cluster, "kuberhealthy", "test-check")
            .await
            .unwrap();
        assert_eq!(uuid, "");

        let err = get_whitelisted_uuid_for_external_check(&cluster, "kuberhealthy", "unknown")
            .await
            .unwrap_err();
        assert!(matches!(err, CheckError::NotFound { .. }), "{err}");
    }

    #[tokio::test]
    async fn round_trips_any_uuid() {
        let cluster = InMemoryCluster::new().with_check("kuberhealthy", "test-check");

        for uuid in ["test-UUID-1234", "", "f4b4a1c2-3d5e-4f60-8a7b-9c0d1e2f3a4b"] {
            set_whitelisted_uuid(&cluster, "kuberhealthy", "test-check", uuid)
                .await
                .unwrap();
            let fetched = get_whitelisted_uuid_for_external_check(&cluster, "kuberhealthy", "test-check")
                .await
                .unwrap();
            assert_eq!(fetched, uuid);
        }
    }

    #[tokio::test]
    async fn only_exact_match_is_authorized() {
        let cluster = InMemoryCluster::new().with_check("kuberhealthy", "test-check");

        // nothing whitelisted yet, an empty report uuid must not match
        assert!(!is_report_authorized(&cluster, "kuberhealthy", "test-check", "").await.unwrap());

        set_whitelisted_uuid(&cluster, "kuberhealthy", "test-check", "current")
            .await
            .unwrap();
        assert!(is_report_authorized(&cluster, "kuberhealthy", "test-check", "current").await.unwrap());
        assert!(!is_report_authorized(&cluster, "kuberhealthy", "test-check", "previous").await.unwrap());
        assert!(!is_report_authorized(&cluster, "kuberhealthy", "test-check", "CURRENT").await.unwrap());
        assert!(!is_report_authorized(&cluster, "kuberhealthy", "test-check", "current\nlevel=ERROR forged line")
            .await
            .unwrap());

        let err = is_report_authorized(&cluster, "kuberhealthy", "unknown", "current")
            .await
            .unwrap_err();
        assert!(matches!(err, CheckError::NotFound { .. }));
    }
}
