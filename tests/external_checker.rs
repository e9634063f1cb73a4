use k8s_openapi::api::core::v1::PodSpec;
use khcheck_runner::{
    checker::{
        Checker,
        RunStage,
        RunState,
    },
    error::CheckError,
    memory::InMemoryCluster,
    pod_spec::{
        self,
        CHECK_NAME_ENV,
        POD_NAMESPACE_ENV,
        RUN_UUID_ENV,
    },
    resources::DEFAULT_NAME,
    whitelist::{
        get_whitelisted_uuid_for_external_check,
        is_report_authorized,
    },
};
use std::sync::Arc;

const TEST_CHECK_NAME: &str = "test-check";
const DEFAULT_NAMESPACE: &str = "kuberhealthy";

const BASIC_CHECKER_POD: &str = r#"
apiVersion: comcast.github.io/v1
kind: KuberhealthyCheck
metadata:
  name: basic-check
  namespace: kuberhealthy
spec:
  runInterval: 1m
  timeout: 30s
  podSpec:
    containers:
      - name: basic-check
        image: quay.io/comcast/kuberhealthy-basic-check:latest
        imagePullPolicy: IfNotPresent
"#;

fn new_test_check(cluster: Arc<InMemoryCluster>) -> Checker {
    let check = pod_spec::parse_check(BASIC_CHECKER_POD.as_bytes()).expect("basic checker pod spec");
    let mut checker = Checker::new(cluster, &check);
    checker.namespace = DEFAULT_NAMESPACE.to_string();
    checker.debug = true;
    // override the check name so tests know it via the constant
    checker.check_name = TEST_CHECK_NAME.to_string();
    checker
}

fn test_cluster() -> Arc<InMemoryCluster> {
    Arc::new(InMemoryCluster::new().with_check(DEFAULT_NAMESPACE, TEST_CHECK_NAME))
}

fn env(cluster: &InMemoryCluster, pod: &str, name: &str) -> Option<String> {
    let pod = cluster.pod(DEFAULT_NAMESPACE, pod)?;
    pod.spec?.containers[0]
        .env
        .iter()
        .flatten()
        .find(|var| var.name == name)
        .and_then(|var| var.value.clone())
}

#[tokio::test]
async fn external_checker_end_to_end() {
    let cluster = test_cluster();
    let mut checker = new_test_check(cluster.clone());

    checker.run_once().await.unwrap();

    let uuid = get_whitelisted_uuid_for_external_check(cluster.as_ref(), DEFAULT_NAMESPACE, TEST_CHECK_NAME)
        .await
        .unwrap();
    assert!(!uuid.is_empty());

    let pod_name = checker.pod_name.clone();
    assert_eq!(env(&cluster, &pod_name, RUN_UUID_ENV), Some(uuid.clone()));
    assert_eq!(env(&cluster, &pod_name, CHECK_NAME_ENV).as_deref(), Some(TEST_CHECK_NAME));
    assert_eq!(env(&cluster, &pod_name, POD_NAMESPACE_ENV).as_deref(), Some(DEFAULT_NAMESPACE));

    // the report of this run is accepted, nothing else is
    assert!(is_report_authorized(cluster.as_ref(), DEFAULT_NAMESPACE, TEST_CHECK_NAME, &uuid)
        .await
        .unwrap());
    assert!(!is_report_authorized(cluster.as_ref(), DEFAULT_NAMESPACE, TEST_CHECK_NAME, "forged")
        .await
        .unwrap());
}

#[tokio::test]
async fn external_checker_sanitation() {
    let cluster = test_cluster();
    let mut checker = new_test_check(cluster.clone());

    // sabotage the pod name
    checker.pod_name = String::new();
    let err = checker.run_once().await.unwrap_err();
    assert!(matches!(err, CheckError::Validation { .. }), "{err}");

    // break the namespace instead
    checker.pod_name = DEFAULT_NAME.to_string();
    checker.namespace = String::new();
    let err = checker.run_once().await.unwrap_err();
    assert!(matches!(err, CheckError::Validation { .. }), "{err}");

    // break the pod spec now instead of the namespace
    checker.namespace = DEFAULT_NAMESPACE.to_string();
    checker.pod_spec = PodSpec::default();
    let err = checker.run_once().await.unwrap_err();
    assert!(matches!(err, CheckError::Validation { .. }), "{err}");
    assert_eq!(checker.state(), RunState::Failed(RunStage::Validating));

    assert!(cluster.pods().is_empty());
    assert!(cluster.creations().is_empty());
    assert_eq!(
        get_whitelisted_uuid_for_external_check(cluster.as_ref(), DEFAULT_NAMESPACE, TEST_CHECK_NAME)
            .await
            .unwrap(),
        ""
    );
}

#[tokio::test]
async fn invalid_rerun_keeps_previous_uuid() {
    let cluster = test_cluster();
    let mut checker = new_test_check(cluster.clone());
    checker.pod_name = DEFAULT_NAME.to_string();

    checker.run_once().await.unwrap();
    let uuid = get_whitelisted_uuid_for_external_check(cluster.as_ref(), DEFAULT_NAMESPACE, TEST_CHECK_NAME)
        .await
        .unwrap();
    assert_eq!(uuid.len(), 36);

    checker.pod_name = String::new();
    let err = checker.run_once().await.unwrap_err();
    assert!(err.is_config_error());

    let after = get_whitelisted_uuid_for_external_check(cluster.as_ref(), DEFAULT_NAMESPACE, TEST_CHECK_NAME)
        .await
        .unwrap();
    assert_eq!(after, uuid);
    assert_eq!(cluster.pods().len(), 1);
}

#[tokio::test]
async fn get_whitelisted_uuid_for_external_check_round_trip() {
    let cluster = test_cluster();
    let mut checker = new_test_check(cluster.clone());

    // blank out the uuid
    checker.set_uuid("").await.unwrap();
    let uuid = get_whitelisted_uuid_for_external_check(cluster.as_ref(), &checker.namespace, checker.name())
        .await
        .unwrap();
    assert_eq!(uuid, "", "found a uuid set for a check when we expected to see none");

    checker.set_uuid("test-UUID-1234").await.unwrap();
    let uuid = get_whitelisted_uuid_for_external_check(cluster.as_ref(), &checker.namespace, checker.name())
        .await
        .unwrap();
    assert_eq!(uuid, "test-UUID-1234");
}

#[tokio::test]
async fn rerun_supersedes_previous_report() {
    let cluster = test_cluster();
    let mut checker = new_test_check(cluster.clone());

    checker.run_once().await.unwrap();
    let first = checker.current_uuid().to_string();
    checker.run_once().await.unwrap();
    let second = checker.current_uuid().to_string();

    assert_eq!(cluster.pods().len(), 1);
    assert_eq!(env(&cluster, &checker.pod_name, RUN_UUID_ENV), Some(second.clone()));
    assert!(!is_report_authorized(cluster.as_ref(), DEFAULT_NAMESPACE, TEST_CHECK_NAME, &first)
        .await
        .unwrap());
    assert!(is_report_authorized(cluster.as_ref(), DEFAULT_NAMESPACE, TEST_CHECK_NAME, &second)
        .await
        .unwrap());

    // every pod was created after its uuid became visible
    let creations = cluster.creations();
    assert_eq!(creations.len(), 2);
    assert_eq!(creations[0].whitelisted_uuid.as_deref(), Some(first.as_str()));
    assert_eq!(creations[1].whitelisted_uuid.as_deref(), Some(second.as_str()));
}
