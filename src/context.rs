use crate::{
    checker::Checker,
    client::ClusterClient,
    error::CheckError,
    resources::KuberhealthyCheck,
};
use std::{
    collections::HashMap,
    sync::Arc,
    time::Duration,
};
use tokio::sync::Mutex;

pub const DEFAULT_RUN_DEADLINE: Duration = Duration::from_secs(5 * 60);

/// Holds state shared by all checkers of a process.
pub struct Context {
    pub client: Arc<dyn ClusterClient>,
    /// Upper bound for a single `run_once` call, cluster calls included.
    pub run_deadline: Duration,
    /// Maps `{ns}:{name}` check keys to the lock serializing their runs.
    run_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl Context {
    pub fn new(client: Arc<dyn ClusterClient>) -> Self {
        Self {
            client,
            run_deadline: DEFAULT_RUN_DEADLINE,
            run_locks: Default::default(),
        }
    }

    /// Create a checker for `check` that uses the shared cluster client.
    pub fn checker(&self, check: &KuberhealthyCheck) -> Checker {
        Checker::new(self.client.clone(), check)
    }

    /// Run `checker` once, waiting for any other run of the same check to finish first.
    ///
    /// A run that exceeds [`Context::run_deadline`] is abandoned. A pod it already created stays in place until the
    /// next run replaces it.
    pub async fn run_check(&self, checker: &mut Checker) -> Result<(), CheckError> {
        let key = format!("{}:{}", checker.namespace, checker.check_name);
        let lock = self.run_locks.lock().await.entry(key.clone()).or_default().clone();
        let _running = lock.lock().await;
        trace!(?key, "acquired run lock");

        match tokio::time::timeout(self.run_deadline, checker.run_once()).await {
            Ok(result) => result,
            Err(_) => {
                checker.abandon();
                error!(?key, state = ?checker.state(), "check run exceeded its deadline");
                Err(CheckError::DeadlineExceeded {
                    namespace: checker.namespace.clone(),
                    check: checker.check_name.clone(),
                    deadline: self.run_deadline,
                })
            }
        }
    }
}
