use std::time::Duration;

use crate::container::{Container, ContainerID, ContainerStatus};
use crate::error::{Error, Result, StepStatus};
use crate::keyed_lock::KeyedLock;

use super::{ContainerRuntime, ExporterLaunch, LifecycleAction, LifecycleOutcome};

/// Applies the service's lifecycle rules on top of a [`ContainerRuntime`].
///
/// - Every runtime call is bounded by `timeout`; an expired call is a `Runtime` error.
/// - Lifecycle operations on the same container id are serialized: a second caller waits
///   for the first to complete and is then checked against the resulting state.
/// - Nothing is retried.
#[derive(Debug)]
pub struct RuntimeAdapter<R> {
    runtime: R,
    timeout: Duration,
    locks: KeyedLock,
}

impl<R: ContainerRuntime> RuntimeAdapter<R> {
    pub fn new(runtime: R, timeout: Duration) -> Self {
        Self {
            runtime,
            timeout,
            locks: KeyedLock::default(),
        }
    }

    pub fn runtime(&self) -> &R {
        &self.runtime
    }

    async fn bounded<T>(
        &self,
        operation: &str,
        call: impl Future<Output = Result<T>>,
    ) -> Result<T> {
        match tokio::time::timeout(self.timeout, call).await {
            Ok(result) => result,
            Err(_) => {
                log::error!("runtime call `{operation}` timed out after {:?}", self.timeout);
                Err(Error::Runtime(format!(
                    "runtime call `{operation}` timed out after {}s",
                    self.timeout.as_secs_f32()
                )))
            }
        }
    }

    pub async fn list(&self) -> Result<Vec<Container>> {
        self.bounded("list", self.runtime.list()).await
    }

    pub async fn inspect(&self, id: &ContainerID) -> Result<Container> {
        self.bounded("inspect", self.runtime.inspect(id)).await
    }

    /// Starts a stopped container.
    ///
    /// # Errors
    ///
    /// - `NotFound` if the container does not exist.
    /// - `InvalidState` if it is already running or paused.
    /// - `Runtime` if the engine call fails or times out.
    pub async fn start(&self, id: &ContainerID) -> Result<LifecycleOutcome> {
        let _guard = self.locks.lock(id).await;
        let container = self.inspect(id).await?;
        match container.status() {
            ContainerStatus::Running => {
                return Err(Error::InvalidState(format!(
                    "container `{id}` is already running"
                )));
            }
            ContainerStatus::Paused => {
                return Err(Error::InvalidState(format!(
                    "container `{id}` is paused and must be unpaused instead"
                )));
            }
            _ => {}
        }

        self.bounded("start", self.runtime.start(id)).await?;
        log::info!("Started container `{id}`");
        Ok(LifecycleOutcome::new(id, LifecycleAction::Start))
    }

    /// Stops a running container.
    ///
    /// # Errors
    ///
    /// - `NotFound` if the container does not exist.
    /// - `InvalidState` if it is not running.
    /// - `Runtime` if the engine call fails or times out.
    pub async fn stop(&self, id: &ContainerID) -> Result<LifecycleOutcome> {
        let _guard = self.locks.lock(id).await;
        let container = self.inspect(id).await?;
        let status = container.status();
        if !status.is_active() {
            return Err(Error::InvalidState(format!(
                "container `{id}` is already stopped ({status})"
            )));
        }

        self.bounded("stop", self.runtime.stop(id)).await?;
        log::info!("Stopped container `{id}`");
        Ok(LifecycleOutcome::new(id, LifecycleAction::Stop))
    }

    /// Removes a container.
    ///
    /// Without `force`, removing a running container is refused and the container is left
    /// untouched. With `force`, the container is stopped and then removed; if the stop
    /// succeeds but the removal fails, the result is a `PartialFailure` describing both steps.
    ///
    /// # Errors
    ///
    /// - `NotFound` if the container does not exist.
    /// - `Conflict` if it is running and `force` is false.
    /// - `PartialFailure` if it was stopped but could not be removed.
    /// - `Runtime` if the engine call fails or times out.
    pub async fn remove(&self, id: &ContainerID, force: bool) -> Result<LifecycleOutcome> {
        let guard = self.locks.lock(id).await;
        let container = self.inspect(id).await?;
        let status = container.status();

        if status.is_active() {
            if !force {
                return Err(Error::Conflict(format!(
                    "container `{id}` is {status}; stop it first or remove it with force=true"
                )));
            }

            match self.bounded("stop", self.runtime.stop(id)).await {
                Ok(()) | Err(Error::InvalidState(_)) => {}
                Err(err) => return Err(err),
            }
            log::debug!("Stopped container `{id}` before forced removal");

            if let Err(err) = self.bounded("remove", self.runtime.remove(id, false)).await {
                log::error!("container `{id}` was stopped but could not be removed: {err}");
                return Err(Error::PartialFailure {
                    container_id: id.clone(),
                    operation: "remove",
                    steps: vec![
                        StepStatus::succeeded("stop"),
                        StepStatus::failed("remove", &err),
                    ],
                    surviving_state: ContainerStatus::Exited.to_string(),
                });
            }
        } else {
            self.bounded("remove", self.runtime.remove(id, false)).await?;
        }

        drop(guard);
        self.locks.forget(id);
        log::info!("Removed container `{id}`");
        Ok(LifecycleOutcome::new(id, LifecycleAction::Remove))
    }

    pub async fn run_exporter(&self, launch: &ExporterLaunch) -> Result<ContainerID> {
        self.bounded("run_exporter", self.runtime.run_exporter(launch))
            .await
    }

    /// Force-removes an exporter container. A container that is already gone is not an error.
    pub async fn remove_exporter(&self, id: &ContainerID) -> Result<()> {
        match self.bounded("remove", self.runtime.remove(id, true)).await {
            Ok(()) => Ok(()),
            Err(Error::NotFound(_)) => {
                log::warn!("exporter container `{id}` was already gone");
                Ok(())
            }
            Err(err) => Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::error::ErrorKind;
    use crate::runtime::stub::{StubRuntime, container};

    fn adapter(runtime: StubRuntime) -> RuntimeAdapter<StubRuntime> {
        RuntimeAdapter::new(runtime, Duration::from_secs(5))
    }

    fn id(raw: &str) -> ContainerID {
        ContainerID::new(raw).unwrap()
    }

    #[tokio::test]
    async fn test_start_unknown_container() {
        let adapter = adapter(StubRuntime::default());
        let err = adapter.start(&id("missing-id")).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_start_and_stop_guards() {
        let runtime = StubRuntime::with_containers(vec![
            container("c1", "nginx", ContainerStatus::Running),
            container("c2", "redis", ContainerStatus::Exited),
        ]);
        let adapter = adapter(runtime);

        let err = adapter.start(&id("c1")).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidState);
        let err = adapter.stop(&id("c2")).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidState);

        let outcome = adapter.start(&id("c2")).await.unwrap();
        assert_eq!(outcome.action, LifecycleAction::Start);
        assert_eq!(outcome.status, "running");
        assert_eq!(
            adapter.inspect(&id("c2")).await.unwrap().status(),
            ContainerStatus::Running
        );

        let outcome = adapter.stop(&id("c1")).await.unwrap();
        assert_eq!(outcome.status, "exited");
        assert_eq!(adapter.runtime().calls("stop"), 1);
    }

    #[tokio::test]
    async fn test_remove_running_without_force_is_conflict() {
        let runtime =
            StubRuntime::with_containers(vec![container("c1", "nginx", ContainerStatus::Running)]);
        let adapter = adapter(runtime);

        let err = adapter.remove(&id("c1"), false).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);

        let container = adapter.inspect(&id("c1")).await.unwrap();
        assert_eq!(container.status(), ContainerStatus::Running);
        assert_eq!(adapter.runtime().calls("stop"), 0);
        assert_eq!(adapter.runtime().calls("remove"), 0);
    }

    #[tokio::test]
    async fn test_remove_stopped_and_forced() {
        let runtime = StubRuntime::with_containers(vec![
            container("c1", "nginx", ContainerStatus::Running),
            container("c2", "redis", ContainerStatus::Exited),
        ]);
        let adapter = adapter(runtime);

        adapter.remove(&id("c2"), false).await.unwrap();
        let outcome = adapter.remove(&id("c1"), true).await.unwrap();
        assert_eq!(outcome.status, "removed");
        assert_eq!(adapter.runtime().calls("stop"), 1);
        assert_eq!(
            adapter.inspect(&id("c1")).await.unwrap_err().kind(),
            ErrorKind::NotFound
        );
    }

    #[tokio::test]
    async fn test_forced_remove_partial_failure() {
        let runtime =
            StubRuntime::with_containers(vec![container("c1", "nginx", ContainerStatus::Running)]);
        runtime.fail_next("remove", Error::Runtime("device or resource busy".to_owned()));
        let adapter = adapter(runtime);

        let err = adapter.remove(&id("c1"), true).await.unwrap_err();
        match err {
            Error::PartialFailure {
                steps,
                surviving_state,
                ..
            } => {
                assert_eq!(surviving_state, "exited");
                assert_eq!(steps.len(), 2);
                assert!(steps[0].succeeded);
                assert_eq!(steps[1].step, "remove");
                assert!(!steps[1].succeeded);
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(
            adapter.inspect(&id("c1")).await.unwrap().status(),
            ContainerStatus::Exited
        );
    }

    #[tokio::test]
    async fn test_forced_remove_stop_failure_is_not_partial() {
        let runtime =
            StubRuntime::with_containers(vec![container("c1", "nginx", ContainerStatus::Running)]);
        runtime.fail_next("stop", Error::Runtime("engine unavailable".to_owned()));
        let adapter = adapter(runtime);

        let err = adapter.remove(&id("c1"), true).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Runtime);
        assert_eq!(
            adapter.inspect(&id("c1")).await.unwrap().status(),
            ContainerStatus::Running
        );
    }

    #[tokio::test]
    async fn test_runtime_timeout() {
        let runtime =
            StubRuntime::with_containers(vec![container("c1", "nginx", ContainerStatus::Exited)]);
        runtime.set_latency("start", Duration::from_millis(200));
        let adapter = RuntimeAdapter::new(runtime, Duration::from_millis(20));

        let err = adapter.start(&id("c1")).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Runtime);
        assert!(err.to_string().contains("timed out"));
    }

    #[tokio::test]
    async fn test_same_id_operations_wait_for_each_other() {
        let runtime =
            StubRuntime::with_containers(vec![container("c1", "nginx", ContainerStatus::Running)]);
        runtime.set_latency("stop", Duration::from_millis(30));
        let adapter = Arc::new(adapter(runtime));

        let first = tokio::spawn({
            let adapter = Arc::clone(&adapter);
            async move { adapter.stop(&id("c1")).await }
        });
        let second = tokio::spawn({
            let adapter = Arc::clone(&adapter);
            async move { adapter.stop(&id("c1")).await }
        });
        let results = [first.await.unwrap(), second.await.unwrap()];

        let succeeded = results.iter().filter(|r| r.is_ok()).count();
        let invalid = results
            .iter()
            .filter(|r| matches!(r, Err(Error::InvalidState(_))))
            .count();
        assert_eq!((succeeded, invalid), (1, 1));
        assert_eq!(adapter.runtime().calls("stop"), 1);
        assert_eq!(adapter.runtime().max_concurrent("stop"), 1);
    }
}
