//! The job pipeline
//!
//! Stages run strictly in order:
//!
//! 1. compose the manifest (configuration errors stop here, before any API call)
//! 2. submit it
//! 3. wait for the pod to leave `Pending`
//! 4. optionally follow the container log
//! 5. wait for the Job to finish
//! 6. read the exit code
//!
//! Only steps 1 and 2 can fail the run. Anything that goes wrong after the Job
//! exists is logged and reported as a degraded [`ExecutionResult`], so the
//! caller always learns the Job name.

use std::sync::Arc;

use k8s_openapi::api::core::v1::Pod;
use serde_json::Value;
use tokio::sync::oneshot;
use tracing::{debug, error, info};

use crate::client::{JobClient, KubeJobClient};
use crate::completion::wait_for_completion;
use crate::config::JobConfig;
use crate::error::{LifecycleError, RunError};
use crate::logs::{stream_pod_logs, OutputSink, StdoutSink};
use crate::pod_watch::wait_for_pod_start;
use crate::result::{extract_result, ExecutionResult};
use crate::submit::{submit_job, JobIdentity};
use crate::worker::{run_detached, run_stage};

/// Runs jobs against an injected cluster client
#[derive(Clone)]
pub struct JobRunner {
    client: Arc<dyn JobClient>,
    sink: Arc<dyn OutputSink>,
}

impl JobRunner {
    /// Runner writing container output to stdout
    pub fn new(client: Arc<dyn JobClient>) -> Self {
        Self {
            client,
            sink: Arc::new(StdoutSink),
        }
    }

    /// Runner backed by an already-authenticated `kube::Client`
    pub fn from_kube(client: kube::Client) -> Self {
        Self::new(Arc::new(KubeJobClient::new(client)))
    }

    /// Send container output somewhere other than stdout
    pub fn with_sink(mut self, sink: Arc<dyn OutputSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Run one job to completion
    pub async fn run(&self, config: &JobConfig) -> Result<ExecutionResult, RunError> {
        self.run_with_started(config, None).await
    }

    /// Run one job, reporting its identity on `started` as soon as the API
    /// server has accepted it
    pub async fn run_with_started(
        &self,
        config: &JobConfig,
        started: Option<oneshot::Sender<JobIdentity>>,
    ) -> Result<ExecutionResult, RunError> {
        let manifest = config.build_manifest()?;
        let namespace = target_namespace(&manifest, &config.shortcuts.namespace);

        let job = submit_job(self.client.as_ref(), &manifest, &namespace).await?;
        if let Some(started) = started {
            if started.send(job.clone()).is_err() {
                debug!(job = %job.name, "started receiver dropped");
            }
        }

        match self.monitor(&job, config).await {
            Ok(result) => {
                info!(job = %job.name, exit_code = result.status_code, "job finished");
                Ok(result)
            }
            Err(e) => {
                error!(
                    job = %job.name,
                    namespace = %job.namespace,
                    error = %e,
                    "could not determine job outcome"
                );
                Ok(ExecutionResult::degraded(job.name))
            }
        }
    }

    /// Everything after submission; every failure here degrades the result
    async fn monitor(
        &self,
        job: &JobIdentity,
        config: &JobConfig,
    ) -> Result<ExecutionResult, LifecycleError> {
        let timeouts = config.timeouts();

        let existing = self
            .client
            .get_job(&job.namespace, &job.name)
            .await
            .map_err(|source| LifecycleError::Api {
                job: job.name.clone(),
                source,
            })?;
        if existing.is_none() {
            return Err(LifecycleError::JobNotFound {
                job: job.name.clone(),
            });
        }

        let pod = run_stage(
            "pod-watch",
            wait_for_pod_start(self.client.clone(), job.clone(), timeouts.pod),
        )
        .await?;
        let pod_name = pod
            .metadata
            .name
            .clone()
            .ok_or_else(|| LifecycleError::PodNotFound {
                pod: format!("{} (unnamed)", job.name),
            })?;

        if config.stream_output {
            run_detached(
                "logs",
                stream_pod_logs(
                    self.client.clone(),
                    job.clone(),
                    pod_name.clone(),
                    primary_container(&pod),
                    self.sink.clone(),
                ),
            )
            .await;
        }

        run_stage(
            "completion-watch",
            wait_for_completion(self.client.clone(), job.clone(), timeouts.job),
        )
        .await?;

        extract_result(self.client.as_ref(), job, &pod_name).await
    }
}

/// Namespace the composed manifest targets; overrides may have moved it
fn target_namespace(manifest: &Value, fallback: &str) -> String {
    manifest
        .pointer("/metadata/namespace")
        .and_then(Value::as_str)
        .filter(|ns| !ns.is_empty())
        .unwrap_or(fallback)
        .to_string()
}

/// Name of the pod's first container
fn primary_container(pod: &Pod) -> Option<String> {
    pod.spec
        .as_ref()
        .and_then(|spec| spec.containers.first())
        .map(|c| c.name.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{MockJobClient, ObjectEvent};
    use crate::logs::{forward_log_line, BufferSink};
    use futures::{stream, StreamExt};
    use k8s_openapi::api::batch::v1::Job;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
    use kubejob_manifest::{ManifestError, PatchOp, PatchSet, ShortcutFields};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const JOB: &str = "kubejob-abc";
    const POD: &str = "kubejob-abc-xyz";

    // =========================================================================
    // Fixtures
    // =========================================================================

    fn config() -> JobConfig {
        JobConfig {
            shortcuts: ShortcutFields {
                image: Some("busybox:1.36".to_string()),
                command: vec!["sh".to_string(), "-c".to_string(), "echo hi".to_string()],
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn pod(phase: &str, exit_code: Option<i32>) -> Pod {
        let state = match exit_code {
            Some(code) => json!({"terminated": {"exitCode": code}}),
            None => json!({"running": {}}),
        };
        serde_json::from_value(json!({
            "metadata": {"name": POD, "labels": {"job-name": JOB}},
            "spec": {"containers": [{"name": "kubejob", "image": "busybox:1.36"}]},
            "status": {
                "phase": phase,
                "containerStatuses": [{
                    "name": "kubejob",
                    "image": "busybox:1.36",
                    "imageID": "",
                    "ready": false,
                    "restartCount": 0,
                    "state": state
                }]
            }
        }))
        .unwrap()
    }

    fn job_with_status(status: Value) -> Job {
        serde_json::from_value(json!({
            "metadata": {"name": JOB, "namespace": "default"},
            "status": status
        }))
        .unwrap()
    }

    fn running_job() -> Job {
        job_with_status(json!({"active": 1}))
    }

    fn completed_job() -> Job {
        job_with_status(json!({"succeeded": 1, "completionTime": "2024-05-01T12:00:00Z"}))
    }

    fn runner(client: MockJobClient) -> (JobRunner, Arc<BufferSink>) {
        let sink = Arc::new(BufferSink::new());
        let runner = JobRunner::new(Arc::new(client)).with_sink(sink.clone());
        (runner, sink)
    }

    // Stages run on workers, where a panicking expectation only degrades the
    // result. Calls that must not happen are counted instead.
    fn counter() -> Arc<AtomicUsize> {
        Arc::new(AtomicUsize::new(0))
    }

    fn expect_submit(client: &mut MockJobClient) {
        client.expect_create_job().times(1).returning(|_, manifest| {
            Ok(ObjectMeta {
                name: Some(JOB.to_string()),
                namespace: manifest["metadata"]["namespace"].as_str().map(String::from),
                ..Default::default()
            })
        });
    }

    fn expect_job_exists(client: &mut MockJobClient) {
        client
            .expect_get_job()
            .withf(|_, name| name == JOB)
            .returning(|_, _| Ok(Some(running_job())));
    }

    /// Pod watch yielding `pods`, then either closing or hanging forever
    fn expect_pod_events(client: &mut MockJobClient, pods: Vec<Pod>, hang: bool) {
        client.expect_watch_pods().returning(move |_, _| {
            let events = stream::iter(pods.clone())
                .map(|p| Ok(ObjectEvent::Applied(p)));
            if hang {
                Ok(events.chain(stream::pending()).boxed())
            } else {
                Ok(events.boxed())
            }
        });
    }

    fn expect_job_events(
        client: &mut MockJobClient,
        events: Vec<ObjectEvent<Job>>,
        hang: bool,
    ) {
        client.expect_watch_jobs().returning(move |_, _| {
            let events = stream::iter(events.clone()).map(Ok);
            if hang {
                Ok(events.chain(stream::pending()).boxed())
            } else {
                Ok(events.boxed())
            }
        });
    }

    fn expect_log_lines(client: &mut MockJobClient, lines: &'static [&'static str]) {
        client
            .expect_follow_logs()
            .withf(|_, pod, container, _| pod == POD && container.as_deref() == Some("kubejob"))
            .returning(move |_, _, _, sink| {
                for line in lines {
                    forward_log_line(sink.as_ref(), line);
                }
                Ok(lines.len() as u64)
            });
    }

    fn expect_pod_status(client: &mut MockJobClient, pod: Option<Pod>) {
        client
            .expect_get_pod_status()
            .withf(|_, name| name == POD)
            .returning(move |_, _| Ok(pod.clone()));
    }

    /// Every stage succeeds and the container exits with `exit_code`
    fn happy_client(exit_code: i32) -> MockJobClient {
        let mut client = MockJobClient::new();
        expect_submit(&mut client);
        expect_job_exists(&mut client);
        expect_pod_events(
            &mut client,
            vec![pod("Pending", None), pod("Running", None)],
            false,
        );
        expect_log_lines(&mut client, &["hi\n"]);
        expect_job_events(
            &mut client,
            vec![
                ObjectEvent::Applied(running_job()),
                ObjectEvent::Applied(completed_job()),
            ],
            false,
        );
        expect_pod_status(&mut client, Some(pod("Succeeded", Some(exit_code))));
        client
    }

    // =========================================================================
    // Successful runs
    // =========================================================================

    #[tokio::test]
    async fn story_successful_job_reports_exit_code_and_output() {
        let (runner, sink) = runner(happy_client(0));

        let result = runner.run(&config()).await.unwrap();

        assert_eq!(result, ExecutionResult::new(0, JOB));
        assert!(result.is_success());
        assert_eq!(sink.lines(), vec!["hi"]);
    }

    #[tokio::test]
    async fn test_nonzero_exit_code_is_reported_verbatim() {
        let (runner, _) = runner(happy_client(137));
        let result = runner.run(&config()).await.unwrap();
        assert_eq!(result, ExecutionResult::new(137, JOB));
    }

    #[tokio::test]
    async fn test_failed_job_condition_still_reads_exit_code() {
        let mut client = MockJobClient::new();
        expect_submit(&mut client);
        expect_job_exists(&mut client);
        expect_pod_events(&mut client, vec![pod("Failed", Some(2))], false);
        let failed = job_with_status(json!({
            "failed": 1,
            "conditions": [{"type": "Failed", "status": "True"}]
        }));
        expect_job_events(&mut client, vec![ObjectEvent::Applied(failed)], false);
        expect_pod_status(&mut client, Some(pod("Failed", Some(2))));

        let (runner, _) = runner(client);
        let config = JobConfig {
            stream_output: false,
            ..config()
        };
        let result = runner.run(&config).await.unwrap();
        assert_eq!(result, ExecutionResult::new(2, JOB));
    }

    #[tokio::test]
    async fn test_streaming_disabled_skips_logs() {
        let follow_calls = counter();
        let mut client = MockJobClient::new();
        expect_submit(&mut client);
        expect_job_exists(&mut client);
        expect_pod_events(&mut client, vec![pod("Running", None)], false);
        let calls = follow_calls.clone();
        client.expect_follow_logs().returning(move |_, _, _, _| {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(0)
        });
        expect_job_events(&mut client, vec![ObjectEvent::Applied(completed_job())], false);
        expect_pod_status(&mut client, Some(pod("Succeeded", Some(0))));

        let (runner, sink) = runner(client);
        let config = JobConfig {
            stream_output: false,
            ..config()
        };
        let result = runner.run(&config).await.unwrap();

        assert_eq!(result, ExecutionResult::new(0, JOB));
        assert_eq!(follow_calls.load(Ordering::SeqCst), 0);
        assert!(sink.lines().is_empty());
    }

    #[tokio::test]
    async fn test_started_notification_carries_identity() {
        let (runner, _) = runner(happy_client(0));
        let (tx, rx) = oneshot::channel();

        let result = runner.run_with_started(&config(), Some(tx)).await.unwrap();

        let started = rx.await.unwrap();
        assert_eq!(started.name, JOB);
        assert_eq!(started.namespace, "default");
        assert_eq!(result.identifier, started.name);
    }

    #[tokio::test]
    async fn test_overridden_namespace_is_submitted_to() {
        let mut client = MockJobClient::new();
        client
            .expect_create_job()
            .withf(|ns, manifest| ns == "ml" && manifest["metadata"]["namespace"] == "ml")
            .times(1)
            .returning(|_, _| {
                Ok(ObjectMeta {
                    name: Some(JOB.to_string()),
                    namespace: Some("ml".to_string()),
                    ..Default::default()
                })
            });
        client
            .expect_get_job()
            .withf(|ns, _| ns == "ml")
            .returning(|_, _| Ok(None));

        let (runner, _) = runner(client);
        let (tx, rx) = oneshot::channel();
        let config = JobConfig {
            customizations: PatchSet::from(vec![PatchOp::replace("/metadata/namespace", "ml")]),
            ..config()
        };
        runner.run_with_started(&config, Some(tx)).await.unwrap();
        assert_eq!(rx.await.unwrap().namespace, "ml");
    }

    // =========================================================================
    // Degraded outcomes
    // =========================================================================

    #[tokio::test(start_paused = true)]
    async fn story_pod_never_starts_skips_remaining_stages() {
        let later_calls = counter();
        let mut client = MockJobClient::new();
        expect_submit(&mut client);
        expect_job_exists(&mut client);
        expect_pod_events(&mut client, vec![pod("Pending", None)], true);

        let calls = later_calls.clone();
        client.expect_follow_logs().returning(move |_, _, _, _| {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(0)
        });
        let calls = later_calls.clone();
        client.expect_watch_jobs().returning(move |_, _| {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(stream::empty().boxed())
        });
        let calls = later_calls.clone();
        client.expect_get_pod_status().returning(move |_, _| {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(None)
        });

        let (runner, sink) = runner(client);
        let result = runner.run(&config()).await.unwrap();

        assert_eq!(result, ExecutionResult::degraded(JOB));
        assert_eq!(later_calls.load(Ordering::SeqCst), 0);
        assert!(sink.lines().is_empty());
    }

    #[tokio::test]
    async fn test_job_gone_after_submission_is_degraded() {
        let watch_calls = counter();
        let mut client = MockJobClient::new();
        expect_submit(&mut client);
        client.expect_get_job().times(1).returning(|_, _| Ok(None));
        let calls = watch_calls.clone();
        client.expect_watch_pods().returning(move |_, _| {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(stream::empty().boxed())
        });

        let (runner, _) = runner(client);
        let result = runner.run(&config()).await.unwrap();

        assert_eq!(result, ExecutionResult::degraded(JOB));
        assert_eq!(watch_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_job_deleted_during_completion_watch_is_degraded() {
        let mut client = MockJobClient::new();
        expect_submit(&mut client);
        expect_job_exists(&mut client);
        expect_pod_events(&mut client, vec![pod("Running", None)], false);
        expect_log_lines(&mut client, &[]);
        expect_job_events(
            &mut client,
            vec![
                ObjectEvent::Applied(running_job()),
                ObjectEvent::Deleted(running_job()),
            ],
            false,
        );

        let (runner, _) = runner(client);
        let result = runner.run(&config()).await.unwrap();
        assert_eq!(result, ExecutionResult::degraded(JOB));
    }

    #[tokio::test(start_paused = true)]
    async fn test_completion_timeout_is_degraded() {
        let mut client = MockJobClient::new();
        expect_submit(&mut client);
        expect_job_exists(&mut client);
        expect_pod_events(&mut client, vec![pod("Running", None)], false);
        expect_log_lines(&mut client, &[]);
        expect_job_events(&mut client, vec![ObjectEvent::Applied(running_job())], true);

        let (runner, _) = runner(client);
        let result = runner.run(&config()).await.unwrap();
        assert_eq!(result, ExecutionResult::degraded(JOB));
    }

    #[tokio::test]
    async fn test_pod_gone_before_exit_code_is_degraded() {
        let mut client = MockJobClient::new();
        expect_submit(&mut client);
        expect_job_exists(&mut client);
        expect_pod_events(&mut client, vec![pod("Running", None)], false);
        expect_log_lines(&mut client, &[]);
        expect_job_events(&mut client, vec![ObjectEvent::Applied(completed_job())], false);
        expect_pod_status(&mut client, None);

        let (runner, _) = runner(client);
        let result = runner.run(&config()).await.unwrap();
        assert_eq!(result, ExecutionResult::degraded(JOB));
    }

    #[tokio::test]
    async fn test_log_failure_is_not_fatal() {
        let mut client = MockJobClient::new();
        expect_submit(&mut client);
        expect_job_exists(&mut client);
        expect_pod_events(&mut client, vec![pod("Running", None)], false);
        client
            .expect_follow_logs()
            .returning(|_, _, _, _| Err(kubejob_common::Error::internal("stream reset")));
        expect_job_events(&mut client, vec![ObjectEvent::Applied(completed_job())], false);
        expect_pod_status(&mut client, Some(pod("Succeeded", Some(0))));

        let (runner, _) = runner(client);
        let result = runner.run(&config()).await.unwrap();
        assert_eq!(result, ExecutionResult::new(0, JOB));
    }

    // =========================================================================
    // Errors that escape
    // =========================================================================

    #[tokio::test]
    async fn test_submission_failure_escapes() {
        let mut client = MockJobClient::new();
        client
            .expect_create_job()
            .times(1)
            .returning(|_, _| Err(kubejob_common::Error::internal("connection refused")));

        let (runner, _) = runner(client);
        let err = runner.run(&config()).await.unwrap_err();
        assert!(matches!(err, RunError::SubmissionFailed { .. }));
    }

    #[tokio::test]
    async fn test_invalid_template_never_contacts_cluster() {
        let mut client = MockJobClient::new();
        client.expect_create_job().never();

        let (runner, _) = runner(client);
        let config = JobConfig {
            job: json!({"apiVersion": "batch/v1", "kind": "Job", "metadata": {"labels": {}}}),
            ..config()
        };
        let err = runner.run(&config).await.unwrap_err();
        assert!(matches!(
            err,
            RunError::Manifest(ManifestError::MissingRequiredPath { .. })
        ));
    }

    #[tokio::test]
    async fn test_override_dropping_required_path_never_contacts_cluster() {
        let mut client = MockJobClient::new();
        client.expect_create_job().never();

        let (runner, _) = runner(client);
        let config = JobConfig {
            customizations: PatchSet::from(vec![PatchOp::remove(
                "/spec/template/spec/restartPolicy",
            )]),
            ..config()
        };
        let err = runner.run(&config).await.unwrap_err();
        assert!(matches!(
            err,
            RunError::Manifest(ManifestError::MissingRequiredPath { .. })
        ));
    }

    #[test]
    fn test_target_namespace() {
        assert_eq!(
            target_namespace(&json!({"metadata": {"namespace": "ml"}}), "default"),
            "ml"
        );
        assert_eq!(target_namespace(&json!({"metadata": {}}), "default"), "default");
        assert_eq!(
            target_namespace(&json!({"metadata": {"namespace": ""}}), "default"),
            "default"
        );
    }

    #[test]
    fn test_primary_container() {
        assert_eq!(
            primary_container(&pod("Running", None)).as_deref(),
            Some("kubejob")
        );
        assert_eq!(primary_container(&Pod::default()), None);
    }
}
