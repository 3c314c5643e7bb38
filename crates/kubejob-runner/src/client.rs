//! Cluster access for the runner
//!
//! `JobClient` is the seam between the pipeline and the Kubernetes API. The
//! pipeline only ever talks to this trait, so tests drive it with a mock and
//! production injects a [`KubeJobClient`] built from an already-configured
//! `kube::Client`.
//!
//! Watch streams are owned by the caller: dropping the stream closes the
//! underlying HTTP connection.

use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::{AsyncBufReadExt, Stream, StreamExt, TryStreamExt};
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::Pod;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::{Api, DynamicObject, LogParams, PostParams};
use kube::discovery::ApiResource;
use kube::runtime::watcher::{self, Event};
use kube::runtime::WatchStreamExt;
use kube::Client;
use serde_json::Value;
use tracing::debug;

#[cfg(test)]
use mockall::automock;

use kubejob_common::Error;

use crate::logs::{forward_log_line, OutputSink};

/// A change observed on a watched object
#[derive(Clone, Debug, PartialEq)]
pub enum ObjectEvent<K> {
    /// The object was created or modified (or listed on watch start)
    Applied(K),
    /// The object was deleted
    Deleted(K),
}

/// Stream of watch events, closed when dropped
pub type EventStream<K> = BoxStream<'static, Result<ObjectEvent<K>, Error>>;

/// Trait abstracting the Kubernetes calls the runner makes
#[cfg_attr(test, automock)]
#[async_trait]
pub trait JobClient: Send + Sync {
    /// Create a Job from a raw manifest, returning the server-side metadata
    async fn create_job(&self, namespace: &str, manifest: &Value) -> Result<ObjectMeta, Error>;

    /// Read a Job; `None` if it does not exist
    async fn get_job(&self, namespace: &str, name: &str) -> Result<Option<Job>, Error>;

    /// Watch pods matching a label selector
    async fn watch_pods(
        &self,
        namespace: &str,
        label_selector: &str,
    ) -> Result<EventStream<Pod>, Error>;

    /// Watch jobs matching a field selector
    async fn watch_jobs(
        &self,
        namespace: &str,
        field_selector: &str,
    ) -> Result<EventStream<Job>, Error>;

    /// Follow a container's log, forwarding each line to `sink` until the
    /// stream closes. Returns the number of lines forwarded.
    async fn follow_logs(
        &self,
        namespace: &str,
        pod: &str,
        container: Option<String>,
        sink: Arc<dyn OutputSink>,
    ) -> Result<u64, Error>;

    /// Read a pod's status; `None` if the pod does not exist
    async fn get_pod_status(&self, namespace: &str, name: &str) -> Result<Option<Pod>, Error>;
}

/// `JobClient` backed by a real `kube::Client`
#[derive(Clone)]
pub struct KubeJobClient {
    client: Client,
}

impl KubeJobClient {
    /// Wrap an already-configured client
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

/// Map a kube-runtime watcher into our event type, skipping init markers
fn object_events<K, S>(stream: S, resource: &'static str) -> EventStream<K>
where
    K: Send + 'static,
    S: Stream<Item = Result<Event<K>, watcher::Error>> + Send + 'static,
{
    stream
        .filter_map(move |event| async move {
            match event {
                Ok(Event::Apply(obj)) | Ok(Event::InitApply(obj)) => {
                    Some(Ok(ObjectEvent::Applied(obj)))
                }
                Ok(Event::Delete(obj)) => Some(Ok(ObjectEvent::Deleted(obj))),
                Ok(Event::Init) | Ok(Event::InitDone) => None,
                Err(e) => Some(Err(Error::watch(resource, e.to_string()))),
            }
        })
        .boxed()
}

#[async_trait]
impl JobClient for KubeJobClient {
    async fn create_job(&self, namespace: &str, manifest: &Value) -> Result<ObjectMeta, Error> {
        let ar = ApiResource::erase::<Job>(&());
        let api: Api<DynamicObject> = Api::namespaced_with(self.client.clone(), namespace, &ar);
        let obj: DynamicObject = serde_json::from_value(manifest.clone())
            .map_err(|e| Error::serialization_for_kind("Job", e.to_string()))?;

        let created = api.create(&PostParams::default(), &obj).await?;
        Ok(created.metadata)
    }

    async fn get_job(&self, namespace: &str, name: &str) -> Result<Option<Job>, Error> {
        let api: Api<Job> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }

    async fn watch_pods(
        &self,
        namespace: &str,
        label_selector: &str,
    ) -> Result<EventStream<Pod>, Error> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let config = watcher::Config::default().labels(label_selector);
        debug!(%namespace, %label_selector, "opening pod watch");
        Ok(object_events(
            watcher::watcher(api, config).default_backoff(),
            "pods",
        ))
    }

    async fn watch_jobs(
        &self,
        namespace: &str,
        field_selector: &str,
    ) -> Result<EventStream<Job>, Error> {
        let api: Api<Job> = Api::namespaced(self.client.clone(), namespace);
        let config = watcher::Config::default().fields(field_selector);
        debug!(%namespace, %field_selector, "opening job watch");
        Ok(object_events(
            watcher::watcher(api, config).default_backoff(),
            "jobs",
        ))
    }

    async fn follow_logs(
        &self,
        namespace: &str,
        pod: &str,
        container: Option<String>,
        sink: Arc<dyn OutputSink>,
    ) -> Result<u64, Error> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let params = LogParams {
            follow: true,
            container,
            ..Default::default()
        };

        let mut lines = api.log_stream(pod, &params).await?.lines();
        let mut forwarded = 0u64;
        while let Some(line) = lines
            .try_next()
            .await
            .map_err(|e| Error::internal_with_context("log_stream", e.to_string()))?
        {
            forward_log_line(sink.as_ref(), &line);
            forwarded += 1;
        }
        Ok(forwarded)
    }

    async fn get_pod_status(&self, namespace: &str, name: &str) -> Result<Option<Pod>, Error> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        match api.get_status(name).await.map_err(Error::from) {
            Ok(pod) => Ok(Some(pod)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }
}
