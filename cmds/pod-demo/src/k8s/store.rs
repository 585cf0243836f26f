//! Pod access for the demo.
//!
//! [`PodStore`] is the narrow slice of the pod API the driver and the update
//! loop need. [`KubePodStore`] implements it on top of a namespaced
//! `kube::Api<Pod>`.

use k8s_openapi::api::core::v1::Pod;
use kube::{
	api::{Api, DeleteParams, ListParams, PostParams, PropagationPolicy},
	Client, ResourceExt,
};
use thiserror::Error;
use tracing::instrument;

/// Errors returned by a [`PodStore`], classified by what callers react to.
#[derive(Debug, Error)]
pub enum StoreError {
	/// The request conflicted with the stored object (HTTP 409).
	#[error("conflict: {0}")]
	Conflict(String),

	/// The object does not exist (HTTP 404).
	#[error("not found: {0}")]
	NotFound(String),

	#[error(transparent)]
	Api(kube::Error),
}

impl From<kube::Error> for StoreError {
	fn from(err: kube::Error) -> Self {
		match err {
			kube::Error::Api(ref status) if status.code == 409 => {
				Self::Conflict(status.message.clone())
			}
			kube::Error::Api(ref status) if status.code == 404 => {
				Self::NotFound(status.message.clone())
			}
			other => Self::Api(other),
		}
	}
}

/// Outcome of a delete request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Deletion {
	/// The server accepted the request but the object still exists
	/// (finalizers or foreground propagation are pending).
	Pending {
		/// UID of the object being deleted.
		uid: Option<String>,
	},

	/// The object is gone.
	Completed,
}

/// Pod operations within a single namespace.
#[allow(async_fn_in_trait)]
pub trait PodStore {
	/// Namespace this store operates in.
	fn namespace(&self) -> &str;

	/// List pods, optionally filtered by a label selector.
	async fn list(&self, selector: Option<&str>) -> Result<Vec<Pod>, StoreError>;

	async fn create(&self, pod: &Pod) -> Result<Pod, StoreError>;

	/// Fetch the current state of a pod, including its resource version.
	async fn get(&self, name: &str) -> Result<Pod, StoreError>;

	/// Replace a pod. Fails with [`StoreError::Conflict`] when the submitted
	/// resource version is stale.
	async fn replace(&self, pod: &Pod) -> Result<Pod, StoreError>;

	async fn delete(
		&self,
		name: &str,
		propagation: PropagationPolicy,
	) -> Result<Deletion, StoreError>;
}

/// [`PodStore`] backed by the Kubernetes API.
#[derive(Clone)]
pub struct KubePodStore {
	api: Api<Pod>,
	namespace: String,
}

impl KubePodStore {
	pub fn new(client: Client, namespace: &str) -> Self {
		Self {
			api: Api::namespaced(client, namespace),
			namespace: namespace.to_string(),
		}
	}
}

impl PodStore for KubePodStore {
	fn namespace(&self) -> &str {
		&self.namespace
	}

	#[instrument(skip(self), fields(namespace = %self.namespace))]
	async fn list(&self, selector: Option<&str>) -> Result<Vec<Pod>, StoreError> {
		let mut params = ListParams::default();
		if let Some(selector) = selector {
			params = params.labels(selector);
		}
		Ok(self.api.list(&params).await?.items)
	}

	#[instrument(skip_all, fields(namespace = %self.namespace, name = %pod.name_any()))]
	async fn create(&self, pod: &Pod) -> Result<Pod, StoreError> {
		Ok(self.api.create(&PostParams::default(), pod).await?)
	}

	#[instrument(skip(self), fields(namespace = %self.namespace))]
	async fn get(&self, name: &str) -> Result<Pod, StoreError> {
		Ok(self.api.get(name).await?)
	}

	#[instrument(skip_all, fields(
		namespace = %self.namespace,
		name = %pod.name_any(),
		resource_version = %pod.resource_version().unwrap_or_default(),
	))]
	async fn replace(&self, pod: &Pod) -> Result<Pod, StoreError> {
		Ok(self
			.api
			.replace(&pod.name_any(), &PostParams::default(), pod)
			.await?)
	}

	#[instrument(skip(self), fields(namespace = %self.namespace))]
	async fn delete(
		&self,
		name: &str,
		propagation: PropagationPolicy,
	) -> Result<Deletion, StoreError> {
		let params = DeleteParams {
			propagation_policy: Some(propagation),
			..DeleteParams::default()
		};
		// The server answers with the object while deletion is in progress,
		// and with a Status once it is gone
		let response = self.api.delete(name, &params).await?;
		Ok(response.left().map_or(Deletion::Completed, |pod| Deletion::Pending {
			uid: pod.metadata.uid,
		}))
	}
}
