//! Common test utilities.

use std::{
	collections::{BTreeMap, HashMap},
	sync::Mutex,
};

use k8s_openapi::{api::core::v1::Pod, apimachinery::pkg::apis::meta::v1::ObjectMeta};
use kube::api::PropagationPolicy;

use crate::k8s::store::{Deletion, PodStore, StoreError};

/// Number of calls made to each [`PodStore`] operation.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Calls {
	pub list: u32,
	pub create: u32,
	pub get: u32,
	pub replace: u32,
	pub delete: u32,
}

#[derive(Default)]
struct FakeState {
	/// Pods in list order.
	pods: Vec<Pod>,
	last_resource_version: u64,
	conflicts: u32,
	external_writes: u32,
	failing_list: bool,
	failing_create: bool,
	failing_get: bool,
	failing_replace: bool,
	/// Reads that still see a pod after a foreground delete.
	deletion_reads: u32,
	/// Put a fresh pod (new UID) back once a deletion completes.
	recreate_after_delete: bool,
	terminating: HashMap<String, u32>,
	calls: Calls,
	submitted: Vec<Pod>,
}

impl FakeState {
	fn next_resource_version(&mut self) -> String {
		self.last_resource_version += 1;
		self.last_resource_version.to_string()
	}

	/// Store a new pod with server-owned metadata filled in.
	fn admit(&mut self, namespace: &str, mut pod: Pod) -> Pod {
		let resource_version = self.next_resource_version();
		pod.metadata.namespace = Some(namespace.to_string());
		pod.metadata.uid = Some(format!("uid-{}", resource_version));
		pod.metadata.resource_version = Some(resource_version);
		self.pods.push(pod.clone());
		pod
	}

	fn position(&self, name: &str) -> Option<usize> {
		self.pods
			.iter()
			.position(|p| p.metadata.name.as_deref() == Some(name))
	}
}

/// An in-memory [`PodStore`] with injectable conflicts and failures.
pub struct FakePodStore {
	namespace: String,
	state: Mutex<FakeState>,
}

/// A generic transport-level failure, neither a conflict nor a missing object.
fn generic_error() -> StoreError {
	let err = serde_json::from_str::<Pod>("not json").unwrap_err();
	StoreError::Api(kube::Error::SerdeError(err))
}

/// Equality-only label selector matching (`key=value`, comma separated).
fn matches_selector(pod: &Pod, selector: &str) -> bool {
	selector.split(',').all(|term| {
		term.split_once('=').is_some_and(|(key, value)| {
			pod.metadata
				.labels
				.as_ref()
				.and_then(|labels| labels.get(key))
				.is_some_and(|label| label == value)
		})
	})
}

impl FakePodStore {
	pub fn new(namespace: &str) -> Self {
		Self {
			namespace: namespace.to_string(),
			state: Mutex::new(FakeState::default()),
		}
	}

	/// Add a pod with the given name.
	pub fn with_pod(self, name: &str) -> Self {
		self.with_annotated_pod(name, BTreeMap::new())
	}

	/// Add pods in order.
	pub fn with_pods(self, names: &[&str]) -> Self {
		names.iter().fold(self, |store, name| store.with_pod(name))
	}

	/// Add a pod carrying annotations. An empty map leaves annotations unset.
	pub fn with_annotated_pod(self, name: &str, annotations: BTreeMap<String, String>) -> Self {
		self.push_pod(ObjectMeta {
			name: Some(name.to_string()),
			annotations: (!annotations.is_empty()).then_some(annotations),
			..ObjectMeta::default()
		})
	}

	/// Add a pod carrying labels, for selector filtering.
	pub fn with_labeled_pod(self, name: &str, labels: BTreeMap<String, String>) -> Self {
		self.push_pod(ObjectMeta {
			name: Some(name.to_string()),
			labels: Some(labels),
			..ObjectMeta::default()
		})
	}

	fn push_pod(self, metadata: ObjectMeta) -> Self {
		self.state.lock().unwrap().admit(
			&self.namespace,
			Pod {
				metadata,
				..Pod::default()
			},
		);
		self
	}

	/// Reject the next `n` replace requests with a conflict.
	pub fn with_conflicts(self, n: u32) -> Self {
		self.state.lock().unwrap().conflicts = n;
		self
	}

	/// Simulate `n` concurrent writers, each bumping the stored version just
	/// before one of our replace requests lands.
	pub fn with_external_writes(self, n: u32) -> Self {
		self.state.lock().unwrap().external_writes = n;
		self
	}

	pub fn with_failing_list(self) -> Self {
		self.state.lock().unwrap().failing_list = true;
		self
	}

	pub fn with_failing_create(self) -> Self {
		self.state.lock().unwrap().failing_create = true;
		self
	}

	pub fn with_failing_get(self) -> Self {
		self.state.lock().unwrap().failing_get = true;
		self
	}

	pub fn with_failing_replace(self) -> Self {
		self.state.lock().unwrap().failing_replace = true;
		self
	}

	/// Keep a pod visible for `n` reads after a foreground delete.
	pub fn with_deletion_reads(self, n: u32) -> Self {
		self.state.lock().unwrap().deletion_reads = n;
		self
	}

	/// Simulate a controller that re-creates the pod once deletion completes.
	pub fn with_recreation(self) -> Self {
		self.state.lock().unwrap().recreate_after_delete = true;
		self
	}

	pub fn calls(&self) -> Calls {
		self.state.lock().unwrap().calls
	}

	/// Every pod submitted through `replace`, in order, including rejected ones.
	pub fn submitted(&self) -> Vec<Pod> {
		self.state.lock().unwrap().submitted.clone()
	}

	/// Current stored copy of a pod, without counting as a read.
	pub fn pod(&self, name: &str) -> Option<Pod> {
		let state = self.state.lock().unwrap();
		state.position(name).map(|idx| state.pods[idx].clone())
	}
}

impl PodStore for FakePodStore {
	fn namespace(&self) -> &str {
		&self.namespace
	}

	async fn list(&self, selector: Option<&str>) -> Result<Vec<Pod>, StoreError> {
		let mut state = self.state.lock().unwrap();
		state.calls.list += 1;
		if state.failing_list {
			return Err(generic_error());
		}
		Ok(state
			.pods
			.iter()
			.filter(|pod| selector.is_none_or(|selector| matches_selector(pod, selector)))
			.cloned()
			.collect())
	}

	async fn create(&self, pod: &Pod) -> Result<Pod, StoreError> {
		let mut state = self.state.lock().unwrap();
		state.calls.create += 1;
		if state.failing_create {
			return Err(generic_error());
		}

		let name = pod.metadata.name.clone().unwrap_or_default();
		if state.position(&name).is_some() {
			return Err(StoreError::Conflict(format!(
				"pods \"{}\" already exists",
				name
			)));
		}

		Ok(state.admit(&self.namespace, pod.clone()))
	}

	async fn get(&self, name: &str) -> Result<Pod, StoreError> {
		let mut state = self.state.lock().unwrap();
		state.calls.get += 1;
		if state.failing_get {
			return Err(generic_error());
		}

		if let Some(remaining) = state.terminating.get_mut(name) {
			if *remaining == 0 {
				state.terminating.remove(name);
				if let Some(idx) = state.position(name) {
					let deleted = state.pods.remove(idx);
					if state.recreate_after_delete {
						let fresh = Pod {
							metadata: ObjectMeta {
								name: deleted.metadata.name,
								..ObjectMeta::default()
							},
							..Pod::default()
						};
						state.admit(&self.namespace, fresh);
					}
				}
			} else {
				*remaining -= 1;
			}
		}

		state
			.position(name)
			.map(|idx| state.pods[idx].clone())
			.ok_or_else(|| StoreError::NotFound(format!("pods \"{}\" not found", name)))
	}

	async fn replace(&self, pod: &Pod) -> Result<Pod, StoreError> {
		let mut state = self.state.lock().unwrap();
		state.calls.replace += 1;
		state.submitted.push(pod.clone());

		if state.failing_replace {
			return Err(generic_error());
		}

		let name = pod.metadata.name.clone().unwrap_or_default();
		let Some(idx) = state.position(&name) else {
			return Err(StoreError::NotFound(format!("pods \"{}\" not found", name)));
		};

		if state.external_writes > 0 {
			state.external_writes -= 1;
			let resource_version = state.next_resource_version();
			state.pods[idx].metadata.resource_version = Some(resource_version);
		}

		if state.conflicts > 0 {
			state.conflicts -= 1;
			return Err(StoreError::Conflict("injected conflict".to_string()));
		}

		if pod.metadata.resource_version != state.pods[idx].metadata.resource_version {
			return Err(StoreError::Conflict(format!(
				"the object has been modified; please apply your changes to the latest version \
				 of pods \"{}\" and try again",
				name
			)));
		}

		let mut replaced = pod.clone();
		replaced.metadata.resource_version = Some(state.next_resource_version());
		state.pods[idx] = replaced.clone();
		Ok(replaced)
	}

	async fn delete(
		&self,
		name: &str,
		propagation: PropagationPolicy,
	) -> Result<Deletion, StoreError> {
		let mut state = self.state.lock().unwrap();
		state.calls.delete += 1;

		let Some(idx) = state.position(name) else {
			return Err(StoreError::NotFound(format!("pods \"{}\" not found", name)));
		};

		if matches!(propagation, PropagationPolicy::Foreground) && state.deletion_reads > 0 {
			let reads = state.deletion_reads;
			state.terminating.insert(name.to_string(), reads);
			return Ok(Deletion::Pending {
				uid: state.pods[idx].metadata.uid.clone(),
			});
		}

		state.pods.remove(idx);
		Ok(Deletion::Completed)
	}
}
