//! Interactive demo sequence.
//!
//! Lists pods in the namespace, creates the demo pod when missing, updates it
//! through the conflict-retry loop and finally deletes it, pausing for the
//! operator between the phases.

use std::{
	io::{BufRead, Write},
	time::Duration,
};

use k8s_openapi::api::core::v1::Pod;
use kube::api::PropagationPolicy;
use tokio::time::Instant;
use tracing::{debug, info, instrument};

use crate::{
	config::DemoConfig,
	error::DemoError,
	k8s::{
		client::ClusterConnection,
		retry::{retry_on_conflict, Backoff, UpdateOutcome},
		store::{Deletion, KubePodStore, PodStore, StoreError},
	},
	prompt::wait_for_ack,
	workload::{Annotation, WorkloadSpec},
};

/// Polling schedule while a foreground deletion completes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeletionWait {
	pub poll_interval: Duration,
	pub timeout: Duration,
}

impl Default for DeletionWait {
	fn default() -> Self {
		Self {
			poll_interval: Duration::from_millis(500),
			timeout: Duration::from_secs(60),
		}
	}
}

/// What the driver does, independent of how it reaches the cluster.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
	pub workload: WorkloadSpec,
	pub annotation: Annotation,
	pub selector: Option<String>,
	pub backoff: Backoff,
	pub deletion: DeletionWait,
	/// Wait for operator acknowledgment between phases.
	pub pause: bool,
}

/// Result of a completed demo run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DemoSummary {
	/// List index of the pod when it already existed.
	pub existing_index: Option<usize>,
	/// Attempts the update loop needed.
	pub update_attempts: u32,
}

/// Index of the first pod named `name`.
pub fn find_pod(pods: &[Pod], name: &str) -> Option<usize> {
	pods.iter()
		.position(|pod| pod.metadata.name.as_deref() == Some(name))
}

/// Delete a pod with foreground propagation and wait until it is gone.
///
/// Returns only once the store no longer has the pod, or has a pod of the
/// same name with a different UID (re-created by a controller). Fails with
/// [`DemoError::DeleteTimeout`] when that takes longer than `wait.timeout`.
#[instrument(skip(store, wait), fields(namespace = %store.namespace()))]
pub async fn delete_and_wait<S: PodStore>(
	store: &S,
	name: &str,
	wait: &DeletionWait,
) -> Result<(), DemoError> {
	let delete_failed = |source| DemoError::Delete {
		name: name.to_string(),
		source,
	};

	let deleted_uid = match store
		.delete(name, PropagationPolicy::Foreground)
		.await
		.map_err(delete_failed)?
	{
		Deletion::Completed => return Ok(()),
		Deletion::Pending { uid } => uid,
	};

	let deadline = Instant::now() + wait.timeout;
	loop {
		tokio::time::sleep(wait.poll_interval).await;
		match store.get(name).await {
			Err(StoreError::NotFound(_)) => return Ok(()),
			Ok(pod) if deleted_uid.is_some() && pod.metadata.uid != deleted_uid => {
				debug!(uid = ?pod.metadata.uid, "pod was re-created");
				return Ok(());
			}
			Ok(_) if Instant::now() >= deadline => {
				return Err(DemoError::DeleteTimeout {
					name: name.to_string(),
					timeout: wait.timeout,
				});
			}
			Ok(_) => debug!("pod still terminating"),
			Err(source) => return Err(delete_failed(source)),
		}
	}
}

/// Runs the demo phases against a [`PodStore`].
pub struct Driver<S> {
	store: S,
	options: RunOptions,
}

impl<S: PodStore> Driver<S> {
	pub fn new(store: S, options: RunOptions) -> Self {
		Self { store, options }
	}

	pub fn store(&self) -> &S {
		&self.store
	}

	/// Run all phases, reading acknowledgments from `input` and writing
	/// progress to `output`.
	pub async fn run<R: BufRead, W: Write>(
		&self,
		mut input: R,
		mut output: W,
	) -> Result<DemoSummary, DemoError> {
		self.pause(&mut input, &mut output)?;
		let existing_index = self.ensure_exists(&mut output).await?;

		self.pause(&mut input, &mut output)?;
		let outcome = self.update(&mut output).await?;

		self.pause(&mut input, &mut output)?;
		self.delete(&mut output).await?;

		Ok(DemoSummary {
			existing_index,
			update_attempts: outcome.attempts,
		})
	}

	fn pause<R: BufRead, W: Write>(&self, input: &mut R, output: &mut W) -> Result<(), DemoError> {
		if self.options.pause {
			wait_for_ack(input, output)?;
		}
		Ok(())
	}

	/// List the namespace and create the pod if it is not there yet.
	///
	/// Returns the list index of the pod when it already existed. A pod that
	/// exists but is filtered out of the list is reused as well, with no index.
	async fn ensure_exists<W: Write>(&self, output: &mut W) -> Result<Option<usize>, DemoError> {
		let namespace = self.store.namespace();
		let name = &self.options.workload.name;

		writeln!(output, "Listing pods in namespace {:?}:", namespace)?;
		let pods = self
			.store
			.list(self.options.selector.as_deref())
			.await
			.map_err(|source| DemoError::List {
				namespace: namespace.to_string(),
				source,
			})?;

		for (idx, pod) in pods.iter().enumerate() {
			writeln!(
				output,
				"{}, {:?}, {:?}",
				idx,
				pod.metadata.name.as_deref().unwrap_or_default(),
				pod.metadata.namespace.as_deref().unwrap_or_default()
			)?;
		}

		if let Some(idx) = find_pod(&pods, name) {
			writeln!(output, "Pod {:?} exists.", name)?;
			return Ok(Some(idx));
		}

		writeln!(output, "Pod {:?} does not exist, creating it...", name)?;
		match self.store.create(&self.options.workload.build()).await {
			Ok(created) => {
				let created_name = created.metadata.name.as_deref().unwrap_or(name);
				info!(name = %created_name, "created pod");
				writeln!(output, "Created pod {:?}.", created_name)?;
			}
			// Hidden from the list by the selector, but present
			Err(StoreError::Conflict(message)) => {
				info!(%name, %message, "pod already exists");
				writeln!(output, "Pod {:?} already exists.", name)?;
			}
			Err(source) => {
				return Err(DemoError::Create {
					name: name.clone(),
					source,
				});
			}
		}

		Ok(None)
	}

	async fn update<W: Write>(&self, output: &mut W) -> Result<UpdateOutcome, DemoError> {
		let annotation = &self.options.annotation;
		writeln!(output, "Updating pod...")?;

		let outcome = retry_on_conflict(
			&self.store,
			&self.options.workload.name,
			&self.options.backoff,
			|pod| annotation.apply(pod),
		)
		.await?;

		info!(attempts = outcome.attempts, %annotation, "updated pod");
		writeln!(
			output,
			"Updated pod after {} attempt(s).",
			outcome.attempts
		)?;
		Ok(outcome)
	}

	async fn delete<W: Write>(&self, output: &mut W) -> Result<(), DemoError> {
		writeln!(output, "Deleting pod...")?;
		delete_and_wait(
			&self.store,
			&self.options.workload.name,
			&self.options.deletion,
		)
		.await?;
		writeln!(output, "Deleted pod.")?;
		Ok(())
	}
}

/// Connect to the cluster described by `config` and run the demo.
pub async fn run_demo<R: BufRead, W: Write>(
	config: DemoConfig,
	input: R,
	output: W,
) -> Result<DemoSummary, DemoError> {
	let connection =
		ClusterConnection::connect(&config.kubeconfig, config.context.as_deref()).await?;
	info!(
		cluster = %connection.cluster_identifier(),
		version = %connection.server_version().git_version,
		"connected to cluster"
	);

	let store = KubePodStore::new(connection.client().clone(), &config.namespace);
	Driver::new(store, config.run).run(input, output).await
}
