//! Optimistic-concurrency update loop.
//!
//! Each attempt fetches the latest copy of a pod, applies a mutation to it and
//! submits it back carrying the fetched `resourceVersion`. Only write
//! conflicts are retried, after an exponential backoff delay; every other
//! failure ends the loop.

use std::time::Duration;

use backoff::{backoff::Backoff as _, ExponentialBackoff};
use k8s_openapi::api::core::v1::Pod;
use thiserror::Error;
use tracing::{debug, instrument};

use super::store::{PodStore, StoreError};

/// Errors that end the update loop.
#[derive(Debug, Error)]
pub enum RetryError {
	#[error("failed to get latest version of pod {name:?}")]
	Fetch {
		name: String,
		#[source]
		source: StoreError,
	},

	#[error("pod {name:?} still conflicted after {attempts} attempt(s)")]
	ConflictExhausted { name: String, attempts: u32 },

	#[error("update of pod {name:?} was rejected")]
	Rejected {
		name: String,
		#[source]
		source: StoreError,
	},
}

/// Delay schedule between conflicting attempts.
#[derive(Debug, Clone, PartialEq)]
pub struct Backoff {
	/// Attempt budget, including the first attempt.
	pub steps: u32,
	/// Delay before the first retry.
	pub initial: Duration,
	/// Growth factor applied to each following delay.
	pub factor: f64,
	/// Upper bound for a single delay.
	pub cap: Duration,
}

impl Default for Backoff {
	fn default() -> Self {
		Self {
			steps: 5,
			initial: Duration::from_millis(10),
			factor: 2.0,
			cap: Duration::from_secs(1),
		}
	}
}

impl Backoff {
	/// Number of attempts the loop makes at most; never zero.
	pub fn attempts(&self) -> u32 {
		self.steps.max(1)
	}

	/// Exponential schedule without jitter or elapsed-time limit.
	///
	/// The factor is clamped to at least 1, so delays never decrease.
	fn schedule(&self) -> ExponentialBackoff {
		ExponentialBackoff {
			current_interval: self.initial,
			initial_interval: self.initial,
			randomization_factor: 0.0,
			multiplier: self.factor.max(1.0),
			max_interval: self.cap,
			max_elapsed_time: None,
			..ExponentialBackoff::default()
		}
	}

	/// Delays to wait before each retry, `attempts() - 1` of them, none
	/// longer than `cap`.
	pub fn delays(&self) -> impl Iterator<Item = Duration> {
		let cap = self.cap;
		let mut schedule = self.schedule();
		std::iter::from_fn(move || schedule.next_backoff())
			.take(usize::try_from(self.attempts() - 1).unwrap_or(usize::MAX))
			.map(move |delay| delay.min(cap))
	}
}

/// A successful run of the update loop.
#[derive(Debug, Clone)]
pub struct UpdateOutcome {
	/// The pod as accepted by the server.
	pub pod: Pod,
	/// Fetch/submit cycles performed, including the successful one.
	pub attempts: u32,
	/// Backoff delays waited between attempts, in order.
	pub delays: Vec<Duration>,
}

/// Apply `mutate` to the current server-side state of pod `name`, retrying on
/// write conflicts according to `backoff`.
#[instrument(skip(store, backoff, mutate), fields(namespace = %store.namespace()))]
pub async fn retry_on_conflict<S, F>(
	store: &S,
	name: &str,
	backoff: &Backoff,
	mut mutate: F,
) -> Result<UpdateOutcome, RetryError>
where
	S: PodStore,
	F: FnMut(&mut Pod),
{
	let attempts = backoff.attempts();
	let mut delays = backoff.delays();
	let mut waited = Vec::new();

	for attempt in 1..=attempts {
		let mut pod = store.get(name).await.map_err(|source| RetryError::Fetch {
			name: name.to_string(),
			source,
		})?;

		mutate(&mut pod);

		match store.replace(&pod).await {
			Ok(pod) => {
				debug!(attempt, "update accepted");
				return Ok(UpdateOutcome {
					pod,
					attempts: attempt,
					delays: waited,
				});
			}
			Err(StoreError::Conflict(message)) => {
				debug!(attempt, %message, "update conflicted");
				if let Some(delay) = delays.next() {
					tokio::time::sleep(delay).await;
					waited.push(delay);
				}
			}
			Err(source) => {
				return Err(RetryError::Rejected {
					name: name.to_string(),
					source,
				});
			}
		}
	}

	Err(RetryError::ConflictExhausted {
		name: name.to_string(),
		attempts,
	})
}
