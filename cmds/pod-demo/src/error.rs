//! Errors that abort a demo run.

use std::{io, time::Duration};

use thiserror::Error;

use crate::k8s::{client::ConnectionError, retry::RetryError, store::StoreError};

/// Any failure of a demo run. None of these are recovered from; the only
/// locally handled failure is a write conflict inside the update loop.
#[derive(Debug, Error)]
pub enum DemoError {
	#[error(transparent)]
	Connection(#[from] ConnectionError),

	#[error("listing pods in namespace {namespace:?}")]
	List {
		namespace: String,
		#[source]
		source: StoreError,
	},

	#[error("creating pod {name:?}")]
	Create {
		name: String,
		#[source]
		source: StoreError,
	},

	#[error(transparent)]
	Update(#[from] RetryError),

	#[error("deleting pod {name:?}")]
	Delete {
		name: String,
		#[source]
		source: StoreError,
	},

	#[error("pod {name:?} was still terminating after {timeout:?}")]
	DeleteTimeout { name: String, timeout: Duration },

	#[error("reading operator input")]
	InputRead(#[source] io::Error),

	#[error("writing output")]
	Output(#[from] io::Error),
}
