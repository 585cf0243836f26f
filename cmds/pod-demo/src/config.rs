//! Command-line configuration.
//!
//! [`DemoArgs`] holds the raw flags; [`DemoArgs::into_config`] resolves them
//! into a [`DemoConfig`], picking the kubeconfig source along the way.

use std::{
	path::{Path, PathBuf},
	time::Duration,
};

use clap::Args;
use tracing::Level;

use crate::{
	driver::{DeletionWait, RunOptions},
	k8s::retry::Backoff,
	workload::{Annotation, WorkloadSpec},
};

#[derive(Args, Debug, Clone)]
pub struct DemoArgs {
	/// (optional) absolute path to the kubeconfig file. Defaults to ~/.kube/config when present
	#[arg(long)]
	pub kubeconfig: Option<PathBuf>,

	/// Kubeconfig context to use instead of the current context
	#[arg(long)]
	pub context: Option<String>,

	/// Namespace the demo pod lives in
	#[arg(short = 'n', long, default_value = "tkc-workload")]
	pub namespace: String,

	/// Name of the demo pod
	#[arg(long, default_value = "nginx")]
	pub pod_name: String,

	/// Container image of the demo pod
	#[arg(long, default_value = "nginx:1.12")]
	pub image: String,

	/// Container port exposed by the demo pod
	#[arg(long, default_value_t = 80)]
	pub port: i32,

	/// Annotation set by the update step (Format: key=value)
	#[arg(long, default_value = "app=gpu-scheduler")]
	pub annotation: Annotation,

	/// Label selector applied when listing pods
	#[arg(short = 'l', long)]
	pub selector: Option<String>,

	/// Maximum number of update attempts on write conflicts
	#[arg(long, default_value_t = 5)]
	pub update_attempts: u32,

	/// Seconds to wait for a foreground deletion to complete
	#[arg(long, default_value_t = 60)]
	pub delete_timeout: u64,

	/// Do not wait for the Return key between steps
	#[arg(long)]
	pub no_pause: bool,

	/// Log level (possible values: error, warn, info, debug, trace). Defaults to RUST_LOG, then info
	#[arg(long)]
	pub log_level: Option<Level>,
}

/// Where the cluster configuration comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KubeconfigSource {
	/// Path given on the command line.
	Explicit(PathBuf),
	/// The per-user kubeconfig, which exists on disk.
	Default(PathBuf),
	/// No file: fall back to `KUBECONFIG` and in-cluster configuration.
	Infer,
}

impl KubeconfigSource {
	/// Resolve the source from an optional explicit path and the user's home directory.
	pub fn resolve(explicit: Option<PathBuf>, home: Option<&Path>) -> Self {
		if let Some(path) = explicit {
			return Self::Explicit(path);
		}

		match home.map(|h| h.join(".kube").join("config")) {
			Some(path) if path.is_file() => Self::Default(path),
			_ => Self::Infer,
		}
	}
}

/// Fully resolved configuration of a demo run.
#[derive(Debug, Clone)]
pub struct DemoConfig {
	pub kubeconfig: KubeconfigSource,
	pub context: Option<String>,
	pub namespace: String,
	pub run: RunOptions,
}

impl DemoArgs {
	pub fn into_config(self) -> DemoConfig {
		let home = home::home_dir();
		DemoConfig {
			kubeconfig: KubeconfigSource::resolve(self.kubeconfig, home.as_deref()),
			context: self.context,
			namespace: self.namespace,
			run: RunOptions {
				workload: WorkloadSpec {
					name: self.pod_name,
					image: self.image,
					port: self.port,
				},
				annotation: self.annotation,
				selector: self.selector,
				backoff: Backoff {
					steps: self.update_attempts,
					..Backoff::default()
				},
				deletion: DeletionWait {
					timeout: Duration::from_secs(self.delete_timeout),
					..DeletionWait::default()
				},
				pause: !self.no_pause,
			},
		}
	}
}
