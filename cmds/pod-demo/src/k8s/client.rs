//! Kubernetes cluster connection management.

use std::time::Duration;

use k8s_openapi::apimachinery::pkg::version::Info;
use kube::{
	config::{InferConfigError, KubeConfigOptions, Kubeconfig, KubeconfigError},
	Client, Config,
};
use thiserror::Error;
use tracing::instrument;

use crate::config::KubeconfigSource;

/// Default timeout for Kubernetes API requests.
const DEFAULT_API_TIMEOUT: Duration = Duration::from_secs(30);

/// Errors that can occur when connecting to a Kubernetes cluster.
#[derive(Debug, Error)]
pub enum ConnectionError {
	#[error("no context named `{0}` was found. Please check your kubeconfig")]
	ContextNotFound(String),

	#[error("loading kubeconfig")]
	Kubeconfig(#[from] KubeconfigError),

	#[error("inferring cluster configuration")]
	Infer(#[from] InferConfigError),

	#[error("connecting to the API server")]
	Kube(#[from] kube::Error),
}

impl ConnectionError {
	/// Whether the failure happened before any request reached the cluster.
	pub fn is_config_load(&self) -> bool {
		!matches!(self, Self::Kube(_))
	}
}

/// Represents a connection to a Kubernetes cluster.
#[derive(Clone)]
pub struct ClusterConnection {
	client: Client,
	server_version: Info,
	/// Human-readable identifier for the cluster (context name or API server URL).
	cluster_identifier: String,
}

impl std::fmt::Debug for ClusterConnection {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("ClusterConnection")
			.field("cluster_identifier", &self.cluster_identifier)
			.field("server_version", &self.server_version)
			.finish_non_exhaustive()
	}
}

impl ClusterConnection {
	/// Connect using the resolved kubeconfig source.
	///
	/// Files are read as-is. Without a file, `kube` inference applies:
	/// `KUBECONFIG` first, then the in-cluster service account.
	#[instrument(skip_all)]
	pub async fn connect(
		source: &KubeconfigSource,
		context: Option<&str>,
	) -> Result<Self, ConnectionError> {
		match source {
			KubeconfigSource::Explicit(path) | KubeconfigSource::Default(path) => {
				tracing::debug!(path = %path.display(), "reading kubeconfig");
				let kubeconfig = Kubeconfig::read_from(path)?;
				Self::from_kubeconfig(kubeconfig, context).await
			}
			KubeconfigSource::Infer => {
				let config = match context {
					Some(context) => {
						Config::from_kubeconfig(&KubeConfigOptions {
							context: Some(context.to_string()),
							..Default::default()
						})
						.await?
					}
					None => Config::infer().await?,
				};
				let identifier = context.map_or_else(
					|| config.cluster_url.to_string(),
					|context| format!("context:{}", context),
				);
				Self::from_config(config, identifier).await
			}
		}
	}

	/// Connect using a provided kubeconfig, optionally overriding its current context.
	#[instrument(skip_all)]
	pub async fn from_kubeconfig(
		kubeconfig: Kubeconfig,
		context: Option<&str>,
	) -> Result<Self, ConnectionError> {
		let context_name = match context {
			Some(name) => {
				if !kubeconfig.contexts.iter().any(|c| c.name == name) {
					return Err(ConnectionError::ContextNotFound(name.to_string()));
				}
				Some(name.to_string())
			}
			None => kubeconfig.current_context.clone(),
		};

		tracing::debug!(context = ?context_name, "using kubeconfig context");

		let config = Config::from_custom_kubeconfig(
			kubeconfig,
			&KubeConfigOptions {
				context: context_name.clone(),
				..Default::default()
			},
		)
		.await?;

		let identifier = match context_name {
			Some(name) => format!("{} (context:{})", config.cluster_url, name),
			None => config.cluster_url.to_string(),
		};
		Self::from_config(config, identifier).await
	}

	async fn from_config(
		mut config: Config,
		cluster_identifier: String,
	) -> Result<Self, ConnectionError> {
		config.read_timeout = Some(DEFAULT_API_TIMEOUT);
		let client = Client::try_from(config)?;

		// Probe the API server before the demo starts issuing requests
		let server_version = client.apiserver_version().await?;

		Ok(Self {
			client,
			server_version,
			cluster_identifier,
		})
	}

	/// Get a reference to the underlying kube client.
	pub fn client(&self) -> &Client {
		&self.client
	}

	/// Get the server version.
	pub fn server_version(&self) -> &Info {
		&self.server_version
	}

	/// Get the cluster identifier (context name or API server URL).
	pub fn cluster_identifier(&self) -> &str {
		&self.cluster_identifier
	}
}
