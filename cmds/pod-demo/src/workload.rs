//! Pod descriptor construction.

use std::{collections::BTreeMap, fmt, str::FromStr};

use k8s_openapi::{
	api::core::v1::{Container, ContainerPort, Pod, PodSpec},
	apimachinery::pkg::apis::meta::v1::ObjectMeta,
};

const CONTAINER_NAME: &str = "web";
const PORT_NAME: &str = "http";

/// Inputs for the demo pod.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkloadSpec {
	pub name: String,
	pub image: String,
	pub port: i32,
}

impl Default for WorkloadSpec {
	fn default() -> Self {
		Self {
			name: "nginx".to_string(),
			image: "nginx:1.12".to_string(),
			port: 80,
		}
	}
}

impl WorkloadSpec {
	/// Build a pod with a single container exposing the port over TCP.
	pub fn build(&self) -> Pod {
		Pod {
			metadata: ObjectMeta {
				name: Some(self.name.clone()),
				..ObjectMeta::default()
			},
			spec: Some(PodSpec {
				containers: vec![Container {
					name: CONTAINER_NAME.to_string(),
					image: Some(self.image.clone()),
					ports: Some(vec![ContainerPort {
						name: Some(PORT_NAME.to_string()),
						protocol: Some("TCP".to_string()),
						container_port: self.port,
						..ContainerPort::default()
					}]),
					..Container::default()
				}],
				..PodSpec::default()
			}),
			..Pod::default()
		}
	}
}

/// A single `key=value` annotation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Annotation {
	pub key: String,
	pub value: String,
}

impl Annotation {
	pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
		Self {
			key: key.into(),
			value: value.into(),
		}
	}

	/// Set this annotation on a pod, leaving other annotations untouched.
	pub fn apply(&self, pod: &mut Pod) {
		pod.metadata
			.annotations
			.get_or_insert_with(BTreeMap::new)
			.insert(self.key.clone(), self.value.clone());
	}
}

impl Default for Annotation {
	fn default() -> Self {
		Self::new("app", "gpu-scheduler")
	}
}

impl FromStr for Annotation {
	type Err = String;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s.split_once('=') {
			Some((key, value)) if !key.is_empty() => Ok(Self::new(key, value)),
			_ => Err(format!("invalid annotation `{}`, expected key=value", s)),
		}
	}
}

impl fmt::Display for Annotation {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}={}", self.key, self.value)
	}
}
