//! HTTP-based mock Kubernetes server using wiremock.
//!
//! This provides a real HTTP server that can be used with kubeconfig-based
//! connections. It keeps a small in-memory object store for the core API and
//! implements the optimistic-concurrency and deletion semantics clients rely on.

use std::{
	collections::{BTreeMap, HashMap},
	sync::{Arc, RwLock},
};

use bon::Builder;
use kube::config::{
	AuthInfo, Cluster, Context, Kubeconfig, NamedAuthInfo, NamedCluster, NamedContext,
};
use tracing::{debug, trace};
use wiremock::{
	matchers::{method, path, path_regex},
	Mock, MockServer, Request, ResponseTemplate,
};

use super::helpers::{matches_labels, namespace_of, status_deleted, status_failure, ApiPath};

/// Key of a stored object: (collection path, name).
type ObjectKey = (String, String);

/// Mutable cluster state shared between the mounted responders.
#[derive(Default)]
pub struct ClusterState {
	objects: BTreeMap<ObjectKey, serde_json::Value>,
	last_resource_version: u64,
	/// Replace requests still to be rejected with 409 regardless of version.
	pending_conflicts: u32,
	/// Objects under foreground deletion, with the number of reads that still see them.
	terminating: HashMap<ObjectKey, u32>,
	foreground_reads: u32,
}

/// Type alias for the shared mutable cluster state.
pub type SharedState = Arc<RwLock<ClusterState>>;

impl ClusterState {
	fn next_resource_version(&mut self) -> String {
		self.last_resource_version += 1;
		self.last_resource_version.to_string()
	}

	/// Read an object, advancing any pending foreground deletion.
	fn read(&mut self, key: &ObjectKey) -> Option<serde_json::Value> {
		if let Some(remaining) = self.terminating.get_mut(key) {
			if *remaining == 0 {
				self.terminating.remove(key);
				self.objects.remove(key);
				debug!(collection = %key.0, name = %key.1, "Foreground deletion completed");
				return None;
			}
			*remaining -= 1;
		}
		self.objects.get(key).cloned()
	}

	fn list(&self, collection: &str, selector: Option<&str>) -> Vec<serde_json::Value> {
		self.objects
			.iter()
			.filter(|((res_collection, _), _)| res_collection == collection)
			.filter(|(_, v)| selector.is_none_or(|selector| matches_labels(v, selector)))
			.map(|(_, v)| v.clone())
			.collect()
	}

	/// Store a manifest, stamping the server-owned metadata fields.
	fn admit(&mut self, collection: &str, name: &str, mut object: serde_json::Value) -> serde_json::Value {
		let resource_version = self.next_resource_version();
		if let Some(meta) = object
			.get_mut("metadata")
			.and_then(|m| m.as_object_mut())
		{
			meta.insert("resourceVersion".into(), resource_version.clone().into());
			meta.entry("uid")
				.or_insert_with(|| format!("mock-uid-{}", resource_version).into());
			meta.entry("creationTimestamp")
				.or_insert_with(|| "2024-01-01T00:00:00Z".into());
			if let Some(ns) = namespace_of(collection) {
				meta.insert("namespace".into(), ns.into());
			}
		}
		self.objects
			.insert((collection.to_string(), name.to_string()), object.clone());
		object
	}
}

/// A mock Kubernetes server exposed over HTTP.
#[derive(Builder)]
pub struct HttpMockK8sServer {
	/// Pod manifests to seed the store with. Other kinds are ignored.
	#[builder(default)]
	resources: Vec<serde_json::Value>,
	/// Number of replace requests answered with 409 Conflict before writes
	/// are accepted.
	#[builder(default)]
	update_conflicts: u32,
	/// Number of reads that still observe an object after a foreground delete.
	#[builder(default = 1)]
	foreground_reads: u32,
}

/// A running HTTP mock server instance.
pub struct RunningHttpMockK8sServer {
	server: MockServer,
	state: SharedState,
}

impl HttpMockK8sServer {
	/// Start the mock server with all configured resources.
	pub async fn start(self) -> RunningHttpMockK8sServer {
		let server = MockServer::start().await;

		debug!(uri = %server.uri(), "Started mock K8s server");

		let mut state = ClusterState {
			pending_conflicts: self.update_conflicts,
			foreground_reads: self.foreground_reads,
			..ClusterState::default()
		};

		for manifest in self.resources {
			if let Some((collection, name)) = collection_for_manifest(&manifest) {
				trace!(collection = %collection, name = %name, "Registered resource");
				state.admit(&collection, &name, manifest);
			}
		}

		let shared_state = Arc::new(RwLock::new(state));

		mount_version(&server).await;
		mount_resources(&server, &shared_state).await;

		RunningHttpMockK8sServer {
			server,
			state: shared_state,
		}
	}
}

/// Derive the collection path for a pod manifest.
fn collection_for_manifest(manifest: &serde_json::Value) -> Option<(String, String)> {
	if manifest.get("apiVersion")?.as_str()? != "v1" || manifest.get("kind")?.as_str()? != "Pod" {
		return None;
	}
	let name = manifest.pointer("/metadata/name")?.as_str()?.to_string();
	let namespace = manifest
		.pointer("/metadata/namespace")
		.and_then(|n| n.as_str())
		.unwrap_or("default");

	Some((format!("/api/v1/namespaces/{}/pods", namespace), name))
}

impl RunningHttpMockK8sServer {
	/// Get the server's URI (e.g., "http://127.0.0.1:12345").
	pub fn uri(&self) -> String {
		self.server.uri()
	}

	/// Create a Kubeconfig pointing to this mock server.
	pub fn kubeconfig(&self) -> Kubeconfig {
		self.kubeconfig_with_context("mock-context")
	}

	/// Create a Kubeconfig pointing to this mock server with a custom context name.
	pub fn kubeconfig_with_context(&self, context_name: &str) -> Kubeconfig {
		let cluster_name = "mock-cluster";
		let user_name = "mock-user";

		Kubeconfig {
			clusters: vec![NamedCluster {
				name: cluster_name.to_string(),
				cluster: Some(Cluster {
					server: Some(self.uri()),
					insecure_skip_tls_verify: Some(true),
					..Default::default()
				}),
			}],
			contexts: vec![NamedContext {
				name: context_name.to_string(),
				context: Some(Context {
					cluster: cluster_name.to_string(),
					user: Some(user_name.to_string()),
					namespace: Some("default".to_string()),
					..Default::default()
				}),
			}],
			auth_infos: vec![NamedAuthInfo {
				name: user_name.to_string(),
				auth_info: Some(AuthInfo::default()),
			}],
			current_context: Some(context_name.to_string()),
			..Default::default()
		}
	}

	/// Look at a stored namespaced object without advancing pending deletions.
	pub fn object(&self, namespace: &str, plural: &str, name: &str) -> Option<serde_json::Value> {
		let key = (
			format!("/api/v1/namespaces/{}/{}", namespace, plural),
			name.to_string(),
		);
		self.state.read().unwrap().objects.get(&key).cloned()
	}

	/// Whether a namespaced object is currently under foreground deletion.
	pub fn is_terminating(&self, namespace: &str, plural: &str, name: &str) -> bool {
		let key = (
			format!("/api/v1/namespaces/{}/{}", namespace, plural),
			name.to_string(),
		);
		self.state.read().unwrap().terminating.contains_key(&key)
	}

	/// Injected conflicts not yet consumed by replace requests.
	pub fn pending_conflicts(&self) -> u32 {
		self.state.read().unwrap().pending_conflicts
	}

	/// Count requests received with the given HTTP method against the core API.
	pub async fn request_count(&self, http_method: &str) -> usize {
		self.server
			.received_requests()
			.await
			.unwrap_or_default()
			.iter()
			.filter(|req| {
				req.method.as_str() == http_method && req.url.path().starts_with("/api/v1/")
			})
			.count()
	}
}

async fn mount_version(server: &MockServer) {
	Mock::given(method("GET"))
		.and(path("/version"))
		.respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
			"major": "1",
			"minor": "28",
			"gitVersion": "v1.28.0",
			"gitCommit": "fake",
			"gitTreeState": "clean",
			"buildDate": "2024-01-01T00:00:00Z",
			"goVersion": "go1.21.0",
			"compiler": "gc",
			"platform": "linux/amd64"
		})))
		.mount(server)
		.await;
}

fn not_found(name: &str) -> ResponseTemplate {
	ResponseTemplate::new(404).set_body_json(status_failure(
		404,
		"NotFound",
		format!("\"{}\" not found", name),
	))
}

fn plural_of(collection: &str) -> &str {
	collection.rsplit('/').next().unwrap_or(collection)
}

async fn mount_resources(server: &MockServer, state: &SharedState) {
	let get_state = Arc::clone(state);
	let post_state = Arc::clone(state);
	let put_state = Arc::clone(state);
	let delete_state = Arc::clone(state);

	// GET - single object or collection LIST
	Mock::given(method("GET"))
		.and(path_regex(r"^/api/v1/.*"))
		.respond_with(move |req: &Request| {
			let mut state = get_state.write().unwrap();

			match ApiPath::parse(req.url.path()) {
				Some(ApiPath::Object { collection, name }) => {
					match state.read(&(collection, name.clone())) {
						Some(object) => ResponseTemplate::new(200).set_body_json(object),
						None => not_found(&name),
					}
				}
				Some(ApiPath::Collection(collection)) => {
					let selector = req
						.url
						.query_pairs()
						.find(|(key, _)| key == "labelSelector")
						.map(|(_, value)| value.into_owned());
					let items = state.list(&collection, selector.as_deref());
					let resource_version = state.last_resource_version.to_string();
					ResponseTemplate::new(200).set_body_json(serde_json::json!({
						"kind": "List",
						"apiVersion": "v1",
						"metadata": {"resourceVersion": resource_version},
						"items": items
					}))
				}
				None => not_found(req.url.path()),
			}
		})
		.mount(server)
		.await;

	// POST for create - reject duplicates
	Mock::given(method("POST"))
		.and(path_regex(r"^/api/v1/.*"))
		.respond_with(move |req: &Request| {
			let Some(ApiPath::Collection(collection)) = ApiPath::parse(req.url.path()) else {
				return ResponseTemplate::new(405).set_body_json(status_failure(
					405,
					"MethodNotAllowed",
					"create is only allowed on collections",
				));
			};

			let body: serde_json::Value =
				serde_json::from_slice(&req.body).unwrap_or(serde_json::Value::Null);
			let name = body
				.pointer("/metadata/name")
				.and_then(|v| v.as_str())
				.unwrap_or("")
				.to_string();

			if name.is_empty() {
				return ResponseTemplate::new(422).set_body_json(status_failure(
					422,
					"Invalid",
					"metadata.name: Required value",
				));
			}

			let mut state = post_state.write().unwrap();
			if state.objects.contains_key(&(collection.clone(), name.clone())) {
				return ResponseTemplate::new(409).set_body_json(status_failure(
					409,
					"AlreadyExists",
					format!("{} \"{}\" already exists", plural_of(&collection), name),
				));
			}

			let created = state.admit(&collection, &name, body);
			debug!(collection = %collection, name = %name, "Created resource");
			ResponseTemplate::new(201).set_body_json(created)
		})
		.mount(server)
		.await;

	// PUT for replace - optimistic concurrency on metadata.resourceVersion
	Mock::given(method("PUT"))
		.and(path_regex(r"^/api/v1/.*"))
		.respond_with(move |req: &Request| {
			let Some(ApiPath::Object { collection, name }) = ApiPath::parse(req.url.path()) else {
				return not_found(req.url.path());
			};

			let body: serde_json::Value =
				serde_json::from_slice(&req.body).unwrap_or(serde_json::Value::Null);

			let mut state = put_state.write().unwrap();
			let key = (collection.clone(), name.clone());
			let Some(current) = state.objects.get(&key) else {
				return not_found(&name);
			};

			let current_version = current
				.pointer("/metadata/resourceVersion")
				.and_then(|v| v.as_str())
				.map(str::to_string);
			let submitted_version = body
				.pointer("/metadata/resourceVersion")
				.and_then(|v| v.as_str());
			let stale = submitted_version.is_some_and(|v| Some(v) != current_version.as_deref());

			if state.pending_conflicts > 0 || stale {
				state.pending_conflicts = state.pending_conflicts.saturating_sub(1);
				debug!(collection = %collection, name = %name, stale, "Rejecting replace with conflict");
				return ResponseTemplate::new(409).set_body_json(status_failure(
					409,
					"Conflict",
					format!(
						"Operation cannot be fulfilled on {} \"{}\": the object has been modified; \
						 please apply your changes to the latest version and try again",
						plural_of(&collection),
						name
					),
				));
			}

			let replaced = state.admit(&collection, &name, body);
			ResponseTemplate::new(200).set_body_json(replaced)
		})
		.mount(server)
		.await;

	// DELETE - foreground propagation defers removal
	Mock::given(method("DELETE"))
		.and(path_regex(r"^/api/v1/.*"))
		.respond_with(move |req: &Request| {
			let Some(ApiPath::Object { collection, name }) = ApiPath::parse(req.url.path()) else {
				return not_found(req.url.path());
			};

			let options: serde_json::Value =
				serde_json::from_slice(&req.body).unwrap_or(serde_json::Value::Null);
			let foreground = options
				.get("propagationPolicy")
				.and_then(|v| v.as_str())
				== Some("Foreground");

			let mut state = delete_state.write().unwrap();
			let key = (collection.clone(), name.clone());
			if !state.objects.contains_key(&key) {
				return not_found(&name);
			}

			if !foreground {
				state.objects.remove(&key);
				state.terminating.remove(&key);
				return ResponseTemplate::new(200)
					.set_body_json(status_deleted(&name, plural_of(&collection)));
			}

			let reads = state.foreground_reads;
			state.terminating.entry(key.clone()).or_insert(reads);
			let Some(object) = state.objects.get_mut(&key) else {
				return not_found(&name);
			};
			if let Some(meta) = object.get_mut("metadata").and_then(|m| m.as_object_mut()) {
				meta.insert("deletionTimestamp".into(), "2024-01-01T00:00:00Z".into());
				meta.insert(
					"finalizers".into(),
					serde_json::json!(["foregroundDeletion"]),
				);
			}
			debug!(collection = %collection, name = %name, reads, "Started foreground deletion");
			ResponseTemplate::new(200).set_body_json(object.clone())
		})
		.mount(server)
		.await;
}

#[cfg(test)]
mod tests {
	use assert_matches::assert_matches;
	use k8s_openapi::api::core::v1::Pod;
	use kube::{
		api::{Api, DeleteParams, ListParams, PostParams, PropagationPolicy},
		Client, Config,
	};

	use super::*;

	fn pod(name: &str, labels: serde_json::Value) -> serde_json::Value {
		serde_json::json!({
			"apiVersion": "v1",
			"kind": "Pod",
			"metadata": {"name": name, "namespace": "demo", "labels": labels}
		})
	}

	async fn pods(server: &RunningHttpMockK8sServer) -> Api<Pod> {
		let config = Config::from_custom_kubeconfig(server.kubeconfig(), &Default::default())
			.await
			.unwrap();
		Api::namespaced(Client::try_from(config).unwrap(), "demo")
	}

	#[tokio::test]
	async fn test_list_filters_by_label_selector() {
		let server = HttpMockK8sServer::builder()
			.resources(vec![
				pod("api", serde_json::json!({"app": "web"})),
				pod("db", serde_json::json!({"app": "db"})),
			])
			.build()
			.start()
			.await;
		let api = pods(&server).await;

		let names = |list: kube::core::ObjectList<Pod>| {
			list.items
				.into_iter()
				.filter_map(|p| p.metadata.name)
				.collect::<Vec<_>>()
		};
		let all = api.list(&ListParams::default()).await.unwrap();
		let web = api.list(&ListParams::default().labels("app=web")).await.unwrap();

		assert_eq!(names(all), vec!["api", "db"]);
		assert_eq!(names(web), vec!["api"]);
	}

	#[tokio::test]
	async fn test_create_existing_name_conflicts() {
		let server = HttpMockK8sServer::builder()
			.resources(vec![pod("api", serde_json::json!({}))])
			.build()
			.start()
			.await;
		let api = pods(&server).await;
		let manifest: Pod = serde_json::from_value(pod("api", serde_json::json!({}))).unwrap();

		let result = api.create(&PostParams::default(), &manifest).await;

		assert_matches!(result, Err(kube::Error::Api(status)) if status.code == 409);
	}

	#[tokio::test]
	async fn test_background_delete_removes_at_once() {
		let server = HttpMockK8sServer::builder()
			.resources(vec![pod("api", serde_json::json!({}))])
			.build()
			.start()
			.await;
		let api = pods(&server).await;
		let params = DeleteParams {
			propagation_policy: Some(PropagationPolicy::Background),
			..DeleteParams::default()
		};

		let response = api.delete("api", &params).await.unwrap();

		assert!(response.is_right());
		assert!(server.object("demo", "pods", "api").is_none());
		assert!(!server.is_terminating("demo", "pods", "api"));
	}

	#[tokio::test]
	async fn test_foreground_delete_marks_terminating() {
		let server = HttpMockK8sServer::builder()
			.resources(vec![pod("api", serde_json::json!({}))])
			.foreground_reads(1)
			.build()
			.start()
			.await;
		let api = pods(&server).await;
		let params = DeleteParams {
			propagation_policy: Some(PropagationPolicy::Foreground),
			..DeleteParams::default()
		};

		let response = api.delete("api", &params).await.unwrap();
		let terminating = response.left().expect("object while terminating");
		assert!(terminating.metadata.deletion_timestamp.is_some());

		assert!(api.get("api").await.is_ok());
		assert_matches!(
			api.get("api").await,
			Err(kube::Error::Api(status)) if status.code == 404
		);
		assert!(!server.is_terminating("demo", "pods", "api"));
	}
}
