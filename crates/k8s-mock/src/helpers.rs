//! Helper functions for the mock Kubernetes API.

/// A parsed core (`/api/v1`) request path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApiPath {
	/// A collection, e.g. `/api/v1/namespaces/default/pods`.
	Collection(String),
	/// A single object inside a collection.
	Object { collection: String, name: String },
}

impl ApiPath {
	/// Parse a core API path.
	///
	/// Examples:
	/// - `/api/v1/namespaces/default/pods` -> collection `/api/v1/namespaces/default/pods`
	/// - `/api/v1/namespaces/default/pods/nginx` -> object `nginx` in `/api/v1/namespaces/default/pods`
	/// - `/api/v1/namespaces/default` -> object `default` in `/api/v1/namespaces`
	pub fn parse(path: &str) -> Option<Self> {
		let rest = path.trim_end_matches('/').strip_prefix("/api/v1/")?;
		let segments: Vec<&str> = rest.split('/').collect();

		let (collection_len, name) = match segments.as_slice() {
			["namespaces"] | ["namespaces", _, _] | [_] => (segments.len(), None),
			["namespaces", _, _, name] => (3, Some(*name)),
			[_, name] => (1, Some(*name)),
			_ => return None,
		};

		let collection = format!("/api/v1/{}", segments[..collection_len].join("/"));
		Some(match name {
			Some(name) => Self::Object {
				collection,
				name: name.to_string(),
			},
			None => Self::Collection(collection),
		})
	}
}

/// Namespace segment of a namespaced collection path, if any.
pub fn namespace_of(collection: &str) -> Option<&str> {
	let rest = collection.strip_prefix("/api/v1/namespaces/")?;
	rest.split_once('/').map(|(ns, _)| ns)
}

/// Whether an object's labels satisfy a selector.
///
/// Only equality terms (`key=value`, `key==value`, `key!=value`) are understood;
/// any other term matches nothing.
pub fn matches_labels(object: &serde_json::Value, selector: &str) -> bool {
	let labels = object.pointer("/metadata/labels");
	let label = |key: &str| labels.and_then(|l| l.get(key)).and_then(|v| v.as_str());

	selector
		.split(',')
		.map(str::trim)
		.filter(|term| !term.is_empty())
		.all(|term| {
			if let Some((key, value)) = term.split_once("!=") {
				label(key.trim()) != Some(value.trim())
			} else if let Some((key, value)) = term.split_once('=') {
				let value = value.strip_prefix('=').unwrap_or(value);
				label(key.trim()) == Some(value.trim())
			} else {
				false
			}
		})
}

/// A `Status` body describing a failed request.
pub fn status_failure(code: u16, reason: &str, message: impl Into<String>) -> serde_json::Value {
	serde_json::json!({
		"kind": "Status",
		"apiVersion": "v1",
		"metadata": {},
		"status": "Failure",
		"message": message.into(),
		"reason": reason,
		"code": code
	})
}

/// A `Status` body reporting a completed deletion.
pub fn status_deleted(name: &str, kind: &str) -> serde_json::Value {
	serde_json::json!({
		"kind": "Status",
		"apiVersion": "v1",
		"metadata": {},
		"status": "Success",
		"message": "",
		"reason": "",
		"code": 200,
		"details": {
			"name": name,
			"kind": kind
		}
	})
}
