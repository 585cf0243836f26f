//! Kubernetes access for the demo.
//!
//! [`store::PodStore`] is the seam between the demo sequence and the API
//! server; [`retry`] builds the conflict-retry update on top of it.

pub mod client;
pub mod retry;
pub mod store;
