//! Helpers for working with Kubernetes resources as raw json, as they're returned from the api
//! server.
pub mod object_id;

pub use self::object_id::{ObjectId, ObjectIdRef};

use serde_json::Value;

pub type JsonObject = serde_json::Map<String, Value>;
