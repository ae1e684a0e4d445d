//! Error types shared across the crate, and the normalizer that turns any failure into a stable
//! message for logs and goal descriptions.
//!
//! Failures arrive in many shapes: client errors carrying a Kubernetes `Status` body, native
//! errors, bare strings, arbitrary json. They are wrapped into a [`Failure`] as soon as they cross
//! a capability boundary, and [`err_msg`] resolves a `Failure` into a message using a fixed
//! precedence.
use serde_json::Value;

use std::any::Any;
use std::fmt::{self, Display};

/// Trait for errors that may be returned by the goal store or other collaborators. This just sets
/// up the trait bounds that are required, since we typically only expose rather opaque boxed error
/// types, and they need to be sent between threads.
pub trait DeployerError: std::error::Error + Send + Sync + 'static + Any {
    fn as_any(&self) -> &dyn Any;
}
impl<T> DeployerError for T
where
    T: std::error::Error + Send + Sync + 'static + Any,
{
    fn as_any(&self) -> &dyn Any {
        self
    }
}

pub type Error = Box<dyn DeployerError>;

impl dyn DeployerError {
    /// convenience function for downcasting the error to a concrete type
    pub fn as_type<T: DeployerError>(&self) -> Option<&T> {
        self.as_any().downcast_ref::<T>()
    }

    /// returns true if `as_type::<T>()` would return `Some`
    pub fn is_type<T: DeployerError>(&self) -> bool {
        self.as_any().is::<T>()
    }
}

impl<T> From<T> for Error
where
    T: DeployerError,
{
    fn from(e: T) -> Error {
        Box::new(e)
    }
}

/// A failure value in one of the shapes the normalizer knows about. Construct these at the point
/// where an error leaves a collaborator (see [`ToFailure`]) rather than passing raw errors around.
#[derive(Debug, Clone, PartialEq)]
pub enum Failure {
    /// There was no failure value at all
    Absent,
    /// An explicit null
    Null,
    /// An error returned by the Kubernetes api server, carrying the server's `Status` message
    Api { code: Option<u16>, message: String },
    /// A native error with a message
    Error(String),
    /// A bare string
    Text(String),
    /// Anything else. Rendered as json.
    Json(Value),
}

/// Returns the message for the given failure, or `None` if there is no message at all. This is
/// distinct from `Some("null")`, which is what an explicit null produces.
pub fn err_msg(failure: &Failure) -> Option<String> {
    match failure {
        Failure::Absent => None,
        Failure::Null => Some("null".to_owned()),
        Failure::Api { message, .. } => Some(message.clone()),
        Failure::Error(message) => Some(message.clone()),
        Failure::Text(text) => Some(text.clone()),
        Failure::Json(value) => Some(value.to_string()),
    }
}

impl Failure {
    /// Classifies a loosely typed failure value. `None` represents a missing value. The order of
    /// the checks matters: api client errors nest the server message under `response.body.message`,
    /// and that must win over any wrapper `message` on the same object.
    pub fn from_value(value: Option<&Value>) -> Failure {
        let value = match value {
            None => return Failure::Absent,
            Some(Value::Null) => return Failure::Null,
            Some(v) => v,
        };
        if let Some(message) = non_empty_str(value, "/response/body/message") {
            let code = value
                .pointer("/response/statusCode")
                .or_else(|| value.pointer("/response/body/code"))
                .and_then(Value::as_u64)
                .map(|c| c as u16);
            return Failure::Api {
                code,
                message: message.to_owned(),
            };
        }
        if let Some(message) = non_empty_str(value, "/message") {
            return Failure::Error(message.to_owned());
        }
        match value {
            Value::String(s) => Failure::Text(s.clone()),
            other => Failure::Json(other.clone()),
        }
    }

    /// Wraps any native error using its `Display` output as the message
    pub fn from_error<E: std::error::Error + ?Sized>(err: &E) -> Failure {
        Failure::Error(err.to_string())
    }

    pub fn message(&self) -> Option<String> {
        err_msg(self)
    }
}

fn non_empty_str<'a>(value: &'a Value, pointer: &str) -> Option<&'a str> {
    value
        .pointer(pointer)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
}

impl Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match err_msg(self) {
            Some(message) => f.write_str(message.as_str()),
            None => f.write_str("<no message>"),
        }
    }
}

impl From<Value> for Failure {
    fn from(value: Value) -> Failure {
        Failure::from_value(Some(&value))
    }
}

impl From<Option<Value>> for Failure {
    fn from(value: Option<Value>) -> Failure {
        Failure::from_value(value.as_ref())
    }
}

impl From<&str> for Failure {
    fn from(s: &str) -> Failure {
        Failure::Text(s.to_owned())
    }
}

impl From<String> for Failure {
    fn from(s: String) -> Failure {
        Failure::Text(s)
    }
}

/// Conversion into a `Failure` for errors that come back from collaborators
pub trait ToFailure {
    fn to_failure(&self) -> Failure;
}

impl ToFailure for Failure {
    fn to_failure(&self) -> Failure {
        self.clone()
    }
}

impl ToFailure for Error {
    fn to_failure(&self) -> Failure {
        Failure::Error(self.to_string())
    }
}

impl ToFailure for std::io::Error {
    fn to_failure(&self) -> Failure {
        Failure::from_error(self)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use serde_json::json;

    #[test]
    fn absent_value_has_no_message() {
        assert_eq!(None, err_msg(&Failure::from_value(None)));
    }

    #[test]
    fn null_is_rendered_as_the_string_null() {
        let failure = Failure::from(Value::Null);
        assert_eq!(Some("null".to_owned()), err_msg(&failure));
    }

    #[test]
    fn native_error_uses_its_message() {
        let err = std::io::Error::new(std::io::ErrorKind::Other, "Blitzen Trapper");
        assert_eq!(Some("Blitzen Trapper".to_owned()), err.to_failure().message());
    }

    #[test]
    fn kubernetes_api_error_uses_the_response_body_message() {
        let value = json!({
            "message": "HTTP request failed",
            "response": {
                "statusCode": 422,
                "body": {
                    "kind": "Status",
                    "apiVersion": "v1",
                    "status": "Failure",
                    "message": "Namespace \"local\" is invalid: metadata.labels: Invalid value",
                    "reason": "Invalid",
                    "code": 422,
                },
            },
            "body": {
                "message": "not this one",
            },
        });
        let failure = Failure::from(value);
        assert_eq!(
            Failure::Api {
                code: Some(422),
                message: "Namespace \"local\" is invalid: metadata.labels: Invalid value".to_owned(),
            },
            failure
        );
    }

    #[test]
    fn nested_response_message_is_returned_without_other_fields() {
        let value = json!({"response": {"body": {"message": "Blitzen Trapper"}}});
        assert_eq!(Some("Blitzen Trapper".to_owned()), Failure::from(value).message());
    }

    #[test]
    fn object_without_message_is_serialized() {
        let value = json!({"blitzenTrapper": "Furr"});
        let expected = serde_json::to_string(&value).unwrap();
        assert_eq!(Some(expected), Failure::from(value).message());
    }

    #[test]
    fn array_is_serialized() {
        let value = json!(["Blitzen", "Trapper", "Furr"]);
        assert_eq!(
            Some(r#"["Blitzen","Trapper","Furr"]"#.to_owned()),
            Failure::from(value).message()
        );
    }

    #[test]
    fn string_is_returned_unchanged() {
        assert_eq!(
            Some("Blitzen Trapper".to_owned()),
            Failure::from(json!("Blitzen Trapper")).message()
        );
        assert_eq!(
            Some("Blitzen Trapper".to_owned()),
            Failure::from("Blitzen Trapper").message()
        );
    }

    #[test]
    fn serialization_is_reproducible() {
        let value = json!({"b": [1, 2, {"c": null}], "a": "x"});
        let first = Failure::from(value.clone()).message();
        let second = Failure::from(value).message();
        assert_eq!(first, second);
    }

    #[test]
    fn display_marks_missing_message() {
        assert_eq!("<no message>", Failure::Absent.to_string());
    }

    #[test]
    fn boxed_errors_can_be_downcast() {
        let err: Error = Error::from(std::io::Error::new(std::io::ErrorKind::Other, "nope"));
        assert!(err.is_type::<std::io::Error>());
        assert_eq!(Some("nope".to_owned()), err.to_failure().message());
    }
}
