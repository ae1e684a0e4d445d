//! The application descriptor, which is the unit of deployment intent. A descriptor is embedded
//! in the data of a deployment goal, and it drives a single deploy pass.
use serde_json::Value;

use std::fmt::{self, Display};

/// The key in the goal data json object that holds the descriptor
pub const GOAL_DATA_KEY: &str = "@atomist/sdm-pack-k8s";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Http,
    Https,
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Http => "http",
            Protocol::Https => "https",
        }
    }
}

/// Partial override documents for the RBAC resources of an application. A role is only created
/// when `role_spec` is present.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RbacSpecs {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role_spec: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service_account_spec: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role_binding_spec: Option<Value>,
}

/// Everything needed to render and apply the resources of an application. The override documents
/// (`ingress_spec` and the `rbac` specs) are kept as raw json, since they are partial documents
/// that are only given a type when they're merged into a template.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct KubernetesApplication {
    pub workspace_id: String,
    pub environment: String,
    pub name: String,
    pub ns: String,
    pub image: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub protocol: Option<Protocol>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tls_secret: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ingress_spec: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rbac: Option<RbacSpecs>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub component: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instance: Option<String>,
    pub sdm_fulfiller: String,
}

/// An externally reachable url for a deployed application
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalUrl {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    pub url: String,
}

#[derive(Debug)]
pub enum InvalidApplicationError {
    MissingField(&'static str),
    Json(serde_json::Error),
}

impl Display for InvalidApplicationError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            InvalidApplicationError::MissingField(field) => {
                write!(f, "missing required field '{}'", field)
            }
            InvalidApplicationError::Json(err) => write!(f, "{}", err),
        }
    }
}

impl std::error::Error for InvalidApplicationError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            InvalidApplicationError::Json(err) => Some(err),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for InvalidApplicationError {
    fn from(err: serde_json::Error) -> InvalidApplicationError {
        InvalidApplicationError::Json(err)
    }
}

impl KubernetesApplication {
    /// Parses the descriptor out of the goal data json string. Returns `Ok(None)` if the data
    /// does not contain a descriptor at all, and an error if it's present but invalid.
    pub fn from_goal_data(data: &str) -> Result<Option<KubernetesApplication>, InvalidApplicationError> {
        let parsed: Value = serde_json::from_str(data)?;
        let app_value = match parsed.get(GOAL_DATA_KEY) {
            None | Some(Value::Null) => return Ok(None),
            Some(value) => value.clone(),
        };
        let app: KubernetesApplication = serde_json::from_value(app_value)?;
        Ok(Some(app))
    }

    /// Ensures that the fields that identify the application are present
    pub fn validate(&self) -> Result<(), InvalidApplicationError> {
        let required = [
            ("name", &self.name),
            ("ns", &self.ns),
            ("workspaceId", &self.workspace_id),
        ];
        for (field, value) in required.iter() {
            if value.is_empty() {
                return Err(InvalidApplicationError::MissingField(*field));
            }
        }
        Ok(())
    }

    /// A short identifier used in log messages, in the form `namespace/name`
    pub fn slug(&self) -> String {
        format!("{}/{}", self.ns, self.name)
    }

    /// The ingress path. An empty path is the same as no path.
    pub fn ingress_path(&self) -> Option<&str> {
        non_empty(self.path.as_deref())
    }

    pub fn ingress_host(&self) -> Option<&str> {
        non_empty(self.host.as_deref())
    }

    pub fn tls_secret_name(&self) -> Option<&str> {
        non_empty(self.tls_secret.as_deref())
    }

    /// The url where the application is reachable through its ingress. This is only known if the
    /// application has both a path and a host. The protocol defaults to https when a tls secret is
    /// configured, and http otherwise.
    pub fn external_url(&self) -> Option<ExternalUrl> {
        let path = self.ingress_path()?;
        let host = self.ingress_host()?;
        let protocol = self.protocol.unwrap_or_else(|| {
            if self.tls_secret_name().is_some() {
                Protocol::Https
            } else {
                Protocol::Http
            }
        });
        let path = if path.starts_with('/') {
            path.to_owned()
        } else {
            format!("/{}", path)
        };
        let path = if path.ends_with('/') {
            path
        } else {
            format!("{}/", path)
        };
        Some(ExternalUrl {
            label: Some(self.name.clone()),
            url: format!("{}://{}{}", protocol.as_str(), host, path),
        })
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.is_empty())
}
