//! Configuration for the deployer itself (`DeployerConfig`) and for connecting to the Kubernetes
//! api server (`ClientConfig`).
mod kubeconfig;

pub use self::kubeconfig::{KubeConfig, KubeConfigError};

use crate::runner::reconcile::{ReadFailurePolicy, RetryPolicy};

use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

const SERVICE_ACCOUNT_TOKEN_PATH: &str = "/var/run/secrets/kubernetes.io/serviceaccount/token";
const SERVICE_ACCOUNT_CA_PATH: &str = "/var/run/secrets/kubernetes.io/serviceaccount/ca.crt";
const API_SERVER_HOSTNAME: &str = "kubernetes.default.svc";

/// Identifies a deployer instance, and determines which deployment goals it acts on and how it
/// applies resources.
///
/// ```rust
/// use k8s_deployer::config::DeployerConfig;
///
/// let config = DeployerConfig::new("@atomist/k8s-sdm_minikube", "production")
///     .manages_namespace("default")
///     .manages_namespace("production");
/// assert_eq!(2, config.namespaces.len());
/// assert!(config.is_managed_namespace("production"));
/// assert!(!config.is_managed_namespace("testing"));
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct DeployerConfig {
    /// The name of this deployer. Only goals whose fulfillment has this name are deployed.
    pub name: String,
    /// Only applications for this environment are deployed
    pub environment: String,
    /// The namespaces that this deployer manages. If this is empty, then all namespaces are
    /// managed.
    pub namespaces: Vec<String>,
    /// Used for applications that do not specify their own workspace id
    pub workspace_id: Option<String>,
    /// Retry policy applied to every create, patch, and delete call
    pub retry: RetryPolicy,
    /// How to interpret failures to read a resource before creating, patching, or deleting it
    pub read_failure_policy: ReadFailurePolicy,
}

impl DeployerConfig {
    pub fn new(name: impl Into<String>, environment: impl Into<String>) -> DeployerConfig {
        DeployerConfig {
            name: name.into(),
            environment: environment.into(),
            namespaces: Vec::new(),
            workspace_id: None,
            retry: RetryPolicy::default(),
            read_failure_policy: ReadFailurePolicy::default(),
        }
    }

    /// Adds a namespace to the set of managed namespaces. Once any namespace is added, then
    /// applications in other namespaces will not be deployed.
    pub fn manages_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespaces.push(namespace.into());
        self
    }

    pub fn with_workspace_id(mut self, workspace_id: impl Into<String>) -> Self {
        self.workspace_id = Some(workspace_id.into());
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_read_failure_policy(mut self, policy: ReadFailurePolicy) -> Self {
        self.read_failure_policy = policy;
        self
    }

    /// Returns true if this deployer manages the given namespace
    pub fn is_managed_namespace(&self, namespace: &str) -> bool {
        self.namespaces.is_empty() || self.namespaces.iter().any(|ns| ns == namespace)
    }
}

/// Configuration of the CA certificate that's used to verify the api server
#[derive(Debug, Clone, PartialEq)]
pub enum CAData {
    /// Base64 encoded PEM contents, as in `certificate-authority-data` in a kubeconfig
    Contents(String),
    /// Path to a PEM file
    File(String),
}

/// Credentials used to authenticate with the api server
#[derive(Debug, Clone, PartialEq)]
pub enum Credentials {
    /// The value of the `Authorization` header
    Header(String),
    /// Base64 encoded client certificate and private key
    Pem {
        certificate_base64: String,
        private_key_base64: String,
    },
    /// Paths to a PEM encoded client certificate and private key
    PemPath {
        certificate_path: String,
        private_key_path: String,
    },
}

impl Credentials {
    pub fn bearer_token(token: &str) -> Credentials {
        Credentials::Header(format!("Bearer {}", token.trim()))
    }

    pub fn basic(username: &str, password: &str) -> Credentials {
        let encoded = base64::encode(format!("{}:{}", username, password).as_bytes());
        Credentials::Header(format!("Basic {}", encoded))
    }

    /// Returns the `Authorization` header value, if these credentials use one
    pub fn header_value(&self) -> Option<&str> {
        match self {
            Credentials::Header(value) => Some(value.as_str()),
            _ => None,
        }
    }
}

/// Configuration for the client that talks to the Kubernetes api server
#[derive(Debug, Clone, PartialEq)]
pub struct ClientConfig {
    pub api_server_endpoint: String,
    pub credentials: Credentials,
    pub ca_data: Option<CAData>,
    pub verify_ssl_certs: bool,
    pub user_agent: String,
    pub impersonate: Option<String>,
    pub impersonate_groups: Vec<String>,
}

impl ClientConfig {
    /// Creates a configuration from the service account that's mounted into a pod
    pub fn from_service_account(user_agent: impl Into<String>) -> Result<ClientConfig, io::Error> {
        let mut token_file = File::open(SERVICE_ACCOUNT_TOKEN_PATH)?;
        let mut service_account_token = String::new();
        token_file.read_to_string(&mut service_account_token)?;

        let ca_data = if Path::new(SERVICE_ACCOUNT_CA_PATH).exists() {
            Some(CAData::File(SERVICE_ACCOUNT_CA_PATH.to_owned()))
        } else {
            None
        };

        Ok(ClientConfig {
            api_server_endpoint: format!("https://{}", API_SERVER_HOSTNAME),
            credentials: Credentials::bearer_token(&service_account_token),
            ca_data,
            verify_ssl_certs: true,
            user_agent: user_agent.into(),
            impersonate: None,
            impersonate_groups: Vec::new(),
        })
    }

    /// Creates a configuration from the kubeconfig file at `$KUBECONFIG`, or `~/.kube/config`
    pub fn from_kubeconfig(user_agent: impl Into<String>) -> Result<ClientConfig, KubeConfigError> {
        kubeconfig::load_from_kubeconfig(user_agent.into())
    }

    /// Tries the service account first, and falls back to the kubeconfig file
    pub fn load(user_agent: &str) -> anyhow::Result<ClientConfig> {
        match ClientConfig::from_service_account(user_agent) {
            Ok(config) => Ok(config),
            Err(err) => {
                log::debug!(
                    "Failed to load ClientConfig from service account, so trying to load from kubeconfig: {}",
                    err
                );
                let config = ClientConfig::from_kubeconfig(user_agent)?;
                Ok(config)
            }
        }
    }
}
