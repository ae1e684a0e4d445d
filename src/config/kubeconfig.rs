use super::{CAData, ClientConfig, Credentials};

use dirs::home_dir;

use std::fmt::{self, Display};
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Command;

const MISSING_CREDENTIAL_MESSAGE: &str = "No supported credentials found in kubeconfig file for the current context. Supported mechanisms are token, username/password, client certificate, and exec";
const NO_HOME_DIR_MESSAGE: &str = "Unable to determine HOME directory to load ~/.kube/config";

/// Error loading a kubeconfig file, or creating a `ClientConfig` from one
#[derive(Debug)]
pub enum KubeConfigError {
    Io(io::Error),
    Format(serde_yaml::Error),
    MissingCredentials,
    NoHomeDir,
    InvalidKubeconfig(String),
    ExecErr(String),
}

impl From<serde_yaml::Error> for KubeConfigError {
    fn from(err: serde_yaml::Error) -> KubeConfigError {
        KubeConfigError::Format(err)
    }
}

impl From<io::Error> for KubeConfigError {
    fn from(err: io::Error) -> KubeConfigError {
        KubeConfigError::Io(err)
    }
}

impl Display for KubeConfigError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            KubeConfigError::Io(ref e) => write!(f, "IO error: {}", e),
            KubeConfigError::Format(ref e) => write!(f, "Kubeconfig format error: {}", e),
            KubeConfigError::MissingCredentials => f.write_str(MISSING_CREDENTIAL_MESSAGE),
            KubeConfigError::NoHomeDir => f.write_str(NO_HOME_DIR_MESSAGE),
            KubeConfigError::InvalidKubeconfig(ref msg) => {
                write!(f, "Invalid kubeconfig file: {}", msg)
            }
            KubeConfigError::ExecErr(ref msg) => write!(f, "exec error: {}", msg),
        }
    }
}

impl std::error::Error for KubeConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            KubeConfigError::Io(e) => Some(e),
            KubeConfigError::Format(e) => Some(e),
            _ => None,
        }
    }
}

fn kubeconfig_path() -> Result<PathBuf, KubeConfigError> {
    std::env::var("KUBECONFIG")
        .ok()
        .map(PathBuf::from)
        .or_else(|| home_dir().map(|home| home.join(".kube/config")))
        .ok_or(KubeConfigError::NoHomeDir)
}

pub(crate) fn load_kubeconfig(
    user_agent: String,
    file_path: impl AsRef<Path>,
) -> Result<ClientConfig, KubeConfigError> {
    let file_path = file_path.as_ref();
    let kubeconfig = KubeConfig::load_file(file_path)?;
    let dir = file_path.parent().ok_or_else(|| {
        KubeConfigError::InvalidKubeconfig(format!(
            "Cannot determine parent directory of kubeconfig file at path: '{}'",
            file_path.display()
        ))
    })?;
    kubeconfig.create_client_config(user_agent, dir)
}

pub(crate) fn load_from_kubeconfig(user_agent: String) -> Result<ClientConfig, KubeConfigError> {
    let path = kubeconfig_path()?;
    load_kubeconfig(user_agent, path)
}

// The structs below are only used for deserializing the kubeconfig. They are NOT complete
// definitions of the file format.

#[derive(Deserialize, Debug, PartialEq, Clone)]
#[serde(rename_all = "kebab-case")]
struct ClusterInfo {
    server: String,
    certificate_authority_data: Option<String>,
    certificate_authority: Option<PathBuf>,
    #[serde(default)]
    insecure_skip_tls_verify: bool,
}

#[derive(Deserialize, Debug, PartialEq, Clone)]
struct NamedCluster {
    name: String,
    cluster: ClusterInfo,
}

#[derive(Deserialize, Debug, PartialEq, Clone)]
#[serde(rename_all = "kebab-case")]
struct UserInfo {
    username: Option<String>,
    password: Option<String>,
    token: Option<String>,
    client_certificate_data: Option<String>,
    client_key_data: Option<String>,
    client_certificate: Option<String>,
    client_key: Option<String>,
    #[serde(rename = "as")]
    as_user: Option<String>,
    #[serde(default)]
    as_groups: Vec<String>,
    exec: Option<Exec>,
}

#[derive(Deserialize, Debug, PartialEq, Clone)]
struct ExecEnv {
    name: String,
    value: String,
}

#[derive(Deserialize, Debug, PartialEq, Clone)]
struct Exec {
    command: String,
    #[serde(default)]
    args: Vec<String>,
    #[serde(default)]
    env: Vec<ExecEnv>,
}

/// the output of an `exec` credential plugin
#[derive(Deserialize, Clone, Debug)]
struct ExecCredential {
    status: ExecCredentialStatus,
}

#[derive(Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
struct ExecCredentialStatus {
    token: String,
    expiration_timestamp: Option<String>,
}

#[derive(Deserialize, Debug, PartialEq, Clone)]
struct NamedUser {
    name: String,
    user: UserInfo,
}

#[derive(Deserialize, Debug, PartialEq, Clone)]
struct ContextInfo {
    cluster: String,
    user: String,
}

#[derive(Deserialize, Debug, PartialEq, Clone)]
struct NamedContext {
    name: String,
    context: ContextInfo,
}

impl UserInfo {
    fn credentials(&self) -> Result<Credentials, KubeConfigError> {
        if let Some(token) = self.token.as_ref() {
            log::debug!("Using auth token from kubeconfig");
            return Ok(Credentials::bearer_token(token));
        }
        if let Some(username) = self.username.as_ref() {
            let password = self.password.as_ref().ok_or_else(|| {
                KubeConfigError::InvalidKubeconfig(
                    "'username' is specified, but 'password' is missing".to_owned(),
                )
            })?;
            log::debug!("Using username/password from kubeconfig");
            return Ok(Credentials::basic(username, password));
        }
        if let Some(exec) = self.exec.as_ref() {
            return exec.token().map(|token| Credentials::bearer_token(&token));
        }
        if let Some(certificate_path) = self.client_certificate.as_ref() {
            let private_key_path = self.client_key.as_ref().ok_or_else(|| {
                KubeConfigError::InvalidKubeconfig(
                    "'client-certificate' is specified, but 'client-key' is missing".to_owned(),
                )
            })?;
            return Ok(Credentials::PemPath {
                certificate_path: certificate_path.clone(),
                private_key_path: private_key_path.clone(),
            });
        }
        if let Some(certificate) = self.client_certificate_data.as_ref() {
            let private_key = self.client_key_data.as_ref().ok_or_else(|| {
                KubeConfigError::InvalidKubeconfig(
                    "'client-certificate-data' is specified, but 'client-key-data' is missing"
                        .to_owned(),
                )
            })?;
            return Ok(Credentials::Pem {
                certificate_base64: certificate.clone(),
                private_key_base64: private_key.clone(),
            });
        }
        Err(KubeConfigError::MissingCredentials)
    }
}

impl Exec {
    fn token(&self) -> Result<String, KubeConfigError> {
        log::debug!("Getting credentials from: {:?}", self);
        let mut cmd = Command::new(self.command.as_str());
        cmd.args(self.args.iter());
        for var in self.env.iter() {
            cmd.env(var.name.as_str(), var.value.as_str());
        }

        let output = cmd.output()?;
        let credential: ExecCredential =
            serde_yaml::from_slice(output.stdout.as_slice()).map_err(|err| {
                KubeConfigError::ExecErr(format!(
                    "Invalid stdout from exec command: '{}' : err: {}",
                    self.command, err
                ))
            })?;
        log::info!(
            "Got token from command: '{}' with expiration: {:?}",
            self.command,
            credential.status.expiration_timestamp
        );
        Ok(credential.status.token)
    }
}

/// A kubeconfig file that's been loaded into memory
#[derive(Deserialize, Debug, PartialEq, Clone)]
#[serde(rename_all = "kebab-case")]
pub struct KubeConfig {
    current_context: String,
    clusters: Vec<NamedCluster>,
    users: Vec<NamedUser>,
    contexts: Vec<NamedContext>,
}

impl KubeConfig {
    /// Loads the kubeconfig from `$KUBECONFIG`, or `~/.kube/config` if that's not set. Returns
    /// the path that the file was loaded from along with the config.
    pub fn load() -> Result<(KubeConfig, PathBuf), KubeConfigError> {
        let path = kubeconfig_path()?;
        let conf = KubeConfig::load_file(&path)?;
        Ok((conf, path))
    }

    pub fn load_file(path: &Path) -> Result<KubeConfig, KubeConfigError> {
        let reader = File::open(path)?;
        let conf = serde_yaml::from_reader(reader)?;
        Ok(conf)
    }

    /// Creates a `ClientConfig` for the current context. Relative file paths in the kubeconfig,
    /// like paths to certificate files, are resolved against `kubeconfig_dir`.
    pub fn create_client_config(
        &self,
        user_agent: String,
        kubeconfig_dir: &Path,
    ) -> Result<ClientConfig, KubeConfigError> {
        let current_context = self.current_context.as_str();
        let context = self
            .contexts
            .iter()
            .find(|ctx| ctx.name == current_context)
            .ok_or_else(|| {
                KubeConfigError::InvalidKubeconfig(format!(
                    "No context found for current context: '{}'",
                    current_context
                ))
            })?;
        let cluster = self
            .clusters
            .iter()
            .find(|cluster| cluster.name == context.context.cluster)
            .ok_or_else(|| {
                KubeConfigError::InvalidKubeconfig(format!(
                    "No cluster found for name: '{}'",
                    context.context.cluster
                ))
            })?;
        let user = self
            .users
            .iter()
            .find(|user| user.name == context.context.user)
            .ok_or_else(|| {
                KubeConfigError::InvalidKubeconfig(format!(
                    "No user found for name: '{}'",
                    context.context.user
                ))
            })?;

        let credentials = user.user.credentials()?;
        let ca_data = cluster
            .cluster
            .certificate_authority_data
            .clone()
            .map(CAData::Contents)
            .or_else(|| {
                cluster.cluster.certificate_authority.as_ref().map(|ca_path| {
                    let resolved = kubeconfig_dir.join(ca_path).to_string_lossy().to_string();
                    log::debug!(
                        "Resolved cluster certificate-authority path '{}' to '{}'",
                        ca_path.display(),
                        resolved
                    );
                    CAData::File(resolved)
                })
            });

        Ok(ClientConfig {
            api_server_endpoint: cluster.cluster.server.clone(),
            credentials,
            ca_data,
            verify_ssl_certs: !cluster.cluster.insecure_skip_tls_verify,
            user_agent,
            impersonate: user.user.as_user.clone(),
            impersonate_groups: user.user.as_groups.clone(),
        })
    }
}
