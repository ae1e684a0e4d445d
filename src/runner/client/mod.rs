//! The http client for the Kubernetes api server, and the `ClusterApi` trait that the reconciler
//! uses to read and write resources. Tests substitute an in-memory `ClusterApi`.
mod request;

use crate::config::{CAData, ClientConfig, Credentials};
use crate::error::{Failure, ToFailure};
use crate::k8s_types::K8sType;
use crate::resource::ObjectIdRef;
use crate::runner::metrics::ClientMetrics;

use bytes::Buf;
use futures::future::{BoxFuture, FutureExt};
use http::{Request, Response, StatusCode};
use hyper::client::Client as HyperClient;
use hyper::client::HttpConnector;
use hyper::Body;
use hyper_openssl::HttpsConnector;
use openssl::pkey::PKey;
use openssl::ssl::{SslConnector, SslMethod};
use openssl::x509::X509;
use serde::de::DeserializeOwned;
use serde_json::Value;

use std::fs::File;
use std::io;
use std::io::Read;
use std::sync::Arc;
use std::time::Instant;

/// The operations the reconciler needs from a cluster. Every call addresses a single resource of
/// a known type. A `read` of a resource that doesn't exist must fail with an error for which
/// `is_not_found()` returns true.
pub trait ClusterApi: Send + Sync {
    fn read<'a>(
        &'a self,
        k8s_type: &'static K8sType,
        id: &'a ObjectIdRef<'a>,
    ) -> BoxFuture<'a, Result<Value, Error>>;

    fn create<'a>(
        &'a self,
        k8s_type: &'static K8sType,
        namespace: Option<&'a str>,
        resource: &'a Value,
    ) -> BoxFuture<'a, Result<Value, Error>>;

    /// Applies a strategic merge patch
    fn patch<'a>(
        &'a self,
        k8s_type: &'static K8sType,
        id: &'a ObjectIdRef<'a>,
        patch: &'a Value,
    ) -> BoxFuture<'a, Result<Value, Error>>;

    fn delete<'a>(
        &'a self,
        k8s_type: &'static K8sType,
        id: &'a ObjectIdRef<'a>,
    ) -> BoxFuture<'a, Result<(), Error>>;
}

#[derive(Debug)]
pub enum Error {
    Io(hyper::Error),
    Serde(serde_json::Error),
    Request(http::Error),
    InvalidUrl(String),
    /// A non-success response whose body wasn't a Kubernetes `Status`
    Http(StatusCode),
    /// A non-success response with a Kubernetes `Status` body
    Api(ApiError),
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e as &(dyn std::error::Error + 'static)),
            Error::Serde(e) => Some(e as &(dyn std::error::Error + 'static)),
            Error::Request(e) => Some(e as &(dyn std::error::Error + 'static)),
            Error::Api(e) => Some(e as &(dyn std::error::Error + 'static)),
            Error::InvalidUrl(_) | Error::Http(_) => None,
        }
    }
}

impl Error {
    pub fn http(status: StatusCode) -> Error {
        Error::Http(status)
    }

    pub fn is_not_found(&self) -> bool {
        self.is_http_status(404)
    }

    pub fn is_http_status(&self, code: u16) -> bool {
        self.status_code() == Some(code)
    }

    pub fn status_code(&self) -> Option<u16> {
        match self {
            Error::Http(ref status) => Some(status.as_u16()),
            Error::Api(ref api_error) => Some(api_error.code),
            _ => None,
        }
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match *self {
            Error::Io(ref e) => write!(f, "Io Error: {}", e),
            Error::Serde(ref e) => write!(f, "(De)Serialization error: {}", e),
            Error::Request(ref e) => write!(f, "Invalid request: {}", e),
            Error::InvalidUrl(ref e) => write!(f, "Invalid url: {}", e),
            Error::Http(ref e) => write!(f, "Http Error: {}", e),
            Error::Api(ref e) => write!(f, "{}", e),
        }
    }
}

impl From<hyper::Error> for Error {
    fn from(e: hyper::Error) -> Error {
        Error::Io(e)
    }
}
impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Error {
        Error::Serde(e)
    }
}
impl From<http::Error> for Error {
    fn from(e: http::Error) -> Error {
        Error::Request(e)
    }
}

impl ToFailure for Error {
    fn to_failure(&self) -> Failure {
        match self {
            Error::Api(api_error) if !api_error.message.is_empty() => Failure::Api {
                code: Some(api_error.code),
                message: api_error.message.clone(),
            },
            other => Failure::from_error(other),
        }
    }
}

impl From<Error> for Failure {
    fn from(e: Error) -> Failure {
        e.to_failure()
    }
}

#[derive(Debug)]
struct ClientInner {
    http_client: HyperClient<HttpsConnector<HttpConnector>>,
    config: ClientConfig,
    metrics: ClientMetrics,
}

#[derive(Debug, Clone)]
pub struct Client(Arc<ClientInner>);

impl Client {
    pub fn new(mut config: ClientConfig, metrics: ClientMetrics) -> Result<Client, io::Error> {
        let mut http = HttpConnector::new();
        http.enforce_http(false);

        let mut ssl = SslConnector::builder(SslMethod::tls())?;
        // enable http2 using alpn
        ssl.set_alpn_protos(b"\x02h2\x08http/1.1")?;
        match config.ca_data.take() {
            Some(CAData::Contents(certs)) => {
                // inline CA certs, as from a kubeconfig file, must be added to the cert store manually
                let decoded = decode_base64(&certs, "certificate-authority-data")?;
                let certs = X509::stack_from_pem(decoded.as_slice())?;
                let cert_store = ssl.cert_store_mut();
                for cert in certs {
                    cert_store.add_cert(cert)?;
                }
            }
            Some(CAData::File(path)) => {
                ssl.set_ca_file(path.as_str())?;
            }
            None => {}
        }

        let client_identity = match config.credentials {
            Credentials::PemPath {
                ref certificate_path,
                ref private_key_path,
            } => Some((read_file(certificate_path)?, read_file(private_key_path)?)),
            Credentials::Pem {
                ref certificate_base64,
                ref private_key_base64,
            } => Some((
                decode_base64(certificate_base64, "client-certificate-data")?,
                decode_base64(private_key_base64, "client-key-data")?,
            )),
            Credentials::Header(_) => None,
        };
        if let Some((cert, key)) = client_identity {
            let cert = X509::from_pem(cert.as_slice())?;
            let pkey = PKey::private_key_from_pem(key.as_slice())?;
            ssl.set_certificate(&*cert)?;
            ssl.set_private_key(&*pkey)?;
            // ensures that the private key and certificate actually go together
            ssl.check_private_key()?;
        }

        if config.verify_ssl_certs {
            ssl.set_verify(openssl::ssl::SslVerifyMode::PEER);
        } else {
            log::warn!("TLS Certificate verifification has been disabled! All connections to the Kubernetes api server will be insecure!");
            ssl.set_verify(openssl::ssl::SslVerifyMode::NONE);
        }

        let https = HttpsConnector::with_connector(http, ssl)?;
        let client = HyperClient::builder().build(https);

        let inner = ClientInner {
            http_client: client,
            config,
            metrics,
        };
        Ok(Client(Arc::new(inner)))
    }

    pub async fn get_resource(
        &self,
        k8s_type: &K8sType,
        id: &ObjectIdRef<'_>,
    ) -> Result<Value, Error> {
        let req = request::get_request(&self.0.config, k8s_type, id)?;
        self.get_response_body(req).await
    }

    pub async fn create_resource(
        &self,
        k8s_type: &K8sType,
        namespace: Option<&str>,
        resource: &Value,
    ) -> Result<Value, Error> {
        let req = request::create_request(&self.0.config, k8s_type, namespace, resource)?;
        self.get_response_body(req).await
    }

    pub async fn patch_resource(
        &self,
        k8s_type: &K8sType,
        id: &ObjectIdRef<'_>,
        patch: &Value,
    ) -> Result<Value, Error> {
        let req = request::patch_request(&self.0.config, k8s_type, id, patch)?;
        self.get_response_body(req).await
    }

    pub async fn delete_resource(
        &self,
        k8s_type: &K8sType,
        id: &ObjectIdRef<'_>,
    ) -> Result<(), Error> {
        log::info!("Deleting resource '{}' with type: {}", id, k8s_type);
        let req = request::delete_request(&self.0.config, k8s_type, id)?;
        let response = self.get_response(req).await?;

        match response.status().as_u16() {
            200..=299 | 404 | 409 => {
                // 404 means that something else already deleted the resource, and 409 means it's
                // already in the process of being deleted
                Ok(())
            }
            other => {
                log::error!(
                    "Delete request for {} : {} failed with status: {}",
                    k8s_type,
                    id,
                    other
                );
                Err(Client::error_from_response(response).await)
            }
        }
    }

    async fn get_response(&self, req: Request<Body>) -> Result<Response<Body>, Error> {
        let method = req.method().to_string();
        let uri = req.uri().to_string();
        let start_time = Instant::now();

        log::debug!("Starting {} request to: {}", method, uri);
        let timer = self.0.metrics.request_started();
        let result = self.0.http_client.request(req).await;
        timer.observe_duration();
        let duration = start_time.elapsed().as_millis();
        match result {
            Ok(resp) => {
                log::debug!(
                    "Response status received for {} to: {}, status: {}, duration: {}ms",
                    method,
                    uri,
                    resp.status().as_u16(),
                    duration
                );
                Ok(resp)
            }
            Err(err) => {
                log::error!(
                    "Failed to execute {} request to: {}, err: {}",
                    method,
                    uri,
                    err
                );
                Err(err.into())
            }
        }
    }

    async fn get_response_body<T: DeserializeOwned>(&self, req: Request<Body>) -> Result<T, Error> {
        let response = self.get_response(req).await?;
        if !response.status().is_success() {
            return Err(Client::error_from_response(response).await);
        }

        let deserialized = if log::log_enabled!(log::Level::Trace) {
            // reading the whole body into one buffer so that it can be logged before parsing
            let body = hyper::body::to_bytes(response.into_body()).await?;
            log::trace!("Got response body: {}", String::from_utf8_lossy(body.as_ref()));
            serde_json::from_slice(body.as_ref())?
        } else {
            let body = hyper::body::aggregate(response.into_body()).await?;
            serde_json::from_reader(body.reader())?
        };
        Ok(deserialized)
    }

    /// Turns a non-success response into an `Error`, using the `Status` body if there is one
    async fn error_from_response(response: Response<Body>) -> Error {
        let status = response.status();
        let body = match hyper::body::to_bytes(response.into_body()).await {
            Ok(body) => body,
            Err(err) => {
                log::warn!("Failed to read body of response with status: {}, err: {}", status, err);
                return Error::http(status);
            }
        };
        match serde_json::from_slice::<ApiError>(body.as_ref()) {
            Ok(api_error) => Error::Api(api_error),
            Err(_) => {
                log::error!(
                    "Response status: {}, body: {}",
                    status,
                    String::from_utf8_lossy(body.as_ref())
                );
                Error::http(status)
            }
        }
    }
}

impl ClusterApi for Client {
    fn read<'a>(
        &'a self,
        k8s_type: &'static K8sType,
        id: &'a ObjectIdRef<'a>,
    ) -> BoxFuture<'a, Result<Value, Error>> {
        self.get_resource(k8s_type, id).boxed()
    }

    fn create<'a>(
        &'a self,
        k8s_type: &'static K8sType,
        namespace: Option<&'a str>,
        resource: &'a Value,
    ) -> BoxFuture<'a, Result<Value, Error>> {
        self.create_resource(k8s_type, namespace, resource).boxed()
    }

    fn patch<'a>(
        &'a self,
        k8s_type: &'static K8sType,
        id: &'a ObjectIdRef<'a>,
        patch: &'a Value,
    ) -> BoxFuture<'a, Result<Value, Error>> {
        self.patch_resource(k8s_type, id, patch).boxed()
    }

    fn delete<'a>(
        &'a self,
        k8s_type: &'static K8sType,
        id: &'a ObjectIdRef<'a>,
    ) -> BoxFuture<'a, Result<(), Error>> {
        self.delete_resource(k8s_type, id).boxed()
    }
}

fn read_file(path: &str) -> Result<Vec<u8>, io::Error> {
    let mut file = File::open(path)?;
    let mut contents = Vec::new();
    file.read_to_end(&mut contents)?;
    Ok(contents)
}

fn decode_base64(contents: &str, field: &str) -> Result<Vec<u8>, io::Error> {
    base64::decode(contents).map_err(|err| {
        io::Error::new(
            io::ErrorKind::Other,
            format!("Invalid base64 content of {}: {}", field, err),
        )
    })
}

/// The `Status` object that the api server returns with error responses
#[derive(Deserialize, Serialize, Debug, Clone, Eq, PartialEq)]
pub struct ApiError {
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub reason: String,
    pub code: u16,
}

impl ApiError {
    pub fn not_found(k8s_type: &K8sType, name: &str) -> ApiError {
        ApiError {
            status: "Failure".to_owned(),
            message: format!("{} \"{}\" not found", k8s_type.plural_kind, name),
            reason: "NotFound".to_owned(),
            code: 404,
        }
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(
            f,
            "Api Error: status: '{}', code: {}, reason: '{}', message: '{}'",
            self.status, self.code, self.reason, self.message
        )
    }
}
impl std::error::Error for ApiError {}
