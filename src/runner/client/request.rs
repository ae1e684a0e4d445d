use crate::config::{ClientConfig, Credentials};
use crate::k8s_types::K8sType;
use crate::resource::ObjectIdRef;
use crate::runner::client::Error;

use http::{header, Method, Request};
use hyper::Body;
use serde_json::Value;
use url::Url;

const IMPERSONATE_USER: &str = "Impersonate-User";
const IMPERSONATE_GROUP: &str = "Impersonate-Group";
const STRATEGIC_MERGE_PATCH: &str = "application/strategic-merge-patch+json";

pub fn get_request(
    client_config: &ClientConfig,
    k8s_type: &K8sType,
    id: &ObjectIdRef<'_>,
) -> Result<Request<Body>, Error> {
    let url = make_url(client_config, k8s_type, id.namespace(), Some(id.name()))?;
    let req = make_req(url, Method::GET, client_config).body(Body::empty())?;
    Ok(req)
}

pub fn create_request(
    client_config: &ClientConfig,
    k8s_type: &K8sType,
    namespace: Option<&str>,
    resource: &Value,
) -> Result<Request<Body>, Error> {
    let url = make_url(client_config, k8s_type, namespace, None)?;
    let as_vec = serde_json::to_vec(resource)?;
    let req = make_req(url, Method::POST, client_config)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(as_vec))?;
    Ok(req)
}

pub fn patch_request(
    client_config: &ClientConfig,
    k8s_type: &K8sType,
    id: &ObjectIdRef<'_>,
    patch: &Value,
) -> Result<Request<Body>, Error> {
    let url = make_url(client_config, k8s_type, id.namespace(), Some(id.name()))?;
    let body = serde_json::to_vec(patch)?;
    let req = make_req(url, Method::PATCH, client_config)
        .header(header::CONTENT_TYPE, STRATEGIC_MERGE_PATCH)
        .body(Body::from(body))?;
    Ok(req)
}

pub fn delete_request(
    client_config: &ClientConfig,
    k8s_type: &K8sType,
    id: &ObjectIdRef<'_>,
) -> Result<Request<Body>, Error> {
    let url = make_url(client_config, k8s_type, id.namespace(), Some(id.name()))?;
    let req = make_req(url, Method::DELETE, client_config).body(Body::empty())?;
    Ok(req)
}

fn make_req(url: Url, method: Method, client_config: &ClientConfig) -> http::request::Builder {
    let mut builder = Request::builder()
        .method(method)
        .uri(String::from(url))
        .header(header::ACCEPT, "application/json")
        .header(header::USER_AGENT, client_config.user_agent.as_str());
    if let Credentials::Header(ref value) = client_config.credentials {
        builder = builder.header(header::AUTHORIZATION, value.as_str());
    }
    if let Some(user) = client_config.impersonate.as_ref() {
        builder = builder.header(IMPERSONATE_USER, user.as_str());
    }
    for group in client_config.impersonate_groups.iter() {
        builder = builder.header(IMPERSONATE_GROUP, group.as_str());
    }
    builder
}

pub(crate) fn make_url(
    client_config: &ClientConfig,
    k8s_type: &K8sType,
    namespace: Option<&str>,
    name: Option<&str>,
) -> Result<Url, Error> {
    let mut url = Url::parse(client_config.api_server_endpoint.as_str())
        .map_err(|err| Error::InvalidUrl(err.to_string()))?;
    {
        let mut segments = url.path_segments_mut().map_err(|_| {
            Error::InvalidUrl(format!(
                "api server endpoint '{}' cannot be used as a base url",
                client_config.api_server_endpoint
            ))
        })?;
        // an endpoint with a trailing slash would otherwise leave an empty segment
        segments.pop_if_empty();

        let group = k8s_type.group();
        if group.is_empty() {
            segments.push("api");
        } else {
            segments.push("apis");
            segments.push(group);
        }
        segments.push(k8s_type.version());
        if let Some(ns) = namespace {
            segments.push("namespaces");
            segments.push(ns);
        }
        segments.push(k8s_type.plural_kind);

        if let Some(n) = name {
            segments.push(n);
        }
    }
    Ok(url)
}
