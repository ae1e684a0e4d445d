use super::{merge_override, IntOrString, ObjectMeta, TemplateError};
use crate::application::KubernetesApplication;
use crate::k8s_types::extensions::v1beta1;
use crate::labels::application_labels;
use crate::resource::JsonObject;

/// An `extensions/v1beta1` Ingress
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Ingress {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    pub metadata: ObjectMeta,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub spec: Option<IngressSpec>,
    #[serde(flatten)]
    pub extra: JsonObject,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct IngressSpec {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backend: Option<IngressBackend>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub rules: Vec<IngressRule>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tls: Vec<IngressTls>,
    #[serde(flatten)]
    pub extra: JsonObject,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct IngressRule {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub http: Option<HttpIngressRuleValue>,
    #[serde(flatten)]
    pub extra: JsonObject,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HttpIngressRuleValue {
    pub paths: Vec<HttpIngressPath>,
    #[serde(flatten)]
    pub extra: JsonObject,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HttpIngressPath {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backend: Option<IngressBackend>,
    #[serde(flatten)]
    pub extra: JsonObject,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct IngressBackend {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service_port: Option<IntOrString>,
    #[serde(flatten)]
    pub extra: JsonObject,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct IngressTls {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub hosts: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secret_name: Option<String>,
    #[serde(flatten)]
    pub extra: JsonObject,
}

impl_merge!(Ingress {
    api_version,
    kind,
    metadata,
    spec,
    extra
});
impl_merge!(IngressSpec {
    backend,
    rules,
    tls,
    extra
});
impl_merge!(IngressRule { host, http, extra });
impl_merge!(HttpIngressRuleValue { paths, extra });
impl_merge!(HttpIngressPath {
    path,
    backend,
    extra
});
impl_merge!(IngressBackend {
    service_name,
    service_port,
    extra
});
impl_merge!(IngressTls {
    hosts,
    secret_name,
    extra
});
impl_template!(Ingress, v1beta1::Ingress, "ingress");

/// Creates the ingress for an application, with a single rule routing the application's path to
/// its service. Returns `None` if the application has no path, since then there's nothing to route.
/// The `ingress_spec` of the application is merged on top of the default.
pub fn ingress_template(app: &KubernetesApplication) -> Result<Option<Ingress>, TemplateError> {
    let path = match app.ingress_path() {
        Some(path) => path.to_owned(),
        None => return Ok(None),
    };
    let host = app.ingress_host().map(str::to_owned);

    let http_path = HttpIngressPath {
        path: Some(path),
        backend: Some(IngressBackend {
            service_name: Some(app.name.clone()),
            service_port: Some(IntOrString::from("http")),
            ..Default::default()
        }),
        ..Default::default()
    };
    let rule = IngressRule {
        host: host.clone(),
        http: Some(HttpIngressRuleValue {
            paths: vec![http_path],
            ..Default::default()
        }),
        ..Default::default()
    };
    let tls = app
        .tls_secret_name()
        .map(|secret| IngressTls {
            hosts: host.iter().cloned().collect(),
            secret_name: Some(secret.to_owned()),
            ..Default::default()
        })
        .into_iter()
        .collect();

    let ingress = Ingress {
        api_version: Some(v1beta1::Ingress.api_version.to_owned()),
        kind: Some(v1beta1::Ingress.kind.to_owned()),
        metadata: ObjectMeta::new(app.name.as_str(), application_labels(app)),
        spec: Some(IngressSpec {
            rules: vec![rule],
            tls,
            ..Default::default()
        }),
        ..Default::default()
    };
    merge_override(ingress, app.ingress_spec.as_ref(), "ingress").map(Some)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::template::Template;
    use serde_json::json;

    fn app() -> KubernetesApplication {
        KubernetesApplication {
            workspace_id: "KAT3BU5H".to_owned(),
            ns: "hounds-of-love".to_owned(),
            name: "cloudbusting".to_owned(),
            image: "gcr.io/kate-bush/hounds-of-love/cloudbusting:5.5.10".to_owned(),
            port: Some(5510),
            path: Some("/bush/kate/hounds-of-love/cloudbusting".to_owned()),
            sdm_fulfiller: "EMI".to_owned(),
            ..Default::default()
        }
    }

    fn render(app: &KubernetesApplication) -> serde_json::Value {
        ingress_template(app)
            .expect("failed to create template")
            .expect("no template created")
            .to_value()
            .expect("failed to serialize")
    }

    fn expected_labels() -> serde_json::Value {
        json!({
            "app.kubernetes.io/managed-by": "EMI",
            "app.kubernetes.io/name": "cloudbusting",
            "app.kubernetes.io/part-of": "cloudbusting",
            "atomist.com/workspaceId": "KAT3BU5H",
        })
    }

    #[test]
    fn creates_a_wildcard_ingress() {
        let expected = json!({
            "apiVersion": "extensions/v1beta1",
            "kind": "Ingress",
            "metadata": {
                "name": "cloudbusting",
                "labels": expected_labels(),
            },
            "spec": {
                "rules": [
                    {
                        "http": {
                            "paths": [
                                {
                                    "backend": {
                                        "serviceName": "cloudbusting",
                                        "servicePort": "http",
                                    },
                                    "path": "/bush/kate/hounds-of-love/cloudbusting",
                                },
                            ],
                        },
                    },
                ],
            },
        });
        assert_eq!(expected, render(&app()));
    }

    #[test]
    fn creates_a_host_ingress_with_tls() {
        let mut app = app();
        app.host = Some("emi.com".to_owned());
        app.tls_secret = Some("emi-com".to_owned());
        let actual = render(&app);

        assert_eq!(json!("emi.com"), actual["spec"]["rules"][0]["host"]);
        assert_eq!(
            json!([{"hosts": ["emi.com"], "secretName": "emi-com"}]),
            actual["spec"]["tls"]
        );
    }

    #[test]
    fn tls_without_host_has_no_hosts() {
        let mut app = app();
        app.tls_secret = Some("emi-com".to_owned());
        let actual = render(&app);
        assert_eq!(json!([{"secretName": "emi-com"}]), actual["spec"]["tls"]);
        assert!(actual["spec"]["rules"][0].get("host").is_none());
    }

    #[test]
    fn no_ingress_without_a_path() {
        let mut app = app();
        app.path = None;
        app.host = Some("emi.com".to_owned());
        assert!(ingress_template(&app).expect("should not fail").is_none());
    }

    #[test]
    fn no_ingress_with_an_empty_path() {
        let mut app = app();
        app.path = Some(String::new());
        assert!(ingress_template(&app).expect("should not fail").is_none());
    }

    #[test]
    fn empty_host_and_tls_secret_are_left_out() {
        let mut app = app();
        app.host = Some(String::new());
        app.tls_secret = Some(String::new());
        let ingress = ingress_template(&app).unwrap().unwrap();
        let actual = serde_json::to_value(&ingress).unwrap();
        assert!(actual["spec"]["rules"][0].get("host").is_none());
        assert!(actual["spec"].get("tls").is_none());

        app.tls_secret = Some("emi-com".to_owned());
        let actual = serde_json::to_value(&ingress_template(&app).unwrap().unwrap()).unwrap();
        assert_eq!(json!([{"secretName": "emi-com"}]), actual["spec"]["tls"]);
    }

    #[test]
    fn merges_in_provided_ingress_spec() {
        let mut app = app();
        app.host = Some("emi.com".to_owned());
        app.tls_secret = Some("emi-com".to_owned());
        app.ingress_spec = Some(json!({
            "metadata": {
                "annotations": {
                    "kubernetes.io/ingress.class": "nginx",
                    "nginx.ingress.kubernetes.io/client-body-buffer-size": "512k",
                    "nginx.ingress.kubernetes.io/limit-connections": "100",
                    "nginx.ingress.kubernetes.io/limit-rps": "25",
                    "nginx.ingress.kubernetes.io/rewrite-target": "/cb",
                },
            },
        }));
        let expected = json!({
            "apiVersion": "extensions/v1beta1",
            "kind": "Ingress",
            "metadata": {
                "annotations": {
                    "kubernetes.io/ingress.class": "nginx",
                    "nginx.ingress.kubernetes.io/rewrite-target": "/cb",
                    "nginx.ingress.kubernetes.io/client-body-buffer-size": "512k",
                    "nginx.ingress.kubernetes.io/limit-connections": "100",
                    "nginx.ingress.kubernetes.io/limit-rps": "25",
                },
                "labels": expected_labels(),
                "name": "cloudbusting",
            },
            "spec": {
                "rules": [
                    {
                        "host": "emi.com",
                        "http": {
                            "paths": [
                                {
                                    "backend": {
                                        "serviceName": "cloudbusting",
                                        "servicePort": "http",
                                    },
                                    "path": "/bush/kate/hounds-of-love/cloudbusting",
                                },
                            ],
                        },
                    },
                ],
                "tls": [
                    {
                        "hosts": ["emi.com"],
                        "secretName": "emi-com",
                    },
                ],
            },
        });
        assert_eq!(expected, render(&app));
    }

    #[test]
    fn override_leaf_values_win_and_lists_merge_positionally() {
        let mut app = app();
        app.ingress_spec = Some(json!({
            "spec": {
                "rules": [
                    {
                        "http": {
                            "paths": [
                                {"backend": {"servicePort": 8080}},
                                {"path": "/extra", "backend": {"serviceName": "other", "servicePort": "web"}},
                            ],
                        },
                    },
                ],
                "tls": [{"secretName": "override-secret"}],
            },
        }));
        let actual = render(&app);
        let paths = &actual["spec"]["rules"][0]["http"]["paths"];
        assert_eq!(
            json!({
                "path": "/bush/kate/hounds-of-love/cloudbusting",
                "backend": {"serviceName": "cloudbusting", "servicePort": 8080},
            }),
            paths[0]
        );
        assert_eq!(
            json!({"path": "/extra", "backend": {"serviceName": "other", "servicePort": "web"}}),
            paths[1]
        );
        assert_eq!(json!([{"secretName": "override-secret"}]), actual["spec"]["tls"]);
    }

    #[test]
    fn null_in_override_keeps_the_host() {
        let mut app = app();
        app.host = Some("emi.com".to_owned());
        app.ingress_spec = Some(json!({"spec": {"rules": [{"host": null}]}}));
        let actual = render(&app);
        assert_eq!(json!("emi.com"), actual["spec"]["rules"][0]["host"]);
    }

    #[test]
    fn unknown_override_fields_are_kept() {
        let mut app = app();
        app.ingress_spec = Some(json!({
            "spec": {
                "rules": [{"http": {"paths": [{"pathType": "Prefix"}]}}],
                "ingressClassName": "nginx",
            },
        }));
        let actual = render(&app);
        assert_eq!(json!("nginx"), actual["spec"]["ingressClassName"]);
        assert_eq!(
            json!("Prefix"),
            actual["spec"]["rules"][0]["http"]["paths"][0]["pathType"]
        );
    }

    #[test]
    fn malformed_override_is_an_error() {
        let mut app = app();
        app.ingress_spec = Some(json!({"spec": {"rules": "not-a-list"}}));
        assert!(ingress_template(&app).is_err());
    }

    #[test]
    fn template_generation_is_repeatable() {
        let mut app = app();
        app.host = Some("emi.com".to_owned());
        app.ingress_spec = Some(json!({"metadata": {"annotations": {"a": "b"}}}));
        assert_eq!(
            ingress_template(&app).unwrap(),
            ingress_template(&app).unwrap()
        );
    }

    #[test]
    fn end_to_end_ingress_without_host() {
        let app = KubernetesApplication {
            name: "cloudbusting".to_owned(),
            ns: "hounds-of-love".to_owned(),
            workspace_id: "KAT3BU5H".to_owned(),
            path: Some("/bush/kate".to_owned()),
            sdm_fulfiller: "EMI".to_owned(),
            ..Default::default()
        };
        let ingress = ingress_template(&app).unwrap().unwrap();
        assert_eq!("cloudbusting", ingress.name());
        assert_eq!(
            Some("EMI"),
            ingress
                .metadata
                .labels
                .get("app.kubernetes.io/managed-by")
                .map(String::as_str)
        );
        let spec = ingress.spec.expect("missing spec");
        assert_eq!(1, spec.rules.len());
        assert!(spec.rules[0].host.is_none());
        assert!(spec.tls.is_empty());
        let paths = &spec.rules[0].http.as_ref().unwrap().paths;
        assert_eq!(1, paths.len());
        assert_eq!(Some("/bush/kate".to_owned()), paths[0].path);
    }

    #[test]
    fn end_to_end_ingress_with_host_and_tls() {
        let app = KubernetesApplication {
            name: "cloudbusting".to_owned(),
            ns: "hounds-of-love".to_owned(),
            workspace_id: "KAT3BU5H".to_owned(),
            path: Some("/bush/kate".to_owned()),
            host: Some("emi.com".to_owned()),
            tls_secret: Some("emi-com".to_owned()),
            sdm_fulfiller: "EMI".to_owned(),
            ..Default::default()
        };
        let spec = ingress_template(&app).unwrap().unwrap().spec.unwrap();
        assert_eq!(Some("emi.com".to_owned()), spec.rules[0].host);
        assert_eq!(
            vec![IngressTls {
                hosts: vec!["emi.com".to_owned()],
                secret_name: Some("emi-com".to_owned()),
                ..Default::default()
            }],
            spec.tls
        );
    }
}
