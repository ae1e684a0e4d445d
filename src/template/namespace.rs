use super::ObjectMeta;
use crate::application::KubernetesApplication;
use crate::k8s_types::core::v1;
use crate::labels::namespace_labels;
use crate::resource::JsonObject;

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Namespace {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    pub metadata: ObjectMeta,
    #[serde(flatten)]
    pub extra: JsonObject,
}

impl_merge!(Namespace {
    api_version,
    kind,
    metadata,
    extra
});
impl_template!(Namespace, v1::Namespace, "namespace");

/// The namespace that the application is deployed into. Namespaces may be shared by many
/// applications, so only the workspace and managed-by labels are applied.
pub fn namespace_template(app: &KubernetesApplication) -> Namespace {
    Namespace {
        api_version: Some(v1::Namespace.api_version.to_owned()),
        kind: Some(v1::Namespace.kind.to_owned()),
        metadata: ObjectMeta::new(app.ns.as_str(), namespace_labels(app)),
        ..Default::default()
    }
}
