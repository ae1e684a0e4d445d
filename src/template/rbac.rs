use super::{merge_override, ObjectMeta, TemplateError, Template};
use crate::application::KubernetesApplication;
use crate::k8s_types::core::v1 as core_v1;
use crate::k8s_types::rbac_authorization_k8s_io::v1 as rbac_v1;
use crate::labels::application_labels;
use crate::resource::JsonObject;

const RBAC_API_GROUP: &str = "rbac.authorization.k8s.io";

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Role {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    pub metadata: ObjectMeta,
    pub rules: Vec<PolicyRule>,
    #[serde(flatten)]
    pub extra: JsonObject,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PolicyRule {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub api_groups: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub resources: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub resource_names: Vec<String>,
    pub verbs: Vec<String>,
    #[serde(flatten)]
    pub extra: JsonObject,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServiceAccount {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    pub metadata: ObjectMeta,
    #[serde(flatten)]
    pub extra: JsonObject,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RoleBinding {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    pub metadata: ObjectMeta,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role_ref: Option<RoleRef>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub subjects: Vec<Subject>,
    #[serde(flatten)]
    pub extra: JsonObject,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RoleRef {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_group: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(flatten)]
    pub extra: JsonObject,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Subject {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_group: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    #[serde(flatten)]
    pub extra: JsonObject,
}

impl_merge!(Role {
    api_version,
    kind,
    metadata,
    rules,
    extra
});
impl_merge!(PolicyRule {
    api_groups,
    resources,
    resource_names,
    verbs,
    extra
});
impl_merge!(ServiceAccount {
    api_version,
    kind,
    metadata,
    extra
});
impl_merge!(RoleBinding {
    api_version,
    kind,
    metadata,
    role_ref,
    subjects,
    extra
});
impl_merge!(RoleRef {
    api_group,
    kind,
    name,
    extra
});
impl_merge!(Subject {
    api_group,
    kind,
    name,
    namespace,
    extra
});

impl_template!(Role, rbac_v1::Role, "role");
impl_template!(ServiceAccount, core_v1::ServiceAccount, "service account");
impl_template!(RoleBinding, rbac_v1::RoleBinding, "role binding");

/// A role with no rules, merged with the application's `rbac.roleSpec`
pub fn role_template(app: &KubernetesApplication) -> Result<Role, TemplateError> {
    let role = Role {
        api_version: Some(rbac_v1::Role.api_version.to_owned()),
        kind: Some(rbac_v1::Role.kind.to_owned()),
        metadata: ObjectMeta::new(app.name.as_str(), application_labels(app)),
        ..Default::default()
    };
    let spec = app.rbac.as_ref().and_then(|rbac| rbac.role_spec.as_ref());
    merge_override(role, spec, "role")
}

/// A service account for the application, merged with the application's
/// `rbac.serviceAccountSpec`. The name of the service account may be overridden.
pub fn service_account_template(app: &KubernetesApplication) -> Result<ServiceAccount, TemplateError> {
    let service_account = ServiceAccount {
        api_version: Some(core_v1::ServiceAccount.api_version.to_owned()),
        kind: Some(core_v1::ServiceAccount.kind.to_owned()),
        metadata: ObjectMeta::new(app.name.as_str(), application_labels(app)),
        ..Default::default()
    };
    let spec = app
        .rbac
        .as_ref()
        .and_then(|rbac| rbac.service_account_spec.as_ref());
    merge_override(service_account, spec, "service account")
}

/// Binds the application's role to its service account. The references use the names of the
/// role and service account templates after their overrides have been applied.
pub fn role_binding_template(app: &KubernetesApplication) -> Result<RoleBinding, TemplateError> {
    let role = role_template(app)?;
    let service_account = service_account_template(app)?;

    let binding = RoleBinding {
        api_version: Some(rbac_v1::RoleBinding.api_version.to_owned()),
        kind: Some(rbac_v1::RoleBinding.kind.to_owned()),
        metadata: ObjectMeta::new(app.name.as_str(), application_labels(app)),
        role_ref: Some(RoleRef {
            api_group: Some(RBAC_API_GROUP.to_owned()),
            kind: Some(rbac_v1::Role.kind.to_owned()),
            name: Some(role.name().to_owned()),
            ..Default::default()
        }),
        subjects: vec![Subject {
            kind: Some(core_v1::ServiceAccount.kind.to_owned()),
            name: Some(service_account.name().to_owned()),
            ..Default::default()
        }],
        ..Default::default()
    };
    let spec = app
        .rbac
        .as_ref()
        .and_then(|rbac| rbac.role_binding_spec.as_ref());
    merge_override(binding, spec, "role binding")
}
