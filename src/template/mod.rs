//! Templates for the Kubernetes resources that are created for an application.
//!
//! Each template is built from the application descriptor, and then an optional user supplied
//! override document is merged on top of it. Overrides are partial documents, so they're first
//! deserialized into the same typed struct as the template (which is why every field of a template
//! struct is optional or a collection), and then merged field by field using the `Merge` trait:
//!
//! - maps are merged key-wise, and the override wins on conflicts
//! - lists are merged positionally. An override list that's shorter than the default keeps the
//!   remaining default elements, and any extra override elements are appended.
//! - scalars are overwritten
//! - an explicit `null` for a modelled field is the same as leaving the field out, so the default
//!   is kept. Fields can't be removed from a template by an override.
//!
//! Fields that aren't modelled by the template structs are kept in a flattened `extra` object, and
//! are merged using the same rules, so no part of an override is ever dropped. Since those are
//! plain json, a `null` there does replace the default value. An override that has the wrong type
//! for a modelled field is an error.
pub use self::ingress::{
    ingress_template, HttpIngressPath, HttpIngressRuleValue, Ingress, IngressBackend, IngressRule,
    IngressSpec, IngressTls,
};
pub use self::namespace::{namespace_template, Namespace};
pub use self::rbac::{
    role_binding_template, role_template, service_account_template, PolicyRule, Role,
    RoleBinding, RoleRef, ServiceAccount, Subject,
};

use crate::k8s_types::K8sType;
use crate::labels::Labels;
use crate::resource::JsonObject;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use std::collections::BTreeMap;
use std::fmt::{self, Display};

/// Deep merge of an override value into `self`
pub trait Merge {
    fn merge(&mut self, other: Self);
}

macro_rules! merge_by_overwrite {
    ($($t:ty),*) => {
        $(
            impl Merge for $t {
                fn merge(&mut self, other: Self) {
                    *self = other;
                }
            }
        )*
    };
}

merge_by_overwrite!(String, bool, i32, i64, u16, IntOrString);

/// Implements `Merge` for a template struct by merging each of the listed fields
macro_rules! impl_merge {
    ($t:ty { $($field:ident),* }) => {
        impl crate::template::Merge for $t {
            fn merge(&mut self, other: Self) {
                $(
                    crate::template::Merge::merge(&mut self.$field, other.$field);
                )*
            }
        }
    };
}

/// `None` in the override leaves the current value as is. Serde deserializes both a missing field
/// and an explicit `null` as `None`.
impl<T: Merge> Merge for Option<T> {
    fn merge(&mut self, other: Self) {
        if let Some(other) = other {
            match self {
                Some(current) => current.merge(other),
                None => *self = Some(other),
            }
        }
    }
}

impl<T: Merge> Merge for Vec<T> {
    fn merge(&mut self, other: Self) {
        for (i, item) in other.into_iter().enumerate() {
            if i < self.len() {
                self[i].merge(item);
            } else {
                self.push(item);
            }
        }
    }
}

impl<V: Merge> Merge for BTreeMap<String, V> {
    fn merge(&mut self, other: Self) {
        for (key, value) in other {
            match self.get_mut(&key) {
                Some(current) => current.merge(value),
                None => {
                    self.insert(key, value);
                }
            }
        }
    }
}

impl Merge for JsonObject {
    fn merge(&mut self, other: Self) {
        for (key, value) in other {
            match self.get_mut(&key) {
                Some(current) => current.merge(value),
                None => {
                    self.insert(key, value);
                }
            }
        }
    }
}

impl Merge for Value {
    fn merge(&mut self, other: Self) {
        match (self, other) {
            (Value::Object(current), Value::Object(other)) => current.merge(other),
            (Value::Array(current), Value::Array(other)) => current.merge(other),
            (current, other) => *current = other,
        }
    }
}

/// A value that may be either a number or a string, like a port that may be given by name
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum IntOrString {
    Int(i32),
    String(String),
}

impl From<&str> for IntOrString {
    fn from(s: &str) -> IntOrString {
        IntOrString::String(s.to_owned())
    }
}

impl From<i32> for IntOrString {
    fn from(i: i32) -> IntOrString {
        IntOrString::Int(i)
    }
}

/// The subset of Kubernetes `ObjectMeta` that templates populate. Everything else, including
/// fields given in an override, is kept in `extra`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ObjectMeta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: Labels,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
    #[serde(flatten)]
    pub extra: JsonObject,
}

impl_merge!(ObjectMeta {
    name,
    namespace,
    labels,
    annotations,
    extra
});

impl ObjectMeta {
    pub fn new(name: impl Into<String>, labels: Labels) -> ObjectMeta {
        ObjectMeta {
            name: Some(name.into()),
            labels,
            ..Default::default()
        }
    }
}

#[derive(Debug)]
pub enum TemplateError {
    /// The override document for a template could not be interpreted
    InvalidOverride {
        kind: &'static str,
        source: serde_json::Error,
    },
    /// The template could not be serialized
    Serialize(serde_json::Error),
}

impl Display for TemplateError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            TemplateError::InvalidOverride { kind, source } => {
                write!(f, "Invalid {} spec: {}", kind, source)
            }
            TemplateError::Serialize(err) => write!(f, "Failed to serialize template: {}", err),
        }
    }
}

impl std::error::Error for TemplateError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            TemplateError::InvalidOverride { source, .. } => Some(source),
            TemplateError::Serialize(err) => Some(err),
        }
    }
}

/// Merges the given override document on top of the template. A missing or `null` override leaves
/// the template unchanged.
pub fn merge_override<T>(
    mut template: T,
    spec: Option<&Value>,
    kind: &'static str,
) -> Result<T, TemplateError>
where
    T: DeserializeOwned + Merge,
{
    match spec {
        None | Some(Value::Null) => Ok(template),
        Some(spec) => {
            let overrides: T = serde_json::from_value(spec.clone())
                .map_err(|source| TemplateError::InvalidOverride { kind, source })?;
            template.merge(overrides);
            Ok(template)
        }
    }
}

/// A rendered resource that can be applied to the cluster
pub trait Template: Serialize {
    /// The type of the resource
    fn k8s_type() -> &'static K8sType;

    /// Human readable name of the kind of resource, used in log messages
    fn label() -> &'static str;

    fn metadata(&self) -> &ObjectMeta;

    fn name(&self) -> &str {
        self.metadata().name.as_deref().unwrap_or_default()
    }

    fn to_value(&self) -> Result<Value, TemplateError> {
        serde_json::to_value(self).map_err(TemplateError::Serialize)
    }
}

/// Implements `Template` for a struct with a `metadata: ObjectMeta` field
macro_rules! impl_template {
    ($t:ty, $k8s_type:expr, $label:expr) => {
        impl crate::template::Template for $t {
            fn k8s_type() -> &'static crate::k8s_types::K8sType {
                $k8s_type
            }

            fn label() -> &'static str {
                $label
            }

            fn metadata(&self) -> &crate::template::ObjectMeta {
                &self.metadata
            }
        }
    };
}

mod ingress;
mod namespace;
mod rbac;
