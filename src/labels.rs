//! Canonical labels applied to every resource created for an application.
//!
//! `match_labels` is the minimal identity of an application, suitable for use in selectors.
//! `application_labels` adds the descriptive `app.kubernetes.io/*` labels on top, and is always a
//! superset of the match labels.
use crate::application::KubernetesApplication;

use lazy_static::lazy_static;
use regex::Regex;

use std::collections::BTreeMap;

pub const NAME_LABEL: &str = "app.kubernetes.io/name";
pub const PART_OF_LABEL: &str = "app.kubernetes.io/part-of";
pub const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";
pub const VERSION_LABEL: &str = "app.kubernetes.io/version";
pub const COMPONENT_LABEL: &str = "app.kubernetes.io/component";
pub const INSTANCE_LABEL: &str = "app.kubernetes.io/instance";
pub const WORKSPACE_ID_LABEL: &str = "atomist.com/workspaceId";

pub type Labels = BTreeMap<String, String>;

lazy_static! {
    static ref INVALID_CHARS: Regex = Regex::new("[^A-Za-z0-9_.-]+").unwrap();
    static ref NON_ALPHANUMERIC_ENDS: Regex =
        Regex::new("^[^A-Za-z0-9]+|[^A-Za-z0-9]+$").unwrap();
}

/// Converts an arbitrary string into a valid Kubernetes label value. Each run of characters that
/// are not allowed in label values is replaced by a single `_`, and any non-alphanumeric
/// characters at either end are removed. Never fails, and the empty string is a valid result.
pub fn safe_label_value(value: &str) -> String {
    let replaced = INVALID_CHARS.replace_all(value, "_");
    NON_ALPHANUMERIC_ENDS.replace_all(&replaced, "").into_owned()
}

/// Labels that identify the application, for use in selectors
pub fn match_labels(app: &KubernetesApplication) -> Labels {
    let mut labels = Labels::new();
    insert(&mut labels, NAME_LABEL, app.name.as_str());
    insert(&mut labels, WORKSPACE_ID_LABEL, app.workspace_id.as_str());
    labels
}

/// The full set of labels that is applied to the resources of an application
pub fn application_labels(app: &KubernetesApplication) -> Labels {
    let mut labels = match_labels(app);
    insert(&mut labels, PART_OF_LABEL, app.name.as_str());
    insert(&mut labels, MANAGED_BY_LABEL, app.sdm_fulfiller.as_str());

    let optional = [
        (VERSION_LABEL, app.version.as_ref()),
        (COMPONENT_LABEL, app.component.as_ref()),
        (INSTANCE_LABEL, app.instance.as_ref()),
    ];
    for (key, value) in optional.iter() {
        if let Some(value) = value {
            insert(&mut labels, key, value.as_str());
        }
    }
    labels
}

/// Labels applied to a namespace. Namespaces are shared between applications, so they only carry
/// the workspace and the managing deployer.
pub fn namespace_labels(app: &KubernetesApplication) -> Labels {
    let mut labels = Labels::new();
    insert(&mut labels, WORKSPACE_ID_LABEL, app.workspace_id.as_str());
    insert(&mut labels, MANAGED_BY_LABEL, app.sdm_fulfiller.as_str());
    labels
}

fn insert(labels: &mut Labels, key: &str, value: &str) {
    labels.insert(key.to_owned(), safe_label_value(value));
}
