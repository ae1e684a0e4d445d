//! The read-then-create-or-patch protocol for a single resource. Every create, patch, and delete
//! goes through the retry wrapper, and reads decide which of them to use.
pub mod retry;

pub use self::retry::{retry, BackoffConfig, RetryOutcome, RetryPolicy};

use crate::error::{Failure, ToFailure};
use crate::k8s_types::K8sType;
use crate::resource::ObjectIdRef;
use crate::runner::client::{self, ClusterApi};
use crate::runner::metrics::Metrics;
use crate::template::{Template, TemplateError};

use serde_json::Value;

use std::fmt::{self, Display};
use std::future::Future;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    Created,
    Patched,
    Deleted,
    NoOp,
}

impl Display for ReconcileOutcome {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            ReconcileOutcome::Created => "created",
            ReconcileOutcome::Patched => "patched",
            ReconcileOutcome::Deleted => "deleted",
            ReconcileOutcome::NoOp => "unchanged",
        };
        f.write_str(s)
    }
}

/// How to interpret a read that fails with something other than a not-found
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadFailurePolicy {
    /// Any failed read means the resource is absent. Upserts will try to create it, and deletes
    /// will do nothing.
    TreatAsAbsent,
    /// Only a not-found means the resource is absent. Any other read failure fails the pass.
    RequireNotFound,
}

impl Default for ReadFailurePolicy {
    fn default() -> ReadFailurePolicy {
        ReadFailurePolicy::TreatAsAbsent
    }
}

#[derive(Debug)]
pub enum ReconcileError {
    Template(TemplateError),
    Read {
        label: String,
        error: Failure,
    },
    Exhausted {
        label: String,
        attempts: u32,
        error: Failure,
    },
}

impl ReconcileError {
    /// The message that's reported for this failure
    pub fn reason(&self) -> String {
        match self {
            ReconcileError::Template(e) => e.to_string(),
            ReconcileError::Read { error, .. } | ReconcileError::Exhausted { error, .. } => {
                error.to_string()
            }
        }
    }
}

impl Display for ReconcileError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ReconcileError::Template(e) => write!(f, "Invalid template: {}", e),
            ReconcileError::Read { label, error } => write!(f, "Failed to {}: {}", label, error),
            ReconcileError::Exhausted {
                label,
                attempts,
                error,
            } => write!(f, "Failed to {} after {} attempts: {}", label, attempts, error),
        }
    }
}

impl std::error::Error for ReconcileError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ReconcileError::Template(e) => Some(e),
            _ => None,
        }
    }
}

impl From<TemplateError> for ReconcileError {
    fn from(e: TemplateError) -> ReconcileError {
        ReconcileError::Template(e)
    }
}

impl ToFailure for ReconcileError {
    fn to_failure(&self) -> Failure {
        match self {
            ReconcileError::Template(e) => Failure::from_error(e),
            ReconcileError::Read { error, .. } | ReconcileError::Exhausted { error, .. } => {
                error.clone()
            }
        }
    }
}

/// Applies templates to the cluster, one resource at a time
#[derive(Clone)]
pub struct Reconciler {
    client: Arc<dyn ClusterApi>,
    retry_policy: RetryPolicy,
    read_failure_policy: ReadFailurePolicy,
    metrics: Metrics,
}

impl fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Reconciler")
            .field("retry_policy", &self.retry_policy)
            .field("read_failure_policy", &self.read_failure_policy)
            .finish()
    }
}

impl Reconciler {
    pub fn new(
        client: Arc<dyn ClusterApi>,
        retry_policy: RetryPolicy,
        read_failure_policy: ReadFailurePolicy,
        metrics: Metrics,
    ) -> Reconciler {
        Reconciler {
            client,
            retry_policy,
            read_failure_policy,
            metrics,
        }
    }

    /// Creates the resource if it doesn't exist, and patches it with the template if it does
    pub async fn upsert<T: Template + Sync>(
        &self,
        template: &T,
        namespace: Option<&str>,
    ) -> Result<ReconcileOutcome, ReconcileError> {
        let k8s_type = T::k8s_type();
        let label = T::label();
        let id = ObjectIdRef::new(namespace.unwrap_or_default(), template.name());
        let spec = template.to_value()?;

        let existing = self.read_existing(k8s_type, label, &id).await?;
        if existing.is_none() {
            log::debug!("Creating {} {} using '{}'", label, id, spec);
            let op_label = format!("create {} {}", label, id);
            self.with_retry(k8s_type, &op_label, || {
                self.client.create(k8s_type, namespace, &spec)
            })
            .await?;
            self.metrics.cluster_operation(k8s_type, "create");
            Ok(ReconcileOutcome::Created)
        } else {
            log::debug!("{} {} exists, patching using '{}'", label, id, spec);
            let op_label = format!("patch {} {}", label, id);
            self.with_retry(k8s_type, &op_label, || self.client.patch(k8s_type, &id, &spec))
                .await?;
            self.metrics.cluster_operation(k8s_type, "patch");
            Ok(ReconcileOutcome::Patched)
        }
    }

    /// Deletes the resource if it exists
    pub async fn delete(
        &self,
        k8s_type: &'static K8sType,
        label: &str,
        id: &ObjectIdRef<'_>,
    ) -> Result<ReconcileOutcome, ReconcileError> {
        if self.read_existing(k8s_type, label, id).await?.is_none() {
            log::debug!("{} {} does not exist, nothing to delete", label, id);
            return Ok(ReconcileOutcome::NoOp);
        }
        let op_label = format!("delete {} {}", label, id);
        self.with_retry(k8s_type, &op_label, || self.client.delete(k8s_type, id))
            .await?;
        self.metrics.cluster_operation(k8s_type, "delete");
        Ok(ReconcileOutcome::Deleted)
    }

    async fn read_existing(
        &self,
        k8s_type: &'static K8sType,
        label: &str,
        id: &ObjectIdRef<'_>,
    ) -> Result<Option<Value>, ReconcileError> {
        match self.client.read(k8s_type, id).await {
            Ok(resource) => Ok(Some(resource)),
            Err(ref err) if err.is_not_found() => {
                log::debug!("{} {} does not exist", label, id);
                Ok(None)
            }
            Err(err) => match self.read_failure_policy {
                ReadFailurePolicy::TreatAsAbsent => {
                    log::debug!(
                        "Failed to read {} {}, treating it as absent: {}",
                        label,
                        id,
                        err.to_failure()
                    );
                    Ok(None)
                }
                ReadFailurePolicy::RequireNotFound => {
                    log::error!("Failed to read {} {}: {}", label, id, err.to_failure());
                    Err(ReconcileError::Read {
                        label: format!("read {} {}", label, id),
                        error: err.to_failure(),
                    })
                }
            },
        }
    }

    async fn with_retry<T, F, Fut>(
        &self,
        k8s_type: &'static K8sType,
        label: &str,
        mut op: F,
    ) -> Result<T, ReconcileError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, client::Error>>,
    {
        let metrics = &self.metrics;
        let outcome = retry(&self.retry_policy, label, || {
            let attempt = op();
            async move {
                let result = attempt.await;
                if result.is_err() {
                    metrics.attempt_failed(k8s_type);
                }
                result
            }
        })
        .await;
        match outcome {
            RetryOutcome::Succeeded(value) => Ok(value),
            RetryOutcome::Exhausted {
                attempts,
                last_error,
            } => Err(ReconcileError::Exhausted {
                label: label.to_owned(),
                attempts,
                error: last_error.to_failure(),
            }),
        }
    }
}
