//! The `Deployer` renders the templates for an application and applies them to a cluster. A
//! deploy pass upserts the namespace, then the RBAC resources, then the ingress. An undeploy pass
//! deletes everything except the namespace.
pub mod client;
pub mod metrics;
pub mod reconcile;

#[cfg(any(test, feature = "testkit"))]
pub mod testkit;

use crate::application::{ExternalUrl, KubernetesApplication};
use crate::config::{ClientConfig, DeployerConfig};
use crate::k8s_types::core::v1 as core_v1;
use crate::k8s_types::extensions::v1beta1 as ext_v1beta1;
use crate::k8s_types::rbac_authorization_k8s_io::v1 as rbac_v1;
use crate::progress::{llog, ProgressLog};
use crate::resource::ObjectIdRef;
use crate::template::{
    ingress_template, namespace_template, role_binding_template, role_template,
    service_account_template, Ingress, Role, RoleBinding, ServiceAccount, Template,
};

use self::client::{Client, ClusterApi};
use self::metrics::Metrics;
use self::reconcile::{ReconcileError, ReconcileOutcome, Reconciler};

use std::fmt;
use std::io;
use std::sync::Arc;

/// What happened to a single resource during a pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceOutcome {
    pub kind: &'static str,
    pub name: String,
    pub outcome: ReconcileOutcome,
}

impl fmt::Display for ResourceOutcome {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} {} {}", self.kind, self.name, self.outcome)
    }
}

/// The result of a successful deploy pass
#[derive(Debug, Clone, PartialEq)]
pub struct DeployReport {
    pub outcomes: Vec<ResourceOutcome>,
    pub external_urls: Vec<ExternalUrl>,
}

/// The RBAC resources to apply. A role implies a service account and a role binding. A service
/// account can also be requested on its own.
#[derive(Debug)]
enum RbacTemplates {
    None,
    ServiceAccount(ServiceAccount),
    Full {
        role: Role,
        service_account: ServiceAccount,
        role_binding: RoleBinding,
    },
}

impl RbacTemplates {
    fn render(app: &KubernetesApplication) -> Result<RbacTemplates, ReconcileError> {
        let rbac = match app.rbac.as_ref() {
            Some(rbac) => rbac,
            None => return Ok(RbacTemplates::None),
        };
        if rbac.role_spec.is_some() {
            Ok(RbacTemplates::Full {
                role: role_template(app)?,
                service_account: service_account_template(app)?,
                role_binding: role_binding_template(app)?,
            })
        } else if rbac.service_account_spec.is_some() {
            Ok(RbacTemplates::ServiceAccount(service_account_template(app)?))
        } else {
            Ok(RbacTemplates::None)
        }
    }
}

/// Deploys applications to a single cluster
#[derive(Clone)]
pub struct Deployer {
    config: Arc<DeployerConfig>,
    reconciler: Reconciler,
    metrics: Metrics,
}

impl fmt::Debug for Deployer {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Deployer")
            .field("config", &self.config)
            .field("reconciler", &self.reconciler)
            .finish()
    }
}

impl Deployer {
    pub fn new(config: DeployerConfig, client: Arc<dyn ClusterApi>) -> Deployer {
        Deployer::with_metrics(config, client, Metrics::new())
    }

    pub fn with_metrics(
        config: DeployerConfig,
        client: Arc<dyn ClusterApi>,
        metrics: Metrics,
    ) -> Deployer {
        let reconciler = Reconciler::new(
            client,
            config.retry.clone(),
            config.read_failure_policy,
            metrics.clone(),
        );
        Deployer {
            config: Arc::new(config),
            reconciler,
            metrics,
        }
    }

    /// Creates a deployer that talks to the api server using the given client configuration
    pub fn from_client_config(
        config: DeployerConfig,
        client_config: ClientConfig,
    ) -> Result<Deployer, io::Error> {
        let metrics = Metrics::new();
        let client = Client::new(client_config, metrics.client_metrics())?;
        Ok(Deployer::with_metrics(config, Arc::new(client), metrics))
    }

    pub fn config(&self) -> &DeployerConfig {
        &self.config
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Applies all the resources for the application. Every template is rendered before anything
    /// is sent to the cluster, so an invalid override fails the pass without side effects.
    pub async fn deploy_application(
        &self,
        app: &KubernetesApplication,
        progress_log: &dyn ProgressLog,
    ) -> Result<DeployReport, ReconcileError> {
        let slug = app.slug();
        let namespace = namespace_template(app);
        let rbac = RbacTemplates::render(app)?;
        let ingress = ingress_template(app)?;

        llog(
            format!("Deploying {} to Kubernetes", slug).as_str(),
            log::Level::Info,
            progress_log,
        );
        let mut outcomes = Vec::with_capacity(5);

        outcomes.push(self.upsert(&namespace, None, progress_log).await?);

        let ns = Some(app.ns.as_str());
        match rbac {
            RbacTemplates::None => {
                log::debug!("No RBAC specs provided, will not upsert RBAC resources for {}", slug);
            }
            RbacTemplates::ServiceAccount(service_account) => {
                outcomes.push(self.upsert(&service_account, ns, progress_log).await?);
            }
            RbacTemplates::Full {
                role,
                service_account,
                role_binding,
            } => {
                outcomes.push(self.upsert(&role, ns, progress_log).await?);
                outcomes.push(self.upsert(&service_account, ns, progress_log).await?);
                outcomes.push(self.upsert(&role_binding, ns, progress_log).await?);
            }
        }

        match ingress {
            Some(ingress) => outcomes.push(self.upsert(&ingress, ns, progress_log).await?),
            None => {
                llog(
                    format!("Path not provided, will not upsert ingress {}", slug).as_str(),
                    log::Level::Debug,
                    progress_log,
                );
                outcomes.push(ResourceOutcome {
                    kind: Ingress::label(),
                    name: app.name.clone(),
                    outcome: ReconcileOutcome::NoOp,
                });
            }
        }

        let external_urls = app.external_url().into_iter().collect::<Vec<_>>();
        llog(
            format!("Deployed {}", slug).as_str(),
            log::Level::Info,
            progress_log,
        );
        Ok(DeployReport {
            outcomes,
            external_urls,
        })
    }

    /// Deletes the ingress and RBAC resources of the application. The namespace is left alone,
    /// since it may be shared with other applications.
    pub async fn undeploy_application(
        &self,
        app: &KubernetesApplication,
        progress_log: &dyn ProgressLog,
    ) -> Result<Vec<ResourceOutcome>, ReconcileError> {
        let slug = app.slug();
        // names come from the rendered templates, since overrides may change them
        let ingress_name = ingress_template(app)?
            .map(|ingress| ingress.name().to_owned())
            .unwrap_or_else(|| app.name.clone());
        let role = role_template(app)?;
        let service_account = service_account_template(app)?;
        let role_binding = role_binding_template(app)?;

        llog(
            format!("Deleting {} from Kubernetes", slug).as_str(),
            log::Level::Info,
            progress_log,
        );
        let ns = app.ns.as_str();
        let targets = [
            (ext_v1beta1::Ingress, Ingress::label(), ingress_name.as_str()),
            (rbac_v1::RoleBinding, RoleBinding::label(), role_binding.name()),
            (core_v1::ServiceAccount, ServiceAccount::label(), service_account.name()),
            (rbac_v1::Role, Role::label(), role.name()),
        ];
        let mut outcomes = Vec::with_capacity(targets.len());
        for &(k8s_type, label, name) in targets.iter() {
            let id = ObjectIdRef::new(ns, name);
            let outcome = self.reconciler.delete(k8s_type, label, &id).await?;
            log::debug!("{} {} {}", label, id, outcome);
            outcomes.push(ResourceOutcome {
                kind: label,
                name: name.to_string(),
                outcome,
            });
        }
        llog(
            format!("Deleted {}", slug).as_str(),
            log::Level::Info,
            progress_log,
        );
        Ok(outcomes)
    }

    async fn upsert<T: Template + Sync>(
        &self,
        template: &T,
        namespace: Option<&str>,
        progress_log: &dyn ProgressLog,
    ) -> Result<ResourceOutcome, ReconcileError> {
        let outcome = self.reconciler.upsert(template, namespace).await?;
        let id = ObjectIdRef::new(namespace.unwrap_or_default(), template.name());
        llog(
            format!("{} {} {}", T::label(), id, outcome).as_str(),
            log::Level::Debug,
            progress_log,
        );
        Ok(ResourceOutcome {
            kind: T::label(),
            name: template.name().to_owned(),
            outcome,
        })
    }
}
