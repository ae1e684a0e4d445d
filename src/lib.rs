//! k8s-deployer applies declarative application descriptors to a Kubernetes cluster. Descriptors
//! arrive embedded in deployment goal events. For each goal that's meant for this deployer, the
//! Namespace, RBAC resources and Ingress of the application are rendered from templates, with any
//! user supplied overrides merged on top, and then created or patched in the cluster. The outcome
//! is reported back through a `GoalStore`.
//!
//! To get started, all you need is a `DeployerConfig`, a `ClientConfig`, and a `GoalStore`
//! implementation.
//!
//! ```no_run
//! use k8s_deployer::prelude::*;
//! use k8s_deployer::futures::future::{self, BoxFuture, FutureExt};
//! use std::sync::Arc;
//!
//! /// Only logs the updates. A real store would persist them.
//! struct LoggingGoalStore;
//!
//! impl GoalStore for LoggingGoalStore {
//!     fn update_goal<'a>(
//!         &'a self,
//!         goal: &'a GoalEvent,
//!         update: &'a GoalUpdate,
//!     ) -> BoxFuture<'a, Result<(), Error>> {
//!         println!("{} is now {}: {}", goal.unique_name, update.state, update.description);
//!         future::ready(Ok(())).boxed()
//!     }
//! }
//!
//! // the name must match the fulfillment name of the goals that this deployer should act on
//! let config = DeployerConfig::new("@atomist/k8s-sdm_minikube", "production")
//!     .manages_namespace("hounds-of-love");
//! let client_config = ClientConfig::load("k8s-deployer").expect("no client configuration");
//! let deployer = Deployer::from_client_config(config, client_config)
//!     .expect("failed to create client");
//! let handler = KubernetesDeployHandler::new(deployer, Arc::new(LoggingGoalStore));
//!
//! let event: DeployRequestEvent = k8s_deployer::serde_json::from_str(r#"{"SdmGoal": []}"#)
//!     .expect("invalid event");
//! let runtime = tokio::runtime::Runtime::new().expect("failed to create runtime");
//! let result = runtime.block_on(handler.handle_event(&event));
//! assert_eq!(0, result.code);
//! ```

#[macro_use]
extern crate serde_derive;

pub mod application;
pub mod config;
pub mod error;
pub mod event;
pub mod handler;
pub mod k8s_types;
pub mod labels;
pub mod progress;
pub mod resource;
pub mod runner;
pub mod template;

pub use futures;
pub use serde;
pub use serde_json;

pub mod prelude {
    pub use crate::application::{ExternalUrl, KubernetesApplication};
    pub use crate::config::{ClientConfig, DeployerConfig};
    pub use crate::error::Error;
    pub use crate::event::{DeployRequestEvent, GoalEvent, GoalState};
    pub use crate::handler::{DeployResult, GoalStore, GoalUpdate, KubernetesDeployHandler};
    pub use crate::k8s_types::{self, K8sType};
    pub use crate::progress::{llog, ProgressLog};
    pub use crate::runner::Deployer;
    pub use serde::{Deserialize, Serialize};
}
