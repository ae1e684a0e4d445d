//! Decides whether a goal, and the application it carries, should be deployed by this deployer.
//! A rejection is not an error. It only means that some other deployer is responsible.
use crate::application::KubernetesApplication;
use crate::config::DeployerConfig;
use crate::event::{GoalEvent, GoalState};

use std::fmt::{self, Display};

/// The reason that a goal or application was not accepted
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    NoFulfillment,
    NotInProcess(GoalState),
    FulfillmentName { actual: String, expected: String },
    Environment { actual: String, expected: String },
    Namespace { actual: String, managed: Vec<String> },
}

impl Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Rejection::NoFulfillment => f.write_str("SDM goal contains no fulfillment"),
            Rejection::NotInProcess(state) => {
                write!(f, "SDM goal state '{}' is not '{}'", state, GoalState::InProcess)
            }
            Rejection::FulfillmentName { actual, expected } => write!(
                f,
                "SDM goal fulfillment name '{}' is not '{}'",
                actual, expected
            ),
            Rejection::Environment { actual, expected } => write!(
                f,
                "Kubernetes application environment '{}' is not SDM environment '{}'",
                actual, expected
            ),
            Rejection::Namespace { actual, managed } => write!(
                f,
                "Kubernetes application namespace '{}' is not in managed namespaces '{}'",
                actual,
                managed.join(",")
            ),
        }
    }
}

/// A goal is eligible if it has a fulfillment with the name of this deployer, and it is in
/// process. Checks are made in that order.
pub fn check_eligibility(goal: &GoalEvent, config: &DeployerConfig) -> Result<(), Rejection> {
    let fulfillment = goal.fulfillment.as_ref().ok_or(Rejection::NoFulfillment)?;
    if goal.state != GoalState::InProcess {
        return Err(Rejection::NotInProcess(goal.state));
    }
    if fulfillment.name != config.name {
        return Err(Rejection::FulfillmentName {
            actual: fulfillment.name.clone(),
            expected: config.name.clone(),
        });
    }
    Ok(())
}

/// An application is deployed if its environment is the environment of this deployer, and its
/// namespace is managed by this deployer
pub fn verify_application(
    app: &KubernetesApplication,
    config: &DeployerConfig,
) -> Result<(), Rejection> {
    if app.environment != config.environment {
        return Err(Rejection::Environment {
            actual: app.environment.clone(),
            expected: config.environment.clone(),
        });
    }
    if !config.is_managed_namespace(app.ns.as_str()) {
        return Err(Rejection::Namespace {
            actual: app.ns.clone(),
            managed: config.namespaces.clone(),
        });
    }
    Ok(())
}
