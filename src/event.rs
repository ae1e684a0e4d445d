//! The inbound deployment request events. A single event may carry several goals, each of which
//! is handled independently.
use crate::application::{InvalidApplicationError, KubernetesApplication};

use std::fmt::{self, Display};

/// Environment of goals that don't depend on any environment
pub const INDEPENDENT_OF_ENVIRONMENT: &str = "";
/// Environment of goals that tear down a project
pub const PROJECT_DISPOSAL_ENVIRONMENT: &str = "project-disposal/";
pub const STAGING_ENVIRONMENT: &str = "testing/";
pub const PRODUCTION_ENVIRONMENT: &str = "production/";

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Default)]
pub struct DeployRequestEvent {
    #[serde(rename = "SdmGoal", default)]
    pub goals: Vec<GoalEvent>,
}

/// The lifecycle state of a goal. Only goals that are `InProcess` are deployed. States this
/// deployer doesn't know about are read as `Unknown`, so that such a goal is skipped without
/// failing the rest of its event.
#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum GoalState {
    Planned,
    Requested,
    InProcess,
    WaitingForPreApproval,
    PreApproved,
    WaitingForApproval,
    Approved,
    Success,
    Failure,
    Stopped,
    Skipped,
    Canceled,
    #[serde(other)]
    Unknown,
}

impl GoalState {
    pub fn as_str(&self) -> &'static str {
        match self {
            GoalState::Planned => "planned",
            GoalState::Requested => "requested",
            GoalState::InProcess => "in_process",
            GoalState::WaitingForPreApproval => "waiting_for_pre_approval",
            GoalState::PreApproved => "pre_approved",
            GoalState::WaitingForApproval => "waiting_for_approval",
            GoalState::Approved => "approved",
            GoalState::Success => "success",
            GoalState::Failure => "failure",
            GoalState::Stopped => "stopped",
            GoalState::Skipped => "skipped",
            GoalState::Canceled => "canceled",
            GoalState::Unknown => "unknown",
        }
    }
}

impl Display for GoalState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
pub struct Fulfillment {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GoalEvent {
    pub name: String,
    pub unique_name: String,
    #[serde(default)]
    pub environment: String,
    pub state: GoalState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fulfillment: Option<Fulfillment>,
    /// A json string, holding the application descriptor under `GOAL_DATA_KEY`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
}

impl GoalEvent {
    /// Extracts the application descriptor from the goal data. Returns `Ok(None)` if the goal
    /// has no data, or the data has no descriptor.
    pub fn kubernetes_application(
        &self,
    ) -> Result<Option<KubernetesApplication>, InvalidApplicationError> {
        match self.data.as_deref() {
            None => Ok(None),
            Some(data) if data.trim().is_empty() => Ok(None),
            Some(data) => KubernetesApplication::from_goal_data(data),
        }
    }

    /// Returns the suffix used in goal descriptions to say where something was deployed, for
    /// example `` to `production` ``. Empty for goals that are independent of any environment
    /// or that dispose of a project.
    pub fn environment_label(&self) -> String {
        environment_label(self.environment.as_str())
    }
}

pub fn environment_label(environment: &str) -> String {
    if environment == INDEPENDENT_OF_ENVIRONMENT || environment == PROJECT_DISPOSAL_ENVIRONMENT {
        return String::new();
    }
    let name = environment.trim_end_matches('/');
    if name.is_empty() {
        String::new()
    } else {
        format!(" to `{}`", name)
    }
}
