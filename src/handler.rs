//! The entry point for deployment requests. A `KubernetesDeployHandler` takes each goal of an
//! event through the same steps: check that the goal is meant for this deployer, extract and
//! verify the application, deploy it, and report the outcome back to the `GoalStore`. Every goal
//! resolves to a `DeployResult`, so a failure of one goal never affects the others.
pub mod eligibility;

use crate::application::{ExternalUrl, KubernetesApplication};
use crate::error::{Error, ToFailure};
use crate::event::{DeployRequestEvent, GoalEvent, GoalState};
use crate::progress::{llog, LoggingProgressLog, ProgressLog, WriteToAllProgressLog};
use crate::runner::metrics::Metrics;
use crate::runner::Deployer;

use self::eligibility::{check_eligibility, verify_application};

use futures::future::{join_all, BoxFuture};
use serde::Serialize;

use std::fmt;
use std::sync::Arc;

/// Persists the state of goals. This is how the outcome of a deployment is reported.
pub trait GoalStore: Send + Sync {
    fn update_goal<'a>(
        &'a self,
        goal: &'a GoalEvent,
        update: &'a GoalUpdate,
    ) -> BoxFuture<'a, Result<(), Error>>;
}

/// Creates an additional progress log for each goal that's handled
pub trait LogFactory: Send + Sync {
    fn progress_log(&self, goal: &GoalEvent) -> Arc<dyn ProgressLog>;
}

/// The new state of a goal
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GoalUpdate {
    pub state: GoalState,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub external_urls: Vec<ExternalUrl>,
}

impl GoalUpdate {
    fn failure(message: &str) -> GoalUpdate {
        GoalUpdate {
            state: GoalState::Failure,
            description: message.to_owned(),
            error: Some(message.to_owned()),
            external_urls: Vec::new(),
        }
    }
}

/// The outcome of handling a goal. A `code` of 0 means success, 1 means that the deployment
/// failed, and 2 means that the outcome could not be reported to the goal store.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeployResult {
    pub code: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub external_urls: Vec<ExternalUrl>,
}

impl DeployResult {
    pub fn success() -> DeployResult {
        DeployResult::default()
    }

    pub fn is_success(&self) -> bool {
        self.code == 0
    }

    /// Combines the results of all the goals of an event. The combined code is the highest code,
    /// and messages and descriptions are joined with `"; "`.
    pub fn reduce(results: Vec<DeployResult>) -> DeployResult {
        let mut combined = DeployResult::success();
        let mut messages = Vec::new();
        let mut descriptions = Vec::new();
        for result in results {
            combined.code = combined.code.max(result.code);
            messages.extend(result.message);
            descriptions.extend(result.description);
            combined.external_urls.extend(result.external_urls);
        }
        if !messages.is_empty() {
            combined.message = Some(messages.join("; "));
        }
        if !descriptions.is_empty() {
            combined.description = Some(descriptions.join("; "));
        }
        combined
    }
}

pub struct KubernetesDeployHandler {
    deployer: Deployer,
    goal_store: Arc<dyn GoalStore>,
    log_factory: Option<Arc<dyn LogFactory>>,
}

impl fmt::Debug for KubernetesDeployHandler {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("KubernetesDeployHandler")
            .field("deployer", &self.deployer)
            .field("log_factory", &self.log_factory.is_some())
            .finish()
    }
}

impl KubernetesDeployHandler {
    pub fn new(deployer: Deployer, goal_store: Arc<dyn GoalStore>) -> KubernetesDeployHandler {
        KubernetesDeployHandler {
            deployer,
            goal_store,
            log_factory: None,
        }
    }

    /// Progress messages of each goal will also be written to a log from the given factory
    pub fn with_log_factory(mut self, log_factory: Arc<dyn LogFactory>) -> Self {
        self.log_factory = Some(log_factory);
        self
    }

    pub fn deployer(&self) -> &Deployer {
        &self.deployer
    }

    fn metrics(&self) -> &Metrics {
        self.deployer.metrics()
    }

    /// Handles all the goals of the event concurrently, and combines their results
    pub async fn handle_event(&self, event: &DeployRequestEvent) -> DeployResult {
        if event.goals.is_empty() {
            log::warn!("Received event had no SdmGoal");
            return DeployResult::success();
        }
        DeployResult::reduce(self.handle_goals(event.goals.as_slice()).await)
    }

    /// Handles the goals concurrently. The results are in the same order as the goals.
    pub async fn handle_goals(&self, goals: &[GoalEvent]) -> Vec<DeployResult> {
        join_all(goals.iter().map(|goal| self.handle_goal(goal))).await
    }

    pub async fn handle_goal(&self, goal: &GoalEvent) -> DeployResult {
        let progress_log = self.progress_log(goal);
        let config = self.deployer.config();

        if let Err(rejection) = check_eligibility(goal, config) {
            log::debug!("{}", rejection);
            llog(
                "SDM goal event is not eligible for Kubernetes deploy",
                log::Level::Info,
                &progress_log,
            );
            self.metrics().goal_handled("skipped");
            return DeployResult::success();
        }

        let mut app = match goal.kubernetes_application() {
            Ok(Some(app)) => app,
            Ok(None) => {
                llog(
                    "SDM goal event has no Kubernetes application data",
                    log::Level::Info,
                    &progress_log,
                );
                self.metrics().goal_handled("skipped");
                return DeployResult::success();
            }
            Err(err) => {
                let message = format!("Invalid goal event data: {}", err);
                return self.fail_goal(goal, message, &progress_log).await;
            }
        };
        if app.workspace_id.is_empty() {
            if let Some(workspace_id) = config.workspace_id.as_ref() {
                app.workspace_id = workspace_id.clone();
            }
        }
        let app_id = app.slug();

        if let Err(rejection) = verify_application(&app, config) {
            log::debug!("{}", rejection);
            llog(
                format!(
                    "Kubernetes application data did not match parameters for {}",
                    app_id
                )
                .as_str(),
                log::Level::Debug,
                &progress_log,
            );
            self.metrics().goal_handled("skipped");
            return DeployResult::success();
        }
        if let Err(err) = app.validate() {
            let message = format!("Invalid goal event data: {}", err);
            return self.fail_goal(goal, message, &progress_log).await;
        }

        self.deploy(goal, &app, &progress_log).await
    }

    async fn deploy(
        &self,
        goal: &GoalEvent,
        app: &KubernetesApplication,
        progress_log: &dyn ProgressLog,
    ) -> DeployResult {
        let app_id = app.slug();
        let report = match self.deployer.deploy_application(app, progress_log).await {
            Ok(report) => report,
            Err(err) => {
                let message = format!("Failed to deploy {}: {}", app_id, err.reason());
                return self.fail_goal(goal, message, progress_log).await;
            }
        };

        let description = format!("Deployed `{}`{}", app_id, goal.environment_label());
        let update = GoalUpdate {
            state: GoalState::Success,
            description: description.clone(),
            error: None,
            external_urls: report.external_urls.clone(),
        };
        let mut result = DeployResult {
            code: 0,
            message: None,
            description: Some(description),
            external_urls: report.external_urls,
        };
        if let Err(err) = self.goal_store.update_goal(goal, &update).await {
            let reason = err.to_failure();
            let msg = update_failed_message(goal, &update, &reason);
            llog(msg.as_str(), log::Level::Error, progress_log);
            result.code = 2;
            result.message = Some(format!("{}; {}", reason, msg));
        }
        self.metrics().goal_handled("success");
        result
    }

    /// Reports the goal as failed. If even that fails, then the result code is 2.
    async fn fail_goal(
        &self,
        goal: &GoalEvent,
        message: String,
        progress_log: &dyn ProgressLog,
    ) -> DeployResult {
        llog(message.as_str(), log::Level::Error, progress_log);
        self.metrics().goal_handled("failure");
        let update = GoalUpdate::failure(message.as_str());
        match self.goal_store.update_goal(goal, &update).await {
            Ok(()) => DeployResult {
                code: 1,
                message: Some(message),
                ..Default::default()
            },
            Err(err) => {
                let msg = update_failed_message(goal, &update, &err.to_failure());
                llog(msg.as_str(), log::Level::Error, progress_log);
                DeployResult {
                    code: 2,
                    message: Some(format!("{}; {}", message, msg)),
                    ..Default::default()
                }
            }
        }
    }

    fn progress_log(&self, goal: &GoalEvent) -> WriteToAllProgressLog {
        let mut logs: Vec<Arc<dyn ProgressLog>> = vec![Arc::new(LoggingProgressLog::new(
            goal.name.as_str(),
            log::Level::Debug,
        ))];
        if let Some(factory) = self.log_factory.as_ref() {
            logs.push(factory.progress_log(goal));
        }
        WriteToAllProgressLog::new(goal.name.as_str(), logs)
    }
}

fn update_failed_message(
    goal: &GoalEvent,
    update: &GoalUpdate,
    reason: &impl fmt::Display,
) -> String {
    format!(
        "Failed to update SDM goal '{}' with params '{}': {}",
        to_json(goal),
        to_json(update),
        reason
    )
}

fn to_json<T: Serialize>(value: &T) -> String {
    serde_json::to_string(value).unwrap_or_default()
}

#[cfg(test)]
mod test {
    use super::*;

    fn result(code: i32, message: Option<&str>) -> DeployResult {
        DeployResult {
            code,
            message: message.map(str::to_owned),
            ..Default::default()
        }
    }

    #[test]
    fn reduce_of_no_results_is_success() {
        assert_eq!(DeployResult::success(), DeployResult::reduce(Vec::new()));
    }

    #[test]
    fn reduce_keeps_the_highest_code_and_joins_messages() {
        let combined = DeployResult::reduce(vec![
            result(0, None),
            result(2, Some("Failed to deploy a/b: boom; Failed to update SDM goal")),
            result(1, Some("Failed to deploy c/d: bang")),
        ]);
        assert_eq!(2, combined.code);
        assert_eq!(
            Some("Failed to deploy a/b: boom; Failed to update SDM goal; Failed to deploy c/d: bang"),
            combined.message.as_deref()
        );
        assert!(!combined.is_success());
    }

    #[test]
    fn failure_update_uses_the_message_for_description_and_error() {
        let update = GoalUpdate::failure("Failed to deploy hounds-of-love/cloudbusting: nope");
        assert_eq!(GoalState::Failure, update.state);
        assert_eq!(Some(update.description.clone()), update.error);
        assert_eq!(
            r#"{"state":"failure","description":"Failed to deploy hounds-of-love/cloudbusting: nope","error":"Failed to deploy hounds-of-love/cloudbusting: nope"}"#,
            to_json(&update)
        );
    }
}
