//! In-memory stand-ins for the cluster and the goal store, for testing deployments without a
//! Kubernetes api server. `TestKit` wires them up to a `KubernetesDeployHandler` and runs
//! everything on a current-thread runtime.
//!
//! **This module is only available when the `testkit` feature is enabled in your Cargo.toml**
use crate::application::{KubernetesApplication, GOAL_DATA_KEY};
use crate::config::DeployerConfig;
use crate::error::Error;
use crate::event::{DeployRequestEvent, Fulfillment, GoalEvent, GoalState};
use crate::handler::{DeployResult, GoalStore, GoalUpdate, KubernetesDeployHandler, LogFactory};
use crate::k8s_types::K8sType;
use crate::progress::{BufferProgressLog, ProgressLog};
use crate::resource::{ObjectId, ObjectIdRef};
use crate::runner::client::{ApiError, ClusterApi, Error as ClientError};
use crate::runner::metrics::Metrics;
use crate::runner::reconcile::ReconcileError;
use crate::runner::{Deployer, ResourceOutcome};

use futures::future::{self, BoxFuture, FutureExt};
use serde_json::Value;
use tokio::runtime::{self, Runtime};

use std::collections::HashMap;
use std::fmt::{self, Debug, Display};
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Read,
    Create,
    Patch,
    Delete,
}

/// A record of a single call to the `FakeCluster`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterCall {
    pub operation: Operation,
    pub kind: &'static str,
    pub id: ObjectId,
}

impl ClusterCall {
    pub fn new(operation: Operation, k8s_type: &'static K8sType, id: &ObjectIdRef<'_>) -> ClusterCall {
        ClusterCall {
            operation,
            kind: k8s_type.kind,
            id: id.to_owned(),
        }
    }
}

#[derive(Debug)]
struct InjectedFailure {
    operation: Operation,
    k8s_type: &'static K8sType,
    remaining: Option<u32>,
    code: u16,
    message: String,
}

#[derive(Debug, Default)]
struct ClusterState {
    resources: HashMap<(&'static K8sType, ObjectId), Value>,
    calls: Vec<ClusterCall>,
    failures: Vec<InjectedFailure>,
    resource_version: u64,
}

impl ClusterState {
    fn record(&mut self, operation: Operation, k8s_type: &'static K8sType, id: &ObjectIdRef<'_>) {
        self.calls.push(ClusterCall::new(operation, k8s_type, id));
    }

    fn injected_failure(
        &mut self,
        operation: Operation,
        k8s_type: &'static K8sType,
    ) -> Option<ClientError> {
        let failure = self.failures.iter_mut().find(|f| {
            f.operation == operation && f.k8s_type == k8s_type && f.remaining != Some(0)
        })?;
        if let Some(remaining) = failure.remaining.as_mut() {
            *remaining -= 1;
        }
        Some(api_error(failure.code, failure.message.clone()))
    }

    fn next_resource_version(&mut self) -> String {
        self.resource_version += 1;
        self.resource_version.to_string()
    }
}

fn api_error(code: u16, message: String) -> ClientError {
    ClientError::Api(ApiError {
        status: "Failure".to_owned(),
        message,
        reason: String::new(),
        code,
    })
}

/// An in-memory `ClusterApi`. Reads of missing resources return a 404, creates of existing
/// resources return a 409, and patches are applied as json merge patches. Failures can be
/// injected per operation and resource type.
#[derive(Debug, Default)]
pub struct FakeCluster {
    state: Mutex<ClusterState>,
}

impl FakeCluster {
    pub fn new() -> FakeCluster {
        FakeCluster::default()
    }

    /// Makes every call of the given operation on the given type fail
    pub fn fail_always(
        &self,
        operation: Operation,
        k8s_type: &'static K8sType,
        code: u16,
        message: impl Into<String>,
    ) {
        self.add_failure(operation, k8s_type, None, code, message.into());
    }

    /// Makes the next `times` calls of the given operation on the given type fail
    pub fn fail_times(
        &self,
        operation: Operation,
        k8s_type: &'static K8sType,
        times: u32,
        code: u16,
        message: impl Into<String>,
    ) {
        self.add_failure(operation, k8s_type, Some(times), code, message.into());
    }

    fn add_failure(
        &self,
        operation: Operation,
        k8s_type: &'static K8sType,
        remaining: Option<u32>,
        code: u16,
        message: String,
    ) {
        self.lock().failures.push(InjectedFailure {
            operation,
            k8s_type,
            remaining,
            code,
            message,
        });
    }

    /// Adds a resource to the cluster without recording a call
    pub fn insert(&self, k8s_type: &'static K8sType, namespace: Option<&str>, resource: Value) {
        let name = resource
            .pointer("/metadata/name")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_owned();
        let id = ObjectId::new(namespace.unwrap_or_default(), name);
        self.lock().resources.insert((k8s_type, id), resource);
    }

    pub fn get(&self, k8s_type: &'static K8sType, id: &ObjectIdRef<'_>) -> Option<Value> {
        self.lock().resources.get(&(k8s_type, id.to_owned())).cloned()
    }

    /// All the resources of the given type, in no particular order
    pub fn resources_of_type(&self, k8s_type: &'static K8sType) -> Vec<Value> {
        self.lock()
            .resources
            .iter()
            .filter(|((t, _), _)| *t == k8s_type)
            .map(|(_, resource)| resource.clone())
            .collect()
    }

    pub fn calls(&self) -> Vec<ClusterCall> {
        self.lock().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.lock().calls.clear();
    }

    /// The number of calls of the given operation on the given type
    pub fn count(&self, operation: Operation, k8s_type: &'static K8sType) -> usize {
        self.lock()
            .calls
            .iter()
            .filter(|call| call.operation == operation && call.kind == k8s_type.kind)
            .count()
    }

    fn lock(&self) -> MutexGuard<ClusterState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn do_read(&self, k8s_type: &'static K8sType, id: &ObjectIdRef<'_>) -> Result<Value, ClientError> {
        let mut state = self.lock();
        state.record(Operation::Read, k8s_type, id);
        if let Some(err) = state.injected_failure(Operation::Read, k8s_type) {
            return Err(err);
        }
        state
            .resources
            .get(&(k8s_type, id.to_owned()))
            .cloned()
            .ok_or_else(|| ClientError::Api(ApiError::not_found(k8s_type, id.name())))
    }

    fn do_create(
        &self,
        k8s_type: &'static K8sType,
        namespace: Option<&str>,
        resource: &Value,
    ) -> Result<Value, ClientError> {
        let name = resource
            .pointer("/metadata/name")
            .and_then(Value::as_str)
            .unwrap_or_default();
        let id = ObjectIdRef::new(namespace.unwrap_or_default(), name);
        let mut state = self.lock();
        state.record(Operation::Create, k8s_type, &id);
        if let Some(err) = state.injected_failure(Operation::Create, k8s_type) {
            return Err(err);
        }
        if name.is_empty() {
            return Err(api_error(422, "metadata.name: Required value".to_owned()));
        }
        let key = (k8s_type, id.to_owned());
        if state.resources.contains_key(&key) {
            return Err(api_error(
                409,
                format!("{} \"{}\" already exists", k8s_type.plural_kind, name),
            ));
        }
        let mut created = resource.clone();
        let resource_version = state.next_resource_version();
        if let Some(metadata) = created.get_mut("metadata").and_then(Value::as_object_mut) {
            if let Some(ns) = namespace {
                metadata.insert("namespace".to_owned(), Value::String(ns.to_owned()));
            }
            metadata.insert("resourceVersion".to_owned(), Value::String(resource_version));
        }
        state.resources.insert(key, created.clone());
        Ok(created)
    }

    fn do_patch(
        &self,
        k8s_type: &'static K8sType,
        id: &ObjectIdRef<'_>,
        patch: &Value,
    ) -> Result<Value, ClientError> {
        let mut state = self.lock();
        state.record(Operation::Patch, k8s_type, id);
        if let Some(err) = state.injected_failure(Operation::Patch, k8s_type) {
            return Err(err);
        }
        let resource_version = state.next_resource_version();
        let existing = state
            .resources
            .get_mut(&(k8s_type, id.to_owned()))
            .ok_or_else(|| ClientError::Api(ApiError::not_found(k8s_type, id.name())))?;
        merge_patch(existing, patch);
        if let Some(metadata) = existing.get_mut("metadata").and_then(Value::as_object_mut) {
            metadata.insert("resourceVersion".to_owned(), Value::String(resource_version));
        }
        Ok(existing.clone())
    }

    fn do_delete(&self, k8s_type: &'static K8sType, id: &ObjectIdRef<'_>) -> Result<(), ClientError> {
        let mut state = self.lock();
        state.record(Operation::Delete, k8s_type, id);
        if let Some(err) = state.injected_failure(Operation::Delete, k8s_type) {
            return Err(err);
        }
        state.resources.remove(&(k8s_type, id.to_owned()));
        Ok(())
    }
}

/// Applies `patch` to `target` using json merge patch rules: objects are merged recursively, and
/// a null removes the key
fn merge_patch(target: &mut Value, patch: &Value) {
    match (target, patch) {
        (Value::Object(target), Value::Object(patch)) => {
            for (key, value) in patch.iter() {
                if value.is_null() {
                    target.remove(key);
                } else {
                    merge_patch(target.entry(key.clone()).or_insert(Value::Null), value);
                }
            }
        }
        (target, patch) => *target = patch.clone(),
    }
}

impl ClusterApi for FakeCluster {
    fn read<'a>(
        &'a self,
        k8s_type: &'static K8sType,
        id: &'a ObjectIdRef<'a>,
    ) -> BoxFuture<'a, Result<Value, ClientError>> {
        future::ready(self.do_read(k8s_type, id)).boxed()
    }

    fn create<'a>(
        &'a self,
        k8s_type: &'static K8sType,
        namespace: Option<&'a str>,
        resource: &'a Value,
    ) -> BoxFuture<'a, Result<Value, ClientError>> {
        future::ready(self.do_create(k8s_type, namespace, resource)).boxed()
    }

    fn patch<'a>(
        &'a self,
        k8s_type: &'static K8sType,
        id: &'a ObjectIdRef<'a>,
        patch: &'a Value,
    ) -> BoxFuture<'a, Result<Value, ClientError>> {
        future::ready(self.do_patch(k8s_type, id, patch)).boxed()
    }

    fn delete<'a>(
        &'a self,
        k8s_type: &'static K8sType,
        id: &'a ObjectIdRef<'a>,
    ) -> BoxFuture<'a, Result<(), ClientError>> {
        future::ready(self.do_delete(k8s_type, id)).boxed()
    }
}

#[derive(Debug)]
pub struct TestKitError(String);

impl Display for TestKitError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.0.as_str())
    }
}

impl std::error::Error for TestKitError {}

/// A `GoalStore` that keeps every update in memory, keyed by the goal's unique name
#[derive(Debug, Default)]
pub struct RecordingGoalStore {
    updates: Mutex<Vec<(String, GoalUpdate)>>,
    failure: Mutex<Option<String>>,
}

impl RecordingGoalStore {
    pub fn new() -> RecordingGoalStore {
        RecordingGoalStore::default()
    }

    /// Makes all subsequent updates fail with the given message
    pub fn fail_updates(&self, message: impl Into<String>) {
        *self.failure.lock().unwrap_or_else(|p| p.into_inner()) = Some(message.into());
    }

    pub fn updates(&self) -> Vec<(String, GoalUpdate)> {
        self.updates
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }

    /// The most recent update for the goal with the given unique name
    pub fn last_update(&self, unique_name: &str) -> Option<GoalUpdate> {
        self.updates()
            .into_iter()
            .rev()
            .find(|(name, _)| name == unique_name)
            .map(|(_, update)| update)
    }
}

impl GoalStore for RecordingGoalStore {
    fn update_goal<'a>(
        &'a self,
        goal: &'a GoalEvent,
        update: &'a GoalUpdate,
    ) -> BoxFuture<'a, Result<(), Error>> {
        let failure = self
            .failure
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone();
        let result = match failure {
            Some(message) => Err(TestKitError(message).into()),
            None => {
                self.updates
                    .lock()
                    .unwrap_or_else(|p| p.into_inner())
                    .push((goal.unique_name.clone(), update.clone()));
                Ok(())
            }
        };
        future::ready(result).boxed()
    }
}

/// Creates a `BufferProgressLog` for each goal, so that tests can inspect the messages
#[derive(Debug, Default)]
pub struct BufferLogFactory {
    logs: Mutex<HashMap<String, BufferProgressLog>>,
}

impl BufferLogFactory {
    pub fn messages(&self, unique_name: &str) -> Vec<String> {
        self.logs
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .get(unique_name)
            .map(BufferProgressLog::messages)
            .unwrap_or_default()
    }
}

impl LogFactory for BufferLogFactory {
    fn progress_log(&self, goal: &GoalEvent) -> Arc<dyn ProgressLog> {
        let mut logs = self.logs.lock().unwrap_or_else(|p| p.into_inner());
        let log = logs
            .entry(goal.unique_name.clone())
            .or_insert_with(|| BufferProgressLog::new(goal.name.clone()))
            .clone();
        Arc::new(log)
    }
}

/// Returns an `in_process` goal that the deployer with the given config will act on, with the
/// application embedded in its data
pub fn deploy_goal(
    config: &DeployerConfig,
    unique_name: &str,
    app: &KubernetesApplication,
) -> GoalEvent {
    let mut data = serde_json::Map::new();
    data.insert(
        GOAL_DATA_KEY.to_owned(),
        serde_json::to_value(app).expect("failed to serialize application"),
    );
    GoalEvent {
        name: "deploy".to_owned(),
        unique_name: unique_name.to_owned(),
        environment: format!("{}/", config.environment),
        state: GoalState::InProcess,
        fulfillment: Some(Fulfillment {
            name: config.name.clone(),
            method: Some("side-effect".to_owned()),
        }),
        data: Some(Value::Object(data).to_string()),
    }
}

/// Runs a `KubernetesDeployHandler` against a `FakeCluster` and a `RecordingGoalStore`
pub struct TestKit {
    runtime: Runtime,
    cluster: Arc<FakeCluster>,
    goal_store: Arc<RecordingGoalStore>,
    logs: Arc<BufferLogFactory>,
    metrics: Metrics,
    handler: KubernetesDeployHandler,
}

impl Debug for TestKit {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("TestKit")
            .field("cluster", &self.cluster)
            .field("goal_store", &self.goal_store)
            .finish()
    }
}

impl TestKit {
    pub fn new(config: DeployerConfig) -> TestKit {
        let runtime = runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .expect("failed to create runtime");
        let cluster = Arc::new(FakeCluster::new());
        let goal_store = Arc::new(RecordingGoalStore::new());
        let logs = Arc::new(BufferLogFactory::default());
        let metrics = Metrics::new();
        let deployer = Deployer::with_metrics(config, cluster.clone(), metrics.clone());
        let handler = KubernetesDeployHandler::new(deployer, goal_store.clone())
            .with_log_factory(logs.clone());
        TestKit {
            runtime,
            cluster,
            goal_store,
            logs,
            metrics,
            handler,
        }
    }

    pub fn cluster(&self) -> &FakeCluster {
        &self.cluster
    }

    pub fn goal_store(&self) -> &RecordingGoalStore {
        &self.goal_store
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    pub fn config(&self) -> &DeployerConfig {
        self.handler.deployer().config()
    }

    /// The progress messages that were written for the goal with the given unique name
    pub fn progress_messages(&self, unique_name: &str) -> Vec<String> {
        self.logs.messages(unique_name)
    }

    pub fn handle_event(&self, event: &DeployRequestEvent) -> DeployResult {
        self.runtime.block_on(self.handler.handle_event(event))
    }

    pub fn handle_goals(&self, goals: &[GoalEvent]) -> Vec<DeployResult> {
        self.runtime.block_on(self.handler.handle_goals(goals))
    }

    pub fn undeploy(
        &self,
        app: &KubernetesApplication,
    ) -> Result<Vec<ResourceOutcome>, ReconcileError> {
        let progress_log = BufferProgressLog::new("undeploy");
        self.runtime.block_on(
            self.handler
                .deployer()
                .undeploy_application(app, &progress_log),
        )
    }
}
