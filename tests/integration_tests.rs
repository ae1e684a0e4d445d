use k8s_deployer::application::{KubernetesApplication, RbacSpecs};
use k8s_deployer::prelude::*;
use k8s_deployer::resource::ObjectIdRef;
use k8s_deployer::runner::reconcile::{ReadFailurePolicy, ReconcileOutcome, RetryPolicy};
use k8s_deployer::runner::testkit::{deploy_goal, Operation, TestKit};

use k8s_deployer::serde_json::{json, Value};

static NAMESPACE: &K8sType = k8s_types::core::v1::Namespace;
static INGRESS: &K8sType = k8s_types::extensions::v1beta1::Ingress;
static SERVICE_ACCOUNT: &K8sType = k8s_types::core::v1::ServiceAccount;
static ROLE: &K8sType = k8s_types::rbac_authorization_k8s_io::v1::Role;
static ROLE_BINDING: &K8sType = k8s_types::rbac_authorization_k8s_io::v1::RoleBinding;

const DEPLOYER_NAME: &str = "@atomist/k8s-sdm_minikube";

fn config() -> DeployerConfig {
    DeployerConfig::new(DEPLOYER_NAME, "production").with_retry(RetryPolicy::immediate(3))
}

fn setup(config: DeployerConfig) -> TestKit {
    std::env::set_var("RUST_LOG", "k8s_deployer=trace");
    let _ = env_logger::try_init();
    TestKit::new(config)
}

fn app(ns: &str, name: &str) -> KubernetesApplication {
    KubernetesApplication {
        workspace_id: "KAT3BU5H".to_owned(),
        environment: "production".to_owned(),
        ns: ns.to_owned(),
        name: name.to_owned(),
        image: format!("gcr.io/kate-bush/{}/{}:5.5.10", ns, name),
        port: Some(5510),
        path: Some("/bush/kate".to_owned()),
        host: Some("emi.com".to_owned()),
        sdm_fulfiller: "EMI".to_owned(),
        ..Default::default()
    }
}

fn event(goals: Vec<GoalEvent>) -> DeployRequestEvent {
    DeployRequestEvent { goals }
}

fn str_at<'a>(value: &'a Value, pointer: &str) -> Option<&'a str> {
    value.pointer(pointer).and_then(Value::as_str)
}

#[test]
fn deploy_creates_resources_and_reports_success() {
    let testkit = setup(config());
    let app = app("hounds-of-love", "cloudbusting");
    let goal = deploy_goal(testkit.config(), "deploy#1", &app);

    let result = testkit.handle_event(&event(vec![goal]));
    assert_eq!(0, result.code, "unexpected result: {:?}", result);
    assert_eq!(None, result.message);
    assert_eq!(
        Some("Deployed `hounds-of-love/cloudbusting` to `production`"),
        result.description.as_deref()
    );

    let ingress = testkit
        .cluster()
        .get(INGRESS, &ObjectIdRef::new("hounds-of-love", "cloudbusting"))
        .expect("ingress was not created");
    assert_eq!(Some("hounds-of-love"), str_at(&ingress, "/metadata/namespace"));
    assert_eq!(Some("emi.com"), str_at(&ingress, "/spec/rules/0/host"));
    assert_eq!(
        Some("cloudbusting"),
        str_at(&ingress, "/spec/rules/0/http/paths/0/backend/serviceName")
    );
    assert!(testkit
        .cluster()
        .get(NAMESPACE, &ObjectIdRef::new("", "hounds-of-love"))
        .is_some());

    let update = testkit
        .goal_store()
        .last_update("deploy#1")
        .expect("goal was not updated");
    assert_eq!(GoalState::Success, update.state);
    assert_eq!(None, update.error);
    assert_eq!(
        vec![ExternalUrl {
            label: Some("cloudbusting".to_owned()),
            url: "http://emi.com/bush/kate/".to_owned(),
        }],
        update.external_urls
    );
    assert_eq!(update.external_urls, result.external_urls);
    assert_eq!(1, testkit.metrics().goal_count("success"));
}

#[test]
fn second_deploy_patches_existing_resources() {
    let testkit = setup(config());
    let app = app("hounds-of-love", "cloudbusting");
    let goal = deploy_goal(testkit.config(), "deploy#1", &app);

    assert_eq!(0, testkit.handle_event(&event(vec![goal.clone()])).code);
    testkit.cluster().clear_calls();
    assert_eq!(0, testkit.handle_event(&event(vec![goal])).code);

    let cluster = testkit.cluster();
    assert_eq!(0, cluster.count(Operation::Create, NAMESPACE));
    assert_eq!(0, cluster.count(Operation::Create, INGRESS));
    assert_eq!(1, cluster.count(Operation::Patch, NAMESPACE));
    assert_eq!(1, cluster.count(Operation::Patch, INGRESS));
    assert_eq!(1, cluster.resources_of_type(INGRESS).len());
}

#[test]
fn existing_resources_are_patched_with_the_template() {
    let testkit = setup(config());
    testkit.cluster().insert(
        INGRESS,
        Some("hounds-of-love"),
        json!({
            "metadata": {
                "name": "cloudbusting",
                "namespace": "hounds-of-love",
                "annotations": {"kubernetes.io/ingress.class": "nginx"},
            },
            "spec": {"rules": [{"host": "old.emi.com"}]},
        }),
    );
    let app = app("hounds-of-love", "cloudbusting");
    let goal = deploy_goal(testkit.config(), "deploy#1", &app);

    assert_eq!(0, testkit.handle_event(&event(vec![goal])).code);
    let ingress = testkit
        .cluster()
        .get(INGRESS, &ObjectIdRef::new("hounds-of-love", "cloudbusting"))
        .unwrap();
    assert_eq!(Some("emi.com"), str_at(&ingress, "/spec/rules/0/host"));
    assert_eq!(
        Some("nginx"),
        str_at(&ingress, "/metadata/annotations/kubernetes.io~1ingress.class")
    );
    assert_eq!(0, testkit.cluster().count(Operation::Create, INGRESS));
}

#[test]
fn rbac_resources_are_deployed_when_a_role_spec_is_given() {
    let testkit = setup(config());
    let mut app = app("hounds-of-love", "cloudbusting");
    app.rbac = Some(RbacSpecs {
        role_spec: Some(json!({
            "rules": [{"apiGroups": [""], "resources": ["services"], "verbs": ["get", "watch", "list"]}],
        })),
        ..Default::default()
    });
    let goal = deploy_goal(testkit.config(), "deploy#1", &app);

    assert_eq!(0, testkit.handle_event(&event(vec![goal])).code);
    let id = ObjectIdRef::new("hounds-of-love", "cloudbusting");
    let cluster = testkit.cluster();
    let role = cluster.get(ROLE, &id).expect("role was not created");
    assert_eq!(Some("services"), str_at(&role, "/rules/0/resources/0"));
    assert!(cluster.get(SERVICE_ACCOUNT, &id).is_some());
    let binding = cluster.get(ROLE_BINDING, &id).expect("binding was not created");
    assert_eq!(Some("ServiceAccount"), str_at(&binding, "/subjects/0/kind"));
    assert_eq!(Some("cloudbusting"), str_at(&binding, "/subjects/0/name"));
}

#[test]
fn goal_that_is_not_in_process_is_ignored() {
    let testkit = setup(config());
    let app = app("hounds-of-love", "cloudbusting");
    let mut goal = deploy_goal(testkit.config(), "deploy#1", &app);
    goal.state = GoalState::Requested;

    let result = testkit.handle_event(&event(vec![goal]));
    assert_eq!(0, result.code);
    assert!(testkit.cluster().calls().is_empty());
    assert!(testkit.goal_store().updates().is_empty());
    assert_eq!(
        vec!["SDM goal event is not eligible for Kubernetes deploy".to_owned()],
        testkit.progress_messages("deploy#1")
    );
    assert_eq!(1, testkit.metrics().goal_count("skipped"));
}

#[test]
fn goal_in_unrecognized_state_does_not_stop_the_others() {
    let testkit = setup(config());
    let deploy = deploy_goal(testkit.config(), "deploy#1", &app("hounds-of-love", "cloudbusting"));
    let mut unrecognized = k8s_deployer::serde_json::to_value(&deploy_goal(
        testkit.config(),
        "deploy#2",
        &app("the-dreaming", "sat-in-your-lap"),
    ))
    .unwrap();
    unrecognized["state"] = json!("waiting_for_the_wind");
    let event: DeployRequestEvent = k8s_deployer::serde_json::from_value(json!({
        "SdmGoal": [k8s_deployer::serde_json::to_value(&deploy).unwrap(), unrecognized],
    }))
    .unwrap();

    let result = testkit.handle_event(&event);
    assert_eq!(0, result.code, "unexpected result: {:?}", result);
    assert!(testkit.goal_store().last_update("deploy#1").is_some());
    assert!(testkit.goal_store().last_update("deploy#2").is_none());
    assert_eq!(1, testkit.cluster().resources_of_type(NAMESPACE).len());
}

#[test]
fn goal_for_another_deployer_is_ignored() {
    let testkit = setup(config());
    let app = app("hounds-of-love", "cloudbusting");
    let other = DeployerConfig::new("@atomist/k8s-sdm_gke", "production");
    let goal = deploy_goal(&other, "deploy#1", &app);

    assert_eq!(0, testkit.handle_event(&event(vec![goal])).code);
    assert!(testkit.cluster().calls().is_empty());
    assert!(testkit.goal_store().updates().is_empty());
}

#[test]
fn goal_without_application_data_is_ignored() {
    let testkit = setup(config());
    let app = app("hounds-of-love", "cloudbusting");
    let mut goal = deploy_goal(testkit.config(), "deploy#1", &app);
    goal.data = Some(json!({"@atomist/sdm-pack-other": {}}).to_string());

    assert_eq!(0, testkit.handle_event(&event(vec![goal])).code);
    assert!(testkit.cluster().calls().is_empty());
    assert_eq!(
        vec!["SDM goal event has no Kubernetes application data".to_owned()],
        testkit.progress_messages("deploy#1")
    );
}

#[test]
fn application_for_another_environment_is_ignored() {
    let testkit = setup(config());
    let mut app = app("hounds-of-love", "cloudbusting");
    app.environment = "testing".to_owned();
    let goal = deploy_goal(testkit.config(), "deploy#1", &app);

    assert_eq!(0, testkit.handle_event(&event(vec![goal])).code);
    assert!(testkit.cluster().calls().is_empty());
    assert!(testkit.goal_store().updates().is_empty());
    assert_eq!(
        vec!["Kubernetes application data did not match parameters for hounds-of-love/cloudbusting"
            .to_owned()],
        testkit.progress_messages("deploy#1")
    );
}

#[test]
fn incomplete_application_for_another_environment_is_ignored() {
    let testkit = setup(config());
    let mut app = app("", "cloudbusting");
    app.environment = "testing".to_owned();
    let goal = deploy_goal(testkit.config(), "deploy#1", &app);

    let result = testkit.handle_event(&event(vec![goal]));
    assert_eq!(0, result.code, "unexpected result: {:?}", result);
    assert_eq!(None, result.message);
    assert!(testkit.goal_store().updates().is_empty());
    assert!(testkit.cluster().calls().is_empty());
}

#[test]
fn application_with_empty_path_gets_no_ingress() {
    let testkit = setup(config());
    let mut app = app("hounds-of-love", "cloudbusting");
    app.path = Some(String::new());
    let goal = deploy_goal(testkit.config(), "deploy#1", &app);

    let result = testkit.handle_event(&event(vec![goal]));
    assert_eq!(0, result.code);
    assert!(result.external_urls.is_empty());
    assert_eq!(0, testkit.cluster().count(Operation::Read, INGRESS));
    assert!(testkit.cluster().resources_of_type(INGRESS).is_empty());
    assert_eq!(1, testkit.cluster().resources_of_type(NAMESPACE).len());
}

#[test]
fn application_in_unmanaged_namespace_is_ignored() {
    let testkit = setup(config().manages_namespace("the-dreaming"));
    let app = app("hounds-of-love", "cloudbusting");
    let goal = deploy_goal(testkit.config(), "deploy#1", &app);

    assert_eq!(0, testkit.handle_event(&event(vec![goal])).code);
    assert!(testkit.cluster().calls().is_empty());
}

#[test]
fn malformed_goal_data_fails_the_goal() {
    let testkit = setup(config());
    let app = app("hounds-of-love", "cloudbusting");
    let mut goal = deploy_goal(testkit.config(), "deploy#1", &app);
    goal.data = Some("{\"@atomist/sdm-pack-k8s\": ".to_owned());

    let result = testkit.handle_event(&event(vec![goal]));
    assert_eq!(1, result.code);
    let message = result.message.expect("failure has no message");
    assert!(
        message.starts_with("Invalid goal event data: "),
        "unexpected message: {}",
        message
    );
    let update = testkit.goal_store().last_update("deploy#1").unwrap();
    assert_eq!(GoalState::Failure, update.state);
    assert_eq!(message, update.description);
    assert_eq!(Some(message), update.error);
    assert!(testkit.cluster().calls().is_empty());
    assert_eq!(1, testkit.metrics().goal_count("failure"));
}

#[test]
fn missing_workspace_id_is_taken_from_the_config() {
    let testkit = setup(config().with_workspace_id("TH3DR3AM1NG"));
    let mut app = app("hounds-of-love", "cloudbusting");
    app.workspace_id = String::new();
    let goal = deploy_goal(testkit.config(), "deploy#1", &app);

    assert_eq!(0, testkit.handle_event(&event(vec![goal])).code);
    let ns = testkit
        .cluster()
        .get(NAMESPACE, &ObjectIdRef::new("", "hounds-of-love"))
        .unwrap();
    assert_eq!(
        Some("TH3DR3AM1NG"),
        str_at(&ns, "/metadata/labels/atomist.com~1workspaceId")
    );
}

#[test]
fn missing_workspace_id_fails_the_goal() {
    let testkit = setup(config());
    let mut app = app("hounds-of-love", "cloudbusting");
    app.workspace_id = String::new();
    let goal = deploy_goal(testkit.config(), "deploy#1", &app);

    let result = testkit.handle_event(&event(vec![goal]));
    assert_eq!(1, result.code);
    assert_eq!(
        Some("Invalid goal event data: missing required field 'workspaceId'"),
        result.message.as_deref()
    );
}

#[test]
fn invalid_override_fails_before_any_cluster_call() {
    let testkit = setup(config());
    let mut app = app("hounds-of-love", "cloudbusting");
    app.ingress_spec = Some(json!({"metadata": {"labels": "not-a-map"}}));
    let goal = deploy_goal(testkit.config(), "deploy#1", &app);

    let result = testkit.handle_event(&event(vec![goal]));
    assert_eq!(1, result.code);
    let message = result.message.unwrap();
    assert!(
        message.starts_with("Failed to deploy hounds-of-love/cloudbusting: Invalid ingress spec: "),
        "unexpected message: {}",
        message
    );
    assert!(testkit.cluster().calls().is_empty());
}

#[test]
fn cluster_failure_fails_the_goal_after_retries() {
    let testkit = setup(config());
    testkit.cluster().fail_always(
        Operation::Create,
        INGRESS,
        403,
        "ingresses.extensions is forbidden: User \"system:serviceaccount:default:k8s-sdm\" cannot create resource",
    );
    let app = app("hounds-of-love", "cloudbusting");
    let goal = deploy_goal(testkit.config(), "deploy#1", &app);

    let result = testkit.handle_event(&event(vec![goal]));
    assert_eq!(1, result.code);
    let expected = "Failed to deploy hounds-of-love/cloudbusting: ingresses.extensions is forbidden: User \"system:serviceaccount:default:k8s-sdm\" cannot create resource";
    assert_eq!(Some(expected), result.message.as_deref());
    assert_eq!(3, testkit.cluster().count(Operation::Create, INGRESS));

    let update = testkit.goal_store().last_update("deploy#1").unwrap();
    assert_eq!(GoalState::Failure, update.state);
    assert_eq!(expected, update.description);
    assert!(testkit
        .progress_messages("deploy#1")
        .contains(&expected.to_owned()));
}

#[test]
fn transient_cluster_failure_is_retried() {
    let testkit = setup(config());
    testkit
        .cluster()
        .fail_times(Operation::Create, NAMESPACE, 2, 500, "etcdserver: request timed out");
    let app = app("hounds-of-love", "cloudbusting");
    let goal = deploy_goal(testkit.config(), "deploy#1", &app);

    assert_eq!(0, testkit.handle_event(&event(vec![goal])).code);
    assert_eq!(3, testkit.cluster().count(Operation::Create, NAMESPACE));
    let metrics = String::from_utf8(testkit.metrics().encode_as_text().unwrap()).unwrap();
    assert!(
        metrics.contains("retries{kind=\"Namespace\"} 2"),
        "unexpected metrics: {}",
        metrics
    );
}

#[test]
fn read_failure_is_treated_as_absent_by_default() {
    let testkit = setup(config());
    testkit
        .cluster()
        .fail_always(Operation::Read, NAMESPACE, 500, "etcdserver: leader changed");
    let app = app("hounds-of-love", "cloudbusting");
    let goal = deploy_goal(testkit.config(), "deploy#1", &app);

    assert_eq!(0, testkit.handle_event(&event(vec![goal])).code);
    assert_eq!(1, testkit.cluster().count(Operation::Create, NAMESPACE));
}

#[test]
fn read_failure_fails_the_goal_when_not_found_is_required() {
    let testkit =
        setup(config().with_read_failure_policy(ReadFailurePolicy::RequireNotFound));
    testkit
        .cluster()
        .fail_always(Operation::Read, NAMESPACE, 500, "etcdserver: leader changed");
    let app = app("hounds-of-love", "cloudbusting");
    let goal = deploy_goal(testkit.config(), "deploy#1", &app);

    let result = testkit.handle_event(&event(vec![goal]));
    assert_eq!(1, result.code);
    assert_eq!(
        Some("Failed to deploy hounds-of-love/cloudbusting: etcdserver: leader changed"),
        result.message.as_deref()
    );
    assert_eq!(0, testkit.cluster().count(Operation::Create, NAMESPACE));
}

#[test]
fn goal_store_failure_after_deploy_failure_returns_code_2() {
    let testkit = setup(config());
    testkit
        .cluster()
        .fail_always(Operation::Create, NAMESPACE, 403, "namespaces is forbidden");
    testkit.goal_store().fail_updates("goal store is down");
    let app = app("hounds-of-love", "cloudbusting");
    let goal = deploy_goal(testkit.config(), "deploy#1", &app);

    let result = testkit.handle_event(&event(vec![goal]));
    assert_eq!(2, result.code);
    let message = result.message.unwrap();
    assert!(
        message.starts_with(
            "Failed to deploy hounds-of-love/cloudbusting: namespaces is forbidden; Failed to update SDM goal '"
        ),
        "unexpected message: {}",
        message
    );
    assert!(message.ends_with("': goal store is down"));
}

#[test]
fn goal_store_failure_after_successful_deploy_returns_code_2() {
    let testkit = setup(config());
    testkit.goal_store().fail_updates("goal store is down");
    let app = app("hounds-of-love", "cloudbusting");
    let goal = deploy_goal(testkit.config(), "deploy#1", &app);

    let result = testkit.handle_event(&event(vec![goal]));
    assert_eq!(2, result.code);
    let message = result.message.unwrap();
    assert!(
        message.starts_with("goal store is down; Failed to update SDM goal '"),
        "unexpected message: {}",
        message
    );
    assert!(message.contains("\"state\":\"success\""));
    assert!(testkit
        .cluster()
        .get(INGRESS, &ObjectIdRef::new("hounds-of-love", "cloudbusting"))
        .is_some());
}

#[test]
fn goals_in_one_event_are_handled_independently() {
    let testkit = setup(config());
    testkit
        .cluster()
        .fail_always(Operation::Create, ROLE, 403, "roles is forbidden");
    let ok = app("hounds-of-love", "cloudbusting");
    let mut failing = app("the-dreaming", "sat-in-your-lap");
    failing.rbac = Some(RbacSpecs {
        role_spec: Some(json!({})),
        ..Default::default()
    });
    let mut skipped = deploy_goal(testkit.config(), "deploy#3", &app("never-for-ever", "babooshka"));
    skipped.state = GoalState::Success;
    let goals = vec![
        deploy_goal(testkit.config(), "deploy#1", &ok),
        deploy_goal(testkit.config(), "deploy#2", &failing),
        skipped,
    ];

    let results = testkit.handle_goals(goals.as_slice());
    assert_eq!(vec![0, 1, 0], results.iter().map(|r| r.code).collect::<Vec<_>>());
    assert_eq!(
        Some("Failed to deploy the-dreaming/sat-in-your-lap: roles is forbidden"),
        results[1].message.as_deref()
    );

    let combined = testkit.handle_event(&event(goals));
    assert_eq!(1, combined.code);
    assert_eq!(
        Some("Failed to deploy the-dreaming/sat-in-your-lap: roles is forbidden"),
        combined.message.as_deref()
    );
}

#[test]
fn event_without_goals_is_a_success() {
    let testkit = setup(config());
    let event: DeployRequestEvent = k8s_deployer::serde_json::from_value(json!({})).unwrap();
    assert_eq!(0, testkit.handle_event(&event).code);
}

#[test]
fn undeploy_deletes_all_but_the_namespace() {
    let testkit = setup(config());
    let mut app = app("hounds-of-love", "cloudbusting");
    app.rbac = Some(RbacSpecs {
        role_spec: Some(json!({})),
        ..Default::default()
    });
    let goal = deploy_goal(testkit.config(), "deploy#1", &app);
    assert_eq!(0, testkit.handle_event(&event(vec![goal])).code);

    let outcomes = testkit.undeploy(&app).expect("undeploy failed");
    assert_eq!(4, outcomes.len());
    assert!(outcomes
        .iter()
        .all(|o| o.outcome == ReconcileOutcome::Deleted));
    let cluster = testkit.cluster();
    assert!(cluster.resources_of_type(INGRESS).is_empty());
    assert!(cluster.resources_of_type(ROLE).is_empty());
    assert!(cluster.resources_of_type(ROLE_BINDING).is_empty());
    assert!(cluster.resources_of_type(SERVICE_ACCOUNT).is_empty());
    assert_eq!(1, cluster.resources_of_type(NAMESPACE).len());
}
