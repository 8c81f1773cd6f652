mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use pretty_assertions::assert_eq;
use serde_json::{json, Value};

use common::{counting, NativeService, ScriptedModel, StalledModel};
use toolmux::{
    handler_fn, Classification, Dispatcher, DispatcherConfig, InstructionOptions, ModelClient, ModelReply, Params,
    SystemService, ToolError, ToolRegistry,
};

struct Fixture {
    registry: Arc<ToolRegistry>,
    pulls: Arc<AtomicUsize>,
    networks: Arc<AtomicUsize>,
}

fn fixture() -> Fixture {
    let registry = Arc::new(ToolRegistry::new());
    let pulls = Arc::new(AtomicUsize::new(0));
    let networks = Arc::new(AtomicUsize::new(0));
    let schema = json!({
        "type": "object",
        "properties": { "name": { "type": "string" } },
        "required": ["name"]
    });
    registry.register_service(Arc::new(
        NativeService::new("docker")
            .tool("pull_image", "Pull an image", schema.clone(), counting(pulls.clone()))
            .tool("create_network", "Create a network", schema, counting(networks.clone())),
    ));
    registry.register_service(Arc::new(NativeService::new("git").tool(
        "git_commit",
        "Commit staged changes",
        json!({ "type": "object" }),
        handler_fn(|_ctx, _params| async { Err(ToolError::failed("nothing to commit")) }),
    )));
    SystemService::install(&registry);
    Fixture {
        registry,
        pulls,
        networks,
    }
}

fn dispatcher(registry: &Arc<ToolRegistry>, model: Arc<dyn ModelClient>) -> Dispatcher {
    Dispatcher::new(registry.clone(), model)
}

fn names(value: &Value) -> Vec<String> {
    let mut names: Vec<String> = serde_json::from_value(value.clone()).unwrap();
    names.sort();
    names
}

#[tokio::test]
async fn two_step_plan_runs_in_order() {
    let f = fixture();
    let d = dispatcher(&f.registry, ScriptedModel::new(vec![]));
    let resp = d
        .execute_plan(
            r#"[
                {"action": "pull_image", "parameters": {"name": "mysql", "tag": "latest"}},
                {"action": "functions.create_network", "parameters": {"name": "mysql_network"}}
            ]"#,
        )
        .await;

    assert!(resp.is_success());
    let result = resp.result.unwrap();
    assert_eq!(result["status"], "success");
    assert_eq!(result["message"], "Plan executed successfully");
    assert_eq!(result["outputs"][0]["action"], "pull_image");
    assert_eq!(result["outputs"][0]["output"]["params"]["tag"], "latest");
    assert_eq!(result["outputs"][1]["action"], "create_network");
    assert_eq!(f.pulls.load(Ordering::SeqCst), 1);
    assert_eq!(f.networks.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn unknown_second_step_stops_after_first() {
    let f = fixture();
    let d = dispatcher(&f.registry, ScriptedModel::new(vec![]));
    let resp = d
        .execute_plan(r#"[{"action":"pull_image","parameters":{"name":"mysql"}},{"action":"deploy_cluster"},{"action":"create_network","parameters":{"name":"n"}}]"#)
        .await;

    assert_eq!(resp.error_code(), Some(-32601));
    assert_eq!(resp.error.unwrap().message, "unknown action: deploy_cluster");
    assert_eq!(f.pulls.load(Ordering::SeqCst), 1);
    assert_eq!(f.networks.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn handler_failure_names_the_action_and_aborts() {
    let f = fixture();
    let d = dispatcher(&f.registry, ScriptedModel::new(vec![]));
    let resp = d
        .execute_plan(r#"[{"action":"git_commit"},{"action":"pull_image","parameters":{"name":"x"}}]"#)
        .await;

    assert_eq!(resp.error_code(), Some(-32000));
    assert_eq!(
        resp.error.unwrap().message,
        "failed to execute tool git_commit: nothing to commit"
    );
    assert_eq!(f.pulls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn single_object_plan_equals_one_element_array() {
    let f = fixture();
    let d = dispatcher(&f.registry, ScriptedModel::new(vec![]));
    let object = d.execute_plan(r#"{"action":"pull_image","parameters":{"name":"mysql"}}"#).await;
    let array = d.execute_plan(r#"[{"action":"pull_image","parameters":{"name":"mysql"}}]"#).await;
    assert_eq!(object, array);
    assert_eq!(f.pulls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn empty_and_malformed_plans() {
    let f = fixture();
    let d = dispatcher(&f.registry, ScriptedModel::new(vec![]));

    assert_eq!(d.execute_plan("").await.error_code(), Some(-32602));
    assert_eq!(d.execute_plan("[]").await.error_code(), Some(-32602));
    assert_eq!(d.execute_plan("{}").await.error_code(), Some(-32602));
    assert_eq!(d.execute_plan("{not json").await.error_code(), Some(-32700));
    assert_eq!(d.execute_plan("\"text\"").await.error_code(), Some(-32700));
    assert_eq!(
        d.execute_plan(r#"{"action":"pull_image","parameters":"mysql"}"#).await.error_code(),
        Some(-32602)
    );
    assert_eq!(f.pulls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn meta_queries_never_call_the_model() {
    let f = fixture();
    let model = ScriptedModel::new(vec![]);
    let d = dispatcher(&f.registry, model.clone());

    let services = d
        .process_instruction("what services are available", InstructionOptions::default())
        .await;
    assert_eq!(
        names(&services.result.unwrap()),
        vec!["docker".to_string(), "git".to_string(), "toolmux".to_string()]
    );

    let git = d
        .process_instruction("list tools for git", InstructionOptions::default())
        .await;
    assert_eq!(names(&git.result.unwrap()), vec!["git_commit: Commit staged changes".to_string()]);

    let all = d
        .process_instruction("list all available tools", InstructionOptions::default())
        .await;
    assert_eq!(names(&all.result.unwrap()).len(), 5);

    assert_eq!(model.calls(), 0);
}

#[tokio::test]
async fn builtin_service_name_does_not_match_inside_words() {
    let f = fixture();
    let model = ScriptedModel::new(vec![]);
    let d = dispatcher(&f.registry, model.clone());

    assert_eq!(
        d.classify("list tools for the filesystem"),
        Classification::ListTools { service: None }
    );
    let resp = d
        .process_instruction("list tools for the filesystem", InstructionOptions::default())
        .await;
    assert_eq!(names(&resp.result.unwrap()).len(), 5);
    assert_eq!(model.calls(), 0);
}

#[tokio::test]
async fn model_text_is_executed_as_a_plan() {
    let f = fixture();
    let model = ScriptedModel::new(vec![ModelReply::text(
        "```json\n[{\"action\":\"pull_image\",\"parameters\":{\"name\":\"mysql\"}}]\n```",
    )]);
    let d = dispatcher(&f.registry, model.clone());

    let resp = d
        .process_instruction("pull the mysql image", InstructionOptions::default())
        .await;
    assert!(resp.is_success(), "{:?}", resp.error);
    assert_eq!(f.pulls.load(Ordering::SeqCst), 1);

    let request = &model.requests()[0];
    assert_eq!(request.instruction, "pull the mysql image");
    assert_eq!(request.tools.len(), 5);
    assert!(request.directive.contains("docker service"));
}

#[tokio::test]
async fn function_call_runs_once_and_is_confirmed() {
    let f = fixture();
    let model = ScriptedModel::new(vec![ModelReply::call("pull_image", r#"{"name":"redis"}"#)]);
    let d = dispatcher(&f.registry, model);

    let resp = d
        .process_instruction("get me redis", InstructionOptions::default())
        .await;
    assert_eq!(resp.result, Some(json!("Tool pull_image executed successfully")));
    assert_eq!(f.pulls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn function_call_errors() {
    let f = fixture();
    let model = ScriptedModel::new(vec![
        ModelReply::call("pull_image", "{not json"),
        ModelReply::call("scale_cluster", "{}"),
        ModelReply::call("git_commit", "{}"),
    ]);
    let d = dispatcher(&f.registry, model);
    let opts = InstructionOptions::default;

    assert_eq!(d.process_instruction("a", opts()).await.error_code(), Some(-32700));
    assert_eq!(d.process_instruction("b", opts()).await.error_code(), Some(-32601));
    assert_eq!(d.process_instruction("c", opts()).await.error_code(), Some(-32000));
    assert_eq!(f.pulls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn per_call_directive_does_not_leak() {
    let f = fixture();
    let model = ScriptedModel::new(vec![
        ModelReply::text(r#"[{"action":"list_services"}]"#),
        ModelReply::text(r#"[{"action":"list_services"}]"#),
    ]);
    let d = dispatcher(&f.registry, model.clone());

    d.process_instruction("first", InstructionOptions::with_directive("Only use git."))
        .await;
    d.process_instruction("second", InstructionOptions::default()).await;

    let requests = model.requests();
    assert_eq!(requests[0].directive, "Only use git.");
    assert_ne!(requests[1].directive, "Only use git.");
    assert!(requests[1].directive.contains("Capabilities"));
}

#[tokio::test]
async fn model_timeout_is_an_execution_error() {
    let f = fixture();
    let d = dispatcher(&f.registry, Arc::new(StalledModel)).with_config(DispatcherConfig {
        model_timeout: Duration::from_millis(50),
        ..DispatcherConfig::default()
    });
    let resp = d
        .process_instruction("pull mysql", InstructionOptions::default())
        .await;
    assert_eq!(resp.error_code(), Some(-32000));
    assert!(resp.error.unwrap().message.contains("timed out"));
}

#[tokio::test]
async fn slow_handler_hits_the_tool_deadline() {
    let registry = Arc::new(ToolRegistry::new());
    registry.register_service_tool(
        "k8s",
        "rollout",
        "",
        json!({}),
        handler_fn(|_ctx, _params| async {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok(Value::Null)
        }),
    );
    let d = dispatcher(&registry, ScriptedModel::new(vec![])).with_config(DispatcherConfig {
        tool_timeout: Duration::from_millis(50),
        ..DispatcherConfig::default()
    });

    let resp = d.execute_plan(r#"[{"action":"rollout"}]"#).await;
    assert_eq!(resp.error_code(), Some(-32000));
    assert!(resp.error.unwrap().message.contains("rollout"));
}

#[tokio::test]
async fn call_tool_envelope() {
    let f = fixture();
    let d = dispatcher(&f.registry, ScriptedModel::new(vec![]));

    let mut params = Params::new();
    params.insert("name".into(), json!("mysql"));
    let ok = d.call_tool("pull_image", params).await;
    let result = ok.result.unwrap();
    assert_eq!(result["status"], "success");
    assert_eq!(result["message"], "Tool pull_image executed successfully");
    assert_eq!(result["output"]["params"]["name"], "mysql");

    assert_eq!(d.call_tool("nope", Params::new()).await.error_code(), Some(-32601));
    assert_eq!(d.call_tool("git_commit", Params::new()).await.error_code(), Some(-32000));
}

#[tokio::test]
async fn parameter_validation_is_opt_in() {
    let f = fixture();
    let lenient = dispatcher(&f.registry, ScriptedModel::new(vec![]));
    assert!(lenient.call_tool("pull_image", Params::new()).await.is_success());

    let strict = dispatcher(&f.registry, ScriptedModel::new(vec![])).with_config(DispatcherConfig {
        validate_parameters: true,
        ..DispatcherConfig::default()
    });
    assert_eq!(strict.call_tool("pull_image", Params::new()).await.error_code(), Some(-32602));
    assert_eq!(f.pulls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn builtin_listing_actions_work_inside_plans() {
    let f = fixture();
    let d = dispatcher(&f.registry, ScriptedModel::new(vec![]));
    let resp = d
        .execute_plan(r#"[{"action":"list_tools","parameters":{"name":"Docker"}}]"#)
        .await;
    let output = resp.result.unwrap()["outputs"][0]["output"].clone();
    assert_eq!(
        names(&output),
        vec!["create_network: Create a network".to_string(), "pull_image: Pull an image".to_string()]
    );
}
