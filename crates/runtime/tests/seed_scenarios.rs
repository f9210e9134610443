//! End-to-end agent and workflow scenarios over scripted LLM turns and
//! fake MCP sessions.

mod common;

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use common::{
    build_facade, config_from, count_role, session_spec, FakeServer, FakeTool, ScriptedProvider,
    ScriptedTurn,
};
use maestro_domain::cancel::CancelToken;
use maestro_domain::error::Error;
use maestro_domain::tool::{ContentPart, MessageContent, Role};
use maestro_providers::LlmProvider;
use maestro_runtime::{AgentStatus, WorkflowStatus};

fn weather_config(max_iterations: u32) -> maestro_domain::config::Config {
    config_from(json!({
        "llm_configs": [{ "id": "default", "provider_tag": "scripted", "model": "test" }],
        "agents": [{
            "name": "W",
            "llm_config_id": "default",
            "max_iterations": max_iterations,
        }],
    }))
}

#[tokio::test]
async fn single_tool_weather_call() {
    let provider = ScriptedProvider::new(
        "scripted",
        vec![
            ScriptedTurn::tool_call("c1", "weather_lookup", json!({"city": "London"})),
            ScriptedTurn::text("12°C and cloudy in London."),
        ],
    );
    let server = FakeServer::new(vec![FakeTool::ok(
        "weather_lookup",
        r#"{"temp":12,"condition":"cloudy"}"#,
    )]);
    let facade = build_facade(
        weather_config(3),
        vec![(session_spec("weather", 1.0), server.clone())],
        vec![provider.clone() as Arc<dyn LlmProvider>],
        None,
    )
    .await;

    let result = facade
        .run_agent("W", "Weather in London?", None, &CancelToken::new())
        .await
        .unwrap();

    assert_eq!(result.status, AgentStatus::Success);
    assert_eq!(result.final_text.as_deref(), Some("12°C and cloudy in London."));
    // Usage accumulates across both completions.
    assert_eq!(result.usage.total_tokens, 4);
    assert_eq!(count_role(&result.history, Role::Assistant), 2);
    assert_eq!(count_role(&result.history, Role::Tool), 1);
    assert_eq!(count_role(&result.history, Role::User), 1);

    // The session saw exactly the scripted arguments.
    let calls = server.recorded_calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].0, "weather_lookup");
    assert_eq!(calls[0].1, json!({"city": "London"}));
}

#[tokio::test]
async fn tool_failure_is_surfaced_to_the_llm_not_fatal() {
    let provider = ScriptedProvider::new(
        "scripted",
        vec![
            ScriptedTurn::tool_call("c1", "weather_lookup", json!({"city": "London"})),
            ScriptedTurn::text("Try again shortly."),
        ],
    );
    let server = FakeServer::new(vec![FakeTool::failing("weather_lookup", "rate limited")]);
    let facade = build_facade(
        weather_config(3),
        vec![(session_spec("weather", 1.0), server)],
        vec![provider as Arc<dyn LlmProvider>],
        None,
    )
    .await;

    let result = facade
        .run_agent("W", "Weather in London?", None, &CancelToken::new())
        .await
        .unwrap();

    assert_eq!(result.status, AgentStatus::Success);
    assert_eq!(result.final_text.as_deref(), Some("Try again shortly."));

    let tool_msg = result
        .history
        .iter()
        .find(|m| m.role == Role::Tool)
        .expect("tool message present");
    match &tool_msg.content {
        MessageContent::Parts(parts) => match &parts[0] {
            ContentPart::ToolResult {
                content, is_error, ..
            } => {
                assert!(*is_error);
                assert_eq!(content, "rate limited");
            }
            other => panic!("unexpected part {other:?}"),
        },
        other => panic!("unexpected content {other:?}"),
    }
}

#[tokio::test]
async fn max_iterations_bounds_the_loop() {
    // The LLM issues a tool call on every turn; the loop must stop after
    // exactly the configured number of iterations.
    let provider = ScriptedProvider::repeating(
        "scripted",
        ScriptedTurn::tool_call("c1", "weather_lookup", json!({"city": "London"})),
    );
    let server = FakeServer::new(vec![FakeTool::ok("weather_lookup", "sunny")]);
    let config = config_from(json!({
        "llm_configs": [{ "id": "default", "provider_tag": "scripted", "model": "test" }],
        "agents": [{
            "name": "W",
            "llm_config_id": "default",
            "system_prompt": "You answer weather questions.",
            "max_iterations": 2,
        }],
    }));
    let facade = build_facade(
        config,
        vec![(session_spec("weather", 1.0), server)],
        vec![provider.clone() as Arc<dyn LlmProvider>],
        None,
    )
    .await;

    let result = facade
        .run_agent("W", "Weather in London?", None, &CancelToken::new())
        .await
        .unwrap();

    assert_eq!(result.status, AgentStatus::MaxIterationsReached);
    assert_eq!(provider.completions(), 2);
    // system + user + 2 × (assistant + tool)
    assert_eq!(result.history.len(), 6);
    assert_eq!(count_role(&result.history, Role::System), 1);
    assert_eq!(count_role(&result.history, Role::Assistant), 2);
    assert_eq!(count_role(&result.history, Role::Tool), 2);
}

#[tokio::test]
async fn two_step_sequential_workflow_pipes_text_forward() {
    let provider_a = ScriptedProvider::new("prov_a", vec![ScriptedTurn::text("SF: 15°C sunny")]);
    let provider_b =
        ScriptedProvider::new("prov_b", vec![ScriptedTurn::text("Wear a light jacket.")]);
    let config = config_from(json!({
        "llm_configs": [
            { "id": "llm_a", "provider_tag": "prov_a", "model": "test" },
            { "id": "llm_b", "provider_tag": "prov_b", "model": "test" },
        ],
        "agents": [
            { "name": "A", "llm_config_id": "llm_a" },
            { "name": "B", "llm_config_id": "llm_b" },
        ],
        "workflows": [
            { "kind": "sequential", "name": "forecast", "steps": ["A", "B"] },
        ],
    }));
    let facade = build_facade(
        config,
        vec![],
        vec![
            provider_a as Arc<dyn LlmProvider>,
            provider_b.clone() as Arc<dyn LlmProvider>,
        ],
        None,
    )
    .await;

    let result = facade
        .run_workflow("forecast", "Forecast for SF?", None, &CancelToken::new())
        .await
        .unwrap();

    assert_eq!(result.status, WorkflowStatus::Success);
    assert_eq!(result.final_text.as_deref(), Some("Wear a light jacket."));
    assert_eq!(result.steps.len(), 2);
    assert_eq!(result.steps[0].final_text.as_deref(), Some("SF: 15°C sunny"));

    // B's input was exactly A's final text.
    assert_eq!(provider_b.seen_inputs(), vec!["SF: 15°C sunny".to_string()]);
}

#[tokio::test]
async fn session_teardown_mid_call_feeds_error_back_to_llm() {
    let provider = ScriptedProvider::new(
        "scripted",
        vec![
            ScriptedTurn::tool_call("c1", "slow_tool", json!({})),
            ScriptedTurn::text("recovered"),
        ],
    );
    let slow = FakeServer::with_delay(
        vec![FakeTool::ok("slow_tool", "never seen")],
        Duration::from_secs(5),
    );
    let other = FakeServer::new(vec![FakeTool::ok("other_tool", "fine")]);
    let config = config_from(json!({
        "llm_configs": [{ "id": "default", "provider_tag": "scripted", "model": "test" }],
        "agents": [{ "name": "W", "llm_config_id": "default", "max_iterations": 3 }],
    }));
    let facade = build_facade(
        config,
        vec![
            (session_spec("slow", 1.0), slow),
            (session_spec("other", 1.0), other),
        ],
        vec![provider as Arc<dyn LlmProvider>],
        None,
    )
    .await;

    let host = facade.host().clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        host.deregister_session("slow").await;
    });

    let result = facade
        .run_agent("W", "run the slow tool", None, &CancelToken::new())
        .await
        .unwrap();

    // The failed call became an is_error tool message and the agent's
    // next turn proceeded normally.
    assert_eq!(result.status, AgentStatus::Success);
    assert_eq!(result.final_text.as_deref(), Some("recovered"));
    let tool_msg = result
        .history
        .iter()
        .find(|m| m.role == Role::Tool)
        .expect("tool message present");
    match &tool_msg.content {
        MessageContent::Parts(parts) => match &parts[0] {
            ContentPart::ToolResult {
                content, is_error, ..
            } => {
                assert!(*is_error);
                assert!(content.contains("slow"), "unexpected content: {content}");
            }
            other => panic!("unexpected part {other:?}"),
        },
        other => panic!("unexpected content {other:?}"),
    }

    // The sibling session is untouched.
    assert_eq!(
        facade.host().ready_sessions(),
        vec!["other".to_string()]
    );
}

#[tokio::test]
async fn routing_weight_picks_the_heavier_session() {
    let provider = ScriptedProvider::new(
        "scripted",
        vec![
            ScriptedTurn::tool_call("c1", "echo", json!({})),
            ScriptedTurn::text("done"),
        ],
    );
    let a = FakeServer::new(vec![FakeTool::ok("echo", "a answered")]);
    let b = FakeServer::new(vec![FakeTool::ok("echo", "b answered")]);
    let facade = build_facade(
        weather_config(3),
        vec![
            (session_spec("a", 1.0), a.clone()),
            (session_spec("b", 2.0), b.clone()),
        ],
        vec![provider as Arc<dyn LlmProvider>],
        None,
    )
    .await;

    let result = facade
        .run_agent("W", "echo something", None, &CancelToken::new())
        .await
        .unwrap();

    assert_eq!(result.status, AgentStatus::Success);
    assert!(a.recorded_calls().is_empty());
    assert_eq!(b.recorded_calls().len(), 1);
    let tool_msg = result
        .history
        .iter()
        .find(|m| m.role == Role::Tool)
        .unwrap();
    assert!(tool_msg.content.extract_all_text().is_empty());
    match &tool_msg.content {
        MessageContent::Parts(parts) => match &parts[0] {
            ContentPart::ToolResult { content, .. } => assert_eq!(content, "b answered"),
            other => panic!("unexpected part {other:?}"),
        },
        other => panic!("unexpected content {other:?}"),
    }
}

#[tokio::test]
async fn tool_results_append_in_call_order_not_completion_order() {
    use maestro_domain::tool::ToolCall;

    // c1 is the slowest and c3 the fastest; the transcript must still
    // read c1, c2, c3.
    let provider = ScriptedProvider::new(
        "scripted",
        vec![
            ScriptedTurn::with_calls(vec![
                ToolCall {
                    call_id: "c1".into(),
                    tool_name: "t1".into(),
                    arguments: json!({}),
                },
                ToolCall {
                    call_id: "c2".into(),
                    tool_name: "t2".into(),
                    arguments: json!({}),
                },
                ToolCall {
                    call_id: "c3".into(),
                    tool_name: "t3".into(),
                    arguments: json!({}),
                },
            ]),
            ScriptedTurn::text("done"),
        ],
    );
    let server = FakeServer::new(vec![
        FakeTool::slow("t1", "one", Duration::from_millis(300)),
        FakeTool::slow("t2", "two", Duration::from_millis(150)),
        FakeTool::ok("t3", "three"),
    ]);
    let facade = build_facade(
        weather_config(3),
        vec![(session_spec("s", 1.0), server.clone())],
        vec![provider as Arc<dyn LlmProvider>],
        None,
    )
    .await;

    let result = facade
        .run_agent("W", "fan out", None, &CancelToken::new())
        .await
        .unwrap();
    assert_eq!(result.status, AgentStatus::Success);

    let tool_ids: Vec<String> = result
        .history
        .iter()
        .filter(|m| m.role == Role::Tool)
        .filter_map(|m| match &m.content {
            MessageContent::Parts(parts) => match &parts[0] {
                ContentPart::ToolResult { tool_use_id, .. } => Some(tool_use_id.clone()),
                _ => None,
            },
            _ => None,
        })
        .collect();
    assert_eq!(tool_ids, vec!["c1".to_string(), "c2".to_string(), "c3".to_string()]);

    // The calls themselves ran concurrently against the session.
    assert_eq!(server.recorded_calls().len(), 3);
}

#[tokio::test]
async fn cancelling_a_run_aborts_the_inflight_tool_call() {
    let provider = ScriptedProvider::new(
        "scripted",
        vec![ScriptedTurn::tool_call("c1", "slow_tool", json!({}))],
    );
    let slow = FakeServer::with_delay(
        vec![FakeTool::ok("slow_tool", "never")],
        Duration::from_secs(10),
    );
    let facade = build_facade(
        weather_config(3),
        vec![(session_spec("slow", 1.0), slow)],
        vec![provider as Arc<dyn LlmProvider>],
        None,
    )
    .await;

    let cancel = CancelToken::new();
    let canceller = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        canceller.cancel();
    });

    let start = std::time::Instant::now();
    let result = facade
        .run_agent("W", "run it", None, &cancel)
        .await
        .unwrap();

    assert_eq!(result.status, AgentStatus::Error);
    assert!(matches!(result.error, Some(Error::Cancelled)));
    assert!(start.elapsed() < Duration::from_secs(2));

    // Cancellation aborts the request, not the session.
    assert_eq!(facade.host().ready_sessions(), vec!["slow".to_string()]);
}

#[tokio::test]
async fn unknown_agent_is_not_found() {
    let facade = build_facade(weather_config(3), vec![], vec![], None).await;
    let err = facade
        .run_agent("ghost", "hi", None, &CancelToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::NotFound(_)));
}

#[tokio::test]
async fn empty_message_is_a_validation_error() {
    let facade = build_facade(weather_config(3), vec![], vec![], None).await;
    let err = facade
        .run_agent("W", "   ", None, &CancelToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Validation(_)));
}
