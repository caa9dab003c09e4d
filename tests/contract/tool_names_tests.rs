//! Tool surface advertised to agents: names and input schemas.

use agent_relay::mcp::handler::{RelayServer, TOOL_NAMES};
use serde_json::{json, Value};

fn schema_of(name: &str) -> Value {
    let tool = RelayServer::all_tools()
        .into_iter()
        .find(|t| t.name == name)
        .unwrap_or_else(|| panic!("tool {name} is not advertised"));
    Value::Object((*tool.input_schema).clone())
}

#[test]
fn advertised_tools_match_the_name_list() {
    let names: Vec<String> = RelayServer::all_tools()
        .into_iter()
        .map(|t| t.name.to_string())
        .collect();
    assert_eq!(names, TOOL_NAMES);
}

#[test]
fn every_tool_has_a_description() {
    for tool in RelayServer::all_tools() {
        assert!(
            tool.description.as_deref().is_some_and(|d| !d.is_empty()),
            "{} lacks a description",
            tool.name
        );
    }
}

// ── Required fields ──────────────────────────────────────────────────

#[test]
fn ask_requires_only_question() {
    let schema = schema_of("ask");
    assert_eq!(schema["required"], json!(["question"]));
    assert_eq!(schema["properties"]["options"]["type"], "array");
    assert_eq!(schema["properties"]["wait"]["default"], false);
}

#[test]
fn notify_levels_are_enumerated() {
    let schema = schema_of("notify");
    assert_eq!(schema["required"], json!(["message"]));
    assert_eq!(
        schema["properties"]["level"]["enum"],
        json!(["info", "success", "warning", "error"])
    );
}

#[test]
fn wait_for_response_requires_question_id() {
    assert_eq!(schema_of("wait_for_response")["required"], json!(["question_id"]));
}

#[test]
fn check_commands_has_no_required_fields() {
    assert!(schema_of("check_commands").get("required").is_none());
}

#[test]
fn report_command_result_requires_id_and_output() {
    let schema = schema_of("report_command_result");
    assert_eq!(schema["required"], json!(["command_id", "output"]));
    assert_eq!(schema["properties"]["success"]["default"], true);
}
