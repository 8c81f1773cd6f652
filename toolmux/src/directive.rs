//! System directive sent to the model during planning, rendered from the
//! registry's current contents.

use std::fmt::Write as _;

use crate::registry::ToolRegistry;

const PREAMBLE: &str = "You are a planner that turns instructions into structured JSON plans of tool calls. \
Always return a valid JSON array of actions. Output only raw JSON: no markdown, no explanations, no additional text.";

const FORMAT: &str = r#"Plan format:
[
    {
        "action": "<tool name>",
        "parameters": { "<parameter>": "<value>" }
    }
]"#;

const RULES: &str = "Rules:
- Always provide a step-by-step plan as an array of JSON actions, executed in order.
- Use only the actions listed above, with parameters matching their input schemas.
- Ensure the output is well-formed and syntactically correct.";

/// Render the default planning directive.
pub fn render(registry: &ToolRegistry) -> String {
    let mut out = String::new();
    out.push_str(PREAMBLE);
    out.push_str("\n\n");

    let groups = registry.tools_by_service();
    if groups.is_empty() {
        out.push_str("No tools are currently registered.\n");
    }
    for (service, tools) in &groups {
        let label = if service.is_empty() { "General" } else { service.as_str() };
        let _ = writeln!(out, "{} service:\n- Capabilities: {}.", label, tools.join(", "));
    }

    out.push('\n');
    out.push_str(FORMAT);
    out.push_str("\n\n");
    out.push_str(RULES);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::handler_fn;
    use crate::registry::ToolRegistrar;
    use serde_json::{json, Value};

    #[test]
    fn lists_every_service_and_its_actions() {
        let registry = ToolRegistry::new();
        let noop = handler_fn(|_ctx, _params| async { Ok(Value::Null) });
        registry.register_service_tool("docker", "pull_image", "", json!({}), noop.clone());
        registry.register_service_tool("docker", "create_network", "", json!({}), noop.clone());
        registry.register_service_tool("git", "git_init", "", json!({}), noop.clone());
        registry.register_tool("echo", "", json!({}), noop);

        let text = render(&registry);
        assert!(text.contains("docker service:\n- Capabilities: create_network, pull_image."));
        assert!(text.contains("git service:\n- Capabilities: git_init."));
        assert!(text.contains("General service:\n- Capabilities: echo."));
        assert!(text.contains("no markdown"));
    }

    #[test]
    fn empty_registry() {
        assert!(render(&ToolRegistry::new()).contains("No tools are currently registered."));
    }
}
