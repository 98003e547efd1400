use crate::core::Scratchpad;
use crate::schema::{format_instructions, Schema, ValidationError};
use crate::tools::ToolRegistry;

/// One `<name>: <description>` line per tool, in registration order. The
/// catalog text is part of the prompt contract and must stay byte-stable for
/// a given registration order.
pub fn render_catalog(registry: &ToolRegistry) -> String {
    registry
        .describe_all()
        .iter()
        .map(|(name, description)| format!("{}: {}", name, description))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Replays the run so far in the exact directive format the model is asked
/// to produce.
pub fn render_scratchpad(scratchpad: &Scratchpad) -> String {
    let mut out = String::new();
    for step in scratchpad.steps() {
        out.push_str(&format!("Thought: {}\n", step.thought));
        if let Some(action) = &step.action {
            out.push_str(&format!("Action: {}\n", action));
            if let Some(input) = &step.action_input {
                out.push_str(&format!("Action Input: {}\n", input));
            }
        }
        if let Some(observation) = &step.observation {
            out.push_str(&format!("Observation: {}\n", observation));
        }
    }
    out
}

pub fn build_agent_prompt(
    registry: &ToolRegistry,
    objective: &str,
    format_instructions: Option<&str>,
    scratchpad: &Scratchpad,
    format_reminder: bool,
) -> String {
    let catalog = if registry.is_empty() {
        "You have no tools available.".to_string()
    } else {
        render_catalog(registry)
    };
    let tool_names = registry.names().join(", ");

    let mut prompt = format!(
        r#"Answer the following question as best you can. You have access to the following tools:

{}

Use the following format:

Question: the input question you must answer
Thought: you should always think about what to do
Action: the action to take, should be one of [{}]
Action Input: the input to the action
Observation: the result of the action
... (this Thought/Action/Action Input/Observation can repeat N times)
Thought: I now know the final answer
Final Answer: the final answer to the original input question"#,
        catalog, tool_names
    );

    if let Some(instructions) = format_instructions {
        prompt.push_str("\n\n");
        prompt.push_str(instructions);
    }

    if format_reminder {
        prompt.push_str(
            "\n\nYour previous response did not follow the required format. Respond with either \
             an \"Action:\" line followed by an \"Action Input:\" line, or a \"Final Answer:\" \
             line, exactly as specified above.",
        );
    }

    prompt.push_str(&format!("\n\nBegin!\n\nQuestion: {}\n", objective));
    prompt.push_str(&render_scratchpad(scratchpad));
    prompt.push_str("Thought: ");

    prompt
}

pub fn build_repair_prompt(schema: &Schema, malformed: &str, error: &ValidationError) -> String {
    format!(
        r#"Instructions:
--------------
{}
--------------
Completion:
--------------
{}
--------------

Above, the Completion did not satisfy the constraints given in the Instructions.
Error:
--------------
{}: {}
--------------

Please try again. Respond only with an answer that satisfies the constraints laid out in the Instructions:"#,
        format_instructions(schema),
        malformed,
        error.reason.describe(),
        error.detail
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Step;
    use crate::schema::{parse, FieldType, SchemaField, ValidationFailure};
    use crate::tools::default_tools;

    fn registry() -> ToolRegistry {
        default_tools(None).expect("default tools")
    }

    #[test]
    fn test_render_catalog_order_and_shape() {
        let catalog = render_catalog(&registry());
        let lines: Vec<&str> = catalog.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("search: "));
        assert!(lines[1].starts_with("calculator: "));
    }

    #[test]
    fn test_build_agent_prompt_contains_contract() {
        let prompt = build_agent_prompt(&registry(), "Who is Acme?", None, &Scratchpad::new(), false);

        assert!(prompt.contains("should be one of [search, calculator]"));
        assert!(prompt.contains("Final Answer: the final answer"));
        assert!(prompt.contains("Question: Who is Acme?"));
        assert!(prompt.ends_with("Thought: "));
        assert!(!prompt.contains("did not follow the required format"));
    }

    #[test]
    fn test_build_agent_prompt_with_reminder() {
        let prompt = build_agent_prompt(&registry(), "Who is Acme?", None, &Scratchpad::new(), true);
        assert!(prompt.contains("did not follow the required format"));
    }

    #[test]
    fn test_render_scratchpad_replays_steps() {
        let mut scratchpad = Scratchpad::new();
        scratchpad.push(Step::acting(
            "I should search".to_string(),
            "search".to_string(),
            "Acme".to_string(),
            "Acme Corp, NY".to_string(),
        ));

        let rendered = render_scratchpad(&scratchpad);
        assert_eq!(
            rendered,
            "Thought: I should search\nAction: search\nAction Input: Acme\nObservation: Acme Corp, NY\n"
        );
    }

    #[test]
    fn test_build_repair_prompt_embeds_diagnosis() {
        let mut schema = Schema::new();
        schema
            .push(SchemaField::new("company", FieldType::String, "Company name"))
            .expect("field");

        let malformed = "Acme, in NY";
        let error = parse(malformed, &schema).unwrap_err();
        assert_eq!(error.reason, ValidationFailure::NotJson);

        let prompt = build_repair_prompt(&schema, malformed, &error);
        assert!(prompt.contains("Acme, in NY"));
        assert!(prompt.contains("\"company\": string // Company name"));
        assert!(prompt.contains("could not be interpreted as a JSON object"));
        assert!(prompt.contains("Please try again."));
    }
}
