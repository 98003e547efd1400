use crate::clients::{LLMClient, LLMError};
use crate::prompts::build_agent_prompt;
use crate::tools::ToolRegistry;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

pub const DEFAULT_MAX_ITERATIONS: usize = 15;

/// One decide/act/observe iteration. A terminal step has `action == None`
/// and carries the run's final answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    pub thought: String,
    pub action: Option<String>,
    pub action_input: Option<String>,
    pub observation: Option<String>,
    pub final_answer: Option<String>,
}

impl Step {
    pub fn acting(thought: String, action: String, action_input: String, observation: String) -> Self {
        Self {
            thought,
            action: Some(action),
            action_input: Some(action_input),
            observation: Some(observation),
            final_answer: None,
        }
    }

    pub fn terminal(thought: String, answer: String) -> Self {
        Self {
            thought,
            action: None,
            action_input: None,
            observation: None,
            final_answer: Some(answer),
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.action.is_none()
    }
}

/// Append-only transcript of one run. Owned by a single `run` invocation,
/// never shared across concurrent runs. Step i's observation is the direct
/// result of step i's action.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Scratchpad {
    steps: Vec<Step>,
}

impl Scratchpad {
    pub fn new() -> Self {
        Self { steps: Vec::new() }
    }

    pub fn push(&mut self, step: Step) {
        self.steps.push(step);
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn into_steps(self) -> Vec<Step> {
        self.steps
    }
}

/// A decoded model response: either invoke a tool or finish the run.
#[derive(Debug, Clone, PartialEq)]
pub enum Directive {
    Action {
        thought: String,
        tool: String,
        input: String,
    },
    Final {
        thought: String,
        answer: String,
    },
}

const FINAL_ANSWER_PREFIX: &str = "Final Answer:";
const ACTION_PREFIX: &str = "Action:";
const ACTION_INPUT_PREFIX: &str = "Action Input:";

/// Decodes a completion against the strict textual convention. A final-answer
/// directive takes precedence over an action directive when both are present;
/// an action directive requires both an `Action:` and an `Action Input:` line.
pub fn parse_directive(text: &str) -> Option<Directive> {
    if let Some(idx) = text.find(FINAL_ANSWER_PREFIX) {
        let answer = text[idx + FINAL_ANSWER_PREFIX.len()..].trim().to_string();
        return Some(Directive::Final {
            thought: strip_thought(&text[..idx]),
            answer,
        });
    }

    let input_idx = text.find(ACTION_INPUT_PREFIX)?;
    let action_idx = text[..input_idx].find(ACTION_PREFIX)?;
    let tool = text[action_idx + ACTION_PREFIX.len()..input_idx].trim().to_string();
    if tool.is_empty() {
        return None;
    }
    let input = text[input_idx + ACTION_INPUT_PREFIX.len()..].trim().to_string();

    Some(Directive::Action {
        thought: strip_thought(&text[..action_idx]),
        tool,
        input,
    })
}

fn strip_thought(text: &str) -> String {
    let trimmed = text.trim();
    trimmed
        .strip_prefix("Thought:")
        .map(str::trim)
        .unwrap_or(trimmed)
        .to_string()
}

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("LLM error: {0}")]
    Llm(#[from] LLMError),
    #[error("Iteration limit of {limit} exceeded without a final answer")]
    IterationLimitExceeded { limit: usize },
    #[error("Model output did not follow the required format twice in a row: {response}")]
    RepeatedMalformedOutput { response: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunOutcome {
    pub answer: String,
    pub steps: Vec<Step>,
}

pub type StepCallback = Arc<dyn Fn(usize, &Step) + Send + Sync>;

pub struct ReactAgent {
    client: Arc<dyn LLMClient>,
    tools: ToolRegistry,
    max_iterations: usize,
    format_instructions: Option<String>,
    step_callback: Option<StepCallback>,
}

impl ReactAgent {
    pub fn new(client: Arc<dyn LLMClient>, tools: ToolRegistry) -> Self {
        Self {
            client,
            tools,
            max_iterations: DEFAULT_MAX_ITERATIONS,
            format_instructions: None,
            step_callback: None,
        }
    }

    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    pub fn with_format_instructions(mut self, instructions: String) -> Self {
        self.format_instructions = Some(instructions);
        self
    }

    pub fn with_step_callback(mut self, callback: StepCallback) -> Self {
        self.step_callback = Some(callback);
        self
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    /// Drives decide/act/observe until the model emits a final answer, the
    /// iteration budget runs out, or the model output stays malformed after
    /// one format re-prompt. Each invocation owns a fresh scratchpad.
    pub async fn run(&self, objective: &str) -> Result<RunOutcome, AgentError> {
        let mut scratchpad = Scratchpad::new();
        let mut malformed_retry = false;

        info!(model = %self.client.model_info().name, objective, "starting run");

        for iteration in 1..=self.max_iterations {
            let prompt = build_agent_prompt(
                &self.tools,
                objective,
                self.format_instructions.as_deref(),
                &scratchpad,
                malformed_retry,
            );

            debug!(iteration, "requesting completion");
            let completion = self.client.complete(&prompt).await?;

            let Some(directive) = parse_directive(&completion) else {
                if malformed_retry {
                    return Err(AgentError::RepeatedMalformedOutput { response: completion });
                }
                warn!(iteration, "response matched neither directive, re-prompting once");
                malformed_retry = true;
                continue;
            };
            malformed_retry = false;

            match directive {
                Directive::Final { thought, answer } => {
                    let step = Step::terminal(thought, answer.clone());
                    scratchpad.push(step.clone());
                    if let Some(callback) = &self.step_callback {
                        callback(scratchpad.len(), &step);
                    }
                    info!(iterations = iteration, "run finished with a final answer");
                    return Ok(RunOutcome {
                        answer,
                        steps: scratchpad.into_steps(),
                    });
                }
                Directive::Action { thought, tool, input } => {
                    let observation = self.observe(&tool, &input).await;
                    let step = Step::acting(thought, tool, input, observation);
                    scratchpad.push(step.clone());
                    if let Some(callback) = &self.step_callback {
                        callback(scratchpad.len(), &step);
                    }
                }
            }
        }

        Err(AgentError::IterationLimitExceeded {
            limit: self.max_iterations,
        })
    }

    /// Executes the named tool. Unknown tools and tool failures become
    /// observation text fed back to the model, never loop errors.
    async fn observe(&self, tool: &str, input: &str) -> String {
        match self.tools.lookup(tool) {
            Ok(found) => match found.invoke(input.to_string()).await {
                Ok(result) => result,
                Err(e) => {
                    warn!(tool, error = %e, "tool invocation failed");
                    format!("Error: the {} tool failed: {}", tool, e)
                }
            },
            Err(_) => {
                warn!(requested = tool, "model requested an unregistered tool");
                format!(
                    "{} is not a valid tool, try one of [{}].",
                    tool,
                    self.tools.names().join(", ")
                )
            }
        }
    }
}
