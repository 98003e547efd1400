pub mod clients;
pub mod core;
pub mod prompts;
pub mod repair;
pub mod schema;
pub mod tools;

pub use clients::{
    create_llm_client, LLMClient, LLMError, ModelInfo, OpenAIClient,
};
pub use core::{
    parse_directive, AgentError, Directive, ReactAgent, RunOutcome, Scratchpad, Step,
    StepCallback, DEFAULT_MAX_ITERATIONS,
};
pub use prompts::{build_agent_prompt, build_repair_prompt, render_catalog, render_scratchpad};
pub use repair::{parse_or_repair, repair, RepairError};
pub use schema::{
    format_instructions, parse, FieldType, FieldValue, Schema, SchemaError, SchemaField,
    StructuredRecord, ValidationError, ValidationFailure,
};
pub use tools::{
    default_tools, CalculatorTool, RegistryError, SearchTool, Tool, ToolError, ToolRegistry,
};
