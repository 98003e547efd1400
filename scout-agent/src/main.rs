use anyhow::Result;
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::sync::Arc;
use scout_agent::clients::{create_llm_client, LLMClient};
use scout_agent::core::{ReactAgent, Step};
use scout_agent::repair::{parse_or_repair, RepairError};
use scout_agent::schema::{format_instructions, FieldType, Schema, SchemaField};
use scout_agent::tools::default_tools;

#[derive(Parser, Debug)]
#[command(name = "scout-agent")]
#[command(version = "0.1.0")]
#[command(about = "ReAct agent that turns web search results into structured answers", long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Commands,

    #[arg(short, long, global = true)]
    api_key: Option<String>,

    #[arg(short, long, global = true, default_value = "gpt-4o")]
    model: String,

    #[arg(short, long, global = true, default_value = "openai")]
    provider: String,

    #[arg(short, long, global = true, help = "Base URL for the LLM API")]
    base_url: Option<String>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    #[command(about = "Look up a company and print structured contact details")]
    Extract {
        #[arg(short, long, help = "Company name or domain to look up")]
        company: String,

        #[arg(short = 's', long, help = "Maximum reasoning steps")]
        max_steps: Option<usize>,
    },

    #[command(about = "Run a free-form objective and print the raw final answer")]
    Run {
        #[arg(short, long, help = "Objective for the agent")]
        task: String,

        #[arg(short = 's', long, help = "Maximum reasoning steps")]
        max_steps: Option<usize>,
    },

    #[command(about = "List the registered tools")]
    Tools,
}

fn get_api_key() -> Result<String, String> {
    std::env::var("OPENAI_API_KEY").map_err(|_| {
        "API key not found. Please set OPENAI_API_KEY environment variable or use --api-key flag.".to_string()
    })
}

fn contact_schema() -> Result<Schema> {
    let mut schema = Schema::new();
    schema.push(SchemaField::new("company", FieldType::String, "Company name"))?;
    schema.push(SchemaField::new("phone", FieldType::String, "Company phone number"))?;
    schema.push(SchemaField::new("location", FieldType::String, "Company location"))?;
    Ok(schema)
}

fn print_step(index: usize, step: &Step) {
    println!("\n{}", format!("--- Step {} ---", index).bold());
    if !step.thought.is_empty() {
        println!("{} {}", "Thought:".cyan(), step.thought);
    }
    if let Some(action) = &step.action {
        println!("{} {}", "Action:".yellow(), action);
    }
    if let Some(input) = &step.action_input {
        println!("{} {}", "Action Input:".yellow(), input);
    }
    if let Some(observation) = &step.observation {
        println!("{} {}", "Observation:".green(), observation);
    }
    if let Some(answer) = &step.final_answer {
        println!("{} {}", "Final Answer:".magenta(), answer);
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt::init();

    let args = Args::parse();

    match &args.command {
        Commands::Extract { company, max_steps } => {
            let api_key = match args.api_key.clone() {
                Some(key) => key,
                None => get_api_key().map_err(|e| anyhow::anyhow!(e))?,
            };

            let client: Arc<dyn LLMClient> = Arc::from(create_llm_client(
                &args.provider,
                api_key,
                args.model.clone(),
                args.base_url.clone(),
            )?);

            let tools = default_tools(std::env::var("SERP_API_KEY").ok())?;
            let schema = contact_schema()?;

            let mut agent = ReactAgent::new(Arc::clone(&client), tools)
                .with_format_instructions(format_instructions(&schema))
                .with_step_callback(Arc::new(print_step));
            if let Some(max) = max_steps {
                agent = agent.with_max_iterations(*max);
            }

            let task = format!(
                "Extract company name, phone number and location from google search results for {}",
                company
            );

            println!("Starting agent with task: {}", task);

            let outcome = agent.run(&task).await?;

            println!("\n{}", "=".repeat(80));
            match parse_or_repair(client.as_ref(), &schema, &outcome.answer).await {
                Ok(record) => {
                    println!("{}", serde_json::to_string_pretty(&record.to_json())?);
                }
                Err(e) => {
                    if let RepairError::Unrecoverable {
                        malformed_text,
                        first,
                        second,
                    } = &e
                    {
                        eprintln!("{}", "Could not repair the final answer.".red());
                        eprintln!("First error: {}", first);
                        eprintln!("Second error: {}", second);
                        eprintln!("Last output: {}", malformed_text);
                    }
                    return Err(e.into());
                }
            }
        }

        Commands::Run { task, max_steps } => {
            let api_key = match args.api_key.clone() {
                Some(key) => key,
                None => get_api_key().map_err(|e| anyhow::anyhow!(e))?,
            };

            let client: Arc<dyn LLMClient> = Arc::from(create_llm_client(
                &args.provider,
                api_key,
                args.model.clone(),
                args.base_url.clone(),
            )?);

            let tools = default_tools(std::env::var("SERP_API_KEY").ok())?;

            let mut agent = ReactAgent::new(Arc::clone(&client), tools)
                .with_step_callback(Arc::new(print_step));
            if let Some(max) = max_steps {
                agent = agent.with_max_iterations(*max);
            }

            println!("Starting agent with task: {}", task);

            let outcome = agent.run(task).await?;

            println!("\n{}", "=".repeat(80));
            println!("{} {}", "Final Answer:".magenta().bold(), outcome.answer);
        }

        Commands::Tools => {
            let registry = default_tools(std::env::var("SERP_API_KEY").ok())?;
            for (name, description) in registry.describe_all() {
                println!("{}: {}", name.bold(), description);
            }
        }
    }

    Ok(())
}
