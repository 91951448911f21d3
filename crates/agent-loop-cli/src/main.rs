//! agent-loop CLI
//!
//! Runs the Perceive → Plan → Act → Reflect controller over a single input
//! or an interactive session on stdin, with the built-in calculator,
//! datetime and memory search tools registered.

mod approval;
mod settings;

use std::io::Write;
use std::sync::Arc;

use agent_loop::{Controller, Execution, StaticApproval, ToolRegistry, register_builtins};
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::approval::{PromptApproval, read_line};
use crate::settings::Settings;

#[derive(Parser)]
#[command(
    name = "agent-loop",
    about = "Perceive → Plan → Act → Reflect agent controller",
    version
)]
struct Cli {
    /// Input to run once; starts an interactive session when omitted
    input: Option<String>,

    /// Expected outcome used when scoring the run
    #[arg(short, long, requires = "input")]
    expect: Option<String>,

    /// Approve every request without prompting
    #[arg(long)]
    auto_approve: bool,

    /// Print the full execution record as JSON
    #[arg(long)]
    json: bool,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,

    #[command(flatten)]
    settings: Settings,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // .env must be loaded before clap reads env-backed flags
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter)),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let memory = cli.settings.memory();
    let mut tools = ToolRegistry::new();
    if let Some(limit) = cli.settings.tool_timeout() {
        tools = tools.with_timeout(limit);
    }
    register_builtins(&tools, memory.clone()).await;

    tracing::info!("Registered {} tools:", tools.len().await);
    for name in tools.list().await {
        tracing::info!("  • {}", name);
    }

    let builder = Controller::builder()
        .tools(Arc::new(tools))
        .memory(memory)
        .config(cli.settings.loop_config());
    let builder = if cli.auto_approve {
        builder.approval_gate(StaticApproval::approve_all())
    } else {
        builder.approval_gate(PromptApproval)
    };
    let mut controller = builder.build()?;

    if let Some(input) = cli.input.as_deref() {
        let execution = controller.run_loop(input, cli.expect.as_deref()).await?;
        report(&execution, cli.json)?;
        return Ok(());
    }

    println!("agent-loop: type a request, or 'quit' to exit");
    loop {
        print!("> ");
        std::io::stdout().flush()?;

        let Some(line) = read_line().await? else {
            break;
        };
        let input = line.trim();
        if input.is_empty() {
            continue;
        }
        if matches!(input, "quit" | "exit") {
            break;
        }

        let execution = controller.run_loop(input, None).await?;
        report(&execution, cli.json)?;
    }

    let stats = controller.stats();
    tracing::info!(
        runs = stats.total_runs,
        successful = stats.successful_runs,
        average_quality = stats.average_quality,
        "Session finished"
    );

    Ok(())
}

fn report(execution: &Execution, json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(execution)?);
        return Ok(());
    }

    let output = match &execution.final_output {
        serde_json::Value::Null => "(no output)".to_string(),
        serde_json::Value::String(text) => text.clone(),
        other => other.to_string(),
    };
    println!("{output}");
    println!(
        "  [{} | quality {:.1}/5 | {}/{} steps ok]",
        execution.perception.intent,
        execution.reflection.quality_score,
        execution.reflection.successful_steps,
        execution.reflection.total_steps,
    );
    for improvement in &execution.reflection.improvements {
        println!("  - {improvement}");
    }

    Ok(())
}
