//! Terminal approval gate

use std::io::Write;

use agent_loop::{AgentError, ApprovalGate, Perception, PlanStep};
use async_trait::async_trait;

/// Read one line from stdin without blocking the runtime; `None` on EOF
pub async fn read_line() -> anyhow::Result<Option<String>> {
    let line = tokio::task::spawn_blocking(|| {
        let mut buffer = String::new();
        let read = std::io::stdin().read_line(&mut buffer)?;
        Ok::<_, std::io::Error>((read > 0).then_some(buffer))
    })
    .await??;
    Ok(line)
}

/// Asks the operator on the terminal
pub struct PromptApproval;

#[async_trait]
impl ApprovalGate for PromptApproval {
    async fn approve(&self, step: &PlanStep, perception: &Perception) -> agent_loop::Result<bool> {
        print!("{} for \"{}\"? [y/N] ", step.description, perception.input.trim());
        std::io::stdout()
            .flush()
            .map_err(|e| AgentError::Other(e.to_string()))?;

        let answer = read_line().await?.unwrap_or_default();

        Ok(matches!(answer.trim().to_lowercase().as_str(), "y" | "yes"))
    }
}
