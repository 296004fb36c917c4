//! CLI `run` and `step` commands: drive the reflection loop.

use anyhow::Result;

use crate::agent::{Agent, StdConsole};
use crate::config::MidoConfig;

/// Interactive loop on stdin/stdout until an exit word, EOF, or Ctrl-C.
pub async fn run(config: &MidoConfig) -> Result<()> {
    let mut agent = Agent::open(config).await?;
    let mut console = StdConsole::new(format!("{}: ", config.identity.name));
    eprintln!(
        "{} is awake. Type to talk; {} to leave.",
        config.identity.name,
        config.agent.exit_words.join(" / ")
    );
    agent.run(&mut console).await?;
    Ok(())
}

/// One reflection step. Without `input` it is a heartbeat step.
pub async fn step(config: &MidoConfig, input: Option<String>) -> Result<()> {
    let mut agent = Agent::open(config).await?;
    let mut console = StdConsole::new(format!("{}: ", config.identity.name));
    let report = agent.step(input, &mut console).await?;
    eprintln!(
        "step {}: focus '{}', energy {}, {} memories recalled, {} formed",
        report.step_id,
        report.state.focus,
        report.state.energy,
        report.retrieved,
        report.formed.len()
    );
    Ok(())
}
