//! `cxloop chat`: single-message or interactive chat mode.

use cxloop_agent::{ChatRequest, Orchestrator};
use cxloop_core::trace::{StepOutcome, StepRecord};
use cxloop_gateway::AppState;
use std::io::Write;
use tokio::io::{AsyncBufReadExt, BufReader};

pub async fn run(message: Option<String>, session: String) -> Result<(), Box<dyn std::error::Error>> {
    let config = super::load_config()?;
    let state = AppState::from_config(&config)?;
    let orchestrator = state.orchestrator;

    if let Some(msg) = message {
        eprint!("  Thinking...");
        let result = orchestrator.handle(ChatRequest::new(&session, msg)).await;
        eprint!("\r              \r");
        return match result {
            Ok(reply) => {
                print_steps(&reply.agent_steps);
                println!("{}", reply.response);
                Ok(())
            }
            Err(aborted) => {
                print_steps(&aborted.agent_steps);
                Err(aborted.into())
            }
        };
    }

    println!();
    println!("  cxloop: interactive mode");
    println!();
    println!("  Model:     {}", config.provider.model);
    println!("  Session:   {session}");
    println!("  Tools:     {}", orchestrator.tools().names().join(", "));
    println!();
    println!("  Type your message and press Enter.");
    println!("  Type 'exit' or Ctrl+D to quit.");
    println!();

    interactive(&orchestrator, &session).await?;

    println!();
    println!("  Goodbye!");
    println!();
    Ok(())
}

async fn interactive(orchestrator: &Orchestrator, session: &str) -> Result<(), Box<dyn std::error::Error>> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    print!("  You > ");
    std::io::stdout().flush()?;

    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line == "exit" || line == "quit" {
            break;
        }
        if line.is_empty() {
            print!("  You > ");
            std::io::stdout().flush()?;
            continue;
        }

        eprint!("  ...");
        let result = orchestrator.handle(ChatRequest::new(session, line)).await;
        eprint!("\r     \r");
        match result {
            Ok(reply) => {
                println!();
                print_steps(&reply.agent_steps);
                for line in reply.response.lines() {
                    println!("  Assistant > {line}");
                }
                println!();
            }
            Err(aborted) => {
                print_steps(&aborted.agent_steps);
                eprintln!("  [{}] {}", aborted.kind(), aborted.reason);
                println!();
            }
        }

        print!("  You > ");
        std::io::stdout().flush()?;
    }

    Ok(())
}

fn print_steps(steps: &[StepRecord]) {
    for step in steps {
        eprintln!("{}", step_line(step));
    }
}

fn step_line(step: &StepRecord) -> String {
    let mark = match step.outcome {
        StepOutcome::Success => "ok",
        StepOutcome::RecoverableFailure => "retry",
        StepOutcome::FatalFailure => "FAILED",
    };
    format!(
        "  [{}] {} {} ({}ms) {}",
        step.step, step.tool_name, mark, step.duration_ms, step.input
    )
}
