//! `cabm chat`: single-message or line-by-line chat on the terminal.

use std::io::Write;

use cabm_agent::{Orchestrator, TurnEvent};
use cabm_config::AppConfig;
use tokio::io::{AsyncBufReadExt, BufReader};

pub async fn run(message: Option<String>, tools: bool) -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;

    let orchestrator = cabm_gateway::build_orchestrator(&config).inspect_err(|_| {
        if !config.has_api_key() {
            eprintln!();
            eprintln!("  No API key configured for provider '{}'.", config.default_provider);
            eprintln!("  Set CABM_API_KEY (or OPENAI_API_KEY), or add api_key to:");
            eprintln!("    {}", AppConfig::config_dir().join("config.toml").display());
            eprintln!();
        }
    })?;

    if let Some(msg) = message {
        return chat_once(&orchestrator, msg, tools).await;
    }

    eprintln!();
    eprintln!("  CABM chat  ({} / {})", orchestrator.provider_name(), orchestrator.model());
    eprintln!("  Tools: {}", if tools { "enabled" } else { "disabled" });
    eprintln!("  Type 'exit' or Ctrl+D to quit.");
    eprintln!();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    prompt()?;
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if matches!(line, "exit" | "quit") {
            break;
        }
        if !line.is_empty() {
            chat_once(&orchestrator, line.to_string(), tools).await?;
        }
        prompt()?;
    }

    Ok(())
}

fn prompt() -> std::io::Result<()> {
    eprint!("  You > ");
    std::io::stderr().flush()
}

async fn chat_once(
    orchestrator: &Orchestrator,
    message: String,
    tools: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let turn = orchestrator.turn(message, Some(tools));
    let mut rx = orchestrator.run_stream(turn);

    let mut stdout = std::io::stdout();
    let mut stderr = std::io::stderr();
    while let Some(event) = rx.recv().await {
        match render(&event) {
            Output::Stdout(text) => {
                stdout.write_all(text.as_bytes())?;
                stdout.flush()?;
            }
            Output::Stderr(text) => {
                stderr.write_all(text.as_bytes())?;
            }
        }
    }
    Ok(())
}

/// Where a rendered event goes.
#[derive(Debug, PartialEq, Eq)]
enum Output {
    Stdout(String),
    Stderr(String),
}

/// Content goes to stdout so replies can be piped; everything else is chrome.
fn render(event: &TurnEvent) -> Output {
    match event {
        TurnEvent::Content(text) => Output::Stdout(text.clone()),
        TurnEvent::Done => Output::Stdout("\n".into()),
        TurnEvent::Mood(mood) => Output::Stderr(format!("  ({mood})\n")),
        TurnEvent::System(notice) => Output::Stderr(format!("\n  {notice}\n")),
        TurnEvent::Error(e) => Output::Stderr(format!("\n  [Error] {e}\n")),
        TurnEvent::Options(options) => {
            let mut text = String::from("\n  Suggestions:\n");
            for (i, option) in options.iter().enumerate() {
                text.push_str(&format!("    {}. {option}\n", i + 1));
            }
            Output::Stderr(text)
        }
    }
}
