mod commands;
mod logging;
mod render;

use anyhow::{Context, Result};
use clap::Parser;
use commands::{parse_command, Command, HELP};
use render::{format_usage, Renderer};
use std::io::Write;
use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use turnwise_core::types::ApprovalDecision;
use turnwise_core::util::new_id;
use turnwise_core::{spawn_http_session, ClientConfig, SessionHandle, SubmitOutcome};

#[derive(Parser, Debug)]
#[command(name = "turnwise", version, about = "Terminal client for a streaming agent session")]
struct Cli {
    /// Config file (defaults to the user config dir)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Agent server base URL, overrides config and environment
    #[arg(long)]
    server: Option<String>,

    /// Resume an existing conversation
    #[arg(long)]
    conversation: Option<String>,

    /// trace, debug, info, warn, error or off
    #[arg(long)]
    log_level: Option<String>,

    #[arg(long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let level = logging::init(cli.log_level.as_deref(), cli.debug);

    let mut config = ClientConfig::load(cli.config.as_deref()).context("Failed to load config")?;
    if let Some(server) = cli.server {
        config.server_url = server;
        config.validate().context("Invalid --server")?;
    }
    tracing::debug!("Resolved config: {:?}, log_level={}", config, logging::level_to_str(level));

    let resuming = cli.conversation.is_some();
    let conversation_id = cli.conversation.unwrap_or_else(new_id);
    let handle = spawn_http_session(config, conversation_id.clone())
        .context("Failed to start session")?;
    tracing::info!("Session started: conversation_id={}", conversation_id);

    if resuming {
        match handle.hydrate().await {
            Ok(true) => print_history(&handle).await?,
            Ok(false) => println!("(no stored messages for {})", conversation_id),
            Err(e) => eprintln!("[error] failed to load conversation: {}", e),
        }
    }

    let renderer = tokio::spawn(render_updates(handle.clone()));
    println!("conversation {} - /help for commands", conversation_id);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let command = match parse_command(&line) {
            Ok(Some(command)) => command,
            Ok(None) => continue,
            Err(message) => {
                eprintln!("{}", message);
                continue;
            }
        };
        if command == Command::Quit {
            break;
        }
        if let Err(e) = execute(&handle, command).await {
            eprintln!("[error] {}", e);
        }
    }

    if let Err(e) = handle.shutdown().await {
        tracing::warn!("Session shutdown failed: {}", e);
    }
    renderer.abort();
    Ok(())
}

async fn execute(handle: &SessionHandle, command: Command) -> turnwise_core::TurnwiseResult<()> {
    match command {
        Command::Submit(content) => {
            if let SubmitOutcome::Queued(entry) = handle.submit(content).await? {
                println!("[queued {}]", entry.id);
            }
        }
        Command::Cancel => {
            if !handle.cancel().await? {
                println!("(nothing to cancel)");
            }
        }
        Command::Approve(Some(call_id)) => handle.decide_single(call_id, true, None).await?,
        Command::Approve(None) => {
            let progress = handle.decide_bulk(ApprovalDecision::Approve).await?;
            println!("[approving {} calls]", progress.total);
        }
        Command::Deny { call_id, reason } => handle.decide_single(call_id, false, reason).await?,
        Command::DenyAll => {
            let progress = handle.decide_bulk(ApprovalDecision::Deny).await?;
            println!("[denying {} calls]", progress.total);
        }
        Command::Queue => {
            let snapshot = handle.snapshot().await?;
            if snapshot.queue.is_empty() {
                println!("(queue empty)");
            }
            for entry in snapshot.queue {
                println!("{}  {}", entry.id, entry.content);
            }
        }
        Command::Now(id) => handle.submit_now(id).await?,
        Command::Drop(id) => {
            let removed = handle.remove_queued(id).await?;
            println!("[dropped {}]", removed.id);
        }
        Command::Usage => {
            let snapshot = handle.snapshot().await?;
            println!("{}", format_usage(&snapshot.turn_usage, &snapshot.session_usage));
        }
        Command::Help => println!("{}", HELP),
        Command::Quit => {}
    }
    Ok(())
}

async fn print_history(handle: &SessionHandle) -> Result<()> {
    let snapshot = handle.snapshot().await?;
    for message in &snapshot.messages {
        let speaker = if message.is_assistant() { "assistant" } else { "you" };
        println!("{}> {}", speaker, message.content);
        for execution in message.tool_executions() {
            println!(
                "  [tool] {} ({}) {}",
                execution.display_title(),
                execution.call_id,
                execution.status.as_str()
            );
        }
    }
    Ok(())
}

async fn render_updates(handle: SessionHandle) {
    let mut updates = handle.subscribe();
    let mut renderer = Renderer::new();
    loop {
        match updates.recv().await {
            Ok(update) => {
                if let Some(text) = renderer.render(&update) {
                    let mut stdout = std::io::stdout().lock();
                    let _ = stdout.write_all(text.as_bytes());
                    let _ = stdout.flush();
                }
            }
            Err(RecvError::Lagged(skipped)) => {
                tracing::warn!("Renderer fell behind: skipped={}", skipped);
            }
            Err(RecvError::Closed) => break,
        }
    }
}
