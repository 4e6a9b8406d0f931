//! Command handlers.
//!
//! Each mode builds a `TurnRunner` from config, runs one operation, and
//! prints updates to stdout. Logs stay on stderr.

use std::io::Write;

use anyhow::{Context, Result};
use tether_core::config::Config;
use tether_core::dispatch::SessionUpdate;
use tether_core::transport::StreamOutcome;
use tether_core::turn::TurnRunner;
use tokio::sync::mpsc;

pub async fn session_create(config: &Config) -> Result<()> {
    let runner = TurnRunner::new(config)?;
    let session = runner.create_session().await.context("create session")?;
    println!("{}", session.id);
    Ok(())
}

pub async fn send(config: &Config, text: &str, session: Option<String>) -> Result<()> {
    let runner = TurnRunner::new(config)?;
    let session_id = match session {
        Some(id) => id,
        None => runner.create_session().await.context("create session")?.id,
    };

    let (tx, rx) = mpsc::unbounded_channel();
    let printer = tokio::spawn(print_updates(rx));

    let outcome = runner
        .send_message(&session_id, text, tx)
        .await
        .context("send message")?;
    printer.await?;

    match outcome {
        StreamOutcome::Completed => Ok(()),
        StreamOutcome::Unconfirmed => {
            anyhow::bail!("stream ended without a completion signal")
        }
        StreamOutcome::Cancelled => anyhow::bail!("turn was cancelled"),
    }
}

pub async fn watch(config: &Config, session_id: &str) -> Result<()> {
    let runner = TurnRunner::new(config)?;

    let (tx, rx) = mpsc::unbounded_channel();
    let printer = tokio::spawn(print_updates(rx));

    let result = runner.watch(session_id, tx).await;
    printer.await?;
    result.context("subscribe to session events")?;
    Ok(())
}

/// Drains session updates until the sender side closes.
///
/// Progress text streams to stdout incrementally. The finalized text
/// repeats the streamed prefix, so only the unseen tail is printed then.
async fn print_updates(mut rx: mpsc::UnboundedReceiver<SessionUpdate>) {
    let mut streamed = String::new();
    while let Some(update) = rx.recv().await {
        match update {
            SessionUpdate::Progress { text, thought, .. } => {
                if !thought.is_empty() {
                    eprintln!("[thinking] {thought}");
                }
                if !text.is_empty() {
                    print!("{text}");
                    let _ = std::io::stdout().flush();
                    streamed.push_str(&text);
                }
            }
            SessionUpdate::Finalized { text, sources, .. } => {
                match text.strip_prefix(streamed.as_str()) {
                    Some(tail) => println!("{tail}"),
                    // Legacy finalize carries standalone text, not the
                    // accumulated buffer.
                    None => {
                        if !streamed.is_empty() {
                            println!();
                        }
                        println!("{text}");
                    }
                }
                streamed.clear();
                for source in sources {
                    match source.title {
                        Some(title) => println!("  source: {title} ({})", source.url),
                        None => println!("  source: {}", source.url),
                    }
                }
            }
            SessionUpdate::SessionError { code, message, .. } => {
                if !streamed.is_empty() {
                    println!();
                    streamed.clear();
                }
                let code = code.unwrap_or_else(|| "unknown".to_string());
                eprintln!("error [{code}]: {message}");
            }
            SessionUpdate::Handoff { target, .. } => {
                println!("-> transferred to {target}");
            }
            SessionUpdate::Aborted { partial_text, .. } => {
                if !streamed.is_empty() {
                    println!();
                    streamed.clear();
                }
                eprintln!("turn aborted; partial response: {partial_text}");
            }
        }
    }
}
