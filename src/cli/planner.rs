//! `planner` subcommands.

use anyhow::{anyhow, Result};
use std::io::Write;

use super::{format_elapsed, or_dash, truncate, Client, PlannerCommands};
use crate::planner::{PlannerDraft, PlannerSession, PlannerSnapshot, PlannerStatus, PlannerTracker};
use crate::socket::Namespace;

pub(super) async fn run(client: &Client, cmd: &PlannerCommands) -> Result<()> {
    match cmd {
        PlannerCommands::Start {
            destination,
            origin,
            start_date,
            end_date,
            days,
            travelers,
            budget,
            interests,
            transport_modes,
            notes,
            no_follow,
        } => {
            let draft = PlannerDraft {
                origin: origin.clone(),
                destination: destination.clone(),
                start_date: start_date.clone(),
                end_date: end_date.clone(),
                trip_days: *days,
                travelers: *travelers,
                budget: budget.clone(),
                interests: interests.clone(),
                transport_modes: transport_modes.clone(),
                notes: notes.clone(),
            };
            // Fail on bad input before opening a socket.
            let input = draft.validate().map_err(|e| anyhow!(e.to_string()))?;

            if *no_follow {
                let created = client
                    .api
                    .create_session(&input)
                    .await
                    .map_err(|e| anyhow!(e.user_message()))?;
                println!("{}", created.id);
                return Ok(());
            }

            let conn = client.connect(Namespace::Planner).await;
            let tracker = PlannerTracker::new(client.api.clone(), conn);
            let outcome = match tracker.start(&draft).await {
                Ok(id) => {
                    eprintln!("Session {}", id);
                    stream(&tracker).await
                }
                Err(e) => Err(anyhow!(e.user_message())),
            };
            tracker.close().await;
            outcome
        }
        PlannerCommands::Show { session_id, follow } => {
            if !*follow {
                let snapshot = client
                    .api
                    .get_session(session_id)
                    .await
                    .map_err(|e| anyhow!(e.user_message()))?;
                println!(
                    "Session {} [{}]",
                    snapshot.id,
                    snapshot.status.as_deref().unwrap_or("-")
                );
                for entry in snapshot.progress() {
                    println!(
                        "  {:<24} {:<8} {}",
                        entry.stage_label(),
                        format_elapsed(entry.elapsed_ms),
                        entry.message
                    );
                }
                if let Some(error) = snapshot.error_message() {
                    println!("[!!] {}", error);
                }
                if let Some(text) = snapshot_text(&snapshot) {
                    println!();
                    println!("{}", text);
                }
                print_result(snapshot.result_json.as_ref());
                return Ok(());
            }

            let conn = client.connect(Namespace::Planner).await;
            let tracker = PlannerTracker::new(client.api.clone(), conn);
            let outcome = match tracker.attach(session_id).await {
                Ok(_) => stream(&tracker).await,
                Err(e) => Err(anyhow!(e.user_message())),
            };
            tracker.close().await;
            outcome
        }
        PlannerCommands::Cancel { session_id } => {
            let ack = client
                .api
                .cancel_session(session_id)
                .await
                .map_err(|e| anyhow!(e.user_message()))?;
            println!(
                "[OK] Cancel requested for {} ({})",
                ack.id,
                ack.status.as_deref().unwrap_or("pending")
            );
            Ok(())
        }
        PlannerCommands::List => {
            let sessions = client
                .api
                .list_sessions()
                .await
                .map_err(|e| anyhow!(e.user_message()))?;
            if sessions.is_empty() {
                println!("No planner sessions found.");
                return Ok(());
            }

            println!();
            println!("{:<36}  {:<12}  {:<24}  {:<20}", "ID", "STATUS", "DESTINATION", "CREATED");
            println!("{}", "-".repeat(98));
            for session in sessions {
                let created = session
                    .created_at
                    .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
                    .unwrap_or_else(|| "-".to_string());
                println!(
                    "{:<36}  {:<12}  {:<24}  {:<20}",
                    session.id,
                    session.status.as_deref().unwrap_or("-"),
                    truncate(or_dash(session.destination().unwrap_or("")), 24),
                    created
                );
            }
            println!();
            Ok(())
        }
    }
}

fn snapshot_text(snapshot: &PlannerSnapshot) -> Option<&str> {
    snapshot.stream_text.as_deref().filter(|t| !t.trim().is_empty())
}

/// The part of `text` not yet printed, or all of it when the text was
/// replaced by a snapshot that no longer extends what was shown.
fn unseen<'a>(text: &'a str, shown: &str) -> (&'a str, bool) {
    match text.strip_prefix(shown) {
        Some(rest) => (rest, false),
        None => (text, true),
    }
}

/// Print progress to stderr and the plan text to stdout as it streams.
/// The first Ctrl+C asks the server to cancel; the second leaves.
async fn stream(tracker: &PlannerTracker) -> Result<()> {
    let mut state = tracker.state();
    let mut shown_text = String::new();
    let mut shown_events = 0usize;
    let mut shown_status: Option<String> = None;
    let mut shown_error: Option<String> = None;
    let mut cancel_sent = false;

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        {
            let current = state.borrow_and_update().clone();
            if let Some(session) = &current.session {
                if session.events.len() < shown_events {
                    shown_events = 0;
                }
                for entry in &session.events[shown_events..] {
                    eprintln!(
                        "  [{}] {} {}",
                        format_elapsed(entry.elapsed_ms),
                        entry.stage_label(),
                        entry.message
                    );
                }
                shown_events = session.events.len();

                let (fresh, replaced) = unseen(&session.stream_text, &shown_text);
                if replaced && !shown_text.is_empty() {
                    println!();
                }
                if !fresh.is_empty() {
                    print!("{}", fresh);
                    let _ = std::io::stdout().flush();
                }
                shown_text = session.stream_text.clone();
            }

            let status = current.display_status();
            if status != shown_status {
                if let Some(status) = &status {
                    eprintln!("  status: {}", status);
                }
                shown_status = status;
            }
            if current.error != shown_error {
                if let Some(error) = &current.error {
                    eprintln!("[!!] {}", error);
                }
                shown_error = current.error.clone();
            }

            if current.is_terminal() {
                if let Some(session) = current.session {
                    return finish(&session, !shown_text.is_empty());
                }
            }
        }

        tokio::select! {
            _ = &mut ctrl_c => {
                if cancel_sent {
                    eprintln!("Leaving without waiting for the server");
                    return Ok(());
                }
                cancel_sent = true;
                eprintln!("Cancelling (Ctrl+C again to leave)...");
                if let Err(e) = tracker.cancel().await {
                    eprintln!("[!!] {}", e.user_message());
                }
                ctrl_c.set(tokio::signal::ctrl_c());
            }
            changed = state.changed() => {
                if changed.is_err() {
                    return Err(anyhow!("Planner tracker stopped"));
                }
            }
        }
    }
}

fn finish(session: &PlannerSession, printed_text: bool) -> Result<()> {
    if printed_text {
        println!();
    }
    match session.status {
        PlannerStatus::Completed => {
            print_result(session.result.as_ref());
            eprintln!("[OK] Plan ready");
            Ok(())
        }
        PlannerStatus::Cancelled => {
            eprintln!("[!] Session cancelled");
            Ok(())
        }
        _ => Err(anyhow!(session
            .error
            .clone()
            .unwrap_or_else(|| crate::planner::event::DEFAULT_PLANNER_ERROR.to_string()))),
    }
}

fn print_result(result: Option<&serde_json::Value>) {
    let Some(result) = result else {
        return;
    };
    match serde_json::to_string_pretty(result) {
        Ok(pretty) => {
            println!();
            println!("{}", pretty);
        }
        Err(e) => tracing::warn!(error = %e, "Could not render planner result"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unseen_appends() {
        assert_eq!(unseen("Day 1: beach", "Day 1: "), ("beach", false));
        assert_eq!(unseen("Day 1", "Day 1"), ("", false));
        assert_eq!(unseen("abc", ""), ("abc", false));
    }

    #[test]
    fn test_unseen_after_replacement() {
        assert_eq!(unseen("Day 1: hills", "Day 1: beach"), ("Day 1: hills", true));
    }

    #[test]
    fn test_snapshot_text_skips_missing_and_blank() {
        let mut snapshot = PlannerSnapshot::default();
        assert_eq!(snapshot_text(&snapshot), None);
        snapshot.stream_text = Some("  ".into());
        assert_eq!(snapshot_text(&snapshot), None);
        snapshot.stream_text = Some("Day 1: beach".into());
        assert_eq!(snapshot_text(&snapshot), Some("Day 1: beach"));
    }

    #[test]
    fn test_finish_failed_uses_server_message() {
        let mut session = PlannerSession::new("s1", None);
        session.status = PlannerStatus::Failed;
        session.error = Some("LLM timeout".into());
        let err = finish(&session, false).unwrap_err();
        assert_eq!(err.to_string(), "LLM timeout");

        session.error = None;
        let err = finish(&session, false).unwrap_err();
        assert_eq!(err.to_string(), "Planner session failed.");
    }
}
