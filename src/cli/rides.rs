//! `rides` and `driver` subcommands.

use anyhow::{anyhow, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{broadcast, watch};
use tracing::warn;

use super::{format_place, or_dash, print_ride, print_ride_table, Client, DriverCommands, RidesCommands};
use crate::api::rides::RatingRequest;
use crate::rides::presence::PresenceState;
use crate::rides::{
    Alert, AlertLevel, FixedLocation, GeoPoint, LocationSource, NoLocation, RideRequest, RideRole,
    RideSession, RideState, RideStatus, RideTracker, TrackFile,
};
use crate::socket::Namespace;

/// How long one-shot commands wait for the server to confirm.
const CONFIRM_WAIT: Duration = Duration::from_secs(15);

pub(super) async fn run_rides(client: &Client, cmd: &RidesCommands) -> Result<()> {
    match cmd {
        RidesCommands::History { driver } => {
            let role = if *driver {
                RideRole::Driver
            } else {
                RideRole::Traveler
            };
            let rides = client
                .api
                .rides_for(role)
                .await
                .map_err(|e| anyhow!(e.user_message()))?;
            print_ride_table(&rides);
            Ok(())
        }
        RidesCommands::Request {
            source,
            destination,
            lat,
            lng,
            city,
        } => {
            let tracker = traveler(client, city.as_deref()).await?;
            let request = RideRequest {
                source: source.clone(),
                destination: destination.clone(),
                current_location: lat.zip(*lng).map(|(lat, lng)| GeoPoint::new(lat, lng)),
            };
            let outcome = match tracker.request_ride(&request).await {
                Ok(route) => {
                    println!("Requested ride");
                    println!("  From: {}", format_place(&route.source));
                    println!("  To:   {}", format_place(&route.destination));
                    follow(&tracker, true).await;
                    Ok(())
                }
                Err(e) => Err(anyhow!(e.user_message())),
            };
            tracker.close().await;
            outcome
        }
        RidesCommands::Watch { city } => {
            let tracker = traveler(client, city.as_deref()).await?;
            match tracker.snapshot().current {
                Some(ride) => print_ride(&ride),
                None => println!("No active ride."),
            }
            follow(&tracker, true).await;
            tracker.close().await;
            Ok(())
        }
        RidesCommands::AcceptQuote | RidesCommands::RejectQuote => {
            let tracker = traveler(client, None).await?;
            let accept = matches!(cmd, RidesCommands::AcceptQuote);
            let sent = if accept {
                tracker.accept_quote()
            } else {
                tracker.reject_quote()
            };
            let outcome = match sent {
                Ok(()) => {
                    confirm(&tracker, |r| r.status != RideStatus::QuoteSent).await;
                    Ok(())
                }
                Err(e) => Err(anyhow!(e.user_message())),
            };
            tracker.close().await;
            outcome
        }
        RidesCommands::End { ride_id } => end(client, RideRole::Traveler, ride_id.as_deref()).await,
        RidesCommands::Rate {
            ride_id,
            stars,
            message,
        } => {
            let ride = client
                .api
                .rate_ride(
                    ride_id,
                    &RatingRequest {
                        stars: *stars,
                        message: message.trim().to_string(),
                    },
                )
                .await
                .map_err(|e| anyhow!(e.user_message()))?;
            println!("[OK] Rated ride {} {} star(s)", ride.id, stars);
            Ok(())
        }
    }
}

pub(super) async fn run_driver(client: &Client, cmd: &DriverCommands) -> Result<()> {
    match cmd {
        DriverCommands::Online {
            city,
            track_file,
            lat,
            lng,
        } => {
            let interval = client.config.location_interval();
            let location: Arc<dyn LocationSource> = match (track_file, lat.zip(*lng)) {
                (Some(path), _) => Arc::new(TrackFile::new(path, interval)),
                (None, Some((lat, lng))) => {
                    Arc::new(FixedLocation::new(GeoPoint::new(lat, lng), interval))
                }
                (None, None) => Arc::new(NoLocation),
            };
            let tracker = driver(client, city.as_deref(), location).await?;
            if tracker.city().is_empty() {
                println!("[!] No city set; use --city or [driver] city to receive requests");
            }
            let outcome = match tracker.go_online(true) {
                Ok(()) => {
                    println!("Online in {}", or_dash(&tracker.city()));
                    follow(&tracker, true).await;
                    Ok(())
                }
                Err(e) => Err(anyhow!(e.user_message())),
            };
            tracker.close().await;
            outcome
        }
        DriverCommands::Accept { ride_id } => {
            let tracker = driver(client, None, Arc::new(NoLocation)).await?;
            let id = ride_id.trim().to_string();
            let outcome = match tracker.accept_request(&id) {
                Ok(()) => {
                    confirm(&tracker, |r| r.id == id).await;
                    Ok(())
                }
                Err(e) => Err(anyhow!(e.user_message())),
            };
            tracker.close().await;
            outcome
        }
        DriverCommands::Quote { price, note } => {
            let tracker = driver(client, None, Arc::new(NoLocation)).await?;
            let outcome = match tracker.submit_quote(*price, note) {
                Ok(()) => {
                    confirm(&tracker, |r| r.status == RideStatus::QuoteSent).await;
                    Ok(())
                }
                Err(e) => Err(anyhow!(e.user_message())),
            };
            tracker.close().await;
            outcome
        }
        DriverCommands::Start { otp } => {
            let tracker = driver(client, None, Arc::new(NoLocation)).await?;
            let outcome = match tracker.start_ride(otp) {
                Ok(()) => {
                    confirm(&tracker, |r| r.status == RideStatus::InProgress).await;
                    Ok(())
                }
                Err(e) => Err(anyhow!(e.user_message())),
            };
            tracker.close().await;
            outcome
        }
        DriverCommands::End { ride_id } => end(client, RideRole::Driver, ride_id.as_deref()).await,
    }
}

async fn traveler(client: &Client, city: Option<&str>) -> Result<RideTracker> {
    let conn = client.connect(Namespace::Rides).await;
    let mut options = client.config.ride_options(false);
    if let Some(city) = city.filter(|c| !c.trim().is_empty()) {
        options.city = city.trim().to_string();
    }
    let tracker = RideTracker::traveler(client.api.clone(), conn, options);
    load(&tracker).await?;
    Ok(tracker)
}

async fn driver(
    client: &Client,
    city: Option<&str>,
    location: Arc<dyn LocationSource>,
) -> Result<RideTracker> {
    let conn = client.connect(Namespace::Rides).await;
    let mut options = client.config.ride_options(true);
    if let Some(city) = city.filter(|c| !c.trim().is_empty()) {
        options.city = city.trim().to_string();
    }
    let tracker = RideTracker::driver(client.api.clone(), conn, options, location);
    load(&tracker).await?;
    Ok(tracker)
}

/// Pull history and wait until the tracker has folded it, so the current
/// ride is known before any command runs.
async fn load(tracker: &RideTracker) -> Result<()> {
    let rides = tracker
        .refresh_history()
        .await
        .map_err(|e| anyhow!(e.user_message()))?;
    let mut state = tracker.state();
    let folded = tokio::time::timeout(
        Duration::from_secs(2),
        state.wait_for(|s| {
            s.history.len() == rides.len()
                && s.history.iter().zip(&rides).all(|(a, b)| a.id == b.id)
        }),
    )
    .await;
    if !matches!(folded, Ok(Ok(_))) {
        warn!("Ride history not applied yet");
    }
    Ok(())
}

/// Wait for the current ride to satisfy `done`, printing it either way.
async fn confirm(tracker: &RideTracker, done: impl Fn(&RideSession) -> bool) {
    let mut state = tracker.state();
    let waited = tokio::time::timeout(
        CONFIRM_WAIT,
        state.wait_for(|s| s.error.is_some() || s.current.as_ref().is_some_and(&done)),
    )
    .await;

    let snapshot = tracker.snapshot();
    if let Some(error) = &snapshot.error {
        println!("[!!] {}", error);
        return;
    }
    if waited.is_err() {
        println!("[!] Sent, but the server has not confirmed yet");
    }
    if let Some(ride) = &snapshot.current {
        print_ride(ride);
    }
}

async fn end(client: &Client, role: RideRole, ride_id: Option<&str>) -> Result<()> {
    let ride_id = match ride_id.map(str::trim).filter(|id| !id.is_empty()) {
        Some(id) => id.to_string(),
        None => client
            .api
            .rides_for(role)
            .await
            .map_err(|e| anyhow!(e.user_message()))?
            .into_iter()
            .find(RideSession::is_active)
            .map(|r| r.id)
            .ok_or_else(|| anyhow!("No active ride."))?,
    };
    let ride = client
        .api
        .end_ride(&ride_id)
        .await
        .map_err(|e| anyhow!(e.user_message()))?;
    println!("[OK] Ended ride {}", ride.id);
    print_ride(&ride);
    Ok(())
}

// ============================================================================
// Live session
// ============================================================================

/// A line typed during a live session.
#[derive(Debug, Clone, PartialEq)]
enum Action {
    AcceptQuote,
    RejectQuote,
    Rate {
        ride_id: Option<String>,
        stars: u8,
        message: String,
    },
    Accept(String),
    Dismiss(String),
    Quote { price: f64, note: String },
    Start(String),
    End(Option<String>),
    Online(bool),
    City(String),
    Help,
    Quit,
}

fn parse_action(role: RideRole, line: &str) -> Result<Option<Action>, String> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    let (word, rest) = match line.split_once(char::is_whitespace) {
        Some((word, rest)) => (word, rest.trim()),
        None => (line, ""),
    };
    let rest_opt = (!rest.is_empty()).then(|| rest.to_string());

    let action = match (role, word.to_ascii_lowercase().as_str()) {
        (_, "help" | "?") => Action::Help,
        (_, "quit" | "exit" | "q") => Action::Quit,
        (_, "end") => Action::End(rest_opt),
        (_, "city") => match rest_opt {
            Some(city) => Action::City(city),
            None => return Err("Usage: city <name>".into()),
        },
        (RideRole::Traveler, "accept") => Action::AcceptQuote,
        (RideRole::Traveler, "reject") => Action::RejectQuote,
        (RideRole::Traveler, "rate") => {
            let mut parts = rest.splitn(2, char::is_whitespace);
            let stars = parts
                .next()
                .and_then(|s| s.parse::<u8>().ok())
                .ok_or("Usage: rate <1-5> [message]")?;
            Action::Rate {
                ride_id: None,
                stars,
                message: parts.next().unwrap_or("").trim().to_string(),
            }
        }
        (RideRole::Driver, "accept") => match rest_opt {
            Some(id) => Action::Accept(id),
            None => return Err("Usage: accept <ride_id>".into()),
        },
        (RideRole::Driver, "dismiss") => match rest_opt {
            Some(id) => Action::Dismiss(id),
            None => return Err("Usage: dismiss <ride_id>".into()),
        },
        (RideRole::Driver, "quote") => {
            let mut parts = rest.splitn(2, char::is_whitespace);
            let price = parts
                .next()
                .and_then(|s| s.parse::<f64>().ok())
                .ok_or("Usage: quote <price> [note]")?;
            Action::Quote {
                price,
                note: parts.next().unwrap_or("").trim().to_string(),
            }
        }
        (RideRole::Driver, "start") => Action::Start(rest.to_string()),
        (RideRole::Driver, "online") => Action::Online(true),
        (RideRole::Driver, "offline") => Action::Online(false),
        _ => return Err(format!("Unknown command '{}', type 'help'", word)),
    };
    Ok(Some(action))
}

fn print_help(role: RideRole) {
    println!("Commands:");
    match role {
        RideRole::Traveler => {
            println!("  accept | reject          respond to the driver's quote");
            println!("  rate <1-5> [message]     rate the completed ride");
        }
        RideRole::Driver => {
            println!("  accept <ride_id>         take an incoming request");
            println!("  dismiss <ride_id>        hide an incoming request");
            println!("  quote <price> [note]     send a fare quote");
            println!("  start <otp>              start the ride");
            println!("  online | offline         toggle availability");
        }
    }
    println!("  end [ride_id]            end the current ride");
    println!("  city <name>              change city");
    println!("  quit                     leave");
}

async fn perform(tracker: &RideTracker, action: Action) -> crate::error::Result<()> {
    match action {
        Action::AcceptQuote => tracker.accept_quote(),
        Action::RejectQuote => tracker.reject_quote(),
        Action::Rate {
            ride_id,
            stars,
            message,
        } => {
            let ride_id = ride_id
                .or_else(|| tracker.snapshot().rating_prompt)
                .ok_or_else(|| crate::error::ValidationError::new("No ride to rate."))?;
            tracker.rate_ride(&ride_id, stars, &message).await?;
            println!("[OK] Thanks for rating");
            Ok(())
        }
        Action::Accept(id) => tracker.accept_request(&id),
        Action::Dismiss(id) => tracker.dismiss_request(&id),
        Action::Quote { price, note } => tracker.submit_quote(price, &note),
        Action::Start(otp) => tracker.start_ride(&otp),
        Action::End(id) => {
            let ride = tracker.end_ride(id.as_deref()).await?;
            println!("[OK] Ended ride {}", ride.id);
            Ok(())
        }
        Action::Online(online) => tracker.go_online(online),
        Action::City(city) => tracker.set_city(&city),
        Action::Help => {
            print_help(tracker.role());
            Ok(())
        }
        Action::Quit => Ok(()),
    }
}

fn level_tag(level: AlertLevel) -> &'static str {
    match level {
        AlertLevel::Info => "[i]",
        AlertLevel::Success => "[OK]",
        AlertLevel::Warning => "[!]",
        AlertLevel::Error => "[!!]",
    }
}

fn print_alert(alert: &Alert, role: RideRole) {
    println!(
        "{} {}: {}",
        level_tag(alert.level()),
        alert.title(),
        alert.message(role)
    );
}

/// One-line summary of what the user needs to see right now.
fn status_line(state: &RideState) -> String {
    let mut parts = Vec::new();

    if state.pending.is_some() {
        parts.push(format!("Waiting for a driver ({}s left)", state.seconds_left));
    }
    match &state.current {
        Some(ride) => {
            let mut line = format!("Ride {} {}", ride.id, ride.status);
            if let Some(label) = ride.quote_label() {
                line.push_str(&format!(", quote {}", label));
            }
            if let Some(eta) = ride.eta_minutes {
                line.push_str(&format!(", ETA {} min", eta));
            }
            if let Some(point) = ride.driver_location {
                line.push_str(&format!(", driver at {}", point));
            }
            parts.push(line);
        }
        None if state.pending.is_none() => parts.push("No active ride".to_string()),
        None => {}
    }
    if let Some(otp) = &state.trip_otp {
        parts.push(format!("OTP {}", otp.otp));
    }
    if state.role == RideRole::Driver && !state.incoming.is_empty() {
        let ids: Vec<&str> = state.incoming.iter().map(|r| r.id.as_str()).collect();
        parts.push(format!("Incoming: {}", ids.join(", ")));
    }
    if state.online_drivers > 0 {
        parts.push(format!("{} driver(s) nearby", state.online_drivers));
    }
    if let Some(error) = &state.error {
        parts.push(format!("Error: {}", error));
    }
    parts.join(" | ")
}

async fn next_presence(rx: &mut Option<watch::Receiver<PresenceState>>) -> Option<PresenceState> {
    match rx {
        Some(rx) => {
            rx.changed().await.ok()?;
            let state = rx.borrow_and_update().clone();
            Some(state)
        }
        None => std::future::pending().await,
    }
}

/// Print state changes and alerts until Ctrl+C or `quit`.
async fn follow(tracker: &RideTracker, interactive: bool) {
    let role = tracker.role();
    let mut state = tracker.state();
    let mut alerts = tracker.alerts();
    let mut conn = tracker.connection_state();
    let mut presence = tracker.presence().map(|p| p.state());
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = interactive;
    let mut last_status = status_line(&state.borrow());
    let mut last_warning: Option<String> = None;

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    println!("{}", last_status);
    if interactive {
        println!("Type 'help' for commands, Ctrl+C to leave.");
    }

    loop {
        tokio::select! {
            _ = &mut ctrl_c => break,
            changed = state.changed() => {
                if changed.is_err() {
                    break;
                }
                let line = status_line(&state.borrow_and_update());
                if line != last_status {
                    println!("{}", line);
                    last_status = line;
                }
            }
            alert = alerts.recv() => match alert {
                Ok(alert) => print_alert(&alert, role),
                Err(broadcast::error::RecvError::Lagged(n)) => warn!(skipped = n, "Missed ride alerts"),
                Err(broadcast::error::RecvError::Closed) => break,
            },
            changed = conn.changed() => {
                if changed.is_err() {
                    println!("[!!] Connection closed");
                    break;
                }
                let snapshot = conn.borrow_and_update().clone();
                if snapshot.connected {
                    println!("[OK] Connected");
                } else if let Some(error) = snapshot.error {
                    println!("[!] Disconnected: {}", error);
                }
            }
            update = next_presence(&mut presence) => match update {
                Some(update) => {
                    if update.warning != last_warning {
                        if let Some(warning) = &update.warning {
                            println!("[!] {}", warning);
                        }
                        last_warning = update.warning;
                    }
                }
                None => presence = None,
            },
            line = lines.next_line(), if stdin_open => match line {
                Ok(Some(line)) => match parse_action(role, &line) {
                    Ok(Some(Action::Quit)) => break,
                    Ok(Some(action)) => {
                        if let Err(e) = perform(tracker, action).await {
                            println!("[!!] {}", e.user_message());
                        }
                    }
                    Ok(None) => {}
                    Err(usage) => println!("{}", usage),
                },
                Ok(None) | Err(_) => stdin_open = false,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rides::countdown::PendingRequest;
    use crate::rides::reducer::TripOtp;
    use chrono::Utc;

    #[test]
    fn test_parse_traveler_actions() {
        let role = RideRole::Traveler;
        assert_eq!(parse_action(role, "  "), Ok(None));
        assert_eq!(parse_action(role, "accept"), Ok(Some(Action::AcceptQuote)));
        assert_eq!(parse_action(role, "Reject"), Ok(Some(Action::RejectQuote)));
        assert_eq!(
            parse_action(role, "rate 5 smooth ride"),
            Ok(Some(Action::Rate {
                ride_id: None,
                stars: 5,
                message: "smooth ride".into()
            }))
        );
        assert!(parse_action(role, "rate five").is_err());
        assert!(parse_action(role, "quote 250").is_err());
        assert_eq!(parse_action(role, "end"), Ok(Some(Action::End(None))));
        assert_eq!(parse_action(role, "q"), Ok(Some(Action::Quit)));
    }

    #[test]
    fn test_parse_driver_actions() {
        let role = RideRole::Driver;
        assert_eq!(parse_action(role, "accept r1"), Ok(Some(Action::Accept("r1".into()))));
        assert!(parse_action(role, "accept").is_err());
        assert_eq!(
            parse_action(role, "quote 250.5 includes toll"),
            Ok(Some(Action::Quote {
                price: 250.5,
                note: "includes toll".into()
            }))
        );
        assert_eq!(parse_action(role, "start 4821"), Ok(Some(Action::Start("4821".into()))));
        assert_eq!(parse_action(role, "offline"), Ok(Some(Action::Online(false))));
        assert_eq!(parse_action(role, "city New Delhi"), Ok(Some(Action::City("New Delhi".into()))));
        assert!(parse_action(role, "fly").is_err());
    }

    #[test]
    fn test_status_line() {
        let mut state = RideState::new(RideRole::Traveler, Duration::from_secs(45));
        assert_eq!(status_line(&state), "No active ride");

        state.pending = Some(PendingRequest::new(Utc::now(), Duration::from_secs(45)));
        state.seconds_left = 45;
        assert_eq!(status_line(&state), "Waiting for a driver (45s left)");

        state.pending = None;
        let mut ride = RideSession::new("r1", RideStatus::QuoteSent);
        ride.quoted_price = Some(250.0);
        state.current = Some(ride);
        state.trip_otp = Some(TripOtp {
            ride_id: Some("r1".into()),
            otp: "4821".into(),
        });
        assert_eq!(
            status_line(&state),
            "Ride r1 QUOTE_SENT, quote 250.00 INR | OTP 4821"
        );
    }

    #[test]
    fn test_level_tags() {
        assert_eq!(level_tag(AlertLevel::Success), "[OK]");
        assert_eq!(level_tag(AlertLevel::Error), "[!!]");
    }
}
