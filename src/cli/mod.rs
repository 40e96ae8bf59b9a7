//! CLI module for the wayfarer command-line client.
//!
//! Subcommands talk to a running rides/planner backend:
//! - `rides` - traveler history, ride requests and live tracking
//! - `driver` - go online, accept requests, quote and start rides
//! - `planner` - start, follow, list and cancel AI trip plans
//! - `geocode` - address suggestions and route resolution
//! - `config check` - validate the configuration file

mod planner;
mod rides;

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::api::rides::{GeocodeRequest, LocationQuery, DEFAULT_SUGGEST_LIMIT};
use crate::api::ApiClient;
use crate::config::{Config, Overrides, DEFAULT_CONFIG_FILE};
use crate::rides::model::{Place, RideSession};
use crate::socket::{
    Connection, ConnectionManager, ConnectionState, Namespace, SocketHub, WsTransport,
};

/// CLI arguments structure
#[derive(Parser, Debug)]
#[command(name = "wayfarer")]
#[command(author, version, about = "Real-time ride and trip-planner client", long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = DEFAULT_CONFIG_FILE)]
    pub config: PathBuf,

    /// Override log level
    #[arg(short, long)]
    pub log_level: Option<String>,

    /// REST base URL including the /api prefix (overrides [api] base_url)
    #[arg(long, env = "WAYFARER_API_URL")]
    pub api_url: Option<String>,

    /// Bearer token (can also be set via WAYFARER_TOKEN env var)
    #[arg(long, env = "WAYFARER_TOKEN", hide_env_values = true)]
    pub token: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    pub fn overrides(&self) -> Overrides {
        Overrides {
            api_url: self.api_url.clone(),
            token: self.token.clone(),
            log_level: self.log_level.clone(),
        }
    }
}

/// Available CLI subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Traveler ride commands
    #[command(subcommand)]
    Rides(RidesCommands),

    /// Driver commands
    #[command(subcommand)]
    Driver(DriverCommands),

    /// AI trip planner commands
    #[command(subcommand)]
    Planner(PlannerCommands),

    /// Address lookup
    #[command(subcommand)]
    Geocode(GeocodeCommands),

    /// Configuration management commands
    #[command(subcommand)]
    Config(ConfigCommands),
}

/// Rides subcommands
#[derive(Subcommand, Debug)]
pub enum RidesCommands {
    /// List past and current rides
    History {
        /// Show rides where you were the driver
        #[arg(long)]
        driver: bool,
    },
    /// Request a ride and follow it live
    Request {
        /// Pickup address (omit to use --lat/--lng)
        #[arg(long = "from")]
        source: Option<String>,
        /// Drop-off address
        #[arg(long = "to")]
        destination: String,
        /// Current latitude, used when --from is omitted
        #[arg(long, requires = "lng", allow_negative_numbers = true)]
        lat: Option<f64>,
        /// Current longitude
        #[arg(long, requires = "lat", allow_negative_numbers = true)]
        lng: Option<f64>,
        /// City announced for driver matching
        #[arg(long)]
        city: Option<String>,
    },
    /// Follow the current ride
    Watch {
        #[arg(long)]
        city: Option<String>,
    },
    /// Accept the driver's quote on the current ride
    AcceptQuote,
    /// Reject the driver's quote on the current ride
    RejectQuote,
    /// End a ride (defaults to the current one)
    End {
        ride_id: Option<String>,
    },
    /// Rate a completed ride
    Rate {
        ride_id: String,
        /// 1 to 5
        #[arg(short, long)]
        stars: u8,
        #[arg(short, long, default_value = "")]
        message: String,
    },
}

/// Driver subcommands
#[derive(Subcommand, Debug)]
pub enum DriverCommands {
    /// Go online and handle requests interactively
    Online {
        #[arg(long)]
        city: Option<String>,
        /// Replay positions from a file of `lat,lng` lines
        #[arg(long, conflicts_with_all = ["lat", "lng"])]
        track_file: Option<PathBuf>,
        #[arg(long, requires = "lng", allow_negative_numbers = true)]
        lat: Option<f64>,
        #[arg(long, requires = "lat", allow_negative_numbers = true)]
        lng: Option<f64>,
    },
    /// Accept a ride request
    Accept { ride_id: String },
    /// Send a fare quote for the current ride
    Quote {
        price: f64,
        #[arg(short, long, default_value = "")]
        note: String,
    },
    /// Start the current ride with the traveler's OTP
    Start { otp: String },
    /// End a ride (defaults to the current one)
    End { ride_id: Option<String> },
}

/// Planner subcommands
#[derive(Subcommand, Debug)]
pub enum PlannerCommands {
    /// Start a planning session and stream the result
    Start {
        #[arg(long)]
        destination: String,
        #[arg(long)]
        origin: Option<String>,
        /// YYYY-MM-DD
        #[arg(long)]
        start_date: Option<String>,
        /// YYYY-MM-DD
        #[arg(long)]
        end_date: Option<String>,
        #[arg(long)]
        days: Option<u32>,
        #[arg(long)]
        travelers: Option<u32>,
        /// BUDGET, MID_RANGE or LUXURY
        #[arg(long)]
        budget: Option<String>,
        /// Comma-separated, e.g. "beaches, food"
        #[arg(long)]
        interests: Option<String>,
        /// FLIGHT and/or TRAIN
        #[arg(long = "transport")]
        transport_modes: Vec<String>,
        #[arg(long)]
        notes: Option<String>,
        /// Print the session id and return without streaming
        #[arg(long)]
        no_follow: bool,
    },
    /// Show a session, following it while it runs
    Show {
        session_id: String,
        #[arg(short, long)]
        follow: bool,
    },
    /// Request cancellation of a session
    Cancel { session_id: String },
    /// List your sessions
    List,
}

/// Geocode subcommands
#[derive(Subcommand, Debug)]
pub enum GeocodeCommands {
    /// Suggest addresses for a partial query
    Suggest {
        query: String,
        #[arg(long)]
        city: Option<String>,
        #[arg(short = 'n', long, default_value_t = DEFAULT_SUGGEST_LIMIT)]
        limit: u32,
    },
    /// Resolve pickup and drop-off addresses to coordinates
    Route {
        #[arg(long = "from")]
        source: String,
        #[arg(long = "to")]
        destination: String,
    },
}

/// Config subcommands
#[derive(Subcommand, Debug)]
pub enum ConfigCommands {
    /// Validate configuration file
    Check,
}

/// How long to wait for the first socket connect before giving up.
const CONNECT_WAIT: Duration = Duration::from_secs(15);

/// REST client plus one shared socket per namespace.
pub(crate) struct Client {
    pub config: Config,
    pub api: ApiClient,
    hub: SocketHub,
}

impl Client {
    fn new(config: Config) -> Result<Self> {
        let tokens = config.token_provider()?;
        let api = config.api_client(tokens.clone())?;
        let manager = ConnectionManager::new(Arc::new(WsTransport), config.connection_options()?);
        Ok(Self {
            config,
            api,
            hub: SocketHub::new(manager, tokens),
        })
    }

    /// Lease the namespace connection and give it a moment to come up.
    /// A connection that stays down is reported, not fatal: REST calls keep
    /// working and queued emits go out once the socket connects.
    pub async fn connect(&self, namespace: Namespace) -> Arc<Connection> {
        let conn = self.hub.acquire(namespace);
        let mut state = conn.state();
        let _ = tokio::time::timeout(
            CONNECT_WAIT,
            state.wait_for(|s| s.connected || s.auth_exhausted),
        )
        .await;

        let snapshot = conn.state().borrow().clone();
        match connection_notice(namespace, &snapshot) {
            None => debug!(namespace = %namespace, "Socket ready"),
            Some(notice) => {
                warn!(namespace = %namespace, "{}", notice);
                eprintln!("[!] {}", notice);
            }
        }
        conn
    }

    pub async fn close(&self) {
        self.hub.close_all().await;
    }
}

/// Passive warning for a namespace that is not connected.
fn connection_notice(namespace: Namespace, state: &ConnectionState) -> Option<String> {
    if state.connected {
        return None;
    }
    let reason = state.error.as_deref().unwrap_or("timed out");
    Some(if state.auth_exhausted {
        format!(
            "Authentication failed on {}: {}. Continuing without live updates.",
            namespace, reason
        )
    } else {
        format!(
            "Not connected to {} yet ({}). Continuing without live updates.",
            namespace, reason
        )
    })
}

/// Run a CLI command
pub async fn run_command(cli: &Cli, mut config: Config) -> Result<()> {
    config.apply(&cli.overrides());

    if let Commands::Config(ConfigCommands::Check) = &cli.command {
        return cmd_config_check(cli, &config);
    }

    let client = Client::new(config)?;
    let result = match &cli.command {
        Commands::Rides(cmd) => rides::run_rides(&client, cmd).await,
        Commands::Driver(cmd) => rides::run_driver(&client, cmd).await,
        Commands::Planner(cmd) => planner::run(&client, cmd).await,
        Commands::Geocode(cmd) => cmd_geocode(&client, cmd).await,
        Commands::Config(_) => Ok(()),
    };
    client.close().await;
    result
}

async fn cmd_geocode(client: &Client, cmd: &GeocodeCommands) -> Result<()> {
    match cmd {
        GeocodeCommands::Suggest { query, city, limit } => {
            let hint = city
                .as_deref()
                .or(Some(client.config.rides.city.as_str()))
                .filter(|c| !c.trim().is_empty());
            let places = client
                .api
                .suggest_addresses(query, hint, *limit)
                .await
                .map_err(|e| anyhow::anyhow!(e.user_message()))?;
            if places.is_empty() {
                println!("No suggestions.");
                return Ok(());
            }
            for place in places {
                println!("{}", format_place(&place));
            }
            Ok(())
        }
        GeocodeCommands::Route {
            source,
            destination,
        } => {
            let route = client
                .api
                .resolve_route(&GeocodeRequest {
                    source: LocationQuery::address(source.trim()),
                    destination: LocationQuery::address(destination.trim()),
                    use_current_location: false,
                })
                .await
                .map_err(|e| anyhow::anyhow!(e.user_message()))?;
            println!("From: {}", format_place(&route.source));
            println!("To:   {}", format_place(&route.destination));
            Ok(())
        }
    }
}

fn cmd_config_check(cli: &Cli, config: &Config) -> Result<()> {
    let config_path = &cli.config;

    println!("Checking configuration file: {}", config_path.display());
    println!();

    if !config_path.exists() {
        println!("[!!] Configuration file not found, checking defaults and overrides");
        println!();
    }

    println!("=== Configuration Summary ===");
    println!();
    println!("API:");
    println!("  Base URL:     {}", config.api.base_url);
    println!("  Timeout:      {}s", config.api.timeout_secs);
    println!();
    println!("Socket:");
    println!(
        "  URL:          {}",
        config.socket_url().unwrap_or_else(|_| "-".to_string())
    );
    println!("  Path:         {}", config.socket.path);
    println!("  Reconnect:    {}ms", config.socket.reconnect_delay_ms);
    println!();
    println!("Auth:");
    let source = if config.auth.token.as_deref().is_some_and(|t| !t.trim().is_empty()) {
        "static token"
    } else if config.auth.token_command.is_some() {
        "token command"
    } else {
        "none"
    };
    println!("  Source:       {}", source);
    println!();
    println!("Rides:");
    println!("  City:         {}", or_dash(&config.rides.city));
    println!("  Currency:     {}", config.rides.currency);
    println!("  Request wait: {}s", config.rides.request_timeout_secs);
    println!();

    let problems = config.problems();
    if problems.is_empty() {
        println!("[OK] Configuration is valid!");
        return Ok(());
    }

    println!("Problems:");
    for problem in &problems {
        println!("  [!] {}", problem);
    }
    println!();
    bail!("Invalid configuration ({} problem(s))", problems.len())
}

// ============================================================================
// Formatting helpers
// ============================================================================

pub(crate) fn or_dash(s: &str) -> &str {
    if s.trim().is_empty() {
        "-"
    } else {
        s
    }
}

pub(crate) fn format_place(place: &Place) -> String {
    let address = place.address.as_deref().filter(|a| !a.trim().is_empty());
    match (address, place.point()) {
        (Some(address), Some(point)) => format!("{} ({})", address, point),
        _ => place.label(),
    }
}

pub(crate) fn print_ride(ride: &RideSession) {
    let from = ride.source.as_ref().map(Place::label).unwrap_or_default();
    let to = ride.destination.as_ref().map(Place::label).unwrap_or_default();
    println!("Ride {} [{}]", ride.id, ride.status);
    println!("  From:   {}", or_dash(&from));
    println!("  To:     {}", or_dash(&to));
    if let Some(label) = ride.quote_label() {
        println!("  Quote:  {}", label);
    }
    if let Some(eta) = ride.eta_minutes {
        println!("  ETA:    {} min", eta);
    }
    if let Some(point) = ride.driver_location {
        println!("  Driver: {}", point);
    }
}

pub(crate) fn print_ride_table(rides: &[RideSession]) {
    if rides.is_empty() {
        println!("No rides found.");
        return;
    }

    println!();
    println!(
        "{:<36}  {:<24}  {:<24}  {:<24}  {:<12}",
        "ID", "STATUS", "FROM", "TO", "QUOTE"
    );
    println!("{}", "-".repeat(130));

    for ride in rides {
        let from = ride.source.as_ref().map(Place::label).unwrap_or_default();
        let to = ride.destination.as_ref().map(Place::label).unwrap_or_default();
        println!(
            "{:<36}  {:<24}  {:<24}  {:<24}  {:<12}",
            ride.id,
            ride.status,
            truncate(or_dash(&from), 24),
            truncate(or_dash(&to), 24),
            ride.quote_label().unwrap_or_else(|| "-".to_string())
        );
    }

    println!();
}

pub(crate) fn format_elapsed(ms: u64) -> String {
    if ms < 1000 {
        format!("{}ms", ms)
    } else {
        format!("{:.1}s", ms as f64 / 1000.0)
    }
}

pub(crate) fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}
