pub mod api;
pub mod auth;
pub mod cli;
pub mod config;
pub mod error;
pub mod metrics;
pub mod planner;
pub mod rides;
pub mod socket;
pub mod utils;

pub use error::{Error, Result, ValidationError};
