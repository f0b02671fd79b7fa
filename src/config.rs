//! Command line and environment configuration

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use super::error::RideError;
use super::identity::TokenIssuer;
use super::matching::{DEFAULT_MAX_CO_RIDERS, DEFAULT_WINDOW_MINUTES, MatchPolicy};

/// Ride pool - shared rides for students, matched by destination and time
#[derive(Parser, Debug, Clone)]
#[command(name = "ride-pool", version)]
pub struct Cli {
    /// Path of the sled database directory
    #[arg(long, env = "RIDES_DB", default_value = "./ride-pool.db", global = true)]
    pub db_path: PathBuf,

    /// Log level used when RUST_LOG is unset (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info", global = true)]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Run the HTTP API
    Serve(ServeArgs),
    /// Register a public profile and print a token for it
    AddUser(AddUserArgs),
    /// Print a token for an existing user id
    IssueToken(IssueTokenArgs),
}

#[derive(Args, Debug, Clone)]
pub struct AuthArgs {
    /// Secret for signing identity tokens (required unless --dev-mode)
    #[arg(long, env = "JWT_SECRET")]
    pub jwt_secret: Option<String>,

    /// Token lifetime in seconds
    #[arg(long, env = "JWT_EXPIRY_SECONDS", default_value = "86400")]
    pub jwt_expiry_seconds: u64,

    /// Development mode: falls back to a built-in insecure secret
    #[arg(long, env = "DEV_MODE", default_value = "false")]
    pub dev_mode: bool,
}

#[derive(Args, Debug, Clone)]
pub struct ServeArgs {
    /// Address to listen on
    #[arg(long, env = "LISTEN", default_value = "0.0.0.0:4000")]
    pub listen: SocketAddr,

    #[command(flatten)]
    pub auth: AuthArgs,

    /// Pickup times within this many minutes of each other can share a ride
    #[arg(long, env = "MATCH_WINDOW_MINUTES", default_value_t = DEFAULT_WINDOW_MINUTES)]
    pub match_window_minutes: i64,

    /// Most co-riders a shared ride accepts besides its owner
    #[arg(long, env = "MAX_CO_RIDERS", default_value_t = DEFAULT_MAX_CO_RIDERS)]
    pub max_co_riders: usize,

    /// Cancel waiting rides this many minutes after their pickup time.
    /// Unset: waiting rides wait until matched or cancelled.
    #[arg(long, env = "WAITING_EXPIRY_MINUTES")]
    pub waiting_expiry_minutes: Option<i64>,

    /// Times a conflicting write is retried before giving up
    #[arg(long, env = "WRITE_RETRIES", default_value = "3")]
    pub write_retries: usize,

    /// Comma-separated origins allowed by CORS
    #[arg(
        long,
        env = "CORS_ORIGINS",
        default_value = "http://localhost:3000,http://localhost:5173"
    )]
    pub cors_origins: String,
}

#[derive(Args, Debug, Clone)]
pub struct AddUserArgs {
    #[arg(long)]
    pub full_name: String,
    #[arg(long)]
    pub email: String,
    #[arg(long)]
    pub college_name: String,
    #[command(flatten)]
    pub auth: AuthArgs,
}

#[derive(Args, Debug, Clone)]
pub struct IssueTokenArgs {
    #[arg(long)]
    pub user_id: String,
    #[arg(long)]
    pub email: String,
    #[command(flatten)]
    pub auth: AuthArgs,
}

impl AuthArgs {
    /// The configured secret, or the built-in dev secret in dev mode.
    pub fn token_issuer(&self) -> Result<TokenIssuer, RideError> {
        match &self.jwt_secret {
            Some(secret) => TokenIssuer::new(secret.clone(), self.jwt_expiry_seconds),
            None if self.dev_mode => Ok(TokenIssuer::new_dev()),
            None => Err(RideError::Config(
                "JWT_SECRET is required unless --dev-mode is set".into(),
            )),
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if !self.dev_mode && self.jwt_secret.is_none() {
            return Err("JWT_SECRET is required unless --dev-mode is set".to_string());
        }
        if self.jwt_expiry_seconds == 0 {
            return Err("JWT_EXPIRY_SECONDS must be positive".to_string());
        }
        Ok(())
    }
}

impl ServeArgs {
    pub fn match_policy(&self) -> MatchPolicy {
        MatchPolicy::new(self.match_window_minutes, self.max_co_riders)
    }

    pub fn cors_origin_list(&self) -> Vec<String> {
        self.cors_origins
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect()
    }

    pub fn validate(&self) -> Result<(), String> {
        self.auth.validate()?;
        if self.match_window_minutes <= 0 {
            return Err("MATCH_WINDOW_MINUTES must be positive".to_string());
        }
        if self.max_co_riders == 0 {
            return Err("MAX_CO_RIDERS must be at least 1".to_string());
        }
        if self.waiting_expiry_minutes.is_some_and(|m| m < 0) {
            return Err("WAITING_EXPIRY_MINUTES cannot be negative".to_string());
        }
        Ok(())
    }
}
