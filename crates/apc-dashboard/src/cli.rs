use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};

use apc_client::ClientConfig;
use apc_core::{LOG_WINDOW, SessionOverrides};

#[derive(Parser, Debug)]
#[command(name = "apc", version, about = "Watch and control the presence agent")]
pub struct Cli {
    /// Config file to read instead of ./apc.toml.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,
    /// Agent base URL; overrides the config file and APC_AGENT_ORIGIN.
    #[arg(long, global = true)]
    pub origin: Option<String>,
    /// Bearer token; overrides the config file and APC_AGENT_TOKEN.
    #[arg(long, global = true)]
    pub token: Option<String>,
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Live view with interactive start/stop/refresh (default).
    Watch,
    /// Print the agent's current status.
    Status,
    /// Print the most recent log entries.
    Logs {
        #[arg(long, default_value_t = LOG_WINDOW)]
        limit: usize,
    },
    /// Start a session.
    Start {
        #[arg(long)]
        mode: Option<String>,
        #[arg(long, value_parser = parse_randomness)]
        randomness: Option<f64>,
        /// Idle threshold in seconds.
        #[arg(long)]
        idle_threshold: Option<u32>,
        /// Maximum session length in minutes.
        #[arg(long)]
        max_duration: Option<u32>,
    },
    /// Stop the running session.
    Stop,
    /// Set or clear the policy lock.
    Lock { state: LockState },
    /// Check that the agent is reachable.
    Health,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockState {
    On,
    Off,
}

impl Command {
    /// Session overrides carried by `start`; empty for every other command.
    pub fn overrides(&self) -> SessionOverrides {
        match self {
            Self::Start {
                mode,
                randomness,
                idle_threshold,
                max_duration,
            } => SessionOverrides {
                mode: mode.clone(),
                randomness: *randomness,
                idle_threshold_seconds: *idle_threshold,
                max_duration_minutes: *max_duration,
            },
            _ => SessionOverrides::default(),
        }
    }
}

impl Cli {
    /// Resolve the client configuration: file, then env, then flags.
    pub fn client_config(&self) -> anyhow::Result<ClientConfig> {
        let mut config = match &self.config {
            Some(path) => {
                let mut config = ClientConfig::from_file(path)?;
                config.apply_env();
                config
            },
            None => ClientConfig::load(),
        };
        self.apply_flags(&mut config);
        config.validate().context("invalid client configuration")?;
        Ok(config)
    }

    fn apply_flags(&self, config: &mut ClientConfig) {
        if let Some(origin) = &self.origin {
            config.agent_origin = origin.clone();
        }
        if let Some(token) = &self.token {
            config.token = token.clone();
        }
    }
}

fn parse_randomness(s: &str) -> Result<f64, String> {
    let value: f64 = s.parse().map_err(|e| format!("{e}"))?;
    if (0.0..=1.0).contains(&value) {
        Ok(value)
    } else {
        Err(format!("{value} is not in 0.0..=1.0"))
    }
}
