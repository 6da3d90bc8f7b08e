//! Configuration loading from `.env` files.

use std::env;

use anyhow::{Context, Result};

pub const DEFAULT_RELAY_URL: &str = "wss://relay.damus.io";
pub const DEFAULT_SUBSCRIPTION_ID: &str = "all";

/// Runtime settings derived from environment variables.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Relay to connect to.
    pub relay_url: String,
    /// Relay hints embedded in `nevent` references; defaults to `relay_url`.
    /// Comma-separated. A list with spaces must be quoted in the `.env` file.
    pub relay_hints: Vec<String>,
    /// Id of the subscription opened by `run`.
    pub subscription_id: String,
    /// Optional Tor SOCKS proxy (host:port).
    pub tor_socks: Option<String>,
    /// Capacity of the session's inbound channel.
    pub inbound_buffer: usize,
    /// `tracing` filter directive.
    pub log_level: String,
    /// Emit log lines as JSON.
    pub log_json: bool,
}

impl Settings {
    /// Load settings from the specified `.env` file.
    pub fn from_env(path: &str) -> Result<Self> {
        dotenvy::from_filename(path).context("reading env file")?;
        let relay_url = env::var("RELAY_URL")
            .ok()
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| DEFAULT_RELAY_URL.into());
        let relay_hints = csv_strings(env::var("RELAY_HINTS").unwrap_or_default());
        let subscription_id = env::var("SUBSCRIPTION_ID")
            .ok()
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| DEFAULT_SUBSCRIPTION_ID.into());
        let tor_socks = env::var("TOR_SOCKS").ok().filter(|s| !s.is_empty());
        let inbound_buffer = match env::var("INBOUND_BUFFER") {
            Ok(s) if !s.trim().is_empty() => s
                .trim()
                .parse()
                .with_context(|| format!("INBOUND_BUFFER is not a number: {s}"))?,
            _ => nostra::relay::DEFAULT_INBOUND_BUFFER,
        };
        let log_level = env::var("LOG_LEVEL")
            .ok()
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| "info".into());
        let log_json = env::var("LOG_JSON").unwrap_or_else(|_| "0".into()) == "1";
        Ok(Self {
            relay_url,
            relay_hints,
            subscription_id,
            tor_socks,
            inbound_buffer,
            log_level,
            log_json,
        })
    }

    /// Hints for `nevent` references to events published on `relay`.
    pub fn hints_for(&self, relay: &str) -> Vec<String> {
        if self.relay_hints.is_empty() {
            vec![relay.to_string()]
        } else {
            self.relay_hints.clone()
        }
    }
}

/// Split a comma-separated string into trimmed string values.
pub fn csv_strings(input: impl AsRef<str>) -> Vec<String> {
    let s = input.as_ref();
    s.split(',')
        .filter_map(|s| {
            let t = s.trim();
            if t.is_empty() {
                None
            } else {
                Some(t.to_string())
            }
        })
        .collect()
}
