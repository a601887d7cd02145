//! Command line surface.
//!
//! - `start` (default): answer calls over the stdio gateway bridge
//! - `config show|get|path`: inspect the effective configuration
//! - `version`: build metadata

use clap::{Parser, Subcommand};

/// Auto-answering voice call assistant.
#[derive(Parser, Debug)]
#[command(
    name = "callkeeper",
    version = env!("CARGO_PKG_VERSION"),
    about = "Callkeeper: answers voice calls and holds a spoken conversation"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Answer calls, reading gateway updates on stdin and writing commands to
    /// stdout (default when no subcommand is given).
    Start,

    /// Inspect configuration.
    #[command(subcommand)]
    Config(ConfigCommand),

    /// Show the version with build date and commit.
    Version,
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// Dump the effective configuration as JSON with secrets masked.
    Show,

    /// Look up one value, e.g. `calls.autoAnswer`.
    Get {
        /// Dot-notation key (e.g. "calls.maxCallDurationSeconds").
        key: String,
    },

    /// Show which config file would be read.
    Path,
}

// ---------------------------------------------------------------------------
// Subcommand handlers
// ---------------------------------------------------------------------------

use crate::config;
use serde_json::Value;

/// Key suffixes whose values are masked on output
const SECRET_KEYS: &[&str] = &["apikey", "api_key", "token", "secret", "password"];

fn loaded_config_json() -> Result<Value, Box<dyn std::error::Error>> {
    let cfg = config::load_config()?;
    Ok(serde_json::to_value(&cfg)?)
}

pub fn handle_config_show() -> Result<(), Box<dyn std::error::Error>> {
    let redacted = redact_secrets(loaded_config_json()?);
    println!("{}", serde_json::to_string_pretty(&redacted)?);
    Ok(())
}

pub fn handle_config_get(key: &str) -> Result<(), Box<dyn std::error::Error>> {
    let cfg = redact_secrets(loaded_config_json()?);
    match get_value_at_path(&cfg, key) {
        Some(value) => {
            println!("{}", serde_json::to_string_pretty(&value)?);
            Ok(())
        }
        None => Err(format!("Key not found: {}", key).into()),
    }
}

pub fn handle_config_path() {
    let path = config::get_config_path();
    println!("{}", path.display());
    if !path.exists() {
        eprintln!("(file does not exist; built-in defaults are used)");
    }
}

pub fn handle_version() {
    println!("callkeeper {}", env!("CARGO_PKG_VERSION"));
    println!("  Build date: {}", env!("CALLKEEPER_BUILD_DATE"));
    println!("  Git commit: {}", env!("CALLKEEPER_GIT_HASH"));
    println!(
        "  Platform:   {} ({})",
        std::env::consts::OS,
        std::env::consts::ARCH
    );
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Walk `root` along a dotted path.
fn get_value_at_path(root: &Value, path: &str) -> Option<Value> {
    let mut current = root;
    for part in path.split('.') {
        current = current.as_object()?.get(part)?;
    }
    Some(current.clone())
}

/// Mask every non-null value stored under a secret-looking key.
fn redact_secrets(mut value: Value) -> Value {
    match &mut value {
        Value::Object(map) => {
            for (key, child) in map.iter_mut() {
                let lower = key.to_lowercase();
                if SECRET_KEYS.iter().any(|s| lower.ends_with(s)) {
                    if !child.is_null() {
                        *child = Value::String("[REDACTED]".to_string());
                    }
                } else {
                    *child = redact_secrets(child.take());
                }
            }
        }
        Value::Array(arr) => {
            for item in arr.iter_mut() {
                *item = redact_secrets(item.take());
            }
        }
        _ => {}
    }
    value
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
