//! CLI command definitions

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "valet")]
#[command(about = "Capability-token tooling for brokered data stores", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Resource signing secret
    #[arg(long, env = "VALET_SECRET", global = true)]
    pub secret: Option<String>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Issue a capability token
    ///
    /// Examples:
    ///   valet mint --scope abc123 --bearer u1 -p read -p append --ttl-hours 24
    ///   valet mint --scope abc123 --bearer u1 -p read --format legacy --endpoint https://store.example
    Mint {
        /// Resource identifier the token is scoped to (6 bytes for
        /// compact, 8 for extended)
        #[arg(long)]
        scope: String,

        /// Bearer identifier
        #[arg(long)]
        bearer: String,

        /// Permission: read, append, delete-own, delete-any, read-deleted,
        /// or all (can be repeated)
        #[arg(short, long = "permission", value_parser = parse_permission, required = true)]
        permission: Vec<String>,

        /// Hours until the token expires
        #[arg(long, default_value_t = 24)]
        ttl_hours: u64,

        /// Token layout: legacy, compact, or extended
        #[arg(long, default_value = "compact", value_parser = parse_format)]
        format: String,

        /// Resource endpoint to embed (legacy layout only)
        #[arg(long)]
        endpoint: Option<String>,
    },

    /// Decode a token and print its fields
    Inspect {
        /// The raw token string
        token: String,

        /// Verify the signature and expiry against the signing secret
        #[arg(long)]
        verify: bool,
    },

    /// Operate on a resource's event log directly with a token
    Log {
        #[command(subcommand)]
        command: LogCommands,
    },
}

#[derive(Subcommand)]
pub enum LogCommands {
    /// Read a page of records
    Read {
        /// The raw token string
        token: String,

        /// Backend endpoint (required unless the token embeds one)
        #[arg(long)]
        endpoint: Option<String>,

        /// Return records after this sequence number
        #[arg(long)]
        after: Option<u64>,

        /// Maximum records to return
        #[arg(long)]
        limit: Option<u32>,

        /// Include deleted records (needs the read-deleted bit)
        #[arg(long)]
        include_deleted: bool,

        /// Skip TLS certificate verification (for development)
        #[arg(long)]
        dangerous_skip_cert_verify: bool,
    },

    /// Append a record
    Append {
        /// The raw token string
        token: String,

        /// Backend endpoint (required unless the token embeds one)
        #[arg(long)]
        endpoint: Option<String>,

        /// JSON payload for the record
        payload: String,

        /// Skip TLS certificate verification (for development)
        #[arg(long)]
        dangerous_skip_cert_verify: bool,
    },

    /// Delete a record
    Delete {
        /// The raw token string
        token: String,

        /// Backend endpoint (required unless the token embeds one)
        #[arg(long)]
        endpoint: Option<String>,

        /// Sequence number of the record to delete
        seq: u64,

        /// Use the delete-any bit instead of delete-own
        #[arg(long)]
        any: bool,

        /// Skip TLS certificate verification (for development)
        #[arg(long)]
        dangerous_skip_cert_verify: bool,
    },
}

fn parse_permission(s: &str) -> Result<String, String> {
    match s.to_lowercase().as_str() {
        "read" | "append" | "delete-own" | "delete-any" | "read-deleted" | "all" => {
            Ok(s.to_lowercase())
        }
        _ => Err(format!(
            "Invalid permission: {}. Must be read, append, delete-own, delete-any, read-deleted, or all",
            s
        )),
    }
}

fn parse_format(s: &str) -> Result<String, String> {
    match s.to_lowercase().as_str() {
        "legacy" | "compact" | "extended" => Ok(s.to_lowercase()),
        _ => Err(format!(
            "Invalid format: {}. Must be legacy, compact, or extended",
            s
        )),
    }
}
