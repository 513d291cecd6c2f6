//! Valet CLI entry point

mod cli;

use crate::cli::{Cli, Commands, LogCommands};
use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use valet::token::{self, Permissions, TokenFields, TokenVersion};
use valet::{DirectClient, RemoteBackend};

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    let get_secret = || -> Result<String> {
        cli.secret
            .clone()
            .context("VALET_SECRET or --secret required")
    };

    match cli.command {
        Commands::Mint {
            scope,
            bearer,
            permission,
            ttl_hours,
            format,
            endpoint,
        } => mint(
            scope,
            bearer,
            permission,
            ttl_hours,
            &format,
            endpoint,
            get_secret()?,
        ),
        Commands::Inspect { token, verify } => {
            let secret = if verify { Some(get_secret()?) } else { None };
            inspect(&token, secret)
        }
        Commands::Log { command } => log(command).await,
    }
}

fn mint(
    scope: String,
    bearer: String,
    permissions: Vec<String>,
    ttl_hours: u64,
    format: &str,
    endpoint: Option<String>,
    secret: String,
) -> Result<()> {
    let mut bits = 0u8;
    for perm in &permissions {
        bits |= match perm.as_str() {
            "read" => Permissions::READ,
            "append" => Permissions::APPEND,
            "delete-own" => Permissions::DELETE_OWN,
            "delete-any" => Permissions::DELETE_ANY,
            "read-deleted" => Permissions::READ_DELETED,
            "all" => {
                Permissions::READ
                    | Permissions::APPEND
                    | Permissions::DELETE_OWN
                    | Permissions::DELETE_ANY
                    | Permissions::READ_DELETED
            }
            other => anyhow::bail!("Invalid permission: {}", other),
        };
    }

    let version = match format {
        "legacy" => TokenVersion::Legacy,
        "compact" => TokenVersion::Compact,
        "extended" => TokenVersion::Extended,
        other => anyhow::bail!("Invalid format: {}", other),
    };

    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .context("system clock before the unix epoch")?
        .as_secs();
    // Round up so the token lives at least the requested ttl despite the
    // binary layouts' hour granularity
    let expires_at = now.div_ceil(3600) * 3600 + ttl_hours * 3600;

    let fields = TokenFields {
        scope,
        endpoint,
        bearer,
        permissions: Permissions::from_bits(bits),
        expires_at,
    };

    let raw = token::encode(&fields, version, secret.as_bytes())
        .context("failed to encode token")?;

    println!("{}", raw);
    println!();
    println!("Scope:       {}", fields.scope);
    println!("Bearer:      {}", fields.bearer);
    println!("Permissions: {:#04x}", fields.permissions.bits());
    println!("Expires:     {} (unix seconds)", fields.expires_at);

    Ok(())
}

fn inspect(raw: &str, secret: Option<String>) -> Result<()> {
    let decoded = token::decode(raw, None).context("failed to decode token")?;

    println!("Version:     {:?}", decoded.version);
    println!("Scope:       {}", decoded.scope);
    println!(
        "Endpoint:    {}",
        decoded.endpoint.as_deref().unwrap_or("(supplied out-of-band)")
    );
    println!("Bearer:      {}", decoded.bearer);
    println!(
        "Permissions: {:#04x} [read={} append={} delete-own={} delete-any={} read-deleted={}]",
        decoded.permissions.bits(),
        decoded.permissions.can_read(),
        decoded.permissions.can_append(),
        decoded.permissions.can_delete_own(),
        decoded.permissions.can_delete_any(),
        decoded.permissions.can_read_deleted(),
    );
    println!("Expires:     {} (unix seconds)", decoded.expires_at);
    println!("Expired:     {}", decoded.is_expired());

    if let Some(secret) = secret {
        match decoded.verify(secret.as_bytes()) {
            Ok(()) => println!("Signature:   OK"),
            Err(e) => println!("Signature:   FAILED ({})", e),
        }
    }

    Ok(())
}

async fn log(command: LogCommands) -> Result<()> {
    match command {
        LogCommands::Read {
            token,
            endpoint,
            after,
            limit,
            include_deleted,
            dangerous_skip_cert_verify,
        } => {
            let client = direct_client(&token, endpoint.as_deref(), dangerous_skip_cert_verify)?;
            let page = if include_deleted {
                client.read_including_deleted(after, limit).await?
            } else {
                client.read(after, limit).await?
            };

            for record in &page.records {
                println!("{}", serde_json::to_string(record)?);
            }
            if page.has_more {
                let next = page.records.last().map(|r| r.seq).unwrap_or_default();
                println!("# more records after seq {}", next);
            }
        }
        LogCommands::Append {
            token,
            endpoint,
            payload,
            dangerous_skip_cert_verify,
        } => {
            let payload: serde_json::Value =
                serde_json::from_str(&payload).context("payload must be valid JSON")?;
            let client = direct_client(&token, endpoint.as_deref(), dangerous_skip_cert_verify)?;
            let record = client.append(payload).await?;
            println!("{}", serde_json::to_string(&record)?);
        }
        LogCommands::Delete {
            token,
            endpoint,
            seq,
            any,
            dangerous_skip_cert_verify,
        } => {
            let client = direct_client(&token, endpoint.as_deref(), dangerous_skip_cert_verify)?;
            let record = if any {
                client.delete_any(seq).await?
            } else {
                client.delete_own(seq).await?
            };
            println!("{}", serde_json::to_string(&record)?);
        }
    }

    Ok(())
}

fn direct_client(
    token: &str,
    endpoint: Option<&str>,
    dangerous_skip_cert_verify: bool,
) -> Result<DirectClient> {
    let backend = if dangerous_skip_cert_verify {
        RemoteBackend::new().dangerous_skip_cert_verify()
    } else {
        RemoteBackend::new()
    };
    DirectClient::new(token, endpoint, Arc::new(backend)).context("failed to build direct client")
}
