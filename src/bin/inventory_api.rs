//! inventory-api: operator smoke tests for the inventory backend.
//!
//! Usage:
//!   inventory-api health                       Check backend health
//!   inventory-api get <endpoint>               GET an endpoint and print the envelope
//!   inventory-api login <email> <password>     Log in and persist the session
//!   inventory-api breakers                     Show circuit breaker state

use anyhow::{bail, Context, Result};
use inventory_resilience::{ApiClient, ApiClientBuilder, FileTokenStore, ResilienceConfig};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = std::env::args().collect();
    if args.len() < 2 {
        print_usage();
        std::process::exit(1);
    }

    let outcome = match args[1].as_str() {
        "health" => cmd_health(&args[2..]).await,
        "get" => cmd_get(&args[2..]).await,
        "login" => cmd_login(&args[2..]).await,
        "breakers" => cmd_breakers(&args[2..]).await,
        "version" | "--version" | "-V" => {
            println!("inventory-api {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        "help" | "--help" | "-h" => {
            print_usage();
            Ok(())
        }
        other => {
            eprintln!("Unknown command: {other}");
            eprintln!();
            print_usage();
            std::process::exit(1);
        }
    };

    if let Err(e) = outcome {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}

fn print_usage() {
    println!(
        r#"inventory-api: inventory backend smoke-test tool

USAGE:
    inventory-api <COMMAND> [OPTIONS]

COMMANDS:
    health                      Check backend health
    get <endpoint>              GET an endpoint and print the response envelope
    login <email> <password>    Log in and persist the session
    breakers                    Show circuit breaker state
    version                     Show version information
    help                        Show this help message

OPTIONS:
    --config <path>             YAML configuration file
    --session <path>            Session file (default: .inventory-session.json)

ENVIRONMENT:
    INVENTORY_API_BASE_URL      Backend base URL
    INVENTORY_API_*             Other overrides, see ResilienceConfig
    RUST_LOG                    Log filter (default: warn)"#
    );
}

fn flag_value(args: &[String], name: &str) -> Option<String> {
    args.iter()
        .position(|a| a == name)
        .and_then(|i| args.get(i + 1))
        .cloned()
}

/// Arguments that are neither flags nor flag values.
fn positional(args: &[String]) -> Vec<&str> {
    let mut out = Vec::new();
    let mut skip = false;
    for arg in args {
        if skip {
            skip = false;
            continue;
        }
        if arg == "--config" || arg == "--session" {
            skip = true;
            continue;
        }
        out.push(arg.as_str());
    }
    out
}

async fn build_client(args: &[String]) -> Result<ApiClient> {
    let config = match flag_value(args, "--config") {
        Some(path) => ResilienceConfig::from_file(&path)
            .with_context(|| format!("loading configuration from {path}"))?,
        None => ResilienceConfig::from_env().context("reading INVENTORY_API_* environment")?,
    };
    let session = flag_value(args, "--session")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(".inventory-session.json"));
    let store = FileTokenStore::open(&session)
        .with_context(|| format!("opening session file {}", session.display()))?;

    let client = ApiClientBuilder::new()
        .config(config)
        .token_store(Arc::new(store))
        .build()
        .await
        .context("building client")?;
    Ok(client)
}

fn print_json(value: &impl serde::Serialize) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn cmd_health(args: &[String]) -> Result<()> {
    let client = build_client(args).await?;
    let envelope = client.health_check().await?;
    print_json(&envelope)
}

async fn cmd_get(args: &[String]) -> Result<()> {
    let endpoint = match positional(args).first() {
        Some(e) => e.to_string(),
        None => bail!("usage: inventory-api get <endpoint>"),
    };
    let client = build_client(args).await?;
    match client.get(&endpoint).await {
        Ok(envelope) => print_json(&envelope),
        Err(e) => {
            eprintln!(
                "{} (status: {}, code: {})",
                e,
                e.status().map(|s| s.to_string()).unwrap_or_else(|| "-".into()),
                e.code()
            );
            Err(e.into())
        }
    }
}

async fn cmd_login(args: &[String]) -> Result<()> {
    let (email, password) = match positional(args).as_slice() {
        [email, password, ..] => (email.to_string(), password.to_string()),
        _ => bail!("usage: inventory-api login <email> <password>"),
    };
    let client = build_client(args).await?;
    client.login(&email, &password).await?;
    match client.tokens().identity() {
        Some(user) => println!("Logged in as {}", user),
        None => println!("Logged in"),
    }
    Ok(())
}

async fn cmd_breakers(args: &[String]) -> Result<()> {
    let client = build_client(args).await?;
    println!(
        "{:<10} {:<9} {:>8} {:>10} {:>12}",
        "BREAKER", "STATE", "FAILURES", "THRESHOLD", "COOLDOWN_MS"
    );
    for b in client.signals().breakers {
        println!(
            "{:<10} {:<9} {:>8} {:>10} {:>12}",
            b.name,
            format!("{:?}", b.state),
            b.failure_count,
            b.failure_threshold,
            b.reset_timeout_ms
        );
    }
    Ok(())
}
