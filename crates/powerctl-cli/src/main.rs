//! Thin operator CLI over the running daemon's HTTP surface, plus the one
//! schema-maintenance command (`migrate`) that must work before a daemon is
//! even up.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "powerctl")]
#[command(about = "powerctl operator CLI", long_about = None)]
struct Cli {
    /// Base URL of a running powerctl-daemon. Defaults to
    /// POWERCTL_DAEMON_BASE_URL, then http://127.0.0.1:8899.
    #[arg(long, global = true)]
    base_url: Option<String>,

    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the Store's database migrations.
    Migrate,

    /// Trigger an out-of-band topology sync cycle and print the result.
    Sync,

    /// Submit a power-state transition and print its id.
    Transition {
        #[arg(long)]
        operation: String,
        #[arg(long = "node", required = true)]
        node_ids: Vec<String>,
        #[arg(long, default_value = "cli-operator")]
        requested_by: String,
        #[arg(long)]
        dry_run: bool,
    },

    /// Fetch and print a transition by id.
    Status {
        id: Uuid,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::from_filename(".env.local");
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()))
        .init();

    let cli = Cli::parse();

    match cli.cmd {
        Commands::Migrate => run_migrate().await,
        Commands::Sync => run_sync(&base_url(cli.base_url)).await,
        Commands::Transition { operation, node_ids, requested_by, dry_run } => {
            run_transition(&base_url(cli.base_url), operation, node_ids, requested_by, dry_run).await
        }
        Commands::Status { id } => run_status(&base_url(cli.base_url), id).await,
    }
}

fn base_url(flag: Option<String>) -> String {
    flag.or_else(|| std::env::var("POWERCTL_DAEMON_BASE_URL").ok())
        .unwrap_or_else(|| "http://127.0.0.1:8899".to_string())
}

fn admin_token() -> Option<String> {
    std::env::var("POWERCTL_ADMIN_TOKEN").ok().filter(|t| !t.is_empty())
}

async fn run_migrate() -> Result<()> {
    let store = powerctl_db::PostgresStore::connect_from_env("powerctl-cli").await.context("connect to database")?;
    store.migrate().await.context("run migrations")?;
    println!("migrations_applied=true");
    Ok(())
}

fn http_client() -> reqwest::Client {
    reqwest::Client::builder().build().expect("reqwest client construction")
}

fn with_auth(req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
    match admin_token() {
        Some(token) => req.bearer_auth(token),
        None => req,
    }
}

async fn run_sync(base_url: &str) -> Result<()> {
    let resp = with_auth(http_client().post(format!("{base_url}/v1/sync"))).send().await.context("send sync request")?;
    let status = resp.status();
    let body = resp.text().await.context("read sync response body")?;
    if !status.is_success() {
        bail!("sync failed: {status}: {body}");
    }
    println!("{body}");
    Ok(())
}

async fn run_transition(
    base_url: &str,
    operation: String,
    node_ids: Vec<String>,
    requested_by: String,
    dry_run: bool,
) -> Result<()> {
    let body = serde_json::json!({
        "operation": operation,
        "node_ids": node_ids,
        "requested_by": requested_by,
        "dry_run": dry_run,
    });
    let resp = with_auth(http_client().post(format!("{base_url}/v1/transitions")).json(&body))
        .send()
        .await
        .context("send transition request")?;
    let status = resp.status();
    let parsed: serde_json::Value = resp.json().await.context("decode transition response")?;
    if !status.is_success() {
        bail!("transition request failed: {status}: {parsed}");
    }
    let id = parsed.get("id").and_then(|v| v.as_str()).unwrap_or("<unknown>");
    println!("transition_id={id}");
    Ok(())
}

async fn run_status(base_url: &str, id: Uuid) -> Result<()> {
    let resp = http_client().get(format!("{base_url}/v1/transitions/{id}")).send().await.context("send status request")?;
    let status = resp.status();
    let body = resp.text().await.context("read status response body")?;
    if !status.is_success() {
        bail!("status request failed: {status}: {body}");
    }
    println!("{body}");
    Ok(())
}
