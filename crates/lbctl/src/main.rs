//! Command line client for the load balancer API
//!
//! Performs single API calls. Documents are read and printed in the same JSON
//! envelope format the API uses.

use std::io::Read;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing::debug;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use lbcontroller::client::{LbApiClient, LoadBalancerApi};
use lbcontroller::resource::{self, Frontend, Service};

#[derive(Debug, Parser)]
#[command(name = "lbctl", version, about = "Manage load balancer services and frontends")]
struct Cli {
    /// Base URL of the load balancer API
    #[arg(long, env = "LBC_ENDPOINT")]
    endpoint: String,

    /// Bearer token for the load balancer API
    #[arg(long, env = "LBC_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Request timeout in seconds
    #[arg(long, default_value_t = 30)]
    timeout: u64,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Manage services
    #[command(subcommand)]
    Service(Action),
    /// Manage frontends
    #[command(subcommand)]
    Frontend(Action),
}

#[derive(Debug, Subcommand)]
enum Action {
    /// List all objects
    List,
    /// Show one object
    Get { name: String },
    /// Create an object from a JSON document
    New {
        /// Document to read, stdin when omitted or `-`
        file: Option<PathBuf>,
    },
    /// Replace an object with a JSON document
    Replace { file: Option<PathBuf> },
    /// Overwrite the fields present in a JSON document
    Reconfig { file: Option<PathBuf> },
    /// Delete an object, succeeding if it does not exist
    Delete { name: String },
}

fn read_document(file: Option<&PathBuf>) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    match file {
        Some(path) if path.as_os_str() != "-" => {
            buf = std::fs::read(path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
        }
        _ => {
            std::io::stdin()
                .read_to_end(&mut buf)
                .context("Failed to read document from stdin")?;
        }
    }
    Ok(buf)
}

fn read_service(file: Option<&PathBuf>) -> Result<Service> {
    let bytes = read_document(file)?;
    resource::decode_service(&bytes).context("Invalid service document")
}

fn read_frontend(file: Option<&PathBuf>) -> Result<Frontend> {
    let bytes = read_document(file)?;
    resource::decode_frontend(&bytes).context("Invalid frontend document")
}

fn print<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", resource::encode_pretty(value)?);
    Ok(())
}

async fn run_service(client: &LbApiClient, action: Action) -> Result<()> {
    match action {
        Action::List => {
            for service in client.list_services().await? {
                print(&service)?;
            }
        }
        Action::Get { name } => match client.get_service(&name).await? {
            Some(service) => print(&service)?,
            None => bail!("service {name} not found"),
        },
        Action::New { file } => {
            let service = read_service(file.as_ref())?;
            print(&client.create_service(&service).await?)?;
        }
        Action::Replace { file } => {
            let service = read_service(file.as_ref())?;
            print(&client.replace_service(&service).await?)?;
        }
        Action::Reconfig { file } => {
            let service = read_service(file.as_ref())?;
            print(&client.reconfig_service(&service).await?)?;
        }
        Action::Delete { name } => {
            client.delete_service(&name).await?;
            eprintln!("service {name} deleted");
        }
    }
    Ok(())
}

async fn run_frontend(client: &LbApiClient, action: Action) -> Result<()> {
    match action {
        Action::List => {
            for frontend in client.list_frontends().await? {
                print(&frontend)?;
            }
        }
        Action::Get { name } => match client.get_frontend(&name).await? {
            Some(frontend) => print(&frontend)?,
            None => bail!("frontend {name} not found"),
        },
        Action::New { file } => {
            let frontend = read_frontend(file.as_ref())?;
            print(&client.create_frontend(&frontend).await?)?;
        }
        Action::Replace { file } => {
            let frontend = read_frontend(file.as_ref())?;
            print(&client.replace_frontend(&frontend).await?)?;
        }
        Action::Reconfig { file } => {
            let frontend = read_frontend(file.as_ref())?;
            print(&client.reconfig_frontend(&frontend).await?)?;
        }
        Action::Delete { name } => {
            client.delete_frontend(&name).await?;
            eprintln!("frontend {name} deleted");
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .init();

    let cli = Cli::parse();
    debug!(endpoint = %cli.endpoint, "Using load balancer API");

    let client = LbApiClient::new(&cli.endpoint, cli.token, Duration::from_secs(cli.timeout))
        .context("Failed to create API client")?;

    match cli.command {
        Command::Service(action) => run_service(&client, action).await,
        Command::Frontend(action) => run_frontend(&client, action).await,
    }
}
