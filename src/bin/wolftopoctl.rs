//! WolfTopoCtl - Command line client for the WolfTopo admin API
//!
//! Usage:
//!   wolftopoctl status                       - Show API health and revision
//!   wolftopoctl list instances               - Show every instance
//!   wolftopoctl add-replicaset rs1           - Create a replicaset
//!   wolftopoctl add-instance rs1 s1 --uri .. - Add an instance
//!   wolftopoctl show sharding                - Print the sharding config

use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};

use wolftopo::api::{ErrorResponse, HealthResponse};
use wolftopo::topology::{MasterMode, Role, TopologyDocument};

/// WolfTopo Control Tool
#[derive(Parser)]
#[command(name = "wolftopoctl")]
#[command(about = "Administer WolfTopo cluster topologies", long_about = None)]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "/etc/wolftopo/config.toml")]
    config: PathBuf,

    /// API endpoint to connect to (overrides config)
    #[arg(short, long)]
    endpoint: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show API health and document revision
    Status,
    /// List topology entities
    List {
        #[command(subcommand)]
        what: ListSubcommand,
    },
    /// Print the document or a derived configuration as JSON
    Show {
        #[arg(value_enum)]
        what: ShowTarget,
    },
    /// Print the runtime configuration of one instance
    Conf { instance: String },
    /// Create a replicaset
    AddReplicaset {
        name: String,
        #[arg(long)]
        weight: Option<f64>,
        #[arg(long, value_enum)]
        master_mode: Option<MasterModeArg>,
    },
    /// Add an instance to a replicaset
    AddInstance {
        replicaset: String,
        name: String,
        /// Advertised URI (host:port)
        #[arg(long)]
        uri: String,
        #[arg(long)]
        zone: Option<String>,
        /// Roles; may be repeated
        #[arg(long = "role", value_enum)]
        roles: Vec<RoleArg>,
        #[arg(long)]
        master: bool,
    },
    /// Designate or clear an instance as master
    SetMaster {
        instance: String,
        #[arg(action = clap::ArgAction::Set)]
        is_master: bool,
    },
    /// Expel an instance
    Expel { instance: String },
    /// Expel a replicaset without live instances
    ExpelReplicaset { name: String },
    /// Replicate `instance` from `upstream`
    Link { instance: String, upstream: String },
    /// Remove a replication link
    Unlink { instance: String, upstream: String },
    /// Mark an instance enabled
    Enable { instance: String },
    /// Mark an instance disabled
    Disable { instance: String },
    /// Set the weight between two zones
    SetZoneWeight { from: String, to: String, weight: f64 },
    /// Delete the whole topology document (DESTRUCTIVE)
    Destroy {
        /// Skip confirmation prompt
        #[arg(long)]
        force: bool,
    },
}

#[derive(Subcommand)]
enum ListSubcommand {
    /// List all instances with their replicaset and status
    Instances,
    /// List replicasets
    Replicasets,
}

#[derive(Clone, Copy, ValueEnum)]
enum ShowTarget {
    Topology,
    Sharding,
    Routers,
    Storages,
    Masters,
}

impl ShowTarget {
    fn path(self) -> &'static str {
        match self {
            ShowTarget::Topology => "/topology",
            ShowTarget::Sharding => "/sharding",
            ShowTarget::Routers => "/routers",
            ShowTarget::Storages => "/storages",
            ShowTarget::Masters => "/masters",
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum MasterModeArg {
    Single,
    Multimaster,
    Auto,
}

impl From<MasterModeArg> for MasterMode {
    fn from(arg: MasterModeArg) -> Self {
        match arg {
            MasterModeArg::Single => MasterMode::Single,
            MasterModeArg::Multimaster => MasterMode::Multimaster,
            MasterModeArg::Auto => MasterMode::Auto,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum RoleArg {
    Storage,
    Router,
}

impl From<RoleArg> for Role {
    fn from(arg: RoleArg) -> Self {
        match arg {
            RoleArg::Storage => Role::Storage,
            RoleArg::Router => Role::Router,
        }
    }
}

// ============ Config ============

#[derive(Debug, Deserialize)]
struct Config {
    #[serde(default)]
    api: ApiConfig,
}

#[derive(Debug, Deserialize, Default)]
struct ApiConfig {
    #[serde(default = "default_api_bind")]
    bind_address: String,
}

fn default_api_bind() -> String {
    "0.0.0.0:8090".to_string()
}

/// Resolve the endpoint from the config file, mapping 0.0.0.0 to localhost
fn endpoint_from_config(path: &Path) -> String {
    let addr = std::fs::read_to_string(path)
        .ok()
        .and_then(|content| toml::from_str::<Config>(&content).ok())
        .map(|config| config.api.bind_address)
        .unwrap_or_else(default_api_bind);

    match addr.strip_prefix("0.0.0.0") {
        Some(port) => format!("http://127.0.0.1{}", port),
        None => format!("http://{}", addr),
    }
}

// ============ Client ============

struct Client {
    endpoint: String,
    http: reqwest::Client,
}

impl Client {
    fn new(endpoint: String) -> Self {
        Self {
            endpoint: endpoint.trim_end_matches('/').to_string(),
            http: reqwest::Client::new(),
        }
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> anyhow::Result<T> {
        let response = self
            .http
            .get(format!("{}{}", self.endpoint, path))
            .send()
            .await
            .with_context(|| format!("failed to reach {}", self.endpoint))?;
        decode(response).await
    }

    async fn send<T: DeserializeOwned>(
        &self,
        method: reqwest::Method,
        path: &str,
        body: Option<Value>,
    ) -> anyhow::Result<T> {
        let mut request = self
            .http
            .request(method, format!("{}{}", self.endpoint, path));
        if let Some(body) = body {
            request = request.json(&body);
        }
        let response = request
            .send()
            .await
            .with_context(|| format!("failed to reach {}", self.endpoint))?;
        decode(response).await
    }

    /// Run a mutation and report the new revision
    async fn mutate(
        &self,
        method: reqwest::Method,
        path: &str,
        body: Option<Value>,
        done: &str,
    ) -> anyhow::Result<()> {
        let doc: TopologyDocument = self.send(method, path, body).await?;
        println!("{} (revision {})", done, doc.revision);
        Ok(())
    }
}

async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> anyhow::Result<T> {
    let status = response.status();
    if status.is_success() {
        return Ok(response.json().await?);
    }
    match response.json::<ErrorResponse>().await {
        Ok(err) => anyhow::bail!("{} ({})", err.error, err.code),
        Err(_) => anyhow::bail!("API error: {}", status),
    }
}

// ============ Main ============

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let endpoint = cli
        .endpoint
        .clone()
        .unwrap_or_else(|| endpoint_from_config(&cli.config));
    let client = Client::new(endpoint);

    if let Err(e) = run(&client, cli.command).await {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

async fn run(client: &Client, command: Commands) -> anyhow::Result<()> {
    use reqwest::Method;

    match command {
        Commands::Status => show_status(client).await,
        Commands::List { what } => match what {
            ListSubcommand::Instances => list_instances(client).await,
            ListSubcommand::Replicasets => list_replicasets(client).await,
        },
        Commands::Show { what } => {
            let value: Value = client.get(what.path()).await?;
            println!("{}", serde_json::to_string_pretty(&value)?);
            Ok(())
        }
        Commands::Conf { instance } => {
            let value: Value = client.get(&format!("/instances/{}/conf", instance)).await?;
            println!("{}", serde_json::to_string_pretty(&value)?);
            Ok(())
        }
        Commands::AddReplicaset {
            name,
            weight,
            master_mode,
        } => {
            let body = json!({
                "name": name,
                "weight": weight,
                "master_mode": master_mode.map(MasterMode::from),
            });
            let done = format!("Replicaset '{}' created", name);
            client
                .mutate(Method::POST, "/replicasets", Some(body), &done)
                .await
        }
        Commands::AddInstance {
            replicaset,
            name,
            uri,
            zone,
            roles,
            master,
        } => {
            let roles: Option<Vec<Role>> = if roles.is_empty() {
                None
            } else {
                Some(roles.into_iter().map(Role::from).collect())
            };
            let body = json!({
                "name": name,
                "advertise_uri": uri,
                "zone": zone,
                "roles": roles,
                "is_master": master,
            });
            let done = format!("Instance '{}' added to '{}'", name, replicaset);
            client
                .mutate(
                    Method::POST,
                    &format!("/replicasets/{}/instances", replicaset),
                    Some(body),
                    &done,
                )
                .await
        }
        Commands::SetMaster {
            instance,
            is_master,
        } => {
            let done = format!("Instance '{}' is_master = {}", instance, is_master);
            client
                .mutate(
                    Method::PATCH,
                    &format!("/instances/{}", instance),
                    Some(json!({ "is_master": is_master })),
                    &done,
                )
                .await
        }
        Commands::Expel { instance } => {
            let done = format!("Instance '{}' expelled", instance);
            client
                .mutate(Method::DELETE, &format!("/instances/{}", instance), None, &done)
                .await
        }
        Commands::ExpelReplicaset { name } => {
            let done = format!("Replicaset '{}' expelled", name);
            client
                .mutate(Method::DELETE, &format!("/replicasets/{}", name), None, &done)
                .await
        }
        Commands::Link { instance, upstream } => {
            let done = format!("'{}' now replicates from '{}'", instance, upstream);
            client
                .mutate(
                    Method::POST,
                    &format!("/instances/{}/links", instance),
                    Some(json!({ "upstream": upstream })),
                    &done,
                )
                .await
        }
        Commands::Unlink { instance, upstream } => {
            let done = format!("Link '{}' -> '{}' removed", instance, upstream);
            client
                .mutate(
                    Method::DELETE,
                    &format!("/instances/{}/links/{}", instance, upstream),
                    None,
                    &done,
                )
                .await
        }
        Commands::Enable { instance } => {
            let done = format!("Instance '{}' enabled", instance);
            client
                .mutate(
                    Method::POST,
                    &format!("/instances/{}/reachable", instance),
                    None,
                    &done,
                )
                .await
        }
        Commands::Disable { instance } => {
            let done = format!("Instance '{}' disabled", instance);
            client
                .mutate(
                    Method::POST,
                    &format!("/instances/{}/unreachable", instance),
                    None,
                    &done,
                )
                .await
        }
        Commands::SetZoneWeight { from, to, weight } => {
            let done = format!("Weight {} -> {} set to {}", from, to, weight);
            client
                .mutate(
                    Method::PUT,
                    &format!("/topology/weights/{}/{}", from, to),
                    Some(json!({ "weight": weight })),
                    &done,
                )
                .await
        }
        Commands::Destroy { force } => destroy(client, force).await,
    }
}

// ============ Commands ============

async fn show_status(client: &Client) -> anyhow::Result<()> {
    let response = client
        .http
        .get(format!("{}/health", client.endpoint))
        .send()
        .await
        .with_context(|| format!("failed to reach {}", client.endpoint))?;
    // unhealthy answers still carry a body
    let health: HealthResponse = response.json().await?;

    println!();
    println!("WolfTopo Status (wolftopoctl v{})", env!("CARGO_PKG_VERSION"));
    println!("=================================");
    println!();
    println!("Endpoint:     {}", client.endpoint);
    println!("Topology:     {}", health.topology);
    println!(
        "Healthy:      {}",
        if health.healthy {
            "\x1b[32myes\x1b[0m"
        } else {
            "\x1b[31mno\x1b[0m"
        }
    );
    match health.revision {
        Some(revision) => println!("Revision:     {}", revision),
        None => println!("Revision:     -"),
    }
    println!();

    Ok(())
}

async fn list_instances(client: &Client) -> anyhow::Result<()> {
    let doc: TopologyDocument = client.get("/topology").await?;

    println!();
    println!(
        "{:<20} {:<15} {:<25} {:<10} {:<8} {:<16}",
        "INSTANCE", "REPLICASET", "URI", "STATUS", "MASTER", "ROLES"
    );
    println!("{}", "-".repeat(96));

    for (rs, instance) in doc.instances() {
        // Pad status to fixed width BEFORE adding color codes
        let status_padded = format!("{:<10}", instance.status.to_string());
        let status_colored = match instance.status.to_string().as_str() {
            "enabled" => format!("\x1b[32m{}\x1b[0m", status_padded),
            "disabled" => format!("\x1b[33m{}\x1b[0m", status_padded),
            "expelled" => format!("\x1b[31m{}\x1b[0m", status_padded),
            _ => status_padded,
        };
        let roles: Vec<String> = instance.roles.iter().map(Role::to_string).collect();

        println!(
            "{:<20} {:<15} {:<25} {} {:<8} {:<16}",
            instance.name,
            rs.name,
            instance.advertise_uri,
            status_colored,
            if instance.is_master { "yes" } else { "" },
            roles.join(",")
        );
    }
    println!();

    Ok(())
}

async fn list_replicasets(client: &Client) -> anyhow::Result<()> {
    let doc: TopologyDocument = client.get("/topology").await?;

    println!();
    println!(
        "{:<20} {:<12} {:<8} {:<10} {:<10}",
        "REPLICASET", "MODE", "WEIGHT", "STATUS", "INSTANCES"
    );
    println!("{}", "-".repeat(64));

    for rs in doc.replicasets.values() {
        println!(
            "{:<20} {:<12} {:<8} {:<10} {:<10}",
            rs.name,
            rs.master_mode.to_string(),
            rs.weight,
            if rs.is_expelled() { "expelled" } else { "active" },
            rs.live_instances().count()
        );
    }
    println!();

    Ok(())
}

async fn destroy(client: &Client, force: bool) -> anyhow::Result<()> {
    if !force {
        println!("This deletes the whole topology document at {}.", client.endpoint);
        println!("Type 'yes' to continue:");
        let mut answer = String::new();
        std::io::stdin().read_line(&mut answer)?;
        if answer.trim() != "yes" {
            println!("Aborted");
            return Ok(());
        }
    }

    let response = client
        .http
        .delete(format!("{}/topology", client.endpoint))
        .send()
        .await
        .with_context(|| format!("failed to reach {}", client.endpoint))?;
    if !response.status().is_success() {
        return decode::<Value>(response).await.map(|_| ());
    }
    println!("Topology deleted");
    Ok(())
}
