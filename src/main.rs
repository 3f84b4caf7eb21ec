use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use serde_json::json;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use strata_core::config::AppConfig;
use strata_core::event::EventBus;
use strata_core::types::{edge_types, payload_keys, Fields, Node};
use strata_core::StrataError;

use strata_agents::{builtin_agents, AgentCoordinator, AgentRegistry};
use strata_graph::{Catalog, PlatformGraph, PolicyChain};

#[derive(Parser)]
#[command(name = "strata", version, about = "Platform-state engine: policy-gated graph, planner, and agent routing")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "strata.toml", env = "STRATA_CONFIG")]
    config: PathBuf,

    /// Acting user recorded on created entities
    #[arg(short, long, env = "STRATA_USER")]
    user: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show current configuration
    Config,
    /// List graph nodes
    Nodes {
        /// Only nodes of this kind
        #[arg(long)]
        kind: Option<String>,
    },
    /// Insert or replace a node
    AddNode {
        id: String,
        kind: String,
    },
    /// Add a policy-gated edge
    AddEdge {
        from: String,
        to: String,
        edge_type: String,
    },
    /// Dry-run the policy gate for an edge
    CheckEdge {
        from: String,
        to: String,
        #[arg(long = "type", default_value = edge_types::DEPLOYED_IN)]
        edge_type: String,
    },
    /// Print the execution order over the given edge types
    Plan {
        /// Edge types to order by (repeatable)
        #[arg(long = "edge-type", short = 'e')]
        edge_types: Vec<String>,
        /// Only plan nodes reachable from these roots (repeatable)
        #[arg(long)]
        from: Vec<String>,
    },
    /// List capabilities advertised by the running agents
    Capabilities,
    /// Resolve a free-text intent to a capability and its agents
    Resolve {
        #[arg(trailing_var_arg = true, required = true)]
        intent: Vec<String>,
    },
    /// Deploy a service version into an environment through the agents
    Deploy {
        version: String,
        environment: String,
    },
}

impl Commands {
    /// Subcommands that change the graph and save it.
    fn mutates(&self) -> bool {
        matches!(
            self,
            Commands::AddNode { .. } | Commands::AddEdge { .. } | Commands::Deploy { .. }
        )
    }
}

struct Runtime {
    graph: Arc<PlatformGraph>,
    catalog: Catalog,
    coordinator: AgentCoordinator,
}

async fn build_runtime(config: &AppConfig, user: Option<&str>) -> anyhow::Result<Runtime> {
    let backend = strata_store::open_backend(&config.graph)?;
    let policy = PolicyChain::from_config(&config.policy);
    info!(rules = ?policy.rule_names(), "Policy rules installed");

    let graph = Arc::new(PlatformGraph::open(backend, Some(Arc::new(policy))).await?);
    let mut catalog = Catalog::new(graph.clone()).with_autosave(config.graph.autosave);
    if let Some(user) = user {
        catalog = catalog.as_actor(user);
    }

    let bus = Arc::new(EventBus::from_config(&config.bus));
    let coordinator = AgentCoordinator::new(Arc::new(AgentRegistry::new()), bus)
        .await?
        .with_config(&config.agents)
        .with_dedup_window(config.bus.dedup_window);
    for agent in builtin_agents(&config.agents.builtin, &catalog)? {
        coordinator.start_agent(agent).await?;
    }

    Ok(Runtime {
        graph,
        catalog,
        coordinator,
    })
}

fn print_json(value: &impl serde::Serialize) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = AppConfig::load_or_default(&cli.config)?;

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log.level)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    if !cli.config.exists() {
        warn!(path = %cli.config.display(), "No config file found, using defaults");
    }

    if let Commands::Config = cli.command {
        println!("{}", toml::to_string_pretty(&config)?);
        return Ok(());
    }

    if cli.command.mutates() && !config.graph.is_persistent() {
        warn!(
            backend = ?config.graph.backend,
            "Graph backend is in-memory; changes are lost when the process exits (set [graph] backend = \"sqlite\" or \"file\")"
        );
    }

    let runtime = build_runtime(&config, cli.user.as_deref()).await?;
    info!(
        backend = runtime.graph.backend_name(),
        transport = runtime.coordinator.bus().transport_name(),
        nodes = runtime.graph.node_count().await,
        "Strata ready"
    );

    let result = run(&cli.command, &runtime).await;
    runtime.coordinator.shutdown().await?;
    result
}

async fn run(command: &Commands, runtime: &Runtime) -> anyhow::Result<()> {
    let graph = &runtime.graph;
    match command {
        // Printed before the runtime starts.
        Commands::Config => {}
        Commands::Nodes { kind } => {
            let nodes = match kind {
                Some(kind) => graph.nodes_of_kind(kind).await,
                None => {
                    graph
                        .read(|g| g.node_ids().into_iter().filter_map(|id| g.node(id).cloned()).collect::<Vec<Node>>())
                        .await
                }
            };
            print_json(&nodes)?;
        }
        Commands::AddNode { id, kind } => {
            let node = Node::new(id.as_str(), kind.as_str());
            let created = graph.add_node(node).await?;
            graph.save().await?;
            print_json(&json!({ "id": id, "created": created }))?;
        }
        Commands::AddEdge { from, to, edge_type } => {
            let outcome = graph.add_edge(from, to, edge_type).await?;
            graph.save().await?;
            print_json(&json!({ "from": from, "to": to, "type": edge_type, "outcome": format!("{:?}", outcome) }))?;
        }
        Commands::CheckEdge { from, to, edge_type } => match graph.check_edge(from, to, edge_type).await {
            Ok(()) => print_json(&json!({ "allowed": true }))?,
            Err(StrataError::PolicyViolation { rule, reason }) => {
                print_json(&json!({ "allowed": false, "rule": rule, "reason": reason }))?
            }
            Err(e) => return Err(e.into()),
        },
        Commands::Plan { edge_types: types, from } => {
            let types = if types.is_empty() {
                vec![
                    edge_types::OWNS.to_string(),
                    edge_types::HAS_VERSION.to_string(),
                    edge_types::DEPLOYED_IN.to_string(),
                ]
            } else {
                types.clone()
            };
            let order = if from.is_empty() {
                graph.plan(&types).await?
            } else {
                graph.plan_from(from, &types).await?
            };
            print_json(&order)?;
        }
        Commands::Capabilities => {
            print_json(&runtime.coordinator.registry().get_available_capabilities().await)?;
        }
        Commands::Resolve { intent } => {
            let resolution = runtime.coordinator.resolve_intent(&intent.join(" ")).await?;
            print_json(&resolution)?;
        }
        Commands::Deploy { version, environment } => {
            let mut payload = Fields::new();
            payload.insert("version".into(), json!(version));
            payload.insert("environment".into(), json!(environment));
            if let Some(user) = runtime.catalog_user() {
                payload.insert(payload_keys::USER.into(), json!(user));
            }
            let intent = format!("deploy {} to {}", version, environment);
            let timeout = runtime.coordinator.default_timeout();
            let reply = runtime
                .coordinator
                .dispatch_intent(&intent, payload, timeout)
                .await?;
            graph.save().await?;
            print_json(&reply)?;
        }
    }
    Ok(())
}

impl Runtime {
    fn catalog_user(&self) -> Option<String> {
        self.catalog.actor().map(str::to_string)
    }
}
