// Swarm Gate - Main Entry Point
// Copyright 2026 Joseph Stone - All Rights Reserved
//
// CLI and server launcher. Configuration comes from the environment.
// Usage:
//   swarm-gate serve                          # JSON-RPC over HTTP (auth required)
//   swarm-gate stdio                          # JSON-RPC over stdin/stdout
//   swarm-gate check                          # Validate catalog + filter policy
//   swarm-gate tools --task-type container-ops
//   swarm-gate tools --query "show running containers"
//   swarm-gate classify "scale the web service"

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::json;
use std::sync::Arc;
use swarm_gate::{
    auth::Authenticator,
    config::Settings,
    docker::DockerClient,
    filter::FilterContext,
    mcp::{self, RequestMeta},
    server::{self, AppState},
    startup,
};

#[derive(Parser)]
#[command(name = "swarm-gate")]
#[command(author = "Joseph Stone")]
#[command(version)]
#[command(about = "Swarm Gate - gated MCP tool server for Docker and Swarm")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve JSON-RPC over HTTP on BIND_ADDR
    Serve {
        /// Overrides BIND_ADDR
        #[arg(long)]
        bind: Option<String>,
    },

    /// Serve JSON-RPC over stdin/stdout (trusted local caller)
    Stdio,

    /// Load the tool catalog and filter policy, report warnings and sizes
    Check,

    /// Preview the gated tool list for a task type or query
    Tools {
        #[arg(long)]
        task_type: Option<String>,

        #[arg(long)]
        query: Option<String>,
    },

    /// Run the intent classifier on a query
    Classify {
        query: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr; stdout belongs to the stdio transport.
    let _ = env_logger::Builder::from_env(env_logger::Env::new().filter_or("LOG_LEVEL", "info")).try_init();

    let cli = Cli::parse();
    let mut settings = Settings::from_env().context("Invalid configuration")?;

    match cli.command {
        Commands::Serve { bind } => {
            if let Some(bind) = bind {
                settings.bind_addr = bind;
            }
            settings.require_auth()?;
            let loaded = startup::load(&settings)?;
            let docker = startup::connect_docker(&settings).await?;
            let mcp = Arc::new(startup::server(&settings, &loaded, docker)?);
            let state = AppState::new(mcp, Authenticator::from_settings(&settings));
            server::serve(state, &settings.bind_addr).await?;
        }

        Commands::Stdio => {
            let loaded = startup::load(&settings)?;
            let docker = startup::connect_docker(&settings).await?;
            let mcp = Arc::new(startup::server(&settings, &loaded, docker)?);
            mcp::run_stdio(mcp).await?;
        }

        Commands::Check => {
            let loaded = startup::load(&settings)?;
            let gate = startup::gate(&settings, &loaded)?;
            let estimator = gate.estimator();
            let full = loaded.catalog.get_all();

            println!("Swarm Gate v{}", mcp::SERVER_VERSION);
            println!("Catalog: {:?} ({} tools)", settings.tools_path, loaded.catalog.len());
            println!("Policy:  {:?} (max_tools={})", settings.filter_config_path, loaded.config.max_tools);
            println!("Auth:    {}", if settings.auth_configured() { "configured" } else { "NOT configured" });
            println!();
            println!(
                "Context size ({}): full catalog {} tokens, warn {} / hard {}",
                estimator.method(),
                estimator.size_of(&full),
                estimator.limits().warn,
                estimator.limits().hard
            );
            println!();
            println!("Task types:");
            for (task_type, tools) in &loaded.config.task_type_allowlists {
                let mut ctx = FilterContext::new("check");
                ctx.task_type = Some(task_type.clone());
                let outcome = gate.get_available_tools(&ctx);
                println!(
                    "  {:<14} {:>2} allowlisted, {:>2} served, {:>5} tokens",
                    task_type,
                    tools.len(),
                    outcome.tools.len(),
                    estimator.size_of(&outcome.tools)
                );
            }
            println!();
            if loaded.warnings.is_empty() {
                println!("No warnings.");
            } else {
                println!("Warnings ({}):", loaded.warnings.len());
                for w in &loaded.warnings {
                    println!("  - {}", w);
                }
            }
        }

        Commands::Tools { task_type, query } => {
            let loaded = startup::load(&settings)?;
            // Never contacted: tools/list is answered from the catalog.
            let docker = Arc::new(DockerClient::from_settings(&settings)?);
            let mcp = startup::server(&settings, &loaded, docker)?;

            let mut params = json!({});
            if let Some(t) = task_type {
                params["task_type"] = json!(t);
            }
            if let Some(q) = query {
                params["query"] = json!(q);
            }
            let request = json!({"jsonrpc": "2.0", "id": 1, "method": "tools/list", "params": params});
            if let Some(response) = mcp.handle_value(request, &RequestMeta::stdio()).await {
                println!("{}", serde_json::to_string_pretty(&response)?);
            }
        }

        Commands::Classify { query } => {
            let loaded = startup::load(&settings)?;
            match startup::classifier(&settings, &loaded.config)? {
                Some(classifier) => {
                    let detected = classifier.classify(&query)?;
                    println!(
                        "{}",
                        serde_json::to_string_pretty(&json!({
                            "query": query,
                            "method": classifier.method(),
                            "detected_task_types": detected,
                        }))?
                    );
                }
                None => println!("Intent classification is disabled (INTENT_CLASSIFICATION_ENABLED=false)"),
            }
        }
    }

    Ok(())
}
