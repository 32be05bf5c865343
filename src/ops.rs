// Swarm Gate - Tool Operations
// Copyright 2026 Joseph Stone - All Rights Reserved
//
// Maps catalog tool names onto Docker Engine calls. Each operation has a
// class (read / write / delete) that picks its timeout and retry policy.
// Arguments arrive schema-validated and are parsed into typed structs here.

use crate::config::Timeouts;
use crate::docker::{ContainerCreate, DockerApi, DockerError, EngineInfo, NetworkCreate, VolumeCreate};
use crate::meta::{self, Guide};
use crate::retry::{retry_with_backoff, RetryPolicy};
use chrono::DateTime;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum OpError {
    #[error("Invalid parameters: {0}")]
    InvalidArguments(String),
    #[error("No operation implements tool '{0}'")]
    Unsupported(String),
    #[error("Docker engine ping failed")]
    PingFailed,
    #[error(transparent)]
    Docker(#[from] DockerError),
    #[error("failed to encode result: {0}")]
    Encode(#[from] serde_json::Error),
}

// ============================================================================
// OPERATION CLASS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpClass {
    Read,
    Write,
    Delete,
}

impl OpClass {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Read => "read",
            Self::Write => "write",
            Self::Delete => "delete",
        }
    }

    pub fn timeout(self, timeouts: &Timeouts) -> Duration {
        match self {
            Self::Read => timeouts.read,
            Self::Write => timeouts.write,
            Self::Delete => timeouts.delete,
        }
    }

    pub fn retry_policy(self) -> RetryPolicy {
        match self {
            Self::Read => RetryPolicy::READ,
            Self::Write | Self::Delete => RetryPolicy::WRITE,
        }
    }
}

// ============================================================================
// OPERATION
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Ping,
    Info,
    ListContainers,
    CreateContainer,
    StartContainer,
    StopContainer,
    RemoveContainer,
    GetLogs,
    ListStacks,
    RemoveCompose,
    ListServices,
    ScaleService,
    RemoveService,
    ListNetworks,
    CreateNetwork,
    RemoveNetwork,
    ListVolumes,
    CreateVolume,
    RemoveVolume,
    DiscoverTools,
    ListTaskTypes,
    IntentQueryHelp,
}

impl Operation {
    pub const ALL: [Self; 22] = [
        Self::Ping,
        Self::Info,
        Self::ListContainers,
        Self::CreateContainer,
        Self::StartContainer,
        Self::StopContainer,
        Self::RemoveContainer,
        Self::GetLogs,
        Self::ListStacks,
        Self::RemoveCompose,
        Self::ListServices,
        Self::ScaleService,
        Self::RemoveService,
        Self::ListNetworks,
        Self::CreateNetwork,
        Self::RemoveNetwork,
        Self::ListVolumes,
        Self::CreateVolume,
        Self::RemoveVolume,
        Self::DiscoverTools,
        Self::ListTaskTypes,
        Self::IntentQueryHelp,
    ];

    pub fn tool_name(self) -> &'static str {
        match self {
            Self::Ping => "ping",
            Self::Info => "info",
            Self::ListContainers => "list-containers",
            Self::CreateContainer => "create-container",
            Self::StartContainer => "start-container",
            Self::StopContainer => "stop-container",
            Self::RemoveContainer => "remove-container",
            Self::GetLogs => "get-logs",
            Self::ListStacks => "list-stacks",
            Self::RemoveCompose => "remove-compose",
            Self::ListServices => "list-services",
            Self::ScaleService => "scale-service",
            Self::RemoveService => "remove-service",
            Self::ListNetworks => "list-networks",
            Self::CreateNetwork => "create-network",
            Self::RemoveNetwork => "remove-network",
            Self::ListVolumes => "list-volumes",
            Self::CreateVolume => "create-volume",
            Self::RemoveVolume => "remove-volume",
            Self::DiscoverTools => meta::DISCOVER_TOOLS,
            Self::ListTaskTypes => meta::LIST_TASK_TYPES,
            Self::IntentQueryHelp => meta::INTENT_QUERY_HELP,
        }
    }

    pub fn from_tool_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|op| op.tool_name() == name)
    }

    pub fn class(self) -> OpClass {
        match self {
            Self::Ping
            | Self::Info
            | Self::ListContainers
            | Self::GetLogs
            | Self::ListStacks
            | Self::ListServices
            | Self::ListNetworks
            | Self::ListVolumes
            | Self::DiscoverTools
            | Self::ListTaskTypes
            | Self::IntentQueryHelp => OpClass::Read,
            Self::RemoveContainer
            | Self::RemoveCompose
            | Self::RemoveService
            | Self::RemoveNetwork
            | Self::RemoveVolume => OpClass::Delete,
            Self::CreateContainer
            | Self::StartContainer
            | Self::StopContainer
            | Self::ScaleService
            | Self::CreateNetwork
            | Self::CreateVolume => OpClass::Write,
        }
    }
}

// ============================================================================
// ARGUMENTS
// ============================================================================

#[derive(Debug, Default, Deserialize)]
struct ListContainersArgs {
    #[serde(default)]
    all: bool,
    #[serde(default)]
    filters: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct IdArgs {
    id: String,
}

#[derive(Debug, Deserialize)]
struct StopArgs {
    id: String,
    #[serde(default = "default_stop_timeout")]
    timeout: u64,
}

#[derive(Debug, Deserialize)]
struct RemoveContainerArgs {
    id: String,
    #[serde(default)]
    force: bool,
}

#[derive(Debug, Deserialize)]
struct LogsArgs {
    id: String,
    #[serde(default = "default_tail")]
    tail: u64,
    /// Unix seconds or an RFC 3339 timestamp.
    #[serde(default)]
    since: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct ProjectArgs {
    project_name: String,
}

#[derive(Debug, Deserialize)]
struct NameArgs {
    name: String,
}

#[derive(Debug, Deserialize)]
struct ScaleArgs {
    name: String,
    replicas: u64,
}

fn default_stop_timeout() -> u64 {
    10
}

fn default_tail() -> u64 {
    100
}

/// Missing or null arguments parse as an empty object.
fn parse<T: DeserializeOwned>(args: &Value) -> Result<T, OpError> {
    let args = if args.is_null() { json!({}) } else { args.clone() };
    serde_json::from_value(args).map_err(|e| OpError::InvalidArguments(e.to_string()))
}

fn parse_since(since: Option<&Value>) -> Result<Option<i64>, OpError> {
    match since {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => n
            .as_i64()
            .map(Some)
            .ok_or_else(|| OpError::InvalidArguments(format!("since: {n} is not an integer"))),
        Some(Value::String(s)) => {
            if let Ok(secs) = s.trim().parse::<i64>() {
                return Ok(Some(secs));
            }
            DateTime::parse_from_rfc3339(s.trim())
                .map(|d| Some(d.timestamp()))
                .map_err(|e| OpError::InvalidArguments(format!("since: {e}")))
        }
        Some(other) => Err(OpError::InvalidArguments(format!(
            "since: expected a timestamp, got {other}"
        ))),
    }
}

fn system_info(info: &EngineInfo) -> Value {
    json!({
        "version": crate::mcp::SERVER_VERSION,
        "os": info.operating_system.as_deref().unwrap_or("unknown"),
        "architecture": info.architecture.as_deref().unwrap_or("unknown"),
        "docker_version": info.server_version.as_deref().unwrap_or("unknown"),
        "swarm_status": info.swarm.local_node_state.as_deref().unwrap_or("inactive"),
        "containers": info.containers,
        "images": info.images,
    })
}

// ============================================================================
// EXECUTOR
// ============================================================================

pub struct ToolExecutor {
    docker: Arc<dyn DockerApi>,
    guide: Guide,
    timeouts: Timeouts,
}

impl ToolExecutor {
    pub fn new(docker: Arc<dyn DockerApi>, guide: Guide, timeouts: Timeouts) -> Self {
        Self {
            docker,
            guide,
            timeouts,
        }
    }

    pub fn docker(&self) -> &Arc<dyn DockerApi> {
        &self.docker
    }

    pub fn guide(&self) -> &Guide {
        &self.guide
    }

    pub fn timeout_for(&self, op: Operation) -> Duration {
        op.class().timeout(&self.timeouts)
    }

    /// Run one operation. The caller applies the deadline.
    pub async fn execute(&self, op: Operation, args: &Value) -> Result<Value, OpError> {
        match op {
            Operation::DiscoverTools => Ok(self.guide.discover_tools()),
            Operation::ListTaskTypes => Ok(self.guide.list_task_types()),
            Operation::IntentQueryHelp => Ok(self.guide.intent_query_help()),
            _ => self.run_docker(op, args).await,
        }
    }

    async fn run_docker(&self, op: Operation, args: &Value) -> Result<Value, OpError> {
        let docker = self.docker.as_ref();
        let policy = op.class().retry_policy();
        let name = op.tool_name();

        let out = match op {
            Operation::Ping => {
                if !retry_with_backoff(policy, name, || docker.ping()).await? {
                    return Err(OpError::PingFailed);
                }
                json!({ "status": "ok", "message": "Docker engine is reachable" })
            }
            Operation::Info => system_info(&retry_with_backoff(policy, name, || docker.info()).await?),

            Operation::ListContainers => {
                let a: ListContainersArgs = parse(args)?;
                let list = retry_with_backoff(policy, name, || docker.list_containers(a.all, a.filters.as_ref())).await?;
                serde_json::to_value(list)?
            }
            Operation::CreateContainer => {
                let a: ContainerCreate = parse(args)?;
                serde_json::to_value(retry_with_backoff(policy, name, || docker.create_container(&a)).await?)?
            }
            Operation::StartContainer => {
                let a: IdArgs = parse(args)?;
                retry_with_backoff(policy, name, || docker.start_container(&a.id)).await?;
                json!({})
            }
            Operation::StopContainer => {
                let a: StopArgs = parse(args)?;
                retry_with_backoff(policy, name, || docker.stop_container(&a.id, a.timeout)).await?;
                json!({})
            }
            Operation::RemoveContainer => {
                let a: RemoveContainerArgs = parse(args)?;
                retry_with_backoff(policy, name, || docker.remove_container(&a.id, a.force)).await?;
                json!({})
            }
            Operation::GetLogs => {
                let a: LogsArgs = parse(args)?;
                let since = parse_since(a.since.as_ref())?;
                let logs = retry_with_backoff(policy, name, || docker.container_logs(&a.id, a.tail, since)).await?;
                json!({ "id": a.id, "logs": logs })
            }

            Operation::ListStacks => {
                serde_json::to_value(retry_with_backoff(policy, name, || docker.list_stacks()).await?)?
            }
            Operation::RemoveCompose => {
                let a: ProjectArgs = parse(args)?;
                retry_with_backoff(policy, name, || docker.remove_stack(&a.project_name)).await?;
                json!({})
            }

            Operation::ListServices => {
                serde_json::to_value(retry_with_backoff(policy, name, || docker.list_services()).await?)?
            }
            Operation::ScaleService => {
                let a: ScaleArgs = parse(args)?;
                serde_json::to_value(
                    retry_with_backoff(policy, name, || docker.scale_service(&a.name, a.replicas)).await?,
                )?
            }
            Operation::RemoveService => {
                let a: NameArgs = parse(args)?;
                retry_with_backoff(policy, name, || docker.remove_service(&a.name)).await?;
                json!({})
            }

            Operation::ListNetworks => {
                serde_json::to_value(retry_with_backoff(policy, name, || docker.list_networks()).await?)?
            }
            Operation::CreateNetwork => {
                let a: NetworkCreate = parse(args)?;
                serde_json::to_value(retry_with_backoff(policy, name, || docker.create_network(&a)).await?)?
            }
            Operation::RemoveNetwork => {
                let a: IdArgs = parse(args)?;
                retry_with_backoff(policy, name, || docker.remove_network(&a.id)).await?;
                json!({})
            }

            Operation::ListVolumes => {
                serde_json::to_value(retry_with_backoff(policy, name, || docker.list_volumes()).await?)?
            }
            Operation::CreateVolume => {
                let a: VolumeCreate = parse(args)?;
                serde_json::to_value(retry_with_backoff(policy, name, || docker.create_volume(&a)).await?)?
            }
            Operation::RemoveVolume => {
                let a: NameArgs = parse(args)?;
                retry_with_backoff(policy, name, || docker.remove_volume(&a.name)).await?;
                json!({})
            }

            Operation::DiscoverTools | Operation::ListTaskTypes | Operation::IntentQueryHelp => {
                return Err(OpError::Unsupported(name.to_string()))
            }
        };
        Ok(out)
    }
}

// ============================================================================
// TESTS
// ============================================================================
