// Swarm Gate - Docker Engine Client
// Copyright 2026 Joseph Stone - All Rights Reserved
//
// Thin async client for the Docker Engine HTTP API. Unix socket via a
// hyper HTTP/1 connection per request; TCP (optionally TLS) via reqwest.
// Returns compact summaries, never raw engine documents.

use crate::config::Settings;
use crate::retry::Retryable;
use async_trait::async_trait;
use bytes::Bytes;
use chrono::DateTime;
use http_body_util::{BodyExt, Full};
use hyper::Method;
use indexmap::IndexMap;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::path::PathBuf;
use thiserror::Error;
use tokio::sync::OnceCell;

/// Swarm stack membership label.
pub const STACK_NAMESPACE_LABEL: &str = "com.docker.stack.namespace";
/// Compose project label on standalone engines.
pub const COMPOSE_PROJECT_LABEL: &str = "com.docker.compose.project";

const SHORT_ID_LEN: usize = 12;

#[derive(Debug, Error)]
pub enum DockerError {
    #[error("Docker engine unreachable: {0}")]
    Transport(String),
    #[error("{0} not found")]
    NotFound(String),
    #[error("Docker conflict: {0}")]
    Conflict(String),
    #[error("Docker API error ({status}): {message}")]
    Api { status: u16, message: String },
    #[error("unexpected Docker response: {0}")]
    Decode(String),
    #[error("{0}")]
    Unsupported(String),
    #[error("invalid Docker configuration: {0}")]
    Config(String),
}

impl DockerError {
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::NotFound(_) => Some(404),
            Self::Conflict(_) => Some(409),
            Self::Api { status, .. } => Some(*status),
            Self::Unsupported(_) => Some(400),
            _ => None,
        }
    }
}

impl Retryable for DockerError {
    fn is_retryable(&self) -> bool {
        matches!(self, Self::Transport(_))
    }
}

// ============================================================================
// REQUEST + SUMMARY TYPES
// ============================================================================

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ContainerCreate {
    pub image: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub environment: Option<IndexMap<String, String>>,
    /// "80/tcp" (or "80") -> host port.
    #[serde(default)]
    pub ports: Option<IndexMap<String, u16>>,
    /// Host path or volume name -> {"bind": "/path", "mode": "rw"}.
    #[serde(default)]
    pub volumes: Option<IndexMap<String, IndexMap<String, String>>>,
    #[serde(default)]
    pub restart_policy: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct NetworkCreate {
    pub name: String,
    #[serde(default)]
    pub driver: Option<String>,
    #[serde(default)]
    pub ipam: Option<Value>,
    #[serde(default)]
    pub options: Option<IndexMap<String, String>>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct VolumeCreate {
    pub name: String,
    #[serde(default)]
    pub driver: Option<String>,
    #[serde(default)]
    pub options: Option<IndexMap<String, String>>,
    #[serde(default)]
    pub labels: Option<IndexMap<String, String>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PortMapping {
    pub private_port: u16,
    pub public_port: Option<u16>,
    #[serde(rename = "type")]
    pub kind: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContainerSummary {
    pub id: String,
    pub name: String,
    pub status: String,
    pub image: String,
    pub created: String,
    pub ports: Vec<PortMapping>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContainerInfo {
    pub id: String,
    pub name: String,
    pub status: String,
    pub image: String,
    pub created: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServiceSummary {
    pub id: String,
    pub name: String,
    pub replicas: u64,
    pub image: String,
    pub created: String,
    pub mode: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NetworkSummary {
    pub id: String,
    pub name: String,
    pub driver: String,
    pub scope: String,
    pub created: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VolumeSummary {
    pub name: String,
    pub driver: String,
    pub mountpoint: String,
    pub created: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StackSummary {
    pub project_name: String,
    pub services: Vec<String>,
    pub service_count: usize,
}

/// Subset of `GET /info`.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct EngineInfo {
    pub operating_system: Option<String>,
    pub architecture: Option<String>,
    pub server_version: Option<String>,
    pub containers: u64,
    pub images: u64,
    pub swarm: SwarmInfo,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct SwarmInfo {
    pub local_node_state: Option<String>,
}

impl EngineInfo {
    pub fn swarm_active(&self) -> bool {
        self.swarm.local_node_state.as_deref() == Some("active")
    }
}

// ============================================================================
// ENGINE DOCUMENTS (subset we read)
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RawContainer {
    id: String,
    #[serde(default)]
    names: Vec<String>,
    #[serde(default)]
    image: String,
    #[serde(default)]
    state: String,
    #[serde(default)]
    created: i64,
    #[serde(default)]
    ports: Vec<RawPort>,
    #[serde(default)]
    labels: Option<HashMap<String, String>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RawPort {
    private_port: u16,
    #[serde(default)]
    public_port: Option<u16>,
    #[serde(rename = "Type", default)]
    kind: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawService {
    #[serde(rename = "ID")]
    id: String,
    #[serde(rename = "Version", default)]
    version: RawVersion,
    #[serde(rename = "CreatedAt", default)]
    created_at: String,
    #[serde(rename = "Spec", default)]
    spec: Value,
}

#[derive(Debug, Default, Deserialize)]
struct RawVersion {
    #[serde(rename = "Index", default)]
    index: u64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RawNetwork {
    id: String,
    name: String,
    #[serde(default)]
    driver: String,
    #[serde(default)]
    scope: String,
    #[serde(default)]
    created: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RawVolume {
    name: String,
    #[serde(default)]
    driver: String,
    #[serde(default)]
    mountpoint: String,
    #[serde(default)]
    created_at: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawVolumeList {
    #[serde(rename = "Volumes", default)]
    volumes: Option<Vec<RawVolume>>,
}

#[derive(Debug, Deserialize)]
struct RawCreated {
    #[serde(rename = "Id")]
    id: String,
}

// ============================================================================
// OPERATIONS SEAM
// ============================================================================

/// Engine operations used by the tool executor.
#[async_trait]
pub trait DockerApi: Send + Sync {
    async fn ping(&self) -> Result<bool, DockerError>;
    async fn info(&self) -> Result<EngineInfo, DockerError>;

    async fn list_containers(&self, all: bool, filters: Option<&Value>) -> Result<Vec<ContainerSummary>, DockerError>;
    async fn create_container(&self, req: &ContainerCreate) -> Result<ContainerInfo, DockerError>;
    async fn start_container(&self, id: &str) -> Result<(), DockerError>;
    async fn stop_container(&self, id: &str, timeout_secs: u64) -> Result<(), DockerError>;
    async fn remove_container(&self, id: &str, force: bool) -> Result<(), DockerError>;
    async fn container_logs(&self, id: &str, tail: u64, since: Option<i64>) -> Result<String, DockerError>;

    async fn list_stacks(&self) -> Result<Vec<StackSummary>, DockerError>;
    async fn remove_stack(&self, project: &str) -> Result<(), DockerError>;

    async fn list_services(&self) -> Result<Vec<ServiceSummary>, DockerError>;
    async fn scale_service(&self, name: &str, replicas: u64) -> Result<ServiceSummary, DockerError>;
    async fn remove_service(&self, name: &str) -> Result<(), DockerError>;

    async fn list_networks(&self) -> Result<Vec<NetworkSummary>, DockerError>;
    async fn create_network(&self, req: &NetworkCreate) -> Result<NetworkSummary, DockerError>;
    async fn remove_network(&self, id: &str) -> Result<(), DockerError>;

    async fn list_volumes(&self) -> Result<Vec<VolumeSummary>, DockerError>;
    async fn create_volume(&self, req: &VolumeCreate) -> Result<VolumeSummary, DockerError>;
    async fn remove_volume(&self, name: &str) -> Result<(), DockerError>;
}

// ============================================================================
// TRANSPORT
// ============================================================================

#[derive(Debug, Clone)]
enum Transport {
    Unix(PathBuf),
    Http { client: reqwest::Client, base: String },
}

struct RawResponse {
    status: u16,
    body: Bytes,
}

#[derive(Debug)]
pub struct DockerClient {
    transport: Transport,
    swarm: OnceCell<bool>,
}

impl DockerClient {
    pub fn from_settings(settings: &Settings) -> Result<Self, DockerError> {
        let host = settings.docker_host.trim();
        let transport = if let Some(path) = host.strip_prefix("unix://") {
            log::info!("Docker client using unix socket {}", path);
            Transport::Unix(PathBuf::from(path))
        } else {
            let base = http_base(host, settings.docker_tls_verify)?;
            let client = http_client(settings)?;
            log::info!("Docker client using {}", base);
            Transport::Http { client, base }
        };
        Ok(Self {
            transport,
            swarm: OnceCell::new(),
        })
    }

    pub fn unix(path: impl Into<PathBuf>) -> Self {
        Self {
            transport: Transport::Unix(path.into()),
            swarm: OnceCell::new(),
        }
    }

    async fn send(&self, method: Method, path: &str, body: Option<&Value>) -> Result<RawResponse, DockerError> {
        let payload = match body {
            Some(v) => Bytes::from(serde_json::to_vec(v).map_err(|e| DockerError::Decode(e.to_string()))?),
            None => Bytes::new(),
        };
        log::debug!("docker {} {}", method, path);
        match &self.transport {
            Transport::Unix(socket) => send_unix(socket, method, path, payload, body.is_some()).await,
            Transport::Http { client, base } => {
                let mut req = client.request(method, format!("{base}{path}"));
                if body.is_some() {
                    req = req.header(reqwest::header::CONTENT_TYPE, "application/json").body(payload);
                }
                let resp = req.send().await.map_err(|e| DockerError::Transport(e.to_string()))?;
                let status = resp.status().as_u16();
                let body = resp.bytes().await.map_err(|e| DockerError::Transport(e.to_string()))?;
                Ok(RawResponse { status, body })
            }
        }
    }

    /// Non-2xx statuses become typed errors. 304 (already started/stopped) is success.
    async fn call(&self, method: Method, path: &str, body: Option<&Value>, what: &str) -> Result<Bytes, DockerError> {
        let resp = self.send(method, path, body).await?;
        match resp.status {
            200..=299 | 304 => Ok(resp.body),
            404 => Err(DockerError::NotFound(what.to_string())),
            409 => Err(DockerError::Conflict(engine_message(&resp.body))),
            status => Err(DockerError::Api {
                status,
                message: engine_message(&resp.body),
            }),
        }
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str, what: &str) -> Result<T, DockerError> {
        let body = self.call(Method::GET, path, None, what).await?;
        decode(&body)
    }

    async fn post_json<T: DeserializeOwned>(&self, path: &str, body: &Value, what: &str) -> Result<T, DockerError> {
        let body = self.call(Method::POST, path, Some(body), what).await?;
        decode(&body)
    }

    async fn is_swarm(&self) -> Result<bool, DockerError> {
        self.swarm
            .get_or_try_init(|| async { Ok(self.info().await?.swarm_active()) })
            .await
            .copied()
    }

    async fn raw_containers(&self, all: bool, filters: Option<&Value>) -> Result<Vec<RawContainer>, DockerError> {
        let mut path = format!("/containers/json?all={all}");
        if let Some(f) = filters {
            path.push_str("&filters=");
            path.push_str(&urlencoding::encode(&f.to_string()));
        }
        self.get_json(&path, "containers").await
    }

    async fn raw_services(&self, label: Option<&str>) -> Result<Vec<RawService>, DockerError> {
        let path = match label {
            Some(l) => format!(
                "/services?filters={}",
                urlencoding::encode(&json!({ "label": [l] }).to_string())
            ),
            None => "/services".to_string(),
        };
        self.get_json(&path, "services").await
    }

    async fn raw_service(&self, name: &str) -> Result<RawService, DockerError> {
        self.get_json(&format!("/services/{}", seg(name)), &format!("Service {name}"))
            .await
    }
}

#[async_trait]
impl DockerApi for DockerClient {
    async fn ping(&self) -> Result<bool, DockerError> {
        let resp = self.send(Method::GET, "/_ping", None).await?;
        Ok(resp.status == 200)
    }

    async fn info(&self) -> Result<EngineInfo, DockerError> {
        self.get_json("/info", "engine info").await
    }

    async fn list_containers(&self, all: bool, filters: Option<&Value>) -> Result<Vec<ContainerSummary>, DockerError> {
        Ok(self
            .raw_containers(all, filters)
            .await?
            .into_iter()
            .map(container_summary)
            .collect())
    }

    async fn create_container(&self, req: &ContainerCreate) -> Result<ContainerInfo, DockerError> {
        let mut path = "/containers/create".to_string();
        if let Some(name) = &req.name {
            path.push_str("?name=");
            path.push_str(&urlencoding::encode(name));
        }
        let created: RawCreated = self
            .post_json(&path, &container_create_body(req), &format!("Image {}", req.image))
            .await?;
        let inspect: Value = self
            .get_json(&format!("/containers/{}/json", seg(&created.id)), "container")
            .await?;
        Ok(container_info(&inspect))
    }

    async fn start_container(&self, id: &str) -> Result<(), DockerError> {
        let what = format!("Container {id}");
        self.call(Method::POST, &format!("/containers/{}/start", seg(id)), None, &what)
            .await
            .map(drop)
    }

    async fn stop_container(&self, id: &str, timeout_secs: u64) -> Result<(), DockerError> {
        let what = format!("Container {id}");
        let path = format!("/containers/{}/stop?t={timeout_secs}", seg(id));
        self.call(Method::POST, &path, None, &what).await.map(drop)
    }

    async fn remove_container(&self, id: &str, force: bool) -> Result<(), DockerError> {
        let what = format!("Container {id}");
        let path = format!("/containers/{}?force={force}", seg(id));
        self.call(Method::DELETE, &path, None, &what).await.map(drop)
    }

    async fn container_logs(&self, id: &str, tail: u64, since: Option<i64>) -> Result<String, DockerError> {
        let mut path = format!("/containers/{}/logs?stdout=true&stderr=true&tail={tail}", seg(id));
        if let Some(since) = since {
            path.push_str(&format!("&since={since}"));
        }
        let body = self.call(Method::GET, &path, None, &format!("Container {id}")).await?;
        Ok(demux_log_stream(&body))
    }

    async fn list_stacks(&self) -> Result<Vec<StackSummary>, DockerError> {
        if self.is_swarm().await? {
            let services = self.raw_services(None).await?;
            Ok(group_stacks(services.iter().filter_map(|s| {
                let stack = s.spec.pointer("/Labels")?.get(STACK_NAMESPACE_LABEL)?.as_str()?;
                Some((stack.to_string(), spec_name(&s.spec)))
            })))
        } else {
            let filters = json!({ "label": [COMPOSE_PROJECT_LABEL] });
            let containers = self.raw_containers(true, Some(&filters)).await?;
            Ok(group_stacks(containers.iter().filter_map(|c| {
                let project = c.labels.as_ref()?.get(COMPOSE_PROJECT_LABEL)?;
                Some((project.clone(), container_name(&c.names)))
            })))
        }
    }

    async fn remove_stack(&self, project: &str) -> Result<(), DockerError> {
        let what = format!("Stack {project}");
        if self.is_swarm().await? {
            let label = format!("{STACK_NAMESPACE_LABEL}={project}");
            let services = self.raw_services(Some(&label)).await?;
            if services.is_empty() {
                return Err(DockerError::NotFound(what));
            }
            for service in services {
                self.call(Method::DELETE, &format!("/services/{}", seg(&service.id)), None, &what)
                    .await?;
                log::info!("Removed service {} of stack {}", spec_name(&service.spec), project);
            }
        } else {
            let filters = json!({ "label": [format!("{COMPOSE_PROJECT_LABEL}={project}")] });
            let containers = self.raw_containers(true, Some(&filters)).await?;
            if containers.is_empty() {
                return Err(DockerError::NotFound(what));
            }
            for container in containers {
                let path = format!("/containers/{}?force=true", seg(&container.id));
                self.call(Method::DELETE, &path, None, &what).await?;
                log::info!("Removed container {} of project {}", container_name(&container.names), project);
            }
        }
        Ok(())
    }

    async fn list_services(&self) -> Result<Vec<ServiceSummary>, DockerError> {
        Ok(self.raw_services(None).await?.iter().map(service_summary).collect())
    }

    async fn scale_service(&self, name: &str, replicas: u64) -> Result<ServiceSummary, DockerError> {
        let current = self.raw_service(name).await?;
        let spec = scaled_spec(&current.spec, replicas)?;
        let path = format!("/services/{}/update?version={}", seg(&current.id), current.version.index);
        self.call(Method::POST, &path, Some(&spec), &format!("Service {name}"))
            .await?;
        let updated = self.raw_service(&current.id).await?;
        Ok(service_summary(&updated))
    }

    async fn remove_service(&self, name: &str) -> Result<(), DockerError> {
        let what = format!("Service {name}");
        self.call(Method::DELETE, &format!("/services/{}", seg(name)), None, &what)
            .await
            .map(drop)
    }

    async fn list_networks(&self) -> Result<Vec<NetworkSummary>, DockerError> {
        let raw: Vec<RawNetwork> = self.get_json("/networks", "networks").await?;
        Ok(raw.into_iter().map(network_summary).collect())
    }

    async fn create_network(&self, req: &NetworkCreate) -> Result<NetworkSummary, DockerError> {
        let mut body = json!({
            "Name": req.name,
            "Driver": req.driver.as_deref().unwrap_or("bridge"),
            "CheckDuplicate": true,
        });
        if let Some(ipam) = &req.ipam {
            body["IPAM"] = ipam.clone();
        }
        if let Some(options) = &req.options {
            body["Options"] = json!(options);
        }
        let created: RawCreated = self.post_json("/networks/create", &body, "network driver").await?;
        let raw: RawNetwork = self
            .get_json(&format!("/networks/{}", seg(&created.id)), &format!("Network {}", req.name))
            .await?;
        Ok(network_summary(raw))
    }

    async fn remove_network(&self, id: &str) -> Result<(), DockerError> {
        let what = format!("Network {id}");
        self.call(Method::DELETE, &format!("/networks/{}", seg(id)), None, &what)
            .await
            .map(drop)
    }

    async fn list_volumes(&self) -> Result<Vec<VolumeSummary>, DockerError> {
        let raw: RawVolumeList = self.get_json("/volumes", "volumes").await?;
        Ok(raw.volumes.unwrap_or_default().into_iter().map(volume_summary).collect())
    }

    async fn create_volume(&self, req: &VolumeCreate) -> Result<VolumeSummary, DockerError> {
        let body = json!({
            "Name": req.name,
            "Driver": req.driver.as_deref().unwrap_or("local"),
            "DriverOpts": req.options.clone().unwrap_or_default(),
            "Labels": req.labels.clone().unwrap_or_default(),
        });
        let raw: RawVolume = self.post_json("/volumes/create", &body, "volume driver").await?;
        Ok(volume_summary(raw))
    }

    async fn remove_volume(&self, name: &str) -> Result<(), DockerError> {
        let what = format!("Volume {name}");
        self.call(Method::DELETE, &format!("/volumes/{}", seg(name)), None, &what)
            .await
            .map(drop)
    }
}

async fn send_unix(
    socket: &std::path::Path,
    method: Method,
    path: &str,
    payload: Bytes,
    json_body: bool,
) -> Result<RawResponse, DockerError> {
    let transport = |e: &dyn std::fmt::Display| DockerError::Transport(format!("{}: {e}", socket.display()));
    let stream = tokio::net::UnixStream::connect(socket)
        .await
        .map_err(|e| transport(&e))?;
    let io = hyper_util::rt::TokioIo::new(stream);
    let (mut sender, conn) = hyper::client::conn::http1::handshake(io)
        .await
        .map_err(|e| transport(&e))?;
    tokio::spawn(async move {
        if let Err(e) = conn.await {
            log::debug!("docker socket connection closed: {e}");
        }
    });

    let mut builder = hyper::Request::builder()
        .method(method)
        .uri(path)
        .header(hyper::header::HOST, "docker");
    if json_body {
        builder = builder.header(hyper::header::CONTENT_TYPE, "application/json");
    }
    let req = builder
        .body(Full::new(payload))
        .map_err(|e| DockerError::Transport(e.to_string()))?;
    let resp = sender.send_request(req).await.map_err(|e| transport(&e))?;
    let status = resp.status().as_u16();
    let body = resp
        .into_body()
        .collect()
        .await
        .map_err(|e| transport(&e))?
        .to_bytes();
    Ok(RawResponse { status, body })
}

fn http_base(host: &str, tls: bool) -> Result<String, DockerError> {
    let base = if let Some(rest) = host.strip_prefix("tcp://") {
        let scheme = if tls { "https" } else { "http" };
        format!("{scheme}://{rest}")
    } else if host.starts_with("http://") || host.starts_with("https://") {
        host.to_string()
    } else {
        return Err(DockerError::Config(format!(
            "unsupported DOCKER_HOST '{host}' (expected unix://, tcp://, http:// or https://)"
        )));
    };
    Ok(base.trim_end_matches('/').to_string())
}

fn http_client(settings: &Settings) -> Result<reqwest::Client, DockerError> {
    let mut builder = reqwest::Client::builder();
    match (&settings.docker_cert_path, settings.docker_tls_verify) {
        (Some(dir), true) => {
            let read = |file: &str| {
                std::fs::read(dir.join(file))
                    .map_err(|e| DockerError::Config(format!("{}: {e}", dir.join(file).display())))
            };
            let ca = reqwest::Certificate::from_pem(&read("ca.pem")?)
                .map_err(|e| DockerError::Config(format!("ca.pem: {e}")))?;
            let mut identity_pem = read("cert.pem")?;
            identity_pem.extend(read("key.pem")?);
            let identity = reqwest::Identity::from_pem(&identity_pem)
                .map_err(|e| DockerError::Config(format!("client identity: {e}")))?;
            builder = builder.add_root_certificate(ca).identity(identity);
            log::info!("Docker TLS enabled with certificates from {}", dir.display());
        }
        (None, true) => {
            log::warn!("DOCKER_TLS_VERIFY=1 but DOCKER_CERT_PATH not set, using system roots without a client identity");
        }
        _ => {}
    }
    builder
        .build()
        .map_err(|e| DockerError::Config(format!("http client: {e}")))
}

// ============================================================================
// CONVERSIONS
// ============================================================================

fn decode<T: DeserializeOwned>(body: &[u8]) -> Result<T, DockerError> {
    serde_json::from_slice(body).map_err(|e| DockerError::Decode(e.to_string()))
}

fn engine_message(body: &[u8]) -> String {
    serde_json::from_slice::<Value>(body)
        .ok()
        .and_then(|v| v.get("message").and_then(Value::as_str).map(str::to_string))
        .unwrap_or_else(|| String::from_utf8_lossy(body).trim().to_string())
}

/// Percent-encoded path segment.
fn seg(s: &str) -> String {
    urlencoding::encode(s).into_owned()
}

pub fn short_id(id: &str) -> String {
    let id = id.strip_prefix("sha256:").unwrap_or(id);
    id.chars().take(SHORT_ID_LEN).collect()
}

fn container_name(names: &[String]) -> String {
    names
        .first()
        .map(|n| n.trim_start_matches('/').to_string())
        .unwrap_or_default()
}

fn unix_to_rfc3339(secs: i64) -> String {
    DateTime::from_timestamp(secs, 0)
        .map(|d| d.to_rfc3339())
        .unwrap_or_default()
}

fn container_summary(raw: RawContainer) -> ContainerSummary {
    ContainerSummary {
        id: short_id(&raw.id),
        name: container_name(&raw.names),
        status: raw.state,
        image: raw.image,
        created: unix_to_rfc3339(raw.created),
        ports: raw
            .ports
            .into_iter()
            .map(|p| PortMapping {
                private_port: p.private_port,
                public_port: p.public_port,
                kind: p.kind.unwrap_or_else(|| "tcp".into()),
            })
            .collect(),
    }
}

fn container_info(inspect: &Value) -> ContainerInfo {
    let text = |ptr: &str| inspect.pointer(ptr).and_then(Value::as_str).unwrap_or_default().to_string();
    ContainerInfo {
        id: short_id(&text("/Id")),
        name: text("/Name").trim_start_matches('/').to_string(),
        status: text("/State/Status"),
        image: text("/Config/Image"),
        created: text("/Created"),
    }
}

fn container_create_body(req: &ContainerCreate) -> Value {
    let mut body = Map::new();
    body.insert("Image".into(), json!(req.image));
    if let Some(env) = &req.environment {
        let vars: Vec<String> = env.iter().map(|(k, v)| format!("{k}={v}")).collect();
        body.insert("Env".into(), json!(vars));
    }

    let mut host = Map::new();
    if let Some(ports) = &req.ports {
        let mut exposed = Map::new();
        let mut bindings = Map::new();
        for (container_port, host_port) in ports {
            let key = if container_port.contains('/') {
                container_port.clone()
            } else {
                format!("{container_port}/tcp")
            };
            exposed.insert(key.clone(), json!({}));
            bindings.insert(key, json!([{ "HostPort": host_port.to_string() }]));
        }
        body.insert("ExposedPorts".into(), Value::Object(exposed));
        host.insert("PortBindings".into(), Value::Object(bindings));
    }
    if let Some(volumes) = &req.volumes {
        let binds: Vec<String> = volumes
            .iter()
            .filter_map(|(source, spec)| {
                let target = spec.get("bind")?;
                let mode = spec.get("mode").map(String::as_str).unwrap_or("rw");
                Some(format!("{source}:{target}:{mode}"))
            })
            .collect();
        host.insert("Binds".into(), json!(binds));
    }
    let policy = req.restart_policy.as_deref().unwrap_or("no");
    host.insert("RestartPolicy".into(), json!({ "Name": policy }));
    body.insert("HostConfig".into(), Value::Object(host));
    Value::Object(body)
}

fn spec_name(spec: &Value) -> String {
    spec.get("Name").and_then(Value::as_str).unwrap_or_default().to_string()
}

fn service_summary(raw: &RawService) -> ServiceSummary {
    let mode = raw.spec.get("Mode");
    let global = mode.and_then(|m| m.get("Global")).is_some();
    ServiceSummary {
        id: short_id(&raw.id),
        name: spec_name(&raw.spec),
        replicas: mode
            .and_then(|m| m.pointer("/Replicated/Replicas"))
            .and_then(Value::as_u64)
            .unwrap_or(0),
        image: raw
            .spec
            .pointer("/TaskTemplate/ContainerSpec/Image")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        created: raw.created_at.clone(),
        mode: if global { "global" } else { "replicated" }.to_string(),
    }
}

/// Copy of `spec` with the replica count replaced. Global services refuse.
fn scaled_spec(spec: &Value, replicas: u64) -> Result<Value, DockerError> {
    if spec.pointer("/Mode/Global").is_some() {
        return Err(DockerError::Unsupported("Cannot scale global services".into()));
    }
    let mut spec = spec.clone();
    let obj = spec
        .as_object_mut()
        .ok_or_else(|| DockerError::Decode("service spec is not an object".into()))?;
    obj.insert("Mode".into(), json!({ "Replicated": { "Replicas": replicas } }));
    Ok(spec)
}

fn network_summary(raw: RawNetwork) -> NetworkSummary {
    NetworkSummary {
        id: short_id(&raw.id),
        name: raw.name,
        driver: raw.driver,
        scope: raw.scope,
        created: raw.created,
    }
}

fn volume_summary(raw: RawVolume) -> VolumeSummary {
    VolumeSummary {
        name: raw.name,
        driver: raw.driver,
        mountpoint: raw.mountpoint,
        created: raw.created_at.unwrap_or_default(),
    }
}

/// Group (stack, member) pairs, first-seen order.
fn group_stacks(members: impl Iterator<Item = (String, String)>) -> Vec<StackSummary> {
    let mut stacks: IndexMap<String, Vec<String>> = IndexMap::new();
    for (stack, member) in members {
        stacks.entry(stack).or_default().push(member);
    }
    stacks
        .into_iter()
        .map(|(project_name, services)| StackSummary {
            service_count: services.len(),
            project_name,
            services,
        })
        .collect()
}

/// Strip the 8-byte multiplexing headers from a non-TTY log stream.
/// TTY streams carry no headers and pass through unchanged.
pub fn demux_log_stream(raw: &[u8]) -> String {
    let mut out = Vec::with_capacity(raw.len());
    let mut rest = raw;
    while rest.len() >= 8 && rest[0] <= 2 && rest[1..4] == [0, 0, 0] {
        let len = u32::from_be_bytes([rest[4], rest[5], rest[6], rest[7]]) as usize;
        let end = (8 + len).min(rest.len());
        out.extend_from_slice(&rest[8..end]);
        rest = &rest[end..];
    }
    out.extend_from_slice(rest);
    String::from_utf8_lossy(&out).into_owned()
}

// ============================================================================
// TEST DOUBLE
// ============================================================================


// ============================================================================
// TESTS
// ============================================================================
