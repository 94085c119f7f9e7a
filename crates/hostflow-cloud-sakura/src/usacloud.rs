//! usacloud CLI wrapper
//!
//! Wraps the usacloud CLI commands needed to drive server power state.

use crate::error::{Result, SakuraError};
use hostflow_cloud::InstanceStatus;
use serde::{Deserialize, Serialize};
use std::process::Stdio;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

/// Tag prefix used to find the server that belongs to a host
pub const HOST_TAG_PREFIX: &str = "hostflow.host=";

/// usacloud CLI wrapper
pub struct Usacloud {
    zone: String,
}

impl Usacloud {
    pub fn new(zone: impl Into<String>) -> Self {
        Self { zone: zone.into() }
    }

    pub fn zone(&self) -> &str {
        &self.zone
    }

    /// Run a usacloud command and return stdout.
    ///
    /// The child process is killed if `cancel` fires first.
    async fn run_command(&self, cancel: &CancellationToken, args: &[&str]) -> Result<String> {
        let mut cmd = Command::new("usacloud");
        cmd.arg("--zone").arg(&self.zone);
        cmd.args(args);
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd.kill_on_drop(true);

        tracing::debug!("Running: usacloud --zone {} {}", self.zone, args.join(" "));

        let output = tokio::select! {
            _ = cancel.cancelled() => {
                return Err(SakuraError::Cancelled(args.join(" ")));
            }
            output = cmd.output() => output,
        };

        let output = match output {
            Ok(output) => output,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(SakuraError::UsacloudNotFound);
            }
            Err(e) => return Err(e.into()),
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).to_string();
            return Err(classify_failure(&stderr));
        }

        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    /// List all servers in the zone
    pub async fn list_servers(&self, cancel: &CancellationToken) -> Result<Vec<ServerInfo>> {
        let output = self
            .run_command(cancel, &["server", "list", "--output-type", "json"])
            .await?;

        if output.trim().is_empty() || output.trim() == "[]" {
            return Ok(Vec::new());
        }

        let servers: Vec<ServerInfo> = serde_json::from_str(&output)?;
        Ok(servers)
    }

    /// Get server by ID; `None` if the server does not exist
    pub async fn get_server_by_id(
        &self,
        cancel: &CancellationToken,
        id: &str,
    ) -> Result<Option<ServerInfo>> {
        match self
            .run_command(cancel, &["server", "read", id, "--output-type", "json"])
            .await
        {
            Ok(output) => Ok(Some(parse_server(&output)?)),
            Err(SakuraError::ServerNotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Find the server carrying the host tag (for idempotent creation)
    pub async fn find_server_by_host_tag(
        &self,
        cancel: &CancellationToken,
        host_id: &str,
    ) -> Result<Option<ServerInfo>> {
        let tag = format!("{}{}", HOST_TAG_PREFIX, host_id);
        let servers = self.list_servers(cancel).await?;
        Ok(servers.into_iter().find(|s| s.has_tag(&tag)))
    }

    /// Create a server
    pub async fn create_server(
        &self,
        cancel: &CancellationToken,
        config: &CreateServerConfig,
    ) -> Result<ServerInfo> {
        // Store string conversions to extend their lifetime
        let core_str = config.core.to_string();
        let memory_str = config.memory.to_string();

        let mut args = vec![
            "server",
            "create",
            "--name",
            config.name.as_str(),
            "--core",
            core_str.as_str(),
            "--memory",
            memory_str.as_str(),
            "--output-type",
            "json",
            "--yes",
        ];

        if let Some(ref os) = config.os_type {
            args.push("--os-type");
            args.push(os.as_str());
        }

        for tag in &config.tags {
            args.push("--tags");
            args.push(tag.as_str());
        }

        let output = self.run_command(cancel, &args).await?;
        parse_server(&output).map_err(|e| SakuraError::CreationFailed(e.to_string()))
    }

    /// Delete a server together with its disks
    pub async fn delete_server(&self, cancel: &CancellationToken, id: &str) -> Result<()> {
        self.run_command(cancel, &["server", "delete", id, "--with-disks", "--yes"])
            .await?;
        Ok(())
    }

    /// Power on a server
    pub async fn power_on(&self, cancel: &CancellationToken, id: &str) -> Result<()> {
        self.run_command(cancel, &["server", "boot", id, "--yes"])
            .await?;
        Ok(())
    }

    /// Power off a server (graceful shutdown)
    pub async fn power_off(&self, cancel: &CancellationToken, id: &str) -> Result<()> {
        self.run_command(cancel, &["server", "shutdown", id, "--yes"])
            .await?;
        Ok(())
    }
}

/// Map usacloud's stderr to an error variant
fn classify_failure(stderr: &str) -> SakuraError {
    let lower = stderr.to_lowercase();
    if lower.contains("not found") || lower.contains("404") {
        SakuraError::ServerNotFound(stderr.trim().to_string())
    } else if lower.contains("unauthorized") || lower.contains("401") {
        SakuraError::AuthenticationFailed(stderr.trim().to_string())
    } else {
        SakuraError::CommandFailed(stderr.trim().to_string())
    }
}

/// `server read` prints a single object, `server create` a one-element list
fn parse_server(output: &str) -> Result<ServerInfo> {
    let value: serde_json::Value = serde_json::from_str(output)?;
    let value = match value {
        serde_json::Value::Array(mut items) if !items.is_empty() => items.swap_remove(0),
        other => other,
    };
    Ok(serde_json::from_value(value)?)
}

/// Server information from usacloud
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerInfo {
    #[serde(rename = "ID")]
    pub id: serde_json::Value,

    #[serde(rename = "Name")]
    pub name: String,

    #[serde(rename = "InstanceStatus")]
    pub instance_status: Option<String>,

    #[serde(rename = "Tags", default)]
    pub tags: Vec<String>,
}

impl ServerInfo {
    /// usacloud prints IDs as numbers or strings depending on the command
    pub fn id_str(&self) -> String {
        match &self.id {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t == tag)
    }

    /// Translate Sakura's instance status into the provider-neutral one
    pub fn status(&self) -> InstanceStatus {
        match self.instance_status.as_deref() {
            Some("up") => InstanceStatus::Running,
            Some("down") => InstanceStatus::Stopped,
            Some("cleaning") | Some("migrating") | Some("") => InstanceStatus::Pending,
            _ => InstanceStatus::Unknown,
        }
    }
}

/// Configuration for creating a server
#[derive(Debug, Clone)]
pub struct CreateServerConfig {
    pub name: String,
    pub core: i32,
    pub memory: i32,
    pub os_type: Option<String>,
    pub tags: Vec<String>,
}
