//! usacloud CLI wrapper
//!
//! Wraps the usacloud CLI commands for Sakura Cloud operations.

use crate::error::{Result, SakuraError};
use serde::de::{self, DeserializeOwned, Deserializer};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::process::Stdio;
use tokio::process::Command;

/// usacloud CLI wrapper
#[derive(Debug, Clone)]
pub struct Usacloud {
    program: String,
    zone: String,
}

impl Usacloud {
    pub fn new(zone: impl Into<String>) -> Self {
        Self {
            program: "usacloud".to_string(),
            zone: zone.into(),
        }
    }

    /// Use a usacloud binary other than the one on `PATH`
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    pub fn zone(&self) -> &str {
        &self.zone
    }

    /// Check if usacloud is installed and authenticated
    pub async fn check_auth(&self) -> Result<UsacloudAuth> {
        let output = self
            .run_command(&["auth-status", "--output-type", "json"])
            .await?;
        let auth: UsacloudAuth = serde_json::from_str(&output)?;
        Ok(auth)
    }

    /// Run a usacloud command and return stdout
    async fn run_command(&self, args: &[&str]) -> Result<String> {
        let mut cmd = Command::new(&self.program);
        cmd.arg("--zone").arg(&self.zone);
        cmd.args(args);
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());

        tracing::debug!("Running: usacloud --zone {} {}", self.zone, args.join(" "));

        let output = cmd.output().await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                SakuraError::UsacloudNotFound
            } else {
                SakuraError::IoError(e)
            }
        })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            if stderr.contains("access token") || stderr.contains("401") {
                return Err(SakuraError::AuthenticationFailed(stderr.trim().to_string()));
            }
            return Err(SakuraError::CommandFailed(stderr.to_string()));
        }

        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    async fn run_owned(&self, args: &[String]) -> Result<String> {
        let args: Vec<&str> = args.iter().map(String::as_str).collect();
        self.run_command(&args).await
    }

    async fn list<T: DeserializeOwned>(&self, resource: &str) -> Result<Vec<T>> {
        let output = self
            .run_command(&[resource, "list", "--output-type", "json"])
            .await?;
        parse_list(&output)
    }

    /// List all servers
    pub async fn list_servers(&self) -> Result<Vec<ServerInfo>> {
        self.list("server").await
    }

    /// Create a server
    pub async fn create_server(&self, config: &CreateServerConfig) -> Result<ServerInfo> {
        let output = self.run_owned(&create_server_args(config)).await?;
        parse_one(&output)
    }

    /// Delete a server together with its disks
    pub async fn delete_server(&self, id: &str) -> Result<()> {
        self.run_command(&["server", "delete", id, "--with-disks", "--force", "--yes"])
            .await?;
        Ok(())
    }

    /// List SSH keys
    pub async fn list_ssh_keys(&self) -> Result<Vec<SshKeyInfo>> {
        self.list("ssh-key").await
    }

    /// Create SSH key
    pub async fn create_ssh_key(
        &self,
        name: &str,
        public_key: &str,
        description: &str,
    ) -> Result<SshKeyInfo> {
        let output = self
            .run_command(&[
                "ssh-key",
                "create",
                "--name",
                name,
                "--public-key",
                public_key,
                "--description",
                description,
                "--output-type",
                "json",
            ])
            .await?;
        parse_one(&output)
    }

    pub async fn delete_ssh_key(&self, id: &str) -> Result<()> {
        self.run_command(&["ssh-key", "delete", id, "--yes"]).await?;
        Ok(())
    }

    /// List switches
    pub async fn list_switches(&self) -> Result<Vec<SwitchInfo>> {
        self.list("switch").await
    }

    /// Create a switch
    pub async fn create_switch(
        &self,
        name: &str,
        description: &str,
        tags: &[String],
    ) -> Result<SwitchInfo> {
        let mut args = vec![
            "switch".to_string(),
            "create".to_string(),
            "--name".to_string(),
            name.to_string(),
            "--description".to_string(),
            description.to_string(),
        ];
        push_tags(&mut args, tags);
        args.extend(["--output-type", "json", "--yes"].map(String::from));
        let output = self.run_owned(&args).await?;
        parse_one(&output)
    }

    pub async fn delete_switch(&self, id: &str) -> Result<()> {
        self.run_command(&["switch", "delete", id, "--yes"]).await?;
        Ok(())
    }

    /// List packet filters
    pub async fn list_packet_filters(&self) -> Result<Vec<PacketFilterInfo>> {
        self.list("packet-filter").await
    }

    /// Create a packet filter
    pub async fn create_packet_filter(
        &self,
        name: &str,
        description: &str,
        expressions: &[PacketFilterExpression],
    ) -> Result<PacketFilterInfo> {
        let expressions = serde_json::to_string(expressions)?;
        let output = self
            .run_command(&[
                "packet-filter",
                "create",
                "--name",
                name,
                "--description",
                description,
                "--expressions",
                &expressions,
                "--output-type",
                "json",
                "--yes",
            ])
            .await?;
        parse_one(&output)
    }

    /// Replace the rules of a packet filter
    pub async fn update_packet_filter(
        &self,
        id: &str,
        expressions: &[PacketFilterExpression],
    ) -> Result<PacketFilterInfo> {
        let expressions = serde_json::to_string(expressions)?;
        let output = self
            .run_command(&[
                "packet-filter",
                "update",
                id,
                "--expressions",
                &expressions,
                "--output-type",
                "json",
                "--yes",
            ])
            .await?;
        parse_one(&output)
    }

    pub async fn delete_packet_filter(&self, id: &str) -> Result<()> {
        self.run_command(&["packet-filter", "delete", id, "--yes"])
            .await?;
        Ok(())
    }

    /// List startup scripts (notes)
    pub async fn list_notes(&self) -> Result<Vec<NoteInfo>> {
        self.list("note").await
    }

    /// Create a shell startup script
    pub async fn create_note(&self, name: &str, content: &str, tags: &[String]) -> Result<NoteInfo> {
        let mut args = vec![
            "note".to_string(),
            "create".to_string(),
            "--name".to_string(),
            name.to_string(),
            "--class".to_string(),
            "shell".to_string(),
            "--content".to_string(),
            content.to_string(),
        ];
        push_tags(&mut args, tags);
        args.extend(["--output-type", "json", "--yes"].map(String::from));
        let output = self.run_owned(&args).await?;
        parse_one(&output)
    }

    pub async fn delete_note(&self, id: &str) -> Result<()> {
        self.run_command(&["note", "delete", id, "--yes"]).await?;
        Ok(())
    }
}

fn push_tags(args: &mut Vec<String>, tags: &[String]) {
    for tag in tags {
        args.push("--tags".to_string());
        args.push(tag.clone());
    }
}

/// Arguments for `usacloud server create`
pub fn create_server_args(config: &CreateServerConfig) -> Vec<String> {
    let mut args: Vec<String> = vec![
        "server".into(),
        "create".into(),
        "--name".into(),
        config.name.clone(),
        "--core".into(),
        config.core.to_string(),
        "--memory".into(),
        config.memory.to_string(),
        "--os-type".into(),
        config.os_type.clone(),
        "--network-interface-upstream".into(),
        "shared".into(),
    ];

    if let Some(disk_size) = config.disk_size {
        args.push("--disk-size".into());
        args.push(disk_size.to_string());
    }
    if let Some(switch_id) = &config.switch_id {
        args.push("--additional-network-interface-switch-id".into());
        args.push(switch_id.clone());
    }
    if let Some(packet_filter_id) = &config.packet_filter_id {
        args.push("--network-interface-packet-filter-id".into());
        args.push(packet_filter_id.clone());
    }
    for id in &config.ssh_key_ids {
        args.push("--disk-edit-ssh-key-id".into());
        args.push(id.clone());
    }
    for id in &config.note_ids {
        args.push("--disk-edit-note-id".into());
        args.push(id.clone());
    }
    push_tags(&mut args, &config.tags);
    args.extend(["--output-type", "json", "--yes"].map(String::from));
    args
}

/// Parse list output; usacloud prints nothing at all for an empty list
fn parse_list<T: DeserializeOwned>(output: &str) -> Result<Vec<T>> {
    let trimmed = output.trim();
    if trimmed.is_empty() || trimmed == "[]" {
        return Ok(Vec::new());
    }
    Ok(serde_json::from_str(trimmed)?)
}

/// Parse the output of a create/update, which is an object or a one-element
/// array depending on the usacloud version
fn parse_one<T: DeserializeOwned>(output: &str) -> Result<T> {
    let value: Value = serde_json::from_str(output.trim())?;
    let value = match value {
        Value::Array(mut items) if items.len() == 1 => items.remove(0),
        Value::Array(items) => {
            return Err(SakuraError::UnexpectedOutput(format!(
                "expected one object, got {}",
                items.len()
            )));
        }
        other => other,
    };
    Ok(serde_json::from_value(value)?)
}

/// Sakura Cloud IDs are numeric in some outputs and strings in others
fn id_string<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<String, D::Error> {
    match Value::deserialize(deserializer)? {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(de::Error::custom(format!("unexpected ID: {other}"))),
    }
}

/// Authentication status from usacloud
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsacloudAuth {
    #[serde(rename = "Account")]
    pub account: Option<AccountInfo>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountInfo {
    #[serde(rename = "ID", deserialize_with = "id_string")]
    pub id: String,
    #[serde(rename = "Name")]
    pub name: String,
}

/// Server information from usacloud
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerInfo {
    #[serde(rename = "ID", deserialize_with = "id_string")]
    pub id: String,

    #[serde(rename = "Name")]
    pub name: String,

    #[serde(rename = "CPU")]
    pub cpu: Option<u32>,

    #[serde(rename = "MemoryMB")]
    pub memory_mb: Option<u32>,

    #[serde(rename = "InstanceStatus")]
    pub instance_status: Option<String>,

    #[serde(rename = "Tags", default)]
    pub tags: Vec<String>,

    #[serde(rename = "Interfaces")]
    pub interfaces: Option<Vec<InterfaceInfo>>,
}

impl ServerInfo {
    /// Address on the shared (internet-facing) segment
    pub fn ip_address(&self) -> Option<String> {
        self.interfaces
            .as_ref()?
            .iter()
            .find_map(|i| i.ip_address.clone())
    }

    /// Address assigned on a switch
    pub fn private_ip_address(&self) -> Option<String> {
        self.interfaces
            .as_ref()?
            .iter()
            .find_map(|i| i.user_ip_address.clone())
    }

    /// Check if server is running
    pub fn is_running(&self) -> bool {
        self.instance_status.as_deref() == Some("up")
    }

    /// Plan in the `NcoreN-Mgb` notation used for pool sizes
    pub fn size(&self) -> Option<String> {
        Some(format!("{}core-{}gb", self.cpu?, self.memory_mb? / 1024))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InterfaceInfo {
    #[serde(rename = "IPAddress")]
    pub ip_address: Option<String>,

    #[serde(rename = "UserIPAddress")]
    pub user_ip_address: Option<String>,
}

/// Configuration for creating a server
#[derive(Debug, Clone, Default)]
pub struct CreateServerConfig {
    pub name: String,
    pub core: u32,
    pub memory: u32,
    pub os_type: String,
    pub disk_size: Option<u32>,
    pub switch_id: Option<String>,
    pub packet_filter_id: Option<String>,
    pub ssh_key_ids: Vec<String>,
    pub note_ids: Vec<String>,
    pub tags: Vec<String>,
}

/// SSH key information
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SshKeyInfo {
    #[serde(rename = "ID", deserialize_with = "id_string")]
    pub id: String,

    #[serde(rename = "Name")]
    pub name: String,

    #[serde(rename = "PublicKey")]
    pub public_key: Option<String>,
}

/// Switch (L2 segment) information
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwitchInfo {
    #[serde(rename = "ID", deserialize_with = "id_string")]
    pub id: String,

    #[serde(rename = "Name")]
    pub name: String,

    #[serde(rename = "Description", default)]
    pub description: String,

    #[serde(rename = "Tags", default)]
    pub tags: Vec<String>,
}

/// Packet filter information
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PacketFilterInfo {
    #[serde(rename = "ID", deserialize_with = "id_string")]
    pub id: String,

    #[serde(rename = "Name")]
    pub name: String,

    #[serde(rename = "Expression", default)]
    pub expression: Vec<PacketFilterExpression>,
}

/// One packet filter rule
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PacketFilterExpression {
    #[serde(rename = "Protocol")]
    pub protocol: String,

    #[serde(rename = "SourceNetwork", default, skip_serializing_if = "Option::is_none")]
    pub source_network: Option<String>,

    #[serde(rename = "DestinationPort", default, skip_serializing_if = "Option::is_none")]
    pub destination_port: Option<String>,

    #[serde(rename = "Action")]
    pub action: String,
}

/// Startup script information
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NoteInfo {
    #[serde(rename = "ID", deserialize_with = "id_string")]
    pub id: String,

    #[serde(rename = "Name")]
    pub name: String,

    #[serde(rename = "Class", default)]
    pub class: Option<String>,

    #[serde(rename = "Content", default)]
    pub content: Option<String>,

    #[serde(rename = "Tags", default)]
    pub tags: Vec<String>,
}
