//! Sakura Cloud provider implementation
//!
//! | resource      | Sakura Cloud object                  |
//! |---------------|--------------------------------------|
//! | key-pair      | ssh-key (matched by name)            |
//! | network       | switch (CIDR kept in description)    |
//! | firewall      | packet-filter (matched by name)      |
//! | server-pool   | one server per instance, tagged      |
//!
//! Subnets and load balancers have no counterpart and are rejected before a
//! run starts. A server interface carries at most one packet filter, so a
//! pool naming several firewalls is refused the same way.
//!
//! Bootstrap payloads travel as startup-script notes named
//! `{server}-bootstrap`. A note left behind by an earlier attempt is reused
//! when its content matches and replaced when it does not.

use crate::error::{Result, SakuraError};
use crate::usacloud::{
    CreateServerConfig, PacketFilterExpression, PacketFilterInfo, ServerInfo, SshKeyInfo,
    SwitchInfo, Usacloud,
};
use async_trait::async_trait;
use clusterflow_cloud::{
    AuthStatus, CloudError, CloudProvider, CreateRequest, FieldSet, Filter, ResourceState,
};
use clusterflow_core::{Cluster, FirewallRule, ResourceKind, firewall_rules_value, naming};
use tracing::{debug, info};

/// Kinds Sakura Cloud can back
pub const SUPPORTED_KINDS: [ResourceKind; 4] = [
    ResourceKind::KeyPair,
    ResourceKind::Network,
    ResourceKind::Firewall,
    ResourceKind::ServerPool,
];

const DESCRIPTION: &str = "managed by clusterflow";
const CIDR_PREFIX: &str = "cidr=";
const BOOTSTRAP_SUFFIX: &str = "-bootstrap";

/// Parse a size like "2core-4gb" to (core, memory_gb)
pub fn parse_size(size: &str) -> Result<(u32, u32)> {
    let invalid = || SakuraError::InvalidSize(size.to_string());
    let (core, memory) = size.split_once('-').ok_or_else(invalid)?;
    let core = core
        .trim_end_matches("core")
        .parse::<u32>()
        .map_err(|_| invalid())?;
    let memory = memory
        .trim_end_matches("gb")
        .parse::<u32>()
        .map_err(|_| invalid())?;
    Ok((core, memory))
}

/// Refuse definitions Sakura Cloud cannot express even with every kind
/// supported
pub fn check_definition(cluster: &Cluster) -> clusterflow_cloud::Result<()> {
    for (name, pool) in cluster.server_pools() {
        if pool.firewalls.len() > 1 {
            return Err(CloudError::Unsupported(format!(
                "server pool '{name}' lists {} firewalls, Sakura Cloud binds one packet filter per server",
                pool.firewalls.len()
            )));
        }
    }
    Ok(())
}

/// Sakura Cloud provider
pub struct SakuraCloudProvider {
    usacloud: Usacloud,
}

impl SakuraCloudProvider {
    pub fn new(zone: impl Into<String>) -> Self {
        Self::with_usacloud(Usacloud::new(zone))
    }

    pub fn with_usacloud(usacloud: Usacloud) -> Self {
        Self { usacloud }
    }

    pub fn zone(&self) -> &str {
        self.usacloud.zone()
    }

    async fn create_server(&self, request: &CreateRequest) -> Result<ServerInfo> {
        let size = request.property_str("size").unwrap_or_default();
        let (core, memory) = parse_size(size)?;

        let firewall_ids = request.reference_list("firewall_ids");
        if firewall_ids.len() > 1 {
            return Err(SakuraError::TooManyPacketFilters {
                server: request.provider_name.clone(),
                count: firewall_ids.len(),
            });
        }

        let mut note_ids = Vec::new();
        if let Some(user_data) = &request.user_data {
            note_ids.push(self.bootstrap_note(request, user_data).await?);
        }

        let config = CreateServerConfig {
            name: request.provider_name.clone(),
            core,
            memory,
            os_type: request.property_str("image").unwrap_or_default().to_string(),
            disk_size: None,
            switch_id: request.reference_str("network_id").map(str::to_string),
            packet_filter_id: firewall_ids.first().map(|id| id.to_string()),
            ssh_key_ids: request
                .reference_str("key_pair_id")
                .map(|id| vec![id.to_string()])
                .unwrap_or_default(),
            note_ids,
            tags: request.tags.clone(),
        };
        self.usacloud.create_server(&config).await
    }

    /// Note id holding `user_data` for this server, uploading it only when no
    /// earlier attempt left an identical one
    async fn bootstrap_note(&self, request: &CreateRequest, user_data: &str) -> Result<String> {
        let name = format!("{}{}", request.provider_name, BOOTSTRAP_SUFFIX);
        let mut reusable = None;
        for note in self.usacloud.list_notes().await? {
            if note.name != name {
                continue;
            }
            if reusable.is_none() && note.content.as_deref() == Some(user_data) {
                reusable = Some(note.id);
            } else {
                debug!(note = %note.id, "Removing outdated bootstrap script");
                self.usacloud.delete_note(&note.id).await?;
            }
        }

        if let Some(id) = reusable {
            debug!(note = %id, "Reusing bootstrap script");
            return Ok(id);
        }
        let note = self
            .usacloud
            .create_note(&name, user_data, &request.tags)
            .await?;
        debug!(note = %note.id, "Uploaded bootstrap script");
        Ok(note.id)
    }

    async fn delete_server(&self, identity: &str) -> Result<()> {
        let servers = self.usacloud.list_servers().await?;
        let Some(server) = servers.into_iter().find(|s| s.id == identity) else {
            debug!(server = identity, "Server already gone");
            return Ok(());
        };
        self.usacloud.delete_server(&server.id).await?;

        let note_name = format!("{}{}", server.name, BOOTSTRAP_SUFFIX);
        for note in self.usacloud.list_notes().await? {
            if note.name == note_name {
                self.usacloud.delete_note(&note.id).await?;
            }
        }
        Ok(())
    }
}

/// Objects that carry tags are matched on the cluster tag, the rest on the
/// deterministic name prefix
fn owned_by(filter: &Filter, state: &ResourceState) -> bool {
    state.tags.contains(&naming::cluster_tag(&filter.cluster))
        || state
            .provider_name
            .starts_with(&format!("{}-", naming::sanitize(&filter.cluster)))
}

fn key_state(key: SshKeyInfo) -> ResourceState {
    let mut state = ResourceState::new(ResourceKind::KeyPair, key.id, key.name);
    if let Some(public_key) = key.public_key {
        state
            .properties
            .insert("public_key".into(), public_key.trim().into());
    }
    state
}

fn switch_state(switch: SwitchInfo) -> ResourceState {
    let mut state = ResourceState::new(ResourceKind::Network, switch.id, switch.name)
        .with_tags(switch.tags);
    if let Some(cidr) = switch.description.strip_prefix(CIDR_PREFIX) {
        state.properties.insert("cidr".into(), cidr.trim().into());
    }
    tag_name(state)
}

fn packet_filter_state(filter: PacketFilterInfo) -> ResourceState {
    let rules = rules_from_expressions(&filter.expression);
    ResourceState::new(ResourceKind::Firewall, filter.id, filter.name)
        .with_property("rules", firewall_rules_value(&rules))
}

fn server_state(server: ServerInfo) -> ResourceState {
    let mut state = ResourceState::new(ResourceKind::ServerPool, server.id.clone(), server.name.clone())
        .with_tags(server.tags.clone());
    if let Some(size) = server.size() {
        state.properties.insert("size".into(), size.into());
    }
    if let Some(status) = &server.instance_status {
        state.attributes.insert("status".into(), status.clone().into());
    }
    if let Some(ip) = server.ip_address() {
        state.attributes.insert("public_ip".into(), ip.into());
    }
    if let Some(ip) = server.private_ip_address() {
        state.attributes.insert("private_ip".into(), ip.into());
    }
    tag_name(state)
}

fn tag_name(state: ResourceState) -> ResourceState {
    match state.tagged_name().map(str::to_string) {
        Some(name) => state.with_name(name),
        None => state,
    }
}

/// Allow rules for every firewall rule, closed by a catch-all deny
fn expressions_from_rules(rules: &[FirewallRule]) -> Vec<PacketFilterExpression> {
    let mut expressions: Vec<PacketFilterExpression> = rules
        .iter()
        .map(|rule| PacketFilterExpression {
            protocol: rule.protocol.clone(),
            source_network: Some(rule.source.clone()),
            destination_port: (rule.protocol != "icmp").then(|| rule.port.to_string()),
            action: "allow".to_string(),
        })
        .collect();
    expressions.push(PacketFilterExpression {
        protocol: "ip".to_string(),
        source_network: None,
        destination_port: None,
        action: "deny".to_string(),
    });
    expressions
}

fn rules_from_expressions(expressions: &[PacketFilterExpression]) -> Vec<FirewallRule> {
    expressions
        .iter()
        .filter(|e| e.action == "allow")
        .map(|e| FirewallRule {
            protocol: e.protocol.clone(),
            port: e
                .destination_port
                .as_deref()
                .and_then(|p| p.parse().ok())
                .unwrap_or(0),
            source: e
                .source_network
                .clone()
                .unwrap_or_else(|| "0.0.0.0/0".to_string()),
        })
        .collect()
}

fn rules_from_value(value: Option<&serde_json::Value>) -> clusterflow_cloud::Result<Vec<FirewallRule>> {
    match value {
        Some(value) => Ok(serde_json::from_value(value.clone())?),
        None => Ok(Vec::new()),
    }
}

fn unsupported(kind: ResourceKind) -> CloudError {
    CloudError::Unsupported(kind.to_string())
}

#[async_trait]
impl CloudProvider for SakuraCloudProvider {
    fn name(&self) -> &str {
        "sakura-cloud"
    }

    fn display_name(&self) -> &str {
        "Sakura Cloud"
    }

    async fn check_auth(&self) -> clusterflow_cloud::Result<AuthStatus> {
        match self.usacloud.check_auth().await {
            Ok(auth) => {
                let account_info = auth
                    .account
                    .map(|a| format!("{} ({})", a.name, a.id))
                    .unwrap_or_else(|| "Unknown".to_string());
                Ok(AuthStatus::ok(account_info))
            }
            Err(SakuraError::UsacloudNotFound) => Ok(AuthStatus::failed("usacloud is not installed")),
            Err(e) => Ok(AuthStatus::failed(e.to_string())),
        }
    }

    fn supported_kinds(&self) -> &[ResourceKind] {
        &SUPPORTED_KINDS
    }

    fn check_cluster(&self, cluster: &Cluster) -> clusterflow_cloud::Result<()> {
        check_definition(cluster)
    }

    async fn describe(
        &self,
        kind: ResourceKind,
        filter: &Filter,
    ) -> clusterflow_cloud::Result<Vec<ResourceState>> {
        let states: Vec<ResourceState> = match kind {
            ResourceKind::KeyPair => self
                .usacloud
                .list_ssh_keys()
                .await?
                .into_iter()
                .map(key_state)
                .collect(),
            ResourceKind::Network => self
                .usacloud
                .list_switches()
                .await?
                .into_iter()
                .map(switch_state)
                .collect(),
            ResourceKind::Firewall => self
                .usacloud
                .list_packet_filters()
                .await?
                .into_iter()
                .map(packet_filter_state)
                .collect(),
            ResourceKind::ServerPool => self
                .usacloud
                .list_servers()
                .await?
                .into_iter()
                .map(server_state)
                .collect(),
            other => return Err(unsupported(other)),
        };

        Ok(states
            .into_iter()
            .filter(|s| owned_by(filter, s))
            .collect())
    }

    async fn create(&self, request: &CreateRequest) -> clusterflow_cloud::Result<ResourceState> {
        info!(kind = %request.kind, name = %request.provider_name, zone = %self.zone(), "Creating");
        let state = match request.kind {
            ResourceKind::KeyPair => {
                let public_key = request.property_str("public_key").unwrap_or_default();
                key_state(
                    self.usacloud
                        .create_ssh_key(&request.provider_name, public_key, DESCRIPTION)
                        .await?,
                )
            }
            ResourceKind::Network => {
                let cidr = request.property_str("cidr").unwrap_or_default();
                switch_state(
                    self.usacloud
                        .create_switch(
                            &request.provider_name,
                            &format!("{CIDR_PREFIX}{cidr}"),
                            &request.tags,
                        )
                        .await?,
                )
            }
            ResourceKind::Firewall => {
                let rules = rules_from_value(request.properties.get("rules"))?;
                packet_filter_state(
                    self.usacloud
                        .create_packet_filter(
                            &request.provider_name,
                            DESCRIPTION,
                            &expressions_from_rules(&rules),
                        )
                        .await?,
                )
            }
            ResourceKind::ServerPool => server_state(self.create_server(request).await?),
            other => return Err(unsupported(other)),
        };
        Ok(state.with_name(&request.name))
    }

    async fn update(
        &self,
        kind: ResourceKind,
        identity: &str,
        changes: &FieldSet,
    ) -> clusterflow_cloud::Result<ResourceState> {
        match kind {
            ResourceKind::Firewall => {
                let rules = rules_from_value(
                    changes.iter().find(|c| c.field == "rules").map(|c| &c.to),
                )?;
                let filter = self
                    .usacloud
                    .update_packet_filter(identity, &expressions_from_rules(&rules))
                    .await?;
                Ok(packet_filter_state(filter))
            }
            other => Err(CloudError::Unsupported(format!(
                "in-place update of {other} on Sakura Cloud"
            ))),
        }
    }

    async fn delete(&self, kind: ResourceKind, identity: &str) -> clusterflow_cloud::Result<()> {
        info!(kind = %kind, identity, zone = %self.zone(), "Deleting");
        let result = match kind {
            ResourceKind::KeyPair => self.usacloud.delete_ssh_key(identity).await,
            ResourceKind::Network => self.usacloud.delete_switch(identity).await,
            ResourceKind::Firewall => self.usacloud.delete_packet_filter(identity).await,
            ResourceKind::ServerPool => self.delete_server(identity).await,
            other => return Err(unsupported(other)),
        };

        match result.map_err(CloudError::from) {
            Err(CloudError::NotFound(_)) => Ok(()),
            other => other,
        }
    }
}
