//! DigitalOcean provider implementation
//!
//! | resource      | DigitalOcean object                         |
//! |---------------|---------------------------------------------|
//! | key-pair      | account ssh key (matched by name)           |
//! | network       | VPC (matched by name)                       |
//! | subnet        | CIDR carve-out recorded on the parent VPC   |
//! | firewall      | cloud firewall applied by droplet tag       |
//! | server-pool   | one droplet per instance, tagged            |
//! | load-balancer | load balancer targeting the pool tag        |
//!
//! DigitalOcean VPCs have no subnets of their own. A subnet is kept as a
//! `name=cidr` entry in the description of its VPC, checked to lie inside
//! the VPC range and not to overlap its siblings; droplets of a pool on that
//! subnet join the VPC.
//!
//! Firewall membership is carried by a tag on the droplet itself, set in the
//! same request that creates it, so no droplet ever runs outside its
//! firewalls.

use crate::api::{
    Addresses, CreateDroplet, CreateVpc, DigitalOceanClient, Droplet, Firewall, FirewallRequest,
    InboundRule, LbForwardingRule, LoadBalancer, LoadBalancerRequest, OutboundRule, SshKey, Vpc,
};
use crate::error::{DigitalOceanError, Result};
use async_trait::async_trait;
use clusterflow_cloud::{
    AuthStatus, CloudError, CloudProvider, CreateRequest, FieldSet, Filter, ResourceState,
};
use clusterflow_core::validate::{cidr_contains, parse_cidr};
use clusterflow_core::{
    FirewallRule, ForwardingRule, ResourceKind, firewall_rules_value, forwarding_rules_value,
    naming,
};
use std::time::Duration;
use tracing::{debug, info};

/// Kinds DigitalOcean can back
pub const SUPPORTED_KINDS: [ResourceKind; 6] = [
    ResourceKind::KeyPair,
    ResourceKind::Network,
    ResourceKind::Subnet,
    ResourceKind::Firewall,
    ResourceKind::ServerPool,
    ResourceKind::LoadBalancer,
];

const DESCRIPTION: &str = "managed by clusterflow";
const SUBNETS_MARKER: &str = "; subnets ";
/// DigitalOcean rejects longer VPC descriptions
const MAX_DESCRIPTION: usize = 255;
const FIREWALL_TAG_PREFIX: &str = "clusterflow-firewall:";
const ANYWHERE: [&str; 2] = ["0.0.0.0/0", "::/0"];

/// How long a new droplet is polled before the create is handed back to
/// the retry loop
#[derive(Debug, Clone, Copy)]
pub struct PollConfig {
    pub interval: Duration,
    pub attempts: u32,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            attempts: 60,
        }
    }
}

/// DigitalOcean provider
pub struct DigitalOceanProvider {
    client: DigitalOceanClient,
    region: String,
    poll: PollConfig,
}

impl DigitalOceanProvider {
    pub fn new(token: impl Into<String>, region: impl Into<String>) -> Result<Self> {
        Ok(Self::with_client(DigitalOceanClient::new(token)?, region))
    }

    pub fn with_client(client: DigitalOceanClient, region: impl Into<String>) -> Self {
        Self {
            client,
            region: region.into(),
            poll: PollConfig::default(),
        }
    }

    pub fn with_poll(mut self, poll: PollConfig) -> Self {
        self.poll = poll;
        self
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    async fn create_droplet(&self, request: &CreateRequest) -> Result<Droplet> {
        let ssh_keys = match request.reference_str("key_pair_id") {
            Some(id) => vec![
                id.parse::<u64>()
                    .map_err(|_| DigitalOceanError::InvalidIdentity(id.to_string()))?,
            ],
            None => Vec::new(),
        };

        let mut tags = request.tags.clone();
        if let Some(pool_tag) = request.reference_str("pool_tag") {
            tags.push(pool_tag.to_string());
        }
        tags.extend(
            request
                .reference_list("firewall_names")
                .into_iter()
                .map(firewall_tag),
        );
        let vpc_uuid = request
            .reference_str("network_id")
            .or_else(|| request.reference_str("subnet_id").and_then(subnet_vpc))
            .map(str::to_string);

        let body = CreateDroplet {
            name: request.provider_name.clone(),
            region: self.region.clone(),
            size: request.property_str("size").unwrap_or_default().to_string(),
            image: request.property_str("image").unwrap_or_default().to_string(),
            ssh_keys,
            user_data: request.user_data.clone(),
            vpc_uuid,
            tags,
        };
        let droplet = self.client.create_droplet(&body).await?;
        debug!(droplet = droplet.id, "Droplet accepted");
        self.wait_for_active(droplet.id).await
    }

    async fn wait_for_active(&self, id: u64) -> Result<Droplet> {
        let id = id.to_string();
        for attempt in 1..=self.poll.attempts {
            let droplet = self.client.get_droplet(&id).await?;
            if droplet.is_active() {
                return Ok(droplet);
            }
            debug!(droplet = %id, attempt, status = %droplet.status, "Waiting for droplet");
            tokio::time::sleep(self.poll.interval).await;
        }
        Err(DigitalOceanError::NotActive(id))
    }

    async fn update_firewall(&self, identity: &str, changes: &FieldSet) -> Result<Firewall> {
        let current = self.client.get_firewall(identity).await?;
        let rules = match changes.iter().find(|c| c.field == "rules") {
            Some(change) => serde_json::from_value(change.to.clone())?,
            None => rules_from_inbound(&current.name, &current.inbound_rules)?,
        };
        let mut tags = current.tags;
        let tag = firewall_tag(&current.name);
        if !tags.contains(&tag) {
            tags.push(tag);
        }
        let body = FirewallRequest {
            inbound_rules: inbound_from_rules(&rules),
            outbound_rules: current.outbound_rules,
            droplet_ids: current.droplet_ids,
            tags,
            name: current.name,
        };
        self.client.update_firewall(identity, &body).await
    }

    /// Subnets recorded on every VPC of the cluster
    async fn list_subnets(&self, cluster: &str) -> Result<Vec<ResourceState>> {
        let prefix = cluster_prefix(cluster);
        let mut states = Vec::new();
        for vpc in self.client.list_vpcs().await? {
            if !vpc.name.starts_with(&prefix) {
                continue;
            }
            for (name, cidr) in subnet_entries(&vpc.description) {
                states.push(subnet_state(&vpc.id, name, cidr));
            }
        }
        Ok(states)
    }

    async fn create_subnet(&self, request: &CreateRequest) -> Result<ResourceState> {
        let vpc_id = request.reference_str("network_id").ok_or_else(|| {
            DigitalOceanError::InvalidSubnet(format!(
                "{} has no network to carve it from",
                request.provider_name
            ))
        })?;
        let cidr = request.property_str("cidr").unwrap_or_default();
        let child = parse_cidr(cidr).map_err(DigitalOceanError::InvalidSubnet)?;

        let vpc = self.client.get_vpc(vpc_id).await?;
        let parent = parse_cidr(&vpc.ip_range).map_err(DigitalOceanError::InvalidSubnet)?;
        if !cidr_contains(parent, child) {
            return Err(DigitalOceanError::InvalidSubnet(format!(
                "{cidr} is not inside VPC {} ({})",
                vpc.name, vpc.ip_range
            )));
        }

        let mut entries: Vec<(&str, &str)> = subnet_entries(&vpc.description)
            .into_iter()
            .filter(|(name, _)| *name != request.provider_name)
            .collect();
        for (name, other) in &entries {
            let other_cidr = parse_cidr(other).map_err(DigitalOceanError::InvalidSubnet)?;
            if cidr_contains(other_cidr, child) || cidr_contains(child, other_cidr) {
                return Err(DigitalOceanError::InvalidSubnet(format!(
                    "{cidr} overlaps subnet {name} ({other})"
                )));
            }
        }
        entries.push((request.provider_name.as_str(), cidr));

        let description = describe_subnets(&entries);
        if description.len() > MAX_DESCRIPTION {
            return Err(DigitalOceanError::InvalidSubnet(format!(
                "too many subnets recorded on VPC {}",
                vpc.name
            )));
        }
        self.client
            .update_vpc_description(vpc_id, &description)
            .await?;
        debug!(vpc = vpc_id, subnet = %request.provider_name, "Subnet recorded on VPC");
        Ok(subnet_state(vpc_id, &request.provider_name, cidr))
    }

    async fn delete_subnet(&self, identity: &str) -> Result<()> {
        let (vpc_id, name) = identity
            .split_once('/')
            .ok_or_else(|| DigitalOceanError::InvalidIdentity(identity.to_string()))?;
        let vpc = match self.client.get_vpc(vpc_id).await {
            Ok(vpc) => vpc,
            Err(DigitalOceanError::Api { status: 404, .. }) => return Ok(()),
            Err(e) => return Err(e),
        };
        let entries = subnet_entries(&vpc.description);
        let remaining: Vec<(&str, &str)> = entries
            .iter()
            .copied()
            .filter(|(entry, _)| *entry != name)
            .collect();
        if remaining.len() != entries.len() {
            self.client
                .update_vpc_description(vpc_id, &describe_subnets(&remaining))
                .await?;
        }
        Ok(())
    }

    /// Bring a droplet found after a lost create response to the state a
    /// finished create returns
    async fn adopt_droplet(&self, existing: &ResourceState) -> Result<Droplet> {
        let id = existing
            .identity
            .parse::<u64>()
            .map_err(|_| DigitalOceanError::InvalidIdentity(existing.identity.clone()))?;
        self.wait_for_active(id).await
    }

    async fn update_load_balancer(
        &self,
        identity: &str,
        changes: &FieldSet,
    ) -> Result<LoadBalancer> {
        let current = self.client.get_load_balancer(identity).await?;
        let forwarding_rules = match changes.iter().find(|c| c.field == "forwarding") {
            Some(change) => {
                let rules: Vec<ForwardingRule> = serde_json::from_value(change.to.clone())?;
                lb_rules_from_forwarding(&rules)
            }
            None => current.forwarding_rules,
        };
        let body = LoadBalancerRequest {
            name: current.name,
            region: current
                .region
                .map(|r| r.slug)
                .unwrap_or_else(|| self.region.clone()),
            tag: current.tag,
            forwarding_rules,
        };
        self.client.update_load_balancer(identity, &body).await
    }
}

/// Droplets carry tags; every other object is matched on the deterministic
/// name prefix
fn owned_by(filter: &Filter, state: &ResourceState) -> bool {
    state.tags.contains(&naming::cluster_tag(&filter.cluster))
        || state.provider_name.starts_with(&cluster_prefix(&filter.cluster))
}

fn cluster_prefix(cluster: &str) -> String {
    format!("{}-", naming::sanitize(cluster))
}

fn key_state(key: SshKey) -> ResourceState {
    ResourceState::new(ResourceKind::KeyPair, key.id.to_string(), key.name)
        .with_property("public_key", key.public_key.trim())
        .with_attribute("fingerprint", key.fingerprint)
}

/// Tag that makes a droplet a member of the firewall named `firewall`
fn firewall_tag(firewall: &str) -> String {
    format!("{FIREWALL_TAG_PREFIX}{firewall}")
}

/// `(provider name, cidr)` pairs recorded in a VPC description
fn subnet_entries(description: &str) -> Vec<(&str, &str)> {
    description
        .split_once(SUBNETS_MARKER)
        .map(|(_, list)| {
            list.split(',')
                .filter_map(|entry| entry.trim().split_once('='))
                .collect()
        })
        .unwrap_or_default()
}

fn describe_subnets(entries: &[(&str, &str)]) -> String {
    if entries.is_empty() {
        return DESCRIPTION.to_string();
    }
    let list: Vec<String> = entries
        .iter()
        .map(|(name, cidr)| format!("{name}={cidr}"))
        .collect();
    format!("{DESCRIPTION}{SUBNETS_MARKER}{}", list.join(","))
}

/// Subnet identities are `{vpc id}/{provider name}`
fn subnet_state(vpc_id: &str, name: &str, cidr: &str) -> ResourceState {
    ResourceState::new(ResourceKind::Subnet, format!("{vpc_id}/{name}"), name)
        .with_property("cidr", cidr)
        .with_property("network_id", vpc_id)
}

fn subnet_vpc(identity: &str) -> Option<&str> {
    identity.split_once('/').map(|(vpc, _)| vpc)
}

fn vpc_state(vpc: Vpc) -> ResourceState {
    ResourceState::new(ResourceKind::Network, vpc.id, vpc.name)
        .with_property("cidr", vpc.ip_range)
        .with_attribute("region", vpc.region)
}

fn firewall_state(firewall: Firewall) -> Result<ResourceState> {
    let rules = rules_from_inbound(&firewall.name, &firewall.inbound_rules)?;
    Ok(
        ResourceState::new(ResourceKind::Firewall, firewall.id, firewall.name)
            .with_property("rules", firewall_rules_value(&rules))
            .with_attribute("status", firewall.status)
            .with_attribute("droplet_ids", firewall.droplet_ids),
    )
}

fn droplet_state(droplet: Droplet) -> ResourceState {
    let mut state = ResourceState::new(
        ResourceKind::ServerPool,
        droplet.id.to_string(),
        droplet.name.clone(),
    )
    .with_tags(droplet.tags.clone())
    .with_property("size", droplet.size_slug.clone())
    .with_attribute("status", droplet.status.clone());

    if let Some(slug) = droplet.image.as_ref().and_then(|i| i.slug.clone()) {
        state.properties.insert("image".into(), slug.into());
    }
    if let Some(ip) = droplet.public_ip() {
        state.attributes.insert("public_ip".into(), ip.into());
    }
    if let Some(ip) = droplet.private_ip() {
        state.attributes.insert("private_ip".into(), ip.into());
    }
    if let Some(vpc) = &droplet.vpc_uuid {
        state.attributes.insert("vpc_uuid".into(), vpc.clone().into());
    }

    match state.tagged_name().map(str::to_string) {
        Some(name) => state.with_name(name),
        None => state,
    }
}

/// The pool is only recoverable when the owning cluster is known
fn lb_state(lb: LoadBalancer, cluster: Option<&str>) -> ResourceState {
    let forwarding: Vec<ForwardingRule> = lb
        .forwarding_rules
        .iter()
        .map(|rule| ForwardingRule {
            protocol: rule.entry_protocol.clone(),
            entry_port: rule.entry_port,
            target_port: rule.target_port,
        })
        .collect();

    let mut state = ResourceState::new(ResourceKind::LoadBalancer, lb.id, lb.name)
        .with_property("forwarding", forwarding_rules_value(&forwarding))
        .with_attribute("ip", lb.ip)
        .with_attribute("status", lb.status);

    if let Some(cluster) = cluster
        && let Some(pool) = lb.tag.strip_prefix(&cluster_prefix(cluster))
    {
        state.properties.insert("pool".into(), pool.into());
    }
    state
}

fn inbound_from_rules(rules: &[FirewallRule]) -> Vec<InboundRule> {
    rules
        .iter()
        .map(|rule| InboundRule {
            protocol: rule.protocol.clone(),
            ports: if rule.protocol == "icmp" {
                String::new()
            } else {
                rule.port.to_string()
            },
            sources: Addresses {
                addresses: vec![rule.source.clone()],
            },
        })
        .collect()
}

/// Only single ports (and the portless icmp) map onto [`FirewallRule`];
/// ranges and "all" are refused instead of being read as another port
fn rules_from_inbound(firewall: &str, inbound: &[InboundRule]) -> Result<Vec<FirewallRule>> {
    let mut rules = Vec::new();
    for rule in inbound {
        let port = if rule.ports.is_empty() {
            0
        } else {
            rule.ports
                .parse()
                .map_err(|_| DigitalOceanError::UnsupportedPorts {
                    firewall: firewall.to_string(),
                    ports: rule.ports.clone(),
                })?
        };
        rules.extend(rule.sources.addresses.iter().map(|source| FirewallRule {
            protocol: rule.protocol.clone(),
            port,
            source: source.clone(),
        }));
    }
    Ok(rules)
}

/// Egress is left open; clusters need to pull images and packages
fn default_outbound() -> Vec<OutboundRule> {
    ["tcp", "udp", "icmp"]
        .into_iter()
        .map(|protocol| OutboundRule {
            protocol: protocol.to_string(),
            ports: if protocol == "icmp" {
                String::new()
            } else {
                "all".to_string()
            },
            destinations: Addresses {
                addresses: ANYWHERE.iter().map(|a| a.to_string()).collect(),
            },
        })
        .collect()
}

fn lb_rules_from_forwarding(rules: &[ForwardingRule]) -> Vec<LbForwardingRule> {
    rules
        .iter()
        .map(|rule| LbForwardingRule {
            entry_protocol: rule.protocol.clone(),
            entry_port: rule.entry_port,
            target_protocol: rule.protocol.clone(),
            target_port: rule.target_port,
        })
        .collect()
}

fn value_of<T: serde::de::DeserializeOwned>(
    value: Option<&serde_json::Value>,
) -> clusterflow_cloud::Result<Vec<T>> {
    match value {
        Some(value) => Ok(serde_json::from_value(value.clone())?),
        None => Ok(Vec::new()),
    }
}

fn unsupported(kind: ResourceKind) -> CloudError {
    CloudError::Unsupported(kind.to_string())
}

#[async_trait]
impl CloudProvider for DigitalOceanProvider {
    fn name(&self) -> &str {
        "digitalocean"
    }

    fn display_name(&self) -> &str {
        "DigitalOcean"
    }

    async fn check_auth(&self) -> clusterflow_cloud::Result<AuthStatus> {
        match self.client.account().await {
            Ok(account) => Ok(AuthStatus::ok(format!(
                "{} ({})",
                account.email, account.status
            ))),
            Err(e) => Ok(AuthStatus::failed(e.to_string())),
        }
    }

    fn supported_kinds(&self) -> &[ResourceKind] {
        &SUPPORTED_KINDS
    }

    async fn describe(
        &self,
        kind: ResourceKind,
        filter: &Filter,
    ) -> clusterflow_cloud::Result<Vec<ResourceState>> {
        let states: Vec<ResourceState> = match kind {
            ResourceKind::KeyPair => self
                .client
                .list_keys()
                .await?
                .into_iter()
                .map(key_state)
                .collect(),
            ResourceKind::Network => self
                .client
                .list_vpcs()
                .await?
                .into_iter()
                .map(vpc_state)
                .collect(),
            ResourceKind::Subnet => self.list_subnets(&filter.cluster).await?,
            // foreign firewalls may use rules clusterflow cannot read
            ResourceKind::Firewall => self
                .client
                .list_firewalls()
                .await?
                .into_iter()
                .filter(|fw| fw.name.starts_with(&cluster_prefix(&filter.cluster)))
                .map(firewall_state)
                .collect::<Result<_>>()?,
            ResourceKind::ServerPool => self
                .client
                .list_droplets(&naming::cluster_tag(&filter.cluster))
                .await?
                .into_iter()
                .map(droplet_state)
                .collect(),
            ResourceKind::LoadBalancer => self
                .client
                .list_load_balancers()
                .await?
                .into_iter()
                .map(|lb| lb_state(lb, Some(&filter.cluster)))
                .collect(),
            other => return Err(unsupported(other)),
        };

        Ok(states
            .into_iter()
            .filter(|s| owned_by(filter, s))
            .collect())
    }

    async fn create(&self, request: &CreateRequest) -> clusterflow_cloud::Result<ResourceState> {
        info!(kind = %request.kind, name = %request.provider_name, region = %self.region, "Creating");
        let state = match request.kind {
            ResourceKind::KeyPair => {
                let public_key = request.property_str("public_key").unwrap_or_default();
                key_state(
                    self.client
                        .create_key(&request.provider_name, public_key)
                        .await?,
                )
            }
            ResourceKind::Network => {
                let body = CreateVpc {
                    name: request.provider_name.clone(),
                    region: self.region.clone(),
                    ip_range: request.property_str("cidr").unwrap_or_default().to_string(),
                    description: DESCRIPTION.to_string(),
                };
                vpc_state(self.client.create_vpc(&body).await?)
            }
            ResourceKind::Subnet => self.create_subnet(request).await?,
            ResourceKind::Firewall => {
                let rules: Vec<FirewallRule> = value_of(request.properties.get("rules"))?;
                let body = FirewallRequest {
                    name: request.provider_name.clone(),
                    inbound_rules: inbound_from_rules(&rules),
                    outbound_rules: default_outbound(),
                    droplet_ids: Vec::new(),
                    tags: vec![firewall_tag(&request.provider_name)],
                };
                firewall_state(self.client.create_firewall(&body).await?)?
            }
            ResourceKind::ServerPool => droplet_state(self.create_droplet(request).await?),
            ResourceKind::LoadBalancer => {
                let rules: Vec<ForwardingRule> = value_of(request.properties.get("forwarding"))?;
                let body = LoadBalancerRequest {
                    name: request.provider_name.clone(),
                    region: self.region.clone(),
                    tag: request.reference_str("pool_tag").unwrap_or_default().to_string(),
                    forwarding_rules: lb_rules_from_forwarding(&rules),
                };
                lb_state(
                    self.client.create_load_balancer(&body).await?,
                    Some(&request.cluster),
                )
            }
            other => return Err(unsupported(other)),
        };
        Ok(state.with_name(&request.name))
    }

    async fn adopt(
        &self,
        request: &CreateRequest,
        existing: ResourceState,
    ) -> clusterflow_cloud::Result<ResourceState> {
        match request.kind {
            ResourceKind::ServerPool => {
                let droplet = self.adopt_droplet(&existing).await?;
                Ok(droplet_state(droplet).with_name(&request.name))
            }
            _ => Ok(existing),
        }
    }

    async fn update(
        &self,
        kind: ResourceKind,
        identity: &str,
        changes: &FieldSet,
    ) -> clusterflow_cloud::Result<ResourceState> {
        match kind {
            ResourceKind::Firewall => {
                Ok(firewall_state(self.update_firewall(identity, changes).await?)?)
            }
            ResourceKind::LoadBalancer => Ok(lb_state(
                self.update_load_balancer(identity, changes).await?,
                None,
            )),
            other => Err(CloudError::Unsupported(format!(
                "in-place update of {other} on DigitalOcean"
            ))),
        }
    }

    async fn delete(&self, kind: ResourceKind, identity: &str) -> clusterflow_cloud::Result<()> {
        info!(kind = %kind, identity, region = %self.region, "Deleting");
        match kind {
            ResourceKind::KeyPair => self.client.delete_key(identity).await?,
            ResourceKind::Network => self.client.delete_vpc(identity).await?,
            ResourceKind::Subnet => self.delete_subnet(identity).await?,
            ResourceKind::Firewall => self.client.delete_firewall(identity).await?,
            ResourceKind::ServerPool => self.client.delete_droplet(identity).await?,
            ResourceKind::LoadBalancer => self.client.delete_load_balancer(identity).await?,
            other => return Err(unsupported(other)),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clusterflow_core::Properties;
    use serde_json::json;
    use wiremock::matchers::{body_json, body_partial_json, method, path, path_regex, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn provider(server: &MockServer) -> DigitalOceanProvider {
        let client = DigitalOceanClient::new("test-token")
            .unwrap()
            .with_base_url(server.uri());
        DigitalOceanProvider::with_client(client, "nyc3").with_poll(PollConfig {
            interval: Duration::ZERO,
            attempts: 3,
        })
    }

    fn droplet_json(id: u64, name: &str, status: &str, with_network: bool) -> serde_json::Value {
        let v4 = if with_network {
            json!([
                { "ip_address": "10.10.1.5", "type": "private" },
                { "ip_address": "203.0.113.5", "type": "public" }
            ])
        } else {
            json!([])
        };
        json!({
            "id": id,
            "name": name,
            "status": status,
            "size_slug": "s-2vcpu-4gb",
            "image": { "slug": "ubuntu-22-04-x64" },
            "tags": ["clusterflow-cluster:demo", "clusterflow-resource:workers", "demo-workers"],
            "networks": { "v4": v4 },
            "vpc_uuid": "vpc-1"
        })
    }

    fn pool_request() -> CreateRequest {
        let mut properties = Properties::new();
        properties.insert("size".into(), "s-2vcpu-4gb".into());
        properties.insert("image".into(), "ubuntu-22-04-x64".into());
        let mut references = Properties::new();
        references.insert("key_pair_id".into(), "512190".into());
        references.insert("network_id".into(), "vpc-1".into());
        references.insert("firewall_ids".into(), json!(["fw-1"]));
        references.insert("firewall_names".into(), json!(["demo-fw"]));
        references.insert("pool_tag".into(), "demo-workers".into());
        CreateRequest {
            kind: ResourceKind::ServerPool,
            cluster: "demo".into(),
            name: "workers".into(),
            provider_name: "demo-workers-0".into(),
            tags: naming::tags_for("demo", "workers"),
            properties,
            references,
            index: Some(0),
            user_data: Some("#!/bin/bash\necho join".into()),
        }
    }

    #[tokio::test]
    async fn test_describe_droplets_by_cluster_tag() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v2/droplets"))
            .and(query_param("tag_name", "clusterflow-cluster:demo"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "droplets": [
                    droplet_json(1, "demo-workers-0", "active", true),
                    droplet_json(2, "demo-workers-1", "active", true)
                ]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let states = provider(&server)
            .await
            .describe(ResourceKind::ServerPool, &Filter::resource("demo", "workers"))
            .await
            .unwrap();

        assert_eq!(states.len(), 2);
        assert_eq!(states[0].name, "workers");
        assert_eq!(states[0].identity, "1");
        assert_eq!(states[0].property("size"), Some(&json!("s-2vcpu-4gb")));
        assert_eq!(states[1].attribute_str("private_ip"), Some("10.10.1.5"));
    }

    async fn no_firewall_attach(server: &MockServer) {
        Mock::given(method("POST"))
            .and(path_regex(r"^/v2/firewalls/[^/]+/droplets$"))
            .respond_with(ResponseTemplate::new(204))
            .expect(0)
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn test_create_droplet_waits_until_active() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v2/droplets"))
            .and(body_partial_json(json!({
                "name": "demo-workers-0",
                "region": "nyc3",
                "ssh_keys": [512190],
                "vpc_uuid": "vpc-1",
                "user_data": "#!/bin/bash\necho join",
                "tags": [
                    "clusterflow-cluster:demo",
                    "clusterflow-resource:workers",
                    "demo-workers",
                    "clusterflow-firewall:demo-fw"
                ]
            })))
            .respond_with(ResponseTemplate::new(202).set_body_json(json!({
                "droplet": droplet_json(42, "demo-workers-0", "new", false)
            })))
            .expect(1)
            .mount(&server)
            .await;
        no_firewall_attach(&server).await;
        Mock::given(method("GET"))
            .and(path("/v2/droplets/42"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "droplet": droplet_json(42, "demo-workers-0", "active", true)
            })))
            .mount(&server)
            .await;

        let state = provider(&server).await.create(&pool_request()).await.unwrap();

        assert_eq!(state.identity, "42");
        assert_eq!(state.name, "workers");
        assert_eq!(state.attribute_str("public_ip"), Some("203.0.113.5"));
    }

    #[tokio::test]
    async fn test_droplet_that_never_boots_is_transient() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v2/droplets"))
            .respond_with(ResponseTemplate::new(202).set_body_json(json!({
                "droplet": droplet_json(42, "demo-workers-0", "new", false)
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v2/droplets/42"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "droplet": droplet_json(42, "demo-workers-0", "new", false)
            })))
            .expect(3)
            .mount(&server)
            .await;

        let err = provider(&server)
            .await
            .create(&pool_request())
            .await
            .unwrap_err();

        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_throttling_maps_to_transient_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v2/vpcs"))
            .respond_with(ResponseTemplate::new(429).set_body_json(json!({
                "id": "too_many_requests",
                "message": "API rate limit exceeded"
            })))
            .mount(&server)
            .await;

        let err = provider(&server)
            .await
            .describe(ResourceKind::Network, &Filter::cluster("demo"))
            .await
            .unwrap_err();

        assert!(matches!(err, CloudError::Throttled(_)));
    }

    #[tokio::test]
    async fn test_describe_filters_foreign_objects() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v2/vpcs"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "vpcs": [
                    { "id": "vpc-1", "name": "demo-n1", "region": "nyc3", "ip_range": "10.10.0.0/16" },
                    { "id": "vpc-2", "name": "default-nyc3", "region": "nyc3", "ip_range": "10.116.0.0/20" }
                ]
            })))
            .mount(&server)
            .await;

        let states = provider(&server)
            .await
            .describe(ResourceKind::Network, &Filter::resource("demo", "n1"))
            .await
            .unwrap();

        assert_eq!(states.len(), 1);
        assert_eq!(states[0].identity, "vpc-1");
        assert_eq!(states[0].property("cidr"), Some(&json!("10.10.0.0/16")));
    }

    #[tokio::test]
    async fn test_load_balancer_pool_comes_from_tag() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v2/load_balancers"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "load_balancers": [{
                    "id": "lb-1",
                    "name": "demo-api",
                    "ip": "198.51.100.7",
                    "status": "active",
                    "tag": "demo-master",
                    "region": { "slug": "nyc3" },
                    "forwarding_rules": [{
                        "entry_protocol": "tcp",
                        "entry_port": 443,
                        "target_protocol": "tcp",
                        "target_port": 6443
                    }]
                }]
            })))
            .mount(&server)
            .await;

        let states = provider(&server)
            .await
            .describe(ResourceKind::LoadBalancer, &Filter::cluster("demo"))
            .await
            .unwrap();

        assert_eq!(states.len(), 1);
        assert_eq!(states[0].property("pool"), Some(&json!("master")));
        assert_eq!(
            states[0].property("forwarding"),
            Some(&json!([{ "protocol": "tcp", "entry_port": 443, "target_port": 6443 }]))
        );
    }

    #[tokio::test]
    async fn test_delete_of_missing_object_succeeds() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/v2/droplets/42"))
            .respond_with(ResponseTemplate::new(404).set_body_json(json!({
                "id": "not_found",
                "message": "The resource you were accessing could not be found."
            })))
            .mount(&server)
            .await;

        provider(&server)
            .await
            .delete(ResourceKind::ServerPool, "42")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_adopted_droplet_is_waited_for() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v2/droplets/42"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "droplet": droplet_json(42, "demo-workers-0", "new", false)
            })))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v2/droplets/42"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "droplet": droplet_json(42, "demo-workers-0", "active", true)
            })))
            .mount(&server)
            .await;
        no_firewall_attach(&server).await;

        let found = droplet_state(
            serde_json::from_value(droplet_json(42, "demo-workers-0", "new", false)).unwrap(),
        );
        let state = provider(&server)
            .await
            .adopt(&pool_request(), found)
            .await
            .unwrap();

        assert_eq!(state.identity, "42");
        assert_eq!(state.name, "workers");
        assert_eq!(state.attribute_str("status"), Some("active"));
        assert_eq!(state.attribute_str("private_ip"), Some("10.10.1.5"));
    }

    #[tokio::test]
    async fn test_firewall_is_created_with_its_membership_tag() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v2/firewalls"))
            .and(body_partial_json(json!({
                "name": "demo-fw",
                "tags": ["clusterflow-firewall:demo-fw"],
                "inbound_rules": [{
                    "protocol": "tcp",
                    "ports": "22",
                    "sources": { "addresses": ["0.0.0.0/0"] }
                }]
            })))
            .respond_with(ResponseTemplate::new(202).set_body_json(json!({
                "firewall": {
                    "id": "fw-1",
                    "name": "demo-fw",
                    "status": "waiting",
                    "tags": ["clusterflow-firewall:demo-fw"],
                    "inbound_rules": [{
                        "protocol": "tcp",
                        "ports": "22",
                        "sources": { "addresses": ["0.0.0.0/0"] }
                    }]
                }
            })))
            .expect(1)
            .mount(&server)
            .await;

        let mut properties = Properties::new();
        properties.insert(
            "rules".into(),
            firewall_rules_value(&[FirewallRule::tcp(22, "0.0.0.0/0")]),
        );
        let request = CreateRequest {
            kind: ResourceKind::Firewall,
            cluster: "demo".into(),
            name: "fw".into(),
            provider_name: "demo-fw".into(),
            tags: naming::tags_for("demo", "fw"),
            properties,
            references: Properties::new(),
            index: None,
            user_data: None,
        };
        let state = provider(&server).await.create(&request).await.unwrap();

        assert_eq!(state.identity, "fw-1");
        assert_eq!(state.name, "fw");
    }

    #[tokio::test]
    async fn test_port_ranges_are_refused_not_misread() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v2/firewalls"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "firewalls": [
                    {
                        "id": "fw-1",
                        "name": "demo-fw",
                        "inbound_rules": [{
                            "protocol": "tcp",
                            "ports": "8000-9000",
                            "sources": { "addresses": ["0.0.0.0/0"] }
                        }]
                    },
                    {
                        "id": "fw-2",
                        "name": "someone-elses",
                        "inbound_rules": [{
                            "protocol": "tcp",
                            "ports": "all",
                            "sources": { "addresses": ["0.0.0.0/0"] }
                        }]
                    }
                ]
            })))
            .mount(&server)
            .await;

        let err = provider(&server)
            .await
            .describe(ResourceKind::Firewall, &Filter::cluster("demo"))
            .await
            .unwrap_err();
        assert!(matches!(&err, CloudError::Unsupported(m) if m.contains("8000-9000")));

        // the unreadable foreign firewall does not break other clusters
        let states = provider(&server)
            .await
            .describe(ResourceKind::Firewall, &Filter::cluster("prod"))
            .await
            .unwrap();
        assert!(states.is_empty());
    }

    fn subnet_request(cidr: &str) -> CreateRequest {
        let mut properties = Properties::new();
        properties.insert("cidr".into(), cidr.into());
        let mut references = Properties::new();
        references.insert("network_id".into(), "vpc-1".into());
        CreateRequest {
            kind: ResourceKind::Subnet,
            cluster: "demo".into(),
            name: "s2".into(),
            provider_name: "demo-s2".into(),
            tags: naming::tags_for("demo", "s2"),
            properties,
            references,
            index: None,
            user_data: None,
        }
    }

    async fn mount_vpc(server: &MockServer, description: &str) {
        Mock::given(method("GET"))
            .and(path("/v2/vpcs/vpc-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "vpc": {
                    "id": "vpc-1",
                    "name": "demo-n1",
                    "region": "nyc3",
                    "ip_range": "10.10.0.0/16",
                    "description": description
                }
            })))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn test_subnet_is_recorded_on_its_vpc() {
        let server = MockServer::start().await;
        mount_vpc(&server, "managed by clusterflow; subnets demo-s1=10.10.1.0/24").await;
        Mock::given(method("PATCH"))
            .and(path("/v2/vpcs/vpc-1"))
            .and(body_json(json!({
                "description": "managed by clusterflow; subnets demo-s1=10.10.1.0/24,demo-s2=10.10.2.0/24"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "vpc": { "id": "vpc-1", "name": "demo-n1", "ip_range": "10.10.0.0/16" }
            })))
            .expect(1)
            .mount(&server)
            .await;

        let state = provider(&server)
            .await
            .create(&subnet_request("10.10.2.0/24"))
            .await
            .unwrap();

        assert_eq!(state.identity, "vpc-1/demo-s2");
        assert_eq!(state.name, "s2");
        assert_eq!(state.property("cidr"), Some(&json!("10.10.2.0/24")));
        assert_eq!(state.property("network_id"), Some(&json!("vpc-1")));
    }

    #[tokio::test]
    async fn test_subnet_outside_or_overlapping_is_rejected() {
        let server = MockServer::start().await;
        mount_vpc(&server, "managed by clusterflow; subnets demo-s1=10.10.1.0/24").await;
        Mock::given(method("PATCH"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;
        let provider = provider(&server).await;

        let outside = provider
            .create(&subnet_request("192.168.0.0/24"))
            .await
            .unwrap_err();
        assert!(matches!(outside, CloudError::InvalidRequest(_)));

        let overlapping = provider
            .create(&subnet_request("10.10.1.128/25"))
            .await
            .unwrap_err();
        assert!(matches!(&overlapping, CloudError::InvalidRequest(m) if m.contains("demo-s1")));
    }

    #[tokio::test]
    async fn test_describe_subnets_reads_vpc_descriptions() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v2/vpcs"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "vpcs": [
                    {
                        "id": "vpc-1",
                        "name": "demo-n1",
                        "ip_range": "10.10.0.0/16",
                        "description": "managed by clusterflow; subnets demo-s1=10.10.1.0/24,demo-s2=10.10.2.0/24"
                    },
                    {
                        "id": "vpc-9",
                        "name": "prod-n1",
                        "ip_range": "10.20.0.0/16",
                        "description": "managed by clusterflow; subnets prod-s1=10.20.1.0/24"
                    }
                ]
            })))
            .mount(&server)
            .await;

        let states = provider(&server)
            .await
            .describe(ResourceKind::Subnet, &Filter::cluster("demo"))
            .await
            .unwrap();

        let identities: Vec<&str> = states.iter().map(|s| s.identity.as_str()).collect();
        assert_eq!(identities, vec!["vpc-1/demo-s1", "vpc-1/demo-s2"]);
        assert_eq!(states[1].property("cidr"), Some(&json!("10.10.2.0/24")));
    }

    #[tokio::test]
    async fn test_subnet_delete_drops_only_its_entry() {
        let server = MockServer::start().await;
        mount_vpc(
            &server,
            "managed by clusterflow; subnets demo-s1=10.10.1.0/24,demo-s2=10.10.2.0/24",
        )
        .await;
        Mock::given(method("PATCH"))
            .and(path("/v2/vpcs/vpc-1"))
            .and(body_json(json!({
                "description": "managed by clusterflow; subnets demo-s2=10.10.2.0/24"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "vpc": { "id": "vpc-1", "name": "demo-n1", "ip_range": "10.10.0.0/16" }
            })))
            .expect(1)
            .mount(&server)
            .await;
        let provider = provider(&server).await;

        provider
            .delete(ResourceKind::Subnet, "vpc-1/demo-s1")
            .await
            .unwrap();
        // already gone: nothing to write
        provider
            .delete(ResourceKind::Subnet, "vpc-1/demo-s3")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_subnet_of_deleted_vpc_counts_as_deleted() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v2/vpcs/vpc-1"))
            .respond_with(ResponseTemplate::new(404).set_body_json(json!({
                "id": "not_found",
                "message": "The resource you were accessing could not be found."
            })))
            .mount(&server)
            .await;

        provider(&server)
            .await
            .delete(ResourceKind::Subnet, "vpc-1/demo-s1")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_droplet_on_a_subnet_joins_its_vpc() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v2/droplets"))
            .and(body_partial_json(json!({ "vpc_uuid": "vpc-1" })))
            .respond_with(ResponseTemplate::new(202).set_body_json(json!({
                "droplet": droplet_json(42, "demo-workers-0", "active", true)
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v2/droplets/42"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "droplet": droplet_json(42, "demo-workers-0", "active", true)
            })))
            .mount(&server)
            .await;

        let mut request = pool_request();
        request.references.remove("network_id");
        request
            .references
            .insert("subnet_id".into(), "vpc-1/demo-s1".into());
        provider(&server).await.create(&request).await.unwrap();
    }

    #[test]
    fn test_subnet_entries_round_trip_through_description() {
        assert!(subnet_entries(DESCRIPTION).is_empty());
        assert_eq!(describe_subnets(&[]), DESCRIPTION);

        let description = describe_subnets(&[("demo-s1", "10.10.1.0/24")]);
        assert_eq!(subnet_entries(&description), vec![("demo-s1", "10.10.1.0/24")]);
    }

    #[test]
    fn test_firewall_rules_survive_the_wire_format() {
        let rules = vec![
            FirewallRule {
                protocol: "tcp".into(),
                port: 22,
                source: "0.0.0.0/0".into(),
            },
            FirewallRule {
                protocol: "icmp".into(),
                port: 0,
                source: "10.10.0.0/16".into(),
            },
        ];

        let inbound = inbound_from_rules(&rules);
        assert_eq!(inbound[1].ports, "");
        assert_eq!(rules_from_inbound("demo-fw", &inbound).unwrap(), rules);
    }

    #[test]
    fn test_unrepresentable_ports_are_errors() {
        for ports in ["8000-9000", "all"] {
            let inbound = vec![InboundRule {
                protocol: "tcp".into(),
                ports: ports.into(),
                sources: Addresses {
                    addresses: vec!["0.0.0.0/0".into()],
                },
            }];
            assert!(matches!(
                rules_from_inbound("demo-fw", &inbound),
                Err(DigitalOceanError::UnsupportedPorts { .. })
            ));
        }
    }
}
