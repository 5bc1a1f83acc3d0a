//! DigitalOcean API client
//!
//! Thin typed wrapper over the v2 REST API with Bearer token
//! authentication. Only the endpoints the provider needs are covered.

use crate::error::{DigitalOceanError, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const DIGITALOCEAN_API_BASE: &str = "https://api.digitalocean.com";

const PER_PAGE: u32 = 200;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// DigitalOcean API client
#[derive(Debug, Clone)]
pub struct DigitalOceanClient {
    client: reqwest::Client,
    token: String,
    base_url: String,
}

impl DigitalOceanClient {
    pub fn new(token: impl Into<String>) -> Result<Self> {
        let token = token.into();
        if token.trim().is_empty() {
            return Err(DigitalOceanError::MissingToken);
        }
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent(concat!("clusterflow/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
            token,
            base_url: DIGITALOCEAN_API_BASE.to_string(),
        })
    }

    /// Point the client at another endpoint (API proxy, test server)
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    fn url(&self, path: &str) -> String {
        format!("{}/v2/{}", self.base_url, path)
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        tracing::debug!("GET {}", path);
        let response = self
            .client
            .get(self.url(path))
            .bearer_auth(&self.token)
            .send()
            .await?;
        parse_response(response).await
    }

    async fn post<B: Serialize, T: DeserializeOwned>(&self, path: &str, body: &B) -> Result<T> {
        tracing::debug!("POST {}", path);
        let response = self
            .client
            .post(self.url(path))
            .bearer_auth(&self.token)
            .json(body)
            .send()
            .await?;
        parse_response(response).await
    }

    async fn put<B: Serialize, T: DeserializeOwned>(&self, path: &str, body: &B) -> Result<T> {
        tracing::debug!("PUT {}", path);
        let response = self
            .client
            .put(self.url(path))
            .bearer_auth(&self.token)
            .json(body)
            .send()
            .await?;
        parse_response(response).await
    }

    async fn patch<B: Serialize, T: DeserializeOwned>(&self, path: &str, body: &B) -> Result<T> {
        tracing::debug!("PATCH {}", path);
        let response = self
            .client
            .patch(self.url(path))
            .bearer_auth(&self.token)
            .json(body)
            .send()
            .await?;
        parse_response(response).await
    }

    /// DELETE; an object that is already gone counts as deleted
    async fn delete(&self, path: &str) -> Result<()> {
        tracing::debug!("DELETE {}", path);
        let response = self
            .client
            .delete(self.url(path))
            .bearer_auth(&self.token)
            .send()
            .await?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            tracing::debug!("{} already deleted", path);
            return Ok(());
        }
        check_status(response).await.map(|_| ())
    }

    pub async fn account(&self) -> Result<Account> {
        let envelope: AccountEnvelope = self.get("account").await?;
        Ok(envelope.account)
    }

    pub async fn list_keys(&self) -> Result<Vec<SshKey>> {
        let envelope: SshKeysEnvelope = self
            .get(&format!("account/keys?per_page={PER_PAGE}"))
            .await?;
        Ok(envelope.ssh_keys)
    }

    pub async fn create_key(&self, name: &str, public_key: &str) -> Result<SshKey> {
        let body = serde_json::json!({ "name": name, "public_key": public_key });
        let envelope: SshKeyEnvelope = self.post("account/keys", &body).await?;
        Ok(envelope.ssh_key)
    }

    pub async fn delete_key(&self, id: &str) -> Result<()> {
        self.delete(&format!("account/keys/{id}")).await
    }

    pub async fn list_vpcs(&self) -> Result<Vec<Vpc>> {
        let envelope: VpcsEnvelope = self.get(&format!("vpcs?per_page={PER_PAGE}")).await?;
        Ok(envelope.vpcs)
    }

    pub async fn create_vpc(&self, request: &CreateVpc) -> Result<Vpc> {
        let envelope: VpcEnvelope = self.post("vpcs", request).await?;
        Ok(envelope.vpc)
    }

    pub async fn get_vpc(&self, id: &str) -> Result<Vpc> {
        let envelope: VpcEnvelope = self.get(&format!("vpcs/{id}")).await?;
        Ok(envelope.vpc)
    }

    pub async fn update_vpc_description(&self, id: &str, description: &str) -> Result<Vpc> {
        let body = serde_json::json!({ "description": description });
        let envelope: VpcEnvelope = self.patch(&format!("vpcs/{id}"), &body).await?;
        Ok(envelope.vpc)
    }

    pub async fn delete_vpc(&self, id: &str) -> Result<()> {
        self.delete(&format!("vpcs/{id}")).await
    }

    pub async fn list_firewalls(&self) -> Result<Vec<Firewall>> {
        let envelope: FirewallsEnvelope =
            self.get(&format!("firewalls?per_page={PER_PAGE}")).await?;
        Ok(envelope.firewalls)
    }

    pub async fn get_firewall(&self, id: &str) -> Result<Firewall> {
        let envelope: FirewallEnvelope = self.get(&format!("firewalls/{id}")).await?;
        Ok(envelope.firewall)
    }

    pub async fn create_firewall(&self, request: &FirewallRequest) -> Result<Firewall> {
        let envelope: FirewallEnvelope = self.post("firewalls", request).await?;
        Ok(envelope.firewall)
    }

    pub async fn update_firewall(&self, id: &str, request: &FirewallRequest) -> Result<Firewall> {
        let envelope: FirewallEnvelope = self.put(&format!("firewalls/{id}"), request).await?;
        Ok(envelope.firewall)
    }

    pub async fn delete_firewall(&self, id: &str) -> Result<()> {
        self.delete(&format!("firewalls/{id}")).await
    }

    /// Droplets carrying `tag`
    pub async fn list_droplets(&self, tag: &str) -> Result<Vec<Droplet>> {
        let envelope: DropletsEnvelope = self
            .get(&format!("droplets?tag_name={tag}&per_page={PER_PAGE}"))
            .await?;
        Ok(envelope.droplets)
    }

    pub async fn get_droplet(&self, id: &str) -> Result<Droplet> {
        let envelope: DropletEnvelope = self.get(&format!("droplets/{id}")).await?;
        Ok(envelope.droplet)
    }

    pub async fn create_droplet(&self, request: &CreateDroplet) -> Result<Droplet> {
        let envelope: DropletEnvelope = self.post("droplets", request).await?;
        Ok(envelope.droplet)
    }

    pub async fn delete_droplet(&self, id: &str) -> Result<()> {
        self.delete(&format!("droplets/{id}")).await
    }

    pub async fn list_load_balancers(&self) -> Result<Vec<LoadBalancer>> {
        let envelope: LoadBalancersEnvelope = self
            .get(&format!("load_balancers?per_page={PER_PAGE}"))
            .await?;
        Ok(envelope.load_balancers)
    }

    pub async fn get_load_balancer(&self, id: &str) -> Result<LoadBalancer> {
        let envelope: LoadBalancerEnvelope = self.get(&format!("load_balancers/{id}")).await?;
        Ok(envelope.load_balancer)
    }

    pub async fn create_load_balancer(&self, request: &LoadBalancerRequest) -> Result<LoadBalancer> {
        let envelope: LoadBalancerEnvelope = self.post("load_balancers", request).await?;
        Ok(envelope.load_balancer)
    }

    pub async fn update_load_balancer(
        &self,
        id: &str,
        request: &LoadBalancerRequest,
    ) -> Result<LoadBalancer> {
        let envelope: LoadBalancerEnvelope =
            self.put(&format!("load_balancers/{id}"), request).await?;
        Ok(envelope.load_balancer)
    }

    pub async fn delete_load_balancer(&self, id: &str) -> Result<()> {
        self.delete(&format!("load_balancers/{id}")).await
    }
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ApiError>(&body)
        .map(|e| e.message)
        .unwrap_or(body);
    Err(DigitalOceanError::Api {
        status: status.as_u16(),
        message,
    })
}

async fn parse_response<T: DeserializeOwned>(response: reqwest::Response) -> Result<T> {
    let response = check_status(response).await?;
    let body = response.text().await?;
    Ok(serde_json::from_str(&body)?)
}

/// Error body returned with every non-2xx response
#[derive(Debug, Clone, Deserialize)]
struct ApiError {
    #[allow(dead_code)]
    id: String,
    message: String,
}

#[derive(Debug, Clone, Deserialize)]
struct AccountEnvelope {
    account: Account,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub email: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub droplet_limit: u32,
}

#[derive(Debug, Clone, Deserialize)]
struct SshKeysEnvelope {
    ssh_keys: Vec<SshKey>,
}

#[derive(Debug, Clone, Deserialize)]
struct SshKeyEnvelope {
    ssh_key: SshKey,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SshKey {
    pub id: u64,
    pub name: String,
    pub public_key: String,
    #[serde(default)]
    pub fingerprint: String,
}

#[derive(Debug, Clone, Deserialize)]
struct VpcsEnvelope {
    vpcs: Vec<Vpc>,
}

#[derive(Debug, Clone, Deserialize)]
struct VpcEnvelope {
    vpc: Vpc,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Vpc {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub region: String,
    pub ip_range: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct CreateVpc {
    pub name: String,
    pub region: String,
    pub ip_range: String,
    pub description: String,
}

#[derive(Debug, Clone, Deserialize)]
struct FirewallsEnvelope {
    firewalls: Vec<Firewall>,
}

#[derive(Debug, Clone, Deserialize)]
struct FirewallEnvelope {
    firewall: Firewall,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Firewall {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub inbound_rules: Vec<InboundRule>,
    #[serde(default)]
    pub outbound_rules: Vec<OutboundRule>,
    #[serde(default)]
    pub droplet_ids: Vec<u64>,
    /// Droplets carrying any of these tags are members
    #[serde(default)]
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FirewallRequest {
    pub name: String,
    pub inbound_rules: Vec<InboundRule>,
    pub outbound_rules: Vec<OutboundRule>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub droplet_ids: Vec<u64>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InboundRule {
    pub protocol: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub ports: String,
    pub sources: Addresses,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboundRule {
    pub protocol: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub ports: String,
    pub destinations: Addresses,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Addresses {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub addresses: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct DropletsEnvelope {
    droplets: Vec<Droplet>,
}

#[derive(Debug, Clone, Deserialize)]
struct DropletEnvelope {
    droplet: Droplet,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Droplet {
    pub id: u64,
    pub name: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub size_slug: String,
    #[serde(default)]
    pub image: Option<Image>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub networks: Networks,
    #[serde(default)]
    pub vpc_uuid: Option<String>,
}

impl Droplet {
    fn address(&self, kind: &str) -> Option<String> {
        self.networks
            .v4
            .iter()
            .find(|n| n.kind == kind)
            .map(|n| n.ip_address.clone())
    }

    pub fn public_ip(&self) -> Option<String> {
        self.address("public")
    }

    pub fn private_ip(&self) -> Option<String> {
        self.address("private")
    }

    /// Booted and addressed
    pub fn is_active(&self) -> bool {
        self.status == "active" && !self.networks.v4.is_empty()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Image {
    #[serde(default)]
    pub slug: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Networks {
    #[serde(default)]
    pub v4: Vec<NetworkV4>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkV4 {
    pub ip_address: String,
    #[serde(rename = "type")]
    pub kind: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct CreateDroplet {
    pub name: String,
    pub region: String,
    pub size: String,
    pub image: String,
    pub ssh_keys: Vec<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_data: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vpc_uuid: Option<String>,
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct LoadBalancersEnvelope {
    load_balancers: Vec<LoadBalancer>,
}

#[derive(Debug, Clone, Deserialize)]
struct LoadBalancerEnvelope {
    load_balancer: LoadBalancer,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadBalancer {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub ip: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub tag: String,
    #[serde(default)]
    pub region: Option<Region>,
    #[serde(default)]
    pub forwarding_rules: Vec<LbForwardingRule>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Region {
    pub slug: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LbForwardingRule {
    pub entry_protocol: String,
    pub entry_port: u16,
    pub target_protocol: String,
    pub target_port: u16,
}

#[derive(Debug, Clone, Serialize)]
pub struct LoadBalancerRequest {
    pub name: String,
    pub region: String,
    pub tag: String,
    pub forwarding_rules: Vec<LbForwardingRule>,
}
